pub mod collector;
pub mod models;
pub mod streaming;

pub use collector::{collect_chat_completion, DEFAULT_COLLECT_TIMEOUT_SECS};
pub use models::{OpenAIContent, OpenAIMessage, OpenAIRequest};
pub use streaming::{create_openai_sse_stream, BackendByteStream};
