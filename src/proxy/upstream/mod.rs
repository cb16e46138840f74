pub mod client;

pub use client::{PromptRequest, VerticalClient};
