// OpenAI chat wire types

use serde::{Deserialize, Serialize};

use crate::proxy::mappers::vertical::Usage;

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<OpenAIMessage>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<OpenAIContent>,
}

/// OpenAI allows message content as a bare string or a list of typed blocks.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OpenAIContent {
    String(String),
    Array(Vec<OpenAIContentBlock>),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OpenAIContentBlock {
    Text { text: String },
    #[serde(other)]
    Other,
}

impl OpenAIMessage {
    /// Flatten the content into plain text. Non-text blocks are dropped.
    pub fn text(&self) -> String {
        match &self.content {
            None => String::new(),
            Some(OpenAIContent::String(s)) => s.clone(),
            Some(OpenAIContent::Array(blocks)) => blocks
                .iter()
                .filter_map(|block| match block {
                    OpenAIContentBlock::Text { text } => Some(text.as_str()),
                    OpenAIContentBlock::Other => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct UsageInfo {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl From<Usage> for UsageInfo {
    fn from(usage: Usage) -> Self {
        Self {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResponseMessage {
    pub role: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionChoice {
    pub index: u32,
    pub message: ResponseMessage,
    pub finish_reason: String,
}

#[derive(Debug, Serialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<ChatCompletionChoice>,
    pub usage: UsageInfo,
}

pub fn completion_id() -> String {
    format!("chatcmpl-{}", uuid::Uuid::new_v4().simple())
}

/// Map the backend's kebab-case finish reasons onto OpenAI's vocabulary.
pub fn normalize_finish_reason(reason: Option<&str>) -> String {
    match reason {
        Some("length") => "length".to_string(),
        Some("content-filter") | Some("content_filter") => "content_filter".to_string(),
        Some("tool-calls") | Some("tool_calls") => "tool_calls".to_string(),
        _ => "stop".to_string(),
    }
}
