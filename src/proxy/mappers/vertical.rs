// Vertical Studio data stream parsing
//
// The backend emits newline-terminated records of the form `<tag>:<payload>`.
// Tags seen in the wild: `f:` message envelope, `0:` content fragment,
// `g:` reasoning fragment, `e:` end-of-stream with usage, `d:` done,
// `8:` metadata. Everything else is skipped.

use bytes::BytesMut;
use serde::Deserialize;

use crate::proxy::error::{RelayError, RelayResult};

/// Token usage reported by the backend's end-of-stream record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl Usage {
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// One parsed record of the backend stream.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// `f:` opened a message envelope
    MessageStart { message_id: String },
    /// `0:` visible answer fragment
    Content(String),
    /// `g:` reasoning fragment
    Reasoning(String),
    /// `e:` terminal status plus usage, always penultimate
    Finish {
        finish_reason: Option<String>,
        usage: Usage,
    },
    /// `d:` stream completion
    Done,
}

#[derive(Debug, Deserialize)]
struct StartPayload {
    #[serde(rename = "messageId")]
    message_id: String,
}

#[derive(Debug, Deserialize)]
struct FinishPayload {
    #[serde(rename = "finishReason", default)]
    finish_reason: Option<String>,
    #[serde(default)]
    usage: Option<RawUsage>,
}

#[derive(Debug, Deserialize, Default)]
struct RawUsage {
    #[serde(rename = "promptTokens", default)]
    prompt_tokens: u32,
    #[serde(rename = "completionTokens", default)]
    completion_tokens: u32,
}

/// Incremental parser over the backend's newline-framed tag protocol.
///
/// Network chunks arrive at arbitrary boundaries; only complete lines are
/// parsed and a trailing partial line is carried into the next `feed`. The
/// parser state is owned by a single request and never shared.
#[derive(Debug, Default)]
pub struct DataStreamParser {
    buffer: BytesMut,
}

impl DataStreamParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume one chunk, returning the events its complete lines produced.
    pub fn feed(&mut self, chunk: &[u8]) -> RelayResult<Vec<StreamEvent>> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line_raw = self.buffer.split_to(pos + 1);
            if let Ok(line_str) = std::str::from_utf8(&line_raw) {
                if let Some(event) = parse_line(line_str.trim())? {
                    events.push(event);
                }
            }
        }
        Ok(events)
    }

    /// Flush a trailing unterminated line once the stream has ended.
    pub fn finish(&mut self) -> RelayResult<Vec<StreamEvent>> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let line_raw = self.buffer.split_to(self.buffer.len());
        let mut events = Vec::new();
        if let Ok(line_str) = std::str::from_utf8(&line_raw) {
            if let Some(event) = parse_line(line_str.trim())? {
                events.push(event);
            }
        }
        Ok(events)
    }
}

/// Parse one line into an event.
///
/// Malformed payloads are skipped, except on the `f:` start marker where a
/// broken envelope fails the whole stream.
fn parse_line(line: &str) -> RelayResult<Option<StreamEvent>> {
    if line.is_empty() {
        return Ok(None);
    }

    let (tag, payload) = match line.split_once(':') {
        Some(parts) => parts,
        None => {
            tracing::debug!("skipping untagged stream line");
            return Ok(None);
        }
    };

    match tag {
        "f" => match serde_json::from_str::<StartPayload>(payload) {
            Ok(start) => Ok(Some(StreamEvent::MessageStart {
                message_id: start.message_id,
            })),
            Err(e) => Err(RelayError::transcode(format!(
                "malformed message start record: {}",
                e
            ))),
        },
        "0" => Ok(parse_text_payload(payload).map(StreamEvent::Content)),
        "g" => Ok(parse_text_payload(payload).map(StreamEvent::Reasoning)),
        "e" => match serde_json::from_str::<FinishPayload>(payload) {
            Ok(finish) => {
                let raw = finish.usage.unwrap_or_default();
                Ok(Some(StreamEvent::Finish {
                    finish_reason: finish.finish_reason,
                    usage: Usage {
                        prompt_tokens: raw.prompt_tokens,
                        completion_tokens: raw.completion_tokens,
                    },
                }))
            }
            Err(e) => {
                tracing::debug!("skipping malformed end-of-stream record: {}", e);
                Ok(None)
            }
        },
        "d" => Ok(Some(StreamEvent::Done)),
        _ => Ok(None),
    }
}

/// Content and reasoning payloads are JSON string literals.
fn parse_text_payload(payload: &str) -> Option<String> {
    match serde_json::from_str::<String>(payload) {
        Ok(text) => Some(text),
        Err(e) => {
            tracing::debug!("skipping malformed text fragment: {}", e);
            None
        }
    }
}
