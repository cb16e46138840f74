// OpenAI streaming transformation
use bytes::Bytes;
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::json;
use std::pin::Pin;
use tracing::debug;

use super::models::{completion_id, normalize_finish_reason, UsageInfo};
use crate::proxy::mappers::vertical::{DataStreamParser, StreamEvent, Usage};
use crate::proxy::session::ContinuationUpdate;

pub type BackendByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>;

/// Transcode the backend's line-framed stream into OpenAI SSE chunks.
///
/// Reasoning fragments are parsed either way but only surface as
/// `reasoning_content` deltas when `output_reasoning` is set. The
/// continuation update, when present, is committed only after the backend
/// stream drained cleanly, so a broken stream never poisons the session
/// cache.
pub fn create_openai_sse_stream(
    mut backend_stream: BackendByteStream,
    model: String,
    output_reasoning: bool,
    continuation: Option<ContinuationUpdate>,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    let stream_id = completion_id();
    let created_ts = Utc::now().timestamp();

    let stream = async_stream::stream! {
        let mut parser = DataStreamParser::new();
        let mut assistant_reply = String::new();
        let mut role_sent = false;
        let mut final_usage = Usage::default();
        let mut final_reason: Option<String> = None;
        let mut input_done = false;

        while !input_done {
            let events = match backend_stream.next().await {
                Some(Ok(bytes)) => match parser.feed(&bytes) {
                    Ok(events) => events,
                    Err(e) => {
                        debug!("Stream transcode failed: {}", e);
                        let error_chunk = json!({
                            "id": &stream_id,
                            "object": "chat.completion.chunk",
                            "created": created_ts,
                            "model": &model,
                            "choices": [
                                {
                                    "index": 0,
                                    "delta": { "content": format!("Error: {}", e) },
                                    "finish_reason": "stop"
                                }
                            ]
                        });
                        yield Ok::<Bytes, String>(Bytes::from(format!(
                            "data: {}\n\n",
                            serde_json::to_string(&error_chunk).unwrap_or_default()
                        )));
                        yield Ok::<Bytes, String>(Bytes::from("data: [DONE]\n\n"));
                        return;
                    }
                },
                Some(Err(e)) => {
                    debug!("Backend stream transport error: {}", e);
                    let error_chunk = json!({
                        "id": &stream_id,
                        "object": "chat.completion.chunk",
                        "created": created_ts,
                        "model": &model,
                        "choices": [
                            {
                                "index": 0,
                                "delta": { "content": format!("Error: backend stream failed: {}", e) },
                                "finish_reason": "stop"
                            }
                        ]
                    });
                    yield Ok::<Bytes, String>(Bytes::from(format!(
                        "data: {}\n\n",
                        serde_json::to_string(&error_chunk).unwrap_or_default()
                    )));
                    yield Ok::<Bytes, String>(Bytes::from("data: [DONE]\n\n"));
                    return;
                }
                None => {
                    input_done = true;
                    match parser.finish() {
                        Ok(events) => events,
                        Err(e) => {
                            debug!("Stream transcode failed on trailing data: {}", e);
                            let error_chunk = json!({
                                "id": &stream_id,
                                "object": "chat.completion.chunk",
                                "created": created_ts,
                                "model": &model,
                                "choices": [
                                    {
                                        "index": 0,
                                        "delta": { "content": format!("Error: {}", e) },
                                        "finish_reason": "stop"
                                    }
                                ]
                            });
                            yield Ok::<Bytes, String>(Bytes::from(format!(
                                "data: {}\n\n",
                                serde_json::to_string(&error_chunk).unwrap_or_default()
                            )));
                            yield Ok::<Bytes, String>(Bytes::from("data: [DONE]\n\n"));
                            return;
                        }
                    }
                }
            };

            for event in events {
                match event {
                    StreamEvent::MessageStart { message_id } => {
                        debug!("Backend message started: {}", message_id);
                    }
                    StreamEvent::Content(text) => {
                        if text.is_empty() {
                            continue;
                        }
                        assistant_reply.push_str(&text);

                        let mut delta = serde_json::Map::new();
                        if !role_sent {
                            delta.insert("role".to_string(), json!("assistant"));
                            role_sent = true;
                        }
                        delta.insert("content".to_string(), json!(text));

                        let chunk = json!({
                            "id": &stream_id,
                            "object": "chat.completion.chunk",
                            "created": created_ts,
                            "model": &model,
                            "choices": [
                                { "index": 0, "delta": delta, "finish_reason": null }
                            ]
                        });
                        yield Ok::<Bytes, String>(Bytes::from(format!(
                            "data: {}\n\n",
                            serde_json::to_string(&chunk).unwrap_or_default()
                        )));
                    }
                    StreamEvent::Reasoning(text) => {
                        if !output_reasoning || text.is_empty() {
                            continue;
                        }

                        let mut delta = serde_json::Map::new();
                        if !role_sent {
                            delta.insert("role".to_string(), json!("assistant"));
                            role_sent = true;
                        }
                        delta.insert("reasoning_content".to_string(), json!(text));

                        let chunk = json!({
                            "id": &stream_id,
                            "object": "chat.completion.chunk",
                            "created": created_ts,
                            "model": &model,
                            "choices": [
                                { "index": 0, "delta": delta, "finish_reason": null }
                            ]
                        });
                        yield Ok::<Bytes, String>(Bytes::from(format!(
                            "data: {}\n\n",
                            serde_json::to_string(&chunk).unwrap_or_default()
                        )));
                    }
                    StreamEvent::Finish {
                        finish_reason,
                        usage,
                    } => {
                        final_reason = finish_reason;
                        final_usage = usage;
                    }
                    StreamEvent::Done => {
                        // the done marker ends the message; anything after it
                        // is dropped and the backend stream is not read further
                        input_done = true;
                        break;
                    }
                }
            }
        }

        let final_chunk = json!({
            "id": &stream_id,
            "object": "chat.completion.chunk",
            "created": created_ts,
            "model": &model,
            "usage": UsageInfo::from(final_usage),
            "choices": [
                {
                    "index": 0,
                    "delta": {},
                    "finish_reason": normalize_finish_reason(final_reason.as_deref())
                }
            ]
        });
        yield Ok::<Bytes, String>(Bytes::from(format!(
            "data: {}\n\n",
            serde_json::to_string(&final_chunk).unwrap_or_default()
        )));
        yield Ok::<Bytes, String>(Bytes::from("data: [DONE]\n\n"));

        if let Some(update) = continuation {
            update.commit(&assistant_reply);
        }
    };

    Box::pin(stream)
}
