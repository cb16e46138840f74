use chrono::Utc;
use futures::StreamExt;
use tokio::time::{timeout, Duration};
use tracing::debug;

use super::models::{
    completion_id, normalize_finish_reason, ChatCompletionChoice, ChatCompletionResponse,
    ResponseMessage, UsageInfo,
};
use super::streaming::BackendByteStream;
use crate::proxy::error::{RelayError, RelayResult};
use crate::proxy::mappers::vertical::{DataStreamParser, StreamEvent, Usage};
use crate::proxy::session::ContinuationUpdate;

pub const DEFAULT_COLLECT_TIMEOUT_SECS: u64 = 300;
pub const MAX_COLLECTED_FRAGMENTS: usize = 10_000;

#[derive(Debug, Default)]
struct CollectedReply {
    content: String,
    reasoning: String,
    finish_reason: Option<String>,
    usage: Usage,
    fragments: usize,
    done: bool,
}

fn ingest(events: Vec<StreamEvent>, collected: &mut CollectedReply) -> RelayResult<()> {
    for event in events {
        match event {
            StreamEvent::MessageStart { message_id } => {
                debug!("Backend message started: {}", message_id);
            }
            StreamEvent::Content(text) => {
                collected.content.push_str(&text);
                collected.fragments += 1;
            }
            StreamEvent::Reasoning(text) => {
                collected.reasoning.push_str(&text);
                collected.fragments += 1;
            }
            StreamEvent::Finish {
                finish_reason,
                usage,
            } => {
                collected.finish_reason = finish_reason;
                collected.usage = usage;
            }
            StreamEvent::Done => {
                // the done marker ends the message; drop anything after it
                collected.done = true;
                break;
            }
        }
    }

    if collected.fragments > MAX_COLLECTED_FRAGMENTS {
        return Err(RelayError::transcode(format!(
            "stream too large: {} fragments exceeds limit of {}",
            collected.fragments, MAX_COLLECTED_FRAGMENTS
        )));
    }
    Ok(())
}

/// Drain the backend stream into a single chat completion for non-stream
/// clients. The continuation update is committed only after the whole reply
/// arrived.
pub async fn collect_chat_completion(
    mut backend_stream: BackendByteStream,
    model: String,
    output_reasoning: bool,
    continuation: Option<ContinuationUpdate>,
    timeout_secs: u64,
) -> RelayResult<ChatCompletionResponse> {
    let collection = async {
        let mut parser = DataStreamParser::new();
        let mut collected = CollectedReply::default();

        while let Some(item) = backend_stream.next().await {
            let bytes = item
                .map_err(|e| RelayError::backend(format!("backend stream failed: {}", e)))?;
            ingest(parser.feed(&bytes)?, &mut collected)?;
            if collected.done {
                break;
            }
        }
        if !collected.done {
            ingest(parser.finish()?, &mut collected)?;
        }

        Ok::<CollectedReply, RelayError>(collected)
    };

    let collected = match timeout(Duration::from_secs(timeout_secs), collection).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(RelayError::backend(format!(
                "stream collection timed out after {}s",
                timeout_secs
            )))
        }
    };

    if let Some(update) = continuation {
        update.commit(&collected.content);
    }

    let reasoning_content = if output_reasoning && !collected.reasoning.is_empty() {
        Some(collected.reasoning)
    } else {
        None
    };

    Ok(ChatCompletionResponse {
        id: completion_id(),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model,
        choices: vec![ChatCompletionChoice {
            index: 0,
            message: ResponseMessage {
                role: "assistant".to_string(),
                content: collected.content,
                reasoning_content,
            },
            finish_reason: normalize_finish_reason(collected.finish_reason.as_deref()),
        }],
        usage: UsageInfo::from(collected.usage),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::conversation_cache::{CachedSession, ConversationCache};
    use crate::proxy::fingerprint::ConversationFingerprint;
    use bytes::Bytes;
    use std::sync::Arc;

    fn backend_stream(chunks: Vec<&str>) -> BackendByteStream {
        let items: Vec<Result<Bytes, reqwest::Error>> = chunks
            .into_iter()
            .map(|c| Ok(Bytes::from(c.to_string())))
            .collect();
        Box::pin(futures::stream::iter(items))
    }

    #[tokio::test]
    async fn test_collects_full_reply() {
        let input = backend_stream(vec![
            "f:{\"messageId\":\"m1\"}\n0:\"Hel\"\n0:\"lo\"\n",
            "e:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":5,\"completionTokens\":2}}\nd:{}\n",
        ]);
        let response = collect_chat_completion(input, "sonar-pro".to_string(), false, None, 30)
            .await
            .unwrap();

        assert_eq!(response.object, "chat.completion");
        assert_eq!(response.model, "sonar-pro");
        assert_eq!(response.choices.len(), 1);
        assert_eq!(response.choices[0].message.role, "assistant");
        assert_eq!(response.choices[0].message.content, "Hello");
        assert!(response.choices[0].message.reasoning_content.is_none());
        assert_eq!(response.choices[0].finish_reason, "stop");
        assert_eq!(response.usage.prompt_tokens, 5);
        assert_eq!(response.usage.completion_tokens, 2);
        assert_eq!(response.usage.total_tokens, 7);
        assert!(response.id.starts_with("chatcmpl-"));
    }

    #[tokio::test]
    async fn test_reasoning_separated_for_thinking_model() {
        let input = backend_stream(vec![
            "f:{\"messageId\":\"m1\"}\ng:\"step \"\ng:\"one\"\n0:\"answer\"\nd:{}\n",
        ]);
        let response = collect_chat_completion(
            input,
            "sonar-reasoning-thinking".to_string(),
            true,
            None,
            30,
        )
        .await
        .unwrap();

        assert_eq!(response.choices[0].message.content, "answer");
        assert_eq!(
            response.choices[0].message.reasoning_content.as_deref(),
            Some("step one")
        );
    }

    #[tokio::test]
    async fn test_reasoning_dropped_for_plain_model() {
        let input =
            backend_stream(vec!["f:{\"messageId\":\"m1\"}\ng:\"hidden\"\n0:\"answer\"\nd:{}\n"]);
        let response = collect_chat_completion(input, "sonar-pro".to_string(), false, None, 30)
            .await
            .unwrap();

        assert_eq!(response.choices[0].message.content, "answer");
        assert!(response.choices[0].message.reasoning_content.is_none());
    }

    #[tokio::test]
    async fn test_malformed_start_frame_is_transcode_error() {
        let input = backend_stream(vec!["f:not-json\n"]);
        let result =
            collect_chat_completion(input, "sonar-pro".to_string(), false, None, 30).await;
        assert!(matches!(result, Err(RelayError::Transcode(_))));
    }

    #[tokio::test]
    async fn test_stalled_stream_times_out() {
        let input: BackendByteStream = Box::pin(futures::stream::pending());
        let result = collect_chat_completion(input, "sonar-pro".to_string(), false, None, 0).await;
        assert!(matches!(result, Err(RelayError::BackendUnavailable(_))));
    }

    #[tokio::test]
    async fn test_collection_stops_at_done_marker() {
        let input = backend_stream(vec!["f:{\"messageId\":\"m1\"}\n0:\"a\"\nd:{}\n0:\"leak\"\n"]);
        let response = collect_chat_completion(input, "sonar-pro".to_string(), false, None, 30)
            .await
            .unwrap();
        assert_eq!(response.choices[0].message.content, "a");
    }

    #[tokio::test]
    async fn test_done_marker_returns_without_eof() {
        let chunks: Vec<Result<Bytes, reqwest::Error>> =
            vec![Ok(Bytes::from("f:{\"messageId\":\"m1\"}\n0:\"hi\"\nd:{}\n"))];
        // the backend connection stays open after d:
        let input: BackendByteStream =
            Box::pin(futures::stream::iter(chunks).chain(futures::stream::pending()));

        let response = collect_chat_completion(input, "sonar-pro".to_string(), false, None, 2)
            .await
            .unwrap();
        assert_eq!(response.choices[0].message.content, "hi");
    }

    #[tokio::test]
    async fn test_fragment_cap_rejects_runaway_streams() {
        let mut body = String::from("f:{\"messageId\":\"m1\"}\n");
        for _ in 0..=MAX_COLLECTED_FRAGMENTS {
            body.push_str("0:\"x\"\n");
        }
        let result = collect_chat_completion(
            backend_stream(vec![&body]),
            "sonar-pro".to_string(),
            false,
            None,
            30,
        )
        .await;
        assert!(matches!(result, Err(RelayError::Transcode(_))));
    }

    #[tokio::test]
    async fn test_successful_collection_commits_continuation() {
        let cache = Arc::new(ConversationCache::new(8));
        let session = CachedSession {
            chat_id: "chat-7".to_string(),
            model_url: "https://backend/chat/new/sonar-pro".to_string(),
        };
        let update = ContinuationUpdate::new(
            cache.clone(),
            String::new(),
            vec![("user".to_string(), "hi".to_string())],
            session.clone(),
        );

        let input = backend_stream(vec!["f:{\"messageId\":\"m1\"}\n0:\"hello\"\nd:{}\n"]);
        collect_chat_completion(input, "sonar-pro".to_string(), false, Some(update), 30)
            .await
            .unwrap();

        let fingerprint =
            ConversationFingerprint::compute("", vec![("user", "hi"), ("assistant", "hello")]);
        assert_eq!(
            cache.lookup(&fingerprint, "https://backend/chat/new/sonar-pro"),
            Some(session)
        );
    }

    #[tokio::test]
    async fn test_failed_collection_skips_continuation_commit() {
        let cache = Arc::new(ConversationCache::new(8));
        let update = ContinuationUpdate::new(
            cache.clone(),
            String::new(),
            vec![("user".to_string(), "hi".to_string())],
            CachedSession {
                chat_id: "chat-7".to_string(),
                model_url: "url".to_string(),
            },
        );

        let input = backend_stream(vec!["f:not-json\n"]);
        let result =
            collect_chat_completion(input, "sonar-pro".to_string(), false, Some(update), 30).await;
        assert!(result.is_err());
        assert!(cache.is_empty());
    }
}
