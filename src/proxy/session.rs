// Session resolution against the conversation cache

use std::sync::Arc;

use tracing::{debug, info};

use crate::proxy::conversation_cache::{CachedSession, ConversationCache};
use crate::proxy::error::{RelayError, RelayResult};
use crate::proxy::fingerprint::ConversationFingerprint;
use crate::proxy::mappers::openai::OpenAIMessage;
use crate::proxy::token_pool::TokenPool;
use crate::proxy::upstream::VerticalClient;

/// Everything the completion handler needs to send one prompt turn.
pub struct ResolvedSession {
    pub chat_id: String,
    pub auth_token: String,
    pub message_to_send: String,
    pub system_prompt: String,
    pub continuation: ContinuationUpdate,
    pub reused: bool,
}

/// Deferred cache insert carrying the turns that produced a reply.
///
/// Committed by the transcoders once the backend stream completed cleanly,
/// so the next request in the same conversation (which echoes this reply in
/// its history) lands on the same chat.
pub struct ContinuationUpdate {
    cache: Arc<ConversationCache>,
    system_prompt: String,
    turns: Vec<(String, String)>,
    session: CachedSession,
}

impl ContinuationUpdate {
    pub fn new(
        cache: Arc<ConversationCache>,
        system_prompt: String,
        turns: Vec<(String, String)>,
        session: CachedSession,
    ) -> Self {
        Self {
            cache,
            system_prompt,
            turns,
            session,
        }
    }

    pub fn commit(self, assistant_reply: &str) {
        let mut turns = self.turns;
        turns.push(("assistant".to_string(), assistant_reply.to_string()));
        let fingerprint = ConversationFingerprint::compute(
            &self.system_prompt,
            turns.iter().map(|(role, content)| (role.as_str(), content.as_str())),
        );
        self.cache.insert(fingerprint, self.session);
    }
}

struct ConversationParts {
    system_prompt: String,
    turns: Vec<(String, String)>,
    latest_user: String,
}

fn decompose(messages: &[OpenAIMessage]) -> RelayResult<ConversationParts> {
    let system_prompt = messages
        .iter()
        .filter(|m| m.role == "system")
        .map(|m| m.text())
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();

    let turns: Vec<(String, String)> = messages
        .iter()
        .filter(|m| m.role != "system")
        .map(|m| (m.role.clone(), m.text()))
        .collect();

    let latest_user = turns
        .iter()
        .rev()
        .find(|(role, _)| role == "user")
        .map(|(_, content)| content.clone())
        .ok_or_else(|| {
            RelayError::InvalidRequest("no user message found in request".to_string())
        })?;

    Ok(ConversationParts {
        system_prompt,
        turns,
        latest_user,
    })
}

/// Replay format for sending an entire conversation into a fresh chat.
fn render_history(turns: &[(String, String)]) -> String {
    let mut parts = Vec::new();
    for (role, content) in turns {
        match role.as_str() {
            "user" => parts.push(format!("User: {}", content)),
            "assistant" => parts.push(format!("Assistant: {}", content)),
            _ => {}
        }
    }
    parts.join("\n")
}

pub struct SessionResolver {
    cache: Arc<ConversationCache>,
    tokens: Arc<TokenPool>,
    client: Arc<VerticalClient>,
}

impl SessionResolver {
    pub fn new(
        cache: Arc<ConversationCache>,
        tokens: Arc<TokenPool>,
        client: Arc<VerticalClient>,
    ) -> Self {
        Self {
            cache,
            tokens,
            client,
        }
    }

    /// Resolve a request onto a backend chat session.
    ///
    /// The history prefix (all non-system turns except the trailing one) is
    /// fingerprinted and looked up; a hit continues the cached chat with just
    /// the latest user message, a miss creates a fresh chat and replays the
    /// whole conversation into it. One auth token is drawn per request and
    /// covers both the creation and the prompt call. The cache lock is never
    /// held across the network calls.
    pub async fn resolve(
        &self,
        model_url: &str,
        messages: &[OpenAIMessage],
    ) -> RelayResult<ResolvedSession> {
        let parts = decompose(messages)?;
        let auth_token = self.tokens.next_token().to_string();

        let prefix = &parts.turns[..parts.turns.len() - 1];
        let lookup_fingerprint = if prefix.is_empty() {
            // A fresh conversation has no prefix to recognize it by; mapping
            // the bare system prompt would alias unrelated conversations.
            None
        } else {
            Some(ConversationFingerprint::compute(
                &parts.system_prompt,
                prefix.iter().map(|(r, c)| (r.as_str(), c.as_str())),
            ))
        };

        if let Some(fingerprint) = &lookup_fingerprint {
            if let Some(session) = self.cache.lookup(fingerprint, model_url) {
                debug!("Conversation cache hit, continuing chat {}", session.chat_id);
                let continuation = ContinuationUpdate::new(
                    self.cache.clone(),
                    parts.system_prompt.clone(),
                    parts.turns.clone(),
                    session.clone(),
                );
                return Ok(ResolvedSession {
                    chat_id: session.chat_id,
                    auth_token,
                    message_to_send: parts.latest_user,
                    system_prompt: parts.system_prompt,
                    continuation,
                    reused: true,
                });
            }
        }

        let chat_id = self.client.create_chat(model_url, &auth_token).await?;
        info!("Created backend chat {} at {}", chat_id, model_url);

        let session = CachedSession {
            chat_id: chat_id.clone(),
            model_url: model_url.to_string(),
        };
        if let Some(fingerprint) = lookup_fingerprint {
            self.cache.insert(fingerprint, session.clone());
        }

        let rendered = render_history(&parts.turns);
        let message_to_send = if rendered.is_empty() {
            parts.latest_user.clone()
        } else {
            rendered
        };

        let continuation = ContinuationUpdate::new(
            self.cache.clone(),
            parts.system_prompt.clone(),
            parts.turns.clone(),
            session,
        );

        Ok(ResolvedSession {
            chat_id,
            auth_token,
            message_to_send,
            system_prompt: parts.system_prompt,
            continuation,
            reused: false,
        })
    }
}
