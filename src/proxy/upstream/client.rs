// Vertical Studio upstream client

use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use reqwest::{header, redirect, Client};
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::proxy::error::{RelayError, RelayResult};

const PROMPT_ENDPOINT: &str = "https://app.verticalstudio.ai/api/chat/prompt/text";
const AUTH_COOKIE_NAME: &str = "sb-ppdjlmajmpcqpkdmnzfd-auth-token";
const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// One prompt turn to send into an existing chat.
pub struct PromptRequest<'a> {
    pub chat_id: &'a str,
    pub model_id: &'a str,
    pub message: &'a str,
    pub system_prompt: &'a str,
    pub output_reasoning: bool,
}

pub struct VerticalClient {
    http_client: Client,
    prompt_endpoint: String,
}

impl VerticalClient {
    /// Redirects stay disabled: chat creation reads the redirect itself.
    pub fn new(connect_timeout_secs: u64) -> RelayResult<Self> {
        let http_client = Client::builder()
            .connect_timeout(Duration::from_secs(connect_timeout_secs))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(redirect::Policy::none())
            .user_agent(BROWSER_USER_AGENT)
            .build()
            .map_err(|e| RelayError::config(format!("failed to build http client: {}", e)))?;

        Ok(Self {
            http_client,
            prompt_endpoint: PROMPT_ENDPOINT.to_string(),
        })
    }

    pub fn with_prompt_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.prompt_endpoint = endpoint.into();
        self
    }

    /// Create a chat session at the model's endpoint.
    ///
    /// The backend answers with a non-final redirect whose location path ends
    /// in the new chat id.
    pub async fn create_chat(&self, model_url: &str, auth_token: &str) -> RelayResult<String> {
        let response = self
            .http_client
            .post(model_url)
            .header(header::COOKIE, cookie_value(auth_token))
            .send()
            .await
            .map_err(|e| RelayError::backend(format!("chat creation request failed: {}", e)))?;

        let status = response.status();
        if !status.is_redirection() {
            return Err(RelayError::session(format!(
                "chat creation returned {} instead of a redirect",
                status
            )));
        }

        let location = response
            .headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RelayError::session("chat creation redirect carries no location"))?;

        extract_chat_id(location)
    }

    /// Send a prompt turn and return the raw line-framed byte stream.
    pub async fn stream_prompt(
        &self,
        auth_token: &str,
        request: &PromptRequest<'_>,
    ) -> RelayResult<Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>> {
        let payload = build_prompt_payload(request);

        let response = self
            .http_client
            .post(&self.prompt_endpoint)
            .header(header::COOKIE, cookie_value(auth_token))
            .header(header::ACCEPT, "text/event-stream")
            .json(&payload)
            .send()
            .await
            .map_err(|e| RelayError::backend(format!("prompt request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(200).collect();
            return Err(RelayError::backend(format!(
                "prompt request returned {}: {}",
                status, snippet
            )));
        }

        Ok(Box::pin(response.bytes_stream()))
    }
}

fn cookie_value(auth_token: &str) -> String {
    format!("{}={}", AUTH_COOKIE_NAME, auth_token)
}

fn build_prompt_payload(request: &PromptRequest<'_>) -> Value {
    let system_prompt = if request.system_prompt.is_empty() {
        Value::Null
    } else {
        Value::String(request.system_prompt.to_string())
    };

    json!({
        "message": {
            "id": uuid::Uuid::new_v4().simple().to_string(),
            "createdAt": chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
            "role": "user",
            "content": request.message,
            "parts": [{"type": "text", "text": request.message}],
        },
        "chat": request.chat_id,
        "settings": {
            "modelId": request.model_id,
            "reasoning": request.output_reasoning,
            "toneOfVoice": null,
            "webSearch": false,
            "systemPromptPreset": null,
            "customSystemPrompt": system_prompt,
        },
    })
}

const CHAT_PATH_SEGMENT: &str = "/chat/";

/// Pull the chat id out of a redirect path like `/chat/cmfr5nvs312v8ycib`.
///
/// The id is whatever follows the last `/chat/` segment, and must be
/// non-empty ASCII alphanumeric; anything else means the backend did not
/// hand us a usable session.
fn extract_chat_id(location: &str) -> RelayResult<String> {
    let path = location
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or_default();
    let id = path
        .rfind(CHAT_PATH_SEGMENT)
        .map(|at| path[at + CHAT_PATH_SEGMENT.len()..].trim_end_matches('/'))
        .unwrap_or_default();

    if id.is_empty() || !id.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(RelayError::session(format!(
            "redirect location {:?} carries no usable chat id",
            location
        )));
    }
    Ok(id.to_string())
}
