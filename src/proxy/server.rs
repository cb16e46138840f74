use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use tokio::sync::oneshot;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::modules::catalog::ModelCatalog;
use crate::proxy::conversation_cache::ConversationCache;
use crate::proxy::error::{RelayError, RelayResult};
use crate::proxy::token_pool::TokenPool;
use crate::proxy::upstream::VerticalClient;

const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// Axum application state
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<ModelCatalog>,
    pub client_keys: Arc<HashSet<String>>,
    pub conversation_cache: Arc<ConversationCache>,
    /// None when no backend auth tokens were loaded; completions are refused
    /// with 503 until tokens exist.
    pub token_pool: Option<Arc<TokenPool>>,
    pub upstream: Arc<VerticalClient>,
    pub collect_timeout_secs: u64,
}

/// Axum server instance
pub struct AxumServer {
    shutdown_tx: Option<oneshot::Sender<()>>,
    local_addr: SocketAddr,
}

impl AxumServer {
    /// Start the relay server.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        host: String,
        port: u16,
        catalog: Arc<ModelCatalog>,
        client_keys: HashSet<String>,
        auth_tokens: Vec<String>,
        upstream: Arc<VerticalClient>,
        cache_capacity: usize,
        collect_timeout_secs: u64,
    ) -> RelayResult<(Self, tokio::task::JoinHandle<()>)> {
        let token_pool = if auth_tokens.is_empty() {
            tracing::warn!("No backend auth tokens loaded, completion requests will be refused");
            None
        } else {
            Some(Arc::new(TokenPool::new(auth_tokens)?))
        };

        let state = AppState {
            catalog,
            client_keys: Arc::new(client_keys),
            conversation_cache: Arc::new(ConversationCache::new(cache_capacity)),
            token_pool,
            upstream,
            collect_timeout_secs,
        };

        use crate::proxy::handlers;

        let app = Router::new()
            // OpenAI protocol, guarded by client API keys
            .route("/v1/models", get(handlers::openai::handle_list_models))
            .route(
                "/v1/chat/completions",
                post(handlers::openai::handle_chat_completions),
            )
            .route_layer(axum::middleware::from_fn_with_state(
                state.clone(),
                crate::proxy::middleware::client_auth_middleware,
            ))
            .route("/healthz", get(health_check_handler))
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(TraceLayer::new_for_http())
            .with_state(state);

        let addr = format!("{}:{}", host, port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| RelayError::config(format!("failed to bind address {}: {}", addr, e)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| RelayError::config(format!("failed to read bound address: {}", e)))?;

        tracing::info!("Relay server started at http://{}", local_addr);

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let server_instance = Self {
            shutdown_tx: Some(shutdown_tx),
            local_addr,
        };

        let handle = tokio::spawn(async move {
            use hyper::server::conn::http1;
            use hyper_util::rt::TokioIo;
            use hyper_util::service::TowerToHyperService;

            loop {
                tokio::select! {
                    res = listener.accept() => {
                        match res {
                            Ok((stream, _)) => {
                                let io = TokioIo::new(stream);
                                let service = TowerToHyperService::new(app.clone());

                                tokio::task::spawn(async move {
                                    if let Err(err) = http1::Builder::new()
                                        .serve_connection(io, service)
                                        .await
                                    {
                                        debug!("Connection handling ended or error: {:?}", err);
                                    }
                                });
                            }
                            Err(e) => {
                                error!("Failed to accept connection: {:?}", e);
                            }
                        }
                    }
                    _ = &mut shutdown_rx => {
                        tracing::info!("Relay server stopped listening");
                        break;
                    }
                }
            }
        });

        Ok((server_instance, handle))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the server
    pub fn stop(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
    }
}

/// Health check handler
async fn health_check_handler() -> Response {
    Json(serde_json::json!({
        "status": "ok"
    }))
    .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const CLIENT_KEY: &str = "sk-test-key";

    async fn spawn_relay(
        backend: &MockServer,
        client_keys: Vec<&str>,
        auth_tokens: Vec<&str>,
    ) -> AxumServer {
        let catalog = ModelCatalog::parse(&format!(
            r#"{{"models": [{{"modelId": "sonar-pro", "url": "{}/chat/new/sonar-pro"}}]}}"#,
            backend.uri()
        ))
        .unwrap();

        let upstream = VerticalClient::new(5)
            .unwrap()
            .with_prompt_endpoint(format!("{}/api/chat/prompt/text", backend.uri()));

        let (server, _handle) = AxumServer::start(
            "127.0.0.1".to_string(),
            0,
            Arc::new(catalog),
            client_keys.into_iter().map(String::from).collect(),
            auth_tokens.into_iter().map(String::from).collect(),
            Arc::new(upstream),
            16,
            30,
        )
        .await
        .unwrap();
        server
    }

    async fn mock_backend_roundtrip(backend: &MockServer, body: &str) {
        Mock::given(method("POST"))
            .and(path("/chat/new/sonar-pro"))
            .respond_with(ResponseTemplate::new(302).insert_header("Location", "/chat/e2e1"))
            .mount(backend)
            .await;
        Mock::given(method("POST"))
            .and(path("/api/chat/prompt/text"))
            .respond_with(ResponseTemplate::new(200).set_body_string(body.to_string()))
            .mount(backend)
            .await;
    }

    fn relay_url(server: &AxumServer, path: &str) -> String {
        format!("http://{}{}", server.local_addr(), path)
    }

    #[tokio::test]
    async fn test_healthz_is_open() {
        let backend = MockServer::start().await;
        let server = spawn_relay(&backend, vec![CLIENT_KEY], vec!["tok"]).await;

        let response = reqwest::get(relay_url(&server, "/healthz")).await.unwrap();
        assert_eq!(response.status(), 200);
        let body: Value = response.json().await.unwrap();
        assert_eq!(body["status"], "ok");

        server.stop();
    }

    #[tokio::test]
    async fn test_models_requires_api_key() {
        let backend = MockServer::start().await;
        let server = spawn_relay(&backend, vec![CLIENT_KEY], vec!["tok"]).await;
        let client = reqwest::Client::new();

        let missing = client
            .get(relay_url(&server, "/v1/models"))
            .send()
            .await
            .unwrap();
        assert_eq!(missing.status(), 401);

        let wrong = client
            .get(relay_url(&server, "/v1/models"))
            .bearer_auth("sk-wrong")
            .send()
            .await
            .unwrap();
        assert_eq!(wrong.status(), 403);

        server.stop();
    }

    #[tokio::test]
    async fn test_no_client_keys_means_service_unavailable() {
        let backend = MockServer::start().await;
        let server = spawn_relay(&backend, vec![], vec!["tok"]).await;

        let response = reqwest::Client::new()
            .get(relay_url(&server, "/v1/models"))
            .bearer_auth(CLIENT_KEY)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);

        server.stop();
    }

    #[tokio::test]
    async fn test_models_lists_base_and_thinking_variants() {
        let backend = MockServer::start().await;
        let server = spawn_relay(&backend, vec![CLIENT_KEY], vec!["tok"]).await;

        let body: Value = reqwest::Client::new()
            .get(relay_url(&server, "/v1/models"))
            .bearer_auth(CLIENT_KEY)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["object"], "list");
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|m| m["id"].as_str().unwrap())
            .collect();
        assert!(ids.contains(&"sonar-pro"));
        assert!(ids.contains(&"sonar-pro-thinking"));

        server.stop();
    }

    #[tokio::test]
    async fn test_unknown_model_is_not_found() {
        let backend = MockServer::start().await;
        let server = spawn_relay(&backend, vec![CLIENT_KEY], vec!["tok"]).await;

        let response = reqwest::Client::new()
            .post(relay_url(&server, "/v1/chat/completions"))
            .bearer_auth(CLIENT_KEY)
            .json(&json!({
                "model": "gpt-nonexistent",
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 404);

        server.stop();
    }

    #[tokio::test]
    async fn test_request_without_user_message_is_rejected() {
        let backend = MockServer::start().await;
        let server = spawn_relay(&backend, vec![CLIENT_KEY], vec!["tok"]).await;

        let response = reqwest::Client::new()
            .post(relay_url(&server, "/v1/chat/completions"))
            .bearer_auth(CLIENT_KEY)
            .json(&json!({
                "model": "sonar-pro",
                "messages": [{"role": "system", "content": "rules only"}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        server.stop();
    }

    #[tokio::test]
    async fn test_completions_without_backend_tokens_is_service_unavailable() {
        let backend = MockServer::start().await;
        let server = spawn_relay(&backend, vec![CLIENT_KEY], vec![]).await;

        let response = reqwest::Client::new()
            .post(relay_url(&server, "/v1/chat/completions"))
            .bearer_auth(CLIENT_KEY)
            .json(&json!({
                "model": "sonar-pro",
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);

        server.stop();
    }

    #[tokio::test]
    async fn test_streaming_completion_end_to_end() {
        let backend = MockServer::start().await;
        mock_backend_roundtrip(
            &backend,
            "f:{\"messageId\":\"m1\"}\n0:\"Hi \"\n0:\"there\"\ne:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":3,\"completionTokens\":2}}\nd:{}\n",
        )
        .await;
        let server = spawn_relay(&backend, vec![CLIENT_KEY], vec!["tok"]).await;

        let response = reqwest::Client::new()
            .post(relay_url(&server, "/v1/chat/completions"))
            .bearer_auth(CLIENT_KEY)
            .json(&json!({
                "model": "sonar-pro",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": true
            }))
            .send()
            .await
            .unwrap();

        assert_eq!(response.status(), 200);
        assert_eq!(
            response
                .headers()
                .get("Content-Type")
                .and_then(|v| v.to_str().ok()),
            Some("text/event-stream")
        );

        let body = response.text().await.unwrap();
        assert!(body.contains("\"content\":\"Hi \""));
        assert!(body.contains("\"content\":\"there\""));
        assert!(body.contains("\"finish_reason\":\"stop\""));
        assert!(body.trim_end().ends_with("data: [DONE]"));

        server.stop();
    }

    #[tokio::test]
    async fn test_non_streaming_completion_end_to_end() {
        let backend = MockServer::start().await;
        mock_backend_roundtrip(
            &backend,
            "f:{\"messageId\":\"m1\"}\n0:\"Hi \"\n0:\"there\"\ne:{\"finishReason\":\"stop\",\"usage\":{\"promptTokens\":3,\"completionTokens\":2}}\nd:{}\n",
        )
        .await;
        let server = spawn_relay(&backend, vec![CLIENT_KEY], vec!["tok"]).await;

        let body: Value = reqwest::Client::new()
            .post(relay_url(&server, "/v1/chat/completions"))
            .bearer_auth(CLIENT_KEY)
            .json(&json!({
                "model": "sonar-pro",
                "messages": [{"role": "user", "content": "hi"}]
            }))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();

        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "Hi there");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
        assert_eq!(body["usage"]["total_tokens"], 5);

        server.stop();
    }
}
