// OpenAI-compatible endpoint handlers

use axum::{
    body::Body,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::{json, Value};
use tracing::{debug, info};

use crate::proxy::error::RelayError;
use crate::proxy::mappers::openai::{
    collect_chat_completion, create_openai_sse_stream, OpenAIRequest,
};
use crate::proxy::server::AppState;
use crate::proxy::session::SessionResolver;
use crate::proxy::upstream::PromptRequest;

pub async fn handle_list_models(State(state): State<AppState>) -> impl IntoResponse {
    let data: Vec<_> = state
        .catalog
        .models()
        .iter()
        .map(|model| {
            json!({
                "id": model.id,
                "object": "model",
                "created": model.created,
                "owned_by": model.owned_by
            })
        })
        .collect();

    Json(json!({
        "object": "list",
        "data": data
    }))
}

pub async fn handle_chat_completions(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Response, (StatusCode, String)> {
    let request: OpenAIRequest = serde_json::from_value(body).map_err(|e| {
        RelayError::InvalidRequest(format!("invalid request body: {}", e)).into_response_parts()
    })?;

    debug!(
        "Received chat completion request for model {} ({} messages, stream: {})",
        request.model,
        request.messages.len(),
        request.stream
    );

    let model = state
        .catalog
        .find(&request.model)
        .ok_or_else(|| RelayError::ModelNotFound(request.model.clone()).into_response_parts())?
        .clone();

    if model.vertical_model_id.is_empty() || model.vertical_model_url.is_empty() {
        return Err(
            RelayError::config(format!("model {} has no backend route", model.id))
                .into_response_parts(),
        );
    }

    let token_pool = state.token_pool.clone().ok_or_else(|| {
        RelayError::backend("no backend auth tokens configured").into_response_parts()
    })?;

    let resolver = SessionResolver::new(
        state.conversation_cache.clone(),
        token_pool,
        state.upstream.clone(),
    );
    let resolved = resolver
        .resolve(&model.vertical_model_url, &request.messages)
        .await
        .map_err(RelayError::into_response_parts)?;

    info!(
        "{} chat {} for model {}",
        if resolved.reused { "Continuing" } else { "Opened" },
        resolved.chat_id,
        model.id
    );

    let prompt = PromptRequest {
        chat_id: &resolved.chat_id,
        model_id: &model.vertical_model_id,
        message: &resolved.message_to_send,
        system_prompt: &resolved.system_prompt,
        output_reasoning: model.output_reasoning,
    };
    let backend_stream = state
        .upstream
        .stream_prompt(&resolved.auth_token, &prompt)
        .await
        .map_err(RelayError::into_response_parts)?;

    if request.stream {
        let stream = create_openai_sse_stream(
            backend_stream,
            model.id.clone(),
            model.output_reasoning,
            Some(resolved.continuation),
        );

        let response = Response::builder()
            .header("Content-Type", "text/event-stream")
            .header("Cache-Control", "no-cache")
            .header("Connection", "keep-alive")
            .body(Body::from_stream(stream))
            .unwrap();
        Ok(response)
    } else {
        let completion = collect_chat_completion(
            backend_stream,
            model.id.clone(),
            model.output_reasoning,
            Some(resolved.continuation),
            state.collect_timeout_secs,
        )
        .await
        .map_err(RelayError::into_response_parts)?;

        Ok(Json(completion).into_response())
    }
}
