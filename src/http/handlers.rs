use super::{error, AppState};
use crate::message::ContentBlock;
use crate::models::{registry, ResolvedModel, Route};
use crate::protocol::anthropic::MessagesResponse;
use crate::protocol::openai::ChatCompletionRequest;
use crate::sse::SseDecoder;
use crate::translate::{
    anthropic_to_openai, openai_to_anthropic,
    stream::{StreamTranslator, DONE_SENTINEL},
};
use crate::upstream::custom_client::CustomClient;
use crate::upstream::{DispatchError, UnaryOutcome};
use axum::extract::State;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::{Stream, StreamExt};
use std::collections::HashMap;
use std::pin::Pin;

pub async fn healthz() -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    }))
    .into_response()
}

pub async fn list_models() -> Response {
    Json(serde_json::json!({
        "object": "list",
        "data": registry().list_public_models(),
    }))
    .into_response()
}

pub async fn auth_status(State(state): State<AppState>) -> Response {
    Json(state.oauth.status().await).into_response()
}

pub async fn messages(State(state): State<AppState>, Json(mut raw): Json<serde_json::Value>) -> Response {
    let Some(model_id) = raw.get("model").and_then(|v| v.as_str()).map(str::to_string) else {
        return error::bad_request("missing 'model' field");
    };
    let Some(resolved) = registry().resolve(&model_id) else {
        return error::unknown_model(&model_id);
    };
    if let Some(obj) = raw.as_object_mut() {
        obj.insert("model".into(), serde_json::json!(resolved.upstream_id));
    }
    let streaming = matches!(raw.get("stream"), Some(serde_json::Value::Bool(true)));
    let (normalized, beta_flags) = crate::normalize::normalize_request(raw, resolved.use_1m_context);

    if streaming {
        match state.anthropic.send_streaming(normalized, &beta_flags).await {
            Ok(stream) => sse_passthrough_response(stream),
            Err(DispatchError::Auth(e)) => error::from_auth_error(&e),
            Err(e) => error::upstream_verbatim(502, e.to_string()),
        }
    } else {
        match state.anthropic.send_unary(normalized, &beta_flags).await {
            Ok(UnaryOutcome::Success(v)) => Json(v).into_response(),
            Ok(UnaryOutcome::UpstreamError { status, body }) => error::upstream_verbatim(status, body),
            Err(DispatchError::Auth(e)) => error::from_auth_error(&e),
            Err(e) => error::upstream_verbatim(502, e.to_string()),
        }
    }
}

pub async fn chat_completions(State(state): State<AppState>, Json(raw): Json<serde_json::Value>) -> Response {
    let Some(model_id) = raw.get("model").and_then(|v| v.as_str()).map(str::to_string) else {
        return error::bad_request("missing 'model' field");
    };
    let Some(resolved) = registry().resolve(&model_id) else {
        return error::unknown_model(&model_id);
    };

    if resolved.route == Route::Custom {
        return dispatch_custom(&resolved, raw).await;
    }

    let req: ChatCompletionRequest = match serde_json::from_value(raw) {
        Ok(r) => r,
        Err(e) => return error::bad_request(format!("malformed chat completion request: {}", e)),
    };

    let restorations = gather_thinking_restorations(&state.thinking_cache, &req).await;
    let anthropic_req = openai_to_anthropic::translate_request(&req, &resolved, &restorations);
    let anthropic_value = match serde_json::to_value(&anthropic_req) {
        Ok(v) => v,
        Err(_) => return error::internal_error(),
    };
    let (normalized, beta_flags) =
        crate::normalize::normalize_request(anthropic_value, resolved.use_1m_context);

    if req.stream == Some(true) {
        dispatch_anthropic_streaming(state, normalized, beta_flags, model_id).await
    } else {
        dispatch_anthropic_unary(state, normalized, beta_flags).await
    }
}

async fn gather_thinking_restorations(
    cache: &crate::thinking_cache::ThinkingCache,
    req: &ChatCompletionRequest,
) -> HashMap<String, ContentBlock> {
    let mut out = HashMap::new();
    for message in &req.messages {
        if message.role == "tool" {
            if let Some(id) = &message.tool_call_id {
                if let Some(block) = cache.get(id).await {
                    out.insert(id.clone(), block);
                }
            }
        }
    }
    out
}

async fn dispatch_custom(resolved: &ResolvedModel, raw: serde_json::Value) -> Response {
    let Some(provider) = &resolved.provider_config else {
        return error::internal_error();
    };
    let client = CustomClient::new(provider);
    let streaming = matches!(raw.get("stream"), Some(serde_json::Value::Bool(true)));

    if streaming {
        match client.send_streaming(raw).await {
            Ok(stream) => sse_passthrough_response(stream),
            Err(e) => error::openai_error(StatusCode::BAD_GATEWAY, e.to_string(), "api_error"),
        }
    } else {
        match client.send_unary(raw).await {
            Ok(UnaryOutcome::Success(v)) => Json(v).into_response(),
            Ok(UnaryOutcome::UpstreamError { status, body }) => error::upstream_verbatim(status, body),
            Err(e) => error::openai_error(StatusCode::BAD_GATEWAY, e.to_string(), "api_error"),
        }
    }
}

async fn dispatch_anthropic_unary(
    state: AppState,
    body: serde_json::Value,
    beta_flags: Vec<String>,
) -> Response {
    match state.anthropic.send_unary(body, &beta_flags).await {
        Ok(UnaryOutcome::Success(v)) => {
            let parsed: MessagesResponse = match serde_json::from_value(v) {
                Ok(p) => p,
                Err(_) => return error::internal_error(),
            };
            cache_thinking_blocks(&state.thinking_cache, &parsed.content).await;
            let translated = anthropic_to_openai::translate_response(&parsed, chrono::Utc::now().timestamp());
            Json(translated.response).into_response()
        }
        Ok(UnaryOutcome::UpstreamError { status, body }) => rewrite_upstream_error(status, &body),
        Err(DispatchError::Auth(e)) => error::from_auth_error(&e),
        Err(e) => error::openai_error(StatusCode::BAD_GATEWAY, e.to_string(), "api_error"),
    }
}

/// Walks a completed response's content blocks in order the same way the
/// streaming translator does, so a tool use preceded by a signed thinking
/// block is cached the same way whether the response arrived whole or
/// chunk-by-chunk.
async fn cache_thinking_blocks(cache: &crate::thinking_cache::ThinkingCache, content: &[ContentBlock]) {
    let mut last_signed: Option<ContentBlock> = None;
    for block in content {
        match block {
            ContentBlock::Thinking { .. } if block.thinking_signature().is_some() => {
                last_signed = Some(block.clone());
            }
            ContentBlock::ToolUse { id, .. } => {
                if let Some(thinking) = last_signed.clone() {
                    cache.put(id.clone(), thinking).await;
                }
            }
            _ => {}
        }
    }
}

fn rewrite_upstream_error(status: u16, body: &str) -> Response {
    let message = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.get("message")).and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| body.to_string());
    let status = StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY);
    error::openai_error(status, message, "api_error")
}

async fn dispatch_anthropic_streaming(
    state: AppState,
    body: serde_json::Value,
    beta_flags: Vec<String>,
    model_id: String,
) -> Response {
    let upstream = match state.anthropic.send_streaming(body, &beta_flags).await {
        Ok(s) => s,
        Err(DispatchError::Auth(e)) => return error::from_auth_error(&e),
        Err(e) => return error::openai_error(StatusCode::BAD_GATEWAY, e.to_string(), "api_error"),
    };

    let created = chrono::Utc::now().timestamp();
    let cache = state.thinking_cache.clone();

    let body_stream = async_stream::stream! {
        let mut decoder = SseDecoder::new();
        let mut translator = StreamTranslator::new(model_id, created);
        let mut upstream = upstream;
        'outer: while let Some(chunk) = upstream.next().await {
            for event in decoder.feed(&chunk) {
                let Some(parsed) = serde_json::from_str::<crate::protocol::anthropic::StreamEvent>(&event.data).ok() else {
                    continue;
                };
                let out = translator.step(parsed, &cache).await;
                for value in out.events {
                    yield Ok::<_, std::convert::Infallible>(axum::body::Bytes::from(format!("data: {}\n\n", value)));
                }
                if out.terminate {
                    yield Ok(axum::body::Bytes::from(format!("data: {}\n\n", DONE_SENTINEL)));
                    break 'outer;
                }
            }
        }
    };

    sse_response(axum::body::Body::from_stream(body_stream))
}

fn sse_passthrough_response(stream: Pin<Box<dyn Stream<Item = String> + Send>>) -> Response {
    let mapped = stream.map(|chunk| Ok::<_, std::convert::Infallible>(axum::body::Bytes::from(chunk)));
    sse_response(axum::body::Body::from_stream(mapped))
}

fn sse_response(body: axum::body::Body) -> Response {
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert("content-type", HeaderValue::from_static("text/event-stream"));
    headers.insert("cache-control", HeaderValue::from_static("no-cache"));
    headers.insert("connection", HeaderValue::from_static("keep-alive"));
    response
}
