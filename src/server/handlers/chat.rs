use axum::{
    Json,
    body::Bytes,
    extract::{FromRequest, Multipart, Request, State},
    http::{StatusCode, header::CONTENT_TYPE},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{GatewayError, Result};
use crate::providers::ProviderAdapter;
use crate::providers::types::{ChatRequest, FileWarning, ProviderResponse};
use crate::routing::ResolvedModel;
use crate::server::AppState;
use crate::server::auth::Principal;
use crate::server::request_state::{RequestState, RequestTracker};
use crate::server::token_model_limits::resolve_max_tokens;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ChatResponseBody {
    success: bool,
    data: ProviderResponse,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    file_validation_warnings: Vec<FileWarning>,
}

/// Everything decided before the provider is called.
struct Prepared {
    request: ChatRequest,
    resolved: ResolvedModel,
    adapter: Arc<dyn ProviderAdapter>,
    warnings: Vec<FileWarning>,
}

pub async fn chat(State(app_state): State<Arc<AppState>>, req: Request) -> Result<Response> {
    let mut tracker = RequestTracker::new();

    // 认证在读取请求体之前完成
    let Some(principal) = app_state.auth.resolve(req.headers()).await else {
        tracker.fail();
        return Err(GatewayError::Unauthenticated);
    };

    let prepared = match prepare(&app_state, req, &principal, &mut tracker).await {
        Ok(p) => p,
        Err(e) => {
            tracker.fail();
            return Err(e);
        }
    };
    let Prepared {
        request,
        resolved,
        adapter,
        warnings,
    } = prepared;

    tracker.advance(RequestState::Dispatched);
    if request.stream {
        let chunks = adapter
            .generate_stream(&resolved.upstream_model, &request.messages, &request.params)
            .await;
        return match chunks {
            Ok(chunks) => Ok(app_state.multiplexer.respond(chunks, warnings, tracker)),
            Err(e) => {
                tracing::error!(request_id = %tracker.id(), "{} stream failed to open: {}", resolved.kind, e);
                tracker.fail();
                Err(e)
            }
        };
    }

    let response = adapter
        .generate_response(&resolved.upstream_model, &request.messages, &request.params)
        .await;
    match response {
        Ok(data) => {
            tracker.advance(RequestState::Completed);
            tracing::info!(
                request_id = %tracker.id(),
                "completed in {} ms: prompt {} / completion {} tokens, truncated={}",
                tracker.elapsed_ms(),
                data.usage.prompt_tokens,
                data.usage.completion_tokens,
                data.is_truncated
            );
            Ok(Json(ChatResponseBody {
                success: true,
                data,
                file_validation_warnings: warnings,
            })
            .into_response())
        }
        Err(e) => {
            tracing::error!(request_id = %tracker.id(), "{} call failed: {}", resolved.kind, e);
            tracker.fail();
            Err(e)
        }
    }
}

async fn prepare(
    app_state: &AppState,
    req: Request,
    principal: &Principal,
    tracker: &mut RequestTracker,
) -> Result<Prepared> {
    tracker.advance(RequestState::Normalizing);
    let mut request = normalize(app_state, req).await?;

    tracker.advance(RequestState::Validating);
    let submitted = request.eligible_files().to_vec();
    let submitted_count = submitted.len();
    let validated = app_state.policy.validate(submitted);
    let resolved_files = app_state
        .policy
        .resolve_remote(validated.files, app_state.object_store.as_ref())
        .await;
    let mut warnings = std::mem::take(&mut request.warnings);
    warnings.extend(validated.warnings);
    warnings.extend(resolved_files.warnings);
    let kept = resolved_files.files.len();
    request.replace_eligible_files(resolved_files.files);

    let resolved = app_state.resolver.resolve(&request.model);
    let adapter = app_state.registry.get(resolved.kind)?;
    tracker.advance(RequestState::ProviderResolved);

    request.params.max_tokens = resolve_max_tokens(
        &resolved.upstream_model,
        request.params.extended_thinking,
        request.params.thinking_budget_tokens,
    );
    tracker.advance(RequestState::BudgetResolved);

    tracing::info!(
        request_id = %tracker.id(),
        user_id = %principal.user_id,
        "chat model={} provider={} stream={} max_tokens={} files kept {}/{}",
        request.model,
        resolved.kind,
        request.stream,
        request.params.max_tokens,
        kept,
        submitted_count
    );

    Ok(Prepared {
        request,
        resolved,
        adapter,
        warnings,
    })
}

async fn normalize(app_state: &AppState, req: Request) -> Result<ChatRequest> {
    let is_multipart = req
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.to_ascii_lowercase().starts_with("multipart/form-data"));

    if is_multipart {
        let multipart = Multipart::from_request(req, &())
            .await
            .map_err(|e| body_rejection(e.status(), e.body_text()))?;
        app_state.normalizer.from_multipart(multipart).await
    } else {
        let body = Bytes::from_request(req, &())
            .await
            .map_err(|e| body_rejection(e.status(), e.body_text()))?;
        app_state.normalizer.from_json(&body)
    }
}

fn body_rejection(status: StatusCode, text: String) -> GatewayError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        GatewayError::PayloadTooLarge(text)
    } else {
        GatewayError::MalformedRequest(text)
    }
}
