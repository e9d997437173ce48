// relia-gateway/src/handlers.rs
// ============================================================================
// Module: Gateway HTTP Handlers
// Description: axum routes for authorize, approvals, verify, pack, and Slack.
// Purpose: Map the HTTP surface onto the service layer.
// Dependencies: axum, relia-core, serde_json, tokio
// ============================================================================

//! ## Overview
//! Every endpoint requires bearer auth except the Slack interaction callback,
//! which is authenticated by its request signature instead. Handlers stay
//! thin: decode, authenticate, hand off to the service on the blocking pool,
//! and map service errors onto status codes. Verification failures are a
//! 200 with `valid=false`, never an error status.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::body::Bytes;
use axum::extract::Path;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::http::StatusCode;
use axum::http::header;
use axum::response::IntoResponse;
use axum::response::Response;
use axum::routing::get;
use axum::routing::post;
use serde_json::json;

use relia_core::ApprovalStatus;
use relia_core::ReceiptApprover;

use crate::auth::ActorClaims;
use crate::auth::AuthError;
use crate::auth::Authenticator;
use crate::service::AuthorizeRequest;
use crate::service::AuthorizeService;
use crate::service::ServiceError;
use crate::service::now_rfc3339;
use crate::slack::SlackInteraction;
use crate::slack::verify_slack_signature;

// ============================================================================
// SECTION: State and Router
// ============================================================================

/// Shared state for all routes.
pub struct AppState {
    /// Bearer authenticator.
    pub auth: Authenticator,
    /// Authorize and approval service.
    pub service: Arc<AuthorizeService>,
    /// Slack interaction signing secret, when the integration is enabled.
    pub slack_signing_secret: Option<String>,
}

/// Builds the gateway router.
#[must_use]
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/authorize", post(authorize))
        .route("/v1/approvals/{approval_id}", get(approvals))
        .route("/v1/verify/{receipt_id}", get(verify))
        .route("/v1/pack/{receipt_id}", get(pack))
        .route("/v1/slack/interactions", post(slack_interactions))
        .with_state(state)
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

fn error_json(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<ActorClaims, Response> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    state.auth.authenticate(authorization).map_err(|err| {
        let message = match err {
            AuthError::MissingBearer => "missing bearer token",
            AuthError::InvalidToken => "invalid token",
        };
        error_json(StatusCode::UNAUTHORIZED, message)
    })
}

fn service_error_response(err: &ServiceError) -> Response {
    let status = match err {
        ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
        ServiceError::Ledger(_) | ServiceError::Pack(_) | ServiceError::PublicKeyMissing => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
        _ => StatusCode::BAD_REQUEST,
    };
    error_json(status, err.to_string())
}

// ============================================================================
// SECTION: Handlers
// ============================================================================

async fn authorize(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let claims = match authenticate(&state, &headers) {
        Ok(claims) => claims,
        Err(response) => return response,
    };

    let request: AuthorizeRequest = match serde_json::from_slice(&body) {
        Ok(request) => request,
        Err(_) => return error_json(StatusCode::BAD_REQUEST, "invalid json"),
    };

    let service = Arc::clone(&state.service);
    let result = tokio::task::spawn_blocking(move || {
        let created_at = now_rfc3339();
        service.authorize(&claims, &request, &created_at)
    })
    .await;

    match result {
        Ok(Ok(response)) => (StatusCode::OK, Json(response)).into_response(),
        Ok(Err(err)) => service_error_response(&err),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn approvals(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(approval_id): Path<String>,
) -> Response {
    if let Err(response) = authenticate(&state, &headers) {
        return response;
    }

    let service = Arc::clone(&state.service);
    let result =
        tokio::task::spawn_blocking(move || service.approval_status(&approval_id)).await;

    match result {
        Ok(Ok(Some((approval, receipt_id)))) => (
            StatusCode::OK,
            Json(json!({
                "approval_id": approval.approval_id,
                "status": approval.status.as_str(),
                "receipt_id": receipt_id.map(|id| id.as_str().to_string()).unwrap_or_default(),
            })),
        )
            .into_response(),
        Ok(Ok(None)) => error_json(StatusCode::NOT_FOUND, "approval not found"),
        Ok(Err(err)) => service_error_response(&err),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn verify(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(receipt_id): Path<String>,
) -> Response {
    if let Err(response) = authenticate(&state, &headers) {
        return response;
    }

    let service = Arc::clone(&state.service);
    let result = tokio::task::spawn_blocking(move || service.verify(&receipt_id)).await;

    match result {
        Ok(Ok(outcome)) => (StatusCode::OK, Json(outcome)).into_response(),
        Ok(Err(ServiceError::NotFound(_))) => {
            error_json(StatusCode::NOT_FOUND, "receipt not found")
        }
        Ok(Err(err)) => service_error_response(&err),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn pack(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(receipt_id): Path<String>,
) -> Response {
    if let Err(response) = authenticate(&state, &headers) {
        return response;
    }

    let base_url = headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .map(|host| format!("http://{host}"))
        .unwrap_or_default();

    let service = Arc::clone(&state.service);
    let result = tokio::task::spawn_blocking(move || service.pack(&receipt_id, &base_url)).await;

    match result {
        Ok(Ok(zip_bytes)) => (
            StatusCode::OK,
            [
                (header::CONTENT_TYPE, "application/zip"),
                (
                    header::CONTENT_DISPOSITION,
                    "attachment; filename=relia-pack.zip",
                ),
            ],
            zip_bytes,
        )
            .into_response(),
        Ok(Err(err)) => service_error_response(&err),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}

async fn slack_interactions(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(signing_secret) = state.slack_signing_secret.clone() else {
        return error_json(StatusCode::NOT_IMPLEMENTED, "slack not configured");
    };

    let timestamp = headers
        .get("x-slack-request-timestamp")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let signature = headers
        .get("x-slack-signature")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    if !verify_slack_signature(&signing_secret, timestamp, &body, signature) {
        return error_json(StatusCode::UNAUTHORIZED, "bad signature");
    }

    let interaction: SlackInteraction = match serde_json::from_slice(&body) {
        Ok(interaction) => interaction,
        Err(_) => return error_json(StatusCode::BAD_REQUEST, "invalid json"),
    };

    let verdict = match ApprovalStatus::parse(&interaction.verdict) {
        Some(verdict @ (ApprovalStatus::Approved | ApprovalStatus::Denied)) => verdict,
        _ => return error_json(StatusCode::BAD_REQUEST, "invalid verdict"),
    };
    let approver = interaction.user.map(|user| ReceiptApprover {
        kind: "slack_user".to_string(),
        display: if user.name.is_empty() {
            user.id.clone()
        } else {
            user.name.clone()
        },
        id: user.id,
    });

    let service = Arc::clone(&state.service);
    let approval_id = interaction.approval_id.clone();
    let result = tokio::task::spawn_blocking(move || {
        let approved_at = now_rfc3339();
        service.approve(&approval_id, verdict, &approved_at, approver)
    })
    .await;

    match result {
        Ok(Ok(receipt_id)) => (
            StatusCode::OK,
            Json(json!({
                "approval_id": interaction.approval_id,
                "status": verdict.as_str(),
                "receipt_id": receipt_id,
            })),
        )
            .into_response(),
        Ok(Err(err)) => service_error_response(&err),
        Err(err) => error_json(StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
    }
}
