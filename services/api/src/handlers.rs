//! Axum Handlers for the REST API
//!
//! Session issuance (`POST /voice-session`) and the liveness probe. The
//! WebSocket relay lives in `crate::ws`.

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::{
    issuer::IssueError,
    models::{
        ErrorResponse, HealthResponse, SessionActionRequest, SignedUrlResponse, SuccessResponse,
    },
    state::AppState,
};

/// Message returned when the issuer rejects a signed URL request.
const UPSTREAM_REJECTED: &str = "Failed to get signed URL from ElevenLabs";

/// Longest conversation id accepted for `end_session`.
const MAX_CONVERSATION_ID_LEN: usize = 128;

/// Conversation ids end up as a path segment of a signed provider request,
/// so only `[A-Za-z0-9_-]` is allowed.
fn is_valid_conversation_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_CONVERSATION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

pub enum ApiError {
    BadRequest(String),
    Issue(IssueError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::BadRequest(message) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: message,
                    details: None,
                },
            ),
            ApiError::Issue(err @ IssueError::Configuration) => (
                StatusCode::BAD_REQUEST,
                ErrorResponse {
                    error: err.to_string(),
                    details: None,
                },
            ),
            ApiError::Issue(IssueError::Upstream { status, body }) => (
                StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY),
                ErrorResponse {
                    error: UPSTREAM_REJECTED.to_string(),
                    details: Some(body),
                },
            ),
            ApiError::Issue(err @ IssueError::Transport(_)) => {
                error!("Provider request failed: {:?}", err);
                (
                    StatusCode::BAD_GATEWAY,
                    ErrorResponse {
                        error: err.to_string(),
                        details: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

impl From<IssueError> for ApiError {
    fn from(err: IssueError) -> Self {
        Self::Issue(err)
    }
}

/// Issue a signed conversation URL or end a provider session.
#[utoipa::path(
    post,
    path = "/voice-session",
    request_body = SessionActionRequest,
    responses(
        (status = 200, description = "Signed URL issued (`get_signed_url`) or `{\"success\": true}` (`end_session`)", body = SignedUrlResponse),
        (status = 400, description = "Missing configuration, malformed body, invalid action or conversation id", body = ErrorResponse),
        (status = 502, description = "Provider unreachable", body = ErrorResponse)
    )
)]
pub async fn voice_session(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response, ApiError> {
    // Credentials are checked before the body is even looked at.
    state.issuer.check_configuration()?;

    let request: SessionActionRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid request body: {e}")))?;

    match (request.action.as_str(), request.conversation_id) {
        ("get_signed_url", _) => {
            let session = state.issuer.request_signed_url().await?;
            Ok(Json(SignedUrlResponse {
                signed_url: session.signed_url,
                agent_id: session.agent_id,
                voice_id: session.voice_id,
            })
            .into_response())
        }
        ("end_session", Some(conversation_id)) if !conversation_id.is_empty() => {
            if !is_valid_conversation_id(&conversation_id) {
                warn!("Rejecting malformed conversation id");
                return Err(ApiError::BadRequest("Invalid conversationId".to_string()));
            }
            // Best effort: the caller treats the call as ended either way.
            match state.issuer.end_session(&conversation_id).await {
                Ok(()) => info!(%conversation_id, "Session ended"),
                Err(e) => warn!(%conversation_id, error = %e, "Ending session upstream failed"),
            }
            Ok(Json(SuccessResponse { success: true }).into_response())
        }
        (action, _) => {
            warn!(%action, "Rejecting unknown voice-session action");
            Err(ApiError::BadRequest("Invalid action".to_string()))
        }
    }
}

/// Liveness probe.
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Service is up", body = HealthResponse))
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "OK".to_string(),
    })
}
