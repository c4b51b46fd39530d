//! API Models
//!
//! Request and response bodies of the HTTP API, annotated for OpenAPI
//! generation with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Body of `POST /voice-session`.
#[derive(Deserialize, ToSchema, Debug)]
pub struct SessionActionRequest {
    /// `get_signed_url` or `end_session`.
    #[serde(default)]
    #[schema(example = "get_signed_url")]
    pub action: String,
    /// Required for `end_session`.
    #[serde(default, rename = "conversationId")]
    pub conversation_id: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SignedUrlResponse {
    pub signed_url: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct SuccessResponse {
    pub success: bool,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub error: String,
    /// Provider response body, passed through verbatim when the provider rejected a call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "OK")]
    pub status: String,
}
