//! What the relay says on its own behalf: query parameters, rejection texts
//! and the lifecycle envelopes it injects into the client stream.

use axum::extract::ws::Message;
use serde::Deserialize;
use tracing::error;
use voice_relay_core::ConversationEvent;

pub const EXPECTED_WEBSOCKET: &str = "Expected WebSocket connection";
pub const MISSING_SIGNED_URL: &str = "Missing signed_url parameter";
pub const FOREIGN_SIGNED_URL: &str = "signed_url does not target the voice provider";

/// Sent to the client when the upstream leg fails.
pub const UPSTREAM_FAILED: &str = "Connection to voice service failed";

/// Query string of `GET /relay`.
#[derive(Deserialize, Debug, Default)]
pub struct RelayParams {
    pub signed_url: Option<String>,
}

impl RelayParams {
    /// The signed URL, if present and non-blank.
    pub fn signed_url(&self) -> Option<&str> {
        self.signed_url.as_deref().filter(|url| !url.trim().is_empty())
    }
}

/// Checks that `signed_url` is a WebSocket URL under `allowed_prefix`.
///
/// With no prefix configured any `ws://` or `wss://` URL is accepted.
pub fn validate_upstream(signed_url: &str, allowed_prefix: Option<&str>) -> Result<(), &'static str> {
    let is_ws = signed_url.starts_with("ws://") || signed_url.starts_with("wss://");
    let in_scope = allowed_prefix.is_none_or(|prefix| signed_url.starts_with(prefix));
    if is_ws && in_scope {
        Ok(())
    } else {
        Err(FOREIGN_SIGNED_URL)
    }
}

/// Encodes a relay-generated event as a client text frame.
pub fn envelope(event: &ConversationEvent) -> Option<Message> {
    match event.to_json() {
        Ok(json) => Some(Message::Text(json.into())),
        Err(e) => {
            error!(error = %e, "Failed to encode relay envelope");
            None
        }
    }
}
