//! Conversation Event Model
//!
//! Normalized events exchanged between the relay and the session coordinator.
//! The relay itself only ever emits `connection_status` and `error`; the other
//! variants come from the voice provider's own stream or from the conversation
//! SDK, and share the same JSON envelope so a client can decode every text
//! frame through one type.

use serde::{Deserialize, Serialize};

/// Monotonically increasing identifier of one session attempt.
pub type Generation = u64;

/// State of the relay's upstream link as reported in a `connection_status` envelope.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// What the agent is doing right now, as reported by a `conversation_status` event.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    Listening,
    Processing,
    Speaking,
}

/// A normalized lifecycle or status event.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// The relay's upstream link opened or closed.
    ConnectionStatus {
        status: LinkStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Instantaneous audio level in `[0, 1]`.
    AudioLevel { level: f32 },
    /// The agent switched between listening, processing and speaking.
    ConversationStatus { status: ActivityStatus },
    /// A failure that should be shown to the user.
    Error { message: String },
}

impl ConversationEvent {
    pub fn connected() -> Self {
        Self::ConnectionStatus {
            status: LinkStatus::Connected,
            reason: None,
        }
    }

    pub fn disconnected(reason: Option<String>) -> Self {
        Self::ConnectionStatus {
            status: LinkStatus::Disconnected,
            reason,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Serializes the event into the JSON text carried by a WebSocket frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decodes a text frame. Returns `None` for anything that is not one of
    /// the known envelopes, which covers provider payloads the client treats
    /// as opaque.
    pub fn from_frame(text: &str) -> Option<Self> {
        let mut event: Self = serde_json::from_str(text).ok()?;
        if let Self::AudioLevel { level } = &mut event {
            if !level.is_finite() {
                return None;
            }
            *level = level.clamp(0.0, 1.0);
        }
        Some(event)
    }
}

/// An event stamped with the session generation it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Tagged<T> {
    pub generation: Generation,
    pub event: T,
}

impl<T> Tagged<T> {
    pub fn new(generation: Generation, event: T) -> Self {
        Self { generation, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connected_envelope_shape() {
        let json = ConversationEvent::connected().to_json().unwrap();
        assert_eq!(json, r#"{"type":"connection_status","status":"connected"}"#);
    }

    #[test]
    fn test_disconnected_envelope_carries_reason() {
        let json = ConversationEvent::disconnected(Some("quota exceeded".into()))
            .to_json()
            .unwrap();
        assert_eq!(
            json,
            r#"{"type":"connection_status","status":"disconnected","reason":"quota exceeded"}"#
        );
    }

    #[test]
    fn test_error_envelope_shape() {
        let json = ConversationEvent::error("boom").to_json().unwrap();
        assert_eq!(json, r#"{"type":"error","message":"boom"}"#);
    }

    #[test]
    fn test_from_frame_decodes_status_events() {
        let event = ConversationEvent::from_frame(
            r#"{"type":"conversation_status","status":"speaking"}"#,
        );
        assert_eq!(
            event,
            Some(ConversationEvent::ConversationStatus {
                status: ActivityStatus::Speaking
            })
        );
    }

    #[test]
    fn test_from_frame_ignores_provider_payloads() {
        assert!(ConversationEvent::from_frame(r#"{"type":"audio","audio_event":{}}"#).is_none());
        assert!(ConversationEvent::from_frame("not json").is_none());
    }

    #[test]
    fn test_from_frame_clamps_audio_level() {
        let event = ConversationEvent::from_frame(r#"{"type":"audio_level","level":1.7}"#);
        assert_eq!(event, Some(ConversationEvent::AudioLevel { level: 1.0 }));
    }
}
