//! Conversation SDK Interface
//!
//! The voice SDK object that plays and records audio lives outside this crate.
//! Everything here depends on the narrow `Conversation` trait instead of a
//! concrete SDK type, so the coordinator can be driven by any implementation
//! (or a mock in tests).

use async_trait::async_trait;

/// Session status as reported by the conversation SDK itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdkStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
}

/// Volume applied while muted.
pub const MUTED_VOLUME: f32 = 0.0;
/// Volume applied when the user unmutes.
pub const DEFAULT_VOLUME: f32 = 0.8;

/// The externally-owned conversation object.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Conversation: Send + Sync {
    /// Current SDK session status.
    fn status(&self) -> SdkStatus;

    /// Whether the SDK is currently playing agent speech.
    fn is_speaking(&self) -> bool;

    /// Starts an SDK session against the given signed URL and returns the
    /// provider's conversation id.
    async fn start_session(&self, signed_url: &str) -> anyhow::Result<String>;

    /// Ends the SDK session.
    async fn end_session(&self) -> anyhow::Result<()>;

    /// Sets output volume in `[0, 1]`.
    async fn set_volume(&self, level: f32) -> anyhow::Result<()>;
}
