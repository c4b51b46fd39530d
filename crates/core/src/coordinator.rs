//! Session Coordinator
//!
//! Folds the relay's event stream and the conversation SDK's own signals into a
//! single `ConversationStatus`. Every session attempt gets a fresh generation;
//! events stamped with any other generation are dropped, which keeps a late
//! `disconnected` from an abandoned attempt away from the session that
//! replaced it.

use crate::{
    audio::{AudioLevelSettings, AudioMeter},
    conversation::SdkStatus,
    event::{ActivityStatus, ConversationEvent, Generation, LinkStatus, Tagged},
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Instant;
use tracing::debug;

/// The status presented to the UI.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    Idle,
    Connecting,
    Listening,
    Processing,
    Speaking,
    Error,
    Ended,
}

impl ConversationStatus {
    /// Short human-readable text for the status line.
    pub fn label(&self) -> &'static str {
        match self {
            ConversationStatus::Idle => "Ready to talk",
            ConversationStatus::Connecting => "Connecting to voice service...",
            ConversationStatus::Listening => "Listening...",
            ConversationStatus::Processing => "Processing...",
            ConversationStatus::Speaking => "AI Speaking",
            ConversationStatus::Error => "Voice error",
            ConversationStatus::Ended => "Conversation ended",
        }
    }

    /// Whether the audio meter should be live in this status.
    pub fn is_audio_active(&self) -> bool {
        matches!(
            self,
            ConversationStatus::Listening | ConversationStatus::Speaking
        )
    }
}

/// Returned when an event belongs to a superseded session generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("event from generation {event} superseded by generation {current}")]
pub struct StaleEvent {
    pub event: Generation,
    pub current: Generation,
}

/// One conversational attempt, owned by the coordinator that started it.
#[derive(Debug, Clone, PartialEq)]
pub struct VoiceSession {
    pub generation: Generation,
    pub signed_url: Option<String>,
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Everything the UI needs to render one frame.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub generation: Generation,
    pub status: ConversationStatus,
    pub audio_level: f32,
    pub error: Option<String>,
    pub conversation_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Connecting,
    Active,
    Ended,
    Failed,
}

#[derive(Debug)]
pub struct SessionCoordinator {
    generation: Generation,
    phase: Phase,
    activity: Option<ActivityStatus>,
    sdk_status: SdkStatus,
    sdk_speaking: bool,
    user_closed: bool,
    last_error: Option<String>,
    session: Option<VoiceSession>,
    meter: AudioMeter,
}

impl Default for SessionCoordinator {
    fn default() -> Self {
        Self::new(AudioLevelSettings::default())
    }
}

impl SessionCoordinator {
    pub fn new(audio: AudioLevelSettings) -> Self {
        Self {
            generation: 0,
            phase: Phase::Idle,
            activity: None,
            sdk_status: SdkStatus::Disconnected,
            sdk_speaking: false,
            user_closed: false,
            last_error: None,
            session: None,
            meter: AudioMeter::new(audio),
        }
    }

    pub fn generation(&self) -> Generation {
        self.generation
    }

    pub fn session(&self) -> Option<&VoiceSession> {
        self.session.as_ref()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Allocates the next generation and moves to `connecting`. Must be called
    /// before the signed URL is requested so that anything still in flight
    /// from the previous attempt is already stale.
    pub fn begin_session(&mut self) -> Generation {
        self.generation += 1;
        self.phase = Phase::Connecting;
        self.activity = None;
        self.sdk_status = SdkStatus::Disconnected;
        self.sdk_speaking = false;
        self.user_closed = false;
        self.last_error = None;
        self.meter.clear();
        self.session = Some(VoiceSession {
            generation: self.generation,
            signed_url: None,
            conversation_id: None,
            created_at: Utc::now(),
        });
        debug!(generation = self.generation, "Session generation allocated");
        self.generation
    }

    /// Stores the signed URL issued for `generation`.
    pub fn attach_signed_url(
        &mut self,
        generation: Generation,
        signed_url: String,
    ) -> Result<(), StaleEvent> {
        self.check_generation(generation)?;
        if let Some(session) = self.session.as_mut() {
            session.signed_url = Some(signed_url);
        }
        Ok(())
    }

    /// Stores the provider's conversation id for `generation`.
    pub fn attach_conversation_id(
        &mut self,
        generation: Generation,
        conversation_id: String,
    ) -> Result<(), StaleEvent> {
        self.check_generation(generation)?;
        if let Some(session) = self.session.as_mut() {
            session.conversation_id = Some(conversation_id);
        }
        Ok(())
    }

    /// Applies one event and returns the resulting status.
    pub fn apply(
        &mut self,
        tagged: Tagged<ConversationEvent>,
        now: Instant,
    ) -> Result<ConversationStatus, StaleEvent> {
        self.check_generation(tagged.generation)?;

        match tagged.event {
            ConversationEvent::Error { message } => {
                if !self.user_closed && self.is_live() {
                    self.phase = Phase::Failed;
                    self.activity = None;
                    self.last_error = Some(message);
                    self.meter.clear();
                }
            }
            ConversationEvent::ConversationStatus { status } => {
                if !self.user_closed && self.is_live() {
                    self.phase = Phase::Active;
                    self.activity = Some(status);
                }
            }
            ConversationEvent::ConnectionStatus {
                status: LinkStatus::Connected,
                ..
            } => {
                if !self.user_closed && self.phase == Phase::Connecting {
                    self.phase = Phase::Active;
                }
            }
            ConversationEvent::ConnectionStatus {
                status: LinkStatus::Disconnected,
                reason,
            } => {
                debug!(generation = self.generation, ?reason, "Relay reported disconnect");
                self.phase = match self.phase {
                    _ if self.user_closed && self.phase != Phase::Failed => Phase::Ended,
                    Phase::Connecting => Phase::Idle,
                    Phase::Active => Phase::Ended,
                    other => other,
                };
                self.activity = None;
                self.meter.clear();
            }
            ConversationEvent::AudioLevel { level } => {
                if !self.user_closed && self.is_live() {
                    self.meter.record(level, now);
                }
            }
        }

        Ok(self.status())
    }

    /// Feeds the conversation SDK's own view of the session.
    pub fn observe_conversation(
        &mut self,
        sdk_status: SdkStatus,
        is_speaking: bool,
    ) -> ConversationStatus {
        self.sdk_status = sdk_status;
        self.sdk_speaking = is_speaking;
        if !self.user_closed
            && self.phase == Phase::Connecting
            && sdk_status == SdkStatus::Connected
        {
            self.phase = Phase::Active;
        }
        self.status()
    }

    /// User-initiated close. Returns the generation that was closed, if a
    /// session was live. The generation is not bumped, so the relay's final
    /// `disconnected` still lands and keeps the status at `ended`.
    pub fn end_session(&mut self) -> Option<Generation> {
        if !self.is_live() {
            return None;
        }
        self.user_closed = true;
        self.phase = Phase::Ended;
        self.activity = None;
        self.meter.clear();
        Some(self.generation)
    }

    /// Explicit user reset back to `idle`. Only valid once the session is
    /// over; a live session has to be ended first.
    pub fn reset(&mut self) -> bool {
        if self.is_live() {
            return false;
        }
        self.generation += 1;
        self.phase = Phase::Idle;
        self.activity = None;
        self.user_closed = false;
        self.last_error = None;
        self.session = None;
        self.meter.clear();
        true
    }

    pub fn status(&self) -> ConversationStatus {
        match self.phase {
            Phase::Idle => ConversationStatus::Idle,
            Phase::Ended => ConversationStatus::Ended,
            Phase::Failed => ConversationStatus::Error,
            Phase::Connecting if self.sdk_speaking => ConversationStatus::Speaking,
            Phase::Connecting => ConversationStatus::Connecting,
            Phase::Active => match self.activity {
                Some(ActivityStatus::Speaking) => ConversationStatus::Speaking,
                _ if self.sdk_speaking => ConversationStatus::Speaking,
                Some(ActivityStatus::Processing) => ConversationStatus::Processing,
                _ => ConversationStatus::Listening,
            },
        }
    }

    pub fn audio_level(&self, now: Instant) -> f32 {
        self.meter.sample(now, self.status().is_audio_active())
    }

    pub fn snapshot(&self, now: Instant) -> CoordinatorSnapshot {
        CoordinatorSnapshot {
            generation: self.generation,
            status: self.status(),
            audio_level: self.audio_level(now),
            error: self.last_error.clone(),
            conversation_id: self
                .session
                .as_ref()
                .and_then(|s| s.conversation_id.clone()),
        }
    }

    /// A session is connecting or active and has not been ended.
    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Connecting | Phase::Active)
    }

    /// The current generation was ended by the user.
    pub fn is_user_closed(&self) -> bool {
        self.user_closed
    }

    fn check_generation(&self, generation: Generation) -> Result<(), StaleEvent> {
        if generation == self.generation {
            Ok(())
        } else {
            debug!(
                event_generation = generation,
                current_generation = self.generation,
                "Dropping stale event"
            );
            Err(StaleEvent {
                event: generation,
                current: self.generation,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn apply(
        coordinator: &mut SessionCoordinator,
        generation: Generation,
        event: ConversationEvent,
    ) -> Result<ConversationStatus, StaleEvent> {
        coordinator.apply(Tagged::new(generation, event), Instant::now())
    }

    fn listening() -> (SessionCoordinator, Generation) {
        let mut coordinator = SessionCoordinator::default();
        let generation = coordinator.begin_session();
        apply(&mut coordinator, generation, ConversationEvent::connected()).unwrap();
        assert_eq!(coordinator.status(), ConversationStatus::Listening);
        (coordinator, generation)
    }

    #[test]
    fn test_begin_session_moves_to_connecting() {
        let mut coordinator = SessionCoordinator::default();
        assert_eq!(coordinator.status(), ConversationStatus::Idle);
        let generation = coordinator.begin_session();
        assert_eq!(generation, 1);
        assert_eq!(coordinator.status(), ConversationStatus::Connecting);
        assert_eq!(coordinator.session().map(|s| s.generation), Some(1));
    }

    #[test]
    fn test_connected_then_speaking_then_listening() {
        let (mut coordinator, generation) = listening();
        let status = apply(
            &mut coordinator,
            generation,
            ConversationEvent::ConversationStatus {
                status: ActivityStatus::Speaking,
            },
        )
        .unwrap();
        assert_eq!(status, ConversationStatus::Speaking);

        let status = apply(
            &mut coordinator,
            generation,
            ConversationEvent::ConversationStatus {
                status: ActivityStatus::Listening,
            },
        )
        .unwrap();
        assert_eq!(status, ConversationStatus::Listening);
    }

    #[test]
    fn test_error_wins_and_clears_audio() {
        let (mut coordinator, generation) = listening();
        apply(
            &mut coordinator,
            generation,
            ConversationEvent::AudioLevel { level: 0.7 },
        )
        .unwrap();
        assert!(coordinator.audio_level(Instant::now()) > 0.0);

        let status = apply(&mut coordinator, generation, ConversationEvent::error("quota")).unwrap();
        assert_eq!(status, ConversationStatus::Error);
        assert_eq!(coordinator.last_error(), Some("quota"));
        assert_eq!(coordinator.audio_level(Instant::now()), 0.0);

        // Nothing but an explicit reset leaves the error state.
        coordinator.observe_conversation(SdkStatus::Connected, true);
        apply(&mut coordinator, generation, ConversationEvent::connected()).unwrap();
        apply(&mut coordinator, generation, ConversationEvent::disconnected(None)).unwrap();
        assert_eq!(coordinator.status(), ConversationStatus::Error);

        assert!(coordinator.reset());
        assert_eq!(coordinator.status(), ConversationStatus::Idle);
        assert_eq!(coordinator.last_error(), None);
    }

    #[test]
    fn test_sdk_speaking_forces_speaking_before_relay_echo() {
        let (mut coordinator, _) = listening();
        let status = coordinator.observe_conversation(SdkStatus::Connected, true);
        assert_eq!(status, ConversationStatus::Speaking);
        let status = coordinator.observe_conversation(SdkStatus::Connected, false);
        assert_eq!(status, ConversationStatus::Listening);
    }

    #[test]
    fn test_relay_speaking_outranks_sdk_silence() {
        let (mut coordinator, generation) = listening();
        coordinator.observe_conversation(SdkStatus::Connected, false);
        apply(
            &mut coordinator,
            generation,
            ConversationEvent::ConversationStatus {
                status: ActivityStatus::Speaking,
            },
        )
        .unwrap();
        assert_eq!(coordinator.status(), ConversationStatus::Speaking);
    }

    #[test]
    fn test_sdk_connected_promotes_connecting() {
        let mut coordinator = SessionCoordinator::default();
        coordinator.begin_session();
        let status = coordinator.observe_conversation(SdkStatus::Connected, false);
        assert_eq!(status, ConversationStatus::Listening);
    }

    #[test]
    fn test_disconnect_before_connect_returns_to_idle() {
        let mut coordinator = SessionCoordinator::default();
        let generation = coordinator.begin_session();
        let status = apply(
            &mut coordinator,
            generation,
            ConversationEvent::disconnected(Some("expired".into())),
        )
        .unwrap();
        assert_eq!(status, ConversationStatus::Idle);
    }

    #[test]
    fn test_user_close_ends_and_absorbs_final_disconnect() {
        let (mut coordinator, generation) = listening();
        assert_eq!(coordinator.end_session(), Some(generation));
        assert_eq!(coordinator.status(), ConversationStatus::Ended);

        apply(&mut coordinator, generation, ConversationEvent::connected()).unwrap();
        apply(&mut coordinator, generation, ConversationEvent::error("late")).unwrap();
        let status = apply(&mut coordinator, generation, ConversationEvent::disconnected(None)).unwrap();
        assert_eq!(status, ConversationStatus::Ended);
        assert_eq!(coordinator.last_error(), None);
    }

    #[test]
    fn test_audio_level_never_changes_status() {
        let (mut coordinator, generation) = listening();
        let status = apply(
            &mut coordinator,
            generation,
            ConversationEvent::AudioLevel { level: 0.5 },
        )
        .unwrap();
        assert_eq!(status, ConversationStatus::Listening);
        assert_relative_eq!(coordinator.audio_level(Instant::now()), 0.5, epsilon = 0.05);
    }

    #[test]
    fn test_stale_disconnect_does_not_touch_new_session() {
        let mut coordinator = SessionCoordinator::default();
        let first = coordinator.begin_session();
        apply(&mut coordinator, first, ConversationEvent::connected()).unwrap();

        let second = coordinator.begin_session();
        apply(&mut coordinator, second, ConversationEvent::connected()).unwrap();

        let stale = apply(
            &mut coordinator,
            first,
            ConversationEvent::disconnected(Some("abandoned".into())),
        );
        assert_eq!(
            stale,
            Err(StaleEvent {
                event: first,
                current: second
            })
        );
        let stale = apply(&mut coordinator, first, ConversationEvent::error("old failure"));
        assert!(stale.is_err());

        assert_eq!(coordinator.status(), ConversationStatus::Listening);
        assert_eq!(coordinator.last_error(), None);
    }

    #[test]
    fn test_stale_signed_url_is_rejected() {
        let mut coordinator = SessionCoordinator::default();
        let first = coordinator.begin_session();
        let second = coordinator.begin_session();
        assert!(coordinator.attach_signed_url(first, "wss://old".into()).is_err());
        coordinator.attach_signed_url(second, "wss://new".into()).unwrap();
        assert_eq!(
            coordinator.session().and_then(|s| s.signed_url.as_deref()),
            Some("wss://new")
        );
    }

    #[test]
    fn test_reset_refused_while_live() {
        let (mut coordinator, _) = listening();
        assert!(!coordinator.reset());
        assert_eq!(coordinator.status(), ConversationStatus::Listening);
    }

    #[test]
    fn test_listening_reaches_only_allowed_statuses() {
        let allowed = [
            ConversationStatus::Listening,
            ConversationStatus::Processing,
            ConversationStatus::Speaking,
            ConversationStatus::Ended,
            ConversationStatus::Error,
        ];
        let events = vec![
            ConversationEvent::connected(),
            ConversationEvent::disconnected(None),
            ConversationEvent::disconnected(Some("quota exceeded".into())),
            ConversationEvent::AudioLevel { level: 0.3 },
            ConversationEvent::ConversationStatus {
                status: ActivityStatus::Listening,
            },
            ConversationEvent::ConversationStatus {
                status: ActivityStatus::Processing,
            },
            ConversationEvent::ConversationStatus {
                status: ActivityStatus::Speaking,
            },
            ConversationEvent::error("boom"),
        ];

        for event in events {
            let (mut coordinator, generation) = listening();
            let status = apply(&mut coordinator, generation, event.clone()).unwrap();
            assert!(allowed.contains(&status), "{event:?} led to {status:?}");
        }

        let (mut coordinator, _) = listening();
        coordinator.end_session();
        assert_eq!(coordinator.status(), ConversationStatus::Ended);

        for (sdk_status, speaking) in [
            (SdkStatus::Connected, true),
            (SdkStatus::Connected, false),
            (SdkStatus::Disconnected, false),
        ] {
            let (mut coordinator, _) = listening();
            let status = coordinator.observe_conversation(sdk_status, speaking);
            assert!(allowed.contains(&status));
        }
    }

    #[test]
    fn test_snapshot_reports_conversation_id() {
        let mut coordinator = SessionCoordinator::default();
        let generation = coordinator.begin_session();
        coordinator
            .attach_conversation_id(generation, "conv_123".into())
            .unwrap();
        let snapshot = coordinator.snapshot(Instant::now());
        assert_eq!(snapshot.generation, generation);
        assert_eq!(snapshot.status, ConversationStatus::Connecting);
        assert_eq!(snapshot.conversation_id.as_deref(), Some("conv_123"));
    }
}
