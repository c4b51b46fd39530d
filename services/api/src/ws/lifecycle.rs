//! Pure state machine of one relay connection.
//!
//! `Init → UpstreamConnecting → Bridged → Closing → Closed`. Any state
//! before `Closing` may jump straight to it; the first side to go away wins
//! and later close signals are ignored.

use super::protocol::UPSTREAM_FAILED;
use std::fmt;
use voice_relay_core::ConversationEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    Init,
    UpstreamConnecting,
    Bridged,
    Closing,
    Closed,
}

/// One leg of the relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Upstream,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Client => f.write_str("client"),
            Side::Upstream => f.write_str("upstream"),
        }
    }
}

/// How a leg went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// Orderly close, with the peer's reason if it gave one.
    Closed { reason: Option<String> },
    /// Transport error or writer failure.
    Failed { error: String },
}

#[derive(Debug)]
pub struct Lifecycle {
    state: RelayState,
    closed_by: Option<(Side, CloseCause)>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RelayState::Init,
            closed_by: None,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn closed_by(&self) -> Option<&(Side, CloseCause)> {
        self.closed_by.as_ref()
    }

    /// Frames flow only while bridged.
    pub fn is_forwarding(&self) -> bool {
        self.state == RelayState::Bridged
    }

    pub fn upstream_connecting(&mut self) -> bool {
        self.advance(RelayState::Init, RelayState::UpstreamConnecting)
    }

    /// Returns `true` exactly once, when the upstream socket has opened.
    pub fn bridged(&mut self) -> bool {
        self.advance(RelayState::UpstreamConnecting, RelayState::Bridged)
    }

    /// Enters `Closing`, recording who closed first. Returns `false` if the
    /// relay is already closing or closed.
    pub fn begin_closing(&mut self, side: Side, cause: CloseCause) -> bool {
        match self.state {
            RelayState::Closing | RelayState::Closed => false,
            _ => {
                self.state = RelayState::Closing;
                self.closed_by = Some((side, cause));
                true
            }
        }
    }

    pub fn closed(&mut self) {
        self.state = RelayState::Closed;
    }

    /// Envelopes owed to the client once the relay is closing.
    pub fn client_notices(&self) -> Vec<ConversationEvent> {
        match &self.closed_by {
            Some((Side::Upstream, CloseCause::Closed { reason })) => {
                vec![ConversationEvent::disconnected(reason.clone())]
            }
            Some((Side::Upstream, CloseCause::Failed { error })) => vec![
                ConversationEvent::error(UPSTREAM_FAILED),
                ConversationEvent::disconnected(Some(error.clone())),
            ],
            Some((Side::Client, _)) | None => Vec::new(),
        }
    }

    fn advance(&mut self, from: RelayState, to: RelayState) -> bool {
        if self.state == from {
            self.state = to;
            true
        } else {
            false
        }
    }
}
