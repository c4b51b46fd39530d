//! WebSocket Relay
//!
//! - `protocol`: query parameters, rejection texts and relay envelopes.
//! - `lifecycle`: the per-connection state machine.
//! - `frame`: data frames shared by both legs.
//! - `queue`: bounded per-direction writers.
//! - `relay`: the axum handler and the bridge loop.

mod frame;
mod lifecycle;
pub mod protocol;
mod queue;
pub mod relay;

pub use relay::relay_handler;
