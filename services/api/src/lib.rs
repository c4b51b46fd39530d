//! Voice Relay API Library Crate
//!
//! Configuration, session issuance, the WebSocket relay and routing. The
//! `api` binary is a thin wrapper around this library.

pub mod config;
pub mod handlers;
pub mod issuer;
pub mod models;
pub mod router;
pub mod state;
pub mod ws;

#[cfg(test)]
mod test_support;
