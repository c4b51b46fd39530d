//! Shared Application State
//!
//! Process-wide, read-only resources handed to every handler. Relay
//! connections never share anything through here except configuration.

use crate::{config::Config, issuer::SessionIssuer};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub issuer: Arc<dyn SessionIssuer>,
    pub config: Arc<Config>,
}
