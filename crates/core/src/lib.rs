//! Client-side voice session plumbing.
//!
//! Turns the relay's event stream and the conversation SDK's signals into one
//! race-free conversation status for presentation code.

pub mod audio;
pub mod conversation;
pub mod coordinator;
pub mod driver;
pub mod error;
pub mod event;
pub mod issuer_client;
pub mod relay_client;

pub use coordinator::{ConversationStatus, CoordinatorSnapshot, SessionCoordinator};
pub use event::{ConversationEvent, Generation, Tagged};
