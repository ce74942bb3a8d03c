//! Error types raised by event handlers.

use crate::types::{LinkId, VehicleId};
use thiserror::Error;

/// Errors an event handler can raise to abort a run.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EnvError {
    /// An AMoD vehicle entered a link that excludes vehicular traffic
    #[error("Mode access violation: vehicle {vehicle} entered link {link} (allowed: {allowed}) at t={time:.1}s")]
    ModeAccessViolation {
        vehicle: VehicleId,
        link: LinkId,
        time: f64,
        allowed: String,
    },

    /// Event referenced a link the handler does not know
    #[error("Unknown link in event stream: {0}")]
    UnknownLink(LinkId),

    /// Any other handler failure
    #[error("Handler error: {0}")]
    Handler(String),
}

impl EnvError {
    /// Creates a generic handler error.
    pub fn handler(msg: impl Into<String>) -> Self {
        Self::Handler(msg.into())
    }

    /// Returns true for mode access violations.
    pub fn is_violation(&self) -> bool {
        matches!(self, Self::ModeAccessViolation { .. })
    }
}
