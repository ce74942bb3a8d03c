//! Harness error types.
//!
//! Setup failures ([`HarnessError`]) abort a harness invocation. Run failures
//! ([`RunFailure`]) are scoped to a single policy variant and reported.

use amod_core::{AugmentError, PartitionError, PopulationError};
use amod_env::{LinkId, VehicleId};
use serde::Serialize;
use thiserror::Error;

/// Fatal errors raised while building the scenario fixture.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Augmentation failed: {0}")]
    Augment(#[from] AugmentError),

    #[error("Zonal partitioning failed: {0}")]
    Partition(#[from] PartitionError),

    #[error("Invalid population: {0}")]
    Population(#[from] PopulationError),

    /// Fleet placement needs at least one road link
    #[error("Network has no road links to place vehicles on")]
    NoRoadLinks,

    #[error("Unknown dispatch policy: {0}")]
    UnknownPolicy(String),
}

impl HarnessError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Why a single policy variant failed.
#[derive(Debug, Clone, PartialEq, Serialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunFailure {
    /// An AMoD vehicle entered a transit-only link
    #[error("Mode access violation: {vehicle} entered {link} at t={time:.1}s")]
    ModeAccessViolation {
        vehicle: VehicleId,
        link: LinkId,
        time: f64,
    },

    /// The run terminated with unmatched departures
    #[error("Conservation mismatch: {departures} departures vs {arrivals} arrivals")]
    ConservationMismatch { departures: u64, arrivals: u64 },

    /// The engine failed for another reason
    #[error("Engine failure: {message}")]
    Engine { message: String },
}
