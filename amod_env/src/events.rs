//! Event vocabulary emitted by simulation engines.
//!
//! Engines deliver events to registered handlers in non-decreasing
//! timestamp order (seconds since simulation start).
//!
//! ```text
//! Person            Engine                      Handler
//!   |-- activity end -->|                           |
//!   |                   |-- PersonDeparture ------->|
//!   |                   |-- LinkEnter (vehicle) --->|   (one per link entered)
//!   |                   |-- PersonArrival --------->|
//!   |                   |-- RunCompleted ---------->|   (exactly once, last)
//! ```

use crate::types::{LinkId, Mode, PersonId, VehicleId};
use serde::{Deserialize, Serialize};

/// A vehicle entering a link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalEvent {
    pub vehicle: VehicleId,
    pub link: LinkId,
    /// Simulation time in seconds
    pub time: f64,
}

/// Everything an engine may report during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    /// A person starts a leg.
    PersonDeparture {
        time: f64,
        person: PersonId,
        link: LinkId,
        mode: Mode,
    },

    /// A person finishes a leg.
    PersonArrival {
        time: f64,
        person: PersonId,
        link: LinkId,
        mode: Mode,
    },

    LinkEnter(TraversalEvent),

    /// A fleet vehicle picked up its passenger.
    PassengerPickup {
        time: f64,
        vehicle: VehicleId,
        person: PersonId,
        link: LinkId,
    },

    /// A fleet vehicle dropped off its passenger.
    PassengerDropoff {
        time: f64,
        vehicle: VehicleId,
        person: PersonId,
        link: LinkId,
    },

    /// The engine finished the run without being aborted.
    RunCompleted { time: f64 },
}

impl SimEvent {
    /// Returns the event timestamp in seconds.
    pub fn time(&self) -> f64 {
        match self {
            SimEvent::PersonDeparture { time, .. }
            | SimEvent::PersonArrival { time, .. }
            | SimEvent::PassengerPickup { time, .. }
            | SimEvent::PassengerDropoff { time, .. }
            | SimEvent::RunCompleted { time } => *time,
            SimEvent::LinkEnter(event) => event.time,
        }
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            SimEvent::PersonDeparture { .. } => "departure",
            SimEvent::PersonArrival { .. } => "arrival",
            SimEvent::LinkEnter(_) => "link_enter",
            SimEvent::PassengerPickup { .. } => "pickup",
            SimEvent::PassengerDropoff { .. } => "dropoff",
            SimEvent::RunCompleted { .. } => "run_completed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_time_accessor() {
        let enter = SimEvent::LinkEnter(TraversalEvent {
            vehicle: VehicleId::from("av_test_0"),
            link: LinkId::from("0:0>1:0"),
            time: 12.5,
        });
        assert_eq!(enter.time(), 12.5);
        assert_eq!(enter.kind(), "link_enter");

        let done = SimEvent::RunCompleted { time: 100.0 };
        assert_eq!(done.time(), 100.0);
    }
}
