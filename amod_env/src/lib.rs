//! AMoD Harness Environment Layer
//!
//! Shared vocabulary between the scenario model (`amod_core`), the engines
//! that execute scenarios and the observers that check them (`amod_sim`):
//! - Identifiers, coordinates and travel modes
//! - The event stream an engine emits while running
//! - The `EventHandler` callback interface observers implement
//!
//! # Example
//!
//! ```
//! use amod_env::{EventHandler, EventRecorder, SimEvent};
//!
//! let mut recorder = EventRecorder::new();
//! recorder.handle_event(&SimEvent::RunCompleted { time: 10.0 }).unwrap();
//! assert_eq!(recorder.events().len(), 1);
//! ```

mod error;
mod events;
mod handler;
mod types;

pub use error::EnvError;
pub use events::{SimEvent, TraversalEvent};
pub use handler::{EventFanout, EventHandler, EventRecorder};
pub use types::{coord, Coord, LinkId, Mode, NodeId, PersonId, VehicleId, AV_VEHICLE_PREFIX};
