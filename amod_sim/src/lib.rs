//! AMoD dispatch validation harness
//!
//! Runs a set of fleet dispatch policies against one augmented scenario and
//! checks every run with the conservation oracle.
//!
//! # Pipeline
//!
//! ```text
//! ScenarioConfig ──► BaseScenario (grid network + commuters)
//!                        │
//!                        ▼
//!                  ScenarioFixture   augment ─► partition ─► place fleet
//!                        │           (built once, shared via Arc)
//!          ┌─────────────┼─────────────┐
//!          ▼             ▼             ▼
//!      policy #1     policy #2  ...  policy #N      fresh policy + oracle
//!          │             │             │
//!          └──► SimulationEngine ──► ConservationOracle ──► PolicyReport
//! ```
//!
//! A run passes when no fleet vehicle touched a transit-only link and every
//! departure was matched by an arrival.
//!
//! # Usage
//!
//! ```ignore
//! use amod_sim::{ScenarioConfig, ScenarioHarness};
//!
//! let harness = ScenarioHarness::from_config(ScenarioConfig::default())?;
//! let report = harness.run_configured()?;
//! assert!(report.passed());
//! ```

pub mod dispatch;
pub mod engine;
mod error;
pub mod exporter;
pub mod fleet;
pub mod oracle;
mod router;
pub mod runner;
pub mod scenarios;
pub mod world;

pub use dispatch::{
    BuiltinPolicies, Directive, DispatchPolicy, FleetState, PolicyFactory, RequestId,
    RequestView, VehicleStatus, VehicleView,
};
pub use engine::{EngineError, EngineInput, EventDrivenEngine, RunSummary, SimulationEngine};
pub use error::{HarnessError, RunFailure};
pub use exporter::HarnessExport;
pub use fleet::{generate_fleet, FleetGenerator, FleetVehicle};
pub use oracle::{ConservationOracle, OracleState, RunRecord};
pub use router::RoadRouter;
pub use runner::{HarnessReport, PolicyReport, ScenarioHarness};
pub use scenarios::PolicyId;
pub use world::{BaseScenario, OperatorConfig, PriceStructure, ScenarioConfig, ScenarioFixture};
