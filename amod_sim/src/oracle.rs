//! Conservation oracle - the harness's view of a run.
//!
//! The oracle subscribes to the engine's event stream and checks two
//! invariants:
//! - **Conservation**: every departure is matched by an arrival by run end
//! - **Mode access**: fleet vehicles (`av_` prefix) never enter a link that
//!   excludes vehicular traffic
//!
//! Mode access is checked eagerly: the first violation is returned as an
//! error so the engine aborts the run at that event. Conservation can only be
//! judged once the run has terminated, so it is left to the caller of
//! [`ConservationOracle::finalize`].
//!
//! ```text
//!   Registered --first event--> Accumulating --RunCompleted--> Terminated
//!                                    |
//!                                    +--av_ vehicle on pt link--> Violated
//! ```

use amod_core::Network;
use amod_env::{EnvError, EventHandler, LinkId, Mode, SimEvent, VehicleId};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Lifecycle of an oracle within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleState {
    /// Attached to the engine, no event seen yet
    Registered,

    /// Counting events
    Accumulating,

    /// A mode access violation was observed; the run is void
    Violated,

    /// The engine reported a normal end of run
    Terminated,
}

/// Counters collected over a single run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    /// Policy variant the run belongs to
    pub policy: String,

    pub departures: u64,
    pub arrivals: u64,
    pub violations: u64,
    pub link_enters: u64,

    /// Departures keyed by leg mode
    pub departures_by_mode: BTreeMap<String, u64>,

    /// Arrivals keyed by leg mode
    pub arrivals_by_mode: BTreeMap<String, u64>,

    /// Oracle state when the record was finalized
    pub state: OracleState,
}

impl RunRecord {
    fn new(policy: &str) -> Self {
        Self {
            policy: policy.to_string(),
            departures: 0,
            arrivals: 0,
            violations: 0,
            link_enters: 0,
            departures_by_mode: BTreeMap::new(),
            arrivals_by_mode: BTreeMap::new(),
            state: OracleState::Registered,
        }
    }

    /// Departures minus arrivals.
    pub fn discrepancy(&self) -> i64 {
        self.departures as i64 - self.arrivals as i64
    }

    /// True if the run terminated normally and every departure arrived.
    pub fn is_conserved(&self) -> bool {
        self.state == OracleState::Terminated && self.departures == self.arrivals
    }
}

/// Stateful event handler checking trip conservation and mode access.
pub struct ConservationOracle<'a> {
    /// Network the run executes on, for link mode lookups
    network: &'a Network,

    record: RunRecord,

    /// First violation, replayed for events arriving after it
    violation: Option<EnvError>,
}

impl<'a> ConservationOracle<'a> {
    /// Creates an oracle for one run of `policy` on `network`.
    pub fn new(policy: &str, network: &'a Network) -> Self {
        Self {
            network,
            record: RunRecord::new(policy),
            violation: None,
        }
    }

    pub fn state(&self) -> OracleState {
        self.record.state
    }

    /// Read-only view of the counters so far.
    pub fn record(&self) -> &RunRecord {
        &self.record
    }

    /// Ends the oracle's lifetime and hands back its record.
    pub fn finalize(self) -> RunRecord {
        debug!(
            "Oracle for {} finalized in state {:?}: {} departures, {} arrivals",
            self.record.policy, self.record.state, self.record.departures, self.record.arrivals
        );
        self.record
    }

    fn check_link_enter(
        &mut self,
        vehicle: &VehicleId,
        link_id: &LinkId,
        time: f64,
    ) -> Result<(), EnvError> {
        self.record.link_enters += 1;

        let link = self
            .network
            .link(link_id)
            .ok_or_else(|| EnvError::UnknownLink(link_id.clone()))?;

        if vehicle.is_amod() && !link.allows(&Mode::Car) {
            let violation = EnvError::ModeAccessViolation {
                vehicle: vehicle.clone(),
                link: link_id.clone(),
                time,
                allowed: link.modes_label(),
            };
            warn!("{} ({})", violation, self.record.policy);

            self.record.violations += 1;
            self.record.state = OracleState::Violated;
            self.violation = Some(violation.clone());
            return Err(violation);
        }
        Ok(())
    }
}

impl EventHandler for ConservationOracle<'_> {
    fn handle_event(&mut self, event: &SimEvent) -> Result<(), EnvError> {
        if let Some(violation) = &self.violation {
            return Err(violation.clone());
        }
        if self.record.state == OracleState::Registered {
            self.record.state = OracleState::Accumulating;
        }

        match event {
            SimEvent::PersonDeparture { mode, .. } => {
                self.record.departures += 1;
                *self
                    .record
                    .departures_by_mode
                    .entry(mode.name().to_string())
                    .or_insert(0) += 1;
            }
            SimEvent::PersonArrival { mode, .. } => {
                self.record.arrivals += 1;
                *self
                    .record
                    .arrivals_by_mode
                    .entry(mode.name().to_string())
                    .or_insert(0) += 1;
            }
            SimEvent::LinkEnter(traversal) => {
                self.check_link_enter(&traversal.vehicle, &traversal.link, traversal.time)?;
            }
            SimEvent::RunCompleted { .. } => {
                self.record.state = OracleState::Terminated;
            }
            SimEvent::PassengerPickup { .. } | SimEvent::PassengerDropoff { .. } => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amod_core::{Link, Node};
    use amod_env::{coord, PersonId, TraversalEvent};

    fn network() -> Network {
        let mut network = Network::new();
        network.add_node(Node::new("0:0", coord(0.0, 0.0)));
        network.add_node(Node::new("1:1", coord(1000.0, 1000.0)));
        network
            .add_link(Link::new("road", "0:0", "1:1", 8.33, 1414.0, [Mode::Car]))
            .unwrap();
        network
            .add_link(Link::new("pt_fwd_0:0", "0:0", "1:1", 27.8, 1000.0, [Mode::Pt]))
            .unwrap();
        network
    }

    fn departure(time: f64, mode: Mode) -> SimEvent {
        SimEvent::PersonDeparture {
            time,
            person: PersonId::from("p"),
            link: LinkId::from("road"),
            mode,
        }
    }

    fn arrival(time: f64, mode: Mode) -> SimEvent {
        SimEvent::PersonArrival {
            time,
            person: PersonId::from("p"),
            link: LinkId::from("road"),
            mode,
        }
    }

    fn enter(vehicle: &str, link: &str, time: f64) -> SimEvent {
        SimEvent::LinkEnter(TraversalEvent {
            vehicle: VehicleId::from(vehicle),
            link: LinkId::from(link),
            time,
        })
    }

    #[test]
    fn test_counts_and_terminates() {
        let network = network();
        let mut oracle = ConservationOracle::new("SingleHeuristic", &network);
        assert_eq!(oracle.state(), OracleState::Registered);

        oracle.handle_event(&departure(1.0, Mode::Av)).unwrap();
        assert_eq!(oracle.state(), OracleState::Accumulating);
        oracle.handle_event(&enter("av_test_0", "road", 2.0)).unwrap();
        oracle.handle_event(&arrival(3.0, Mode::Av)).unwrap();
        oracle.handle_event(&departure(4.0, Mode::Walk)).unwrap();
        oracle.handle_event(&SimEvent::RunCompleted { time: 5.0 }).unwrap();

        let record = oracle.finalize();
        assert_eq!(record.state, OracleState::Terminated);
        assert_eq!(record.departures, 2);
        assert_eq!(record.arrivals, 1);
        assert_eq!(record.discrepancy(), 1);
        assert!(!record.is_conserved());
        assert_eq!(record.departures_by_mode["walk"], 1);
        assert_eq!(record.arrivals_by_mode.get("walk"), None);
        assert_eq!(record.link_enters, 1);
    }

    #[test]
    fn test_fleet_vehicle_on_transit_link_is_a_violation() {
        let network = network();
        let mut oracle = ConservationOracle::new("SingleHeuristic", &network);

        let err = oracle.handle_event(&enter("av_test_3", "pt_fwd_0:0", 7.0)).unwrap_err();
        assert!(err.is_violation());
        assert_eq!(oracle.state(), OracleState::Violated);

        // Further events replay the original violation
        let again = oracle.handle_event(&SimEvent::RunCompleted { time: 8.0 }).unwrap_err();
        assert_eq!(again, err);

        let record = oracle.finalize();
        assert_eq!(record.violations, 1);
        assert_eq!(record.state, OracleState::Violated);
    }

    #[test]
    fn test_non_fleet_vehicles_may_use_transit_links() {
        let network = network();
        let mut oracle = ConservationOracle::new("SingleHeuristic", &network);

        oracle.handle_event(&enter("bus_1", "pt_fwd_0:0", 1.0)).unwrap();
        oracle.handle_event(&enter("av_test_1", "road", 2.0)).unwrap();
        assert_eq!(oracle.record().violations, 0);
    }

    #[test]
    fn test_unknown_link_is_fatal() {
        let network = network();
        let mut oracle = ConservationOracle::new("SingleHeuristic", &network);

        let err = oracle.handle_event(&enter("av_test_0", "nowhere", 1.0)).unwrap_err();
        assert_eq!(err, EnvError::UnknownLink(LinkId::from("nowhere")));
    }
}
