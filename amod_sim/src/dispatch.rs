//! Dispatch policy plugin interface and the built-in policies.
//!
//! The engine calls [`DispatchPolicy::dispatch`] once per dispatch tick with a
//! snapshot of the fleet and the open requests. A policy answers with
//! [`Directive`]s; it never mutates engine state directly.

use crate::scenarios::PolicyId;
use crate::world::{OperatorConfig, PriceStructure};
use amod_core::{Network, VirtualNetwork};
use amod_env::{Coord, LinkId, PersonId, VehicleId};
use nalgebra::distance;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Identifier of a ride request within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RequestId(pub usize);

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "req_{}", self.0)
    }
}

/// What a fleet vehicle is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VehicleStatus {
    Idle,
    DrivingToPickup,
    PickingUp,
    WithCustomer,
    DroppingOff,
    Rebalancing,
}

impl VehicleStatus {
    /// Vehicles that accept a new assignment.
    pub fn is_available(&self) -> bool {
        matches!(self, VehicleStatus::Idle | VehicleStatus::Rebalancing)
    }
}

/// A fleet vehicle as seen by a policy.
#[derive(Debug, Clone, PartialEq)]
pub struct VehicleView {
    pub id: VehicleId,

    /// Link the vehicle is on (or heading to the end of)
    pub link: LinkId,

    /// Downstream end of `link`
    pub position: Coord,

    pub status: VehicleStatus,
}

/// An unassigned ride request as seen by a policy.
#[derive(Debug, Clone, PartialEq)]
pub struct RequestView {
    pub id: RequestId,
    pub person: PersonId,
    pub origin: LinkId,
    pub destination: LinkId,
    pub origin_coord: Coord,
    pub destination_coord: Coord,

    /// Time the request was submitted (s)
    pub submit_time: f64,
}

/// Snapshot handed to a policy at every dispatch tick.
#[derive(Debug, Clone)]
pub struct FleetState<'a> {
    /// Simulation time in seconds
    pub time: f64,

    /// All fleet vehicles, ordered by id
    pub vehicles: Vec<VehicleView>,

    /// Open requests, ordered by submission
    pub requests: Vec<RequestView>,

    pub network: &'a Network,
    pub pricing: &'a PriceStructure,
}

impl FleetState<'_> {
    /// Vehicles accepting a new assignment.
    pub fn available_vehicles(&self) -> Vec<&VehicleView> {
        self.vehicles.iter().filter(|v| v.status.is_available()).collect()
    }
}

/// Instruction from a policy to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Directive {
    /// Serve `request` with `vehicle`
    Assign { vehicle: VehicleId, request: RequestId },

    /// Drive empty to `destination` along the fastest road route
    Rebalance { vehicle: VehicleId, destination: LinkId },

    /// Drive empty along an explicit link sequence, followed verbatim
    Reposition { vehicle: VehicleId, route: Vec<LinkId> },
}

/// A pluggable dispatch algorithm.
pub trait DispatchPolicy {
    /// Identifier used in logs and reports.
    fn name(&self) -> &str;

    /// True if the policy needs the zonal virtual network.
    fn requires_virtual_network(&self) -> bool {
        false
    }

    /// Decides what the fleet does next.
    fn dispatch(
        &mut self,
        state: &FleetState<'_>,
        virtual_network: Option<&VirtualNetwork>,
    ) -> Vec<Directive>;
}

/// Creates policies by identifier.
pub trait PolicyFactory {
    /// True if `name` identifies a policy this factory can build.
    fn supports(&self, name: &str) -> bool;

    /// Builds a fresh policy instance, or `None` for unknown identifiers.
    fn create(&self, name: &str, operator: &OperatorConfig) -> Option<Box<dyn DispatchPolicy>>;
}

/// Factory for the [`PolicyId`] policies.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinPolicies;

impl PolicyFactory for BuiltinPolicies {
    fn supports(&self, name: &str) -> bool {
        name.parse::<PolicyId>().is_ok()
    }

    fn create(&self, name: &str, operator: &OperatorConfig) -> Option<Box<dyn DispatchPolicy>> {
        let id: PolicyId = name.parse().ok()?;
        let policy: Box<dyn DispatchPolicy> = match id {
            PolicyId::SingleHeuristic => Box::new(SingleHeuristic),
            PolicyId::DemandSupplyBalancing => Box::new(DemandSupplyBalancing),
            PolicyId::GlobalBipartiteMatching => Box::new(GlobalBipartiteMatching),
            PolicyId::AdaptiveRealTimeRebalancing => {
                Box::new(AdaptiveRealTimeRebalancing::new(operator.rebalance_period))
            }
        };
        Some(policy)
    }
}

/// Oldest request first; each takes the nearest free vehicle.
fn requests_pick_vehicles(
    vehicles: &[&VehicleView],
    requests: &[RequestView],
    taken: &mut HashSet<usize>,
) -> Vec<Directive> {
    let mut order: Vec<&RequestView> = requests.iter().collect();
    order.sort_by(|a, b| a.submit_time.total_cmp(&b.submit_time).then(a.id.cmp(&b.id)));

    let mut directives = Vec::new();
    for request in order {
        let Some(vi) = nearest_free(vehicles.iter().map(|v| &v.position), taken, &request.origin_coord)
        else {
            break;
        };
        taken.insert(vi);
        directives.push(Directive::Assign {
            vehicle: vehicles[vi].id.clone(),
            request: request.id,
        });
    }
    directives
}

/// Each free vehicle, in id order, takes its nearest open request.
fn vehicles_pick_requests(vehicles: &[&VehicleView], requests: &[RequestView]) -> Vec<Directive> {
    let mut served = HashSet::new();
    let mut directives = Vec::new();
    for vehicle in vehicles {
        let Some(ri) = nearest_free(requests.iter().map(|r| &r.origin_coord), &served, &vehicle.position)
        else {
            break;
        };
        served.insert(ri);
        directives.push(Directive::Assign {
            vehicle: vehicle.id.clone(),
            request: requests[ri].id,
        });
    }
    directives
}

/// Index of the closest candidate not in `taken`, lowest index on ties.
fn nearest_free<'a>(
    candidates: impl Iterator<Item = &'a Coord>,
    taken: &HashSet<usize>,
    target: &Coord,
) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (index, position) in candidates.enumerate() {
        if taken.contains(&index) {
            continue;
        }
        let d = distance(position, target);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((index, d)),
        }
    }
    best.map(|(index, _)| index)
}

/// Greedy global matching: shortest vehicle-request pair first.
fn global_matching(vehicles: &[&VehicleView], requests: &[RequestView]) -> Vec<Directive> {
    let mut pairs = Vec::with_capacity(vehicles.len() * requests.len());
    for (vi, vehicle) in vehicles.iter().enumerate() {
        for (ri, request) in requests.iter().enumerate() {
            pairs.push((distance(&vehicle.position, &request.origin_coord), vi, ri));
        }
    }
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(&b.2)));

    let mut used_vehicles = HashSet::new();
    let mut used_requests = HashSet::new();
    let mut directives = Vec::new();
    for (_, vi, ri) in pairs {
        if used_vehicles.contains(&vi) || used_requests.contains(&ri) {
            continue;
        }
        used_vehicles.insert(vi);
        used_requests.insert(ri);
        directives.push(Directive::Assign {
            vehicle: vehicles[vi].id.clone(),
            request: requests[ri].id,
        });
    }
    directives
}

/// Nearest free vehicle per request, first come first served.
#[derive(Debug, Default)]
pub struct SingleHeuristic;

impl DispatchPolicy for SingleHeuristic {
    fn name(&self) -> &str {
        PolicyId::SingleHeuristic.name()
    }

    fn dispatch(&mut self, state: &FleetState<'_>, _: Option<&VirtualNetwork>) -> Vec<Directive> {
        let vehicles = state.available_vehicles();
        requests_pick_vehicles(&vehicles, &state.requests, &mut HashSet::new())
    }
}

/// Switches sides depending on which of supply or demand is scarce.
///
/// With more free vehicles than requests, requests choose vehicles; otherwise
/// vehicles choose requests.
#[derive(Debug, Default)]
pub struct DemandSupplyBalancing;

impl DispatchPolicy for DemandSupplyBalancing {
    fn name(&self) -> &str {
        PolicyId::DemandSupplyBalancing.name()
    }

    fn dispatch(&mut self, state: &FleetState<'_>, _: Option<&VirtualNetwork>) -> Vec<Directive> {
        let vehicles = state.available_vehicles();
        if vehicles.len() >= state.requests.len() {
            requests_pick_vehicles(&vehicles, &state.requests, &mut HashSet::new())
        } else {
            debug!(
                "Undersupply at t={:.0}: {} vehicles for {} requests",
                state.time,
                vehicles.len(),
                state.requests.len()
            );
            vehicles_pick_requests(&vehicles, &state.requests)
        }
    }
}

/// Greedy approximation of a global vehicle/request matching.
#[derive(Debug, Default)]
pub struct GlobalBipartiteMatching;

impl DispatchPolicy for GlobalBipartiteMatching {
    fn name(&self) -> &str {
        PolicyId::GlobalBipartiteMatching.name()
    }

    fn dispatch(&mut self, state: &FleetState<'_>, _: Option<&VirtualNetwork>) -> Vec<Directive> {
        global_matching(&state.available_vehicles(), &state.requests)
    }
}

/// Global matching plus periodic zonal rebalancing of idle vehicles.
#[derive(Debug)]
pub struct AdaptiveRealTimeRebalancing {
    /// Seconds between rebalancing rounds
    rebalance_period: f64,

    last_rebalance: Option<f64>,
}

impl AdaptiveRealTimeRebalancing {
    pub fn new(rebalance_period: f64) -> Self {
        Self {
            rebalance_period,
            last_rebalance: None,
        }
    }

    fn rebalance_due(&self, time: f64) -> bool {
        match self.last_rebalance {
            None => true,
            Some(last) => time - last >= self.rebalance_period,
        }
    }

    /// Sends surplus idle vehicles to zones whose open requests outnumber
    /// their idle vehicles.
    fn rebalance(
        &self,
        state: &FleetState<'_>,
        virtual_network: &VirtualNetwork,
        matched: &HashSet<VehicleId>,
    ) -> Vec<Directive> {
        let zones = virtual_network.zone_count();
        let zone_of = |link: &LinkId, position: &Coord| {
            virtual_network
                .zone_of_link(link)
                .or_else(|| virtual_network.zone_of_coord(position))
                .map(|zone| zone.index)
        };

        let mut pending = vec![0usize; zones];
        for request in &state.requests {
            if let Some(z) = zone_of(&request.origin, &request.origin_coord) {
                pending[z] += 1;
            }
        }

        let idle: Vec<(&VehicleView, usize)> = state
            .vehicles
            .iter()
            .filter(|v| v.status == VehicleStatus::Idle)
            .filter_map(|v| zone_of(&v.link, &v.position).map(|z| (v, z)))
            .collect();
        let mut supply = vec![0usize; zones];
        for (_, z) in &idle {
            supply[*z] += 1;
        }

        let mut surplus: Vec<usize> = (0..zones)
            .map(|z| supply[z].saturating_sub(pending[z]))
            .collect();
        let mut candidates: Vec<(&VehicleView, usize)> = idle
            .into_iter()
            .filter(|(v, z)| surplus[*z] > 0 && !matched.contains(&v.id))
            .collect();

        let mut directives = Vec::new();
        for zone in virtual_network.zones() {
            let deficit = pending[zone.index].saturating_sub(supply[zone.index]);
            let Some(anchor) = &zone.anchor_link else {
                continue;
            };
            for _ in 0..deficit {
                let pick = candidates
                    .iter()
                    .enumerate()
                    .filter(|(_, (_, z))| surplus[*z] > 0)
                    .map(|(i, (v, _))| (i, distance(&v.position, &zone.centroid)))
                    .reduce(|best, c| if c.1 < best.1 { c } else { best });
                let Some((i, _)) = pick else {
                    break;
                };
                let (vehicle, from_zone) = candidates.remove(i);
                surplus[from_zone] -= 1;
                directives.push(Directive::Rebalance {
                    vehicle: vehicle.id.clone(),
                    destination: anchor.clone(),
                });
            }
        }

        if !directives.is_empty() {
            debug!(
                "Rebalancing {} vehicles at t={:.0}",
                directives.len(),
                state.time
            );
        }
        directives
    }
}

impl DispatchPolicy for AdaptiveRealTimeRebalancing {
    fn name(&self) -> &str {
        PolicyId::AdaptiveRealTimeRebalancing.name()
    }

    fn requires_virtual_network(&self) -> bool {
        true
    }

    fn dispatch(
        &mut self,
        state: &FleetState<'_>,
        virtual_network: Option<&VirtualNetwork>,
    ) -> Vec<Directive> {
        let mut directives = global_matching(&state.available_vehicles(), &state.requests);

        if self.rebalance_due(state.time) {
            self.last_rebalance = Some(state.time);
            match virtual_network {
                Some(vn) => {
                    let matched: HashSet<VehicleId> = directives
                        .iter()
                        .filter_map(|d| match d {
                            Directive::Assign { vehicle, .. } => Some(vehicle.clone()),
                            _ => None,
                        })
                        .collect();
                    let rebalancing = self.rebalance(state, vn, &matched);
                    directives.extend(rebalancing);
                }
                None => warn!("{} has no virtual network; skipping rebalancing", self.name()),
            }
        }
        directives
    }
}
