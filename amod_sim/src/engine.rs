//! Simulation engine seam and the reference discrete-event engine.
//!
//! # Event loop
//!
//! ```text
//!  ┌──────────────────────── BinaryHeap<(time, seq)> ─────────────────────┐
//!  │ EndActivity │ Arrive │ VehicleStep │ PickupDone │ DropoffDone │ Tick  │
//!  └──────┬──────────┬─────────┬────────────┬────────────┬──────────┬─────┘
//!         │          │         │            │            │          │
//!     departure   arrival   LinkEnter     pickup      dropoff    policy
//!         │          │         │            │        + arrival  directives
//!         └──────────┴─────────┴─── EventHandler ───────┘
//! ```
//!
//! Actions are processed in (time, insertion) order, so handlers see events
//! in non-decreasing timestamp order. The first handler error aborts the run.

use crate::dispatch::{
    Directive, DispatchPolicy, FleetState, RequestId, RequestView, VehicleStatus, VehicleView,
};
use crate::fleet::FleetVehicle;
use crate::router::RoadRouter;
use crate::world::OperatorConfig;
use amod_core::{Activity, Network, Plan, Population, PopulationError, VirtualNetwork};
use amod_env::{EnvError, EventHandler, LinkId, Mode, PersonId, SimEvent, TraversalEvent, VehicleId};
use nalgebra::distance;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BTreeSet, BinaryHeap, HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Detour factor applied to beeline distances of teleported legs.
pub const BEELINE_FACTOR: f64 = 1.3;

/// Teleport speed of walk legs (m/s).
pub const WALK_SPEED: f64 = 0.833;

/// Teleport speed of transit legs (m/s).
pub const PT_SPEED: f64 = 5.56;

/// Teleport speed of any other non-fleet leg (m/s).
pub const DEFAULT_TELEPORT_SPEED: f64 = 8.33;

/// Errors that end a run early.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// A handler rejected an event
    #[error("Run aborted by event handler: {0}")]
    Aborted(EnvError),

    #[error("Unknown link: {0}")]
    UnknownLink(LinkId),

    /// No link allows `car`, so fleet legs can not be served
    #[error("Network has no road links")]
    NoRoadNetwork,

    #[error("No road route from {from} to {to}")]
    NoRoute { from: LinkId, to: LinkId },

    #[error(transparent)]
    MalformedPlan(#[from] PopulationError),
}

/// Everything a run reads.
#[derive(Debug, Clone, Copy)]
pub struct EngineInput<'a> {
    pub network: &'a Network,
    pub population: &'a Population,
    pub fleet: &'a [FleetVehicle],
    pub operator: &'a OperatorConfig,

    /// Simulation end time in seconds
    pub end_time: f64,

    /// Only set for policies that ask for it
    pub virtual_network: Option<&'a VirtualNetwork>,
}

/// Engine-side totals of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    /// Time of the `RunCompleted` event
    pub end_time: f64,

    pub requests_served: usize,
    pub requests_unserved: usize,

    /// Metres driven by the whole fleet
    pub vehicle_distance: f64,

    /// Sum of fares
    pub revenue: f64,

    /// Events delivered to the handler
    pub events_emitted: u64,
}

/// A simulation engine the harness can drive.
pub trait SimulationEngine {
    /// Executes one run, delivering every event to `handler`.
    fn run(
        &mut self,
        input: EngineInput<'_>,
        policy: &mut dyn DispatchPolicy,
        handler: &mut dyn EventHandler,
    ) -> Result<RunSummary, EngineError>;
}

/// Reference engine: free-flow travel, teleported non-fleet legs,
/// periodic dispatch.
#[derive(Debug, Clone, Copy, Default)]
pub struct EventDrivenEngine;

impl SimulationEngine for EventDrivenEngine {
    fn run(
        &mut self,
        input: EngineInput<'_>,
        policy: &mut dyn DispatchPolicy,
        handler: &mut dyn EventHandler,
    ) -> Result<RunSummary, EngineError> {
        input.population.validate()?;
        let router = RoadRouter::new(input.network);
        if router.link_count() == 0 {
            return Err(EngineError::NoRoadNetwork);
        }

        info!(
            "Running {} with {} vehicles and {} persons until t={:.0}s",
            policy.name(),
            input.fleet.len(),
            input.population.len(),
            input.end_time
        );

        let summary = Run::new(input, router, handler).execute(policy)?;

        info!(
            "{} finished at t={:.0}s: {} served, {} unserved, {:.1} km driven",
            policy.name(),
            summary.end_time,
            summary.requests_served,
            summary.requests_unserved,
            summary.vehicle_distance / 1000.0
        );
        Ok(summary)
    }
}

/// Teleport speed of a non-fleet mode.
fn teleport_speed(mode: &Mode) -> f64 {
    match mode {
        Mode::Walk => WALK_SPEED,
        Mode::Pt => PT_SPEED,
        _ => DEFAULT_TELEPORT_SPEED,
    }
}

#[derive(Debug, Clone)]
enum Action {
    /// Activity at plan element `activity` ends
    EndActivity { person: usize, activity: usize },

    /// Teleported leg reaches plan element `activity`
    Arrive {
        person: usize,
        activity: usize,
        mode: Mode,
    },

    /// Vehicle reached the end of its current link
    VehicleStep { vehicle: usize },

    PickupDone { vehicle: usize },
    DropoffDone { vehicle: usize },
    DispatchTick,
}

#[derive(Debug)]
struct Scheduled {
    time: f64,
    seq: u64,
    action: Action,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    // Reversed: BinaryHeap is a max-heap
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .total_cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

struct Traveller<'a> {
    id: &'a PersonId,
    plan: &'a Plan,
}

struct Vehicle {
    id: VehicleId,
    link: LinkId,
    status: VehicleStatus,
    route: VecDeque<LinkId>,

    /// Request being served, if any
    request: Option<usize>,

    /// A VehicleStep is queued
    moving: bool,

    distance: f64,
}

struct Request {
    person: usize,
    origin: LinkId,
    destination: LinkId,

    /// Plan element index of the destination activity
    destination_activity: usize,

    submit_time: f64,
    pickup_time: f64,

    /// Vehicle odometer at pickup
    pickup_odometer: f64,
}

/// Mutable state of a single run.
struct Run<'a, 'h> {
    input: EngineInput<'a>,
    router: RoadRouter,
    handler: &'h mut dyn EventHandler,

    queue: BinaryHeap<Scheduled>,
    seq: u64,
    now: f64,

    travellers: Vec<Traveller<'a>>,
    active_travellers: usize,

    vehicles: Vec<Vehicle>,
    vehicle_index: HashMap<VehicleId, usize>,

    requests: Vec<Request>,
    open_requests: BTreeSet<usize>,

    summary: RunSummary,
}

impl<'a, 'h> Run<'a, 'h> {
    fn new(input: EngineInput<'a>, router: RoadRouter, handler: &'h mut dyn EventHandler) -> Self {
        let travellers: Vec<Traveller<'a>> = input
            .population
            .persons()
            .filter_map(|person| {
                person.selected_plan().map(|plan| Traveller {
                    id: &person.id,
                    plan,
                })
            })
            .collect();

        let vehicles: Vec<Vehicle> = input
            .fleet
            .iter()
            .map(|v| Vehicle {
                id: v.id.clone(),
                link: v.start_link.clone(),
                status: VehicleStatus::Idle,
                route: VecDeque::new(),
                request: None,
                moving: false,
                distance: 0.0,
            })
            .collect();
        let vehicle_index = vehicles
            .iter()
            .enumerate()
            .map(|(i, v)| (v.id.clone(), i))
            .collect();

        Self {
            input,
            router,
            handler,
            queue: BinaryHeap::new(),
            seq: 0,
            now: 0.0,
            active_travellers: travellers.len(),
            travellers,
            vehicles,
            vehicle_index,
            requests: Vec::new(),
            open_requests: BTreeSet::new(),
            summary: RunSummary::default(),
        }
    }

    fn execute(mut self, policy: &mut dyn DispatchPolicy) -> Result<RunSummary, EngineError> {
        for vehicle in &self.vehicles {
            if !self.input.network.contains_link(&vehicle.link) {
                return Err(EngineError::UnknownLink(vehicle.link.clone()));
            }
        }
        for person in 0..self.travellers.len() {
            self.start_activity(person, 0);
        }
        self.schedule(0.0, Action::DispatchTick);

        while let Some(next) = self.queue.pop() {
            if next.time > self.input.end_time {
                debug!("Reached end time with {} queued actions", self.queue.len() + 1);
                self.now = self.input.end_time;
                break;
            }
            self.now = next.time;

            match next.action {
                Action::EndActivity { person, activity } => self.end_activity(person, activity)?,
                Action::Arrive {
                    person,
                    activity,
                    mode,
                } => self.arrive(person, activity, mode)?,
                Action::VehicleStep { vehicle } => self.vehicle_step(vehicle)?,
                Action::PickupDone { vehicle } => self.pickup_done(vehicle)?,
                Action::DropoffDone { vehicle } => self.dropoff_done(vehicle)?,
                Action::DispatchTick => self.dispatch_tick(policy)?,
            }
        }

        self.emit(SimEvent::RunCompleted { time: self.now })?;

        self.summary.end_time = self.now;
        self.summary.requests_unserved = self.requests.len() - self.summary.requests_served;
        Ok(self.summary)
    }

    fn schedule(&mut self, time: f64, action: Action) {
        self.seq += 1;
        self.queue.push(Scheduled {
            time,
            seq: self.seq,
            action,
        });
    }

    fn emit(&mut self, event: SimEvent) -> Result<(), EngineError> {
        self.summary.events_emitted += 1;
        self.handler.handle_event(&event).map_err(EngineError::Aborted)
    }

    fn activity(&self, person: usize, index: usize) -> Result<&'a Activity, EngineError> {
        let traveller = &self.travellers[person];
        traveller
            .plan
            .elements
            .get(index)
            .and_then(|element| element.as_activity())
            .ok_or_else(|| PopulationError::MalformedPlan {
                person: traveller.id.clone(),
                reason: format!("expected activity at element {}", index),
            })
            .map_err(EngineError::from)
    }

    /// Schedules the end of an activity, or retires the traveller after the
    /// last one.
    fn start_activity(&mut self, person: usize, index: usize) {
        let plan = self.travellers[person].plan;
        if index + 1 >= plan.len() {
            self.active_travellers -= 1;
            return;
        }
        let end = match plan.elements[index].as_activity().and_then(|a| a.end_time) {
            Some(end) => end.max(self.now),
            None => self.now,
        };
        self.schedule(
            end,
            Action::EndActivity {
                person,
                activity: index,
            },
        );
    }

    fn end_activity(&mut self, person: usize, index: usize) -> Result<(), EngineError> {
        let traveller = &self.travellers[person];
        let (id, plan) = (traveller.id, traveller.plan);
        let origin = self.activity(person, index)?;
        let destination = self.activity(person, index + 2)?;
        let leg = plan.elements[index + 1]
            .as_leg()
            .ok_or_else(|| PopulationError::MalformedPlan {
                person: id.clone(),
                reason: format!("expected leg at element {}", index + 1),
            })?;

        self.emit(SimEvent::PersonDeparture {
            time: self.now,
            person: id.clone(),
            link: origin.link.clone(),
            mode: leg.mode.clone(),
        })?;

        if leg.mode == Mode::Av {
            let request = Request {
                person,
                origin: self.road_link_for(origin)?,
                destination: self.road_link_for(destination)?,
                destination_activity: index + 2,
                submit_time: self.now,
                pickup_time: self.now,
                pickup_odometer: 0.0,
            };
            debug!(
                "Request {} from {}: {} -> {}",
                self.requests.len(),
                id,
                request.origin,
                request.destination
            );
            self.open_requests.insert(self.requests.len());
            self.requests.push(request);
        } else {
            let beeline = distance(&origin.coord, &destination.coord);
            let duration = beeline * BEELINE_FACTOR / teleport_speed(&leg.mode);
            self.schedule(
                self.now + duration,
                Action::Arrive {
                    person,
                    activity: index + 2,
                    mode: leg.mode.clone(),
                },
            );
        }
        Ok(())
    }

    /// The activity's own link if vehicles can reach it, otherwise the
    /// nearest road link.
    fn road_link_for(&self, activity: &Activity) -> Result<LinkId, EngineError> {
        if self.router.is_road_link(&activity.link) {
            return Ok(activity.link.clone());
        }
        self.input
            .network
            .nearest_link(&activity.coord, &Mode::Car)
            .map(|link| link.id.clone())
            .ok_or(EngineError::NoRoadNetwork)
    }

    fn arrive(&mut self, person: usize, index: usize, mode: Mode) -> Result<(), EngineError> {
        let link = self.activity(person, index)?.link.clone();
        self.emit(SimEvent::PersonArrival {
            time: self.now,
            person: self.travellers[person].id.clone(),
            link,
            mode,
        })?;
        self.start_activity(person, index);
        Ok(())
    }

    fn dispatch_tick(&mut self, policy: &mut dyn DispatchPolicy) -> Result<(), EngineError> {
        if self.active_travellers == 0 {
            debug!("All travellers done at t={:.0}, stopping dispatch", self.now);
            return Ok(());
        }

        let directives = {
            let state = self.fleet_state()?;
            policy.dispatch(&state, self.input.virtual_network)
        };
        for directive in directives {
            self.apply(directive)?;
        }

        self.schedule(self.now + self.input.operator.dispatch_period, Action::DispatchTick);
        Ok(())
    }

    fn fleet_state(&self) -> Result<FleetState<'a>, EngineError> {
        let network = self.input.network;
        let head = |link: &LinkId| {
            network
                .link_head(link)
                .map_err(|_| EngineError::UnknownLink(link.clone()))
        };

        let vehicles = self
            .vehicles
            .iter()
            .map(|v| -> Result<VehicleView, EngineError> {
                Ok(VehicleView {
                    id: v.id.clone(),
                    link: v.link.clone(),
                    position: head(&v.link)?,
                    status: v.status,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let requests = self
            .open_requests
            .iter()
            .map(|&r| -> Result<RequestView, EngineError> {
                let request = &self.requests[r];
                Ok(RequestView {
                    id: RequestId(r),
                    person: self.travellers[request.person].id.clone(),
                    origin: request.origin.clone(),
                    destination: request.destination.clone(),
                    origin_coord: head(&request.origin)?,
                    destination_coord: head(&request.destination)?,
                    submit_time: request.submit_time,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(FleetState {
            time: self.now,
            vehicles,
            requests,
            network,
            pricing: &self.input.operator.pricing,
        })
    }

    /// Looks up a vehicle that may take a new directive.
    fn available_vehicle(&self, id: &VehicleId) -> Option<usize> {
        let Some(&index) = self.vehicle_index.get(id) else {
            warn!("Directive for unknown vehicle {}", id);
            return None;
        };
        if !self.vehicles[index].status.is_available() {
            debug!(
                "Ignoring directive for busy vehicle {} ({:?})",
                id, self.vehicles[index].status
            );
            return None;
        }
        Some(index)
    }

    fn apply(&mut self, directive: Directive) -> Result<(), EngineError> {
        match directive {
            Directive::Assign { vehicle, request } => {
                let Some(v) = self.available_vehicle(&vehicle) else {
                    return Ok(());
                };
                if !self.open_requests.contains(&request.0) {
                    debug!("Ignoring assignment of {} to {}: not open", request, vehicle);
                    return Ok(());
                }
                let origin = &self.requests[request.0].origin;
                let Some(route) = self.router.route(&self.vehicles[v].link, origin) else {
                    warn!("{} can not reach {}, assignment dropped", vehicle, origin);
                    return Ok(());
                };
                debug!("Assigning {} to {} ({} links)", request, vehicle, route.len());

                self.open_requests.remove(&request.0);
                let state = &mut self.vehicles[v];
                state.request = Some(request.0);
                state.status = VehicleStatus::DrivingToPickup;
                state.route = route.into();
                self.start_moving(v);
            }
            Directive::Rebalance {
                vehicle,
                destination,
            } => {
                let Some(v) = self.available_vehicle(&vehicle) else {
                    return Ok(());
                };
                let Some(route) = self.router.route(&self.vehicles[v].link, &destination) else {
                    debug!("{} can not reach {}, rebalancing dropped", vehicle, destination);
                    return Ok(());
                };
                let state = &mut self.vehicles[v];
                state.status = VehicleStatus::Rebalancing;
                state.route = route.into();
                self.start_moving(v);
            }
            Directive::Reposition { vehicle, route } => {
                let Some(v) = self.available_vehicle(&vehicle) else {
                    return Ok(());
                };
                if let Some(unknown) = route.iter().find(|l| !self.input.network.contains_link(l)) {
                    return Err(EngineError::UnknownLink(unknown.clone()));
                }
                let state = &mut self.vehicles[v];
                state.status = VehicleStatus::Rebalancing;
                state.route = route.into();
                self.start_moving(v);
            }
        }
        Ok(())
    }

    fn start_moving(&mut self, vehicle: usize) {
        if !self.vehicles[vehicle].moving {
            self.vehicles[vehicle].moving = true;
            self.schedule(self.now, Action::VehicleStep { vehicle });
        }
    }

    fn vehicle_step(&mut self, v: usize) -> Result<(), EngineError> {
        if let Some(next) = self.vehicles[v].route.pop_front() {
            let link = self
                .input
                .network
                .link(&next)
                .ok_or_else(|| EngineError::UnknownLink(next.clone()))?;
            let (length, travel_time) = (link.length, link.travel_time());

            let vehicle = &mut self.vehicles[v];
            vehicle.link = next.clone();
            vehicle.distance += length;
            let id = vehicle.id.clone();
            self.summary.vehicle_distance += length;

            self.emit(SimEvent::LinkEnter(TraversalEvent {
                vehicle: id,
                link: next,
                time: self.now,
            }))?;
            self.schedule(self.now + travel_time, Action::VehicleStep { vehicle: v });
            return Ok(());
        }

        let vehicle = &mut self.vehicles[v];
        vehicle.moving = false;
        match vehicle.status {
            VehicleStatus::DrivingToPickup => {
                vehicle.status = VehicleStatus::PickingUp;
                let at = self.now + self.input.operator.pickup_duration;
                self.schedule(at, Action::PickupDone { vehicle: v });
            }
            VehicleStatus::WithCustomer => {
                vehicle.status = VehicleStatus::DroppingOff;
                let at = self.now + self.input.operator.dropoff_duration;
                self.schedule(at, Action::DropoffDone { vehicle: v });
            }
            VehicleStatus::Rebalancing => vehicle.status = VehicleStatus::Idle,
            VehicleStatus::Idle | VehicleStatus::PickingUp | VehicleStatus::DroppingOff => {}
        }
        Ok(())
    }

    /// Request currently served by vehicle `v`.
    fn served_request(&self, v: usize) -> Option<usize> {
        let request = self.vehicles[v].request;
        if request.is_none() {
            warn!("Vehicle {} stopped without a request", self.vehicles[v].id);
        }
        request
    }

    fn pickup_done(&mut self, v: usize) -> Result<(), EngineError> {
        let Some(r) = self.served_request(v) else {
            return Ok(());
        };
        let person = self.travellers[self.requests[r].person].id.clone();
        let here = self.vehicles[v].link.clone();

        self.emit(SimEvent::PassengerPickup {
            time: self.now,
            vehicle: self.vehicles[v].id.clone(),
            person,
            link: here.clone(),
        })?;

        let destination = self.requests[r].destination.clone();
        let route = self
            .router
            .route(&here, &destination)
            .ok_or(EngineError::NoRoute {
                from: here,
                to: destination,
            })?;

        let request = &mut self.requests[r];
        request.pickup_time = self.now;
        request.pickup_odometer = self.vehicles[v].distance;

        let vehicle = &mut self.vehicles[v];
        vehicle.status = VehicleStatus::WithCustomer;
        vehicle.route = route.into();
        self.start_moving(v);
        Ok(())
    }

    fn dropoff_done(&mut self, v: usize) -> Result<(), EngineError> {
        let Some(r) = self.served_request(v) else {
            return Ok(());
        };
        let (person, destination_activity) = {
            let request = &self.requests[r];
            (request.person, request.destination_activity)
        };

        self.emit(SimEvent::PassengerDropoff {
            time: self.now,
            vehicle: self.vehicles[v].id.clone(),
            person: self.travellers[person].id.clone(),
            link: self.vehicles[v].link.clone(),
        })?;

        let request = &self.requests[r];
        let trip_distance = self.vehicles[v].distance - request.pickup_odometer;
        let ride_time = self.now - request.pickup_time;
        self.summary.revenue += self.input.operator.pricing.fare(trip_distance, ride_time);
        self.summary.requests_served += 1;

        let vehicle = &mut self.vehicles[v];
        vehicle.status = VehicleStatus::Idle;
        vehicle.request = None;

        self.arrive(person, destination_activity, Mode::Av)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{BuiltinPolicies, PolicyFactory};
    use crate::world::grid_network;
    use amod_core::{Leg, Link, Person};
    use amod_env::{coord, EventRecorder};
    use approx::assert_relative_eq;

    /// Never dispatches anything.
    struct Idle;

    impl DispatchPolicy for Idle {
        fn name(&self) -> &str {
            "Idle"
        }

        fn dispatch(&mut self, _: &FleetState<'_>, _: Option<&VirtualNetwork>) -> Vec<Directive> {
            Vec::new()
        }
    }

    fn commuter(id: &str, home: &str, work: &str, network: &Network, leave: f64) -> Person {
        let home_coord = network.link_midpoint(&LinkId::from(home)).unwrap();
        let work_coord = network.link_midpoint(&LinkId::from(work)).unwrap();
        let mut plan = Plan::new();
        plan.push_activity(Activity::new("home", home_coord, home).with_end_time(leave));
        plan.push_leg(Leg::new(Mode::Av));
        plan.push_activity(Activity::new("work", work_coord, work).with_end_time(leave + 3600.0));
        plan.push_leg(Leg::new(Mode::Walk));
        plan.push_activity(Activity::new("home", home_coord, home));
        Person::new(id, plan)
    }

    fn fleet(links: &[&str]) -> Vec<FleetVehicle> {
        links
            .iter()
            .enumerate()
            .map(|(i, link)| FleetVehicle {
                id: VehicleId::new(format!("av_test_{}", i)),
                start_link: LinkId::from(*link),
            })
            .collect()
    }

    fn run(
        network: &Network,
        population: &Population,
        fleet: &[FleetVehicle],
        policy: &mut dyn DispatchPolicy,
        recorder: &mut EventRecorder,
    ) -> Result<RunSummary, EngineError> {
        let operator = OperatorConfig::default();
        let input = EngineInput {
            network,
            population,
            fleet,
            operator: &operator,
            end_time: 24.0 * 3600.0,
            virtual_network: None,
        };
        EventDrivenEngine.run(input, policy, recorder)
    }

    #[test]
    fn test_single_trip_is_served() {
        let network = grid_network(4, 1000.0).unwrap();
        let mut population = Population::new();
        population.add_person(commuter("alice", "0:0>1:0", "3:2>3:3", &network, 3600.0));
        let fleet = fleet(&["1:0>2:0"]);
        let mut policy = BuiltinPolicies
            .create("SingleHeuristic", &OperatorConfig::default())
            .unwrap();
        let mut recorder = EventRecorder::new();

        let summary = run(&network, &population, &fleet, policy.as_mut(), &mut recorder).unwrap();

        assert_eq!(summary.requests_served, 1);
        assert_eq!(summary.requests_unserved, 0);
        assert!(summary.revenue > 0.0);
        assert!(recorder.is_time_ordered());
        assert_eq!(recorder.count("departure"), 2);
        assert_eq!(recorder.count("arrival"), 2);
        assert_eq!(recorder.count("pickup"), 1);
        assert_eq!(recorder.count("dropoff"), 1);
        assert_eq!(recorder.count("run_completed"), 1);
        assert!(matches!(recorder.events().last(), Some(SimEvent::RunCompleted { .. })));
        assert_eq!(summary.events_emitted as usize, recorder.events().len());

        // Departure at the scheduled end of the first activity
        assert_relative_eq!(recorder.events()[0].time(), 3600.0);
    }

    #[test]
    fn test_walk_leg_is_teleported() {
        let network = grid_network(3, 1000.0).unwrap();
        let mut plan = Plan::new();
        plan.push_activity(Activity::new("home", coord(0.0, 0.0), "0:0>1:0").with_end_time(10.0));
        plan.push_leg(Leg::new(Mode::Walk));
        plan.push_activity(Activity::new("shop", coord(300.0, 400.0), "0:0>0:1"));
        let mut population = Population::new();
        population.add_person(Person::new("bob", plan));
        let mut recorder = EventRecorder::new();

        let summary = run(&network, &population, &fleet(&["0:0>1:0"]), &mut Idle, &mut recorder).unwrap();

        let arrival = recorder
            .events()
            .iter()
            .find(|e| e.kind() == "arrival")
            .unwrap();
        assert_relative_eq!(arrival.time(), 10.0 + 500.0 * BEELINE_FACTOR / WALK_SPEED, epsilon = 1e-9);
        assert_eq!(summary.requests_served, 0);
        assert!(summary.end_time >= arrival.time());
    }

    #[test]
    fn test_unserved_requests_run_until_end_time() {
        let network = grid_network(3, 1000.0).unwrap();
        let mut population = Population::new();
        population.add_person(commuter("carol", "0:0>1:0", "1:1>2:1", &network, 60.0));
        let mut recorder = EventRecorder::new();

        let summary = run(&network, &population, &fleet(&["0:0>1:0"]), &mut Idle, &mut recorder).unwrap();

        assert_eq!(summary.requests_unserved, 1);
        assert_relative_eq!(summary.end_time, 24.0 * 3600.0);
        assert_eq!(recorder.count("departure"), 1);
        assert_eq!(recorder.count("arrival"), 0);
        assert_eq!(recorder.count("run_completed"), 1);
    }

    #[test]
    fn test_off_network_activity_uses_nearest_road_link() {
        let mut network = grid_network(3, 1000.0).unwrap();
        network
            .add_link(Link::new("pt_fwd_0:0", "0:0", "1:1", 27.8, 1000.0, [Mode::Pt]))
            .unwrap();

        let mut plan = Plan::new();
        plan.push_activity(Activity::new("home", coord(0.0, 500.0), "0:0>0:1").with_end_time(0.0));
        plan.push_leg(Leg::new(Mode::Av));
        plan.push_activity(Activity::new("pt interaction", coord(500.0, 500.0), "pt_fwd_0:0"));
        let mut population = Population::new();
        population.add_person(Person::new("dave", plan));
        let mut policy = BuiltinPolicies
            .create("GlobalBipartiteMatchingDispatcher", &OperatorConfig::default())
            .unwrap();
        let mut recorder = EventRecorder::new();

        let summary = run(
            &network,
            &population,
            &fleet(&["2:2>2:1"]),
            policy.as_mut(),
            &mut recorder,
        )
        .unwrap();

        assert_eq!(summary.requests_served, 1);
        let entered_transit = recorder.events().iter().any(|e| {
            matches!(e, SimEvent::LinkEnter(t) if t.link.as_str().starts_with("pt_"))
        });
        assert!(!entered_transit);
        // Arrival is still reported on the activity's own link
        let arrival = recorder.events().iter().rev().find(|e| e.kind() == "arrival").unwrap();
        assert!(matches!(arrival, SimEvent::PersonArrival { link, .. } if link.as_str() == "pt_fwd_0:0"));
    }

    #[test]
    fn test_handler_error_aborts_run() {
        struct RejectEntries;

        impl EventHandler for RejectEntries {
            fn handle_event(&mut self, event: &SimEvent) -> Result<(), EnvError> {
                match event {
                    SimEvent::LinkEnter(_) => Err(EnvError::handler("no driving")),
                    _ => Ok(()),
                }
            }
        }

        let network = grid_network(3, 1000.0).unwrap();
        let mut population = Population::new();
        population.add_person(commuter("erin", "0:0>1:0", "2:1>2:2", &network, 0.0));
        let operator = OperatorConfig::default();
        let fleet = fleet(&["1:0>2:0"]);
        let input = EngineInput {
            network: &network,
            population: &population,
            fleet: &fleet,
            operator: &operator,
            end_time: 3600.0,
            virtual_network: None,
        };
        let mut policy = BuiltinPolicies.create("SingleHeuristic", &operator).unwrap();

        let err = EventDrivenEngine
            .run(input, policy.as_mut(), &mut RejectEntries)
            .unwrap_err();
        assert_eq!(err, EngineError::Aborted(EnvError::handler("no driving")));
    }

    #[test]
    fn test_reposition_route_is_followed_verbatim() {
        struct Detour {
            done: bool,
        }

        impl DispatchPolicy for Detour {
            fn name(&self) -> &str {
                "Detour"
            }

            fn dispatch(&mut self, state: &FleetState<'_>, _: Option<&VirtualNetwork>) -> Vec<Directive> {
                if std::mem::replace(&mut self.done, true) {
                    return Vec::new();
                }
                vec![Directive::Reposition {
                    vehicle: state.vehicles[0].id.clone(),
                    route: vec![LinkId::from("pt_fwd_0:0"), LinkId::from("1:1>1:2")],
                }]
            }
        }

        let mut network = grid_network(3, 1000.0).unwrap();
        network
            .add_link(Link::new("pt_fwd_0:0", "0:0", "1:1", 27.8, 1000.0, [Mode::Pt]))
            .unwrap();
        let mut population = Population::new();
        population.add_person(commuter("fay", "0:0>1:0", "2:1>2:2", &network, 600.0));
        let mut recorder = EventRecorder::new();

        run(&network, &population, &fleet(&["1:0>0:0"]), &mut Detour { done: false }, &mut recorder)
            .unwrap();

        let entered: Vec<&str> = recorder
            .events()
            .iter()
            .filter_map(|e| match e {
                SimEvent::LinkEnter(t) => Some(t.link.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(entered, vec!["pt_fwd_0:0", "1:1>1:2"]);
    }

    #[test]
    fn test_scheduled_order_is_time_then_insertion() {
        let mut heap = BinaryHeap::new();
        for (time, seq) in [(5.0, 1), (1.0, 3), (1.0, 2), (3.0, 4)] {
            heap.push(Scheduled {
                time,
                seq,
                action: Action::DispatchTick,
            });
        }
        let order: Vec<(f64, u64)> = std::iter::from_fn(|| heap.pop().map(|s| (s.time, s.seq))).collect();
        assert_eq!(order, vec![(1.0, 2), (1.0, 3), (3.0, 4), (5.0, 1)]);
    }
}
