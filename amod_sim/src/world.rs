//! Scenario configuration, the synthetic grid scenario and the frozen fixture.

use crate::error::HarnessError;
use crate::fleet::{generate_fleet, FleetGenerator, FleetVehicle};
use crate::scenarios::PolicyId;
use amod_core::{
    augment, Activity, AugmentationSummary, Leg, Link, Network, Node, Person, Plan, Population,
    VirtualNetwork, ZonalPartitioner,
};
use amod_env::{coord, LinkId, Mode, NodeId};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

/// Free-flow speed of generated road links (30 km/h in m/s).
pub const ROAD_FREESPEED: f64 = 30.0 * 1000.0 / 3600.0;

const HOUR: f64 = 3600.0;

/// Fare parameters of an operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PriceStructure {
    /// Flat fare per trip
    pub base_fare: f64,

    pub price_per_km: f64,
    pub price_per_minute: f64,
}

impl Default for PriceStructure {
    fn default() -> Self {
        Self {
            base_fare: 2.0,
            price_per_km: 0.5,
            price_per_minute: 0.1,
        }
    }
}

impl PriceStructure {
    /// Fare of a trip of `distance_m` metres taking `ride_time_s` seconds.
    pub fn fare(&self, distance_m: f64, ride_time_s: f64) -> f64 {
        self.base_fare + self.price_per_km * distance_m / 1000.0 + self.price_per_minute * ride_time_s / 60.0
    }
}

/// Configuration of the AMoD operator under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorConfig {
    /// Operator id, embedded in vehicle ids
    pub operator_id: String,

    /// Seconds between dispatch ticks
    pub dispatch_period: f64,

    /// Seconds between rebalancing rounds of rebalancing policies
    pub rebalance_period: f64,

    pub pickup_duration: f64,
    pub dropoff_duration: f64,

    pub pricing: PriceStructure,

    /// Policy variants to run, by identifier
    pub policies: Vec<String>,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            operator_id: "test".to_string(),
            dispatch_period: 30.0,
            rebalance_period: 300.0,
            pickup_duration: 15.0,
            dropoff_duration: 10.0,
            pricing: PriceStructure::default(),
            policies: PolicyId::all().iter().map(|p| p.name().to_string()).collect(),
        }
    }
}

/// Configuration for a harness invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Grid nodes per side
    pub grid_size: usize,

    /// Node spacing in metres
    pub grid_spacing: f64,

    pub population_size: usize,

    /// Number of fleet vehicles (must be > 0)
    pub fleet_size: usize,

    pub fleet_generator: FleetGenerator,

    /// Number of transit corridor steps along the grid diagonal
    pub corridor_range: usize,

    /// Target number of zones (must be >= 1)
    pub zone_count: usize,

    /// Connect every zone pair in the virtual network
    pub complete_graph: bool,

    /// Simulation end time in seconds
    pub end_time: f64,

    pub operator: OperatorConfig,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            grid_size: 10,
            grid_spacing: 1000.0,
            population_size: 100,
            fleet_size: 100,
            fleet_generator: FleetGenerator::PopulationDensity,
            corridor_range: 9,
            zone_count: 4,
            complete_graph: true,
            end_time: 30.0 * HOUR,
            operator: OperatorConfig::default(),
        }
    }
}

impl ScenarioConfig {
    /// Loads a configuration from a JSON file; missing fields take defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HarnessError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Rejects configurations no run could succeed with.
    pub fn validate(&self) -> Result<(), HarnessError> {
        if self.fleet_size == 0 {
            return Err(HarnessError::config("fleet_size must be greater than 0"));
        }
        if self.zone_count == 0 {
            return Err(HarnessError::config("zone_count must be at least 1"));
        }
        if self.grid_size < 2 {
            return Err(HarnessError::config("grid_size must be at least 2"));
        }
        if self.corridor_range >= self.grid_size {
            return Err(HarnessError::config(format!(
                "corridor_range {} needs a grid of at least {} nodes per side",
                self.corridor_range,
                self.corridor_range + 1
            )));
        }
        let positive = [
            ("grid_spacing", self.grid_spacing),
            ("end_time", self.end_time),
            ("dispatch_period", self.operator.dispatch_period),
            ("rebalance_period", self.operator.rebalance_period),
        ];
        for (name, value) in positive {
            if !(value > 0.0) {
                return Err(HarnessError::config(format!("{} must be positive", name)));
            }
        }
        if self.operator.pickup_duration < 0.0 || self.operator.dropoff_duration < 0.0 {
            return Err(HarnessError::config("stop durations must not be negative"));
        }
        Ok(())
    }

    /// Seed for population synthesis.
    pub fn population_seed(&self) -> u64 {
        self.seed
    }

    /// Seed for fleet placement, independent of the population stream.
    pub fn fleet_seed(&self) -> u64 {
        self.seed.wrapping_mul(0x9e3779b97f4a7c15)
    }
}

/// Network and population before augmentation.
#[derive(Debug, Clone, Default)]
pub struct BaseScenario {
    pub network: Network,
    pub population: Population,
}

impl BaseScenario {
    /// Generates the synthetic grid scenario described by `config`.
    pub fn grid(config: &ScenarioConfig) -> Result<Self, HarnessError> {
        let network = grid_network(config.grid_size, config.grid_spacing)?;
        let population = grid_population(&network, config.population_size, config.population_seed())?;
        Ok(Self {
            network,
            population,
        })
    }
}

/// Square grid of `size * size` nodes with bidirectional road links between
/// 4-neighbours.
pub fn grid_network(size: usize, spacing: f64) -> Result<Network, HarnessError> {
    let mut network = Network::new();
    for x in 0..size {
        for y in 0..size {
            network.add_node(Node::new(
                NodeId::grid(x, y),
                coord(x as f64 * spacing, y as f64 * spacing),
            ));
        }
    }

    for x in 0..size {
        for y in 0..size {
            for (nx, ny) in [(x + 1, y), (x, y + 1)] {
                if nx >= size || ny >= size {
                    continue;
                }
                for ((ax, ay), (bx, by)) in [((x, y), (nx, ny)), ((nx, ny), (x, y))] {
                    let link = Link::new(
                        format!("{}:{}>{}:{}", ax, ay, bx, by),
                        NodeId::grid(ax, ay),
                        NodeId::grid(bx, by),
                        ROAD_FREESPEED,
                        spacing,
                        [Mode::Car],
                    );
                    network
                        .add_link(link)
                        .map_err(|e| HarnessError::config(e.to_string()))?;
                }
            }
        }
    }
    Ok(network)
}

/// Commuters with plan home -> av -> work -> av -> home.
pub fn grid_population(
    network: &Network,
    size: usize,
    seed: u64,
) -> Result<Population, HarnessError> {
    let road_links: Vec<&LinkId> = network.links_with_mode(&Mode::Car).map(|l| &l.id).collect();
    if road_links.is_empty() {
        return Err(HarnessError::NoRoadLinks);
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let departure = Normal::new(8.0 * HOUR, HOUR).map_err(|e| HarnessError::config(e.to_string()))?;

    let mut population = Population::new();
    for i in 0..size {
        let home = road_links[rng.gen_range(0..road_links.len())];
        let work = road_links[rng.gen_range(0..road_links.len())];
        let home_coord = network.link_midpoint(home).map_err(|e| HarnessError::config(e.to_string()))?;
        let work_coord = network.link_midpoint(work).map_err(|e| HarnessError::config(e.to_string()))?;

        let leave_home = departure.sample(&mut rng).clamp(5.0 * HOUR, 11.0 * HOUR);
        let leave_work = leave_home + rng.gen_range(6.0 * HOUR..=10.0 * HOUR);

        let mut plan = Plan::new();
        plan.push_activity(Activity::new("home", home_coord, home.clone()).with_end_time(leave_home));
        plan.push_leg(Leg::new(Mode::Av));
        plan.push_activity(Activity::new("work", work_coord, work.clone()).with_end_time(leave_work));
        plan.push_leg(Leg::new(Mode::Av));
        plan.push_activity(Activity::new("home", home_coord, home.clone()));

        population.add_person(Person::new(format!("person_{}", i), plan));
    }

    info!("Generated {} commuters on {} road links", size, road_links.len());
    Ok(population)
}

/// Everything a run reads, built once and never mutated afterwards.
#[derive(Debug, Clone)]
pub struct ScenarioFixture {
    pub config: ScenarioConfig,

    /// Augmented network
    pub network: Network,

    /// Augmented population
    pub population: Population,

    pub augmentation: AugmentationSummary,

    /// Zonal partition, shared by every policy that asks for it
    pub virtual_network: VirtualNetwork,

    pub fleet: Vec<FleetVehicle>,
}

impl ScenarioFixture {
    /// Validates, augments, partitions and places the fleet.
    ///
    /// Augmentation happens exactly once, here.
    pub fn build(config: ScenarioConfig, base: BaseScenario) -> Result<Self, HarnessError> {
        config.validate()?;
        let BaseScenario {
            mut network,
            mut population,
        } = base;
        population.validate()?;

        let augmentation = augment(&mut network, &mut population, config.corridor_range)?;

        let demand = population.demand_coordinates(&Mode::Av);
        let virtual_network = ZonalPartitioner::new(config.zone_count)
            .with_complete_graph(config.complete_graph)
            .partition(&demand, &network)?;

        let mut rng = ChaCha8Rng::seed_from_u64(config.fleet_seed());
        let fleet = generate_fleet(
            config.fleet_generator,
            &config.operator.operator_id,
            config.fleet_size,
            &network,
            &population,
            &mut rng,
        )?;

        info!(
            "Scenario fixture ready: {} links, {} persons, {} zones, {} vehicles",
            network.link_count(),
            population.len(),
            virtual_network.zone_count(),
            fleet.len()
        );

        Ok(Self {
            config,
            network,
            population,
            augmentation,
            virtual_network,
            fleet,
        })
    }
}
