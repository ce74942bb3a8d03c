//! Fleet generation.
//!
//! Vehicles are named `av_<operator>_<i>`; the `av_` prefix is what the
//! conservation oracle uses to recognise fleet vehicles.

use crate::error::HarnessError;
use amod_core::{Network, Population};
use amod_env::{LinkId, Mode, VehicleId, AV_VEHICLE_PREFIX};
use rand::Rng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Strategy for choosing vehicle start links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FleetGenerator {
    /// Start links sampled in proportion to AMoD trip origins
    #[default]
    PopulationDensity,

    /// Start links sampled uniformly over road links
    Uniform,
}

/// A fleet vehicle and where it starts the day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FleetVehicle {
    pub id: VehicleId,
    pub start_link: LinkId,
}

/// Fleet vehicle id for operator `operator` and index `index`.
pub fn vehicle_id(operator: &str, index: usize) -> VehicleId {
    VehicleId::new(format!("{}{}_{}", AV_VEHICLE_PREFIX, operator, index))
}

/// Places `size` vehicles on the road network.
///
/// `PopulationDensity` falls back to `Uniform` when no AMoD leg starts on a
/// road link.
pub fn generate_fleet(
    generator: FleetGenerator,
    operator: &str,
    size: usize,
    network: &Network,
    population: &Population,
    rng: &mut ChaCha8Rng,
) -> Result<Vec<FleetVehicle>, HarnessError> {
    let road_links: Vec<&LinkId> = network.links_with_mode(&Mode::Car).map(|l| &l.id).collect();
    if road_links.is_empty() {
        return Err(HarnessError::NoRoadLinks);
    }

    let candidates = match generator {
        FleetGenerator::PopulationDensity => {
            let origins: Vec<&LinkId> = population
                .origin_links(&Mode::Av)
                .into_iter()
                .filter(|link| network.link(link).is_some_and(|l| l.allows(&Mode::Car)))
                .collect();
            if origins.is_empty() {
                debug!("No AMoD origins on road links, placing fleet uniformly");
                road_links
            } else {
                origins
            }
        }
        FleetGenerator::Uniform => road_links,
    };

    let fleet: Vec<FleetVehicle> = (0..size)
        .map(|i| FleetVehicle {
            id: vehicle_id(operator, i),
            start_link: candidates[rng.gen_range(0..candidates.len())].clone(),
        })
        .collect();

    info!(
        "Generated {} vehicles for operator '{}' ({:?})",
        fleet.len(),
        operator,
        generator
    );
    Ok(fleet)
}

#[cfg(test)]
mod tests {
    use super::*;
    use amod_core::{Activity, Leg, Link, Node, Person, Plan};
    use amod_env::coord;
    use rand::SeedableRng;

    fn network() -> Network {
        let mut network = Network::new();
        network.add_node(Node::new("a", coord(0.0, 0.0)));
        network.add_node(Node::new("b", coord(1000.0, 0.0)));
        network.add_link(Link::new("ab", "a", "b", 8.33, 1000.0, [Mode::Car])).unwrap();
        network.add_link(Link::new("ba", "b", "a", 8.33, 1000.0, [Mode::Car])).unwrap();
        network.add_link(Link::new("pt", "a", "b", 27.8, 1000.0, [Mode::Pt])).unwrap();
        network
    }

    fn population_from(link: &str) -> Population {
        let mut plan = Plan::new();
        plan.push_activity(Activity::new("home", coord(0.0, 0.0), link).with_end_time(0.0));
        plan.push_leg(Leg::new(Mode::Av));
        plan.push_activity(Activity::new("work", coord(1000.0, 0.0), "ba"));
        let mut population = Population::new();
        population.add_person(Person::new("p", plan));
        population
    }

    #[test]
    fn test_density_fleet_starts_at_demand() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let fleet = generate_fleet(
            FleetGenerator::PopulationDensity,
            "test",
            5,
            &network(),
            &population_from("ab"),
            &mut rng,
        )
        .unwrap();

        assert_eq!(fleet.len(), 5);
        assert_eq!(fleet[4].id.as_str(), "av_test_4");
        assert!(fleet.iter().all(|v| v.id.is_amod()));
        assert!(fleet.iter().all(|v| v.start_link.as_str() == "ab"));
    }

    #[test]
    fn test_fleet_never_starts_on_transit_links() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        // Origin on the transit link is ignored
        let fleet = generate_fleet(
            FleetGenerator::PopulationDensity,
            "test",
            50,
            &network(),
            &population_from("pt"),
            &mut rng,
        )
        .unwrap();
        assert!(fleet.iter().all(|v| v.start_link.as_str() != "pt"));
    }

    #[test]
    fn test_fleet_is_seed_deterministic() {
        let generate = |seed| {
            let mut rng = ChaCha8Rng::seed_from_u64(seed);
            generate_fleet(
                FleetGenerator::Uniform,
                "op",
                20,
                &network(),
                &Population::new(),
                &mut rng,
            )
            .unwrap()
        };
        assert_eq!(generate(1), generate(1));
    }

    #[test]
    fn test_fleet_needs_road_links() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let err = generate_fleet(
            FleetGenerator::Uniform,
            "op",
            1,
            &Network::new(),
            &Population::new(),
            &mut rng,
        )
        .unwrap_err();
        assert!(matches!(err, HarnessError::NoRoadLinks));
    }
}
