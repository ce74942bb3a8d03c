//! Zonal partitioning by k-means (Lloyd's algorithm).
//!
//! # Determinism
//!
//! Every step is a pure function of the inputs:
//! - Points are deduplicated and sorted by (x, y) before seeding
//! - Initial centroids are the sorted points at indices `⌊i·d/k⌋`
//! - Equidistant points go to the lowest-indexed centroid
//! - Iteration stops when assignments repeat, or after `max_iterations`
//!
//! Empty clusters are refilled with the point farthest from its own
//! centroid, so an emitted zone always owns at least one demand point.

use crate::network::Network;
use crate::virtual_network::{DegenerateClustering, VirtualLink, VirtualNetwork, Zone};
use amod_env::{Coord, LinkId, Mode, NodeId};
use nalgebra::{distance, Point2, Vector2};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Default cap on Lloyd iterations.
pub const DEFAULT_MAX_ITERATIONS: usize = 100;

/// Errors raised while partitioning.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PartitionError {
    #[error("Zone count must be at least 1")]
    InvalidZoneCount,

    /// Nothing to cluster: no demand and no road links
    #[error("No demand points and no road links to partition")]
    EmptyInput,
}

/// Clusters demand into zones and assigns road links to them.
#[derive(Debug, Clone)]
pub struct ZonalPartitioner {
    zone_count: usize,
    max_iterations: usize,
    complete_graph: bool,
    road_mode: Mode,
}

impl ZonalPartitioner {
    /// Creates a partitioner targeting `zone_count` zones.
    pub fn new(zone_count: usize) -> Self {
        Self {
            zone_count,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            complete_graph: true,
            road_mode: Mode::Car,
        }
    }

    /// Sets the iteration cap.
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Connect every zone pair (true) or only zones joined by road links (false).
    pub fn with_complete_graph(mut self, complete_graph: bool) -> Self {
        self.complete_graph = complete_graph;
        self
    }

    /// Partitions `demand` and the road links of `network` into zones.
    ///
    /// Falls back to road link midpoints when `demand` is empty. When fewer
    /// distinct points than zones exist, the zone count shrinks to the number
    /// of distinct points and the result records a [`DegenerateClustering`].
    pub fn partition(
        &self,
        demand: &[Coord],
        network: &Network,
    ) -> Result<VirtualNetwork, PartitionError> {
        if self.zone_count == 0 {
            return Err(PartitionError::InvalidZoneCount);
        }

        let road_links: Vec<(LinkId, Coord)> = network
            .links_with_mode(&self.road_mode)
            .filter_map(|link| {
                network
                    .link_midpoint(&link.id)
                    .ok()
                    .map(|mid| (link.id.clone(), mid))
            })
            .collect();

        let points = if demand.is_empty() {
            debug!("No demand points, clustering road link midpoints");
            distinct_points(road_links.iter().map(|(_, mid)| *mid))
        } else {
            distinct_points(demand.iter().copied())
        };
        if points.is_empty() {
            return Err(PartitionError::EmptyInput);
        }

        let k = self.zone_count.min(points.len());
        let degenerate = (k < self.zone_count).then(|| {
            let record = DegenerateClustering {
                requested: self.zone_count,
                distinct: points.len(),
            };
            warn!("{}; using {} zones", record, k);
            record
        });

        let (centroids, assignment) = lloyd(&points, k, self.max_iterations);

        let mut zones: Vec<Zone> = centroids
            .iter()
            .enumerate()
            .map(|(index, centroid)| Zone {
                index,
                centroid: *centroid,
                points: Vec::new(),
                demand_weight: 0,
                links: BTreeSet::new(),
                anchor_link: None,
            })
            .collect();

        for ((point, weight), &cluster) in points.iter().zip(&assignment) {
            zones[cluster].points.push(*point);
            zones[cluster].demand_weight += weight;
        }

        let mut anchor_distance = vec![f64::INFINITY; k];
        let mut link_zone: BTreeMap<&LinkId, usize> = BTreeMap::new();
        for (link, mid) in &road_links {
            let cluster = nearest(&centroids, mid);
            zones[cluster].links.insert(link.clone());
            link_zone.insert(link, cluster);

            let d = distance(&centroids[cluster], mid);
            if d < anchor_distance[cluster] {
                anchor_distance[cluster] = d;
                zones[cluster].anchor_link = Some(link.clone());
            }
        }

        let virtual_links = if self.complete_graph {
            complete_links(&centroids)
        } else {
            adjacency_links(&centroids, network, &link_zone)
        };

        info!(
            "Partitioned {} distinct demand points and {} road links into {} zones ({} virtual links)",
            points.len(),
            road_links.len(),
            zones.len(),
            virtual_links.len()
        );

        Ok(VirtualNetwork::new(zones, virtual_links, degenerate))
    }
}

/// Sorted distinct points with their multiplicity.
fn distinct_points(points: impl Iterator<Item = Coord>) -> Vec<(Coord, usize)> {
    let mut sorted: Vec<Coord> = points.collect();
    sorted.sort_by(|a, b| a.x.total_cmp(&b.x).then(a.y.total_cmp(&b.y)));

    let mut distinct: Vec<(Coord, usize)> = Vec::new();
    for point in sorted {
        match distinct.last_mut() {
            Some((last, count)) if *last == point => *count += 1,
            _ => distinct.push((point, 1)),
        }
    }
    distinct
}

/// Index of the nearest centroid, lowest index on ties.
fn nearest(centroids: &[Coord], point: &Coord) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (index, centroid) in centroids.iter().enumerate() {
        let d = distance(centroid, point);
        if d < best_d {
            best = index;
            best_d = d;
        }
    }
    best
}

fn assign(points: &[(Coord, usize)], centroids: &[Coord]) -> Vec<usize> {
    points.iter().map(|(p, _)| nearest(centroids, p)).collect()
}

fn weighted_means(points: &[(Coord, usize)], assignment: &[usize], previous: &[Coord]) -> Vec<Coord> {
    let mut sums = vec![Vector2::zeros(); previous.len()];
    let mut weights = vec![0usize; previous.len()];
    for ((point, weight), &cluster) in points.iter().zip(assignment) {
        sums[cluster] += point.coords * (*weight as f64);
        weights[cluster] += weight;
    }
    sums.into_iter()
        .zip(weights)
        .zip(previous)
        .map(|((sum, weight), prev)| {
            if weight == 0 {
                *prev
            } else {
                Point2::from(sum / weight as f64)
            }
        })
        .collect()
}

/// Moves far-out points into empty clusters until none is empty.
fn repair_empty(points: &[(Coord, usize)], centroids: &mut [Coord], assignment: &mut [usize]) {
    loop {
        let mut counts = vec![0usize; centroids.len()];
        for &cluster in assignment.iter() {
            counts[cluster] += 1;
        }
        let Some(empty) = counts.iter().position(|&c| c == 0) else {
            return;
        };

        let spread = |i: usize| distance(&points[i].0, &centroids[assignment[i]]);
        let donor = (0..points.len())
            .filter(|&i| counts[assignment[i]] > 1)
            .max_by(|&a, &b| spread(a).total_cmp(&spread(b)).then(b.cmp(&a)));

        // Unreachable while there are at least as many points as clusters
        let Some(donor) = donor else {
            return;
        };
        debug!("Refilling empty cluster {} with point {}", empty, donor);
        assignment[donor] = empty;
        centroids[empty] = points[donor].0;
    }
}

/// Lloyd iterations from sorted-index seeds.
///
/// Requires `1 <= k <= points.len()`.
fn lloyd(points: &[(Coord, usize)], k: usize, max_iterations: usize) -> (Vec<Coord>, Vec<usize>) {
    let d = points.len();
    let mut centroids: Vec<Coord> = (0..k).map(|i| points[i * d / k].0).collect();
    let mut assignment = assign(points, &centroids);

    let mut converged = false;
    let mut iterations = 0;
    while iterations < max_iterations {
        iterations += 1;
        repair_empty(points, &mut centroids, &mut assignment);
        centroids = weighted_means(points, &assignment, &centroids);

        let next = assign(points, &centroids);
        if next == assignment {
            converged = true;
            break;
        }
        assignment = next;
    }

    repair_empty(points, &mut centroids, &mut assignment);
    centroids = weighted_means(points, &assignment, &centroids);

    debug!(
        "k-means finished after {} iterations (converged: {})",
        iterations, converged
    );
    (centroids, assignment)
}

fn complete_links(centroids: &[Coord]) -> Vec<VirtualLink> {
    let mut links = Vec::new();
    for from in 0..centroids.len() {
        for to in 0..centroids.len() {
            if from != to {
                links.push(VirtualLink {
                    index: links.len(),
                    from,
                    to,
                    distance: distance(&centroids[from], &centroids[to]),
                });
            }
        }
    }
    links
}

/// Zone `a` → zone `b` whenever a road link in `a` feeds a road link in `b`.
fn adjacency_links(
    centroids: &[Coord],
    network: &Network,
    link_zone: &BTreeMap<&LinkId, usize>,
) -> Vec<VirtualLink> {
    let mut zones_leaving: BTreeMap<&NodeId, BTreeSet<usize>> = BTreeMap::new();
    for (&link_id, &zone) in link_zone {
        if let Some(link) = network.link(link_id) {
            zones_leaving.entry(&link.from).or_default().insert(zone);
        }
    }

    let mut pairs = BTreeSet::new();
    for (&link_id, &from_zone) in link_zone {
        let Some(link) = network.link(link_id) else {
            continue;
        };
        if let Some(next_zones) = zones_leaving.get(&link.to) {
            for &to_zone in next_zones {
                if to_zone != from_zone {
                    pairs.insert((from_zone, to_zone));
                }
            }
        }
    }

    pairs
        .into_iter()
        .enumerate()
        .map(|(index, (from, to))| VirtualLink {
            index,
            from,
            to,
            distance: distance(&centroids[from], &centroids[to]),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::{Link, Node};
    use amod_env::coord;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    /// Bidirectional 4-neighbour car grid, `size x size` nodes, 1000 m apart.
    fn road_grid(size: usize) -> Network {
        let mut network = Network::new();
        for x in 0..size {
            for y in 0..size {
                network.add_node(Node::new(
                    NodeId::grid(x, y),
                    coord(x as f64 * 1000.0, y as f64 * 1000.0),
                ));
            }
        }
        for x in 0..size {
            for y in 0..size {
                for (nx, ny) in [(x + 1, y), (x, y + 1)] {
                    if nx < size && ny < size {
                        for (a, b) in [((x, y), (nx, ny)), ((nx, ny), (x, y))] {
                            network
                                .add_link(Link::new(
                                    format!("{}:{}>{}:{}", a.0, a.1, b.0, b.1),
                                    NodeId::grid(a.0, a.1),
                                    NodeId::grid(b.0, b.1),
                                    8.33,
                                    1000.0,
                                    [Mode::Car],
                                ))
                                .unwrap();
                        }
                    }
                }
            }
        }
        network
    }

    fn hundred_points() -> Vec<Coord> {
        (0..10)
            .flat_map(|x| (0..10).map(move |y| coord(x as f64 * 900.0 + 50.0, y as f64 * 900.0 + 50.0)))
            .collect()
    }

    fn road_link_ids(network: &Network) -> Vec<LinkId> {
        network.links_with_mode(&Mode::Car).map(|l| l.id.clone()).collect()
    }

    #[test]
    fn test_four_zones_from_hundred_points() {
        let network = road_grid(10);
        let points = hundred_points();

        let vn = ZonalPartitioner::new(4).partition(&points, &network).unwrap();

        assert_eq!(vn.zone_count(), 4);
        assert!(vn.degenerate().is_none());
        assert!(vn.zones().iter().all(|z| !z.points.is_empty()));
        assert!(vn.is_partition_of(&points, &road_link_ids(&network)));
        assert_eq!(vn.zones().iter().map(|z| z.demand_weight).sum::<usize>(), 100);
        // Complete directed graph between 4 zones
        assert_eq!(vn.virtual_links().len(), 12);
    }

    #[test]
    fn test_two_distinct_points_give_two_zones() {
        let network = road_grid(4);
        let mut points = vec![coord(100.0, 100.0); 30];
        points.extend(vec![coord(2900.0, 2900.0); 20]);

        let vn = ZonalPartitioner::new(4).partition(&points, &network).unwrap();

        assert_eq!(vn.zone_count(), 2);
        assert_eq!(
            vn.degenerate(),
            Some(DegenerateClustering { requested: 4, distinct: 2 })
        );
        let weights: Vec<usize> = vn.zones().iter().map(|z| z.demand_weight).collect();
        assert_eq!(weights, vec![30, 20]);
        assert_relative_eq!(vn.zones()[1].centroid.x, 2900.0);
        assert!(vn.is_partition_of(&points, &road_link_ids(&network)));
    }

    #[test]
    fn test_partition_is_deterministic() {
        let network = road_grid(6);
        let points: Vec<Coord> = (0..40)
            .map(|i| coord(((i * 37) % 5000) as f64, ((i * 91) % 5000) as f64))
            .collect();

        let a = ZonalPartitioner::new(5).partition(&points, &network).unwrap();
        let b = ZonalPartitioner::new(5).partition(&points, &network).unwrap();

        assert_eq!(a.zones(), b.zones());
    }

    #[test]
    fn test_links_follow_nearest_centroid() {
        let network = road_grid(10);
        let vn = ZonalPartitioner::new(4).partition(&hundred_points(), &network).unwrap();

        for link in network.links_with_mode(&Mode::Car) {
            let mid = network.link_midpoint(&link.id).unwrap();
            let zone = vn.zone_of_link(&link.id).unwrap();
            assert_eq!(zone.index, vn.zone_of_coord(&mid).unwrap().index);
        }
        for zone in vn.zones() {
            let anchor = zone.anchor_link.as_ref().unwrap();
            assert!(zone.links.contains(anchor));
        }
    }

    #[test]
    fn test_tie_goes_to_lowest_centroid() {
        let centroids = [coord(0.0, 0.0), coord(10.0, 0.0)];
        assert_eq!(nearest(&centroids, &coord(5.0, 0.0)), 0);
        assert_eq!(nearest(&centroids, &coord(5.1, 0.0)), 1);
    }

    #[test]
    fn test_transit_links_are_not_partitioned() {
        let mut network = road_grid(3);
        network
            .add_link(Link::new("pt_fwd_0:0", "0:0", "1:1", 27.8, 1000.0, [Mode::Pt]))
            .unwrap();

        let vn = ZonalPartitioner::new(2).partition(&[], &network).unwrap();

        assert!(vn.zone_of_link(&LinkId::from("pt_fwd_0:0")).is_none());
        assert_eq!(vn.zones().iter().map(|z| z.links.len()).sum::<usize>(), 24);
    }

    #[test]
    fn test_adjacency_graph_only_joins_touching_zones() {
        let network = road_grid(10);
        let vn = ZonalPartitioner::new(4)
            .with_complete_graph(false)
            .partition(&hundred_points(), &network)
            .unwrap();

        assert!(!vn.virtual_links().is_empty());
        assert!(vn.virtual_links().iter().all(|l| l.from != l.to));
        assert!(vn.virtual_links().len() <= 12);
    }

    #[test]
    fn test_invalid_inputs() {
        let network = road_grid(2);
        assert_eq!(
            ZonalPartitioner::new(0).partition(&[coord(0.0, 0.0)], &network).unwrap_err(),
            PartitionError::InvalidZoneCount
        );
        assert_eq!(
            ZonalPartitioner::new(3).partition(&[], &Network::new()).unwrap_err(),
            PartitionError::EmptyInput
        );
    }

    proptest! {
        #[test]
        fn prop_zones_partition_points(
            raw in prop::collection::vec((0u32..50, 0u32..50), 1..80),
            k in 1usize..8,
        ) {
            let network = road_grid(3);
            let points: Vec<Coord> = raw
                .iter()
                .map(|&(x, y)| coord(x as f64 * 40.0, y as f64 * 40.0))
                .collect();

            let vn = ZonalPartitioner::new(k).partition(&points, &network).unwrap();

            prop_assert!(vn.zone_count() <= k);
            prop_assert!(vn.zone_count() >= 1);
            prop_assert!(vn.is_partition_of(&points, &road_link_ids(&network)));
            prop_assert_eq!(
                vn.zones().iter().map(|z| z.demand_weight).sum::<usize>(),
                points.len()
            );
        }
    }
}
