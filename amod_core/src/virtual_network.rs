//! Virtual network - a coarse zonal view of the road network.
//!
//! Produced once per scenario by the [`ZonalPartitioner`](crate::ZonalPartitioner)
//! and shared read-only by every dispatch policy that needs zonal
//! aggregation.

use amod_env::{Coord, LinkId};
use nalgebra::distance;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use thiserror::Error;

/// A spatial zone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Zone {
    /// Position in the virtual network's zone list
    pub index: usize,

    /// Demand-weighted mean of the member points
    pub centroid: Coord,

    /// Distinct demand points assigned to this zone
    pub points: Vec<Coord>,

    /// Member points counted with multiplicity
    pub demand_weight: usize,

    /// Road links assigned to this zone
    pub links: BTreeSet<LinkId>,

    /// Member link closest to the centroid, used as a rebalancing target
    pub anchor_link: Option<LinkId>,
}

/// Directed connection between two zones.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VirtualLink {
    pub index: usize,
    pub from: usize,
    pub to: usize,

    /// Centroid-to-centroid distance in metres
    pub distance: f64,
}

/// Fewer distinct demand points than requested zones.
///
/// Recovered locally by shrinking the zone count; recorded for reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Error)]
#[error("Degenerate clustering: {distinct} distinct points for {requested} requested zones")]
pub struct DegenerateClustering {
    pub requested: usize,
    pub distinct: usize,
}

/// Zones plus the virtual links between them.
#[derive(Debug, Clone, Serialize)]
pub struct VirtualNetwork {
    zones: Vec<Zone>,
    virtual_links: Vec<VirtualLink>,
    degenerate: Option<DegenerateClustering>,

    #[serde(skip)]
    link_index: HashMap<LinkId, usize>,
}

impl VirtualNetwork {
    /// Assembles a virtual network and indexes its member links.
    pub fn new(
        zones: Vec<Zone>,
        virtual_links: Vec<VirtualLink>,
        degenerate: Option<DegenerateClustering>,
    ) -> Self {
        let link_index = zones
            .iter()
            .flat_map(|zone| zone.links.iter().map(move |link| (link.clone(), zone.index)))
            .collect();

        Self {
            zones,
            virtual_links,
            degenerate,
            link_index,
        }
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, index: usize) -> Option<&Zone> {
        self.zones.get(index)
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn virtual_links(&self) -> &[VirtualLink] {
        &self.virtual_links
    }

    /// Set when the requested zone count had to be reduced.
    pub fn degenerate(&self) -> Option<DegenerateClustering> {
        self.degenerate
    }

    /// Zone owning a road link, in constant time.
    pub fn zone_of_link(&self, link: &LinkId) -> Option<&Zone> {
        self.link_index.get(link).and_then(|&index| self.zones.get(index))
    }

    /// Zone with the nearest centroid (ties to the lowest index).
    pub fn zone_of_coord(&self, point: &Coord) -> Option<&Zone> {
        let mut best: Option<(&Zone, f64)> = None;
        for zone in &self.zones {
            let d = distance(&zone.centroid, point);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((zone, d)),
            }
        }
        best.map(|(zone, _)| zone)
    }

    /// Checks that zones are non-empty, pairwise disjoint, and together cover
    /// exactly `points` and `links`.
    pub fn is_partition_of<'a>(
        &self,
        points: &[Coord],
        links: impl IntoIterator<Item = &'a LinkId>,
    ) -> bool {
        if self.zones.iter().any(|zone| zone.points.is_empty()) {
            return false;
        }

        let mut seen_links = HashSet::new();
        for zone in &self.zones {
            for link in &zone.links {
                if !seen_links.insert(link) {
                    return false;
                }
            }
        }
        let expected_links: HashSet<&LinkId> = links.into_iter().collect();
        if seen_links != expected_links {
            return false;
        }

        let key = |c: &Coord| (c.x.to_bits(), c.y.to_bits());
        let mut seen_points = HashSet::new();
        for zone in &self.zones {
            for point in &zone.points {
                if !seen_points.insert(key(point)) {
                    return false;
                }
            }
        }
        let expected_points: HashSet<_> = points.iter().map(key).collect();
        seen_points == expected_points
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amod_env::coord;

    fn zone(index: usize, centroid: Coord, links: &[&str]) -> Zone {
        Zone {
            index,
            centroid,
            points: vec![centroid],
            demand_weight: 1,
            links: links.iter().map(|l| LinkId::from(*l)).collect(),
            anchor_link: links.first().map(|l| LinkId::from(*l)),
        }
    }

    #[test]
    fn test_zone_lookups() {
        let vn = VirtualNetwork::new(
            vec![
                zone(0, coord(0.0, 0.0), &["a", "b"]),
                zone(1, coord(1000.0, 0.0), &["c"]),
            ],
            vec![],
            None,
        );

        assert_eq!(vn.zone_of_link(&LinkId::from("c")).unwrap().index, 1);
        assert!(vn.zone_of_link(&LinkId::from("x")).is_none());
        assert_eq!(vn.zone_of_coord(&coord(900.0, 10.0)).unwrap().index, 1);
        // Equidistant: lowest index
        assert_eq!(vn.zone_of_coord(&coord(500.0, 0.0)).unwrap().index, 0);
    }

    #[test]
    fn test_partition_check_detects_overlap() {
        let points = [coord(0.0, 0.0), coord(1000.0, 0.0)];
        let links = [LinkId::from("a"), LinkId::from("b")];

        let good = VirtualNetwork::new(
            vec![zone(0, points[0], &["a"]), zone(1, points[1], &["b"])],
            vec![],
            None,
        );
        assert!(good.is_partition_of(&points, &links));

        let overlapping = VirtualNetwork::new(
            vec![zone(0, points[0], &["a", "b"]), zone(1, points[1], &["b"])],
            vec![],
            None,
        );
        assert!(!overlapping.is_partition_of(&points, &links));

        let orphaned = VirtualNetwork::new(vec![zone(0, points[0], &["a"])], vec![], None);
        assert!(!orphaned.is_partition_of(&points, &links));
    }
}
