//! Road/transit network model.
//!
//! Nodes and links live in ordered maps so that every iteration over the
//! network (routing graph construction, clustering, fleet placement) is
//! deterministic for a given scenario.

use amod_env::{Coord, LinkId, Mode, NodeId};
use nalgebra::distance;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Errors raised while building or querying a network.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum NetworkError {
    /// A link references a node that does not exist
    #[error("Missing node: {node}")]
    MissingNode { node: NodeId },

    /// A link with this id already exists
    #[error("Duplicate link: {0}")]
    DuplicateLink(LinkId),

    /// A link must allow at least one mode
    #[error("Link {0} has an empty allowed-mode set")]
    EmptyModes(LinkId),

    #[error("Unknown link: {0}")]
    UnknownLink(LinkId),
}

/// A network node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub coord: Coord,
}

impl Node {
    pub fn new(id: impl Into<NodeId>, coord: Coord) -> Self {
        Self {
            id: id.into(),
            coord,
        }
    }
}

/// A directed network link.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Link {
    pub id: LinkId,
    pub from: NodeId,
    pub to: NodeId,

    /// Free-flow speed in m/s
    pub freespeed: f64,

    /// Length in metres
    pub length: f64,

    /// Modes allowed to use this link (never empty once added to a network)
    pub allowed_modes: BTreeSet<Mode>,
}

impl Link {
    /// Creates a link.
    pub fn new(
        id: impl Into<LinkId>,
        from: impl Into<NodeId>,
        to: impl Into<NodeId>,
        freespeed: f64,
        length: f64,
        allowed_modes: impl IntoIterator<Item = Mode>,
    ) -> Self {
        Self {
            id: id.into(),
            from: from.into(),
            to: to.into(),
            freespeed,
            length,
            allowed_modes: allowed_modes.into_iter().collect(),
        }
    }

    /// Returns true if `mode` may use this link.
    pub fn allows(&self, mode: &Mode) -> bool {
        self.allowed_modes.contains(mode)
    }

    /// Returns true if any vehicular mode may use this link.
    pub fn allows_vehicles(&self) -> bool {
        self.allowed_modes.iter().any(Mode::is_vehicular)
    }

    /// Free-flow traversal time in seconds.
    pub fn travel_time(&self) -> f64 {
        if self.freespeed > 0.0 {
            self.length / self.freespeed
        } else {
            f64::INFINITY
        }
    }

    /// Comma-separated allowed modes, for messages.
    pub fn modes_label(&self) -> String {
        self.allowed_modes
            .iter()
            .map(Mode::name)
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// A directed multimodal network.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Network {
    nodes: BTreeMap<NodeId, Node>,
    links: BTreeMap<LinkId, Link>,
}

impl Network {
    /// Creates an empty network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a node, replacing any node with the same id.
    pub fn add_node(&mut self, node: Node) {
        self.nodes.insert(node.id.clone(), node);
    }

    /// Adds a link.
    ///
    /// # Errors
    /// * `MissingNode` - an endpoint is not in the network
    /// * `DuplicateLink` - the id is already taken
    /// * `EmptyModes` - the link allows no mode
    pub fn add_link(&mut self, link: Link) -> Result<(), NetworkError> {
        for endpoint in [&link.from, &link.to] {
            if !self.nodes.contains_key(endpoint) {
                return Err(NetworkError::MissingNode {
                    node: endpoint.clone(),
                });
            }
        }
        if self.links.contains_key(&link.id) {
            return Err(NetworkError::DuplicateLink(link.id));
        }
        if link.allowed_modes.is_empty() {
            return Err(NetworkError::EmptyModes(link.id));
        }
        self.links.insert(link.id.clone(), link);
        Ok(())
    }

    pub fn node(&self, id: &NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn link(&self, id: &LinkId) -> Option<&Link> {
        self.links.get(id)
    }

    pub fn contains_node(&self, id: &NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn contains_link(&self, id: &LinkId) -> bool {
        self.links.contains_key(id)
    }

    /// All links in id order.
    pub fn links(&self) -> impl Iterator<Item = &Link> {
        self.links.values()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    /// Links allowing `mode`, in id order.
    ///
    /// The iterator borrows only the network.
    pub fn links_with_mode(&self, mode: &Mode) -> impl Iterator<Item = &Link> + '_ {
        let mode = mode.clone();
        self.links.values().filter(move |link| link.allows(&mode))
    }

    /// Midpoint between the endpoints of a link.
    pub fn link_midpoint(&self, id: &LinkId) -> Result<Coord, NetworkError> {
        let (from, to) = self.link_endpoints(id)?;
        Ok(nalgebra::center(&from, &to))
    }

    /// Coordinate of the downstream end of a link.
    pub fn link_head(&self, id: &LinkId) -> Result<Coord, NetworkError> {
        Ok(self.link_endpoints(id)?.1)
    }

    fn link_endpoints(&self, id: &LinkId) -> Result<(Coord, Coord), NetworkError> {
        let link = self
            .links
            .get(id)
            .ok_or_else(|| NetworkError::UnknownLink(id.clone()))?;
        // Endpoints are guaranteed by add_link
        let from = self.nodes[&link.from].coord;
        let to = self.nodes[&link.to].coord;
        Ok((from, to))
    }

    /// The link allowing `mode` whose midpoint is closest to `point`.
    ///
    /// Ties go to the lowest link id. Returns `None` if no link allows the mode.
    pub fn nearest_link(&self, point: &Coord, mode: &Mode) -> Option<&Link> {
        let mut best: Option<(&Link, f64)> = None;
        for link in self.links_with_mode(mode) {
            let from = self.nodes[&link.from].coord;
            let to = self.nodes[&link.to].coord;
            let d = distance(&nalgebra::center(&from, &to), point);
            match best {
                Some((_, best_d)) if d >= best_d => {}
                _ => best = Some((link, d)),
            }
        }
        best.map(|(link, _)| link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amod_env::coord;
    use approx::assert_relative_eq;
    use std::str::FromStr;

    fn two_node_network() -> Network {
        let mut network = Network::new();
        network.add_node(Node::new("a", coord(0.0, 0.0)));
        network.add_node(Node::new("b", coord(100.0, 0.0)));
        network
    }

    #[test]
    fn test_add_link_requires_endpoints() {
        let mut network = two_node_network();
        let err = network
            .add_link(Link::new("ac", "a", "c", 10.0, 100.0, [Mode::Car]))
            .unwrap_err();
        assert_eq!(err, NetworkError::MissingNode { node: NodeId::from("c") });
        assert_eq!(network.link_count(), 0);
    }

    #[test]
    fn test_add_link_rejects_duplicates_and_empty_modes() {
        let mut network = two_node_network();
        network
            .add_link(Link::new("ab", "a", "b", 10.0, 100.0, [Mode::Car]))
            .unwrap();

        let dup = network.add_link(Link::new("ab", "b", "a", 10.0, 100.0, [Mode::Car]));
        assert_eq!(dup, Err(NetworkError::DuplicateLink(LinkId::from("ab"))));

        let empty = network.add_link(Link::new("ba", "b", "a", 10.0, 100.0, []));
        assert_eq!(empty, Err(NetworkError::EmptyModes(LinkId::from("ba"))));
    }

    #[test]
    fn test_link_geometry() {
        let mut network = two_node_network();
        network
            .add_link(Link::new("ab", "a", "b", 10.0, 100.0, [Mode::Car]))
            .unwrap();

        let mid = network.link_midpoint(&LinkId::from("ab")).unwrap();
        assert_relative_eq!(mid.x, 50.0);
        assert_relative_eq!(mid.y, 0.0);
        assert_relative_eq!(network.link(&LinkId::from("ab")).unwrap().travel_time(), 10.0);
        assert!(network.link_midpoint(&LinkId::from("zz")).is_err());
    }

    #[test]
    fn test_nearest_link_filters_by_mode() {
        let mut network = two_node_network();
        network
            .add_link(Link::new("ab", "a", "b", 10.0, 100.0, [Mode::Car]))
            .unwrap();
        network
            .add_link(Link::new("pt", "b", "a", 10.0, 100.0, [Mode::Pt]))
            .unwrap();

        let nearest = network.nearest_link(&coord(40.0, 5.0), &Mode::Car).unwrap();
        assert_eq!(nearest.id.as_str(), "ab");

        let nearest_any = network.nearest_link(&coord(40.0, 5.0), &Mode::Pt).unwrap();
        assert_eq!(nearest_any.id.as_str(), "pt");

        assert!(network.nearest_link(&coord(0.0, 0.0), &Mode::Walk).is_none());
    }

    #[test]
    fn test_mode_lookups_outlive_the_mode() {
        let mut network = two_node_network();
        network
            .add_link(Link::new("ab", "a", "b", 10.0, 100.0, [Mode::Car]))
            .unwrap();

        let (nearest, road): (Option<&Link>, Vec<&Link>) = {
            let mode = Mode::from_str("car").unwrap();
            (
                network.nearest_link(&coord(10.0, 0.0), &mode),
                network.links_with_mode(&mode).collect(),
            )
        };

        assert_eq!(nearest.map(|l| l.id.as_str()), Some("ab"));
        assert_eq!(road.len(), 1);
    }
}
