//! Free-flow shortest paths over the road network.

use amod_core::Network;
use amod_env::{LinkId, Mode, NodeId};
use petgraph::algo::astar;
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;

/// Edge payload: the road link an edge stands for.
#[derive(Debug, Clone)]
struct RoadEdge {
    link: LinkId,
    travel_time: f64,
}

/// Routes vehicles over links that allow `car`.
///
/// Transit-only links never enter the graph, so a routed path can not lead a
/// fleet vehicle onto them.
#[derive(Debug, Clone)]
pub struct RoadRouter {
    graph: DiGraph<NodeId, RoadEdge>,

    /// Road link id -> (from, to) graph nodes
    links: HashMap<LinkId, (NodeIndex, NodeIndex)>,
}

impl RoadRouter {
    /// Builds the road graph of `network`.
    pub fn new(network: &Network) -> Self {
        let mut graph = DiGraph::new();
        let mut nodes = HashMap::new();
        let mut links = HashMap::new();

        for link in network.links_with_mode(&Mode::Car) {
            let mut index_of = |id: &NodeId| {
                *nodes
                    .entry(id.clone())
                    .or_insert_with(|| graph.add_node(id.clone()))
            };
            let from = index_of(&link.from);
            let to = index_of(&link.to);

            graph.add_edge(
                from,
                to,
                RoadEdge {
                    link: link.id.clone(),
                    travel_time: link.travel_time(),
                },
            );
            links.insert(link.id.clone(), (from, to));
        }

        Self { graph, links }
    }

    /// Number of routable road links.
    pub fn link_count(&self) -> usize {
        self.links.len()
    }

    pub fn is_road_link(&self, link: &LinkId) -> bool {
        self.links.contains_key(link)
    }

    /// Links to enter after leaving the end of `from`, ending with `to`.
    ///
    /// # Returns
    /// * `Some(vec![])` - `from == to`
    /// * `Some(route)` - fastest route by free-flow travel time
    /// * `None` - either link is not a road link, or `to` is unreachable
    pub fn route(&self, from: &LinkId, to: &LinkId) -> Option<Vec<LinkId>> {
        if from == to {
            return self.links.contains_key(from).then(Vec::new);
        }
        let &(_, start) = self.links.get(from)?;
        let &(goal, _) = self.links.get(to)?;

        let (_, path) = astar(
            &self.graph,
            start,
            |node| node == goal,
            |edge| edge.weight().travel_time,
            |_| 0.0,
        )?;

        let mut route = Vec::with_capacity(path.len());
        for pair in path.windows(2) {
            // Parallel links: take the fastest
            let edge = self
                .graph
                .edges_connecting(pair[0], pair[1])
                .map(|e| e.weight())
                .reduce(|best, e| if e.travel_time < best.travel_time { e } else { best })?;
            route.push(edge.link.clone());
        }
        route.push(to.clone());
        Some(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use amod_core::{Link, Node};
    use amod_env::coord;

    /// a -> b -> c road chain, plus a fast transit shortcut a -> c.
    fn chain() -> Network {
        let mut network = Network::new();
        for (id, x) in [("a", 0.0), ("b", 1000.0), ("c", 2000.0)] {
            network.add_node(Node::new(id, coord(x, 0.0)));
        }
        network.add_link(Link::new("ab", "a", "b", 10.0, 1000.0, [Mode::Car])).unwrap();
        network.add_link(Link::new("bc", "b", "c", 10.0, 1000.0, [Mode::Car])).unwrap();
        network.add_link(Link::new("cb", "c", "b", 10.0, 1000.0, [Mode::Car])).unwrap();
        network.add_link(Link::new("ba", "b", "a", 10.0, 1000.0, [Mode::Car])).unwrap();
        network.add_link(Link::new("ac_pt", "a", "c", 100.0, 2000.0, [Mode::Pt])).unwrap();
        network
    }

    #[test]
    fn test_route_follows_road_links_only() {
        let router = RoadRouter::new(&chain());
        assert_eq!(router.link_count(), 4);
        assert!(!router.is_road_link(&LinkId::from("ac_pt")));

        let route = router.route(&LinkId::from("ba"), &LinkId::from("bc")).unwrap();
        assert_eq!(route, vec![LinkId::from("ab"), LinkId::from("bc")]);
    }

    #[test]
    fn test_route_edge_cases() {
        let router = RoadRouter::new(&chain());
        let ab = LinkId::from("ab");

        assert_eq!(router.route(&ab, &ab), Some(vec![]));
        assert_eq!(router.route(&ab, &LinkId::from("bc")), Some(vec![LinkId::from("bc")]));
        assert_eq!(router.route(&ab, &LinkId::from("ac_pt")), None);
        assert_eq!(router.route(&LinkId::from("nope"), &ab), None);
    }

    #[test]
    fn test_unreachable_target() {
        let mut network = chain();
        network.add_node(Node::new("d", coord(5000.0, 0.0)));
        network.add_node(Node::new("e", coord(6000.0, 0.0)));
        network.add_link(Link::new("de", "d", "e", 10.0, 1000.0, [Mode::Car])).unwrap();

        let router = RoadRouter::new(&network);
        assert!(router.is_road_link(&LinkId::from("de")));
        assert_eq!(router.route(&LinkId::from("ab"), &LinkId::from("de")), None);
    }
}
