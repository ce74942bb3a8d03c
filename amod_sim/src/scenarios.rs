//! Built-in dispatch policy variants.

/// Policy identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyId {
    /// Nearest idle vehicle per request, first come first served
    SingleHeuristic,

    /// Switches between request-driven and vehicle-driven assignment
    DemandSupplyBalancing,

    /// Global vehicle/request matching by distance
    GlobalBipartiteMatching,

    /// Global matching plus zonal rebalancing (needs the virtual network)
    AdaptiveRealTimeRebalancing,
}

impl PolicyId {
    /// Returns a list of all policies.
    pub fn all() -> Vec<PolicyId> {
        vec![
            PolicyId::SingleHeuristic,
            PolicyId::DemandSupplyBalancing,
            PolicyId::GlobalBipartiteMatching,
            PolicyId::AdaptiveRealTimeRebalancing,
        ]
    }

    /// Returns the policy identifier.
    pub fn name(&self) -> &'static str {
        match self {
            PolicyId::SingleHeuristic => "SingleHeuristic",
            PolicyId::DemandSupplyBalancing => "DemandSupplyBalancingDispatcher",
            PolicyId::GlobalBipartiteMatching => "GlobalBipartiteMatchingDispatcher",
            PolicyId::AdaptiveRealTimeRebalancing => "AdaptiveRealTimeRebalancingPolicy",
        }
    }

    /// Returns a description of the policy.
    pub fn description(&self) -> &'static str {
        match self {
            PolicyId::SingleHeuristic => "Each request, oldest first, takes the nearest idle vehicle",
            PolicyId::DemandSupplyBalancing => {
                "Requests pick vehicles under oversupply, vehicles pick requests under undersupply"
            }
            PolicyId::GlobalBipartiteMatching => "Greedy global matching of idle vehicles to requests",
            PolicyId::AdaptiveRealTimeRebalancing => {
                "Global matching plus periodic rebalancing toward under-served zones"
            }
        }
    }
}

impl std::fmt::Display for PolicyId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for PolicyId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "singleheuristic" | "single_heuristic" => Ok(PolicyId::SingleHeuristic),
            "demandsupplybalancingdispatcher" | "demand_supply_balancing_dispatcher" => {
                Ok(PolicyId::DemandSupplyBalancing)
            }
            "globalbipartitematchingdispatcher" | "global_bipartite_matching_dispatcher" => {
                Ok(PolicyId::GlobalBipartiteMatching)
            }
            "adaptiverealtimerebalancingpolicy" | "adaptive_real_time_rebalancing_policy" => {
                Ok(PolicyId::AdaptiveRealTimeRebalancing)
            }
            _ => Err(format!("Unknown policy: {}", s)),
        }
    }
}
