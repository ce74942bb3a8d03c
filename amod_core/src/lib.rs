//! AMoD Harness Core - scenario fixture construction
//!
//! Builds the static half of a dispatch-validation scenario:
//! 1. **Network / Population**: the road graph and the daily plans travellers execute
//! 2. **Augmentation**: a transit-only corridor plus off-network activities that
//!    stress dispatch logic
//! 3. **Zonal partitioning**: deterministic k-means zones for policies that
//!    aggregate supply and demand spatially

pub mod augment;
pub mod kmeans;
pub mod network;
pub mod population;
pub mod virtual_network;

// Re-export key types for convenience
pub use augment::{augment, AugmentError, AugmentationSummary};
pub use kmeans::{PartitionError, ZonalPartitioner};
pub use network::{Link, Network, NetworkError, Node};
pub use population::{Activity, Leg, Person, Plan, PlanElement, Population, PopulationError};
pub use virtual_network::{DegenerateClustering, VirtualLink, VirtualNetwork, Zone};
