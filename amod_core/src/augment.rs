//! Network augmentation - transit corridor and off-network activities.
//!
//! Builds a fast transit-only track along the grid diagonal
//! (`0:0 → 1:1 → … → R:R`) and sends every traveller on a final walk to a
//! "pt interaction" activity attached to that track. Neither the links nor
//! the activity location are part of the road graph AMoD vehicles drive on,
//! which is exactly what dispatch policies and the oracle must tolerate.
//!
//! Augmentation is a one-shot operation: running it twice fails on the
//! already-injected link ids.

use crate::network::{Link, Network, NetworkError};
use crate::population::{Activity, Leg, Population};
use amod_env::{LinkId, Mode, NodeId};
use thiserror::Error;
use tracing::{debug, info};

/// Free-flow speed of injected corridor links (100 km/h in m/s).
pub const CORRIDOR_FREESPEED: f64 = 100.0 * 1000.0 / 3600.0;

/// Length of each injected corridor link in metres.
pub const CORRIDOR_LINK_LENGTH: f64 = 1000.0;

/// Purpose tag of the appended off-network activity.
pub const OFF_NETWORK_PURPOSE: &str = "pt interaction";

/// Errors raised during augmentation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AugmentError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    /// Plans need an injected link to anchor on
    #[error("Corridor range is 0 but {persons} persons need an off-network anchor link")]
    EmptyCorridor { persons: usize },
}

/// What an augmentation pass changed.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentationSummary {
    /// Injected link ids, forward/backward pairs in corridor order
    pub injected_links: Vec<LinkId>,

    /// Link referenced by the appended off-network activities
    pub anchor_link: Option<LinkId>,

    /// Number of plans that received the extra leg/activity
    pub plans_augmented: usize,
}

/// Forward corridor link id for index `i`.
pub fn forward_link_id(i: usize) -> LinkId {
    LinkId::new(format!("pt_fwd_{}:{}", i, i))
}

/// Backward corridor link id for index `i`.
pub fn backward_link_id(i: usize) -> LinkId {
    LinkId::new(format!("pt_bck_{}:{}", i, i))
}

/// Corridor index whose forward link anchors the off-network activity.
pub fn anchor_index(range: usize) -> Option<usize> {
    if range == 0 {
        None
    } else {
        Some(range.div_ceil(2).min(range - 1))
    }
}

/// Injects `range` forward/backward pairs of transit-only links.
///
/// Pair `i` connects node `"i:i"` with node `"i+1:i+1"`. Nodes and link ids
/// are checked before the network is touched, so a `MissingNode` or
/// `DuplicateLink` failure leaves it unchanged.
///
/// # Returns
/// The injected link ids, `2 * range` of them.
pub fn inject_corridor(network: &mut Network, range: usize) -> Result<Vec<LinkId>, NetworkError> {
    if range > 0 {
        for i in 0..=range {
            let node = NodeId::grid(i, i);
            if !network.contains_node(&node) {
                return Err(NetworkError::MissingNode { node });
            }
        }
    }
    for i in 0..range {
        for id in [forward_link_id(i), backward_link_id(i)] {
            if network.contains_link(&id) {
                return Err(NetworkError::DuplicateLink(id));
            }
        }
    }

    let mut injected = Vec::with_capacity(2 * range);
    for i in 0..range {
        let from = NodeId::grid(i, i);
        let to = NodeId::grid(i + 1, i + 1);

        let forward = Link::new(
            forward_link_id(i),
            from.clone(),
            to.clone(),
            CORRIDOR_FREESPEED,
            CORRIDOR_LINK_LENGTH,
            [Mode::Pt],
        );
        let backward = Link::new(
            backward_link_id(i),
            to,
            from,
            CORRIDOR_FREESPEED,
            CORRIDOR_LINK_LENGTH,
            [Mode::Pt],
        );

        for link in [forward, backward] {
            injected.push(link.id.clone());
            network.add_link(link)?;
        }
    }

    debug!("Injected {} transit-only links", injected.len());
    Ok(injected)
}

/// Appends a walk leg and an off-network activity at `anchor` to every plan.
///
/// The activity sits at the anchor link's midpoint.
///
/// # Returns
/// Number of plans augmented.
pub fn attach_off_network_activities(
    population: &mut Population,
    network: &Network,
    anchor: &LinkId,
) -> Result<usize, NetworkError> {
    let location = network.link_midpoint(anchor)?;
    let mut plans = 0;

    for person in population.persons_mut() {
        for plan in person.plans.iter_mut() {
            plan.push_leg(Leg::new(Mode::Walk));
            plan.push_activity(Activity::new(OFF_NETWORK_PURPOSE, location, anchor.clone()));
            plans += 1;
        }
    }

    Ok(plans)
}

/// Runs both augmentation steps on a scenario.
///
/// Must be called exactly once per scenario, before any run.
pub fn augment(
    network: &mut Network,
    population: &mut Population,
    range: usize,
) -> Result<AugmentationSummary, AugmentError> {
    let anchor = match anchor_index(range) {
        Some(index) => Some(forward_link_id(index)),
        None if population.is_empty() => None,
        None => {
            return Err(AugmentError::EmptyCorridor {
                persons: population.len(),
            })
        }
    };

    let injected_links = inject_corridor(network, range)?;
    let plans_augmented = match &anchor {
        Some(anchor) => attach_off_network_activities(population, network, anchor)?,
        None => 0,
    };

    info!(
        "Augmented network: {} transit links, {} plans anchored on {}",
        injected_links.len(),
        plans_augmented,
        anchor.as_ref().map(LinkId::as_str).unwrap_or("-"),
    );

    Ok(AugmentationSummary {
        injected_links,
        anchor_link: anchor,
        plans_augmented,
    })
}
