//! JSON export of harness results.
//!
//! Captures the scenario layout (zones, corridor, fleet) next to the
//! per-policy reports so a failing run can be inspected offline.

use crate::runner::{HarnessReport, PolicyReport};
use crate::world::ScenarioFixture;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// One zone of the virtual network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ZoneExport {
    pub index: usize,
    pub x: f64,
    pub y: f64,

    /// Demand points assigned to the zone
    pub demand_weight: usize,

    /// Road links whose midpoint falls in the zone
    pub link_count: usize,
}

/// Scenario layout after setup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutExport {
    pub nodes: usize,
    pub links: usize,
    pub persons: usize,
    pub vehicles: usize,

    /// Injected transit-only link ids
    pub corridor: Vec<String>,

    /// Link the off-network activities reference
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anchor_link: Option<String>,

    pub zones: Vec<ZoneExport>,
    pub virtual_links: usize,

    /// Set when fewer zones than requested could be formed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degenerate: Option<String>,
}

impl LayoutExport {
    pub fn from_fixture(fixture: &ScenarioFixture) -> Self {
        let vn = &fixture.virtual_network;
        Self {
            nodes: fixture.network.node_count(),
            links: fixture.network.link_count(),
            persons: fixture.population.len(),
            vehicles: fixture.fleet.len(),
            corridor: fixture
                .augmentation
                .injected_links
                .iter()
                .map(|l| l.to_string())
                .collect(),
            anchor_link: fixture.augmentation.anchor_link.as_ref().map(|l| l.to_string()),
            zones: vn
                .zones()
                .iter()
                .map(|z| ZoneExport {
                    index: z.index,
                    x: z.centroid.x,
                    y: z.centroid.y,
                    demand_weight: z.demand_weight,
                    link_count: z.links.len(),
                })
                .collect(),
            virtual_links: vn.virtual_links().len(),
            degenerate: vn.degenerate().map(|d| d.to_string()),
        }
    }
}

/// Complete harness export.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessExport {
    /// Seed used
    pub seed: u64,

    pub layout: LayoutExport,

    /// Final result
    pub passed: bool,

    pub runs: Vec<PolicyReport>,
}

impl HarnessExport {
    /// Creates an export from a finished harness run.
    pub fn new(fixture: &ScenarioFixture, report: &HarnessReport) -> Self {
        Self {
            seed: report.seed,
            layout: LayoutExport::from_fixture(fixture),
            passed: report.passed(),
            runs: report.reports.clone(),
        }
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}
