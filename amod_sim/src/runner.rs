//! Scenario harness - runs every policy variant against one shared fixture.

use crate::dispatch::{BuiltinPolicies, PolicyFactory};
use crate::engine::{EngineError, EngineInput, EventDrivenEngine, RunSummary, SimulationEngine};
use crate::error::{HarnessError, RunFailure};
use crate::oracle::{ConservationOracle, OracleState, RunRecord};
use crate::world::{BaseScenario, ScenarioConfig, ScenarioFixture};

use amod_env::{EnvError, EventFanout, EventRecorder, SimEvent};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// Outcome of one policy variant.
#[derive(Debug, Clone, Serialize)]
pub struct PolicyReport {
    /// Policy identifier
    pub policy: String,

    /// Unique id of this run
    pub run_id: Uuid,

    /// Whether the run passed all checks
    pub passed: bool,

    /// Departures minus arrivals
    pub discrepancy: i64,

    /// An AMoD vehicle entered a transit-only link
    pub violation: bool,

    /// Failure reason if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<RunFailure>,

    /// Oracle counters
    pub record: RunRecord,

    /// Engine totals, absent when the engine failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<RunSummary>,

    /// Full event stream, when capture is enabled
    #[serde(skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<SimEvent>>,
}

/// Outcome of a harness invocation.
#[derive(Debug, Clone, Serialize)]
pub struct HarnessReport {
    /// Seed used
    pub seed: u64,

    pub reports: Vec<PolicyReport>,
}

impl HarnessReport {
    /// True only if every variant passed.
    pub fn passed(&self) -> bool {
        self.reports.iter().all(|r| r.passed)
    }

    /// Variants that failed.
    pub fn failures(&self) -> impl Iterator<Item = &PolicyReport> {
        self.reports.iter().filter(|r| !r.passed)
    }

    pub fn report(&self, policy: &str) -> Option<&PolicyReport> {
        self.reports.iter().find(|r| r.policy == policy)
    }
}

/// Runs dispatch policy variants against a shared, immutable scenario.
pub struct ScenarioHarness {
    fixture: Arc<ScenarioFixture>,

    /// Keep the event stream of every run in its report
    capture_events: bool,
}

impl ScenarioHarness {
    /// Builds the fixture from `base`: validation, augmentation, zoning and
    /// fleet placement, each exactly once.
    pub fn setup(config: ScenarioConfig, base: BaseScenario) -> Result<Self, HarnessError> {
        info!(
            "Setting up scenario (seed={}, corridor={}, zones={})",
            config.seed, config.corridor_range, config.zone_count
        );
        let fixture = ScenarioFixture::build(config, base)?;
        Ok(Self {
            fixture: Arc::new(fixture),
            capture_events: false,
        })
    }

    /// Sets up the synthetic grid scenario described by `config`.
    pub fn from_config(config: ScenarioConfig) -> Result<Self, HarnessError> {
        config.validate()?;
        let base = BaseScenario::grid(&config)?;
        Self::setup(config, base)
    }

    /// Keeps each run's event stream in its report.
    pub fn with_event_capture(mut self, capture: bool) -> Self {
        self.capture_events = capture;
        self
    }

    pub fn fixture(&self) -> &Arc<ScenarioFixture> {
        &self.fixture
    }

    /// Runs the configured policies with the built-in factory and engine.
    pub fn run_configured(&self) -> Result<HarnessReport, HarnessError> {
        let policies = self.fixture.config.operator.policies.clone();
        self.run_policies(&policies, &BuiltinPolicies, &mut EventDrivenEngine)
    }

    /// Runs each policy once, in order.
    ///
    /// Unknown identifiers are rejected before the first run. A failing
    /// variant never stops the remaining ones.
    pub fn run_policies(
        &self,
        policies: &[String],
        factory: &dyn PolicyFactory,
        engine: &mut dyn SimulationEngine,
    ) -> Result<HarnessReport, HarnessError> {
        if let Some(unknown) = policies.iter().find(|p| !factory.supports(p)) {
            return Err(HarnessError::UnknownPolicy(unknown.clone()));
        }

        let reports = policies
            .iter()
            .map(|policy| self.run_policy(policy, factory, engine))
            .collect::<Result<Vec<_>, _>>()?;

        let report = HarnessReport {
            seed: self.fixture.config.seed,
            reports,
        };
        info!(
            "{}/{} policy variants passed",
            report.reports.len() - report.failures().count(),
            report.reports.len()
        );
        Ok(report)
    }

    fn run_policy(
        &self,
        name: &str,
        factory: &dyn PolicyFactory,
        engine: &mut dyn SimulationEngine,
    ) -> Result<PolicyReport, HarnessError> {
        let fixture = Arc::clone(&self.fixture);
        let run_id = Uuid::new_v4();
        let mut policy = factory
            .create(name, &fixture.config.operator)
            .ok_or_else(|| HarnessError::UnknownPolicy(name.to_string()))?;

        info!("Starting policy: {} (run {})", name, run_id);

        let input = EngineInput {
            network: &fixture.network,
            population: &fixture.population,
            fleet: &fixture.fleet,
            operator: &fixture.config.operator,
            end_time: fixture.config.end_time,
            virtual_network: policy
                .requires_virtual_network()
                .then_some(&fixture.virtual_network),
        };

        let mut oracle = ConservationOracle::new(name, &fixture.network);
        let mut recorder = EventRecorder::new();
        let outcome = if self.capture_events {
            let mut fanout = EventFanout::new().register(&mut oracle).register(&mut recorder);
            engine.run(input, policy.as_mut(), &mut fanout)
        } else {
            engine.run(input, policy.as_mut(), &mut oracle)
        };
        let record = oracle.finalize();

        let failure = classify(&outcome, &record);
        let report = PolicyReport {
            policy: name.to_string(),
            run_id,
            passed: failure.is_none(),
            discrepancy: record.discrepancy(),
            violation: record.violations > 0,
            failure,
            record,
            summary: outcome.ok(),
            events: self
                .capture_events
                .then(|| recorder.events().to_vec()),
        };

        match &report.failure {
            None => info!(
                "✓ {} PASSED ({} departures, {} arrivals)",
                name, report.record.departures, report.record.arrivals
            ),
            Some(failure) => error!("✗ {} FAILED: {}", name, failure),
        }
        Ok(report)
    }
}

/// Maps a finished run to its failure, if any.
fn classify(outcome: &Result<RunSummary, EngineError>, record: &RunRecord) -> Option<RunFailure> {
    match outcome {
        Err(EngineError::Aborted(EnvError::ModeAccessViolation {
            vehicle, link, time, ..
        })) => Some(RunFailure::ModeAccessViolation {
            vehicle: vehicle.clone(),
            link: link.clone(),
            time: *time,
        }),
        Err(e) => Some(RunFailure::Engine {
            message: e.to_string(),
        }),
        Ok(_) if record.state != OracleState::Terminated => Some(RunFailure::Engine {
            message: "engine returned without reporting run completion".to_string(),
        }),
        Ok(_) if record.departures != record.arrivals => Some(RunFailure::ConservationMismatch {
            departures: record.departures,
            arrivals: record.arrivals,
        }),
        Ok(_) => None,
    }
}
