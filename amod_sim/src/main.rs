//! AMoD harness CLI
//!
//! Sets up the augmented scenario once and runs every requested dispatch
//! policy against it.

use amod_sim::{BuiltinPolicies, EventDrivenEngine, HarnessExport, PolicyId, ScenarioConfig, ScenarioHarness};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// AMoD dispatch validation harness
#[derive(Parser, Debug)]
#[command(name = "amod-harness")]
#[command(about = "Validate AMoD dispatch policies on an augmented network", long_about = None)]
struct Args {
    /// JSON scenario configuration (defaults are used for missing fields)
    #[arg(short, long)]
    config: Option<String>,

    /// Master seed for determinism (0 = random from time)
    #[arg(short, long)]
    seed: Option<u64>,

    /// Policy to run (SingleHeuristic, DemandSupplyBalancingDispatcher,
    /// GlobalBipartiteMatchingDispatcher, AdaptiveRealTimeRebalancingPolicy, all)
    #[arg(short, long, default_value = "all")]
    policy: String,

    /// Number of fleet vehicles
    #[arg(short, long)]
    fleet: Option<usize>,

    /// Number of zones for the virtual network
    #[arg(short, long)]
    zones: Option<usize>,

    /// Transit corridor range
    #[arg(long)]
    corridor: Option<usize>,

    /// List the available policies and exit
    #[arg(long)]
    list: bool,

    /// Keep every run's event stream in the export
    #[arg(long)]
    events: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export layout and reports to a JSON file
    #[arg(long)]
    export: Option<String>,
}

fn load_config(args: &Args) -> Result<ScenarioConfig, amod_sim::HarnessError> {
    let mut config = match &args.config {
        Some(path) => ScenarioConfig::from_json_file(path)?,
        None => ScenarioConfig::default(),
    };

    if let Some(seed) = args.seed {
        config.seed = if seed == 0 {
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or(42)
        } else {
            seed
        };
    }
    if let Some(fleet) = args.fleet {
        config.fleet_size = fleet;
    }
    if let Some(zones) = args.zones {
        config.zone_count = zones;
    }
    if let Some(corridor) = args.corridor {
        config.corridor_range = corridor;
    }
    if args.policy != "all" {
        let policy: PolicyId = args
            .policy
            .parse()
            .map_err(|_| amod_sim::HarnessError::UnknownPolicy(args.policy.clone()))?;
        config.operator.policies = vec![policy.name().to_string()];
    }
    Ok(config)
}

fn main() {
    let args = Args::parse();

    if args.list {
        for policy in PolicyId::all() {
            println!("{:<36} {}", policy.name(), policy.description());
        }
        return;
    }

    // Initialize logging; RUST_LOG overrides --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("AMoD Dispatch Harness v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };
    let policies = config.operator.policies.clone();

    let harness = match ScenarioHarness::from_config(config) {
        Ok(harness) => harness.with_event_capture(args.events),
        Err(e) => {
            error!("Setup failed: {}", e);
            std::process::exit(1);
        }
    };

    let report = match harness.run_policies(&policies, &BuiltinPolicies, &mut EventDrivenEngine) {
        Ok(report) => report,
        Err(e) => {
            error!("Harness failed: {}", e);
            std::process::exit(1);
        }
    };

    if let Some(path) = &args.export {
        let export = HarnessExport::new(harness.fixture(), &report);
        match export.write_to_file(path) {
            Ok(()) => info!("Exported {} runs to {}", export.runs.len(), path),
            Err(e) => error!("Failed to write export: {:?}", e),
        }
    }

    let total = report.reports.len();
    let failed_count = report.failures().count();

    if args.json {
        // JSON output for CI parsing
        let summary = serde_json::json!({
            "seed": report.seed,
            "total": total,
            "passed": total - failed_count,
            "failed": failed_count,
            "results": report.reports.iter().map(|r| {
                serde_json::json!({
                    "policy": r.policy,
                    "passed": r.passed,
                    "departures": r.record.departures,
                    "arrivals": r.record.arrivals,
                    "discrepancy": r.discrepancy,
                    "violation": r.violation,
                    "failure_reason": r.failure.as_ref().map(|f| f.to_string()),
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => error!("Failed to encode summary: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} policy runs passed!", total);
        } else {
            error!("❌ {}/{} policy runs failed!", failed_count, total);
            for run in report.failures() {
                error!(
                    "  - {}: {}",
                    run.policy,
                    run.failure.as_ref().map(|f| f.to_string()).unwrap_or_default()
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
