//! Chaos Simulator CLI
//!
//! Run fault-injection experiments against simulated targets in virtual time.

use chaos_core::ExperimentConfig;
use chaos_sim::{ReportExport, ScenarioId, ScenarioResult, ScenarioRunner};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Chaos Deterministic Simulation CLI
#[derive(Parser, Debug)]
#[command(name = "chaos-sim")]
#[command(about = "Run deterministic fault-injection experiments", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (network-latency, disk-loss, stuck-disk, ..., all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Experiment timing as JSON; flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Total chaos duration in seconds
    #[arg(short, long)]
    duration: Option<u64>,

    /// Fault time per cycle in seconds
    #[arg(short, long)]
    interval: Option<u64>,

    /// Ramp time before the first and after the last cycle
    #[arg(short, long)]
    ramp: Option<u64>,

    /// Run-command script sent to simulated VMs
    #[arg(long)]
    script: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export the experiment report to a JSON file
    #[arg(long)]
    export: Option<PathBuf>,
}

fn load_config(args: &Args) -> Result<Option<ExperimentConfig>, String> {
    let Some(path) = &args.config else {
        return Ok(None);
    };
    let json = std::fs::read_to_string(path).map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
    ExperimentConfig::from_json(&json)
        .map(Some)
        .map_err(|e| format!("{}: {}", path.display(), e))
}

fn build_runner(seed: u64, config: Option<&ExperimentConfig>, args: &Args) -> ScenarioRunner {
    let mut runner = ScenarioRunner::new(seed);
    if let Some(config) = config {
        runner = runner.with_config(config.clone());
    }
    if let Some(duration) = args.duration {
        runner = runner.with_duration(duration);
    }
    if let Some(interval) = args.interval {
        runner = runner.with_interval(interval);
    }
    if let Some(ramp) = args.ramp {
        runner = runner.with_ramp(ramp);
    }
    if let Some(script) = &args.script {
        runner = runner.with_script_file(script);
    }
    runner
}

fn report(result: &ScenarioResult) {
    if result.passed {
        info!(
            "✓ {} (seed={}) PASSED in {:.0}s sim time ({} cycles)",
            result.scenario.name(),
            result.seed,
            result.metrics.sim_time_secs,
            result.metrics.cycles_completed
        );
    } else {
        error!(
            "✗ {} (seed={}) FAILED: {}",
            result.scenario.name(),
            result.seed,
            result.failure_reason.as_deref().unwrap_or("unknown")
        );
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    if !args.json {
        info!("Chaos Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(scenario) => vec![scenario],
            Err(e) => {
                eprintln!("Error: {}", e);
                let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
                eprintln!("Available scenarios: {}, all", names.join(", "));
                std::process::exit(1);
            }
        }
    };

    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 || args.seeds > 1 {
            eprintln!("Error: --export only supports a single scenario and seed");
            std::process::exit(1);
        }

        let result = build_runner(base_seed, config.as_ref(), &args).run(scenarios[0]);
        report(&result);

        match ReportExport::from_result(&result).write_to_file(export_path) {
            Ok(()) => info!("Exported report to {}", export_path.display()),
            Err(e) => {
                error!("Failed to write export: {:?}", e);
                std::process::exit(1);
            }
        }

        if !result.passed {
            std::process::exit(1);
        }
        return;
    }

    // Run simulations
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = build_runner(seed, config.as_ref(), &args);

        for scenario in &scenarios {
            let result = runner.run(*scenario);
            if !args.json {
                report(&result);
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let failed_count = all_results.iter().filter(|r| !r.passed).count();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "metrics": r.metrics,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => println!("{}", json),
            Err(e) => {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
