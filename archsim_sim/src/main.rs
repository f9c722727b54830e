//! archsim Simulator CLI
//!
//! Run infrastructure designs against traffic scenarios on a virtual clock.

use anyhow::{bail, Context, Result};
use archsim_core::{EvaluationClient, SimulationConfig, Topology};
use archsim_sim::scenarios::ScenarioId;
use archsim_sim::{ModelOracle, ScenarioResult, ScenarioRunner, SimExport};
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// archsim deterministic scenario runner
#[derive(Parser, Debug)]
#[command(name = "archsim")]
#[command(about = "Run infrastructure designs against traffic scenarios", long_about = None)]
struct Args {
    /// Scenario to run (tinyurl, flash_sale, ddos_siege, all)
    #[arg(short = 'S', long, default_value = "tinyurl")]
    scenario: String,

    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Simulated seconds to run (defaults to the scenario's goal duration)
    #[arg(short, long)]
    duration: Option<u64>,

    /// JSON file with simulation tuning
    #[arg(short, long)]
    config: Option<String>,

    /// JSON file with the design to run (defaults to the reference design)
    #[arg(short, long)]
    topology: Option<String>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-tick frames to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// List the available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let builder = FmtSubscriber::builder().with_max_level(level);

    // RUST_LOG wins over --verbose when set
    let installed = if std::env::var_os("RUST_LOG").is_some() {
        tracing::subscriber::set_global_default(
            builder.with_env_filter(EnvFilter::from_default_env()).finish(),
        )
    } else {
        tracing::subscriber::set_global_default(builder.finish())
    };
    installed.context("Failed to set tracing subscriber")
}

async fn list_scenarios(json: bool) -> Result<()> {
    let client = EvaluationClient::new(Arc::new(ModelOracle::new(0)));
    let scenarios = client.list_scenarios().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&scenarios)?);
        return Ok(());
    }
    for s in scenarios {
        let name = s
            .id
            .parse::<ScenarioId>()
            .map(|id| id.name())
            .unwrap_or("?");
        println!(
            "{:<4} {:<12} {:<11} min {:>6.0} QPS, p-latency <= {:>4.0}ms, availability >= {}% over {}s",
            s.id, name, s.title, s.goal.min_qps, s.goal.max_latency_ms, s.goal.availability, s.goal.duration
        );
        println!("     {}", s.description);
    }
    Ok(())
}

fn load_config(path: Option<&str>) -> Result<SimulationConfig> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path))?;
            SimulationConfig::from_json_str(&raw).with_context(|| format!("Invalid config {}", path))
        }
        None => Ok(SimulationConfig::default()),
    }
}

fn load_topology(path: &str) -> Result<Topology> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read topology {}", path))?;
    let topology: Topology =
        serde_json::from_str(&raw).with_context(|| format!("Invalid topology {}", path))?;
    for warning in topology.structural_warnings() {
        info!("Topology warning: {}", warning);
    }
    Ok(topology)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    if args.list_scenarios {
        return list_scenarios(args.json).await;
    }

    if !args.json {
        info!("archsim simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        match args.scenario.parse() {
            Ok(id) => vec![id],
            Err(e) => bail!("{} (available: tinyurl, flash_sale, ddos_siege, all)", e),
        }
    };

    let seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(1)
    } else {
        args.seed
    };

    let mut runner = ScenarioRunner::new(seed).with_config(load_config(args.config.as_deref())?);
    if let Some(duration) = args.duration {
        runner = runner.with_duration(duration);
    }
    if let Some(path) = &args.topology {
        runner = runner.with_topology(load_topology(path)?);
    }

    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            bail!("--export only supports a single scenario, not 'all'");
        }

        info!("Running with export to: {}", export_path);
        let mut export = SimExport::new(scenarios[0].name(), seed);
        let result = runner.run_with_export(scenarios[0], &mut export).await?;
        export
            .write_to_file(export_path)
            .with_context(|| format!("Failed to write export {}", export_path))?;
        info!("Exported {} frames to {}", export.frames.len(), export_path);

        report(&[result], args.json)?;
        return Ok(());
    }

    let mut results = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        results.push(runner.run(scenario).await?);
    }
    report(&results, args.json)
}

/// Prints the summary and exits non-zero if any run failed.
fn report(results: &[ScenarioResult], json: bool) -> Result<()> {
    let total = results.len();
    let failed = results.iter().filter(|r| !r.passed).count();

    if json {
        let summary = serde_json::json!({
            "total": total,
            "passed": total - failed,
            "failed": failed,
            "results": results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "peak_fulfilled_qps": r.peak_fulfilled_qps,
                    "availability": r.availability,
                    "max_latency_ms": r.max_latency_ms,
                    "final_retention": r.final_retention,
                    "crash_count": r.crash_count,
                    "balance": r.stats.balance,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        for r in results {
            if r.passed {
                info!("✓ {} (seed={}) PASSED", r.scenario.name(), r.seed);
            } else {
                error!(
                    "✗ {} (seed={}) FAILED: {}",
                    r.scenario.name(),
                    r.seed,
                    r.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }

        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
        if failed == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed, total);
        }
    }

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
