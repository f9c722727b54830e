//! Scenario runner - drives a full controller against the reference oracle
//! on a virtual clock and judges the run against the scenario's goal.

use crate::catalog::reference_topology;
use crate::context::SimContext;
use crate::exporter::{SimExport, SimFrame};
use crate::model::ModelOracle;
use crate::scenarios::ScenarioId;

use archsim_core::{
    AdapterError, ConfigError, LogEntry, SessionStats, SimulationConfig, SimulationController,
    SimulationSession, TickOutcome, Topology,
};
use archsim_env::SandboxContext;
use serde::Serialize;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

/// RNG stream handed to the oracle.
const ORACLE_STREAM: u64 = 0x0AC1E;

/// Reasons a run could not be carried out at all.
#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Invalid topology: {0}")]
    Topology(String),

    #[error("Oracle failed at tick {tick}: {source}")]
    Oracle { tick: u64, source: AdapterError },
}

/// Results from running a scenario.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether the design met every goal
    pub passed: bool,

    /// Advancing ticks applied
    pub total_ticks: u64,

    /// Virtual time at the end of the run
    pub final_time_secs: f64,

    pub final_retention: f64,

    /// Components that crashed during the run (counted once per crash)
    pub crash_count: usize,

    pub peak_fulfilled_qps: f64,

    /// Mean total score over all ticks, in percent
    pub availability: f64,

    pub max_latency_ms: f64,

    /// Event log at the end of the run
    pub log: Vec<LogEntry>,

    pub stats: SessionStats,

    /// Failure message if any
    pub failure_reason: Option<String>,
}

/// Runs scenarios against a design.
pub struct ScenarioRunner {
    /// Configuration seed
    seed: u64,

    /// Overrides the scenario's goal duration
    duration_secs: Option<u64>,

    config: SimulationConfig,

    /// Design under test; the scenario's reference design when unset
    topology: Option<Topology>,
}

impl ScenarioRunner {
    /// Creates a runner for the reference designs with default tuning.
    pub fn new(seed: u64) -> Self {
        Self {
            seed,
            duration_secs: None,
            config: SimulationConfig::default(),
            topology: None,
        }
    }

    /// Sets the run length in ticks (one tick per simulated second).
    pub fn with_duration(mut self, secs: u64) -> Self {
        self.duration_secs = Some(secs);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_config(mut self, config: SimulationConfig) -> Self {
        self.config = config;
        self
    }

    /// Runs a user-supplied design instead of the reference one.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = Some(topology);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Runs a scenario and returns the result.
    pub async fn run(&self, scenario: ScenarioId) -> Result<ScenarioResult, RunnerError> {
        self.execute(scenario, None).await
    }

    /// Runs a scenario, recording one frame per tick into `export`.
    pub async fn run_with_export(
        &self,
        scenario: ScenarioId,
        export: &mut SimExport,
    ) -> Result<ScenarioResult, RunnerError> {
        let result = self.execute(scenario, Some(export)).await?;
        export.finalize(result.passed, result.final_retention);
        Ok(result)
    }

    async fn execute(
        &self,
        scenario_id: ScenarioId,
        mut export: Option<&mut SimExport>,
    ) -> Result<ScenarioResult, RunnerError> {
        self.config.validate()?;

        let scenario = scenario_id.scenario();
        let duration = self.duration_secs.unwrap_or(scenario.goal.duration);
        let topology = match &self.topology {
            Some(topo) => topo.clone(),
            None => reference_topology(scenario_id),
        };
        if topology.components.is_empty() {
            return Err(RunnerError::Topology("design has no components".into()));
        }

        info!(
            "Starting scenario: {} (seed={}, {} components, {}s)",
            scenario_id.name(),
            self.seed,
            topology.components.len(),
            duration
        );

        let context = SimContext::shared(self.seed);
        let oracle = Arc::new(ModelOracle::new(context.derive_seed(ORACLE_STREAM)));
        let design_id = format!("{}-{}", scenario_id.name(), self.seed);
        let session =
            SimulationSession::with_design_id(&design_id, scenario_id.wire_id(), &self.config);

        let controller = SimulationController::with_session(
            Arc::clone(&context),
            oracle,
            Arc::new(RwLock::new(topology)),
            session,
            self.config.clone(),
        )?;
        controller.start();

        let interval = self.config.tick_interval();
        let mut crash_count = 0;
        let mut peak_fulfilled_qps: f64 = 0.0;
        let mut max_latency_ms: f64 = 0.0;
        let mut score_sum = 0.0;
        let mut ticks = 0u64;

        for _ in 0..duration {
            context.sleep(interval).await;

            let report = match controller.tick().await {
                TickOutcome::Advanced(report) => report,
                TickOutcome::Failed(source) => {
                    return Err(RunnerError::Oracle {
                        tick: controller.current_tick() + 1,
                        source,
                    })
                }
                other => {
                    warn!(?other, "Tick did not advance");
                    continue;
                }
            };

            ticks += 1;
            crash_count += report.newly_crashed.len();
            peak_fulfilled_qps = peak_fulfilled_qps.max(report.fulfilled_qps);
            max_latency_ms = max_latency_ms.max(report.avg_latency_ms);
            score_sum += report.total_score;

            for entry in &report.entries {
                debug!(tick = entry.tick, severity = ?entry.severity, "{}", entry.message);
            }
            if report.tick % 10 == 0 {
                debug!(
                    "  t={}s | score={:.1} | fulfilled={:.0}/{:.0} | latency={:.1}ms | retention={:.3}",
                    report.tick,
                    report.total_score,
                    report.fulfilled_qps,
                    report.total_qps,
                    report.avg_latency_ms,
                    report.retention_rate
                );
            }

            if let Some(export) = export.as_deref_mut() {
                export.add_frame(SimFrame {
                    tick: report.tick,
                    time_sec: context.now().as_secs_f64(),
                    total_score: report.total_score,
                    retention_rate: report.retention_rate,
                    components: report.views,
                    events: report.entries,
                });
            }
        }

        let availability = if ticks > 0 {
            score_sum / ticks as f64
        } else {
            0.0
        };

        let goal = &scenario.goal;
        let mut failures = Vec::new();
        if crash_count > 0 {
            failures.push(format!("{} component crash(es)", crash_count));
        }
        if availability < goal.availability {
            failures.push(format!(
                "availability {:.2}% below {:.2}%",
                availability, goal.availability
            ));
        }
        if peak_fulfilled_qps < goal.min_qps {
            failures.push(format!(
                "peak throughput {:.0} QPS below {:.0} QPS",
                peak_fulfilled_qps, goal.min_qps
            ));
        }
        if max_latency_ms > goal.max_latency_ms {
            failures.push(format!(
                "latency {:.1}ms exceeds {:.1}ms",
                max_latency_ms, goal.max_latency_ms
            ));
        }
        let passed = failures.is_empty();

        let session = controller.session_snapshot();
        info!(
            "{} {}: {} ticks, peak {:.0} QPS, availability {:.2}%, max latency {:.1}ms",
            if passed { "✓" } else { "✗" },
            scenario_id.name(),
            ticks,
            peak_fulfilled_qps,
            availability,
            max_latency_ms
        );

        Ok(ScenarioResult {
            scenario: scenario_id,
            seed: self.seed,
            passed,
            total_ticks: ticks,
            final_time_secs: context.now().as_secs_f64(),
            final_retention: session.retention_rate(),
            crash_count,
            peak_fulfilled_qps,
            availability,
            max_latency_ms,
            log: session.log.iter().cloned().collect(),
            stats: session.stats,
            failure_reason: if passed {
                None
            } else {
                Some(failures.join("; "))
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::minimal_topology;
    use approx::assert_relative_eq;

    #[tokio::test]
    async fn test_reference_designs_pass() {
        for scenario in ScenarioId::all() {
            let result = ScenarioRunner::new(42).run(scenario).await.unwrap();
            assert!(
                result.passed,
                "{} failed: {:?}",
                scenario,
                result.failure_reason
            );
            assert_eq!(result.crash_count, 0);
            assert_eq!(result.total_ticks, scenario.scenario().goal.duration);
        }
    }

    #[tokio::test]
    async fn test_tinyurl_reaches_goal() {
        let result = ScenarioRunner::new(42)
            .run(ScenarioId::TinyUrl)
            .await
            .unwrap();

        assert_relative_eq!(result.peak_fulfilled_qps, 10_000.0);
        assert_relative_eq!(result.max_latency_ms, 187.5, epsilon = 1e-6);
        assert_relative_eq!(result.availability, 100.0);
        assert_eq!(result.final_retention, 1.0);
        assert_eq!(result.final_time_secs, 60.0);
        assert!(result.stats.served_requests > 0.0);
        assert!(result
            .log
            .iter()
            .any(|e| e.message.contains("App Servers scaled up")));
    }

    #[tokio::test]
    async fn test_undersized_design_fails() {
        let result = ScenarioRunner::new(42)
            .with_topology(minimal_topology())
            .with_duration(10)
            .run(ScenarioId::TinyUrl)
            .await
            .unwrap();

        assert!(!result.passed);
        assert!(result.crash_count >= 1);
        assert!(result
            .log
            .iter()
            .any(|e| e.message == "Web Server crashed and needs a manual restart"));
        assert!(result
            .failure_reason
            .as_deref()
            .is_some_and(|r| r.contains("crash")));
    }

    #[tokio::test]
    async fn test_same_seed_is_deterministic() {
        let a = ScenarioRunner::new(7).run(ScenarioId::DdosSiege).await.unwrap();
        let b = ScenarioRunner::new(7).run(ScenarioId::DdosSiege).await.unwrap();

        assert_eq!(a.log, b.log);
        assert_eq!(a.stats, b.stats);
        assert_eq!(a.availability, b.availability);
    }

    #[tokio::test]
    async fn test_export_has_one_frame_per_tick() {
        let mut export = SimExport::new(ScenarioId::FlashSale.name(), 3);
        let result = ScenarioRunner::new(3)
            .with_duration(12)
            .run_with_export(ScenarioId::FlashSale, &mut export)
            .await
            .unwrap();

        assert_eq!(export.frames.len(), 12);
        assert_eq!(export.frames[0].tick, 1);
        assert_eq!(export.duration_sec, 12.0);
        assert_eq!(export.passed, result.passed);
        assert_eq!(export.frames[11].components.len(), 5);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let config = SimulationConfig {
            log_capacity: 0,
            ..SimulationConfig::default()
        };
        let err = ScenarioRunner::new(1)
            .with_config(config)
            .run(ScenarioId::TinyUrl)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Config(_)));

        let err = ScenarioRunner::new(1)
            .with_topology(Topology::new())
            .run(ScenarioId::TinyUrl)
            .await
            .unwrap_err();
        assert!(matches!(err, RunnerError::Topology(_)));
    }
}
