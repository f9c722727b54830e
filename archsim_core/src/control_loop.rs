//! Control Loop - drives the reconciliation engine from a fixed-period timer.
//!
//! This module is the integration layer between the pure reconciliation
//! logic and the environment abstraction (clock, task spawning, oracle).
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                   SimulationController                       │
//! │                                                              │
//! │  timer ──► begin_tick ──► adapter.evaluate ──► complete_tick │
//! │              │  (snapshot,        (await, no lock     │      │
//! │              │   ticket,           held)              │      │
//! │              │   in-flight guard)                     ▼      │
//! │              │                          ticket still valid?  │
//! │              ▼                           yes: apply/preview  │
//! │     cycle in flight? ──► Skipped         no:  Stale          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The session mutex is never held across an `.await`. Overlapping cycles
//! are refused through the in-flight flag, and results that return after a
//! stop, start, reset or restart are dropped through the [`TickTicket`].
//!
//! # Usage
//!
//! ```ignore
//! use archsim_core::control_loop::SimulationController;
//! use archsim_env::TokioContext;
//!
//! let controller = Arc::new(SimulationController::new(
//!     TokioContext::shared(), oracle, topology, "s1", SimulationConfig::default(),
//! )?);
//! controller.start();
//! let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
//! controller.spawn_loop(stop_rx);
//! ```

use crate::adapter::{AdapterError, EvaluationClient, EvaluationRequest};
use crate::config::{ConfigError, SimulationConfig};
use crate::event_log::LogEntry;
use crate::reconcile::{ComponentView, ReconciliationEngine, TickReport};
use crate::state::{SimulationSession, TickTicket};
use crate::topology::{ComponentId, Topology};
use archsim_env::{EvaluationResult, SandboxContext, ScenarioSummary, ScoringOracle};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, trace, warn};

/// What a call to [`SimulationController::tick`] did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// A running tick was applied
    Advanced(Box<TickReport>),

    /// Paused: views refreshed, nothing advanced
    Previewed { total_score: f64 },

    /// Another cycle was still in flight
    Skipped,

    /// The result arrived after a stop, start or reset and was dropped
    Stale,

    /// The oracle is not initialised yet
    Unavailable,

    /// The evaluation failed; one log entry was written
    Failed(AdapterError),
}

impl TickOutcome {
    pub fn is_advanced(&self) -> bool {
        matches!(self, TickOutcome::Advanced(_))
    }
}

struct ControllerState {
    session: SimulationSession,
    views: Vec<ComponentView>,
    in_flight: bool,
}

/// Clears the in-flight flag when the cycle ends, even if it is cancelled.
struct InFlight<'a> {
    state: &'a Mutex<ControllerState>,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .in_flight = false;
    }
}

/// Owns one simulation session and drives it against an oracle.
///
/// Generic over the context and oracle implementations, so the same loop
/// runs under tokio in production and under a virtual clock in simulation.
pub struct SimulationController<Ctx, O>
where
    Ctx: SandboxContext,
    O: ScoringOracle,
{
    context: Arc<Ctx>,
    client: EvaluationClient<O>,
    engine: ReconciliationEngine,
    config: SimulationConfig,

    /// Edited by the external editor between ticks
    topology: Arc<RwLock<Topology>>,

    state: Mutex<ControllerState>,
}

impl<Ctx, O> SimulationController<Ctx, O>
where
    Ctx: SandboxContext,
    O: ScoringOracle,
{
    /// Creates a paused controller with a fresh design id.
    pub fn new(
        context: Arc<Ctx>,
        oracle: Arc<O>,
        topology: Arc<RwLock<Topology>>,
        scenario_id: &str,
        config: SimulationConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let session = SimulationSession::new(scenario_id, &config);
        Self::with_session(context, oracle, topology, session, config)
    }

    /// Creates a controller around an existing session.
    pub fn with_session(
        context: Arc<Ctx>,
        oracle: Arc<O>,
        topology: Arc<RwLock<Topology>>,
        session: SimulationSession,
        config: SimulationConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = ReconciliationEngine::new(&config);
        let views = {
            let snapshot = topology.read().unwrap_or_else(PoisonError::into_inner);
            engine.preview(&session, &snapshot)
        };

        Ok(Self {
            context,
            client: EvaluationClient::new(oracle),
            engine,
            config,
            topology,
            state: Mutex::new(ControllerState {
                session,
                views,
                in_flight: false,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copy-on-read snapshot of the shared topology.
    fn snapshot(&self) -> Topology {
        self.topology
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handle the editor uses to mutate the topology.
    pub fn topology(&self) -> Arc<RwLock<Topology>> {
        Arc::clone(&self.topology)
    }

    pub fn context(&self) -> &Arc<Ctx> {
        &self.context
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.lock().session.running
    }

    pub fn current_tick(&self) -> u64 {
        self.lock().session.tick
    }

    pub fn retention_rate(&self) -> f64 {
        self.lock().session.retention_rate()
    }

    /// Render-ready views from the last applied or previewed cycle.
    pub fn views(&self) -> Vec<ComponentView> {
        self.lock().views.clone()
    }

    /// Event log, oldest first.
    pub fn log(&self) -> Vec<LogEntry> {
        self.lock().session.log.iter().cloned().collect()
    }

    /// A copy of the whole session.
    pub fn session_snapshot(&self) -> SimulationSession {
        self.lock().session.clone()
    }

    pub fn start(&self) {
        self.lock().session.start();
    }

    /// Halts ticking; a cycle already in flight will come back stale.
    pub fn stop(&self) {
        self.lock().session.stop();
    }

    /// Returns the session to its initial state.
    pub fn reset(&self) {
        let snapshot = self.snapshot();
        let mut state = self.lock();
        state.session.reset();
        state.views = self.engine.preview(&state.session, &snapshot);
    }

    /// Clears a sticky crash locally, then tells the oracle.
    ///
    /// Returns false if the component was not crashed. A cycle in flight
    /// comes back stale. The oracle call is
    /// best-effort; a failure there does not undo the local restart.
    pub async fn restart(&self, id: &ComponentId) -> bool {
        let restarted = {
            let mut guard = self.lock();
            let state = &mut *guard;
            self.engine.restart(&mut state.session, &mut state.views, id)
        };
        if !restarted {
            return false;
        }

        match self.client.restart(id).await {
            Ok(()) => {}
            Err(AdapterError::OracleUnavailable) => {
                debug!(component = %id, "Oracle not initialised; restart kept local")
            }
            Err(err) => warn!(component = %id, error = %err, "Oracle restart failed"),
        }
        true
    }

    /// Scenarios offered by the oracle.
    pub async fn list_scenarios(&self) -> Result<Vec<ScenarioSummary>, AdapterError> {
        self.client.list_scenarios().await
    }

    /// Claims the cycle and captures everything the oracle call needs.
    fn begin_tick(&self) -> Option<(TickTicket, EvaluationRequest, InFlight<'_>)> {
        let topology = self.snapshot();
        let mut state = self.lock();
        if state.in_flight {
            return None;
        }
        state.in_flight = true;

        for warning in topology.structural_warnings() {
            debug!(%warning, "Structural warning");
        }

        let session = &state.session;
        let ticket = session.ticket();
        let request = EvaluationRequest {
            design_id: session.design_id.clone(),
            scenario_id: session.scenario_id.clone(),
            topology,
            crashed: session.crashed_ids(),
            retention_rate: session.retention_rate(),
            tick: if session.running { session.tick + 1 } else { session.tick },
        };

        Some((ticket, request, InFlight { state: &self.state }))
    }

    /// Applies (or drops) the result of a cycle started with `ticket`.
    fn complete_tick(
        &self,
        ticket: TickTicket,
        snapshot: &Topology,
        result: Result<EvaluationResult, AdapterError>,
    ) -> TickOutcome {
        let mut guard = self.lock();
        let state = &mut *guard;

        if !state.session.accepts(ticket) {
            debug!(
                ticket_tick = ticket.tick,
                ticket_generation = ticket.generation,
                generation = state.session.generation,
                "Dropping stale result"
            );
            return TickOutcome::Stale;
        }

        match result {
            Err(err) => {
                self.engine.record_failure(&mut state.session, &err);
                match err {
                    AdapterError::OracleUnavailable => TickOutcome::Unavailable,
                    other => TickOutcome::Failed(other),
                }
            }
            Ok(result) if state.session.running => {
                let report = self.engine.apply(&mut state.session, snapshot, &result);
                state.views = report.views.clone();
                TickOutcome::Advanced(Box::new(report))
            }
            Ok(result) => {
                // apply prunes while running; paused edits are caught here
                state.session.prune(&snapshot.ids());
                state.views = self.engine.preview(&state.session, snapshot);
                TickOutcome::Previewed {
                    total_score: result.total_score,
                }
            }
        }
    }

    /// Runs one reconciliation cycle.
    pub async fn tick(&self) -> TickOutcome {
        let Some((ticket, request, _in_flight)) = self.begin_tick() else {
            debug!("Previous cycle still in flight; skipping");
            return TickOutcome::Skipped;
        };

        let result = self.client.evaluate(&request).await;
        self.complete_tick(ticket, &request.topology, result)
    }

    /// Fires a cycle every tick interval while running, until `stop` is set.
    ///
    /// Each cycle runs as its own task so the timer keeps its period; a cycle
    /// that overruns makes the next firing come back as `Skipped`.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let period = self.config.tick_interval();
        info!(period_ms = period.as_millis() as u64, "Tick loop started");

        loop {
            if *stop.borrow() {
                break;
            }

            tokio::select! {
                _ = self.context.sleep(period) => {}
                changed = stop.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }

            if !self.is_running() {
                continue;
            }

            let this = Arc::clone(&self);
            self.context.spawn("archsim-tick", async move {
                let outcome = this.tick().await;
                trace!(?outcome, "Cycle finished");
            });
        }

        info!("Tick loop stopped");
    }

    /// Spawns [`run`](Self::run) on the context.
    pub fn spawn_loop(self: &Arc<Self>, stop: watch::Receiver<bool>) {
        let this = Arc::clone(self);
        self.context.spawn("archsim-loop", this.run(stop));
    }
}
