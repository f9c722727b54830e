//! Session-wide and per-component state that outlives a single oracle response.

use crate::config::SimulationConfig;
use crate::event_log::{ConditionLatch, EventLog, LogEntry, Severity};
use crate::retention::RetentionFilter;
use crate::topology::ComponentId;
use archsim_env::EvaluationResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};
use uuid::Uuid;

/// Revenue earned per fulfilled request.
pub const REVENUE_PER_REQUEST: f64 = 0.01;

/// Displayed lifecycle phase of a component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentPhase {
    Idle,
    Active,
    Crashed,
}

/// Per-component state that survives across ticks.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistentComponentState {
    /// Sticky; cleared only by an explicit restart
    pub crashed: bool,

    /// Start tick of every extra replica beyond the base instance, oldest first
    pub replica_start_times: Vec<u64>,

    pub last_restart_tick: Option<u64>,
}

/// Cumulative economics of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionStats {
    /// Requests fulfilled since the session started
    pub served_requests: f64,

    /// Revenue minus operational cost
    pub balance: f64,

    /// Total score of the last advancing tick
    pub system_health: f64,

    pub uptime_ticks: u64,
}

impl SessionStats {
    /// Accounts for one advancing tick (one simulated second).
    pub fn record(&mut self, result: &EvaluationResult, operational_cost: f64) {
        let fulfilled = result.fulfilled_qps.max(0.0);
        self.served_requests += fulfilled;
        self.balance += fulfilled * REVENUE_PER_REQUEST - operational_cost;
        self.system_health = result.total_score;
        self.uptime_ticks += 1;
    }
}

/// Identifies the cycle an oracle call was started for.
///
/// A result is applied only if both fields still match the session when it
/// returns; `start`, `stop`, `reset` and a successful restart bump the
/// generation, an applied tick bumps the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TickTicket {
    pub tick: u64,
    pub generation: u64,
}

/// Global per-run state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationSession {
    pub design_id: String,
    pub scenario_id: String,

    /// Number of advancing ticks applied so far
    pub tick: u64,
    pub running: bool,

    /// Invalidates in-flight cycles on stop/reset
    pub generation: u64,

    pub retention: RetentionFilter,
    pub latched: ConditionLatch,
    pub log: EventLog,

    /// Persistent state keyed by component id
    pub components: BTreeMap<ComponentId, PersistentComponentState>,

    /// Oracle replica counts seen on the previous advancing tick
    pub previous_replicas: BTreeMap<ComponentId, u32>,

    pub stats: SessionStats,
}

impl SimulationSession {
    /// Creates a paused session with a fresh design id.
    pub fn new(scenario_id: &str, config: &SimulationConfig) -> Self {
        Self::with_design_id(&Uuid::new_v4().to_string(), scenario_id, config)
    }

    /// Creates a paused session bound to an existing design id.
    pub fn with_design_id(design_id: &str, scenario_id: &str, config: &SimulationConfig) -> Self {
        Self {
            design_id: design_id.to_string(),
            scenario_id: scenario_id.to_string(),
            tick: 0,
            running: false,
            generation: 0,
            retention: RetentionFilter::new(config.retention.clone()),
            latched: ConditionLatch::new(),
            log: EventLog::new(config.log_capacity),
            components: BTreeMap::new(),
            previous_replicas: BTreeMap::new(),
            stats: SessionStats::default(),
        }
    }

    /// Ticket for a cycle starting now.
    pub fn ticket(&self) -> TickTicket {
        TickTicket {
            tick: self.tick,
            generation: self.generation,
        }
    }

    /// Whether a result captured under `ticket` may still be applied.
    pub fn accepts(&self, ticket: TickTicket) -> bool {
        self.tick == ticket.tick && self.generation == ticket.generation
    }

    pub fn retention_rate(&self) -> f64 {
        self.retention.rate()
    }

    /// Appends to the event log.
    pub fn log_event(&mut self, severity: Severity, message: impl Into<String>) {
        self.log.push(LogEntry::new(self.tick, severity, message));
    }

    /// Resumes the run. A paused cycle still in flight becomes stale.
    pub fn start(&mut self) {
        if !self.running {
            self.running = true;
            self.generation += 1;
            info!(design = %self.design_id, tick = self.tick, "Simulation started");
        }
    }

    /// Pauses the run and invalidates any cycle in flight.
    pub fn stop(&mut self) {
        self.running = false;
        self.generation += 1;
        info!(design = %self.design_id, tick = self.tick, "Simulation stopped");
    }

    /// Returns to the initial state, keeping the design and scenario ids.
    pub fn reset(&mut self) {
        self.running = false;
        self.generation += 1;
        self.tick = 0;
        self.retention.reset();
        self.latched.clear();
        self.log.clear();
        self.components.clear();
        self.previous_replicas.clear();
        self.stats = SessionStats::default();
        info!(design = %self.design_id, generation = self.generation, "Simulation reset");
    }

    /// Persistent state of a component, if any has been recorded.
    pub fn component(&self, id: &str) -> Option<&PersistentComponentState> {
        self.components.get(id)
    }

    /// Persistent state of a component, created on first use.
    pub fn component_mut(&mut self, id: &ComponentId) -> &mut PersistentComponentState {
        self.components.entry(id.clone()).or_default()
    }

    pub fn is_crashed(&self, id: &str) -> bool {
        self.components.get(id).map(|s| s.crashed).unwrap_or(false)
    }

    /// Ids of every component currently latched as crashed.
    pub fn crashed_ids(&self) -> BTreeSet<ComponentId> {
        self.components
            .iter()
            .filter(|(_, s)| s.crashed)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Clears a sticky crash. Returns false if the component was not crashed.
    ///
    /// A cycle in flight was evaluated with the crash still set, so its
    /// result is made stale.
    pub fn restart(&mut self, id: &ComponentId) -> bool {
        let tick = self.tick;
        let Some(state) = self.components.get_mut(id).filter(|s| s.crashed) else {
            return false;
        };

        state.crashed = false;
        state.last_restart_tick = Some(tick);
        self.latched.release(&ConditionLatch::crash_key(id));
        self.generation += 1;
        debug!(component = %id, tick, generation = self.generation, "Crash cleared by restart");
        true
    }

    /// Drops state of components no longer in the topology. Log entries stay.
    pub fn prune(&mut self, ids: &BTreeSet<ComponentId>) {
        let before = self.components.len();
        self.components.retain(|id, _| ids.contains(id));
        self.previous_replicas.retain(|id, _| ids.contains(id));
        self.latched.retain_components(ids);

        let removed = before - self.components.len();
        if removed > 0 {
            debug!(removed, "Pruned state of deleted components");
        }
    }
}
