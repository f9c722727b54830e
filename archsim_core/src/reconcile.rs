//! Reconciliation Engine - merges memoryless oracle snapshots into a
//! continuously evolving simulation.
//!
//! # Per-tick pipeline (running)
//!
//! ```text
//!  EvaluationResult ──┬──► crash latch (oracle crash | RAM >= OOM threshold)
//!                     │
//!                     ├──► displayed load (0 unless active and not crashed)
//!                     │         │
//!                     │         ▼
//!                     │    autoscaling (target, warm-up timers)
//!                     │         │
//!                     │         ▼
//!                     ├──► ComponentView for every component
//!                     │
//!                     ├──► event deduplicator ──► bounded log
//!                     │
//!                     └──► retention filter, session stats, prune
//! ```
//!
//! The result object is only ever read. Everything that must survive to the
//! next tick lives in [`SimulationSession`].

use crate::adapter::AdapterError;
use crate::autoscaling::{effective_capacity, reconcile_replicas, ReplicaStatus, ScaleChange, ScalingPolicy};
use crate::config::SimulationConfig;
use crate::event_log::{ConditionSignals, EventDeduplicator, LogEntry, Severity};
use crate::state::{ComponentPhase, PersistentComponentState, SimulationSession};
use crate::topology::{Component, ComponentId, ComponentKind, ComponentProperties, Topology};
use archsim_env::EvaluationResult;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, error, info, warn};

/// Render-ready state of one component: static properties plus every
/// derived field, all recomputed each tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentView {
    pub id: ComponentId,
    pub name: String,
    pub kind: ComponentKind,
    pub properties: ComponentProperties,

    pub phase: ComponentPhase,
    pub active: bool,
    pub crashed: bool,

    pub load: f64,
    pub read_load: f64,
    pub write_load: f64,
    pub malicious_load: f64,

    pub effective_max_qps: f64,
    pub cpu_usage: f64,
    pub ram_usage: f64,
    pub backlog: u64,

    pub replicas: ReplicaStatus,
    pub load_per_replica: f64,
    pub overloaded: bool,
}

impl ComponentView {
    /// A view with every derived field at rest.
    fn idle(comp: &Component, state: Option<&PersistentComponentState>, tick: u64) -> Self {
        let crashed = state.map(|s| s.crashed).unwrap_or(false);
        let replicas = match ScalingPolicy::from_properties(&comp.properties) {
            Some(policy) => {
                let starts = state.map(|s| s.replica_start_times.as_slice()).unwrap_or(&[]);
                ReplicaStatus::at(starts, tick, policy.warmup_ticks)
            }
            None => ReplicaStatus::single(),
        };

        Self {
            id: comp.id.clone(),
            name: comp.name.clone(),
            kind: comp.kind.clone(),
            properties: comp.properties.clone(),
            phase: if crashed { ComponentPhase::Crashed } else { ComponentPhase::Idle },
            active: false,
            crashed,
            load: 0.0,
            read_load: 0.0,
            write_load: 0.0,
            malicious_load: 0.0,
            effective_max_qps: effective_capacity(&comp.kind, &comp.properties, &replicas),
            cpu_usage: 0.0,
            ram_usage: 0.0,
            backlog: 0,
            replicas,
            load_per_replica: 0.0,
            overloaded: false,
        }
    }

    /// Patches the view after a manual restart, ahead of the next tick.
    pub fn mark_restarted(&mut self) {
        self.crashed = false;
        self.active = false;
        self.phase = ComponentPhase::Idle;
        self.load = 0.0;
        self.read_load = 0.0;
        self.write_load = 0.0;
        self.malicious_load = 0.0;
        self.load_per_replica = 0.0;
        self.overloaded = false;
    }
}

/// What one advancing tick did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub tick: u64,
    pub views: Vec<ComponentView>,

    /// Log entries appended this tick, oldest first
    pub entries: Vec<LogEntry>,

    pub newly_crashed: Vec<ComponentId>,
    pub scale_changes: BTreeMap<ComponentId, ScaleChange>,

    pub total_score: f64,
    pub total_qps: f64,
    pub fulfilled_qps: f64,
    pub avg_latency_ms: f64,
    pub retention_rate: f64,
}

/// Applies oracle results to a [`SimulationSession`].
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    oom_threshold_pct: f64,
}

impl ReconciliationEngine {
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            oom_threshold_pct: config.oom_threshold_pct,
        }
    }

    /// RAM usage if at or above the OOM threshold.
    fn out_of_memory(&self, result: &EvaluationResult, id: &str) -> Option<f64> {
        result
            .component_ram_usage
            .get(id)
            .copied()
            .filter(|ram| *ram >= self.oom_threshold_pct)
    }

    /// Applies one successful evaluation and advances the tick.
    pub fn apply(
        &self,
        session: &mut SimulationSession,
        topology: &Topology,
        result: &EvaluationResult,
    ) -> TickReport {
        session.tick += 1;
        let tick = session.tick;
        let running = session.running;

        // 1. Latch crashes
        let mut newly_crashed = Vec::new();
        let mut out_of_memory = BTreeMap::new();
        for comp in &topology.components {
            let id = comp.id.as_str();
            let oom = self.out_of_memory(result, id);
            if let Some(ram) = oom {
                out_of_memory.insert(comp.id.clone(), ram);
            }

            if result.is_crashed(id) || oom.is_some() {
                let state = session.component_mut(&comp.id);
                if !state.crashed {
                    state.crashed = true;
                    newly_crashed.push(comp.id.clone());
                    warn!(component = %comp.id, tick, oom = oom.is_some(), "Component crashed");
                }
            }
        }

        // 2. Autoscale and build views
        let mut views = Vec::with_capacity(topology.components.len());
        let mut scale_changes = BTreeMap::new();
        let mut crashed = BTreeSet::new();

        for comp in &topology.components {
            let id = comp.id.as_str();
            let state = session.component_mut(&comp.id);
            let is_crashed = state.crashed;
            let active = running && !is_crashed && result.is_active(id);

            let reported = |map: &BTreeMap<String, f64>| -> f64 {
                if active {
                    map.get(id).copied().unwrap_or(0.0).max(0.0)
                } else {
                    0.0
                }
            };
            let load = reported(&result.component_loads);

            let replicas = match ScalingPolicy::from_properties(&comp.properties) {
                Some(policy) => {
                    let target = policy.target_replicas(load);
                    let change = reconcile_replicas(&mut state.replica_start_times, target, tick);
                    if !change.is_empty() {
                        debug!(
                            component = %comp.id,
                            target,
                            added = change.added,
                            removed = change.removed,
                            "Replica set reconciled"
                        );
                        scale_changes.insert(comp.id.clone(), change);
                    }
                    ReplicaStatus::at(&state.replica_start_times, tick, policy.warmup_ticks)
                }
                None => {
                    state.replica_start_times.clear();
                    ReplicaStatus::single()
                }
            };

            let local_capacity = effective_capacity(&comp.kind, &comp.properties, &replicas);
            let effective_max_qps = if running {
                result
                    .component_effective_max_qps
                    .get(id)
                    .copied()
                    .unwrap_or(local_capacity)
            } else {
                local_capacity
            };

            if is_crashed {
                crashed.insert(comp.id.clone());
            }

            views.push(ComponentView {
                id: comp.id.clone(),
                name: comp.name.clone(),
                kind: comp.kind.clone(),
                properties: comp.properties.clone(),
                phase: if is_crashed {
                    ComponentPhase::Crashed
                } else if active {
                    ComponentPhase::Active
                } else {
                    ComponentPhase::Idle
                },
                active,
                crashed: is_crashed,
                load,
                read_load: reported(&result.component_read_loads),
                write_load: reported(&result.component_write_loads),
                malicious_load: reported(&result.component_malicious_loads),
                effective_max_qps,
                cpu_usage: result.component_cpu_usage.get(id).copied().unwrap_or(0.0),
                ram_usage: result.component_ram_usage.get(id).copied().unwrap_or(0.0),
                backlog: result.component_backlogs.get(id).copied().unwrap_or(0),
                replicas,
                load_per_replica: replicas.load_per_serving_replica(load),
                overloaded: active && effective_max_qps > 0.0 && load > effective_max_qps,
            });
        }

        // 3. Edge-triggered log
        let ids = topology.ids();
        let names = topology.names();
        let signals = ConditionSignals {
            crashed,
            out_of_memory,
            attack_active: result.is_attack_active,
            random_drop: result.is_random_drop,
            replicas: result
                .component_replicas
                .iter()
                .filter(|(id, _)| ids.contains(id.as_str()))
                .map(|(id, n)| (ComponentId::new(id.as_str()), *n))
                .collect(),
            warnings: result.warnings.clone(),
        };
        let entries = EventDeduplicator::new(&mut session.latched, &mut session.previous_replicas, &names)
            .process(tick, &signals);
        session.log.extend(entries.iter().cloned());

        // 4. Retention, stats, pruning
        let retention_rate = session.retention.update(result.total_score);
        session
            .stats
            .record(result, topology.operational_cost_per_second());
        session.prune(&ids);

        debug!(
            tick,
            score = result.total_score,
            retention = retention_rate,
            entries = entries.len(),
            "Tick applied"
        );

        TickReport {
            tick,
            views,
            entries,
            newly_crashed,
            scale_changes,
            total_score: result.total_score,
            total_qps: result.total_qps,
            fulfilled_qps: result.fulfilled_qps,
            avg_latency_ms: result.avg_latency_ms,
            retention_rate,
        }
    }

    /// Derives views while paused. Reads the session, never writes it.
    pub fn preview(&self, session: &SimulationSession, topology: &Topology) -> Vec<ComponentView> {
        topology
            .components
            .iter()
            .map(|comp| ComponentView::idle(comp, session.component(comp.id.as_str()), session.tick))
            .collect()
    }

    /// Records a failed evaluation. Nothing but the log is touched.
    pub fn record_failure(&self, session: &mut SimulationSession, err: &AdapterError) -> Option<LogEntry> {
        let Some(severity) = err.severity() else {
            debug!(tick = session.tick, "Oracle not initialised; cycle skipped");
            return None;
        };

        match severity {
            Severity::Error => error!(tick = session.tick, error = %err, "Evaluation failed"),
            _ => warn!(tick = session.tick, error = %err, "Evaluation failed"),
        }

        let entry = LogEntry::new(session.tick, severity, format!("Evaluation failed: {}", err));
        session.log.push(entry.clone());
        Some(entry)
    }

    /// Clears a sticky crash and patches the matching view.
    pub fn restart(
        &self,
        session: &mut SimulationSession,
        views: &mut [ComponentView],
        id: &ComponentId,
    ) -> bool {
        if !session.restart(id) {
            return false;
        }

        let name = match views.iter_mut().find(|v| &v.id == id) {
            Some(view) => {
                view.mark_restarted();
                view.name.clone()
            }
            None => id.to_string(),
        };
        session.log_event(Severity::Success, format!("{} restarted", name));
        info!(component = %id, tick = session.tick, "Component restarted");
        true
    }
}

impl Default for ReconciliationEngine {
    fn default() -> Self {
        Self::new(&SimulationConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::Connection;
    use archsim_env::OracleError;
    use proptest::prelude::*;

    fn session() -> SimulationSession {
        let mut s = SimulationSession::with_design_id("d-1", "s1", &SimulationConfig::default());
        s.start();
        s
    }

    fn source_and_server() -> Topology {
        let mut topo = Topology::new();
        topo.add_component(
            Component::new("src", "Users", ComponentKind::TrafficSource).with_qps(1000.0),
        );
        topo.add_component(Component::new("server", "Server", ComponentKind::Server).with_max_qps(1000.0));
        topo.connect(Connection::new("src", "server"));
        topo
    }

    fn asg_topology() -> Topology {
        let mut topo = Topology::new();
        topo.add_component(
            Component::new("asg", "ASG", ComponentKind::AutoScalingGroup)
                .with_max_qps(1000.0)
                .with_autoscaling(70.0, 10, 5),
        );
        topo
    }

    fn active(ids: &[&str], loads: &[(&str, f64)], score: f64) -> EvaluationResult {
        EvaluationResult {
            total_score: score,
            active_component_ids: ids.iter().map(|s| s.to_string()).collect(),
            component_loads: loads.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
            ..Default::default()
        }
    }

    fn crashed(ids: &[&str]) -> EvaluationResult {
        EvaluationResult {
            crashed_component_ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn view<'a>(report: &'a TickReport, id: &str) -> &'a ComponentView {
        report.views.iter().find(|v| v.id.as_str() == id).unwrap()
    }

    #[test]
    fn test_scenario_a_crash_and_restart() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let topo = source_and_server();

        let t1 = engine.apply(&mut s, &topo, &active(&["server"], &[("server", 1000.0)], 100.0));
        let server = view(&t1, "server");
        assert!(server.active);
        assert!(!server.crashed);
        assert_eq!(server.load, 1000.0);
        assert_eq!(server.phase, ComponentPhase::Active);
        assert!(!server.overloaded);

        let mut t2 = engine.apply(&mut s, &topo, &crashed(&["server"]));
        let server = view(&t2, "server");
        assert!(server.crashed);
        assert_eq!(server.load, 0.0);
        assert_eq!(t2.newly_crashed, vec![ComponentId::from("server")]);
        assert_eq!(t2.entries.len(), 1);
        assert_eq!(t2.entries[0].severity, Severity::Error);

        assert!(engine.restart(&mut s, &mut t2.views, &ComponentId::from("server")));
        assert!(!view(&t2, "server").crashed);
        assert_eq!(s.log.latest().unwrap().severity, Severity::Success);

        let t3 = engine.apply(&mut s, &topo, &active(&["server"], &[("server", 1000.0)], 100.0));
        let server = view(&t3, "server");
        assert!(server.active);
        assert!(!server.crashed);
        assert_eq!(server.load, 1000.0);
        assert_eq!(s.component("server").unwrap().last_restart_tick, Some(2));
    }

    #[test]
    fn test_scenario_b_scale_out() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let topo = asg_topology();

        let report = engine.apply(&mut s, &topo, &active(&["asg"], &[("asg", 2500.0)], 90.0));

        assert_eq!(s.component("asg").unwrap().replica_start_times, vec![1, 1, 1]);
        assert_eq!(report.scale_changes[&ComponentId::from("asg")].added, 3);

        let asg = view(&report, "asg");
        assert_eq!(asg.replicas.total, 4);
        assert_eq!(asg.replicas.serving, 1);
        assert_eq!(asg.load_per_replica, 2500.0);
        assert_eq!(asg.effective_max_qps, 1000.0);
        assert!(asg.overloaded);

        // Still warming at tick 5, serving from tick 6
        for _ in 2..=5 {
            engine.apply(&mut s, &topo, &active(&["asg"], &[("asg", 2500.0)], 90.0));
        }
        let report = engine.apply(&mut s, &topo, &active(&["asg"], &[("asg", 2500.0)], 90.0));
        assert_eq!(report.tick, 6);
        let asg = view(&report, "asg");
        assert_eq!(asg.replicas.serving, 4);
        assert_eq!(asg.effective_max_qps, 4000.0);
        assert_eq!(asg.load_per_replica, 625.0);
        assert!(!asg.overloaded);
        assert_eq!(s.component("asg").unwrap().replica_start_times, vec![1, 1, 1]);
    }

    #[test]
    fn test_oracle_capacity_preferred_while_running() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let topo = asg_topology();

        let mut result = active(&["asg"], &[("asg", 100.0)], 100.0);
        result.component_effective_max_qps.insert("asg".into(), 2000.0);

        let report = engine.apply(&mut s, &topo, &result);
        assert_eq!(view(&report, "asg").effective_max_qps, 2000.0);
    }

    #[test]
    fn test_oom_latches_crash() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let topo = source_and_server();

        let mut result = active(&["server"], &[("server", 500.0)], 100.0);
        result.component_ram_usage.insert("server".into(), 100.0);

        let report = engine.apply(&mut s, &topo, &result);
        let server = view(&report, "server");
        assert!(server.crashed);
        assert_eq!(server.load, 0.0);
        assert_eq!(server.ram_usage, 100.0);
        // One crash entry plus one OOM entry
        assert_eq!(report.entries.len(), 2);
    }

    #[test]
    fn test_absent_component_is_inactive() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let topo = source_and_server();

        engine.apply(&mut s, &topo, &active(&["server"], &[("server", 800.0)], 100.0));
        let report = engine.apply(&mut s, &topo, &EvaluationResult::default());

        let server = view(&report, "server");
        assert!(!server.active);
        assert_eq!(server.load, 0.0);
        assert_eq!(server.phase, ComponentPhase::Idle);

        // Active but missing from the load map
        let report = engine.apply(&mut s, &topo, &active(&["server"], &[], 100.0));
        assert!(view(&report, "server").active);
        assert_eq!(view(&report, "server").load, 0.0);
    }

    #[test]
    fn test_failure_touches_only_the_log() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let topo = source_and_server();
        engine.apply(&mut s, &topo, &active(&["server"], &[("server", 800.0)], 50.0));

        let before = s.clone();
        let entry = engine
            .record_failure(&mut s, &AdapterError::MalformedResponse("eof".into()))
            .unwrap();

        assert_eq!(entry.severity, Severity::Error);
        assert_eq!(s.tick, before.tick);
        assert_eq!(s.retention_rate(), before.retention_rate());
        assert_eq!(s.components, before.components);
        assert_eq!(s.log.len(), before.log.len() + 1);

        let entry = engine
            .record_failure(&mut s, &AdapterError::Oracle(OracleError::transport("reset")))
            .unwrap();
        assert_eq!(entry.severity, Severity::Warning);

        assert!(engine.record_failure(&mut s, &AdapterError::OracleUnavailable).is_none());
        assert_eq!(s.log.len(), before.log.len() + 2);
    }

    #[test]
    fn test_preview_is_idempotent() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let topo = asg_topology();
        engine.apply(&mut s, &topo, &active(&["asg"], &[("asg", 2500.0)], 100.0));
        s.stop();

        let before = serde_json::to_string(&s).unwrap();
        let first = engine.preview(&s, &topo);
        let second = engine.preview(&s, &topo);

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
        assert_eq!(serde_json::to_string(&s).unwrap(), before);
        assert!(first.iter().all(|v| !v.active && v.load == 0.0));
        assert_eq!(first[0].replicas.total, 4);
    }

    #[test]
    fn test_paused_apply_shows_no_activity() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        s.stop();
        let topo = source_and_server();

        let report = engine.apply(&mut s, &topo, &active(&["server"], &[("server", 1000.0)], 100.0));
        assert!(!view(&report, "server").active);
        assert_eq!(view(&report, "server").load, 0.0);
    }

    #[test]
    fn test_deleted_component_state_pruned() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let mut topo = source_and_server();
        engine.apply(&mut s, &topo, &crashed(&["server"]));
        assert!(s.is_crashed("server"));

        topo.remove_component("server");
        engine.apply(&mut s, &topo, &EvaluationResult::default());

        assert!(s.component("server").is_none());
        assert!(!s.latched.contains("crash:server"));
        assert_eq!(s.log.len(), 1);
    }

    #[test]
    fn test_replica_logs_follow_oracle_counts() {
        let engine = ReconciliationEngine::default();
        let mut s = session();
        let topo = asg_topology();

        let mut result = active(&["asg"], &[("asg", 100.0)], 100.0);
        result.component_replicas.insert("asg".into(), 1);
        result.component_replicas.insert("ghost".into(), 9);
        assert!(engine.apply(&mut s, &topo, &result).entries.is_empty());

        result.component_replicas.insert("asg".into(), 2);
        let report = engine.apply(&mut s, &topo, &result);
        assert_eq!(report.entries.len(), 1);
        assert!(report.entries[0].message.contains("scaled up 1 -> 2"));
    }

    proptest! {
        #[test]
        fn prop_crash_sticky_until_restart(
            omitted in prop::collection::vec(any::<bool>(), 1..30),
        ) {
            let engine = ReconciliationEngine::default();
            let mut s = session();
            let topo = source_and_server();
            engine.apply(&mut s, &topo, &crashed(&["server"]));

            for report_active in omitted {
                let result = if report_active {
                    active(&["server"], &[("server", 10.0)], 100.0)
                } else {
                    EvaluationResult::default()
                };
                let report = engine.apply(&mut s, &topo, &result);
                let server = view(&report, "server");
                prop_assert!(server.crashed);
                prop_assert_eq!(server.load, 0.0);
                prop_assert!(report.entries.is_empty());
            }
        }
    }
}
