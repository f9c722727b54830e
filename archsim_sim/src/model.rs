//! Reference scoring oracle.
//!
//! `ModelOracle` is a deterministic, stateless-per-call traffic model that
//! speaks the same JSON contract as the production scoring engine:
//! - Offered load comes from the scenario's traffic phases
//! - Load is pushed through the design in topological order
//! - Per-component utilisation drives CPU, RAM, latency and crashes
//! - Availability is the fraction of demand the compute and storage tiers absorb
//!
//! The only state kept between calls is the saved designs (and which
//! warnings were already reported for each of them).

use crate::scenarios::{Scenario, ScenarioId, TrafficPhase};
use archsim_core::{
    Component, ComponentId, ComponentKind, ComponentProperties, Connection, ScalingPolicy,
    Topology, TrafficClass,
};
use archsim_env::{
    DesignPayload, DimensionScore, EvaluationResult, OracleError, ScenarioSummary, ScoringOracle,
};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::{debug, trace};

/// A component crashes once its load exceeds this multiple of its capacity.
pub const CRASH_OVERLOAD_FACTOR: f64 = 1.5;

/// Fraction of reads a cache lets through to whatever sits behind it.
pub const CACHE_MISS_RATIO: f64 = 0.2;

/// Fraction of malicious traffic an API gateway lets through.
pub const GATEWAY_LEAK_RATIO: f64 = 0.1;

/// Storage capacity multiplier while a cache is active.
pub const CACHE_STORAGE_BOOST: f64 = 5.0;

/// Latency of an uncongested request path.
pub const BASE_LATENCY_MS: f64 = 50.0;

pub const MAX_LATENCY_MS: f64 = 2_000.0;

/// Results are stamped as if virtual tick 0 happened at 2024-01-01 00:00:00 UTC.
const EPOCH_SECS: i64 = 1_704_067_200;

/// Per-tick RNG stream separator.
const TICK_MIX: u64 = 0x9E37_79B9_7F4A_7C15;

// ============================================================================
// TRAFFIC FLOW
// ============================================================================

/// Request rates split by class.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Flow {
    read: f64,
    write: f64,
    malicious: f64,
}

impl Flow {
    fn total(&self) -> f64 {
        self.read + self.write + self.malicious
    }

    fn scaled(&self, factor: f64) -> Self {
        Self {
            read: self.read * factor,
            write: self.write * factor,
            malicious: self.malicious * factor,
        }
    }

    fn add(&mut self, other: Flow) {
        self.read += other.read;
        self.write += other.write;
        self.malicious += other.malicious;
    }

    /// The part of the flow a connection of the given class carries.
    ///
    /// Malicious requests look like reads.
    fn carried_by(&self, class: TrafficClass) -> Self {
        match class {
            TrafficClass::All => *self,
            TrafficClass::Read => Self {
                read: self.read,
                write: 0.0,
                malicious: self.malicious,
            },
            TrafficClass::Write => Self {
                read: 0.0,
                write: self.write,
                malicious: 0.0,
            },
        }
    }
}

/// Congestion multiplier applied to the base latency at utilisation `u`.
pub fn congestion_factor(u: f64) -> f64 {
    if u <= 0.8 {
        1.0
    } else if u >= 1.09 {
        40.0
    } else {
        1.0 / (1.1 - u)
    }
}

/// Capacity of a component under `load`, plus its replica count if it scales.
fn effective_capacity(comp: &Component, load: f64) -> (f64, Option<u32>) {
    let per_node = comp.properties.capacity();

    if comp.kind.is_elastic_compute() {
        if let Some(policy) = ScalingPolicy::from_properties(&comp.properties) {
            let replicas = policy.target_replicas(load);
            return (per_node * replicas as f64, Some(replicas));
        }
    }
    if comp.kind.is_replicated_storage() {
        return (per_node * (1 + comp.properties.secondaries()) as f64, None);
    }
    (per_node, None)
}

/// Kahn's algorithm over the valid edges. Nodes left over by a cycle are
/// appended in id order.
fn topological_order(topo: &Topology, edges: &[&Connection]) -> Vec<ComponentId> {
    let mut indegree: BTreeMap<&ComponentId, usize> =
        topo.components.iter().map(|c| (&c.id, 0)).collect();
    for edge in edges {
        if let Some(d) = indegree.get_mut(&edge.to) {
            *d += 1;
        }
    }

    let mut ready: BTreeSet<&ComponentId> = indegree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(indegree.len());
    let mut placed = BTreeSet::new();

    while let Some(id) = ready.pop_first() {
        order.push(id.clone());
        placed.insert(id);
        for edge in edges.iter().filter(|e| &e.from == id) {
            if let Some(d) = indegree.get_mut(&edge.to) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(&edge.to);
                }
            }
        }
    }

    for id in indegree.keys() {
        if !placed.contains(id) {
            order.push((*id).clone());
        }
    }
    order
}

// ============================================================================
// DESIGN DECODING
// ============================================================================

/// Rebuilds a typed topology from a saved payload, along with the
/// components the caller flagged as crashed.
fn decode_design(payload: &DesignPayload) -> Result<(Topology, BTreeSet<ComponentId>), OracleError> {
    let mut topo = Topology::new();
    let mut crashed = BTreeSet::new();

    for wire in &payload.components {
        let properties: ComponentProperties =
            serde_json::from_value(Value::Object(wire.properties.clone())).map_err(|e| {
                OracleError::rejected(format!("properties of {}: {}", wire.id, e))
            })?;
        if wire.flag("crashed") {
            crashed.insert(ComponentId::new(wire.id.as_str()));
        }
        topo.components.push(Component {
            id: ComponentId::new(wire.id.as_str()),
            name: wire.name.clone(),
            kind: ComponentKind::from_wire(&wire.kind),
            setup_cost: wire.setup_cost,
            operational_cost: wire.operational_cost,
            properties,
        });
    }

    for wire in &payload.connections {
        let traffic = match wire.traffic_type.to_ascii_lowercase().as_str() {
            "read" => TrafficClass::Read,
            "write" => TrafficClass::Write,
            _ => TrafficClass::All,
        };
        topo.connect(Connection {
            from: ComponentId::new(wire.from_id.as_str()),
            to: ComponentId::new(wire.to_id.as_str()),
            traffic,
            protocol: wire.protocol.clone(),
        });
    }

    Ok((topo, crashed))
}

// ============================================================================
// SINGLE EVALUATION
// ============================================================================

/// Inputs of one evaluation.
struct Evaluation<'a> {
    scenario: &'a Scenario,
    topology: &'a Topology,
    crashed: &'a BTreeSet<ComponentId>,
    retention_rate: f64,
    tick: u64,
}

impl Evaluation<'_> {
    fn run(&self, rng: &mut ChaCha8Rng) -> EvaluationResult {
        let mut result = EvaluationResult {
            created_at: EPOCH_SECS + self.tick as i64,
            ..EvaluationResult::default()
        };

        let Some((phase, phase_qps)) = self.scenario.traffic_at(self.tick) else {
            return result;
        };
        result.is_burst_active = phase.burst_factor > 1.0;
        result.is_attack_active = phase.attack_qps > 0.0;

        let edges: Vec<&Connection> = self
            .topology
            .connections
            .iter()
            .filter(|c| {
                c.from != c.to
                    && self.topology.component(c.from.as_str()).is_some()
                    && self.topology.component(c.to.as_str()).is_some()
            })
            .collect();

        let mut inflow: BTreeMap<ComponentId, Flow> = BTreeMap::new();
        let mut reached: BTreeSet<ComponentId> = BTreeSet::new();
        let mut legit_offered = 0.0;
        let mut malicious_offered = 0.0;

        for source in self
            .topology
            .components
            .iter()
            .filter(|c| c.kind == ComponentKind::TrafficSource)
        {
            let flow = self.offered(source, phase, phase_qps);
            legit_offered += flow.read + flow.write;
            malicious_offered += flow.malicious;
            result.total_read_qps += flow.read;
            result.total_write_qps += flow.write;
            inflow.entry(source.id.clone()).or_default().add(flow);
            reached.insert(source.id.clone());
        }
        result.total_qps = legit_offered + malicious_offered;

        let noise = Normal::new(0.0, 2.0).ok();
        let mut worst_congestion: f64 = 1.0;
        let mut capacities: BTreeMap<ComponentId, f64> = BTreeMap::new();

        for id in topological_order(self.topology, &edges) {
            let Some(comp) = self.topology.component(id.as_str()) else {
                continue;
            };
            if self.crashed.contains(&id) {
                result.crashed_component_ids.push(id.to_string());
                continue;
            }
            if !reached.contains(&id) {
                continue;
            }

            let flow = inflow.get(&id).copied().unwrap_or_default();
            let load = flow.total();
            let (capacity, replicas) = effective_capacity(comp, load);

            if comp.kind != ComponentKind::TrafficSource {
                result.component_loads.insert(id.to_string(), load);
                result.component_read_loads.insert(id.to_string(), flow.read);
                result.component_write_loads.insert(id.to_string(), flow.write);
                result
                    .component_malicious_loads
                    .insert(id.to_string(), flow.malicious);
            }

            if capacity > 0.0 && load > CRASH_OVERLOAD_FACTOR * capacity {
                trace!(component = %id, load, capacity, "Component overloaded past crash point");
                result.crashed_component_ids.push(id.to_string());
                continue;
            }

            result.active_component_ids.push(id.to_string());
            if capacity > 0.0 {
                let u = load / capacity;
                let jitter = noise.as_ref().map_or(0.0, |n| n.sample(rng));
                result
                    .component_cpu_usage
                    .insert(id.to_string(), (u * 100.0).min(100.0));
                result
                    .component_ram_usage
                    .insert(id.to_string(), (25.0 + 50.0 * u + jitter).clamp(0.0, 100.0));
                result
                    .component_effective_max_qps
                    .insert(id.to_string(), capacity);
                worst_congestion = worst_congestion.max(congestion_factor(u));
                capacities.insert(id.clone(), capacity);
            }
            if let Some(n) = replicas {
                result.component_replicas.insert(id.to_string(), n);
            }

            let output = match comp.kind {
                ComponentKind::Cache => Flow {
                    read: flow.read * CACHE_MISS_RATIO,
                    ..flow
                },
                ComponentKind::Gateway => Flow {
                    malicious: flow.malicious * GATEWAY_LEAK_RATIO,
                    ..flow
                },
                ComponentKind::Queue if capacity > 0.0 && load > capacity => {
                    result
                        .component_backlogs
                        .insert(id.to_string(), (load - capacity).round() as u64);
                    flow.scaled(capacity / load)
                }
                _ => flow,
            };

            let outbound: Vec<&&Connection> = edges.iter().filter(|e| e.from == id).collect();
            let elastic_children = outbound
                .iter()
                .filter(|e| {
                    self.topology
                        .component(e.to.as_str())
                        .is_some_and(|c| c.kind.is_elastic_compute())
                })
                .count();

            for edge in outbound {
                let Some(child) = self.topology.component(edge.to.as_str()) else {
                    continue;
                };
                let mut share = output.carried_by(edge.traffic);
                if child.kind.is_elastic_compute() && elastic_children > 1 {
                    share = share.scaled(1.0 / elastic_children as f64);
                }
                inflow.entry(edge.to.clone()).or_default().add(share);
                reached.insert(edge.to.clone());
            }
        }

        self.score(&mut result, &inflow, &capacities, legit_offered, phase, rng, worst_congestion);
        result
    }

    /// Load one traffic source offers this tick.
    fn offered(&self, source: &Component, phase: &TrafficPhase, phase_qps: f64) -> Flow {
        let base = source.properties.qps.unwrap_or(phase_qps);
        let legit = (base * self.retention_rate * phase.burst_factor).max(0.0);
        let read = legit * self.scenario.read_ratio;

        Flow {
            read,
            write: legit - read,
            malicious: phase.attack_qps,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn score(
        &self,
        result: &mut EvaluationResult,
        inflow: &BTreeMap<ComponentId, Flow>,
        capacities: &BTreeMap<ComponentId, f64>,
        legit_offered: f64,
        phase: &TrafficPhase,
        rng: &mut ChaCha8Rng,
        worst_congestion: f64,
    ) {
        let active_ids: BTreeSet<String> = result.active_component_ids.iter().cloned().collect();
        let active = &active_ids;
        let active_of = |pred: fn(&ComponentKind) -> bool| {
            self.topology
                .components
                .iter()
                .filter(move |c| pred(&c.kind) && active.contains(c.id.as_str()))
        };

        let compute: f64 = active_of(ComponentKind::is_elastic_compute)
            .map(|c| capacities.get(&c.id).copied().unwrap_or(0.0))
            .sum();
        let compute_servers = active_of(ComponentKind::is_elastic_compute).count();
        let malicious_at_compute: f64 = active_of(ComponentKind::is_elastic_compute)
            .map(|c| inflow.get(&c.id).map_or(0.0, |f| f.malicious))
            .sum();

        let has_storage = self
            .topology
            .components
            .iter()
            .any(|c| c.kind.is_replicated_storage());
        let cache_active = active_of(|k| *k == ComponentKind::Cache).next().is_some();
        let mut storage: f64 = active_of(ComponentKind::is_replicated_storage)
            .map(|c| capacities.get(&c.id).copied().unwrap_or(0.0))
            .sum();
        if cache_active {
            storage *= CACHE_STORAGE_BOOST;
        }

        let capacity = if compute_servers == 0 {
            0.0
        } else if has_storage {
            compute.min(storage)
        } else {
            compute
        };

        let has_source = self
            .topology
            .components
            .iter()
            .any(|c| c.kind == ComponentKind::TrafficSource);
        let demand = legit_offered + malicious_at_compute;
        let mut error = if !has_source {
            1.0
        } else if demand > 0.0 {
            ((demand - capacity).max(0.0) / demand).min(1.0)
        } else {
            0.0
        };

        if phase.random_drop > 0.0 {
            let drop = rng.gen_range(0.0..phase.random_drop);
            result.is_random_drop = true;
            error = 1.0 - (1.0 - error) * (1.0 - drop);
        }

        let health = (1.0 - error) * 100.0;
        let latency = (BASE_LATENCY_MS * worst_congestion).min(MAX_LATENCY_MS);

        result.total_score = health;
        result.fulfilled_qps = legit_offered * (1.0 - error);
        result.avg_latency_ms = latency;
        result.scores = vec![
            DimensionScore {
                dimension: "Topology".to_string(),
                value: (compute_servers as f64 * 10.0).min(100.0),
                comment: format!("{} active compute components", compute_servers),
            },
            DimensionScore {
                dimension: "Capacity".to_string(),
                value: health,
                comment: format!("{:.0} of {:.0} QPS absorbed", demand.min(capacity), demand),
            },
            DimensionScore {
                dimension: "Performance".to_string(),
                value: (100.0 - (latency - BASE_LATENCY_MS) / 5.0).max(0.0),
                comment: format!("average latency {:.1} ms", latency),
            },
        ];
    }
}

/// Diagnostics reported in `warnings`.
fn design_warnings(topo: &Topology) -> BTreeSet<String> {
    let mut warnings: BTreeSet<String> = topo
        .structural_warnings()
        .iter()
        .map(ToString::to_string)
        .collect();
    if !topo
        .components
        .iter()
        .any(|c| c.kind == ComponentKind::TrafficSource)
    {
        warnings.insert("design has no traffic source".to_string());
    }
    warnings
}

/// 64-bit FNV-1a, used to give every design its own RNG stream.
fn fnv1a(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

// ============================================================================
// ORACLE
// ============================================================================

struct StoredDesign {
    payload: DesignPayload,

    /// Warnings already reported for this design
    reported_warnings: BTreeSet<String>,
}

/// Deterministic in-process scoring oracle.
pub struct ModelOracle {
    seed: u64,
    ready: AtomicBool,
    designs: Mutex<BTreeMap<String, StoredDesign>>,
}

impl ModelOracle {
    /// Creates an oracle that is ready to serve.
    pub fn new(seed: u64) -> Self {
        let oracle = Self::uninitialised(seed);
        oracle.initialise();
        oracle
    }

    /// Creates an oracle that reports `Unavailable` until [`Self::initialise`].
    pub fn uninitialised(seed: u64) -> Self {
        Self {
            seed,
            ready: AtomicBool::new(false),
            designs: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn initialise(&self) {
        self.ready.store(true, Ordering::SeqCst);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Number of designs saved so far.
    pub fn design_count(&self) -> usize {
        self.designs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Summaries of every built-in scenario.
    pub fn scenario_summaries() -> Vec<ScenarioSummary> {
        ScenarioId::all()
            .iter()
            .map(|id| id.scenario().summary())
            .collect()
    }

    fn ensure_ready(&self) -> Result<(), OracleError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OracleError::Unavailable)
        }
    }

    fn rng_for(&self, design_id: &str, tick: u64) -> ChaCha8Rng {
        ChaCha8Rng::seed_from_u64(self.seed ^ tick.wrapping_mul(TICK_MIX) ^ fnv1a(design_id))
    }
}

#[async_trait]
impl ScoringOracle for ModelOracle {
    async fn save_design(&self, design_json: &str) -> Result<(), OracleError> {
        self.ensure_ready()?;
        let payload: DesignPayload = serde_json::from_str(design_json)
            .map_err(|e| OracleError::rejected(format!("invalid design: {}", e)))?;

        let mut designs = self.designs.lock().unwrap_or_else(PoisonError::into_inner);
        match designs.get_mut(&payload.id) {
            Some(stored) => stored.payload = payload,
            None => {
                trace!(design = %payload.id, "Design saved");
                designs.insert(
                    payload.id.clone(),
                    StoredDesign {
                        payload,
                        reported_warnings: BTreeSet::new(),
                    },
                );
            }
        }
        Ok(())
    }

    async fn evaluate(&self, design_id: &str, tick: u64) -> Result<String, OracleError> {
        self.ensure_ready()?;
        let payload = self
            .designs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(design_id)
            .map(|stored| stored.payload.clone())
            .ok_or_else(|| OracleError::UnknownDesign(design_id.to_string()))?;

        let scenario = payload
            .scenario_id
            .parse::<ScenarioId>()
            .map_err(|_| OracleError::UnknownScenario(payload.scenario_id.clone()))?
            .scenario();
        let (topology, crashed) = decode_design(&payload)?;

        let mut rng = self.rng_for(design_id, tick);
        let mut result = Evaluation {
            scenario: &scenario,
            topology: &topology,
            crashed: &crashed,
            retention_rate: payload.properties.retention_rate,
            tick,
        }
        .run(&mut rng);

        let current = design_warnings(&topology);
        if let Some(stored) = self
            .designs
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(design_id)
        {
            result.warnings = current
                .difference(&stored.reported_warnings)
                .cloned()
                .collect();
            stored.reported_warnings = current;
        }

        debug!(
            design = design_id,
            tick,
            score = result.total_score,
            crashed = result.crashed_component_ids.len(),
            "Design evaluated"
        );
        serde_json::to_string(&result).map_err(OracleError::transport)
    }

    async fn list_scenarios(&self) -> Result<String, OracleError> {
        self.ensure_ready()?;
        serde_json::to_string(&Self::scenario_summaries()).map_err(OracleError::transport)
    }

    async fn restart(&self, component_id: &str) -> Result<(), OracleError> {
        self.ensure_ready()?;
        let mut designs = self.designs.lock().unwrap_or_else(PoisonError::into_inner);

        let mut known = false;
        for stored in designs.values_mut() {
            for comp in stored
                .payload
                .components
                .iter_mut()
                .filter(|c| c.id == component_id)
            {
                known = true;
                comp.properties.remove("crashed");
            }
        }

        if known {
            Ok(())
        } else {
            Err(OracleError::rejected(format!("unknown component {}", component_id)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{minimal_topology, reference_topology};
    use approx::assert_relative_eq;
    use archsim_core::{EvaluationClient, EvaluationRequest};
    use std::sync::Arc;

    fn request(topology: Topology, scenario: ScenarioId, tick: u64) -> EvaluationRequest {
        EvaluationRequest {
            design_id: "design-1".to_string(),
            scenario_id: scenario.wire_id().to_string(),
            topology,
            crashed: BTreeSet::new(),
            retention_rate: 1.0,
            tick,
        }
    }

    async fn evaluate(oracle: &Arc<ModelOracle>, req: &EvaluationRequest) -> EvaluationResult {
        EvaluationClient::new(Arc::clone(oracle))
            .evaluate(req)
            .await
            .unwrap()
    }

    #[test]
    fn test_congestion_factor() {
        assert_eq!(congestion_factor(0.5), 1.0);
        assert_eq!(congestion_factor(0.8), 1.0);
        assert_relative_eq!(congestion_factor(0.9), 5.0, epsilon = 1e-9);
        assert_eq!(congestion_factor(1.2), 40.0);
    }

    #[test]
    fn test_topological_order_handles_cycles() {
        let mut topo = Topology::new();
        for id in ["a", "b", "c", "d"] {
            topo.add_component(Component::new(id, id, ComponentKind::Server));
        }
        topo.connect(Connection::new("a", "b"));
        topo.connect(Connection::new("c", "d"));
        topo.connect(Connection::new("d", "c"));

        let edges: Vec<&Connection> = topo.connections.iter().collect();
        let order: Vec<String> = topological_order(&topo, &edges)
            .iter()
            .map(ToString::to_string)
            .collect();

        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn test_unavailable_until_initialised() {
        let oracle = ModelOracle::uninitialised(1);
        assert_eq!(oracle.evaluate("x", 0).await, Err(OracleError::Unavailable));
        assert_eq!(oracle.list_scenarios().await, Err(OracleError::Unavailable));

        oracle.initialise();
        assert!(matches!(
            oracle.evaluate("x", 0).await,
            Err(OracleError::UnknownDesign(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_garbage_and_unknown_scenario() {
        let oracle = Arc::new(ModelOracle::new(1));
        assert!(matches!(
            oracle.save_design("{").await,
            Err(OracleError::Rejected(_))
        ));

        let mut req = request(minimal_topology(), ScenarioId::TinyUrl, 1);
        req.scenario_id = "s9".to_string();
        let err = EvaluationClient::new(Arc::clone(&oracle))
            .evaluate(&req)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            archsim_core::AdapterError::Oracle(OracleError::UnknownScenario("s9".into()))
        );
    }

    #[tokio::test]
    async fn test_reference_design_at_peak() {
        let oracle = Arc::new(ModelOracle::new(42));
        let result = evaluate(&oracle, &request(reference_topology(ScenarioId::TinyUrl), ScenarioId::TinyUrl, 30)).await;

        // 10k offered, 12 replicas x 1000 QPS
        assert_relative_eq!(result.total_qps, 10_000.0);
        assert_relative_eq!(result.fulfilled_qps, 10_000.0);
        assert_relative_eq!(result.total_score, 100.0);
        assert_eq!(result.component_replicas.get("app"), Some(&12));
        assert_relative_eq!(result.component_effective_max_qps["app"], 12_000.0);
        assert_relative_eq!(result.avg_latency_ms, 187.5, epsilon = 1e-6);

        // Cache absorbs 80% of the 9000 reads; the database sees the rest plus writes
        assert_relative_eq!(result.component_loads["cache"], 9_000.0, epsilon = 1e-6);
        assert_relative_eq!(result.component_loads["db"], 2_800.0, epsilon = 1e-6);
        assert!(result.crashed_component_ids.is_empty());
        assert!(result.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_overload_crashes_component() {
        let oracle = Arc::new(ModelOracle::new(42));

        // 280 QPS on a 200 QPS node stays up; 370 QPS crosses 1.5x
        let result = evaluate(&oracle, &request(minimal_topology(), ScenarioId::TinyUrl, 2)).await;
        assert!(result.is_active("web"));
        assert_eq!(result.component_cpu_usage["web"], 100.0);

        let result = evaluate(&oracle, &request(minimal_topology(), ScenarioId::TinyUrl, 3)).await;
        assert!(result.is_crashed("web"));
        assert!(!result.is_active("web"));
        assert_eq!(result.total_score, 0.0);
        assert_eq!(result.fulfilled_qps, 0.0);
    }

    #[tokio::test]
    async fn test_crashed_flag_and_restart() {
        let oracle = Arc::new(ModelOracle::new(42));
        let mut req = request(minimal_topology(), ScenarioId::TinyUrl, 1);
        req.crashed.insert(ComponentId::from("web"));

        let result = evaluate(&oracle, &req).await;
        assert!(result.is_crashed("web"));
        assert!(!result.component_loads.contains_key("web"));

        oracle.restart("web").await.unwrap();
        let result: EvaluationResult =
            serde_json::from_str(&oracle.evaluate("design-1", 1).await.unwrap()).unwrap();
        assert!(result.is_active("web"));

        assert!(matches!(
            oracle.restart("ghost").await,
            Err(OracleError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn test_gateway_filters_attack() {
        let oracle = Arc::new(ModelOracle::new(42));
        let result = evaluate(&oracle, &request(reference_topology(ScenarioId::DdosSiege), ScenarioId::DdosSiege, 12)).await;

        assert!(result.is_attack_active);
        assert_relative_eq!(result.component_malicious_loads["gateway"], 4_000.0);
        assert_relative_eq!(result.component_malicious_loads["app"], 400.0, epsilon = 1e-6);
        assert_relative_eq!(result.total_score, 100.0);
    }

    #[tokio::test]
    async fn test_random_drop_lowers_score() {
        let oracle = Arc::new(ModelOracle::new(42));
        let result = evaluate(&oracle, &request(reference_topology(ScenarioId::DdosSiege), ScenarioId::DdosSiege, 30)).await;

        assert!(result.is_random_drop);
        assert!(result.total_score <= 100.0 && result.total_score > 98.0);
    }

    #[tokio::test]
    async fn test_queue_backlog_and_class_routing() {
        let mut topo = Topology::new();
        topo.add_component(Component::new("users", "Users", ComponentKind::TrafficSource).with_qps(15_000.0));
        topo.add_component(Component::new("q", "Queue", ComponentKind::Queue).with_max_qps(10_000.0));
        topo.add_component(Component::new("w", "Writer", ComponentKind::Server).with_max_qps(50_000.0));
        topo.connect(Connection::new("users", "q"));
        topo.connect(Connection::new("q", "w").carrying(TrafficClass::Write));

        let oracle = Arc::new(ModelOracle::new(42));
        let result = evaluate(&oracle, &request(topo, ScenarioId::TinyUrl, 1)).await;

        assert_eq!(result.component_backlogs["q"], 5_000);
        // 10k pass the queue; a tenth of it is writes
        assert_relative_eq!(result.component_loads["w"], 1_000.0, epsilon = 1e-6);
        assert_relative_eq!(result.component_read_loads["w"], 0.0);
    }

    #[tokio::test]
    async fn test_warnings_reported_once() {
        let mut topo = minimal_topology();
        topo.connect(Connection::new("web", "ghost"));

        let oracle = Arc::new(ModelOracle::new(42));
        let first = evaluate(&oracle, &request(topo.clone(), ScenarioId::TinyUrl, 1)).await;
        assert_eq!(first.warnings.len(), 1);
        assert!(first.warnings[0].contains("ghost"));

        let second = evaluate(&oracle, &request(topo, ScenarioId::TinyUrl, 2)).await;
        assert!(second.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_same_seed_same_result() {
        let a = Arc::new(ModelOracle::new(7));
        let b = Arc::new(ModelOracle::new(7));
        let req = request(reference_topology(ScenarioId::FlashSale), ScenarioId::FlashSale, 12);

        assert_eq!(evaluate(&a, &req).await, evaluate(&b, &req).await);
    }

    #[tokio::test]
    async fn test_list_scenarios() {
        let oracle = Arc::new(ModelOracle::new(1));
        let list = EvaluationClient::new(oracle).list_scenarios().await.unwrap();

        assert_eq!(list.len(), 3);
        assert_eq!(list[0].id, "s1");
        assert_eq!(list[2].goal.min_qps, 1_000.0);
    }
}
