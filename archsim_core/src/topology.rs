//! The user-authored topology: components and the connections between them.
//!
//! The topology is owned by the external editor. The control loop only ever
//! reads it through a cloned snapshot taken at the start of a tick, so the
//! types here are plain data with `Clone`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::borrow::Borrow;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// ============================================================================
// IDENTIFIERS
// ============================================================================

/// Stable, unique identifier of a component.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ComponentId(String);

impl ComponentId {
    /// Creates an id from anything string-like.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ComponentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ComponentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Borrow<str> for ComponentId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// COMPONENT KINDS
// ============================================================================

/// The kind of infrastructure a component models.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ComponentKind {
    TrafficSource,
    Server,
    LoadBalancer,
    AutoScalingGroup,
    Database,
    Cache,
    Queue,
    Storage,
    SearchEngine,
    Gateway,
    ExternalApi,
    /// Any kind this build does not know about; passed through untouched.
    Other(String),
}

impl ComponentKind {
    /// Returns the wire name understood by the oracle.
    pub fn wire_name(&self) -> &str {
        match self {
            ComponentKind::TrafficSource => "TRAFFIC_SOURCE",
            ComponentKind::Server => "WEB_SERVER",
            ComponentKind::LoadBalancer => "LOAD_BALANCER",
            ComponentKind::AutoScalingGroup => "AUTO_SCALING_GROUP",
            ComponentKind::Database => "DATABASE",
            ComponentKind::Cache => "CACHE",
            ComponentKind::Queue => "MESSAGE_QUEUE",
            ComponentKind::Storage => "STORAGE",
            ComponentKind::SearchEngine => "SEARCH_ENGINE",
            ComponentKind::Gateway => "API_GATEWAY",
            ComponentKind::ExternalApi => "EXTERNAL_API",
            ComponentKind::Other(name) => name,
        }
    }

    /// Parses a wire name. Unknown names become [`ComponentKind::Other`].
    pub fn from_wire(name: &str) -> Self {
        match name.to_ascii_uppercase().as_str() {
            "TRAFFIC_SOURCE" => ComponentKind::TrafficSource,
            "WEB_SERVER" | "SERVER" => ComponentKind::Server,
            "LOAD_BALANCER" => ComponentKind::LoadBalancer,
            "AUTO_SCALING_GROUP" | "ASG" => ComponentKind::AutoScalingGroup,
            "DATABASE" => ComponentKind::Database,
            "CACHE" => ComponentKind::Cache,
            "MESSAGE_QUEUE" | "QUEUE" => ComponentKind::Queue,
            "STORAGE" | "OBJECT_STORAGE" => ComponentKind::Storage,
            "SEARCH_ENGINE" => ComponentKind::SearchEngine,
            "API_GATEWAY" | "GATEWAY" => ComponentKind::Gateway,
            "EXTERNAL_API" => ComponentKind::ExternalApi,
            _ => ComponentKind::Other(name.to_string()),
        }
    }

    /// Compute kinds whose capacity scales with the number of serving replicas.
    pub fn is_elastic_compute(&self) -> bool {
        matches!(self, ComponentKind::AutoScalingGroup | ComponentKind::Server)
    }

    /// Storage kinds whose capacity scales with primary + secondaries.
    pub fn is_replicated_storage(&self) -> bool {
        matches!(self, ComponentKind::Database)
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.wire_name())
    }
}

impl From<String> for ComponentKind {
    fn from(name: String) -> Self {
        ComponentKind::from_wire(&name)
    }
}

impl From<ComponentKind> for String {
    fn from(kind: ComponentKind) -> Self {
        kind.wire_name().to_string()
    }
}

// ============================================================================
// PROPERTIES
// ============================================================================

/// Static, user-edited properties of a component.
///
/// Known keys are typed; anything else lives in `extra` and is forwarded to
/// the oracle verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComponentProperties {
    /// Per-node request capacity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_qps: Option<f64>,

    /// Offered load, only meaningful on traffic sources
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qps: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_latency_ms: Option<f64>,

    #[serde(default)]
    pub auto_scaling: bool,

    /// Scale-up threshold, either a fraction (0.7) or a percentage (70)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale_up_threshold: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_replicas: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warmup_seconds: Option<u64>,

    /// Number of secondaries behind a primary (replicated storage)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replication: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ram_mb: Option<f64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ComponentProperties {
    /// Per-node capacity, 0 when unset.
    pub fn capacity(&self) -> f64 {
        self.max_qps.unwrap_or(0.0)
    }

    /// Secondary count for replicated storage, 0 when unset.
    pub fn secondaries(&self) -> u32 {
        self.replication.unwrap_or(0)
    }

    /// Iterates every numeric value, including the open `extra` map.
    pub(crate) fn numbers(&self) -> impl Iterator<Item = (&str, f64)> + '_ {
        let typed = [
            ("max_qps", self.max_qps),
            ("qps", self.qps),
            ("base_latency_ms", self.base_latency_ms),
            ("scale_up_threshold", self.scale_up_threshold),
            ("ram_mb", self.ram_mb),
        ]
        .into_iter()
        .filter_map(|(k, v)| v.map(|v| (k, v)));

        let extra = self
            .extra
            .iter()
            .filter_map(|(k, v)| v.as_f64().map(|n| (k.as_str(), n)));

        typed.chain(extra)
    }
}

// ============================================================================
// COMPONENTS & CONNECTIONS
// ============================================================================

/// A single infrastructure component on the canvas.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Component {
    pub id: ComponentId,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ComponentKind,
    #[serde(default)]
    pub setup_cost: f64,
    #[serde(default)]
    pub operational_cost: f64,
    #[serde(default)]
    pub properties: ComponentProperties,
}

impl Component {
    /// Creates a component with default properties.
    pub fn new(id: impl Into<ComponentId>, name: &str, kind: ComponentKind) -> Self {
        Self {
            id: id.into(),
            name: name.to_string(),
            kind,
            setup_cost: 0.0,
            operational_cost: 0.0,
            properties: ComponentProperties::default(),
        }
    }

    /// Sets the per-node capacity.
    pub fn with_max_qps(mut self, max_qps: f64) -> Self {
        self.properties.max_qps = Some(max_qps);
        self
    }

    /// Sets the offered load of a traffic source.
    pub fn with_qps(mut self, qps: f64) -> Self {
        self.properties.qps = Some(qps);
        self
    }

    pub fn with_base_latency(mut self, latency_ms: f64) -> Self {
        self.properties.base_latency_ms = Some(latency_ms);
        self
    }

    /// Enables autoscaling with the given policy knobs.
    pub fn with_autoscaling(mut self, threshold: f64, max_replicas: u32, warmup_seconds: u64) -> Self {
        self.properties.auto_scaling = true;
        self.properties.scale_up_threshold = Some(threshold);
        self.properties.max_replicas = Some(max_replicas);
        self.properties.warmup_seconds = Some(warmup_seconds);
        self
    }

    /// Sets the number of storage secondaries.
    pub fn with_replication(mut self, secondaries: u32) -> Self {
        self.properties.replication = Some(secondaries);
        self
    }

    /// Sets setup and per-second operational cost.
    pub fn with_costs(mut self, setup: f64, operational: f64) -> Self {
        self.setup_cost = setup;
        self.operational_cost = operational;
        self
    }
}

/// Which slice of traffic a connection carries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficClass {
    #[default]
    All,
    Read,
    Write,
}

impl TrafficClass {
    /// Wire name ("all", "read", "write").
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficClass::All => "all",
            TrafficClass::Read => "read",
            TrafficClass::Write => "write",
        }
    }
}

/// A directed edge between two components.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Connection {
    pub from: ComponentId,
    pub to: ComponentId,
    #[serde(default)]
    pub traffic: TrafficClass,
    #[serde(default = "default_protocol")]
    pub protocol: String,
}

fn default_protocol() -> String {
    "HTTP".to_string()
}

impl Connection {
    /// Creates an HTTP connection carrying all traffic.
    pub fn new(from: impl Into<ComponentId>, to: impl Into<ComponentId>) -> Self {
        Self {
            from: from.into(),
            to: to.into(),
            traffic: TrafficClass::All,
            protocol: default_protocol(),
        }
    }

    /// Restricts the connection to one traffic class.
    pub fn carrying(mut self, traffic: TrafficClass) -> Self {
        self.traffic = traffic;
        self
    }
}

// ============================================================================
// TOPOLOGY
// ============================================================================

/// Wiring problems the editor is expected to prevent.
///
/// The control loop never refuses a topology because of these; they are
/// reported for diagnostics only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StructuralWarning {
    /// A traffic source with more than one outbound connection.
    MultipleSourceOutputs { source: ComponentId, count: usize },
    /// A connection whose endpoint does not exist.
    DanglingConnection { from: ComponentId, to: ComponentId },
    /// A connection from a component to itself.
    SelfLoop(ComponentId),
}

impl fmt::Display for StructuralWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StructuralWarning::MultipleSourceOutputs { source, count } => {
                write!(f, "traffic source {} has {} outbound connections", source, count)
            }
            StructuralWarning::DanglingConnection { from, to } => {
                write!(f, "connection {} -> {} references a missing component", from, to)
            }
            StructuralWarning::SelfLoop(id) => write!(f, "component {} is connected to itself", id),
        }
    }
}

/// The full user-authored graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    #[serde(default)]
    pub components: Vec<Component>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

impl Topology {
    /// Creates an empty topology.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or replaces) a component.
    pub fn add_component(&mut self, component: Component) {
        match self.components.iter_mut().find(|c| c.id == component.id) {
            Some(existing) => *existing = component,
            None => self.components.push(component),
        }
    }

    /// Removes a component and every connection touching it.
    pub fn remove_component(&mut self, id: &str) -> Option<Component> {
        let idx = self.components.iter().position(|c| c.id.as_str() == id)?;
        self.connections
            .retain(|conn| conn.from.as_str() != id && conn.to.as_str() != id);
        Some(self.components.remove(idx))
    }

    /// Adds a connection.
    pub fn connect(&mut self, connection: Connection) {
        self.connections.push(connection);
    }

    /// Looks up a component by id.
    pub fn component(&self, id: &str) -> Option<&Component> {
        self.components.iter().find(|c| c.id.as_str() == id)
    }

    /// Mutable lookup, used by the editor for property edits.
    pub fn component_mut(&mut self, id: &str) -> Option<&mut Component> {
        self.components.iter_mut().find(|c| c.id.as_str() == id)
    }

    /// Outbound connections of a component.
    pub fn outbound<'a>(&'a self, id: &'a str) -> impl Iterator<Item = &'a Connection> + 'a {
        self.connections.iter().filter(move |c| c.from.as_str() == id)
    }

    /// The set of component ids.
    pub fn ids(&self) -> BTreeSet<ComponentId> {
        self.components.iter().map(|c| c.id.clone()).collect()
    }

    /// Display names keyed by id.
    pub fn names(&self) -> BTreeMap<ComponentId, String> {
        self.components
            .iter()
            .map(|c| (c.id.clone(), c.name.clone()))
            .collect()
    }

    /// Sum of per-second operational cost across all components.
    pub fn operational_cost_per_second(&self) -> f64 {
        self.components.iter().map(|c| c.operational_cost).sum()
    }

    /// Checks wiring rules the editor normally enforces.
    pub fn structural_warnings(&self) -> Vec<StructuralWarning> {
        let mut warnings = Vec::new();

        for comp in self
            .components
            .iter()
            .filter(|c| c.kind == ComponentKind::TrafficSource)
        {
            let count = self.outbound(comp.id.as_str()).count();
            if count > 1 {
                warnings.push(StructuralWarning::MultipleSourceOutputs {
                    source: comp.id.clone(),
                    count,
                });
            }
        }

        for conn in &self.connections {
            if conn.from == conn.to {
                warnings.push(StructuralWarning::SelfLoop(conn.from.clone()));
            } else if self.component(conn.from.as_str()).is_none()
                || self.component(conn.to.as_str()).is_none()
            {
                warnings.push(StructuralWarning::DanglingConnection {
                    from: conn.from.clone(),
                    to: conn.to.clone(),
                });
            }
        }

        warnings
    }
}
