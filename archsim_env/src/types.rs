//! Wire types exchanged with the scoring oracle.
//!
//! Every map is a `BTreeMap` so that re-encoding the same payload is
//! byte-stable; the reconciliation core relies on that for its
//! idempotence guarantees.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A topology snapshot as accepted by `save_design`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignPayload {
    pub id: String,
    pub scenario_id: String,
    pub components: Vec<WireComponent>,
    pub connections: Vec<WireConnection>,
    pub properties: DesignProperties,
}

impl DesignPayload {
    /// Looks up a component by id.
    pub fn component(&self, id: &str) -> Option<&WireComponent> {
        self.components.iter().find(|c| c.id == id)
    }
}

/// One component on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireComponent {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub setup_cost: f64,
    #[serde(default)]
    pub operational_cost: f64,
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl WireComponent {
    /// Reads a numeric property, accepting both integer and float encodings.
    pub fn number(&self, key: &str) -> Option<f64> {
        self.properties.get(key).and_then(Value::as_f64)
    }

    /// Reads a boolean property.
    pub fn flag(&self, key: &str) -> bool {
        self.properties
            .get(key)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }
}

/// One directed connection on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireConnection {
    pub from_id: String,
    pub to_id: String,
    #[serde(default)]
    pub protocol: String,
    /// "all", "read" or "write"
    #[serde(default = "default_traffic_type")]
    pub traffic_type: String,
}

fn default_traffic_type() -> String {
    "all".to_string()
}

/// Global, per-session properties fed back into every evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DesignProperties {
    pub retention_rate: f64,
}

impl Default for DesignProperties {
    fn default() -> Self {
        Self { retention_rate: 1.0 }
    }
}

/// Score for one evaluation dimension.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionScore {
    pub dimension: String,
    pub value: f64,
    #[serde(default)]
    pub comment: String,
}

/// The oracle's stateless output for one tick.
///
/// Absent maps decode as empty; absent flags decode as `false`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationResult {
    pub total_score: f64,
    pub total_qps: f64,
    pub fulfilled_qps: f64,
    pub total_read_qps: f64,
    pub total_write_qps: f64,
    pub avg_latency_ms: f64,
    pub scores: Vec<DimensionScore>,
    pub active_component_ids: Vec<String>,
    pub crashed_component_ids: Vec<String>,
    pub component_loads: BTreeMap<String, f64>,
    pub component_read_loads: BTreeMap<String, f64>,
    pub component_write_loads: BTreeMap<String, f64>,
    pub component_malicious_loads: BTreeMap<String, f64>,
    pub component_effective_max_qps: BTreeMap<String, f64>,
    pub component_replicas: BTreeMap<String, u32>,
    pub component_cpu_usage: BTreeMap<String, f64>,
    pub component_ram_usage: BTreeMap<String, f64>,
    pub component_backlogs: BTreeMap<String, u64>,
    pub is_burst_active: bool,
    pub is_attack_active: bool,
    pub is_random_drop: bool,
    pub warnings: Vec<String>,
    pub created_at: i64,
}

impl EvaluationResult {
    /// Returns true if the oracle reported the component as active.
    pub fn is_active(&self, id: &str) -> bool {
        self.active_component_ids.iter().any(|a| a == id)
    }

    /// Returns true if the oracle reported the component as crashed.
    pub fn is_crashed(&self, id: &str) -> bool {
        self.crashed_component_ids.iter().any(|c| c == id)
    }
}

/// Scenario goal as listed by the oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioGoal {
    pub min_qps: f64,
    pub max_latency_ms: f64,
    pub availability: f64,
    /// Seconds the goal has to hold.
    pub duration: u64,
}

/// One entry of `list_scenarios`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioSummary {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub goal: ScenarioGoal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_missing_fields_default() {
        let result: EvaluationResult =
            serde_json::from_str(r#"{"total_score": 88.5, "active_component_ids": ["a"]}"#)
                .unwrap();

        assert_eq!(result.total_score, 88.5);
        assert!(result.is_active("a"));
        assert!(!result.is_crashed("a"));
        assert!(result.component_loads.is_empty());
        assert!(!result.is_attack_active);
    }

    #[test]
    fn test_component_type_field_name() {
        let json = r#"{"id":"s1","name":"Server","type":"SERVER","properties":{"max_qps":1000}}"#;
        let comp: WireComponent = serde_json::from_str(json).unwrap();

        assert_eq!(comp.kind, "SERVER");
        assert_eq!(comp.number("max_qps"), Some(1000.0));
        assert!(!comp.flag("crashed"));

        let back = serde_json::to_value(&comp).unwrap();
        assert_eq!(back["type"], "SERVER");
    }

    #[test]
    fn test_connection_defaults_to_all_traffic() {
        let conn: WireConnection =
            serde_json::from_str(r#"{"from_id":"a","to_id":"b"}"#).unwrap();
        assert_eq!(conn.traffic_type, "all");
        assert_eq!(conn.protocol, "");
    }
}
