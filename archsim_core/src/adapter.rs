//! Evaluation client adapter.
//!
//! Pure translation boundary between the core's typed topology and the
//! oracle's JSON contract. It holds no state of its own.

use crate::event_log::Severity;
use crate::topology::{ComponentId, Topology};
use archsim_env::{
    DesignPayload, DesignProperties, EvaluationResult, OracleError, ScenarioSummary,
    ScoringOracle, WireComponent, WireConnection,
};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Ways a single evaluation can fail.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AdapterError {
    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Oracle not initialised")]
    OracleUnavailable,

    #[error("Malformed oracle response: {0}")]
    MalformedResponse(String),

    #[error("Oracle error: {0}")]
    Oracle(OracleError),
}

impl AdapterError {
    /// Severity of the single log entry this failure produces, if any.
    pub fn severity(&self) -> Option<Severity> {
        match self {
            AdapterError::OracleUnavailable => None,
            AdapterError::Serialization(_) | AdapterError::MalformedResponse(_) => {
                Some(Severity::Error)
            }
            AdapterError::Oracle(_) => Some(Severity::Warning),
        }
    }
}

impl From<OracleError> for AdapterError {
    fn from(err: OracleError) -> Self {
        match err {
            OracleError::Unavailable => AdapterError::OracleUnavailable,
            other => AdapterError::Oracle(other),
        }
    }
}

/// Everything one evaluation needs, captured at the start of a tick.
#[derive(Debug, Clone, PartialEq)]
pub struct EvaluationRequest {
    pub design_id: String,
    pub scenario_id: String,

    /// Copy-on-read snapshot of the topology
    pub topology: Topology,

    /// Components latched as crashed; forwarded as a `crashed` property
    pub crashed: BTreeSet<ComponentId>,

    pub retention_rate: f64,

    /// Tick the evaluation is for
    pub tick: u64,
}

/// Talks to a [`ScoringOracle`] on behalf of the control loop.
pub struct EvaluationClient<O: ScoringOracle> {
    oracle: Arc<O>,
}

impl<O: ScoringOracle> Clone for EvaluationClient<O> {
    fn clone(&self) -> Self {
        Self {
            oracle: Arc::clone(&self.oracle),
        }
    }
}

impl<O: ScoringOracle> EvaluationClient<O> {
    pub fn new(oracle: Arc<O>) -> Self {
        Self { oracle }
    }

    /// The wrapped oracle.
    pub fn oracle(&self) -> &Arc<O> {
        &self.oracle
    }

    /// Encodes a request into the `save_design` payload.
    pub fn encode_design(request: &EvaluationRequest) -> Result<String, AdapterError> {
        if !request.retention_rate.is_finite() {
            return Err(AdapterError::Serialization(format!(
                "retention rate {} is not finite",
                request.retention_rate
            )));
        }

        let mut seen = BTreeSet::new();
        let mut components = Vec::with_capacity(request.topology.components.len());

        for comp in &request.topology.components {
            if !seen.insert(comp.id.as_str()) {
                return Err(AdapterError::Serialization(format!(
                    "duplicate component id {}",
                    comp.id
                )));
            }
            if let Some((key, value)) = comp.properties.numbers().find(|(_, v)| !v.is_finite()) {
                return Err(AdapterError::Serialization(format!(
                    "{}.{} is not finite ({})",
                    comp.id, key, value
                )));
            }
            if !comp.setup_cost.is_finite() || !comp.operational_cost.is_finite() {
                return Err(AdapterError::Serialization(format!(
                    "{} has a non-finite cost",
                    comp.id
                )));
            }

            let mut properties = match serde_json::to_value(&comp.properties)
                .map_err(|e| AdapterError::Serialization(e.to_string()))?
            {
                Value::Object(map) => map,
                other => {
                    return Err(AdapterError::Serialization(format!(
                        "properties of {} encoded as {}",
                        comp.id, other
                    )))
                }
            };
            if request.crashed.contains(&comp.id) {
                properties.insert("crashed".to_string(), Value::Bool(true));
            }

            components.push(WireComponent {
                id: comp.id.to_string(),
                name: comp.name.clone(),
                kind: comp.kind.wire_name().to_string(),
                setup_cost: comp.setup_cost,
                operational_cost: comp.operational_cost,
                properties,
            });
        }

        let connections = request
            .topology
            .connections
            .iter()
            .map(|conn| WireConnection {
                from_id: conn.from.to_string(),
                to_id: conn.to.to_string(),
                protocol: conn.protocol.clone(),
                traffic_type: conn.traffic.as_str().to_string(),
            })
            .collect();

        let payload = DesignPayload {
            id: request.design_id.clone(),
            scenario_id: request.scenario_id.clone(),
            components,
            connections,
            properties: DesignProperties {
                retention_rate: request.retention_rate,
            },
        };

        serde_json::to_string(&payload).map_err(|e| AdapterError::Serialization(e.to_string()))
    }

    /// Decodes a raw `evaluate` response.
    pub fn decode_result(raw: &str) -> Result<EvaluationResult, AdapterError> {
        serde_json::from_str(raw).map_err(|e| AdapterError::MalformedResponse(e.to_string()))
    }

    /// Saves the snapshot, then evaluates it.
    pub async fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult, AdapterError> {
        let design = Self::encode_design(request)?;
        trace!(bytes = design.len(), "Encoded design");

        self.oracle.save_design(&design).await?;
        let raw = self.oracle.evaluate(&request.design_id, request.tick).await?;
        let result = Self::decode_result(&raw)?;

        debug!(
            tick = request.tick,
            score = result.total_score,
            active = result.active_component_ids.len(),
            crashed = result.crashed_component_ids.len(),
            "Evaluation received"
        );
        Ok(result)
    }

    /// Lists the oracle's scenarios.
    pub async fn list_scenarios(&self) -> Result<Vec<ScenarioSummary>, AdapterError> {
        let raw = self.oracle.list_scenarios().await?;
        serde_json::from_str(&raw).map_err(|e| AdapterError::MalformedResponse(e.to_string()))
    }

    /// Forwards a restart to the oracle.
    pub async fn restart(&self, id: &ComponentId) -> Result<(), AdapterError> {
        self.oracle.restart(id.as_str()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::topology::{Component, ComponentKind, Connection, TrafficClass};
    use archsim_env::{ScriptedOracle, ScriptedReply, ScenarioGoal};

    fn request() -> EvaluationRequest {
        let mut topology = Topology::new();
        topology.add_component(
            Component::new("users", "Users", ComponentKind::TrafficSource).with_qps(1000.0),
        );
        topology.add_component(
            Component::new("web", "Web", ComponentKind::Server)
                .with_max_qps(1000.0)
                .with_costs(200.0, 0.2),
        );
        topology.connect(Connection::new("users", "web"));

        EvaluationRequest {
            design_id: "d-1".into(),
            scenario_id: "s1".into(),
            topology,
            crashed: BTreeSet::new(),
            retention_rate: 0.9,
            tick: 3,
        }
    }

    #[test]
    fn test_encode_wire_shape() {
        let mut req = request();
        req.crashed.insert(ComponentId::from("web"));
        req.topology.connections[0] = Connection::new("users", "web").carrying(TrafficClass::Read);

        let json: Value = serde_json::from_str(&EvaluationClient::<ScriptedOracle>::encode_design(&req).unwrap()).unwrap();

        assert_eq!(json["id"], "d-1");
        assert_eq!(json["scenario_id"], "s1");
        assert_eq!(json["properties"]["retention_rate"], 0.9);
        assert_eq!(json["components"][1]["type"], "WEB_SERVER");
        assert_eq!(json["components"][1]["operational_cost"], 0.2);
        assert_eq!(json["components"][1]["properties"]["max_qps"], 1000.0);
        assert_eq!(json["components"][1]["properties"]["crashed"], true);
        assert!(json["components"][0]["properties"].get("crashed").is_none());
        assert_eq!(json["connections"][0]["from_id"], "users");
        assert_eq!(json["connections"][0]["protocol"], "HTTP");
        assert_eq!(json["connections"][0]["traffic_type"], "read");
    }

    #[test]
    fn test_encode_is_byte_stable() {
        let req = request();
        let a = EvaluationClient::<ScriptedOracle>::encode_design(&req).unwrap();
        let b = EvaluationClient::<ScriptedOracle>::encode_design(&req).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_encode_rejects_non_finite_and_duplicates() {
        let mut req = request();
        req.topology.components[1].properties.max_qps = Some(f64::NAN);
        let err = EvaluationClient::<ScriptedOracle>::encode_design(&req).unwrap_err();
        assert!(matches!(err, AdapterError::Serialization(_)));

        let mut req = request();
        let dup = req.topology.components[1].clone();
        req.topology.components.push(dup);
        let err = EvaluationClient::<ScriptedOracle>::encode_design(&req).unwrap_err();
        assert!(matches!(err, AdapterError::Serialization(ref m) if m.contains("duplicate")));
    }

    #[test]
    fn test_error_severity() {
        assert_eq!(AdapterError::OracleUnavailable.severity(), None);
        assert_eq!(AdapterError::MalformedResponse("x".into()).severity(), Some(Severity::Error));
        assert_eq!(AdapterError::Serialization("x".into()).severity(), Some(Severity::Error));
        assert_eq!(
            AdapterError::from(OracleError::rejected("nope")).severity(),
            Some(Severity::Warning)
        );
        assert_eq!(AdapterError::from(OracleError::Unavailable), AdapterError::OracleUnavailable);
    }

    #[tokio::test]
    async fn test_evaluate_saves_then_evaluates() {
        let oracle = ScriptedOracle::shared();
        oracle.push_result(EvaluationResult {
            total_score: 100.0,
            active_component_ids: vec!["web".into()],
            ..Default::default()
        });
        let client = EvaluationClient::new(Arc::clone(&oracle));

        let result = client.evaluate(&request()).await.unwrap();

        assert!(result.is_active("web"));
        assert_eq!(oracle.saved_designs().len(), 1);
        assert_eq!(oracle.evaluations(), vec![("d-1".to_string(), 3)]);
    }

    #[tokio::test]
    async fn test_evaluate_unavailable_and_malformed() {
        let oracle = ScriptedOracle::shared();
        let client = EvaluationClient::new(Arc::clone(&oracle));

        oracle.set_ready(false);
        assert_eq!(client.evaluate(&request()).await, Err(AdapterError::OracleUnavailable));
        assert!(oracle.saved_designs().is_empty());

        oracle.set_ready(true);
        oracle.push(ScriptedReply::Raw("{\"total_score\": \"high\"}".into()));
        let err = client.evaluate(&request()).await.unwrap_err();
        assert!(matches!(err, AdapterError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_list_scenarios_and_restart() {
        let oracle = ScriptedOracle::shared();
        oracle.set_scenarios(vec![ScenarioSummary {
            id: "s1".into(),
            title: "TinyURL".into(),
            description: String::new(),
            goal: ScenarioGoal {
                min_qps: 10_000.0,
                max_latency_ms: 200.0,
                availability: 99.9,
                duration: 60,
            },
        }]);
        let client = EvaluationClient::new(Arc::clone(&oracle));

        let scenarios = client.list_scenarios().await.unwrap();
        assert_eq!(scenarios[0].title, "TinyURL");

        client.restart(&ComponentId::from("web")).await.unwrap();
        assert_eq!(oracle.restarts(), vec!["web".to_string()]);
    }
}
