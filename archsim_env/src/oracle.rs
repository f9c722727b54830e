//! Scoring oracle abstraction.

use async_trait::async_trait;
use crate::error::OracleError;

/// Abstraction over the external, stateless scoring oracle.
///
/// # Implementations
///
/// - **Production**: a bridge to the real scoring engine
/// - **Simulation**: `ModelOracle` (reference traffic model) in `archsim_sim`
/// - **Tests**: [`crate::ScriptedOracle`]
///
/// # Call Flow
///
/// ```text
/// Core                          Oracle
///   |-- save_design(json) ------->|
///   |-- evaluate(id, tick) ------>|
///   |<----------- result json ----|
/// ```
///
/// Payloads cross this boundary as raw JSON strings; decoding is the job of
/// the evaluation client adapter in `archsim_core`.
#[async_trait]
pub trait ScoringOracle: Send + Sync + 'static {
    /// Stores (or replaces) a design so it can be evaluated.
    ///
    /// # Arguments
    /// * `design_json` - the serialized `DesignPayload`
    async fn save_design(&self, design_json: &str) -> Result<(), OracleError>;

    /// Evaluates a previously saved design at the given tick.
    ///
    /// # Returns
    /// * `Ok(json)` - the raw `EvaluationResult` payload
    /// * `Err(OracleError::Unavailable)` - the oracle is not initialised yet
    async fn evaluate(&self, design_id: &str, tick: u64) -> Result<String, OracleError>;

    /// Lists the available scenarios as a raw JSON array of `ScenarioSummary`.
    async fn list_scenarios(&self) -> Result<String, OracleError>;

    /// Clears a sticky crash for a component on the oracle side.
    async fn restart(&self, component_id: &str) -> Result<(), OracleError>;
}
