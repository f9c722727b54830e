//! Deterministic scripted oracle for tests.

use async_trait::async_trait;
use crate::error::OracleError;
use crate::oracle::ScoringOracle;
use crate::types::{EvaluationResult, ScenarioSummary};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::Semaphore;

/// One scripted answer to an `evaluate` call.
#[derive(Debug, Clone)]
pub enum ScriptedReply {
    /// A well-formed result, serialized on the way out.
    Result(EvaluationResult),
    /// A raw payload returned verbatim (use for malformed responses).
    Raw(String),
    /// An injected failure.
    Error(OracleError),
}

#[derive(Default)]
struct Script {
    queue: VecDeque<ScriptedReply>,
    fallback: Option<ScriptedReply>,
    saved_designs: Vec<String>,
    evaluations: Vec<(String, u64)>,
    restarts: Vec<String>,
    scenarios: Vec<ScenarioSummary>,
}

/// A fake oracle that answers from a script.
///
/// Replies are consumed in order; once the queue is empty the fallback
/// reply (if any) is returned for every further call. Every call is
/// recorded so tests can assert on what the core sent.
///
/// A *gated* oracle parks each `evaluate` call until [`release`](Self::release)
/// hands out a permit, which lets tests hold a cycle in flight.
pub struct ScriptedOracle {
    ready: AtomicBool,
    in_flight: AtomicUsize,
    gate: Option<Arc<Semaphore>>,
    script: Mutex<Script>,
}

impl ScriptedOracle {
    /// Creates a ready oracle with an empty script.
    pub fn new() -> Self {
        Self {
            ready: AtomicBool::new(true),
            in_flight: AtomicUsize::new(0),
            gate: None,
            script: Mutex::new(Script::default()),
        }
    }

    /// Creates an oracle whose `evaluate` calls block until released.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    /// Creates an Arc-wrapped oracle for sharing.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks the oracle as initialised or not.
    pub fn set_ready(&self, ready: bool) {
        self.ready.store(ready, Ordering::SeqCst);
    }

    /// Queues a reply for the next unanswered `evaluate` call.
    pub fn push(&self, reply: ScriptedReply) {
        self.script().queue.push_back(reply);
    }

    /// Queues a well-formed result.
    pub fn push_result(&self, result: EvaluationResult) {
        self.push(ScriptedReply::Result(result));
    }

    /// Sets the reply used once the queue is drained.
    pub fn set_fallback(&self, reply: ScriptedReply) {
        self.script().fallback = Some(reply);
    }

    /// Sets the scenarios returned by `list_scenarios`.
    pub fn set_scenarios(&self, scenarios: Vec<ScenarioSummary>) {
        self.script().scenarios = scenarios;
    }

    /// Lets `permits` parked `evaluate` calls proceed.
    pub fn release(&self, permits: usize) {
        if let Some(gate) = &self.gate {
            gate.add_permits(permits);
        }
    }

    /// Number of `evaluate` calls currently parked or running.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// All design payloads received so far.
    pub fn saved_designs(&self) -> Vec<String> {
        self.script().saved_designs.clone()
    }

    /// All `(design_id, tick)` pairs evaluated so far.
    pub fn evaluations(&self) -> Vec<(String, u64)> {
        self.script().evaluations.clone()
    }

    /// All component ids restarted so far.
    pub fn restarts(&self) -> Vec<String> {
        self.script().restarts.clone()
    }

    fn check_ready(&self) -> Result<(), OracleError> {
        if self.ready.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(OracleError::Unavailable)
        }
    }
}

impl Default for ScriptedOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScoringOracle for ScriptedOracle {
    async fn save_design(&self, design_json: &str) -> Result<(), OracleError> {
        self.check_ready()?;
        self.script().saved_designs.push(design_json.to_string());
        Ok(())
    }

    async fn evaluate(&self, design_id: &str, tick: u64) -> Result<String, OracleError> {
        self.check_ready()?;
        self.in_flight.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }

        let reply = {
            let mut script = self.script();
            script.evaluations.push((design_id.to_string(), tick));
            script.queue.pop_front().or_else(|| script.fallback.clone())
        };
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Some(ScriptedReply::Result(result)) => {
                serde_json::to_string(&result).map_err(OracleError::transport)
            }
            Some(ScriptedReply::Raw(raw)) => Ok(raw),
            Some(ScriptedReply::Error(err)) => Err(err),
            None => Err(OracleError::transport("no scripted reply left")),
        }
    }

    async fn list_scenarios(&self) -> Result<String, OracleError> {
        self.check_ready()?;
        serde_json::to_string(&self.script().scenarios).map_err(OracleError::transport)
    }

    async fn restart(&self, component_id: &str) -> Result<(), OracleError> {
        self.check_ready()?;
        self.script().restarts.push(component_id.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unready_oracle_is_unavailable() {
        let oracle = ScriptedOracle::new();
        oracle.set_ready(false);

        assert_eq!(oracle.evaluate("d", 0).await, Err(OracleError::Unavailable));
        assert_eq!(oracle.save_design("{}").await, Err(OracleError::Unavailable));
    }

    #[tokio::test]
    async fn test_queue_then_fallback() {
        let oracle = ScriptedOracle::new();
        oracle.push(ScriptedReply::Raw("first".into()));
        oracle.set_fallback(ScriptedReply::Raw("again".into()));

        assert_eq!(oracle.evaluate("d", 1).await.unwrap(), "first");
        assert_eq!(oracle.evaluate("d", 2).await.unwrap(), "again");
        assert_eq!(oracle.evaluate("d", 3).await.unwrap(), "again");
        assert_eq!(oracle.evaluations().len(), 3);
    }

    #[tokio::test]
    async fn test_empty_script_is_transport_error() {
        let oracle = ScriptedOracle::new();
        let err = oracle.evaluate("d", 0).await.unwrap_err();
        assert!(matches!(err, OracleError::Transport(_)));
    }

    #[tokio::test]
    async fn test_gated_evaluate_waits_for_release() {
        let oracle = Arc::new(ScriptedOracle::gated());
        oracle.set_fallback(ScriptedReply::Raw("{}".into()));

        let handle = {
            let oracle = Arc::clone(&oracle);
            tokio::spawn(async move { oracle.evaluate("d", 0).await })
        };

        while oracle.in_flight() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(!handle.is_finished());

        oracle.release(1);
        assert_eq!(handle.await.unwrap().unwrap(), "{}");
        assert_eq!(oracle.in_flight(), 0);
    }
}
