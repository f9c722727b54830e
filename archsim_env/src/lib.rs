//! archsim Environment Abstraction Layer
//!
//! This crate provides the seams that let the archsim reconciliation core
//! run against a **Production** runtime (tokio + a real scoring oracle) or a
//! **Simulation** (virtual clock + deterministic fake oracle).
//!
//! # Core Concept: The Oracle Boundary
//!
//! The scoring oracle is stateless per call and entirely external. The core
//! only ever talks to it through [`ScoringOracle`]:
//! - `save_design()` - upload a topology snapshot
//! - `evaluate()` - score the saved design at a given tick
//! - `list_scenarios()` - enumerate traffic scenarios
//! - `restart()` - clear a sticky crash on the oracle side
//!
//! Time (`now()`, `sleep()`) goes through [`SandboxContext`] so the tick
//! timer can be driven by a virtual clock in tests.
//!
//! # Example
//!
//! ```ignore
//! use archsim_env::{SandboxContext, ScoringOracle};
//!
//! async fn tick_loop<Ctx: SandboxContext, O: ScoringOracle>(ctx: &Ctx, oracle: &O) {
//!     loop {
//!         ctx.sleep(Duration::from_secs(1)).await;
//!         let raw = oracle.evaluate("design-1", 0).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod oracle;
mod scripted;
mod tokio_impl;
mod types;

pub use context::SandboxContext;
pub use error::OracleError;
pub use oracle::ScoringOracle;
pub use scripted::{ScriptedOracle, ScriptedReply};
pub use tokio_impl::TokioContext;
pub use types::{
    DesignPayload, DesignProperties, DimensionScore, EvaluationResult, ScenarioGoal,
    ScenarioSummary, WireComponent, WireConnection,
};
