//! archsim Deterministic Simulation Harness
//!
//! Runs the archsim control loop end to end without a real scoring engine
//! or a wall clock:
//! - **Time**: [`SimContext`] jumps its virtual clock on every sleep
//! - **Oracle**: [`ModelOracle`] scores designs with a seeded traffic model
//! - **Randomness**: all entropy is derived from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────┐
//! │                    ScenarioRunner                     │
//! │                                                       │
//! │  SimContext ──sleep──► SimulationController::tick()   │
//! │  (virtual clock)              │                       │
//! │                               ▼                       │
//! │                        EvaluationClient               │
//! │                               │  JSON                 │
//! │                               ▼                       │
//! │                         ModelOracle                   │
//! │              (scenario phases + traffic model)        │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use archsim_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::TinyUrl).await?;
//! assert!(result.passed);
//! ```

pub mod catalog;
mod context;
mod exporter;
mod model;
mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use exporter::{SimExport, SimFrame};
pub use model::{congestion_factor, ModelOracle};
pub use runner::{RunnerError, ScenarioResult, ScenarioRunner};
