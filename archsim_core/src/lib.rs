//! archsim Core - Reconciliation & Control Loop
//!
//! Turns a sequence of independent, memoryless oracle evaluations into a
//! continuous, stateful infrastructure simulation:
//! 1. **Sticky failures**: crashes latch until an explicit restart
//! 2. **Provisioning timers**: autoscaled replicas warm up before serving
//! 3. **Hysteresis**: a slowly drifting user-retention rate
//! 4. **Edge-triggered log**: level signals become bounded, deduplicated entries
//!
//! The control loop guarantees at most one cycle in flight and discards
//! results that return after the session was stopped, started or reset.

pub mod adapter;
pub mod autoscaling;
pub mod config;
pub mod control_loop;
pub mod event_log;
pub mod reconcile;
pub mod retention;
pub mod state;
pub mod topology;

// Re-export key types for convenience
pub use adapter::{AdapterError, EvaluationClient, EvaluationRequest};
pub use autoscaling::{ReplicaStatus, ScaleChange, ScalingPolicy};
pub use config::{ConfigError, RetentionConfig, SimulationConfig};
pub use control_loop::{SimulationController, TickOutcome};
pub use event_log::{ConditionLatch, EventLog, LogEntry, Severity};
pub use reconcile::{ComponentView, ReconciliationEngine, TickReport};
pub use retention::RetentionFilter;
pub use state::{ComponentPhase, PersistentComponentState, SessionStats, SimulationSession, TickTicket};
pub use topology::{
    Component, ComponentId, ComponentKind, ComponentProperties, Connection, StructuralWarning,
    Topology, TrafficClass,
};
