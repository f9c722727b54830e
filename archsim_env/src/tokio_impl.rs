//! Wall-clock context for interactive sessions.
//!
//! The controller's one-second tick timer sleeps on the tokio timer and each
//! reconciliation cycle runs as its own tokio task. Saved designs are stamped
//! from the clock captured when the session's context was created, advanced
//! by the monotonic clock, so stamps never go backwards within a session.

use crate::SandboxContext;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tracing::debug;

/// Real-time context for a live editing session.
pub struct TokioContext {
    /// Monotonic origin for `now`
    started: Instant,

    /// Wall clock at `started`
    started_at: SystemTime,
}

impl TokioContext {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: SystemTime::now(),
        }
    }

    /// Shared handle for the controller and its spawned cycles.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SandboxContext for TokioContext {
    fn now(&self) -> Duration {
        self.started.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        self.started_at + self.started.elapsed()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let name = name.to_string();
        tokio::spawn(async move {
            future.await;
            debug!(task = %name, "Cycle task finished");
        });
    }

    fn seed(&self) -> u64 {
        // Live sessions are not seeded
        0
    }
}
