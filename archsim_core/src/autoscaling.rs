//! The autoscaling controller.
//!
//! Elastic components keep one permanent base instance plus an ordered list
//! of extra replicas, each stamped with the tick it was added. A replica is
//! *provisioning* until `warmup_seconds` ticks have passed since its start
//! tick and carries no load while it warms up.
//!
//! ```text
//! target = clamp(ceil(L / (C * T)), 1, max_replicas)
//!
//! replica_start_times: [t0, t1, t2]   (base instance not listed)
//!                       ^ oldest      ^ newest, shed first
//! ```

use crate::topology::{ComponentKind, ComponentProperties};
use serde::{Deserialize, Serialize};

/// Scale-up threshold used when a component does not set one.
pub const DEFAULT_SCALE_UP_THRESHOLD: f64 = 0.7;

/// Replica ceiling used when a component does not set one.
pub const DEFAULT_MAX_REPLICAS: u32 = 10;

/// Warm-up (in ticks) used when a component does not set one.
pub const DEFAULT_WARMUP_SECONDS: u64 = 5;

/// Autoscaling knobs for one elastic component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    /// Capacity of one replica (C)
    pub per_node_capacity: f64,

    /// Scale-up threshold fraction (T), 0 < T <= 1
    pub threshold: f64,

    pub max_replicas: u32,

    pub warmup_ticks: u64,
}

impl ScalingPolicy {
    /// Builds a policy from static properties, or `None` if autoscaling is off.
    ///
    /// Thresholds above 1 are read as percentages.
    pub fn from_properties(props: &ComponentProperties) -> Option<Self> {
        if !props.auto_scaling {
            return None;
        }

        let raw = props.scale_up_threshold.unwrap_or(DEFAULT_SCALE_UP_THRESHOLD);
        let threshold = if raw > 1.0 { raw / 100.0 } else { raw };

        Some(Self {
            per_node_capacity: props.capacity(),
            threshold,
            max_replicas: props.max_replicas.unwrap_or(DEFAULT_MAX_REPLICAS).max(1),
            warmup_ticks: props.warmup_seconds.unwrap_or(DEFAULT_WARMUP_SECONDS),
        })
    }

    /// Replica count needed for `load`, clamped to `[1, max_replicas]`.
    pub fn target_replicas(&self, load: f64) -> u32 {
        let per_replica = self.per_node_capacity * self.threshold;
        if !(per_replica > 0.0) || !(load > 0.0) {
            return 1;
        }

        let needed = (load / per_replica).ceil();
        if needed >= self.max_replicas as f64 {
            self.max_replicas
        } else {
            (needed as u32).max(1)
        }
    }
}

/// What `reconcile_replicas` changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScaleChange {
    pub added: u32,
    pub removed: u32,
}

impl ScaleChange {
    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

/// Grows or shrinks the extra-replica list towards `target` total replicas.
///
/// New replicas are stamped with `tick`; shrinking sheds the most recently
/// added replica first.
pub fn reconcile_replicas(start_times: &mut Vec<u64>, target: u32, tick: u64) -> ScaleChange {
    let extras = target.saturating_sub(1) as usize;
    let mut change = ScaleChange::default();

    while start_times.len() < extras {
        start_times.push(tick);
        change.added += 1;
    }
    while start_times.len() > extras {
        start_times.pop();
        change.removed += 1;
    }

    change
}

/// Serving/provisioning breakdown of an elastic component at one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    /// Base instance plus every extra replica
    pub total: u32,
    pub provisioning: u32,
    pub serving: u32,
}

impl ReplicaStatus {
    /// A lone base instance.
    pub fn single() -> Self {
        Self {
            total: 1,
            provisioning: 0,
            serving: 1,
        }
    }

    /// Classifies every extra replica at `tick`.
    pub fn at(start_times: &[u64], tick: u64, warmup_ticks: u64) -> Self {
        let provisioning = start_times
            .iter()
            .filter(|&&start| tick.saturating_sub(start) < warmup_ticks)
            .count() as u32;
        let total = start_times.len() as u32 + 1;

        Self {
            total,
            provisioning,
            serving: total - provisioning,
        }
    }

    /// Load carried by each serving replica; provisioning replicas carry none.
    pub fn load_per_serving_replica(&self, load: f64) -> f64 {
        let serving = self.total.saturating_sub(self.provisioning).max(1);
        (load / serving as f64).max(0.0)
    }
}

/// Locally estimated capacity of a component.
///
/// Elastic groups scale with serving replicas, replicated storage with its
/// secondaries; everything else is its per-node capacity.
pub fn effective_capacity(
    kind: &ComponentKind,
    props: &ComponentProperties,
    replicas: &ReplicaStatus,
) -> f64 {
    let per_node = props.capacity();

    if props.auto_scaling && kind.is_elastic_compute() {
        per_node * replicas.serving as f64
    } else if kind.is_replicated_storage() {
        per_node * (1 + props.secondaries()) as f64
    } else {
        per_node
    }
}
