//! Event log and condition deduplication.
//!
//! The oracle reports *levels* ("X is crashed", "an attack is active") on
//! every tick. The log wants *edges*. A latch remembers which condition keys
//! are currently true so that only onsets and clearances are written.
//!
//! | Condition    | Key              | Clears on its own |
//! |--------------|------------------|-------------------|
//! | crash        | `crash:<id>`     | no (restart only) |
//! | out of memory| `oom:<id>`       | yes               |
//! | attack       | `attack`         | yes               |
//! | random drop  | `random_drop`    | yes               |

use crate::topology::ComponentId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
}

/// One line of the simulation event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub tick: u64,
    pub message: String,
    pub severity: Severity,
}

impl LogEntry {
    pub fn new(tick: u64, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            tick,
            message: message.into(),
            severity,
        }
    }
}

// ============================================================================
// BOUNDED LOG
// ============================================================================

/// Bounded FIFO of log entries; the oldest entry is evicted first.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl EventLog {
    /// Creates an empty log holding at most `capacity` entries.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Appends an entry, returning the evicted one if the log was full.
    pub fn push(&mut self, entry: LogEntry) -> Option<LogEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(entry);
        evicted
    }

    pub fn extend(&mut self, entries: impl IntoIterator<Item = LogEntry>) {
        for entry in entries {
            self.push(entry);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    /// Newest entry, if any.
    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    /// Entries written at or after `tick`.
    pub fn since(&self, tick: u64) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|e| e.tick >= tick)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for EventLog {
    fn default() -> Self {
        Self::new(50)
    }
}

// ============================================================================
// CONDITION LATCH
// ============================================================================

/// Direction of a latched condition change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Onset,
    Cleared,
}

/// Set of condition keys currently considered true.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionLatch {
    keys: BTreeSet<String>,
}

impl ConditionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn crash_key(id: &ComponentId) -> String {
        format!("crash:{}", id)
    }

    pub fn oom_key(id: &ComponentId) -> String {
        format!("oom:{}", id)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// Feeds the current level of a condition and reports an edge, if any.
    ///
    /// Sticky conditions never produce `Cleared`; they leave the latch only
    /// through [`release`](Self::release).
    pub fn observe(&mut self, key: &str, active: bool, reversible: bool) -> Option<Edge> {
        let latched = self.keys.contains(key);
        match (active, latched) {
            (true, false) => {
                self.keys.insert(key.to_string());
                Some(Edge::Onset)
            }
            (false, true) if reversible => {
                self.keys.remove(key);
                Some(Edge::Cleared)
            }
            _ => None,
        }
    }

    /// Drops a key without emitting anything (explicit restart).
    pub fn release(&mut self, key: &str) -> bool {
        self.keys.remove(key)
    }

    /// Keys with the given prefix, e.g. every `oom:` key.
    pub(crate) fn with_prefix(&self, prefix: &str) -> Vec<String> {
        self.keys
            .iter()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Keeps only per-component keys whose component still exists.
    pub fn retain_components(&mut self, ids: &BTreeSet<ComponentId>) {
        self.keys.retain(|key| match key.split_once(':') {
            Some((_, id)) => ids.contains(id),
            None => true,
        });
    }

    pub fn clear(&mut self) {
        self.keys.clear();
    }
}

// ============================================================================
// DEDUPLICATOR
// ============================================================================

/// Levels observed on one tick, already resolved against sticky state.
#[derive(Debug, Clone, Default)]
pub struct ConditionSignals {
    /// Components crashed after this tick's latching
    pub crashed: BTreeSet<ComponentId>,

    /// Components at or above the OOM threshold, with their RAM usage
    pub out_of_memory: BTreeMap<ComponentId, f64>,

    pub attack_active: bool,

    pub random_drop: bool,

    /// Oracle-reported replica counts
    pub replicas: BTreeMap<ComponentId, u32>,

    /// Oracle free-text warnings, logged verbatim
    pub warnings: Vec<String>,
}

/// Turns level signals into edge-triggered log entries.
pub struct EventDeduplicator<'a> {
    latch: &'a mut ConditionLatch,
    previous_replicas: &'a mut BTreeMap<ComponentId, u32>,
    names: &'a BTreeMap<ComponentId, String>,
}

impl<'a> EventDeduplicator<'a> {
    pub fn new(
        latch: &'a mut ConditionLatch,
        previous_replicas: &'a mut BTreeMap<ComponentId, u32>,
        names: &'a BTreeMap<ComponentId, String>,
    ) -> Self {
        Self {
            latch,
            previous_replicas,
            names,
        }
    }

    fn name(&self, id: &ComponentId) -> String {
        self.names
            .get(id)
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    /// Processes one tick of signals and returns the entries to log.
    pub fn process(&mut self, tick: u64, signals: &ConditionSignals) -> Vec<LogEntry> {
        let mut out = Vec::new();

        for id in &signals.crashed {
            let key = ConditionLatch::crash_key(id);
            if self.latch.observe(&key, true, false) == Some(Edge::Onset) {
                out.push(LogEntry::new(
                    tick,
                    Severity::Error,
                    format!("{} crashed and needs a manual restart", self.name(id)),
                ));
            }
        }

        for (id, ram) in &signals.out_of_memory {
            let key = ConditionLatch::oom_key(id);
            if self.latch.observe(&key, true, true) == Some(Edge::Onset) {
                out.push(LogEntry::new(
                    tick,
                    Severity::Error,
                    format!("{} ran out of memory (RAM {:.0}%)", self.name(id), ram),
                ));
            }
        }
        for key in self.latch.with_prefix("oom:") {
            let id = ComponentId::new(&key["oom:".len()..]);
            if signals.out_of_memory.contains_key(&id) {
                continue;
            }
            if self.latch.observe(&key, false, true) == Some(Edge::Cleared) {
                out.push(LogEntry::new(
                    tick,
                    Severity::Success,
                    format!("{} memory pressure relieved", self.name(&id)),
                ));
            }
        }

        match self.latch.observe("attack", signals.attack_active, true) {
            Some(Edge::Onset) => out.push(LogEntry::new(
                tick,
                Severity::Error,
                "Malicious traffic detected",
            )),
            Some(Edge::Cleared) => out.push(LogEntry::new(
                tick,
                Severity::Success,
                "Attack traffic subsided",
            )),
            None => {}
        }

        match self.latch.observe("random_drop", signals.random_drop, true) {
            Some(Edge::Onset) => out.push(LogEntry::new(
                tick,
                Severity::Error,
                "Random request drops detected",
            )),
            Some(Edge::Cleared) => out.push(LogEntry::new(
                tick,
                Severity::Info,
                "Request drops stopped",
            )),
            None => {}
        }

        for (id, &count) in &signals.replicas {
            match self.previous_replicas.get(id) {
                Some(&prev) if count > prev => out.push(LogEntry::new(
                    tick,
                    Severity::Info,
                    format!("{} scaled up {} -> {} replicas", self.name(id), prev, count),
                )),
                Some(&prev) if count < prev => out.push(LogEntry::new(
                    tick,
                    Severity::Info,
                    format!("{} scaled down {} -> {} replicas", self.name(id), prev, count),
                )),
                _ => {}
            }
        }
        *self.previous_replicas = signals.replicas.clone();

        out.extend(
            signals
                .warnings
                .iter()
                .map(|w| LogEntry::new(tick, Severity::Warning, w.clone())),
        );

        out
    }
}
