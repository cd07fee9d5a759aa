//! Live-agent registry and the aggregate snapshot computed from it.
//!
//! The registry holds only `Weak` references; owners are parents. Its one
//! mutex is held for a lookup or a recompute and never across an `.await`.

use crate::agent::Agent;
use crate::types::AgentState;
use chrono::{DateTime, Utc};
use fractal_core::AgentId;
use fractal_security::AgentLevel;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// Eventually consistent view of the population.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationSnapshot {
    /// Live agents.
    pub total: usize,
    /// Agents per hierarchy level.
    pub by_level: BTreeMap<AgentLevel, usize>,
    /// Agents per lifecycle state.
    pub by_state: BTreeMap<AgentState, usize>,
    /// `1 - tasks_failed / tasks_executed` over live agents, 1.0 before any task ran.
    pub health: f64,
    /// Leaf tasks run across the population.
    pub tasks_executed: u64,
    /// Leaf tasks that faulted.
    pub tasks_failed: u64,
    /// Time since the registry was created.
    pub age_ms: u64,
    /// When the snapshot was computed.
    pub taken_at: DateTime<Utc>,
}

impl PopulationSnapshot {
    fn empty() -> Self {
        Self {
            total: 0,
            by_level: BTreeMap::new(),
            by_state: BTreeMap::new(),
            health: 1.0,
            tasks_executed: 0,
            tasks_failed: 0,
            age_ms: 0,
            taken_at: Utc::now(),
        }
    }

    /// Agents at `level`.
    pub fn count_level(&self, level: AgentLevel) -> usize {
        self.by_level.get(&level).copied().unwrap_or(0)
    }

    /// Agents in `state`.
    pub fn count_state(&self, state: AgentState) -> usize {
        self.by_state.get(&state).copied().unwrap_or(0)
    }

    /// Same counts, ignoring timestamps.
    pub fn same_counts(&self, other: &PopulationSnapshot) -> bool {
        self.total == other.total
            && self.by_level == other.by_level
            && self.by_state == other.by_state
            && self.tasks_executed == other.tasks_executed
            && self.tasks_failed == other.tasks_failed
    }
}

struct RegistryInner {
    agents: HashMap<AgentId, Weak<Agent>>,
    snapshot: PopulationSnapshot,
}

/// Non-owning index of every live agent.
pub struct AgentRegistry {
    inner: Mutex<RegistryInner>,
    started_at: Instant,
}

impl AgentRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(RegistryInner {
                agents: HashMap::new(),
                snapshot: PopulationSnapshot::empty(),
            }),
            started_at: Instant::now(),
        }
    }

    /// Index `agent` and recompute the snapshot.
    pub fn register(&self, agent: &Arc<Agent>) {
        let mut inner = self.inner.lock();
        inner.agents.insert(agent.id(), Arc::downgrade(agent));
        inner.snapshot = self.compute(&mut inner.agents);
    }

    /// Drop `id` and recompute the snapshot.
    pub fn unregister(&self, id: AgentId) {
        let mut inner = self.inner.lock();
        if inner.agents.remove(&id).is_some() {
            inner.snapshot = self.compute(&mut inner.agents);
        }
    }

    /// The agent behind `id`, if it is still alive.
    pub fn get(&self, id: AgentId) -> Option<Arc<Agent>> {
        self.inner.lock().agents.get(&id).and_then(Weak::upgrade)
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: AgentId) -> bool {
        self.get(id).is_some()
    }

    /// Registered agents.
    pub fn len(&self) -> usize {
        self.inner.lock().agents.len()
    }

    /// No agents registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Registered ids, unordered.
    pub fn ids(&self) -> Vec<AgentId> {
        self.inner.lock().agents.keys().copied().collect()
    }

    /// The last computed snapshot. Never recomputes.
    pub fn observe(&self) -> PopulationSnapshot {
        self.inner.lock().snapshot.clone()
    }

    /// Recompute from live agents, dropping entries whose agent is gone.
    pub fn refresh(&self) -> PopulationSnapshot {
        let mut inner = self.inner.lock();
        inner.snapshot = self.compute(&mut inner.agents);
        inner.snapshot.clone()
    }

    fn compute(&self, agents: &mut HashMap<AgentId, Weak<Agent>>) -> PopulationSnapshot {
        agents.retain(|_, weak| weak.strong_count() > 0);

        let mut snapshot = PopulationSnapshot::empty();
        for agent in agents.values().filter_map(Weak::upgrade) {
            let state = agent.state();
            let metrics = agent.metrics();
            snapshot.total += 1;
            *snapshot.by_level.entry(agent.level()).or_insert(0) += 1;
            *snapshot.by_state.entry(state).or_insert(0) += 1;
            snapshot.tasks_executed += metrics.tasks_executed;
            snapshot.tasks_failed += metrics.tasks_failed;
        }
        if snapshot.tasks_executed > 0 {
            snapshot.health =
                1.0 - snapshot.tasks_failed as f64 / snapshot.tasks_executed as f64;
        }
        snapshot.age_ms = self.started_at.elapsed().as_millis() as u64;
        snapshot
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Background task that refreshes the registry's snapshot on a timer.
pub struct PopulationMonitor {
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl PopulationMonitor {
    /// Start refreshing `registry` every `interval`.
    pub fn spawn(registry: Arc<AgentRegistry>, interval: Duration) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let snapshot = registry.refresh();
                        tracing::trace!(
                            total = snapshot.total,
                            health = snapshot.health,
                            "Population refreshed"
                        );
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
        });
        Self {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Stop the timer and wait for the task to exit.
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Population monitor task failed");
            }
        }
    }
}

impl Drop for PopulationMonitor {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
