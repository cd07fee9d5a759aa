//! Recursion budget threaded through every descent of the delegation tree.
//!
//! Each descent multiplies the budget by `decay`. With a floor strictly above
//! zero this alone forces decomposition to stop after
//! `ceil(ln(floor) / ln(decay))` descents, whatever the depth and count caps say.

use crate::config::RecursionConfig;
use fractal_core::AgentId;
use serde::Serialize;
use std::time::{Duration, Instant};

/// Budget state for one position in the delegation tree.
///
/// Contexts are values: [`RecursionContext::descend`] returns a new one and
/// never changes `self`, so siblings each descend from the same parent state.
#[derive(Debug, Clone, Serialize)]
pub struct RecursionContext {
    /// Levels below the root.
    pub depth: u32,
    /// Deepest level that may still split.
    pub max_depth: u32,
    /// Remaining budget in (0, 1].
    pub budget: f64,
    /// Budget multiplier per descent.
    pub decay: f64,
    /// Budget below which splitting stops.
    pub budget_floor: f64,
    /// Descents taken so far.
    pub decomposition_count: u32,
    /// Descent limit across the whole chain.
    pub max_decompositions: u32,
    /// Agents that descended to reach this context, root first.
    pub trail: Vec<AgentId>,
    #[serde(skip)]
    started_at: Instant,
    #[serde(skip)]
    timeout: Duration,
}

impl RecursionContext {
    /// Fresh context at depth 0 with full budget. The deadline starts now.
    pub fn root(config: &RecursionConfig) -> Self {
        Self {
            depth: 0,
            max_depth: config.max_depth,
            budget: 1.0,
            decay: config.decay,
            budget_floor: config.budget_floor,
            decomposition_count: 0,
            max_decompositions: config.max_decompositions,
            trail: Vec::new(),
            started_at: Instant::now(),
            timeout: config.timeout(),
        }
    }

    /// One level deeper on behalf of `agent`. Same deadline as `self`.
    pub fn descend(&self, agent: AgentId) -> Self {
        let mut trail = self.trail.clone();
        trail.push(agent);
        Self {
            depth: self.depth + 1,
            budget: self.budget * self.decay,
            decomposition_count: self.decomposition_count + 1,
            trail,
            ..self.clone()
        }
    }

    /// Whether the shared deadline has passed.
    pub fn timed_out(&self) -> bool {
        self.started_at.elapsed() >= self.timeout
    }

    /// Time left before the shared deadline.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started_at.elapsed())
    }

    /// Whether one more level of decomposition is allowed.
    pub fn can_decompose(&self) -> bool {
        self.depth < self.max_depth
            && !self.timed_out()
            && self.decomposition_count < self.max_decompositions
            && self.budget > self.budget_floor
    }

    /// Which bound stopped decomposition, if any. Used for logging.
    pub fn exhausted_by(&self) -> Option<&'static str> {
        if self.depth >= self.max_depth {
            Some("depth")
        } else if self.timed_out() {
            Some("timeout")
        } else if self.decomposition_count >= self.max_decompositions {
            Some("decompositions")
        } else if self.budget <= self.budget_floor {
            Some("budget")
        } else {
            None
        }
    }
}
