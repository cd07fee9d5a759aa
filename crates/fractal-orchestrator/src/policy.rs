//! Injected policies: what a leaf does, how its output is scored, and when
//! and how a task is split.

use crate::config::{DecompositionConfig, SynthesisPolicy};
use crate::recursion::RecursionContext;
use async_trait::async_trait;
use fractal_core::{AgentId, ExecutionStrategy, FractalError, FractalResult, Task};
use regex::Regex;
use serde_json::{json, Value};
use std::collections::BTreeSet;

/// Terminal work for a task that is not decomposed.
///
/// `Err` is an execution fault. A panic inside `execute` is caught at the
/// agent boundary and treated the same way.
#[async_trait]
pub trait LeafExecutor: Send + Sync {
    /// Run `task` on behalf of agent `executor`.
    async fn execute(&self, task: &Task, executor: AgentId) -> Result<Value, String>;
}

/// Quality of a leaf output, in [0, 1].
pub trait ScoringPolicy: Send + Sync {
    /// Score `output` produced for `task`.
    fn score(&self, task: &Task, output: &Value) -> f64;
}

/// Split-or-execute decisions.
pub trait DecompositionPolicy: Send + Sync {
    /// Complexity estimate in [0, 1].
    fn complexity(&self, task: &Task) -> f64;

    /// Whether `task` should be split under `ctx`.
    fn should_decompose(&self, task: &Task, ctx: &RecursionContext) -> bool;

    /// Ordered sub-tasks for a task that is being split.
    fn split(&self, task: &Task) -> Vec<Task>;

    /// How the sub-tasks of `task` are run.
    fn strategy(&self, task: &Task) -> ExecutionStrategy;

    /// How the sub-results of `task` are merged.
    fn synthesis(&self, task: &Task) -> SynthesisPolicy;
}

/// Leaf executor that echoes its input.
#[derive(Debug, Default, Clone, Copy)]
pub struct EchoExecutor;

#[async_trait]
impl LeafExecutor for EchoExecutor {
    async fn execute(&self, task: &Task, executor: AgentId) -> Result<Value, String> {
        Ok(json!({
            "task": task.name,
            "executor": executor.to_string(),
            "input": task.payload,
        }))
    }
}

/// 1.0 for any non-null output, 0.0 for null.
#[derive(Debug, Default, Clone, Copy)]
pub struct OutputPresenceScorer;

impl ScoringPolicy for OutputPresenceScorer {
    fn score(&self, _task: &Task, output: &Value) -> f64 {
        if output.is_null() {
            0.0
        } else {
            1.0
        }
    }
}

/// Default decomposition policy.
///
/// Complexity adds up:
/// - serialized payload size, `min(bytes / 2000, 0.3)`
/// - `0.5` when the task carries pre-defined sub-tasks
/// - `0.1` per required capability beyond the first
/// - `0.15` per distinct keyword found in the name or description
///
/// clamped to [0, 1].
#[derive(Debug, Clone)]
pub struct HeuristicDecomposer {
    config: DecompositionConfig,
    keywords: Option<Regex>,
}

impl HeuristicDecomposer {
    /// Fails when a keyword does not compile into the matcher.
    pub fn new(config: DecompositionConfig) -> FractalResult<Self> {
        let keywords = if config.keywords.is_empty() {
            None
        } else {
            let alternation = config
                .keywords
                .iter()
                .map(|k| regex::escape(&k.to_lowercase()))
                .collect::<Vec<_>>()
                .join("|");
            let re = Regex::new(&format!(r"(?i)\b(?:{alternation})\b")).map_err(|e| {
                FractalError::Config(format!("decomposition.keywords: {e}"))
            })?;
            Some(re)
        };
        Ok(Self { config, keywords })
    }

    /// Settings this decomposer was built from.
    pub fn config(&self) -> &DecompositionConfig {
        &self.config
    }

    /// Distinct keywords present in the task's name and description.
    pub fn keyword_hits(&self, task: &Task) -> usize {
        let Some(re) = &self.keywords else {
            return 0;
        };
        let haystack = format!("{} {}", task.name, task.description);
        re.find_iter(&haystack)
            .map(|m| m.as_str().to_lowercase())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

impl DecompositionPolicy for HeuristicDecomposer {
    fn complexity(&self, task: &Task) -> f64 {
        let payload_bytes = if task.payload.is_null() {
            0
        } else {
            task.payload.to_string().len()
        };
        let mut score = (payload_bytes as f64 / 2000.0).min(0.3);
        if !task.subtasks.is_empty() {
            score += 0.5;
        }
        score += 0.1 * task.required_capabilities.len().saturating_sub(1) as f64;
        score += 0.15 * self.keyword_hits(task) as f64;
        score.clamp(0.0, 1.0)
    }

    fn should_decompose(&self, task: &Task, ctx: &RecursionContext) -> bool {
        ctx.can_decompose() && self.complexity(task) >= self.config.complexity_threshold
    }

    fn split(&self, task: &Task) -> Vec<Task> {
        if !task.subtasks.is_empty() {
            return task.subtasks.clone();
        }
        synthesize_parts(task, self.config.synthesized_parts)
    }

    fn strategy(&self, task: &Task) -> ExecutionStrategy {
        task.strategy.unwrap_or(self.config.default_strategy)
    }

    fn synthesis(&self, _task: &Task) -> SynthesisPolicy {
        self.config.synthesis
    }
}

/// Split a task without pre-defined sub-tasks into `parts` pieces.
///
/// An array payload is cut into contiguous slices (fewer parts when the
/// array is shorter). Any other payload is handed to each part as
/// `{"part": i, "of": n, "input": payload}`.
pub fn synthesize_parts(task: &Task, parts: usize) -> Vec<Task> {
    let parts = parts.max(1);
    let payloads: Vec<Value> = match &task.payload {
        Value::Array(items) if !items.is_empty() => {
            let chunk = items.len().div_ceil(parts);
            items.chunks(chunk).map(|c| Value::Array(c.to_vec())).collect()
        }
        other => (0..parts)
            .map(|i| json!({ "part": i + 1, "of": parts, "input": other }))
            .collect(),
    };

    let n = payloads.len();
    payloads
        .into_iter()
        .enumerate()
        .map(|(i, payload)| {
            let mut part = Task::new(format!("{} [{}/{}]", task.name, i + 1, n))
                .with_payload(payload)
                .requiring(task.required_capabilities.clone())
                .with_minimum_quality(task.minimum_quality)
                .with_retry_budget(task.retry_budget);
            if !task.validation_required {
                part = part.without_validation();
            }
            part
        })
        .collect()
}
