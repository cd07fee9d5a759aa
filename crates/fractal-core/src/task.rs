use crate::id::{AgentId, TaskId};
use chrono::{DateTime, Utc};
use fractal_security::{Capability, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Default minimum acceptable quality for a task.
pub const DEFAULT_MINIMUM_QUALITY: f64 = 0.8;
/// Default number of extra attempts a delegator may make for a failed task.
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// How the sub-tasks of a decomposed task are run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// All sub-tasks concurrently.
    #[default]
    Parallel,
    /// One after the other, stopping at the first failure.
    Sequential,
    /// One after the other, each output feeding the next input.
    Pipeline,
}

impl fmt::Display for ExecutionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionStrategy::Parallel => write!(f, "parallel"),
            ExecutionStrategy::Sequential => write!(f, "sequential"),
            ExecutionStrategy::Pipeline => write!(f, "pipeline"),
        }
    }
}

/// A unit of work. Immutable once submitted; owned by whichever agent holds it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Task id.
    pub id: TaskId,
    /// Short label; read by keyword heuristics.
    pub name: String,
    /// Free text; read by keyword heuristics.
    #[serde(default)]
    pub description: String,
    /// Capabilities the executing agent must hold.
    pub required_capabilities: CapabilitySet,
    /// Input data.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Pre-defined sub-tasks. When present, decomposition uses them verbatim.
    #[serde(default)]
    pub subtasks: Vec<Task>,
    /// Quality gate threshold in [0, 1].
    pub minimum_quality: f64,
    /// Whether the quality gate applies.
    pub validation_required: bool,
    /// Retries allowed after a failed attempt.
    pub retry_budget: u32,
    /// Strategy hint for running `subtasks`; the decomposition policy decides when absent.
    #[serde(default)]
    pub strategy: Option<ExecutionStrategy>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task requiring only [`Capability::Execute`], with default quality
    /// gate (0.8, validation on) and retry budget (3).
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            description: String::new(),
            required_capabilities: CapabilitySet::from([Capability::Execute]),
            payload: serde_json::Value::Null,
            subtasks: Vec::new(),
            minimum_quality: DEFAULT_MINIMUM_QUALITY,
            validation_required: true,
            retry_budget: DEFAULT_RETRY_BUDGET,
            strategy: None,
            created_at: Utc::now(),
        }
    }

    /// Set the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the payload.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }

    /// Pre-define the sub-tasks.
    pub fn with_subtasks(mut self, subtasks: Vec<Task>) -> Self {
        self.subtasks = subtasks;
        self
    }

    /// Replace the required capability set.
    pub fn requiring(mut self, caps: CapabilitySet) -> Self {
        self.required_capabilities = caps;
        self
    }

    /// Set the quality gate threshold.
    pub fn with_minimum_quality(mut self, minimum_quality: f64) -> Self {
        self.minimum_quality = minimum_quality;
        self
    }

    /// Turn the quality gate off.
    pub fn without_validation(mut self) -> Self {
        self.validation_required = false;
        self
    }

    /// Set the retry budget.
    pub fn with_retry_budget(mut self, retry_budget: u32) -> Self {
        self.retry_budget = retry_budget;
        self
    }

    /// Hint how sub-tasks run.
    pub fn with_strategy(mut self, strategy: ExecutionStrategy) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Structural checks a delegator runs before handing the task off.
    ///
    /// Returns the list of problems found, empty when the task is well formed.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push(format!("task {} has an empty name", self.id));
        }
        if !(0.0..=1.0).contains(&self.minimum_quality) {
            problems.push(format!(
                "task {} minimum quality {} outside [0, 1]",
                self.id, self.minimum_quality
            ));
        }
        for sub in &self.subtasks {
            if sub.name.trim().is_empty() {
                problems.push(format!("sub-task {} of {} has an empty name", sub.id, self.id));
            }
        }
        problems
    }
}

/// Status of a [`TaskResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    /// Handed back to the delegator before any work started.
    RolledBack,
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::InProgress => write!(f, "in_progress"),
            TaskStatus::Completed => write!(f, "completed"),
            TaskStatus::Failed => write!(f, "failed"),
            TaskStatus::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// Why a result failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The agent lacked a required capability. Never retried.
    CapabilityMismatch,
    /// Leaf work returned an error or panicked.
    ExecutionFault,
    /// One or more sub-tasks failed and synthesis did not tolerate it.
    DecompositionFailure,
    /// Work succeeded but quality fell below the task's minimum.
    QualityBelowThreshold,
    /// A handoff prerequisite check failed; the task never reached the delegate.
    HandoffRejected,
}

impl FailureKind {
    /// Whether a delegator may re-run the task after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureKind::ExecutionFault
                | FailureKind::QualityBelowThreshold
                | FailureKind::DecompositionFailure
        )
    }
}

/// Fixed error text for capability mismatches.
pub const CAPABILITY_MISMATCH: &str = "capability mismatch: agent lacks a required capability";

/// Outcome of one execution attempt of a task.
///
/// Built through consuming transitions starting at [`TaskResult::in_progress`];
/// once returned to a caller it is never changed. A retry produces a new one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// Task this result is for.
    pub task_id: TaskId,
    /// Terminal or in-progress status.
    pub status: TaskStatus,
    /// Leaf output or merged sub-results.
    pub output: serde_json::Value,
    /// Quality score in [0, 1].
    pub quality: f64,
    /// Agent that produced the result.
    pub executor: AgentId,
    /// Wall time of the attempt.
    pub elapsed_ms: u64,
    /// Error text when not completed.
    pub error: Option<String>,
    /// Failure category when not completed.
    pub failure: Option<FailureKind>,
    /// Child results in sub-task submission order.
    pub sub_results: Vec<TaskResult>,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Attempt start.
    pub started_at: DateTime<Utc>,
    /// Set on reaching a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskResult {
    /// Start a new attempt.
    pub fn in_progress(task_id: TaskId, executor: AgentId, attempt: u32) -> Self {
        Self {
            task_id,
            status: TaskStatus::InProgress,
            output: serde_json::Value::Null,
            quality: 0.0,
            executor,
            elapsed_ms: 0,
            error: None,
            failure: None,
            sub_results: Vec::new(),
            attempt,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    /// A result that failed before any work began.
    pub fn rejected(
        task_id: TaskId,
        executor: AgentId,
        kind: FailureKind,
        error: impl Into<String>,
    ) -> Self {
        Self::in_progress(task_id, executor, 1).fail(kind, error)
    }

    /// Finish as completed. `quality` is clamped to [0, 1].
    pub fn complete(mut self, output: serde_json::Value, quality: f64) -> Self {
        self.status = TaskStatus::Completed;
        self.output = output;
        self.quality = quality.clamp(0.0, 1.0);
        self.finish()
    }

    /// Finish as failed. Output and quality already recorded are kept for diagnosis.
    pub fn fail(mut self, kind: FailureKind, error: impl Into<String>) -> Self {
        self.status = TaskStatus::Failed;
        self.failure = Some(kind);
        self.error = Some(error.into());
        self.finish()
    }

    /// Finish as rolled back: the task went back to its delegator untouched.
    pub fn roll_back(mut self, error: impl Into<String>) -> Self {
        self.status = TaskStatus::RolledBack;
        self.failure = Some(FailureKind::HandoffRejected);
        self.error = Some(error.into());
        self.finish()
    }

    /// Attach child results.
    pub fn with_sub_results(mut self, sub_results: Vec<TaskResult>) -> Self {
        self.sub_results = sub_results;
        self
    }

    fn finish(mut self) -> Self {
        let now = Utc::now();
        self.elapsed_ms = (now - self.started_at).num_milliseconds().max(0) as u64;
        self.completed_at = Some(now);
        self
    }

    /// Status is `Completed`.
    pub fn is_completed(&self) -> bool {
        self.status == TaskStatus::Completed
    }

    /// Failed or rolled back.
    pub fn is_failure(&self) -> bool {
        matches!(self.status, TaskStatus::Failed | TaskStatus::RolledBack)
    }

    /// Whether a delegator may retry the task that produced this result.
    pub fn is_retryable(&self) -> bool {
        self.is_failure() && self.failure.is_some_and(|k| k.is_retryable())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_task_defaults() {
        let task = Task::new("index corpus");
        assert_eq!(task.minimum_quality, 0.8);
        assert!(task.validation_required);
        assert_eq!(task.retry_budget, 3);
        assert!(task.required_capabilities.has(Capability::Execute));
        assert!(task.subtasks.is_empty());
        assert!(task.strategy.is_none());
    }

    #[test]
    fn test_task_validate() {
        assert!(Task::new("ok").validate().is_empty());

        let bad = Task::new("  ")
            .with_minimum_quality(1.5)
            .with_subtasks(vec![Task::new("")]);
        let problems = bad.validate();
        assert_eq!(problems.len(), 3, "{problems:?}");
    }

    #[test]
    fn test_result_complete_clamps_quality() {
        let result = TaskResult::in_progress(TaskId::new(), AgentId::new(), 1)
            .complete(serde_json::json!("done"), 1.4);
        assert_eq!(result.status, TaskStatus::Completed);
        assert_eq!(result.quality, 1.0);
        assert!(result.completed_at.is_some());
        assert!(result.error.is_none());
    }

    #[test]
    fn test_failed_result_keeps_output() {
        let result = TaskResult::in_progress(TaskId::new(), AgentId::new(), 2)
            .complete(serde_json::json!({"n": 1}), 0.5)
            .fail(FailureKind::QualityBelowThreshold, "too low");
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.quality, 0.5);
        assert_eq!(result.output["n"], 1);
        assert_eq!(result.attempt, 2);
        assert!(result.is_retryable());
    }

    #[test]
    fn test_capability_mismatch_not_retryable() {
        let result = TaskResult::rejected(
            TaskId::new(),
            AgentId::new(),
            FailureKind::CapabilityMismatch,
            CAPABILITY_MISMATCH,
        );
        assert!(result.is_failure());
        assert!(!result.is_retryable());
    }

    #[test]
    fn test_rolled_back_counts_as_failure() {
        let result = TaskResult::in_progress(TaskId::new(), AgentId::new(), 1).roll_back("receiver busy");
        assert_eq!(result.status, TaskStatus::RolledBack);
        assert_eq!(result.failure, Some(FailureKind::HandoffRejected));
        assert!(result.is_failure());
        assert!(!result.is_retryable());
    }

    #[test]
    fn test_task_status_serialization() {
        let json = serde_json::to_string(&TaskStatus::RolledBack).unwrap();
        assert_eq!(json, "\"rolled_back\"");
        let parsed: ExecutionStrategy = serde_json::from_str("\"pipeline\"").unwrap();
        assert_eq!(parsed, ExecutionStrategy::Pipeline);
    }
}
