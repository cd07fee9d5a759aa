use crate::config::SynthesisPolicy;
use fractal_core::{AgentId, FailureKind, Task, TaskResult};
use serde_json::{Map, Value};

/// Merge sub-results into the parent's result.
///
/// `sub_results` must be in sub-task submission order; "first failure"
/// means first in that order, not first to finish.
pub fn synthesize(
    task: &Task,
    executor: AgentId,
    attempt: u32,
    sub_results: Vec<TaskResult>,
    policy: SynthesisPolicy,
) -> TaskResult {
    let pending = TaskResult::in_progress(task.id, executor, attempt);
    if sub_results.is_empty() {
        return pending.fail(FailureKind::DecompositionFailure, "decomposition produced no sub-results");
    }

    let completed: Vec<&TaskResult> = sub_results.iter().filter(|r| r.is_completed()).collect();
    let failed: Vec<&TaskResult> = sub_results.iter().filter(|r| !r.is_completed()).collect();

    let result = match policy {
        SynthesisPolicy::FailFast => match failed.first() {
            None => pending.complete(output_map(&completed), mean_quality(&completed)),
            Some(first) => pending.fail(
                FailureKind::DecompositionFailure,
                format!(
                    "sub-task {} failed: {}",
                    first.task_id,
                    first.error.as_deref().unwrap_or("no error recorded")
                ),
            ),
        },
        SynthesisPolicy::Majority => {
            let failed_ids = failed
                .iter()
                .map(|r| r.task_id.to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if completed.len() * 2 > sub_results.len() {
                let mut merged = pending.complete(output_map(&completed), mean_quality(&completed));
                if !failed.is_empty() {
                    merged.error = Some(format!("tolerated failed sub-tasks [{failed_ids}]"));
                }
                merged
            } else {
                pending.fail(
                    FailureKind::DecompositionFailure,
                    format!(
                        "majority not reached: {} of {} sub-tasks failed [{failed_ids}]",
                        failed.len(),
                        sub_results.len()
                    ),
                )
            }
        }
    };

    tracing::info!(
        task_id = %task.id,
        agent_id = %executor,
        ?policy,
        completed = completed.len(),
        failed = failed.len(),
        status = %result.status,
        "Synthesized sub-results"
    );
    result.with_sub_results(sub_results)
}

/// Downgrade a completed result whose quality misses the task's minimum.
pub fn quality_gate(task: &Task, result: TaskResult) -> TaskResult {
    if task.validation_required && result.is_completed() && result.quality < task.minimum_quality {
        tracing::warn!(
            task_id = %task.id,
            quality = result.quality,
            minimum = task.minimum_quality,
            "Result below minimum quality"
        );
        let reason = format!(
            "quality {:.3} below minimum {:.3}",
            result.quality, task.minimum_quality
        );
        return result.fail(FailureKind::QualityBelowThreshold, reason);
    }
    result
}

fn mean_quality(results: &[&TaskResult]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    results.iter().map(|r| r.quality).sum::<f64>() / results.len() as f64
}

fn output_map(results: &[&TaskResult]) -> Value {
    let map: Map<String, Value> = results
        .iter()
        .map(|r| (r.task_id.to_string(), r.output.clone()))
        .collect();
    Value::Object(map)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use fractal_core::{TaskId, TaskStatus};
    use serde_json::json;

    fn done(quality: f64) -> TaskResult {
        TaskResult::in_progress(TaskId::new(), AgentId::new(), 1).complete(json!(quality), quality)
    }

    fn broken(msg: &str) -> TaskResult {
        TaskResult::in_progress(TaskId::new(), AgentId::new(), 1)
            .fail(FailureKind::ExecutionFault, msg)
    }

    #[test]
    fn test_mean_quality_and_output_map() {
        let task = Task::new("parent");
        let subs = vec![done(0.9), done(0.7)];
        let ids: Vec<_> = subs.iter().map(|r| r.task_id).collect();

        let result = synthesize(&task, AgentId::new(), 1, subs, SynthesisPolicy::FailFast);
        assert_eq!(result.status, TaskStatus::Completed);
        assert!((result.quality - 0.8).abs() < 1e-9);
        assert_eq!(result.sub_results.len(), 2);
        for id in ids {
            assert!(result.output.get(id.to_string()).is_some());
        }
    }

    #[test]
    fn test_fail_fast_names_first_failure_in_order() {
        let task = Task::new("parent");
        let b = broken("disk full");
        let c = broken("other");
        let b_id = b.task_id;
        let c_id = c.task_id;

        let result = synthesize(&task, AgentId::new(), 1, vec![done(1.0), b, c], SynthesisPolicy::FailFast);
        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.failure, Some(FailureKind::DecompositionFailure));
        let err = result.error.clone().unwrap();
        assert!(err.contains(&b_id.to_string()), "{err}");
        assert!(err.contains("disk full"), "{err}");
        assert!(!err.contains(&c_id.to_string()), "{err}");
        assert_eq!(result.sub_results.len(), 3);
    }

    #[test]
    fn test_majority_tolerates_minority_failure() {
        let task = Task::new("parent");
        let bad = broken("boom");
        let bad_id = bad.task_id;
        let result = synthesize(
            &task,
            AgentId::new(),
            1,
            vec![done(0.6), bad, done(1.0)],
            SynthesisPolicy::Majority,
        );
        assert_eq!(result.status, TaskStatus::Completed);
        assert!((result.quality - 0.8).abs() < 1e-9);
        assert_eq!(result.output.as_object().unwrap().len(), 2);
        assert!(result.error.unwrap().contains(&bad_id.to_string()));
    }

    #[test]
    fn test_majority_needs_strictly_more_than_half() {
        let task = Task::new("parent");
        let result = synthesize(
            &task,
            AgentId::new(),
            1,
            vec![done(1.0), broken("x")],
            SynthesisPolicy::Majority,
        );
        assert_eq!(result.status, TaskStatus::Failed);
        assert!(result.error.unwrap().contains("1 of 2"));
    }

    #[test]
    fn test_rolled_back_counts_as_failure() {
        let task = Task::new("parent");
        let rolled = TaskResult::in_progress(TaskId::new(), AgentId::new(), 1).roll_back("busy");
        let result = synthesize(&task, AgentId::new(), 1, vec![done(1.0), rolled], SynthesisPolicy::FailFast);
        assert!(result.is_failure());
    }

    #[test]
    fn test_empty_sub_results_fail() {
        let task = Task::new("parent");
        let result = synthesize(&task, AgentId::new(), 1, Vec::new(), SynthesisPolicy::FailFast);
        assert_eq!(result.failure, Some(FailureKind::DecompositionFailure));
    }

    #[test]
    fn test_quality_gate_downgrades() {
        let task = Task::new("strict").with_minimum_quality(0.9);
        let gated = quality_gate(&task, done(0.85));
        assert_eq!(gated.status, TaskStatus::Failed);
        assert_eq!(gated.failure, Some(FailureKind::QualityBelowThreshold));
        assert_eq!(gated.quality, 0.85);
        assert!(gated.error.unwrap().contains("below minimum"));
    }

    #[test]
    fn test_quality_gate_respects_flag_and_threshold() {
        let lax = Task::new("lax").with_minimum_quality(0.9).without_validation();
        assert!(quality_gate(&lax, done(0.1)).is_completed());

        let task = Task::new("ok").with_minimum_quality(0.9);
        assert!(quality_gate(&task, done(0.9)).is_completed());

        let already_failed = broken("x");
        let gated = quality_gate(&task, already_failed);
        assert_eq!(gated.failure, Some(FailureKind::ExecutionFault));
    }
}
