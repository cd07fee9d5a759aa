#![allow(clippy::unwrap_used, clippy::expect_used)]

use fractal_core::*;
use fractal_security::{AgentRole, Capability, CapabilitySet, SecurityError};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// 1. Task serialization keeps nested sub-tasks and hints
// ---------------------------------------------------------------------------

#[test]
fn task_serialization_keeps_nested_subtasks() {
    let task = Task::new("build report")
        .with_description("integrate multiple sources")
        .with_payload(serde_json::json!({"sources": ["a", "b"]}))
        .with_strategy(ExecutionStrategy::Sequential)
        .with_subtasks(vec![
            Task::new("fetch").with_retry_budget(0),
            Task::new("render").requiring(CapabilitySet::from([Capability::Execute, Capability::Validate])),
        ]);

    let json = serde_json::to_string(&task).unwrap();
    let parsed: Task = serde_json::from_str(&json).unwrap();

    assert_eq!(parsed.id, task.id);
    assert_eq!(parsed.strategy, Some(ExecutionStrategy::Sequential));
    assert_eq!(parsed.subtasks.len(), 2);
    assert_eq!(parsed.subtasks[0].retry_budget, 0);
    assert!(parsed.subtasks[1].required_capabilities.has(Capability::Validate));
    assert_eq!(parsed.payload["sources"][1], "b");
}

// ---------------------------------------------------------------------------
// 2. Result transitions never lose sub-results
// ---------------------------------------------------------------------------

#[test]
fn result_with_sub_results_then_fail() {
    let executor = AgentId::new();
    let child = TaskResult::in_progress(TaskId::new(), executor, 1)
        .complete(serde_json::json!("ok"), 0.9);
    let parent = TaskResult::in_progress(TaskId::new(), executor, 1)
        .with_sub_results(vec![child.clone()])
        .fail(FailureKind::DecompositionFailure, "sub-task failed");

    assert_eq!(parent.status, TaskStatus::Failed);
    assert_eq!(parent.sub_results.len(), 1);
    assert_eq!(parent.sub_results[0].task_id, child.task_id);
    assert!(parent.is_retryable());
}

// ---------------------------------------------------------------------------
// 3. Error Display and From impls
// ---------------------------------------------------------------------------

#[test]
fn error_display_and_from_impls() {
    let agent_err = FractalError::Agent("loop crashed".to_string());
    assert_eq!(agent_err.to_string(), "Agent error: loop crashed");

    let lifecycle_err = FractalError::Lifecycle("already terminated".to_string());
    assert_eq!(lifecycle_err.to_string(), "Lifecycle error: already terminated");

    let channel_err = FractalError::Channel("closed".to_string());
    assert_eq!(channel_err.to_string(), "Channel error: closed");

    let config_err = FractalError::Config("missing key".to_string());
    assert_eq!(config_err.to_string(), "Config error: missing key");

    let contract = Uuid::new_v4();
    let violation = FractalError::PrerequisiteViolation {
        contract,
        unsatisfied: vec!["input_validated".to_string(), "receiver_ready".to_string()],
    };
    let text = violation.to_string();
    assert!(text.contains(&contract.to_string()));
    assert!(text.ends_with("[input_validated, receiver_ready]"), "{text}");

    let permission: FractalError = SecurityError::MissingSpawn { role: AgentRole::Executor }.into();
    assert!(permission.to_string().starts_with("Permission error:"));

    let serde_err = serde_json::from_str::<serde_json::Value>("not json").unwrap_err();
    let err: FractalError = serde_err.into();
    assert!(err.to_string().starts_with("JSON error:"));

    let toml_err = toml::from_str::<toml::Value>("= broken").unwrap_err();
    let err: FractalError = toml_err.into();
    assert!(err.to_string().starts_with("TOML error:"));

    let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
    let err: FractalError = io_err.into();
    assert!(err.to_string().starts_with("IO error:"));
}

// ---------------------------------------------------------------------------
// 4. Message kinds serialize to snake_case strings
// ---------------------------------------------------------------------------

#[test]
fn message_kind_serialization() {
    let json = serde_json::to_string(&MessageKind::AwarenessUpdate).unwrap();
    assert_eq!(json, "\"awareness_update\"");
    assert_eq!(MessageKind::PartialResult.to_string(), "partial_result");

    let kind: MessageKind = serde_json::from_str("\"validation_result\"").unwrap();
    assert_eq!(kind, MessageKind::ValidationResult);

    let bad: Result<MessageKind, _> = serde_json::from_str("\"unknown\"");
    assert!(bad.is_err());
}

// ---------------------------------------------------------------------------
// 5. Broadcast vs direct addressing
// ---------------------------------------------------------------------------

#[test]
fn message_addressing() {
    let a = AgentId::new();
    let b = AgentId::new();

    let direct = AgentMessage::direct(a, b, MessageKind::Handoff, serde_json::Value::Null);
    assert_eq!(direct.recipient, Recipient::Agent(b));
    assert!(!direct.is_broadcast());
    assert_eq!(direct.priority, Priority::Normal);

    let beat = AgentMessage::heartbeat(a);
    assert!(beat.is_broadcast());
    assert_ne!(beat.id, direct.id);
}
