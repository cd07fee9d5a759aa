//! Core types and error definitions for the Fractal delegation engine.
//!
//! This crate provides the foundational types shared by every Fractal crate:
//! the unified error enum, identifiers, the task/result model and the agent
//! message model.
//!
//! # Main types
//!
//! - [`FractalError`] — Unified error enum for all Fractal subsystems.
//! - [`FractalResult`] — Convenience alias for `Result<T, FractalError>`.
//! - [`Task`] — Immutable unit of work submitted to the engine.
//! - [`TaskResult`] — Outcome of one execution attempt, with nested sub-results.
//! - [`AgentMessage`] — A message delivered to one agent mailbox or broadcast.

/// Agent and task identifiers.
pub mod id;
/// Agent message model.
pub mod message;
/// Task and result model.
pub mod task;
/// Tracing subscriber setup.
pub mod telemetry;

pub use id::{AgentId, TaskId};
pub use message::{AgentMessage, MessageKind, Priority, Recipient};
pub use task::{ExecutionStrategy, FailureKind, Task, TaskResult, TaskStatus};

use fractal_security::SecurityError;
use uuid::Uuid;

// --- Error types ---

/// Top-level error type for the Fractal engine.
///
/// Task-domain failures are never errors: they travel as a [`TaskResult`]
/// with [`TaskStatus::Failed`]. An `Err` means the orchestration itself went
/// wrong or a caller broke an API contract.
#[derive(Debug, thiserror::Error)]
pub enum FractalError {
    /// An error raised by an agent outside of task execution.
    #[error("Agent error: {0}")]
    Agent(String),

    /// An illegal lifecycle transition (e.g. re-initializing a terminated agent).
    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    /// A spawn request refused by the capability model.
    #[error("Permission error: {0}")]
    Permission(#[from] SecurityError),

    /// A mailbox or broadcast channel failure.
    #[error("Channel error: {0}")]
    Channel(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// A handoff attempted while prerequisites were not all satisfied.
    #[error("Prerequisite violation on contract {contract}: unsatisfied [{}]", unsatisfied.join(", "))]
    PrerequisiteViolation {
        /// The contract the handoff was attempted on.
        contract: Uuid,
        /// Names of every prerequisite not in the satisfied state.
        unsatisfied: Vec<String>,
    },

    /// An error from the orchestration engine.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A TOML parse error.
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`FractalError`].
pub type FractalResult<T> = Result<T, FractalError>;
