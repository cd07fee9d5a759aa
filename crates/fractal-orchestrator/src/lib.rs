//! Hierarchical task delegation engine.
//!
//! A submitted task is either executed directly or split into sub-tasks that
//! are handed to dynamically spawned child agents, run in parallel, in
//! sequence or as a pipeline, and merged back into one result. Every descent
//! spends recursion budget, and every handoff is gated by a prerequisite
//! contract.
//!
//! # Main types
//!
//! - [`Engine`] — The external boundary: `submit` a task, `observe` the population.
//! - [`Agent`] — Lifecycle state machine, message loop, execution and delegation.
//! - [`HandoffContract`] — Prerequisite checklist gating one delegation.
//! - [`RecursionContext`] — Decaying budget threaded through every descent.
//! - [`DecompositionPolicy`] / [`ScoringPolicy`] / [`LeafExecutor`] — Injected behavior.
//! - [`AgentRegistry`] / [`PopulationSnapshot`] — Non-owning index of live agents and its aggregate view.

/// Agent lifecycle, execution and delegation.
pub mod agent;
/// Engine configuration loaded from TOML.
pub mod config;
/// Shared dependencies handed to every agent.
pub mod context;
/// External entry point.
pub mod engine;
/// Prerequisite-gated handoff contracts.
pub mod handoff;
/// Mailboxes, the broadcast bus and message loops.
pub mod mailbox;
/// Decomposition, scoring and leaf execution policies.
pub mod policy;
/// Agent registry, population snapshot and monitor.
pub mod population;
/// Recursion budget.
pub mod recursion;
/// Merging sub-results and quality gating.
pub mod synthesis;
/// Agent state, identity and counters.
pub mod types;

pub use agent::Agent;
pub use config::{
    DecompositionConfig, EngineConfig, MailboxConfig, PopulationConfig, RecursionConfig,
    RetryConfig, SynthesisPolicy,
};
pub use context::EngineContext;
pub use engine::{Engine, EngineBuilder};
pub use handoff::{HandoffContract, Prerequisite, PrerequisiteKind, PrerequisiteStatus};
pub use mailbox::{MailboxStats, MessageBus};
pub use policy::{
    DecompositionPolicy, EchoExecutor, HeuristicDecomposer, LeafExecutor, OutputPresenceScorer,
    ScoringPolicy,
};
pub use population::{AgentRegistry, PopulationMonitor, PopulationSnapshot};
pub use recursion::RecursionContext;
pub use synthesis::{quality_gate, synthesize};
pub use types::{AgentIdentity, AgentMetrics, AgentState};
