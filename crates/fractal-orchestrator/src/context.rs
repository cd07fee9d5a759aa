use crate::config::EngineConfig;
use crate::mailbox::MessageBus;
use crate::policy::{
    DecompositionPolicy, EchoExecutor, HeuristicDecomposer, LeafExecutor, OutputPresenceScorer,
    ScoringPolicy,
};
use crate::population::AgentRegistry;
use fractal_core::FractalResult;
use std::sync::Arc;

/// Everything an agent needs from its surroundings, handed over at
/// construction time. One context is shared by every agent of an engine.
pub struct EngineContext {
    /// Validated configuration.
    pub config: EngineConfig,
    /// Non-owning index of live agents.
    pub registry: Arc<AgentRegistry>,
    /// Broadcast bus every message loop subscribes to.
    pub bus: MessageBus,
    /// Split-or-execute policy.
    pub decomposition: Arc<dyn DecompositionPolicy>,
    /// Leaf output scoring.
    pub scoring: Arc<dyn ScoringPolicy>,
    /// Terminal work for undecomposed tasks.
    pub executor: Arc<dyn LeafExecutor>,
}

impl EngineContext {
    /// Context with the built-in policies configured from `config`.
    pub fn new(config: EngineConfig) -> FractalResult<Self> {
        let decomposition = HeuristicDecomposer::new(config.decomposition.clone())?;
        let bus = MessageBus::new(config.mailbox.broadcast_capacity);
        Ok(Self {
            config,
            registry: Arc::new(AgentRegistry::new()),
            bus,
            decomposition: Arc::new(decomposition),
            scoring: Arc::new(OutputPresenceScorer),
            executor: Arc::new(EchoExecutor),
        })
    }

    /// Swap the decomposition policy.
    pub fn with_decomposition(mut self, policy: Arc<dyn DecompositionPolicy>) -> Self {
        self.decomposition = policy;
        self
    }

    /// Swap the scoring policy.
    pub fn with_scoring(mut self, policy: Arc<dyn ScoringPolicy>) -> Self {
        self.scoring = policy;
        self
    }

    /// Swap the leaf executor.
    pub fn with_executor(mut self, executor: Arc<dyn LeafExecutor>) -> Self {
        self.executor = executor;
        self
    }
}

impl std::fmt::Debug for EngineContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineContext")
            .field("config", &self.config)
            .field("agents", &self.registry.len())
            .finish_non_exhaustive()
    }
}
