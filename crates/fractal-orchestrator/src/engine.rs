use crate::agent::Agent;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::policy::{DecompositionPolicy, LeafExecutor, ScoringPolicy};
use crate::population::{PopulationMonitor, PopulationSnapshot};
use crate::recursion::RecursionContext;
use crate::types::AgentState;
use fractal_core::telemetry::init_tracing;
use fractal_core::{AgentMessage, FractalError, FractalResult, Task, TaskResult};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{info, warn};

/// The delegation engine.
/// Every submission runs through a single root orchestrator agent.
pub struct Engine {
    ctx: Arc<EngineContext>,
    root: Arc<Agent>,
    submissions: Mutex<()>,
    monitor: parking_lot::Mutex<Option<PopulationMonitor>>,
}

/// Configures policies before the root agent is started.
pub struct EngineBuilder {
    config: EngineConfig,
    decomposition: Option<Arc<dyn DecompositionPolicy>>,
    scoring: Option<Arc<dyn ScoringPolicy>>,
    executor: Option<Arc<dyn LeafExecutor>>,
    monitor: bool,
    tracing: bool,
}

impl EngineBuilder {
    /// Replace the default [`crate::policy::HeuristicDecomposer`].
    pub fn decomposition(mut self, policy: Arc<dyn DecompositionPolicy>) -> Self {
        self.decomposition = Some(policy);
        self
    }

    /// Replace the default [`crate::policy::OutputPresenceScorer`].
    pub fn scoring(mut self, policy: Arc<dyn ScoringPolicy>) -> Self {
        self.scoring = Some(policy);
        self
    }

    /// Replace the default [`crate::policy::EchoExecutor`].
    pub fn executor(mut self, executor: Arc<dyn LeafExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Refresh the population snapshot every `population.refresh_interval_ms`.
    pub fn with_monitor(mut self) -> Self {
        self.monitor = true;
        self
    }

    /// Install the global tracing subscriber from `logging` during `build`.
    pub fn with_tracing(mut self) -> Self {
        self.tracing = true;
        self
    }

    /// Validate the configuration and start the root agent.
    pub async fn build(self) -> FractalResult<Engine> {
        self.config.validate()?;
        if self.tracing {
            init_tracing(&self.config.logging)?;
        }

        let refresh = Duration::from_millis(self.config.population.refresh_interval_ms);
        let mut ctx = EngineContext::new(self.config)?;
        if let Some(policy) = self.decomposition {
            ctx = ctx.with_decomposition(policy);
        }
        if let Some(policy) = self.scoring {
            ctx = ctx.with_scoring(policy);
        }
        if let Some(executor) = self.executor {
            ctx = ctx.with_executor(executor);
        }
        let ctx = Arc::new(ctx);

        let root = Agent::root(Arc::clone(&ctx));
        root.initialize()?;

        let monitor = self
            .monitor
            .then(|| PopulationMonitor::spawn(Arc::clone(&ctx.registry), refresh));

        info!(root = %root.id(), "Engine started");
        Ok(Engine {
            ctx,
            root,
            submissions: Mutex::new(()),
            monitor: parking_lot::Mutex::new(monitor),
        })
    }
}

impl Engine {
    /// Start configuring an engine with the built-in policies.
    pub fn builder(config: EngineConfig) -> EngineBuilder {
        EngineBuilder {
            config,
            decomposition: None,
            scoring: None,
            executor: None,
            monitor: false,
            tracing: false,
        }
    }

    /// The root orchestrator agent.
    pub fn root(&self) -> &Arc<Agent> {
        &self.root
    }

    /// The context shared by every agent of this engine.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// The validated configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.ctx.config
    }

    /// Run `task` to completion and return its result.
    ///
    /// Task failures are `Ok` results with a failed status. `Err` is reserved
    /// for invalid input, a shut-down engine, and orchestration faults such
    /// as a prerequisite violation, which abort the submission.
    pub async fn submit(&self, task: Task) -> FractalResult<TaskResult> {
        let problems = task.validate();
        if !problems.is_empty() {
            return Err(FractalError::Agent(format!(
                "invalid task: {}",
                problems.join("; ")
            )));
        }

        let _turn = self.submissions.lock().await;
        if self.root.state() == AgentState::Terminated {
            return Err(FractalError::Lifecycle("engine is shut down".into()));
        }

        let task_id = task.id;
        let started = Instant::now();
        info!(%task_id, name = %task.name, subtasks = task.subtasks.len(), "Task submitted");

        let ctx = RecursionContext::root(&self.ctx.config.recursion);
        let outcome = self.root.execute(task, ctx).await;
        self.ctx.registry.refresh();

        match &outcome {
            Ok(result) if result.is_completed() => info!(
                %task_id,
                quality = result.quality,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Task completed"
            ),
            Ok(result) => warn!(
                %task_id,
                status = %result.status,
                error = result.error.as_deref().unwrap_or_default(),
                "Task did not complete"
            ),
            Err(e) => tracing::error!(%task_id, error = %e, "Submission aborted"),
        }
        outcome
    }

    /// The most recently computed population snapshot.
    pub fn observe(&self) -> PopulationSnapshot {
        self.ctx.registry.observe()
    }

    /// Recompute the snapshot now.
    pub fn refresh(&self) -> PopulationSnapshot {
        self.ctx.registry.refresh()
    }

    /// Broadcast a heartbeat to every live agent. Returns the receiver count.
    pub fn heartbeat(&self) -> FractalResult<usize> {
        self.ctx.bus.publish(AgentMessage::heartbeat(self.root.id()))
    }

    /// Terminate the whole agent tree. Waits for any running submission.
    pub async fn shutdown(&self) {
        let _turn = self.submissions.lock().await;
        let monitor = self.monitor.lock().take();
        if let Some(monitor) = monitor {
            monitor.stop().await;
        }
        self.root.terminate().await;
        let snapshot = self.ctx.registry.refresh();
        info!(remaining = snapshot.total, "Engine shut down");
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use fractal_core::MessageKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_submit_atomic_task() {
        let engine = Engine::builder(EngineConfig::default()).build().await.unwrap();
        let result = engine
            .submit(Task::new("hello").with_payload(json!("world")))
            .await
            .unwrap();
        assert!(result.is_completed());
        assert_eq!(result.executor, engine.root().id());
        assert_eq!(result.output["input"], "world");
        assert_eq!(engine.observe().total, 1);
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_task_is_rejected() {
        let engine = Engine::builder(EngineConfig::default()).build().await.unwrap();
        let err = engine
            .submit(Task::new("x").with_minimum_quality(2.0))
            .await
            .unwrap_err();
        assert!(matches!(err, FractalError::Agent(_)));
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_fails_build() {
        let mut config = EngineConfig::default();
        config.recursion.decay = 0.0;
        assert!(matches!(
            Engine::builder(config).build().await,
            Err(FractalError::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_submit_after_shutdown() {
        let engine = Engine::builder(EngineConfig::default()).build().await.unwrap();
        engine.shutdown().await;
        assert_eq!(engine.root().state(), AgentState::Terminated);
        assert_eq!(engine.observe().total, 0);
        let err = engine.submit(Task::new("late")).await.unwrap_err();
        assert!(matches!(err, FractalError::Lifecycle(_)));
    }

    #[tokio::test]
    async fn test_heartbeat_reaches_root() {
        let engine = Engine::builder(EngineConfig::default()).build().await.unwrap();
        assert_eq!(engine.heartbeat().unwrap(), 1);
        for _ in 0..200 {
            if engine.root().messages_processed().count(MessageKind::Heartbeat) == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(engine.root().messages_processed().last_heartbeat.is_some());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_monitor_runs_until_shutdown() {
        let mut config = EngineConfig::default();
        config.population.refresh_interval_ms = 5;
        let engine = Engine::builder(config).with_monitor().build().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(engine.observe().count_state(AgentState::Ready), 1);
        engine.shutdown().await;
        assert!(engine.monitor.lock().is_none());
    }
}
