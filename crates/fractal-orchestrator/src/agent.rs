//! The generic agent: lifecycle, message loop, execution and delegation.
//!
//! A parent exclusively owns its children (`Arc`) and is the only one that
//! terminates them. A child knows its parent only by id and reaches it
//! through the registry.

use crate::context::EngineContext;
use crate::handoff::{
    HandoffContract, BUDGET_AVAILABLE, CAPABILITIES_MATCHED, INPUT_VALIDATED, RECEIVER_READY,
};
use crate::mailbox::{mailbox, Mailbox, MailboxStats, MessageLoop, TerminateHook};
use crate::recursion::RecursionContext;
use crate::synthesis::{quality_gate, synthesize};
use crate::types::{AgentIdentity, AgentMetrics, AgentState};
use fractal_core::task::CAPABILITY_MISMATCH;
use fractal_core::{
    AgentId, AgentMessage, ExecutionStrategy, FailureKind, FractalError, FractalResult,
    MessageKind, Task, TaskResult,
};
use fractal_security::{authorize_spawn, AgentLevel, AgentRole, Capability, CapabilitySet};
use futures_util::future::{join_all, BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

/// One node of the delegation tree.
pub struct Agent {
    identity: AgentIdentity,
    ctx: Arc<EngineContext>,
    state: Mutex<AgentState>,
    children: Mutex<Vec<Arc<Agent>>>,
    /// Set while a delegating parent has this agent reserved for one sub-task.
    claimed: AtomicBool,
    terminating: AtomicBool,
    tasks_executed: AtomicU64,
    tasks_failed: AtomicU64,
    children_spawned: AtomicU64,
    mailbox: Mailbox,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<AgentMessage>>>,
    stats: Arc<Mutex<MailboxStats>>,
    message_loop: Mutex<Option<MessageLoop>>,
}

impl Agent {
    /// Create an agent in the `Embryonic` state. Call [`Agent::initialize`] next.
    pub fn new(identity: AgentIdentity, ctx: Arc<EngineContext>) -> Arc<Self> {
        let (mailbox, inbox) = mailbox(identity.id);
        Arc::new(Self {
            identity,
            ctx,
            state: Mutex::new(AgentState::Embryonic),
            children: Mutex::new(Vec::new()),
            claimed: AtomicBool::new(false),
            terminating: AtomicBool::new(false),
            tasks_executed: AtomicU64::new(0),
            tasks_failed: AtomicU64::new(0),
            children_spawned: AtomicU64::new(0),
            mailbox,
            inbox: Mutex::new(Some(inbox)),
            stats: Arc::new(Mutex::new(MailboxStats::default())),
            message_loop: Mutex::new(None),
        })
    }

    /// The top of a delegation tree: an orchestrator holding every capability.
    pub fn root(ctx: Arc<EngineContext>) -> Arc<Self> {
        let role = AgentRole::Orchestrator;
        Self::new(AgentIdentity::new(role, role.default_capabilities(), None), ctx)
    }

    /// Stable id, also the registry key.
    pub fn id(&self) -> AgentId {
        self.identity.id
    }

    /// The engine context shared with every other agent.
    pub fn context(&self) -> &Arc<EngineContext> {
        &self.ctx
    }

    /// Immutable identity fixed at spawn time.
    pub fn identity(&self) -> &AgentIdentity {
        &self.identity
    }

    /// Role tag.
    pub fn role(&self) -> AgentRole {
        self.identity.role
    }

    /// Hierarchy level of the role.
    pub fn level(&self) -> AgentLevel {
        self.identity.level
    }

    /// Capabilities granted at spawn time.
    pub fn capabilities(&self) -> &CapabilitySet {
        &self.identity.capabilities
    }

    /// Parent id, `None` for the root.
    pub fn parent(&self) -> Option<AgentId> {
        self.identity.parent
    }

    /// Current lifecycle state.
    pub fn state(&self) -> AgentState {
        *self.state.lock()
    }

    /// Owned children, in spawn order.
    pub fn children(&self) -> Vec<Arc<Agent>> {
        self.children.lock().clone()
    }

    /// `Ready` and not reserved by a delegating parent.
    pub fn is_idle(&self) -> bool {
        !self.claimed.load(Ordering::Acquire) && self.state() == AgentState::Ready
    }

    /// Snapshot of this agent's counters.
    pub fn metrics(&self) -> AgentMetrics {
        AgentMetrics {
            tasks_executed: self.tasks_executed.load(Ordering::Relaxed),
            tasks_failed: self.tasks_failed.load(Ordering::Relaxed),
            children_spawned: self.children_spawned.load(Ordering::Relaxed),
            messages_processed: self.stats.lock().processed,
        }
    }

    /// What the message loop has handled so far.
    pub fn messages_processed(&self) -> MailboxStats {
        self.stats.lock().clone()
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Start the message loop, move to `Ready` and join the registry.
    ///
    /// Only valid once, from `Embryonic`. A terminated agent cannot come back.
    pub fn initialize(self: &Arc<Self>) -> FractalResult<()> {
        {
            let mut state = self.state.lock();
            match *state {
                AgentState::Embryonic => *state = AgentState::Initializing,
                AgentState::Terminated => {
                    return Err(FractalError::Lifecycle(format!(
                        "agent {} is terminated and cannot be re-initialized",
                        self.id()
                    )))
                }
                other => {
                    return Err(FractalError::Lifecycle(format!(
                        "agent {} is already {other}",
                        self.id()
                    )))
                }
            }
        }

        let inbox = self.inbox.lock().take().ok_or_else(|| {
            FractalError::Lifecycle(format!("agent {} has no inbox to drain", self.id()))
        })?;
        let owner = Arc::downgrade(self);
        let on_terminate: TerminateHook = Box::new(move || {
            if let Some(agent) = owner.upgrade() {
                tokio::spawn(agent.terminate());
            }
        });
        let msg_loop = MessageLoop::start(
            self.id(),
            inbox,
            Some(self.ctx.bus.subscribe()),
            Arc::clone(&self.stats),
            self.ctx.config.mailbox.poll_interval(),
            Some(on_terminate),
        );
        *self.message_loop.lock() = Some(msg_loop);

        self.transition(AgentState::Ready)?;
        self.ctx.registry.register(self);
        tracing::debug!(
            agent_id = %self.id(),
            role = %self.role(),
            level = %self.level(),
            parent = ?self.parent(),
            "Agent initialized"
        );
        Ok(())
    }

    /// Queue a message for this agent's loop. Never blocks.
    ///
    /// A `TERMINATE` message ends in [`Agent::terminate`], run on its own task.
    pub fn receive_message(&self, message: AgentMessage) -> FractalResult<()> {
        if self.state() == AgentState::Terminated {
            return Err(FractalError::Lifecycle(format!(
                "agent {} is terminated",
                self.id()
            )));
        }
        self.mailbox.deliver(message)
    }

    /// Create, initialize and adopt a child.
    ///
    /// Requires the spawn capability, a role at or below this agent's level,
    /// and only capabilities this agent holds itself.
    pub fn spawn_child(
        self: &Arc<Self>,
        role: AgentRole,
        capabilities: CapabilitySet,
    ) -> FractalResult<Arc<Agent>> {
        self.spawn_inner(role, capabilities, false)
    }

    fn spawn_inner(
        self: &Arc<Self>,
        role: AgentRole,
        capabilities: CapabilitySet,
        claimed: bool,
    ) -> FractalResult<Arc<Agent>> {
        authorize_spawn(self.role(), self.capabilities(), role, &capabilities)?;
        if self.terminating.load(Ordering::Acquire) {
            return Err(FractalError::Lifecycle(format!(
                "agent {} is terminating and cannot spawn",
                self.id()
            )));
        }

        let identity = AgentIdentity::new(role, capabilities, Some(self.id()));
        let child = Agent::new(identity, Arc::clone(&self.ctx));
        // reserve before the child becomes visible to sibling delegations
        child.claimed.store(claimed, Ordering::Release);
        child.initialize()?;

        let notice = AgentMessage::direct(
            self.id(),
            child.id(),
            MessageKind::Spawn,
            json!({ "role": role, "level": role.level() }),
        );
        if let Err(e) = child.receive_message(notice) {
            tracing::debug!(agent_id = %child.id(), error = %e, "Spawn notice not delivered");
        }

        self.children.lock().push(Arc::clone(&child));
        self.children_spawned.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            agent_id = %self.id(),
            child_id = %child.id(),
            role = %role,
            capabilities = %child.capabilities(),
            "Child spawned"
        );
        Ok(child)
    }

    /// Terminate all owned children depth-first, then stop this agent's loop
    /// and leave the registry. Returns once the whole subtree is down.
    /// Later calls are no-ops.
    pub fn terminate(self: &Arc<Self>) -> BoxFuture<'static, ()> {
        let this = Arc::clone(self);
        async move {
            if this.terminating.swap(true, Ordering::AcqRel) {
                return;
            }

            let children = std::mem::take(&mut *this.children.lock());
            for child in children {
                child.terminate().await;
            }

            {
                let mut state = this.state.lock();
                tracing::debug!(agent_id = %this.id(), from = %*state, "Agent terminating");
                *state = AgentState::Terminated;
            }

            let msg_loop = this.message_loop.lock().take();
            if let Some(msg_loop) = msg_loop {
                msg_loop.stop().await;
            }
            this.ctx.registry.unregister(this.id());
            tracing::debug!(agent_id = %this.id(), "Agent terminated");
        }
        .boxed()
    }

    fn transition(&self, next: AgentState) -> FractalResult<()> {
        let mut state = self.state.lock();
        if !state.can_transition_to(next) {
            return Err(FractalError::Lifecycle(format!(
                "agent {}: illegal transition {} -> {next}",
                self.id(),
                *state
            )));
        }
        tracing::debug!(agent_id = %self.id(), from = %*state, to = %next, "State transition");
        *state = next;
        Ok(())
    }

    /// Close out an execution and return to `Ready`, unless terminated meanwhile.
    fn settle(&self, succeeded: bool) {
        let end = if succeeded {
            AgentState::Completed
        } else {
            AgentState::Failed
        };
        if self.transition(end).is_ok() {
            let _ = self.transition(AgentState::Ready);
        }
    }

    fn try_claim(&self) -> bool {
        self.claimed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn release(&self) {
        self.claimed.store(false, Ordering::Release);
    }

    fn may_decompose(&self) -> bool {
        self.level() != AgentLevel::Worker && self.capabilities().has(Capability::Spawn)
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Run `task` under `ctx` and return its result.
    ///
    /// Task-level failures come back as `Ok` with a failed result. `Err` means
    /// the orchestration itself broke, e.g. a handoff with unmet prerequisites.
    pub fn execute(
        self: &Arc<Self>,
        task: Task,
        ctx: RecursionContext,
    ) -> BoxFuture<'static, FractalResult<TaskResult>> {
        self.execute_attempt(task, ctx, 1)
    }

    fn execute_attempt(
        self: &Arc<Self>,
        task: Task,
        ctx: RecursionContext,
        attempt: u32,
    ) -> BoxFuture<'static, FractalResult<TaskResult>> {
        let this = Arc::clone(self);
        async move { this.run(task, ctx, attempt).await }.boxed()
    }

    async fn run(
        self: &Arc<Self>,
        task: Task,
        ctx: RecursionContext,
        attempt: u32,
    ) -> FractalResult<TaskResult> {
        if !self.capabilities().covers(&task.required_capabilities) {
            let missing = self.capabilities().missing(&task.required_capabilities);
            tracing::warn!(
                agent_id = %self.id(),
                task_id = %task.id,
                %missing,
                "Task rejected: capability mismatch"
            );
            return Ok(TaskResult::rejected(
                task.id,
                self.id(),
                FailureKind::CapabilityMismatch,
                CAPABILITY_MISMATCH,
            ));
        }

        self.transition(AgentState::Executing)?;

        let outcome = if self.may_decompose() && self.ctx.decomposition.should_decompose(&task, &ctx)
        {
            self.decompose(&task, &ctx, attempt).await
        } else {
            if !task.subtasks.is_empty() {
                if let Some(bound) = ctx.exhausted_by() {
                    tracing::info!(
                        agent_id = %self.id(),
                        task_id = %task.id,
                        depth = ctx.depth,
                        budget = ctx.budget,
                        bound,
                        "Recursion bound reached, executing atomically"
                    );
                }
            }
            Ok(self.execute_atomic(&task, attempt).await)
        };

        let outcome = outcome.map(|result| quality_gate(&task, result));
        let succeeded = matches!(&outcome, Ok(result) if result.is_completed());
        self.settle(succeeded);
        self.tasks_executed.fetch_add(1, Ordering::Relaxed);
        if !succeeded {
            self.tasks_failed.fetch_add(1, Ordering::Relaxed);
        }
        if let Ok(result) = &outcome {
            self.report(result);
        }
        outcome
    }

    /// Leaf work runs on its own task so a panic becomes a failed result.
    async fn execute_atomic(&self, task: &Task, attempt: u32) -> TaskResult {
        let pending = TaskResult::in_progress(task.id, self.id(), attempt);
        let executor = Arc::clone(&self.ctx.executor);
        let leaf = task.clone();
        let agent_id = self.id();

        match tokio::spawn(async move { executor.execute(&leaf, agent_id).await }).await {
            Ok(Ok(output)) => {
                let quality = self.ctx.scoring.score(task, &output);
                pending.complete(output, quality)
            }
            Ok(Err(e)) => {
                tracing::warn!(agent_id = %agent_id, task_id = %task.id, error = %e, "Leaf execution failed");
                pending.fail(FailureKind::ExecutionFault, e)
            }
            Err(e) => {
                tracing::error!(agent_id = %agent_id, task_id = %task.id, error = %e, "Leaf execution aborted");
                pending.fail(
                    FailureKind::ExecutionFault,
                    format!("leaf execution aborted: {e}"),
                )
            }
        }
    }

    async fn decompose(
        self: &Arc<Self>,
        task: &Task,
        ctx: &RecursionContext,
        attempt: u32,
    ) -> FractalResult<TaskResult> {
        self.transition(AgentState::Spawning)?;

        let subtasks = self.ctx.decomposition.split(task);
        let strategy = self.ctx.decomposition.strategy(task);
        let synthesis = self.ctx.decomposition.synthesis(task);
        tracing::info!(
            agent_id = %self.id(),
            task_id = %task.id,
            depth = ctx.depth,
            budget = ctx.budget,
            subtasks = subtasks.len(),
            %strategy,
            "Decomposing task"
        );

        let sub_results = match strategy {
            ExecutionStrategy::Parallel => self.run_parallel(subtasks, ctx).await?,
            ExecutionStrategy::Sequential => self.run_sequential(subtasks, ctx).await?,
            ExecutionStrategy::Pipeline => self.run_pipeline(subtasks, ctx).await?,
        };

        self.transition(AgentState::Synthesizing)?;
        Ok(synthesize(task, self.id(), attempt, sub_results, synthesis))
    }

    /// All sub-tasks at once. Results come back in submission order.
    async fn run_parallel(
        self: &Arc<Self>,
        subtasks: Vec<Task>,
        ctx: &RecursionContext,
    ) -> FractalResult<Vec<TaskResult>> {
        let handles = subtasks.into_iter().map(|sub| {
            let this = Arc::clone(self);
            let ctx = ctx.clone();
            let sub_id = sub.id;
            let handle = tokio::spawn(async move { this.delegate(sub, &ctx).await });
            async move { (sub_id, handle.await) }
        });

        let mut results = Vec::new();
        let mut violation = None;
        for (sub_id, joined) in join_all(handles).await {
            match joined {
                Ok(Ok(result)) => results.push(result),
                Ok(Err(e)) => {
                    if violation.is_none() {
                        violation = Some(e);
                    }
                }
                Err(e) => {
                    tracing::error!(agent_id = %self.id(), task_id = %sub_id, error = %e, "Sub-task aborted");
                    results.push(
                        TaskResult::in_progress(sub_id, self.id(), 1).fail(
                            FailureKind::ExecutionFault,
                            format!("sub-task {sub_id} aborted: {e}"),
                        ),
                    );
                }
            }
        }

        match violation {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }

    /// One sub-task at a time, stopping at the first failure.
    async fn run_sequential(
        self: &Arc<Self>,
        subtasks: Vec<Task>,
        ctx: &RecursionContext,
    ) -> FractalResult<Vec<TaskResult>> {
        let mut results = Vec::with_capacity(subtasks.len());
        for sub in subtasks {
            let result = self.delegate(sub, ctx).await?;
            let stop = !result.is_completed();
            results.push(result);
            if stop {
                break;
            }
        }
        Ok(results)
    }

    /// Like sequential, but each output feeds the next sub-task's input.
    async fn run_pipeline(
        self: &Arc<Self>,
        subtasks: Vec<Task>,
        ctx: &RecursionContext,
    ) -> FractalResult<Vec<TaskResult>> {
        let mut results: Vec<TaskResult> = Vec::with_capacity(subtasks.len());
        for mut sub in subtasks {
            if let Some(previous) = results.last() {
                sub.payload = feed_forward(sub.payload, previous.output.clone());
            }
            let result = self.delegate(sub, ctx).await?;
            let stop = !result.is_completed();
            results.push(result);
            if stop {
                break;
            }
        }
        Ok(results)
    }

    // ------------------------------------------------------------------
    // Delegation
    // ------------------------------------------------------------------

    /// Delegate one sub-task, retrying retryable failures with backoff.
    async fn delegate(self: &Arc<Self>, sub: Task, ctx: &RecursionContext) -> FractalResult<TaskResult> {
        let mut attempt = 1;
        loop {
            let child_ctx = ctx.descend(self.id());
            let result = self.delegate_once(&sub, child_ctx, attempt).await?;
            if result.is_retryable() && attempt <= sub.retry_budget {
                let delay = self.ctx.config.retry.backoff(attempt - 1);
                tracing::warn!(
                    agent_id = %self.id(),
                    task_id = %sub.id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = result.error.as_deref().unwrap_or_default(),
                    "Retrying sub-task"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
                continue;
            }
            return Ok(result);
        }
    }

    async fn delegate_once(
        self: &Arc<Self>,
        sub: &Task,
        child_ctx: RecursionContext,
        attempt: u32,
    ) -> FractalResult<TaskResult> {
        if !self.capabilities().covers(&sub.required_capabilities) {
            tracing::warn!(
                agent_id = %self.id(),
                task_id = %sub.id,
                "Sub-task needs capabilities this agent cannot grant"
            );
            return Ok(TaskResult::in_progress(sub.id, self.id(), attempt)
                .fail(FailureKind::CapabilityMismatch, CAPABILITY_MISMATCH));
        }

        let child = self.acquire_child(&sub.required_capabilities)?;
        let outcome = self.hand_off(&child, sub, child_ctx, attempt).await;
        child.release();
        outcome
    }

    /// Reuse an idle capable child, or spawn a fresh one. The returned child is claimed.
    fn acquire_child(self: &Arc<Self>, required: &CapabilitySet) -> FractalResult<Arc<Agent>> {
        let reusable = {
            let mut children = self.children.lock();
            // children stopped by a TERMINATE message are dropped here
            children.retain(|c| c.state() != AgentState::Terminated);
            children
                .iter()
                .find(|c| {
                    c.state() == AgentState::Ready
                        && c.capabilities().covers(required)
                        && c.try_claim()
                })
                .cloned()
        };
        if let Some(child) = reusable {
            tracing::debug!(agent_id = %self.id(), child_id = %child.id(), "Reusing idle child");
            return Ok(child);
        }

        let role = AgentRole::delegate_for(self.level());
        let capabilities = role.default_capabilities().union(required);
        self.spawn_inner(role, capabilities, true)
    }

    async fn hand_off(
        self: &Arc<Self>,
        child: &Arc<Agent>,
        sub: &Task,
        child_ctx: RecursionContext,
        attempt: u32,
    ) -> FractalResult<TaskResult> {
        let mut contract = HandoffContract::standard(self.id(), child.id(), sub.id);
        self.check_prerequisites(&mut contract, child, sub, &child_ctx)?;

        let failed: Vec<String> = contract
            .failed()
            .map(|p| {
                format!(
                    "{}: {}",
                    p.name,
                    p.evidence["reason"].as_str().unwrap_or("check failed")
                )
            })
            .collect();
        if !failed.is_empty() {
            tracing::warn!(
                agent_id = %self.id(),
                child_id = %child.id(),
                task_id = %sub.id,
                contract = %contract.id,
                ?failed,
                "Handoff rejected, rolling back"
            );
            return Ok(TaskResult::in_progress(sub.id, child.id(), attempt)
                .roll_back(format!("handoff rejected: {}", failed.join("; "))));
        }

        contract.execute_handoff()?;

        let notice = AgentMessage::direct(
            self.id(),
            child.id(),
            MessageKind::Handoff,
            json!({
                "contract": contract.id,
                "task_id": sub.id,
                "task": sub.name,
                "depth": child_ctx.depth,
                "budget": child_ctx.budget,
            }),
        )
        .correlated(sub.id.as_uuid());
        if let Err(e) = child.receive_message(notice) {
            tracing::warn!(child_id = %child.id(), error = %e, "Handoff notice not delivered");
        }

        child.execute_attempt(sub.clone(), child_ctx, attempt).await
    }

    fn check_prerequisites(
        &self,
        contract: &mut HandoffContract,
        child: &Agent,
        sub: &Task,
        child_ctx: &RecursionContext,
    ) -> FractalResult<()> {
        let checker = self.id();

        let problems = sub.validate();
        let input = if problems.is_empty() {
            Ok(json!({ "task": sub.name }))
        } else {
            Err(problems.join("; "))
        };
        contract.check(INPUT_VALIDATED, checker, input)?;

        let registered = self.ctx.registry.contains(child.id());
        let state = child.state();
        let ready = if registered && state == AgentState::Ready {
            Ok(json!({ "state": state }))
        } else if registered {
            Err(format!("receiver {} is {state}", child.id()))
        } else {
            Err(format!("receiver {} is not registered", child.id()))
        };
        contract.check(RECEIVER_READY, checker, ready)?;

        let missing = child.capabilities().missing(&sub.required_capabilities);
        let matched = if missing.is_empty() {
            Ok(json!({ "granted": child.capabilities() }))
        } else {
            Err(format!("receiver lacks {missing}"))
        };
        contract.check(CAPABILITIES_MATCHED, checker, matched)?;

        // An elapsed deadline only forbids further splitting; the delegate
        // still runs the sub-task atomically.
        let budget = Ok(json!({
            "depth": child_ctx.depth,
            "budget": child_ctx.budget,
            "remaining_ms": child_ctx.remaining().as_millis() as u64,
            "timed_out": child_ctx.timed_out(),
            "can_decompose": child_ctx.can_decompose(),
        }));
        contract.check(BUDGET_AVAILABLE, checker, budget)?;
        Ok(())
    }

    /// Tell the parent how a task ended. Best effort: a gone parent is skipped.
    fn report(&self, result: &TaskResult) {
        let Some(parent_id) = self.parent() else {
            return;
        };
        let Some(parent) = self.ctx.registry.get(parent_id) else {
            tracing::debug!(agent_id = %self.id(), %parent_id, "Parent gone, result not reported");
            return;
        };

        let kind = if result.is_completed() {
            MessageKind::Result
        } else {
            MessageKind::Failure
        };
        let message = AgentMessage::direct(
            self.id(),
            parent_id,
            kind,
            json!({
                "task_id": result.task_id,
                "status": result.status,
                "quality": result.quality,
                "attempt": result.attempt,
                "error": result.error,
            }),
        )
        .correlated(result.task_id.as_uuid());
        if let Err(e) = parent.receive_message(message) {
            tracing::debug!(agent_id = %self.id(), %parent_id, error = %e, "Result not delivered");
        }
    }
}

impl std::fmt::Debug for Agent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id())
            .field("role", &self.role())
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Payload for the next pipeline stage.
fn feed_forward(payload: Value, upstream: Value) -> Value {
    match payload {
        Value::Null => upstream,
        Value::Object(mut map) => {
            map.insert("upstream".to_string(), upstream);
            Value::Object(map)
        }
        other => json!({ "input": other, "upstream": upstream }),
    }
}
