//! Contract-gated transfer of a task from a delegating agent to its delegate.
//!
//! ```text
//! NotChecked ── begin_check() ──→ Checking ──┬── satisfy() ──→ Satisfied
//!                                            └── fail() ─────→ Failed
//! ```
//!
//! [`HandoffContract::execute_handoff`] only succeeds once every prerequisite
//! is `Satisfied`. After that the contract is frozen.

use chrono::{DateTime, Utc};
use fractal_core::{AgentId, FractalError, FractalResult, TaskId};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Task has a non-empty name and a quality bound within [0, 1].
pub const INPUT_VALIDATED: &str = "input_validated";
/// Receiver is registered and idle.
pub const RECEIVER_READY: &str = "receiver_ready";
/// Receiver holds every capability the task requires.
pub const CAPABILITIES_MATCHED: &str = "capabilities_matched";
/// The delegate's recursion context was derived. An elapsed deadline is
/// recorded in the evidence and makes the delegate run atomically.
pub const BUDGET_AVAILABLE: &str = "budget_available";

/// Category of a prerequisite check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteKind {
    Validation,
    Computation,
    Approval,
}

/// Outcome of a prerequisite check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrerequisiteStatus {
    NotChecked,
    Checking,
    Satisfied,
    Failed,
}

impl fmt::Display for PrerequisiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrerequisiteStatus::NotChecked => write!(f, "not_checked"),
            PrerequisiteStatus::Checking => write!(f, "checking"),
            PrerequisiteStatus::Satisfied => write!(f, "satisfied"),
            PrerequisiteStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One named check on a contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prerequisite {
    /// Checklist key.
    pub name: String,
    /// What the check verifies.
    pub kind: PrerequisiteKind,
    /// Outcome, `Pending` until checked.
    pub status: PrerequisiteStatus,
    /// What the checker saw. For a failed check, `{"reason": ...}`.
    pub evidence: serde_json::Value,
    /// Agent that ran the check.
    pub checker: Option<AgentId>,
    /// When the check ran.
    pub checked_at: Option<DateTime<Utc>>,
}

impl Prerequisite {
    /// Pending prerequisite.
    pub fn new(name: impl Into<String>, kind: PrerequisiteKind) -> Self {
        Self {
            name: name.into(),
            kind,
            status: PrerequisiteStatus::NotChecked,
            evidence: serde_json::Value::Null,
            checker: None,
            checked_at: None,
        }
    }

    /// `Satisfied` or `Waived`.
    pub fn is_satisfied(&self) -> bool {
        self.status == PrerequisiteStatus::Satisfied
    }
}

/// An inspectable checklist gating one delegation.
#[derive(Debug, Clone, Serialize)]
pub struct HandoffContract {
    /// Contract id.
    pub id: Uuid,
    /// Delegating agent.
    pub sender: AgentId,
    /// Delegate.
    pub receiver: AgentId,
    /// Task being handed off.
    pub task_id: TaskId,
    prerequisites: Vec<Prerequisite>,
    all_satisfied: bool,
    handed_off: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set by a successful handoff.
    pub handed_off_at: Option<DateTime<Utc>>,
}

impl HandoffContract {
    /// Empty contract. Add checks with [`HandoffContract::with_prerequisite`].
    pub fn new(sender: AgentId, receiver: AgentId, task_id: TaskId) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            receiver,
            task_id,
            prerequisites: Vec::new(),
            all_satisfied: false,
            handed_off: false,
            created_at: Utc::now(),
            handed_off_at: None,
        }
    }

    /// Contract carrying the four checks every delegation runs.
    pub fn standard(sender: AgentId, receiver: AgentId, task_id: TaskId) -> Self {
        Self::new(sender, receiver, task_id)
            .with_prerequisite(INPUT_VALIDATED, PrerequisiteKind::Validation)
            .with_prerequisite(RECEIVER_READY, PrerequisiteKind::Approval)
            .with_prerequisite(CAPABILITIES_MATCHED, PrerequisiteKind::Validation)
            .with_prerequisite(BUDGET_AVAILABLE, PrerequisiteKind::Computation)
    }

    /// Add a pending prerequisite.
    pub fn with_prerequisite(mut self, name: impl Into<String>, kind: PrerequisiteKind) -> Self {
        self.prerequisites.push(Prerequisite::new(name, kind));
        self
    }

    /// Checklist in insertion order.
    pub fn prerequisites(&self) -> &[Prerequisite] {
        &self.prerequisites
    }

    /// Look up a prerequisite by name.
    pub fn prerequisite(&self, name: &str) -> Option<&Prerequisite> {
        self.prerequisites.iter().find(|p| p.name == name)
    }

    /// Whether the handoff has executed.
    pub fn is_handed_off(&self) -> bool {
        self.handed_off
    }

    /// Cached result of the last [`HandoffContract::all_prerequisites_met`].
    pub fn all_satisfied(&self) -> bool {
        self.all_satisfied
    }

    /// Mark a prerequisite as being checked.
    pub fn begin_check(&mut self, name: &str) -> FractalResult<()> {
        let prerequisite = self.prerequisite_mut(name)?;
        prerequisite.status = PrerequisiteStatus::Checking;
        Ok(())
    }

    /// Record a passing check.
    pub fn satisfy(
        &mut self,
        name: &str,
        checker: AgentId,
        evidence: serde_json::Value,
    ) -> FractalResult<()> {
        self.record(name, checker, PrerequisiteStatus::Satisfied, evidence)
    }

    /// Record a failing check.
    pub fn fail(&mut self, name: &str, checker: AgentId, reason: impl Into<String>) -> FractalResult<()> {
        let evidence = serde_json::json!({ "reason": reason.into() });
        self.record(name, checker, PrerequisiteStatus::Failed, evidence)
    }

    /// Run a check: `Ok(evidence)` satisfies, `Err(reason)` fails.
    /// Returns whether the prerequisite ended up satisfied.
    pub fn check(
        &mut self,
        name: &str,
        checker: AgentId,
        outcome: Result<serde_json::Value, String>,
    ) -> FractalResult<bool> {
        self.begin_check(name)?;
        match outcome {
            Ok(evidence) => self.satisfy(name, checker, evidence).map(|()| true),
            Err(reason) => self.fail(name, checker, reason).map(|()| false),
        }
    }

    /// Recompute and cache whether every prerequisite is satisfied.
    pub fn all_prerequisites_met(&mut self) -> bool {
        self.all_satisfied = self.prerequisites.iter().all(Prerequisite::is_satisfied);
        self.all_satisfied
    }

    /// Names of every prerequisite not yet satisfied, in declaration order.
    pub fn unsatisfied(&self) -> Vec<String> {
        self.prerequisites
            .iter()
            .filter(|p| !p.is_satisfied())
            .map(|p| p.name.clone())
            .collect()
    }

    /// Prerequisites whose check ran and failed.
    pub fn failed(&self) -> impl Iterator<Item = &Prerequisite> + '_ {
        self.prerequisites
            .iter()
            .filter(|p| p.status == PrerequisiteStatus::Failed)
    }

    /// Transfer the task.
    ///
    /// Fails with [`FractalError::PrerequisiteViolation`] naming every
    /// unsatisfied prerequisite; `handed_off` is left untouched in that case.
    /// A second call on a handed-off contract is a [`FractalError::Lifecycle`] error.
    pub fn execute_handoff(&mut self) -> FractalResult<()> {
        if self.handed_off {
            return Err(self.frozen());
        }
        if !self.all_prerequisites_met() {
            let unsatisfied = self.unsatisfied();
            tracing::error!(
                contract = %self.id,
                task_id = %self.task_id,
                ?unsatisfied,
                "Handoff attempted with unsatisfied prerequisites"
            );
            return Err(FractalError::PrerequisiteViolation {
                contract: self.id,
                unsatisfied,
            });
        }

        self.handed_off = true;
        self.handed_off_at = Some(Utc::now());
        tracing::debug!(
            contract = %self.id,
            sender = %self.sender,
            receiver = %self.receiver,
            task_id = %self.task_id,
            "Handoff executed"
        );
        Ok(())
    }

    fn record(
        &mut self,
        name: &str,
        checker: AgentId,
        status: PrerequisiteStatus,
        evidence: serde_json::Value,
    ) -> FractalResult<()> {
        let prerequisite = self.prerequisite_mut(name)?;
        prerequisite.status = status;
        prerequisite.evidence = evidence;
        prerequisite.checker = Some(checker);
        prerequisite.checked_at = Some(Utc::now());
        Ok(())
    }

    fn prerequisite_mut(&mut self, name: &str) -> FractalResult<&mut Prerequisite> {
        if self.handed_off {
            return Err(self.frozen());
        }
        let id = self.id;
        self.prerequisites
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| {
                FractalError::Orchestrator(format!("contract {id} has no prerequisite '{name}'"))
            })
    }

    fn frozen(&self) -> FractalError {
        FractalError::Lifecycle(format!("contract {} was already handed off", self.id))
    }
}
