use chrono::{DateTime, Utc};
use fractal_core::AgentId;
use fractal_security::{AgentLevel, AgentRole, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    Embryonic,
    Initializing,
    Ready,
    Executing,
    Spawning,
    Synthesizing,
    Completed,
    Failed,
    Terminated,
}

impl AgentState {
    /// States in which the agent is doing work.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            AgentState::Executing | AgentState::Spawning | AgentState::Synthesizing
        )
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            (Terminated, _) => false,
            (_, Terminated) => true,
            (Embryonic, Initializing) => true,
            (Initializing, Ready) | (Initializing, Failed) => true,
            (Ready, Executing) => true,
            (Executing, Spawning) | (Spawning, Synthesizing) | (Synthesizing, Executing) => true,
            (s, Completed) | (s, Failed) if s.is_active() => true,
            (Completed, Ready) | (Failed, Ready) => true,
            _ => false,
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Embryonic => "embryonic",
            AgentState::Initializing => "initializing",
            AgentState::Ready => "ready",
            AgentState::Executing => "executing",
            AgentState::Spawning => "spawning",
            AgentState::Synthesizing => "synthesizing",
            AgentState::Completed => "completed",
            AgentState::Failed => "failed",
            AgentState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Immutable identity fixed at spawn time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Unique agent id.
    pub id: AgentId,
    /// Hierarchy level, derived from the role.
    pub level: AgentLevel,
    /// Role tag.
    pub role: AgentRole,
    /// Granted capabilities.
    pub capabilities: CapabilitySet,
    /// Non-owning back-reference, resolved through the registry.
    pub parent: Option<AgentId>,
    /// Spawn time.
    pub created_at: DateTime<Utc>,
}

impl AgentIdentity {
    /// Identity with a fresh id and the role's level.
    pub fn new(role: AgentRole, capabilities: CapabilitySet, parent: Option<AgentId>) -> Self {
        Self {
            id: AgentId::new(),
            level: role.level(),
            role,
            capabilities,
            parent,
            created_at: Utc::now(),
        }
    }
}

/// Counters tracked per agent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMetrics {
    /// Leaf tasks run.
    pub tasks_executed: u64,
    /// Leaf tasks that faulted.
    pub tasks_failed: u64,
    /// Children spawned.
    pub children_spawned: u64,
    /// Mailbox messages handled.
    pub messages_processed: u64,
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use AgentState::*;
        let path = [
            Embryonic,
            Initializing,
            Ready,
            Executing,
            Spawning,
            Synthesizing,
            Completed,
            Ready,
            Terminated,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_reachable_from_active_states() {
        for s in [AgentState::Executing, AgentState::Spawning, AgentState::Synthesizing] {
            assert!(s.can_transition_to(AgentState::Failed));
        }
        assert!(!AgentState::Embryonic.can_transition_to(AgentState::Failed));
    }

    #[test]
    fn test_terminated_is_final() {
        for next in [AgentState::Ready, AgentState::Initializing, AgentState::Terminated] {
            assert!(!AgentState::Terminated.can_transition_to(next));
        }
    }

    #[test]
    fn test_illegal_skips() {
        assert!(!AgentState::Embryonic.can_transition_to(AgentState::Ready));
        assert!(!AgentState::Ready.can_transition_to(AgentState::Completed));
        assert!(!AgentState::Ready.can_transition_to(AgentState::Spawning));
    }

    #[test]
    fn test_identity_level_follows_role() {
        let identity = AgentIdentity::new(
            AgentRole::Executor,
            AgentRole::Executor.default_capabilities(),
            Some(AgentId::new()),
        );
        assert_eq!(identity.level, AgentLevel::Worker);
        assert!(identity.parent.is_some());
    }

    #[test]
    fn test_state_serialization() {
        let json = serde_json::to_string(&AgentState::Synthesizing).unwrap();
        assert_eq!(json, "\"synthesizing\"");
    }
}
