use crate::capability::{Capability, CapabilitySet};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Hierarchical level of an agent in the delegation tree.
///
/// Ordered from the top (`Root`) down, so `Root < Domain < Specialist < Worker`.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentLevel {
    /// The single entry agent owned by the engine.
    Root,
    /// Coordinates one broad slice of a submitted task.
    Domain,
    /// Handles a focused sub-task; may keep splitting.
    Specialist,
    /// Leaf-only agent, never spawns.
    Worker,
}

impl AgentLevel {
    /// Whether an agent at this level may create an agent at `child`.
    ///
    /// Nobody creates a root; workers create nobody; otherwise a parent may
    /// create agents at its own level or below, except that a root only
    /// creates strictly below itself.
    pub fn can_spawn(&self, child: AgentLevel) -> bool {
        match (self, child) {
            (_, AgentLevel::Root) => false,
            (AgentLevel::Worker, _) => false,
            (AgentLevel::Root, _) => true,
            (parent, child) => child >= *parent,
        }
    }

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentLevel::Root => "root",
            AgentLevel::Domain => "domain",
            AgentLevel::Specialist => "specialist",
            AgentLevel::Worker => "worker",
        }
    }
}

impl fmt::Display for AgentLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Role tag of an agent. Each role lives at a fixed [`AgentLevel`].
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentRole {
    /// Root of the tree: receives submissions from the engine.
    Orchestrator,
    /// Domain-level delegate directly under the root.
    Coordinator,
    /// Specialist delegate; may decompose further.
    Specialist,
    /// Worker that only executes leaf work.
    Executor,
    /// Worker that only validates.
    Validator,
}

impl AgentRole {
    /// Level this role lives at.
    pub fn level(&self) -> AgentLevel {
        match self {
            AgentRole::Orchestrator => AgentLevel::Root,
            AgentRole::Coordinator => AgentLevel::Domain,
            AgentRole::Specialist => AgentLevel::Specialist,
            AgentRole::Executor | AgentRole::Validator => AgentLevel::Worker,
        }
    }

    /// Capabilities an agent of this role is created with by default.
    pub fn default_capabilities(&self) -> CapabilitySet {
        match self {
            AgentRole::Orchestrator => CapabilitySet::all(),
            AgentRole::Coordinator | AgentRole::Specialist => CapabilitySet::from([
                Capability::Orchestrate,
                Capability::Spawn,
                Capability::Execute,
                Capability::Validate,
                Capability::Synthesize,
            ]),
            AgentRole::Executor => CapabilitySet::from([Capability::Execute]),
            AgentRole::Validator => CapabilitySet::from([Capability::Validate]),
        }
    }

    /// Role used for a delegate spawned by an agent at `parent` level.
    pub fn delegate_for(parent: AgentLevel) -> AgentRole {
        match parent {
            AgentLevel::Root => AgentRole::Coordinator,
            _ => AgentRole::Specialist,
        }
    }
}

impl fmt::Display for AgentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgentRole::Orchestrator => write!(f, "orchestrator"),
            AgentRole::Coordinator => write!(f, "coordinator"),
            AgentRole::Specialist => write!(f, "specialist"),
            AgentRole::Executor => write!(f, "executor"),
            AgentRole::Validator => write!(f, "validator"),
        }
    }
}

/// Reasons a spawn request is refused.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SecurityError {
    /// The parent does not hold the SPAWN capability.
    #[error("{role} agent lacks the spawn capability")]
    MissingSpawn {
        /// Role of the would-be parent.
        role: AgentRole,
    },

    /// The parent's level may not create the requested role.
    #[error("{parent} agent may not spawn a {child} ({parent_level} -> {child_level})")]
    LevelViolation {
        /// Role of the would-be parent.
        parent: AgentRole,
        /// Level of the would-be parent.
        parent_level: AgentLevel,
        /// Requested child role.
        child: AgentRole,
        /// Level of the requested child role.
        child_level: AgentLevel,
    },

    /// The child would receive capabilities the parent does not hold.
    #[error("cannot grant capabilities {missing} not held by the {parent} agent")]
    Escalation {
        /// Role of the would-be parent.
        parent: AgentRole,
        /// Capabilities the parent lacks.
        missing: CapabilitySet,
    },
}

/// Decide whether a parent holding `parent_caps` in `parent_role` may create a
/// `child_role` agent carrying `child_caps`.
pub fn authorize_spawn(
    parent_role: AgentRole,
    parent_caps: &CapabilitySet,
    child_role: AgentRole,
    child_caps: &CapabilitySet,
) -> Result<(), SecurityError> {
    if !parent_caps.has(Capability::Spawn) {
        tracing::warn!(parent = %parent_role, child = %child_role, "Spawn denied: no spawn capability");
        return Err(SecurityError::MissingSpawn { role: parent_role });
    }

    let parent_level = parent_role.level();
    let child_level = child_role.level();
    if !parent_level.can_spawn(child_level) {
        tracing::warn!(
            parent = %parent_role,
            child = %child_role,
            %parent_level,
            %child_level,
            "Spawn denied: level violation"
        );
        return Err(SecurityError::LevelViolation {
            parent: parent_role,
            parent_level,
            child: child_role,
            child_level,
        });
    }

    let missing = parent_caps.missing(child_caps);
    if !missing.is_empty() {
        tracing::warn!(parent = %parent_role, child = %child_role, %missing, "Spawn denied: capability escalation");
        return Err(SecurityError::Escalation {
            parent: parent_role,
            missing,
        });
    }

    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering() {
        assert!(AgentLevel::Root < AgentLevel::Domain);
        assert!(AgentLevel::Specialist < AgentLevel::Worker);
    }

    #[test]
    fn test_can_spawn_matrix() {
        assert!(AgentLevel::Root.can_spawn(AgentLevel::Domain));
        assert!(AgentLevel::Root.can_spawn(AgentLevel::Worker));
        assert!(!AgentLevel::Root.can_spawn(AgentLevel::Root));
        assert!(AgentLevel::Domain.can_spawn(AgentLevel::Specialist));
        assert!(!AgentLevel::Specialist.can_spawn(AgentLevel::Domain));
        assert!(AgentLevel::Specialist.can_spawn(AgentLevel::Specialist));
        assert!(!AgentLevel::Worker.can_spawn(AgentLevel::Worker));
    }

    #[test]
    fn test_delegate_role() {
        assert_eq!(AgentRole::delegate_for(AgentLevel::Root), AgentRole::Coordinator);
        assert_eq!(AgentRole::delegate_for(AgentLevel::Domain), AgentRole::Specialist);
        assert_eq!(AgentRole::delegate_for(AgentLevel::Specialist), AgentRole::Specialist);
    }

    #[test]
    fn test_authorize_spawn_ok() {
        let parent = AgentRole::Orchestrator;
        let child_caps = AgentRole::Coordinator.default_capabilities();
        assert!(authorize_spawn(parent, &parent.default_capabilities(), AgentRole::Coordinator, &child_caps).is_ok());
    }

    #[test]
    fn test_authorize_spawn_requires_spawn_capability() {
        let caps = AgentRole::Executor.default_capabilities();
        let err = authorize_spawn(AgentRole::Executor, &caps, AgentRole::Executor, &caps).unwrap_err();
        assert_eq!(err, SecurityError::MissingSpawn { role: AgentRole::Executor });
    }

    #[test]
    fn test_authorize_spawn_rejects_upward_level() {
        let caps = AgentRole::Specialist.default_capabilities();
        let err = authorize_spawn(AgentRole::Specialist, &caps, AgentRole::Coordinator, &caps).unwrap_err();
        assert!(err.to_string().contains("may not spawn a coordinator"), "{err}");
    }

    #[test]
    fn test_authorize_spawn_rejects_escalation() {
        let parent_caps = CapabilitySet::from([Capability::Spawn, Capability::Execute]);
        let child_caps = CapabilitySet::from([Capability::Execute, Capability::Orchestrate]);
        let err = authorize_spawn(AgentRole::Coordinator, &parent_caps, AgentRole::Specialist, &child_caps)
            .unwrap_err();
        match err {
            SecurityError::Escalation { missing, .. } => {
                assert_eq!(missing, CapabilitySet::from([Capability::Orchestrate]));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
