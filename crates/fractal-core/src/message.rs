use crate::id::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Kind of an [`AgentMessage`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Spawn,
    Execute,
    Terminate,
    Handoff,
    Sync,
    Result,
    PartialResult,
    Failure,
    Heartbeat,
    AwarenessUpdate,
    ValidateRequest,
    ValidationResult,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MessageKind::Spawn => "spawn",
            MessageKind::Execute => "execute",
            MessageKind::Terminate => "terminate",
            MessageKind::Handoff => "handoff",
            MessageKind::Sync => "sync",
            MessageKind::Result => "result",
            MessageKind::PartialResult => "partial_result",
            MessageKind::Failure => "failure",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::AwarenessUpdate => "awareness_update",
            MessageKind::ValidateRequest => "validate_request",
            MessageKind::ValidationResult => "validation_result",
        };
        f.write_str(name)
    }
}

/// Scheduling hint. Mailboxes stay FIFO regardless of priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Deferred = 0,
    Low = 1,
    #[default]
    Normal = 2,
    High = 3,
    Critical = 4,
}

/// Who a message is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recipient {
    Agent(AgentId),
    /// Every live agent receives a copy.
    Broadcast,
}

/// A message exchanged between agents. Consumed exactly once by its recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentMessage {
    /// Message id.
    pub id: Uuid,
    /// Originating agent.
    pub sender: AgentId,
    /// One agent or everyone.
    pub recipient: Recipient,
    /// Message type.
    pub kind: MessageKind,
    /// Delivery priority.
    pub priority: Priority,
    /// Kind-specific body.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Ties a reply to the request (usually the task id) it answers.
    pub correlation_id: Option<Uuid>,
    /// Agents the message passed through, sender first.
    #[serde(default)]
    pub trace: Vec<AgentId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl AgentMessage {
    /// Creates a normal-priority message whose trace starts at the sender.
    pub fn new(
        sender: AgentId,
        recipient: Recipient,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            recipient,
            kind,
            priority: Priority::Normal,
            payload,
            correlation_id: None,
            trace: vec![sender],
            created_at: Utc::now(),
        }
    }

    /// A message addressed to one agent.
    pub fn direct(
        sender: AgentId,
        recipient: AgentId,
        kind: MessageKind,
        payload: serde_json::Value,
    ) -> Self {
        Self::new(sender, Recipient::Agent(recipient), kind, payload)
    }

    /// A low-priority heartbeat broadcast.
    pub fn heartbeat(sender: AgentId) -> Self {
        Self::new(sender, Recipient::Broadcast, MessageKind::Heartbeat, serde_json::Value::Null)
            .with_priority(Priority::Low)
    }

    /// A critical-priority terminate command.
    pub fn terminate(sender: AgentId, recipient: AgentId) -> Self {
        Self::direct(sender, recipient, MessageKind::Terminate, serde_json::Value::Null)
            .with_priority(Priority::Critical)
    }

    /// Override the priority.
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Tie this message to `correlation_id`.
    pub fn correlated(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    /// Record that the message passed through `agent`.
    pub fn hop(&mut self, agent: AgentId) {
        if self.trace.last() != Some(&agent) {
            self.trace.push(agent);
        }
    }

    /// Addressed to every agent.
    pub fn is_broadcast(&self) -> bool {
        self.recipient == Recipient::Broadcast
    }
}
