//! Per-agent inbound mailbox, the system-wide broadcast bus, and the loop
//! that drains both.
//!
//! Each mailbox has exactly one consumer: the [`MessageLoop`] of its owner.
//! Messages in one mailbox are handled strictly in arrival order.

use chrono::{DateTime, Utc};
use fractal_core::{AgentId, AgentMessage, FractalError, FractalResult, MessageKind};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

/// System-wide fan-out channel. Every live agent holds a subscription.
#[derive(Clone)]
pub struct MessageBus {
    tx: broadcast::Sender<AgentMessage>,
}

impl MessageBus {
    /// Bus keeping at most `capacity` unread messages per subscriber.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// New subscription; sees only messages published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AgentMessage> {
        self.tx.subscribe()
    }

    /// Publish a broadcast message. Returns how many subscribers got a copy.
    pub fn publish(&self, message: AgentMessage) -> FractalResult<usize> {
        if !message.is_broadcast() {
            return Err(FractalError::Channel(format!(
                "{} message {} is addressed to a single agent",
                message.kind, message.id
            )));
        }
        self.tx
            .send(message)
            .map_err(|e| FractalError::Channel(format!("Broadcast failed: {e}")))
    }

    /// Live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Sending half of an agent's inbox. Never blocks.
#[derive(Clone)]
pub struct Mailbox {
    owner: AgentId,
    tx: mpsc::UnboundedSender<AgentMessage>,
}

/// Create a mailbox for `owner` and the receiver its message loop will drain.
pub fn mailbox(owner: AgentId) -> (Mailbox, mpsc::UnboundedReceiver<AgentMessage>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Mailbox { owner, tx }, rx)
}

impl Mailbox {
    /// Agent this mailbox delivers to.
    pub fn owner(&self) -> AgentId {
        self.owner
    }

    /// Queue `message`. Fails only once the owner's loop has dropped its receiver.
    pub fn deliver(&self, message: AgentMessage) -> FractalResult<()> {
        self.tx.send(message).map_err(|e| {
            FractalError::Channel(format!("mailbox of agent {} is closed: {e}", self.owner))
        })
    }

    /// Whether the owner's loop has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// What a message loop has seen so far.
#[derive(Debug, Clone, Default)]
pub struct MailboxStats {
    /// Messages handled, all kinds.
    pub processed: u64,
    /// Per-kind tally.
    pub by_kind: BTreeMap<MessageKind, u64>,
    /// Time of the latest `HEARTBEAT`.
    pub last_heartbeat: Option<DateTime<Utc>>,
    /// Trace of the most recently handled message, ending with the owner.
    pub last_trace: Vec<AgentId>,
}

impl MailboxStats {
    /// Tally for one kind.
    pub fn count(&self, kind: MessageKind) -> u64 {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

/// Called by a message loop when its owner receives `TERMINATE`.
pub type TerminateHook = Box<dyn Fn() + Send + Sync>;

/// Handle to a running message loop.
///
/// The mailbox is a notification channel. Every message is traced and
/// tallied in [`MailboxStats`], heartbeats are timestamped and `TERMINATE`
/// is handed to the owner's [`TerminateHook`]. Command kinds such as
/// `EXECUTE`, `SPAWN`, `SYNC` or `VALIDATE_REQUEST` are not dispatched: work
/// reaches an agent only through direct calls to `Agent::execute`.
pub struct MessageLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl MessageLoop {
    /// Spawn the loop for `owner`.
    ///
    /// It waits on the inbox, the bus and a shutdown signal, and wakes at
    /// least every `poll_interval` so shutdown is always observed. On
    /// `TERMINATE` the loop calls `on_terminate` and keeps running until it
    /// is stopped; without a hook it exits on its own.
    pub fn start(
        owner: AgentId,
        mut inbox: mpsc::UnboundedReceiver<AgentMessage>,
        bus: Option<broadcast::Receiver<AgentMessage>>,
        stats: Arc<Mutex<MailboxStats>>,
        poll_interval: Duration,
        on_terminate: Option<TerminateHook>,
    ) -> Self {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let mut bus = bus;

        let handle = tokio::spawn(async move {
            tracing::debug!(agent_id = %owner, "Message loop started");
            loop {
                tokio::select! {
                    biased;

                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                    received = inbox.recv() => match received {
                        Some(message) => {
                            if handle_message(owner, message, &stats) == Flow::Terminate {
                                match &on_terminate {
                                    Some(hook) => hook(),
                                    None => break,
                                }
                            }
                        }
                        None => break,
                    },
                    received = recv_bus(&mut bus) => match received {
                        Ok(message) => {
                            if handle_message(owner, message, &stats) == Flow::Terminate {
                                match &on_terminate {
                                    Some(hook) => hook(),
                                    None => break,
                                }
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(agent_id = %owner, skipped, "Broadcast receiver lagged");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            bus = None;
                        }
                    },
                    _ = tokio::time::sleep(poll_interval) => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(agent_id = %owner, "Message loop stopped");
        });

        Self { shutdown, handle }
    }

    /// Whether the loop task has exited.
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal shutdown and wait for the loop to exit.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "Message loop task failed");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Terminate,
}

async fn recv_bus(
    bus: &mut Option<broadcast::Receiver<AgentMessage>>,
) -> Result<AgentMessage, broadcast::error::RecvError> {
    match bus {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

fn handle_message(owner: AgentId, mut message: AgentMessage, stats: &Mutex<MailboxStats>) -> Flow {
    message.hop(owner);
    tracing::debug!(
        agent_id = %owner,
        kind = %message.kind,
        sender = %message.sender,
        priority = ?message.priority,
        "Message received"
    );

    let mut stats = stats.lock();
    stats.processed += 1;
    *stats.by_kind.entry(message.kind).or_insert(0) += 1;
    stats.last_trace = message.trace;

    match message.kind {
        MessageKind::Heartbeat => {
            stats.last_heartbeat = Some(Utc::now());
            Flow::Continue
        }
        MessageKind::Terminate => Flow::Terminate,
        _ => Flow::Continue,
    }
}
