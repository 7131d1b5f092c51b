//! Command lifecycle events.
//!
//! The engine publishes send, retry, ack and failure events on a broadcast
//! bus so observers (UI, logging, diagnostics) can follow command traffic
//! without participating in it. The bus is never load-bearing: events are
//! dropped when nobody subscribes, and delivery guarantees live entirely in
//! the handler path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use aerolink_core::{AckResult, CommandCode, ComponentId};

/// Default buffer for slow subscribers.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// What happened to a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CommandEventKind {
    /// First send of an accepted submission.
    Sent { try_count: u32 },
    /// Resend after an unanswered attempt.
    Retry { try_count: u32 },
    /// Intermediate progress ack.
    Progress { progress: Option<u8> },
    /// Terminal ack received.
    Acknowledged { result: AckResult },
    /// Retries exhausted without any reply.
    NoResponse,
    /// User-visible failure, published only when the submission asked for
    /// error surfacing.
    UserError { message: String },
}

/// One command lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandEvent {
    /// Event ID
    pub id: String,
    /// Timestamp
    pub timestamp: DateTime<Utc>,
    /// Target component of the command
    pub component: ComponentId,
    /// Command code
    pub code: CommandCode,
    /// Event kind
    pub kind: CommandEventKind,
}

impl CommandEvent {
    pub fn new(component: ComponentId, code: CommandCode, kind: CommandEventKind) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            component,
            code,
            kind,
        }
    }
}

/// Broadcast bus for command lifecycle events.
#[derive(Debug, Clone)]
pub struct CommandEventBus {
    tx: broadcast::Sender<CommandEvent>,
}

impl CommandEventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    /// The capacity bounds how many events are buffered for slow
    /// subscribers; laggards drop the oldest.
    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event. Returns `true` if at least one subscriber received
    /// it.
    pub fn publish(&self, event: CommandEvent) -> bool {
        self.tx.send(event).is_ok()
    }

    /// Subscribe to all subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<CommandEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for CommandEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_without_subscribers_is_dropped() {
        let bus = CommandEventBus::new();
        let delivered = bus.publish(CommandEvent::new(
            ComponentId(1),
            CommandCode(22),
            CommandEventKind::NoResponse,
        ));
        assert!(!delivered);
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let bus = CommandEventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CommandEvent::new(
            ComponentId(1),
            CommandCode(400),
            CommandEventKind::Sent { try_count: 1 },
        ));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.component, ComponentId(1));
        assert_eq!(event.code, CommandCode(400));
        assert_eq!(event.kind, CommandEventKind::Sent { try_count: 1 });
    }

    #[tokio::test]
    async fn test_user_error_carries_message() {
        let bus = CommandEventBus::new();
        let mut rx = bus.subscribe();

        bus.publish(CommandEvent::new(
            ComponentId(1),
            CommandCode(400),
            CommandEventKind::UserError {
                message: "command 400 to component 1: denied".to_string(),
            },
        ));

        match rx.recv().await.unwrap().kind {
            CommandEventKind::UserError { message } => {
                assert!(message.contains("denied"));
            }
            other => panic!("expected UserError, got {:?}", other),
        }
    }
}
