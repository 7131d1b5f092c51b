//! Scriptable mock downlink.
//!
//! Stands in for the vehicle transport: records every frame handed to it and
//! answers per-code according to a script: swallow the frame, report the
//! link down, ack after N sends, or ack and follow up with a data message.
//! The mock owns the inbound broadcast sender, so tests can also inject
//! arbitrary acks and messages by hand.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, broadcast};
use tracing::debug;

use aerolink_core::{
    AckResult, CommandAck, CommandCode, CommandFrame, ComponentId, Downlink, InboundMessage,
    LinkError, MessageId, SendOutcome,
};

/// Buffer for inbound messages waiting on the engine.
const INBOUND_CAPACITY: usize = 64;

/// Per-code behavior of the mock vehicle.
#[derive(Debug, Clone)]
pub enum SendScript {
    /// Swallow the frame; no reply ever comes. The default.
    Drop,
    /// Report the link as unable to carry traffic.
    Unavailable,
    /// Ack with `result` once the code has been sent `sends` times.
    AckAfter { sends: usize, result: AckResult },
    /// Ack as accepted, then deliver a data message from the target.
    AckThenMessage {
        message_id: MessageId,
        payload: serde_json::Value,
    },
}

/// Mock transport for driving the command engine in tests.
pub struct MockDownlink {
    scripts: RwLock<HashMap<CommandCode, SendScript>>,
    sent: RwLock<Vec<CommandFrame>>,
    inbound: broadcast::Sender<InboundMessage>,
}

impl MockDownlink {
    /// Create a mock link and the inbound receiver to hand to the engine.
    pub fn new() -> (Arc<Self>, broadcast::Receiver<InboundMessage>) {
        let (inbound, rx) = broadcast::channel(INBOUND_CAPACITY);
        let link = Arc::new(Self {
            scripts: RwLock::new(HashMap::new()),
            sent: RwLock::new(Vec::new()),
            inbound,
        });
        (link, rx)
    }

    /// Another inbound receiver, e.g. for asserting pass-through visibility.
    pub fn subscribe(&self) -> broadcast::Receiver<InboundMessage> {
        self.inbound.subscribe()
    }

    /// Script the behavior for one command code.
    pub async fn script(&self, code: CommandCode, script: SendScript) {
        self.scripts.write().await.insert(code, script);
    }

    /// Inject an ack as if the component had sent one.
    pub fn inject_ack(&self, source: ComponentId, ack: CommandAck) {
        let _ = self.inbound.send(InboundMessage::ack(source, ack));
    }

    /// Inject a data message as if the component had sent one.
    pub fn inject_data(&self, source: ComponentId, id: MessageId, payload: serde_json::Value) {
        let _ = self.inbound.send(InboundMessage::data(source, id, payload));
    }

    /// Every frame handed to the link so far, in order.
    pub async fn sent_frames(&self) -> Vec<CommandFrame> {
        self.sent.read().await.clone()
    }

    /// How many times a code has been sent.
    pub async fn sent_count(&self, code: CommandCode) -> usize {
        self.sent
            .read()
            .await
            .iter()
            .filter(|frame| frame.code == code)
            .count()
    }

    pub async fn clear_sent(&self) {
        self.sent.write().await.clear();
    }
}

#[async_trait]
impl Downlink for MockDownlink {
    async fn send(&self, frame: &CommandFrame) -> Result<SendOutcome, LinkError> {
        self.sent.write().await.push(*frame);
        let count = self.sent_count(frame.code).await;

        let script = self
            .scripts
            .read()
            .await
            .get(&frame.code)
            .cloned()
            .unwrap_or(SendScript::Drop);

        match script {
            SendScript::Drop => {
                debug!(code = %frame.code, "mock link dropping frame");
                Ok(SendOutcome::Sent)
            }
            SendScript::Unavailable => Ok(SendOutcome::LinkUnavailable),
            SendScript::AckAfter { sends, result } => {
                if count >= sends {
                    self.inject_ack(frame.target, CommandAck::new(frame.code, result));
                }
                Ok(SendOutcome::Sent)
            }
            SendScript::AckThenMessage {
                message_id,
                payload,
            } => {
                self.inject_ack(
                    frame.target,
                    CommandAck::new(frame.code, AckResult::Accepted),
                );
                self.inject_data(frame.target, message_id, payload);
                Ok(SendOutcome::Sent)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aerolink_core::{CommandPayload, MessageBody};

    fn frame(code: u16) -> CommandFrame {
        CommandFrame::new(
            ComponentId::AUTOPILOT,
            CommandCode(code),
            CommandPayload::empty(),
        )
    }

    #[tokio::test]
    async fn test_default_script_drops() {
        let (link, mut rx) = MockDownlink::new();
        let outcome = link.send(&frame(22)).await.unwrap();
        assert_eq!(outcome, SendOutcome::Sent);
        assert_eq!(link.sent_count(CommandCode(22)).await, 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_ack_after_n_sends() {
        let (link, mut rx) = MockDownlink::new();
        link.script(
            CommandCode(22),
            SendScript::AckAfter {
                sends: 2,
                result: AckResult::Accepted,
            },
        )
        .await;

        link.send(&frame(22)).await.unwrap();
        assert!(rx.try_recv().is_err());

        link.send(&frame(22)).await.unwrap();
        let msg = rx.try_recv().unwrap();
        assert!(msg.is_ack());
    }

    #[tokio::test]
    async fn test_ack_then_message_delivers_both() {
        let (link, mut rx) = MockDownlink::new();
        link.script(
            CommandCode(512),
            SendScript::AckThenMessage {
                message_id: MessageId(244),
                payload: serde_json::json!({"message_id": 33, "interval_us": 100000}),
            },
        )
        .await;

        link.send(&frame(512)).await.unwrap();
        assert!(rx.try_recv().unwrap().is_ack());

        let data = rx.try_recv().unwrap();
        assert_eq!(data.id, MessageId(244));
        assert!(matches!(data.body, MessageBody::Data(_)));
    }

    #[tokio::test]
    async fn test_unavailable_reports_link_down() {
        let (link, _rx) = MockDownlink::new();
        link.script(CommandCode(22), SendScript::Unavailable).await;
        let outcome = link.send(&frame(22)).await.unwrap();
        assert_eq!(outcome, SendOutcome::LinkUnavailable);
        // The frame is still recorded as attempted.
        assert_eq!(link.sent_count(CommandCode(22)).await, 1);
    }
}
