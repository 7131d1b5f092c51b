//! Message-request correlation.
//!
//! A message request sends a REQUEST_MESSAGE command and then waits for the
//! requested message itself. Ack and message arrive in random order, so each
//! request tracks both independently and completes only when both have
//! landed or a bounded wait expires.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use tokio::time::Instant;

use aerolink_core::{AckResult, ComponentId, MessageId};

/// Why a message request did not complete with a message.
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
pub enum RequestMessageFailure {
    /// The REQUEST_MESSAGE command was acknowledged with a non-success
    /// result; no message will come.
    #[error("request command acknowledged with result: {0}")]
    CommandError(AckResult),

    /// The REQUEST_MESSAGE command was never acknowledged.
    #[error("no acknowledgment for request command")]
    CommandNotAcked,

    /// Acknowledged, but the requested message never arrived within the
    /// wait window.
    #[error("requested message never arrived")]
    MessageNotReceived,

    /// A request for this (component, message) pair is already outstanding.
    #[error("duplicate message request already outstanding")]
    DuplicateCommand,
}

/// Terminal outcome of one message request, delivered exactly once.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestMessageOutcome {
    /// Both ack and message arrived; the payload is attached.
    Received(serde_json::Value),
    Failed(RequestMessageFailure),
}

/// Completion callback for a message request.
pub type RequestMessageHandler = Box<dyn FnOnce(ComponentId, RequestMessageOutcome) + Send + 'static>;

/// State of one outstanding message request.
pub(crate) struct RequestMessageInfo {
    /// Ack and message arrive in random order; the entry is retired only
    /// once both are in (or the wait expires).
    pub ack_received: bool,
    pub message_received: bool,
    /// Captured payload once the message arrives.
    pub message: Option<serde_json::Value>,
    /// Start of the message-wait window; armed when the ack lands.
    pub wait_started: Option<Instant>,
    /// Taken on completion so the handler fires exactly once.
    pub handler: Option<RequestMessageHandler>,
}

impl RequestMessageInfo {
    pub fn new(handler: RequestMessageHandler) -> Self {
        Self {
            ack_received: false,
            message_received: false,
            message: None,
            wait_started: None,
            handler: Some(handler),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.ack_received && self.message_received
    }
}

impl fmt::Debug for RequestMessageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestMessageInfo")
            .field("ack_received", &self.ack_received)
            .field("message_received", &self.message_received)
            .field("wait_started", &self.wait_started)
            .finish()
    }
}

/// All outstanding message requests, keyed (component, message id). Doubles
/// as the inbound message-interest table: a data message closes a request
/// only if one is waiting here.
#[derive(Debug, Default)]
pub(crate) struct RequestTable {
    map: HashMap<(ComponentId, MessageId), RequestMessageInfo>,
}

impl RequestTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, component: ComponentId, message_id: MessageId) -> bool {
        self.map.contains_key(&(component, message_id))
    }

    pub fn insert(
        &mut self,
        component: ComponentId,
        message_id: MessageId,
        info: RequestMessageInfo,
    ) {
        self.map.insert((component, message_id), info);
    }

    pub fn get_mut(
        &mut self,
        component: ComponentId,
        message_id: MessageId,
    ) -> Option<&mut RequestMessageInfo> {
        self.map.get_mut(&(component, message_id))
    }

    pub fn remove(
        &mut self,
        component: ComponentId,
        message_id: MessageId,
    ) -> Option<RequestMessageInfo> {
        self.map.remove(&(component, message_id))
    }

    /// Requests whose message-wait window has expired, in key order.
    pub fn overdue(&self, now: Instant, wait_timeout: Duration) -> Vec<(ComponentId, MessageId)> {
        let mut keys: Vec<(ComponentId, MessageId)> = self
            .map
            .iter()
            .filter(|(_, info)| {
                !info.message_received
                    && info
                        .wait_started
                        .is_some_and(|started| now.duration_since(started) >= wait_timeout)
            })
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }

    /// Remove and return every outstanding request, in key order.
    pub fn drain_all(&mut self) -> Vec<((ComponentId, MessageId), RequestMessageInfo)> {
        let mut keys: Vec<(ComponentId, MessageId)> = self.map.keys().copied().collect();
        keys.sort();
        keys.into_iter()
            .filter_map(|key| self.map.remove(&key).map(|info| (key, info)))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}
