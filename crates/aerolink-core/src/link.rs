//! Downlink transport seam.
//!
//! The reliability layer sends command frames through a [`Downlink`] and
//! never sees the physical link. A send that could not be carried is not a
//! fast failure: the command stays on its normal retry/timeout path, since
//! the link may recover within the retry window.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::message::CommandFrame;

/// Outcome of handing one frame to the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame was carried onto the link.
    Sent,
    /// Link cannot carry traffic right now. Treated like a future timeout.
    LinkUnavailable,
}

/// Hard transport fault. Treated by the engine like `LinkUnavailable`.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("link closed")]
    Closed,

    #[error("send failed: {0}")]
    SendFailed(String),
}

/// Latency class of the underlying transport. Selects the default ack
/// timeout used for commands that do not override it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LinkClass {
    #[default]
    Normal,
    /// Satellite-style links where round trips take tens of seconds.
    HighLatency,
}

/// Outbound half of the transport boundary.
#[async_trait]
pub trait Downlink: Send + Sync {
    /// Carry one serialized command frame to its target component.
    async fn send(&self, frame: &CommandFrame) -> Result<SendOutcome, LinkError>;
}
