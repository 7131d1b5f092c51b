//! Wire-boundary message model.
//!
//! Framing and encoding of individual messages is an external concern; this
//! module models only what the reliability layer needs to see: outbound
//! command frames, inbound command acks, and inbound data messages with an
//! opaque payload.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{CommandCode, ComponentId, MessageId};

/// Result code carried by a command acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AckResult {
    /// Command accepted and executed (or execution started).
    Accepted,
    /// Valid command, cannot be executed right now. Retrying later may work.
    TemporarilyRejected,
    /// Valid command, permanently refused.
    Denied,
    /// Command unknown to this component.
    Unsupported,
    /// Execution was attempted and failed.
    Failed,
    /// Execution in progress; a further ack will follow.
    InProgress,
    /// A pending command was cancelled.
    Cancelled,
}

impl AckResult {
    /// Whether the remote reported success.
    pub fn is_success(&self) -> bool {
        matches!(self, AckResult::Accepted)
    }

    /// Whether this is an intermediate progress report rather than a final
    /// outcome.
    pub fn is_in_progress(&self) -> bool {
        matches!(self, AckResult::InProgress)
    }
}

impl fmt::Display for AckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AckResult::Accepted => "accepted",
            AckResult::TemporarilyRejected => "temporarily rejected",
            AckResult::Denied => "denied",
            AckResult::Unsupported => "unsupported",
            AckResult::Failed => "failed",
            AckResult::InProgress => "in progress",
            AckResult::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Acknowledgment message correlating to a previously sent command by code.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandAck {
    /// Code of the command being acknowledged.
    pub command: CommandCode,
    /// Reported outcome.
    pub result: AckResult,
    /// Completion percentage for `InProgress` acks.
    pub progress: Option<u8>,
    /// Additional result data (e.g. a denial reason code).
    pub result_param2: Option<i32>,
}

impl CommandAck {
    /// Create an ack with no supplemental fields.
    pub fn new(command: CommandCode, result: AckResult) -> Self {
        Self {
            command,
            result,
            progress: None,
            result_param2: None,
        }
    }

    /// Set the progress percentage.
    pub fn with_progress(mut self, progress: u8) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Set the supplemental result parameter.
    pub fn with_result_param2(mut self, value: i32) -> Self {
        self.result_param2 = Some(value);
        self
    }
}

/// Coordinate frame reference for positional commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MissionFrame(pub u8);

impl MissionFrame {
    pub const GLOBAL: MissionFrame = MissionFrame(0);
    pub const LOCAL_NED: MissionFrame = MissionFrame(1);
    pub const MISSION: MissionFrame = MissionFrame(2);
    pub const GLOBAL_RELATIVE_ALT: MissionFrame = MissionFrame(3);
}

/// Up to seven numeric command parameters in one of two wire variants.
///
/// The `Int` variant carries scaled integer coordinates in params 5/6 and a
/// frame reference, used for positional commands where float precision is
/// insufficient. Parameter semantics are opaque to this layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum CommandPayload {
    /// Plain seven-float parameter block.
    Float { params: [f32; 7] },
    /// Scaled-parameter variant with a coordinate frame and double-precision
    /// x/y position.
    Int {
        frame: MissionFrame,
        param1: f32,
        param2: f32,
        param3: f32,
        param4: f32,
        x: f64,
        y: f64,
        z: f32,
    },
}

impl CommandPayload {
    /// Seven-float payload.
    pub fn float(params: [f32; 7]) -> Self {
        CommandPayload::Float { params }
    }

    /// Payload with all parameters zero.
    pub fn empty() -> Self {
        CommandPayload::Float { params: [0.0; 7] }
    }

    /// First parameter, regardless of variant.
    pub fn param1(&self) -> f32 {
        match self {
            CommandPayload::Float { params } => params[0],
            CommandPayload::Int { param1, .. } => *param1,
        }
    }
}

/// One outbound command as handed to the downlink. Retries resend the
/// identical frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CommandFrame {
    /// Component the command is addressed to.
    pub target: ComponentId,
    /// Command code.
    pub code: CommandCode,
    /// Parameter block.
    pub payload: CommandPayload,
}

impl CommandFrame {
    pub fn new(target: ComponentId, code: CommandCode, payload: CommandPayload) -> Self {
        Self {
            target,
            code,
            payload,
        }
    }
}

/// Body of an inbound message: either a command ack or an opaque data
/// payload. Decoding to this shape is the transport codec's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MessageBody {
    Ack(CommandAck),
    Data(serde_json::Value),
}

/// One message delivered from the link, tagged with its source component.
///
/// Inbound messages are fanned out to every interested consumer; this layer
/// holds one subscription and never owns a message exclusively.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Component the message originated from.
    pub source: ComponentId,
    /// Message type identifier.
    pub id: MessageId,
    /// Decoded body.
    pub body: MessageBody,
}

impl InboundMessage {
    /// An ack message from `source`.
    pub fn ack(source: ComponentId, ack: CommandAck) -> Self {
        Self {
            source,
            id: MessageId::COMMAND_ACK,
            body: MessageBody::Ack(ack),
        }
    }

    /// A data message from `source`.
    pub fn data(source: ComponentId, id: MessageId, payload: serde_json::Value) -> Self {
        Self {
            source,
            id,
            body: MessageBody::Data(payload),
        }
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.body, MessageBody::Ack(_))
    }
}

/// Typed view of a MESSAGE_INTERVAL data payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIntervalPayload {
    /// Message type the interval applies to.
    pub message_id: u16,
    /// Streaming interval in microseconds. -1 means the stream is disabled,
    /// 0 means the component default.
    pub interval_us: i32,
}
