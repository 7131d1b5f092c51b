//! Identity newtypes for addressable vehicle components, messages and
//! command codes.
//!
//! Codes are opaque to the reliability layer; the constants below are the
//! handful of codes the layer itself has to recognize (policy table, message
//! requests, interval negotiation).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Addressable vehicle component (autopilot, gimbal, camera, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ComponentId(pub u8);

impl ComponentId {
    /// Primary autopilot, the default command target.
    pub const AUTOPILOT: ComponentId = ComponentId(1);
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a message type on the link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageId(pub u16);

impl MessageId {
    /// Acknowledgment for a previously sent command.
    pub const COMMAND_ACK: MessageId = MessageId(77);
    /// Reports the negotiated streaming interval of one message type.
    pub const MESSAGE_INTERVAL: MessageId = MessageId(244);
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Numeric command code. Semantics are opaque to the reliability layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandCode(pub u16);

impl CommandCode {
    /// Immediate flight termination. Never retried.
    pub const DO_FLIGHTTERMINATION: CommandCode = CommandCode(185);
    /// Point camera/vehicle at a region of interest. May be duplicated.
    pub const DO_SET_ROI_LOCATION: CommandCode = CommandCode(195);
    /// Clear the region of interest. May be duplicated.
    pub const DO_SET_ROI_NONE: CommandCode = CommandCode(197);
    /// Arm/disarm toggle. Never retried.
    pub const COMPONENT_ARM_DISARM: CommandCode = CommandCode(400);
    /// Negotiate the streaming interval of one message type.
    pub const SET_MESSAGE_INTERVAL: CommandCode = CommandCode(511);
    /// Ask the component to emit one message of the given type.
    pub const REQUEST_MESSAGE: CommandCode = CommandCode(512);
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_distinct_keys() {
        assert_ne!(ComponentId(1), ComponentId(2));
        assert_eq!(ComponentId::AUTOPILOT, ComponentId(1));
        assert_eq!(MessageId::MESSAGE_INTERVAL, MessageId(244));
        assert_eq!(CommandCode::REQUEST_MESSAGE, CommandCode(512));
    }

    #[test]
    fn test_display_is_bare_number() {
        assert_eq!(ComponentId(42).to_string(), "42");
        assert_eq!(MessageId(244).to_string(), "244");
        assert_eq!(CommandCode(511).to_string(), "511");
    }

    #[test]
    fn test_serde_roundtrip() {
        let json = serde_json::to_string(&CommandCode::SET_MESSAGE_INTERVAL).unwrap();
        let back: CommandCode = serde_json::from_str(&json).unwrap();
        assert_eq!(back, CommandCode::SET_MESSAGE_INTERVAL);
    }
}
