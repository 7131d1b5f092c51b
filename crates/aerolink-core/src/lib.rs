//! Core types for the AeroLink vehicle command layer.
//!
//! Provides:
//! - Identity newtypes for components, messages and command codes
//! - The wire-boundary message model (command frames, acks, inbound messages)
//! - The downlink transport trait implemented by concrete links

pub mod ids;
pub mod link;
pub mod message;

// Re-exports
pub use ids::{CommandCode, ComponentId, MessageId};

pub use link::{Downlink, LinkClass, LinkError, SendOutcome};

pub use message::{
    AckResult, CommandAck, CommandFrame, CommandPayload, InboundMessage, MessageBody,
    MessageIntervalPayload, MissionFrame,
};
