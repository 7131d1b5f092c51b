//! Testing utilities for AeroLink
//!
//! This crate provides testing tools including:
//! - A scriptable mock downlink standing in for the vehicle transport
//! - Inbound injection helpers for acks and data messages

pub mod mock_link;

pub use mock_link::{MockDownlink, SendScript};
