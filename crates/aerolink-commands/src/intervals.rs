//! Cache of negotiated per-message streaming rates.
//!
//! Absent entries are unknown, never zero. Pairs the remote has reported as
//! unsupported are denylisted so they are not re-queried every session.
//! Reads come from any task; mutation happens on the engine timeline as
//! acks and MESSAGE_INTERVAL payloads arrive.

use dashmap::{DashMap, DashSet};

use aerolink_core::{ComponentId, MessageId};

/// Per-(component, message) interval registry.
#[derive(Debug, Default)]
pub struct IntervalRegistry {
    rates: DashMap<(ComponentId, MessageId), i32>,
    unsupported: DashSet<(ComponentId, MessageId)>,
}

impl IntervalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached interval in microseconds, or `None` when unknown.
    pub fn rate(&self, component: ComponentId, message_id: MessageId) -> Option<i32> {
        self.rates
            .get(&(component, message_id))
            .map(|entry| *entry.value())
    }

    /// Drop a cached entry so the next consumer re-queries it.
    pub fn invalidate(&self, component: ComponentId, message_id: MessageId) {
        self.rates.remove(&(component, message_id));
    }

    /// Whether the remote has reported this pair as unsupported.
    pub fn is_unsupported(&self, component: ComponentId, message_id: MessageId) -> bool {
        self.unsupported.contains(&(component, message_id))
    }

    pub(crate) fn record_rate(&self, component: ComponentId, message_id: MessageId, interval_us: i32) {
        self.rates.insert((component, message_id), interval_us);
    }

    pub(crate) fn mark_unsupported(&self, component: ComponentId, message_id: MessageId) {
        self.unsupported.insert((component, message_id));
    }

    /// Number of cached rates.
    pub fn len(&self) -> usize {
        self.rates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rates.is_empty()
    }
}
