//! Slot-keyed command queues.
//!
//! A slot is the (component, code) key under which at most one command is in
//! flight. Duplicable codes widen the key with a lane so concurrent
//! instances each get their own slot. Different slots proceed independently;
//! within one slot, later submissions wait in FIFO order behind the
//! in-flight entry.

use std::collections::{HashMap, VecDeque};

use aerolink_core::{CommandCode, ComponentId};
use tokio::time::Instant;

use crate::command::PendingCommand;
use crate::policy;

/// Disambiguator within a (component, code) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SlotLane {
    /// Single shared lane. Non-duplicable codes always live here.
    Exclusive,
    /// Caller-keyed lane for duplicable codes (e.g. one per battery index).
    Indexed(u16),
    /// Synthetic lane for duplicable submissions without an index; each such
    /// submission runs alone.
    Instance(u64),
}

/// Key under which one command may be in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub component: ComponentId,
    pub code: CommandCode,
    pub lane: SlotLane,
}

/// Disposition of a submission.
#[derive(Debug)]
pub enum SubmitResult {
    /// Installed as the slot's in-flight entry; caller must send it now.
    SendNow(SlotKey),
    /// Parked behind the slot's in-flight entry.
    Queued(SlotKey),
    /// An entry for this slot already exists; the command is handed back for
    /// duplicate resolution.
    Rejected(PendingCommand),
}

#[derive(Debug, Default)]
struct Slot {
    in_flight: Option<PendingCommand>,
    waiting: VecDeque<PendingCommand>,
}

impl Slot {
    fn is_empty(&self) -> bool {
        self.in_flight.is_none() && self.waiting.is_empty()
    }
}

/// All pending and in-flight commands of one endpoint's engine.
#[derive(Debug, Default)]
pub struct CommandSlots {
    slots: HashMap<SlotKey, Slot>,
    next_instance: u64,
}

impl CommandSlots {
    pub fn new() -> Self {
        Self::default()
    }

    /// Submit a command. Non-duplicable codes are rejected if any entry for
    /// their slot exists anywhere in the engine; duplicable codes get a lane
    /// from the disambiguator and queue FIFO within it.
    pub fn submit(&mut self, cmd: PendingCommand, dedup_index: Option<u16>) -> SubmitResult {
        let component = cmd.frame.target;
        let code = cmd.frame.code;

        let lane = if policy::is_duplicable(code) {
            match dedup_index {
                Some(index) => SlotLane::Indexed(index),
                None => {
                    self.next_instance += 1;
                    SlotLane::Instance(self.next_instance)
                }
            }
        } else {
            SlotLane::Exclusive
        };
        let key = SlotKey {
            component,
            code,
            lane,
        };

        if lane == SlotLane::Exclusive {
            if let Some(slot) = self.slots.get(&key) {
                if !slot.is_empty() {
                    return SubmitResult::Rejected(cmd);
                }
            }
        }

        let slot = self.slots.entry(key).or_default();
        if slot.in_flight.is_none() && slot.waiting.is_empty() {
            slot.in_flight = Some(cmd);
            SubmitResult::SendNow(key)
        } else {
            slot.waiting.push_back(cmd);
            SubmitResult::Queued(key)
        }
    }

    /// The in-flight entry of a slot, if any.
    pub fn in_flight_mut(&mut self, key: &SlotKey) -> Option<&mut PendingCommand> {
        self.slots.get_mut(key)?.in_flight.as_mut()
    }

    /// Lowest slot key with an in-flight entry matching (component, code).
    /// Used to correlate an inbound ack.
    pub fn find_in_flight(&self, component: ComponentId, code: CommandCode) -> Option<SlotKey> {
        self.slots
            .iter()
            .filter(|(key, slot)| {
                key.component == component && key.code == code && slot.in_flight.is_some()
            })
            .map(|(key, _)| *key)
            .min()
    }

    /// Retire the in-flight entry and promote the next queued one. Returns
    /// the retired entry and whether a promoted entry is now in flight and
    /// must be sent.
    pub fn complete_in_flight(&mut self, key: &SlotKey) -> Option<(PendingCommand, bool)> {
        let slot = self.slots.get_mut(key)?;
        let finished = slot.in_flight.take()?;
        let promoted = match slot.waiting.pop_front() {
            Some(next) => {
                slot.in_flight = Some(next);
                true
            }
            None => false,
        };
        if slot.is_empty() {
            self.slots.remove(key);
        }
        Some((finished, promoted))
    }

    /// Slot keys whose in-flight entry has outlived its ack timeout, in key
    /// order.
    pub fn overdue_keys(&self, now: Instant) -> Vec<SlotKey> {
        let mut keys: Vec<SlotKey> = self
            .slots
            .iter()
            .filter(|(_, slot)| {
                slot.in_flight
                    .as_ref()
                    .is_some_and(|cmd| cmd.is_overdue(now))
            })
            .map(|(key, _)| *key)
            .collect();
        keys.sort();
        keys
    }

    /// Whether any entry (queued or in flight) exists for (component, code).
    pub fn is_pending(&self, component: ComponentId, code: CommandCode) -> bool {
        self.slots
            .iter()
            .any(|(key, slot)| key.component == component && key.code == code && !slot.is_empty())
    }

    /// Remove and return every entry, queued and in flight, in key order.
    /// Used when the endpoint departs and will never answer.
    pub fn drain_all(&mut self) -> Vec<PendingCommand> {
        let mut keys: Vec<SlotKey> = self.slots.keys().copied().collect();
        keys.sort();

        let mut drained = Vec::new();
        for key in keys {
            if let Some(mut slot) = self.slots.remove(&key) {
                if let Some(cmd) = slot.in_flight.take() {
                    drained.push(cmd);
                }
                drained.extend(slot.waiting.drain(..));
            }
        }
        drained
    }

    /// Number of in-flight entries across all slots.
    pub fn in_flight_count(&self) -> usize {
        self.slots
            .values()
            .filter(|slot| slot.in_flight.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }
}
