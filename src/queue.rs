//! Channels: id-addressed slot groups for inter-task messages
//!
//! A channel id binds lazily to the first free slot group the first time
//! either side touches it, and stays bound for the kernel's lifetime. Sends
//! fill the first empty slot; receives take the oldest filled one.
//!
//! Wake-up of parked tasks is not done here: the tick polls
//! [`Channels::can_send`] / [`Channels::can_receive`] for every waiter.
//!
//! Author: Moroya Sakamoto

use crate::config::{MAX_CHANNELS, QUEUE_SLOTS};
use crate::error::{KernelError, Result};

/// Application-chosen channel id
pub type ChannelId = u8;

/// Outcome of a queue operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueStatus {
    Sent,
    SentFailed,
    Received,
    ReceivedFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Slot {
    Empty,
    Filled { item: u32, seq: u32 },
}

#[derive(Debug, Clone, Copy)]
struct Channel {
    id: Option<ChannelId>,
    slots: [Slot; QUEUE_SLOTS],
    seq: u32,
}

impl Channel {
    const fn unbound() -> Self {
        Self {
            id: None,
            slots: [Slot::Empty; QUEUE_SLOTS],
            seq: 0,
        }
    }

    fn has_empty(&self) -> bool {
        self.slots.iter().any(|s| *s == Slot::Empty)
    }

    fn has_filled(&self) -> bool {
        self.slots.iter().any(|s| *s != Slot::Empty)
    }
}

/// Channel table
pub struct Channels {
    table: [Channel; MAX_CHANNELS],
}

impl Channels {
    pub const fn new() -> Self {
        Self {
            table: [Channel::unbound(); MAX_CHANNELS],
        }
    }

    /// Put `item` in the first empty slot of `id`
    ///
    /// Returns `Ok(false)` when the channel is full.
    pub fn try_send(&mut self, id: ChannelId, item: u32) -> Result<bool> {
        let ch = self.bind(id)?;
        let seq = ch.seq;
        match ch.slots.iter_mut().find(|s| **s == Slot::Empty) {
            Some(slot) => {
                *slot = Slot::Filled { item, seq };
                ch.seq = seq.wrapping_add(1);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Take the oldest item of `id`
    pub fn try_receive(&mut self, id: ChannelId) -> Result<Option<u32>> {
        let ch = self.bind(id)?;
        let head = ch.seq;
        let oldest = ch
            .slots
            .iter_mut()
            .filter_map(|s| match *s {
                // Age relative to the next sequence number survives wraparound
                Slot::Filled { item, seq } => Some((head.wrapping_sub(seq), item, s)),
                Slot::Empty => None,
            })
            .max_by_key(|(age, _, _)| *age);
        Ok(oldest.map(|(_, item, slot)| {
            *slot = Slot::Empty;
            item
        }))
    }

    /// Would a send on `id` find an empty slot?
    ///
    /// An unbound id that can still be bound counts as sendable.
    pub fn can_send(&self, id: ChannelId) -> bool {
        match self.lookup(id) {
            Some(ch) => ch.has_empty(),
            None => self.table.iter().any(|c| c.id.is_none()),
        }
    }

    /// Would a receive on `id` find a filled slot?
    pub fn can_receive(&self, id: ChannelId) -> bool {
        self.lookup(id).is_some_and(Channel::has_filled)
    }

    /// Filled slots of `id`
    pub fn len(&self, id: ChannelId) -> usize {
        self.lookup(id)
            .map_or(0, |ch| ch.slots.iter().filter(|s| **s != Slot::Empty).count())
    }

    /// Is `id` bound to a slot group?
    pub fn is_bound(&self, id: ChannelId) -> bool {
        self.lookup(id).is_some()
    }

    /// Slots per channel
    pub const fn capacity(&self) -> usize {
        QUEUE_SLOTS
    }

    fn lookup(&self, id: ChannelId) -> Option<&Channel> {
        self.table.iter().find(|c| c.id == Some(id))
    }

    fn bind(&mut self, id: ChannelId) -> Result<&mut Channel> {
        let idx = self
            .table
            .iter()
            .position(|c| c.id == Some(id))
            .or_else(|| self.table.iter().position(|c| c.id.is_none()))
            .ok_or(KernelError::NoChannel)?;
        let ch = &mut self.table[idx];
        ch.id = Some(id);
        Ok(ch)
    }
}

impl Default for Channels {
    fn default() -> Self {
        Self::new()
    }
}
