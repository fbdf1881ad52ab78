// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-core message queues.
//!
//! Each core owns a [`QueueSet`]: three bounded FIFO rings, one per
//! priority. Posts select a ring by the message's priority, with one
//! exception that is the wakeup discipline of the whole runtime: a post to a
//! queue set whose three rings are *all* empty lands on the high ring
//! regardless of priority, because a consumer blocked on the set waits on
//! the high ring and must see any arrival.
//!
//! Retrieval drains strictly high, then normal, then low, FIFO within each
//! ring. There is deliberately no starvation protection for the low ring.
//!
//! The rings are guarded by one lock per set. Callers that can race with an
//! interrupt handler (every caller in firmware) additionally wrap operations
//! in the platform's interrupt-disable critical section; the runtime does
//! this, so the lock hold time bounds the critical section at a few copies
//! of a [`Msg`].

use crate::msg::{Msg, Priority};
use heapless::Deque;

/// Ring depths. High and low are small because their traffic is episodic;
/// normal carries the bulk of steady-state messaging.
pub(crate) const HIGH_DEPTH: usize = 8;
pub(crate) const NORMAL_DEPTH: usize = 64;
pub(crate) const LOW_DEPTH: usize = 8;

/// Error returned when the destination ring cannot accept a message. The
/// caller decides whether this aborts (required post) or is reported to the
/// client (discardable post).
#[derive(Copy, Clone, Debug)]
pub(crate) struct QueueFull;

struct Rings {
    high: Deque<Msg, HIGH_DEPTH>,
    normal: Deque<Msg, NORMAL_DEPTH>,
    low: Deque<Msg, LOW_DEPTH>,
}

pub(crate) struct QueueSet {
    rings: spin::Mutex<Rings>,
}

impl QueueSet {
    pub(crate) const fn new() -> Self {
        Self {
            rings: spin::Mutex::new(Rings {
                high: Deque::new(),
                normal: Deque::new(),
                low: Deque::new(),
            }),
        }
    }

    /// Inserts `msg` into the ring chosen by the rules above.
    pub(crate) fn post(&self, msg: Msg) -> Result<(), QueueFull> {
        let mut rings = self.rings.lock();

        if rings.high.is_empty()
            && rings.normal.is_empty()
            && rings.low.is_empty()
        {
            // Wakeup discipline: the consumer is (or may be about to be)
            // blocked on the high ring.
            return rings.high.push_back(msg).map_err(|_| QueueFull);
        }

        let result = match msg.priority {
            Priority::High => rings.high.push_back(msg),
            Priority::Normal => rings.normal.push_back(msg),
            Priority::Low => rings.low.push_back(msg),
        };
        result.map_err(|_| QueueFull)
    }

    /// Removes and returns the frontmost message in priority order, or
    /// `None` if all three rings are empty.
    pub(crate) fn try_retrieve(&self) -> Option<Msg> {
        let mut rings = self.rings.lock();
        if let Some(msg) = rings.high.pop_front() {
            return Some(msg);
        }
        if let Some(msg) = rings.normal.pop_front() {
            return Some(msg);
        }
        rings.low.pop_front()
    }

    /// Current (high, normal, low) depths.
    #[cfg(test)]
    pub(crate) fn depths(&self) -> (usize, usize, usize) {
        let rings = self.rings.lock();
        (rings.high.len(), rings.normal.len(), rings.low.len())
    }
}
