// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Deferred-delivery slot pool.
//!
//! The scheduler is a fixed pool of slots, each holding a complete message,
//! its destination core, and a millisecond countdown. The 1 ms tick
//! decrements every armed slot; a slot reaching zero posts its message and
//! is released in the same critical section, so an observer can never see a
//! slot that has delivered but is still armed.
//!
//! The pool is deliberately small and scanned linearly. Exhausting it is a
//! sizing bug in the application, not a runtime condition: the runtime
//! aborts rather than failing the schedule call.

use crate::msg::{Msg, MsgId};
use crate::platform::Core;
use static_assertions::const_assert;

/// Number of slots. Applications that need more concurrent deferred
/// deliveries than this are misconfigured.
pub(crate) const POOL_SIZE: usize = 32;
const_assert!(POOL_SIZE >= 32);

/// Countdown sentinel marking a slot as unused.
pub(crate) const FREE: i32 = -1;

#[derive(Copy, Clone)]
struct Slot {
    /// Milliseconds until delivery; `FREE` when the slot is unused. Zero
    /// means "deliver on the next tick", which is how a zero-delay schedule
    /// gets its one-tick worst case.
    remaining_ms: i32,
    core: Core,
    msg: Msg,
}

impl Slot {
    const EMPTY: Self = Self {
        remaining_ms: FREE,
        core: Core::Zero,
        msg: Msg::new(MsgId::NONE),
    };

    fn is_free(&self) -> bool {
        self.remaining_ms == FREE
    }
}

pub(crate) struct SlotPool {
    slots: [Slot; POOL_SIZE],
}

impl SlotPool {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; POOL_SIZE],
        }
    }

    /// Claims a free slot for `msg`, to be posted to `core` after `ms`
    /// ticks. Returns false if every slot is armed.
    pub(crate) fn acquire(&mut self, core: Core, ms: u32, msg: Msg) -> bool {
        // Delays that don't fit the countdown are clamped; 24 days of
        // deferral is indistinguishable from a logic error anyway.
        let remaining_ms = ms.min(i32::MAX as u32) as i32;
        for slot in &mut self.slots {
            if slot.is_free() {
                *slot = Slot {
                    remaining_ms,
                    core,
                    msg,
                };
                return true;
            }
        }
        false
    }

    /// Releases every slot queuing a message with `id`. Best-effort: a
    /// delivery that already reached the destination queue is not recalled.
    /// Returns the number of slots released.
    pub(crate) fn cancel(&mut self, id: MsgId) -> u32 {
        let mut released = 0;
        for slot in &mut self.slots {
            if !slot.is_free() && slot.msg.id == id {
                slot.remaining_ms = FREE;
                released += 1;
            }
        }
        released
    }

    /// True if any armed slot queues a message with `id`.
    pub(crate) fn exists(&self, id: MsgId) -> bool {
        self.slots
            .iter()
            .any(|slot| !slot.is_free() && slot.msg.id == id)
    }

    /// Number of armed slots.
    pub(crate) fn count(&self) -> u32 {
        self.slots.iter().filter(|slot| !slot.is_free()).count() as u32
    }

    /// Writes the ids of armed slots into `out` in pool-scan order, padding
    /// the remainder with [`MsgId::NONE`]. Returns false if `out` was too
    /// small to list them all.
    pub(crate) fn waiting_ids(&self, out: &mut [MsgId]) -> bool {
        out.fill(MsgId::NONE);
        let mut next = 0;
        for slot in &self.slots {
            if slot.is_free() {
                continue;
            }
            if next == out.len() {
                return false;
            }
            out[next] = slot.msg.id;
            next += 1;
        }
        true
    }

    /// Advances every armed slot by one tick, handing expired messages to
    /// `deliver` and releasing their slots. `deliver` runs with the pool
    /// lock held, which is what makes expiry atomic with respect to cancel
    /// and acquire.
    ///
    /// Slots expiring on the same tick are delivered in pool-scan order;
    /// that order is implementation-defined but stable.
    pub(crate) fn tick(&mut self, mut deliver: impl FnMut(Core, Msg)) {
        for slot in &mut self.slots {
            if slot.is_free() {
                continue;
            }
            if slot.remaining_ms > 0 {
                slot.remaining_ms -= 1;
            }
            if slot.remaining_ms == 0 {
                deliver(slot.core, slot.msg);
                slot.remaining_ms = FREE;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: u16) -> Msg {
        Msg::new(MsgId(id))
    }

    fn drain(pool: &mut SlotPool) -> Vec<(Core, u16)> {
        let mut out = Vec::new();
        pool.tick(|core, msg| out.push((core, msg.id.0)));
        out
    }

    #[test]
    fn counts_down_and_delivers_once() {
        let mut pool = SlotPool::new();
        assert!(pool.acquire(Core::One, 3, msg(0x42)));

        assert_eq!(drain(&mut pool), []);
        assert_eq!(drain(&mut pool), []);
        assert_eq!(pool.count(), 1);
        assert_eq!(drain(&mut pool), [(Core::One, 0x42)]);
        assert_eq!(pool.count(), 0);
        assert_eq!(drain(&mut pool), []);
    }

    #[test]
    fn zero_delay_delivers_on_next_tick() {
        let mut pool = SlotPool::new();
        assert!(pool.acquire(Core::Zero, 0, msg(0x10)));
        assert_eq!(drain(&mut pool), [(Core::Zero, 0x10)]);
    }

    #[test]
    fn pool_exhaustion_reports_failure() {
        let mut pool = SlotPool::new();
        for i in 0..POOL_SIZE {
            assert!(pool.acquire(Core::Zero, 100, msg(i as u16)));
        }
        assert!(!pool.acquire(Core::Zero, 100, msg(0xFFF)));
    }

    #[test]
    fn cancel_releases_all_matching_slots() {
        let mut pool = SlotPool::new();
        pool.acquire(Core::Zero, 5, msg(0x77));
        pool.acquire(Core::One, 9, msg(0x77));
        pool.acquire(Core::Zero, 5, msg(0x78));

        assert!(pool.exists(MsgId(0x77)));
        assert_eq!(pool.cancel(MsgId(0x77)), 2);
        assert!(!pool.exists(MsgId(0x77)));
        assert!(pool.exists(MsgId(0x78)));
        assert_eq!(pool.count(), 1);

        // Idempotent.
        assert_eq!(pool.cancel(MsgId(0x77)), 0);
    }

    #[test]
    fn same_tick_expiries_deliver_in_scan_order() {
        let mut pool = SlotPool::new();
        pool.acquire(Core::Zero, 2, msg(1));
        pool.acquire(Core::Zero, 2, msg(2));
        pool.acquire(Core::Zero, 2, msg(3));

        assert_eq!(drain(&mut pool), []);
        assert_eq!(
            drain(&mut pool),
            [(Core::Zero, 1), (Core::Zero, 2), (Core::Zero, 3)]
        );
    }

    #[test]
    fn waiting_ids_lists_and_pads() {
        let mut pool = SlotPool::new();
        pool.acquire(Core::Zero, 5, msg(0xA));
        pool.acquire(Core::Zero, 5, msg(0xB));

        let mut out = [MsgId::NONE; 4];
        assert!(pool.waiting_ids(&mut out));
        assert_eq!(out, [MsgId(0xA), MsgId(0xB), MsgId::NONE, MsgId::NONE]);

        let mut small = [MsgId::NONE; 1];
        assert!(!pool.waiting_ids(&mut small));
        assert_eq!(small, [MsgId(0xA)]);
    }
}
