// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Per-core load accounting.
//!
//! Each dispatcher accumulates into a private live record as it runs:
//! messages retrieved, microseconds spent inside handlers, and the single
//! longest handler invocation. Roughly once per second the live record is
//! published into a shared per-core snapshot and reset.
//!
//! Readers (on either core) see only published snapshots. Publication and
//! reads go through one short lock per core, held for a handful of word
//! copies, so a reader can never observe a torn snapshot.

use crate::msg::MsgId;
use crate::time::Micros;

/// Published once per second per core. All counters cover exactly one
/// reporting interval, which began at `ts_start`.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct StatusSnapshot {
    /// Microsecond clock at the start of the interval.
    pub ts_start: Micros,
    /// Messages retrieved and dispatched during the interval.
    pub retrieved: u32,
    /// Total microseconds spent inside handlers.
    pub active_us: u64,
    /// Id of the message whose handler ran longest.
    pub longest_id: MsgId,
    /// Duration of that longest handler call.
    pub longest_us: u32,
    /// Platform interrupt-enable mask, sampled at publication. Useful when
    /// diagnosing a core that has gone quiet.
    pub interrupt_mask: u32,
}

impl StatusSnapshot {
    pub(crate) const EMPTY: Self = Self {
        ts_start: Micros::ZERO,
        retrieved: 0,
        active_us: 0,
        longest_id: MsgId::NONE,
        longest_us: 0,
        interrupt_mask: 0,
    };
}

/// The dispatcher's private accumulator. Not shared; only its published
/// snapshots cross cores.
pub(crate) struct LiveStatus {
    ts_start: Micros,
    retrieved: u32,
    active_us: u64,
    longest_id: MsgId,
    longest_us: u32,
}

impl LiveStatus {
    pub(crate) fn new(now: Micros) -> Self {
        Self {
            ts_start: now,
            retrieved: 0,
            active_us: 0,
            longest_id: MsgId::NONE,
            longest_us: 0,
        }
    }

    /// True once a full reporting second has elapsed.
    pub(crate) fn due(&self, now: Micros) -> bool {
        now.since(self.ts_start) >= 1_000_000
    }

    /// Accounts one dispatched message.
    pub(crate) fn account(&mut self, id: MsgId, handler_us: u64) {
        self.retrieved = self.retrieved.wrapping_add(1);
        self.active_us = self.active_us.wrapping_add(handler_us);
        let handler_us = handler_us.min(u32::MAX as u64) as u32;
        if handler_us > self.longest_us {
            self.longest_us = handler_us;
            self.longest_id = id;
        }
    }

    /// Produces the snapshot for the interval just ended and resets the
    /// accumulator for the next one.
    pub(crate) fn publish(
        &mut self,
        now: Micros,
        interrupt_mask: u32,
    ) -> StatusSnapshot {
        let snapshot = StatusSnapshot {
            ts_start: self.ts_start,
            retrieved: self.retrieved,
            active_us: self.active_us,
            longest_id: self.longest_id,
            longest_us: self.longest_us,
            interrupt_mask,
        };
        *self = Self::new(now);
        snapshot
    }
}

/// Per-core snapshot cell shared between the publishing dispatcher and
/// readers on either core.
pub(crate) struct SharedStatus {
    inner: spin::Mutex<StatusSnapshot>,
}

impl SharedStatus {
    pub(crate) const fn new() -> Self {
        Self {
            inner: spin::Mutex::new(StatusSnapshot::EMPTY),
        }
    }

    pub(crate) fn store(&self, snapshot: StatusSnapshot) {
        *self.inner.lock() = snapshot;
    }

    pub(crate) fn load_into(&self, out: &mut StatusSnapshot) {
        *out = *self.inner.lock();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accounts_longest_handler() {
        let mut live = LiveStatus::new(Micros(0));
        live.account(MsgId(1), 100);
        live.account(MsgId(2), 900);
        live.account(MsgId(3), 250);

        let snap = live.publish(Micros(1_000_000), 0);
        assert_eq!(snap.retrieved, 3);
        assert_eq!(snap.active_us, 1250);
        assert_eq!(snap.longest_id, MsgId(2));
        assert_eq!(snap.longest_us, 900);
    }

    #[test]
    fn publish_resets_interval() {
        let mut live = LiveStatus::new(Micros(0));
        live.account(MsgId(1), 10);
        assert!(live.due(Micros(1_000_000)));
        live.publish(Micros(1_000_000), 0);

        assert!(!live.due(Micros(1_500_000)));
        let snap = live.publish(Micros(2_000_000), 0);
        assert_eq!(snap.ts_start, Micros(1_000_000));
        assert_eq!(snap.retrieved, 0);
        assert_eq!(snap.longest_id, MsgId::NONE);
    }

    #[test]
    fn shared_cell_round_trips() {
        let cell = SharedStatus::new();
        let mut live = LiveStatus::new(Micros(7));
        live.account(MsgId(9), 42);
        cell.store(live.publish(Micros(1_000_007), 0xF0));

        let mut out = StatusSnapshot::default();
        cell.load_into(&mut out);
        assert_eq!(out.ts_start, Micros(7));
        assert_eq!(out.retrieved, 1);
        assert_eq!(out.interrupt_mask, 0xF0);
    }
}
