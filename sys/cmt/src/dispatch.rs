// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The per-core dispatch loop.
//!
//! Each core runs one [`Dispatcher`] forever: retrieve a message, find its
//! handler(s), invoke them, account the time. Handler lookup is either the
//! message's pinned handler or a scan of the loop's registry table -- and the
//! scan calls *every* matching entry, so two subsystems can observe the same
//! message id without knowing about each other.
//!
//! When nothing is pending the loop rotates through its idle hooks, or
//! parks on the platform event if it has none. Handlers are contracted to
//! be non-blocking in the wall-clock sense, to never call
//! [`Runtime::tick_1ms`], and to tolerate spurious deliveries (a cancelled
//! schedule may already have expired).
//!
//! The loop body is split out as [`Dispatcher::step`] so it can be driven
//! directly by tests; [`Runtime::run_loop`] is just `step` in a `loop`.
//!
//! [`Runtime::tick_1ms`]: crate::Runtime::tick_1ms
//! [`Runtime::run_loop`]: crate::Runtime::run_loop

use crate::msg::{Dispatch, Handler, MsgId};
use crate::platform::Core;
use crate::status::LiveStatus;
use crate::Runtime;
use ringbuf::Ringbuf;

/// Hook run when a step finds no pending message.
pub type IdleHook = fn(&Runtime);

/// Optional function run once before the loop starts dispatching.
pub type StartFn = fn(&Runtime);

/// Static configuration of one core's loop.
pub struct LoopSpec {
    /// Registry: `(id, handler)` pairs scanned in order for every
    /// registry-dispatched message. Multiple entries may share an id.
    pub handlers: &'static [(MsgId, Handler)],
    /// Rotated through, one call per idle step. May be empty, in which case
    /// idle steps park on the platform event instead.
    pub idle_hooks: &'static [IdleHook],
    /// Run once, before the first dispatch.
    pub start: Option<StartFn>,
}

impl LoopSpec {
    pub const fn new(handlers: &'static [(MsgId, Handler)]) -> Self {
        Self {
            handlers,
            idle_hooks: &[],
            start: None,
        }
    }
}

/// Depth of the recent-dispatch trace ring.
const TRACE_DEPTH: usize = 16;

/// One core's dispatch state. Owned by the loop; nothing here is shared
/// except through the status snapshots it publishes.
pub struct Dispatcher<'r> {
    rt: &'r Runtime,
    core: Core,
    spec: &'r LoopSpec,
    next_idle: usize,
    live: LiveStatus,
    trace: Ringbuf<MsgId, TRACE_DEPTH>,
}

impl<'r> Dispatcher<'r> {
    /// Builds the dispatcher for the calling core.
    pub fn new(rt: &'r Runtime, spec: &'r LoopSpec) -> Self {
        let core = rt.platform().current_core();
        Self {
            rt,
            core,
            spec,
            next_idle: 0,
            live: LiveStatus::new(rt.now_us()),
            trace: Ringbuf::new(MsgId::NONE),
        }
    }

    pub fn core(&self) -> Core {
        self.core
    }

    /// Runs one iteration of the loop: publish status if a second has
    /// elapsed, then dispatch at most one message. Returns true if a message
    /// was dispatched.
    pub fn step(&mut self) -> bool {
        let t_start = self.rt.now_us();

        if self.live.due(t_start) {
            let mask = self.rt.platform().interrupt_mask();
            let snapshot = self.live.publish(t_start, mask);
            self.rt.publish_status(self.core, snapshot);
        }

        let Some(msg) = self.rt.try_retrieve(self.core) else {
            if self.spec.idle_hooks.is_empty() {
                self.rt.platform().wait_for_event();
            } else {
                let hook = self.spec.idle_hooks[self.next_idle];
                self.next_idle = (self.next_idle + 1) % self.spec.idle_hooks.len();
                hook(self.rt);
            }
            return false;
        };

        self.rt.platform().dispatch_active(self.core, true);
        match msg.dispatch() {
            Dispatch::Pinned(handler) => handler(self.rt, &msg),
            Dispatch::Registry => {
                for &(id, handler) in self.spec.handlers {
                    if id == msg.id {
                        handler(self.rt, &msg);
                    }
                }
            }
        }
        self.rt.platform().dispatch_active(self.core, false);

        let handler_us = self.rt.now_us().since(t_start);
        self.live.account(msg.id, handler_us);
        self.trace.record(msg.id);
        true
    }

    /// Recently dispatched message ids, for debugging.
    pub fn trace(&self) -> &Ringbuf<MsgId, TRACE_DEPTH> {
        &self.trace
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::msg::{Msg, Payload, Priority};
    use crate::testutil::fixture;
    use std::sync::atomic::{AtomicU32, Ordering};

    static FANOUT_A: AtomicU32 = AtomicU32::new(0);
    static FANOUT_B: AtomicU32 = AtomicU32::new(0);
    static PINNED: AtomicU32 = AtomicU32::new(0);
    static REPOSTED: AtomicU32 = AtomicU32::new(0);
    static IDLE_LOG: AtomicU32 = AtomicU32::new(0);

    fn fanout_a(_: &Runtime, _: &Msg) {
        FANOUT_A.fetch_add(1, Ordering::Relaxed);
    }
    fn fanout_b(_: &Runtime, _: &Msg) {
        FANOUT_B.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn registry_fans_out_to_every_match() {
        let (rt, _) = fixture();
        static HANDLERS: &[(MsgId, Handler)] = &[
            (MsgId(0x0210), fanout_a),
            (MsgId(0x0211), fanout_b),
            (MsgId(0x0210), fanout_b),
        ];
        static SPEC: LoopSpec = LoopSpec::new(HANDLERS);

        FANOUT_A.store(0, Ordering::Relaxed);
        FANOUT_B.store(0, Ordering::Relaxed);

        rt.post(Core::Zero, Msg::new(MsgId(0x0210)));
        let mut d = Dispatcher::new(rt, &SPEC);
        assert!(d.step());

        assert_eq!(FANOUT_A.load(Ordering::Relaxed), 1);
        assert_eq!(FANOUT_B.load(Ordering::Relaxed), 1);
        assert_eq!(d.trace().last().unwrap().payload, MsgId(0x0210));
    }

    fn pinned_then_repost(rt: &Runtime, msg: &Msg) {
        PINNED.fetch_add(1, Ordering::Relaxed);
        // Strip the pin and send the same value around again; the second
        // delivery must go through the registry.
        let mut again = *msg;
        again.clear_handler();
        rt.post(Core::Zero, again);
    }

    fn repost_target(_: &Runtime, _: &Msg) {
        REPOSTED.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn pinned_overrides_registry_and_clear_handler_reverts() {
        let (rt, _) = fixture();
        static HANDLERS: &[(MsgId, Handler)] =
            &[(MsgId(0x0220), repost_target)];
        static SPEC: LoopSpec = LoopSpec::new(HANDLERS);

        PINNED.store(0, Ordering::Relaxed);
        REPOSTED.store(0, Ordering::Relaxed);

        rt.post(Core::Zero, Msg::pinned(MsgId(0x0220), pinned_then_repost));
        let mut d = Dispatcher::new(rt, &SPEC);

        assert!(d.step()); // pinned delivery
        assert_eq!(PINNED.load(Ordering::Relaxed), 1);
        assert_eq!(REPOSTED.load(Ordering::Relaxed), 0);

        assert!(d.step()); // reposted delivery, via the table
        assert_eq!(PINNED.load(Ordering::Relaxed), 1);
        assert_eq!(REPOSTED.load(Ordering::Relaxed), 1);
    }

    fn idle_one(_: &Runtime) {
        IDLE_LOG.fetch_add(1, Ordering::Relaxed);
    }
    fn idle_two(_: &Runtime) {
        IDLE_LOG.fetch_add(100, Ordering::Relaxed);
    }

    #[test]
    fn idle_hooks_rotate_round_robin() {
        let (rt, _) = fixture();
        static SPEC: LoopSpec = LoopSpec {
            handlers: &[],
            idle_hooks: &[idle_one, idle_two],
            start: None,
        };

        IDLE_LOG.store(0, Ordering::Relaxed);
        let mut d = Dispatcher::new(rt, &SPEC);
        for _ in 0..4 {
            assert!(!d.step());
        }
        // Two full rotations: 2 * (1 + 100).
        assert_eq!(IDLE_LOG.load(Ordering::Relaxed), 202);
    }

    fn idle_noop(_: &Runtime) {}

    #[test]
    fn publishes_status_once_per_second() {
        let (rt, platform) = fixture();
        static IDLE: LoopSpec = LoopSpec {
            handlers: &[],
            idle_hooks: &[idle_noop],
            start: None,
        };

        let mut d = Dispatcher::new(rt, &IDLE);

        // Dispatch a pinned message so there is something to account.
        rt.post(
            Core::Zero,
            Msg::with_payload(MsgId(0x0230), Payload::U32(1)),
        );
        assert!(d.step());

        // Cross the one-second boundary; the next step publishes.
        platform.advance_us(1_000_001);
        d.step();

        let mut snap = crate::StatusSnapshot::default();
        rt.snapshot_status(Core::Zero, &mut snap);
        assert_eq!(snap.retrieved, 1);
        assert_eq!(snap.interrupt_mask, 0xdead_beef);
    }

    static LOW_SEEN: AtomicU32 = AtomicU32::new(0);

    fn low_seen(_: &Runtime, _: &Msg) {
        LOW_SEEN.fetch_add(1, Ordering::Relaxed);
    }

    #[test]
    fn low_priority_message_still_dispatches() {
        let (rt, _) = fixture();
        static HANDLERS: &[(MsgId, Handler)] = &[(MsgId(0x0240), low_seen)];
        static SPEC: LoopSpec = LoopSpec::new(HANDLERS);

        rt.post(Core::Zero, Msg::with_priority(MsgId(0x0240), Priority::Low));
        let mut d = Dispatcher::new(rt, &SPEC);
        assert!(d.step());
        assert_eq!(LOW_SEEN.load(Ordering::Relaxed), 1);
    }
}
