// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Cooperative multitasking runtime for a dual-core controller.
//!
//! Work on each core is a stream of small immutable [`Msg`] values drained
//! by that core's [`Dispatcher`]. Anything -- a handler, an interrupt
//! service routine, the other core -- can post a message to either core;
//! nothing can preempt a handler on its own core. Deferred work goes
//! through a fixed pool of scheduler slots driven by a 1 ms timer
//! interrupt, which also emits the 62.5 Hz housekeeping heartbeat that
//! periodic clients (sensor scans, servo exercisers) key off.
//!
//! All runtime state lives in a single [`Runtime`] value. `Runtime::new` is
//! `const`, so firmware does:
//!
//! ```ignore
//! static RUNTIME: Runtime = Runtime::new(&BOARD);
//!
//! fn main() -> ! {
//!     RUNTIME.init();
//!     board::start_tick(&RUNTIME);            // timer ISR -> tick_1ms
//!     RUNTIME.launch_core1(&CORE1_LOOP);
//!     RUNTIME.run_loop(&CORE0_LOOP)
//! }
//! ```
//!
//! There is no dynamic allocation anywhere on the message path: queues,
//! scheduler slots, and status cells are all inside `Runtime`.
//!
//! # Error philosophy
//!
//! Conditions that indicate a sizing or logic bug -- a required post hitting
//! a full ring, scheduler pool exhaustion, double init -- panic with a
//! diagnostic string. Conditions the caller may legitimately race with --
//! discardable posts, cancel vs. expiry -- report through return values or
//! are defined to be tolerable. Nothing in between.

#![cfg_attr(not(test), no_std)]

pub mod dispatch;
pub mod msg;
pub mod platform;
mod queue;
mod sched;
pub mod status;
pub mod time;

#[cfg(test)]
pub(crate) mod testutil;

pub use dispatch::{Dispatcher, IdleHook, LoopSpec, StartFn};
pub use msg::{
    Class, Dispatch, Handler, Msg, MsgId, Payload, Priority, RcDetect,
    SensorBankDelta, ServoParams, SleepFn, SleepRecord,
};
pub use platform::{Core, Core1Entry, CoreMask, Platform};
pub use status::StatusSnapshot;
pub use time::{Micros, Millis};

use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use queue::QueueSet;
use sched::SlotPool;
use status::SharedStatus;

/// Ticks between housekeeping broadcasts.
pub const HOUSEKEEPING_PERIOD_TICKS: u32 = 16;

/// The runtime. One per system; see the crate docs for the startup shape.
pub struct Runtime {
    platform: &'static dyn Platform,
    queues: [QueueSet; 2],
    pool: spin::Mutex<SlotPool>,
    sequence: AtomicU32,
    ticks: AtomicU32,
    status: [SharedStatus; 2],
    initialized: AtomicBool,
}

impl Runtime {
    pub const fn new(platform: &'static dyn Platform) -> Self {
        Self {
            platform,
            queues: [QueueSet::new(), QueueSet::new()],
            pool: spin::Mutex::new(SlotPool::new()),
            sequence: AtomicU32::new(0),
            ticks: AtomicU32::new(0),
            status: [SharedStatus::new(), SharedStatus::new()],
            initialized: AtomicBool::new(false),
        }
    }

    /// Marks the runtime ready. Must be called exactly once, before any
    /// other entry point; a second call is a configuration bug and panics.
    pub fn init(&self) {
        if self.initialized.swap(true, Ordering::SeqCst) {
            panic!("cmt: runtime initialized twice");
        }
    }

    pub(crate) fn platform(&self) -> &dyn Platform {
        self.platform
    }

    /// Milliseconds since boot, counted by the tick interrupt.
    pub fn now_ms(&self) -> Millis {
        Millis(self.ticks.load(Ordering::Relaxed))
    }

    /// Microseconds since boot, from the platform counter.
    pub fn now_us(&self) -> Micros {
        Micros(self.platform.now_us())
    }

    /// Posts `msg` to `core`. The post must succeed: a full destination
    /// ring panics, because required traffic exceeding the ring sizing is a
    /// configuration bug.
    pub fn post(&self, core: Core, msg: Msg) {
        self.post_inner(core, msg, false);
    }

    /// Posts `msg` to `core`, dropping it (and returning false) if the
    /// destination ring is full.
    pub fn post_discardable(&self, core: Core, msg: Msg) -> bool {
        self.post_inner(core, msg, true)
    }

    /// Posts `msg` to both cores as discardable. The returned mask has a
    /// bit set for each core that accepted its copy.
    pub fn post_both_discardable(&self, msg: Msg) -> CoreMask {
        let mut delivered = CoreMask::empty();
        for core in [Core::Zero, Core::One] {
            if self.post_inner(core, msg, true) {
                delivered |= core.into();
            }
        }
        delivered
    }

    /// Removes the frontmost pending message for `core`, in strict priority
    /// order, or returns `None`.
    pub fn try_retrieve(&self, core: Core) -> Option<Msg> {
        let token = self.platform.disable_interrupts();
        let msg = self.queues[core.index()].try_retrieve();
        self.platform.restore_interrupts(token);
        msg
    }

    /// Like [`Runtime::try_retrieve`], but parks on the platform event
    /// until a message arrives. This is the runtime's only blocking
    /// operation.
    pub fn retrieve(&self, core: Core) -> Msg {
        loop {
            if let Some(msg) = self.try_retrieve(core) {
                return msg;
            }
            self.platform.wait_for_event();
        }
    }

    /// Arms a scheduler slot to post `msg` to `core` after `ms` ticks
    /// (`ms == 0` delivers on the next tick). Panics if the pool is
    /// exhausted -- a sizing bug, not a runtime condition.
    pub fn schedule_in_ms(&self, core: Core, ms: u32, msg: Msg) {
        let token = self.platform.disable_interrupts();
        let acquired = self.pool.lock().acquire(core, ms, msg);
        self.platform.restore_interrupts(token);
        if !acquired {
            panic!("cmt: scheduler pool exhausted scheduling {:?}", msg.id);
        }
    }

    /// [`Runtime::schedule_in_ms`] targeting the calling core.
    pub fn schedule_in_ms_self(&self, ms: u32, msg: Msg) {
        self.schedule_in_ms(self.platform.current_core(), ms, msg);
    }

    /// Calls `callback(rt, token)` on the calling core after `ms` ticks,
    /// via a scheduler slot whose message dispatches through the generic
    /// sleep trampoline. `token` is the caller's business; by convention an
    /// index into caller-owned state.
    pub fn sleep_ms(&self, ms: u32, callback: SleepFn, token: u32) {
        let mut msg = Msg::pinned(MsgId::SLEEP, Self::sleep_trampoline);
        msg.payload = Payload::Sleep(SleepRecord { callback, token });
        self.schedule_in_ms_self(ms, msg);
    }

    fn sleep_trampoline(rt: &Runtime, msg: &Msg) {
        if let Payload::Sleep(record) = msg.payload {
            (record.callback)(rt, record.token);
        }
    }

    /// Releases every scheduler slot queuing `id`. Best-effort with respect
    /// to expiry: a delivery already posted is not recalled, and handlers
    /// must tolerate it.
    pub fn cancel(&self, id: MsgId) {
        let token = self.platform.disable_interrupts();
        self.pool.lock().cancel(id);
        self.platform.restore_interrupts(token);
    }

    /// True if any scheduler slot currently queues `id`.
    pub fn exists(&self, id: MsgId) -> bool {
        let token = self.platform.disable_interrupts();
        let found = self.pool.lock().exists(id);
        self.platform.restore_interrupts(token);
        found
    }

    /// Number of armed scheduler slots.
    pub fn count(&self) -> u32 {
        let token = self.platform.disable_interrupts();
        let n = self.pool.lock().count();
        self.platform.restore_interrupts(token);
        n
    }

    /// Lists the ids of armed slots into `out` (padded with
    /// [`MsgId::NONE`]); false if `out` was too small for all of them.
    pub fn waiting_ids(&self, out: &mut [MsgId]) -> bool {
        let token = self.platform.disable_interrupts();
        let complete = self.pool.lock().waiting_ids(out);
        self.platform.restore_interrupts(token);
        complete
    }

    /// The 1 ms tick. Called from the board's timer interrupt handler; must
    /// not be re-entered. Advances the millisecond clock, runs the
    /// scheduler, and broadcasts housekeeping every 16th tick.
    pub fn tick_1ms(&self) {
        let tick = self.ticks.fetch_add(1, Ordering::Relaxed).wrapping_add(1);

        let token = self.platform.disable_interrupts();
        {
            // Expiry delivery happens with the pool locked, so cancel and
            // acquire can never observe a delivered-but-armed slot.
            let mut pool = self.pool.lock();
            pool.tick(|core, msg| {
                self.post(core, msg);
            });
        }
        self.platform.restore_interrupts(token);

        if tick % HOUSEKEEPING_PERIOD_TICKS == 0 {
            let mut msg =
                Msg::with_priority(MsgId::HOUSEKEEPING, Priority::Low);
            msg.payload = Payload::Time(self.now_ms());
            self.post_both_discardable(msg);
        }
    }

    /// Copies the most recently published per-second status for `core` into
    /// `out`. Safe to call from either core.
    pub fn snapshot_status(&self, core: Core, out: &mut StatusSnapshot) {
        self.status[core.index()].load_into(out);
    }

    pub(crate) fn publish_status(&self, core: Core, snapshot: StatusSnapshot) {
        self.status[core.index()].store(snapshot);
    }

    /// Enters the dispatch loop for the calling core. Never returns.
    pub fn run_loop(&self, spec: &LoopSpec) -> ! {
        let mut dispatcher = Dispatcher::new(self, spec);
        if let Some(start) = spec.start {
            start(self);
        }
        loop {
            dispatcher.step();
        }
    }

    /// Starts the second core running [`Runtime::run_loop`] with `spec`.
    pub fn launch_core1(&'static self, spec: &'static LoopSpec) {
        self.platform.start_core1(Self::core1_entry, self, spec);
    }

    fn core1_entry(rt: &'static Runtime, spec: &'static LoopSpec) -> ! {
        rt.run_loop(spec)
    }

    fn post_inner(&self, core: Core, mut msg: Msg, discardable: bool) -> bool {
        debug_assert!(self.initialized.load(Ordering::Relaxed));

        let sequence =
            self.sequence.fetch_add(1, Ordering::Relaxed).wrapping_add(1);
        msg.stamp(sequence, self.now_ms());

        let token = self.platform.disable_interrupts();
        let result = self.queues[core.index()].post(msg);
        self.platform.restore_interrupts(token);

        match result {
            Ok(()) => {
                self.platform.signal_event();
                true
            }
            Err(queue::QueueFull) => {
                if !discardable {
                    panic!(
                        "cmt: required post of {:?} to core {} with ring full",
                        msg.id,
                        core.index()
                    );
                }
                false
            }
        }
    }
}
