// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The hardware boundary of the runtime.
//!
//! Everything the runtime needs from the chip is collected behind the
//! [`Platform`] trait: timestamps, the identity of the executing core,
//! interrupt masking, the event primitive backing the blocking retrieve, and
//! second-core launch. Board code implements it once and hands a `'static`
//! reference to [`Runtime::new`]; tests implement it with fakes and drive
//! time by hand.
//!
//! The 1 ms tick is deliberately *not* part of this trait. The board's timer
//! interrupt handler calls [`Runtime::tick_1ms`] directly, which keeps the
//! runtime from owning any interrupt plumbing.
//!
//! [`Runtime::new`]: crate::Runtime::new
//! [`Runtime::tick_1ms`]: crate::Runtime::tick_1ms

use crate::dispatch::LoopSpec;
use crate::Runtime;

/// One of the two execution contexts.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Core {
    Zero = 0,
    One = 1,
}

impl Core {
    /// Index for per-core tables.
    pub const fn index(self) -> usize {
        self as usize
    }

    pub const fn other(self) -> Core {
        match self {
            Core::Zero => Core::One,
            Core::One => Core::Zero,
        }
    }
}

bitflags::bitflags! {
    /// Set of cores, as returned by broadcast posts: a set bit means the
    /// message landed in that core's queues.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct CoreMask: u8 {
        const CORE0 = 1 << 0;
        const CORE1 = 1 << 1;
    }
}

impl From<Core> for CoreMask {
    fn from(core: Core) -> Self {
        match core {
            Core::Zero => CoreMask::CORE0,
            Core::One => CoreMask::CORE1,
        }
    }
}

/// Entry point handed to [`Platform::start_core1`]; the platform must arrange
/// for the second core to call it and never return.
pub type Core1Entry = fn(&'static Runtime, &'static LoopSpec) -> !;

/// Services the runtime requires from the board.
///
/// Implementations must be safe to call from both cores and from interrupt
/// context; the runtime calls into the platform while holding its internal
/// locks.
pub trait Platform: Sync {
    /// Monotonic microseconds since boot.
    fn now_us(&self) -> u64;

    /// Identity of the core executing the call.
    fn current_core(&self) -> Core;

    /// Snapshot of the interrupt enable mask, recorded into status
    /// publications for diagnosis of a wedged core.
    fn interrupt_mask(&self) -> u32;

    /// Disables interrupts on the current core, returning an opaque token for
    /// [`Platform::restore_interrupts`]. Nesting must work: the token
    /// restores the state at the matching disable.
    fn disable_interrupts(&self) -> u32;

    /// Restores the interrupt state captured by the matching
    /// [`Platform::disable_interrupts`].
    fn restore_interrupts(&self, token: u32);

    /// Parks the current core until an event is signalled. Spurious wakeups
    /// are fine; callers always re-check their condition. WFE on Cortex-M,
    /// a yield on hosted targets.
    fn wait_for_event(&self);

    /// Wakes any core parked in [`Platform::wait_for_event`]. SEV on
    /// Cortex-M.
    fn signal_event(&self);

    /// Strobed high for the duration of each handler call, for scope or LED
    /// observation. Non-semantic; the default does nothing.
    fn dispatch_active(&self, _core: Core, _active: bool) {}

    /// Starts the second core executing `entry(rt, spec)`.
    fn start_core1(
        &self,
        entry: Core1Entry,
        rt: &'static Runtime,
        spec: &'static LoopSpec,
    );
}
