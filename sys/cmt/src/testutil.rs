// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Platform fakes for the host test suite.
//!
//! Time only moves when a test moves it, the "second core" is a spawned
//! thread, and interrupt masking is a no-op (there are no interrupts to
//! mask).

use crate::dispatch::LoopSpec;
use crate::platform::{Core, Core1Entry, Platform};
use crate::Runtime;
use std::cell::Cell;
use std::sync::atomic::{AtomicU64, Ordering};

thread_local! {
    static CURRENT_CORE: Cell<Core> = const { Cell::new(Core::Zero) };
}

pub(crate) struct FakePlatform {
    now_us: AtomicU64,
}

impl FakePlatform {
    pub(crate) fn new() -> Self {
        Self {
            now_us: AtomicU64::new(0),
        }
    }

    pub(crate) fn advance_us(&self, us: u64) {
        self.now_us.fetch_add(us, Ordering::Relaxed);
    }

    pub(crate) fn set_core(core: Core) {
        CURRENT_CORE.with(|c| c.set(core));
    }
}

impl Platform for FakePlatform {
    fn now_us(&self) -> u64 {
        self.now_us.load(Ordering::Relaxed)
    }

    fn current_core(&self) -> Core {
        CURRENT_CORE.with(|c| c.get())
    }

    fn interrupt_mask(&self) -> u32 {
        0xdead_beef
    }

    fn disable_interrupts(&self) -> u32 {
        0
    }

    fn restore_interrupts(&self, _token: u32) {}

    fn wait_for_event(&self) {
        std::thread::yield_now();
    }

    fn signal_event(&self) {}

    fn start_core1(
        &self,
        entry: Core1Entry,
        rt: &'static Runtime,
        spec: &'static LoopSpec,
    ) {
        std::thread::spawn(move || {
            FakePlatform::set_core(Core::One);
            entry(rt, spec);
        });
    }
}

/// Builds an initialized runtime on a fresh fake platform. Both are leaked:
/// the runtime API wants `'static`, and tests are short-lived processes.
pub(crate) fn fixture() -> (&'static Runtime, &'static FakePlatform) {
    let platform: &'static FakePlatform =
        Box::leak(Box::new(FakePlatform::new()));
    let rt: &'static Runtime = Box::leak(Box::new(Runtime::new(platform)));
    rt.init();
    (rt, platform)
}
