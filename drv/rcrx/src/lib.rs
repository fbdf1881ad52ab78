// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Radio-control receiver pipeline.
//!
//! This driver turns an unknown RC receiver wire into a stream of
//! deduplicated frames. It runs entirely inside a dispatch loop as a client
//! of the `cmt` runtime: the hardware (a programmable-I/O receive machine
//! plus two DMA channels) signals it exclusively through posted messages,
//! and it talks back to the hardware through the [`CaptureHw`] trait.
//!
//! The life of the pipeline:
//!
//! 1. **Detect.** Cycle the candidate table ([`CANDIDATES`]), taking a raw
//!    timed capture under each configuration and testing its bit-run shape
//!    (see [`detect`]). On acceptance, broadcast [`ids::DETECTED`] to both
//!    cores and switch the hardware to frame capture.
//! 2. **Capture.** Byte DMA fills the enqueue buffer while a CRC engine
//!    sniffs the transfer; completion posts [`ids::FRAME_READY`] carrying
//!    the CRC.
//! 3. **Dedup and promote.** A frame whose CRC matches the current frame is
//!    counted and dropped -- RC receivers repeat frames at full rate whether
//!    or not anything changed, and downstream only wants changes. A new
//!    frame triggers the single-descriptor promotion copy over the triple
//!    buffer; while that copy is in flight the `copy_done_handler` gate is
//!    set, further frames are counted as `busy` and skipped, and the
//!    current buffer must not be read. [`ids::COPY_DONE`] clears the gate
//!    and publishes the frame.
//! 4. **Errors.** Framing/parity errors halt the capture machine, are
//!    counted and broadcast as [`ids::FAULT`], and re-arm -- until ten of
//!    them land inside a 60-second window, at which point the pipeline
//!    parks itself in [`State::Disabled`] until someone calls
//!    [`RcRx::reset`].
//!
//! Frames are published by return value: [`RcRx::handle`] yields
//! [`RcEvent::Frame`] and the owning loop forwards it to its consumers. The
//! pipeline itself is byte-transparent and knows nothing about channel
//! encodings.

#![cfg_attr(not(test), no_std)]

pub mod buffer;
pub mod detect;

pub use buffer::{TripleBuffer, FRAME_MAX};
pub use detect::{Candidate, Protocol, WireFormat, CANDIDATES, DETECT_WORDS};

use cmt::{Msg, Payload, RcDetect, Runtime};
use crc::{Crc, CRC_32_ISO_HDLC};
use ringbuf::Ringbuf;

/// Message ids consumed and produced by the pipeline, in the host-OS
/// namespace.
pub mod ids {
    use cmt::MsgId;

    /// Detection capture complete (to the capture-owning core).
    pub const DETECT_DONE: MsgId = MsgId(0x0110);
    /// Frame DMA complete; payload is [`cmt::Payload::Crc`] with the
    /// sniffed CRC (to the capture-owning core).
    pub const FRAME_READY: MsgId = MsgId(0x0111);
    /// Promotion copy complete (to the capture-owning core).
    pub const COPY_DONE: MsgId = MsgId(0x0112);
    /// Framing/parity error; payload is [`cmt::Payload::U8`] with
    /// [`super::LineErrors`] bits (to the capture-owning core).
    pub const LINE_ERROR: MsgId = MsgId(0x0113);
    /// Broadcast to both cores on protocol acceptance; payload is
    /// [`cmt::Payload::RcDetect`].
    pub const DETECTED: MsgId = MsgId(0x0114);
    /// Broadcast to both cores on each line error; payload is
    /// [`cmt::Payload::U32`] with the running error total.
    pub const FAULT: MsgId = MsgId(0x0115);
}

bitflags::bitflags! {
    /// Error bits reported by the receive machine.
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub struct LineErrors: u8 {
        const FRAMING = 1 << 0;
        const PARITY = 1 << 1;
    }
}

/// CRC algorithm the hardware sniffer must be configured to match. The
/// fakes and any software fallback compute it with [`frame_crc`].
pub const FRAME_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Checksums a frame the way the capture hardware does.
pub fn frame_crc(frame: &[u8]) -> u32 {
    FRAME_CRC.checksum(frame)
}

/// Errors inside this window accumulate toward disable.
const ERROR_WINDOW_MS: u32 = 60_000;
/// Short-term error count that parks the pipeline.
const ERROR_DISABLE_THRESHOLD: u32 = 10;

const TRACE_DEPTH: usize = 32;

/// The board's side of the pipeline: line configuration, DMA arming, and
/// the promotion copy. Completions are *not* returned from these calls;
/// they arrive later as messages with the ids in [`ids`], posted by the
/// board's interrupt glue (or immediately, in test fakes).
pub trait CaptureHw {
    /// Configures the line for `candidate` and starts a timed raw capture
    /// into `words`. Completion: [`ids::DETECT_DONE`].
    fn start_detect(
        &mut self,
        candidate: &Candidate,
        words: &mut [u32; DETECT_WORDS],
    );

    /// Configures the receive machine for frame capture under `candidate`.
    fn configure(&mut self, candidate: &Candidate);

    /// Arms byte DMA with CRC sniff into `enqueue` (sized to the frame
    /// length). Completion: [`ids::FRAME_READY`]; line errors:
    /// [`ids::LINE_ERROR`].
    fn arm(&mut self, enqueue: &mut [u8]);

    /// Starts the promotion copy over the triple buffer -- the reverse walk
    /// of [`TripleBuffer::shift`], as one descriptor where the DMA engine
    /// supports reversed addressing. Completion: [`ids::COPY_DONE`].
    fn start_copy(&mut self, buffers: &mut TripleBuffer);

    /// Halts the receive machine after a line error.
    fn halt(&mut self);
}

/// Observable pipeline states.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum State {
    /// Constructed but not started.
    Idle,
    /// Trying candidate `i` of the detection table.
    Detecting(usize),
    /// Armed for frames, no promotion in flight.
    Capturing,
    /// Promotion copy in flight; the current buffer is unstable.
    Copying,
    /// Error rate exceeded; terminal until [`RcRx::reset`].
    Disabled,
}

/// Pipeline counters, exposed for the operator surfaces.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RxStats {
    /// Frames published downstream.
    pub frames: u32,
    /// Frames suppressed because their CRC matched the current frame.
    pub same: u32,
    /// Frames skipped because a promotion copy was still in flight.
    pub busy: u32,
    /// Line errors, total since construction or reset.
    pub errors: u32,
    /// The subset of `errors` that were parity errors.
    pub parity_errors: u32,
    /// Errors in the current 60 s window.
    pub short_term_errors: u32,
    /// Millisecond clock at the most recent error.
    pub last_error_at: cmt::Millis,
    /// True once the pipeline has parked itself.
    pub disabled: bool,
}

/// What a handled message produced, if anything. Frames borrow the
/// pipeline's current buffer and must be consumed before the next call.
#[derive(Debug, PartialEq)]
pub enum RcEvent<'a> {
    /// A protocol was accepted; capture is starting.
    Detected(&'static Candidate),
    /// A new (non-duplicate) frame is stable and published.
    Frame(&'a [u8]),
    /// The error-rate policy parked the pipeline.
    Disabled,
}

/// Trace entries recorded by the pipeline; read back through
/// [`RcRx::trace`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Trace {
    None,
    DetectStart(usize),
    Rejected(usize),
    Accepted(Protocol),
    Same,
    Busy,
    CopyStart,
    Published,
    LineError(u8),
    Disabled,
    Reset,
}

type CopyDoneFn<H> = fn(&mut RcRx<H>);

/// The receive pipeline. One per receiver wire; owned by the dispatch loop
/// of the capture-owning core, which feeds it every message carrying one of
/// the ids in [`ids`].
pub struct RcRx<H: CaptureHw> {
    hw: H,
    state: State,
    detect_words: [u32; DETECT_WORDS],
    buffers: TripleBuffer,
    crc_current: u32,
    crc_previous: u32,
    /// Completion continuation for an in-flight promotion copy. `Some` is
    /// the gate: while set, the current buffer must not be read and new
    /// frames are skipped as busy.
    copy_done_handler: Option<CopyDoneFn<H>>,
    chosen: Option<&'static Candidate>,
    stats: RxStats,
    trace: Ringbuf<Trace, TRACE_DEPTH>,
}

impl<H: CaptureHw> RcRx<H> {
    pub fn new(hw: H) -> Self {
        Self {
            hw,
            state: State::Idle,
            detect_words: [0; DETECT_WORDS],
            buffers: TripleBuffer::new(),
            crc_current: 0,
            crc_previous: 0,
            copy_done_handler: None,
            chosen: None,
            stats: RxStats::default(),
            trace: Ringbuf::new(Trace::None),
        }
    }

    /// Begins protocol detection at the top of the candidate table.
    pub fn start(&mut self) {
        self.begin_detect(0);
    }

    /// Restarts the whole pipeline: clears the disable latch and the window
    /// counters, forgets the chosen protocol, and re-enters detection. This
    /// is the (sole) way out of [`State::Disabled`].
    pub fn reset(&mut self) {
        self.copy_done_handler = None;
        self.crc_current = 0;
        self.crc_previous = 0;
        self.chosen = None;
        self.stats.short_term_errors = 0;
        self.stats.disabled = false;
        self.trace.record(Trace::Reset);
        self.begin_detect(0);
    }

    pub fn state(&self) -> State {
        self.state
    }

    pub fn stats(&self) -> &RxStats {
        &self.stats
    }

    /// The accepted line configuration, once detection has finished.
    pub fn protocol(&self) -> Option<&'static Candidate> {
        self.chosen
    }

    /// The (current, previous) frame CRCs.
    pub fn crcs(&self) -> (u32, u32) {
        (self.crc_current, self.crc_previous)
    }

    /// The published frame, or `None` while a promotion copy is in flight
    /// (the buffer is not stable then) or before the first publication.
    pub fn current_frame(&self) -> Option<&[u8]> {
        if self.copy_done_handler.is_some() {
            return None;
        }
        let candidate = self.chosen?;
        if self.stats.frames == 0 {
            return None;
        }
        Some(&self.buffers.current()[..candidate.frame_len])
    }

    pub fn hw(&self) -> &H {
        &self.hw
    }

    /// Recent pipeline events, for debugging.
    pub fn trace(&self) -> &Ringbuf<Trace, TRACE_DEPTH> {
        &self.trace
    }

    /// Consumes one runtime message. Messages with ids the pipeline does
    /// not own are ignored, so the owning loop can feed it everything.
    pub fn handle(&mut self, rt: &Runtime, msg: &Msg) -> Option<RcEvent<'_>> {
        match msg.id {
            ids::DETECT_DONE => self.on_detect_done(rt),
            ids::FRAME_READY => {
                let Payload::Crc(crc) = msg.payload else {
                    return None;
                };
                self.on_frame_ready(crc)
            }
            ids::COPY_DONE => self.on_copy_done(),
            ids::LINE_ERROR => {
                let flags = match msg.payload {
                    Payload::U8(bits) => LineErrors::from_bits_truncate(bits),
                    _ => LineErrors::empty(),
                };
                self.on_line_error(rt, flags)
            }
            _ => None,
        }
    }

    fn begin_detect(&mut self, index: usize) {
        self.state = State::Detecting(index);
        self.trace.record(Trace::DetectStart(index));
        self.hw
            .start_detect(&CANDIDATES[index], &mut self.detect_words);
    }

    fn on_detect_done(&mut self, rt: &Runtime) -> Option<RcEvent<'_>> {
        let State::Detecting(index) = self.state else {
            return None;
        };
        let candidate = &CANDIDATES[index];
        let stats = detect::analyze(&self.detect_words);

        if detect::accepts(&stats, candidate) {
            self.chosen = Some(candidate);
            self.trace.record(Trace::Accepted(candidate.protocol));
            rt.post_both_discardable(Msg::with_payload(
                ids::DETECTED,
                Payload::RcDetect(RcDetect {
                    baud: candidate.baud,
                    protocol: candidate.protocol as u8,
                }),
            ));
            self.hw.configure(candidate);
            self.arm_capture();
            Some(RcEvent::Detected(candidate))
        } else {
            self.trace.record(Trace::Rejected(index));
            self.begin_detect((index + 1) % CANDIDATES.len());
            None
        }
    }

    fn on_frame_ready(&mut self, crc: u32) -> Option<RcEvent<'_>> {
        if self.chosen.is_none() || self.state == State::Disabled {
            // Late completion from before a reset or disable.
            return None;
        }

        if self.copy_done_handler.is_some() {
            // The previous promotion hasn't finished; skip this frame
            // entirely and keep the wire moving.
            self.stats.busy = self.stats.busy.wrapping_add(1);
            self.trace.record(Trace::Busy);
            self.arm_capture();
            return None;
        }

        if crc == self.crc_current {
            self.stats.same = self.stats.same.wrapping_add(1);
            self.trace.record(Trace::Same);
            self.arm_capture();
            return None;
        }

        self.crc_previous = self.crc_current;
        self.crc_current = crc;
        self.copy_done_handler = Some(Self::copy_finished);
        self.state = State::Copying;
        self.trace.record(Trace::CopyStart);
        self.hw.start_copy(&mut self.buffers);
        self.arm_capture();
        None
    }

    fn copy_finished(&mut self) {
        self.state = State::Capturing;
    }

    fn on_copy_done(&mut self) -> Option<RcEvent<'_>> {
        let done = self.copy_done_handler.take()?;
        if self.state == State::Disabled {
            return None;
        }
        done(self);

        let candidate = self.chosen?;
        self.stats.frames = self.stats.frames.wrapping_add(1);
        self.trace.record(Trace::Published);
        Some(RcEvent::Frame(&self.buffers.current()[..candidate.frame_len]))
    }

    fn on_line_error(
        &mut self,
        rt: &Runtime,
        flags: LineErrors,
    ) -> Option<RcEvent<'_>> {
        if self.state == State::Disabled || self.state == State::Idle {
            return None;
        }

        self.hw.halt();

        let now = rt.now_ms();
        if self.stats.errors > 0
            && now.since(self.stats.last_error_at) >= ERROR_WINDOW_MS
        {
            // A clean minute elapsed; the window starts over.
            self.stats.short_term_errors = 0;
        }
        self.stats.errors = self.stats.errors.wrapping_add(1);
        if flags.contains(LineErrors::PARITY) {
            self.stats.parity_errors = self.stats.parity_errors.wrapping_add(1);
        }
        self.stats.short_term_errors += 1;
        self.stats.last_error_at = now;
        self.trace.record(Trace::LineError(flags.bits()));

        rt.post_both_discardable(Msg::with_payload(
            ids::FAULT,
            Payload::U32(self.stats.errors),
        ));

        if self.stats.short_term_errors >= ERROR_DISABLE_THRESHOLD {
            self.state = State::Disabled;
            self.stats.disabled = true;
            self.trace.record(Trace::Disabled);
            return Some(RcEvent::Disabled);
        }

        match self.state {
            State::Detecting(index) => self.begin_detect(index),
            _ => self.arm_capture(),
        }
        None
    }

    fn arm_capture(&mut self) {
        let Some(candidate) = self.chosen else {
            return;
        };
        self.hw
            .arm(&mut self.buffers.enqueue_mut()[..candidate.frame_len]);
        if self.copy_done_handler.is_none() {
            self.state = State::Capturing;
        }
    }
}
