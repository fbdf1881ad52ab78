// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Trace ring buffers for instrumenting loops and drivers.
//!
//! A `Ringbuf<T, N>` stores the last `N` recorded entries of a `Copy` payload
//! type, wrapping and overwriting the oldest entry once full. It is meant to
//! be embedded by value in the structure it instruments (a dispatch loop, a
//! receive pipeline) and read back from a debugger or from tests; nothing
//! about it is required for correct operation of its owner.
//!
//! Recording the same payload repeatedly does not consume additional entries:
//! consecutive duplicates are coalesced by bumping a per-entry `count`. This
//! keeps a chatty steady state (say, one trace per received frame) from
//! flushing out the interesting history around it. The payload type must
//! implement [`PartialEq`] for this comparison.
//!
//! Each entry also carries a `generation`, incremented every time the ring
//! wraps past that position, so a reader can tell fresh entries from stale
//! ones without clearing the buffer.

#![cfg_attr(not(test), no_std)]

/// One recorded trace entry.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Entry<T> {
    /// Number of times the ring has written this position. Zero means the
    /// position has never been written and `payload` is the initializer.
    pub generation: u16,
    /// Number of consecutive records coalesced into this entry.
    pub count: u32,
    /// The recorded payload.
    pub payload: T,
}

/// Fixed-size trace ring. See the module docs.
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    /// Position of the most recently written entry, or `None` if nothing has
    /// been recorded yet.
    last: Option<usize>,
    buffer: [Entry<T>; N],
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    /// Creates an empty ring. `initial` fills the never-written positions so
    /// the buffer contents are defined from the start; it is otherwise
    /// meaningless and is not treated as a recorded entry.
    pub const fn new(initial: T) -> Self {
        Self {
            last: None,
            buffer: [Entry {
                generation: 0,
                count: 0,
                payload: initial,
            }; N],
        }
    }

    /// Records `payload`, coalescing it into the previous entry if equal.
    pub fn record(&mut self, payload: T) {
        if let Some(last) = self.last {
            let entry = &mut self.buffer[last];
            if entry.payload == payload {
                entry.count = entry.count.wrapping_add(1);
                return;
            }
        }

        let ndx = match self.last {
            Some(last) if last + 1 < N => last + 1,
            Some(_) => 0,
            None => 0,
        };
        let entry = &mut self.buffer[ndx];
        entry.generation = entry.generation.wrapping_add(1);
        entry.count = 1;
        entry.payload = payload;
        self.last = Some(ndx);
    }

    /// Returns the most recently recorded entry, if any.
    pub fn last(&self) -> Option<&Entry<T>> {
        self.last.map(|ndx| &self.buffer[ndx])
    }

    /// Iterates over recorded entries from oldest to newest.
    ///
    /// Positions that have never been written are skipped, so a fresh ring
    /// yields nothing.
    pub fn entries(&self) -> impl Iterator<Item = &Entry<T>> + '_ {
        let last = self.last;
        (0..N)
            .filter_map(move |i| {
                let last = last?;
                // Oldest entry is the one just after `last`, modulo wrap.
                let ndx = if last + 1 + i < N {
                    last + 1 + i
                } else {
                    last + 1 + i - N
                };
                Some(&self.buffer[ndx])
            })
            .filter(|e| e.generation != 0)
    }
}
