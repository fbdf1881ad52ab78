// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Line protocol autodetection.
//!
//! Until a protocol is chosen, the pipeline cycles through a table of
//! candidate line configurations. For each one it takes a raw timed capture
//! of the wire and looks at the bit-run structure:
//!
//! - a real serial stream sampled at the right baud rate contains isolated
//!   single bits (start bits against idle, lone data bits), so both a
//!   single-0 run and a single-1 run must be present;
//! - the idle level dominates the capture, so the longest 0-run must beat
//!   the longest 1-run on an inverted line, and vice versa.
//!
//! A capture sampled at the wrong rate smears single bits into longer runs,
//! which is what makes the first test discriminating.

use crate::buffer::FRAME_MAX;
use static_assertions::const_assert;

/// Words per detection capture.
pub const DETECT_WORDS: usize = 60;

/// Supported receiver protocols, in candidate-table order.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Protocol {
    Sbus = 0,
    Ibus = 1,
    Srxl = 2,
}

impl Protocol {
    /// Decodes the discriminant carried in a detected-protocol broadcast.
    pub const fn from_u8(v: u8) -> Option<Protocol> {
        match v {
            0 => Some(Protocol::Sbus),
            1 => Some(Protocol::Ibus),
            2 => Some(Protocol::Srxl),
            _ => None,
        }
    }
}

/// UART frame format of a candidate.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum WireFormat {
    /// 8 data bits, no parity, 1 stop bit.
    EightN1,
    /// 8 data bits, even parity, 2 stop bits.
    EightE2,
}

/// One entry of the detection table: a line configuration to try, and what
/// capturing under it looks like once accepted.
#[derive(Debug, Eq, PartialEq)]
pub struct Candidate {
    pub baud: u32,
    pub format: WireFormat,
    /// True if the line idles low (driven through an inverter).
    pub inverted: bool,
    pub protocol: Protocol,
    /// Bytes per frame; for variable-length protocols this is the upper
    /// bound and the DMA is armed for exactly this many.
    pub frame_len: usize,
}

const CANDIDATE_TABLE: [Candidate; 3] = [
    Candidate {
        baud: 100_000,
        format: WireFormat::EightE2,
        inverted: true,
        protocol: Protocol::Sbus,
        frame_len: 25,
    },
    Candidate {
        baud: 115_200,
        format: WireFormat::EightN1,
        inverted: false,
        protocol: Protocol::Ibus,
        frame_len: 32,
    },
    Candidate {
        baud: 400_000,
        format: WireFormat::EightN1,
        inverted: false,
        protocol: Protocol::Srxl,
        frame_len: FRAME_MAX,
    },
];

const_assert!(CANDIDATE_TABLE[0].frame_len <= FRAME_MAX);
const_assert!(CANDIDATE_TABLE[1].frame_len <= FRAME_MAX);
const_assert!(CANDIDATE_TABLE[2].frame_len <= FRAME_MAX);

/// The detection cycle. Order matters only in that it sets which protocol
/// wins if a capture somehow satisfies several; in practice the run shape
/// selects exactly one. A `static` so accepted entries can be held as
/// `&'static Candidate` for the life of the pipeline.
pub static CANDIDATES: [Candidate; 3] = CANDIDATE_TABLE;

/// Bit-run shape of a capture.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub(crate) struct RunStats {
    pub max_zero: u32,
    pub max_one: u32,
    pub zero_singles: u32,
    pub one_singles: u32,
}

/// Computes run statistics over the capture, treated as one continuous bit
/// stream, LSB of the first word first (the order the receive shifter
/// packed them).
pub(crate) fn analyze(words: &[u32]) -> RunStats {
    let mut stats = RunStats::default();
    let mut run_bit = None;
    let mut run_len = 0u32;

    let bits = words
        .iter()
        .flat_map(|&word| (0..32).map(move |i| (word >> i) & 1));

    for bit in bits {
        match run_bit {
            Some(current) if current == bit => run_len += 1,
            Some(current) => {
                note_run(&mut stats, current, run_len);
                run_bit = Some(bit);
                run_len = 1;
            }
            None => {
                run_bit = Some(bit);
                run_len = 1;
            }
        }
    }
    if let Some(current) = run_bit {
        note_run(&mut stats, current, run_len);
    }

    stats
}

fn note_run(stats: &mut RunStats, bit: u32, len: u32) {
    if bit == 0 {
        stats.max_zero = stats.max_zero.max(len);
        if len == 1 {
            stats.zero_singles += 1;
        }
    } else {
        stats.max_one = stats.max_one.max(len);
        if len == 1 {
            stats.one_singles += 1;
        }
    }
}

/// The acceptance test described in the module docs.
pub(crate) fn accepts(stats: &RunStats, candidate: &Candidate) -> bool {
    if stats.zero_singles == 0 || stats.one_singles == 0 {
        return false;
    }
    if candidate.inverted {
        stats.max_zero > stats.max_one
    } else {
        stats.max_one > stats.max_zero
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds capture words from a bit string, first character first (so the
    /// string reads in stream order). Unspecified trailing bits repeat the
    /// final character, standing in for the idle line.
    fn words_from(bits: &str, n: usize) -> Vec<u32> {
        let chars: Vec<u32> = bits
            .chars()
            .filter(|c| !c.is_whitespace())
            .map(|c| if c == '1' { 1 } else { 0 })
            .collect();
        let idle = *chars.last().unwrap();
        (0..n)
            .map(|w| {
                let mut word = 0u32;
                for i in 0..32 {
                    let bit = chars.get(w * 32 + i).copied().unwrap_or(idle);
                    word |= bit << i;
                }
                word
            })
            .collect()
    }

    #[test]
    fn run_stats_basics() {
        // Stream: 1 0 1 1 1 0 0 1 ... then idle-high forever.
        let words = words_from("10111001", 2);
        let stats = analyze(&words);
        assert_eq!(stats.zero_singles, 1); // the lone 0 at position 1
        assert_eq!(stats.one_singles, 1); // the leading 1
        assert_eq!(stats.max_zero, 2);
        assert!(stats.max_one > 32); // trailing idle run
    }

    #[test]
    fn accepts_upright_line_with_one_bias() {
        let stats = analyze(&words_from("1 0 111 0 1 00 1", 4));
        assert!(accepts(&stats, &CANDIDATES[1])); // 8N1, not inverted
        assert!(!accepts(&stats, &CANDIDATES[0])); // inverted candidate
    }

    #[test]
    fn accepts_inverted_line_with_zero_bias() {
        let stats = analyze(&words_from("0 1 000 1 0 11 0", 4));
        assert!(accepts(&stats, &CANDIDATES[0]));
        assert!(!accepts(&stats, &CANDIDATES[1]));
    }

    #[test]
    fn rejects_capture_without_single_runs() {
        // Wrong baud rate: every feature smears to two bits or more.
        let stats = analyze(&words_from("1100111100110011", 4));
        assert!(!accepts(&stats, &CANDIDATES[0]));
        assert!(!accepts(&stats, &CANDIDATES[1]));
        assert!(!accepts(&stats, &CANDIDATES[2]));
    }

    #[test]
    fn rejects_flat_line() {
        let stats = analyze(&[0u32; DETECT_WORDS]);
        assert_eq!(stats.zero_singles, 0);
        assert!(!accepts(&stats, &CANDIDATES[0]));
    }

    #[test]
    fn protocol_discriminant_round_trips() {
        for p in [Protocol::Sbus, Protocol::Ibus, Protocol::Srxl] {
            assert_eq!(Protocol::from_u8(p as u8), Some(p));
        }
        assert_eq!(Protocol::from_u8(9), None);
    }
}
