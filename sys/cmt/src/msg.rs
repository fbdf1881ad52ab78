// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Message values.
//!
//! A [`Msg`] is a small, fixed-size value: it is copied into a queue at post
//! time and copied back out at retrieve time, so no shared mutable state
//! survives the queue boundary. The payload is a tagged union whose variant
//! is implied by the message id; the union never grows beyond its largest
//! fixed-size member.

use crate::time::Millis;
use crate::Runtime;

/// A 16-bit message tag.
///
/// Ids are grouped into namespaces by high byte so that unrelated subsystems
/// can allocate tags without colliding: *common* ids (`0x00xx`) belong to the
/// runtime and shared infrastructure, *host-OS* ids (`0x01xx`) to drivers and
/// board services, and *control/UI* ids (`0x02xx`) to the operator surfaces.
#[derive(Copy, Clone, Default, Eq, PartialEq)]
#[repr(transparent)]
pub struct MsgId(pub u16);

impl MsgId {
    /// Reserved "no message" tag; never dispatched.
    pub const NONE: Self = Self(0x0000);
    /// Periodic housekeeping heartbeat, broadcast every 16th tick.
    pub const HOUSEKEEPING: Self = Self(0x0001);
    /// Sleep-slot expiry; carries a [`SleepRecord`] and dispatches through
    /// its pinned trampoline.
    pub const SLEEP: Self = Self(0x0002);

    /// Namespace of this id.
    pub const fn class(self) -> Class {
        match self.0 >> 8 {
            0x00 => Class::Common,
            0x01 => Class::HostOs,
            0x02 => Class::Control,
            _ => Class::Reserved,
        }
    }
}

impl core::fmt::Debug for MsgId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "MsgId({:#06x})", self.0)
    }
}

/// Message id namespaces; see [`MsgId`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Class {
    Common,
    HostOs,
    Control,
    Reserved,
}

/// Delivery priority. Selects the destination ring on post (except that any
/// post to a completely empty queue set lands on the high ring) and the
/// drain order on retrieve.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum Priority {
    #[default]
    Normal,
    High,
    Low,
}

/// Handler function invoked by a dispatcher for a retrieved message.
pub type Handler = fn(&Runtime, &Msg);

/// Callback invoked when a sleep slot expires. The `u32` is the token the
/// sleeper passed to [`Runtime::sleep_ms`]; by convention it is an index into
/// a table the sleeper owns, never a pointer.
pub type SleepFn = fn(&Runtime, u32);

/// Payload of a sleep-expiry message.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct SleepRecord {
    pub callback: SleepFn,
    pub token: u32,
}

/// Payload of the radio-control "protocol detected" broadcast.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct RcDetect {
    pub baud: u32,
    /// Driver-defined protocol discriminant.
    pub protocol: u8,
}

/// Payload of a sensor-bank change notification: which bank, and a bit per
/// channel that changed since the last scan.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorBankDelta {
    pub bank: u8,
    pub changed: u16,
}

/// Payload of a servo parameter update.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct ServoParams {
    pub servo: u16,
    pub param: u16,
    pub value: u16,
}

/// The fixed-size payload union. The variant in use is implied by the
/// message id.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub enum Payload {
    #[default]
    None,
    U8(u8),
    U16(u16),
    U32(u32),
    I32(i32),
    F32(f32),
    /// An index into a table owned by the producing subsystem. This is the
    /// safe stand-in for "a small pointer": the consumer resolves it against
    /// its own storage.
    Token(u32),
    Sleep(SleepRecord),
    RcDetect(RcDetect),
    SensorDelta(SensorBankDelta),
    ServoParams(ServoParams),
    Time(Millis),
    Crc(u32),
}

/// How a message finds its handler: through the loop's registry table, or
/// through a handler pinned to this one delivery.
///
/// This is a proper two-variant alternative rather than a nullable function
/// pointer, so the dispatcher's hot loop is a plain `match` and the
/// "re-post through the table" trick ([`Msg::clear_handler`]) is explicit.
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Dispatch {
    Registry,
    Pinned(Handler),
}

/// An immutable message value. See the module docs.
#[derive(Copy, Clone, Debug)]
pub struct Msg {
    pub id: MsgId,
    pub priority: Priority,
    pub payload: Payload,
    dispatch: Dispatch,
    sequence: u32,
    posted_at: Millis,
}

impl Msg {
    /// A message with the given id, NORMAL priority, empty payload, and
    /// registry dispatch. `sequence` and `posted_at` are zero until the
    /// message is posted.
    pub const fn new(id: MsgId) -> Self {
        Self {
            id,
            priority: Priority::Normal,
            payload: Payload::None,
            dispatch: Dispatch::Registry,
            sequence: 0,
            posted_at: Millis::ZERO,
        }
    }

    pub const fn with_priority(id: MsgId, priority: Priority) -> Self {
        let mut msg = Self::new(id);
        msg.priority = priority;
        msg
    }

    pub const fn with_payload(id: MsgId, payload: Payload) -> Self {
        let mut msg = Self::new(id);
        msg.payload = payload;
        msg
    }

    /// A message that dispatches through `handler` on its next delivery,
    /// bypassing the registry.
    pub const fn pinned(id: MsgId, handler: Handler) -> Self {
        let mut msg = Self::new(id);
        msg.dispatch = Dispatch::Pinned(handler);
        msg
    }

    /// Reverts to registry dispatch, so a handler can re-post the value it
    /// received and have the second delivery go through the table.
    pub fn clear_handler(&mut self) {
        self.dispatch = Dispatch::Registry;
    }

    /// How this message will be dispatched.
    pub fn dispatch(&self) -> Dispatch {
        self.dispatch
    }

    /// Post sequence number. Strictly increasing across all posts to either
    /// core; zero means the message has not been posted.
    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    /// Millisecond clock at the time of post.
    pub fn posted_at(&self) -> Millis {
        self.posted_at
    }

    /// Assigns post-time bookkeeping. Called exactly once per post, by the
    /// runtime.
    pub(crate) fn stamp(&mut self, sequence: u32, now: Millis) {
        self.sequence = sequence;
        self.posted_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_classes() {
        assert_eq!(MsgId(0x0001).class(), Class::Common);
        assert_eq!(MsgId(0x0142).class(), Class::HostOs);
        assert_eq!(MsgId(0x02ff).class(), Class::Control);
        assert_eq!(MsgId(0x0300).class(), Class::Reserved);
    }

    #[test]
    fn constructors() {
        let m = Msg::new(MsgId(0x0005));
        assert_eq!(m.priority, Priority::Normal);
        assert_eq!(m.payload, Payload::None);
        assert_eq!(m.dispatch(), Dispatch::Registry);
        assert_eq!(m.sequence(), 0);
        assert_eq!(m.posted_at(), Millis::ZERO);

        let m = Msg::with_priority(MsgId(0x0005), Priority::Low);
        assert_eq!(m.priority, Priority::Low);
    }

    #[test]
    fn clear_handler_reverts_to_registry() {
        fn h(_: &Runtime, _: &Msg) {}

        let mut m = Msg::pinned(MsgId(0x0005), h);
        assert_eq!(m.dispatch(), Dispatch::Pinned(h as Handler));
        m.clear_handler();
        assert_eq!(m.dispatch(), Dispatch::Registry);
    }
}
