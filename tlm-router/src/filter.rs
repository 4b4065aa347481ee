//! Per-route packet filtering.
//!
//! A [`FilterRule`] passes `N` packets out of every group of `X`, starting at offset
//! `O`, counting either by the packet sequence count or by a counter derived from the
//! packet time.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tlm_common::MissionTime;
use tlm_wire::{
    frame::{Codec, TlmFrame},
    Packet, StreamId, TimeFormat,
};
use tokio_util::codec::Encoder;

/// Number of synthetic packets evaluated by [`preview`].
pub const PREVIEW_LEN: usize = 20;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterError {
    #[error("Invalid filter type: {0}")]
    InvalidKind(u16),
    #[error("Filter group size X must be greater than zero")]
    ZeroGroupSize,
}

/// Which counter a filter operates on. The discriminants are the values used in tables
/// and commands.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum FilterKind {
    #[default]
    Always = 1,
    BySequenceCount = 2,
    ByTime = 3,
}

impl TryFrom<u16> for FilterKind {
    type Error = FilterError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Always),
            2 => Ok(Self::BySequenceCount),
            3 => Ok(Self::ByTime),
            other => Err(FilterError::InvalidKind(other)),
        }
    }
}

impl From<FilterKind> for u16 {
    fn from(kind: FilterKind) -> Self {
        kind as u16
    }
}

/// A validated filter rule. Group size is always non-zero unless the kind is
/// [`FilterKind::Always`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FilterRule {
    kind: FilterKind,
    /// N: packets passed per group.
    pass: u16,
    /// X: group size.
    group: u16,
    /// O: offset into the group.
    offset: u16,
}

impl Default for FilterRule {
    fn default() -> Self {
        Self::ALWAYS
    }
}

impl FilterRule {
    /// Passes every packet.
    pub const ALWAYS: Self = Self { kind: FilterKind::Always, pass: 0, group: 0, offset: 0 };

    /// Creates a rule passing `pass` out of every `group` packets, starting at `offset`.
    /// A pass count of at least the group size passes everything.
    pub fn new(kind: FilterKind, pass: u16, group: u16, offset: u16) -> Result<Self, FilterError> {
        if kind != FilterKind::Always && group == 0 {
            return Err(FilterError::ZeroGroupSize);
        }

        Ok(Self { kind, pass, group, offset })
    }

    /// Creates a rule from its raw table/command representation.
    pub fn from_raw(kind: u16, pass: u16, group: u16, offset: u16) -> Result<Self, FilterError> {
        Self::new(FilterKind::try_from(kind)?, pass, group, offset)
    }

    #[inline]
    pub fn kind(&self) -> FilterKind {
        self.kind
    }

    /// N
    #[inline]
    pub fn pass(&self) -> u16 {
        self.pass
    }

    /// X
    #[inline]
    pub fn group(&self) -> u16 {
        self.group
    }

    /// O
    #[inline]
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Returns true if a packet with the given counter falls inside the pass window.
    #[inline]
    fn in_window(&self, counter: u16) -> bool {
        let position = (u32::from(counter) + u32::from(self.offset)) % u32::from(self.group);
        position < u32::from(self.pass)
    }
}

/// The counter used by [`FilterKind::ByTime`]: the low 12 bits of the seconds and the top
/// 4 bits of the subseconds, giving 1/16 s resolution.
#[inline]
pub fn time_counter(time: MissionTime) -> u16 {
    (((time.seconds << 4) & 0xFFF0) | (time.subseconds >> 28)) as u16
}

/// Returns true if the packet must be dropped.
///
/// A time filter passes packets that are too short to carry a time field.
pub fn is_filtered(packet: &Packet<'_>, rule: &FilterRule, format: TimeFormat) -> bool {
    match rule.kind {
        FilterKind::Always => false,
        FilterKind::BySequenceCount => !rule.in_window(packet.sequence_count()),
        FilterKind::ByTime => match packet.time(format) {
            Some(time) => !rule.in_window(time_counter(time)),
            None => false,
        },
    }
}

/// Runs `rule` over [`PREVIEW_LEN`] synthetic packets with sequence counts `0..20`,
/// each one second and 1/256 s later than the previous one. Returns whether each
/// packet was filtered.
pub fn preview(rule: &FilterRule, format: TimeFormat) -> [bool; PREVIEW_LEN] {
    const SUBSECOND_STEP: u32 = 0x0100_0000;

    let mut codec = Codec::new(format);
    let mut buf = BytesMut::new();
    let mut results = [false; PREVIEW_LEN];

    for (i, filtered) in results.iter_mut().enumerate() {
        let time = MissionTime::new(i as u32, SUBSECOND_STEP.wrapping_mul(i as u32));
        let frame = TlmFrame::new(StreamId::new(0), i as u16, time, Bytes::new());

        buf.clear();
        if codec.encode(frame, &mut buf).is_err() {
            continue;
        }

        if let Ok(packet) = Packet::parse(&buf) {
            *filtered = is_filtered(&packet, rule, format);
        }
    }

    results
}
