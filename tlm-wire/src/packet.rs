use std::fmt;

use bytes::{Buf, BufMut, BytesMut};
use tlm_common::MissionTime;

use crate::Error;

/// Mask applied to a stream id to obtain its routing key.
pub const APP_ID_MASK: u16 = 0x07FF;

/// Number of distinct routing keys.
pub const MAX_APP_ID: usize = APP_ID_MASK as usize + 1;

/// Length of the primary packet header.
pub const PRIMARY_HEADER_LEN: usize = 6;

/// Bits of the sequence word that carry the sequence count.
pub const SEQ_COUNT_MASK: u16 = 0x3FFF;

/// Sequence flags for an unsegmented packet.
pub(crate) const SEQ_FLAGS_UNSEGMENTED: u16 = 0xC000;

/// The first 16 bits of a packet's primary header: version, type, secondary header
/// flag and application id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(u16);

impl StreamId {
    /// Marks an unused routing slot.
    pub const UNUSED: Self = Self(0xFFFF);

    #[inline]
    pub const fn new(value: u16) -> Self {
        Self(value)
    }

    #[inline]
    pub const fn value(&self) -> u16 {
        self.0
    }

    /// The routing key (application id) of this stream.
    #[inline]
    pub const fn key(&self) -> usize {
        (self.0 & APP_ID_MASK) as usize
    }

    #[inline]
    pub const fn is_unused(&self) -> bool {
        self.0 == Self::UNUSED.0
    }
}

impl From<u16> for StreamId {
    fn from(value: u16) -> Self {
        Self(value)
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:04X}", self.0)
    }
}

/// Layout of the time field in the telemetry secondary header.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TimeFormat {
    /// 32-bit seconds, 16-bit subseconds.
    #[default]
    Subsec16,
    /// 32-bit seconds, 32-bit subseconds.
    Subsec32,
}

impl TimeFormat {
    /// Returns the length of the time field in bytes.
    #[inline]
    pub const fn len(&self) -> usize {
        match self {
            Self::Subsec16 => 6,
            Self::Subsec32 => 8,
        }
    }

    /// Reads a time field. Subseconds are normalised to 32 bits.
    pub fn read(&self, mut src: &[u8]) -> Option<MissionTime> {
        if src.len() < self.len() {
            return None;
        }

        let seconds = src.get_u32();
        let subseconds = match self {
            Self::Subsec16 => (src.get_u16() as u32) << 16,
            Self::Subsec32 => src.get_u32(),
        };

        Some(MissionTime::new(seconds, subseconds))
    }

    /// Writes a time field, truncating subseconds to the format's width.
    pub fn write(&self, time: MissionTime, dst: &mut BytesMut) {
        dst.put_u32(time.seconds);
        match self {
            Self::Subsec16 => dst.put_u16((time.subseconds >> 16) as u16),
            Self::Subsec32 => dst.put_u32(time.subseconds),
        }
    }
}

/// A borrowed view over a raw space packet.
#[derive(Debug, Clone, Copy)]
pub struct Packet<'a> {
    bytes: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Wraps `bytes`, checking that at least a primary header is present.
    pub fn parse(bytes: &'a [u8]) -> Result<Self, Error> {
        if bytes.len() < PRIMARY_HEADER_LEN {
            return Err(Error::Truncated { len: bytes.len(), needed: PRIMARY_HEADER_LEN });
        }

        Ok(Self { bytes })
    }

    #[inline]
    pub fn stream_id(&self) -> StreamId {
        StreamId(u16::from_be_bytes([self.bytes[0], self.bytes[1]]))
    }

    /// The 14-bit sequence count.
    #[inline]
    pub fn sequence_count(&self) -> u16 {
        u16::from_be_bytes([self.bytes[2], self.bytes[3]]) & SEQ_COUNT_MASK
    }

    /// The telemetry secondary header time, if the packet is long enough to carry one.
    #[inline]
    pub fn time(&self, format: TimeFormat) -> Option<MissionTime> {
        format.read(&self.bytes[PRIMARY_HEADER_LEN..])
    }

    #[inline]
    pub fn as_bytes(&self) -> &'a [u8] {
        self.bytes
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Writes a primary header.
pub(crate) fn put_primary_header(dst: &mut BytesMut, stream_id: StreamId, seq: u16, total_len: usize) {
    dst.put_u16(stream_id.value());
    dst.put_u16(SEQ_FLAGS_UNSEGMENTED | (seq & SEQ_COUNT_MASK));
    dst.put_u16((total_len - 7) as u16);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_id_key_masks_to_eleven_bits() {
        let id = StreamId::new(0x0923);
        assert_eq!(id.key(), 0x123);
        assert_eq!(id.to_string(), "0x0923");
        assert!(StreamId::UNUSED.is_unused());
        assert_eq!(StreamId::UNUSED.key(), 0x7FF);
    }

    #[test]
    fn parse_header_fields() {
        let raw = [0x08, 0x23, 0xC0, 0x05, 0x00, 0x07, 0, 0, 0, 10, 0x80, 0x00, 0xAA, 0xBB];
        let packet = Packet::parse(&raw).unwrap();

        assert_eq!(packet.stream_id(), StreamId::new(0x0823));
        assert_eq!(packet.sequence_count(), 5);

        let time = packet.time(TimeFormat::Subsec16).unwrap();
        assert_eq!(time, MissionTime::new(10, 0x8000_0000));

        // Only 8 bytes follow the primary header, so a 32-bit subsecond field fits too.
        let time = packet.time(TimeFormat::Subsec32).unwrap();
        assert_eq!(time, MissionTime::new(10, 0x8000_AABB));
    }

    #[test]
    fn short_packets() {
        assert!(matches!(
            Packet::parse(&[0x08, 0x23, 0xC0]),
            Err(Error::Truncated { len: 3, needed: 6 })
        ));

        let raw = [0x08, 0x23, 0xC0, 0x05, 0x00, 0x01, 0, 0];
        let packet = Packet::parse(&raw).unwrap();
        assert!(packet.time(TimeFormat::Subsec16).is_none());
    }

    #[test]
    fn time_format_write_read() {
        let mut buf = BytesMut::new();
        let time = MissionTime::new(42, 0x1234_5678);

        TimeFormat::Subsec16.write(time, &mut buf);
        assert_eq!(buf.len(), 6);
        assert_eq!(TimeFormat::Subsec16.read(&buf), Some(MissionTime::new(42, 0x1234_0000)));

        buf.clear();
        TimeFormat::Subsec32.write(time, &mut buf);
        assert_eq!(buf.len(), 8);
        assert_eq!(TimeFormat::Subsec32.read(&buf), Some(time));
    }
}
