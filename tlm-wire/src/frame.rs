use bytes::{Buf, BufMut, Bytes, BytesMut};
use tlm_common::MissionTime;
use tokio_util::codec::Encoder;

use crate::{
    packet::{put_primary_header, Packet, StreamId, TimeFormat, PRIMARY_HEADER_LEN},
    Error,
};

/// Length of the command secondary header (function code + checksum).
pub const CMD_SEC_HEADER_LEN: usize = 2;

/// Maximum length of a single packet.
pub const MAX_PACKET_LEN: usize = u16::MAX as usize + 7;

/// A telemetry packet produced by this node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlmFrame {
    pub stream_id: StreamId,
    pub seq: u16,
    pub time: MissionTime,
    pub payload: Bytes,
}

impl TlmFrame {
    pub fn new(stream_id: StreamId, seq: u16, time: MissionTime, payload: Bytes) -> Self {
        Self { stream_id, seq, time, payload }
    }

    /// Total encoded length for the given time format.
    #[inline]
    pub fn len(&self, format: TimeFormat) -> usize {
        PRIMARY_HEADER_LEN + format.len() + self.payload.len()
    }

    /// Parses a raw telemetry packet.
    pub fn decode(mut src: Bytes, format: TimeFormat) -> Result<Self, Error> {
        let needed = PRIMARY_HEADER_LEN + format.len();
        let packet = Packet::parse(&src)?;
        let time = packet
            .time(format)
            .ok_or(Error::Truncated { len: src.len(), needed })?;
        let (stream_id, seq) = (packet.stream_id(), packet.sequence_count());

        src.advance(needed);
        Ok(Self { stream_id, seq, time, payload: src })
    }
}

/// A command packet, as sent to other applications on the bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdFrame {
    pub stream_id: StreamId,
    pub seq: u16,
    pub function_code: u8,
    pub payload: Bytes,
}

impl CmdFrame {
    pub fn new(stream_id: StreamId, function_code: u8, payload: Bytes) -> Self {
        Self { stream_id, seq: 0, function_code, payload }
    }

    #[inline]
    pub fn len(&self) -> usize {
        PRIMARY_HEADER_LEN + CMD_SEC_HEADER_LEN + self.payload.len()
    }

    /// Parses a raw command packet. The checksum is not verified, see [`is_checksum_valid`].
    pub fn decode(mut src: Bytes) -> Result<Self, Error> {
        let needed = PRIMARY_HEADER_LEN + CMD_SEC_HEADER_LEN;
        if src.len() < needed {
            return Err(Error::Truncated { len: src.len(), needed });
        }

        let packet = Packet::parse(&src)?;
        let (stream_id, seq) = (packet.stream_id(), packet.sequence_count());
        let function_code = src[PRIMARY_HEADER_LEN] & 0x7F;

        src.advance(needed);
        Ok(Self { stream_id, seq, function_code, payload: src })
    }
}

/// Returns true if the bytes of a command packet XOR to `0xFF`.
pub fn is_checksum_valid(packet: &[u8]) -> bool {
    packet.iter().fold(0u8, |acc, b| acc ^ b) == 0xFF
}

/// Frames outgoing telemetry and command packets.
#[derive(Debug, Default, Clone, Copy)]
pub struct Codec {
    format: TimeFormat,
}

impl Codec {
    pub fn new(format: TimeFormat) -> Self {
        Self { format }
    }

    #[inline]
    pub fn format(&self) -> TimeFormat {
        self.format
    }
}

impl Encoder<TlmFrame> for Codec {
    type Error = Error;

    fn encode(&mut self, item: TlmFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = item.len(self.format);
        if total > MAX_PACKET_LEN {
            tracing::warn!(stream_id = %item.stream_id, len = total, "Packet too large to encode");
            return Err(Error::Oversized(total));
        }

        dst.reserve(total);
        put_primary_header(dst, item.stream_id, item.seq, total);
        self.format.write(item.time, dst);
        dst.put_slice(&item.payload);

        Ok(())
    }
}

impl Encoder<CmdFrame> for Codec {
    type Error = Error;

    fn encode(&mut self, item: CmdFrame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let total = item.len();
        if total > MAX_PACKET_LEN {
            tracing::warn!(stream_id = %item.stream_id, len = total, "Packet too large to encode");
            return Err(Error::Oversized(total));
        }

        let start = dst.len();
        dst.reserve(total);
        put_primary_header(dst, item.stream_id, item.seq, total);
        dst.put_u8(item.function_code & 0x7F);
        dst.put_u8(0);
        dst.put_slice(&item.payload);

        let checksum = dst[start..].iter().fold(0xFFu8, |acc, b| acc ^ b);
        dst[start + PRIMARY_HEADER_LEN + 1] = checksum;

        Ok(())
    }
}
