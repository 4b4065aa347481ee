use bytes::{Bytes, BytesMut};
use tlm_common::MissionTime;
use tlm_wire::{
    frame::{Codec, TlmFrame},
    StreamId, TimeFormat,
};
use tokio_util::codec::Encoder;

mod playback;
mod router;
mod table;

/// Encodes a telemetry packet with a 10 byte payload.
pub(crate) fn tlm_packet(stream_id: u16, seq: u16, time: MissionTime) -> Bytes {
    let mut buf = BytesMut::new();
    let frame = TlmFrame::new(StreamId::new(stream_id), seq, time, Bytes::from_static(&[0xA5; 10]));
    Codec::new(TimeFormat::Subsec16).encode(frame, &mut buf).unwrap();
    buf.freeze()
}
