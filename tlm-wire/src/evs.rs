//! Binary event log files, as written by the event service on request.
//!
//! A file is a [`FileHeader`] followed by back-to-back long-event telemetry packets,
//! each [`EventLogCodec::record_len`] bytes long.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tlm_common::MissionTime;
use tokio_util::codec::{Decoder, Encoder};

use crate::{
    get_fixed_str,
    packet::{put_primary_header, Packet, StreamId, TimeFormat, PRIMARY_HEADER_LEN},
    put_fixed_str, Error,
};

/// Magic content type of every file header (`"cFE1"`).
pub const CONTENT_TYPE: u32 = 0x6346_4531;
/// File subtype of an event log.
pub const SUBTYPE_EVENT_LOG: u32 = 16;
/// Encoded size of a [`FileHeader`].
pub const FILE_HEADER_LEN: usize = 64;
/// Width of the description field of a file header.
pub const DESCRIPTION_LEN: usize = 32;
/// Width of the application name field of an event record.
pub const APP_NAME_LEN: usize = 20;
/// Width of the message field of an event record.
pub const MESSAGE_LEN: usize = 122;
/// Stream id written into encoded event records.
pub const LONG_EVENT_STREAM_ID: StreamId = StreamId::new(0x0808);

/// Size of an event record body, after the telemetry header.
const RECORD_BODY_LEN: usize = APP_NAME_LEN + 2 + 2 + 4 + 4 + MESSAGE_LEN + 2;

/// The fixed header at the start of every data file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileHeader {
    pub content_type: u32,
    pub sub_type: u32,
    pub spacecraft_id: u32,
    pub processor_id: u32,
    pub application_id: u32,
    pub created: MissionTime,
    pub description: String,
}

impl FileHeader {
    /// A header for an event log file.
    pub fn event_log(description: &str) -> Self {
        Self {
            content_type: CONTENT_TYPE,
            sub_type: SUBTYPE_EVENT_LOG,
            spacecraft_id: 0,
            processor_id: 0,
            application_id: 0,
            created: MissionTime::now(),
            description: description.to_owned(),
        }
    }

    /// Decodes a header from the start of `src`, checking the content type.
    pub fn decode(mut src: &[u8]) -> Result<Self, Error> {
        if src.len() < FILE_HEADER_LEN {
            return Err(Error::Truncated { len: src.len(), needed: FILE_HEADER_LEN });
        }

        let content_type = src.get_u32();
        if content_type != CONTENT_TYPE {
            tracing::debug!(content_type, "Unknown file content type");
            return Err(Error::ContentType(content_type));
        }

        let sub_type = src.get_u32();
        // Header length, always 64.
        let _ = src.get_u32();
        let spacecraft_id = src.get_u32();
        let processor_id = src.get_u32();
        let application_id = src.get_u32();
        let created = MissionTime::new(src.get_u32(), src.get_u32());
        let description = get_fixed_str(&src[..DESCRIPTION_LEN]);

        Ok(Self {
            content_type,
            sub_type,
            spacecraft_id,
            processor_id,
            application_id,
            created,
            description,
        })
    }

    /// Decodes a header and checks that it belongs to an event log.
    pub fn decode_event_log(src: &[u8]) -> Result<Self, Error> {
        let header = Self::decode(src)?;
        if header.sub_type != SUBTYPE_EVENT_LOG {
            tracing::debug!(sub_type = header.sub_type, "File is not an event log");
            return Err(Error::SubType(header.sub_type));
        }

        Ok(header)
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(FILE_HEADER_LEN);
        dst.put_u32(self.content_type);
        dst.put_u32(self.sub_type);
        dst.put_u32(FILE_HEADER_LEN as u32);
        dst.put_u32(self.spacecraft_id);
        dst.put_u32(self.processor_id);
        dst.put_u32(self.application_id);
        dst.put_u32(self.created.seconds);
        dst.put_u32(self.created.subseconds);
        put_fixed_str(dst, &self.description, DESCRIPTION_LEN);
    }
}

/// One logged event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventRecord {
    pub time: MissionTime,
    pub event_id: u16,
    pub event_type: u16,
    pub app_name: String,
    pub message: String,
    pub spacecraft_id: u32,
    pub processor_id: u32,
}

/// Reads and writes event records. The record length depends on the time format of
/// the telemetry header.
#[derive(Debug, Default, Clone, Copy)]
pub struct EventLogCodec {
    format: TimeFormat,
}

impl EventLogCodec {
    pub fn new(format: TimeFormat) -> Self {
        Self { format }
    }

    /// Encoded length of one record.
    #[inline]
    pub fn record_len(&self) -> usize {
        PRIMARY_HEADER_LEN + self.format.len() + RECORD_BODY_LEN
    }
}

impl Decoder for EventLogCodec {
    type Item = EventRecord;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let len = self.record_len();
        if src.len() < len {
            return Ok(None);
        }

        let raw: Bytes = src.split_to(len).freeze();
        let packet = Packet::parse(&raw)?;
        let time = packet.time(self.format).unwrap_or_default();

        let mut body = &raw[PRIMARY_HEADER_LEN + self.format.len()..];
        let app_name = get_fixed_str(&body[..APP_NAME_LEN]);
        body.advance(APP_NAME_LEN);

        let event_id = body.get_u16();
        let event_type = body.get_u16();
        let spacecraft_id = body.get_u32();
        let processor_id = body.get_u32();
        let message = get_fixed_str(&body[..MESSAGE_LEN]);
        tracing::trace!(event_id, event_type, app = %app_name, "Decoded event record");

        Ok(Some(EventRecord {
            time,
            event_id,
            event_type,
            app_name,
            message,
            spacecraft_id,
            processor_id,
        }))
    }
}

impl Encoder<&EventRecord> for EventLogCodec {
    type Error = Error;

    fn encode(&mut self, item: &EventRecord, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = self.record_len();
        dst.reserve(len);

        put_primary_header(dst, LONG_EVENT_STREAM_ID, 0, len);
        self.format.write(item.time, dst);
        put_fixed_str(dst, &item.app_name, APP_NAME_LEN);
        dst.put_u16(item.event_id);
        dst.put_u16(item.event_type);
        dst.put_u32(item.spacecraft_id);
        dst.put_u32(item.processor_id);
        put_fixed_str(dst, &item.message, MESSAGE_LEN);
        // Spare.
        dst.put_u16(0);

        Ok(())
    }
}
