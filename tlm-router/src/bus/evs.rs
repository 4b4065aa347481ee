use std::path::Path;

use bytes::{Bytes, BytesMut};
use tlm_wire::{
    frame::{CmdFrame, Codec},
    StreamId,
};
use tokio_util::codec::Encoder;
use tracing::debug;

use super::{status, BusError, EventLogService, Publisher};

/// Width of the filename field of a write-log command.
pub const FILENAME_LEN: usize = 64;

/// Requests event log writes by publishing commands to the event service.
#[derive(Debug)]
pub struct EvsClient<P> {
    publisher: P,
    cmd_stream_id: StreamId,
    write_log_fc: u8,
    codec: Codec,
}

impl<P: Publisher> EvsClient<P> {
    pub fn new(publisher: P, cmd_stream_id: StreamId, write_log_fc: u8) -> Self {
        Self { publisher, cmd_stream_id, write_log_fc, codec: Codec::default() }
    }
}

impl<P: Publisher> EventLogService for EvsClient<P> {
    fn request_log_write(&mut self, path: &Path) -> Result<(), BusError> {
        let name = path.to_string_lossy();
        if name.len() >= FILENAME_LEN {
            return Err(BusError::Status(status::BAD_ARGUMENT));
        }

        let mut filename = BytesMut::zeroed(FILENAME_LEN);
        filename[..name.len()].copy_from_slice(name.as_bytes());

        let frame = CmdFrame::new(self.cmd_stream_id, self.write_log_fc, filename.freeze());
        let mut buf = BytesMut::new();
        self.codec.encode(frame, &mut buf).map_err(|_| BusError::Status(status::BAD_ARGUMENT))?;

        debug!(path = %name, "Requesting event log write");
        self.publisher.publish(buf.freeze())
    }
}

/// Extracts the filename from the payload of a write-log command.
pub fn write_log_filename(payload: &Bytes) -> String {
    let field = &payload[..payload.len().min(FILENAME_LEN)];
    let end = field.iter().position(|b| *b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
