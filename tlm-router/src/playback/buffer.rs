use std::{fs, path::Path};

use bytes::BytesMut;
use tlm_wire::{
    evs::{EventLogCodec, EventRecord, FileHeader, FILE_HEADER_LEN},
    TimeFormat,
};
use tokio_util::codec::Decoder;
use tracing::debug;

use super::{PlaybackBatch, PlaybackError, EVENTS_PER_BATCH, UNDEFINED};

/// Fixed-capacity circular buffer of loaded events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventLogBuffer {
    entries: Vec<EventRecord>,
    loaded: Vec<bool>,
    /// Number of events actually read from the log.
    count: usize,
    /// Next entry to play back.
    cursor: usize,
}

fn undefined_entry() -> EventRecord {
    EventRecord {
        app_name: UNDEFINED.to_owned(),
        message: UNDEFINED.to_owned(),
        ..Default::default()
    }
}

impl EventLogBuffer {
    /// Creates an empty buffer with every slot undefined.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: vec![undefined_entry(); capacity],
            loaded: vec![false; capacity],
            count: 0,
            cursor: 0,
        }
    }

    /// Builds a buffer from an event log file. Records are read until the file ends, a
    /// record is cut short or the buffer is full.
    pub fn load(
        path: &Path,
        capacity: usize,
        format: TimeFormat,
    ) -> Result<Self, PlaybackError> {
        let data = fs::read(path)?;
        FileHeader::decode_event_log(&data)?;

        let mut src = BytesMut::from(&data[FILE_HEADER_LEN..]);
        let mut codec = EventLogCodec::new(format);
        let mut buffer = Self::new(capacity);

        while buffer.count < capacity {
            match codec.decode(&mut src) {
                Ok(Some(record)) => {
                    buffer.entries[buffer.count] = record;
                    buffer.loaded[buffer.count] = true;
                    buffer.count += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    debug!(err = ?e, index = buffer.count, "Stopping at unreadable record");
                    break;
                }
            }
        }

        Ok(buffer)
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Number of loaded events.
    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    #[inline]
    pub fn entry(&self, index: usize) -> Option<&EventRecord> {
        self.entries.get(index)
    }

    #[inline]
    pub fn is_loaded(&self, index: usize) -> bool {
        self.loaded.get(index).copied().unwrap_or(false)
    }

    /// Takes the next [`EVENTS_PER_BATCH`] entries, wrapping around the loaded events.
    /// An empty buffer yields a batch without entries.
    pub fn next_batch(&mut self, filename: &str) -> PlaybackBatch {
        let start = self.cursor;
        let mut entries = Vec::with_capacity(EVENTS_PER_BATCH);

        if self.count > 0 {
            for _ in 0..EVENTS_PER_BATCH {
                entries.push(self.entries[self.cursor].clone());
                self.cursor = (self.cursor + 1) % self.count;
            }
        }

        PlaybackBatch { filename: filename.to_owned(), event_count: self.count, cursor: start, entries }
    }
}
