//! Event log playback: loads the event service's log file and replays it as telemetry,
//! a few events at a time.

use std::{
    io,
    path::{Path, PathBuf},
    time::Duration,
};

use thiserror::Error;
use tlm_wire::{evs::EventRecord, TimeFormat};

use crate::bus::BusError;

mod buffer;
pub use buffer::EventLogBuffer;

mod session;
pub use session::EventPlayback;

/// Default number of events held by the playback buffer.
pub const DEFAULT_LOG_CAPACITY: usize = 20;

/// Number of events in each playback batch.
pub const EVENTS_PER_BATCH: usize = 4;

/// Consecutive load failures after which playback gives up.
pub const MAX_LOAD_ATTEMPTS: u32 = 3;

/// Maximum length of a log filename, including the terminator.
pub const MAX_PATH_LEN: usize = 64;

/// Placeholder for the names and messages of unloaded buffer slots.
pub const UNDEFINED: &str = "UNDEF";

#[derive(Debug, Error)]
pub enum PlaybackError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Event log file error: {0}")]
    Wire(#[from] tlm_wire::Error),
    #[error("Bus error: {0}")]
    Bus(#[from] BusError),
    #[error("Invalid filename {0:?}")]
    InvalidFilename(String),
    #[error(
        "Failed to read event log file {} after {attempts} attempts over {} seconds",
        path.display(),
        elapsed.as_secs()
    )]
    LoadAbandoned { path: PathBuf, attempts: u32, elapsed: Duration },
}

/// Playback session state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PlaybackState {
    #[default]
    Disabled,
    /// Waiting for the log file to appear and load.
    Loading,
    Playing,
}

#[derive(Debug, Clone)]
pub struct PlaybackOptions {
    /// Maximum number of events loaded from a log.
    capacity: usize,
    /// Housekeeping cycles between batches.
    hk_period: u16,
    /// Where the event service is asked to write its log.
    log_file: PathBuf,
    /// Time format of the event records in the log.
    time_format: TimeFormat,
}

impl Default for PlaybackOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_LOG_CAPACITY,
            hk_period: 1,
            log_file: PathBuf::from("/tmp/tlm_evt_log.dat"),
            time_format: TimeFormat::default(),
        }
    }
}

impl PlaybackOptions {
    /// Sets the buffer capacity. Zero is raised to one.
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    pub fn hk_period(mut self, period: u16) -> Self {
        self.hk_period = period;
        self
    }

    pub fn log_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_file = path.into();
        self
    }

    pub fn time_format(mut self, format: TimeFormat) -> Self {
        self.time_format = format;
        self
    }
}

/// One playback telemetry message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackBatch {
    /// The log file of the session.
    pub filename: String,
    /// Events loaded in the session.
    pub event_count: usize,
    /// Buffer index of the first entry.
    pub cursor: usize,
    /// [`EVENTS_PER_BATCH`] entries, or none if the log was empty.
    pub entries: Vec<EventRecord>,
}

/// Returns true if `path` is a usable log filename: non-empty, shorter than
/// [`MAX_PATH_LEN`], made of alphanumerics and `/._-`, and not a directory.
pub fn is_valid_filename(path: &Path) -> bool {
    let Some(name) = path.to_str() else { return false };

    !name.is_empty() &&
        name.len() < MAX_PATH_LEN &&
        !name.ends_with('/') &&
        name.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '/' | '.' | '_' | '-'))
}
