use std::{
    fs, io,
    path::{Path, PathBuf},
    time::Instant,
};

use tracing::{error, info, warn};

use super::{
    is_valid_filename, EventLogBuffer, PlaybackBatch, PlaybackError, PlaybackOptions,
    PlaybackState, MAX_LOAD_ATTEMPTS,
};
use crate::bus::EventLogService;

/// Replays the event service's log as telemetry batches. Driven by [`Self::execute`] once
/// per housekeeping cycle.
#[derive(Debug)]
pub struct EventPlayback<E> {
    options: PlaybackOptions,
    evs: E,
    state: PlaybackState,
    buffer: EventLogBuffer,
    cycle_count: u16,
    attempts: u32,
    started_at: Instant,
}

impl<E: EventLogService> EventPlayback<E> {
    pub fn new(evs: E, options: PlaybackOptions) -> Self {
        Self {
            buffer: EventLogBuffer::new(options.capacity),
            options,
            evs,
            state: PlaybackState::Disabled,
            cycle_count: 0,
            attempts: 0,
            started_at: Instant::now(),
        }
    }

    #[inline]
    pub fn state(&self) -> PlaybackState {
        self.state
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.state != PlaybackState::Disabled
    }

    #[inline]
    pub fn hk_period(&self) -> u16 {
        self.options.hk_period
    }

    #[inline]
    pub fn log_file(&self) -> &Path {
        &self.options.log_file
    }

    /// Consecutive failed load attempts in the current session.
    #[inline]
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    #[inline]
    pub fn buffer(&self) -> &EventLogBuffer {
        &self.buffer
    }

    #[inline]
    pub fn event_service(&self) -> &E {
        &self.evs
    }

    /// Sets the batch period and log file. An invalid filename rejects the whole
    /// command. An accepted configuration stops any active session.
    pub fn configure(&mut self, log_file: impl Into<PathBuf>, hk_period: u16) -> Result<(), PlaybackError> {
        let log_file = log_file.into();
        if !is_valid_filename(&log_file) {
            error!(file = %log_file.display(), "Config playback command rejected, invalid filename");
            return Err(PlaybackError::InvalidFilename(log_file.display().to_string()));
        }

        if self.is_enabled() {
            self.stop();
        }

        info!(file = %log_file.display(), hk_period, "Config playback command accepted");
        self.options.log_file = log_file;
        self.options.hk_period = hk_period;

        Ok(())
    }

    /// Removes any stale log file, asks the event service to write a fresh one and starts
    /// waiting for it.
    pub fn start(&mut self) -> Result<(), PlaybackError> {
        let path = self.options.log_file.clone();

        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(err = ?e, file = %path.display(), "Could not remove old event log"),
        }

        if let Err(e) = self.evs.request_log_write(&path) {
            error!(err = ?e, file = %path.display(), "Failed to command event log write");
            return Err(e.into());
        }

        self.started_at = Instant::now();
        self.state = PlaybackState::Loading;
        self.cycle_count = 0;
        self.attempts = 0;

        info!(file = %path.display(), hk_period = self.options.hk_period, "Commanded event log write");
        Ok(())
    }

    /// Stops playback. Stopping a disabled session does nothing.
    pub fn stop(&mut self) {
        if self.state != PlaybackState::Disabled {
            info!("Event playback stopped");
        }

        self.state = PlaybackState::Disabled;
        self.cycle_count = 0;
    }

    /// Runs one housekeeping cycle. Returns a batch when one is due.
    ///
    /// While loading, a failed attempt is retried on the next cycle; the third consecutive
    /// failure disables playback and is the only one returned as an error.
    pub fn execute(&mut self) -> Result<Option<PlaybackBatch>, PlaybackError> {
        match self.state {
            PlaybackState::Disabled => Ok(None),
            PlaybackState::Loading => self.try_load(),
            PlaybackState::Playing => {
                self.cycle_count = self.cycle_count.saturating_add(1);
                if self.cycle_count < self.options.hk_period {
                    return Ok(None);
                }

                self.cycle_count = 0;
                let filename = self.options.log_file.display().to_string();
                Ok(Some(self.buffer.next_batch(&filename)))
            }
        }
    }

    fn try_load(&mut self) -> Result<Option<PlaybackBatch>, PlaybackError> {
        let path = &self.options.log_file;

        match EventLogBuffer::load(path, self.options.capacity, self.options.time_format) {
            Ok(buffer) => {
                info!(events = buffer.count(), file = %path.display(), "Loaded event messages");
                self.buffer = buffer;
                self.state = PlaybackState::Playing;
                self.cycle_count = 0;
                Ok(None)
            }
            Err(e) => {
                self.attempts += 1;

                if self.attempts < MAX_LOAD_ATTEMPTS {
                    warn!(err = %e, attempt = self.attempts, file = %path.display(), "Event log not loaded, retrying");
                    return Ok(None);
                }

                let err = PlaybackError::LoadAbandoned {
                    path: path.clone(),
                    attempts: self.attempts,
                    elapsed: self.started_at.elapsed(),
                };
                error!(err = %err, "Event playback disabled");
                self.state = PlaybackState::Disabled;

                Err(err)
            }
        }
    }
}
