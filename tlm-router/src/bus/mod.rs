//! The boundary to the software bus the router reads packets from.

use std::path::Path;

use bytes::Bytes;
use thiserror::Error;
use tlm_wire::StreamId;

use crate::table::Qos;

mod evs;
pub use evs::*;

mod local;
pub use local::*;

/// Status codes reported by [`LocalBus`].
pub mod status {
    /// A packet or argument was malformed.
    pub const BAD_ARGUMENT: i32 = -2;
    /// The subscription was refused.
    pub const MAX_MSGS_MET: i32 = -7;
    /// A subscription failure was injected.
    pub const INTERNAL_ERR: i32 = -20;
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("Bus status {0}")]
    Status(i32),
    #[error("Pipe closed")]
    Closed,
}

/// An input pipe with per-stream subscriptions.
pub trait Pipe {
    /// Subscribes to `stream_id`, allowing at most `buf_limit` of its packets to be queued
    /// on this pipe at once.
    fn subscribe(&mut self, stream_id: StreamId, qos: Qos, buf_limit: u16)
        -> Result<(), BusError>;

    fn unsubscribe(&mut self, stream_id: StreamId) -> Result<(), BusError>;

    /// Receives the next queued packet without blocking. `Ok(None)` means the pipe is
    /// empty.
    fn try_recv(&mut self) -> Result<Option<Bytes>, BusError>;

    /// Discards every queued packet. Returns how many were dropped.
    fn flush(&mut self) -> usize {
        let mut dropped = 0;
        while let Ok(Some(_)) = self.try_recv() {
            dropped += 1;
        }
        dropped
    }
}

/// Sends packets onto the bus.
pub trait Publisher {
    fn publish(&self, packet: Bytes) -> Result<(), BusError>;
}

/// The external event service, as far as event log playback needs it.
pub trait EventLogService {
    /// Asks the service to write its local event log to `path`. The file appears
    /// asynchronously, if at all.
    fn request_log_write(&mut self, path: &Path) -> Result<(), BusError>;
}
