use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use tlm_wire::{Packet, StreamId};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{debug, trace, warn};

use super::{status, BusError, Pipe, Publisher};
use crate::table::Qos;

/// Default number of packets a pipe can hold.
pub const DEFAULT_PIPE_DEPTH: usize = 256;

#[derive(Debug)]
struct Subscription {
    pipe: usize,
    buf_limit: u16,
}

#[derive(Debug)]
struct PipeSlot {
    name: String,
    tx: mpsc::Sender<(StreamId, Bytes)>,
    /// Packets currently queued per stream.
    queued: FxHashMap<StreamId, u16>,
}

#[derive(Debug, Default)]
struct BusState {
    pipes: FxHashMap<usize, PipeSlot>,
    subscriptions: FxHashMap<StreamId, Vec<Subscription>>,
    /// Streams whose subscriptions are refused.
    refused: FxHashSet<StreamId>,
    next_pipe: usize,
    dropped: u64,
}

/// An in-process software bus. Clones share the same bus.
#[derive(Debug, Clone, Default)]
pub struct LocalBus {
    state: Arc<Mutex<BusState>>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new pipe that can hold up to `depth` packets.
    pub fn pipe(&self, name: &str, depth: usize) -> LocalPipe {
        let (tx, rx) = mpsc::channel(depth.max(1));
        let mut state = self.state.lock();

        let id = state.next_pipe;
        state.next_pipe += 1;
        state
            .pipes
            .insert(id, PipeSlot { name: name.to_owned(), tx, queued: FxHashMap::default() });

        debug!(pipe = name, depth, "Created pipe");

        LocalPipe { id, rx, bus: self.clone() }
    }

    /// Makes subscriptions to `stream_id` fail (or succeed again).
    pub fn refuse_subscriptions(&self, stream_id: StreamId, refuse: bool) {
        let mut state = self.state.lock();
        if refuse {
            state.refused.insert(stream_id);
        } else {
            state.refused.remove(&stream_id);
        }
    }

    /// Returns true if any pipe is subscribed to `stream_id`.
    pub fn is_subscribed(&self, stream_id: StreamId) -> bool {
        self.state.lock().subscriptions.get(&stream_id).is_some_and(|subs| !subs.is_empty())
    }

    /// Total number of packets dropped because a pipe or stream limit was reached.
    pub fn dropped(&self) -> u64 {
        self.state.lock().dropped
    }
}

impl Publisher for LocalBus {
    fn publish(&self, packet: Bytes) -> Result<(), BusError> {
        let stream_id = Packet::parse(&packet)
            .map_err(|_| BusError::Status(status::BAD_ARGUMENT))?
            .stream_id();

        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(subs) = state.subscriptions.get(&stream_id) else {
            trace!(%stream_id, "No subscribers");
            return Ok(());
        };

        for sub in subs {
            let Some(pipe) = state.pipes.get_mut(&sub.pipe) else { continue };

            let queued = pipe.queued.entry(stream_id).or_default();
            if *queued >= sub.buf_limit {
                trace!(%stream_id, pipe = %pipe.name, "Stream limit reached, dropping packet");
                state.dropped += 1;
                continue;
            }

            match pipe.tx.try_send((stream_id, packet.clone())) {
                Ok(()) => *queued += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(%stream_id, pipe = %pipe.name, "Pipe full, dropping packet");
                    state.dropped += 1;
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        Ok(())
    }
}

/// The receiving end of a [`LocalBus`] pipe.
#[derive(Debug)]
pub struct LocalPipe {
    id: usize,
    rx: mpsc::Receiver<(StreamId, Bytes)>,
    bus: LocalBus,
}

impl Pipe for LocalPipe {
    fn subscribe(
        &mut self,
        stream_id: StreamId,
        _qos: Qos,
        buf_limit: u16,
    ) -> Result<(), BusError> {
        let mut state = self.bus.state.lock();
        if state.refused.contains(&stream_id) {
            return Err(BusError::Status(status::INTERNAL_ERR));
        }
        if buf_limit == 0 {
            return Err(BusError::Status(status::MAX_MSGS_MET));
        }

        let subs = state.subscriptions.entry(stream_id).or_default();
        match subs.iter_mut().find(|s| s.pipe == self.id) {
            Some(sub) => {
                debug!(%stream_id, "Duplicate subscription, updating buffer limit");
                sub.buf_limit = buf_limit;
            }
            None => subs.push(Subscription { pipe: self.id, buf_limit }),
        }

        Ok(())
    }

    fn unsubscribe(&mut self, stream_id: StreamId) -> Result<(), BusError> {
        let mut state = self.bus.state.lock();
        if let Some(subs) = state.subscriptions.get_mut(&stream_id) {
            subs.retain(|s| s.pipe != self.id);
            if subs.is_empty() {
                state.subscriptions.remove(&stream_id);
            }
        } else {
            debug!(%stream_id, "Not subscribed");
        }

        Ok(())
    }

    fn try_recv(&mut self) -> Result<Option<Bytes>, BusError> {
        match self.rx.try_recv() {
            Ok((stream_id, packet)) => {
                let mut state = self.bus.state.lock();
                if let Some(queued) =
                    state.pipes.get_mut(&self.id).and_then(|p| p.queued.get_mut(&stream_id))
                {
                    *queued = queued.saturating_sub(1);
                }

                Ok(Some(packet))
            }
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(BusError::Closed),
        }
    }
}

impl Drop for LocalPipe {
    fn drop(&mut self) {
        let mut state = self.bus.state.lock();
        state.pipes.remove(&self.id);
        for subs in state.subscriptions.values_mut() {
            subs.retain(|s| s.pipe != self.id);
        }
    }
}
