use std::{
    io,
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
};

use bytes::Bytes;
use parking_lot::Mutex;

use crate::{DatagramSocket, Transport, TransportError};

/// A datagram captured by the [`Memory`] transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Datagram {
    /// Id of the socket that sent it, in open order.
    pub socket: usize,
    pub dest: SocketAddr,
    pub payload: Bytes,
}

#[derive(Debug, Default)]
struct State {
    sent: Vec<Datagram>,
    opened: usize,
    fail_open: bool,
    fail_send: bool,
}

/// In-process transport that records every datagram instead of sending it. Clones share
/// the same capture, so a test can keep a handle while the router owns another.
#[derive(Debug, Clone, Default)]
pub struct Memory {
    state: Arc<Mutex<State>>,
}

impl Memory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent opens fail.
    pub fn fail_opens(&self, fail: bool) {
        self.state.lock().fail_open = fail;
    }

    /// Makes subsequent sends on any socket fail.
    pub fn fail_sends(&self, fail: bool) {
        self.state.lock().fail_send = fail;
    }

    /// Number of sockets opened so far.
    pub fn open_count(&self) -> usize {
        self.state.lock().opened
    }

    pub fn sent(&self) -> Vec<Datagram> {
        self.state.lock().sent.clone()
    }

    /// Drains the captured datagrams.
    pub fn take_sent(&self) -> Vec<Datagram> {
        std::mem::take(&mut self.state.lock().sent)
    }
}

impl Transport for Memory {
    type Socket = MemorySocket;

    fn open(&self) -> Result<Self::Socket, TransportError> {
        let mut state = self.state.lock();
        if state.fail_open {
            return Err(io::Error::new(io::ErrorKind::AddrNotAvailable, "open failure").into());
        }

        state.opened += 1;
        Ok(MemorySocket { id: state.opened, state: Arc::clone(&self.state) })
    }
}

#[derive(Debug)]
pub struct MemorySocket {
    id: usize,
    state: Arc<Mutex<State>>,
}

impl DatagramSocket for MemorySocket {
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, TransportError> {
        let mut state = self.state.lock();
        if state.fail_send {
            return Err(io::Error::new(io::ErrorKind::ConnectionRefused, "send failure").into());
        }

        state.sent.push(Datagram {
            socket: self.id,
            dest: addr,
            payload: Bytes::copy_from_slice(buf),
        });

        Ok(buf.len())
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(SocketAddr::from((Ipv4Addr::LOCALHOST, 40_000 + self.id as u16)))
    }
}
