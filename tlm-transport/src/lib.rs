use std::{io, net::SocketAddr};

use thiserror::Error;

mod mem;
pub use mem::*;

mod udp;
pub use udp::*;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0:?}")]
    Io(#[from] io::Error),
    #[error("Partial send: {sent} of {len} bytes")]
    Partial { sent: usize, len: usize },
}

/// A factory for connectionless datagram sockets.
pub trait Transport {
    type Socket: DatagramSocket;

    /// Opens a new socket. Sockets are never connected; every send names its destination.
    fn open(&self) -> Result<Self::Socket, TransportError>;
}

/// A non-blocking datagram socket.
pub trait DatagramSocket {
    /// Sends a single datagram to `addr` without blocking. Either the whole buffer goes
    /// out or an error is returned.
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, TransportError>;

    fn local_addr(&self) -> Result<SocketAddr, TransportError>;
}
