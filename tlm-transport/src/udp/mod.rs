use std::net::{Ipv4Addr, SocketAddr};

use tracing::debug;

use crate::{DatagramSocket, Transport, TransportError};

#[derive(Debug, Clone)]
pub struct Config {
    /// Local address to bind new sockets to.
    pub bind_addr: SocketAddr,
}

impl Default for Config {
    fn default() -> Self {
        Self { bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)) }
    }
}

/// IPv4 UDP transport. Sockets are non-blocking and need no async runtime, since the
/// router only ever sends from its own cycle.
#[derive(Debug, Default)]
pub struct Udp {
    config: Config,
}

impl Udp {
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Transport for Udp {
    type Socket = UdpSocket;

    fn open(&self) -> Result<Self::Socket, TransportError> {
        let socket = std::net::UdpSocket::bind(self.config.bind_addr)?;
        socket.set_nonblocking(true)?;

        debug!(local_addr = ?socket.local_addr().ok(), "Opened UDP socket");

        Ok(UdpSocket { inner: socket })
    }
}

#[derive(Debug)]
pub struct UdpSocket {
    inner: std::net::UdpSocket,
}

impl UdpSocket {
    /// Returns the underlying socket.
    pub fn inner(&self) -> &std::net::UdpSocket {
        &self.inner
    }
}

impl DatagramSocket for UdpSocket {
    /// Fails with [`std::io::ErrorKind::WouldBlock`] instead of waiting when the send
    /// buffer is full.
    fn send_to(&self, buf: &[u8], addr: SocketAddr) -> Result<usize, TransportError> {
        let sent = self.inner.send_to(buf, addr)?;
        if sent != buf.len() {
            return Err(TransportError::Partial { sent, len: buf.len() });
        }

        Ok(sent)
    }

    fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.inner.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn send_datagram_without_runtime() {
        let _ = tracing_subscriber::fmt::try_init();

        let receiver = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        let dest = receiver.local_addr().unwrap();

        let socket = Udp::new(Config::default()).open().unwrap();
        assert_eq!(socket.send_to(b"telemetry", dest).unwrap(), 9);

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"telemetry");
    }

    #[tokio::test]
    async fn send_datagram_inside_runtime() {
        let _ = tracing_subscriber::fmt::try_init();

        let receiver = tokio::net::UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let dest = receiver.local_addr().unwrap();

        let socket = Udp::default().open().unwrap();
        socket.send_to(b"hk", dest).unwrap();

        let mut buf = [0u8; 64];
        let (n, _) = receiver.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hk");
    }

    #[test]
    fn bind_failure_is_reported() {
        let taken = std::net::UdpSocket::bind("127.0.0.1:0").unwrap();
        let udp = Udp::new(Config { bind_addr: taken.local_addr().unwrap() });

        assert!(matches!(udp.open(), Err(TransportError::Io(_))));
    }
}
