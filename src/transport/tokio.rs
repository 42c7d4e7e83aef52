use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::error::{Error, Result};
use crate::transport::{AsyncTransport, TransportFuture};

/// Maximum UDP payload we accept.
const DEFAULT_MAX_PACKET_SIZE: usize = 1024;

/// Tokio UDP transport, one connected socket per session.
pub(crate) struct UdpTransport {
    socket: UdpSocket,
    max_packet_size: usize,
}

impl UdpTransport {
    /// Bind an ephemeral local port and connect it to the BMC.
    pub(crate) async fn connect(target: SocketAddr) -> Result<Self> {
        let bind_addr = match target {
            SocketAddr::V4(_) => "0.0.0.0:0",
            SocketAddr::V6(_) => "[::]:0",
        };

        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(target).await?;

        Ok(Self {
            socket,
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
        })
    }

    async fn send_impl(&self, datagram: &[u8]) -> Result<()> {
        let sent = self.socket.send(datagram).await?;
        if sent != datagram.len() {
            return Err(Error::Protocol("short UDP send"));
        }
        Ok(())
    }

    async fn recv_impl(&self, timeout: Duration) -> Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; self.max_packet_size];
        match tokio::time::timeout(timeout, self.socket.recv(&mut buf)).await {
            Ok(Ok(n)) => {
                buf.truncate(n);
                Ok(Some(buf))
            }
            Ok(Err(e)) => Err(Error::Io(e)),
            Err(_elapsed) => Ok(None),
        }
    }
}

impl AsyncTransport for UdpTransport {
    fn send<'a>(&'a self, datagram: &'a [u8]) -> TransportFuture<'a, ()> {
        Box::pin(async move { self.send_impl(datagram).await })
    }

    fn recv(&self, timeout: Duration) -> TransportFuture<'_, Option<Vec<u8>>> {
        Box::pin(async move { self.recv_impl(timeout).await })
    }
}
