use std::io;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::time::{Instant, timeout_at};
use tracing::trace;

use crate::codec::Envelope;

/// Large enough for any status report a unit sends.
pub(crate) const MAX_DATAGRAM: usize = 4096;

/// Unbound-port UDP socket that may send to broadcast addresses.
pub(crate) fn broadcast_socket() -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_broadcast(true)?;
    socket.set_reuse_address(true)?;
    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0));
    socket.bind(&addr.into())?;
    socket.set_nonblocking(true)?;
    UdpSocket::from_std(socket.into())
}

/// Connected datagram channel to one unit. Only datagrams from the peer are seen.
pub(crate) struct Channel {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl Channel {
    pub async fn connect(peer: SocketAddr) -> io::Result<Self> {
        let local = match peer {
            SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
            SocketAddr::V6(_) => SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0)),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(peer).await?;
        Ok(Self { socket, peer })
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Drops datagrams already queued, e.g. a late answer to a timed-out request.
    pub fn drain(&self) {
        let mut buf = [0u8; MAX_DATAGRAM];
        while let Ok(len) = self.socket.try_recv(&mut buf) {
            trace!(peer = %self.peer, len, "discarding stale datagram");
        }
    }

    pub async fn send(&self, envelope: &Envelope) -> io::Result<()> {
        self.socket.send(&envelope.to_vec()).await?;
        Ok(())
    }

    /// Next non-empty datagram, or `None` once `deadline` passes.
    pub async fn recv_until(&self, deadline: Instant) -> io::Result<Option<Vec<u8>>> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            match timeout_at(deadline, self.socket.recv(&mut buf)).await {
                Err(_) => return Ok(None),
                Ok(Err(e)) => return Err(e),
                Ok(Ok(0)) => continue,
                Ok(Ok(len)) => {
                    buf.truncate(len);
                    return Ok(Some(buf));
                }
            }
        }
    }
}
