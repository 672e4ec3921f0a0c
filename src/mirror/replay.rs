//! UDP socket that carries captured frames back to the controller.

use std::io;
use std::net::SocketAddr;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::error;

use crate::error::AgentError;

/// Connected, non-blocking UDP socket.
pub struct ReplaySocket {
    socket: Socket,
    peer: SocketAddr,
}

impl ReplaySocket {
    /// Bind to `local` and connect to `peer`.
    ///
    /// Any failure here means the replay path is unavailable.
    pub fn connect(local: SocketAddr, peer: SocketAddr) -> Result<Self, AgentError> {
        let unavailable = |what: &str, e: io::Error| {
            error!("{}: {}", what, e);
            AgentError::Unavailable(e)
        };

        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| unavailable("socket", e))?;
        socket
            .bind(&local.into())
            .map_err(|e| unavailable("bind", e))?;
        socket
            .connect(&peer.into())
            .map_err(|e| unavailable("connect", e))?;
        socket
            .set_nonblocking(true)
            .map_err(|e| unavailable("fcntl[F_SETFL]", e))?;

        Ok(Self { socket, peer })
    }

    /// Address datagrams are sent to.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Local address the socket ended up bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket
            .local_addr()?
            .as_socket()
            .ok_or_else(|| io::Error::from(io::ErrorKind::AddrNotAvailable))
    }

    /// Send one datagram without blocking.
    pub fn send(&self, frame: &[u8]) -> io::Result<usize> {
        self.socket.send_with_flags(frame, libc::MSG_DONTWAIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, UdpSocket};

    #[test]
    fn sends_to_connected_peer() {
        let receiver = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let peer = receiver.local_addr().unwrap();

        let replay = ReplaySocket::connect((Ipv4Addr::LOCALHOST, 0).into(), peer).unwrap();
        assert_eq!(replay.peer(), peer);
        assert_ne!(replay.local_addr().unwrap().port(), 0);

        assert_eq!(replay.send(b"frame").unwrap(), 5);
        let mut buf = [0u8; 16];
        let (len, from) = receiver.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"frame");
        assert_eq!(from, replay.local_addr().unwrap());
    }

    #[test]
    fn unbindable_address_is_unavailable() {
        // TEST-NET-1, never assigned locally
        let local: SocketAddr = "192.0.2.1:0".parse().unwrap();
        let peer: SocketAddr = "127.0.0.1:9".parse().unwrap();
        let err = ReplaySocket::connect(local, peer).err().unwrap();
        assert_eq!(err.exit_code(), crate::error::exit::UNAVAILABLE);
    }
}
