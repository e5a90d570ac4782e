//! UDP socket setup
//!
//! The link uses two sockets: an unbound-port outbound socket that sends to
//! the peer, and an inbound socket bound to the local port. Both are IPv4.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use bytes::Bytes;
use socket2::{Domain, Protocol, Socket, Type};

use crate::error::NetworkError;

/// Resolve the peer to its first IPv4 address
pub fn resolve_remote(host: &str, port: u16) -> Result<SocketAddr, NetworkError> {
    let addr = format!("{}:{}", host, port);
    let mut candidates = (host, port)
        .to_socket_addrs()
        .map_err(|e| NetworkError::Resolve {
            addr: addr.clone(),
            reason: e.to_string(),
        })?;

    candidates
        .find(SocketAddr::is_ipv4)
        .ok_or_else(|| NetworkError::Resolve {
            addr,
            reason: "no IPv4 address".to_string(),
        })
}

/// Socket the receive loop reads from
pub struct InboundSocket {
    socket: UdpSocket,
}

/// Bind the local port with address reuse
///
/// Receives wait at most `poll` for a datagram, so the receive loop checks
/// its stop signal at least that often without spinning.
pub fn bind_inbound(port: u16, poll: Duration) -> Result<InboundSocket, NetworkError> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
        .map_err(NetworkError::Socket)?;
    socket
        .set_reuse_address(true)
        .map_err(NetworkError::Socket)?;

    let addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, port);
    socket
        .bind(&addr.into())
        .map_err(|source| NetworkError::BindFailed { port, source })?;

    let socket: UdpSocket = socket.into();
    socket
        .set_read_timeout(Some(poll))
        .map_err(NetworkError::Socket)?;

    Ok(InboundSocket { socket })
}

impl InboundSocket {
    /// Receive one datagram, or `None` if none arrived within the poll window
    pub fn recv(&self, buf: &mut [u8]) -> Result<Option<(usize, SocketAddr)>, NetworkError> {
        match self.socket.recv_from(buf) {
            Ok((len, from)) => Ok(Some((len, from))),
            Err(e) if is_transient(&e) => Ok(None),
            Err(e) => Err(NetworkError::ReceiveFailed(e)),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr, NetworkError> {
        self.socket.local_addr().map_err(NetworkError::Socket)
    }
}

/// Socket the capture thread sends from
pub struct OutboundSocket {
    socket: UdpSocket,
    remote: SocketAddr,
}

/// Open a non-blocking socket that sends to `remote`
pub fn bind_outbound(remote: SocketAddr) -> Result<OutboundSocket, NetworkError> {
    let socket = UdpSocket::bind(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0))
        .map_err(NetworkError::Socket)?;
    socket.set_nonblocking(true).map_err(NetworkError::Socket)?;
    Ok(OutboundSocket { socket, remote })
}

impl OutboundSocket {
    /// Send one datagram to the peer
    pub fn send(&self, datagram: &Bytes) -> Result<usize, NetworkError> {
        self.socket
            .send_to(datagram, self.remote)
            .map_err(NetworkError::SendFailed)
    }

    pub fn remote(&self) -> SocketAddr {
        self.remote
    }
}

/// Errors that only mean "nothing to read right now"
fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::Interrupted
            // ICMP port-unreachable from an earlier send, reported by some hosts
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_localhost() {
        let addr = resolve_remote("127.0.0.1", 4000).unwrap();
        assert_eq!(addr, "127.0.0.1:4000".parse().unwrap());
    }

    #[test]
    fn test_resolve_failure() {
        assert!(matches!(
            resolve_remote("no such host.invalid", 4000),
            Err(NetworkError::Resolve { .. })
        ));
    }

    #[test]
    fn test_send_and_receive() {
        let inbound = bind_inbound(0, Duration::from_millis(200)).unwrap();
        let port = inbound.local_addr().unwrap().port();
        let outbound = bind_outbound(resolve_remote("127.0.0.1", port).unwrap()).unwrap();

        outbound.send(&Bytes::from_static(b"hello")).unwrap();

        let mut buf = [0u8; 64];
        let mut received = None;
        for _ in 0..10 {
            if let Some((len, _)) = inbound.recv(&mut buf).unwrap() {
                received = Some(buf[..len].to_vec());
                break;
            }
        }
        assert_eq!(received.as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_recv_times_out_quietly() {
        let inbound = bind_inbound(0, Duration::from_millis(10)).unwrap();
        let mut buf = [0u8; 16];
        assert!(inbound.recv(&mut buf).unwrap().is_none());
    }
}
