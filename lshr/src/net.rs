//! UDP socket setup for broadcast.

use std::net::{Ipv4Addr, SocketAddr};

use tokio::net::UdpSocket;

/// Limited broadcast address for `port`.
pub fn broadcast_addr(port: u16) -> SocketAddr {
    SocketAddr::from((Ipv4Addr::BROADCAST, port))
}

/// Bind on all interfaces with SO_BROADCAST set. Port 0 picks an ephemeral port.
pub fn bind_broadcast(port: u16) -> std::io::Result<UdpSocket> {
    let std_sock = std::net::UdpSocket::bind((Ipv4Addr::UNSPECIFIED, port))?;
    std_sock.set_broadcast(true)?;
    std_sock.set_nonblocking(true)?;
    UdpSocket::from_std(std_sock)
}
