//! Peer address formatting for logging (`sockaddr_to_tmp_string` in the
//! original): IPv4 dotted-quad, IPv6 bracketed, or `local connection` for
//! UNIX peers.

use std::fmt;
use std::io;
use std::net::SocketAddr;

use crate::io::Socket;

#[derive(Debug, Clone)]
pub enum PeerAddr {
    V4(std::net::Ipv4Addr),
    V6(std::net::Ipv6Addr),
    Local,
}

impl fmt::Display for PeerAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeerAddr::V4(addr) => write!(f, "{addr}"),
            PeerAddr::V6(addr) => write!(f, "[{addr}]"),
            PeerAddr::Local => f.write_str("local connection"),
        }
    }
}

pub fn peer_addr(socket: &Socket) -> io::Result<PeerAddr> {
    match socket {
        Socket::Tcp(s) => Ok(match s.peer_addr()? {
            SocketAddr::V4(a) => PeerAddr::V4(*a.ip()),
            SocketAddr::V6(a) => PeerAddr::V6(*a.ip()),
        }),
        Socket::Unix(_) => Ok(PeerAddr::Local),
    }
}
