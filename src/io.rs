//! The socket abstraction the per-client core reads and writes through.
//!
//! `ClientIo` is the synchronous, non-blocking surface (`try_read` /
//! `try_write`) that `Client` and `DeferredQueue` operate against, letting
//! the whole per-client state machine run under a plain test double with no
//! tokio runtime involved. `Socket` is the concrete implementation wrapping
//! a real TCP or UNIX stream; the readiness-waiting half (`readable`/
//! `writable`) lives only on `Socket` since that's the one half that
//! genuinely needs the reactor.

use std::io;

use tokio::net::{TcpStream, UnixStream};

pub trait ClientIo {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize>;
    fn try_write(&self, buf: &[u8]) -> io::Result<usize>;
}

/// A connected peer, either over TCP or a local UNIX domain socket.
pub enum Socket {
    Tcp(TcpStream),
    Unix(UnixStream),
}

impl Socket {
    pub async fn readable(&self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.readable().await,
            Socket::Unix(s) => s.readable().await,
        }
    }

    pub async fn writable(&self) -> io::Result<()> {
        match self {
            Socket::Tcp(s) => s.writable().await,
            Socket::Unix(s) => s.writable().await,
        }
    }

    /// Peer process uid via `SO_PEERCRED`, or -1 for TCP (no out-of-band
    /// credential check available there).
    pub fn peer_uid(&self) -> i32 {
        match self {
            Socket::Tcp(_) => -1,
            Socket::Unix(s) => s
                .peer_cred()
                .map(|cred| cred.uid() as i32)
                .unwrap_or(-1),
        }
    }
}

impl ClientIo for Socket {
    fn try_read(&self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.try_read(buf),
            Socket::Unix(s) => s.try_read(buf),
        }
    }

    fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Socket::Tcp(s) => s.try_write(buf),
            Socket::Unix(s) => s.try_write(buf),
        }
    }
}
