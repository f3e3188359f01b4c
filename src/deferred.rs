//! Per-client FIFO of byte chunks that could not be written immediately
//! (§4.3). Size-accounted with a fixed per-chunk overhead so a flood of tiny
//! chunks can't evade `max_output_buffer_size`.

use std::collections::VecDeque;
use std::io;

use bytes::{Buf, Bytes};

use crate::io::ClientIo;

/// Fixed bookkeeping cost charged against `max_output_buffer_size` for every
/// queued chunk, mirroring the original's co-allocated `deferred_buffer`
/// header (`sizeof(size_t)` plus allocator/queue-node overhead).
pub const CHUNK_OVERHEAD: usize = 16;

struct Chunk(Bytes);

pub struct DeferredQueue {
    chunks: VecDeque<Chunk>,
    bytes: usize,
}

impl DeferredQueue {
    pub fn new() -> Self {
        DeferredQueue {
            chunks: VecDeque::new(),
            bytes: 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn accounted_bytes(&self) -> usize {
        self.bytes
    }

    /// Appends a chunk, charging `CHUNK_OVERHEAD + payload.len()` against
    /// the accounted total. Returns `true` if the client is now over
    /// `max_output_buffer_size` and must be expired.
    #[must_use]
    pub fn push(&mut self, payload: Bytes, max_output_buffer_size: usize) -> bool {
        if payload.is_empty() {
            return self.bytes > max_output_buffer_size;
        }
        self.bytes += CHUNK_OVERHEAD + payload.len();
        self.chunks.push_back(Chunk(payload));
        self.bytes > max_output_buffer_size
    }

    /// Drains as much as the socket will currently accept. Writes the head
    /// chunk in full where possible; on a partial write, advances past the
    /// written prefix and stops. Stops without error on would-block /
    /// interrupted. Propagates any other error so the caller can expire the
    /// client.
    pub fn drain(&mut self, io: &dyn ClientIo) -> io::Result<()> {
        while let Some(chunk) = self.chunks.front_mut() {
            let remaining = chunk.0.as_ref();
            debug_assert!(!remaining.is_empty());
            match io.try_write(remaining) {
                Ok(n) if n == remaining.len() => {
                    self.bytes -= CHUNK_OVERHEAD + n;
                    self.chunks.pop_front();
                },
                Ok(0) => break,
                Ok(n) => {
                    chunk.0.advance(n);
                    self.bytes -= n;
                    break;
                },
                Err(e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    break
                },
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

impl Default for DeferredQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    struct ScriptedIo(RefCell<Vec<io::Result<usize>>>, RefCell<Vec<u8>>);

    impl ScriptedIo {
        fn new(script: Vec<io::Result<usize>>) -> Self {
            ScriptedIo(RefCell::new(script), RefCell::new(Vec::new()))
        }
    }

    impl ClientIo for ScriptedIo {
        fn try_read(&self, _buf: &mut [u8]) -> io::Result<usize> {
            Ok(0)
        }

        fn try_write(&self, buf: &[u8]) -> io::Result<usize> {
            let step = self.0.borrow_mut().remove(0);
            if let Ok(n) = step {
                self.1.borrow_mut().extend_from_slice(&buf[..n]);
            }
            step
        }
    }

    #[test]
    fn accounts_overhead_plus_payload() {
        let mut q = DeferredQueue::new();
        assert!(!q.push(Bytes::from_static(b"hello"), 1_000_000));
        assert_eq!(q.accounted_bytes(), CHUNK_OVERHEAD + 5);
    }

    #[test]
    fn over_budget_push_reports_overflow() {
        let mut q = DeferredQueue::new();
        assert!(q.push(Bytes::from_static(b"hello"), 4));
    }

    #[test]
    fn full_drain_credits_full_chunk() {
        let mut q = DeferredQueue::new();
        q.push(Bytes::from_static(b"hello"), 1_000_000);
        let io = ScriptedIo::new(vec![Ok(5)]);
        q.drain(&io).unwrap();
        assert!(q.is_empty());
        assert_eq!(q.accounted_bytes(), 0);
    }

    #[test]
    fn partial_write_shrinks_chunk_in_place() {
        let mut q = DeferredQueue::new();
        q.push(Bytes::from_static(b"hello"), 1_000_000);
        let io = ScriptedIo::new(vec![Ok(2), Ok(3)]);
        q.drain(&io).unwrap(); // writes 2 of 5, shrinks chunk in place, stops
        assert!(!q.is_empty());
        assert_eq!(q.accounted_bytes(), CHUNK_OVERHEAD + 3);
        q.drain(&io).unwrap(); // writes remaining 3, dequeues the chunk
        assert!(q.is_empty());
        assert_eq!(q.accounted_bytes(), 0);
        assert_eq!(io.1.borrow().as_slice(), b"hello");
    }

    #[test]
    fn would_block_stops_without_error() {
        let mut q = DeferredQueue::new();
        q.push(Bytes::from_static(b"hello"), 1_000_000);
        let io = ScriptedIo::new(vec![Err(io::Error::from(io::ErrorKind::WouldBlock))]);
        q.drain(&io).unwrap();
        assert!(!q.is_empty());
        assert_eq!(q.accounted_bytes(), CHUNK_OVERHEAD + 5);
    }

    #[test]
    fn hard_error_propagates() {
        let mut q = DeferredQueue::new();
        q.push(Bytes::from_static(b"hello"), 1_000_000);
        let io = ScriptedIo::new(vec![Err(io::Error::from(io::ErrorKind::BrokenPipe))]);
        assert!(q.drain(&io).is_err());
    }
}
