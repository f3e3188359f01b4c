//! Fixed-capacity inbound buffer that yields complete lines (§4.1).

use crate::error::ClientError;

pub const CAPACITY: usize = 4096;

pub struct InBuffer {
    buf: Box<[u8; CAPACITY]>,
    length: usize,
    pos: usize,
}

impl InBuffer {
    pub fn new() -> Self {
        InBuffer {
            buf: Box::new([0u8; CAPACITY]),
            length: 0,
            pos: 0,
        }
    }

    /// Spare capacity a `try_read` may fill.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.length..]
    }

    /// Records that `n` freshly-read bytes now occupy the spare tail.
    pub fn commit(&mut self, n: usize) {
        debug_assert!(self.length + n <= CAPACITY);
        self.length += n;
    }

    /// Pops one complete line (CRLF or LF terminated, terminator stripped),
    /// advancing past it. Call repeatedly until it returns `None` to drain
    /// every line currently buffered.
    pub fn take_line(&mut self) -> Option<Vec<u8>> {
        let window = &self.buf[self.pos..self.length];
        let nl = window.iter().position(|&b| b == b'\n')?;
        let mut end = nl;
        if end > 0 && window[end - 1] == b'\r' {
            end -= 1;
        }
        let line = window[..end].to_vec();
        self.pos += nl + 1;
        Some(line)
    }

    /// After every complete line has been drained via `take_line`, either
    /// detects a line-too-long overflow (full buffer, no newline ever found)
    /// or compacts the unconsumed tail to offset 0.
    pub fn after_scan(&mut self) -> Result<(), ClientError> {
        if self.pos == 0 && self.length == CAPACITY {
            return Err(ClientError::LineTooLong);
        }
        if self.pos > 0 {
            self.buf.copy_within(self.pos..self.length, 0);
            self.length -= self.pos;
            self.pos = 0;
        }
        Ok(())
    }
}

impl Default for InBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(buf: &mut InBuffer, data: &[u8]) {
        let spare = buf.spare_mut();
        spare[..data.len()].copy_from_slice(data);
        buf.commit(data.len());
    }

    #[test]
    fn yields_complete_lines_and_strips_cr() {
        let mut buf = InBuffer::new();
        feed(&mut buf, b"ping\r\nstatus\n");
        assert_eq!(buf.take_line(), Some(b"ping".to_vec()));
        assert_eq!(buf.take_line(), Some(b"status".to_vec()));
        assert_eq!(buf.take_line(), None);
        buf.after_scan().unwrap();
    }

    #[test]
    fn partial_line_is_retained_across_reads() {
        let mut buf = InBuffer::new();
        feed(&mut buf, b"pi");
        assert_eq!(buf.take_line(), None);
        buf.after_scan().unwrap();
        feed(&mut buf, b"ng\n");
        assert_eq!(buf.take_line(), Some(b"ping".to_vec()));
    }

    #[test]
    fn exact_capacity_line_with_trailing_newline_parses() {
        let mut buf = InBuffer::new();
        let mut data = vec![b'a'; CAPACITY - 1];
        data.push(b'\n');
        feed(&mut buf, &data);
        let line = buf.take_line().unwrap();
        assert_eq!(line.len(), CAPACITY - 1);
        buf.after_scan().unwrap();
    }

    #[test]
    fn full_buffer_without_newline_overflows() {
        let mut buf = InBuffer::new();
        let data = vec![b'a'; CAPACITY];
        feed(&mut buf, &data);
        assert_eq!(buf.take_line(), None);
        assert_eq!(buf.after_scan(), Err(ClientError::LineTooLong));
    }
}
