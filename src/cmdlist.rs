//! Command-list accumulator (§4.2, §4.6): collects queued command strings
//! between `command_list_begin`/`command_list_ok_begin` and
//! `command_list_end`, size-capped.
//!
//! The original prepends each new entry onto a singly-linked list (O(1))
//! and reverses once at list-end to restore FIFO order, because appending
//! to a `GSList` tail is O(n). A `Vec::push` is already O(1) amortized, so
//! that dance buys nothing here; the observable contract that matters is
//! just that commands execute in the order the client sent them, which
//! `Vec::push` + in-order iteration gives for free.

use crate::error::ClientError;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ListMode {
    /// `command_list_begin`: no per-item `OK`.
    Silent,
    /// `command_list_ok_begin`: emits `list_OK` between entries.
    Verbose,
}

#[derive(Default)]
pub struct CmdListAccumulator {
    mode: Option<ListMode>,
    entries: Vec<Vec<u8>>,
    size: usize,
}

impl CmdListAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mode(&self) -> Option<ListMode> {
        self.mode
    }

    pub fn begin(&mut self, mode: ListMode) {
        self.mode = Some(mode);
        self.entries.clear();
        self.size = 0;
    }

    /// Appends one queued command line, charging its bytes plus a
    /// per-entry terminator against `cmd_list_size`. Errors (without
    /// mutating further state) once the cap is exceeded; the caller closes
    /// the client.
    pub fn push(&mut self, line: &[u8], max_command_list_size: usize) -> Result<(), ClientError> {
        self.size += line.len() + 1;
        self.entries.push(line.to_vec());
        if self.size > max_command_list_size {
            return Err(ClientError::CommandListOverflow);
        }
        Ok(())
    }

    /// Ends list mode, handing back the mode and the accumulated entries in
    /// the order they were sent.
    pub fn take(&mut self) -> (ListMode, Vec<Vec<u8>>) {
        let mode = self.mode.take().expect("take() called outside list mode");
        self.size = 0;
        (mode, std::mem::take(&mut self.entries))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_in_order() {
        let mut acc = CmdListAccumulator::new();
        acc.begin(ListMode::Silent);
        acc.push(b"ping", 1_000_000).unwrap();
        acc.push(b"status", 1_000_000).unwrap();
        let (mode, entries) = acc.take();
        assert_eq!(mode, ListMode::Silent);
        assert_eq!(entries, vec![b"ping".to_vec(), b"status".to_vec()]);
    }

    #[test]
    fn cap_exceeded_errors() {
        let mut acc = CmdListAccumulator::new();
        acc.begin(ListMode::Verbose);
        assert!(acc.push(b"ping", 4).is_err());
    }

    #[test]
    fn cap_exactly_met_is_accepted() {
        let mut acc = CmdListAccumulator::new();
        acc.begin(ListMode::Silent);
        // "ping" (4 bytes) + 1 terminator byte == 5, cap == 5.
        assert!(acc.push(b"ping", 5).is_ok());
    }
}
