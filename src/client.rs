//! The per-client object and its line-processing state machine (§3, §4.2).
//!
//! `Client` is deliberately free of any tokio dependency: every method takes
//! a `&dyn ClientIo` to do its actual reading/writing, so the whole state
//! machine — line buffering, command-list batching, backpressure, idle
//! subscriptions — is unit-testable against a plain in-memory double. The
//! async half (waiting for socket readiness, timers, the idle broadcast
//! channel) lives in `manager::client_task`, which drives these same
//! methods from inside a `tokio::select!` loop.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;

use crate::cmdlist::{CmdListAccumulator, ListMode};
use crate::command::{CommandHandler, CommandOutcome};
use crate::config::Limits;
use crate::deferred::DeferredQueue;
use crate::idle::{IdleState, IdleWaitOutcome};
use crate::io::ClientIo;
use crate::linebuf::InBuffer;

pub type Permission = u32;

/// Every permission bit set. There is no authentication mechanism in this
/// core (§1 Non-goals: "no authentication beyond a permission bitmask
/// passed in at connection time"); callers that do implement one should
/// compute the real default and pass it to `Client::new`.
pub const ALL_PERMISSIONS: Permission = u32::MAX;

const COMMAND_LIST_BEGIN: &[u8] = b"command_list_begin";
const COMMAND_LIST_OK_BEGIN: &[u8] = b"command_list_ok_begin";
const COMMAND_LIST_END: &[u8] = b"command_list_end";
const NOIDLE: &[u8] = b"noidle";

/// Outcome of reading and processing whatever lines one inbound read
/// yielded; returned up to `manager::client_task`.
#[derive(Debug, Eq, PartialEq)]
pub enum ReadOutcome {
    Continue,
    Close,
    Kill,
}

/// Outcome of processing a single line; internal to `Client`, folded into
/// `ReadOutcome` by the read-path loop.
#[derive(Debug, Eq, PartialEq)]
enum LineOutcome {
    Continue,
    Close,
    Kill,
}

pub struct Client {
    pub num: u64,
    pub uid: i32,
    permission: Permission,
    last_activity: Instant,
    limits: Arc<Limits>,
    expired: bool,

    in_buffer: InBuffer,
    send_buffer: SendBuffer,
    deferred: DeferredQueue,
    cmd_list: CmdListAccumulator,
    idle: IdleState,
}

impl Client {
    pub fn new(num: u64, uid: i32, permission: Permission, limits: Arc<Limits>) -> Self {
        Client {
            num,
            uid,
            permission,
            last_activity: Instant::now(),
            limits,
            expired: false,
            in_buffer: InBuffer::new(),
            send_buffer: SendBuffer::new(),
            deferred: DeferredQueue::new(),
            cmd_list: CmdListAccumulator::new(),
            idle: IdleState::default(),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expired
    }

    fn expire(&mut self) {
        self.expired = true;
    }

    pub fn get_permission(&self) -> Permission {
        self.permission
    }

    pub fn set_permission(&mut self, permission: Permission) {
        self.permission = permission;
    }

    pub fn last_activity(&self) -> Instant {
        self.last_activity
    }

    pub fn is_idle(&self) -> bool {
        self.idle.is_waiting()
    }

    pub fn has_deferred_output(&self) -> bool {
        !self.deferred.is_empty()
    }

    pub fn deferred_bytes(&self) -> usize {
        self.deferred.accounted_bytes()
    }

    // ---- output facades (§4.3) ----------------------------------------

    /// Appends `data` to the coalescing send buffer, flushing through
    /// `flush_output` whenever it fills. No-op on an expired client.
    pub fn write(&mut self, io: &dyn ClientIo, data: &[u8]) {
        if self.expired {
            return;
        }
        let mut data = data;
        while !data.is_empty() {
            let taken = self.send_buffer.extend(data);
            data = &data[taken..];
            if self.send_buffer.is_full() {
                self.flush_output(io);
                if self.expired {
                    return;
                }
            }
        }
    }

    pub fn puts(&mut self, io: &dyn ClientIo, s: &str) {
        self.write(io, s.as_bytes());
    }

    /// Two-pass format-and-length facade: `fmt::format` computes the exact
    /// string up front, the idiomatic equivalent of the original's
    /// `vsnprintf(NULL, 0, ...)` sizing pass.
    pub fn printf(&mut self, io: &dyn ClientIo, args: fmt::Arguments<'_>) {
        let formatted = fmt::format(args);
        self.write(io, formatted.as_bytes());
    }

    /// Drains the send buffer to the deferred queue or socket. Called
    /// whenever the send buffer fills and once more at the end of every
    /// command (including list dispatch and idle notification) to push
    /// whatever remains.
    pub fn flush_output(&mut self, io: &dyn ClientIo) {
        if self.expired || self.send_buffer.used() == 0 {
            return;
        }
        let payload = self.send_buffer.take();

        if !self.deferred.is_empty() {
            if self.deferred.push(payload, self.limits.max_output_buffer_size) {
                self.expire();
                return;
            }
            if self.deferred.drain(io).is_err() {
                self.expire();
            }
            return;
        }

        self.write_direct(io, payload);
    }

    fn write_direct(&mut self, io: &dyn ClientIo, payload: Bytes) {
        // NB: compares the partial-write count against the actual payload
        // length, not against `send_buf_used` as the original's
        // `client_write_direct` does — see §9's Open Question. Comparing
        // against `send_buf_used` is wrong whenever the caller is the
        // deferred-flush path, where that field may be zero or stale.
        match io.try_write(&payload) {
            Ok(n) if n == payload.len() => {},
            Ok(n) => {
                let rest = payload.slice(n..);
                if self.deferred.push(rest, self.limits.max_output_buffer_size) {
                    self.expire();
                }
            },
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                if self.deferred.push(payload, self.limits.max_output_buffer_size) {
                    self.expire();
                }
            },
            Err(_) => self.expire(),
        }
    }

    /// Attempts to drain the deferred queue; expires the client on a hard
    /// write error.
    pub fn drain_deferred(&mut self, io: &dyn ClientIo) {
        if self.expired {
            return;
        }
        if self.deferred.drain(io).is_err() {
            self.expire();
            return;
        }
        self.last_activity = Instant::now();
    }

    // ---- idle subscription protocol (§4.5) -----------------------------

    /// Called from a command handler's `idle` verb. Returns `Delivered` if
    /// already-pending flags overlapped the subscription (notification was
    /// sent synchronously), or `Parked` if the client must now wait for
    /// `manager_idle_add`.
    pub fn idle_wait(&mut self, io: &dyn ClientIo, flags: u32) -> IdleWaitOutcome {
        match self.idle.enter(flags) {
            IdleWaitOutcome::Delivered => {
                self.notify_idle(io);
                IdleWaitOutcome::Delivered
            },
            IdleWaitOutcome::Parked => IdleWaitOutcome::Parked,
        }
    }

    /// Folds newly-announced event flags into the pending mask. Called for
    /// every live client on `manager_idle_add`, parked or not.
    pub fn post_idle(&mut self, flags: u32) {
        self.idle.post(flags);
    }

    pub fn idle_overlap(&self) -> u32 {
        self.idle.overlap()
    }

    /// Emits `changed: <name>\n` for each overlapping bit, then `OK\n`,
    /// clears all pending flags (subscribed or not) and idle-waiting state,
    /// and flushes. Called both from `idle_wait`'s synchronous-delivery path
    /// and from `manager::client_task` on a matching broadcast event.
    pub fn notify_idle(&mut self, io: &dyn ClientIo) {
        let overlap = self.idle.overlap();
        for name in crate::idle::names_for(overlap) {
            self.printf(io, format_args!("changed: {name}\n"));
        }
        self.idle.drain();
        self.puts(io, "OK\n");
        self.flush_output(io);
        self.last_activity = Instant::now();
    }

    // ---- read path (§4.1, §4.2) -----------------------------------------

    /// Performs one non-blocking read and processes every complete line it
    /// yielded. At most one read per call, matching the fairness rule in
    /// §4.4: each client gets one read attempt per event-loop iteration.
    pub fn on_readable(&mut self, io: &dyn ClientIo, handler: &mut dyn CommandHandler) -> ReadOutcome {
        if self.expired {
            return ReadOutcome::Close;
        }

        let n = match io.try_read(self.in_buffer.spare_mut()) {
            Ok(0) => return ReadOutcome::Close,
            Ok(n) => n,
            Err(e)
                if e.kind() == std::io::ErrorKind::WouldBlock
                    || e.kind() == std::io::ErrorKind::Interrupted =>
            {
                return ReadOutcome::Continue
            },
            Err(_) => return ReadOutcome::Close,
        };
        self.in_buffer.commit(n);

        while let Some(line) = self.in_buffer.take_line() {
            match self.process_line(io, handler, &line) {
                LineOutcome::Continue => {},
                LineOutcome::Close => return ReadOutcome::Close,
                LineOutcome::Kill => return ReadOutcome::Kill,
            }
            if self.expired {
                return ReadOutcome::Close;
            }
        }

        if self.in_buffer.after_scan().is_err() {
            tracing::warn!(num = self.num, "buffer overflow");
            return ReadOutcome::Close;
        }

        self.last_activity = Instant::now();
        ReadOutcome::Continue
    }

    fn process_line(&mut self, io: &dyn ClientIo, handler: &mut dyn CommandHandler, raw: &[u8]) -> LineOutcome {
        // "noidle" is intercepted unconditionally, even mid command-list:
        // matches the original's `client_process_line`, where the check
        // precedes both the idle-waiting and list-mode branches.
        if raw == NOIDLE {
            if self.idle.is_waiting() {
                self.idle.exit_noidle();
                self.puts(io, "OK\n");
                self.flush_output(io);
            }
            return LineOutcome::Continue;
        }

        if self.idle.is_waiting() {
            tracing::warn!(num = self.num, error = %crate::error::ClientError::ProtocolViolation, "closing client");
            return LineOutcome::Close;
        }

        if self.cmd_list.mode().is_some() {
            return self.process_list_line(io, handler, raw);
        }

        if raw == COMMAND_LIST_BEGIN {
            self.cmd_list.begin(ListMode::Silent);
            return LineOutcome::Continue;
        }
        if raw == COMMAND_LIST_OK_BEGIN {
            self.cmd_list.begin(ListMode::Verbose);
            return LineOutcome::Continue;
        }

        let Ok(line) = std::str::from_utf8(raw) else {
            tracing::warn!(num = self.num, "non-UTF-8 command line, closing");
            return LineOutcome::Close;
        };

        let outcome = handler.dispatch(self, io, line);
        self.apply_outcome(io, outcome)
    }

    fn process_list_line(&mut self, io: &dyn ClientIo, handler: &mut dyn CommandHandler, raw: &[u8]) -> LineOutcome {
        if raw == COMMAND_LIST_END {
            let (mode, entries) = self.cmd_list.take();
            let outcome = handler.dispatch_list(self, io, mode, &entries);
            return self.apply_outcome(io, outcome);
        }

        if let Err(err) = self.cmd_list.push(raw, self.limits.max_command_list_size) {
            tracing::warn!(num = self.num, %err, "command list size exceeded, closing");
            return LineOutcome::Close;
        }
        LineOutcome::Continue
    }

    fn apply_outcome(&mut self, io: &dyn ClientIo, outcome: CommandOutcome) -> LineOutcome {
        if self.expired {
            return LineOutcome::Close;
        }
        match outcome {
            CommandOutcome::Close => LineOutcome::Close,
            CommandOutcome::Kill => LineOutcome::Kill,
            CommandOutcome::Ok => {
                self.puts(io, "OK\n");
                self.flush_output(io);
                LineOutcome::Continue
            },
            CommandOutcome::OkNoTrailer => {
                self.flush_output(io);
                LineOutcome::Continue
            },
        }
    }
}

/// The 4 KiB coalescing send buffer (§3, §4.3). Batches small `write()`
/// calls from a single command before they hit the deferred queue or
/// socket; purely an optimization, flushed on fill, on command completion,
/// and before idle notification delivery.
struct SendBuffer {
    buf: Box<[u8; crate::linebuf::CAPACITY]>,
    used: usize,
}

impl SendBuffer {
    fn new() -> Self {
        SendBuffer {
            buf: Box::new([0u8; crate::linebuf::CAPACITY]),
            used: 0,
        }
    }

    fn used(&self) -> usize {
        self.used
    }

    fn is_full(&self) -> bool {
        self.used == self.buf.len()
    }

    /// Copies as much of `data` as fits, returning the number of bytes
    /// consumed.
    fn extend(&mut self, data: &[u8]) -> usize {
        let space = self.buf.len() - self.used;
        let n = space.min(data.len());
        self.buf[self.used..self.used + n].copy_from_slice(&data[..n]);
        self.used += n;
        n
    }

    fn take(&mut self) -> Bytes {
        let payload = Bytes::copy_from_slice(&self.buf[..self.used]);
        self.used = 0;
        payload
    }
}
