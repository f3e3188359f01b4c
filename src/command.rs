//! The external "command" collaborator (§1, §6): this core treats command
//! semantics as opaque, but ships a small default implementation so the
//! core is exercisable end-to-end without a real media-player backend.

use crate::client::Client;
use crate::cmdlist::ListMode;
use crate::idle;
use crate::io::ClientIo;

/// Outcome of dispatching one command line.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum CommandOutcome {
    /// Success; the caller appends the trailing `OK\n`.
    Ok,
    /// Success, but the command already emitted its own terminator (or
    /// intentionally emitted nothing yet, as with a parked `idle`) — the
    /// caller must not append `OK\n`.
    OkNoTrailer,
    /// Graceful close.
    Close,
    /// Shutdown signal; bubbles all the way to the event loop.
    Kill,
}

/// The opaque command collaborator invoked by the per-client line
/// processor. Implementations may call back into `Client` (`write`,
/// `puts`, `printf`, `idle_wait`, `get_permission`/`set_permission`) to
/// produce output or change connection state.
pub trait CommandHandler: Send {
    fn dispatch(&mut self, client: &mut Client, io: &dyn ClientIo, line: &str) -> CommandOutcome;

    /// Executes a batched command list in order, honoring the mode's
    /// `list_OK` framing. The default implementation simply replays
    /// `dispatch` over each entry; handlers with atomicity requirements
    /// (e.g. a single transaction across the whole list) may override it.
    fn dispatch_list(
        &mut self,
        client: &mut Client,
        io: &dyn ClientIo,
        mode: ListMode,
        entries: &[Vec<u8>],
    ) -> CommandOutcome {
        for entry in entries {
            let Ok(line) = std::str::from_utf8(entry) else {
                return CommandOutcome::Close;
            };

            match self.dispatch(client, io, line) {
                CommandOutcome::Close => return CommandOutcome::Close,
                CommandOutcome::Kill => return CommandOutcome::Kill,
                CommandOutcome::Ok | CommandOutcome::OkNoTrailer => {},
            }

            if client.is_expired() {
                return CommandOutcome::Close;
            }

            if mode == ListMode::Verbose {
                client.puts(io, "list_OK\n");
            }
        }
        CommandOutcome::Ok
    }
}

/// A minimal default handler: `ping`, `idle [classes...]`, and an
/// `ACK`-shaped error for anything else. Enough to exercise the core
/// end-to-end (§8's literal scenarios) without a real backend.
#[derive(Default)]
pub struct DefaultCommandHandler;

impl CommandHandler for DefaultCommandHandler {
    fn dispatch(&mut self, client: &mut Client, io: &dyn ClientIo, line: &str) -> CommandOutcome {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("ping") => CommandOutcome::Ok,

            Some("idle") => {
                let mut flags = 0u32;
                for class in parts {
                    flags |= idle::bit_for_name(class).unwrap_or(0);
                }
                if flags == 0 {
                    flags = idle::ALL;
                }
                // Either path already wrote its own terminal response
                // (`changed: ...\nOK\n` on synchronous delivery, nothing
                // yet if parked) — the caller must not append another OK.
                client.idle_wait(io, flags);
                CommandOutcome::OkNoTrailer
            },

            Some("kill") => CommandOutcome::Kill,
            Some("close") => CommandOutcome::Close,

            Some(other) => {
                client.printf(
                    io,
                    format_args!("ACK [5@0] {{{other}}} unknown command \"{other}\"\n"),
                );
                CommandOutcome::OkNoTrailer
            },

            None => {
                client.puts(io, "ACK [5@0] {} empty command\n");
                CommandOutcome::OkNoTrailer
            },
        }
    }
}
