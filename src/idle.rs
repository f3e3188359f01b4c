//! The idle-flag name table and per-client subscription bookkeeping.
//!
//! The flag-name table (`idle_get_names()` in the original MPD source) is
//! treated as an external collaborator elsewhere in this crate's design,
//! but this module ships a concrete default modeled on the original's
//! `IDLE_*` bits so the core is exercisable without a real media player
//! backend wired in.

/// Bit assignments, in the order notifications are emitted.
pub const DATABASE: u32 = 1 << 0;
pub const STORED_PLAYLIST: u32 = 1 << 1;
pub const PLAYLIST: u32 = 1 << 2;
pub const PLAYER: u32 = 1 << 3;
pub const MIXER: u32 = 1 << 4;
pub const OUTPUT: u32 = 1 << 5;
pub const OPTIONS: u32 = 1 << 6;
pub const PARTITION: u32 = 1 << 7;
pub const STICKER: u32 = 1 << 8;
pub const SUBSCRIPTION: u32 = 1 << 9;
pub const MESSAGE: u32 = 1 << 10;
pub const UPDATE: u32 = 1 << 11;

const NAMES: &[(&str, u32)] = &[
    ("database", DATABASE),
    ("stored_playlist", STORED_PLAYLIST),
    ("playlist", PLAYLIST),
    ("player", PLAYER),
    ("mixer", MIXER),
    ("output", OUTPUT),
    ("options", OPTIONS),
    ("partition", PARTITION),
    ("sticker", STICKER),
    ("subscription", SUBSCRIPTION),
    ("message", MESSAGE),
    ("update", UPDATE),
];

/// All flags this table knows about. Used for the conservative
/// over-notify-on-lag rule (see `manager::client_task`).
pub const ALL: u32 = {
    let mut acc = 0u32;
    let mut i = 0;
    while i < NAMES.len() {
        acc |= NAMES[i].1;
        i += 1;
    }
    acc
};

/// Names of every bit set in `flags`, in table order.
pub fn names_for(flags: u32) -> impl Iterator<Item = &'static str> {
    NAMES
        .iter()
        .filter(move |(_, bit)| flags & bit != 0)
        .map(|(name, _)| *name)
}

/// Resolves a subscription class name (as sent in `idle [classes...]`) to its
/// bit, or `None` if unrecognized.
pub fn bit_for_name(name: &str) -> Option<u32> {
    NAMES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, bit)| *bit)
}

/// Outcome of `Client::idle_wait`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IdleWaitOutcome {
    /// `idle_flags & flags` already overlapped; notification was sent
    /// synchronously and the client remains in `Normal`.
    Delivered,
    /// No overlap yet; the client is now parked awaiting `manager_idle_add`.
    Parked,
}

/// Per-client idle subscription state (§4.5).
#[derive(Debug, Default)]
pub struct IdleState {
    waiting: bool,
    subscriptions: u32,
    flags: u32,
}

impl IdleState {
    pub fn is_waiting(&self) -> bool {
        self.waiting
    }

    /// OR's newly-announced event flags into the pending mask. Called for
    /// every live client on `manager_idle_add`, whether or not it is
    /// currently parked.
    pub fn post(&mut self, flags: u32) {
        self.flags |= flags;
    }

    /// `idle_flags & idle_subscriptions`; non-zero means a pending delivery.
    pub fn overlap(&self) -> u32 {
        self.flags & self.subscriptions
    }

    /// Enters idle mode with the given subscription mask. `subscriptions` is
    /// set in both outcomes: a `Delivered` caller still reads it back via
    /// `overlap()` immediately afterward to know what to report.
    pub fn enter(&mut self, flags: u32) -> IdleWaitOutcome {
        debug_assert!(!self.waiting, "idle_wait called while already idle");
        self.subscriptions = flags;
        if self.flags & flags != 0 {
            IdleWaitOutcome::Delivered
        } else {
            self.waiting = true;
            IdleWaitOutcome::Parked
        }
    }

    /// Clears *all* pending flags (not just the reported ones) and exits
    /// idle mode. Matches the observable contract in §4.5: events the
    /// client did not subscribe to are discarded on drain, not carried
    /// forward.
    pub fn drain(&mut self) -> u32 {
        let flags = self.flags;
        self.flags = 0;
        self.waiting = false;
        flags
    }

    /// `noidle` while idle: leaves idle mode without touching `idle_flags`.
    pub fn exit_noidle(&mut self) {
        self.waiting = false;
    }
}
