//! Connection manager: accept loop, per-client task, expiry, and the idle
//! broadcast fan-out (§4.4, §4.7, §5).
//!
//! Unlike the original's single `select()` loop over an fd-set, each
//! accepted connection gets its own tokio task on a `current_thread`
//! runtime — a literal, not just convenient, rendering of §5's
//! single-threaded cooperative model, since a `current_thread` runtime
//! never runs two client tasks' code concurrently. There is therefore no
//! central client registry to iterate with removal-safety; the
//! live-connection count is a plain atomic counter, and `manager_idle_add`
//! is a `broadcast` channel each client task independently folds into its
//! own `idle_flags`.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, UnixListener};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::client::{Client, ReadOutcome, ALL_PERMISSIONS};
use crate::command::CommandHandler;
use crate::config::Limits;
use crate::idle;
use crate::io::Socket;
use crate::peer::{self, PeerAddr};

pub const PROTOCOL_VERSION: &str = "0.20.0";

/// The two kinds of listening socket this core accepts from (§1: "stream
/// sockets (TCP and local UNIX domain sockets)"). Either may be absent.
#[derive(Default)]
pub struct Listeners {
    pub tcp: Option<TcpListener>,
    pub unix: Option<UnixListener>,
}

/// Idle-broadcast capacity. Sized generously; a lagged subscriber still
/// behaves correctly (see `client_task`), this just keeps that the
/// uncommon case.
const IDLE_CHANNEL_CAPACITY: usize = 256;

type HandlerFactory = dyn Fn() -> Box<dyn CommandHandler> + Send + Sync;

pub struct Manager {
    limits: Arc<Limits>,
    handler_factory: Arc<HandlerFactory>,
    idle_tx: broadcast::Sender<u32>,
    connections: Arc<AtomicUsize>,
    next_num: AtomicU64,
}

impl Manager {
    pub fn new(limits: Limits, handler_factory: impl Fn() -> Box<dyn CommandHandler> + Send + Sync + 'static) -> Self {
        let (idle_tx, _) = broadcast::channel(IDLE_CHANNEL_CAPACITY);
        Manager {
            limits: Arc::new(limits),
            handler_factory: Arc::new(handler_factory),
            idle_tx,
            connections: Arc::new(AtomicUsize::new(0)),
            next_num: AtomicU64::new(0),
        }
    }

    /// `manager_idle_add`: broadcasts event flags to every live client task.
    /// A client that isn't currently idle simply folds the bits into its
    /// pending mask for later; see `client_task`.
    pub fn idle_add(&self, flags: u32) {
        // No live subscribers just means no connected clients right now;
        // that's not an error condition.
        let _ = self.idle_tx.send(flags);
    }

    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Accepts connections until `cancel` fires, spawning one task per
    /// client. Each accept failure is logged and does not stop the loop
    /// (mirrors the original's `getConnections` treating accept errors as
    /// non-fatal).
    pub async fn run(self: Arc<Self>, mut listeners: Listeners, cancel: CancellationToken) -> anyhow::Result<()> {
        loop {
            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(()),
                res = accept_any(&mut listeners) => res,
            };

            match accepted {
                Ok(socket) => {
                    let manager = self.clone();
                    let cancel = cancel.clone();
                    tokio::spawn(async move {
                        manager.client_task(socket, cancel).await;
                    });
                },
                Err(error) => {
                    warn!(%error, "failed to accept connection");
                },
            }
        }
    }

    #[instrument(name = "client", skip_all, fields(num = tracing::field::Empty, peer = tracing::field::Empty))]
    async fn client_task(self: Arc<Self>, socket: Socket, cancel: CancellationToken) {
        let count = self.connections.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.limits.max_connections {
            self.connections.fetch_sub(1, Ordering::SeqCst);
            error!("max connections reached, refusing client");
            return;
        }
        let _guard = ConnectionGuard(self.connections.clone());

        let num = self.next_num.fetch_add(1, Ordering::SeqCst);
        let peer = peer::peer_addr(&socket).unwrap_or(PeerAddr::Local);
        let uid = socket.peer_uid();
        let span = tracing::Span::current();
        span.record("num", num);
        span.record("peer", tracing::field::display(&peer));
        info!("accepted connection");

        let mut client = Client::new(num, uid, ALL_PERMISSIONS, self.limits.clone());
        client.puts(&socket, &format!("OK MPD {PROTOCOL_VERSION}\n"));
        client.flush_output(&socket);

        let mut handler = (self.handler_factory)();
        let mut idle_rx = self.idle_tx.subscribe();

        loop {
            if client.is_expired() {
                break;
            }

            let deadline = tokio::time::Instant::from(client.last_activity()) + self.limits.timeout;

            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = tokio::time::sleep_until(deadline), if !client.is_idle() => {
                    debug!("timeout");
                    break;
                },

                idle_res = idle_rx.recv() => {
                    match idle_res {
                        Ok(flags) => client.post_idle(flags),
                        Err(broadcast::error::RecvError::Lagged(_)) => {
                            // A lagged subscriber may have missed some bits
                            // entirely; fold in every known flag rather than
                            // guess which. Over-notifying is still "set or
                            // not set" per §5; silently dropping bits isn't.
                            client.post_idle(idle::ALL);
                        },
                        Err(broadcast::error::RecvError::Closed) => continue,
                    }
                    if client.is_idle() && client.idle_overlap() != 0 {
                        client.notify_idle(&socket);
                    }
                },

                res = socket.readable(), if !client.has_deferred_output() => {
                    if let Err(error) = res {
                        warn!(%error, "poll error waiting for readability");
                        break;
                    }
                    match client.on_readable(&socket, handler.as_mut()) {
                        ReadOutcome::Continue => {},
                        ReadOutcome::Close => break,
                        ReadOutcome::Kill => {
                            cancel.cancel();
                            break;
                        },
                    }
                },

                res = socket.writable(), if client.has_deferred_output() => {
                    if let Err(error) = res {
                        warn!(%error, "poll error waiting for writability");
                        break;
                    }
                    client.drain_deferred(&socket);
                },
            }
        }

        info!("closed");
    }
}

struct ConnectionGuard(Arc<AtomicUsize>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn accept_any(listeners: &mut Listeners) -> std::io::Result<Socket> {
    match (&listeners.tcp, &listeners.unix) {
        (Some(tcp), Some(unix)) => tokio::select! {
            res = tcp.accept() => res.map(|(s, _)| Socket::Tcp(s)),
            res = unix.accept() => res.map(|(s, _)| Socket::Unix(s)),
        },
        (Some(tcp), None) => tcp.accept().await.map(|(s, _)| Socket::Tcp(s)),
        (None, Some(unix)) => unix.accept().await.map(|(s, _)| Socket::Unix(s)),
        (None, None) => std::future::pending().await,
    }
}
