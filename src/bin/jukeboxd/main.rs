mod args;

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::{TcpListener, UnixListener};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};

use crate::args::Args;
use jukebox_core::command::DefaultCommandHandler;
use jukebox_core::config::{self, Limits};
use jukebox_core::manager::{Listeners, Manager};

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let args = Args::parse();

    if args.debug {
        tracing_subscriber::fmt()
            .with_max_level(Level::TRACE)
            .init();
    } else {
        tracing_subscriber::fmt().json().init();
    }

    let limits = match resolve_limits(&args) {
        Ok(limits) => limits,
        Err(error) => {
            error!(%error, "configuration error");
            return ExitCode::from(78); // EX_CONFIG
        },
    };

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(error) = signal::ctrl_c().await {
                warn!(%error, "something strange with ctrl-c handling!");
            }
            cancel.cancel();
        });
    }

    let tcp = match TcpListener::bind((args.listen, args.port)).await {
        Ok(listener) => Some(listener),
        Err(error) => {
            error!(%error, "failed to listen for TCP connections");
            return ExitCode::from(111);
        },
    };

    let unix = match &args.socket {
        Some(path) => match UnixListener::bind(path) {
            Ok(listener) => Some(listener),
            Err(error) => {
                error!(%error, path = %path.display(), "failed to listen on unix socket");
                return ExitCode::from(111);
            },
        },
        None => None,
    };

    if let Some(listener) = &tcp {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, "listening for TCP connections");
        }
    }
    if let Some(path) = &args.socket {
        info!(path = %path.display(), "listening on unix socket");
    }

    let manager = Arc::new(Manager::new(limits, || Box::new(DefaultCommandHandler)));

    match manager
        .run(Listeners { tcp, unix }, cancel)
        .await
    {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "encountered runtime error");
            ExitCode::FAILURE
        },
    }
}

/// Merges built-in defaults, an optional config file, and CLI overrides, in
/// that precedence order (CLI highest). Matches `client_manager_init`'s
/// fatal-on-bad-value behavior for the config file; CLI values are trusted
/// as already validated by clap's parser.
fn resolve_limits(args: &Args) -> Result<Limits> {
    let mut limits = Limits::default();

    if let Some(path) = &args.config {
        let partial = config::load_config_file(path)
            .with_context(|| format!("loading config file {}", path.display()))?;
        limits = partial.apply_over(limits);
    }

    if let Some(timeout) = args.timeout {
        limits.timeout = std::time::Duration::from_secs(timeout);
    }
    if let Some(max_connections) = args.max_connections {
        limits.max_connections = max_connections;
    }
    if let Some(kib) = args.max_command_list_size {
        limits.max_command_list_size = kib as usize * 1024;
    }
    if let Some(kib) = args.max_output_buffer_size {
        limits.max_output_buffer_size = kib as usize * 1024;
    }

    Ok(limits)
}
