extern crate dbus_gatekeeper;

#[cfg(unix)]
use std::{fs::File, io::Write, os::fd::FromRawFd};
use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use clap::Parser;
#[cfg(unix)]
use tokio::signal::unix::SignalKind;
use tracing::{error, info, warn};
use zbus::Guid;

use dbus_gatekeeper::{config, listener::Listener, rules::RuleSet, session::Session};

/// A filtering D-Bus proxy: confines a client to an allow-list of rules read from
/// standard input, then forwards everything it permits to the real bus.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Unix socket path the confined client will connect to.
    socket_path: PathBuf,

    /// Which real bus to proxy: `session` or `system`.
    bus_type: config::Section,

    /// File descriptor to which readiness notifications are sent.
    ///
    /// Once listening on `socket_path`, the proxy writes `READY=1\n` into this file
    /// descriptor and closes it. Works with both systemd and s6.
    ///
    /// Only available on unix-like platforms.
    #[cfg(unix)]
    #[clap(long)]
    ready_fd: Option<i32>,

    /// Use the deprecated line-oriented configuration format instead of the JSON one.
    #[clap(long)]
    legacy_config: bool,

    /// Raise tracing verbosity; repeatable (`-v`, `-vv`, `-vvv`). Only sets the default
    /// level `RUST_LOG` falls back to when unset.
    #[clap(short = 'v', long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    dbus_gatekeeper::tracing_subscriber::init(args.verbose);

    let section = args.bus_type;

    let rules = RuleSet::new();
    if args.legacy_config {
        let rules = rules.clone();
        tokio::task::spawn_blocking(move || {
            let stdin = std::io::stdin();
            config::legacy::load_from_reader(stdin.lock(), &rules);
            info!("legacy configuration loader stopped (end of input)");
        });
    } else {
        config::loader::spawn(rules.clone(), section);
    }

    let mut listener = Listener::listen(&args.socket_path)
        .await
        .with_context(|| format!("failed to listen on {}", args.socket_path.display()))?;

    #[cfg(unix)]
    if let Some(fd) = args.ready_fd {
        // SAFETY: the caller is responsible for passing a valid, open file descriptor.
        let mut ready_file = unsafe { File::from_raw_fd(fd) };
        ready_file.write_all(b"READY=1\n")?;
    }

    let guid = Arc::new(Guid::generate());

    #[cfg(unix)]
    {
        let mut sig_int = tokio::signal::unix::signal(SignalKind::interrupt())?;
        let mut sig_term = tokio::signal::unix::signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                _ = sig_int.recv() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                _ = sig_term.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok(stream) => spawn_session(stream, guid.clone(), section, rules.clone()),
                        Err(e) => {
                            warn!("failed to accept client connection: {}", e);
                            continue;
                        }
                    }
                }
            }
        }
    }

    #[cfg(not(unix))]
    loop {
        match listener.accept().await {
            Ok(stream) => spawn_session(stream, guid.clone(), section, rules.clone()),
            Err(e) => warn!("failed to accept client connection: {}", e),
        }
    }

    Ok(())
}

fn spawn_session(
    stream: tokio::net::UnixStream,
    guid: Arc<Guid>,
    section: config::Section,
    rules: RuleSet,
) {
    tokio::spawn(async move {
        match Session::new(stream, &guid, section, rules).await {
            Ok(session) => session.run().await,
            Err(e) => error!("failed to start session: {}", e),
        }
    });
}
