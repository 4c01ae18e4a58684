//! Owns the bound socket the proxy presents to confined clients (spec §4.1).
//!
//! `Listener` accepts client connections on a Unix stream socket. The teacher's
//! process-per-client C original tears the listening socket down and re-listens after
//! every accept because forking breaks the libdbus event loop bound to it; this crate
//! runs one Tokio task per session instead (spec §9), so the same accepted `UnixStream`
//! keeps being handed off without needing to rebuild the listener. [`teardown`] and
//! [`listen`] are nonetheless kept as distinct operations, matching the documented
//! ordering requirement, so a process-per-session deployment could still observe it.

use std::{
    env, io,
    path::{Path, PathBuf},
};

use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info};

use crate::error::Error;

/// When `bind` fails because the socket's parent directory doesn't exist, note where
/// `XDG_RUNTIME_DIR` points (or that it's unset) as a hint — this is log context only,
/// never a fallback path the proxy binds to itself (spec §6's "Environment" clause).
/// Mirrors the teacher's own `default_address`, which consults the same variable to pick
/// a runtime directory for its default socket.
fn annotate_missing_parent(socket_path: &Path, e: io::Error) -> io::Error {
    if e.kind() != io::ErrorKind::NotFound {
        return e;
    }
    let parent = socket_path.parent().unwrap_or_else(|| Path::new("/"));
    if parent.exists() {
        return e;
    }
    let runtime_dir = env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "<unset>".to_string());
    io::Error::new(
        e.kind(),
        format!(
            "{e} (parent directory `{}` does not exist; XDG_RUNTIME_DIR=`{}`)",
            parent.display(),
            runtime_dir
        ),
    )
}

/// A listening socket at a caller-supplied filesystem path.
#[derive(Debug)]
pub struct Listener {
    socket_path: PathBuf,
    inner: Option<UnixListener>,
}

impl Listener {
    /// Bind and start accepting connections on `unix:path=<socket_path>`.
    ///
    /// Fails fatally (`BindError`, spec §4.1) if the path is already in use or its
    /// parent directory is unreachable.
    pub async fn listen(socket_path: impl AsRef<Path>) -> Result<Self, Error> {
        let socket_path = socket_path.as_ref().to_path_buf();
        let inner = UnixListener::bind(&socket_path).map_err(|e| Error::Bind {
            address: format!("unix:path={}", socket_path.display()),
            source: annotate_missing_parent(&socket_path, e),
        })?;
        info!("listening on {}", socket_path.display());

        Ok(Self {
            socket_path,
            inner: Some(inner),
        })
    }

    /// Disconnect and release the current listening socket, and unlink it so
    /// [`relisten`] can rebind the same path (spec §4.1; mirrors the teacher's own
    /// `Bus::cleanup`, which removes the socket file for the same reason: dropping a
    /// `UnixListener` closes the fd but leaves its filesystem entry behind).
    pub fn teardown(&mut self) {
        if self.inner.take().is_some() {
            let _ = std::fs::remove_file(&self.socket_path);
            debug!("tore down listener at {}", self.socket_path.display());
        }
    }

    /// Re-establish the listening socket at the same path after [`teardown`].
    pub async fn relisten(&mut self) -> Result<(), Error> {
        let inner = UnixListener::bind(&self.socket_path).map_err(|e| Error::Bind {
            address: format!("unix:path={}", self.socket_path.display()),
            source: annotate_missing_parent(&self.socket_path, e),
        })?;
        self.inner = Some(inner);
        Ok(())
    }

    /// Accept the next client connection.
    ///
    /// # Panics
    ///
    /// If called after [`teardown`] without an intervening [`relisten`].
    pub async fn accept(&mut self) -> std::io::Result<UnixStream> {
        let listener = self
            .inner
            .as_ref()
            .expect("accept() called on a torn-down listener");
        let (stream, _addr) = listener.accept().await?;
        Ok(stream)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}
