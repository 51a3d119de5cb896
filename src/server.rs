//! Listener bootstrap for record and replay mode
//!
//! Each accepted connection runs in its own task. With a companion emulator
//! attached, connections are served one at a time and the companion is
//! reconnected after every session.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use log::{error, info, warn};
use tokio::net::{TcpListener, TcpStream};

use crate::command_channel::CommandChannel;
use crate::emulator::{is_tls_address, Emulator, SharedEmulator};
use crate::error::{NetworkError, NetworkResult, RelayResult};
use crate::relay::{record_session, record_session_sampled, RelayOptions, RelayStats};
use crate::replay::{ReplayOptions, ReplaySession};
use crate::screen_store::ScreenStore;
use crate::session::{session_id, SessionEnd};

/// Listen on all interfaces
pub async fn bind(port: u16) -> NetworkResult<TcpListener> {
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .map_err(|e| NetworkError::Bind {
            port,
            reason: e.to_string(),
        })?;
    info!("Listening on port {port}");
    Ok(listener)
}

/// An emulator attached to the local listener
pub struct Companion<E> {
    emulator: SharedEmulator<E>,
    address: String,
}

impl<E: Emulator + 'static> Companion<E> {
    /// `address` is what the emulator connects to, e.g. `L:Y:localhost:992`
    pub fn new(emulator: E, address: impl Into<String>) -> Self {
        Self {
            emulator: Arc::new(tokio::sync::Mutex::new(emulator)),
            address: address.into(),
        }
    }

    pub fn emulator(&self) -> SharedEmulator<E> {
        Arc::clone(&self.emulator)
    }

    /// Whether record sessions sample the emulator instead of the stream
    pub fn samples_screens(&self) -> bool {
        is_tls_address(&self.address)
    }

    /// Connect in the background; the emulator needs the accept loop running
    /// to complete its handshake.
    pub fn connect(&self) {
        let emulator = self.emulator();
        let address = self.address.clone();
        tokio::spawn(async move {
            let mut emulator = emulator.lock().await;
            match emulator.connect(&address).await {
                Ok(connected) => info!("Companion on {address} (connected: {connected}, tls: {})", emulator.tls()),
                Err(e) => warn!("Companion failed to connect to {address}: {e}"),
            }
        });
    }

    /// Replace the emulator with a fresh one in the background
    pub fn restart(&self) {
        let emulator = self.emulator();
        tokio::spawn(async move {
            let mut emulator = emulator.lock().await;
            if let Err(e) = emulator.restart().await {
                error!("Companion restart failed: {e}");
            }
        });
    }
}

/// Decide whether to keep serving after a companion session.
/// The companion closing its own connection ends the server.
fn continue_after<E: Emulator + 'static>(companion: &Companion<E>, end: Option<SessionEnd>) -> bool {
    if end == Some(SessionEnd::ClientClosed) {
        info!("Companion closed, stopping");
        return false;
    }
    companion.restart();
    true
}

/// Relay every accepted connection to `target`
pub async fn run_record<E>(
    listener: TcpListener,
    target: String,
    record_dir: Option<PathBuf>,
    options: RelayOptions,
    companion: Option<Companion<E>>,
) -> anyhow::Result<()>
where
    E: Emulator + 'static,
{
    let target = Arc::new(target);
    let record_dir = Arc::new(record_dir);
    let options = Arc::new(options);

    if let Some(companion) = &companion {
        companion.connect();
    }

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        let emulator = companion
            .as_ref()
            .filter(|c| c.samples_screens())
            .map(Companion::emulator);
        let session = record_connection(
            stream,
            peer,
            Arc::clone(&target),
            Arc::clone(&record_dir),
            Arc::clone(&options),
            emulator,
        );

        match &companion {
            Some(companion) => {
                let end = session.await;
                if !continue_after(companion, end) {
                    return Ok(());
                }
            }
            None => {
                tokio::spawn(session);
            }
        }
    }
}

async fn record_connection<E: Emulator>(
    stream: TcpStream,
    peer: SocketAddr,
    target: Arc<String>,
    record_dir: Arc<Option<PathBuf>>,
    options: Arc<RelayOptions>,
    emulator: Option<SharedEmulator<E>>,
) -> Option<SessionEnd> {
    let id = session_id();
    info!("[{id}] record connection from {peer} to {target}");

    let result: RelayResult<(RelayStats, SessionEnd)> = match (record_dir.as_deref(), emulator) {
        (Some(dir), Some(emulator)) => record_session_sampled(stream, &target, dir, emulator, &options).await,
        (dir, _) => record_session(stream, &target, dir, &options).await,
    };

    match result {
        Ok((stats, end)) => {
            info!(
                "[{id}] session ended ({end}): {} bytes in, {} bytes out, {} screen(s) saved",
                stats.client_bytes, stats.host_bytes, stats.screens_saved
            );
            Some(end)
        }
        Err(e) => {
            warn!("[{id}] session failed: {e}");
            None
        }
    }
}

/// Serve stored screens to every accepted connection
pub async fn run_replay<E>(
    listener: TcpListener,
    screens: ScreenStore,
    directory: PathBuf,
    options: ReplayOptions,
    commands: CommandChannel,
    companion: Option<Companion<E>>,
) -> anyhow::Result<()>
where
    E: Emulator + 'static,
{
    let screens = Arc::new(screens);
    let options = Arc::new(options);

    if let Some(companion) = &companion {
        companion.connect();
    }

    loop {
        let (stream, peer) = listener.accept().await.context("accept failed")?;
        let id = session_id();
        info!("[{id}] replay connection from {peer}");

        let mut session = ReplaySession::new(id.clone(), (*screens).clone(), directory.clone(), Arc::clone(&options));
        let commands = commands.clone();
        let serve = async move {
            match session.run(stream, &commands).await {
                Ok(end) => {
                    info!("[{id}] session ended ({end})");
                    Some(end)
                }
                Err(e) => {
                    warn!("[{id}] session failed: {e}");
                    None
                }
            }
        };

        match &companion {
            Some(companion) => {
                let end = serve.await;
                if !continue_after(companion, end) {
                    return Ok(());
                }
            }
            None => {
                tokio::spawn(serve);
            }
        }
    }
}
