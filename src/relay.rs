//! Record mode relay
//!
//! A bidirectional pump between a terminal client and the real host. Every
//! byte is passed through unmodified; host output is also fed to a
//! [`Capture`] that turns it into persisted screens.

use std::future::Future;
use std::io;
use std::path::Path;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::RelayConfig;
use crate::emulator::{Emulator, SharedEmulator};
use crate::error::{NetworkError, NetworkResult, RelayResult};
use crate::sampler::ScreenSampler;
use crate::screen_store::ScreenRecorder;
use crate::segmenter::{is_screen_with_min, FrameSegmenter, MIN_SCREEN_LEN};
use crate::session::SessionEnd;

/// Size of each socket read
pub const READ_BUFFER_SIZE: usize = 2048;

/// Timing and framing parameters of a record session
#[derive(Debug, Clone)]
pub struct RelayOptions {
    pub connect_timeout: Duration,
    pub poll_interval: Duration,
    pub default_port: u16,
    pub min_screen_len: usize,
}

impl RelayOptions {
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
            poll_interval: config.poll_interval(),
            default_port: config.default_port(),
            min_screen_len: config.min_screen_length(),
        }
    }
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(5),
            poll_interval: Duration::from_millis(10),
            default_port: 3270,
            min_screen_len: MIN_SCREEN_LEN,
        }
    }
}

/// Traffic counters of one finished session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub client_bytes: u64,
    pub host_bytes: u64,
    pub screens_saved: u32,
}

/// Split `host[:port]` into its parts, using `default_port` when absent.
/// IPv6 literals need brackets to carry a port: `[::1]:3270`.
pub fn parse_address(address: &str, default_port: u16) -> NetworkResult<(String, u16)> {
    let address = address.trim();
    let invalid = || NetworkError::InvalidAddress {
        address: address.to_string(),
    };

    let (host, port) = if let Some(rest) = address.strip_prefix('[') {
        let (host, tail) = rest.split_once(']').ok_or_else(invalid)?;
        match tail {
            "" => (host, None),
            tail => (host, Some(tail.strip_prefix(':').ok_or_else(invalid)?)),
        }
    } else {
        match address.rsplit_once(':') {
            Some((host, _)) if host.contains(':') => (address, None),
            Some((host, port)) => (host, Some(port)),
            None => (address, None),
        }
    };

    if host.is_empty() {
        return Err(invalid());
    }
    let port = match port {
        Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
        None => default_port,
    };
    Ok((host.to_string(), port))
}

/// Milliseconds in `duration`, saturating at `u64::MAX`
fn whole_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Open the host connection within the configured timeout
pub async fn connect_host(address: &str, options: &RelayOptions) -> NetworkResult<TcpStream> {
    let (host, port) = parse_address(address, options.default_port)?;
    let timeout_error = || NetworkError::Timeout {
        host: host.clone(),
        port,
        timeout_ms: whole_millis(options.connect_timeout),
    };

    let attempt = async {
        let addrs: Vec<_> = tokio::net::lookup_host((host.as_str(), port))
            .await
            .map_err(|_| NetworkError::DnsResolution { host: host.clone() })?
            .collect();
        TcpStream::connect(&addrs[..]).await.map_err(|e| match e.kind() {
            io::ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused {
                host: host.clone(),
                port,
            },
            _ => NetworkError::from(e),
        })
    };

    let stream = timeout(options.connect_timeout, attempt)
        .await
        .map_err(|_| timeout_error())??;
    if let Err(e) = stream.set_nodelay(true) {
        debug!("TCP_NODELAY not set: {e}");
    }
    info!("Connected to host {host}:{port}");
    Ok(stream)
}

/// Receives host output as it is relayed
pub trait Capture: Send {
    /// Bytes just relayed host to client. Returns the number of screens saved.
    fn host_data(&mut self, data: &[u8]) -> u32;

    /// Called whenever neither side sent anything for one poll interval
    fn idle(&mut self) -> impl Future<Output = u32> + Send;
}

/// Pure proxying, nothing recorded
#[derive(Debug, Default)]
pub struct NoCapture;

impl Capture for NoCapture {
    fn host_data(&mut self, _data: &[u8]) -> u32 {
        0
    }

    async fn idle(&mut self) -> u32 {
        0
    }
}

/// Segments the host stream at IAC EOR and keeps full-screen paints
#[derive(Debug)]
pub struct FrameCapture {
    segmenter: FrameSegmenter,
    recorder: ScreenRecorder,
    min_screen_len: usize,
}

impl FrameCapture {
    pub fn new(recorder: ScreenRecorder, min_screen_len: usize) -> Self {
        Self {
            segmenter: FrameSegmenter::new(),
            recorder,
            min_screen_len,
        }
    }
}

impl Capture for FrameCapture {
    fn host_data(&mut self, data: &[u8]) -> u32 {
        let mut saved = 0;
        for frame in self.segmenter.push(data) {
            if !is_screen_with_min(&frame, self.min_screen_len) {
                debug!("Skipping {}-byte record, not a screen", frame.len());
                continue;
            }
            match self.recorder.record(&frame) {
                Ok(_) => saved += 1,
                Err(e) => warn!("Screen not saved: {e}"),
            }
        }
        saved
    }

    async fn idle(&mut self) -> u32 {
        0
    }
}

/// Reads screens back from the companion emulator once host output settles
pub struct SampledCapture<E> {
    emulator: SharedEmulator<E>,
    sampler: ScreenSampler,
    recorder: ScreenRecorder,
    dirty: bool,
}

impl<E: Emulator> SampledCapture<E> {
    pub fn new(emulator: SharedEmulator<E>, recorder: ScreenRecorder) -> Self {
        Self {
            emulator,
            sampler: ScreenSampler::new(),
            recorder,
            dirty: false,
        }
    }
}

impl<E: Emulator> Capture for SampledCapture<E> {
    fn host_data(&mut self, _data: &[u8]) -> u32 {
        self.dirty = true;
        0
    }

    /// Never waits for the emulator: while it is busy (still connecting
    /// through this relay, say) the sample is deferred to a later idle.
    async fn idle(&mut self) -> u32 {
        if !self.dirty {
            return 0;
        }
        let Ok(mut emulator) = self.emulator.try_lock() else {
            debug!("Emulator busy, sample deferred");
            return 0;
        };
        self.dirty = false;
        match self.sampler.sample(&mut *emulator, &mut self.recorder).await {
            Ok(true) => 1,
            Ok(false) => 0,
            Err(e) => {
                warn!("Screen sample failed: {e}");
                0
            }
        }
    }
}

enum Ready {
    Client(io::Result<usize>),
    Host(io::Result<usize>),
}

/// Pump bytes both ways until either side closes or fails.
/// Both streams are shut down before returning.
pub async fn relay<C, H, K>(
    client: C,
    host: H,
    capture: &mut K,
    poll_interval: Duration,
) -> RelayResult<(RelayStats, SessionEnd)>
where
    C: AsyncRead + AsyncWrite + Unpin,
    H: AsyncRead + AsyncWrite + Unpin,
    K: Capture,
{
    let (mut client_rx, mut client_tx) = tokio::io::split(client);
    let (mut host_rx, mut host_tx) = tokio::io::split(host);
    let mut stats = RelayStats::default();
    let mut client_buf = [0u8; READ_BUFFER_SIZE];
    let mut host_buf = [0u8; READ_BUFFER_SIZE];

    let outcome: RelayResult<SessionEnd> = async {
        loop {
            let ready = timeout(poll_interval, async {
                tokio::select! {
                    r = client_rx.read(&mut client_buf) => Ready::Client(r),
                    r = host_rx.read(&mut host_buf) => Ready::Host(r),
                }
            })
            .await;

            match ready {
                Err(_) => stats.screens_saved += capture.idle().await,
                Ok(Ready::Client(read)) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(SessionEnd::ClientClosed);
                    }
                    host_tx.write_all(&client_buf[..n]).await?;
                    stats.client_bytes += n as u64;
                }
                Ok(Ready::Host(read)) => {
                    let n = read?;
                    if n == 0 {
                        return Ok(SessionEnd::HostClosed);
                    }
                    client_tx.write_all(&host_buf[..n]).await?;
                    stats.host_bytes += n as u64;
                    stats.screens_saved += capture.host_data(&host_buf[..n]);
                }
            }
        }
    }
    .await;

    if let Err(e) = client_tx.shutdown().await {
        debug!("Client shutdown: {e}");
    }
    if let Err(e) = host_tx.shutdown().await {
        debug!("Host shutdown: {e}");
    }
    outcome.map(|end| (stats, end))
}

async fn connect_or_close<C>(client: &mut C, address: &str, options: &RelayOptions) -> RelayResult<TcpStream>
where
    C: AsyncWrite + Unpin,
{
    match connect_host(address, options).await {
        Ok(host) => Ok(host),
        Err(e) => {
            warn!("Host connection to {address} failed: {e}");
            if let Err(e) = client.shutdown().await {
                debug!("Client shutdown: {e}");
            }
            Err(e.into())
        }
    }
}

async fn open_recorder<C>(client: &mut C, dir: &Path) -> RelayResult<ScreenRecorder>
where
    C: AsyncWrite + Unpin,
{
    match ScreenRecorder::new(dir) {
        Ok(recorder) => Ok(recorder),
        Err(e) => {
            if let Err(e) = client.shutdown().await {
                debug!("Client shutdown: {e}");
            }
            Err(e.into())
        }
    }
}

/// Relay `client` to `address`, persisting full-screen paints into
/// `record_dir`. Nothing is written when the host cannot be reached.
pub async fn record_session<C>(
    mut client: C,
    address: &str,
    record_dir: Option<&Path>,
    options: &RelayOptions,
) -> RelayResult<(RelayStats, SessionEnd)>
where
    C: AsyncRead + AsyncWrite + Unpin,
{
    let host = connect_or_close(&mut client, address, options).await?;
    match record_dir {
        Some(dir) => {
            let recorder = open_recorder(&mut client, dir).await?;
            let mut capture = FrameCapture::new(recorder, options.min_screen_len);
            relay(client, host, &mut capture, options.poll_interval).await
        }
        None => relay(client, host, &mut NoCapture, options.poll_interval).await,
    }
}

/// Like [`record_session`], but screens are sampled from `emulator`
/// instead of being cut out of the host stream
pub async fn record_session_sampled<C, E>(
    mut client: C,
    address: &str,
    record_dir: &Path,
    emulator: SharedEmulator<E>,
    options: &RelayOptions,
) -> RelayResult<(RelayStats, SessionEnd)>
where
    C: AsyncRead + AsyncWrite + Unpin,
    E: Emulator,
{
    let host = connect_or_close(&mut client, address, options).await?;
    let recorder = open_recorder(&mut client, record_dir).await?;
    let mut capture = SampledCapture::new(emulator, recorder);
    relay(client, host, &mut capture, options.poll_interval).await
}
