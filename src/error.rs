//! Error types for the record/replay relay
//!
//! Errors are grouped by the component that raises them. Session loops turn
//! most of these into a log line and a closed connection; none of them is
//! allowed to take down the listener or sibling sessions.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type for relay operations
#[derive(Debug, Error)]
pub enum RelayError {
    /// Network connection errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),
    /// Screen store errors
    #[error("Screen store error: {0}")]
    Store(#[from] StoreError),
    /// Operator command errors
    #[error("Command error: {0}")]
    Command(#[from] CommandError),
    /// Companion emulator errors
    #[error("Emulator error: {0}")]
    Emulator(#[from] EmulatorError),
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Network connection related errors
#[derive(Debug, Error)]
pub enum NetworkError {
    /// Connection refused by remote host
    #[error("Connection refused to {host}:{port}")]
    ConnectionRefused { host: String, port: u16 },
    /// Connection timeout
    #[error("Connection timeout to {host}:{port} after {timeout_ms}ms")]
    Timeout { host: String, port: u16, timeout_ms: u64 },
    /// DNS resolution failure
    #[error("DNS resolution failed for {host}")]
    DnsResolution { host: String },
    /// Connection lost during operation
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },
    /// Invalid network address
    #[error("Invalid network address: {address}")]
    InvalidAddress { address: String },
    /// Listener could not be bound
    #[error("Cannot listen on port {port}: {reason}")]
    Bind { port: u16, reason: String },
}

/// Screen store errors
#[derive(Debug, Error)]
pub enum StoreError {
    /// Directory could not be created or listed
    #[error("Directory '{}' unavailable: {source}", .path.display())]
    Directory { path: PathBuf, source: io::Error },
    /// Screen file could not be read
    #[error("Cannot read screen '{}': {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    /// Screen file could not be written
    #[error("Cannot write screen '{}': {source}", .path.display())]
    Write { path: PathBuf, source: io::Error },
}

/// Operator command errors
#[derive(Debug, Error)]
pub enum CommandError {
    /// Verb not in the command grammar
    #[error("Unknown command: {line}")]
    Unknown { line: String },
    /// Verb present, arguments missing
    #[error("Command '{verb}' expects {expected}")]
    MissingArgument { verb: String, expected: String },
    /// Hex payload could not be decoded
    #[error("Invalid hex payload '{payload}': {reason}")]
    InvalidHex { payload: String, reason: String },
}

/// Companion emulator errors
#[derive(Debug, Error)]
pub enum EmulatorError {
    /// Script command name not in the command table
    #[error("Emulator command {name} not found")]
    UnknownCommand { name: String },
    /// Script command called with too few parameters
    #[error("Emulator command {name} expects {expected} parameter(s), got {given}")]
    Arity { name: String, expected: usize, given: usize },
    /// Emulator answered with an error status
    #[error("Emulator command '{command}' failed: {message}")]
    CommandFailed { command: String, message: String },
    /// Emulator process is gone or was never started
    #[error("Emulator process not running")]
    NotRunning,
    /// Emulator process could not be spawned
    #[error("Cannot start emulator '{program}': {reason}")]
    Spawn { program: String, reason: String },
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid configuration parameter
    #[error("Invalid configuration parameter '{parameter}' = '{value}': {reason}")]
    InvalidParameter { parameter: String, value: String, reason: String },
}

// Convert from standard IO errors
impl From<io::Error> for NetworkError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::ConnectionRefused => NetworkError::ConnectionRefused {
                host: "unknown".to_string(),
                port: 0,
            },
            io::ErrorKind::TimedOut => NetworkError::Timeout {
                host: "unknown".to_string(),
                port: 0,
                timeout_ms: 0,
            },
            io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::UnexpectedEof => NetworkError::ConnectionLost {
                reason: err.to_string(),
            },
            _ => NetworkError::ConnectionLost {
                reason: format!("IO Error: {err}"),
            },
        }
    }
}

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        RelayError::Network(err.into())
    }
}

/// Result type alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

/// Specialized result types for different components
pub type NetworkResult<T> = Result<T, NetworkError>;
pub type StoreResult<T> = Result<T, StoreError>;
pub type CommandResult<T> = Result<T, CommandError>;
pub type EmulatorResult<T> = Result<T, EmulatorError>;
