/// PROTOCOL COMMON: Telnet vocabulary shared by the record and replay paths
/// IAC/EOR framing markers and option negotiation bytes
pub mod protocol_common;

/// LIB3270: TN3270 byte vocabulary
/// AID codes, orders, the clear-buffer command and the negotiation preamble
pub mod lib3270;

/// Frame segmentation of host output at IAC EOR
pub mod segmenter;

/// On-disk screen captures
pub mod screen_store;

/// Record mode: client to host relay with screen capture
pub mod relay;

/// Screen capture through the companion emulator
pub mod sampler;

/// Replay navigation state machine and key-press heuristic
pub mod navigation;

/// Replay mode: serving stored screens to a client
pub mod replay;

/// Operator commands for replay sessions
pub mod command_channel;

/// COMPANION: scriptable 3270 emulator driven next to a session
pub mod emulator;

/// Headless replay process under program control
pub mod offline;

/// Listener bootstrap and per-connection tasks
pub mod server;

/// Per-connection ids and outcomes
pub mod session;

pub mod config;
pub mod error;
pub mod logging;

pub use error::{RelayError, RelayResult};
pub use session::SessionEnd;
