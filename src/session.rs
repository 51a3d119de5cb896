//! Per-connection session bookkeeping

use std::fmt;

/// Short random identifier attached to every log line of one connection
pub fn session_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Why a session loop returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The terminal client disconnected
    ClientClosed,
    /// The upstream host disconnected
    HostClosed,
    /// An operator `quit` command ended the session
    Quit,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            SessionEnd::ClientClosed => "client closed",
            SessionEnd::HostClosed => "host closed",
            SessionEnd::Quit => "operator quit",
        };
        f.write_str(text)
    }
}
