//! Frame segmentation for host output
//!
//! tn3270 carries no length prefix, so records are found by scanning for the
//! IAC EOR marker. Partial reads stay buffered until the marker arrives.

use crate::lib3270::codes::SCREEN_MARKER;
use crate::protocol_common::telnet_base::{find_eor, IAC_EOR};

/// Records at or below this length are never persisted as screens
pub const MIN_SCREEN_LEN: usize = 100;

/// True when `data` looks like a full-screen paint rather than control or
/// keepalive traffic.
pub fn is_screen(data: &[u8]) -> bool {
    is_screen_with_min(data, MIN_SCREEN_LEN)
}

/// [`is_screen`] with a configurable length threshold
pub fn is_screen_with_min(data: &[u8], min_len: usize) -> bool {
    data.len() > min_len && data.contains(&SCREEN_MARKER)
}

/// Split `buffer` into complete IAC EOR terminated frames and a remainder.
///
/// Each frame keeps its trailing IAC EOR. Concatenating the frames and the
/// remainder gives back `buffer` unchanged.
pub fn segment(buffer: &[u8]) -> (Vec<Vec<u8>>, Vec<u8>) {
    let mut frames = Vec::new();
    let mut rest = buffer;

    while let Some(pos) = find_eor(rest) {
        let end = pos + IAC_EOR.len();
        frames.push(rest[..end].to_vec());
        rest = &rest[end..];
    }

    (frames, rest.to_vec())
}

/// Accumulates host bytes across reads and yields complete frames
#[derive(Debug, Default)]
pub struct FrameSegmenter {
    pending: Vec<u8>,
}

impl FrameSegmenter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `data` and return every frame completed by it
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        self.pending.extend_from_slice(data);
        if find_eor(&self.pending).is_none() {
            return Vec::new();
        }
        let (frames, rest) = segment(&self.pending);
        self.pending = rest;
        frames
    }

    /// Bytes received since the last complete frame
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }
}
