//! Screen capture by sampling the companion emulator
//!
//! When the host link is encrypted the raw stream is not useful for capture,
//! so screens are read back from the companion emulator instead. The
//! emulator's `ReadBuffer(Ebcdic)` answer is a series of `data:` lines of hex
//! bytes with symbolic `SF(..)` field tokens; those are rewritten to plain
//! hex and wrapped into a replayable frame.

use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use crate::emulator::Emulator;
use crate::error::{CommandError, CommandResult, RelayResult};
use crate::lib3270::codes::{ORDER_SF, START_OF_SCREEN};
use crate::protocol_common::telnet_base::IAC_EOR;
use crate::screen_store::ScreenRecorder;

static SF_TOKEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"SF\(([^)]*)\)").expect("SF token pattern is valid"));

/// Rewrite `SF(k=v, ...)` tokens into `1D<v>` runs and drop all whitespace.
///
/// `"11C1C1 SF(C1=01, C2=02) 11C2C2"` becomes `"11C1C11D011D0211C2C2"`.
pub fn convert_s(text: &str) -> String {
    let expanded = SF_TOKEN.replace_all(text, |caps: &Captures| expand_field(&caps[1]));
    expanded.chars().filter(|c| !c.is_whitespace()).collect()
}

fn expand_field(attributes: &str) -> String {
    let prefix = format!("{ORDER_SF:02X}");
    attributes
        .split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(_, value)| format!("{prefix}{}", value.trim()))
        .collect()
}

/// Build a replayable frame from emulator buffer lines.
///
/// The optional `data:` prefix is stripped from every line, field tokens are
/// expanded and the hex is decoded. The result is framed as an erase/write
/// with the default WCC and terminated by IAC EOR.
pub fn buffer_to_frame<'a, I>(lines: I) -> CommandResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hex_text = String::new();
    for line in lines {
        let line = line.trim_start();
        let line = line.strip_prefix("data:").unwrap_or(line);
        hex_text.push_str(&convert_s(line));
    }

    let body = hex::decode(&hex_text).map_err(|e| CommandError::InvalidHex {
        payload: hex_text.clone(),
        reason: e.to_string(),
    })?;

    let mut frame = Vec::with_capacity(START_OF_SCREEN.len() + body.len() + IAC_EOR.len());
    frame.extend_from_slice(&START_OF_SCREEN);
    frame.extend_from_slice(&body);
    frame.extend_from_slice(&IAC_EOR);
    Ok(frame)
}

/// Reads screens back from the emulator and drops consecutive duplicates
#[derive(Debug, Default)]
pub struct ScreenSampler {
    last: Option<Vec<u8>>,
}

impl ScreenSampler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep `frame` unless it repeats the previously kept one
    pub fn capture(&mut self, frame: Vec<u8>) -> Option<&[u8]> {
        if self.last.as_deref() == Some(frame.as_slice()) {
            return None;
        }
        self.last = Some(frame);
        self.last.as_deref()
    }

    /// Sample the emulator's current screen and persist it when it changed.
    /// Returns whether a screen was saved.
    pub async fn sample<E: Emulator>(
        &mut self,
        emulator: &mut E,
        recorder: &mut ScreenRecorder,
    ) -> RelayResult<bool> {
        let text = emulator.read_buffer("Ebcdic").await?;
        let frame = buffer_to_frame(text.lines())?;
        if frame.len() <= START_OF_SCREEN.len() + IAC_EOR.len() {
            debug!("Emulator buffer empty, nothing sampled");
            return Ok(false);
        }

        match self.capture(frame) {
            Some(frame) => {
                if let Err(e) = recorder.record(frame) {
                    warn!("Sampled screen not saved: {e}");
                    return Ok(false);
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
