//! Replay navigation state machine
//!
//! Each client keystroke resolves to one [`NavAction`]. The state holds the
//! active screen index and the "cleared" flag that suppresses resending a
//! screen after the client blanked its display.

use std::fmt;
use std::str::FromStr;

use crate::lib3270::codes::AidKey;

/// Symbolic result of one client or operator input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavAction {
    /// Previous screen
    Back,
    /// Next screen
    Forward,
    /// Blank the client display
    Blank,
    /// Jump to a specific screen index
    Goto(usize),
    /// Nothing changes
    NoOp,
}

/// Map an AID to its navigation meaning
pub fn classify(aid: AidKey) -> NavAction {
    match aid {
        AidKey::PF3 | AidKey::PF7 => NavAction::Back,
        AidKey::PF4 | AidKey::PF8 | AidKey::Enter => NavAction::Forward,
        AidKey::Clear => NavAction::Blank,
        _ => NavAction::NoOp,
    }
}

/// One recognized post-AID byte sequence. `None` positions match any byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPressPattern(Vec<Option<u8>>);

impl KeyPressPattern {
    pub fn new(bytes: Vec<Option<u8>>) -> Self {
        Self(bytes)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, data: &[u8]) -> bool {
        data.len() == self.0.len()
            && self
                .0
                .iter()
                .zip(data)
                .all(|(expected, actual)| expected.map_or(true, |b| b == *actual))
    }
}

/// Parses space-separated hex bytes, `??` for a wildcard: `"?? ?? FF"`
impl FromStr for KeyPressPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = s
            .split_whitespace()
            .map(|token| match token {
                "??" => Ok(None),
                hex if hex.len() == 2 => u8::from_str_radix(hex, 16)
                    .map(Some)
                    .map_err(|e| format!("bad byte '{hex}': {e}")),
                other => Err(format!("bad byte '{other}'")),
            })
            .collect::<Result<Vec<_>, _>>()?;
        if bytes.is_empty() {
            return Err("empty pattern".to_string());
        }
        Ok(Self(bytes))
    }
}

impl fmt::Display for KeyPressPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|b| b.map_or_else(|| "??".to_string(), |b| format!("{b:02X}")))
            .collect();
        write!(f, "{}", parts.join(" "))
    }
}

/// Decides whether the bytes following an AID came from a real keystroke
#[derive(Debug, Clone)]
pub struct KeyPressFilter {
    patterns: Vec<KeyPressPattern>,
    window: usize,
}

impl KeyPressFilter {
    pub fn new(patterns: Vec<KeyPressPattern>, window: usize) -> Self {
        Self { patterns, window: window.max(1) }
    }

    /// Number of follow-up bytes read after an AID
    pub fn window(&self) -> usize {
        self.window
    }

    /// An empty table accepts everything
    pub fn accepts(&self, follow_up: &[u8]) -> bool {
        self.patterns.is_empty() || self.patterns.iter().any(|p| p.matches(follow_up))
    }
}

impl Default for KeyPressFilter {
    fn default() -> Self {
        let patterns = ["?? ?? FF", "?? ?? 11", "FF EF"]
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect();
        Self::new(patterns, 3)
    }
}

/// Navigation decision for one AID and its follow-up bytes.
///
/// With the companion emulator active, an AID whose follow-up bytes match no
/// recognized pattern is noise.
pub fn decide(aid: AidKey, follow_up: &[u8], filter: &KeyPressFilter, companion_active: bool) -> NavAction {
    if companion_active && !filter.accepts(follow_up) {
        return NavAction::NoOp;
    }
    classify(aid)
}

/// Per-session replay position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NavigationState {
    index: usize,
    clear: bool,
}

impl NavigationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn is_clear(&self) -> bool {
        self.clear
    }

    /// Index to display for a collection of `len` screens
    pub fn current(&self, len: usize) -> Option<usize> {
        len.checked_sub(1).map(|last| self.index.min(last))
    }

    /// Apply `action` against a collection of `len` screens
    pub fn apply(&mut self, action: NavAction, len: usize) {
        let last = len.saturating_sub(1);
        match action {
            NavAction::Back => {
                self.index = self.index.min(last).saturating_sub(1);
                self.clear = false;
            }
            NavAction::Forward => {
                self.index = (self.index + 1).min(last);
                self.clear = false;
            }
            NavAction::Goto(index) => {
                self.index = index.min(last);
                self.clear = false;
            }
            NavAction::Blank => self.clear = true,
            NavAction::NoOp => {}
        }
    }

    /// Back to the first screen, e.g. after a directory change
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
