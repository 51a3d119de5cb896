//! Telnet vocabulary shared by the record and replay paths
//!
//! The relay never negotiates options itself. It only needs the byte values
//! that delimit tn3270 records (IAC EOR) and the fixed handshake sent to
//! replay clients.

/// Telnet command codes (RFC 854, RFC 885 for EOR)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetCommand {
    /// Interpret As Command - 255 (0xFF)
    IAC = 255,
    /// Do - 253 (0xFD)
    DO = 253,
    /// Will - 251 (0xFB)
    WILL = 251,
    /// End Of Record - 239 (0xEF)
    EOR = 239,
}

/// Telnet options the relay refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelnetOption {
    /// Terminal Type - 24
    TerminalType = 24,
}

/// The two-byte marker closing every tn3270 record
pub const IAC_EOR: [u8; 2] = [TelnetCommand::IAC as u8, TelnetCommand::EOR as u8];

/// Build a telnet negotiation sequence
///
/// ```
/// use tn3270_relay::protocol_common::telnet_base::{build_negotiation, TelnetCommand, TelnetOption};
///
/// // "IAC DO TERMINAL-TYPE"
/// let seq = build_negotiation(TelnetCommand::DO, TelnetOption::TerminalType);
/// assert_eq!(seq, [255, 253, 24]);
/// ```
pub fn build_negotiation(command: TelnetCommand, option: TelnetOption) -> [u8; 3] {
    [TelnetCommand::IAC as u8, command as u8, option as u8]
}

/// Returns true when `data` ends with IAC EOR
pub fn ends_with_eor(data: &[u8]) -> bool {
    data.ends_with(&IAC_EOR)
}

/// Position of the first IAC EOR marker in `data`
pub fn find_eor(data: &[u8]) -> Option<usize> {
    data.windows(IAC_EOR.len()).position(|w| w == IAC_EOR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_negotiation_bytes() {
        assert_eq!(IAC_EOR, [0xFF, 0xEF]);
        assert_eq!(build_negotiation(TelnetCommand::WILL, TelnetOption::TerminalType), [0xFF, 0xFB, 0x18]);
    }

    #[test]
    fn test_find_eor() {
        assert_eq!(find_eor(b"ab\xff\xefcd"), Some(2));
        assert_eq!(find_eor(b"ab\xffcd"), None);
        assert_eq!(find_eor(b""), None);
        assert!(ends_with_eor(b"x\xff\xef"));
        assert!(!ends_with_eor(b"\xff"));
    }
}
