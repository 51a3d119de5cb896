//! TN3270 Protocol Constants and Codes
//!
//! The byte vocabulary the relay needs to segment host output and to
//! interpret client keystrokes: command and order bytes, AID (Attention
//! Identifier) keys, and the fixed byte sequences the replay engine sends.
//!
//! # References
//! - RFC 1576: TN3270 Current Practices
//! - RFC 2355: TN3270 Enhancements
//! - IBM 3270 Data Stream Programmer's Reference (GA23-0059)

use crate::protocol_common::telnet_base::{
    build_negotiation, TelnetCommand, TelnetOption, IAC_EOR,
};

/// 3270 Erase/Write command (SNA form, as sent over tn3270)
pub const CMD_ERASE_WRITE: u8 = 0xF5;

/// 3270 Order Codes
pub const ORDER_SF: u8 = 0x1D;    // Start Field
pub const ORDER_SBA: u8 = 0x11;   // Set Buffer Address
pub const ORDER_IC: u8 = 0x13;    // Insert Cursor

/// Graphic-converted WCC: reset, restore keyboard, reset MDT
pub const WCC_DEFAULT: u8 = 0xC3;

/// Buffer address 0 in 12-bit encoded form
pub const ADDRESS_HOME: [u8; 2] = [0x40, 0x40];

/// Byte that marks a structured screen paint in host output
pub const SCREEN_MARKER: u8 = ORDER_SBA;

/// AID (Attention Identifier) Keys
pub const AID_NO_AID: u8 = 0x60;          // No AID generated

// Function keys
pub const AID_PF1: u8 = 0xF1;
pub const AID_PF2: u8 = 0xF2;
pub const AID_PF3: u8 = 0xF3;
pub const AID_PF4: u8 = 0xF4;
pub const AID_PF5: u8 = 0xF5;
pub const AID_PF6: u8 = 0xF6;
pub const AID_PF7: u8 = 0xF7;
pub const AID_PF8: u8 = 0xF8;
pub const AID_PF9: u8 = 0xF9;
pub const AID_PF10: u8 = 0x7A;
pub const AID_PF11: u8 = 0x7B;
pub const AID_PF12: u8 = 0x7C;
pub const AID_PF13: u8 = 0xC1;
pub const AID_PF14: u8 = 0xC2;
pub const AID_PF15: u8 = 0xC3;
pub const AID_PF16: u8 = 0xC4;
pub const AID_PF17: u8 = 0xC5;
pub const AID_PF18: u8 = 0xC6;
pub const AID_PF19: u8 = 0xC7;
pub const AID_PF20: u8 = 0xC8;
pub const AID_PF21: u8 = 0xC9;
pub const AID_PF22: u8 = 0x4A;
pub const AID_PF23: u8 = 0x4B;
pub const AID_PF24: u8 = 0x4C;

// Program attention keys
pub const AID_PA1: u8 = 0x6C;
pub const AID_PA2: u8 = 0x6E;
pub const AID_PA3: u8 = 0x6B;

// Special keys
pub const AID_CLEAR: u8 = 0x6D;
pub const AID_ENTER: u8 = 0x7D;
pub const AID_SYSREQ: u8 = 0xF0;

/// Prefix written in front of screens assembled from raw buffer contents:
/// Erase/Write with a keyboard-restoring WCC.
pub const START_OF_SCREEN: [u8; 2] = [CMD_ERASE_WRITE, WCC_DEFAULT];

/// Erase/Write of an empty buffer with the cursor at home, closed by IAC EOR.
pub const CLEAR_SCREEN_BUFFER: [u8; 8] = [
    CMD_ERASE_WRITE,
    WCC_DEFAULT,
    ORDER_SBA,
    ADDRESS_HOME[0],
    ADDRESS_HOME[1],
    ORDER_IC,
    IAC_EOR[0],
    IAC_EOR[1],
];

/// Sent once to every replay client: IAC DO TERMINAL-TYPE, IAC WILL TERMINAL-TYPE
pub fn negotiation_preamble() -> [u8; 6] {
    let do_ttype = build_negotiation(TelnetCommand::DO, TelnetOption::TerminalType);
    let will_ttype = build_negotiation(TelnetCommand::WILL, TelnetOption::TerminalType);
    [
        do_ttype[0], do_ttype[1], do_ttype[2],
        will_ttype[0], will_ttype[1], will_ttype[2],
    ]
}

/// Enum representation of AID keys
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AidKey {
    NoAid,
    Enter,
    Clear,
    PA1,
    PA2,
    PA3,
    PF1, PF2, PF3, PF4, PF5, PF6,
    PF7, PF8, PF9, PF10, PF11, PF12,
    PF13, PF14, PF15, PF16, PF17, PF18,
    PF19, PF20, PF21, PF22, PF23, PF24,
    SysReq,
}

impl AidKey {
    /// Convert a byte value to an AidKey enum
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            AID_NO_AID => Some(Self::NoAid),
            AID_ENTER => Some(Self::Enter),
            AID_CLEAR => Some(Self::Clear),
            AID_PA1 => Some(Self::PA1),
            AID_PA2 => Some(Self::PA2),
            AID_PA3 => Some(Self::PA3),
            AID_PF1 => Some(Self::PF1),
            AID_PF2 => Some(Self::PF2),
            AID_PF3 => Some(Self::PF3),
            AID_PF4 => Some(Self::PF4),
            AID_PF5 => Some(Self::PF5),
            AID_PF6 => Some(Self::PF6),
            AID_PF7 => Some(Self::PF7),
            AID_PF8 => Some(Self::PF8),
            AID_PF9 => Some(Self::PF9),
            AID_PF10 => Some(Self::PF10),
            AID_PF11 => Some(Self::PF11),
            AID_PF12 => Some(Self::PF12),
            AID_PF13 => Some(Self::PF13),
            AID_PF14 => Some(Self::PF14),
            AID_PF15 => Some(Self::PF15),
            AID_PF16 => Some(Self::PF16),
            AID_PF17 => Some(Self::PF17),
            AID_PF18 => Some(Self::PF18),
            AID_PF19 => Some(Self::PF19),
            AID_PF20 => Some(Self::PF20),
            AID_PF21 => Some(Self::PF21),
            AID_PF22 => Some(Self::PF22),
            AID_PF23 => Some(Self::PF23),
            AID_PF24 => Some(Self::PF24),
            AID_SYSREQ => Some(Self::SysReq),
            _ => None,
        }
    }

    /// Keys a terminal operator can press. NoAid never starts a keystroke.
    pub fn is_keystroke(self) -> bool {
        self != Self::NoAid
    }
}

/// Decode a byte as an operator keystroke AID
pub fn keystroke_aid(byte: u8) -> Option<AidKey> {
    AidKey::from_u8(byte).filter(|aid| aid.is_keystroke())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aid_key_from_byte() {
        assert_eq!(AidKey::from_u8(AID_ENTER), Some(AidKey::Enter));
        assert_eq!(AidKey::from_u8(AID_PF1), Some(AidKey::PF1));
        assert_eq!(AidKey::from_u8(AID_PF24), Some(AidKey::PF24));
        assert_eq!(AidKey::from_u8(0x00), None);
    }

    #[test]
    fn test_keystroke_aid_skips_no_aid() {
        assert_eq!(keystroke_aid(AID_NO_AID), None);
        assert_eq!(keystroke_aid(AID_CLEAR), Some(AidKey::Clear));
        assert_eq!(keystroke_aid(0xFF), None);
    }

    #[test]
    fn test_fixed_sequences() {
        assert_eq!(negotiation_preamble(), [0xFF, 0xFD, 0x18, 0xFF, 0xFB, 0x18]);
        assert!(CLEAR_SCREEN_BUFFER.ends_with(&IAC_EOR));
        assert_eq!(CLEAR_SCREEN_BUFFER[0], CMD_ERASE_WRITE);
    }
}
