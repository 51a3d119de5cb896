//! Protocol vocabulary shared across the relay
//!
//! - [`telnet_base`] - telnet command and option bytes, IAC EOR helpers

pub mod telnet_base;

pub use telnet_base::{
    build_negotiation, ends_with_eor, find_eor, TelnetCommand, TelnetOption, IAC_EOR,
};
