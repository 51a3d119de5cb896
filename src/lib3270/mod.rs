//! IBM 3270 byte vocabulary (TN3270)
//!
//! The relay does not model fields or render screens. It recognises record
//! boundaries, keystroke AIDs and a handful of fixed command sequences, all
//! of which live in [`codes`].

pub mod codes;

pub use codes::*;
