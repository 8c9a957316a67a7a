//! Email parsing: streaming MBOX splitter, single-message parser, and header decoding.

pub mod eml;
pub mod header;
pub mod mbox;
