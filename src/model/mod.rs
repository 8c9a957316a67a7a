//! Core data model: messages read from the mailbox and the documents built from them.

pub mod document;
pub mod message;
