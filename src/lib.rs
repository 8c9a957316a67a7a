//! `mbox2couch`: migrate MBOX archives into CouchDB.
//!
//! Each message becomes one document: its headers as normalized fields, its
//! raw bytes as a `message/rfc822` attachment. Document IDs are the
//! `Message-ID` or a content hash, so running the same mailbox twice produces
//! conflicts instead of duplicates.

pub mod config;
pub mod error;
pub mod ingest;
pub mod mailbox;
pub mod model;
pub mod parser;
pub mod store;
