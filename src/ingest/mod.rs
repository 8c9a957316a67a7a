//! Message identity, document mapping and the ingestion loop.

pub mod driver;
pub mod identity;
pub mod mapper;

pub use driver::{ingest, IngestEvent, IngestOptions, IngestReport, Outcome};
