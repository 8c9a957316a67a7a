//! Document store access.
//!
//! Ingestion only talks to [`DocumentStore`], so the database vendor can be
//! swapped without touching the driver.

pub mod couchdb;
pub mod memory;

use crate::error::Result;
use crate::model::document::{Attachment, DocRef, Document};

/// Result of trying to create a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The document was stored; attachments go against this revision.
    Created(DocRef),
    /// A document with the same ID already exists. Nothing was written.
    Conflict,
}

/// The two write operations ingestion needs from a store.
pub trait DocumentStore {
    /// Name of the target database, for reporting.
    fn name(&self) -> &str;

    /// Create `document` under its ID unless one already exists.
    ///
    /// A primary-key conflict is `Ok(CreateOutcome::Conflict)`; any other
    /// failure is an error.
    fn create_if_absent(&mut self, document: &Document<'_>) -> Result<CreateOutcome>;

    /// Attach binary content to a created document.
    fn attach(&mut self, doc: &DocRef, attachment: &Attachment<'_>) -> Result<()>;
}
