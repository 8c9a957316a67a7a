//! In-memory document store, used for `--dry-run` and tests.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::{MigrateError, Result};
use crate::model::document::{Attachment, DocRef, Document};
use crate::store::{CreateOutcome, DocumentStore};

/// An attachment as kept by [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredAttachment {
    pub content_type: String,
    pub data: Vec<u8>,
}

/// A document as kept by [`MemoryStore`].
#[derive(Debug, Clone, Default)]
pub struct StoredDocument {
    pub rev: String,
    pub fields: Map<String, Value>,
    pub attachments: HashMap<String, StoredAttachment>,
}

/// A store that keeps everything in a `HashMap`.
///
/// Revisions follow the CouchDB shape (`1-…`, `2-…`) and attaching against a
/// stale revision fails, so driver bugs show up here too.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    docs: HashMap<String, StoredDocument>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            docs: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&StoredDocument> {
        self.docs.get(id)
    }

    /// All stored IDs, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.docs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

fn revision(generation: u32, id: &str) -> String {
    format!("{generation}-{:032x}", rev_suffix(id, generation))
}

/// Deterministic revision suffix; not a content hash.
fn rev_suffix(id: &str, generation: u32) -> u128 {
    id.bytes().fold(u128::from(generation), |acc, b| {
        acc.rotate_left(5) ^ u128::from(b).wrapping_mul(0x517c_c1b7_2722_0a95)
    })
}

impl DocumentStore for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn create_if_absent(&mut self, document: &Document<'_>) -> Result<CreateOutcome> {
        if self.docs.contains_key(document.id()) {
            return Ok(CreateOutcome::Conflict);
        }
        let rev = revision(1, document.id());
        self.docs.insert(
            document.id().to_string(),
            StoredDocument {
                rev: rev.clone(),
                fields: document.fields().clone(),
                attachments: HashMap::new(),
            },
        );
        debug!(id = document.id(), rev = %rev, "Stored document in memory");
        Ok(CreateOutcome::Created(DocRef {
            id: document.id().to_string(),
            rev,
        }))
    }

    fn attach(&mut self, doc: &DocRef, attachment: &Attachment<'_>) -> Result<()> {
        let stored = self.docs.get_mut(&doc.id).ok_or_else(|| MigrateError::Store {
            operation: "attach",
            id: doc.id.clone(),
            status: 404,
            reason: "missing".to_string(),
        })?;
        if stored.rev != doc.rev {
            return Err(MigrateError::Store {
                operation: "attach",
                id: doc.id.clone(),
                status: 409,
                reason: format!("revision {} is not current", doc.rev),
            });
        }

        let generation: u32 = stored
            .rev
            .split('-')
            .next()
            .and_then(|g| g.parse().ok())
            .unwrap_or(1);
        stored.rev = revision(generation + 1, &doc.id);
        stored.attachments.insert(
            attachment.filename.clone(),
            StoredAttachment {
                content_type: attachment.content_type.to_string(),
                data: attachment.data.to_vec(),
            },
        );
        Ok(())
    }
}
