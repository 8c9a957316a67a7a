//! The document written to the store for each message.

use serde_json::{Map, Value};

/// Reserved field holding the document identifier.
pub const ID_KEY: &str = "_id";

/// Field listing headers whose encoded-words could not be decoded.
///
/// The colon keeps it out of the header namespace.
pub const DECODE_ERRORS_KEY: &str = "mbox2couch:decode_errors";

/// Media type of the raw message attachment.
pub const MESSAGE_CONTENT_TYPE: &str = "message/rfc822";

/// Characters trimmed from both ends of an ID to build the attachment name.
const FILENAME_TRIM: &[char] = &['<', '>', '\\', '/', '|'];

/// A document ready to be created in the store.
///
/// Borrows the raw message so the attachment is the original bytes, never a
/// re-serialization of the normalized fields.
#[derive(Debug, Clone)]
pub struct Document<'a> {
    id: String,
    fields: Map<String, Value>,
    raw: &'a [u8],
}

impl<'a> Document<'a> {
    pub fn new(id: String, fields: Map<String, Value>, raw: &'a [u8]) -> Self {
        Self { id, fields, raw }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// All fields, including the reserved `_id`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// String value of a field, if present and a string.
    pub fn field_str(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    /// The raw message as an `.eml` attachment.
    pub fn attachment(&self) -> Attachment<'a> {
        Attachment {
            filename: attachment_filename(&self.id),
            content_type: MESSAGE_CONTENT_TYPE,
            data: self.raw,
        }
    }
}

/// Binary attachment for a created document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment<'a> {
    pub filename: String,
    pub content_type: &'static str,
    pub data: &'a [u8],
}

/// Reference to a stored document revision, returned by a successful create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocRef {
    pub id: String,
    pub rev: String,
}

/// Build the attachment filename for a document ID.
///
/// `<abc@example.com>` becomes `abc@example.com.eml`. Only enclosing
/// characters are removed; the store percent-encodes the rest.
pub fn attachment_filename(id: &str) -> String {
    let stem = id.trim().trim_matches(FILENAME_TRIM);
    format!("{stem}.eml")
}
