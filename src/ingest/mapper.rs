//! Message → document mapping.

use serde_json::{Map, Value};

use crate::config::{DuplicateHeaders, IngestConfig};
use crate::ingest::identity::resolve_id;
use crate::model::document::{Document, DECODE_ERRORS_KEY, ID_KEY};
use crate::model::message::MailMessage;
use crate::parser::header::normalize_header;

/// Options that shape a document.
#[derive(Debug, Clone, Copy)]
pub struct MapOptions {
    pub digest_bytes: usize,
    pub duplicate_headers: DuplicateHeaders,
    pub flag_decode_errors: bool,
}

impl Default for MapOptions {
    fn default() -> Self {
        Self::from(&IngestConfig::default())
    }
}

impl From<&IngestConfig> for MapOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            digest_bytes: config.digest_bytes,
            duplicate_headers: config.duplicate_headers,
            flag_decode_errors: config.flag_decode_errors,
        }
    }
}

/// Build the document for a message.
///
/// Every header is normalized and stored under its own name. The resolved
/// ID goes in last under `_id`, so it overrides a header of that name. The
/// attachment borrows `message.raw()` untouched.
pub fn map_message<'a>(message: &'a MailMessage, options: &MapOptions) -> Document<'a> {
    let mut fields = Map::new();
    let mut failed: Vec<String> = Vec::new();

    for (name, values) in message.headers().grouped() {
        let mut normalized: Vec<Value> = Vec::with_capacity(values.len());
        for raw in values {
            let n = normalize_header(raw);
            if n.decode_failed && !failed.iter().any(|f| f == name) {
                failed.push(name.to_string());
            }
            normalized.push(Value::String(n.value));
        }

        let value = match options.duplicate_headers {
            DuplicateHeaders::All if normalized.len() > 1 => Value::Array(normalized),
            _ => normalized.pop().unwrap_or(Value::Null),
        };
        fields.insert(name.to_string(), value);
    }

    if options.flag_decode_errors && !failed.is_empty() {
        fields.insert(
            DECODE_ERRORS_KEY.to_string(),
            Value::Array(failed.into_iter().map(Value::String).collect()),
        );
    }

    let id = resolve_id(message, options.digest_bytes);
    fields.insert(ID_KEY.to_string(), Value::String(id.clone()));

    Document::new(id, fields, message.raw())
}
