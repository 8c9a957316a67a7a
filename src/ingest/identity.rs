//! Document identity: `Message-ID` when present, otherwise a SHAKE128 content hash.

use std::fmt::Write as _;

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128;

use crate::model::message::MailMessage;
use crate::parser::header::normalize_header;

/// Default digest length in bytes; 12 bytes print as 24 hex characters.
pub const DEFAULT_DIGEST_BYTES: usize = 12;

/// Compute the document ID for a message.
///
/// The last `Message-ID` header (matched case-insensitively, so `Message-Id`
/// counts) wins, mirroring how fields are mapped. A blank value counts as
/// absent. Pure: the same bytes always give the same ID, in any mailbox.
pub fn resolve_id(message: &MailMessage, digest_bytes: usize) -> String {
    message
        .headers()
        .get_last("Message-ID")
        .map(|raw| normalize_header(raw).value)
        .filter(|id| !id.trim().is_empty())
        .unwrap_or_else(|| content_hash(message.raw(), digest_bytes))
}

/// SHAKE128 of `bytes`, `digest_bytes` long, as lowercase hex.
pub fn content_hash(bytes: &[u8], digest_bytes: usize) -> String {
    let mut hasher = Shake128::default();
    hasher.update(bytes);
    let mut reader = hasher.finalize_xof();

    let mut digest = vec![0u8; digest_bytes];
    reader.read(&mut digest);

    let mut hex = String::with_capacity(digest_bytes * 2);
    for b in &digest {
        let _ = write!(hex, "{b:02x}");
    }
    hex
}
