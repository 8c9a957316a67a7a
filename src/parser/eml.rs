//! Parser for individual RFC 5322 messages (an mbox entry without its envelope line).

use crate::model::message::MailMessage;
use crate::parser::header;

/// Parse the raw bytes of one message into a [`MailMessage`].
///
/// Only the header block is interpreted; the bytes are kept untouched so the
/// stored attachment is an exact copy. `offset` is the entry's position in
/// the mailbox and only serves diagnostics. An empty entry is a message
/// with no headers.
pub fn parse_message(raw: Vec<u8>, offset: u64) -> MailMessage {
    let header_end = find_header_end(&raw).unwrap_or(raw.len());
    let text = header::decode_header_bytes(&raw[..header_end]);
    let headers = header::unfold_headers(&text);

    MailMessage::new(offset, headers, raw)
}

/// Find the byte offset where headers end (position of the first blank line).
fn find_header_end(data: &[u8]) -> Option<usize> {
    // A message may start directly with the blank line (no headers at all)
    if data.starts_with(b"\n") || data.starts_with(b"\r\n") {
        return Some(0);
    }
    // Look for \n\n or \r\n\r\n
    for i in 0..data.len().saturating_sub(1) {
        if data[i] == b'\n' && data[i + 1] == b'\n' {
            return Some(i);
        }
        if i + 3 < data.len()
            && data[i] == b'\r'
            && data[i + 1] == b'\n'
            && data[i + 2] == b'\r'
            && data[i + 3] == b'\n'
        {
            return Some(i);
        }
    }
    None
}
