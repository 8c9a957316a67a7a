//! RFC 5322 header handling: unfolding and RFC 2047 encoded-word decoding.

use base64::alphabet;
use base64::engine::general_purpose::GeneralPurpose;
use base64::engine::{DecodePaddingMode, GeneralPurposeConfig};
use base64::Engine;
use tracing::{debug, warn};

use crate::error::{MigrateError, Result};
use crate::model::message::Headers;

/// Base64 engine for B-encoded words; many mailers drop the padding.
const B_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A header value after encoded-word decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    /// Decoded Unicode text, or the raw value when decoding failed.
    pub value: String,
    /// `true` if an encoded-word could not be decoded and `value` is the raw input.
    pub decode_failed: bool,
}

/// Decode a header value into canonical Unicode text.
///
/// Never fails: if any encoded-word is malformed the raw value is returned
/// verbatim and flagged, so one bad header cannot stop a message.
pub fn normalize_header(raw: &str) -> Normalized {
    match decode_encoded_words(raw) {
        Ok(value) => Normalized {
            value,
            decode_failed: false,
        },
        Err(e) => {
            debug!(error = %e, "Keeping raw header value");
            Normalized {
                value: raw.to_string(),
                decode_failed: true,
            }
        }
    }
}

/// Decode raw header bytes to a string.
///
/// Tries UTF-8 first, then falls back to Windows-1252 (which accepts every byte).
pub fn decode_header_bytes(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Unfold a header block into an ordered list of `(name, value)` pairs.
///
/// Continuation lines (starting with space or tab) are joined to the previous
/// header with their line break removed. Names keep their original case.
pub fn unfold_headers(text: &str) -> Headers {
    let mut result: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            match result.last_mut() {
                Some(last) => last.1.push_str(line),
                None => debug!(line, "Continuation line before any header"),
            }
        } else if let Some(colon_pos) = line.find(':') {
            let name = line[..colon_pos].trim().to_string();
            let value = line[colon_pos + 1..].to_string();
            result.push((name, value));
        } else if !line.trim().is_empty() {
            debug!(line, "Skipping header line without a colon");
        }
    }

    result
        .into_iter()
        .map(|(name, value)| (name, value.trim().to_string()))
        .collect()
}

/// Decode RFC 2047 encoded-words in a header value.
///
/// Example: `"=?UTF-8?B?SG9sYQ==?= =?UTF-8?B?IG11bmRv?="` → `"Hola mundo"`
///
/// Text that only looks like the start of an encoded-word (`=?` with no
/// well-formed word behind it) is kept literally. A well-formed word that
/// cannot be decoded is an error.
pub fn decode_encoded_words(input: &str) -> Result<String> {
    let mut result = String::with_capacity(input.len());
    let mut remaining = input;
    let mut last_was_encoded = false;

    while let Some(start) = remaining.find("=?") {
        let before = &remaining[..start];
        // Whitespace between two encoded words is not part of the text (RFC 2047 §6.2)
        if !last_was_encoded || !before.trim().is_empty() {
            result.push_str(before);
        }

        let after_start = &remaining[start + 2..];

        match split_encoded_word(after_start) {
            Some(word) => {
                result.push_str(&word.decode()?);
                remaining = &after_start[word.consumed..];
                last_was_encoded = true;
            }
            None => {
                result.push_str("=?");
                remaining = after_start;
                last_was_encoded = false;
            }
        }
    }

    result.push_str(remaining);
    Ok(result)
}

struct EncodedWord<'a> {
    charset: &'a str,
    encoding: &'a str,
    text: &'a str,
    consumed: usize, // bytes consumed from the string *after* the initial "=?"
}

/// Split `charset?encoding?encoded_text?=` off the front of `s`.
fn split_encoded_word(s: &str) -> Option<EncodedWord<'_>> {
    let first_q = s.find('?')?;
    let charset = &s[..first_q];

    let rest = &s[first_q + 1..];
    let second_q = rest.find('?')?;
    let encoding = &rest[..second_q];

    let rest2 = &rest[second_q + 1..];
    let end = rest2.find("?=")?;
    let text = &rest2[..end];

    let is_token = |t: &str| !t.is_empty() && !t.contains(char::is_whitespace);
    if !is_token(charset) || !is_token(encoding) || text.contains(char::is_whitespace) {
        return None;
    }

    Some(EncodedWord {
        charset,
        encoding,
        text,
        consumed: first_q + 1 + second_q + 1 + end + 2,
    })
}

impl EncodedWord<'_> {
    fn decode(&self) -> Result<String> {
        let bytes = match self.encoding {
            "B" | "b" => B_ENGINE.decode(self.text).map_err(|e| {
                MigrateError::HeaderDecode(format!("invalid base64 in encoded-word: {e}"))
            })?,
            "Q" | "q" => decode_q_encoding(self.text)?,
            other => {
                return Err(MigrateError::HeaderDecode(format!(
                    "unknown encoded-word encoding '{other}'"
                )))
            }
        };
        decode_charset(self.charset, &bytes)
    }
}

/// Decode Q-encoding (RFC 2047): underscores → spaces, `=XX` → byte.
fn decode_q_encoding(input: &str) -> Result<Vec<u8>> {
    let mut result = Vec::with_capacity(input.len());
    let bytes = input.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'_' => {
                result.push(b' ');
                i += 1;
            }
            b'=' => {
                let byte = bytes
                    .get(i + 1..i + 3)
                    .and_then(|hex| std::str::from_utf8(hex).ok())
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok())
                    .ok_or_else(|| {
                        MigrateError::HeaderDecode(format!("invalid Q-encoding escape in '{input}'"))
                    })?;
                result.push(byte);
                i += 3;
            }
            b => {
                result.push(b);
                i += 1;
            }
        }
    }
    Ok(result)
}

/// Decode bytes using a named charset.
///
/// An RFC 2231 language suffix (`UTF-8*en`) is ignored. Unknown charsets are
/// an error; malformed bytes in a known charset become U+FFFD.
fn decode_charset(charset: &str, bytes: &[u8]) -> Result<String> {
    let label = charset.split('*').next().unwrap_or(charset);
    let encoding = encoding_rs::Encoding::for_label(label.as_bytes())
        .ok_or_else(|| MigrateError::HeaderDecode(format!("unknown charset '{charset}'")))?;

    let (decoded, had_errors) = encoding.decode_without_bom_handling(bytes);
    if had_errors {
        warn!(charset, "Malformed bytes in encoded-word, replaced");
    }
    Ok(decoded.into_owned())
}
