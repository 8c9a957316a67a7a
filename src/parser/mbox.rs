//! Streaming MBOX parser.
//!
//! Reads MBOX input line-by-line through a 1 MB buffer and hands out one
//! message at a time. Never loads the entire file into memory. Tolerant of
//! malformed input.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{MigrateError, Result};

/// Size of the internal read buffer (1 MB for fast sequential reads on modern SSDs).
const READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Default maximum message size in bytes (256 MB).
pub const MAX_MESSAGE_SIZE: usize = 256 * 1024 * 1024;

/// Report progress every 4 MB.
const PROGRESS_INTERVAL: u64 = 4 * 1024 * 1024;

/// One mailbox entry as handed to the message callback.
#[derive(Debug, Clone, Copy)]
pub struct RawEntry<'a> {
    /// Byte offset of the `From ` envelope line.
    pub offset: u64,
    /// The message without its envelope line and trailing separator line.
    pub bytes: &'a [u8],
    /// `true` if the message exceeded the size limit and `bytes` is cut short.
    pub truncated: bool,
}

/// Streaming MBOX parser.
///
/// Reads through the input sequentially, invoking a caller-supplied callback
/// for every message it finds. The parser is tolerant of:
///
/// - Mixed `\n` and `\r\n` line endings
/// - `From ` lines not preceded by a blank line (logs a warning)
/// - Content before the first `From ` line (skipped with a warning)
/// - Truncated messages at EOF
/// - NUL bytes and other binary content in the body
/// - UTF-8 BOM at the start of the file
///
/// `>From ` lines are left as they are; the bytes handed out are the bytes
/// stored in the file.
pub struct MboxParser<R: Read> {
    reader: BufReader<R>,
    path: PathBuf,
    total_size: u64,
    max_message_size: usize,
}

impl MboxParser<File> {
    /// Open an MBOX file for parsing.
    ///
    /// Verifies that the file exists and is readable, but does NOT validate
    /// that it is actually an MBOX.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MigrateError::FileNotFound(path.to_path_buf())
            } else {
                MigrateError::io(path, e)
            }
        })?;
        let total_size = file.metadata().map_err(|e| MigrateError::io(path, e))?.len();
        Ok(Self::new(file, path, total_size))
    }
}

impl<R: Read> MboxParser<R> {
    /// Wrap an already opened reader. `path` is only used in error messages.
    pub fn new(reader: R, path: impl Into<PathBuf>, total_size: u64) -> Self {
        Self {
            reader: BufReader::with_capacity(READ_BUFFER_SIZE, reader),
            path: path.into(),
            total_size,
            max_message_size: MAX_MESSAGE_SIZE,
        }
    }

    /// Override the per-message size limit.
    pub fn with_max_message_size(mut self, max: usize) -> Self {
        self.max_message_size = max;
        self
    }

    /// Parse the whole input, calling `message_callback` for each message found.
    ///
    /// The callback returns `true` to continue or `false` to stop early.
    /// `progress_callback` receives `(bytes_read, total_size)`.
    ///
    /// Returns the number of messages handed to the callback.
    pub fn parse(
        &mut self,
        message_callback: &mut dyn FnMut(RawEntry<'_>) -> bool,
        progress_callback: Option<&dyn Fn(u64, u64)>,
    ) -> Result<u64> {
        let mut count: u64 = 0;
        let mut current_offset: u64 = 0;
        let mut message_buf: Vec<u8> = Vec::with_capacity(64 * 1024);
        let mut message_start: u64 = 0;
        let mut in_message = false;
        let mut truncated = false;
        let mut prev_line_was_empty = true;
        let mut first_line = true;
        let mut at_line_start = true;
        let mut last_progress: u64 = 0;

        // Reusable line buffer
        let mut line_buf: Vec<u8> = Vec::with_capacity(4096);

        loop {
            line_buf.clear();
            let line_len = {
                let buf = self
                    .reader
                    .fill_buf()
                    .map_err(|e| MigrateError::io(&self.path, e))?;
                if buf.is_empty() {
                    break; // EOF
                }
                let consume_len = match memchr_newline(buf) {
                    Some(pos) => pos + 1,
                    None => buf.len(),
                };
                line_buf.extend_from_slice(&buf[..consume_len]);
                self.reader.consume(consume_len);
                consume_len
            };

            // A line longer than the read buffer arrives in pieces; only a
            // piece that starts a line can be a separator.
            let is_from_line = at_line_start && is_mbox_separator(&line_buf, first_line);

            if is_from_line {
                if in_message {
                    if !prev_line_was_empty {
                        warn!(
                            offset = current_offset,
                            "Found 'From ' separator without preceding blank line"
                        );
                    }
                    let entry = RawEntry {
                        offset: message_start,
                        bytes: message_bytes(&message_buf),
                        truncated,
                    };
                    count += 1;
                    if !message_callback(entry) {
                        return Ok(count);
                    }
                }
                in_message = true;
                truncated = false;
                message_start = current_offset;
                message_buf.clear();
                message_buf.extend_from_slice(&line_buf);
            } else if !in_message {
                if first_line || !is_blank_line(&line_buf) {
                    warn!(offset = current_offset, "Skipping content before first 'From ' line");
                }
            } else if !truncated && message_buf.len() + line_buf.len() <= self.max_message_size {
                message_buf.extend_from_slice(&line_buf);
            } else if !truncated {
                warn!(
                    offset = message_start,
                    max_size = self.max_message_size,
                    "Message exceeds maximum size, truncating"
                );
                truncated = true;
            }

            prev_line_was_empty = is_blank_line(&line_buf);
            at_line_start = line_buf.last() == Some(&b'\n');
            first_line = false;
            current_offset += line_len as u64;

            if let Some(cb) = progress_callback {
                if current_offset - last_progress >= PROGRESS_INTERVAL {
                    cb(current_offset, self.total_size);
                    last_progress = current_offset;
                }
            }
        }

        // Flush last message
        if in_message {
            let entry = RawEntry {
                offset: message_start,
                bytes: message_bytes(&message_buf),
                truncated,
            };
            count += 1;
            message_callback(entry);
        }

        if let Some(cb) = progress_callback {
            cb(current_offset, self.total_size);
        }

        Ok(count)
    }
}

/// Fast newline search (equivalent to memchr for `\n`).
#[inline]
fn memchr_newline(buf: &[u8]) -> Option<usize> {
    buf.iter().position(|&b| b == b'\n')
}

/// Check whether a line is an MBOX separator (`From ` at the start).
///
/// A UTF-8 BOM is only tolerated on the very first line of the file.
fn is_mbox_separator(line: &[u8], first_line: bool) -> bool {
    let line = if first_line {
        line.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(line)
    } else {
        line
    };
    line.starts_with(b"From ")
}

/// Check whether a line is blank (empty or only whitespace / CR / LF).
fn is_blank_line(line: &[u8]) -> bool {
    line.iter()
        .all(|&b| b == b'\n' || b == b'\r' || b == b' ' || b == b'\t')
}

/// Strip the envelope line and the trailing separator line from an entry.
fn message_bytes(entry: &[u8]) -> &[u8] {
    let body = match memchr_newline(entry) {
        Some(pos) => &entry[pos + 1..],
        None => &[],
    };
    if body.ends_with(b"\n\r\n") {
        &body[..body.len() - 2]
    } else if body.ends_with(b"\n\n") {
        &body[..body.len() - 1]
    } else {
        body
    }
}
