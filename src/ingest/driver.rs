//! Ingestion loop: lock the mailbox, store every message, release the lock.

use std::path::Path;

use tracing::{debug, info, trace, warn};

use crate::config::{IngestConfig, MessageErrorPolicy};
use crate::error::{MigrateError, Result};
use crate::ingest::mapper::{map_message, MapOptions};
use crate::mailbox::Mailbox;
use crate::parser::eml::parse_message;
use crate::parser::mbox::RawEntry;
use crate::store::{CreateOutcome, DocumentStore};

/// How a run ended, as seen by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Every message was added.
    Success,
    /// The run stopped on a fatal error.
    Critical,
    /// The run finished but some messages were conflicts or skipped failures.
    Partial,
}

impl Outcome {
    /// Process exit code for this outcome.
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Critical => 1,
            Self::Partial => 2,
        }
    }
}

/// Per-message notification handed to the caller while the run progresses.
#[derive(Debug)]
pub enum IngestEvent {
    /// Document and attachment were written.
    Added { id: String },
    /// A document with this ID already exists; the message was left alone.
    Conflict { id: String },
    /// The message failed and was skipped under [`MessageErrorPolicy::Skip`].
    Failed { offset: u64, error: MigrateError },
}

/// Options for one run.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestOptions {
    pub map: MapOptions,
    pub on_message_error: MessageErrorPolicy,
}

impl From<&IngestConfig> for IngestOptions {
    fn from(config: &IngestConfig) -> Self {
        Self {
            map: MapOptions::from(config),
            on_message_error: config.on_message_error,
        }
    }
}

/// Counts and final state of a run.
#[derive(Debug)]
pub struct IngestReport {
    pub added: u64,
    pub conflicts: u64,
    pub failed: u64,
    pub outcome: Outcome,
    /// The error that stopped the run, when `outcome` is `Critical`.
    pub error: Option<MigrateError>,
}

/// What happened to a single message.
enum Stored {
    Added(String),
    Conflict(String),
}

/// Ingest every message of the mailbox at `path` into `store`.
///
/// Returns `Err` only when the mailbox cannot be opened or locked. Once the
/// lock is held, every path releases it and returns a report; a fatal error
/// during the loop is carried in [`IngestReport::error`].
///
/// `progress` receives `(bytes_read, total_bytes)`; `events` sees every
/// added, conflicting and skipped message in mailbox order.
pub fn ingest(
    path: impl AsRef<Path>,
    store: &mut dyn DocumentStore,
    options: &IngestOptions,
    progress: Option<&dyn Fn(u64, u64)>,
    events: &mut dyn FnMut(&IngestEvent),
) -> Result<IngestReport> {
    let mailbox = Mailbox::open_locked(path)?;

    let mut added: u64 = 0;
    let mut conflicts: u64 = 0;
    let mut failed: u64 = 0;
    let mut fatal: Option<MigrateError> = None;

    {
        let parsed = mailbox.parser().and_then(|mut parser| {
            parser.parse(
                &mut |entry| match store_entry(entry, &mut *store, &options.map) {
                    Ok(Stored::Added(id)) => {
                        added += 1;
                        events(&IngestEvent::Added { id });
                        true
                    }
                    Ok(Stored::Conflict(id)) => {
                        conflicts += 1;
                        events(&IngestEvent::Conflict { id });
                        true
                    }
                    Err(error) => match options.on_message_error {
                        MessageErrorPolicy::Abort => {
                            fatal = Some(error);
                            false
                        }
                        MessageErrorPolicy::Skip => {
                            warn!(offset = entry.offset, error = %error, "Skipping message");
                            failed += 1;
                            events(&IngestEvent::Failed {
                                offset: entry.offset,
                                error,
                            });
                            true
                        }
                    },
                },
                progress,
            )
        });

        if let Err(e) = parsed {
            fatal.get_or_insert(e);
        }
    }

    if let Err(e) = mailbox.close() {
        warn!(error = %e, "Failed to release mailbox lock");
    }

    let outcome = if fatal.is_some() {
        Outcome::Critical
    } else if conflicts > 0 || failed > 0 {
        Outcome::Partial
    } else {
        Outcome::Success
    };

    info!(added, conflicts, failed, db = store.name(), ?outcome, "Ingestion finished");

    Ok(IngestReport {
        added,
        conflicts,
        failed,
        outcome,
        error: fatal,
    })
}

/// Parse, map and store one mailbox entry.
fn store_entry(
    entry: RawEntry<'_>,
    store: &mut dyn DocumentStore,
    options: &MapOptions,
) -> Result<Stored> {
    if entry.truncated {
        return Err(MigrateError::MalformedMessage {
            offset: entry.offset,
            reason: "message exceeds the maximum size".to_string(),
        });
    }

    let message = parse_message(entry.bytes.to_vec(), entry.offset);
    let document = map_message(&message, options);
    debug!(offset = entry.offset, id = document.id(), "Mapped message");
    trace!(id = document.id(), fields = ?document.fields(), "Document fields");

    match store.create_if_absent(&document)? {
        CreateOutcome::Created(doc_ref) => {
            store.attach(&doc_ref, &document.attachment())?;
            debug!(id = document.id(), rev = %doc_ref.rev, "Saved message");
            Ok(Stored::Added(document.id().to_string()))
        }
        CreateOutcome::Conflict => {
            debug!(id = document.id(), "Message already stored");
            Ok(Stored::Conflict(document.id().to_string()))
        }
    }
}
