//! Exclusive access to an MBOX file for the length of a run.

use std::fs::{File, TryLockError};
use std::path::{Path, PathBuf};

use humansize::{format_size, BINARY};
use tracing::{debug, info, warn};

use crate::error::{MigrateError, Result};
use crate::parser::mbox::MboxParser;

/// An open MBOX file holding a non-blocking exclusive advisory lock.
///
/// The lock is released by [`Mailbox::close`], or by `Drop` on early exits.
#[derive(Debug)]
pub struct Mailbox {
    file: Option<File>,
    path: PathBuf,
    size: u64,
}

impl Mailbox {
    /// Open `path` and lock it.
    ///
    /// Fails with [`MigrateError::MailboxLocked`] if another process already
    /// holds the lock; never waits.
    pub fn open_locked(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MigrateError::FileNotFound(path.to_path_buf())
            } else {
                MigrateError::io(path, e)
            }
        })?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(MigrateError::MailboxLocked(path.to_path_buf()))
            }
            Err(TryLockError::Error(e)) => return Err(MigrateError::io(path, e)),
        }

        let size = file.metadata().map_err(|e| MigrateError::io(path, e))?.len();
        info!(
            path = %path.display(),
            size = %format_size(size, BINARY),
            "Locked mailbox"
        );

        Ok(Self {
            file: Some(file),
            path: path.to_path_buf(),
            size,
        })
    }

    /// File size at open time, in bytes.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// A streaming parser over the locked handle.
    pub fn parser(&self) -> Result<MboxParser<&File>> {
        let file = self
            .file
            .as_ref()
            .ok_or_else(|| MigrateError::io(&self.path, std::io::ErrorKind::NotConnected.into()))?;
        Ok(MboxParser::new(file, &self.path, self.size))
    }

    /// Release the lock and close the handle.
    pub fn close(mut self) -> Result<()> {
        match self.file.take() {
            Some(file) => {
                file.unlock().map_err(|e| MigrateError::io(&self.path, e))?;
                debug!(path = %self.path.display(), "Unlocked mailbox");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl Drop for Mailbox {
    fn drop(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(e) = file.unlock() {
                warn!(path = %self.path.display(), error = %e, "Failed to unlock mailbox");
            } else {
                debug!(path = %self.path.display(), "Unlocked mailbox on drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut f, contents).unwrap();
        f
    }

    #[test]
    fn test_second_lock_is_refused() {
        let f = mailbox_file(b"From a\nX: 1\n\n");
        let first = Mailbox::open_locked(f.path()).unwrap();
        let err = Mailbox::open_locked(f.path()).unwrap_err();
        assert!(matches!(err, MigrateError::MailboxLocked(_)));
        first.close().unwrap();
    }

    #[test]
    fn test_close_releases_lock() {
        let f = mailbox_file(b"From a\nX: 1\n\n");
        Mailbox::open_locked(f.path()).unwrap().close().unwrap();
        let again = Mailbox::open_locked(f.path()).unwrap();
        assert_eq!(again.size(), 13);
    }

    #[test]
    fn test_drop_releases_lock() {
        let f = mailbox_file(b"From a\nX: 1\n\n");
        {
            let _held = Mailbox::open_locked(f.path()).unwrap();
        }
        assert!(Mailbox::open_locked(f.path()).is_ok());
    }

    #[test]
    fn test_missing_file() {
        let err = Mailbox::open_locked("/no/such/inbox.mbox").unwrap_err();
        assert!(matches!(err, MigrateError::FileNotFound(_)));
    }

    #[test]
    fn test_parser_reads_locked_file() {
        let f = mailbox_file(b"From a\nX: 1\n\nFrom b\nX: 2\n");
        let mailbox = Mailbox::open_locked(f.path()).unwrap();
        let mut count = 0;
        mailbox
            .parser()
            .unwrap()
            .parse(
                &mut |_| {
                    count += 1;
                    true
                },
                None,
            )
            .unwrap();
        assert_eq!(count, 2);
    }
}
