//! Pluggable credential storage.
//!
//! The [`CredentialStore`] trait abstracts over where exported credential
//! bytes are kept. The bytes are opaque; see
//! [`crate::SessionManager::export_credential`].
//!
//! Two built-in stores are provided:
//! * [`FileStore`]: one file on disk.
//! * [`InMemoryStore`]: nothing survives the process.

use std::io;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

// ─── Trait ────────────────────────────────────────────────────────────────────

/// Where and how exported credentials are persisted.
pub trait CredentialStore: Send + Sync {
    fn save(&self, blob: &[u8]) -> io::Result<()>;

    /// `None` if nothing was saved.
    fn load(&self) -> io::Result<Option<Vec<u8>>>;

    /// Remove the stored credential (e.g. on logout).
    fn delete(&self) -> io::Result<()>;

    /// Human-readable name of this store (for log messages).
    fn name(&self) -> &str;
}

// ─── FileStore ────────────────────────────────────────────────────────────────

/// Stores the credential in a single file, replaced atomically on save.
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialStore for FileStore {
    fn save(&self, blob: &[u8]) -> io::Result<()> {
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, blob)?;
        std::fs::rename(&tmp, &self.path)
    }

    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn delete(&self) -> io::Result<()> {
        match std::fs::remove_file(&self.path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn name(&self) -> &str { "file" }
}

// ─── InMemoryStore ────────────────────────────────────────────────────────────

/// An ephemeral store. Useful for tests and for bots that always pair fresh.
#[derive(Default)]
pub struct InMemoryStore {
    data: Mutex<Option<Vec<u8>>>,
}

impl InMemoryStore {
    pub fn new() -> Self { Self::default() }
}

impl CredentialStore for InMemoryStore {
    fn save(&self, blob: &[u8]) -> io::Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = Some(blob.to_vec());
        Ok(())
    }

    fn load(&self) -> io::Result<Option<Vec<u8>>> {
        Ok(self.data.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    fn delete(&self) -> io::Result<()> {
        *self.data.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }

    fn name(&self) -> &str { "in-memory" }
}
