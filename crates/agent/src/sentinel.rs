//! # Sentinel Store
//!
//! A presence-only marker on durable local storage. Existence means
//! "role configuration has already been applied on this node"; the
//! file's content is irrelevant.
//!
//! The sentinel is the idempotency gate of the role coordinator:
//! it is created exactly once, strictly *after* the local service has
//! been started and enabled, and read on every coordination attempt.
//! Creating it before the service is confirmed up would silently and
//! permanently lose the node's configuration on failure, so callers
//! must preserve that ordering.

use std::io;
use std::path::{Path, PathBuf};

/// Default sentinel location.
pub const DEFAULT_SENTINEL_PATH: &str = "/usr/local/.meshboot_configured";

/// Durable idempotency marker. Carries no semantic payload.
#[derive(Debug, Clone)]
pub struct SentinelStore {
    path: PathBuf,
}

impl SentinelStore {
    /// A store at the given marker path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A store at [`DEFAULT_SENTINEL_PATH`].
    pub fn system() -> Self {
        Self::new(DEFAULT_SENTINEL_PATH)
    }

    /// The marker path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether role configuration has already completed on this node.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Record that role configuration has completed.
    ///
    /// Idempotent: recreating an existing sentinel is a no-op, not an
    /// error. Parent directories are created on demand.
    pub fn create(&self) -> io::Result<()> {
        if self.exists() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, b"")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_then_created() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SentinelStore::new(dir.path().join("configured"));
        assert!(!store.exists());
        store.create().expect("create");
        assert!(store.exists());
    }

    #[test]
    fn test_create_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SentinelStore::new(dir.path().join("configured"));
        store.create().expect("first create");
        store.create().expect("second create is a no-op");
        assert!(store.exists());
    }

    #[test]
    fn test_create_makes_parent_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SentinelStore::new(dir.path().join("a/b/configured"));
        store.create().expect("create with parents");
        assert!(store.exists());
    }
}
