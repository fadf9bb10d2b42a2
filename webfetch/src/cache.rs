//! Content-addressed disk cache for extracted page text.
//!
//! One file per canonical URL, named by the hex SHA-256 of the key, holding
//! the UTF-8 extracted text. Writes are atomic (temp + rename). Reads never
//! raise: a missing, unreadable, or corrupted file is a miss. Entries are
//! durable; pruning is an operator concern.

use std::fs;
use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Durable key→text store. A disabled cache is a unit value whose
/// operations are no-ops.
#[derive(Debug, Clone)]
pub struct ContentCache {
    dir: Option<PathBuf>,
}

impl ContentCache {
    /// A cache that stores nothing and returns nothing.
    #[must_use]
    pub fn disabled() -> Self {
        Self { dir: None }
    }

    /// Open (and create) a cache directory. If the directory cannot be
    /// created the cache degrades to disabled with a logged warning.
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        if let Err(e) = fs::create_dir_all(&dir) {
            tracing::warn!(dir = %dir.display(), error = %e, "cache directory unusable, disabling cache");
            return Self::disabled();
        }
        Self { dir: Some(dir) }
    }

    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.dir.is_some()
    }

    /// Look up the text stored for a key. Read errors are a miss.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        let path = self.entry_path(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Some(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                tracing::debug!(key, error = %e, "cache read failed, treating as miss");
                None
            }
        }
    }

    /// Store text under a key. Failures are logged and swallowed; the fetch
    /// that produced the text already succeeded.
    pub fn put(&self, key: &str, text: &str) {
        let Some(path) = self.entry_path(key) else {
            return;
        };

        let temp_path = path.with_extension("tmp");
        let result = fs::write(&temp_path, text).and_then(|()| fs::rename(&temp_path, &path));
        if let Err(e) = result {
            tracing::warn!(key, error = %e, "cache write failed");
            let _ = fs::remove_file(&temp_path);
        }
    }

    fn entry_path(&self, key: &str) -> Option<PathBuf> {
        let dir = self.dir.as_ref()?;
        Some(dir.join(cache_key(key)))
    }
}

/// Hex SHA-256 of a cache key (the canonical URL).
#[must_use]
pub fn cache_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}
