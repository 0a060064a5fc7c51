//! Key/value persistence for chapter lists and chapter text.
//!
//! Entries live under `<cache_dir>/<sha256(document)>/` so document names never
//! have to be valid file names: `chapters.json` holds the chapter list and
//! `chapter_<n>.txt` holds the text of chapter `n`. Entries are never evicted.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const INDEX_FILE: &str = "chapters.json";

static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Which entry of a document a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreSlot {
    Index,
    Chapter(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub document_id: String,
    pub slot: StoreSlot,
}

impl StoreKey {
    pub fn index(document_id: &str) -> Self {
        Self {
            document_id: document_id.to_string(),
            slot: StoreSlot::Index,
        }
    }

    pub fn chapter(document_id: &str, index: usize) -> Self {
        Self {
            document_id: document_id.to_string(),
            slot: StoreSlot::Chapter(index),
        }
    }

    fn file_name(&self) -> String {
        match self.slot {
            StoreSlot::Index => INDEX_FILE.to_string(),
            StoreSlot::Chapter(index) => format!("chapter_{index}.txt"),
        }
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.slot {
            StoreSlot::Index => write!(f, "{}/index", self.document_id),
            StoreSlot::Chapter(index) => write!(f, "{}/{index}", self.document_id),
        }
    }
}

/// Storage shared by every fetch of a session.
///
/// Implementations must keep writes key-scoped: writing one key never
/// disturbs another, even when several workers write at once.
pub trait ContentStore: Send + Sync {
    fn exists(&self, key: &StoreKey) -> bool;

    /// `Ok(None)` when the key has never been written.
    fn read(&self, key: &StoreKey) -> Result<Option<Vec<u8>>>;

    fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<()>;
}

/// Store backed by one directory per document on disk.
#[derive(Debug, Clone)]
pub struct FsContentStore {
    root: PathBuf,
}

impl FsContentStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn document_dir(&self, document_id: &str) -> PathBuf {
        let mut hasher = Sha256::new();
        hasher.update(document_id.as_bytes());
        let hash = format!("{:x}", hasher.finalize());
        self.root.join(hash)
    }

    pub fn entry_path(&self, key: &StoreKey) -> PathBuf {
        self.document_dir(&key.document_id).join(key.file_name())
    }
}

impl ContentStore for FsContentStore {
    fn exists(&self, key: &StoreKey) -> bool {
        self.entry_path(key).is_file()
    }

    fn read(&self, key: &StoreKey) -> Result<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to read {}", path.display())),
        }
    }

    fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<()> {
        let path = self.entry_path(key);
        let dir = self.document_dir(&key.document_id);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        // Readers only ever see the old entry or the complete new one.
        let tmp = dir.join(format!(
            ".{}.tmp-{}-{}",
            key.file_name(),
            std::process::id(),
            TMP_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        fs::write(&tmp, bytes).with_context(|| format!("failed to write {}", tmp.display()))?;
        if let Err(err) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(err)
                .with_context(|| format!("failed to move entry into {}", path.display()));
        }
        debug!(key = %key, bytes = bytes.len(), "Persisted store entry");
        Ok(())
    }
}

/// Process-local store, used where nothing should touch the disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<StoreKey, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(self, key: StoreKey, bytes: impl Into<Vec<u8>>) -> Self {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, bytes.into());
        self
    }

    pub fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ContentStore for MemoryStore {
    fn exists(&self, key: &StoreKey) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(key)
    }

    fn read(&self, key: &StoreKey) -> Result<Option<Vec<u8>>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned())
    }

    fn write(&self, key: &StoreKey, bytes: &[u8]) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone(), bytes.to_vec());
        Ok(())
    }
}
