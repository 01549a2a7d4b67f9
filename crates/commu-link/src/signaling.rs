//! Transient key-value storage for rendezvous data.
//!
//! A host publishes `offer_<id>` and `ice_<id>`, a guest answers with
//! `answer_<id>`. Entries live for [`SIGNAL_TTL`] unless cleared earlier.

use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{LinkError, LinkResult};

/// How long a signaling entry stays valid.
pub const SIGNAL_TTL: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Offer,
    Answer,
    Ice,
}

impl SignalKind {
    pub const ALL: [SignalKind; 3] = [Self::Offer, Self::Answer, Self::Ice];

    /// Storage key for this kind of entry under `id`.
    pub fn key(self, id: &str) -> String {
        let prefix = match self {
            Self::Offer => "offer",
            Self::Answer => "answer",
            Self::Ice => "ice",
        };
        format!("{prefix}_{id}")
    }
}

/// Key-value store shared by the two peers of a rendezvous.
pub trait SignalingStore: Send + Sync + fmt::Debug {
    fn put(&self, key: &str, value: &str, ttl: Duration) -> LinkResult<()>;

    /// Returns the value, or `None` when absent or expired.
    fn get(&self, key: &str) -> LinkResult<Option<String>>;

    fn remove(&self, key: &str) -> LinkResult<()>;

    /// Removes every entry belonging to `id`.
    fn clear(&self, id: &str) -> LinkResult<()> {
        for kind in SignalKind::ALL {
            self.remove(&kind.key(id))?;
        }
        Ok(())
    }
}

fn validate_key(key: &str) -> LinkResult<()> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(LinkError::signaling(format!("invalid key {key:?}")))
    }
}

#[derive(Debug)]
struct MemoryEntry {
    value: String,
    expires_at: Instant,
}

/// In-memory store for peers living in the same process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, MemoryEntry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SignalingStore for MemoryStore {
    fn put(&self, key: &str, value: &str, ttl: Duration) -> LinkResult<()> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.insert(
            key.to_string(),
            MemoryEntry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    fn get(&self, key: &str) -> LinkResult<Option<String>> {
        validate_key(key)?;
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        match entries.get(key) {
            Some(entry) if entry.expires_at > now => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    fn remove(&self, key: &str) -> LinkResult<()> {
        validate_key(key)?;
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(key);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct FileEntry {
    value: String,
    expires_at: DateTime<Utc>,
}

/// Directory-backed store: one JSON file per key.
///
/// Lets two processes on the same machine rendezvous without a server.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens the store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> LinkResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> LinkResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl SignalingStore for FileStore {
    fn put(&self, key: &str, value: &str, ttl: Duration) -> LinkResult<()> {
        let path = self.path_for(key)?;
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| LinkError::signaling(format!("ttl out of range: {e}")))?;
        let entry = FileEntry {
            value: value.to_string(),
            expires_at: Utc::now() + ttl,
        };

        // Write then rename so a reader never sees a half-written entry.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_vec(&entry)?)?;
        fs::rename(&tmp, &path)?;
        debug!(key, path = %path.display(), "Stored signaling entry");
        Ok(())
    }

    fn get(&self, key: &str) -> LinkResult<Option<String>> {
        let path = self.path_for(key)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let entry: FileEntry = match serde_json::from_slice(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(key, error = %e, "Discarding unreadable signaling entry");
                self.remove(key)?;
                return Ok(None);
            }
        };

        if entry.expires_at <= Utc::now() {
            debug!(key, "Signaling entry expired");
            self.remove(key)?;
            return Ok(None);
        }
        Ok(Some(entry.value))
    }

    fn remove(&self, key: &str) -> LinkResult<()> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn keys() {
        assert_eq!(SignalKind::Offer.key("ABC123"), "offer_ABC123");
        assert_eq!(SignalKind::Ice.key("ABC123"), "ice_ABC123");
    }

    #[test]
    fn memory_put_get_remove() {
        let store = MemoryStore::new();
        store.put("offer_ABC123", "hello", SIGNAL_TTL).unwrap();
        assert_eq!(store.get("offer_ABC123").unwrap().as_deref(), Some("hello"));
        store.remove("offer_ABC123").unwrap();
        assert_eq!(store.get("offer_ABC123").unwrap(), None);
    }

    #[test]
    fn memory_expiry() {
        let store = MemoryStore::new();
        store.put("ice_ABC123", "x", Duration::ZERO).unwrap();
        assert_eq!(store.get("ice_ABC123").unwrap(), None);
    }

    #[test]
    fn clear_removes_all_kinds() {
        let store = MemoryStore::new();
        for kind in SignalKind::ALL {
            store.put(&kind.key("ZZ9PLZ"), "v", SIGNAL_TTL).unwrap();
        }
        store.put("offer_OTHER1", "keep", SIGNAL_TTL).unwrap();
        store.clear("ZZ9PLZ").unwrap();
        for kind in SignalKind::ALL {
            assert_eq!(store.get(&kind.key("ZZ9PLZ")).unwrap(), None);
        }
        assert!(store.get("offer_OTHER1").unwrap().is_some());
    }

    #[test]
    fn rejects_path_like_keys() {
        let store = MemoryStore::new();
        assert!(matches!(
            store.put("../etc/passwd", "x", SIGNAL_TTL),
            Err(LinkError::Signaling(_))
        ));
    }

    #[test]
    fn file_store_shared_between_instances() {
        let dir = TempDir::new().unwrap();
        let host = FileStore::open(dir.path().join("signal")).unwrap();
        let guest = FileStore::open(dir.path().join("signal")).unwrap();

        host.put("offer_ABC123", r#"{"v":1}"#, SIGNAL_TTL).unwrap();
        assert_eq!(
            guest.get("offer_ABC123").unwrap().as_deref(),
            Some(r#"{"v":1}"#)
        );

        guest.clear("ABC123").unwrap();
        assert_eq!(host.get("offer_ABC123").unwrap(), None);
        // Clearing again is not an error.
        host.clear("ABC123").unwrap();
    }

    #[test]
    fn file_store_expired_entry_is_removed() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        store.put("answer_ABC123", "x", Duration::ZERO).unwrap();
        assert_eq!(store.get("answer_ABC123").unwrap(), None);
        assert!(!dir.path().join("answer_ABC123.json").exists());
    }

    #[test]
    fn file_store_corrupt_entry() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        fs::write(dir.path().join("offer_BAD000.json"), b"{oops").unwrap();
        assert_eq!(store.get("offer_BAD000").unwrap(), None);
    }
}
