//! Persistent transformer cache.
//!
//! Entries are content-addressed: the key is a SHA-256 over the tool
//! version, the stage id, the stage's option fingerprint, the fingerprint
//! of the transformer bound to the id, the input kind and the input bytes.
//! Rebinding an id to another program therefore misses. The source path
//! only enters the key for transformers whose output depends on it;
//! otherwise a file moved or renamed with unchanged content still hits.
//! Timestamps and build order never play a part.
//!
//! Each entry is one JSON file under `<cache_dir>/<key[..2]>/<key>.json`.
//! Writes go to a temp file in the same directory followed by an atomic
//! rename; two workers storing the same key race harmlessly because equal
//! keys imply equal content. Anything unreadable (missing, truncated,
//! wrong version, wrong key) is a miss.

use std::fmt;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use crate::error::BuildError;
use crate::pipeline::CacheAlignedAtomic;
use crate::rules::TransformerRef;
use crate::transform::Payload;

/// Bump to invalidate every existing entry when the format changes
const CACHE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct CacheEntry {
    version: u32,
    key: String,
    payload: Payload,
}

/// Content-keyed store of stage outputs
pub struct TransformCache {
    dir: PathBuf,
    hits: CacheAlignedAtomic,
    misses: CacheAlignedAtomic,
    unreadable: CacheAlignedAtomic,
}

impl TransformCache {
    /// Use `dir` as cache storage. The directory is created on first store.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            hits: CacheAlignedAtomic::new(0),
            misses: CacheAlignedAtomic::new(0),
            unreadable: CacheAlignedAtomic::new(0),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Cache key for running `stage`, implemented by the transformer with
    /// fingerprint `implementation`, over `input` read from `path`
    pub fn key(stage: &TransformerRef, implementation: &str, path: Option<&Path>, input: &Payload) -> String {
        let mut hasher = Sha256::new();
        hasher.update(env!("CARGO_PKG_VERSION").as_bytes());
        hasher.update(b"\0");
        hasher.update(stage.id.as_bytes());
        hasher.update(b"\0");
        hasher.update(stage.fingerprint().as_bytes());
        hasher.update(b"\0");
        hasher.update(implementation.as_bytes());
        hasher.update(b"\0");
        if let Some(path) = path {
            hasher.update(path.to_string_lossy().as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(input.kind.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(&input.bytes);
        format!("{:x}", hasher.finalize())
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        let shard = key.get(..2).unwrap_or("00");
        self.dir.join(shard).join(format!("{key}.json"))
    }

    /// Previously stored output for `key`, if readable
    pub fn lookup(&self, key: &str) -> Option<Payload> {
        match self.read_entry(key) {
            Ok(Some(payload)) => {
                self.hits.0.fetch_add(1, Ordering::Relaxed);
                Some(payload)
            }
            Ok(None) => {
                self.misses.0.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(err) => {
                debug!(error = %err, "treating cache entry as a miss");
                self.unreadable.0.fetch_add(1, Ordering::Relaxed);
                self.misses.0.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    fn read_entry(&self, key: &str) -> Result<Option<Payload>, BuildError> {
        let path = self.entry_path(key);
        let content = match std::fs::read(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(BuildError::CacheRead {
                    path,
                    reason: e.to_string(),
                })
            }
        };

        let entry: CacheEntry =
            serde_json::from_slice(&content).map_err(|e| BuildError::CacheRead {
                path: path.clone(),
                reason: e.to_string(),
            })?;

        if entry.version != CACHE_VERSION || entry.key != key {
            return Err(BuildError::CacheRead {
                path,
                reason: "stale or mismatched entry".to_string(),
            });
        }

        Ok(Some(entry.payload))
    }

    /// Store `payload` under `key`. Failures are logged, never fatal.
    pub fn store(&self, key: &str, payload: &Payload) {
        if let Err(err) = self.write_entry(key, payload) {
            warn!(key, error = %err, "failed to write cache entry");
        }
    }

    fn write_entry(&self, key: &str, payload: &Payload) -> io::Result<()> {
        let path = self.entry_path(key);
        let Some(shard_dir) = path.parent() else {
            return Ok(());
        };
        std::fs::create_dir_all(shard_dir)?;

        let entry = CacheEntry {
            version: CACHE_VERSION,
            key: key.to_string(),
            payload: payload.clone(),
        };
        let json = serde_json::to_vec(&entry)?;

        let mut tmp = NamedTempFile::new_in(shard_dir)?;
        tmp.write_all(&json)?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.0.load(Ordering::Relaxed),
            misses: self.misses.0.load(Ordering::Relaxed),
            unreadable: self.unreadable.0.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for TransformCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransformCache")
            .field("dir", &self.dir)
            .field("stats", &self.stats())
            .finish()
    }
}

/// Summary of cache performance for a build run
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Misses caused by corrupt or unreadable entries
    pub unreadable: u64,
}

impl CacheStats {
    pub fn total(&self) -> u64 {
        self.hits + self.misses
    }
}

impl fmt::Display for CacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cached, {} transformed", self.hits, self.misses)?;
        if self.unreadable > 0 {
            write!(f, " ({} unreadable entries)", self.unreadable)?;
        }
        Ok(())
    }
}

/// Serde adapter storing byte buffers as base64 strings
pub(crate) mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD.decode(encoded).map_err(serde::de::Error::custom)
    }
}
