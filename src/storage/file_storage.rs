//! On-disk string storage for the durable tiers.
//!
//! Each item is one file under the base directory, named by the hex encoding
//! of its key. Keys too long for a file name are stored under the SHA-256 of
//! the key instead, with the key itself written at the head of the file.
//! Usage is the sum of file sizes and is checked against a byte quota before
//! every write.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;

use crate::storage::durable::StringStorage;
use crate::storage::{QuotaState, StoreError};

const ITEM_EXTENSION: &str = "item";
const HASHED_EXTENSION: &str = "hashed";

/// Longest key named directly; its hex name plus extension stays well under
/// the 255-byte file name limit.
pub const MAX_DIRECT_KEY_BYTES: usize = 120;

/// Hashed item body: `{key length}:{key}{value}`.
fn frame_hashed(key: &str, value: &str) -> String {
    format!("{}:{key}{value}", key.len())
}

fn unframe_hashed(raw: &str) -> Option<(&str, &str)> {
    let (len, rest) = raw.split_once(':')?;
    let len: usize = len.parse().ok()?;
    Some((rest.get(..len)?, rest.get(len..)?))
}

/// File-backed [`StringStorage`] with a byte quota.
#[derive(Debug)]
pub struct FileStringStorage {
    /// Directory holding one file per item.
    base_path: PathBuf,

    /// Maximum bytes across all item files.
    quota_bytes: u64,

    /// Transfer statistics.
    stats: FileIoStats,
}

#[derive(Debug, Default)]
pub struct FileIoStats {
    pub total_writes: AtomicU64,
    pub total_reads: AtomicU64,
    pub total_bytes_written: AtomicU64,
    pub total_bytes_read: AtomicU64,
}

impl FileStringStorage {
    /// Open (creating if needed) storage rooted at `base_path`.
    pub async fn open(base_path: PathBuf, quota_bytes: u64) -> Result<Self, StoreError> {
        fs::create_dir_all(&base_path).await?;
        Ok(Self {
            base_path,
            quota_bytes,
            stats: FileIoStats::default(),
        })
    }

    fn is_hashed(key: &str) -> bool {
        key.len() > MAX_DIRECT_KEY_BYTES
    }

    fn item_path(&self, key: &str) -> PathBuf {
        let name = if Self::is_hashed(key) {
            let digest = Sha256::digest(key.as_bytes());
            format!("{}.{HASHED_EXTENSION}", hex::encode(digest))
        } else {
            format!("{}.{ITEM_EXTENSION}", hex::encode(key.as_bytes()))
        };
        self.base_path.join(name)
    }

    fn is_item_path(path: &Path) -> bool {
        matches!(
            path.extension().and_then(|e| e.to_str()),
            Some(ITEM_EXTENSION) | Some(HASHED_EXTENSION)
        )
    }

    /// Key of an item file. Hashed items are read to recover theirs.
    async fn key_from_path(path: &Path) -> Result<Option<String>, StoreError> {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ITEM_EXTENSION) => {
                let key = path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|stem| hex::decode(stem).ok())
                    .and_then(|raw| String::from_utf8(raw).ok());
                Ok(key)
            }
            Some(HASHED_EXTENSION) => match fs::read_to_string(path).await {
                Ok(raw) => Ok(unframe_hashed(&raw).map(|(key, _)| key.to_string())),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                Err(e) if e.kind() == std::io::ErrorKind::InvalidData => Ok(None),
                Err(e) => Err(e.into()),
            },
            _ => Ok(None),
        }
    }

    async fn file_len(&self, key: &str) -> Result<u64, StoreError> {
        match fs::metadata(self.item_path(key)).await {
            Ok(meta) => Ok(meta.len()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes of all item files.
    pub async fn disk_usage(&self) -> Result<u64, StoreError> {
        let mut total = 0u64;
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if meta.is_file() && Self::is_item_path(&entry.path()) {
                total += meta.len();
            }
        }
        Ok(total)
    }

    pub fn stats(&self) -> &FileIoStats {
        &self.stats
    }
}

#[async_trait]
impl StringStorage for FileStringStorage {
    async fn get_item(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.item_path(key);
        let data = match fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            // Non-UTF-8 content surfaces as a decode failure upstream.
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Ok(Some(String::new()))
            }
            Err(e) => return Err(e.into()),
        };
        let data = if Self::is_hashed(key) {
            match unframe_hashed(&data) {
                Some((stored, value)) if stored == key => value.to_string(),
                _ => return Ok(None),
            }
        } else {
            data
        };

        self.stats.total_reads.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_read
            .fetch_add(data.len() as u64, Ordering::Relaxed);

        Ok(Some(data))
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let framed;
        let contents = if Self::is_hashed(key) {
            framed = frame_hashed(key, value);
            framed.as_str()
        } else {
            value
        };

        let existing = self.file_len(key).await?;
        let used = self.disk_usage().await?.saturating_sub(existing);
        let needed = contents.len() as u64;
        if used + needed > self.quota_bytes {
            return Err(StoreError::QuotaExceeded {
                needed,
                available: self.quota_bytes.saturating_sub(used),
            });
        }

        let path = self.item_path(key);
        fs::write(&path, contents).await?;

        debug!(
            key,
            path = %path.display(),
            size = value.len(),
            "Wrote item to disk"
        );

        self.stats.total_writes.fetch_add(1, Ordering::Relaxed);
        self.stats
            .total_bytes_written
            .fetch_add(needed, Ordering::Relaxed);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        let path = self.item_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!(key, path = %path.display(), "Deleted item file");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let mut keys = Vec::new();
        let mut entries = fs::read_dir(&self.base_path).await?;
        while let Some(entry) = entries.next_entry().await? {
            if let Some(key) = Self::key_from_path(&entry.path()).await? {
                keys.push(key);
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn quota(&self) -> Result<Option<QuotaState>, StoreError> {
        Ok(Some(QuotaState {
            used_bytes: self.disk_usage().await?,
            capacity_bytes: self.quota_bytes,
        }))
    }
}
