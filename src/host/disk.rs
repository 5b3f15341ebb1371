//! Directory-backed persistent cache store
//!
//! Each named cache is a directory under the store root. An entry is one
//! `<hash>.entry` file named by the SHA256 of its key: a single line of
//! [`EntryMeta`] JSON, a newline, then the raw body.
//!
//! Entries are written to a unique temp file and renamed into place, so a
//! reader sees either the old entry or the new one, and concurrent writers
//! for one key resolve to whichever rename landed last.

use crate::error::{PrefetchError, PrefetchResult};
use crate::host::{CacheHandle, CacheStorage, Response};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::debug;

const ENTRY_EXT: &str = "entry";

static TEMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// Metadata stored at the head of each entry file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryMeta {
    /// Cache key (the request URL)
    pub key: String,

    /// URL the response was produced for
    pub url: String,

    /// HTTP status code
    pub status: u16,

    /// Response headers
    pub headers: Vec<(String, String)>,

    /// Body length in bytes
    pub size_bytes: u64,

    /// When the entry was written
    pub stored_at: DateTime<Utc>,
}

/// `CacheStorage` rooted at a directory
pub struct DiskCacheStorage {
    root: PathBuf,
}

impl DiskCacheStorage {
    /// Create a store rooted at `root` (created lazily on first open)
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Store root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Open the named cache as a concrete `DiskCache`
    pub async fn cache(&self, name: &str) -> PrefetchResult<DiskCache> {
        let dir = self.cache_dir(name);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| PrefetchError::cache_open(name, e))?;
        debug!("Opened disk cache {} at {}", name, dir.display());
        Ok(DiskCache { dir })
    }

    fn cache_dir(&self, name: &str) -> PathBuf {
        let safe: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.root.join(safe)
    }
}

#[async_trait]
impl CacheStorage for DiskCacheStorage {
    async fn open(&self, name: &str) -> PrefetchResult<Arc<dyn CacheHandle>> {
        Ok(Arc::new(self.cache(name).await?))
    }

    async fn delete(&self, name: &str) -> PrefetchResult<bool> {
        let dir = self.cache_dir(name);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PrefetchError::io(
                format!("removing cache {}", dir.display()),
                e,
            )),
        }
    }
}

/// One named cache directory
pub struct DiskCache {
    dir: PathBuf,
}

impl DiskCache {
    /// Metadata for every complete entry, sorted by key
    pub async fn entries(&self) -> PrefetchResult<Vec<EntryMeta>> {
        let mut entries = vec![];
        let mut dir = fs::read_dir(&self.dir)
            .await
            .map_err(|e| PrefetchError::io("reading cache directory", e))?;

        while let Some(entry) = dir
            .next_entry()
            .await
            .map_err(|e| PrefetchError::io("reading cache entry", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == ENTRY_EXT) {
                // Unreadable entries are skipped rather than failing the listing
                if let Ok(meta) = Self::read_meta(&path).await {
                    entries.push(meta);
                }
            }
        }

        entries.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(entries)
    }

    /// Read only the metadata line of an entry file
    async fn read_meta(path: &Path) -> std::io::Result<EntryMeta> {
        let file = fs::File::open(path).await?;
        let mut line = String::new();
        BufReader::new(file).read_line(&mut line).await?;
        serde_json::from_str(line.trim_end()).map_err(std::io::Error::other)
    }

    fn stem(key: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(key.as_bytes());
        hex::encode(&hasher.finalize()[..16])
    }

    fn entry_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.{}", Self::stem(key), ENTRY_EXT))
    }

    fn temp_path(&self, key: &str) -> PathBuf {
        let seq = TEMP_SEQ.fetch_add(1, Ordering::Relaxed);
        self.dir.join(format!(
            ".{}.{}-{}.tmp",
            Self::stem(key),
            std::process::id(),
            seq
        ))
    }
}

#[async_trait]
impl CacheHandle for DiskCache {
    async fn get(&self, key: &str) -> PrefetchResult<Option<Response>> {
        let read_err = |reason: String| PrefetchError::CacheRead {
            key: key.to_string(),
            reason,
        };

        let content = match fs::read(self.entry_path(key)).await {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(read_err(e.to_string())),
        };

        let split = content
            .iter()
            .position(|b| *b == b'\n')
            .ok_or_else(|| read_err("entry has no metadata line".to_string()))?;
        let meta: EntryMeta = serde_json::from_slice(&content[..split])?;
        let body = content[split + 1..].to_vec();

        Ok(Some(Response {
            url: meta.url,
            status: meta.status,
            headers: meta.headers,
            body,
        }))
    }

    async fn put(&self, key: &str, response: &Response) -> PrefetchResult<()> {
        let write_err = |e: std::io::Error| PrefetchError::CacheWrite {
            key: key.to_string(),
            reason: e.to_string(),
        };
        let meta = EntryMeta {
            key: key.to_string(),
            url: response.url.clone(),
            status: response.status,
            headers: response.headers.clone(),
            size_bytes: response.body.len() as u64,
            stored_at: Utc::now(),
        };

        // Compact JSON escapes newlines, so the first newline ends the metadata
        let mut content = serde_json::to_vec(&meta)?;
        content.push(b'\n');
        content.extend_from_slice(&response.body);

        let temp = self.temp_path(key);
        fs::write(&temp, &content).await.map_err(write_err)?;
        if let Err(e) = fs::rename(&temp, self.entry_path(key)).await {
            let _ = fs::remove_file(&temp).await;
            return Err(write_err(e));
        }

        debug!("Stored {} ({} bytes)", key, meta.size_bytes);
        Ok(())
    }

    async fn remove(&self, key: &str) -> PrefetchResult<bool> {
        let path = self.entry_path(key);
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(PrefetchError::io(format!("removing {}", path.display()), e)),
        }
    }

    async fn keys(&self) -> PrefetchResult<Vec<String>> {
        Ok(self.entries().await?.into_iter().map(|m| m.key).collect())
    }
}
