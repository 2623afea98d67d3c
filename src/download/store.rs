//! Local storage for downloaded files
//!
//! Files land in `<download_directory>/<session_id>/`. Bytes are written to a
//! `.part` file first and renamed into place, so an interrupted write never
//! leaves a file that looks complete.

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex, MutexGuard};
use url::Url;

/// Hex-encoded SHA-256 of `bytes`
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// A file written by the store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub filename: String,
    pub path: PathBuf,
}

pub struct FileStore {
    root: PathBuf,
    dedup: Mutex<()>,
    unnamed: AtomicU64,
}

impl FileStore {
    pub fn new(download_directory: &Path, session_id: &str) -> Self {
        Self {
            root: download_directory.join(session_id),
            dedup: Mutex::new(()),
            unnamed: AtomicU64::new(0),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Serializes checksum lookups and writes across workers
    ///
    /// Holding the guard from "is this checksum already stored?" until the
    /// row is marked COMPLETED keeps identical content from being written twice.
    pub async fn dedup_guard(&self) -> MutexGuard<'_, ()> {
        self.dedup.lock().await
    }

    /// Writes `bytes` under a collision-free name derived from `url`
    pub async fn write(&self, url: &str, extension: &str, bytes: &[u8]) -> std::io::Result<StoredFile> {
        tokio::fs::create_dir_all(&self.root).await?;

        let preferred = self.preferred_name(url, extension);
        let (filename, path) = self.free_path(&preferred).await?;
        let part = self.root.join(format!("{}.part", filename));

        if let Err(e) = tokio::fs::write(&part, bytes).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }
        if let Err(e) = tokio::fs::rename(&part, &path).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(e);
        }

        Ok(StoredFile { filename, path })
    }

    fn preferred_name(&self, url: &str, extension: &str) -> String {
        let segment = Url::parse(url)
            .ok()
            .and_then(|u| {
                u.path_segments()
                    .and_then(|mut segments| segments.next_back().map(|s| s.to_string()))
            })
            .unwrap_or_default();

        let mut name = sanitize_filename(&segment);
        if name.trim_matches(|c| c == '_' || c == '.').is_empty() {
            let n = self.unnamed.fetch_add(1, Ordering::Relaxed) + 1;
            name = format!("file_{}", n);
        }

        let suffix = format!(".{}", extension);
        if !extension.is_empty() && !name.to_ascii_lowercase().ends_with(&suffix) {
            name.push_str(&suffix);
        }
        name
    }

    /// Appends `_1`, `_2`, ... to the stem until the name is unused
    async fn free_path(&self, preferred: &str) -> std::io::Result<(String, PathBuf)> {
        let (stem, ext) = match preferred.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (preferred.to_string(), String::new()),
        };

        let mut candidate = preferred.to_string();
        let mut n = 0u32;
        loop {
            let path = self.root.join(&candidate);
            if !tokio::fs::try_exists(&path).await? {
                return Ok((candidate, path));
            }
            n += 1;
            candidate = format!("{}_{}{}", stem, n, ext);
        }
    }
}

/// Keeps ASCII alphanumerics, `.`, `-` and `_`; everything else becomes `_`
pub fn sanitize_filename(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect()
}
