//! On-disk cache of downloaded artifacts.
//!
//! Each entry lives in its own directory named after the cache key:
//!
//! ```text
//! <root>/<key>/data/<file-name>   the artifact, decoded if requested
//! <root>/<key>/entry.json         completion marker (CacheEntry)
//! ```
//!
//! The data file is written to a temporary name and renamed into place, then
//! the marker is written the same way. An entry without a valid marker is a
//! miss. Within one process, downloads for the same key are serialized by a
//! per-key async mutex; callers that waited re-check the marker before
//! downloading themselves.

use std::collections::HashMap;
use std::fs;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use reqwest::Url;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::fetch::Fetcher;
use super::{ArtifactError, ArtifactResult, Decompression, url_file_name};

/// Name of the completion marker inside an entry directory.
pub const MARKER_FILE: &str = "entry.json";

/// Subdirectory of an entry directory holding the data file.
pub const DATA_DIR: &str = "data";

/// Completion marker of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Source URL.
    pub url: String,
    /// Decoding applied before storing.
    pub decompression: Decompression,
    /// Destination kind the entry was fetched for.
    pub kind: String,
    /// Name of the data file inside the entry's data directory.
    pub file_name: String,
    /// Size of the stored data file in bytes.
    pub size: u64,
    /// SHA-256 of the stored data file.
    pub sha256: String,
    /// RFC 3339 creation time.
    pub created_at: String,
}

/// Shared artifact cache rooted at a directory.
pub struct ArtifactCache {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ArtifactCache {
    /// Creates a cache rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Cache root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Stable key for a (URL, decompression, kind) triple.
    ///
    /// # Example
    ///
    /// ```
    /// use bootrun::artifact::{ArtifactCache, Decompression};
    ///
    /// let a = ArtifactCache::key("https://example.com/Image", Decompression::None, "kernel");
    /// let b = ArtifactCache::key("https://example.com/Image", Decompression::None, "dtb");
    /// assert_ne!(a, b);
    /// assert_eq!(a.len(), 64);
    /// ```
    pub fn key(url: &str, decompression: Decompression, kind: &str) -> String {
        let mut hasher = Sha256::new();
        for part in [url, decompression.as_str(), kind] {
            hasher.update(part.as_bytes());
            hasher.update([0u8]);
        }
        format!("{:x}", hasher.finalize())
    }

    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    /// Drops the lock of `key` once no other caller holds or awaits it.
    fn release(&self, key: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one in `lock`.
        if Arc::strong_count(&lock) <= 2 {
            locks.remove(key);
        }
    }

    /// Number of keys with a live download lock.
    pub fn active_locks(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Returns the data path of a complete entry.
    ///
    /// Entries whose marker is unreadable, or whose data file is missing or
    /// has the wrong size, are evicted and reported as misses.
    pub fn lookup(&self, key: &str) -> Option<PathBuf> {
        let entry_dir = self.root.join(key);
        let marker = entry_dir.join(MARKER_FILE);
        if !marker.exists() {
            return None;
        }

        let entry: Option<CacheEntry> = fs::read_to_string(&marker)
            .ok()
            .and_then(|content| serde_json::from_str(&content).ok());
        let Some(entry) = entry else {
            warn!("Corrupt cache marker {}, evicting", marker.display());
            self.evict(key, None);
            return None;
        };

        let path = entry_dir.join(DATA_DIR).join(&entry.file_name);
        match fs::metadata(&path) {
            Ok(meta) if meta.len() == entry.size => Some(path),
            _ => {
                warn!(
                    "Cache entry for {} does not match its marker, evicting",
                    entry.url
                );
                self.evict(key, Some(&entry.file_name));
                None
            }
        }
    }

    fn evict(&self, key: &str, file_name: Option<&str>) {
        let entry_dir = self.root.join(key);
        let _ = fs::remove_file(entry_dir.join(MARKER_FILE));
        if let Some(name) = file_name {
            let _ = fs::remove_file(entry_dir.join(DATA_DIR).join(name));
        }
    }

    /// Reads the marker of a complete entry.
    pub fn entry(&self, key: &str) -> Option<CacheEntry> {
        self.lookup(key)?;
        let content = fs::read_to_string(self.root.join(key).join(MARKER_FILE)).ok()?;
        serde_json::from_str(&content).ok()
    }

    /// Returns the cached file for `url`, downloading it first if needed.
    ///
    /// At most one download per key runs at a time within this cache. If the
    /// download fails, nothing becomes visible and the next caller retries.
    pub async fn fetch(
        &self,
        url: &Url,
        decompression: Decompression,
        kind: &str,
        fetcher: &dyn Fetcher,
    ) -> ArtifactResult<PathBuf> {
        let key = Self::key(url.as_str(), decompression, kind);
        let lock = self.lock_for(&key);
        let result = {
            let _guard = lock.lock().await;
            self.fetch_locked(&key, url, decompression, kind, fetcher).await
        };
        self.release(&key, lock);
        result
    }

    async fn fetch_locked(
        &self,
        key: &str,
        url: &Url,
        decompression: Decompression,
        kind: &str,
        fetcher: &dyn Fetcher,
    ) -> ArtifactResult<PathBuf> {
        if let Some(path) = self.lookup(key) {
            debug!("Cache hit for {} ({})", url, kind);
            return Ok(path);
        }

        let entry_dir = self.root.join(key);
        let data_dir = entry_dir.join(DATA_DIR);
        tokio::fs::create_dir_all(&data_dir).await?;

        let download = tempfile::Builder::new()
            .prefix(".download-")
            .tempfile_in(&entry_dir)?;
        info!("Downloading {}", url);
        fetcher.fetch(url, download.path()).await?;

        let file_name = decompression.decoded_name(&url_file_name(url));
        let reference = url.to_string();
        let dir = entry_dir.clone();
        let (data, size, sha256) = tokio::task::spawn_blocking(move || {
            let data = match decompression {
                Decompression::None => download,
                other => decode(download.path(), &dir, other, &reference)?,
            };
            let (size, sha256) = compute_file_hash(data.path())?;
            Ok::<_, ArtifactError>((data, size, sha256))
        })
        .await
        .map_err(|e| ArtifactError::Io(std::io::Error::other(e)))??;

        let final_path = data_dir.join(&file_name);
        data.persist(&final_path).map_err(|e| e.error)?;

        let entry = CacheEntry {
            url: url.to_string(),
            decompression,
            kind: kind.to_string(),
            file_name,
            size,
            sha256,
            created_at: chrono::Utc::now().to_rfc3339(),
        };
        write_marker(&entry_dir, &entry)?;
        debug!("Cached {} as {}", url, final_path.display());

        Ok(final_path)
    }
}

fn decode(
    input: &Path,
    dir: &Path,
    decompression: Decompression,
    reference: &str,
) -> ArtifactResult<NamedTempFile> {
    let decode_err = |e: std::io::Error| ArtifactError::Decode {
        reference: reference.to_string(),
        reason: e.to_string(),
    };

    let source = BufReader::new(fs::File::open(input)?);
    let mut output = tempfile::Builder::new()
        .prefix(".decode-")
        .tempfile_in(dir)?;

    let mut reader: Box<dyn Read> = match decompression {
        Decompression::Gzip => Box::new(flate2::bufread::MultiGzDecoder::new(source)),
        Decompression::Zstd => {
            Box::new(zstd::stream::read::Decoder::with_buffer(source).map_err(decode_err)?)
        }
        Decompression::None => Box::new(source),
    };
    std::io::copy(&mut reader, output.as_file_mut()).map_err(decode_err)?;
    output.as_file_mut().flush()?;

    Ok(output)
}

fn write_marker(entry_dir: &Path, entry: &CacheEntry) -> ArtifactResult<()> {
    let json = serde_json::to_vec_pretty(entry).map_err(std::io::Error::other)?;
    let mut marker = tempfile::Builder::new()
        .prefix(".marker-")
        .tempfile_in(entry_dir)?;
    marker.write_all(&json)?;
    marker.as_file().sync_all()?;
    marker
        .persist(entry_dir.join(MARKER_FILE))
        .map_err(|e| e.error)?;
    Ok(())
}

/// Computes the size and SHA-256 of a file.
pub fn compute_file_hash(path: &Path) -> std::io::Result<(u64, String)> {
    let mut file = fs::File::open(path)?;

    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];
    let mut size = 0u64;

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        size += bytes_read as u64;
        hasher.update(&buffer[..bytes_read]);
    }

    Ok((size, format!("{:x}", hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::artifact::testing::FakeFetcher;
    use tempfile::TempDir;

    const URL: &str = "https://example.com/arm64/Image";

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[test]
    fn test_compute_file_hash() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("data");
        fs::write(&path, b"hello").unwrap();

        let (size, hash) = compute_file_hash(&path).unwrap();
        assert_eq!(size, 5);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_key_depends_on_decompression() {
        assert_ne!(
            ArtifactCache::key(URL, Decompression::None, "dtb"),
            ArtifactCache::key(URL, Decompression::Gzip, "dtb")
        );
    }

    #[tokio::test]
    async fn test_fetch_writes_marker() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp_dir.path());
        let fetcher = FakeFetcher::new().with_body(URL, b"kernel".to_vec());

        let path = cache
            .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
            .await
            .unwrap();

        let key = ArtifactCache::key(URL, Decompression::None, "kernel");
        assert_eq!(path, temp_dir.path().join(&key).join(DATA_DIR).join("Image"));
        let entry = cache.entry(&key).unwrap();
        assert_eq!(entry.url, URL);
        assert_eq!(entry.size, 6);
        assert_eq!(entry.kind, "kernel");
    }

    #[tokio::test]
    async fn test_concurrent_fetches_download_once() {
        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(ArtifactCache::new(temp_dir.path()));
        let fetcher = Arc::new(
            FakeFetcher::new()
                .with_body(URL, b"kernel".to_vec())
                .with_delay(Duration::from_millis(50)),
        );

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                let fetcher = fetcher.clone();
                tokio::spawn(async move {
                    cache
                        .fetch(&url(URL), Decompression::None, "kernel", fetcher.as_ref())
                        .await
                        .unwrap()
                })
            })
            .collect();

        let paths: Vec<PathBuf> = futures::future::join_all(tasks)
            .await
            .into_iter()
            .map(|r| r.unwrap())
            .collect();

        assert_eq!(fetcher.calls(), 1);
        assert!(paths.iter().all(|p| p == &paths[0]));
        assert_eq!(cache.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_file_named_like_marker_keeps_its_content() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp_dir.path());
        let marker_url = "https://example.com/cfg/entry.json";
        let fetcher = FakeFetcher::new().with_body(marker_url, b"PAYLOAD".to_vec());

        for _ in 0..2 {
            let path = cache
                .fetch(&url(marker_url), Decompression::None, "userdata", &fetcher)
                .await
                .unwrap();
            assert_eq!(path.file_name().unwrap(), "entry.json");
            assert_eq!(fs::read(&path).unwrap(), b"PAYLOAD");
        }
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_locks_are_released_after_fetch() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp_dir.path());
        let fetcher = FakeFetcher::new()
            .with_body(URL, b"kernel".to_vec())
            .failing_first(1);

        assert!(
            cache
                .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
                .await
                .is_err()
        );
        assert_eq!(cache.active_locks(), 0);

        cache
            .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
            .await
            .unwrap();
        assert_eq!(cache.active_locks(), 0);
    }

    #[tokio::test]
    async fn test_failed_download_leaves_nothing_and_next_caller_retries() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp_dir.path());
        let fetcher = FakeFetcher::new()
            .with_body(URL, b"kernel".to_vec())
            .failing_first(1);

        let err = cache
            .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Fetch { .. }));

        let key = ArtifactCache::key(URL, Decompression::None, "kernel");
        let entry_dir = temp_dir.path().join(&key);
        assert!(!entry_dir.join(DATA_DIR).join("Image").exists());
        assert!(cache.lookup(&key).is_none());

        let path = cache
            .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
            .await
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"kernel");
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_corrupt_gzip_is_decode_error_without_entry() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp_dir.path());
        let gz_url = "https://example.com/board.dtb.gz";
        let fetcher = FakeFetcher::new().with_body(gz_url, b"definitely not gzip".to_vec());

        let err = cache
            .fetch(&url(gz_url), Decompression::Gzip, "dtb", &fetcher)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Decode { .. }));

        let key = ArtifactCache::key(gz_url, Decompression::Gzip, "dtb");
        let entry_dir = temp_dir.path().join(&key);
        assert!(!entry_dir.join(DATA_DIR).join("board.dtb").exists());
        assert!(!entry_dir.join(MARKER_FILE).exists());
    }

    #[tokio::test]
    async fn test_zstd_content_is_decoded() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp_dir.path());
        let zst_url = "https://example.com/fip.bin.zst";
        let body = zstd::encode_all(&b"firmware image"[..], 3).unwrap();
        let fetcher = FakeFetcher::new().with_body(zst_url, body);

        let path = cache
            .fetch(&url(zst_url), Decompression::Zstd, "fip", &fetcher)
            .await
            .unwrap();
        assert_eq!(path.file_name().unwrap(), "fip.bin");
        assert_eq!(fs::read(path).unwrap(), b"firmware image");
    }

    #[tokio::test]
    async fn test_corrupt_marker_is_redownloaded() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp_dir.path());
        let fetcher = FakeFetcher::new().with_body(URL, b"kernel".to_vec());

        cache
            .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
            .await
            .unwrap();
        let key = ArtifactCache::key(URL, Decompression::None, "kernel");
        fs::write(temp_dir.path().join(&key).join(MARKER_FILE), "{ not json").unwrap();

        cache
            .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
            .await
            .unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert!(cache.entry(&key).is_some());
    }

    #[tokio::test]
    async fn test_truncated_data_is_redownloaded() {
        let temp_dir = TempDir::new().unwrap();
        let cache = ArtifactCache::new(temp_dir.path());
        let fetcher = FakeFetcher::new().with_body(URL, b"kernel".to_vec());

        let path = cache
            .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
            .await
            .unwrap();
        fs::write(&path, b"ke").unwrap();

        let path = cache
            .fetch(&url(URL), Decompression::None, "kernel", &fetcher)
            .await
            .unwrap();
        assert_eq!(fs::read(path).unwrap(), b"kernel");
        assert_eq!(fetcher.calls(), 2);
    }
}
