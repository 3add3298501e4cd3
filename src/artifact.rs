//! Artifact references and their resolution to local files.
//!
//! Jobs need kernels, root filesystems, firmware images, overlays and
//! test-definition bundles. Users hand them over in three shapes:
//!
//! - a local path (`bzImage`, `file:///srv/rootfs.ext4`)
//! - a remote URL (`https://example.com/Image.gz`)
//! - a build-output directory plus the kind of artifact wanted from it
//!
//! [`ArtifactResolver::resolve`] turns any of them into a path on the local
//! filesystem. Remote content goes through the shared [`ArtifactCache`],
//! which guarantees at most one download per cache key at a time.
//!
//! ```text
//!   ArtifactReference ──► ArtifactResolver::resolve()
//!                               │
//!        ┌──────────────────────┼──────────────────────┐
//!        ▼                      ▼                      ▼
//!     Local              Remote (cache)          BuildOutput
//!   exists? ──► path    lock key ──► hit?       metadata.json
//!                             │      └─► path        │
//!                             ▼                      ▼
//!                      Fetcher::fetch()        Local(dir/file)
//!                      decode, rename
//! ```

pub mod build;
pub mod cache;
pub mod catalog;
pub mod fetch;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::InvalidArgument;

pub use build::{BuildArtifact, BuildMetadata};
pub use cache::{ArtifactCache, CacheEntry};
pub use catalog::{CatalogEntry, CatalogSection, WarmReport, warm_cache};
pub use fetch::{Fetcher, HttpFetcher};

/// Result type for artifact operations.
pub type ArtifactResult<T> = Result<T, ArtifactError>;

/// Errors raised while resolving an artifact.
///
/// Every variant names the reference it concerns so the user can tell which
/// of a job's many artifacts was at fault.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// The remote source was unreachable or answered with an error.
    #[error("Failed to fetch {url}: {reason}")]
    Fetch { url: String, reason: String },

    /// The content could not be decompressed.
    ///
    /// Raised for unsupported compression formats and for corrupt data.
    #[error("Failed to decode {reference}: {reason}")]
    Decode { reference: String, reason: String },

    /// A local path or build artifact does not exist.
    #[error("Artifact not found: {0}")]
    NotFound(String),

    /// I/O error while writing to the cache.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where an artifact comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArtifactReference {
    /// A file on the local filesystem.
    Local(PathBuf),
    /// A file to download.
    Remote(Url),
    /// A file listed in a build-output directory's metadata.
    BuildOutput { dir: PathBuf, kind: BuildArtifact },
}

impl ArtifactReference {
    /// Parses a user-supplied reference.
    ///
    /// `http://` and `https://` become [`Remote`](Self::Remote), `file://`
    /// and plain paths become [`Local`](Self::Local).
    ///
    /// # Example
    ///
    /// ```
    /// use bootrun::artifact::ArtifactReference;
    ///
    /// let remote = ArtifactReference::parse("https://example.com/bzImage").unwrap();
    /// assert!(matches!(remote, ArtifactReference::Remote(_)));
    ///
    /// let local = ArtifactReference::parse("file:///srv/bzImage").unwrap();
    /// assert_eq!(local, ArtifactReference::Local("/srv/bzImage".into()));
    /// ```
    pub fn parse(value: &str) -> Result<Self, InvalidArgument> {
        if value.starts_with("http://") || value.starts_with("https://") {
            let url = Url::parse(value)
                .map_err(|e| InvalidArgument::new(format!("invalid URL '{}': {}", value, e)))?;
            Ok(Self::Remote(url))
        } else if let Some(path) = value.strip_prefix("file://") {
            Ok(Self::Local(PathBuf::from(path)))
        } else if value.is_empty() {
            Err(InvalidArgument::new("empty artifact reference"))
        } else {
            Ok(Self::Local(PathBuf::from(value)))
        }
    }

    /// File name the engine will see, used for compression detection.
    pub fn file_name(&self) -> String {
        match self {
            Self::Local(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            Self::Remote(url) => url_file_name(url),
            Self::BuildOutput { kind, .. } => kind.as_str().to_string(),
        }
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Remote(url) => write!(f, "{}", url),
            Self::BuildOutput { dir, kind } => write!(f, "{} ({})", dir.display(), kind.as_str()),
        }
    }
}

/// How downloaded content is transformed before it lands in the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decompression {
    /// Stored as downloaded.
    None,
    /// gzip stream, stored decompressed.
    Gzip,
    /// zstd stream, stored decompressed.
    Zstd,
}

impl Decompression {
    /// Picks the decoder for a file name.
    ///
    /// Names without a compression suffix need no decoding. Suffixes of
    /// formats that cannot be decoded here are a [`ArtifactError::Decode`].
    pub fn for_file_name(name: &str) -> ArtifactResult<Self> {
        match compression_of(name) {
            None => Ok(Self::None),
            Some("gz") => Ok(Self::Gzip),
            Some("zstd") => Ok(Self::Zstd),
            Some(other) => Err(ArtifactError::Decode {
                reference: name.to_string(),
                reason: format!("unsupported compression '{}'", other),
            }),
        }
    }

    /// Stable name used in cache keys and markers.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Gzip => "gzip",
            Self::Zstd => "zstd",
        }
    }

    /// File name of the decoded content.
    pub fn decoded_name(self, name: &str) -> String {
        let suffix = match self {
            Self::None => return name.to_string(),
            Self::Gzip => ".gz",
            Self::Zstd => ".zst",
        };
        name.strip_suffix(suffix).unwrap_or(name).to_string()
    }
}

/// Compression format of a file, as the execution engine names it.
///
/// # Example
///
/// ```
/// use bootrun::artifact::compression_of;
///
/// assert_eq!(compression_of("rootfs.ext4.zst"), Some("zstd"));
/// assert_eq!(compression_of("zImage.xz"), Some("xz"));
/// assert_eq!(compression_of("Image"), None);
/// ```
pub fn compression_of(name: &str) -> Option<&'static str> {
    if name.ends_with(".gz") {
        Some("gz")
    } else if name.ends_with(".xz") {
        Some("xz")
    } else if name.ends_with(".zst") {
        Some("zstd")
    } else if name.ends_with(".bz2") {
        Some("bz2")
    } else {
        None
    }
}

/// Caching instructions for one resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePolicy {
    /// Destination kind (slot name), part of the cache key.
    pub kind: String,
    /// Whether compressed remote content is stored decoded.
    pub decompress: bool,
}

impl CachePolicy {
    /// Keep content as downloaded.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            decompress: false,
        }
    }

    /// Store compressed content decoded.
    pub fn decompressed(mut self) -> Self {
        self.decompress = true;
        self
    }
}

/// Resolves artifact references to local paths.
///
/// The resolver is shared behind an `Arc` when many resolutions run
/// concurrently; all of them go through one [`ArtifactCache`].
pub struct ArtifactResolver {
    cache: ArtifactCache,
    fetcher: Arc<dyn Fetcher>,
}

impl ArtifactResolver {
    /// Creates a resolver over an explicit cache and fetcher.
    pub fn new(cache: ArtifactCache, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { cache, fetcher }
    }

    /// Creates a resolver using the configured cache directory and HTTP settings.
    pub fn from_config(config: &Config) -> ArtifactResult<Self> {
        let fetcher = HttpFetcher::new(&config.http)?;
        let cache = ArtifactCache::new(config.cache.resolved_dir());
        Ok(Self::new(cache, Arc::new(fetcher)))
    }

    /// The underlying cache.
    pub fn cache(&self) -> &ArtifactCache {
        &self.cache
    }

    /// Resolves a reference into an absolute local path.
    ///
    /// # Errors
    ///
    /// - [`ArtifactError::NotFound`] for a missing local file, missing
    ///   build metadata or a build artifact kind the metadata doesn't list
    /// - [`ArtifactError::Fetch`] when a download fails
    /// - [`ArtifactError::Decode`] when decompression is unsupported or fails
    pub async fn resolve(
        &self,
        reference: &ArtifactReference,
        policy: &CachePolicy,
    ) -> ArtifactResult<PathBuf> {
        match reference {
            ArtifactReference::Local(path) => existing_local(path),
            ArtifactReference::Remote(url) => {
                let decompression = if policy.decompress {
                    Decompression::for_file_name(&url_file_name(url))?
                } else {
                    Decompression::None
                };
                self.cache
                    .fetch(url, decompression, &policy.kind, self.fetcher.as_ref())
                    .await
            }
            ArtifactReference::BuildOutput { dir, kind } => {
                let metadata = BuildMetadata::load(dir)
                    .map_err(|e| ArtifactError::NotFound(e.to_string()))?;
                let file = metadata.artifact(*kind).ok_or_else(|| {
                    ArtifactError::NotFound(format!(
                        "no {} artifact in {}",
                        kind.as_str(),
                        dir.display()
                    ))
                })?;
                existing_local(&dir.join(file))
            }
        }
    }
}

fn existing_local(path: &Path) -> ArtifactResult<PathBuf> {
    let absolute = std::path::absolute(path)?;
    if absolute.is_file() {
        Ok(absolute)
    } else {
        Err(ArtifactError::NotFound(path.display().to_string()))
    }
}

/// Last non-empty path segment of a URL.
pub(crate) fn url_file_name(url: &Url) -> String {
    url.path_segments()
        .and_then(|segments| segments.filter(|s| !s.is_empty()).next_back())
        .map(str::to_string)
        .unwrap_or_else(|| "artifact".to_string())
}

#[cfg(test)]
pub(crate) mod testing {
    //! Fetchers for tests.

    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::Url;

    use super::{ArtifactError, ArtifactResult, Fetcher};

    /// Serves canned bodies and counts downloads per URL.
    #[derive(Default)]
    pub struct FakeFetcher {
        bodies: HashMap<String, Vec<u8>>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        per_url: Mutex<HashMap<String, usize>>,
        failures_left: AtomicUsize,
        serve_any: bool,
    }

    impl FakeFetcher {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_body(mut self, url: &str, body: impl Into<Vec<u8>>) -> Self {
            self.bodies.insert(url.to_string(), body.into());
            self
        }

        pub fn with_delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        /// Serve the URL itself as the body of unknown URLs.
        pub fn serving_any(mut self) -> Self {
            self.serve_any = true;
            self
        }

        /// Fail the next `count` fetches regardless of URL.
        pub fn failing_first(self, count: usize) -> Self {
            self.failures_left.store(count, Ordering::SeqCst);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        pub fn calls_for(&self, url: &str) -> usize {
            self.per_url.lock().unwrap().get(url).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl Fetcher for FakeFetcher {
        async fn fetch(&self, url: &Url, dest: &Path) -> ArtifactResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self
                .per_url
                .lock()
                .unwrap()
                .entry(url.to_string())
                .or_default() += 1;

            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }

            let fail = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if fail {
                return Err(ArtifactError::Fetch {
                    url: url.to_string(),
                    reason: "injected failure".to_string(),
                });
            }

            let body = match self.bodies.get(url.as_str()) {
                Some(body) => body.clone(),
                None if self.serve_any => url.as_str().as_bytes().to_vec(),
                None => {
                    return Err(ArtifactError::Fetch {
                        url: url.to_string(),
                        reason: "HTTP 404 Not Found".to_string(),
                    });
                }
            };
            tokio::fs::write(dest, &body).await?;
            Ok(body.len() as u64)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::testing::FakeFetcher;
    use super::*;
    use tempfile::TempDir;

    fn resolver(temp_dir: &TempDir, fetcher: Arc<FakeFetcher>) -> ArtifactResolver {
        ArtifactResolver::new(ArtifactCache::new(temp_dir.path().join("cache")), fetcher)
    }

    fn gzip(data: &[u8]) -> Vec<u8> {
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_parse_references() {
        assert!(matches!(
            ArtifactReference::parse("http://example.com/overlay.tar.xz").unwrap(),
            ArtifactReference::Remote(_)
        ));
        assert_eq!(
            ArtifactReference::parse("bzImage").unwrap(),
            ArtifactReference::Local(PathBuf::from("bzImage"))
        );
        assert!(ArtifactReference::parse("").is_err());
        assert!(ArtifactReference::parse("https://").is_err());
    }

    #[test]
    fn test_file_name() {
        let reference = ArtifactReference::parse("https://example.com/a/rootfs.ext4.zst?x=1").unwrap();
        assert_eq!(reference.file_name(), "rootfs.ext4.zst");
        let reference = ArtifactReference::parse("/tmp/zImage.xz").unwrap();
        assert_eq!(reference.file_name(), "zImage.xz");
    }

    #[test]
    fn test_decompression_for_file_name() {
        assert_eq!(Decompression::for_file_name("x.dtb").unwrap(), Decompression::None);
        assert_eq!(Decompression::for_file_name("x.dtb.gz").unwrap(), Decompression::Gzip);
        assert_eq!(Decompression::for_file_name("x.bin.zst").unwrap(), Decompression::Zstd);
        assert!(matches!(
            Decompression::for_file_name("x.bin.xz"),
            Err(ArtifactError::Decode { .. })
        ));
        assert_eq!(Decompression::Gzip.decoded_name("bios.bin.gz"), "bios.bin");
        assert_eq!(Decompression::None.decoded_name("bios.bin.gz"), "bios.bin.gz");
    }

    #[tokio::test]
    async fn test_local_reference_is_made_absolute() {
        let temp_dir = TempDir::new().unwrap();
        let kernel = temp_dir.path().join("bzImage");
        std::fs::write(&kernel, b"kernel").unwrap();

        let fetcher = Arc::new(FakeFetcher::new());
        let resolver = resolver(&temp_dir, fetcher.clone());
        let path = resolver
            .resolve(&ArtifactReference::Local(kernel.clone()), &CachePolicy::new("kernel"))
            .await
            .unwrap();

        assert_eq!(path, kernel);
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_missing_local_reference() {
        let temp_dir = TempDir::new().unwrap();
        let resolver = resolver(&temp_dir, Arc::new(FakeFetcher::new()));
        let err = resolver
            .resolve(
                &ArtifactReference::Local(temp_dir.path().join("nope")),
                &CachePolicy::new("kernel"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_remote_reference_downloads_once() {
        let temp_dir = TempDir::new().unwrap();
        let url = "https://example.com/x86_64/bzImage";
        let fetcher = Arc::new(FakeFetcher::new().with_body(url, b"kernel".to_vec()));
        let resolver = resolver(&temp_dir, fetcher.clone());
        let reference = ArtifactReference::parse(url).unwrap();
        let policy = CachePolicy::new("kernel");

        let first = resolver.resolve(&reference, &policy).await.unwrap();
        let second = resolver.resolve(&reference, &policy).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(fetcher.calls_for(url), 1);
        assert_eq!(first.file_name().unwrap(), "bzImage");
        assert_eq!(std::fs::read(&first).unwrap(), b"kernel");

        let key = ArtifactCache::key(url, Decompression::None, "kernel");
        let entry = resolver.cache().entry(&key).unwrap();
        assert_eq!(entry.size, 6);
        assert_eq!(entry.kind, "kernel");
    }

    #[tokio::test]
    async fn test_decompressing_slot_stores_decoded_file() {
        let temp_dir = TempDir::new().unwrap();
        let url = "https://example.com/bios.bin.gz";
        let fetcher = Arc::new(FakeFetcher::new().with_body(url, gzip(b"firmware")));
        let resolver = resolver(&temp_dir, fetcher.clone());

        let path = resolver
            .resolve(
                &ArtifactReference::parse(url).unwrap(),
                &CachePolicy::new("bios").decompressed(),
            )
            .await
            .unwrap();

        assert_eq!(path.file_name().unwrap(), "bios.bin");
        assert_eq!(std::fs::read(&path).unwrap(), b"firmware");
    }

    #[tokio::test]
    async fn test_unsupported_compression_fails_before_download() {
        let temp_dir = TempDir::new().unwrap();
        let url = "https://example.com/bios.bin.xz";
        let fetcher = Arc::new(FakeFetcher::new().with_body(url, b"xz".to_vec()));
        let resolver = resolver(&temp_dir, fetcher.clone());

        let err = resolver
            .resolve(
                &ArtifactReference::parse(url).unwrap(),
                &CachePolicy::new("bios").decompressed(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ArtifactError::Decode { .. }));
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_build_output_reference() {
        let temp_dir = TempDir::new().unwrap();
        let build = temp_dir.path().join("build");
        std::fs::create_dir(&build).unwrap();
        std::fs::write(build.join("bzImage"), b"kernel").unwrap();
        std::fs::write(
            build.join("metadata.json"),
            r#"{"results": {"artifacts": {"kernel": ["bzImage"]}}, "build": {"target_arch": "x86_64"}}"#,
        )
        .unwrap();

        let resolver = resolver(&temp_dir, Arc::new(FakeFetcher::new()));
        let kernel = resolver
            .resolve(
                &ArtifactReference::BuildOutput {
                    dir: build.clone(),
                    kind: BuildArtifact::Kernel,
                },
                &CachePolicy::new("kernel"),
            )
            .await
            .unwrap();
        assert_eq!(kernel, build.join("bzImage"));

        let err = resolver
            .resolve(
                &ArtifactReference::BuildOutput {
                    dir: build,
                    kind: BuildArtifact::Modules,
                },
                &CachePolicy::new("modules"),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }
}
