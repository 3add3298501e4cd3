//! Bulk cache warming.
//!
//! The catalog lists the remote assets most jobs need: the default root
//! filesystem of every QEMU device and the test-definition bundle. Warming
//! resolves all of them concurrently; a failure for one entry is recorded
//! and the rest carry on.

use std::path::PathBuf;

use futures::future::join_all;
use tracing::{info, warn};

use super::{ArtifactError, ArtifactReference, ArtifactResolver, CachePolicy};

/// Section an entry is listed under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CatalogSection {
    Rootfs,
    TestDefinitions,
}

/// One remote asset to pre-fetch.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// Device name or bundle label.
    pub label: String,
    pub section: CatalogSection,
    pub reference: ArtifactReference,
    pub policy: CachePolicy,
}

/// Outcome of [`warm_cache`].
#[derive(Debug, Default)]
pub struct WarmReport {
    /// Labels and local paths of entries now in the cache.
    pub warmed: Vec<(String, PathBuf)>,
    /// Labels and errors of entries that could not be fetched.
    pub failures: Vec<(String, ArtifactError)>,
}

impl WarmReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Human-readable listing printed before warming.
///
/// ```text
/// Updating local cache:
/// * Rootfs:
///   * qemu-arm64
///   * ...
/// * Test definitions
/// ```
pub fn describe(catalog: &[CatalogEntry]) -> String {
    let mut out = String::from("Updating local cache:\n");
    let rootfs: Vec<_> = catalog
        .iter()
        .filter(|e| e.section == CatalogSection::Rootfs)
        .collect();
    if !rootfs.is_empty() {
        out.push_str("* Rootfs:\n");
        for entry in rootfs {
            out.push_str(&format!("  * {}\n", entry.label));
        }
    }
    if catalog
        .iter()
        .any(|e| e.section == CatalogSection::TestDefinitions)
    {
        out.push_str("* Test definitions\n");
    }
    out
}

/// Resolves every catalog entry, collecting failures.
pub async fn warm_cache(resolver: &ArtifactResolver, catalog: &[CatalogEntry]) -> WarmReport {
    let outcomes = join_all(catalog.iter().map(|entry| async move {
        let outcome = resolver.resolve(&entry.reference, &entry.policy).await;
        (entry.label.clone(), outcome)
    }))
    .await;

    let mut report = WarmReport::default();
    for (label, outcome) in outcomes {
        match outcome {
            Ok(path) => {
                info!("Cached {}: {}", label, path.display());
                report.warmed.push((label, path));
            }
            Err(e) => {
                warn!("Failed to cache {}: {}", label, e);
                report.failures.push((label, e));
            }
        }
    }
    report
}
