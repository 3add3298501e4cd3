//! Build-output directories.
//!
//! A kernel build directory carries a `metadata.json` describing what was
//! built:
//!
//! ```json
//! {
//!   "build": {"target_arch": "arm64"},
//!   "results": {"artifacts": {"kernel": ["Image.gz"], "modules": ["modules.tar.xz"]}}
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::InvalidArgument;

/// File describing a build-output directory.
pub const METADATA_FILE: &str = "metadata.json";

/// Artifact kinds a build directory can provide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildArtifact {
    Kernel,
    Modules,
}

impl BuildArtifact {
    /// Key in the metadata `artifacts` map.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kernel => "kernel",
            Self::Modules => "modules",
        }
    }
}

#[derive(Deserialize)]
struct RawMetadata {
    build: RawBuild,
    #[serde(default)]
    results: RawResults,
}

#[derive(Deserialize)]
struct RawBuild {
    target_arch: String,
}

#[derive(Deserialize, Default)]
struct RawResults {
    #[serde(default)]
    artifacts: BTreeMap<String, Vec<String>>,
}

/// Parsed `metadata.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildMetadata {
    target_arch: String,
    artifacts: BTreeMap<String, Vec<String>>,
}

impl BuildMetadata {
    /// Reads `<dir>/metadata.json`.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidArgument`] when the directory or file is missing,
    /// the JSON is malformed, or no kernel artifact is listed.
    pub fn load(dir: &Path) -> Result<Self, InvalidArgument> {
        if !dir.is_dir() {
            return Err(InvalidArgument::new(format!(
                "build directory {} does not exist",
                dir.display()
            )));
        }
        let path = dir.join(METADATA_FILE);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            InvalidArgument::new(format!("unable to read {}: {}", path.display(), e))
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parses metadata content. `origin` names the source in error messages.
    pub fn parse(content: &str, origin: &str) -> Result<Self, InvalidArgument> {
        let raw: RawMetadata = serde_json::from_str(content).map_err(|e| {
            InvalidArgument::new(format!("invalid {} ({}): {}", METADATA_FILE, origin, e))
        })?;

        let metadata = Self {
            target_arch: raw.build.target_arch,
            artifacts: raw.results.artifacts,
        };
        if metadata.artifact(BuildArtifact::Kernel).is_none() {
            return Err(InvalidArgument::new(format!(
                "{} ({}) lists no kernel artifact",
                METADATA_FILE, origin
            )));
        }
        Ok(metadata)
    }

    /// Architecture the build targeted (`arm64`, `x86_64`, ...).
    pub fn target_arch(&self) -> &str {
        &self.target_arch
    }

    /// First file listed for `kind`, relative to the build directory.
    pub fn artifact(&self, kind: BuildArtifact) -> Option<&str> {
        self.artifacts
            .get(kind.as_str())
            .and_then(|files| files.first())
            .map(String::as_str)
    }
}
