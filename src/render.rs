//! Turning a request into a job definition.
//!
//! Rendering happens in three steps so that configuration mistakes surface
//! before any download starts:
//!
//! 1. [`plan`] validates the request against the device and test
//!    registries. It touches nothing but an optional build directory's
//!    `metadata.json`.
//! 2. [`JobPlan::resolve`] fetches every artifact through the
//!    [`ArtifactResolver`].
//! 3. [`render`] combines the resolved job with an [`ExecutionId`] into a
//!    [`JobDefinition`]. Same input, same bytes.

pub mod document;
pub mod template;

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use futures::future::try_join_all;
use tracing::{debug, info};

use crate::artifact::{
    ArtifactReference, ArtifactResolver, ArtifactResult, BuildArtifact, BuildMetadata,
    CachePolicy, compression_of,
};
use crate::config::StorageConfig;
use crate::device::{Device, Slot};
use crate::error::InvalidArgument;
use crate::test_model::{ParamKind, Test};

pub use document::JobDefinition;
use document::{Action, JobMetadata, JobTimeouts, Minutes};
use template::RenderContext;

/// Connection timeout in minutes.
const CONNECTION_TIMEOUT: u32 = 2;

/// What the user asked for.
#[derive(Debug, Clone, Default)]
pub struct JobRequest {
    /// Device name. Optional when `build_dir` is set.
    pub device: Option<String>,
    /// Build-output directory supplying the kernel and modules.
    pub build_dir: Option<PathBuf>,
    /// User-supplied artifact references by slot.
    pub artifacts: BTreeMap<Slot, String>,
    /// Rootfs overlays, applied in order.
    pub overlays: Vec<String>,
    pub tests: Vec<String>,
    pub parameters: BTreeMap<String, String>,
    /// Phase (`deploy`, `boot`) or test name → minutes.
    pub timeouts: BTreeMap<String, u32>,
    pub boot_args: Option<String>,
    /// Shell command to run after boot.
    pub command: Vec<String>,
    /// Overrides the configured test-definition bundle.
    pub test_definitions: Option<String>,
}

/// Splits `KEY=VALUE` items.
pub fn parse_key_values(items: &[String]) -> Result<BTreeMap<String, String>, InvalidArgument> {
    items
        .iter()
        .map(|item| match item.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(InvalidArgument::new(format!(
                "expected KEY=VALUE, got '{}'",
                item
            ))),
        })
        .collect()
}

/// Splits `KEY=MINUTES` items.
pub fn parse_timeouts(items: &[String]) -> Result<BTreeMap<String, u32>, InvalidArgument> {
    parse_key_values(items)?
        .into_iter()
        .map(|(key, value)| {
            let minutes = value.parse().map_err(|_| {
                InvalidArgument::new(format!("invalid timeout {}={}", key, value))
            })?;
            Ok((key, minutes))
        })
        .collect()
}

/// Per-invocation identity, used to name ephemeral engine resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionId(String);

impl ExecutionId {
    /// A fresh `bootrun-<uuid>` identity.
    pub fn generate() -> Self {
        Self(format!("bootrun-{}", uuid::Uuid::new_v4()))
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An artifact slot with its source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedArtifact {
    pub slot: Slot,
    pub reference: ArtifactReference,
    pub policy: CachePolicy,
}

/// A test with its effective timeout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedTest {
    pub test: &'static Test,
    pub timeout: u32,
}

/// A validated parameter value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    Text(String),
    Artifact(ArtifactReference),
}

/// A validated request; nothing has been downloaded yet.
#[derive(Debug, Clone)]
pub struct JobPlan {
    device: &'static Device,
    tests: Vec<PlannedTest>,
    artifacts: Vec<PlannedArtifact>,
    overlays: Vec<ArtifactReference>,
    parameters: BTreeMap<String, ParamValue>,
    test_definitions: Option<ArtifactReference>,
    deploy_timeout: u32,
    boot_timeout: u32,
    job_timeout: u32,
    boot_args: Option<String>,
    command: Vec<String>,
}

/// Validates a request.
///
/// # Errors
///
/// Returns [`InvalidArgument`] for an unknown device or test, an unsupported
/// pairing, an artifact slot the device lacks or a missing required one,
/// unknown, invalid or missing parameters, unknown, zero or overflowing
/// timeouts, boot arguments containing `"` or given to an FVP device, and
/// malformed build metadata.
pub fn plan(request: &JobRequest, storage: &StorageConfig) -> Result<JobPlan, InvalidArgument> {
    let build = match &request.build_dir {
        Some(dir) => Some((dir.as_path(), BuildMetadata::load(dir)?)),
        None => None,
    };

    let device = match (&request.device, &build) {
        (Some(name), _) => Device::select(name)?,
        (None, Some((_, metadata))) => Device::for_build_arch(metadata.target_arch())?,
        (None, None) => {
            return Err(InvalidArgument::new(
                "either a device or a build directory is required",
            ));
        }
    };

    let tests = plan_tests(request, device)?;
    check_timeouts(request, &tests)?;

    if let Some(args) = &request.boot_args {
        if args.contains('"') {
            return Err(InvalidArgument::new(format!(
                "boot arguments must not contain '\"': {}",
                args
            )));
        }
        // FVP kernels take their command line from firmware.
        if !device.is_qemu() {
            return Err(InvalidArgument::new(format!(
                "device '{}' does not accept boot arguments",
                device.name
            )));
        }
    }

    let artifacts = plan_artifacts(request, device, build.as_ref(), storage)?;

    if !request.overlays.is_empty() && device.slot(Slot::Rootfs).is_none() {
        return Err(InvalidArgument::new(format!(
            "device '{}' has no rootfs to apply overlays to",
            device.name
        )));
    }
    let overlays = request
        .overlays
        .iter()
        .map(|o| ArtifactReference::parse(o))
        .collect::<Result<Vec<_>, _>>()?;

    let parameters = plan_parameters(request, device, &tests)?;

    let test_definitions = if tests.iter().any(|t| t.test.need_test_definition) {
        let location = request
            .test_definitions
            .as_deref()
            .unwrap_or(&storage.test_definitions);
        Some(ArtifactReference::parse(location)?)
    } else {
        None
    };

    let deploy_timeout = request
        .timeouts
        .get("deploy")
        .copied()
        .unwrap_or(device.deploy_timeout);
    let boot_timeout = request
        .timeouts
        .get("boot")
        .copied()
        .unwrap_or(device.boot_timeout);
    let job_timeout = tests
        .iter()
        .try_fold(deploy_timeout, |total, t| total.checked_add(t.timeout))
        .and_then(|total| total.checked_add(boot_timeout))
        .ok_or_else(|| {
            InvalidArgument::new(format!(
                "timeouts add up to more than {} minutes",
                u32::MAX
            ))
        })?;

    let plan = JobPlan {
        device,
        tests,
        artifacts,
        overlays,
        parameters,
        test_definitions,
        deploy_timeout,
        boot_timeout,
        job_timeout,
        boot_args: request.boot_args.clone(),
        command: request.command.clone(),
    };
    debug!(
        "Planned {} with {} test(s), {} artifact(s)",
        plan.device.name,
        plan.tests.len(),
        plan.artifacts.len()
    );
    Ok(plan)
}

fn plan_tests(request: &JobRequest, device: &Device) -> Result<Vec<PlannedTest>, InvalidArgument> {
    let mut names: Vec<&str> = request.tests.iter().map(String::as_str).collect();
    if names.contains(&"command") {
        return Err(InvalidArgument::new(if request.command.is_empty() {
            "test 'command' needs a command to run"
        } else {
            "test 'command' is implied by the trailing command and must not be requested"
        }));
    }
    if !request.command.is_empty() {
        names.push("command");
    }

    let mut seen = HashSet::new();
    names
        .into_iter()
        .map(|name| {
            if !seen.insert(name) {
                return Err(InvalidArgument::new(format!(
                    "test '{}' requested twice",
                    name
                )));
            }
            let test = Test::select(name)?;
            test.check_device(device)?;
            let timeout = request.timeouts.get(name).copied().unwrap_or(test.timeout);
            Ok(PlannedTest { test, timeout })
        })
        .collect()
}

fn check_timeouts(request: &JobRequest, tests: &[PlannedTest]) -> Result<(), InvalidArgument> {
    for (key, minutes) in &request.timeouts {
        let known = key == "deploy"
            || key == "boot"
            || tests.iter().any(|t| t.test.name == key.as_str());
        if !known {
            return Err(InvalidArgument::new(format!("unknown timeout key '{}'", key)));
        }
        if *minutes == 0 {
            return Err(InvalidArgument::new(format!(
                "timeout for '{}' must be at least one minute",
                key
            )));
        }
    }
    Ok(())
}

fn build_artifact(slot: Slot) -> Option<BuildArtifact> {
    match slot {
        Slot::Kernel => Some(BuildArtifact::Kernel),
        Slot::Modules => Some(BuildArtifact::Modules),
        _ => None,
    }
}

fn plan_artifacts(
    request: &JobRequest,
    device: &Device,
    build: Option<&(&Path, BuildMetadata)>,
    storage: &StorageConfig,
) -> Result<Vec<PlannedArtifact>, InvalidArgument> {
    for slot in request.artifacts.keys() {
        if device.slot(*slot).is_none() {
            return Err(InvalidArgument::new(format!(
                "device '{}' does not accept {}",
                device.name,
                slot.flag()
            )));
        }
    }
    if build.is_some() && device.slot(Slot::Kernel).is_none() {
        return Err(InvalidArgument::new(format!(
            "device '{}' cannot boot a kernel from a build directory",
            device.name
        )));
    }

    let mut planned = Vec::new();
    for spec in &device.slots {
        let from_build = build.and_then(|(dir, metadata)| {
            let kind = build_artifact(spec.slot)?;
            metadata.artifact(kind)?;
            Some(ArtifactReference::BuildOutput {
                dir: dir.to_path_buf(),
                kind,
            })
        });

        let reference = if let Some(value) = request.artifacts.get(&spec.slot) {
            Some(ArtifactReference::parse(value)?)
        } else if from_build.is_some() {
            from_build
        } else if let Some(default) = spec.default {
            Some(ArtifactReference::parse(&storage.url_for(default))?)
        } else {
            None
        };

        match reference {
            Some(reference) => planned.push(PlannedArtifact {
                slot: spec.slot,
                reference,
                policy: spec.policy(),
            }),
            None if spec.required => {
                return Err(InvalidArgument::new(format!(
                    "device '{}' requires {}",
                    device.name,
                    spec.slot.flag()
                )));
            }
            None => {}
        }
    }
    Ok(planned)
}

fn plan_parameters(
    request: &JobRequest,
    device: &Device,
    tests: &[PlannedTest],
) -> Result<BTreeMap<String, ParamValue>, InvalidArgument> {
    let known: Vec<_> = if tests.is_empty() {
        device.parameters.iter().collect()
    } else {
        tests.iter().flat_map(|t| t.test.parameters).collect()
    };

    let mut planned = BTreeMap::new();
    for (name, value) in &request.parameters {
        let spec = known.iter().find(|p| p.name == name.as_str()).ok_or_else(|| {
            InvalidArgument::new(format!("unknown parameter {}={}", name, value))
        })?;
        spec.validate(value)?;
        let value = match spec.kind {
            ParamKind::Text => ParamValue::Text(value.clone()),
            ParamKind::Artifact => ParamValue::Artifact(ArtifactReference::parse(value)?),
        };
        planned.insert(name.clone(), value);
    }

    for planned_test in tests {
        for spec in planned_test.test.parameters.iter().filter(|p| p.required) {
            if !request.parameters.contains_key(spec.name) {
                return Err(InvalidArgument::new(format!(
                    "test '{}' requires parameter {}",
                    planned_test.test.name, spec.name
                )));
            }
        }
    }
    Ok(planned)
}

impl JobPlan {
    pub fn device(&self) -> &'static Device {
        self.device
    }

    pub fn tests(&self) -> &[PlannedTest] {
        &self.tests
    }

    /// The planned source of `slot`, if any.
    pub fn artifact(&self, slot: Slot) -> Option<&ArtifactReference> {
        self.artifacts
            .iter()
            .find(|a| a.slot == slot)
            .map(|a| &a.reference)
    }

    pub fn test_definitions(&self) -> Option<&ArtifactReference> {
        self.test_definitions.as_ref()
    }

    /// Deploy plus boot plus every test timeout, in minutes.
    pub fn job_timeout(&self) -> u32 {
        self.job_timeout
    }

    /// Resolves every artifact of the plan into a local file.
    pub async fn resolve(self, resolver: &ArtifactResolver) -> ArtifactResult<ResolvedJob> {
        info!(
            "Resolving {} artifact(s) for {}",
            self.artifacts.len() + self.overlays.len(),
            self.device.name
        );

        let images = try_join_all(self.artifacts.iter().map(|artifact| async move {
            let resolved = resolve_one(resolver, &artifact.reference, &artifact.policy).await?;
            Ok::<_, crate::artifact::ArtifactError>((artifact.slot, resolved))
        }))
        .await?;

        let overlay_policy = CachePolicy::new("overlay");
        let overlays = try_join_all(
            self.overlays
                .iter()
                .map(|reference| resolve_one(resolver, reference, &overlay_policy)),
        )
        .await?;

        let mut parameters = BTreeMap::new();
        for (name, value) in &self.parameters {
            let value = match value {
                ParamValue::Text(text) => text.clone(),
                ParamValue::Artifact(reference) => {
                    let policy = CachePolicy::new(name.to_lowercase());
                    resolve_one(resolver, reference, &policy).await?.url
                }
            };
            parameters.insert(name.clone(), value);
        }

        let test_definitions = match &self.test_definitions {
            Some(reference) => Some(
                resolve_one(resolver, reference, &CachePolicy::new("test-definitions")).await?,
            ),
            None => None,
        };

        Ok(ResolvedJob {
            plan: self,
            images,
            overlays,
            parameters,
            test_definitions,
        })
    }
}

async fn resolve_one(
    resolver: &ArtifactResolver,
    reference: &ArtifactReference,
    policy: &CachePolicy,
) -> ArtifactResult<ResolvedArtifact> {
    let path = resolver.resolve(reference, policy).await?;
    Ok(ResolvedArtifact::from_path(&path))
}

/// A local artifact as the engine addresses it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedArtifact {
    /// `file://` URL.
    pub url: String,
    /// Compression the engine must undo, if any.
    pub compression: Option<&'static str>,
}

impl ResolvedArtifact {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            url: format!("file://{}", path.display()),
            compression: compression_of(&name),
        }
    }
}

/// A plan whose artifacts are all local.
#[derive(Debug, Clone)]
pub struct ResolvedJob {
    plan: JobPlan,
    images: Vec<(Slot, ResolvedArtifact)>,
    overlays: Vec<ResolvedArtifact>,
    parameters: BTreeMap<String, String>,
    test_definitions: Option<ResolvedArtifact>,
}

impl ResolvedJob {
    pub fn plan(&self) -> &JobPlan {
        &self.plan
    }

    pub fn image(&self, slot: Slot) -> Option<&ResolvedArtifact> {
        self.images
            .iter()
            .find(|(s, _)| *s == slot)
            .map(|(_, artifact)| artifact)
    }

    pub fn parameters(&self) -> &BTreeMap<String, String> {
        &self.parameters
    }
}

/// Renders a resolved job.
///
/// Pure: the same job and identity always give the same definition.
pub fn render(job: &ResolvedJob, execution_id: &ExecutionId) -> JobDefinition {
    let plan = &job.plan;
    let ctx = RenderContext {
        device: plan.device,
        execution_id: execution_id.as_str(),
        images: &job.images,
        overlays: &job.overlays,
        parameters: &job.parameters,
        test_definitions: job.test_definitions.as_ref(),
        boot_args: plan.boot_args.as_deref(),
        command: &plan.command,
        deploy_timeout: plan.deploy_timeout,
        boot_timeout: plan.boot_timeout,
    };

    let mut actions = vec![
        Action {
            deploy: Some(template::deploy(&ctx)),
            ..Default::default()
        },
        Action {
            boot: Some(template::boot(&ctx)),
            ..Default::default()
        },
    ];
    for planned in &plan.tests {
        actions.push(Action {
            test: Some(template::test(&ctx, planned.test, planned.timeout)),
            ..Default::default()
        });
    }

    let names: Vec<String> = plan.tests.iter().map(|t| t.test.name.to_string()).collect();
    let summary = if names.is_empty() {
        "boot".to_string()
    } else {
        names.join(", ")
    };

    JobDefinition {
        device_type: template::device_type(plan.device).to_string(),
        job_name: format!("bootrun@{}: {}", plan.device.name, summary),
        timeouts: JobTimeouts {
            job: Minutes::new(plan.job_timeout()),
            connection: Minutes::new(CONNECTION_TIMEOUT),
        },
        priority: "medium".to_string(),
        visibility: "public".to_string(),
        context: template::context(&ctx),
        metadata: JobMetadata {
            execution_id: execution_id.to_string(),
            device: plan.device.name.to_string(),
            tests: names,
        },
        actions,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::artifact::ArtifactCache;
    use crate::artifact::testing::FakeFetcher;
    use tempfile::TempDir;

    const MORELLO_SLOTS: [Slot; 7] = [
        Slot::ApRomfw,
        Slot::McpFw,
        Slot::McpRomfw,
        Slot::Rootfs,
        Slot::ScpFw,
        Slot::ScpRomfw,
        Slot::Fip,
    ];

    fn storage() -> StorageConfig {
        StorageConfig::default()
    }

    fn request(device: &str) -> JobRequest {
        JobRequest {
            device: Some(device.to_string()),
            ..Default::default()
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    /// A morello-android request with every firmware slot filled from `dir`.
    fn morello_request(dir: &Path, device: &str) -> JobRequest {
        let firmware = dir.join("fvp.bin");
        std::fs::write(&firmware, b"fw").unwrap();
        let mut request = request(device);
        for slot in MORELLO_SLOTS {
            request
                .artifacts
                .insert(slot, firmware.to_string_lossy().into_owned());
        }
        request
    }

    fn resolver(temp_dir: &TempDir) -> (ArtifactResolver, Arc<FakeFetcher>) {
        let fetcher = Arc::new(FakeFetcher::new().serving_any());
        let resolver =
            ArtifactResolver::new(ArtifactCache::new(temp_dir.path().join("cache")), fetcher.clone());
        (resolver, fetcher)
    }

    async fn render_request(request: &JobRequest, temp_dir: &TempDir) -> JobDefinition {
        let (resolver, _) = resolver(temp_dir);
        let resolved = plan(request, &storage())
            .unwrap()
            .resolve(&resolver)
            .await
            .unwrap();
        render(&resolved, &ExecutionId::new("bootrun-ci"))
    }

    #[tokio::test]
    async fn test_default_boot_only_job() {
        let temp_dir = TempDir::new().unwrap();
        let job = render_request(&request("qemu-x86_64"), &temp_dir).await;

        assert_eq!(job.actions.len(), 2);
        assert_eq!(job.test_actions().count(), 0);
        assert_eq!(job.deploy().unwrap().timeout.minutes, 15);
        assert_eq!(job.boot().unwrap().timeout.minutes, 15);
        assert_eq!(job.timeouts.job.minutes, 30);
        assert_eq!(job.job_name, "bootrun@qemu-x86_64: boot");
        assert_eq!(job.device_type, "qemu");
    }

    #[tokio::test]
    async fn test_phase_timeouts_override_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let mut request = request("qemu-arm64");
        request.timeouts = parse_timeouts(&strings(&["deploy=4", "boot=12"])).unwrap();

        let job = render_request(&request, &temp_dir).await;
        assert_eq!(job.deploy().unwrap().timeout.minutes, 4);
        assert_eq!(job.boot().unwrap().timeout.minutes, 12);
        assert_eq!(job.timeouts.job.minutes, 16);
    }

    #[test]
    fn test_per_test_timeouts_and_order() {
        let mut request = request("qemu-armv7");
        request.tests = strings(&["ltp-fs_perms_simple", "ltp-fsx", "ltp-nptl"]);
        request.timeouts =
            parse_timeouts(&strings(&["ltp-fs_perms_simple=4", "ltp-fsx=3"])).unwrap();

        let plan = plan(&request, &storage()).unwrap();
        let planned: Vec<_> = plan
            .tests()
            .iter()
            .map(|t| (t.test.name, t.timeout))
            .collect();
        assert_eq!(
            planned,
            vec![("ltp-fs_perms_simple", 4), ("ltp-fsx", 3), ("ltp-nptl", 15)]
        );
        assert_eq!(plan.job_timeout(), 15 + 15 + 4 + 3 + 15);
    }

    #[test]
    fn test_build_directory_selects_device_and_leaves_modules_unset() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join("Image.gz"), b"kernel").unwrap();
        std::fs::write(
            temp_dir.path().join("metadata.json"),
            r#"{"results": {"artifacts": {"kernel": ["Image.gz"]}}, "build": {"target_arch": "arm64"}}"#,
        )
        .unwrap();

        let request = JobRequest {
            build_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let plan = plan(&request, &storage()).unwrap();

        assert_eq!(plan.device().name, "qemu-arm64");
        assert!(plan.artifact(Slot::Modules).is_none());
        assert_eq!(
            plan.artifact(Slot::Kernel),
            Some(&ArtifactReference::BuildOutput {
                dir: temp_dir.path().to_path_buf(),
                kind: BuildArtifact::Kernel,
            })
        );
    }

    #[tokio::test]
    async fn test_build_directory_kernel_renders_as_file_url() {
        let temp_dir = TempDir::new().unwrap();
        let build = temp_dir.path().join("build");
        std::fs::create_dir(&build).unwrap();
        std::fs::write(build.join("bzImage"), b"kernel").unwrap();
        std::fs::write(build.join("modules.tar.xz"), b"modules").unwrap();
        std::fs::write(
            build.join("metadata.json"),
            r#"{"results": {"artifacts": {"kernel": ["bzImage"], "modules": ["modules.tar.xz"]}}, "build": {"target_arch": "x86_64"}}"#,
        )
        .unwrap();

        let request = JobRequest {
            build_dir: Some(build.clone()),
            ..Default::default()
        };
        let (resolver, _) = resolver(&temp_dir);
        let resolved = plan(&request, &storage())
            .unwrap()
            .resolve(&resolver)
            .await
            .unwrap();

        assert_eq!(resolved.plan().device().name, "qemu-x86_64");
        assert_eq!(
            resolved.image(Slot::Kernel).unwrap().url,
            format!("file://{}", build.join("bzImage").display())
        );
        assert_eq!(resolved.image(Slot::Modules).unwrap().compression, Some("xz"));
    }

    #[test]
    fn test_invalid_build_directory_mentions_metadata() {
        let temp_dir = TempDir::new().unwrap();
        let request = JobRequest {
            build_dir: Some(temp_dir.path().to_path_buf()),
            ..Default::default()
        };
        let err = plan(&request, &storage()).unwrap_err();
        assert!(err.to_string().contains("metadata.json"));
    }

    #[test]
    fn test_invalid_requests() {
        let temp_dir = TempDir::new().unwrap();
        let dir = temp_dir.path();

        let mut cases: Vec<(&str, JobRequest)> = Vec::new();
        cases.push(("no device", JobRequest::default()));

        let mut r = request("qemu-armv7");
        r.boot_args = Some("bla\"bl".to_string());
        cases.push(("quote in boot args", r));

        let mut r = request("qemu-armv7");
        r.artifacts.insert(Slot::Dtb, "arm.dtb".to_string());
        cases.push(("dtb on armv7", r));

        let mut r = morello_request(dir, "fvp-morello-busybox");
        r.boot_args = Some("earlycon".to_string());
        cases.push(("boot args on morello", r));

        let mut r = request("qemu-arm64");
        r.artifacts.insert(Slot::Bios, "bios.bin".to_string());
        cases.push(("bios on arm64", r));

        let mut r = request("fvp-morello-android");
        r.artifacts.insert(Slot::McpFw, "fvp.bin".to_string());
        cases.push(("missing firmware", r));

        let mut r = morello_request(dir, "fvp-morello-android");
        r.tests = strings(&["bionic"]);
        r.parameters.insert("USERDATA".into(), "userdata.tar.xz".into());
        cases.push(("device parameter with tests", r));

        let mut r = morello_request(dir, "fvp-morello-android");
        r.tests = strings(&["bionic"]);
        r.parameters.insert("BIONIC_TEST_TYPE".into(), "invalid".into());
        cases.push(("bad allowed value", r));

        let mut r = morello_request(dir, "fvp-morello-android");
        r.tests = strings(&["lldb"]);
        cases.push(("missing required parameters", r));

        let mut r = morello_request(dir, "fvp-morello-android");
        r.tests = strings(&["lldb"]);
        r.parameters
            .insert("LLDB_URL".into(), "http://example.com/lldb.tar.xz".into());
        cases.push(("one required parameter missing", r));

        let mut r = morello_request(dir, "fvp-morello-android");
        r.tests = strings(&["libpdfium"]);
        r.parameters.insert(
            "PDF_URL".into(),
            "http://example.com/pdfium-testfiles.tar.xz".into(),
        );
        cases.push(("unknown parameter", r));

        for test in ["libjpeg-turbo", "libpng", "libpdfium", "zlib", "boringssl"] {
            let mut r = morello_request(dir, "fvp-morello-busybox");
            r.tests = strings(&[test]);
            cases.push(("android-only test on busybox", r));
        }

        let mut r = morello_request(dir, "fvp-morello-busybox");
        r.artifacts.insert(
            Slot::Kernel,
            "https://storage.tuxboot.com/i386/bzImage".to_string(),
        );
        cases.push(("kernel on morello", r));

        cases.push((
            "rootfs on ubuntu",
            morello_request(dir, "fvp-morello-ubuntu"),
        ));

        let mut r = request("qemu-x86_64");
        r.timeouts.insert("kunit".into(), 3);
        cases.push(("timeout for unrequested test", r));

        let mut r = request("qemu-x86_64");
        r.timeouts.insert("boot".into(), 0);
        cases.push(("zero timeout", r));

        let mut r = request("qemu-x86_64");
        r.timeouts.insert("boot".into(), u32::MAX);
        cases.push(("total timeout overflows", r));

        let mut r = request("qemu-x86_64");
        r.tests = strings(&["command"]);
        cases.push(("command test without command", r));

        let mut r = request("qemu-x86_64");
        r.tests = strings(&["kunit", "kunit"]);
        cases.push(("duplicate test", r));

        let mut r = request("qemu-armv7");
        r.tests = strings(&["mmtests-workload-usemem"]);
        cases.push(("unsupported pairing", r));

        let mut r = morello_request(dir, "fvp-morello-ubuntu");
        r.artifacts.remove(&Slot::Rootfs);
        r.overlays = strings(&["overlay.tar.xz"]);
        cases.push(("overlay without rootfs", r));

        for (label, request) in cases {
            assert!(plan(&request, &storage()).is_err(), "{} was accepted", label);
        }
    }

    #[test]
    fn test_boot_args_on_fvp_are_rejected() {
        let mut request = request("fvp-aemva");
        request.boot_args = Some("loglevel=8".to_string());

        let err = plan(&request, &storage()).unwrap_err();
        assert!(err.to_string().contains("fvp-aemva"));
        assert!(err.to_string().contains("boot arguments"));
    }

    #[test]
    fn test_overflowing_timeouts_are_rejected() {
        let mut request = request("qemu-x86_64");
        request.tests = strings(&["kunit"]);
        request.timeouts.insert("boot".into(), u32::MAX - 1);
        request.timeouts.insert("kunit".into(), 2);

        let err = plan(&request, &storage()).unwrap_err();
        assert!(err.to_string().contains("add up"));
    }

    #[test]
    fn test_device_parameter_without_tests() {
        let temp_dir = TempDir::new().unwrap();
        let mut request = morello_request(temp_dir.path(), "fvp-morello-android");
        request
            .parameters
            .insert("USERDATA".into(), "http://userdata.tar.xz".into());
        assert!(plan(&request, &storage()).is_ok());
    }

    #[test]
    fn test_trailing_command_appends_command_test_last() {
        let mut request = request("qemu-mips32");
        request.tests = strings(&["kunit"]);
        request.command = strings(&["cat", "/proc/cpuinfo"]);

        let plan = plan(&request, &storage()).unwrap();
        let names: Vec<_> = plan.tests().iter().map(|t| t.test.name).collect();
        assert_eq!(names, vec!["kunit", "command"]);
        assert!(plan.test_definitions().is_none());
    }

    #[test]
    fn test_bundle_only_when_needed() {
        let mut request = request("qemu-s390");
        request.tests = strings(&["ltp-smoke"]);
        let plan = plan(&request, &storage()).unwrap();
        assert_eq!(
            plan.test_definitions().unwrap().to_string(),
            storage().test_definitions
        );
    }

    #[tokio::test]
    async fn test_rendering_is_deterministic() {
        let temp_dir = TempDir::new().unwrap();
        let mut request = request("qemu-i386");
        request.tests = strings(&["kunit", "ltp-smoke"]);
        request.overlays = strings(&[
            "http://example.com/overlay1.tar.xz",
            "http://example.com/overlay2.tar.xz",
        ]);
        request.boot_args = Some("bla blo".to_string());

        let first = render_request(&request, &temp_dir).await.to_yaml().unwrap();
        let second = render_request(&request, &temp_dir).await.to_yaml().unwrap();
        assert_eq!(first, second);

        let overlay1 = first.find("overlay1.tar.xz").unwrap();
        let overlay2 = first.find("overlay2.tar.xz").unwrap();
        assert!(overlay1 < overlay2);
        assert!(first.contains("bla blo"));
    }

    #[tokio::test]
    async fn test_artifact_parameters_become_file_urls() {
        let temp_dir = TempDir::new().unwrap();
        let system = temp_dir.path().join("system.tar.xz");
        std::fs::write(&system, b"system").unwrap();

        let mut request = morello_request(temp_dir.path(), "fvp-morello-android");
        request.tests = strings(&["boringssl"]);
        request
            .parameters
            .insert("SYSTEM_URL".into(), system.to_string_lossy().into_owned());

        let (resolver, _) = resolver(&temp_dir);
        let resolved = plan(&request, &storage())
            .unwrap()
            .resolve(&resolver)
            .await
            .unwrap();
        assert_eq!(
            resolved.parameters()["SYSTEM_URL"],
            format!("file://{}", system.display())
        );
    }

    #[tokio::test]
    async fn test_remote_defaults_are_downloaded_once_per_slot() {
        let temp_dir = TempDir::new().unwrap();
        let (resolver, fetcher) = resolver(&temp_dir);

        for _ in 0..2 {
            plan(&request("qemu-armv5"), &storage())
                .unwrap()
                .resolve(&resolver)
                .await
                .unwrap();
        }
        // kernel, rootfs and dtb
        assert_eq!(fetcher.calls(), 3);
        let storage = storage();
        let device = Device::select("qemu-armv5").unwrap();
        for spec in &device.slots {
            if let Some(default) = spec.default {
                assert_eq!(fetcher.calls_for(&storage.url_for(default)), 1);
            }
        }
    }

    #[test]
    fn test_parse_key_values() {
        let parsed = parse_key_values(&strings(&["A=1", "B=x=y"])).unwrap();
        assert_eq!(parsed["A"], "1");
        assert_eq!(parsed["B"], "x=y");
        assert!(parse_key_values(&strings(&["novalue"])).is_err());
        assert!(parse_timeouts(&strings(&["boot=soon"])).is_err());
    }

    #[test]
    fn test_execution_ids_are_unique() {
        let a = ExecutionId::generate();
        let b = ExecutionId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("bootrun-"));
    }
}
