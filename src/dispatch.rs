//! Execution engine dispatch.
//!
//! The engine is an external program. It is handed the job as a file and
//! reports progress as one JSON record per line on stderr. Stdout carries
//! nothing we read and is discarded.
//!
//! # Engine command
//!
//! A rendered job runs `[engine] command`; a pre-rendered job with its own
//! device dictionary runs `[engine] replay_command`. Both are split with
//! shell quoting rules and placeholders are substituted per argument:
//!
//! | Placeholder | Value |
//! |-------------|-------|
//! | `{job}` | path of `definition.yaml` |
//! | `{output}` | an empty directory the engine may write into |
//! | `{id}` | the execution id of the job |
//! | `{device}` | path of `device.yaml`, pre-rendered jobs only |
//!
//! All paths live in a private temporary directory that is removed when the
//! [`DispatchHandle`] is dropped.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use tempfile::TempDir;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, ChildStderr};
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::render::{ExecutionId, JobDefinition};

/// Name of the job file handed to the engine.
pub const DEFINITION_FILE: &str = "definition.yaml";

/// Name of the device dictionary handed to the engine.
pub const DEVICE_FILE: &str = "device.yaml";

/// A job rendered elsewhere, run as-is with its device dictionary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrebuiltJob {
    pub definition: PathBuf,
    pub device_dict: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The engine could not be started at all.
    #[error("Failed to start execution engine: {0}")]
    StartFailed(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize job definition: {0}")]
    Serialize(#[from] serde_yaml::Error),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

/// Starts the execution engine.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: EngineConfig,
}

impl Dispatcher {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// The engine argv for a rendered job, placeholders substituted.
    ///
    /// # Errors
    ///
    /// [`DispatchError::StartFailed`] when the configured command has
    /// unbalanced quotes or is empty.
    pub fn command_line(&self, job: &Path, output: &Path, id: &str) -> DispatchResult<Vec<String>> {
        let job = job.to_string_lossy();
        let output = output.to_string_lossy();
        expand(
            &self.config.command,
            &[("{job}", &*job), ("{output}", &*output), ("{id}", id)],
        )
    }

    /// The engine argv for a pre-rendered job and device dictionary.
    pub fn replay_command_line(
        &self,
        job: &Path,
        device: &Path,
        output: &Path,
        id: &str,
    ) -> DispatchResult<Vec<String>> {
        let job = job.to_string_lossy();
        let device = device.to_string_lossy();
        let output = output.to_string_lossy();
        expand(
            &self.config.replay_command,
            &[
                ("{job}", &*job),
                ("{device}", &*device),
                ("{output}", &*output),
                ("{id}", id),
            ],
        )
    }

    /// Writes the job to disk and spawns the engine.
    pub async fn run(&self, job: &JobDefinition) -> DispatchResult<DispatchHandle> {
        let workdir = workdir().await?;
        let definition = workdir.path().join(DEFINITION_FILE);
        tokio::fs::write(&definition, job.to_yaml()?).await?;

        let output = workdir.path().join("output");
        let argv = self.command_line(&definition, &output, job.execution_id())?;
        let handle = spawn(&argv, workdir)?;
        info!("Dispatched {} ({})", job.job_name, job.execution_id());
        Ok(handle)
    }

    /// Copies a pre-rendered job and its device dictionary into a private
    /// directory and spawns the engine on them.
    pub async fn run_prebuilt(
        &self,
        job: &PrebuiltJob,
        id: &ExecutionId,
    ) -> DispatchResult<DispatchHandle> {
        let workdir = workdir().await?;
        let definition = workdir.path().join(DEFINITION_FILE);
        let device = workdir.path().join(DEVICE_FILE);
        tokio::fs::copy(&job.definition, &definition).await?;
        tokio::fs::copy(&job.device_dict, &device).await?;

        let output = workdir.path().join("output");
        let argv = self.replay_command_line(&definition, &device, &output, id.as_str())?;
        let handle = spawn(&argv, workdir)?;
        info!("Dispatched {} ({})", job.definition.display(), id);
        Ok(handle)
    }
}

fn expand(command: &str, placeholders: &[(&str, &str)]) -> DispatchResult<Vec<String>> {
    let words = shell_words::split(command).map_err(|e| {
        DispatchError::StartFailed(format!("invalid engine command '{}': {}", command, e))
    })?;
    if words.is_empty() {
        return Err(DispatchError::StartFailed(
            "engine command is empty".to_string(),
        ));
    }

    Ok(words
        .into_iter()
        .map(|word| {
            placeholders
                .iter()
                .fold(word, |word, &(name, value)| word.replace(name, value))
        })
        .collect())
}

async fn workdir() -> DispatchResult<TempDir> {
    let workdir = tempfile::Builder::new().prefix("bootrun-").tempdir()?;
    tokio::fs::create_dir(workdir.path().join("output")).await?;
    Ok(workdir)
}

fn spawn(argv: &[String], workdir: TempDir) -> DispatchResult<DispatchHandle> {
    debug!("Engine command: {}", shell_words::join(argv));

    let mut process = tokio::process::Command::new(&argv[0]);
    process
        .args(&argv[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = process
        .spawn()
        .map_err(|e| DispatchError::StartFailed(format!("{}: {}", argv[0], e)))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| DispatchError::StartFailed("stderr not captured".to_string()))?;

    Ok(DispatchHandle {
        child,
        stderr: BufReader::new(stderr),
        workdir,
    })
}

/// A running engine.
///
/// Dropping the handle kills the engine and removes its working directory.
pub struct DispatchHandle {
    child: Child,
    stderr: BufReader<ChildStderr>,
    workdir: TempDir,
}

impl DispatchHandle {
    /// The next line of the engine's log channel, `None` once it closes.
    ///
    /// Lines are returned as-is, blank ones included. Invalid UTF-8 is
    /// replaced rather than treated as an error.
    pub async fn next_line(&mut self) -> DispatchResult<Option<String>> {
        let mut buf = Vec::new();
        if self.stderr.read_until(b'\n', &mut buf).await? == 0 {
            return Ok(None);
        }
        if buf.last() == Some(&b'\n') {
            buf.pop();
            if buf.last() == Some(&b'\r') {
                buf.pop();
            }
        }
        Ok(Some(String::from_utf8_lossy(&buf).into_owned()))
    }

    /// Directory the engine was pointed at with `{output}`.
    pub fn output_dir(&self) -> PathBuf {
        self.workdir.path().join("output")
    }

    /// Waits for the engine to exit and returns its exit code.
    ///
    /// A non-zero code is not an error here; the verdict comes from the
    /// results the engine reported. Termination by signal yields `-1`.
    pub async fn wait(mut self) -> DispatchResult<i32> {
        let status = self.child.wait().await?;
        let code = status.code().unwrap_or(-1);
        if code != 0 {
            warn!("Execution engine exited with {}", status);
        } else {
            debug!("Execution engine exited cleanly");
        }
        Ok(code)
    }
}
