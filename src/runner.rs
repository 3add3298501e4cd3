//! The run pipeline.
//!
//! ```text
//!  JobRequest ──plan()──► JobPlan ──resolve()──► ResolvedJob ──render()──► JobDefinition
//!                                                                               │
//!                                                         Dispatcher::run() ◄───┘
//!                                                               │
//!                                                     next_line() loop ──► LogSink
//!                                                               │        ──► console
//!                                                               ▼
//!                                                        Results::parse()
//!                                                               │
//!                                                      wait(), finalize()
//!                                                               ▼
//!                                                          ExitStatus
//! ```
//!
//! Validation happens entirely in `plan()`, so an invalid request never
//! downloads anything and never starts the engine.
//!
//! A [`PrebuiltJob`] skips planning and rendering and joins the pipeline at
//! dispatch.

pub mod log_sink;

use std::path::PathBuf;

use tracing::{debug, info, warn};

use crate::artifact::catalog::describe;
use crate::artifact::{
    ArtifactReference, ArtifactResolver, CachePolicy, CatalogEntry, CatalogSection, WarmReport,
    warm_cache,
};
use crate::config::{Config, StorageConfig};
use crate::device::{Device, Slot, registry};
use crate::dispatch::{DispatchHandle, Dispatcher, PrebuiltJob};
use crate::error::{ExitStatus, InvalidArgument, RunError};
use crate::render::{ExecutionId, JobDefinition, JobRequest, plan, render};
use crate::report;
use crate::results::Results;

pub use log_sink::LogSink;

/// Side outputs and modes of a run.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Persist the engine's log stream here.
    pub log_file: Option<PathBuf>,
    /// Write the results summary here.
    pub results_file: Option<PathBuf>,
    /// Render and print the job without dispatching it.
    pub dry_run: bool,
}

/// What a completed run produced.
#[derive(Debug)]
pub struct RunOutcome {
    /// The rendered job; `None` for a pre-rendered one.
    pub job: Option<JobDefinition>,
    pub results: Results,
    /// Engine exit code; `None` for a dry run.
    pub engine_exit: Option<i32>,
    pub status: ExitStatus,
}

/// Drives a request through resolution, rendering, dispatch and
/// aggregation.
pub struct Runner {
    config: Config,
    resolver: ArtifactResolver,
    dispatcher: Dispatcher,
}

impl Runner {
    pub fn new(config: Config, resolver: ArtifactResolver) -> Self {
        let dispatcher = Dispatcher::new(config.engine.clone());
        Self {
            config,
            resolver,
            dispatcher,
        }
    }

    /// Builds a runner with an HTTP-backed resolver.
    pub fn from_config(config: Config) -> Result<Self, RunError> {
        let resolver = ArtifactResolver::from_config(&config)?;
        Ok(Self::new(config, resolver))
    }

    /// Runs a request end to end.
    ///
    /// # Errors
    ///
    /// - [`RunError::InvalidArgument`] before any artifact is touched
    /// - [`RunError::Artifact`] when an artifact cannot be resolved
    /// - [`RunError::Dispatch`] when the engine cannot be started
    /// - [`RunError::Io`] when a side output cannot be written
    ///
    /// Failing tests are not an error; they show in [`RunOutcome::status`].
    pub async fn run(
        &self,
        request: &JobRequest,
        options: &RunOptions,
    ) -> Result<RunOutcome, RunError> {
        let plan = plan(request, &self.config.storage)?;
        let resolved = plan.resolve(&self.resolver).await?;
        let execution_id = ExecutionId::generate();
        let job = render(&resolved, &execution_id);

        if options.dry_run {
            let yaml = job
                .to_yaml()
                .map_err(|e| RunError::Other(anyhow::Error::new(e)))?;
            print!("{}", yaml);
            return Ok(RunOutcome {
                job: Some(job),
                results: Results::new(),
                engine_exit: None,
                status: ExitStatus::Success,
            });
        }

        let sink = open_sink(options).await?;
        let handle = self.dispatcher.run(&job).await?;
        let (results, engine_exit, status) = follow(handle, sink, options, &execution_id).await?;

        Ok(RunOutcome {
            job: Some(job),
            results,
            engine_exit: Some(engine_exit),
            status,
        })
    }

    /// Runs a pre-rendered job with its own device dictionary.
    ///
    /// # Errors
    ///
    /// [`RunError::InvalidArgument`] when either file does not exist,
    /// otherwise as [`Runner::run`].
    pub async fn run_prebuilt(
        &self,
        job: &PrebuiltJob,
        options: &RunOptions,
    ) -> Result<RunOutcome, RunError> {
        for (what, path) in [
            ("job definition", &job.definition),
            ("device dictionary", &job.device_dict),
        ] {
            if !path.is_file() {
                return Err(InvalidArgument::new(format!(
                    "{} '{}' does not exist",
                    what,
                    path.display()
                ))
                .into());
            }
        }

        if options.dry_run {
            print!("{}", tokio::fs::read_to_string(&job.definition).await?);
            return Ok(RunOutcome {
                job: None,
                results: Results::new(),
                engine_exit: None,
                status: ExitStatus::Success,
            });
        }

        let execution_id = ExecutionId::generate();
        let sink = open_sink(options).await?;
        let handle = self.dispatcher.run_prebuilt(job, &execution_id).await?;
        let (results, engine_exit, status) = follow(handle, sink, options, &execution_id).await?;

        Ok(RunOutcome {
            job: None,
            results,
            engine_exit: Some(engine_exit),
            status,
        })
    }

    /// Prints the default catalog and pre-fetches it.
    pub async fn update_cache(&self) -> Result<WarmReport, RunError> {
        let catalog = default_catalog(&self.config.storage)?;
        print!("{}", describe(&catalog));
        Ok(warm_cache(&self.resolver, &catalog).await)
    }
}

async fn open_sink(options: &RunOptions) -> Result<Option<LogSink>, RunError> {
    Ok(match &options.log_file {
        Some(path) => Some(LogSink::create(path).await?),
        None => None,
    })
}

/// Consumes the engine's log until it closes, then writes the side outputs.
async fn follow(
    mut handle: DispatchHandle,
    mut sink: Option<LogSink>,
    options: &RunOptions,
    execution_id: &ExecutionId,
) -> Result<(Results, i32, ExitStatus), RunError> {
    let mut results = Results::new();

    loop {
        let line = match handle.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!("Log stream ended abruptly: {}", e);
                break;
            }
        };
        if let Some(sink) = sink.as_mut() {
            sink.write(&line).await?;
        }
        if let Some(record) = results.parse(&line) {
            report::echo(&record);
        }
    }

    let engine_exit = handle.wait().await?;
    results.finalize();

    if let Some(sink) = sink {
        let written = sink.finish().await?;
        debug!("Wrote {} log record(s)", written);
    }
    if let Some(path) = &options.results_file {
        let summary = serde_json::to_string_pretty(&results.summary())
            .map_err(|e| RunError::Other(anyhow::Error::new(e)))?;
        tokio::fs::write(path, summary).await?;
    }

    report::print_summary(&results);
    let status = ExitStatus::from_verdict(results.ret());
    info!(
        "Run {} finished: engine exit {}, verdict {}",
        execution_id,
        engine_exit,
        status.code()
    );
    Ok((results, engine_exit, status))
}

/// Default root filesystems of every QEMU device, then the test-definition
/// bundle.
pub fn default_catalog(storage: &StorageConfig) -> Result<Vec<CatalogEntry>, InvalidArgument> {
    let mut catalog = Vec::new();
    for device in registry().iter().filter(|d| d.is_qemu()) {
        if let Some(entry) = rootfs_entry(device, storage)? {
            catalog.push(entry);
        }
    }
    catalog.push(CatalogEntry {
        label: "test definitions".to_string(),
        section: CatalogSection::TestDefinitions,
        reference: ArtifactReference::parse(&storage.test_definitions)?,
        policy: CachePolicy::new("test-definitions"),
    });
    Ok(catalog)
}

fn rootfs_entry(
    device: &Device,
    storage: &StorageConfig,
) -> Result<Option<CatalogEntry>, InvalidArgument> {
    let Some(spec) = device.slot(Slot::Rootfs) else {
        return Ok(None);
    };
    let Some(default) = spec.default else {
        return Ok(None);
    };
    Ok(Some(CatalogEntry {
        label: device.name.to_string(),
        section: CatalogSection::Rootfs,
        reference: ArtifactReference::parse(&storage.url_for(default))?,
        policy: spec.policy(),
    }))
}
