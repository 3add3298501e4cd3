//! bootrun: render, run and judge kernel test jobs.
//!
//! bootrun turns "boot this kernel on that target and run these tests" into
//! a job definition for an external execution engine, runs the engine, and
//! reduces its log stream to a single exit status.
//!
//! # Architecture
//!
//! The main components are:
//!
//! - **Artifact**: resolve local paths, URLs and build directories into
//!   cached local files
//! - **Device** / **Test model**: registries of supported targets and tests
//! - **Render**: validate a request and produce a deterministic job definition
//! - **Dispatch**: run the engine and stream its structured log
//! - **Results**: aggregate test-case outcomes into a verdict
//! - **Runner**: the pipeline tying the above together
//!
//! # Example
//!
//! ```no_run
//! use bootrun::config::load_config_or_default;
//! use bootrun::render::JobRequest;
//! use bootrun::runner::{RunOptions, Runner};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = load_config_or_default(std::path::Path::new("bootrun.toml"))?;
//!     let runner = Runner::from_config(config)?;
//!
//!     let request = JobRequest {
//!         device: Some("qemu-arm64".to_string()),
//!         tests: vec!["ltp-smoke".to_string()],
//!         ..Default::default()
//!     };
//!     let outcome = runner.run(&request, &RunOptions::default()).await?;
//!     std::process::exit(outcome.status.code().into());
//! }
//! ```

pub mod artifact;
pub mod config;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod render;
pub mod report;
pub mod results;
pub mod runner;
pub mod test_model;

// Re-export commonly used types
pub use config::{Config, load_config};
pub use dispatch::PrebuiltJob;
pub use error::{ExitStatus, InvalidArgument, RunError};
pub use render::{JobDefinition, JobRequest};
pub use results::{Outcome, Results, TestCaseResult};
pub use runner::{RunOptions, RunOutcome, Runner};
