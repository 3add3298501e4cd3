//! bootrun CLI - boot kernels and run tests on emulated and virtual targets.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Args, Parser};
use tracing::{debug, error};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use bootrun::config::{self, Config};
use bootrun::device::{Device, Slot};
use bootrun::dispatch::PrebuiltJob;
use bootrun::error::{ExitStatus, InvalidArgument, RunError};
use bootrun::render::{JobRequest, parse_key_values, parse_timeouts};
use bootrun::runner::{RunOptions, Runner};
use bootrun::test_model::Test;

const DEFAULT_CONFIG: &str = "bootrun.toml";

#[derive(Parser)]
#[command(name = "bootrun")]
#[command(about = "Boot kernels and run tests on emulated and virtual targets", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path [default: bootrun.toml if present]
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Target device
    #[arg(long)]
    device: Option<String>,

    /// Device dictionary of a pre-rendered job
    #[arg(
        long,
        value_name = "FILE",
        requires = "definition",
        conflicts_with_all = ["device", "build_dir"]
    )]
    device_dict: Option<PathBuf>,

    /// Pre-rendered job definition, run as-is
    #[arg(long, value_name = "FILE", requires = "device_dict")]
    definition: Option<PathBuf>,

    /// Build-output directory providing the kernel and modules
    #[arg(long, value_name = "DIR")]
    build_dir: Option<PathBuf>,

    #[command(flatten)]
    artifacts: ArtifactArgs,

    /// Rootfs overlay archive (repeatable, applied in order)
    #[arg(long = "overlay", value_name = "URL")]
    overlays: Vec<String>,

    /// Tests to run, in order
    #[arg(long, num_args = 1.., value_name = "TEST")]
    tests: Vec<String>,

    /// Test parameters
    #[arg(long, num_args = 1.., value_name = "KEY=VALUE")]
    parameters: Vec<String>,

    /// Timeouts in minutes for `deploy`, `boot` or a requested test
    #[arg(long, num_args = 1.., value_name = "KEY=MINUTES")]
    timeouts: Vec<String>,

    /// Extra kernel command-line arguments
    #[arg(long, value_name = "ARGS")]
    boot_args: Option<String>,

    /// Test-definition bundle overriding the configured one
    #[arg(long, value_name = "URL")]
    test_definitions: Option<String>,

    /// Artifact cache directory
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Write the engine log to this file
    #[arg(long = "log", value_name = "FILE")]
    log_file: Option<PathBuf>,

    /// Write the results summary (JSON) to this file
    #[arg(long, value_name = "FILE")]
    results: Option<PathBuf>,

    /// Print the rendered job instead of running it
    #[arg(long)]
    dry_run: bool,

    /// List supported devices and exit
    #[arg(long)]
    list_devices: bool,

    /// List supported tests and exit
    #[arg(long)]
    list_tests: bool,

    /// Pre-fetch default root filesystems and test definitions
    #[arg(long)]
    update_cache: bool,

    /// Command to run after boot
    #[arg(last = true, value_name = "COMMAND")]
    command: Vec<String>,
}

/// One flag per artifact slot.
#[derive(Args)]
#[command(next_help_heading = "Artifacts")]
struct ArtifactArgs {
    #[arg(long, value_name = "URL")]
    kernel: Option<String>,
    #[arg(long, value_name = "URL")]
    modules: Option<String>,
    #[arg(long, value_name = "URL")]
    rootfs: Option<String>,
    #[arg(long, value_name = "URL")]
    dtb: Option<String>,
    #[arg(long, value_name = "URL")]
    bios: Option<String>,
    #[arg(long, value_name = "URL")]
    bl1: Option<String>,
    #[arg(long, value_name = "URL")]
    ap_romfw: Option<String>,
    #[arg(long, value_name = "URL")]
    mcp_fw: Option<String>,
    #[arg(long, value_name = "URL")]
    mcp_romfw: Option<String>,
    #[arg(long, value_name = "URL")]
    scp_fw: Option<String>,
    #[arg(long, value_name = "URL")]
    scp_romfw: Option<String>,
    #[arg(long, value_name = "URL")]
    fip: Option<String>,
}

impl ArtifactArgs {
    fn into_slots(self) -> BTreeMap<Slot, String> {
        [
            (Slot::Kernel, self.kernel),
            (Slot::Modules, self.modules),
            (Slot::Rootfs, self.rootfs),
            (Slot::Dtb, self.dtb),
            (Slot::Bios, self.bios),
            (Slot::Bl1, self.bl1),
            (Slot::ApRomfw, self.ap_romfw),
            (Slot::McpFw, self.mcp_fw),
            (Slot::McpRomfw, self.mcp_romfw),
            (Slot::ScpFw, self.scp_fw),
            (Slot::ScpRomfw, self.scp_romfw),
            (Slot::Fip, self.fip),
        ]
        .into_iter()
        .filter_map(|(slot, value)| value.map(|v| (slot, v)))
        .collect()
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to install logger: {}", e);
    }

    match run(cli).await {
        Ok(status) => status.into(),
        Err(e) => {
            error!("{}", e);
            eprintln!("bootrun: {}", e);
            e.exit_status().into()
        }
    }
}

async fn run(cli: Cli) -> Result<ExitStatus, RunError> {
    if cli.list_devices {
        for name in Device::list() {
            eprintln!("{}", name);
        }
        return Ok(ExitStatus::Success);
    }
    if cli.list_tests {
        for name in Test::list() {
            eprintln!("{}", name);
        }
        return Ok(ExitStatus::Success);
    }

    let mut config = load_config(cli.config.as_deref())?;
    if let Some(dir) = cli.cache_dir {
        config.cache.dir = Some(dir);
    }
    debug!("Cache directory: {}", config.cache.resolved_dir().display());
    let runner = Runner::from_config(config)?;

    if cli.update_cache {
        let report = runner.update_cache().await?;
        for (label, e) in &report.failures {
            eprintln!("Failed to cache {}: {}", label, e);
        }
        return Ok(if report.is_success() {
            ExitStatus::Success
        } else {
            ExitStatus::Infrastructure
        });
    }

    let options = RunOptions {
        log_file: cli.log_file,
        results_file: cli.results,
        dry_run: cli.dry_run,
    };

    if let (Some(device_dict), Some(definition)) = (cli.device_dict, cli.definition) {
        let job = PrebuiltJob {
            definition,
            device_dict,
        };
        let outcome = runner.run_prebuilt(&job, &options).await?;
        return Ok(outcome.status);
    }

    let request = JobRequest {
        device: cli.device,
        build_dir: cli.build_dir,
        artifacts: cli.artifacts.into_slots(),
        overlays: cli.overlays,
        tests: cli.tests,
        parameters: parse_key_values(&cli.parameters)?,
        timeouts: parse_timeouts(&cli.timeouts)?,
        boot_args: cli.boot_args,
        command: cli.command,
        test_definitions: cli.test_definitions,
    };

    let outcome = runner.run(&request, &options).await?;
    Ok(outcome.status)
}

/// An explicit `--config` must exist; the implicit one is optional.
fn load_config(path: Option<&Path>) -> Result<Config, InvalidArgument> {
    let loaded = match path {
        Some(path) => config::load_config(path),
        None => config::load_config_or_default(Path::new(DEFAULT_CONFIG)),
    };
    loaded.map_err(|e| InvalidArgument::new(format!("{:#}", e)))
}
