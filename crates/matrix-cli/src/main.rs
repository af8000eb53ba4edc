//! compat-matrix CLI
//!
//! Runs a library's test suite against every configured native-dependency
//! version, one throwaway container per version.
//!
//! ## Commands
//!
//! - `build-package`: run the configured build command in the workspace
//! - `test-matrix [VERSION]`: run all matrix entries, or only the named one
//! - `list`: print the configured matrix
//!
//! ## Exit codes
//!
//! 0 all entries passed, 1 at least one entry failed, 2 the source patch
//! could not be applied or restored (or another fatal error), 3 invalid
//! configuration, 130 interrupted.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info, warn, Level};

use matrix_core::{
    render_summary, write_report_json, ConfigurationError, MatrixConfig, MatrixError,
    Orchestrator, PatchError, CONFIG_ENV, RUNTIME_ENV,
};
use matrix_docker::DockerRunner;

const EXIT_PASSED: u8 = 0;
const EXIT_ENTRIES_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;
const EXIT_CONFIG: u8 = 3;
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "compat-matrix")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run a test suite against a matrix of dependency versions", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the distributable package
    BuildPackage {
        /// Project directory
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Matrix config file (JSON)
        #[arg(short, long, env = CONFIG_ENV)]
        config: Option<PathBuf>,

        /// Build command, overriding the configured one
        #[arg(long)]
        command: Option<String>,
    },

    /// Run the test suite for every matrix entry, or for one version
    TestMatrix {
        /// Only run the entry with this dependency version
        version: Option<String>,

        /// Project directory
        #[arg(short, long, default_value = ".")]
        workspace: PathBuf,

        /// Matrix config file (JSON)
        #[arg(short, long, env = CONFIG_ENV)]
        config: Option<PathBuf>,

        /// Entries to run concurrently, each in a private workspace copy
        #[arg(short, long, default_value = "1")]
        jobs: usize,

        /// Per-entry timeout in seconds (0 = unlimited)
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Write a JSON report to this path
        #[arg(long)]
        report: Option<PathBuf>,

        /// Container runtime binary
        #[arg(long, env = RUNTIME_ENV)]
        runtime: Option<String>,
    },

    /// Show the configured matrix
    List {
        /// Matrix config file (JSON)
        #[arg(short, long, env = CONFIG_ENV)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    matrix_core::init_tracing(cli.json, level);

    // Dropping the command future on Ctrl-C runs every live patch and
    // container guard before the process exits.
    let code = tokio::select! {
        outcome = run(cli.command) => match outcome {
            Ok(code) => code,
            Err(e) => {
                error!(error = %format!("{:#}", e), "compat-matrix failed");
                eprintln!("error: {:#}", e);
                exit_code_for(&e)
            }
        },
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, sources restored");
            EXIT_INTERRUPTED
        }
    };
    ExitCode::from(code)
}

async fn run(command: Commands) -> Result<u8> {
    match command {
        Commands::BuildPackage {
            workspace,
            config,
            command,
        } => cmd_build_package(&workspace, config.as_deref(), command).await,
        Commands::TestMatrix {
            version,
            workspace,
            config,
            jobs,
            timeout_secs,
            report,
            runtime,
        } => {
            let mut config = MatrixConfig::load(config.as_deref())?;
            if let Some(runtime) = runtime {
                config.container.runtime = runtime;
            }
            if let Some(secs) = timeout_secs {
                config.controls.entry_timeout_secs = secs;
            }
            config.validate()?;
            cmd_test_matrix(&config, &workspace, version.as_deref(), jobs, report.as_deref()).await
        }
        Commands::List { config } => {
            let config = MatrixConfig::load(config.as_deref())?;
            print!("{}", render_matrix(&config));
            Ok(EXIT_PASSED)
        }
    }
}

async fn cmd_build_package(
    workspace: &Path,
    config: Option<&Path>,
    command: Option<String>,
) -> Result<u8> {
    let config = MatrixConfig::load(config)?;
    let command = command.unwrap_or(config.build_command);
    info!(workspace = %workspace.display(), command = %command, "Building package");

    let status = tokio::process::Command::new("sh")
        .arg("-c")
        .arg(&command)
        .current_dir(workspace)
        .status()
        .await
        .with_context(|| format!("failed to run build command {:?}", command))?;

    match status.code() {
        Some(0) => {
            info!("Package built");
            Ok(EXIT_PASSED)
        }
        Some(code) => {
            warn!(exit_code = code, "Build command failed");
            Ok(u8::try_from(code).unwrap_or(EXIT_ENTRIES_FAILED))
        }
        None => anyhow::bail!("build command {:?} was killed by a signal", command),
    }
}

async fn cmd_test_matrix(
    config: &MatrixConfig,
    workspace: &Path,
    version: Option<&str>,
    jobs: usize,
    report_path: Option<&Path>,
) -> Result<u8> {
    let matrix = match version {
        Some(v) => config.matrix.select(v)?,
        None => config.matrix.clone(),
    };
    let workspace = workspace
        .canonicalize()
        .with_context(|| format!("workspace {:?} not found", workspace))?;

    info!(
        workspace = %workspace.display(),
        entries = matrix.len(),
        runtime = %config.container.runtime,
        jobs,
        "Running matrix"
    );

    let runner = Arc::new(DockerRunner::new(
        config.container.clone(),
        config.controls.clone(),
    ));
    let orchestrator = Orchestrator::new(runner, workspace)
        .with_patch_rule(config.patch.clone())
        .with_controls(config.controls.clone());

    let report = orchestrator.run_matrix_parallel(&matrix, jobs).await?;

    print!("{}", render_summary(&report));
    if let Some(path) = report_path {
        write_report_json(path, &report)?;
        info!(path = %path.display(), "Report written");
    }

    Ok(if report.overall_passed {
        EXIT_PASSED
    } else {
        EXIT_ENTRIES_FAILED
    })
}

fn render_matrix(config: &MatrixConfig) -> String {
    let mut out = String::new();
    for spec in config.matrix.entries() {
        out.push_str(&format!(
            "{:<12} bootstrap={:<10} image={}\n",
            spec.dependency_version,
            spec.bootstrap_variant.as_deref().unwrap_or("latest"),
            config.container.image_for(&spec.dependency_version)
        ));
    }
    out
}

/// Process exit code for an error that ended the command.
fn exit_code_for(err: &anyhow::Error) -> u8 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<MatrixError>() {
            return match e {
                MatrixError::Configuration(_) => EXIT_CONFIG,
                MatrixError::Patch(_) => EXIT_FATAL,
            };
        }
        if cause.downcast_ref::<ConfigurationError>().is_some() {
            return EXIT_CONFIG;
        }
        if cause.downcast_ref::<PatchError>().is_some() {
            return EXIT_FATAL;
        }
    }
    EXIT_FATAL
}
