//! farwel command line.
//!
//! ```bash
//! # Show what a configuration resolves to
//! farwel check farwel.json
//!
//! # Run a program with the interposer loaded
//! farwel run --config farwel.json -- ls -l /data
//! ```

use std::path::{Path, PathBuf};
use std::process::{Command, ExitCode};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt};

use farwel_kernel::{CONFIG_ENV, ConnectorRegistry, Dispatcher, FarwelConfig, LibcOs, LoadReport};

/// File name the preload crate builds to.
const PRELOAD_LIB: &str = "libfarwel.so";

#[derive(Parser, Debug)]
#[command(name = "farwel")]
#[command(about = "Route file I/O of unmodified programs to pluggable connectors")]
struct Args {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Load a configuration and print its connectors and routes
    Check {
        config: PathBuf,

        /// Fail if any entry had to be skipped
        #[arg(long)]
        strict: bool,
    },

    /// Run a command with the interposer preloaded
    Run {
        /// Configuration document
        #[arg(short, long)]
        config: PathBuf,

        /// Shared library to preload (default: next to this binary)
        #[arg(long)]
        preload: Option<PathBuf>,

        /// Command and arguments
        #[arg(last = true, required = true)]
        command: Vec<String>,
    },

    /// List the connector types that can appear in a configuration
    Types,
}

fn main() -> ExitCode {
    fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    let args = Args::parse();
    let result = match args.command {
        Cmd::Check { config, strict } => check(&config, strict).map(|()| ExitCode::SUCCESS),
        Cmd::Run {
            config,
            preload,
            command,
        } => run(&config, preload, &command),
        Cmd::Types => {
            for name in ConnectorRegistry::with_builtins().types() {
                println!("{name}");
            }
            Ok(ExitCode::SUCCESS)
        }
    };

    result.unwrap_or_else(|e| {
        eprintln!("farwel: {e:#}");
        ExitCode::FAILURE
    })
}

fn check(path: &Path, strict: bool) -> Result<()> {
    let config = FarwelConfig::from_path(path)?;
    let mut dispatcher = Dispatcher::new(Arc::new(LibcOs::resolve()));
    let report = dispatcher.load_configuration(&config);
    print!("{}", render(&config, &dispatcher, &report));

    if strict && !report.skipped.is_empty() {
        bail!("{} entries skipped", report.skipped.len());
    }
    Ok(())
}

fn render(config: &FarwelConfig, dispatcher: &Dispatcher, report: &LoadReport) -> String {
    let mut out = String::new();
    out.push_str("connectors:\n");
    for connector in dispatcher.connectors() {
        let kind = config
            .connectors
            .get(connector.name())
            .map(|c| c.kind.as_str())
            .unwrap_or("?");
        out.push_str(&format!("  {} ({kind})\n", connector.name()));
    }

    out.push_str("routes:\n");
    for (n, location) in dispatcher.routes().iter().enumerate() {
        let target = dispatcher
            .connectors()
            .get(location.connector().index())
            .map(|c| c.name())
            .unwrap_or("?");
        out.push_str(&format!(
            "  {}. {} -> {target} (priority {})\n",
            n + 1,
            location.rule,
            location.priority
        ));
    }

    if !report.skipped.is_empty() {
        out.push_str("skipped:\n");
        for entry in &report.skipped {
            out.push_str(&format!("  {entry}\n"));
        }
    }
    out
}

fn default_preload() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("locating farwel binary")?;
    let dir = exe.parent().context("farwel binary has no parent directory")?;
    Ok(dir.join(PRELOAD_LIB))
}

fn run(config: &Path, preload: Option<PathBuf>, command: &[String]) -> Result<ExitCode> {
    // Parse up front so a bad file fails here, not inside the child.
    FarwelConfig::from_path(config)?;
    let config = config
        .canonicalize()
        .with_context(|| format!("resolving {}", config.display()))?;

    let preload = match preload {
        Some(p) => p,
        None => default_preload()?,
    };
    if !preload.exists() {
        bail!("preload library {} not found", preload.display());
    }
    let preload = preload.canonicalize()?;

    let Some((program, rest)) = command.split_first() else {
        bail!("no command given");
    };
    tracing::info!(program = %program, preload = %preload.display(), "launching");

    let status = Command::new(program)
        .args(rest)
        .env("LD_PRELOAD", &preload)
        .env(CONFIG_ENV, &config)
        .status()
        .with_context(|| format!("spawning {program}"))?;

    Ok(match status.code() {
        Some(code) => ExitCode::from(code as u8),
        None => ExitCode::FAILURE,
    })
}
