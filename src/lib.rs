pub mod adt;
pub mod config;
pub mod error;
pub mod filestore;
pub mod model;
pub mod orchestrator;
pub mod resources;
pub mod transport;

use anyhow::{Context, Result, bail};
use clap::{CommandFactory, Parser, Subcommand};
use colored::Colorize;
use config::{ConfigValidationResult, DeployConfig};
use error::DeployError;
use orchestrator::DeployReport;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default configuration file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "bsp-sync.toml";

/// Command-line interface.
#[derive(Parser, Debug)]
#[command(
    name = "bsp-sync",
    version,
    about = "Deploy static web artifacts into an ABAP BSP repository over ADT"
)]
pub struct Cli {
    /// Path to the deploy configuration
    #[arg(long, short, env = "BSP_SYNC_CONFIG", default_value = DEFAULT_CONFIG_FILE, global = true)]
    pub config: PathBuf,

    /// More log output (repeat for trace)
    #[arg(long, short, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Only log errors
    #[arg(long, short, global = true, conflicts_with = "verbose")]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a transport and synchronize local files into the BSP container
    Deploy {
        #[command(flatten)]
        overrides: Overrides,

        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },
    /// Check the configuration without contacting the server
    Validate {
        #[command(flatten)]
        overrides: Overrides,
    },
    /// Generate shell completions to stdout
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate man page to stdout
    Man,
}

/// Command-line values that take precedence over the configuration file.
#[derive(clap::Args, Debug, Default, Clone)]
pub struct Overrides {
    /// Use this transport request instead of the configured policy
    #[arg(long)]
    pub transport: Option<String>,

    /// Directory holding the artifacts to deploy
    #[arg(long)]
    pub base_dir: Option<PathBuf>,
}

impl Overrides {
    pub fn apply(&self, config: &mut DeployConfig) {
        if let Some(transport) = &self.transport {
            config.target.transport_no = Some(transport.clone());
            config.target.create_transport = false;
            config.target.transport_use_locked = false;
            config.target.transport_use_user_match = false;
        }
        if let Some(base_dir) = &self.base_dir {
            config.resources.base_dir = base_dir.clone();
        }
    }
}

/// Default `EnvFilter` directive for the CLI verbosity flags.
pub fn log_directive(verbose: u8, quiet: bool) -> &'static str {
    match (quiet, verbose) {
        (true, _) => "error",
        (false, 0) => "bsp_sync=info,warn",
        (false, 1) => "bsp_sync=debug,info",
        (false, _) => "trace",
    }
}

pub async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Deploy { overrides, json } => run_deploy(&cli.config, &overrides, json).await,
        Commands::Validate { overrides } => run_validate(&cli.config, &overrides),
        Commands::Completions { shell } => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "bsp-sync", &mut std::io::stdout());
            Ok(())
        }
        Commands::Man => {
            let cmd = Cli::command();
            let man = clap_mangen::Man::new(cmd);
            let mut out = std::io::stdout();
            man.render(&mut out)?;
            Ok(())
        }
    }
}

fn load_config(path: &Path, overrides: &Overrides) -> Result<DeployConfig> {
    let mut config = DeployConfig::load(path)?;
    overrides.apply(&mut config);
    config
        .resolve_env_vars()
        .context("resolving environment references in configuration")?;
    Ok(config)
}

fn run_validate(path: &Path, overrides: &Overrides) -> Result<()> {
    let result = match load_config(path, overrides) {
        Ok(config) => config.validate(),
        Err(e) => ConfigValidationResult {
            valid: false,
            errors: vec![format!("{e:#}")],
            warnings: Vec::new(),
        },
    };
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.valid {
        bail!("configuration {} is invalid", path.display());
    }
    Ok(())
}

async fn run_deploy(path: &Path, overrides: &Overrides, json: bool) -> Result<()> {
    let config = load_config(path, overrides)?;
    let validation = config.validate();
    for warning in &validation.warnings {
        warn!("{warning}");
    }
    if !validation.valid {
        let err = DeployError::Configuration(validation.errors);
        print_failure(&err, json)?;
        return Err(err.into());
    }
    let resolved = config.resolve()?;

    match orchestrator::deploy(&resolved).await {
        Ok(report) => {
            print_report(&report, json)?;
            Ok(())
        }
        Err(err) => {
            print_failure(&err, json)?;
            Err(err.into())
        }
    }
}

fn print_report(report: &DeployReport, json: bool) -> Result<()> {
    if json {
        let value = serde_json::json!({ "success": true, "report": report });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    let transport = report
        .transport
        .as_ref()
        .map_or_else(|| "none".to_string(), ToString::to_string);
    println!(
        "{} Deployed {} file(s) to {} (package {}, transport {})",
        "✓".green(),
        report.synced.len(),
        report.container.cyan(),
        report.package,
        transport.bold()
    );
    for path in &report.synced {
        println!("  {path}");
    }
    if report.app_index_calculated {
        println!("{} Application index recalculated", "✓".green());
    }
    Ok(())
}

fn print_failure(err: &DeployError, json: bool) -> Result<()> {
    let failed = err.failed_files();

    if json {
        let value = serde_json::json!({
            "success": false,
            "stage": err.stage().to_string(),
            "kind": err.kind(),
            "error": err.to_string(),
            "failed": failed,
        });
        println!("{}", serde_json::to_string_pretty(&value)?);
        return Ok(());
    }

    eprintln!(
        "{} Deploy failed during {} ({})",
        "✗".red(),
        err.stage(),
        err.kind()
    );
    if failed.is_empty() {
        eprintln!("  {err}");
    }
    for outcome in failed {
        eprintln!(
            "  {} {}",
            outcome.path.yellow(),
            outcome.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
