//! Armsync CLI - inspect configuration and exercise the coordination core

mod demo;
mod stress;

use anyhow::Context;
use armsync_core::config::Config;
use armsync_core::domain::health::{HealthReport, HealthStatus};
use armsync_core::domain::resources::{ResourceManager, ResourceType};
use armsync_core::domain::threads::ThreadManager;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "armsync")]
#[command(author, version, about = "Concurrency coordination core for robot-cell control", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output, warnings only in logs)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose logging (debug level)
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /// Run a scripted demonstration
    Demo {
        #[command(subcommand)]
        scenario: DemoScenario,
    },

    /// Run a mixed lock / resource / task load and print a summary
    Stress {
        /// Number of tasks to submit
        #[arg(long, default_value_t = 200)]
        tasks: usize,
        /// Worker threads in the pool (defaults to workers.count)
        #[arg(long)]
        workers: Option<usize>,
        /// Client threads submitting tasks concurrently
        #[arg(long, default_value_t = 4)]
        threads: usize,
    },

    /// Health reports of a freshly constructed runtime
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the config file path
    Path,
    /// Print the effective configuration as TOML
    Show,
    /// Write the default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Get a configuration value
    Get {
        /// Configuration key (e.g. workers.count)
        key: String,
    },
    /// Set a configuration value
    Set {
        /// Configuration key
        key: String,
        /// New value
        value: String,
    },
    /// List all configuration values
    List,
    /// Reset configuration to defaults
    Reset,
}

#[derive(Subcommand)]
enum DemoScenario {
    /// Two threads cross-request two locks; one request is rejected
    Deadlock,
    /// Single-worker pool executing LOW, CRITICAL, NORMAL submissions
    Priority,
    /// Concurrent readers against a capped resource
    Resources {
        /// Number of reader threads
        #[arg(long, default_value_t = 5)]
        readers: usize,
        /// Maximum concurrent readers of the resource
        #[arg(long, default_value_t = 3)]
        max: usize,
    },
}

fn init_tracing(quiet: bool, verbose: bool) -> anyhow::Result<()> {
    let directive = if verbose {
        "armsync=debug"
    } else if quiet {
        "armsync=warn"
    } else {
        "armsync=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.quiet, cli.verbose)?;

    match cli.command {
        Commands::Config { action } => cmd_config(action, cli.quiet),
        Commands::Demo { scenario } => match scenario {
            DemoScenario::Deadlock => demo::deadlock(cli.format),
            DemoScenario::Priority => demo::priority(cli.format),
            DemoScenario::Resources { readers, max } => demo::resources(readers, max, cli.format),
        },
        Commands::Stress {
            tasks,
            workers,
            threads,
        } => {
            let config = Config::load()?;
            let summary = stress::run(&config, tasks, workers, threads)?;
            print_output(cli.format, &summary, |s| s.print_text())
        }
        Commands::Status => cmd_status(cli.format),
    }
}

/// Print `value` as pretty JSON, or through `text` otherwise
pub(crate) fn print_output<T: Serialize>(
    format: OutputFormat,
    value: &T,
    text: impl FnOnce(&T),
) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
            println!("{}", json);
        }
        OutputFormat::Text => text(value),
    }
    Ok(())
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
        ConfigAction::Show => {
            let config = Config::load()?;
            print!("{}", config.to_toml()?);
        }
        ConfigAction::Init { force } => {
            let path = Config::config_path()?;
            if path.exists() && !force {
                anyhow::bail!(
                    "Config file already exists: {}. Use --force to overwrite.",
                    path.display()
                );
            }
            let path = Config::default().save()?;
            if !quiet {
                println!("Wrote default configuration to {}", path.display());
            }
        }
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Reset => {
            Config::reset()?;
            if !quiet {
                println!("Configuration reset to defaults.");
            }
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct StatusOutput {
    config_path: String,
    workers: usize,
    reports: Vec<HealthReport>,
}

fn cmd_status(format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let runtime = ThreadManager::new(config.thread_manager_config())
        .context("Failed to start thread manager")?;

    let resources = ResourceManager::new(runtime.locks().clone(), config.resource_config());
    for (id, resource_type, max) in [
        ("robot", ResourceType::Robot, 1),
        ("gripper", ResourceType::Gripper, 1),
        ("camera", ResourceType::Camera, 3),
    ] {
        resources.register(id, resource_type, max, None);
    }

    let output = StatusOutput {
        config_path: Config::config_path()?.display().to_string(),
        workers: runtime.pool().worker_count(),
        reports: vec![
            runtime.health(),
            resources.health(&config.health_config()),
        ],
    };
    runtime.shutdown(Duration::from_secs(2));

    print_output(format, &output, |output| {
        println!("Armsync Status");
        println!("==============");
        println!("Config: {}", output.config_path);
        println!("Workers: {}", output.workers);
        println!();
        for report in &output.reports {
            let marker = match report.status {
                HealthStatus::Healthy => "OK",
                HealthStatus::Warning => "WARN",
                HealthStatus::Error => "ERROR",
            };
            println!("[{}] {}: {}", marker, report.component, report.message);
            for (key, value) in &report.metrics {
                println!("      {} = {}", key, value);
            }
        }
    })
}
