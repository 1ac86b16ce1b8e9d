//! wsrep-glue CLI binary
//!
//! Command-line interface for the schema version marker and helper processes.

#![allow(unused_crate_dependencies)]

use clap::{Parser, Subcommand};
use cli::{CliError, RunOptions, RunRequest, VersionCheck};
use schema::IoDirection;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::error;

#[derive(Parser)]
#[command(name = "wsrep-glue")]
#[command(about = "Replication glue: schema version marker and helper processes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML config file (defaults to $WSREP_GLUE_CONFIG)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Directory holding the state file
    #[arg(long, global = true, value_name = "DIR")]
    state_dir: Option<PathBuf>,

    /// State file name
    #[arg(long, global = true, value_name = "NAME")]
    state_file: Option<String>,

    /// Log level when RUST_LOG is unset
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect or update the schema version marker
    Version {
        #[command(subcommand)]
        cmd: VersionCmd,
    },
    /// Run a helper command with piped stdin/stdout
    Run {
        /// Configured helper id (mutually exclusive with --command)
        #[arg(required_unless_present = "command", conflicts_with = "command")]
        helper: Option<String>,
        /// Shell command line to run
        #[arg(long, short = 'c')]
        command: Option<String>,
        /// Pipe direction: r, w or rw (default r, or the helper's own)
        #[arg(long, short = 'd')]
        direction: Option<IoDirection>,
        /// Extra KEY=VALUE environment entries
        #[arg(long = "env", short = 'e', value_name = "KEY=VALUE")]
        env: Vec<String>,
        /// Start from an empty environment, overriding the helper's setting
        #[arg(long)]
        no_inherit_env: bool,
    },
    /// Print this node's best-guess IPv4 address
    GuessIp,
    /// Configuration commands
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Subcommand)]
enum VersionCmd {
    /// Print the stored marker
    Show,
    /// Compare the marker with a server version (exit 0 match, 1 mismatch, 2 missing)
    Check { server_version: String },
    /// Store a server version as the marker
    Save { server_version: String },
    /// Reset the marker to 0.0.0
    Clear,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the effective configuration as JSON
    Show,
}

fn main() -> ExitCode {
    let args = Cli::parse();

    match run(args) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!("Command failed: {}", e);
            eprintln!("error[{}]: {}", e.code(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Cli) -> cli::Result<u8> {
    let mut config = cli::load_config(args.config.as_deref())?;
    if let Some(dir) = args.state_dir {
        config.state_dir = dir;
    }
    if let Some(file) = args.state_file {
        config.state_file = file;
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate()?;

    wsrep_glue_core::utils::init_tracing(&config.log_level)?;

    match args.command {
        Commands::Version { cmd } => match cmd {
            VersionCmd::Show => match cli::show_version(&config.state_dir, &config.state_file) {
                Some(version) => {
                    println!("{}", version);
                    Ok(0)
                }
                None => Err(CliError::StateError(format!(
                    "no schema version marker in {}",
                    config.state_dir.join(&config.state_file).display()
                ))),
            },
            VersionCmd::Check { server_version } => {
                let outcome =
                    cli::check_version(&config.state_dir, &config.state_file, &server_version);
                match &outcome {
                    VersionCheck::Match { stored } => println!("match: {}", stored),
                    VersionCheck::Mismatch { stored, server } => {
                        println!("mismatch: stored {} server {}", stored, server)
                    }
                    VersionCheck::Missing => println!("missing"),
                }
                Ok(outcome.exit_code())
            }
            VersionCmd::Save { server_version } => {
                let saved =
                    cli::save_version(&config.state_dir, &config.state_file, &server_version)?;
                println!("{}", saved);
                Ok(0)
            }
            VersionCmd::Clear => {
                cli::clear_version(&config.state_dir, &config.state_file)?;
                Ok(0)
            }
        },
        Commands::Run {
            helper,
            command,
            direction,
            env,
            no_inherit_env,
        } => {
            let opts = RunOptions::resolve(
                &config,
                RunRequest {
                    helper_id: helper,
                    command,
                    direction,
                    extra_env: env,
                    no_inherit_env,
                },
            )?;
            let status = cli::run_helper(&opts, &mut io::stdin(), &mut io::stdout().lock())?;
            Ok(u8::try_from(status).unwrap_or(1))
        }
        Commands::GuessIp => {
            println!("{}", cli::guess_ip(&config)?);
            Ok(0)
        }
        Commands::Config { cmd } => match cmd {
            ConfigCmd::Show => {
                println!("{}", config.to_json_pretty()?);
                Ok(0)
            }
        },
    }
}
