//! Operator commands for wsrep-glue
//!
//! Each subcommand of the `wsrep-glue` binary is a plain function here so it
//! can be exercised without going through argument parsing.

pub mod error;

pub use error::{CliError, Result};

use schema::IoDirection;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use wsrep_glue_core::config::{default_config_path, load_config_from_toml_path};
use wsrep_glue_core::{GlueConfig, HelperSpec, Process, SchemaVersion, WsrepState};

/// Outcome of comparing the stored marker with a server version
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionCheck {
    /// Stored and server versions agree on major.minor.revision
    Match { stored: String },
    /// Versions differ
    Mismatch { stored: String, server: String },
    /// No readable marker
    Missing,
}

impl VersionCheck {
    /// Process exit code for this outcome
    pub fn exit_code(&self) -> u8 {
        match self {
            VersionCheck::Match { .. } => 0,
            VersionCheck::Mismatch { .. } => 1,
            VersionCheck::Missing => 2,
        }
    }
}

/// Load the config named by `path`, by `WSREP_GLUE_CONFIG`, or defaults
pub fn load_config(path: Option<&Path>) -> Result<GlueConfig> {
    let path: Option<PathBuf> = path.map(Path::to_path_buf).or_else(default_config_path);
    match path {
        Some(path) => {
            debug!("Loading config from {}", path.display());
            load_config_from_toml_path(&path).map_err(|e| CliError::ConfigError(e.to_string()))
        }
        None => Ok(GlueConfig::default()),
    }
}

/// The stored marker, if one can be loaded
pub fn show_version(dir: &Path, file: &str) -> Option<String> {
    let mut state = WsrepState::new();
    state
        .load_from(dir, file)
        .then_some(state.wsrep_schema_version)
}

/// Compare the stored marker against `server_version`
pub fn check_version(dir: &Path, file: &str, server_version: &str) -> VersionCheck {
    let mut state = WsrepState::new();
    if !state.load_from(dir, file) {
        return VersionCheck::Missing;
    }
    if state.wsrep_schema_version_equals(server_version) {
        VersionCheck::Match {
            stored: state.wsrep_schema_version,
        }
    } else {
        VersionCheck::Mismatch {
            stored: state.wsrep_schema_version,
            server: SchemaVersion::parse(server_version).to_string(),
        }
    }
}

/// Write `version` as the marker, returning the normalized form
pub fn save_version(dir: &Path, file: &str, version: &str) -> Result<String> {
    let mut state = WsrepState {
        wsrep_schema_version: version.to_string(),
    };
    if !state.save_to(dir, file) {
        return Err(CliError::StateError(format!(
            "failed to write {}",
            dir.join(file).display()
        )));
    }
    info!("Schema version marker set to {}", state.wsrep_schema_version);
    Ok(state.wsrep_schema_version)
}

/// Reset the marker so no server version matches until the next save
pub fn clear_version(dir: &Path, file: &str) -> Result<()> {
    let mut state = WsrepState::new();
    state.clear();
    if !state.save_to(dir, file) {
        return Err(CliError::StateError(format!(
            "failed to write {}",
            dir.join(file).display()
        )));
    }
    info!("Schema version marker cleared");
    Ok(())
}

/// Command-line choices for `run`
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Configured helper id
    pub helper_id: Option<String>,
    /// Ad-hoc shell command line
    pub command: Option<String>,
    /// Overrides the helper's direction; ad-hoc commands default to `r`
    pub direction: Option<IoDirection>,
    /// `KEY=VALUE` entries appended after the helper's own variables
    pub extra_env: Vec<String>,
    /// Start from an empty environment even if the helper inherits
    pub no_inherit_env: bool,
}

/// What to launch for `run`
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub helper: HelperSpec,
    pub extra_env: Vec<String>,
    pub terminate_grace: Duration,
}

impl RunOptions {
    /// Options for a bare command line
    pub fn command(command: &str, direction: IoDirection, grace: Duration) -> Self {
        Self {
            helper: HelperSpec::from_command(command, direction),
            extra_env: Vec::new(),
            terminate_grace: grace,
        }
    }

    /// Look up the requested helper and apply command-line overrides
    pub fn resolve(config: &GlueConfig, request: RunRequest) -> Result<Self> {
        let mut helper = match (request.helper_id, request.command) {
            (Some(id), None) => config
                .helper(&id)
                .cloned()
                .ok_or_else(|| CliError::InvalidArgument(format!("unknown helper '{}'", id)))?,
            (None, Some(command)) => HelperSpec::from_command(command, IoDirection::Read),
            _ => {
                return Err(CliError::InvalidArgument(
                    "exactly one of a helper id or --command is required".to_string(),
                ))
            }
        };
        if let Some(direction) = request.direction {
            helper.direction = direction;
        }
        if request.no_inherit_env {
            helper.inherit_env = false;
        }
        debug!(
            "Resolved helper '{}': '{}' ({}, inherit env: {})",
            helper.id, helper.command, helper.direction, helper.inherit_env
        );
        Ok(Self {
            helper,
            extra_env: request.extra_env,
            terminate_grace: config.terminate_grace(),
        })
    }
}

/// Run a helper, feeding it `input` and copying its output to `output`
///
/// Input is pumped on a scoped thread while the calling thread drains the
/// helper's output, so neither side can fill a pipe and stall the other.
/// Returns the helper's translated exit status.
pub fn run_helper(
    opts: &RunOptions,
    input: &mut (dyn Read + Send),
    output: &mut dyn Write,
) -> Result<i32> {
    let env = opts.helper.build_env(opts.extra_env.as_slice())?;
    let cmd = opts.helper.command.as_str();
    let direction = opts.helper.direction;

    let mut helper =
        Process::new(cmd, direction, Some(&env), false).with_terminate_grace(opts.terminate_grace);
    helper.execute(direction, Some(&env));
    if helper.error() != 0 {
        return Err(CliError::CommandFailed(format!(
            "failed to start '{}': {}",
            cmd,
            io::Error::from_raw_os_error(helper.error())
        )));
    }

    let writer = helper.take_write_pipe();
    let (fed, drained) = thread::scope(|scope| {
        let feeder = writer.map(|mut writer| {
            scope.spawn(move || -> io::Result<u64> {
                let n = io::copy(input, &mut writer)?;
                writer.flush()?;
                Ok(n)
            })
        });

        let drained = match helper.pipe() {
            Some(pipe) => io::copy(pipe, output).and_then(|n| output.flush().map(|()| n)),
            None => Ok(0),
        };
        if drained.is_err() {
            // Nobody reads the helper's output any more; stop it so the
            // feeder sees a closed pipe instead of blocking
            helper.terminate();
        }
        (feeder.map(|handle| handle.join()), drained)
    });

    match fed {
        Some(Ok(Ok(n))) => debug!("Wrote {} bytes to '{}'", n, cmd),
        Some(Ok(Err(e))) if e.kind() == io::ErrorKind::BrokenPipe => {
            warn!("'{}' closed its input early", cmd)
        }
        Some(Ok(Err(e))) => return Err(e.into()),
        Some(Err(_)) => {
            return Err(CliError::CommandFailed(format!(
                "input thread for '{}' panicked",
                cmd
            )))
        }
        None => {}
    }
    let n = drained?;
    debug!("Read {} bytes from '{}'", n, cmd);

    Ok(helper.wait())
}

/// Guess this node's address using the configured bind address and probe
pub fn guess_ip(config: &GlueConfig) -> Result<String> {
    wsrep_glue_core::net::guess_ip(config.bind_address.as_deref(), &config.ip_probe_command)
        .ok_or_else(|| CliError::CommandFailed("could not determine node address".to_string()))
}
