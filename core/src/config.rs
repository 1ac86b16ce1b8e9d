//! Configuration loading and validation for the replication glue layer
//!
//! This module parses a TOML configuration into [`GlueConfig`], applies
//! defaults via serde, and performs validation with field-path error
//! messages.
//!
//! ```toml
//! stateDir = "/var/lib/mysql"
//! terminateGraceMs = 2000
//!
//! [[helpers]]
//! id = "sst-donor"
//! command = "wsrep_sst_xtrabackup-v2 --role donor"
//! direction = "rw"
//! environment = { WSREP_SST_OPT_ROLE = "donor" }
//! ```

use crate::env::Env;
use crate::net::DEFAULT_IP_PROBE;
use crate::state::DEFAULT_STATE_FILE;
use crate::{CoreError, Result};
use schema::IoDirection;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming the default config file
pub const CONFIG_ENV_VAR: &str = "WSREP_GLUE_CONFIG";

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GlueConfig {
    /// Directory holding the schema version marker
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,

    /// Marker file name inside `state_dir`
    #[serde(default = "default_state_file")]
    pub state_file: String,

    /// Grace period between SIGTERM and SIGKILL for abandoned helpers
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    /// Command printing this node's address on its first line
    #[serde(default = "default_ip_probe_command")]
    pub ip_probe_command: String,

    /// Address the server is bound to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bind_address: Option<String>,

    /// Log level used when `RUST_LOG` is not set
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Named helper commands
    #[serde(default)]
    pub helpers: Vec<HelperSpec>,
}

/// A helper command the server may launch
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelperSpec {
    /// Unique identifier
    pub id: String,

    /// Shell command line
    pub command: String,

    /// Pipe direction
    #[serde(default = "default_direction")]
    pub direction: IoDirection,

    /// Variables added to the helper's environment
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Start from the server's own environment instead of an empty one
    #[serde(default = "default_true")]
    pub inherit_env: bool,
}

impl HelperSpec {
    /// An unnamed helper for a one-off command line
    pub fn from_command(command: impl Into<String>, direction: IoDirection) -> Self {
        Self {
            id: "command-line".to_string(),
            command: command.into(),
            direction,
            environment: BTreeMap::new(),
            inherit_env: true,
        }
    }

    /// Build the environment for this helper
    ///
    /// Starts from the process environment when `inherit_env` is set, then
    /// appends the configured variables and finally `extra` `KEY=VALUE`
    /// entries. A malformed entry or a failed append is an error.
    pub fn build_env<S: AsRef<str>>(&self, extra: &[S]) -> Result<Env> {
        let mut env = if self.inherit_env {
            Env::from_process()
        } else {
            Env::empty()
        };
        for (key, value) in &self.environment {
            env.append(format!("{key}={value}"));
        }
        for var in extra {
            let var = var.as_ref();
            if !var.contains('=') || var.starts_with('=') {
                return Err(CoreError::ValidationError(format!(
                    "environment entry '{}' is not KEY=VALUE",
                    var
                )));
            }
            env.append(var);
        }
        match env.error() {
            0 => Ok(env),
            libc::ENOMEM => Err(CoreError::Allocation(format!(
                "environment for helper '{}'",
                self.id
            ))),
            errno => Err(CoreError::ValidationError(format!(
                "environment for helper '{}': {}",
                self.id,
                std::io::Error::from_raw_os_error(errno)
            ))),
        }
    }
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("/var/lib/mysql")
}

fn default_state_file() -> String {
    DEFAULT_STATE_FILE.to_string()
}

fn default_terminate_grace_ms() -> u64 {
    5000
}

fn default_ip_probe_command() -> String {
    DEFAULT_IP_PROBE.to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_direction() -> IoDirection {
    IoDirection::Read
}

fn default_true() -> bool {
    true
}

impl Default for GlueConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            state_file: default_state_file(),
            terminate_grace_ms: default_terminate_grace_ms(),
            ip_probe_command: default_ip_probe_command(),
            bind_address: None,
            log_level: default_log_level(),
            helpers: Vec::new(),
        }
    }
}

impl GlueConfig {
    /// Grace period as a `Duration`
    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    /// Look up a helper by id
    pub fn helper(&self, id: &str) -> Option<&HelperSpec> {
        self.helpers.iter().find(|h| h.id == id)
    }

    /// Render as pretty JSON
    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration with field-path errors
    pub fn validate(&self) -> Result<()> {
        if self.state_dir.as_os_str().is_empty() {
            return Err(CoreError::ValidationError(
                "stateDir: cannot be empty".to_string(),
            ));
        }
        if self.state_file.trim().is_empty() {
            return Err(CoreError::ValidationError(
                "stateFile: cannot be empty".to_string(),
            ));
        }
        if self.state_file.contains('/') {
            return Err(CoreError::ValidationError(format!(
                "stateFile: '{}' must be a file name, not a path",
                self.state_file
            )));
        }
        if self.terminate_grace_ms == 0 {
            return Err(CoreError::ValidationError(
                "terminateGraceMs: must be > 0".to_string(),
            ));
        }

        let mut seen = HashSet::new();
        for (i, helper) in self.helpers.iter().enumerate() {
            if helper.id.trim().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "helpers[{}].id: cannot be empty",
                    i
                )));
            }
            if !seen.insert(helper.id.as_str()) {
                return Err(CoreError::ValidationError(format!(
                    "helpers[{}].id: duplicate id '{}'",
                    i, helper.id
                )));
            }
            if helper.command.trim().is_empty() {
                return Err(CoreError::ValidationError(format!(
                    "helpers[{}].command: cannot be empty",
                    i
                )));
            }
            for key in helper.environment.keys() {
                if key.trim().is_empty() || key.contains('=') || key.contains('\0') {
                    return Err(CoreError::ValidationError(format!(
                        "helpers[{}].environment: invalid key '{}'",
                        i, key
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Config path named by `WSREP_GLUE_CONFIG`, if set
pub fn default_config_path() -> Option<PathBuf> {
    std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from)
}

/// Load configuration from a TOML file path
pub fn load_config_from_toml_path(path: impl AsRef<Path>) -> Result<GlueConfig> {
    let data = fs::read_to_string(&path).map_err(|e| {
        CoreError::ConfigurationError(format!("Failed to read config {:?}: {}", path.as_ref(), e))
    })?;
    load_config_from_toml_str(&data)
}

/// Load configuration from a TOML string
pub fn load_config_from_toml_str(input: &str) -> Result<GlueConfig> {
    let cfg: GlueConfig = toml::from_str(input)
        .map_err(|e| CoreError::ConfigurationError(format!("TOML parse error: {}", e)))?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> String {
        r#"
        stateDir = "/tmp/wsrep"
        terminateGraceMs = 250
        bindAddress = "10.0.0.5"

        [[helpers]]
        id = "sst-donor"
        command = "cat"
        direction = "rw"
        inheritEnv = false
        environment = { WSREP_SST_OPT_ROLE = "donor", PATH = "/usr/bin:/bin" }

        [[helpers]]
        id = "notify"
        command = "logger -t wsrep"
        direction = "w"
        "#
        .to_string()
    }

    #[test]
    fn parses_and_validates_valid_config() {
        let cfg = load_config_from_toml_str(&valid_config()).expect("should parse");
        assert_eq!(cfg.state_dir, PathBuf::from("/tmp/wsrep"));
        assert_eq!(cfg.state_file, DEFAULT_STATE_FILE);
        assert_eq!(cfg.terminate_grace(), Duration::from_millis(250));
        assert_eq!(cfg.bind_address.as_deref(), Some("10.0.0.5"));
        assert_eq!(cfg.helpers.len(), 2);

        let donor = cfg.helper("sst-donor").unwrap();
        assert_eq!(donor.direction, IoDirection::ReadWrite);
        assert!(!donor.inherit_env);
        assert_eq!(cfg.helper("notify").unwrap().direction, IoDirection::Write);
        assert!(cfg.helper("notify").unwrap().inherit_env);
    }

    #[test]
    fn empty_input_uses_defaults() {
        let cfg = load_config_from_toml_str("").expect("should parse");
        assert_eq!(cfg, GlueConfig::default());
        assert_eq!(cfg.ip_probe_command, DEFAULT_IP_PROBE);
    }

    #[test]
    fn helper_env_without_inheritance() {
        let cfg = load_config_from_toml_str(&valid_config()).unwrap();
        let env = cfg.helper("sst-donor").unwrap().build_env::<&str>(&[]).unwrap();
        assert_eq!(env.error(), 0);
        let entries: Vec<_> = env.iter().map(|e| e.to_str().unwrap().to_string()).collect();
        // BTreeMap keeps keys sorted
        assert_eq!(entries, vec!["PATH=/usr/bin:/bin", "WSREP_SST_OPT_ROLE=donor"]);
    }

    #[test]
    fn helper_env_appends_extra_entries() {
        let cfg = load_config_from_toml_str(&valid_config()).unwrap();
        let donor = cfg.helper("sst-donor").unwrap();
        let env = donor.build_env(&["WSREP_SST_OPT_PORT=4444", "EMPTY="]).unwrap();
        let entries: Vec<_> = env.iter().map(|e| e.to_str().unwrap().to_string()).collect();
        assert_eq!(
            entries,
            vec![
                "PATH=/usr/bin:/bin",
                "WSREP_SST_OPT_ROLE=donor",
                "WSREP_SST_OPT_PORT=4444",
                "EMPTY="
            ]
        );
    }

    #[test]
    fn helper_env_rejects_malformed_entries() {
        let helper = HelperSpec::from_command("true", IoDirection::Read);
        for bad in ["NO_EQUALS_SIGN", "=value"] {
            let err = helper.build_env(&[bad]).unwrap_err();
            assert!(matches!(err, CoreError::ValidationError(_)), "{bad}");
        }

        let err = helper.build_env(&["A=b\0c"]).unwrap_err();
        assert_eq!(err.errno(), libc::EINVAL);
    }

    #[test]
    fn errors_on_duplicate_ids() {
        let input = r#"
        [[helpers]]
        id = "dup"
        command = "true"
        [[helpers]]
        id = "dup"
        command = "false"
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(format!("{}", err).contains("helpers[1].id: duplicate id"));
    }

    #[test]
    fn errors_on_empty_command() {
        let input = r#"
        [[helpers]]
        id = "h"
        command = "  "
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(format!("{}", err).contains("helpers[0].command"));
    }

    #[test]
    fn errors_on_bad_direction() {
        let input = r#"
        [[helpers]]
        id = "h"
        command = "true"
        direction = "x"
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
    }

    #[test]
    fn errors_on_invalid_fields() {
        let err = load_config_from_toml_str("terminateGraceMs = 0").unwrap_err();
        assert!(format!("{}", err).contains("terminateGraceMs"));

        let err = load_config_from_toml_str("stateFile = \"a/b\"").unwrap_err();
        assert!(format!("{}", err).contains("stateFile"));

        let input = r#"
        [[helpers]]
        id = "h"
        command = "true"
        environment = { "A=B" = "c" }
        "#;
        let err = load_config_from_toml_str(input).unwrap_err();
        assert!(format!("{}", err).contains("helpers[0].environment"));
    }

    #[test]
    fn loads_from_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("glue.toml");
        fs::write(&path, valid_config()).unwrap();
        let cfg = load_config_from_toml_path(&path).unwrap();
        assert_eq!(cfg.helpers.len(), 2);

        let err = load_config_from_toml_path(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, CoreError::ConfigurationError(_)));
    }

    #[test]
    fn renders_json() {
        let json = GlueConfig::default().to_json_pretty().unwrap();
        assert!(json.contains("\"stateFile\": \"wsrep_state.dat\""));
    }
}
