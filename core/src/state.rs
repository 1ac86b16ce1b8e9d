//! Persisted schema version marker for the replication state store
//!
//! The marker file holds a single `major.minor.revision` string. Versions are
//! normalized permissively: extra components and trailing qualifiers are
//! dropped (`8.0.15-5` becomes `8.0.15`), missing or non-numeric components
//! become 0 (`8.0` becomes `8.0.0`, `a.b.c` becomes `0.0.0`).
//!
//! Writes go through a temp file in the same directory followed by a rename,
//! the same procedure as snapshot persistence elsewhere in the workspace.

use crate::{CoreError, Result};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Default marker file name inside the server's data directory
pub const DEFAULT_STATE_FILE: &str = "wsrep_state.dat";

/// A normalized three-component version
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct SchemaVersion {
    pub major: u32,
    pub minor: u32,
    pub revision: u32,
}

impl SchemaVersion {
    /// Normalize any version text, never failing
    pub fn parse(s: &str) -> Self {
        let (major, minor, revision) = parse_version(s);
        Self {
            major,
            minor,
            revision,
        }
    }
}

impl fmt::Display for SchemaVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.revision)
    }
}

impl From<&str> for SchemaVersion {
    fn from(s: &str) -> Self {
        Self::parse(s)
    }
}

/// Replication state persisted next to the server's data
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsrepState {
    /// Version the replication schema was last written by
    ///
    /// Normalized to `x.y.z` after loading and before saving.
    pub wsrep_schema_version: String,
}

impl WsrepState {
    /// Create an empty state
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all data to defaults
    pub fn clear(&mut self) {
        self.wsrep_schema_version.clear();
    }

    /// Load the marker from `dir/filename`
    ///
    /// Returns `false` and leaves the stored version untouched if the file is
    /// missing, unreadable or does not hold a version string.
    pub fn load_from(&mut self, dir: impl AsRef<Path>, filename: &str) -> bool {
        let path = dir.as_ref().join(filename);
        match read_version_file(&path) {
            Ok(version) => {
                self.wsrep_schema_version = SchemaVersion::parse(&version).to_string();
                debug!(
                    "Loaded wsrep schema version {} from {}",
                    self.wsrep_schema_version,
                    path.display()
                );
                true
            }
            Err(e) => {
                warn!("Could not load wsrep state from {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Normalize the stored version and write it to `dir/filename`
    ///
    /// Any previous content is replaced. Returns `false` on I/O failure, in
    /// which case the existing file is left as it was.
    pub fn save_to(&mut self, dir: impl AsRef<Path>, filename: &str) -> bool {
        self.wsrep_schema_version = self.schema_version().to_string();
        let path = dir.as_ref().join(filename);
        match write_version_file_atomic(&path, &self.wsrep_schema_version) {
            Ok(()) => {
                info!(
                    "Saved wsrep schema version {} to {}",
                    self.wsrep_schema_version,
                    path.display()
                );
                true
            }
            Err(e) => {
                warn!("Could not save wsrep state to {}: {}", path.display(), e);
                false
            }
        }
    }

    /// Whether the stored version equals `server_version` on major, minor
    /// and revision after both are normalized
    pub fn wsrep_schema_version_equals(&self, server_version: &str) -> bool {
        self.schema_version() == SchemaVersion::parse(server_version)
    }

    /// The stored version in normalized form
    pub fn schema_version(&self) -> SchemaVersion {
        SchemaVersion::parse(&self.wsrep_schema_version)
    }
}

/// Split `s` into major, minor and revision
///
/// Each component is the leading run of ASCII digits of its dot-separated
/// field; an absent, non-numeric or overflowing component is 0.
fn parse_version(s: &str) -> (u32, u32, u32) {
    let mut fields = s.trim().split('.').map(parse_component);
    let major = fields.next().unwrap_or(0);
    let minor = fields.next().unwrap_or(0);
    let revision = fields.next().unwrap_or(0);
    (major, minor, revision)
}

fn parse_component(field: &str) -> u32 {
    let digits = field
        .find(|c: char| !c.is_ascii_digit())
        .map_or(field, |end| &field[..end]);
    digits.parse().unwrap_or(0)
}

fn is_well_formed(content: &str) -> bool {
    content.starts_with(|c: char| c.is_ascii_digit())
        && !content.contains(char::is_whitespace)
}

fn read_version_file(path: &Path) -> Result<String> {
    let content = fs::read_to_string(path).map_err(|e| {
        CoreError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to read {}: {}", path.display(), e),
        ))
    })?;

    let version = content.trim();
    if !is_well_formed(version) {
        return Err(CoreError::ValidationError(format!(
            "{} does not contain a version string",
            path.display()
        )));
    }
    Ok(version.to_string())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{name}.tmp"))
}

/// Write `version` to `path` via temp file, fsync and rename
fn write_version_file_atomic(path: &Path, version: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            CoreError::IoError(std::io::Error::new(
                e.kind(),
                format!("Failed to create state dir {}: {}", parent.display(), e),
            ))
        })?;
    }

    let tmp_path = temp_path_for(path);
    let written = (|| -> std::io::Result<()> {
        let mut f = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)?;
        f.write_all(version.as_bytes())?;
        f.write_all(b"\n")?;
        f.flush()?;
        // Best-effort durability
        let _ = f.sync_all();
        fs::rename(&tmp_path, path)
    })();

    if let Err(e) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(CoreError::IoError(std::io::Error::new(
            e.kind(),
            format!("Failed to replace {}: {}", path.display(), e),
        )));
    }

    // Best-effort fsync of directory to persist rename
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }

    Ok(())
}
