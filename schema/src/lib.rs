//! Schema definitions for wsrep-glue
//!
//! This crate contains the shared data structures passed between the
//! replication glue core, the operator CLI and the embedding server. All
//! types here implement JSON Schema generation for external consumption.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Membership status of the local node within the replication group
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub enum MemberStatus {
    /// Status not yet known (initial state)
    #[default]
    Undefined,
    /// Node is receiving a state transfer
    Joiner,
    /// Node is serving a state transfer
    Donor,
    /// Node has received state but is not yet caught up
    Joined,
    /// Node is fully synchronized with the group
    Synced,
    /// Node is in an unrecoverable error state
    Error,
}

impl MemberStatus {
    /// Lower-case name as reported to operators
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Undefined => "undefined",
            MemberStatus::Joiner => "joiner",
            MemberStatus::Donor => "donor",
            MemberStatus::Joined => "joined",
            MemberStatus::Synced => "synced",
            MemberStatus::Error => "error",
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Component status of a group view
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ViewStatus {
    /// Primary component, allowed to commit
    Primary,
    /// Non-primary component
    NonPrimary,
    /// Node is disconnected from the group
    #[default]
    Disconnected,
}

/// Snapshot of the group view delivered alongside a status notification
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ViewInfo {
    /// Group state UUID
    pub state_uuid: String,
    /// Global sequence number at which the view was installed
    pub seqno: i64,
    /// Monotonic view identifier
    pub view_id: i64,
    /// Component status
    pub status: ViewStatus,
    /// Index of the local node in `members`, if it is a member
    #[serde(skip_serializing_if = "Option::is_none")]
    pub my_index: Option<usize>,
    /// Member names in view order
    #[serde(default)]
    pub members: Vec<String>,
}

impl ViewInfo {
    /// Number of members in the view
    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    /// Whether this view is a primary component
    pub fn is_primary(&self) -> bool {
        self.status == ViewStatus::Primary
    }
}

/// Requested pipe direction for a helper process
///
/// Textual form follows the `popen`-style tokens `r`, `w` and `rw`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Hash)]
pub enum IoDirection {
    /// Parent reads the child's stdout
    #[serde(rename = "r")]
    Read,
    /// Parent writes the child's stdin
    #[serde(rename = "w")]
    Write,
    /// Parent reads stdout and writes stdin
    #[serde(rename = "rw")]
    ReadWrite,
}

impl IoDirection {
    /// Whether the parent gets a read handle
    pub fn reads(&self) -> bool {
        matches!(self, IoDirection::Read | IoDirection::ReadWrite)
    }

    /// Whether the parent gets a write handle
    pub fn writes(&self) -> bool {
        matches!(self, IoDirection::Write | IoDirection::ReadWrite)
    }

    /// The textual token
    pub fn as_str(&self) -> &'static str {
        match self {
            IoDirection::Read => "r",
            IoDirection::Write => "w",
            IoDirection::ReadWrite => "rw",
        }
    }
}

impl fmt::Display for IoDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when an I/O direction token is not one of `r`, `w`, `rw`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidIoDirection(pub String);

impl fmt::Display for InvalidIoDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid I/O direction '{}' (expected r, w or rw)", self.0)
    }
}

impl std::error::Error for InvalidIoDirection {}

impl FromStr for IoDirection {
    type Err = InvalidIoDirection;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "r" => Ok(IoDirection::Read),
            "w" => Ok(IoDirection::Write),
            "rw" => Ok(IoDirection::ReadWrite),
            other => Err(InvalidIoDirection(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_direction_tokens() {
        assert_eq!("r".parse::<IoDirection>(), Ok(IoDirection::Read));
        assert_eq!("w".parse::<IoDirection>(), Ok(IoDirection::Write));
        assert_eq!("rw".parse::<IoDirection>(), Ok(IoDirection::ReadWrite));
        assert!("wr".parse::<IoDirection>().is_err());
        assert!("".parse::<IoDirection>().is_err());

        assert!(IoDirection::ReadWrite.reads() && IoDirection::ReadWrite.writes());
        assert!(!IoDirection::Read.writes());
        assert!(!IoDirection::Write.reads());
        assert_eq!(IoDirection::ReadWrite.to_string(), "rw");
    }

    #[test]
    fn test_io_direction_serde_uses_tokens() {
        let json = serde_json::to_string(&IoDirection::ReadWrite).unwrap();
        assert_eq!(json, "\"rw\"");
        let back: IoDirection = serde_json::from_str("\"w\"").unwrap();
        assert_eq!(back, IoDirection::Write);
    }

    #[test]
    fn test_member_status_default_and_display() {
        assert_eq!(MemberStatus::default(), MemberStatus::Undefined);
        assert_eq!(MemberStatus::Synced.to_string(), "synced");
        let json = serde_json::to_string(&MemberStatus::Donor).unwrap();
        assert_eq!(json, "\"donor\"");
    }

    #[test]
    fn test_view_info_json() {
        let view = ViewInfo {
            state_uuid: "6b0b7e4a-0000-0000-0000-000000000000".into(),
            seqno: 42,
            view_id: 3,
            status: ViewStatus::Primary,
            my_index: Some(1),
            members: vec!["node1".into(), "node2".into()],
        };
        assert!(view.is_primary());
        assert_eq!(view.member_count(), 2);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["stateUuid"], "6b0b7e4a-0000-0000-0000-000000000000");
        assert_eq!(json["myIndex"], 1);
        assert_eq!(json["status"], "primary");

        let back: ViewInfo = serde_json::from_value(json).unwrap();
        assert_eq!(back, view);
    }
}
