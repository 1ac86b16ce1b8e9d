//! Helper process supervision for the replication glue layer
//!
//! This module spawns an external helper command through the host shell,
//! connects the parent to it with byte-stream pipes and guarantees the child
//! is reaped or killed once its supervisor goes away.
//!
//! ## Platform Support
//!
//! - **Unix**: full support, each helper runs in its own process group
//!
//! ## Lifecycle
//!
//! A [`Process`] moves through `Unspawned -> Running -> Reaped | Terminated`.
//! Dropping it closes every pipe and, if the child was never reaped, escalates
//! from SIGTERM to SIGKILL before reaping it.

#[cfg(unix)]
pub mod unix;

#[cfg(unix)]
pub use unix::*;
