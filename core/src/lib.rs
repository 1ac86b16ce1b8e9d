//! Replication glue for a database server
//!
//! This crate supervises external helper processes, builds the environments
//! handed to them and keeps the schema version marker that gates whether the
//! replication state is compatible with the running server.

pub mod config;
pub mod env;
pub mod error;
#[cfg(unix)]
pub mod net;
#[cfg(unix)]
pub mod process;
pub mod state;
pub mod status;


pub use config::{GlueConfig, HelperSpec};
pub use env::Env;
pub use error::{CoreError, Result};
#[cfg(unix)]
pub use process::{Pipe, Process, ProcessState};
pub use state::{SchemaVersion, WsrepState};
pub use status::{NodeStatus, StatusSink, TracingSink};

/// Core utilities and helper functions
pub mod utils {
    use tracing::info;

    /// Initialize tracing for the application
    ///
    /// `RUST_LOG` takes precedence over `level`.
    pub fn init_tracing(level: &str) -> crate::Result<()> {
        use tracing_subscriber::{fmt, EnvFilter};

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

        fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .map_err(|e| crate::CoreError::InitializationError(e.to_string()))?;

        info!("Tracing initialized with level: {}", level);
        Ok(())
    }
}
