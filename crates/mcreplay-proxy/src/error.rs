//! Process-level proxy errors.

use mcreplay_config::ConfigError;

use crate::record::RecordError;

/// Errors that stop the proxy from starting or running.
#[derive(Debug, thiserror::Error)]
pub enum ProxyError {
    /// The client-facing listener could not be bound.
    #[error("failed to listen on {addr}: {source}")]
    Bind {
        /// Configured listen address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The backend could not be reached.
    #[error("failed to connect to backend {addr}: {source}")]
    Dial {
        /// Configured backend address.
        addr: String,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A session record could not be loaded or saved.
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Installing the shutdown signal handler failed.
    #[error("failed to listen for shutdown signal: {0}")]
    Signal(#[source] std::io::Error),
}
