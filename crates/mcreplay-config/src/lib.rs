//! Configuration system for mcreplay.
//!
//! Settings persist to disk as a RON file and can be overridden from the
//! command line. The resulting [`Config`] is immutable once the proxy starts
//! and is threaded through constructors.

mod cli;
mod config;
mod error;

pub use cli::CliArgs;
pub use config::{Config, DebugConfig, Mode, NetworkConfig, ProxyConfig, RelayConfig};
pub use error::ConfigError;
