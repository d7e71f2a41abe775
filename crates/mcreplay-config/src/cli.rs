//! Command-line argument parsing.

use std::path::PathBuf;

use clap::Parser;

use crate::{Config, Mode};

/// mcreplay command-line arguments.
///
/// CLI values override settings loaded from `config.ron`.
#[derive(Parser, Debug, Default)]
#[command(name = "mcreplay", about = "Record and replay proxy for game sessions")]
pub struct CliArgs {
    /// Address of the backend server to be proxied.
    #[arg(long)]
    pub backend: Option<String>,

    /// Address to listen on for client connections.
    #[arg(long)]
    pub listen: Option<String>,

    /// Path to the record file for replaying and saving.
    #[arg(long)]
    pub file: Option<PathBuf>,

    /// Replay the given record file instead of recording.
    #[arg(long)]
    pub replay: bool,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long)]
    pub log_level: Option<String>,

    /// Path to config directory (overrides default location).
    #[arg(long)]
    pub config: Option<PathBuf>,
}

impl Config {
    /// Apply CLI overrides to a loaded config.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(ref addr) = args.backend {
            self.proxy.backend_address = addr.clone();
        }
        if let Some(ref addr) = args.listen {
            self.proxy.listen_address = addr.clone();
        }
        if let Some(ref file) = args.file {
            self.proxy.record_file = file.clone();
        }
        if args.replay {
            self.proxy.mode = Mode::Replay;
        }
        if let Some(ref level) = args.log_level {
            self.debug.log_level = level.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_override() {
        let mut config = Config::default();
        let args = CliArgs {
            backend: Some("192.168.1.1:25565".to_string()),
            file: Some(PathBuf::from("session.json")),
            replay: true,
            ..CliArgs::default()
        };
        config.apply_cli_overrides(&args);
        assert_eq!(config.proxy.backend_address, "192.168.1.1:25565");
        assert_eq!(config.proxy.record_file, PathBuf::from("session.json"));
        assert_eq!(config.proxy.mode, Mode::Replay);
        // Non-overridden fields retain defaults
        assert_eq!(config.proxy.listen_address, "0.0.0.0:25565");
    }

    #[test]
    fn test_cli_no_override() {
        let original = Config::default();
        let mut config = Config::default();
        config.apply_cli_overrides(&CliArgs::default());
        assert_eq!(config, original);
    }

    #[test]
    fn test_parse_flags() {
        let args = CliArgs::parse_from(["mcreplay", "--replay", "--file", "a/b.json"]);
        assert!(args.replay);
        assert_eq!(args.file, Some(PathBuf::from("a/b.json")));
        assert!(args.backend.is_none());
    }

    #[test]
    fn test_record_is_default_mode() {
        let args = CliArgs::parse_from(["mcreplay"]);
        let mut config = Config::default();
        config.apply_cli_overrides(&args);
        assert_eq!(config.proxy.mode, Mode::Record);
    }
}
