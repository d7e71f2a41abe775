//! Structured logging for mcreplay.
//!
//! Console output with uptime timestamps and module targets, plus an optional
//! JSON file log for post-mortem analysis of long recording runs. The level
//! comes from `RUST_LOG` when set, otherwise from the loaded [`Config`].

use std::path::Path;

use mcreplay_config::Config;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when neither `RUST_LOG` nor the config provide one.
const DEFAULT_FILTER: &str = "info";

/// Name of the JSON log file written inside `debug.log_dir`.
pub const LOG_FILE_NAME: &str = "mcreplay.log";

/// Initialize the global tracing subscriber.
///
/// Must be called at most once per process.
///
/// ```no_run
/// use mcreplay_config::Config;
/// use mcreplay_log::init_logging;
///
/// init_logging(Some(&Config::default()));
/// ```
pub fn init_logging(config: Option<&Config>) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter_string(config)));

    let console_layer = fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(true)
        .with_level(true)
        .with_timer(fmt::time::uptime());

    let subscriber = tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer);

    if let Some(log_dir) = config.and_then(|c| c.debug.log_dir.as_deref())
        && let Some(log_file) = open_log_file(log_dir)
    {
        let file_layer = fmt::layer()
            .with_writer(log_file)
            .with_ansi(false)
            .with_target(true)
            .with_timer(fmt::time::uptime())
            .json();

        subscriber.with(file_layer).init();
        return;
    }

    subscriber.init();
}

/// Filter directive derived from the config, falling back to [`DEFAULT_FILTER`].
pub fn filter_string(config: Option<&Config>) -> String {
    match config {
        Some(config) if !config.debug.log_level.is_empty() => config.debug.log_level.clone(),
        _ => DEFAULT_FILTER.to_string(),
    }
}

/// Create `log_dir` and open the JSON log file inside it.
fn open_log_file(log_dir: &Path) -> Option<std::fs::File> {
    std::fs::create_dir_all(log_dir).ok()?;
    std::fs::File::create(log_dir.join(LOG_FILE_NAME)).ok()
}
