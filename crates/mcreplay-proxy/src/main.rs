//! The `mcreplay` binary: record client sessions through the proxy, or replay
//! a saved one against the backend.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use mcreplay_config::{CliArgs, Config, Mode};
use mcreplay_net::TcpConnection;
use mcreplay_proxy::{
    ProxyError, ReplaySession, SessionManager, SessionRecord, StopReason, frame_config,
    join_until, socket_config,
};
use tokio::time::Instant;

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();
    let config = match load_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("mcreplay failed to start: {e}");
            return ExitCode::FAILURE;
        }
    };
    mcreplay_log::init_logging(Some(&config));

    let result = match config.proxy.mode {
        Mode::Record => record(Arc::new(config)).await,
        Mode::Replay => replay(&config).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(args: &CliArgs) -> Result<Config, ProxyError> {
    let dir = match &args.config {
        Some(dir) => dir.clone(),
        None => Config::default_dir()?,
    };
    let mut config = Config::load_or_create(&dir)?;
    config.apply_cli_overrides(args);
    Ok(config)
}

async fn record(config: Arc<Config>) -> Result<(), ProxyError> {
    let manager = Arc::new(SessionManager::new(Arc::clone(&config)));
    let listener = manager.bind().await?;

    let accept = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.run_with_listener(listener).await })
    };

    let signal = shutdown_signal().await;
    tracing::info!("Shutting down, saving sessions");
    manager.shutdown();
    if let Err(e) = accept.await {
        tracing::error!("Accept loop failed: {e}");
    }
    manager.close_all().await;
    let saved = manager.save_sessions().await;
    tracing::info!("Saved {saved} of {} sessions", manager.session_count().await);

    signal
}

async fn replay(config: &Config) -> Result<(), ProxyError> {
    let record = SessionRecord::load(&config.proxy.record_file)?;
    let addr = &config.proxy.backend_address;
    let backend = TcpConnection::dial(
        addr,
        frame_config(&config.network),
        &socket_config(&config.network),
    )
    .await
    .map_err(|source| ProxyError::Dial {
        addr: addr.clone(),
        source,
    })?;
    tracing::info!(
        "Replaying {} packets spanning {:?} to {addr}",
        record.packets.len(),
        record.duration()
    );

    let session = ReplaySession::new(record);
    let gate = session.gate();
    let mut task = tokio::spawn(session.run(backend));

    let finished = tokio::select! {
        finished = &mut task => finished.map_err(|e| tracing::error!("Replay task failed: {e}")).ok(),
        signal = shutdown_signal() => match signal {
            Ok(()) => {
                gate.trip(StopReason::Shutdown);
                let grace = Duration::from_millis(config.relay.shutdown_grace_ms);
                join_until(&mut task, Instant::now() + grace, "Replay").await
            }
            Err(e) => {
                tracing::warn!("{e}");
                task.await.map_err(|e| tracing::error!("Replay task failed: {e}")).ok()
            }
        },
    };
    if let Some(report) = finished {
        tracing::debug!("{report:?}");
    }
    Ok(())
}

/// Wait for Ctrl-C, or SIGTERM on Unix.
async fn shutdown_signal() -> Result<(), ProxyError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut terminate = signal(SignalKind::terminate()).map_err(ProxyError::Signal)?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.map_err(ProxyError::Signal),
            _ = terminate.recv() => Ok(()),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(ProxyError::Signal)
    }
}
