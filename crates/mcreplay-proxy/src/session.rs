//! Recorded sessions and the listener that creates them.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use mcreplay_config::{Config, NetworkConfig, RelayConfig};
use mcreplay_net::{
    Connection, FrameConfig, SocketConfig, TcpConnection, create_listener, resolve_addr,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::ProxyError;
use crate::gate::{StopReason, TerminationGate, join_until};
use crate::phase::{Phase, SharedPhase};
use crate::record::{SessionRecord, indexed_path};
use crate::recorder::Recorder;
use crate::relay::{RelayEngine, lock};

/// Framing options derived from the network configuration.
pub fn frame_config(network: &NetworkConfig) -> FrameConfig {
    FrameConfig {
        max_packet_size: network.max_packet_size,
    }
}

/// Socket options derived from the network configuration.
pub fn socket_config(network: &NetworkConfig) -> SocketConfig {
    SocketConfig {
        tcp_nodelay: network.tcp_nodelay,
        keepalive_enabled: network.keepalive_enabled,
        keepalive_idle: Duration::from_secs(network.keepalive_idle_secs),
        ..SocketConfig::default()
    }
}

/// State every session has, whether relayed or replayed.
#[derive(Debug, Clone)]
pub struct SessionState {
    /// When the connection was established. Offsets are measured from here.
    pub started: Instant,
    /// Phase shared by both workers.
    pub phase: Arc<SharedPhase>,
    /// Stops both workers.
    pub gate: TerminationGate,
}

impl SessionState {
    /// Fresh state in [`Phase::Handshaking`].
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            phase: Arc::new(SharedPhase::new()),
            gate: TerminationGate::new(),
        }
    }
}

/// Shared view of a running session, kept by the manager.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    id: u64,
    peer: String,
    state: SessionState,
    recorder: Arc<Mutex<Recorder>>,
}

impl SessionHandle {
    /// Acceptance counter value.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Client address.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Current protocol phase.
    pub fn phase(&self) -> Phase {
        self.state.phase.get()
    }

    /// Copy of everything recorded so far.
    pub fn record(&self) -> SessionRecord {
        lock(&self.recorder).snapshot()
    }

    /// Ask the session to stop. Returns whether this was the first stop
    /// request.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.state.gate.trip(reason)
    }

    /// Why the session stopped, if it has.
    pub fn reason(&self) -> Option<StopReason> {
        self.state.gate.reason()
    }
}

/// A client paired with the backend, relayed and recorded.
pub struct Session {
    handle: SessionHandle,
    max_consecutive_errors: u32,
}

impl Session {
    /// Create a session whose clock starts at `started`.
    pub fn new(id: u64, peer: impl Into<String>, started: Instant, relay: &RelayConfig) -> Self {
        Self {
            handle: SessionHandle {
                id,
                peer: peer.into(),
                state: SessionState::new(started),
                recorder: Arc::new(Mutex::new(Recorder::new(started))),
            },
            max_consecutive_errors: relay.max_consecutive_errors,
        }
    }

    /// Handle for observing and stopping the session.
    pub fn handle(&self) -> SessionHandle {
        self.handle.clone()
    }

    /// Relay between `client` and `backend` until the session ends.
    pub async fn run<CR, CW, BR, BW>(
        self,
        client: Connection<CR, CW>,
        backend: Connection<BR, BW>,
    ) -> StopReason
    where
        CR: AsyncRead + Unpin + Send + 'static,
        CW: AsyncWrite + Unpin + Send + 'static,
        BR: AsyncRead + Unpin + Send + 'static,
        BW: AsyncWrite + Unpin + Send + 'static,
    {
        let state = &self.handle.state;
        let engine = RelayEngine::new(
            Arc::clone(&state.phase),
            Arc::clone(&self.handle.recorder),
            state.gate.clone(),
            self.max_consecutive_errors,
        );
        engine.run(client, backend).await
    }
}

struct TrackedSession {
    handle: SessionHandle,
    task: Option<JoinHandle<StopReason>>,
}

/// Accepts clients, pairs each with a backend connection and keeps every
/// session until shutdown so its record can be saved.
pub struct SessionManager {
    config: Arc<Config>,
    sessions: Arc<tokio::sync::Mutex<Vec<TrackedSession>>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
}

impl SessionManager {
    /// Create a manager for the given configuration.
    pub fn new(config: Arc<Config>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            config,
            sessions: Arc::new(tokio::sync::Mutex::new(Vec::new())),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Bind the client-facing listener.
    pub async fn bind(&self) -> Result<TcpListener, ProxyError> {
        let addr = &self.config.proxy.listen_address;
        let bind_error = |source| ProxyError::Bind {
            addr: addr.clone(),
            source,
        };
        let resolved = resolve_addr(addr).await.map_err(bind_error)?;
        let listener = create_listener(resolved, &socket_config(&self.config.network))
            .await
            .map_err(bind_error)?;
        tracing::info!(
            "Listening on {resolved}, forwarding to {}",
            self.config.proxy.backend_address
        );
        Ok(listener)
    }

    /// Bind and run the accept loop.
    pub async fn run(&self) -> Result<(), ProxyError> {
        let listener = self.bind().await?;
        self.run_with_listener(listener).await;
        Ok(())
    }

    /// Accept clients on `listener` until [`shutdown`](Self::shutdown).
    pub async fn run_with_listener(&self, listener: TcpListener) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut next_id = 0u64;

        loop {
            tokio::select! {
                result = listener.accept() => {
                    let (stream, peer_addr) = match result {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            tracing::warn!("Failed to accept connection: {e}");
                            continue;
                        }
                    };
                    let started = Instant::now();
                    let id = next_id;
                    next_id += 1;
                    tracing::info!("Accepted connection {id} from {peer_addr}");

                    tokio::spawn(Self::open_session(
                        id,
                        stream,
                        peer_addr,
                        started,
                        Arc::clone(&self.config),
                        Arc::clone(&self.sessions),
                        self.shutdown_rx.clone(),
                    ));
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        tracing::info!("Listener shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Dial the backend for a freshly accepted client and start relaying.
    async fn open_session(
        id: u64,
        stream: TcpStream,
        peer_addr: std::net::SocketAddr,
        started: Instant,
        config: Arc<Config>,
        sessions: Arc<tokio::sync::Mutex<Vec<TrackedSession>>>,
        shutdown_rx: watch::Receiver<bool>,
    ) {
        let frame = frame_config(&config.network);
        let socket = socket_config(&config.network);

        let client = match TcpConnection::from_stream(stream, peer_addr, frame.clone(), &socket) {
            Ok(client) => client,
            Err(e) => {
                tracing::warn!("Unable to configure client socket {peer_addr}: {e}");
                return;
            }
        };
        let backend_addr = &config.proxy.backend_address;
        let backend = match TcpConnection::dial(backend_addr, frame, &socket).await {
            Ok(backend) => backend,
            Err(e) => {
                tracing::error!("Unable to connect to backend {backend_addr}: {e}");
                return;
            }
        };

        let mut sessions = sessions.lock().await;
        if *shutdown_rx.borrow() {
            tracing::debug!("Dropping connection {id}: shutting down");
            return;
        }

        let session = Session::new(id, peer_addr.to_string(), started, &config.relay);
        let handle = session.handle();
        let task = tokio::spawn(async move {
            let reason = session.run(client, backend).await;
            tracing::info!("Session {id} ended: {reason}");
            reason
        });
        tracing::debug!("Session {id} will be saved as record {}", sessions.len());
        sessions.push(TrackedSession {
            handle,
            task: Some(task),
        });
    }

    /// Stop accepting new clients.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop every session and wait for them to release their connections.
    /// Sessions still running once the grace period has elapsed are aborted.
    pub async fn close_all(&self) {
        let grace = Duration::from_millis(self.config.relay.shutdown_grace_ms);
        let deadline = Instant::now() + grace;

        let tasks: Vec<(u64, JoinHandle<StopReason>)> = {
            let mut sessions = self.sessions.lock().await;
            sessions
                .iter_mut()
                .filter_map(|session| {
                    session.handle.stop(StopReason::Shutdown);
                    Some((session.handle.id(), session.task.take()?))
                })
                .collect()
        };

        for (id, mut task) in tasks {
            join_until(&mut task, deadline, &format!("Session {id}")).await;
        }
    }

    /// Save every session's record next to the configured record file,
    /// prefixed with its registration index. Returns how many were saved.
    pub async fn save_sessions(&self) -> usize {
        let handles = self.handles().await;

        let mut saved = 0;
        for (index, handle) in handles.iter().enumerate() {
            let record = handle.record();
            let path = indexed_path(&self.config.proxy.record_file, index);
            let count = record.packets.len();
            let result = tokio::task::spawn_blocking(move || record.save(&path).map(|()| path)).await;
            match result {
                Ok(Ok(path)) => {
                    tracing::info!(
                        "Saved {count} packets of session {} ({}) to {}",
                        handle.id(),
                        handle.peer(),
                        path.display()
                    );
                    saved += 1;
                }
                Ok(Err(e)) => tracing::error!("Unable to save session {index}: {e}"),
                Err(e) => tracing::error!("Record writer for session {index} failed: {e}"),
            }
        }
        saved
    }

    /// Number of sessions registered since start.
    pub async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Handles of every registered session, in registration order. Sessions
    /// register once their backend connection is up, so this can differ from
    /// the order clients were accepted in.
    pub async fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .lock()
            .await
            .iter()
            .map(|session| session.handle.clone())
            .collect()
    }
}
