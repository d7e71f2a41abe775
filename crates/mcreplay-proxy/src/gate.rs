//! First-failure-wins termination signal shared by a session's workers.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// One end of a proxied session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peer {
    /// The real game client.
    Client,
    /// The backend server.
    Backend,
}

impl fmt::Display for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Peer::Client => f.write_str("client"),
            Peer::Backend => f.write_str("backend"),
        }
    }
}

/// Why a session's workers stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The given peer closed its stream.
    Closed(Peer),
    /// Reading from or writing to the peer kept failing.
    TooManyErrors(Peer),
    /// The replay log was exhausted or a replayed write failed.
    ReplayFinished,
    /// Process-wide shutdown.
    Shutdown,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Closed(peer) => write!(f, "{peer} closed the connection"),
            StopReason::TooManyErrors(peer) => write!(f, "too many I/O errors on {peer}"),
            StopReason::ReplayFinished => f.write_str("replay finished"),
            StopReason::Shutdown => f.write_str("shutdown requested"),
        }
    }
}

/// Single-write stop signal.
///
/// The first [`trip`](Self::trip) stores its reason; later calls are ignored.
/// Any number of clones can wait on [`tripped`](Self::tripped).
#[derive(Debug, Clone)]
pub struct TerminationGate {
    tx: Arc<watch::Sender<Option<StopReason>>>,
}

impl TerminationGate {
    /// Create an untripped gate.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx: Arc::new(tx) }
    }

    /// Publish `reason` unless another reason was published first. Returns
    /// whether this call won.
    pub fn trip(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|slot| {
            if slot.is_none() {
                *slot = Some(reason);
                true
            } else {
                false
            }
        })
    }

    /// The winning reason, if the gate has been tripped.
    pub fn reason(&self) -> Option<StopReason> {
        *self.tx.borrow()
    }

    /// Wait until the gate is tripped and return the winning reason.
    pub async fn tripped(&self) -> StopReason {
        let mut rx = self.tx.subscribe();
        match rx.wait_for(Option::is_some).await {
            Ok(reason) => (*reason).unwrap_or(StopReason::Shutdown),
            // The sender lives as long as `self`, so this is unreachable.
            Err(_) => StopReason::Shutdown,
        }
    }
}

impl Default for TerminationGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a worker `task` until `deadline`, aborting it if it is still
/// running then. Returns the task's output when it finished in time.
pub async fn join_until<T>(task: &mut JoinHandle<T>, deadline: Instant, name: &str) -> Option<T> {
    match tokio::time::timeout_at(deadline, &mut *task).await {
        Ok(Ok(output)) => Some(output),
        Ok(Err(e)) => {
            tracing::error!("{name} task failed: {e}");
            None
        }
        Err(_) => {
            tracing::warn!("{name} did not stop in time, aborting");
            task.abort();
            None
        }
    }
}
