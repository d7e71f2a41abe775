//! Duplex packet relay between a client and the backend.
//!
//! Two pumps run as separate tasks, one per direction. Each reads a packet,
//! hands it to its observer, and writes it unchanged to the other side. A
//! stream closing on either side trips the session's [`TerminationGate`];
//! both pumps watch the gate and return their writer, and the engine closes
//! both writers once they are back.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use mcreplay_net::{Connection, FrameError, Packet, PacketReader, PacketWriter};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::time::Instant;

use crate::gate::{Peer, StopReason, TerminationGate};
use crate::phase::SharedPhase;
use crate::recorder::Recorder;

/// Direction a pump forwards packets in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Client to backend.
    Serverbound,
    /// Backend to client.
    Clientbound,
}

impl Direction {
    /// Peer packets are read from.
    pub fn source(self) -> Peer {
        match self {
            Direction::Serverbound => Peer::Client,
            Direction::Clientbound => Peer::Backend,
        }
    }

    /// Peer packets are written to.
    pub fn sink(self) -> Peer {
        match self {
            Direction::Serverbound => Peer::Backend,
            Direction::Clientbound => Peer::Client,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Serverbound => f.write_str("client->backend"),
            Direction::Clientbound => f.write_str("backend->client"),
        }
    }
}

/// Relays one session and feeds its observers.
pub struct RelayEngine {
    phase: Arc<SharedPhase>,
    recorder: Arc<Mutex<Recorder>>,
    gate: TerminationGate,
    max_consecutive_errors: u32,
}

impl RelayEngine {
    /// Create an engine over the session's shared state.
    ///
    /// A pump gives up on its direction after `max_consecutive_errors`
    /// failures in a row that are not a closed stream.
    pub fn new(
        phase: Arc<SharedPhase>,
        recorder: Arc<Mutex<Recorder>>,
        gate: TerminationGate,
        max_consecutive_errors: u32,
    ) -> Self {
        Self {
            phase,
            recorder,
            gate,
            max_consecutive_errors,
        }
    }

    /// Relay until either side closes or the gate is tripped from outside,
    /// then close both connections. Returns the reason the session ended.
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
        let (client_reader, client_writer) = client.into_split();
        let (backend_reader, backend_writer) = backend.into_split();

        let serverbound = {
            let phase = Arc::clone(&self.phase);
            let recorder = Arc::clone(&self.recorder);
            let observe = move |packet: &Packet| {
                let before = phase.get();
                lock(&recorder).capture_serverbound(packet, before, Instant::now());
                phase.observe_serverbound(packet.id);
            };
            tokio::spawn(pump(
                Direction::Serverbound,
                client_reader,
                backend_writer,
                observe,
                self.gate.clone(),
                self.max_consecutive_errors,
            ))
        };

        let clientbound = {
            let phase = Arc::clone(&self.phase);
            let recorder = Arc::clone(&self.recorder);
            let observe = move |packet: &Packet| {
                phase.observe_clientbound(packet.id);
                lock(&recorder).observe_clientbound(packet, phase.get());
            };
            tokio::spawn(pump(
                Direction::Clientbound,
                backend_reader,
                client_writer,
                observe,
                self.gate.clone(),
                self.max_consecutive_errors,
            ))
        };

        let reason = self.gate.tripped().await;
        tracing::debug!("Relay stopping: {reason}");

        let (backend_writer, client_writer) = tokio::join!(serverbound, clientbound);
        match backend_writer {
            Ok(mut writer) => close(&mut writer, Peer::Backend).await,
            Err(e) => tracing::error!("Serverbound pump failed: {e}"),
        }
        match client_writer {
            Ok(mut writer) => close(&mut writer, Peer::Client).await,
            Err(e) => tracing::error!("Clientbound pump failed: {e}"),
        }

        reason
    }
}

pub(crate) fn lock(recorder: &Mutex<Recorder>) -> std::sync::MutexGuard<'_, Recorder> {
    recorder.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn close<W: AsyncWrite + Unpin>(writer: &mut PacketWriter<W>, peer: Peer) {
    match writer.close().await {
        Ok(()) => {}
        Err(e) if e.is_closed() => {}
        Err(e) => tracing::debug!("Unable to close {peer} connection: {e}"),
    }
}

/// Forward packets from `reader` to `writer` until the gate trips.
///
/// Returns the writer so the owner can close it.
async fn pump<R, W, F>(
    direction: Direction,
    mut reader: PacketReader<R>,
    mut writer: PacketWriter<W>,
    mut observe: F,
    gate: TerminationGate,
    max_consecutive_errors: u32,
) -> PacketWriter<W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&Packet),
{
    let mut consecutive_errors = 0u32;

    loop {
        let read = tokio::select! {
            biased;
            _ = gate.tripped() => break,
            read = reader.read_packet() => read,
        };

        let (result, peer) = match read {
            Ok(packet) => {
                observe(&packet);
                let written = tokio::select! {
                    biased;
                    _ = gate.tripped() => break,
                    written = writer.write_packet(&packet) => written,
                };
                (written, direction.sink())
            }
            Err(e) => (Err(e), direction.source()),
        };

        match result {
            Ok(()) => consecutive_errors = 0,
            Err(FrameError::ConnectionClosed) => {
                if gate.trip(StopReason::Closed(peer)) {
                    tracing::info!("{direction}: {peer} closed the connection");
                }
                break;
            }
            Err(e) => {
                consecutive_errors += 1;
                tracing::warn!("{direction}: unable to relay packet via {peer}: {e}");
                if consecutive_errors >= max_consecutive_errors {
                    gate.trip(StopReason::TooManyErrors(peer));
                    break;
                }
            }
        }
    }

    writer
}
