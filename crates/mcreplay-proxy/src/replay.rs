//! Replay of a saved session against a live backend.
//!
//! The sender walks the record in order, sleeping until each packet's offset
//! from session start before writing it. Meanwhile the responder reads
//! everything the backend sends and, once in Play, answers keep-alives and
//! position updates the way a client would. The first world packet sent in
//! Play is preceded by a teleport command moving the player to the recorded
//! login position, so the backend world lines up with the recording.

use std::sync::Arc;

use mcreplay_net::{
    ChatMessage, Connection, DecodeError, FrameError, KeepAliveRequest, KeepAliveResponse, Packet,
    PacketReader, PacketWriter, PositionAndLook, TeleportConfirm, opcode,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::gate::{Peer, StopReason, TerminationGate};
use crate::phase::{Phase, SharedPhase};
use crate::record::SessionRecord;
use crate::session::SessionState;

type SharedWriter<W> = Arc<Mutex<PacketWriter<W>>>;

/// Outcome of a replay run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayReport {
    /// Recorded packets written to the backend.
    pub packets_sent: usize,
    /// Keep-alive requests answered.
    pub keep_alives_answered: usize,
    /// Position updates confirmed.
    pub teleports_confirmed: usize,
    /// Whether the world-alignment teleport was sent.
    pub world_aligned: bool,
}

#[derive(Debug, Default)]
struct Replies {
    keep_alives: usize,
    teleports: usize,
}

/// A recorded session being played back.
pub struct ReplaySession {
    session: SessionState,
    record: SessionRecord,
    world_aligned: bool,
}

impl ReplaySession {
    /// Prepare a replay of `record`. Packet offsets are measured from now.
    pub fn new(record: SessionRecord) -> Self {
        Self {
            session: SessionState::new(Instant::now()),
            record,
            world_aligned: false,
        }
    }

    /// Gate that stops the replay early when tripped.
    pub fn gate(&self) -> TerminationGate {
        self.session.gate.clone()
    }

    /// Replay the record over `backend`, then close it.
    pub async fn run<R, W>(mut self, backend: Connection<R, W>) -> ReplayReport
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer) = backend.into_split();
        let writer = Arc::new(Mutex::new(writer));
        let responder = tokio::spawn(respond(
            reader,
            Arc::clone(&writer),
            Arc::clone(&self.session.phase),
            self.session.gate.clone(),
        ));

        let packets_sent = self.send_all(&writer).await;

        self.session.gate.trip(StopReason::ReplayFinished);
        let replies = responder.await.unwrap_or_else(|e| {
            tracing::error!("Replay responder failed: {e}");
            Replies::default()
        });
        match writer.lock().await.close().await {
            Ok(()) => {}
            Err(e) if e.is_closed() => {}
            Err(e) => tracing::debug!("Unable to close backend connection: {e}"),
        }

        let report = ReplayReport {
            packets_sent,
            keep_alives_answered: replies.keep_alives,
            teleports_confirmed: replies.teleports,
            world_aligned: self.world_aligned,
        };
        tracing::info!(
            "Replay finished: sent {}/{} packets, answered {} keep-alives, confirmed {} teleports",
            report.packets_sent,
            self.record.packets.len(),
            report.keep_alives_answered,
            report.teleports_confirmed
        );
        report
    }

    async fn send_all<W: AsyncWrite + Unpin>(&mut self, writer: &SharedWriter<W>) -> usize {
        let phase = Arc::clone(&self.session.phase);
        let gate = self.session.gate.clone();
        let started = self.session.started;
        let mut sent = 0;

        for index in 0..self.record.packets.len() {
            let id = self.record.packets[index].packet.id;
            if !self.world_aligned
                && phase.get() == Phase::Play
                && opcode::serverbound::WORLD_FAMILY.contains(&id)
            {
                self.align_world(writer, &gate).await;
            }

            let recorded = &self.record.packets[index];
            let due = started
                .checked_add(recorded.relative_time)
                .unwrap_or_else(Instant::now);
            tokio::select! {
                biased;
                reason = gate.tripped() => {
                    tracing::debug!("Replay interrupted: {reason}");
                    break;
                }
                _ = tokio::time::sleep_until(due) => {}
            }

            phase.observe_serverbound(recorded.packet.id);
            match write_until_tripped(writer, &recorded.packet, &gate).await {
                Some(Ok(())) => sent += 1,
                Some(Err(e)) if e.is_closed() => {
                    tracing::info!("Backend closed the connection during replay");
                    break;
                }
                Some(Err(e)) => {
                    tracing::error!("Unable to replay packet {:#04x}: {e}", recorded.packet.id);
                    break;
                }
                None => {
                    tracing::debug!("Replay interrupted while writing");
                    break;
                }
            }
        }

        sent
    }

    /// Send the teleport command for the recorded login position.
    async fn align_world<W: AsyncWrite + Unpin>(
        &mut self,
        writer: &SharedWriter<W>,
        gate: &TerminationGate,
    ) {
        let position = self.record.login_position;
        let command = ChatMessage::teleport(position.x, position.y, position.z);
        let packet = Packet::from_view(&command);
        match write_until_tripped(writer, &packet, gate).await {
            Some(Ok(())) => {
                tracing::info!("Aligned world: {}", command.message);
                self.world_aligned = true;
            }
            Some(Err(e)) => tracing::warn!("Unable to send world alignment teleport: {e}"),
            None => {}
        }
    }
}

/// Write `packet` unless the gate trips first, in which case `None` is
/// returned and the writer lock is released.
async fn write_until_tripped<W: AsyncWrite + Unpin>(
    writer: &SharedWriter<W>,
    packet: &Packet,
    gate: &TerminationGate,
) -> Option<Result<(), FrameError>> {
    tokio::select! {
        biased;
        _ = gate.tripped() => None,
        written = async { writer.lock().await.write_packet(packet).await } => Some(written),
    }
}

/// Reply a client would send to `packet`, if any.
fn reply_for(packet: &Packet) -> Option<Result<Packet, DecodeError>> {
    match packet.id {
        opcode::clientbound::KEEP_ALIVE => Some(
            packet
                .view::<KeepAliveRequest>()
                .map(|request| Packet::from_view(&KeepAliveResponse { id: request.id })),
        ),
        opcode::clientbound::POSITION_AND_LOOK => Some(packet.view::<PositionAndLook>().map(|pos| {
            Packet::from_view(&TeleportConfirm {
                teleport_id: pos.teleport_id,
            })
        })),
        _ => None,
    }
}

async fn respond<R, W>(
    mut reader: PacketReader<R>,
    writer: SharedWriter<W>,
    phase: Arc<SharedPhase>,
    gate: TerminationGate,
) -> Replies
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut replies = Replies::default();

    loop {
        let read = tokio::select! {
            biased;
            _ = gate.tripped() => break,
            read = reader.read_packet() => read,
        };
        let packet = match read {
            Ok(packet) => packet,
            Err(FrameError::ConnectionClosed) => {
                gate.trip(StopReason::Closed(Peer::Backend));
                break;
            }
            Err(e) => {
                tracing::warn!("Unable to read from backend: {e}");
                break;
            }
        };

        if phase.get() == Phase::Play {
            match reply_for(&packet) {
                Some(Ok(reply)) => match write_until_tripped(&writer, &reply, &gate).await {
                    Some(Ok(())) if reply.id == opcode::serverbound::KEEP_ALIVE => {
                        replies.keep_alives += 1
                    }
                    Some(Ok(())) => replies.teleports += 1,
                    Some(Err(e)) => tracing::warn!("Unable to answer packet {:#04x}: {e}", packet.id),
                    None => break,
                },
                Some(Err(e)) => tracing::warn!("Unable to parse packet {:#04x}: {e}", packet.id),
                None => {}
            }
        }

        phase.observe_clientbound(packet.id);
    }

    replies
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::record::{LoginPosition, RecordedPacket};
    use mcreplay_net::{FrameConfig, PacketView};
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf, duplex};

    type Pipe = Connection<ReadHalf<DuplexStream>, WriteHalf<DuplexStream>>;

    fn record(packets: &[(i32, u64)], login_position: LoginPosition) -> SessionRecord {
        SessionRecord {
            packets: packets
                .iter()
                .map(|&(id, millis)| RecordedPacket {
                    packet: Packet::new(id, vec![id as u8, 0xAB]),
                    relative_time: Duration::from_millis(millis),
                })
                .collect(),
            login_position,
        }
    }

    fn start(record: SessionRecord) -> (Pipe, TerminationGate, tokio::task::JoinHandle<ReplayReport>) {
        let (proxy_side, backend_side) = duplex(64 * 1024);
        let session = ReplaySession::new(record);
        let gate = session.gate();
        let task = tokio::spawn(session.run(Connection::from_io(
            proxy_side,
            "backend",
            FrameConfig::default(),
        )));
        let backend = Connection::from_io(backend_side, "backend-app", FrameConfig::default());
        (backend, gate, task)
    }

    async fn expect(backend: &mut Pipe, id: i32) -> Packet {
        let packet = backend.reader.read_packet().await.unwrap();
        assert_eq!(packet.id, id, "unexpected packet {packet:?}");
        packet
    }

    async fn send(backend: &mut Pipe, packet: Packet) {
        backend.writer.write_packet(&packet).await.unwrap();
    }

    fn position(teleport_id: i32) -> Packet {
        Packet::from_view(&PositionAndLook {
            x: 1.0,
            y: 2.0,
            z: 3.0,
            yaw: 90.0,
            pitch: 0.0,
            flags: 0,
            teleport_id,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_follows_offsets() {
        let start_time = Instant::now();
        let (mut backend, _gate, task) = start(record(&[(0x00, 0), (0x05, 500)], LoginPosition::UNSET));

        expect(&mut backend, 0x00).await;
        assert!(start_time.elapsed() < Duration::from_millis(500));
        expect(&mut backend, 0x05).await;
        let elapsed = start_time.elapsed();
        assert!(elapsed >= Duration::from_millis(500), "sent after {elapsed:?}");
        assert!(elapsed < Duration::from_millis(600), "sent after {elapsed:?}");

        let report = task.await.unwrap();
        assert_eq!(report.packets_sent, 2);
        assert!(backend.reader.read_packet().await.unwrap_err().is_closed());
    }

    #[tokio::test(start_paused = true)]
    async fn test_payloads_replayed_verbatim() {
        let (mut backend, _gate, task) =
            start(record(&[(0x00, 0), (0x01, 10), (0x7A, 20)], LoginPosition::UNSET));

        for id in [0x00, 0x01, 0x7A] {
            let packet = expect(&mut backend, id).await;
            assert_eq!(packet.data, vec![id as u8, 0xAB]);
        }
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_world_alignment_injected_once() {
        let position = LoginPosition {
            x: 10.0,
            y: 64.0,
            z: -5.0,
        };
        let (mut backend, _gate, task) = start(record(
            &[(0x00, 0), (0x05, 50), (0x12, 100), (0x13, 200), (0x14, 300)],
            position,
        ));

        expect(&mut backend, 0x00).await;
        send(&mut backend, Packet::new(0x02, vec![])).await;
        expect(&mut backend, 0x05).await;

        let teleport = expect(&mut backend, 0x03).await;
        let command = teleport.view::<ChatMessage>().unwrap();
        assert_eq!(command.message, "/teleport 10.000000 64.000000 -5.000000");
        for id in [0x12, 0x13, 0x14] {
            expect(&mut backend, id).await;
        }
        assert!(backend.reader.read_packet().await.unwrap_err().is_closed());

        let report = task.await.unwrap();
        assert!(report.world_aligned);
        assert_eq!(report.packets_sent, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_alignment_before_play() {
        let (mut backend, _gate, task) =
            start(record(&[(0x00, 0), (0x12, 100)], LoginPosition::UNSET));

        expect(&mut backend, 0x00).await;
        expect(&mut backend, 0x12).await;
        assert!(!task.await.unwrap().world_aligned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_and_teleport_answered_in_play() {
        let (mut backend, _gate, task) = start(record(&[(0x00, 0), (0x05, 1000)], LoginPosition::UNSET));

        expect(&mut backend, 0x00).await;
        send(&mut backend, Packet::new(0x02, vec![])).await;

        let id = 0x0123_4567_89AB_CDEF_i64;
        send(&mut backend, Packet::from_view(&KeepAliveRequest { id })).await;
        let reply = expect(&mut backend, KeepAliveResponse::ID).await;
        assert_eq!(reply.view::<KeepAliveResponse>().unwrap().id, id);

        send(&mut backend, position(42)).await;
        let confirm = expect(&mut backend, TeleportConfirm::ID).await;
        assert_eq!(confirm.view::<TeleportConfirm>().unwrap().teleport_id, 42);

        // Anything else gets no reply; the next packet is the recorded one.
        send(&mut backend, Packet::new(0x20, vec![1, 2, 3])).await;
        expect(&mut backend, 0x05).await;

        let report = task.await.unwrap();
        assert_eq!(report.keep_alives_answered, 1);
        assert_eq!(report.teleports_confirmed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_replies_before_play() {
        let (mut backend, _gate, task) = start(record(&[(0x00, 0), (0x05, 1000)], LoginPosition::UNSET));

        expect(&mut backend, 0x00).await;
        send(&mut backend, Packet::from_view(&KeepAliveRequest { id: 7 })).await;
        send(&mut backend, position(3)).await;
        expect(&mut backend, 0x05).await;

        let report = task.await.unwrap();
        assert_eq!(report.keep_alives_answered, 0);
        assert_eq!(report.teleports_confirmed, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_keep_alive_is_skipped() {
        let (mut backend, _gate, task) = start(record(&[(0x00, 0), (0x05, 1000)], LoginPosition::UNSET));

        expect(&mut backend, 0x00).await;
        send(&mut backend, Packet::new(0x02, vec![])).await;
        send(&mut backend, Packet::new(0x1F, vec![1, 2])).await;
        send(&mut backend, Packet::from_view(&KeepAliveRequest { id: 9 })).await;

        let reply = expect(&mut backend, 0x10).await;
        assert_eq!(reply.view::<KeepAliveResponse>().unwrap().id, 9);
        expect(&mut backend, 0x05).await;
        assert_eq!(task.await.unwrap().keep_alives_answered, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trip_interrupts_pending_sleep() {
        let (mut backend, gate, task) =
            start(record(&[(0x00, 0), (0x05, 3_600_000)], LoginPosition::UNSET));

        expect(&mut backend, 0x00).await;
        gate.trip(StopReason::Shutdown);

        let report = task.await.unwrap();
        assert_eq!(report.packets_sent, 1);
        assert!(backend.reader.read_packet().await.unwrap_err().is_closed());
    }

    #[tokio::test]
    async fn test_trip_releases_sender_blocked_on_stalled_backend() {
        let (proxy_side, _stalled) = duplex(1024);
        let record = SessionRecord {
            packets: vec![RecordedPacket {
                packet: Packet::new(0x05, vec![0x55; 64 * 1024]),
                relative_time: Duration::ZERO,
            }],
            login_position: LoginPosition::UNSET,
        };
        let session = ReplaySession::new(record);
        let gate = session.gate();
        let task = tokio::spawn(session.run(Connection::from_io(
            proxy_side,
            "backend",
            FrameConfig::default(),
        )));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        gate.trip(StopReason::Shutdown);

        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("replay still blocked after shutdown")
            .unwrap();
        assert_eq!(report.packets_sent, 0);
    }

    #[tokio::test]
    async fn test_trip_releases_responder_blocked_on_stalled_backend() {
        let (proxy_side, backend_side) = duplex(1024);
        let session = ReplaySession::new(record(&[(0x00, 0), (0x05, 3_600_000)], LoginPosition::UNSET));
        let gate = session.gate();
        let task = tokio::spawn(session.run(Connection::from_io(
            proxy_side,
            "backend",
            FrameConfig::default(),
        )));

        // Flood keep-alives without ever reading the replies.
        let mut backend = Connection::from_io(backend_side, "backend-app", FrameConfig::default());
        expect(&mut backend, 0x00).await;
        let (_reader, mut writer) = backend.into_split();
        let flood = tokio::spawn(async move {
            writer.write_packet(&Packet::new(0x02, vec![])).await?;
            for id in 0..500 {
                writer
                    .write_packet(&Packet::from_view(&KeepAliveRequest { id }))
                    .await?;
            }
            Ok::<_, FrameError>(writer)
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!task.is_finished());
        gate.trip(StopReason::Shutdown);

        let report = tokio::time::timeout(Duration::from_secs(2), task)
            .await
            .expect("replay still blocked after shutdown")
            .unwrap();
        assert!(report.keep_alives_answered < 500);
        flood.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn test_backend_close_stops_replay() {
        let (mut backend, gate, task) =
            start(record(&[(0x00, 0), (0x05, 3_600_000)], LoginPosition::UNSET));

        expect(&mut backend, 0x00).await;
        drop(backend);

        let report = task.await.unwrap();
        assert_eq!(report.packets_sent, 1);
        assert_eq!(gate.reason(), Some(StopReason::Closed(Peer::Backend)));
    }

    #[tokio::test]
    async fn test_empty_record_closes_immediately() {
        let (mut backend, gate, task) = start(SessionRecord::default());
        assert_eq!(task.await.unwrap(), ReplayReport::default());
        assert_eq!(gate.reason(), Some(StopReason::ReplayFinished));
        assert!(backend.reader.read_packet().await.unwrap_err().is_closed());
    }

    #[test]
    fn test_reply_for_ignores_other_opcodes() {
        assert!(reply_for(&Packet::new(0x20, vec![])).is_none());
        assert!(reply_for(&Packet::new(0x02, vec![])).is_none());
        assert!(matches!(
            reply_for(&Packet::new(0x34, vec![0; 4])),
            Some(Err(DecodeError::UnexpectedEnd { .. }))
        ));
    }
}
