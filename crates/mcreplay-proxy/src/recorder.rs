//! Capture of a live session into a [`SessionRecord`].

use mcreplay_net::{Packet, PositionAndLook, opcode};
use tokio::time::Instant;

use crate::phase::Phase;
use crate::record::{LoginPosition, RecordedPacket, SessionRecord};

/// Whether a serverbound packet is left out of the record.
///
/// Keep-alive responses and teleport confirms sent during Play answer
/// server-side ids that will differ on replay, so the replayer generates its
/// own instead.
pub fn is_excluded(id: i32, phase: Phase) -> bool {
    phase == Phase::Play
        && matches!(
            id,
            opcode::serverbound::KEEP_ALIVE | opcode::serverbound::TELEPORT_CONFIRM
        )
}

/// Append-only capture log for one session.
#[derive(Debug)]
pub struct Recorder {
    started: Instant,
    record: SessionRecord,
}

impl Recorder {
    /// Start an empty capture; offsets are measured from `started`.
    pub fn new(started: Instant) -> Self {
        Self {
            started,
            record: SessionRecord::default(),
        }
    }

    /// Capture a serverbound packet seen at `at` while in `phase`.
    ///
    /// `phase` must be the phase before the packet's own transition is
    /// applied. Returns whether the packet was kept.
    pub fn capture_serverbound(&mut self, packet: &Packet, phase: Phase, at: Instant) -> bool {
        if is_excluded(packet.id, phase) {
            return false;
        }
        self.record.packets.push(RecordedPacket {
            packet: packet.clone(),
            relative_time: at.saturating_duration_since(self.started),
        });
        true
    }

    /// Inspect a clientbound packet for the login position.
    ///
    /// Only the first position-and-look seen in Play while the position is
    /// still unset is taken. Returns the position when it was captured by
    /// this call.
    pub fn observe_clientbound(&mut self, packet: &Packet, phase: Phase) -> Option<LoginPosition> {
        if phase != Phase::Play
            || packet.id != opcode::clientbound::POSITION_AND_LOOK
            || !self.record.login_position.is_unset()
        {
            return None;
        }

        match packet.view::<PositionAndLook>() {
            Ok(view) => {
                let position = LoginPosition {
                    x: view.x,
                    y: view.y,
                    z: view.z,
                };
                self.record.login_position = position;
                tracing::info!(
                    "Captured login position ({}, {}, {})",
                    position.x,
                    position.y,
                    position.z
                );
                Some(position)
            }
            Err(e) => {
                tracing::warn!("Unable to parse login position from packet: {e}");
                None
            }
        }
    }

    /// Captured login position (the sentinel until one is seen).
    pub fn login_position(&self) -> LoginPosition {
        self.record.login_position
    }

    /// Copy of the record captured so far.
    pub fn snapshot(&self) -> SessionRecord {
        self.record.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn position(x: f64, y: f64, z: f64) -> Packet {
        Packet::from_view(&PositionAndLook {
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
            flags: 0,
            teleport_id: 1,
        })
    }

    #[test]
    fn test_filter_only_applies_in_play() {
        for phase in [Phase::Handshaking, Phase::Login] {
            assert!(!is_excluded(0x00, phase));
            assert!(!is_excluded(0x10, phase));
        }
        assert!(is_excluded(0x00, Phase::Play));
        assert!(is_excluded(0x10, Phase::Play));
        assert!(!is_excluded(0x03, Phase::Play));
        assert!(!is_excluded(0x12, Phase::Play));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_offsets_from_start() {
        let started = Instant::now();
        let mut recorder = Recorder::new(started);

        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(recorder.capture_serverbound(&Packet::new(0x00, vec![1]), Phase::Handshaking, Instant::now()));
        assert!(!recorder.capture_serverbound(&Packet::new(0x10, vec![2]), Phase::Play, Instant::now()));
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(recorder.capture_serverbound(&Packet::new(0x05, vec![3]), Phase::Play, Instant::now()));

        let record = recorder.snapshot();
        assert_eq!(record.packets.len(), 2);
        assert_eq!(record.packets[0].relative_time, Duration::from_millis(250));
        assert_eq!(record.packets[1].relative_time, Duration::from_millis(500));
        assert_eq!(record.packets[1].packet, Packet::new(0x05, vec![3]));
    }

    #[test]
    fn test_capture_before_start_saturates() {
        let now = Instant::now();
        let mut recorder = Recorder::new(now + Duration::from_secs(1));
        recorder.capture_serverbound(&Packet::new(0x01, vec![]), Phase::Login, now);
        assert_eq!(recorder.snapshot().packets[0].relative_time, Duration::ZERO);
    }

    #[test]
    fn test_login_position_captured_once() {
        let mut recorder = Recorder::new(Instant::now());
        let first = recorder.observe_clientbound(&position(10.0, 64.0, -5.0), Phase::Play);
        assert_eq!(first, Some(LoginPosition { x: 10.0, y: 64.0, z: -5.0 }));

        assert_eq!(recorder.observe_clientbound(&position(1.0, 2.0, 3.0), Phase::Play), None);
        assert_eq!(recorder.login_position(), LoginPosition { x: 10.0, y: 64.0, z: -5.0 });
    }

    #[test]
    fn test_login_position_ignored_outside_play() {
        let mut recorder = Recorder::new(Instant::now());
        assert_eq!(recorder.observe_clientbound(&position(10.0, 64.0, -5.0), Phase::Login), None);
        assert!(recorder.login_position().is_unset());
    }

    #[test]
    fn test_malformed_position_leaves_sentinel() {
        let mut recorder = Recorder::new(Instant::now());
        let truncated = Packet::new(0x34, vec![0; 10]);
        assert_eq!(recorder.observe_clientbound(&truncated, Phase::Play), None);
        assert!(recorder.login_position().is_unset());

        // A later well-formed packet is still taken.
        assert!(recorder.observe_clientbound(&position(4.0, 5.0, 6.0), Phase::Play).is_some());
    }

    #[test]
    fn test_clientbound_packets_never_captured() {
        let mut recorder = Recorder::new(Instant::now());
        recorder.observe_clientbound(&position(1.0, 1.0, 1.0), Phase::Play);
        recorder.observe_clientbound(&Packet::new(0x1F, vec![0; 8]), Phase::Play);
        assert!(recorder.snapshot().packets.is_empty());
    }
}
