//! Protocol phase tracking.
//!
//! A session starts in [`Phase::Handshaking`]. The client's handshake moves it
//! to [`Phase::Login`] and the server's login success moves it to
//! [`Phase::Play`]. Phases never move backwards. [`Phase::Status`] exists in
//! the protocol but status pings are never proxied, so nothing enters it.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use mcreplay_net::opcode::{clientbound, serverbound};

/// Protocol phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Phase {
    /// Initial phase; only the handshake is exchanged.
    Handshaking = 0,
    /// Server list ping. Never entered.
    Status = 1,
    /// Authentication and login.
    Login = 2,
    /// In-game.
    Play = 3,
}

impl Phase {
    /// Phase reached from `self` after the client sends `opcode`, if any.
    pub fn after_serverbound(self, opcode: i32) -> Option<Phase> {
        match (self, opcode) {
            (Phase::Handshaking, serverbound::HANDSHAKE) => Some(Phase::Login),
            _ => None,
        }
    }

    /// Phase reached from `self` after the server sends `opcode`, if any.
    pub fn after_clientbound(self, opcode: i32) -> Option<Phase> {
        match (self, opcode) {
            (Phase::Login, clientbound::LOGIN_SUCCESS) => Some(Phase::Play),
            _ => None,
        }
    }

    fn from_u8(value: u8) -> Phase {
        match value {
            0 => Phase::Handshaking,
            1 => Phase::Status,
            2 => Phase::Login,
            _ => Phase::Play,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Handshaking => "handshaking",
            Phase::Status => "status",
            Phase::Login => "login",
            Phase::Play => "play",
        };
        f.write_str(name)
    }
}

/// Phase shared between the two workers of a session.
///
/// Every transition is a compare-and-set from the phase the rule was
/// evaluated against, so a transition computed from a stale read is
/// rejected instead of overwriting a newer phase.
#[derive(Debug)]
pub struct SharedPhase(AtomicU8);

impl SharedPhase {
    /// Start in [`Phase::Handshaking`].
    pub fn new() -> Self {
        Self(AtomicU8::new(Phase::Handshaking as u8))
    }

    /// Current phase.
    pub fn get(&self) -> Phase {
        Phase::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Apply the serverbound transition rule. Returns the new phase when this
    /// call performed a transition.
    pub fn observe_serverbound(&self, opcode: i32) -> Option<Phase> {
        self.apply(|phase| phase.after_serverbound(opcode))
    }

    /// Apply the clientbound transition rule. Returns the new phase when this
    /// call performed a transition.
    pub fn observe_clientbound(&self, opcode: i32) -> Option<Phase> {
        self.apply(|phase| phase.after_clientbound(opcode))
    }

    fn apply(&self, rule: impl Fn(Phase) -> Option<Phase>) -> Option<Phase> {
        let current = self.get();
        let next = rule(current)?;
        self.0
            .compare_exchange(current as u8, next as u8, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        tracing::info!("Switched from {current} to {next} phase");
        Some(next)
    }
}

impl Default for SharedPhase {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_starts_handshaking() {
        assert_eq!(SharedPhase::new().get(), Phase::Handshaking);
    }

    #[test]
    fn test_full_login_sequence() {
        let phase = SharedPhase::new();
        assert_eq!(phase.observe_serverbound(0x00), Some(Phase::Login));
        assert_eq!(phase.observe_clientbound(0x02), Some(Phase::Play));
        assert_eq!(phase.get(), Phase::Play);
    }

    #[test]
    fn test_repeated_triggers_are_noops() {
        let phase = SharedPhase::new();
        phase.observe_serverbound(0x00);
        assert_eq!(phase.observe_serverbound(0x00), None);
        assert_eq!(phase.get(), Phase::Login);

        phase.observe_clientbound(0x02);
        assert_eq!(phase.observe_clientbound(0x02), None);
        assert_eq!(phase.observe_serverbound(0x00), None);
        assert_eq!(phase.get(), Phase::Play);
    }

    #[test]
    fn test_login_success_ignored_before_handshake() {
        let phase = SharedPhase::new();
        assert_eq!(phase.observe_clientbound(0x02), None);
        assert_eq!(phase.get(), Phase::Handshaking);
    }

    #[test]
    fn test_direction_matters() {
        let phase = SharedPhase::new();
        // 0x00 from the server and 0x02 from the client trigger nothing
        assert_eq!(phase.observe_clientbound(0x00), None);
        phase.observe_serverbound(0x00);
        assert_eq!(phase.observe_serverbound(0x02), None);
        assert_eq!(phase.get(), Phase::Login);
    }

    #[test]
    fn test_other_opcodes_leave_phase() {
        let phase = SharedPhase::new();
        for opcode in [0x01, 0x03, 0x10, 0x1F, 0x34] {
            phase.observe_serverbound(opcode);
            phase.observe_clientbound(opcode);
        }
        assert_eq!(phase.get(), Phase::Handshaking);
    }

    #[test]
    fn test_status_is_never_entered() {
        for from in [Phase::Handshaking, Phase::Login, Phase::Play] {
            for opcode in 0..=0x40 {
                assert_ne!(from.after_serverbound(opcode), Some(Phase::Status));
                assert_ne!(from.after_clientbound(opcode), Some(Phase::Status));
            }
        }
    }

    #[test]
    fn test_concurrent_observers_transition_once() {
        let phase = Arc::new(SharedPhase::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let phase = Arc::clone(&phase);
                std::thread::spawn(move || phase.observe_serverbound(0x00).is_some())
            })
            .collect();
        let transitions = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&won| won)
            .count();
        assert_eq!(transitions, 1);
        assert_eq!(phase.get(), Phase::Login);
    }
}
