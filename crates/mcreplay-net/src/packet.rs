//! The opaque [`Packet`] container.
//!
//! A packet is an opcode plus its undecoded payload. Relaying never looks
//! inside the payload; the handful of packets the proxy interprets are
//! decoded on demand through [`PacketView`] types, which refuse to decode a
//! packet carrying a different opcode.

use serde::{Deserialize, Serialize};

use crate::codec::{self, DecodeError};

/// Opcodes the proxy interprets. Everything else passes through untouched.
pub mod opcode {
    /// Packets sent by the client.
    pub mod serverbound {
        use std::ops::RangeInclusive;

        /// Handshake (Handshaking phase).
        pub const HANDSHAKE: i32 = 0x00;
        /// Teleport confirm (Play phase).
        pub const TELEPORT_CONFIRM: i32 = 0x00;
        /// Chat message, also used to issue commands.
        pub const CHAT_MESSAGE: i32 = 0x03;
        /// Keep-alive response.
        pub const KEEP_ALIVE: i32 = 0x10;
        /// Movement and world-interaction packets. The first one seen in Play
        /// marks the point where the world is loaded around the player.
        pub const WORLD_FAMILY: RangeInclusive<i32> = 0x12..=0x16;
    }

    /// Packets sent by the server.
    pub mod clientbound {
        /// Login success (Login phase).
        pub const LOGIN_SUCCESS: i32 = 0x02;
        /// Keep-alive request.
        pub const KEEP_ALIVE: i32 = 0x1F;
        /// Player position and look.
        pub const POSITION_AND_LOOK: i32 = 0x34;
    }
}

/// A single protocol packet with an undecoded payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Packet {
    /// Packet opcode.
    pub id: i32,
    /// Payload bytes following the opcode.
    pub data: Vec<u8>,
}

/// A typed, opcode-bound view of a packet payload.
pub trait PacketView: Sized {
    /// Opcode this view decodes.
    const ID: i32;

    /// Decode the view's fields from the payload. Trailing bytes are ignored.
    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError>;

    /// Append the view's fields to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);
}

impl Packet {
    /// Create a packet from an opcode and raw payload.
    pub fn new(id: i32, data: Vec<u8>) -> Self {
        Self { id, data }
    }

    /// Build a packet from a typed view.
    pub fn from_view<V: PacketView>(view: &V) -> Self {
        let mut data = Vec::new();
        view.encode(&mut data);
        Self { id: V::ID, data }
    }

    /// Decode the payload as `V`, failing if the opcode does not match.
    pub fn view<V: PacketView>(&self) -> Result<V, DecodeError> {
        if self.id != V::ID {
            return Err(DecodeError::WrongOpcode {
                expected: V::ID,
                actual: self.id,
            });
        }
        V::decode(&mut self.data.as_slice())
    }

    /// Split a frame body into opcode and payload.
    pub fn decode_frame(mut frame: &[u8]) -> Result<Self, DecodeError> {
        let id = codec::read_varint(&mut frame)?;
        Ok(Self {
            id,
            data: frame.to_vec(),
        })
    }

    /// Frame body: VarInt opcode followed by the payload.
    pub fn encode_frame(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(codec::varint_len(self.id) + self.data.len());
        codec::write_varint(&mut out, self.id);
        out.extend_from_slice(&self.data);
        out
    }
}
