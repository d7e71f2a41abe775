//! Typed views of the packets the proxy reads or synthesizes.

use crate::codec::{self, DecodeError};
use crate::packet::{PacketView, opcode};

// ---------------------------------------------------------------------------
// Clientbound
// ---------------------------------------------------------------------------

/// Server liveness check. The client must echo `id` back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveRequest {
    /// Opaque id chosen by the server.
    pub id: i64,
}

impl PacketView for KeepAliveRequest {
    const ID: i32 = opcode::clientbound::KEEP_ALIVE;

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            id: codec::read_i64(buf)?,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.to_be_bytes());
    }
}

/// Server-issued player position. The client must confirm `teleport_id`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionAndLook {
    /// Absolute or relative X, depending on `flags`.
    pub x: f64,
    /// Absolute or relative Y, depending on `flags`.
    pub y: f64,
    /// Absolute or relative Z, depending on `flags`.
    pub z: f64,
    /// Yaw in degrees.
    pub yaw: f32,
    /// Pitch in degrees.
    pub pitch: f32,
    /// Bit field marking which fields are relative.
    pub flags: u8,
    /// Id the client echoes in its teleport confirm.
    pub teleport_id: i32,
}

impl PacketView for PositionAndLook {
    const ID: i32 = opcode::clientbound::POSITION_AND_LOOK;

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            x: codec::read_f64(buf)?,
            y: codec::read_f64(buf)?,
            z: codec::read_f64(buf)?,
            yaw: codec::read_f32(buf)?,
            pitch: codec::read_f32(buf)?,
            flags: codec::read_u8(buf)?,
            teleport_id: codec::read_varint(buf)?,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.x.to_be_bytes());
        buf.extend_from_slice(&self.y.to_be_bytes());
        buf.extend_from_slice(&self.z.to_be_bytes());
        buf.extend_from_slice(&self.yaw.to_be_bytes());
        buf.extend_from_slice(&self.pitch.to_be_bytes());
        buf.push(self.flags);
        codec::write_varint(buf, self.teleport_id);
    }
}

// ---------------------------------------------------------------------------
// Serverbound
// ---------------------------------------------------------------------------

/// Client answer to a [`KeepAliveRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveResponse {
    /// Echoed id.
    pub id: i64,
}

impl PacketView for KeepAliveResponse {
    const ID: i32 = opcode::serverbound::KEEP_ALIVE;

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            id: codec::read_i64(buf)?,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.id.to_be_bytes());
    }
}

/// Client acknowledgement of a [`PositionAndLook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TeleportConfirm {
    /// Echoed teleport id.
    pub teleport_id: i32,
}

impl PacketView for TeleportConfirm {
    const ID: i32 = opcode::serverbound::TELEPORT_CONFIRM;

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            teleport_id: codec::read_varint(buf)?,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        codec::write_varint(buf, self.teleport_id);
    }
}

/// Chat line typed by the player. Lines starting with `/` are commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Raw text.
    pub message: String,
}

impl ChatMessage {
    /// Command teleporting the player to an absolute position.
    pub fn teleport(x: f64, y: f64, z: f64) -> Self {
        Self {
            message: format!("/teleport {x:.6} {y:.6} {z:.6}"),
        }
    }
}

impl PacketView for ChatMessage {
    const ID: i32 = opcode::serverbound::CHAT_MESSAGE;

    fn decode(buf: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            message: codec::read_string(buf)?,
        })
    }

    fn encode(&self, buf: &mut Vec<u8>) {
        codec::write_string(buf, &self.message);
    }
}
