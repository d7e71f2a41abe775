//! Packet transport for the proxied game protocol: VarInt framing, the opaque
//! [`Packet`] container with opcode-guarded typed views, and TCP connection
//! setup.

pub mod codec;
pub mod connection;
pub mod framing;
pub mod packet;
pub mod packets;
pub mod platform;

pub use codec::DecodeError;
pub use connection::{Connection, PacketReader, PacketWriter, TcpConnection};
pub use framing::{FrameConfig, FrameError, read_frame, read_packet, write_frame, write_packet};
pub use packet::{Packet, PacketView, opcode};
pub use packets::{ChatMessage, KeepAliveRequest, KeepAliveResponse, PositionAndLook, TeleportConfirm};
pub use platform::{SocketConfig, configure_stream, create_listener, resolve_addr};
