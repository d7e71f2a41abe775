//! VarInt length-prefixed framing for TCP streams.
//!
//! Every packet on the wire is a frame:
//!
//! ```text
//! +-------------------+--------------------+-------------------+
//! | length (VarInt)   | packet id (VarInt) |   payload         |
//! +-------------------+--------------------+-------------------+
//!                     |<------------- length bytes ----------->|
//! ```
//!
//! The length covers the packet id and payload but not itself. Compression
//! and encryption are never negotiated through the proxy, so frames are
//! always plain.

use std::io::ErrorKind;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::{self, DecodeError, VARINT_MAX_BYTES};
use crate::packet::Packet;

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Maximum allowed frame length in bytes. Default: 2 097 151, the largest
    /// value a three-byte VarInt can carry.
    pub max_packet_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_packet_size: 2_097_151,
        }
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame length exceeds the configured maximum.
    #[error("frame size {size} exceeds maximum {max}")]
    PacketTooLarge {
        /// The announced or actual frame size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The frame length prefix was negative.
    #[error("invalid frame length {0}")]
    InvalidLength(i32),

    /// The frame body could not be split into opcode and payload.
    #[error("malformed frame: {0}")]
    Malformed(#[from] DecodeError),

    /// The peer closed the connection.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrameError {
    /// Whether the error means the stream is gone for good.
    pub fn is_closed(&self) -> bool {
        matches!(self, FrameError::ConnectionClosed)
    }
}

/// Map I/O errors that mean "the peer is gone" to [`FrameError::ConnectionClosed`].
pub(crate) fn classify_io(e: std::io::Error) -> FrameError {
    match e.kind() {
        ErrorKind::UnexpectedEof
        | ErrorKind::BrokenPipe
        | ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::NotConnected
        | ErrorKind::WriteZero => FrameError::ConnectionClosed,
        _ => FrameError::Io(e),
    }
}

/// Read the VarInt length prefix one byte at a time.
async fn read_length<R: AsyncRead + Unpin>(reader: &mut R) -> Result<i32, FrameError> {
    let mut prefix = [0u8; VARINT_MAX_BYTES];
    for i in 0..VARINT_MAX_BYTES {
        prefix[i] = reader.read_u8().await.map_err(classify_io)?;
        if prefix[i] & 0x80 == 0 {
            return Ok(codec::read_varint(&mut &prefix[..=i])?);
        }
    }
    Err(DecodeError::VarIntTooLong.into())
}

/// Read a single frame body (packet id and payload) from the stream.
///
/// Blocks until the full frame is available. Returns
/// [`FrameError::ConnectionClosed`] if the peer closes the connection, whether
/// between frames or in the middle of one.
pub async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let len = read_length(reader).await?;
    let len = u32::try_from(len).map_err(|_| FrameError::InvalidLength(len))?;

    if len > config.max_packet_size {
        return Err(FrameError::PacketTooLarge {
            size: len,
            max: config.max_packet_size,
        });
    }

    let mut body = vec![0u8; len as usize];
    reader.read_exact(&mut body).await.map_err(classify_io)?;
    Ok(body)
}

/// Write a single frame body, prefixed with its VarInt length.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    body: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
    if len > config.max_packet_size {
        return Err(FrameError::PacketTooLarge {
            size: len,
            max: config.max_packet_size,
        });
    }

    let mut frame = Vec::with_capacity(VARINT_MAX_BYTES + body.len());
    codec::write_varint(&mut frame, len as i32);
    frame.extend_from_slice(body);

    writer.write_all(&frame).await.map_err(classify_io)?;
    writer.flush().await.map_err(classify_io)?;
    Ok(())
}

/// Read one [`Packet`] from the stream.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Packet, FrameError> {
    let body = read_frame(reader, config).await?;
    Ok(Packet::decode_frame(&body)?)
}

/// Write one [`Packet`] to the stream.
pub async fn write_packet<W: AsyncWrite + Unpin>(
    writer: &mut W,
    packet: &Packet,
    config: &FrameConfig,
) -> Result<(), FrameError> {
    write_frame(writer, &packet.encode_frame(), config).await
}
