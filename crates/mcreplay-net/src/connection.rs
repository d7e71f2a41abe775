//! Packet-level connections.
//!
//! A [`Connection`] is a pair of halves: a [`PacketReader`] and a
//! [`PacketWriter`]. The halves are generic over the underlying byte stream so
//! the same relay code runs over TCP sockets and in-memory pipes. They are
//! usually split apart and handed to different tasks.

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use crate::framing::{self, FrameConfig, FrameError, classify_io};
use crate::packet::Packet;
use crate::platform::{self, SocketConfig};

/// Reading half of a packet connection.
pub struct PacketReader<R> {
    inner: R,
    config: FrameConfig,
}

impl<R: AsyncRead + Unpin> PacketReader<R> {
    /// Wrap a byte stream.
    pub fn new(inner: R, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Read the next packet. Blocks until one is available.
    pub async fn read_packet(&mut self) -> Result<Packet, FrameError> {
        framing::read_packet(&mut self.inner, &self.config).await
    }
}

/// Writing half of a packet connection.
pub struct PacketWriter<W> {
    inner: W,
    config: FrameConfig,
}

impl<W: AsyncWrite + Unpin> PacketWriter<W> {
    /// Wrap a byte stream.
    pub fn new(inner: W, config: FrameConfig) -> Self {
        Self { inner, config }
    }

    /// Write one packet and flush it.
    pub async fn write_packet(&mut self, packet: &Packet) -> Result<(), FrameError> {
        framing::write_packet(&mut self.inner, packet, &self.config).await
    }

    /// Shut down the write direction. The peer sees end-of-stream.
    pub async fn close(&mut self) -> Result<(), FrameError> {
        self.inner.shutdown().await.map_err(classify_io)
    }
}

/// A framed duplex connection to one peer.
pub struct Connection<R, W> {
    /// Incoming packets.
    pub reader: PacketReader<R>,
    /// Outgoing packets.
    pub writer: PacketWriter<W>,
    peer: String,
}

/// A connection over a TCP socket.
pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;

impl<R, W> Connection<R, W> {
    /// Human-readable peer label used in logs.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Separate the halves so they can move to different tasks.
    pub fn into_split(self) -> (PacketReader<R>, PacketWriter<W>) {
        (self.reader, self.writer)
    }
}

impl<T: AsyncRead + AsyncWrite> Connection<ReadHalf<T>, WriteHalf<T>> {
    /// Wrap any duplex byte stream, e.g. a [`tokio::io::DuplexStream`].
    pub fn from_io(io: T, peer: impl Into<String>, config: FrameConfig) -> Self {
        let (read, write) = tokio::io::split(io);
        Self {
            reader: PacketReader::new(read, config.clone()),
            writer: PacketWriter::new(write, config),
            peer: peer.into(),
        }
    }
}

impl TcpConnection {
    /// Wrap an accepted or connected socket, applying socket options first.
    pub fn from_stream(
        stream: TcpStream,
        peer: SocketAddr,
        frame: FrameConfig,
        socket: &SocketConfig,
    ) -> std::io::Result<Self> {
        platform::configure_stream(&stream, socket)?;
        let (read, write) = stream.into_split();
        Ok(Self {
            reader: PacketReader::new(read, frame.clone()),
            writer: PacketWriter::new(write, frame),
            peer: peer.to_string(),
        })
    }

    /// Connect to `addr` (host:port, resolved if needed).
    pub async fn dial(
        addr: &str,
        frame: FrameConfig,
        socket: &SocketConfig,
    ) -> std::io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let peer = stream.peer_addr()?;
        tracing::debug!("Connected to {addr} ({peer})");
        Self::from_stream(stream, peer, frame, socket)
    }
}
