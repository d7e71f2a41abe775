//! Socket setup for proxied connections and the client-facing listener.
//!
//! By default Nagle is off and TCP keepalive is on for both legs of a
//! proxied session.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use tokio::net::{TcpListener, TcpStream};

/// Pending-connection queue length of the listener.
const LISTEN_BACKLOG: i32 = 128;

/// Options applied to every proxied socket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Set `TCP_NODELAY`.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive.
    pub keepalive_idle: Duration,
    /// Time between unanswered keepalives.
    pub keepalive_interval: Duration,
    /// Set `SO_REUSEADDR` on the listener. Off by default on Windows.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            reuse_addr: !cfg!(windows),
        }
    }
}

impl SocketConfig {
    fn keepalive(&self) -> Option<TcpKeepalive> {
        self.keepalive_enabled.then(|| {
            TcpKeepalive::new()
                .with_time(self.keepalive_idle)
                .with_interval(self.keepalive_interval)
        })
    }
}

/// Apply `config` to an accepted or dialed stream.
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;
    if let Some(keepalive) = config.keepalive() {
        SockRef::from(stream).set_tcp_keepalive(&keepalive)?;
    }
    Ok(())
}

/// Resolve `host:port`, taking the first address returned.
pub async fn resolve_addr(addr: &str) -> std::io::Result<SocketAddr> {
    let mut candidates = tokio::net::lookup_host(addr).await?;
    candidates.next().ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::AddrNotAvailable,
            format!("{addr} did not resolve to any address"),
        )
    })
}

/// Bind the listener clients connect to. An IPv6 address also accepts IPv4
/// clients.
pub async fn create_listener(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(config.reuse_addr)?;
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    TcpListener::from_std(socket.into())
}
