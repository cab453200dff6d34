use chrono::{DateTime, Utc};
use std::net::SocketAddr;
use tokio::net::TcpStream;
use tokio::sync::watch;

use crate::sampling::ChannelKind;

/// What a listening TCP port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortRole {
    /// One JSON identity message per connection.
    Handshake,
    /// Unbounded stream of 16-bit samples of the given kind.
    Data(ChannelKind),
}

/// An accepted connection on its way from an accept loop to the dispatcher.
pub struct ConnectionRequest<S = TcpStream> {
    pub stream: S,
    pub client_addr: SocketAddr,
    /// Local port the connection was accepted on.
    pub port: u16,
    pub role: PortRole,
    pub timestamp: DateTime<Utc>,
}

impl<S> ConnectionRequest<S> {
    pub fn new(stream: S, client_addr: SocketAddr, port: u16, role: PortRole) -> Self {
        Self {
            stream,
            client_addr,
            port,
            role,
            timestamp: Utc::now(),
        }
    }
}

/// Resolves once the stop flag is raised or its sender is gone.
pub async fn wait_for_stop(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}
