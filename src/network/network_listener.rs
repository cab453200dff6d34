//! # Network Listener Module
//!
//! Binds one TCP listener per configured port and runs an accept loop for
//! each. Accepted connections are tagged with the port's [`PortRole`] and
//! forwarded to the dispatcher as [`ConnectionRequest`]s through an async
//! channel.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────────┐    ┌─────────────────┐
//! │ Incoming        │───▶│ NetworkListener  │───▶│ Server          │
//! │ Connections     │    │ (accept loops)   │    │ (via mpsc)      │
//! └─────────────────┘    └──────────────────┘    └─────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::net::{IpAddr, Ipv4Addr};
//! use tokio::sync::{mpsc, watch};
//! use ethdaq::network::network_listener::NetworkListener;
//! use ethdaq::network::types::PortRole;
//!
//! #[tokio::main]
//! async fn main() {
//!     let (tx, mut rx) = mpsc::channel(100);
//!     let (_stop_tx, stop_rx) = watch::channel(false);
//!
//!     let mut listener = NetworkListener::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), tx);
//!     listener.bind_services(&[(5002, PortRole::Handshake)]);
//!     let _tasks = listener.start_listening(stop_rx);
//!
//!     while let Some(request) = rx.recv().await {
//!         println!("connection from {}", request.client_addr);
//!     }
//! }
//! ```

use std::net::{IpAddr, SocketAddr};

use log::{error, info};
use tokio::net::{TcpListener, TcpSocket};
use tokio::sync::mpsc::Sender;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::types::{wait_for_stop, ConnectionRequest, PortRole};
use crate::error_handling::types::NetworkError;

const BACKLOG: u32 = 1024;

/// Owns the bound listening sockets until the accept loops are started.
pub struct NetworkListener {
    bind_address: IpAddr,

    /// Bound listeners with the role of the port they listen on
    listeners: Vec<(TcpListener, PortRole)>,

    /// Channel sender for forwarding accepted connections to the dispatcher
    request_tx: Sender<ConnectionRequest>,
}

impl NetworkListener {
    pub fn new(bind_address: IpAddr, request_tx: Sender<ConnectionRequest>) -> Self {
        Self {
            bind_address,
            listeners: Vec::new(),
            request_tx,
        }
    }

    fn bind_one(&self, port: u16) -> Result<TcpListener, NetworkError> {
        let addr = SocketAddr::new(self.bind_address, port);
        let socket = match addr {
            SocketAddr::V4(_) => TcpSocket::new_v4(),
            SocketAddr::V6(_) => TcpSocket::new_v6(),
        }
        .map_err(|e| NetworkError::BindError(port, e))?;

        socket
            .set_reuseaddr(true)
            .map_err(|e| NetworkError::BindError(port, e))?;
        socket
            .bind(addr)
            .map_err(|e| NetworkError::BindError(port, e))?;
        socket
            .listen(BACKLOG)
            .map_err(|e| NetworkError::BindError(port, e))
    }

    /// Binds a listener for every `(port, role)` pair.
    ///
    /// A port that cannot be bound is logged and skipped so the remaining
    /// channels stay available. Returns the number of listeners bound.
    pub fn bind_services(&mut self, ports: &[(u16, PortRole)]) -> usize {
        for &(port, role) in ports {
            match self.bind_one(port) {
                Ok(listener) => {
                    info!("Listening on {}:{} ({:?})", self.bind_address, port, role);
                    self.listeners.push((listener, role));
                }
                Err(e) => error!("[!] {}", e),
            }
        }
        self.listeners.len()
    }

    /// Actual local addresses, useful when binding to port 0.
    pub fn local_addrs(&self) -> Vec<(SocketAddr, PortRole)> {
        self.listeners
            .iter()
            .filter_map(|(l, role)| l.local_addr().ok().map(|a| (a, *role)))
            .collect()
    }

    /// Spawns one accept loop per bound listener. Each loop stops when the
    /// stop flag is raised, the dispatcher goes away or accepting fails.
    pub fn start_listening(self, stop: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        self.listeners
            .into_iter()
            .map(|(listener, role)| {
                let tx = self.request_tx.clone();
                let stop = stop.clone();
                tokio::spawn(accept_loop(listener, role, tx, stop))
            })
            .collect()
    }
}

async fn accept_loop(
    listener: TcpListener,
    role: PortRole,
    tx: Sender<ConnectionRequest>,
    mut stop: watch::Receiver<bool>,
) {
    let port = match listener.local_addr() {
        Ok(addr) => addr.port(),
        Err(e) => {
            error!("[!] Listener lost its address: {}", e);
            return;
        }
    };

    loop {
        tokio::select! {
            _ = wait_for_stop(&mut stop) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, client_addr)) => {
                    info!("Accepted connection from {} on port {}", client_addr, port);
                    let request = ConnectionRequest::new(stream, client_addr, port, role);
                    if tx.send(request).await.is_err() {
                        error!("[!] Dispatcher is gone, closing listener on port {}", port);
                        break;
                    }
                }
                Err(e) => {
                    error!("[!] {} on port {}", NetworkError::AcceptError(e), port);
                    break;
                }
            }
        }
    }
    info!("Stopped listening on port {}", port);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::ChannelKind;
    use std::net::Ipv4Addr;
    use std::time::Duration;
    use tokio::net::TcpStream;
    use tokio::sync::mpsc;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn forwards_accepted_connections_with_role() {
        let (tx, mut rx) = mpsc::channel(10);
        let (stop_tx, stop_rx) = watch::channel(false);

        let mut listener = NetworkListener::new(LOCALHOST, tx);
        let role = PortRole::Data(ChannelKind::GateVoltage);
        assert_eq!(listener.bind_services(&[(0, role)]), 1);
        let (addr, _) = listener.local_addrs()[0];
        let tasks = listener.start_listening(stop_rx);

        let client = TcpStream::connect(addr).await.unwrap();
        let request = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(request.role, role);
        assert_eq!(request.port, addr.port());
        assert_eq!(request.client_addr, client.local_addr().unwrap());

        stop_tx.send_replace(true);
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(1), task)
                .await
                .unwrap()
                .unwrap();
        }
    }

    #[tokio::test]
    async fn unbindable_port_is_skipped() {
        let taken = std::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let taken_port = taken.local_addr().unwrap().port();

        let (tx, _rx) = mpsc::channel(10);
        let mut listener = NetworkListener::new(LOCALHOST, tx);
        let bound = listener.bind_services(&[
            (taken_port, PortRole::Handshake),
            (0, PortRole::Data(ChannelKind::SourceVoltage)),
        ]);

        assert_eq!(bound, 1);
        assert_eq!(
            listener.local_addrs()[0].1,
            PortRole::Data(ChannelKind::SourceVoltage)
        );
    }
}
