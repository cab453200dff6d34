//! Transport side of the server: TCP accept loops, per-endpoint connection
//! ownership, the identity handshake and UDP log ingestion.

pub mod connection_registry;
pub mod handshake;
pub mod log_ingestor;
pub mod network_listener;
pub mod types;

pub use connection_registry::{ConnectionHandle, ConnectionRegistry};
pub use handshake::HandshakeSettings;
pub use log_ingestor::LogIngestor;
pub use network_listener::NetworkListener;
pub use types::{ConnectionRequest, PortRole};
