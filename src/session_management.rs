//! Session management core module.
//!
//! A [`Session`](session::Session) is the live processing and buffering state
//! for one [`EndpointKey`](types::EndpointKey): the raw accumulation buffer,
//! the sample decoder feeding the running averages, and throughput-rate
//! accounting. Sessions are kept in a [`SessionTable`](session_manager::SessionTable)
//! and outlive individual TCP connections on the same endpoint.

/// Submodule for the per-endpoint session state.
pub mod session;
/// Submodule for the session table shared by all connections.
pub mod session_manager;
/// Submodule for endpoint keys and IP sanitizing.
pub mod types;

pub use session::{Session, SessionSettings};
pub use session_manager::SessionTable;
pub use types::{sanitize_ip, EndpointKey};
