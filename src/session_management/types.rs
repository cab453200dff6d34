use std::fmt;
use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

/// Replaces characters that are awkward in file names (`:` `.` `[` `]`).
///
/// Idempotent, so already-sanitized IPs pass through unchanged.
pub fn sanitize_ip(ip: &str) -> String {
    ip.chars()
        .filter(|c| *c != '[' && *c != ']')
        .map(|c| if c == ':' || c == '.' { '_' } else { c })
        .collect()
}

/// One logical channel from one device: sanitized device IP plus local port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EndpointKey {
    pub ip: String,
    pub port: u16,
}

impl EndpointKey {
    pub fn new(ip: &str, port: u16) -> Self {
        Self {
            ip: sanitize_ip(ip),
            port,
        }
    }

    /// Key for a connection from `peer` accepted on `local_port`.
    pub fn from_peer(peer: &SocketAddr, local_port: u16) -> Self {
        Self::new(&peer.ip().to_string(), local_port)
    }
}

impl fmt::Display for EndpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ip, self.port)
    }
}
