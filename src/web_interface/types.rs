use serde::Serialize;

use crate::controller::Server;
use crate::session_management::sanitize_ip;

/// API error payload
#[derive(Debug, Serialize)]
pub struct ApiError {
    pub message: String,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct RateResponse {
    pub ip: String,
    pub port: u16,
    /// MiB/s over the last measurement window.
    pub rate: f64,
    pub found: bool,
}

impl RateResponse {
    pub fn query(server: &Server, ip: &str, port: u16) -> Self {
        let (rate, found) = server.rate(ip, port);
        Self {
            ip: sanitize_ip(ip),
            port,
            rate,
            found,
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct AverageValue {
    pub value: f64,
    /// The averaging window has been filled at least once.
    pub filled_once: bool,
}

#[derive(Debug, PartialEq, Serialize)]
pub struct AverageResponse {
    pub ip: String,
    pub port: u16,
    pub found: bool,
    pub primary: AverageValue,
    /// External thermocouple channel; absent for other kinds.
    pub secondary: Option<AverageValue>,
}

impl AverageResponse {
    pub fn query(server: &Server, ip: &str, port: u16) -> Self {
        let session = server.session(ip, port);
        let (value, filled_once) = session
            .as_ref()
            .map(|s| s.average())
            .unwrap_or((0.0, false));
        let secondary = session
            .as_ref()
            .and_then(|s| s.average_b())
            .map(|(value, filled_once)| AverageValue { value, filled_once });

        Self {
            ip: sanitize_ip(ip),
            port,
            found: session.is_some(),
            primary: AverageValue { value, filled_once },
            secondary,
        }
    }
}

#[derive(Debug, PartialEq, Serialize)]
pub struct LogsResponse {
    pub ip: String,
    /// Newest first.
    pub lines: Vec<String>,
}

impl LogsResponse {
    pub fn query(server: &Server, ip: &str) -> Self {
        Self {
            ip: sanitize_ip(ip),
            lines: server.last_logs(ip),
        }
    }
}
