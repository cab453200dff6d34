use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Configured per-channel sample rates reported by the handshake.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRates {
    /// Gate-voltage channel.
    pub vgs: u32,
    /// Source-voltage channel.
    pub vds: u32,
    /// Thermocouple channel.
    pub tc: u32,
}

/// Self-reported device identity. Nothing here is authenticated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceIdentity {
    pub uuid: Option<String>,
    pub mac: Option<String>,
    pub firmware_version: Option<String>,
    pub hardware_version: Option<String>,
    pub sample_rates: SampleRates,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceRecord {
    /// Data ports with a live registered connection.
    pub active_ports: BTreeSet<u16>,
    /// Bytes received on all data ports since the record was created.
    pub total_bytes: u64,
    pub identity: DeviceIdentity,
}
