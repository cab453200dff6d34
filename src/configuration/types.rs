use serde::{Deserialize, Serialize};

use crate::sampling::ChannelKind;

/// One binary data channel: the TCP port a device streams to and how its
/// words are interpreted.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub port: u16,
    pub kind: ChannelKind,
}

pub fn default_channels() -> Vec<ChannelConfig> {
    vec![
        ChannelConfig {
            port: 5555,
            kind: ChannelKind::SourceVoltage,
        },
        ChannelConfig {
            port: 5556,
            kind: ChannelKind::GateVoltage,
        },
        ChannelConfig {
            port: 5557,
            kind: ChannelKind::Thermocouple,
        },
    ]
}
