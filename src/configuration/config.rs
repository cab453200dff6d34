use std::collections::HashSet;
use std::fs;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::Parser;
use log::debug;
use serde::{Deserialize, Serialize};

use super::types::{default_channels, ChannelConfig};
use crate::error_handling::types::ConfigError;
use crate::network::handshake::HandshakeSettings;
use crate::network::types::PortRole;
use crate::session_management::SessionSettings;

/// Runtime configuration of the ingestion server.
///
/// Every field has a default, so an empty TOML file (or none at all) yields
/// the stock port layout: handshake on 5002, data channels on 5555-5557 and
/// device logs on UDP 2403. Selected fields can be overridden from the
/// command line through [`CommandLine`].
///
/// # Examples
///
/// ```
/// use ethdaq::configuration::Config;
///
/// let config = Config::from_toml_str(r#"
///     data_dir = "/var/lib/daq"
///     log_port = 2500
///
///     [[channels]]
///     port = 6000
///     kind = "thermocouple"
/// "#).unwrap();
/// assert_eq!(config.channels.len(), 1);
/// assert_eq!(config.handshake_port, 5002);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address every listener binds to.
    pub bind_address: IpAddr,
    /// Directory receiving the raw capture files.
    pub data_dir: PathBuf,
    /// Directory receiving the per-device log files.
    pub logs_dir: PathBuf,
    /// TCP port of the one-shot identity handshake.
    pub handshake_port: u16,
    /// Binary data channels.
    pub channels: Vec<ChannelConfig>,
    /// UDP port receiving device log lines.
    pub log_port: u16,
    /// Session buffer length that triggers a flush to disk.
    pub flush_threshold_bytes: usize,
    /// Running-average window of the voltage channels.
    pub average_window: usize,
    /// Running-average window of both thermocouple sub-channels.
    pub thermocouple_average_window: usize,
    /// Log lines kept in memory per device.
    pub log_history_lines: usize,
    /// Upper bound for the final flush on shutdown.
    pub shutdown_timeout_secs: u64,
    pub handshake_timeout_secs: u64,
    pub handshake_max_bytes: usize,
    /// Reply to a valid handshake with a small JSON acknowledgment.
    pub send_handshake_ack: bool,
    /// Serve the JSON query API.
    pub web_ui_enabled: bool,
    pub web_ui_port: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            data_dir: PathBuf::from("data"),
            logs_dir: PathBuf::from("logs"),
            handshake_port: 5002,
            channels: default_channels(),
            log_port: 2403,
            flush_threshold_bytes: 10 * 1024 * 1024,
            average_window: 1000,
            thermocouple_average_window: 5,
            log_history_lines: 500,
            shutdown_timeout_secs: 5,
            handshake_timeout_secs: 5,
            handshake_max_bytes: 4096,
            send_handshake_ack: false,
            web_ui_enabled: false,
            web_ui_port: 8080,
        }
    }
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        debug!("Read configuration from {}", path.display());
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(content).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds the configuration from an optional file plus CLI overrides.
    pub fn load(cli: &CommandLine) -> Result<Self, ConfigError> {
        let mut config = match &cli.config_file {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        cli.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let mut tcp_ports = vec![self.handshake_port];
        tcp_ports.extend(self.channels.iter().map(|c| c.port));
        if self.web_ui_enabled {
            tcp_ports.push(self.web_ui_port);
        }
        for port in tcp_ports {
            if !seen.insert(port) {
                return Err(ConfigError::DuplicatePort(port));
            }
        }

        let non_zero = [
            ("flush_threshold_bytes", self.flush_threshold_bytes),
            ("average_window", self.average_window),
            ("thermocouple_average_window", self.thermocouple_average_window),
            ("log_history_lines", self.log_history_lines),
            ("handshake_max_bytes", self.handshake_max_bytes),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(ConfigError::NotInRange(format!("{} must be greater than 0", name)));
            }
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            flush_threshold: self.flush_threshold_bytes,
            average_window: self.average_window,
            thermocouple_average_window: self.thermocouple_average_window,
        }
    }

    pub fn handshake_settings(&self) -> HandshakeSettings {
        HandshakeSettings {
            timeout: Duration::from_secs(self.handshake_timeout_secs),
            max_bytes: self.handshake_max_bytes,
            send_ack: self.send_handshake_ack,
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }

    /// Every TCP port to listen on, with what it carries.
    pub fn port_roles(&self) -> Vec<(u16, PortRole)> {
        let mut roles = vec![(self.handshake_port, PortRole::Handshake)];
        roles.extend(self.channels.iter().map(|c| (c.port, PortRole::Data(c.kind))));
        roles
    }
}

/// Command-line interface of the `ethdaq` binary.
#[derive(Parser, Debug, Clone, Default)]
#[command(name = "ethdaq")]
#[command(version)]
#[command(about = "Ingestion server for networked measurement channels")]
pub struct CommandLine {
    /// TOML configuration file; built-in defaults are used when omitted
    pub config_file: Option<PathBuf>,

    /// Address to bind every listener to
    #[arg(long, env = "ETHDAQ_BIND_ADDRESS")]
    pub bind_address: Option<IpAddr>,

    /// Directory for raw capture files
    #[arg(long, env = "ETHDAQ_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Directory for per-device log files
    #[arg(long, env = "ETHDAQ_LOGS_DIR")]
    pub logs_dir: Option<PathBuf>,

    /// Serve the JSON query API on this port
    #[arg(long)]
    pub web_ui_port: Option<u16>,
}

impl CommandLine {
    fn apply(&self, config: &mut Config) {
        if let Some(addr) = self.bind_address {
            config.bind_address = addr;
        }
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        if let Some(dir) = &self.logs_dir {
            config.logs_dir = dir.clone();
        }
        if let Some(port) = self.web_ui_port {
            config.web_ui_enabled = true;
            config.web_ui_port = port;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sampling::ChannelKind;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn empty_file_gives_stock_layout() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config, Config::default());
        let roles = config.port_roles();
        assert_eq!(roles[0], (5002, PortRole::Handshake));
        assert_eq!(roles[3], (5557, PortRole::Data(ChannelKind::Thermocouple)));
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn reads_file_and_derives_settings() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
bind_address = "127.0.0.1"
flush_threshold_bytes = 4096
average_window = 10
send_handshake_ack = true

[[channels]]
port = 7001
kind = "source_voltage"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.bind_address, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.session_settings().flush_threshold, 4096);
        assert_eq!(config.session_settings().window_for(ChannelKind::SourceVoltage), 10);
        assert_eq!(config.session_settings().window_for(ChannelKind::Thermocouple), 5);
        assert!(config.handshake_settings().send_ack);
        assert_eq!(config.port_roles().len(), 2);
    }

    #[test]
    fn rejects_duplicate_ports() {
        let err = Config::from_toml_str(
            r#"
handshake_port = 5555
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicatePort(5555)));
    }

    #[test]
    fn rejects_zero_window() {
        let err = Config::from_toml_str("average_window = 0").unwrap_err();
        assert!(matches!(err, ConfigError::NotInRange(_)));
    }

    #[test]
    fn rejects_unknown_channel_kind() {
        let err = Config::from_toml_str(
            r#"
[[channels]]
port = 7000
kind = "humidity"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::TomlError(_)));
    }

    #[test]
    fn command_line_overrides_file_values() {
        let cli = CommandLine::try_parse_from([
            "ethdaq",
            "--bind-address",
            "10.0.0.1",
            "--data-dir",
            "/tmp/captures",
            "--web-ui-port",
            "9000",
        ])
        .unwrap_or_else(|e| panic!("{}", e));

        let config = Config::load(&cli).unwrap();
        assert_eq!(config.bind_address, "10.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(config.data_dir, PathBuf::from("/tmp/captures"));
        assert_eq!(config.logs_dir, PathBuf::from("logs"));
        assert!(config.web_ui_enabled);
        assert_eq!(config.web_ui_port, 9000);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let cli = CommandLine {
            config_file: Some(PathBuf::from("/definitely/not/here.toml")),
            ..Default::default()
        };
        assert!(matches!(Config::load(&cli), Err(ConfigError::IoError(_))));
    }
}
