//! One-shot device identity handshake.
//!
//! A device opens a connection to the handshake port, writes a single JSON
//! object and (usually) closes. A valid message must carry a non-empty
//! `uuid`; everything else is optional:
//!
//! ```json
//! {"uuid": "a1b2", "mac": "AA:BB:CC:DD:EE:FF", "firmware": "1.4.2",
//!  "hardware": "rev3", "vgsSampleRate": "1000", "vdsSampleRate": "1000",
//!  "tcSampleRate": "10"}
//! ```

use std::net::SocketAddr;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::device_management::{DeviceDirectory, DeviceIdentity, SampleRates};
use crate::error_handling::types::HandshakeError;

/// Reply written when acknowledgments are enabled.
pub const HANDSHAKE_ACK: &[u8] = br#"{"status":"success","message":"Handshake complete"}"#;

#[derive(Debug, Clone)]
pub struct HandshakeSettings {
    pub timeout: Duration,
    pub max_bytes: usize,
    pub send_ack: bool,
}

impl Default for HandshakeSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            max_bytes: 4096,
            send_ack: false,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct HandshakeMessage {
    uuid: Option<String>,
    mac: Option<String>,
    firmware: Option<String>,
    hardware: Option<String>,
    vgs_sample_rate: Option<Value>,
    vds_sample_rate: Option<Value>,
    tc_sample_rate: Option<Value>,
}

/// Rates are sent as numeric strings; anything that is not a valid
/// non-negative integer counts as 0.
fn rate(value: &Option<Value>) -> u32 {
    match value {
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        Some(Value::Number(n)) => n.as_u64().and_then(|n| u32::try_from(n).ok()).unwrap_or(0),
        _ => 0,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

impl HandshakeMessage {
    fn into_identity(self) -> Result<DeviceIdentity, HandshakeError> {
        let uuid = non_empty(self.uuid).ok_or(HandshakeError::MissingUuid)?;
        let sample_rates = SampleRates {
            vgs: rate(&self.vgs_sample_rate),
            vds: rate(&self.vds_sample_rate),
            tc: rate(&self.tc_sample_rate),
        };
        Ok(DeviceIdentity {
            uuid: Some(uuid),
            mac: non_empty(self.mac),
            firmware_version: non_empty(self.firmware),
            hardware_version: non_empty(self.hardware),
            sample_rates,
        })
    }
}

/// Parses a complete handshake payload into a device identity.
pub fn parse_handshake(bytes: &[u8]) -> Result<DeviceIdentity, HandshakeError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(HandshakeError::Empty);
    }
    let message: HandshakeMessage =
        serde_json::from_slice(bytes).map_err(HandshakeError::MalformedJson)?;
    message.into_identity()
}

/// Reads until a complete JSON object has arrived, the peer closes, or
/// `max_bytes` have been read.
async fn read_payload<S>(stream: &mut S, max_bytes: usize) -> Result<Vec<u8>, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let mut payload = Vec::with_capacity(max_bytes.min(4096));
    let mut chunk = [0u8; 1024];

    loop {
        let room = max_bytes - payload.len();
        let n = stream
            .read(&mut chunk[..room.min(1024)])
            .await
            .map_err(HandshakeError::ReadError)?;
        if n == 0 {
            return Ok(payload);
        }
        payload.extend_from_slice(&chunk[..n]);

        match serde_json::from_slice::<Value>(&payload) {
            Ok(_) => return Ok(payload),
            Err(e) if e.is_eof() && payload.len() < max_bytes => continue,
            Err(_) => return Ok(payload),
        }
    }
}

/// Reads and parses one handshake, bounded by `settings.timeout`.
pub async fn read_handshake<S>(
    stream: &mut S,
    settings: &HandshakeSettings,
) -> Result<DeviceIdentity, HandshakeError>
where
    S: AsyncRead + Unpin,
{
    let payload = tokio::time::timeout(settings.timeout, read_payload(stream, settings.max_bytes))
        .await
        .map_err(|_| HandshakeError::Timeout)??;
    parse_handshake(&payload)
}

/// Serves one handshake connection: reads the identity, records it in the
/// directory and optionally acknowledges. Returns the number of open
/// sessions the UUID was stamped onto.
pub async fn handle_handshake<S>(
    mut stream: S,
    peer: SocketAddr,
    directory: &DeviceDirectory,
    settings: &HandshakeSettings,
) -> Result<usize, HandshakeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let ip = peer.ip().to_string();
    let identity = read_handshake(&mut stream, settings).await?;

    info!(
        "Received handshake from {}: UUID={}, Hardware={}, Firmware={}",
        ip,
        identity.uuid.as_deref().unwrap_or_default(),
        identity.hardware_version.as_deref().unwrap_or("-"),
        identity.firmware_version.as_deref().unwrap_or("-"),
    );
    let stamped = directory.apply_handshake(&ip, identity);

    if settings.send_ack {
        let ack = async {
            stream.write_all(HANDSHAKE_ACK).await?;
            stream.flush().await
        };
        if let Err(e) = ack.await {
            warn!("Failed to send handshake response to {}: {}", ip, e);
        }
    }
    debug!("Handshake from {} done", ip);
    Ok(stamped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_capture::capture_writer::tests::MemStorage;
    use crate::data_capture::CaptureWriter;
    use crate::network::log_ingestor::LogIngestor;
    use crate::sampling::ChannelKind;
    use crate::session_management::{EndpointKey, SessionSettings, SessionTable};
    use std::sync::Arc;
    use tempfile::TempDir;
    use tokio_test::io::Builder;

    const FULL: &[u8] = br#"{"uuid":"dev-42","mac":"AA:BB:CC:00:11:22","firmware":"1.4.2","hardware":"rev3","vgsSampleRate":"1000","vdsSampleRate":"2000","tcSampleRate":"oops"}"#;

    fn peer() -> SocketAddr {
        "192.168.4.7:50000".parse().unwrap()
    }

    fn directory(dir: &TempDir) -> (DeviceDirectory, Arc<SessionTable>) {
        let (_writer, queue) = CaptureWriter::new(Arc::new(MemStorage::new()));
        let sessions = Arc::new(SessionTable::new(SessionSettings::default(), queue));
        let logs = Arc::new(LogIngestor::new(dir.path(), 10));
        (DeviceDirectory::new(sessions.clone(), logs), sessions)
    }

    #[test]
    fn parses_full_message() {
        let identity = parse_handshake(FULL).unwrap();
        assert_eq!(identity.uuid.as_deref(), Some("dev-42"));
        assert_eq!(identity.mac.as_deref(), Some("AA:BB:CC:00:11:22"));
        assert_eq!(identity.firmware_version.as_deref(), Some("1.4.2"));
        assert_eq!(identity.hardware_version.as_deref(), Some("rev3"));
        assert_eq!(
            identity.sample_rates,
            SampleRates {
                vgs: 1000,
                vds: 2000,
                tc: 0
            }
        );
    }

    #[test]
    fn numeric_rates_are_accepted() {
        let identity = parse_handshake(br#"{"uuid":"x","tcSampleRate":10}"#).unwrap();
        assert_eq!(identity.sample_rates.tc, 10);
        assert_eq!(identity.sample_rates.vgs, 0);
    }

    #[test]
    fn rejects_missing_or_empty_uuid() {
        assert!(matches!(
            parse_handshake(br#"{"mac":"AA"}"#),
            Err(HandshakeError::MissingUuid)
        ));
        assert!(matches!(
            parse_handshake(br#"{"uuid":""}"#),
            Err(HandshakeError::MissingUuid)
        ));
    }

    #[test]
    fn rejects_garbage_and_empty_payloads() {
        assert!(matches!(
            parse_handshake(b"hello"),
            Err(HandshakeError::MalformedJson(_))
        ));
        assert!(matches!(parse_handshake(b" \n"), Err(HandshakeError::Empty)));
    }

    #[tokio::test]
    async fn reads_message_split_across_reads() {
        let mut stream = Builder::new()
            .read(&FULL[..20])
            .read(&FULL[20..])
            .build();
        let identity = read_handshake(&mut stream, &HandshakeSettings::default())
            .await
            .unwrap();
        assert_eq!(identity.uuid.as_deref(), Some("dev-42"));
    }

    #[tokio::test]
    async fn truncated_message_is_malformed() {
        let mut stream = Builder::new().read(&FULL[..20]).build();
        let err = read_handshake(&mut stream, &HandshakeSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::MalformedJson(_)));
    }

    #[tokio::test]
    async fn oversized_message_is_cut_at_limit() {
        let settings = HandshakeSettings {
            max_bytes: 16,
            ..Default::default()
        };
        let mut stream = Builder::new().read(&FULL[..16]).build();
        let err = read_handshake(&mut stream, &settings).await.unwrap_err();
        assert!(matches!(err, HandshakeError::MalformedJson(_)));
    }

    #[tokio::test]
    async fn silent_peer_times_out() {
        let settings = HandshakeSettings {
            timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let (_client, mut server) = tokio::io::duplex(64);
        let err = read_handshake(&mut server, &settings).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Timeout));
    }

    #[tokio::test]
    async fn handshake_updates_directory_and_sessions() {
        let dir = TempDir::new().unwrap();
        let (directory, sessions) = directory(&dir);
        let (session, _) = sessions.acquire(
            &EndpointKey::new("192.168.4.7", 5555),
            ChannelKind::SourceVoltage,
            None,
        );

        let stream = Builder::new().read(FULL).build();
        let stamped = handle_handshake(stream, peer(), &directory, &HandshakeSettings::default())
            .await
            .unwrap();

        assert_eq!(stamped, 1);
        assert_eq!(session.uuid().as_deref(), Some("dev-42"));
        let record = directory.get("192.168.4.7").unwrap();
        assert!(record.active_ports.is_empty());
        assert_eq!(record.identity.sample_rates.vds, 2000);
    }

    #[tokio::test]
    async fn ack_is_written_when_enabled() {
        let dir = TempDir::new().unwrap();
        let (directory, _) = directory(&dir);
        let settings = HandshakeSettings {
            send_ack: true,
            ..Default::default()
        };

        let stream = Builder::new().read(FULL).write(HANDSHAKE_ACK).build();
        handle_handshake(stream, peer(), &directory, &settings)
            .await
            .unwrap();
        assert_eq!(directory.uuid_for("192.168.4.7").as_deref(), Some("dev-42"));
    }

    #[tokio::test]
    async fn invalid_handshake_leaves_directory_untouched() {
        let dir = TempDir::new().unwrap();
        let (directory, _) = directory(&dir);

        let stream = Builder::new().read(br#"{"mac":"AA"}"#).build();
        let err = handle_handshake(stream, peer(), &directory, &HandshakeSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::MissingUuid));
        assert!(directory.all().is_empty());
    }
}
