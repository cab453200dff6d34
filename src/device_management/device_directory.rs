use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use log::{debug, info};

use super::types::{DeviceIdentity, DeviceRecord};
use crate::network::log_ingestor::LogIngestor;
use crate::session_management::{sanitize_ip, SessionTable};

/// Maps sanitized device IPs to their [`DeviceRecord`].
///
/// Records are created lazily by port activity or a handshake and dropped
/// (identity included) when their last active port is released. The
/// directory lock is released before sessions or the log ingestor are
/// touched, so no two of those locks are ever held together.
pub struct DeviceDirectory {
    devices: RwLock<HashMap<String, DeviceRecord>>,
    sessions: Arc<SessionTable>,
    logs: Arc<LogIngestor>,
}

impl DeviceDirectory {
    pub fn new(sessions: Arc<SessionTable>, logs: Arc<LogIngestor>) -> Self {
        Self {
            devices: RwLock::new(HashMap::new()),
            sessions,
            logs,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, DeviceRecord>> {
        self.devices.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, DeviceRecord>> {
        self.devices.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Marks `port` active for `ip`, creating the record if needed.
    pub fn touch(&self, ip: &str, port: u16) {
        let ip = sanitize_ip(ip);
        let mut devices = self.write();
        devices.entry(ip.clone()).or_default().active_ports.insert(port);
        debug!("Device {} active ports: {:?}", ip, devices[&ip].active_ports);
    }

    /// Releases `port`. When no port is left the record is removed and the
    /// device's log file is closed. Returns whether the record was removed.
    pub fn release(&self, ip: &str, port: u16) -> bool {
        let ip = sanitize_ip(ip);
        let removed = {
            let mut devices = self.write();
            match devices.get_mut(&ip) {
                Some(record) => {
                    record.active_ports.remove(&port);
                    if record.active_ports.is_empty() {
                        devices.remove(&ip);
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if removed {
            info!("Device {} has no active ports left, dropping its record", ip);
            self.logs.close_log(&ip);
        }
        removed
    }

    pub fn add_bytes(&self, ip: &str, bytes: u64) {
        let ip = sanitize_ip(ip);
        if let Some(record) = self.write().get_mut(&ip) {
            record.total_bytes += bytes;
        }
    }

    /// Stores handshake identity for `ip` and stamps its UUID onto every
    /// session already open for that IP. Returns the number of sessions
    /// stamped.
    pub fn apply_handshake(&self, ip: &str, identity: DeviceIdentity) -> usize {
        let ip = sanitize_ip(ip);
        let uuid = identity.uuid.clone();
        self.write().entry(ip.clone()).or_default().identity = identity;

        match uuid {
            Some(uuid) => {
                let stamped = self.sessions.stamp_uuid(&ip, &uuid);
                debug!("Stamped UUID {} on {} session(s) of {}", uuid, stamped, ip);
                stamped
            }
            None => 0,
        }
    }

    pub fn uuid_for(&self, ip: &str) -> Option<String> {
        self.read()
            .get(&sanitize_ip(ip))
            .and_then(|record| record.identity.uuid.clone())
    }

    pub fn get(&self, ip: &str) -> Option<DeviceRecord> {
        self.read().get(&sanitize_ip(ip)).cloned()
    }

    pub fn all(&self) -> HashMap<String, DeviceRecord> {
        self.read().clone()
    }
}
