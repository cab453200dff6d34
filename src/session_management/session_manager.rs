use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

use log::info;

use super::session::{Session, SessionSettings};
use super::types::{sanitize_ip, EndpointKey};
use crate::data_capture::CaptureQueue;
use crate::sampling::ChannelKind;

/// All live sessions, keyed by endpoint.
///
/// The table lock is never held while a session's own lock is taken:
/// callers get `Arc<Session>` clones and query them after the table guard
/// is released.
pub struct SessionTable {
    sessions: RwLock<HashMap<EndpointKey, Arc<Session>>>,
    settings: SessionSettings,
    queue: CaptureQueue,
}

impl SessionTable {
    pub fn new(settings: SessionSettings, queue: CaptureQueue) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            settings,
            queue,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<EndpointKey, Arc<Session>>> {
        self.sessions.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<EndpointKey, Arc<Session>>> {
        self.sessions.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns the session for `key`, reusing the existing one when it is
    /// bound to the same device UUID and creating (and storing) a fresh one
    /// otherwise. The flag tells whether the session was reused.
    pub fn acquire(
        &self,
        key: &EndpointKey,
        kind: ChannelKind,
        uuid: Option<String>,
    ) -> (Arc<Session>, bool) {
        let uuid = uuid.filter(|u| !u.is_empty());
        let existing = self.read().get(key).cloned();

        if let Some(session) = existing {
            if session.kind() == kind && session.uuid() == uuid {
                info!(
                    "Reusing existing session for {} (UUID: {})",
                    key,
                    uuid.as_deref().unwrap_or("-")
                );
                return (session, true);
            }
        }

        let session = Arc::new(Session::new(
            key.clone(),
            kind,
            &self.settings,
            uuid,
            self.queue.clone(),
        ));
        self.write().insert(key.clone(), Arc::clone(&session));
        (session, false)
    }

    pub fn get(&self, key: &EndpointKey) -> Option<Arc<Session>> {
        self.read().get(key).cloned()
    }

    /// Removes `key` only if it still maps to `session`.
    pub fn remove_if(&self, key: &EndpointKey, session: &Arc<Session>) -> bool {
        let mut sessions = self.write();
        match sessions.get(key) {
            Some(current) if Arc::ptr_eq(current, session) => {
                sessions.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Stamps `uuid` onto every session belonging to `ip`. Returns how many
    /// sessions were updated.
    pub fn stamp_uuid(&self, ip: &str, uuid: &str) -> usize {
        let ip = sanitize_ip(ip);
        let matching: Vec<Arc<Session>> = self
            .read()
            .iter()
            .filter(|(key, _)| key.ip == ip)
            .map(|(_, session)| Arc::clone(session))
            .collect();

        for session in &matching {
            session.set_uuid(uuid);
        }
        matching.len()
    }

    pub fn all(&self) -> Vec<Arc<Session>> {
        self.read().values().cloned().collect()
    }

    /// Current rates keyed by `"ip:port"`.
    pub fn rates(&self) -> HashMap<String, f64> {
        self.all()
            .into_iter()
            .map(|session| (session.key().to_string(), session.rate()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}
