//! At most one active transport connection per endpoint.
//!
//! A device that silently reconnects (after a power cycle, say) opens a new
//! TCP connection while the old one may still look alive. Registering the new
//! connection closes the old handle first, so two readers never feed the same
//! [`Session`](crate::session_management::Session).

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use log::{debug, info};
use tokio::sync::{watch, Notify};
use uuid::Uuid;

use crate::session_management::EndpointKey;

/// Close handle of one accepted data connection.
///
/// Closing is signalled through a watch channel that the connection's read
/// loop selects on; it is the only way to cancel a read loop from outside.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: Uuid,
    key: EndpointKey,
    client_addr: SocketAddr,
    opened_at: DateTime<Utc>,
    closed: watch::Sender<bool>,
}

impl ConnectionHandle {
    /// `opened_at` is when the connection was accepted.
    pub fn new(key: EndpointKey, client_addr: SocketAddr, opened_at: DateTime<Utc>) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            key,
            client_addr,
            opened_at,
            closed,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    pub fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    pub fn opened_at(&self) -> DateTime<Utc> {
        self.opened_at
    }

    /// Time since the connection was accepted.
    pub fn age(&self) -> chrono::Duration {
        Utc::now().signed_duration_since(self.opened_at)
    }

    /// Signals the read loop to stop. Returns `true` only for the call that
    /// actually closed the handle.
    pub fn close(&self) -> bool {
        !self.closed.send_replace(true)
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.closed.subscribe()
    }
}

#[derive(Default)]
pub struct ConnectionRegistry {
    active: Mutex<HashMap<EndpointKey, Arc<ConnectionHandle>>>,
    emptied: Notify,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EndpointKey, Arc<ConnectionHandle>>> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Makes `handle` the active connection for its key. A previous handle
    /// for the same key is closed before the new one is stored and returned.
    pub fn register(&self, handle: Arc<ConnectionHandle>) -> Option<Arc<ConnectionHandle>> {
        self.register_with(handle, || ()).0
    }

    /// Like [`register`](Self::register), running `attach` while the
    /// registry lock is held so that attaching and detaching an endpoint
    /// never interleave. The registry lock is always the outermost one.
    pub fn register_with<T>(
        &self,
        handle: Arc<ConnectionHandle>,
        attach: impl FnOnce() -> T,
    ) -> (Option<Arc<ConnectionHandle>>, T) {
        let mut active = self.lock();
        let previous = active.remove(handle.key());
        if let Some(old) = &previous {
            if old.close() {
                info!(
                    "Closing stale connection from {} on {} after {} ms",
                    old.client_addr(),
                    old.key(),
                    old.age().num_milliseconds()
                );
            }
        }
        debug!("Registered connection {} for {}", handle.id(), handle.key());
        active.insert(handle.key().clone(), handle);
        let attached = attach();
        (previous, attached)
    }

    /// Removes the mapping only if `handle` is still the registered one.
    pub fn unregister(&self, handle: &ConnectionHandle) -> bool {
        self.unregister_with(handle, || ())
    }

    /// Like [`unregister`](Self::unregister); `detach` only runs, under the
    /// registry lock, when `handle` was still the registered one.
    pub fn unregister_with(&self, handle: &ConnectionHandle, detach: impl FnOnce()) -> bool {
        let mut active = self.lock();
        let current = matches!(active.get(handle.key()), Some(h) if h.id() == handle.id());
        if current {
            active.remove(handle.key());
            detach();
            if active.is_empty() {
                self.emptied.notify_waiters();
            }
        }
        current
    }

    /// Closes every registered handle without removing it; each read loop
    /// unregisters itself on the way out.
    pub fn close_all(&self) -> usize {
        let handles: Vec<Arc<ConnectionHandle>> = self.lock().values().cloned().collect();
        handles.iter().filter(|h| h.close()).count()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Resolves once no connection is registered.
    pub async fn wait_until_empty(&self) {
        loop {
            let notified = self.emptied.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.is_empty() {
                return;
            }
            notified.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn handle(port: u16) -> Arc<ConnectionHandle> {
        let addr: SocketAddr = "192.168.1.20:40000".parse().unwrap();
        Arc::new(ConnectionHandle::new(
            EndpointKey::new("192.168.1.20", port),
            addr,
            Utc::now(),
        ))
    }

    #[test]
    fn handle_keeps_accept_time() {
        let addr: SocketAddr = "192.168.1.20:40000".parse().unwrap();
        let accepted = Utc::now() - chrono::Duration::seconds(30);
        let h = ConnectionHandle::new(EndpointKey::new("192.168.1.20", 5555), addr, accepted);
        assert_eq!(h.opened_at(), accepted);
        assert!(h.age() >= chrono::Duration::seconds(30));
        assert_eq!(h.client_addr(), addr);
    }

    #[test]
    fn second_registration_closes_first_exactly_once() {
        let registry = ConnectionRegistry::new();
        let first = handle(5555);
        let second = handle(5555);
        let mut first_rx = first.subscribe();

        assert!(registry.register(Arc::clone(&first)).is_none());
        let evicted = registry.register(Arc::clone(&second)).unwrap();

        assert_eq!(evicted.id(), first.id());
        assert!(first.is_closed());
        assert!(!second.is_closed());
        assert!(first_rx.has_changed().unwrap());
        assert!(*first_rx.borrow_and_update());
        // already closed by the registry
        assert!(!first.close());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stale_handle_cannot_unregister_newer_one() {
        let registry = ConnectionRegistry::new();
        let first = handle(5556);
        let second = handle(5556);
        registry.register(Arc::clone(&first));
        registry.register(Arc::clone(&second));

        assert!(!registry.unregister(&first));
        assert_eq!(registry.len(), 1);
        assert!(registry.unregister(&second));
        assert!(registry.is_empty());
    }

    #[test]
    fn detach_runs_only_for_current_handle() {
        let registry = ConnectionRegistry::new();
        let first = handle(5555);
        let second = handle(5555);
        let (_, attached) = registry.register_with(Arc::clone(&first), || 7);
        assert_eq!(attached, 7);
        registry.register(Arc::clone(&second));

        let mut detached = 0;
        assert!(!registry.unregister_with(&first, || detached += 1));
        assert!(registry.unregister_with(&second, || detached += 1));
        assert_eq!(detached, 1);
    }

    #[test]
    fn different_ports_coexist() {
        let registry = ConnectionRegistry::new();
        registry.register(handle(5555));
        registry.register(handle(5556));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.close_all(), 2);
        assert_eq!(registry.close_all(), 0);
    }

    #[tokio::test]
    async fn wait_until_empty_resolves_after_last_unregister() {
        let registry = Arc::new(ConnectionRegistry::new());
        let h = handle(5557);
        registry.register(Arc::clone(&h));

        let waiter = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.wait_until_empty().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        registry.unregister(&h);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn wait_until_empty_on_empty_registry_returns_immediately() {
        let registry = ConnectionRegistry::new();
        tokio::time::timeout(Duration::from_millis(100), registry.wait_until_empty())
            .await
            .unwrap();
    }
}
