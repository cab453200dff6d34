//! Orchestration of the ingestion server.
//!
//! [`Server`] owns the shared state (session table, connection registry,
//! device directory, log ingestor and capture queue), dispatches accepted
//! connections by port role, runs one read loop per data connection and
//! answers the telemetry queries used by the web interface.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::configuration::Config;
use crate::data_capture::CaptureQueue;
use crate::device_management::{DeviceDirectory, DeviceRecord};
use crate::error_handling::types::NetworkError;
use crate::network::handshake::{handle_handshake, HandshakeSettings};
use crate::network::log_ingestor::{serve_log_socket, LogIngestor};
use crate::network::types::wait_for_stop;
use crate::network::{
    ConnectionHandle, ConnectionRegistry, ConnectionRequest, NetworkListener, PortRole,
};
use crate::session_management::{EndpointKey, Session, SessionTable};

/// Largest single read from a data connection.
const READ_CHUNK: usize = 1024 * 1024;

/// How long listener tasks get to notice the stop flag before being aborted.
const LISTENER_GRACE: Duration = Duration::from_secs(1);

pub struct Server {
    sessions: Arc<SessionTable>,
    registry: ConnectionRegistry,
    directory: DeviceDirectory,
    logs: Arc<LogIngestor>,
    queue: CaptureQueue,
    handshake: HandshakeSettings,
    shutdown_timeout: Duration,
    stop_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Server {
    pub fn new(config: &Config, queue: CaptureQueue) -> Self {
        let sessions = Arc::new(SessionTable::new(config.session_settings(), queue.clone()));
        let logs = Arc::new(LogIngestor::new(&config.logs_dir, config.log_history_lines));
        let directory = DeviceDirectory::new(Arc::clone(&sessions), Arc::clone(&logs));
        let (stop_tx, _) = watch::channel(false);

        Self {
            sessions,
            registry: ConnectionRegistry::new(),
            directory,
            logs,
            queue,
            handshake: config.handshake_settings(),
            shutdown_timeout: config.shutdown_timeout(),
            stop_tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn tasks(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Receiver of the flag raised when shutdown starts.
    pub fn stop_signal(&self) -> watch::Receiver<bool> {
        self.stop_tx.subscribe()
    }

    /// Keeps `task` so that shutdown can wait for it.
    pub fn track(&self, task: JoinHandle<()>) {
        self.tasks().push(task);
    }

    /// Starts the accept loops of `listener` and the dispatcher consuming
    /// their requests.
    pub fn start_listeners(
        self: &Arc<Self>,
        listener: NetworkListener,
        requests: mpsc::Receiver<ConnectionRequest>,
    ) {
        for task in listener.start_listening(self.stop_signal()) {
            self.track(task);
        }
        let dispatcher = tokio::spawn(Arc::clone(self).run_dispatcher(requests));
        self.track(dispatcher);
    }

    /// Starts receiving device logs on `socket`.
    pub fn start_log_listener(&self, socket: UdpSocket) {
        let task = tokio::spawn(serve_log_socket(
            socket,
            Arc::clone(&self.logs),
            self.stop_signal(),
        ));
        self.track(task);
    }

    async fn run_dispatcher(self: Arc<Self>, mut requests: mpsc::Receiver<ConnectionRequest>) {
        let mut stop = self.stop_signal();
        loop {
            tokio::select! {
                _ = wait_for_stop(&mut stop) => break,
                request = requests.recv() => match request {
                    Some(request) => {
                        self.dispatch(request);
                    }
                    None => break,
                }
            }
        }
    }

    /// Hands an accepted connection to the task serving its port role.
    pub fn dispatch<S>(self: &Arc<Self>, request: ConnectionRequest<S>) -> JoinHandle<()>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ConnectionRequest {
            stream,
            client_addr,
            port,
            role,
            timestamp,
        } = request;

        match role {
            PortRole::Handshake => {
                let server = Arc::clone(self);
                tokio::spawn(async move {
                    if let Err(e) =
                        handle_handshake(stream, client_addr, &server.directory, &server.handshake)
                            .await
                    {
                        error!("Handshake from {} rejected: {}", client_addr, e);
                    }
                })
            }
            PortRole::Data(kind) => {
                let key = EndpointKey::from_peer(&client_addr, port);
                let uuid = self.directory.uuid_for(&key.ip);
                let handle = Arc::new(ConnectionHandle::new(key.clone(), client_addr, timestamp));

                let (_, (session, attachment)) =
                    self.registry.register_with(Arc::clone(&handle), || {
                        let (session, reused) = self.sessions.acquire(&key, kind, uuid);
                        if reused {
                            debug!("Reattaching session for {}", key);
                        }
                        let attachment = session.attach();
                        self.directory.touch(&key.ip, key.port);
                        (session, attachment)
                    });

                info!(
                    "New {} connection from {} on port {}",
                    kind.label(),
                    client_addr,
                    port
                );
                tokio::spawn(Arc::clone(self).serve_data(stream, handle, session, attachment))
            }
        }
    }

    async fn serve_data<S>(
        self: Arc<Self>,
        mut stream: S,
        handle: Arc<ConnectionHandle>,
        session: Arc<Session>,
        attachment: u64,
    ) where
        S: AsyncRead + Unpin + Send + 'static,
    {
        let key = handle.key().clone();
        let mut closed = handle.subscribe();
        let mut chunk = vec![0u8; READ_CHUNK];

        let outcome = loop {
            tokio::select! {
                biased;
                _ = wait_for_stop(&mut closed) => break Err(NetworkError::Evicted),
                read = stream.read(&mut chunk) => match read {
                    Ok(0) => break Ok(()),
                    Ok(n) => {
                        if !session.add_attached(attachment, &chunk[..n]) {
                            break Err(NetworkError::Evicted);
                        }
                        self.directory.add_bytes(&key.ip, n as u64);
                    }
                    Err(e) => break Err(NetworkError::ReadError(e)),
                }
            }
        };

        match outcome {
            Ok(()) => info!("Connection closed by {} on {}", handle.client_addr(), key),
            Err(NetworkError::Evicted) => {
                info!("Stopped reading {} from {}", key, handle.client_addr())
            }
            Err(e) => error!("Error reading from {} on {}: {}", handle.client_addr(), key, e),
        }

        session.flush();
        let detached = self.registry.unregister_with(&handle, || {
            self.sessions.remove_if(&key, &session);
            self.directory.release(&key.ip, key.port);
        });
        if detached {
            info!("Removed session for {}", key);
        }
    }

    pub fn session(&self, ip: &str, port: u16) -> Option<Arc<Session>> {
        self.sessions.get(&EndpointKey::new(ip, port))
    }

    pub fn rate(&self, ip: &str, port: u16) -> (f64, bool) {
        match self.sessions.get(&EndpointKey::new(ip, port)) {
            Some(session) => (session.rate(), true),
            None => (0.0, false),
        }
    }

    /// Rates in MiB/s keyed by `"ip:port"`.
    pub fn all_rates(&self) -> HashMap<String, f64> {
        self.sessions.rates()
    }

    pub fn devices(&self) -> HashMap<String, DeviceRecord> {
        self.directory.all()
    }

    pub fn device(&self, ip: &str) -> Option<DeviceRecord> {
        self.directory.get(ip)
    }

    pub fn last_logs(&self, ip: &str) -> Vec<String> {
        self.logs.last_lines(ip)
    }

    /// Primary running average and whether its window has filled once.
    pub fn average(&self, ip: &str, port: u16) -> (f64, bool) {
        self.sessions
            .get(&EndpointKey::new(ip, port))
            .map(|session| session.average())
            .unwrap_or((0.0, false))
    }

    /// Secondary (external thermocouple) running average.
    pub fn average_b(&self, ip: &str, port: u16) -> (f64, bool) {
        self.sessions
            .get(&EndpointKey::new(ip, port))
            .and_then(|session| session.average_b())
            .unwrap_or((0.0, false))
    }

    /// Stops intake, closes every connection and flushes every session.
    ///
    /// Listeners and the UDP log socket are stopped first, then all
    /// registered connections are closed, and only then are buffers
    /// flushed. Returns `false` when the flush did not complete within the
    /// shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        info!("Shutting down server...");
        self.stop_tx.send_replace(true);

        let tasks = std::mem::take(&mut *self.tasks());
        for mut task in tasks {
            if tokio::time::timeout(LISTENER_GRACE, &mut task).await.is_err() {
                task.abort();
            }
        }
        self.logs.close_all();

        let mut sessions = self.sessions.all();
        let closed = self.registry.close_all();
        info!("Closed {} active connection(s)", closed);

        let flush = async {
            self.registry.wait_until_empty().await;
            sessions.extend(self.sessions.all());
            let flushed = sessions.iter().filter_map(|s| s.flush()).count();
            info!("Flushing {} session buffer(s)", flushed);
            self.queue.drain().await
        };

        match tokio::time::timeout(self.shutdown_timeout, flush).await {
            Ok(_) => {
                info!("All buffers flushed");
                true
            }
            Err(_) => {
                warn!("Timed out waiting for buffers to flush - some data may be lost");
                false
            }
        }
    }
}
