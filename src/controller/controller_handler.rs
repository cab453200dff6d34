use std::fs;
use std::net::SocketAddr;
use std::sync::Arc;

use log::{error, info, warn};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::server::Server;
use crate::configuration::Config;
use crate::data_capture::{CaptureWriter, FileCaptureStorage};
use crate::error_handling::types::*;
use crate::network::NetworkListener;
use crate::web_interface::WebServer;

/// Capacity of the accepted-connection channel between the accept loops
/// and the dispatcher.
const REQUEST_QUEUE: usize = 100;

pub struct Controller {
    pub config: Config,
}

impl Controller {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn create_directories(&self) -> Result<FileCaptureStorage, StorageError> {
        let storage = FileCaptureStorage::new(&self.config.data_dir)?;
        fs::create_dir_all(&self.config.logs_dir).map_err(|e| {
            StorageError::DirectoryCreationFailed(self.config.logs_dir.display().to_string(), e)
        })?;
        Ok(storage)
    }

    /// Runs the server until Ctrl-C, then shuts it down.
    pub async fn run(&self) -> Result<(), ControllerError> {
        info!("[+] Starting ingestion server");

        let storage = match self.create_directories() {
            Ok(storage) => storage,
            Err(e) => {
                error!("[!] {}", e);
                return Err(ControllerError::from(e));
            }
        };
        let (queue, _writer) = CaptureWriter::spawn(Arc::new(storage));
        let server = Arc::new(Server::new(&self.config, queue));

        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE);
        let mut listener = NetworkListener::new(self.config.bind_address, request_tx);
        let roles = self.config.port_roles();
        let bound = listener.bind_services(&roles);
        if bound < roles.len() {
            warn!("[!] Only {} of {} TCP listeners could be bound", bound, roles.len());
        }
        server.start_listeners(listener, request_rx);

        let log_addr = SocketAddr::new(self.config.bind_address, self.config.log_port);
        match UdpSocket::bind(log_addr).await {
            Ok(socket) => server.start_log_listener(socket),
            Err(e) => error!("[!] {}", NetworkError::BindError(self.config.log_port, e)),
        }

        if self.config.web_ui_enabled {
            let addr = SocketAddr::new(self.config.bind_address, self.config.web_ui_port);
            let web = WebServer::new(Arc::clone(&server));
            server.track(tokio::spawn(web.start(addr, server.stop_signal())));
        }

        info!("[+] Server running, press Ctrl-C to stop");
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("[!] Unable to listen for shutdown signal: {}", e);
        }

        server.shutdown().await;
        info!("[+] Shutdown complete");
        Ok(())
    }
}
