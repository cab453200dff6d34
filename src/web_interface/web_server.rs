use std::net::SocketAddr;
use std::sync::Arc;

use log::info;
use tokio::sync::watch;

use super::routes::api_routes;
use crate::controller::Server;
use crate::network::types::wait_for_stop;

/// Read-only JSON API over the live telemetry of a [`Server`].
pub struct WebServer {
    server: Arc<Server>,
}

impl WebServer {
    pub fn new(server: Arc<Server>) -> Self {
        Self { server }
    }

    /// Serves the API on `addr` until `stop` is raised.
    pub async fn start(self, addr: SocketAddr, mut stop: watch::Receiver<bool>) {
        let routes = api_routes(self.server);
        info!("Web API listening on http://{}", addr);

        tokio::select! {
            _ = warp::serve(routes).run(addr) => {}
            _ = wait_for_stop(&mut stop) => {}
        }
        info!("Web API stopped");
    }
}
