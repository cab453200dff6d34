//! Wiring of the running process: the [`Server`](server::Server) that owns
//! all ingestion state and the [`Controller`](controller_handler::Controller)
//! that boots it from a [`Config`](crate::configuration::Config).

pub mod controller_handler;
pub mod server;

pub use controller_handler::Controller;
pub use server::Server;
