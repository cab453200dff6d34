pub mod configuration;
pub mod controller;
pub mod data_capture;
pub mod device_management;
pub mod error_handling;
pub mod network;
pub mod sampling;
pub mod session_management;
pub mod web_interface;
