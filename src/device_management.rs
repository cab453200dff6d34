//! Per-device aggregate state, keyed by sanitized device IP.

pub mod device_directory;
pub mod types;

pub use device_directory::DeviceDirectory;
pub use types::{DeviceIdentity, DeviceRecord, SampleRates};
