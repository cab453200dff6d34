pub mod capture_writer;
pub mod storage;
pub mod types;

pub use capture_writer::{CaptureQueue, CaptureWriter};
pub use storage::{CaptureStorage, FileCaptureStorage};
pub use types::CaptureJob;
