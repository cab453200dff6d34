use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::types::CaptureJob;
use crate::error_handling::types::StorageError;

/// Persistence backend for flushed capture buffers.
pub trait CaptureStorage: Send + Sync {
    fn save_capture(&self, job: &CaptureJob) -> Result<(), StorageError>;
}

/// Writes each capture job as its own file in a data directory.
pub struct FileCaptureStorage {
    base_path: PathBuf,
}

impl FileCaptureStorage {
    pub fn new<P: AsRef<Path>>(base_path: P) -> Result<Self, StorageError> {
        let base_path = base_path.as_ref().to_path_buf();
        fs::create_dir_all(&base_path).map_err(|e| {
            StorageError::DirectoryCreationFailed(base_path.display().to_string(), e)
        })?;
        info!("Capture storage initialized at {}", base_path.display());
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl CaptureStorage for FileCaptureStorage {
    fn save_capture(&self, job: &CaptureJob) -> Result<(), StorageError> {
        let path = self.base_path.join(&job.file_name);
        fs::write(&path, &job.data)
            .map_err(|e| StorageError::WriteFailed(path.display().to_string(), e))?;
        debug!("Wrote {} byte(s) to {}", job.data.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_directory_and_writes_job() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("data").join("captures");
        let storage = FileCaptureStorage::new(&nested).unwrap();

        let job = CaptureJob {
            file_name: "port5555_127_0_0_1_1.bin".into(),
            data: vec![1, 2, 3, 4],
        };
        storage.save_capture(&job).unwrap();

        let written = fs::read(nested.join(&job.file_name)).unwrap();
        assert_eq!(written, job.data);
    }

    #[test]
    fn write_into_missing_directory_fails() {
        let dir = TempDir::new().unwrap();
        let storage = FileCaptureStorage::new(dir.path()).unwrap();
        let job = CaptureJob {
            file_name: "missing/sub/file.bin".into(),
            data: vec![0],
        };
        assert!(matches!(
            storage.save_capture(&job),
            Err(StorageError::WriteFailed(_, _))
        ));
    }
}
