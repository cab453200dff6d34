//! Ordered, non-blocking persistence of flushed session buffers.
//!
//! Sessions hand their flushed bytes to a [`CaptureQueue`]; enqueueing never
//! blocks, so ingestion is not held up by disk I/O. A single
//! [`CaptureWriter`] task drains the queue in FIFO order and writes each job
//! through the injected [`CaptureStorage`] on the blocking pool. Failures
//! are logged and the job is dropped; nothing is retried.
//!
//! [`CaptureQueue::drain`] lets shutdown wait until every job queued so far
//! has been written, instead of guessing how long outstanding writes take.
//!
//! ```no_run
//! use std::sync::Arc;
//! use ethdaq::data_capture::{CaptureJob, CaptureWriter, FileCaptureStorage};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let storage = Arc::new(FileCaptureStorage::new("data")?);
//! let (queue, _writer) = CaptureWriter::spawn(storage);
//! queue.enqueue(CaptureJob { file_name: "port5555_10_0_0_2_1.bin".into(), data: vec![0, 1] });
//! queue.drain().await;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::storage::CaptureStorage;
use super::types::CaptureJob;

#[derive(Debug)]
enum WriterCommand {
    Write(CaptureJob),
    Drain(oneshot::Sender<()>),
}

/// Cloneable producer side of the capture writer.
#[derive(Debug, Clone)]
pub struct CaptureQueue {
    tx: mpsc::UnboundedSender<WriterCommand>,
}

impl CaptureQueue {
    /// Queues a job for writing. Returns `false` (and logs) if the writer
    /// task is gone, in which case the data is lost.
    pub fn enqueue(&self, job: CaptureJob) -> bool {
        let len = job.data.len();
        let name = job.file_name.clone();
        match self.tx.send(WriterCommand::Write(job)) {
            Ok(()) => true,
            Err(_) => {
                error!("Capture writer stopped, dropping {} byte(s) for {}", len, name);
                false
            }
        }
    }

    /// Resolves once every job queued before this call has been handled.
    /// Returns `false` if the writer task is no longer running.
    pub async fn drain(&self) -> bool {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(WriterCommand::Drain(ack_tx)).is_err() {
            return false;
        }
        ack_rx.await.is_ok()
    }
}

/// Consumer side: writes queued jobs one after another.
pub struct CaptureWriter {
    storage: Arc<dyn CaptureStorage>,
    rx: mpsc::UnboundedReceiver<WriterCommand>,
}

impl CaptureWriter {
    pub fn new(storage: Arc<dyn CaptureStorage>) -> (Self, CaptureQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { storage, rx }, CaptureQueue { tx })
    }

    /// Creates a writer and runs it on the current tokio runtime.
    pub fn spawn(storage: Arc<dyn CaptureStorage>) -> (CaptureQueue, JoinHandle<()>) {
        let (writer, queue) = Self::new(storage);
        (queue, tokio::spawn(writer.run()))
    }

    /// Runs until every [`CaptureQueue`] clone has been dropped.
    pub async fn run(mut self) {
        debug!("Capture writer started");
        while let Some(command) = self.rx.recv().await {
            match command {
                WriterCommand::Write(job) => self.write(job).await,
                WriterCommand::Drain(ack) => {
                    let _ = ack.send(());
                }
            }
        }
        debug!("Capture writer stopped");
    }

    async fn write(&self, job: CaptureJob) {
        let storage = Arc::clone(&self.storage);
        let name = job.file_name.clone();
        let len = job.data.len();

        match tokio::task::spawn_blocking(move || storage.save_capture(&job)).await {
            Ok(Ok(())) => info!("Written {} bytes to {}", len, name),
            Ok(Err(e)) => error!("Failed to write capture file: {}", e),
            Err(e) => error!("Capture write task for {} failed: {}", name, e),
        }
    }
}
