//! Device log lines delivered over UDP.
//!
//! Every datagram is one NUL-padded text line. Lines are timestamped, kept in
//! a bounded per-device history for the UI, and appended to a per-device log
//! file that is opened on the first line and closed when the device's last
//! data port goes away.

use std::collections::{HashMap, VecDeque};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{Local, SecondsFormat};
use log::{debug, error, info};
use tokio::net::UdpSocket;
use tokio::sync::watch;

use super::types::wait_for_stop;
use crate::data_capture::types::{file_name_part, next_capture_stamp};
use crate::session_management::sanitize_ip;

/// Largest datagram accepted from a device.
pub const MAX_DATAGRAM: usize = 16 * 1024;

fn timestamp() -> String {
    Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// An open per-device log file. `ended` is set once the end marker is
/// written so that a writer racing the close cannot append after it.
struct LogFile {
    file: File,
    ended: bool,
}

type SharedLogFile = Arc<Mutex<LogFile>>;

fn lock_file(file: &SharedLogFile) -> MutexGuard<'_, LogFile> {
    file.lock().unwrap_or_else(PoisonError::into_inner)
}

struct LogRecord {
    lines: VecDeque<String>,
    file: Option<SharedLogFile>,
}

/// History and files are guarded separately: `records` is only held for
/// in-memory updates, file I/O runs under the per-file mutex. `opening`
/// serializes file creation so one device never gets two files at once.
pub struct LogIngestor {
    dir: PathBuf,
    max_lines: usize,
    records: Mutex<HashMap<String, LogRecord>>,
    opening: Mutex<()>,
}

impl LogIngestor {
    pub fn new<P: AsRef<Path>>(dir: P, max_lines: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_lines: max_lines.max(1),
            records: Mutex::new(HashMap::new()),
            opening: Mutex::new(()),
        }
    }

    fn records(&self) -> MutexGuard<'_, HashMap<String, LogRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_log_file(&self, ip: &str, display_ip: &str) -> Option<SharedLogFile> {
        let path = self.dir.join(format!(
            "logs_{}_{}.txt",
            file_name_part(ip),
            next_capture_stamp()
        ));
        let opened = OpenOptions::new().create(true).append(true).open(&path);
        match opened {
            Ok(mut file) => {
                let marker = format!("=== Log started at {} for {} ===\n", timestamp(), display_ip);
                if let Err(e) = file.write_all(marker.as_bytes()) {
                    error!("Failed to write log header to {}: {}", path.display(), e);
                }
                info!("Opened log file {} for {}", path.display(), display_ip);
                Some(Arc::new(Mutex::new(LogFile { file, ended: false })))
            }
            Err(e) => {
                error!("Failed to create log file for {}: {}", display_ip, e);
                None
            }
        }
    }

    /// Returns the open file for `ip`, creating it on first use.
    fn file_for(&self, ip: &str, display_ip: &str) -> Option<SharedLogFile> {
        let _opening = self.opening.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(file) = self.records().get(ip).and_then(|record| record.file.clone()) {
            return Some(file);
        }
        let file = self.open_log_file(ip, display_ip)?;
        if let Some(record) = self.records().get_mut(ip) {
            record.file = Some(file.clone());
        }
        Some(file)
    }

    /// Records one datagram from `sender`.
    pub fn receive(&self, sender: SocketAddr, payload: &[u8]) {
        let display_ip = sender.ip().to_string();
        let ip = sanitize_ip(&display_ip);

        let text = String::from_utf8_lossy(payload);
        let line = format!("[{}] {}", timestamp(), text.trim_end_matches('\0'));

        let file = {
            let mut records = self.records();
            let record = records.entry(ip.clone()).or_insert_with(|| LogRecord {
                lines: VecDeque::with_capacity(self.max_lines),
                file: None,
            });
            if record.lines.len() >= self.max_lines {
                record.lines.pop_front();
            }
            record.lines.push_back(line.clone());
            record.file.clone()
        };

        if let Some(file) = file.or_else(|| self.file_for(&ip, &display_ip)) {
            let mut log = lock_file(&file);
            if log.ended {
                return;
            }
            let written = log
                .file
                .write_all(line.as_bytes())
                .and_then(|_| log.file.write_all(b"\n"));
            if let Err(e) = written {
                error!("Failed to append log line for {}: {}", display_ip, e);
            }
        }
    }

    /// History for `ip`, newest first, or a single "no logs" entry.
    pub fn last_lines(&self, ip: &str) -> Vec<String> {
        match self.records().get(&sanitize_ip(ip)) {
            Some(record) => record.lines.iter().rev().cloned().collect(),
            None => vec![format!("No logs available for {}", ip)],
        }
    }

    pub fn has_open_file(&self, ip: &str) -> bool {
        self.records()
            .get(&sanitize_ip(ip))
            .is_some_and(|record| record.file.is_some())
    }

    /// Writes the end marker and closes the log file for `ip`, keeping the
    /// in-memory history. Returns whether a file was open.
    pub fn close_log(&self, ip: &str) -> bool {
        let ip = sanitize_ip(ip);
        let file = self.records().get_mut(&ip).and_then(|record| record.file.take());
        match file {
            Some(file) => {
                Self::finish(&file, &ip);
                true
            }
            None => false,
        }
    }

    pub fn close_all(&self) {
        let files: Vec<(String, SharedLogFile)> = self
            .records()
            .iter_mut()
            .filter_map(|(ip, record)| record.file.take().map(|f| (ip.clone(), f)))
            .collect();
        for (ip, file) in files {
            Self::finish(&file, &ip);
        }
    }

    fn finish(file: &SharedLogFile, ip: &str) {
        let mut log = lock_file(file);
        let marker = format!("=== Log ended at {} for {} ===\n", timestamp(), ip);
        let written = log
            .file
            .write_all(marker.as_bytes())
            .and_then(|_| log.file.sync_data());
        if let Err(e) = written {
            error!("Failed to finish log file for {}: {}", ip, e);
        }
        log.ended = true;
        debug!("Closed log file for {}", ip);
    }
}

/// Receives log datagrams until `shutdown` flips to true or the socket
/// fails. The socket is dropped (closed) on return.
pub async fn serve_log_socket(
    socket: UdpSocket,
    ingestor: Arc<LogIngestor>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut packet = vec![0u8; MAX_DATAGRAM];
    if let Ok(addr) = socket.local_addr() {
        info!("Started UDP log listener on {}", addr);
    }

    loop {
        tokio::select! {
            _ = wait_for_stop(&mut shutdown) => break,
            received = socket.recv_from(&mut packet) => match received {
                Ok((n, sender)) => ingestor.receive(sender, &packet[..n]),
                Err(e) => {
                    error!("Error reading UDP logs: {}", e);
                    break;
                }
            }
        }
    }

    info!("UDP log listener closed");
}
