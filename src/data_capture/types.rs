//! Common data types used across the data_capture subsystem.

use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

/// One flushed accumulation buffer waiting to be persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureJob {
    /// Deterministic file name, see [`capture_file_name`].
    pub file_name: String,
    /// Byte-for-byte copy of the session buffer at flush time.
    pub data: Vec<u8>,
}

static LAST_STAMP: AtomicI64 = AtomicI64::new(0);

/// Unix time in nanoseconds, strictly increasing within the process.
pub fn next_capture_stamp() -> i64 {
    let now = Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX);
    let mut last = LAST_STAMP.load(Ordering::Relaxed);
    loop {
        let candidate = if now > last { now } else { last + 1 };
        match LAST_STAMP.compare_exchange_weak(last, candidate, Ordering::Relaxed, Ordering::Relaxed) {
            Ok(_) => return candidate,
            Err(current) => last = current,
        }
    }
}

/// Maps everything outside `[A-Za-z0-9_-]` to `_` so that device-supplied
/// text can never turn a file name into a path.
pub fn file_name_part(text: &str) -> String {
    text.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// `port{PORT}_{ip}[_{uuid}]_{stamp}.bin`
pub fn capture_file_name(port: u16, sanitized_ip: &str, uuid: Option<&str>, stamp: i64) -> String {
    let ip = file_name_part(sanitized_ip);
    match uuid {
        Some(uuid) if !uuid.is_empty() => {
            format!("port{}_{}_{}_{}.bin", port, ip, file_name_part(uuid), stamp)
        }
        _ => format!("port{}_{}_{}.bin", port, ip, stamp),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_with_and_without_uuid() {
        assert_eq!(
            capture_file_name(5555, "10_0_0_7", Some("abc-123"), 42),
            "port5555_10_0_0_7_abc-123_42.bin"
        );
        assert_eq!(capture_file_name(5556, "10_0_0_7", None, 42), "port5556_10_0_0_7_42.bin");
        assert_eq!(capture_file_name(5556, "10_0_0_7", Some(""), 7), "port5556_10_0_0_7_7.bin");
    }

    #[test]
    fn device_supplied_text_cannot_escape_the_directory() {
        assert_eq!(file_name_part("rev2/unit7"), "rev2_unit7");
        assert_eq!(file_name_part("../../etc"), "______etc");
        assert_eq!(file_name_part("fe80__1%eth0"), "fe80__1_eth0");
        assert_eq!(
            capture_file_name(5555, "10_9_9_9", Some("rev2/unit7"), 3),
            "port5555_10_9_9_9_rev2_unit7_3.bin"
        );
    }

    #[test]
    fn stamps_strictly_increase() {
        let mut prev = next_capture_stamp();
        for _ in 0..1000 {
            let next = next_capture_stamp();
            assert!(next > prev);
            prev = next;
        }
    }
}
