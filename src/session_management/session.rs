use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use log::debug;

use super::types::EndpointKey;
use crate::data_capture::types::{capture_file_name, next_capture_stamp};
use crate::data_capture::{CaptureJob, CaptureQueue};
use crate::sampling::{ChannelKind, RunningAverage, SampleDecoder, SubChannel};

const MIB: f64 = 1024.0 * 1024.0;

/// Sizing knobs applied to every new session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    /// Accumulation buffer length that triggers an implicit flush.
    pub flush_threshold: usize,
    /// Running-average window for the voltage channels.
    pub average_window: usize,
    /// Running-average window for both thermocouple sub-channels.
    pub thermocouple_average_window: usize,
}

impl SessionSettings {
    pub fn window_for(&self, kind: ChannelKind) -> usize {
        match kind {
            ChannelKind::Thermocouple => self.thermocouple_average_window,
            _ => self.average_window,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            flush_threshold: 10 * 1024 * 1024,
            average_window: 1000,
            thermocouple_average_window: 5,
        }
    }
}

#[derive(Debug)]
struct SessionState {
    buffer: Vec<u8>,
    total_bytes: u64,
    bytes_since_check: u64,
    last_check: Instant,
    rate: f64,
    decoder: SampleDecoder,
    primary: RunningAverage,
    secondary: Option<RunningAverage>,
    uuid: Option<String>,
    /// Bumped each time a stream is attached; data from an older stream is
    /// refused.
    attachment: u64,
}

/// Live processing and buffering state for one endpoint.
///
/// Every mutation and query goes through one lock, so reads of rate and
/// averages are safe while a read loop is feeding data.
#[derive(Debug)]
pub struct Session {
    key: EndpointKey,
    kind: ChannelKind,
    flush_threshold: usize,
    queue: CaptureQueue,
    state: Mutex<SessionState>,
}

impl Session {
    pub fn new(
        key: EndpointKey,
        kind: ChannelKind,
        settings: &SessionSettings,
        uuid: Option<String>,
        queue: CaptureQueue,
    ) -> Self {
        let window = settings.window_for(kind);
        let secondary = kind.has_secondary().then(|| RunningAverage::new(window));

        Self {
            key,
            kind,
            flush_threshold: settings.flush_threshold.max(1),
            queue,
            state: Mutex::new(SessionState {
                buffer: Vec::new(),
                total_bytes: 0,
                bytes_since_check: 0,
                last_check: Instant::now(),
                rate: 0.0,
                decoder: SampleDecoder::new(kind),
                primary: RunningAverage::new(window),
                secondary,
                uuid: uuid.filter(|u| !u.is_empty()),
                attachment: 0,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn key(&self) -> &EndpointKey {
        &self.key
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn add_data(&self, data: &[u8]) {
        self.add_data_at(data, Instant::now());
    }

    /// Appends `data`, updates the averages and the throughput rate as of
    /// `now`, and flushes once the buffer reaches the threshold.
    pub(crate) fn add_data_at(&self, data: &[u8], now: Instant) {
        let mut state = self.state();
        self.append_locked(&mut state, data, now);
    }

    /// Appends `data` only if `attachment` is still the session's current
    /// stream, checked under the same lock as the append. Returns `false`
    /// when a newer stream has taken over.
    pub fn add_attached(&self, attachment: u64, data: &[u8]) -> bool {
        let mut state = self.state();
        if state.attachment != attachment {
            return false;
        }
        self.append_locked(&mut state, data, Instant::now());
        true
    }

    fn append_locked(&self, state: &mut SessionState, data: &[u8], now: Instant) {
        state.buffer.extend_from_slice(data);
        state.total_bytes += data.len() as u64;
        state.bytes_since_check += data.len() as u64;

        let primary = &mut state.primary;
        let secondary = &mut state.secondary;
        state.decoder.consume(data, |sample| match sample.sub {
            SubChannel::Primary => primary.add(sample.value),
            SubChannel::Secondary => {
                if let Some(ring) = secondary.as_mut() {
                    ring.add(sample.value);
                }
            }
        });

        let elapsed = now.saturating_duration_since(state.last_check).as_secs_f64();
        if elapsed >= 1.0 {
            state.rate = state.bytes_since_check as f64 / elapsed / MIB;
            debug!("Port {} - {} Rate: {:.2} MB/s", self.key.port, self.key.ip, state.rate);
            state.bytes_since_check = 0;
            state.last_check = now;
        }

        if state.buffer.len() >= self.flush_threshold {
            self.flush_locked(state);
        }
    }

    /// Hands the buffered bytes to the capture writer and empties the
    /// buffer. Returns the number of bytes scheduled, `None` if empty.
    pub fn flush(&self) -> Option<usize> {
        let mut state = self.state();
        self.flush_locked(&mut state)
    }

    fn flush_locked(&self, state: &mut SessionState) -> Option<usize> {
        if state.buffer.is_empty() {
            return None;
        }

        let data = std::mem::take(&mut state.buffer);
        let len = data.len();
        let file_name = capture_file_name(
            self.key.port,
            &self.key.ip,
            state.uuid.as_deref(),
            next_capture_stamp(),
        );
        debug!("Flushing {} byte(s) from {} to {}", len, self.key, file_name);
        self.queue.enqueue(CaptureJob { file_name, data });
        Some(len)
    }

    /// Makes a freshly accepted stream the session's only writer: the
    /// stream starts on a word boundary and on the internal thermocouple
    /// channel. Returns the token that stream passes to
    /// [`add_attached`](Self::add_attached).
    pub fn attach(&self) -> u64 {
        let mut state = self.state();
        state.attachment += 1;
        state.decoder.reset_alignment();
        state.attachment
    }

    /// Throughput in MiB/s as of the last completed measurement window.
    pub fn rate(&self) -> f64 {
        self.state().rate
    }

    /// Primary running average and whether its window has filled once.
    pub fn average(&self) -> (f64, bool) {
        let state = self.state();
        (state.primary.average(), state.primary.filled_once())
    }

    /// Secondary (external thermocouple) running average, if this kind has one.
    pub fn average_b(&self) -> Option<(f64, bool)> {
        let state = self.state();
        state
            .secondary
            .as_ref()
            .map(|ring| (ring.average(), ring.filled_once()))
    }

    pub fn uuid(&self) -> Option<String> {
        self.state().uuid.clone()
    }

    pub fn set_uuid(&self, uuid: &str) {
        self.state().uuid = Some(uuid.to_string()).filter(|u| !u.is_empty());
    }

    pub fn buffered_len(&self) -> usize {
        self.state().buffer.len()
    }

    pub fn total_bytes(&self) -> u64 {
        self.state().total_bytes
    }
}
