//! Sample processing for the binary data channels.
//!
//! Raw channel bytes are little-endian 16-bit words. [`SampleDecoder`] turns
//! them into engineering-unit values according to the channel's
//! [`ChannelKind`], and [`RunningAverage`] keeps an O(1) windowed mean of the
//! most recent values for the live telemetry queries.

pub mod decoder;
pub mod running_average;

pub use decoder::{ChannelKind, Sample, SampleDecoder, SubChannel};
pub use running_average::RunningAverage;
