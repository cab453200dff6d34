use serde::{Deserialize, Serialize};

/// Numeric interpretation of a data channel, resolved once per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    /// Bipolar ADC: signed 16-bit, inverted and scaled to +/-2.5 V.
    SourceVoltage,
    /// Unipolar ADC: unsigned 16-bit, 187.5 uV per LSB offset by -6.144 V.
    GateVoltage,
    /// Interleaved internal-sensor / external-sensor words, internal first.
    Thermocouple,
}

impl ChannelKind {
    /// Converts one raw little-endian word for the given sub-channel.
    ///
    /// Probe words are passed through unconverted; no conversion formula is
    /// defined for them yet.
    pub fn convert(self, raw: u16, sub: SubChannel) -> f64 {
        match (self, sub) {
            (ChannelKind::SourceVoltage, _) => {
                let signed = raw as i16 as f64;
                -signed / 32768.0 * 2.5
            }
            (ChannelKind::GateVoltage, _) => raw as f64 * 187.5e-6 - 6.144,
            (ChannelKind::Thermocouple, SubChannel::Primary) => raw as i16 as f64 / 4.0 * 0.03125,
            (ChannelKind::Thermocouple, SubChannel::Secondary) => raw as i16 as f64,
        }
    }

    /// Whether this kind carries a second, interleaved sub-channel.
    pub fn has_secondary(self) -> bool {
        matches!(self, ChannelKind::Thermocouple)
    }

    pub fn label(self) -> &'static str {
        match self {
            ChannelKind::SourceVoltage => "source-voltage",
            ChannelKind::GateVoltage => "gate-voltage",
            ChannelKind::Thermocouple => "thermocouple",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubChannel {
    Primary,
    Secondary,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub sub: SubChannel,
    pub value: f64,
}

/// Stateful byte-to-sample converter for one session.
///
/// An odd trailing byte is kept until the next call completes the word, so
/// any chunking of the stream decodes to the same samples.
#[derive(Debug, Clone)]
pub struct SampleDecoder {
    kind: ChannelKind,
    carry: Option<u8>,
    next_internal: bool,
}

impl SampleDecoder {
    pub fn new(kind: ChannelKind) -> Self {
        Self {
            kind,
            carry: None,
            next_internal: true,
        }
    }

    pub fn kind(&self) -> ChannelKind {
        self.kind
    }

    pub fn carry(&self) -> Option<u8> {
        self.carry
    }

    /// Forgets any partial word and restarts the interleave on the internal
    /// sub-channel. Used when a fresh stream is attached to the session.
    pub fn reset_alignment(&mut self) {
        self.carry = None;
        self.next_internal = true;
    }

    /// Decodes `bytes`, handing every complete sample to `sink`. Returns the
    /// number of samples produced.
    pub fn consume<F>(&mut self, bytes: &[u8], mut sink: F) -> usize
    where
        F: FnMut(Sample),
    {
        let mut produced = 0;
        let mut rest = bytes;

        if let Some(low) = self.carry.take() {
            match rest.split_first() {
                Some((&high, tail)) => {
                    sink(self.decode_word(u16::from_le_bytes([low, high])));
                    produced += 1;
                    rest = tail;
                }
                None => {
                    self.carry = Some(low);
                    return 0;
                }
            }
        }

        let mut words = rest.chunks_exact(2);
        for word in &mut words {
            sink(self.decode_word(u16::from_le_bytes([word[0], word[1]])));
            produced += 1;
        }

        if let [last] = words.remainder() {
            self.carry = Some(*last);
        }

        produced
    }

    fn decode_word(&mut self, raw: u16) -> Sample {
        let sub = match self.kind {
            ChannelKind::Thermocouple => {
                let sub = if self.next_internal {
                    SubChannel::Primary
                } else {
                    SubChannel::Secondary
                };
                self.next_internal = !self.next_internal;
                sub
            }
            _ => SubChannel::Primary,
        };

        Sample {
            sub,
            value: self.kind.convert(raw, sub),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_KINDS: [ChannelKind; 3] = [
        ChannelKind::SourceVoltage,
        ChannelKind::GateVoltage,
        ChannelKind::Thermocouple,
    ];

    fn decode_all(kind: ChannelKind, chunks: &[&[u8]]) -> Vec<Sample> {
        let mut decoder = SampleDecoder::new(kind);
        let mut out = Vec::new();
        for chunk in chunks {
            decoder.consume(chunk, |s| out.push(s));
        }
        out
    }

    #[test]
    fn source_voltage_most_negative_code_is_plus_full_scale() {
        let samples = decode_all(ChannelKind::SourceVoltage, &[&[0x00, 0x80]]);
        assert_eq!(samples.len(), 1);
        assert_eq!(samples[0].value, 2.5);
        assert_eq!(samples[0].sub, SubChannel::Primary);
    }

    #[test]
    fn gate_voltage_scale_and_offset() {
        let samples = decode_all(ChannelKind::GateVoltage, &[&[0x00, 0x00], &[0xFF, 0xFF]]);
        assert!((samples[0].value - -6.144).abs() < 1e-12);
        assert!((samples[1].value - (65535.0 * 187.5e-6 - 6.144)).abs() < 1e-12);
    }

    #[test]
    fn thermocouple_alternates_starting_with_internal() {
        // internal: 0x0080 = 128 -> 128 / 4 * 0.03125 = 1.0; external: -2 raw
        let samples = decode_all(
            ChannelKind::Thermocouple,
            &[&[0x80, 0x00, 0xFE, 0xFF, 0x80, 0x00]],
        );
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0], Sample { sub: SubChannel::Primary, value: 1.0 });
        assert_eq!(samples[1], Sample { sub: SubChannel::Secondary, value: -2.0 });
        assert_eq!(samples[2].sub, SubChannel::Primary);
    }

    #[test]
    fn odd_byte_is_carried_to_next_call() {
        let mut decoder = SampleDecoder::new(ChannelKind::GateVoltage);
        let mut out = Vec::new();
        assert_eq!(decoder.consume(&[0x01, 0x02, 0x03], |s| out.push(s)), 1);
        assert_eq!(decoder.carry(), Some(0x03));
        assert_eq!(decoder.consume(&[], |s| out.push(s)), 0);
        assert_eq!(decoder.carry(), Some(0x03));
        assert_eq!(decoder.consume(&[0x04], |s| out.push(s)), 1);
        assert_eq!(decoder.carry(), None);
        assert_eq!(out[1].value, ChannelKind::GateVoltage.convert(0x0403, SubChannel::Primary));
    }

    #[test]
    fn any_chunking_decodes_like_one_call() {
        let stream: Vec<u8> = (0u8..=200).map(|b| b.wrapping_mul(37).wrapping_add(11)).collect();
        let splits: [&[usize]; 5] = [&[1], &[3, 4, 5], &[2, 2, 2, 7], &[199], &[0, 1, 0, 33, 100]];

        for kind in ALL_KINDS {
            let whole = decode_all(kind, &[&stream]);
            for cuts in splits {
                let mut chunks: Vec<&[u8]> = Vec::new();
                let mut pos = 0;
                for len in cuts {
                    let end = (pos + len).min(stream.len());
                    chunks.push(&stream[pos..end]);
                    pos = end;
                }
                chunks.push(&stream[pos..]);
                assert_eq!(decode_all(kind, &chunks), whole, "{:?} split {:?}", kind, cuts);
            }
        }
    }

    #[test]
    fn reset_alignment_drops_carry_and_restarts_interleave() {
        let mut decoder = SampleDecoder::new(ChannelKind::Thermocouple);
        let mut out = Vec::new();
        decoder.consume(&[0x00, 0x00, 0x11], |s| out.push(s));
        decoder.reset_alignment();
        assert_eq!(decoder.carry(), None);
        decoder.consume(&[0x80, 0x00], |s| out.push(s));
        assert_eq!(out[1].sub, SubChannel::Primary);
    }

    #[test]
    fn kind_parses_from_snake_case() {
        let kind: ChannelKind = serde_json::from_str("\"gate_voltage\"").unwrap();
        assert_eq!(kind, ChannelKind::GateVoltage);
        assert!(ChannelKind::Thermocouple.has_secondary());
        assert!(!ChannelKind::SourceVoltage.has_secondary());
    }
}
