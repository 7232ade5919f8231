// Aquaview - Water-quality telemetry core
// Copyright (c) 2025 David Martin Venti
//
// Dual-licensed under AGPL-3.0 and Commercial License.
// See LICENSE file for details.

//! Sample decoding
//!
//! Turns a raw `(topic, payload)` pair from the message channel into a
//! [`SensorSample`]. Decoding is pure: the caller supplies the clock.

use chrono::{DateTime, Local};

use crate::error::DecodeError;
use crate::protocol::{SensorKind, SensorSample};

/// Stateless decoder for sensor messages
#[derive(Debug, Clone, Copy, Default)]
pub struct SampleDecoder;

impl SampleDecoder {
    /// Create a new decoder
    pub fn new() -> Self {
        Self
    }

    /// Decode using the current wall clock as receive time
    pub fn decode(&self, topic: &str, payload: &[u8]) -> Result<SensorSample, DecodeError> {
        self.decode_at(topic, payload, Local::now())
    }

    /// Decode with an explicit receive time
    ///
    /// The kind comes from the second topic segment (`sensor/tds` → TDS).
    /// The payload must be a UTF-8 decimal literal with a finite value.
    pub fn decode_at(
        &self,
        topic: &str,
        payload: &[u8],
        observed_at: DateTime<Local>,
    ) -> Result<SensorSample, DecodeError> {
        let kind = topic
            .split('/')
            .nth(1)
            .and_then(SensorKind::from_segment)
            .ok_or_else(|| DecodeError::UnknownSensorKind(topic.to_string()))?;

        let text = std::str::from_utf8(payload)
            .map_err(|_| DecodeError::InvalidValue("payload is not UTF-8".to_string()))?;

        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| DecodeError::InvalidValue(text.to_string()))?;

        if !value.is_finite() {
            return Err(DecodeError::InvalidValue(text.to_string()));
        }

        Ok(SensorSample::new(kind, value, observed_at))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::TimeZone;

    fn at() -> DateTime<Local> {
        Local.with_ymd_and_hms(2025, 3, 14, 9, 26, 53).unwrap()
    }

    #[test]
    fn test_decode_valid() {
        let decoder = SampleDecoder::new();
        let sample = decoder.decode_at("sensor/tds", b"12.5", at()).unwrap();
        assert_eq!(sample.kind, SensorKind::Tds);
        assert_relative_eq!(sample.value, 12.5);
        assert_eq!(sample.observed_at, at());
    }

    #[test]
    fn test_decode_each_kind() {
        let decoder = SampleDecoder::new();
        for kind in SensorKind::ALL {
            let sample = decoder.decode_at(kind.topic(), b"1", at()).unwrap();
            assert_eq!(sample.kind, kind);
        }
    }

    #[test]
    fn test_decode_unknown_kind() {
        let decoder = SampleDecoder::new();
        let result = decoder.decode_at("sensor/unknown", b"1.0", at());
        assert!(matches!(result, Err(DecodeError::UnknownSensorKind(_))));

        let result = decoder.decode_at("turbidity", b"1.0", at());
        assert!(matches!(result, Err(DecodeError::UnknownSensorKind(_))));
    }

    #[test]
    fn test_decode_invalid_value() {
        let decoder = SampleDecoder::new();
        let result = decoder.decode_at("sensor/tds", b"abc", at());
        assert!(matches!(result, Err(DecodeError::InvalidValue(_))));

        let result = decoder.decode_at("sensor/tds", b"", at());
        assert!(matches!(result, Err(DecodeError::InvalidValue(_))));
    }

    #[test]
    fn test_decode_rejects_non_finite() {
        let decoder = SampleDecoder::new();
        for payload in [&b"NaN"[..], b"inf", b"-inf", b"1e400"] {
            let result = decoder.decode_at("sensor/temperature", payload, at());
            assert!(
                matches!(result, Err(DecodeError::InvalidValue(_))),
                "{:?} should be rejected",
                String::from_utf8_lossy(payload)
            );
        }
    }

    #[test]
    fn test_decode_rejects_non_utf8() {
        let decoder = SampleDecoder::new();
        let result = decoder.decode_at("sensor/tds", &[0xff, 0xfe], at());
        assert!(matches!(result, Err(DecodeError::InvalidValue(_))));
    }

    #[test]
    fn test_decode_tolerates_surrounding_whitespace() {
        let decoder = SampleDecoder::new();
        let sample = decoder.decode_at("sensor/turbidity", b" 3.25\n", at()).unwrap();
        assert_relative_eq!(sample.value, 3.25);
    }
}
