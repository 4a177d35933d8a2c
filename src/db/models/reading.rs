//! Telemetry reading data model.
//!
//! A `Reading` is one sample published by the compressor board (or the simulator).
//! The same JSON shape travels over MQTT, is pushed to viewers and is persisted.

use std::convert::TryFrom;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "u8", into = "u8")]
pub enum ReadingStatus {
    Normal,
    Abnormal,
}

impl ReadingStatus {
    pub fn as_i64(&self) -> i64 {
        match self {
            ReadingStatus::Normal => 0,
            ReadingStatus::Abnormal => 1,
        }
    }

    /// Status rule used by the board firmware: abnormal when either horizontal
    /// axis exceeds 1.2 g.
    pub fn from_vibration(ax: f64, ay: f64) -> Self {
        if ax.abs() > 1.2 || ay.abs() > 1.2 {
            ReadingStatus::Abnormal
        } else {
            ReadingStatus::Normal
        }
    }
}

impl TryFrom<u8> for ReadingStatus {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ReadingStatus::Normal),
            1 => Ok(ReadingStatus::Abnormal),
            other => Err(format!("status must be 0 or 1, got {other}")),
        }
    }
}

impl From<ReadingStatus> for u8 {
    fn from(status: ReadingStatus) -> Self {
        match status {
            ReadingStatus::Normal => 0,
            ReadingStatus::Abnormal => 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Reading {
    pub timestamp: String,
    pub ax: f64,
    pub ay: f64,
    pub az: f64,
    pub temp: f64,
    pub amp: f64,
    pub rul_predict: f64,
    pub status: ReadingStatus,
}

impl Reading {
    /// Returns the name of the first non-finite value field, if any.
    pub fn non_finite_field(&self) -> Option<&'static str> {
        [
            ("ax", self.ax),
            ("ay", self.ay),
            ("az", self.az),
            ("temp", self.temp),
            ("amp", self.amp),
            ("rul_predict", self.rul_predict),
        ]
        .into_iter()
        .find(|(_, value)| !value.is_finite())
        .map(|(name, _)| name)
    }
}

/// A persisted reading with its server-assigned identity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredReading {
    pub id: i64,
    pub recorded_at: String,
    #[serde(flatten)]
    pub reading: Reading,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Reading {
        Reading {
            timestamp: "2026-10-18 12:00:00.000".into(),
            ax: 1.3,
            ay: 0.1,
            az: 1.0,
            temp: 50.0,
            amp: 4.0,
            rul_predict: 120.0,
            status: ReadingStatus::Abnormal,
        }
    }

    #[test]
    fn status_serializes_as_integer() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["status"], serde_json::json!(1));
        assert_eq!(json["rul_predict"], serde_json::json!(120.0));
    }

    #[test]
    fn status_outside_range_is_rejected() {
        let raw = r#"{"timestamp":"t","ax":0,"ay":0,"az":1,"temp":50,"amp":4,"rul_predict":100,"status":2}"#;
        assert!(serde_json::from_str::<Reading>(raw).is_err());
    }

    #[test]
    fn vibration_rule_uses_both_horizontal_axes() {
        assert_eq!(ReadingStatus::from_vibration(1.3, 0.0), ReadingStatus::Abnormal);
        assert_eq!(ReadingStatus::from_vibration(0.0, -1.25), ReadingStatus::Abnormal);
        assert_eq!(ReadingStatus::from_vibration(1.2, -1.2), ReadingStatus::Normal);
    }

    #[test]
    fn non_finite_field_is_reported() {
        let mut reading = sample();
        assert_eq!(reading.non_finite_field(), None);
        reading.temp = f64::NAN;
        assert_eq!(reading.non_finite_field(), Some("temp"));
    }
}
