// src/io/mod.rs
//
// Sensor IO for the bridge.
// The serial side turns the MONOSTICK byte stream into readings, the MQTT side
// publishes them to the device shadow. Both sides meet only at the sensor channel.

pub mod mqtt;
pub mod serial;

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

// ============================================================================
// Readings
// ============================================================================

/// Acceleration sample reported by a TWELITE 2525A child device
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Reading {
    /// Host wall-clock time when the packet was decoded (not device time)
    pub timestamp: DateTime<Utc>,
    /// Link quality indicator
    pub lqi: u8,
    /// Last 8 hex digits of the child device's MAC address
    pub child_id: String,
    /// Power supply voltage [mV]
    pub power_supply_voltage: u16,
    pub sensor_mode: u16,
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

// ============================================================================
// Parse Failures
// ============================================================================

/// Numeric packet fields, with their position in the `;`-separated payload
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PacketField {
    Lqi,
    PowerSupplyVoltage,
    SensorMode,
    X,
    Y,
    Z,
}

impl PacketField {
    /// Index of the field after the enclosing separators are stripped
    pub fn index(self) -> usize {
        match self {
            PacketField::Lqi => 2,
            PacketField::PowerSupplyVoltage => 5,
            PacketField::SensorMode => 6,
            PacketField::X => 11,
            PacketField::Y => 12,
            PacketField::Z => 13,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            PacketField::Lqi => "lqi",
            PacketField::PowerSupplyVoltage => "powerSupplyVoltage",
            PacketField::SensorMode => "sensorMode",
            PacketField::X => "x",
            PacketField::Y => "y",
            PacketField::Z => "z",
        }
    }
}

impl fmt::Display for PacketField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Why a frame could not be decoded
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("invalid packet prefix or suffix")]
    Delimiters,
    #[error("invalid packet data length {0}")]
    FieldCount(usize),
    #[error("invalid {field} {raw:?}")]
    InvalidField { field: PacketField, raw: String },
    #[error("no line terminator within {discarded} buffered bytes, buffer discarded")]
    Overflow { discarded: usize },
}

/// A frame that was rejected, together with the frame text that caused it
#[derive(Clone, Debug, PartialEq, Eq, Error)]
#[error("{reason} (frame: {frame:?})")]
pub struct ParseFailure {
    pub reason: FailureReason,
    pub frame: String,
}

impl ParseFailure {
    pub fn new(reason: FailureReason, frame: impl Into<String>) -> Self {
        Self {
            reason,
            frame: frame.into(),
        }
    }
}

// ============================================================================
// Decode Outcome and Sensor Channel
// ============================================================================

/// Outcome of decoding a single frame
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Packet {
    Reading(Reading),
    /// Payload-less frame (`;;`) the MONOSTICK emits between samples. Not an error.
    Empty,
    Failure(ParseFailure),
}

impl Packet {
    /// Convert into a channel item. Empty frames are suppressed.
    pub fn into_event(self) -> Option<SensorEvent> {
        match self {
            Packet::Reading(reading) => Some(SensorEvent::Reading(reading)),
            Packet::Failure(failure) => Some(SensorEvent::ParseFailure(failure)),
            Packet::Empty => None,
        }
    }
}

/// Item handed from the serial pipeline to the publish session
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SensorEvent {
    Reading(Reading),
    ParseFailure(ParseFailure),
}

pub type SensorEventSender = mpsc::UnboundedSender<SensorEvent>;
pub type SensorEventReceiver = mpsc::UnboundedReceiver<SensorEvent>;

/// Create the ordered channel between the serial producer and the publisher.
/// Unbounded so the serial thread never blocks on a slow publish.
pub fn sensor_channel() -> (SensorEventSender, SensorEventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_reading() -> Reading {
        Reading {
            timestamp: Utc::now(),
            lqi: 10,
            child_id: "ABCD1234".to_string(),
            power_supply_voltage: 3300,
            sensor_mode: 1,
            x: 100,
            y: -50,
            z: 60,
        }
    }

    #[test]
    fn test_empty_packet_is_suppressed() {
        assert_eq!(Packet::Empty.into_event(), None);
    }

    #[test]
    fn test_packet_into_event() {
        let reading = sample_reading();
        assert_eq!(
            Packet::Reading(reading.clone()).into_event(),
            Some(SensorEvent::Reading(reading))
        );

        let failure = ParseFailure::new(FailureReason::FieldCount(3), ";1;2;3;");
        assert_eq!(
            Packet::Failure(failure.clone()).into_event(),
            Some(SensorEvent::ParseFailure(failure))
        );
    }

    #[test]
    fn test_failure_display_names_field_and_raw_text() {
        let failure = ParseFailure::new(
            FailureReason::InvalidField {
                field: PacketField::Lqi,
                raw: "999".to_string(),
            },
            ";frame;",
        );
        let text = failure.to_string();
        assert!(text.contains("lqi"));
        assert!(text.contains("999"));
        assert!(text.contains(";frame;"));
    }

    #[tokio::test]
    async fn test_sensor_channel_preserves_order_and_reports_close() {
        let (tx, mut rx) = sensor_channel();
        for lqi in 0..5u8 {
            let mut reading = sample_reading();
            reading.lqi = lqi;
            tx.send(SensorEvent::Reading(reading)).unwrap();
        }
        drop(tx);

        let mut seen = Vec::new();
        while let Some(SensorEvent::Reading(reading)) = rx.recv().await {
            seen.push(reading.lqi);
        }
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert!(rx.recv().await.is_none());
    }
}
