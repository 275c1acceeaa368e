// src/io/serial/parser.rs
//
// Decoder for the TWELITE 2525A acceleration packet as printed by the MONOSTICK.
//
// Packet layout (one line, terminator already stripped):
//   ;<f0>;<f1>;<lqi>;<f3>;<child id>;<voltage>;<mode>;<f7>;<f8>;<f9>;<f10>;<x>;<y>;<z>;
// The enclosing separators are mandatory. A bare `;;` carries no payload and is
// emitted by the receiver between samples.

use std::str::FromStr;

use chrono::{DateTime, Utc};

use crate::io::{FailureReason, Packet, PacketField, ParseFailure, Reading};

/// Field separator, also required at both ends of a packet
pub const SEPARATOR: char = ';';

/// Number of fields in an acceleration packet
pub const FIELD_COUNT: usize = 14;

const CHILD_ID_INDEX: usize = 4;

/// Decode one frame, stamping a successful reading with the current UTC time.
pub fn parse_packet(frame: &str) -> Packet {
    parse_packet_at(frame, Utc::now())
}

/// Decode one frame with an explicit receipt timestamp.
pub fn parse_packet_at(frame: &str, received_at: DateTime<Utc>) -> Packet {
    match decode(frame, received_at) {
        Ok(Some(reading)) => Packet::Reading(reading),
        Ok(None) => Packet::Empty,
        Err(reason) => Packet::Failure(ParseFailure::new(reason, frame)),
    }
}

fn decode(frame: &str, received_at: DateTime<Utc>) -> Result<Option<Reading>, FailureReason> {
    // A lone ";" both starts and ends with the separator but has no interior
    let inner = frame
        .strip_prefix(SEPARATOR)
        .and_then(|rest| rest.strip_suffix(SEPARATOR))
        .ok_or(FailureReason::Delimiters)?;

    let fields: Vec<&str> = inner.split(SEPARATOR).collect();
    if fields.len() == 1 {
        return Ok(None);
    }
    if fields.len() != FIELD_COUNT {
        return Err(FailureReason::FieldCount(fields.len()));
    }

    Ok(Some(Reading {
        timestamp: received_at,
        lqi: unsigned(&fields, PacketField::Lqi)?,
        child_id: fields[CHILD_ID_INDEX].to_string(),
        power_supply_voltage: unsigned(&fields, PacketField::PowerSupplyVoltage)?,
        sensor_mode: unsigned(&fields, PacketField::SensorMode)?,
        x: numeric(&fields, PacketField::X)?,
        y: numeric(&fields, PacketField::Y)?,
        z: numeric(&fields, PacketField::Z)?,
    }))
}

/// Parse a decimal field into its fixed-width type; out-of-range values fail.
fn numeric<T: FromStr>(fields: &[&str], field: PacketField) -> Result<T, FailureReason> {
    let raw = fields[field.index()];
    raw.parse().map_err(|_| invalid(field, raw))
}

/// Unsigned fields take bare digits only; an explicit `+` sign is rejected.
fn unsigned<T: FromStr>(fields: &[&str], field: PacketField) -> Result<T, FailureReason> {
    let raw = fields[field.index()];
    if raw.starts_with('+') {
        return Err(invalid(field, raw));
    }
    numeric(fields, field)
}

fn invalid(field: PacketField, raw: &str) -> FailureReason {
    FailureReason::InvalidField {
        field,
        raw: raw.to_string(),
    }
}
