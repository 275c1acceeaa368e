// src/io/mqtt/shadow.rs
//
// Device shadow update document.
//
// JSON message format:
// {
//   "state": {
//     "reported": {
//       "Timestamp": "2024/3/5 07:08:09",  // UTC receipt time
//       "Lqi": 10,
//       "PowerSupplyVoltage": 3300,
//       "SensorMode": 1,
//       "X": 100, "Y": -50, "Z": 60
//     }
//   }
// }

use serde::{Deserialize, Serialize};

use crate::io::Reading;

/// Timestamp layout: year/month/day without zero padding, 24h time
pub const TIMESTAMP_FORMAT: &str = "%Y/%-m/%-d %H:%M:%S";

/// Shadow update topic for a thing
pub fn shadow_update_topic(thing_name: &str) -> String {
    format!("$aws/things/{}/shadow/update", thing_name)
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shadow {
    pub state: ShadowState,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShadowState {
    pub reported: ShadowReport,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ShadowReport {
    pub timestamp: String,
    pub lqi: u8,
    pub power_supply_voltage: u16,
    pub sensor_mode: u16,
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl From<&Reading> for Shadow {
    fn from(reading: &Reading) -> Self {
        Shadow {
            state: ShadowState {
                reported: ShadowReport {
                    timestamp: reading.timestamp.format(TIMESTAMP_FORMAT).to_string(),
                    lqi: reading.lqi,
                    power_supply_voltage: reading.power_supply_voltage,
                    sensor_mode: reading.sensor_mode,
                    x: reading.x,
                    y: reading.y,
                    z: reading.z,
                },
            },
        }
    }
}

impl Shadow {
    pub fn to_payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}
