// src/settings.rs
//
// Static configuration: a TOML file plus environment overrides for the
// credentials, endpoint and device path.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::SettingsError;

// ============================================================================
// Keys
// ============================================================================

pub const ACCESS_KEY_ID: &str = "access-key-id";
pub const SECRET_ACCESS_KEY: &str = "secret-access-key";
pub const AWS_IOT_ENDPOINT: &str = "aws.iot.endpoint";
pub const AWS_IOT_REGION: &str = "aws.iot.region";
pub const AWS_IOT_SERVICE_NAME: &str = "aws.iot.service-name";
pub const AWS_IOT_MQTT_SIGNED_REQUEST_EXPIRES: &str = "aws.iot.mqtt.signed-request-expires";
pub const AWS_IOT_MQTT_CLIENT_ID: &str = "aws.iot.mqtt.client-id";
pub const MONOSTICK_DEVICE: &str = "monostick.device";
pub const MONOSTICK_BAUD: &str = "monostick.baud";
pub const MONOSTICK_READ_TIMEOUT: &str = "monostick.read-timeout";

/// Environment variables that override file values, keyed by setting
const ENV_OVERRIDES: [(&str, &str); 4] = [
    (ACCESS_KEY_ID, "ACCESS_KEY_ID"),
    (SECRET_ACCESS_KEY, "SECRET_ACCESS_KEY"),
    (AWS_IOT_ENDPOINT, "AWS_IOT_ENDPOINT"),
    (MONOSTICK_DEVICE, "MONOSTICK_DEVICE"),
];

/// SigV4 presigned URLs are valid for at most seven days
const MAX_SIGNED_REQUEST_EXPIRES: u64 = 7 * 24 * 60 * 60;

// ============================================================================
// Settings
// ============================================================================

#[derive(Clone, Debug)]
pub struct Settings {
    pub aws: AwsSettings,
    pub monostick: MonostickSettings,
}

#[derive(Clone)]
pub struct AwsSettings {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint: Url,
    pub region: String,
    pub service_name: String,
    pub mqtt: MqttSettings,
}

// Credentials stay out of logs
impl fmt::Debug for AwsSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AwsSettings")
            .field("access_key_id", &"<redacted>")
            .field("secret_access_key", &"<redacted>")
            .field("endpoint", &self.endpoint.as_str())
            .field("region", &self.region)
            .field("service_name", &self.service_name)
            .field("mqtt", &self.mqtt)
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct MqttSettings {
    pub signed_request_expires: Duration,
    pub client_id: String,
    /// Device shadow to update
    pub thing_name: String,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

#[derive(Clone, Debug)]
pub struct MonostickSettings {
    pub device: String,
    pub baud: u32,
    pub read_timeout: Duration,
    pub data_bits: u8,
    pub stop_bits: u8,
    pub parity: Parity,
    /// Bytes buffered without a line terminator before the buffer is dropped
    pub max_frame_length: usize,
}

/// Parity setting for serial port configuration
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    #[default]
    None,
    Odd,
    Even,
}

fn default_thing_name() -> String {
    "door1".to_string()
}
fn default_keep_alive() -> u64 {
    30
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_publish_timeout() -> u64 {
    5
}
fn default_reconnect_initial_delay_ms() -> u64 {
    500
}
fn default_reconnect_max_delay_ms() -> u64 {
    30_000
}
fn default_data_bits() -> u8 {
    8
}
fn default_stop_bits() -> u8 {
    1
}
fn default_max_frame_length() -> usize {
    crate::io::serial::DEFAULT_MAX_FRAME_LENGTH
}

// ============================================================================
// File Layout
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawSettings {
    access_key_id: Option<String>,
    secret_access_key: Option<String>,
    #[serde(default)]
    aws: RawAws,
    #[serde(default)]
    monostick: RawMonostick,
}

#[derive(Debug, Default, Deserialize)]
struct RawAws {
    #[serde(default)]
    iot: RawIot,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawIot {
    endpoint: Option<String>,
    region: Option<String>,
    service_name: Option<String>,
    #[serde(default)]
    mqtt: RawMqtt,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawMqtt {
    signed_request_expires: Option<u64>,
    client_id: Option<String>,
    #[serde(default = "default_thing_name")]
    thing_name: String,
    #[serde(default = "default_keep_alive")]
    keep_alive: u64,
    #[serde(default = "default_connect_timeout")]
    connect_timeout: u64,
    #[serde(default = "default_publish_timeout")]
    publish_timeout: u64,
    #[serde(default)]
    reconnect: RawReconnect,
}

impl Default for RawMqtt {
    fn default() -> Self {
        Self {
            signed_request_expires: None,
            client_id: None,
            thing_name: default_thing_name(),
            keep_alive: default_keep_alive(),
            connect_timeout: default_connect_timeout(),
            publish_timeout: default_publish_timeout(),
            reconnect: RawReconnect::default(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawReconnect {
    #[serde(default = "default_reconnect_initial_delay_ms")]
    initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    max_delay_ms: u64,
}

impl Default for RawReconnect {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_reconnect_initial_delay_ms(),
            max_delay_ms: default_reconnect_max_delay_ms(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RawMonostick {
    device: Option<String>,
    baud: Option<u32>,
    read_timeout: Option<u64>,
    #[serde(default = "default_data_bits")]
    data_bits: u8,
    #[serde(default = "default_stop_bits")]
    stop_bits: u8,
    #[serde(default)]
    parity: Parity,
    #[serde(default = "default_max_frame_length")]
    max_frame_length: usize,
}

impl Default for RawMonostick {
    fn default() -> Self {
        Self {
            device: None,
            baud: None,
            read_timeout: None,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: Parity::None,
            max_frame_length: default_max_frame_length(),
        }
    }
}

impl RawSettings {
    fn override_with(&mut self, key: &str, value: String) {
        match key {
            ACCESS_KEY_ID => self.access_key_id = Some(value),
            SECRET_ACCESS_KEY => self.secret_access_key = Some(value),
            AWS_IOT_ENDPOINT => self.aws.iot.endpoint = Some(value),
            MONOSTICK_DEVICE => self.monostick.device = Some(value),
            _ => {}
        }
    }
}

// ============================================================================
// Loading
// ============================================================================

impl Settings {
    /// Load settings from `path` with process environment overrides.
    /// A missing file behaves like an empty one.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(source) => {
                return Err(SettingsError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        Self::from_sources(&text, |name| std::env::var(name).ok())
    }

    /// Parse settings from TOML text alone
    pub fn from_toml_str(text: &str) -> Result<Self, SettingsError> {
        Self::from_sources(text, |_| None)
    }

    /// Parse settings from TOML text, applying overrides from `env`
    pub fn from_sources<F>(text: &str, env: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut raw: RawSettings = toml::from_str(text)?;
        for (key, variable) in ENV_OVERRIDES {
            // An empty variable leaves the file value in place
            if let Some(value) = env(variable).filter(|v| !v.is_empty()) {
                raw.override_with(key, value);
            }
        }
        Self::from_raw(raw)
    }

    fn from_raw(raw: RawSettings) -> Result<Self, SettingsError> {
        let RawSettings {
            access_key_id,
            secret_access_key,
            aws: RawAws { iot },
            monostick,
        } = raw;

        let mut missing = Vec::new();
        let access_key_id = require_text(access_key_id, ACCESS_KEY_ID, &mut missing);
        let secret_access_key = require_text(secret_access_key, SECRET_ACCESS_KEY, &mut missing);
        let endpoint = require_text(iot.endpoint, AWS_IOT_ENDPOINT, &mut missing);
        let region = require_text(iot.region, AWS_IOT_REGION, &mut missing);
        let service_name = require_text(iot.service_name, AWS_IOT_SERVICE_NAME, &mut missing);
        let expires = require(
            iot.mqtt.signed_request_expires,
            AWS_IOT_MQTT_SIGNED_REQUEST_EXPIRES,
            &mut missing,
        );
        let client_id = require_text(iot.mqtt.client_id, AWS_IOT_MQTT_CLIENT_ID, &mut missing);
        let device = require_text(monostick.device, MONOSTICK_DEVICE, &mut missing);
        let baud = require(monostick.baud, MONOSTICK_BAUD, &mut missing);
        let read_timeout = require(monostick.read_timeout, MONOSTICK_READ_TIMEOUT, &mut missing);

        let (
            Some(access_key_id),
            Some(secret_access_key),
            Some(endpoint),
            Some(region),
            Some(service_name),
            Some(expires),
            Some(client_id),
            Some(device),
            Some(baud),
            Some(read_timeout),
        ) = (
            access_key_id,
            secret_access_key,
            endpoint,
            region,
            service_name,
            expires,
            client_id,
            device,
            baud,
            read_timeout,
        )
        else {
            return Err(SettingsError::Missing(missing));
        };

        let endpoint = Url::parse(&endpoint).map_err(|e| SettingsError::Invalid {
            key: AWS_IOT_ENDPOINT,
            reason: e.to_string(),
        })?;
        if endpoint.host_str().is_none() {
            return Err(invalid(AWS_IOT_ENDPOINT, "endpoint URL has no host"));
        }
        if expires == 0 || expires > MAX_SIGNED_REQUEST_EXPIRES {
            return Err(invalid(
                AWS_IOT_MQTT_SIGNED_REQUEST_EXPIRES,
                format!("must be between 1 and {} seconds", MAX_SIGNED_REQUEST_EXPIRES),
            ));
        }
        if client_id.starts_with(char::is_whitespace) {
            return Err(invalid(AWS_IOT_MQTT_CLIENT_ID, "must not start with whitespace"));
        }
        if iot.mqtt.thing_name.trim().is_empty() {
            return Err(invalid("aws.iot.mqtt.thing-name", "must not be empty"));
        }
        if iot.mqtt.reconnect.initial_delay_ms > iot.mqtt.reconnect.max_delay_ms {
            return Err(invalid(
                "aws.iot.mqtt.reconnect.initial-delay-ms",
                "must not exceed max-delay-ms",
            ));
        }
        if baud == 0 {
            return Err(invalid(MONOSTICK_BAUD, "must be positive"));
        }
        if read_timeout == 0 {
            return Err(invalid(MONOSTICK_READ_TIMEOUT, "must be at least one second"));
        }
        if !(5..=8).contains(&monostick.data_bits) {
            return Err(invalid("monostick.data-bits", "must be 5, 6, 7 or 8"));
        }
        if !matches!(monostick.stop_bits, 1 | 2) {
            return Err(invalid("monostick.stop-bits", "must be 1 or 2"));
        }
        if monostick.max_frame_length == 0 {
            return Err(invalid("monostick.max-frame-length", "must be positive"));
        }

        Ok(Settings {
            aws: AwsSettings {
                access_key_id,
                secret_access_key,
                endpoint,
                region,
                service_name,
                mqtt: MqttSettings {
                    signed_request_expires: Duration::from_secs(expires),
                    client_id,
                    thing_name: iot.mqtt.thing_name,
                    keep_alive: Duration::from_secs(iot.mqtt.keep_alive),
                    connect_timeout: Duration::from_secs(iot.mqtt.connect_timeout),
                    publish_timeout: Duration::from_secs(iot.mqtt.publish_timeout),
                    reconnect_initial_delay: Duration::from_millis(
                        iot.mqtt.reconnect.initial_delay_ms,
                    ),
                    reconnect_max_delay: Duration::from_millis(iot.mqtt.reconnect.max_delay_ms),
                },
            },
            monostick: MonostickSettings {
                device,
                baud,
                read_timeout: Duration::from_secs(read_timeout),
                data_bits: monostick.data_bits,
                stop_bits: monostick.stop_bits,
                parity: monostick.parity,
                max_frame_length: monostick.max_frame_length,
            },
        })
    }
}

fn require<T>(value: Option<T>, key: &'static str, missing: &mut Vec<&'static str>) -> Option<T> {
    if value.is_none() {
        missing.push(key);
    }
    value
}

/// Blank strings count as missing
fn require_text(
    value: Option<String>,
    key: &'static str,
    missing: &mut Vec<&'static str>,
) -> Option<String> {
    require(value.filter(|v| !v.trim().is_empty()), key, missing)
}

fn invalid(key: &'static str, reason: impl Into<String>) -> SettingsError {
    SettingsError::Invalid {
        key,
        reason: reason.into(),
    }
}
