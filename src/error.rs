//! Error types for the bridge.
//!
//! Failures are split by how far they may propagate:
//!
//! - **Startup**: [`SettingsError`], [`LoggingError`], [`SerialError`] and a failed
//!   first connection end the process through [`BridgeError`].
//! - **Transport**: [`TransportError`] mid-run is logged; the publish session
//!   reconnects on its own and the affected reading is dropped.
//! - **Protocol**: malformed frames are [`crate::io::ParseFailure`] values, never errors
//!   on this level.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for bridge operations.
pub type Result<T, E = BridgeError> = std::result::Result<T, E>;

/// Configuration could not be loaded or is incomplete
#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read config file {path}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file")]
    Parse(#[from] toml::de::Error),

    #[error("Missing required configuration: {}", .0.join(", "))]
    Missing(Vec<&'static str>),

    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Invalid log filter")]
    Filter(#[from] tracing_subscriber::filter::ParseError),

    #[error("Failed to create log directory {path}")]
    LogDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("A global logger is already installed")]
    Install(#[from] tracing_subscriber::util::TryInitError),
}

/// The signed connection target could not be produced
#[derive(Error, Debug)]
pub enum PresignError {
    #[error("Endpoint {0} has no host")]
    MissingHost(String),

    #[error("Invalid signing key")]
    Key(#[from] hmac::digest::InvalidLength),
}

/// Publish transport failure
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to authorize connection")]
    Authorize(#[from] PresignError),

    #[error("MQTT connection failed")]
    Connection(#[from] rumqttc::ConnectionError),

    #[error("MQTT client request failed")]
    Client(#[from] rumqttc::ClientError),

    #[error("Failed to encode shadow document")]
    Encode(#[from] serde_json::Error),

    #[error("Connection is lost")]
    ConnectionLost,

    #[error("Not connected")]
    NotConnected,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
}

#[derive(Error, Debug)]
pub enum SerialError {
    #[error("Failed to open {device}")]
    Open {
        device: String,
        #[source]
        source: serialport::Error,
    },
}

/// Fatal error reported by [`crate::run`]
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Settings(#[from] SettingsError),

    #[error(transparent)]
    Logging(#[from] LoggingError),

    #[error(transparent)]
    Presign(#[from] PresignError),

    #[error("Failed to initialize client")]
    InitialConnect(#[source] TransportError),

    #[error("Failed to create TWELITE session")]
    Serial(#[from] SerialError),

    #[error("MONOSTICK device was lost")]
    DeviceLost,

    #[error("Failed to start async runtime")]
    Runtime(#[source] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_lists_every_key() {
        let error = SettingsError::Missing(vec!["access-key-id", "monostick.baud"]);
        assert_eq!(
            error.to_string(),
            "Missing required configuration: access-key-id, monostick.baud"
        );
    }

    #[test]
    fn test_initial_connect_keeps_source() {
        let error = BridgeError::InitialConnect(TransportError::Timeout(Duration::from_secs(3)));
        let source = std::error::Error::source(&error).map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("Operation timed out after 3s"));
    }
}
