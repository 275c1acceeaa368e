// src/lib.rs
//
// naruko: forwards TWELITE 2525A acceleration samples received on a MONOSTICK
// to an AWS IoT device shadow over MQTT.

pub mod error;
pub mod io;
pub mod logging;
pub mod settings;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info, warn};

use crate::error::BridgeError;
use crate::io::mqtt::{MqttConnector, Presigner, PublishSession, SessionOptions};
use crate::io::sensor_channel;
use crate::io::serial::{SerialSession, StreamEnd};
use crate::settings::Settings;

// ============================================================================
// Command Line
// ============================================================================

#[derive(Parser, Debug, Clone)]
#[command(name = "naruko", version, about = "TWELITE MONOSTICK to AWS IoT shadow bridge")]
pub struct Cli {
    /// Configuration file (TOML)
    #[arg(short, long, default_value = "naruko.toml")]
    pub config: PathBuf,

    /// Log level or filter directives; RUST_LOG takes precedence
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Also write daily rolling log files to this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

// ============================================================================
// Entry Point
// ============================================================================

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match logging::init(&cli.log_level, cli.log_dir.as_deref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("{}", error_chain(&e));
            return ExitCode::FAILURE;
        }
    };

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(BridgeError::Runtime)
        .and_then(|runtime| runtime.block_on(bridge(&cli)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %error_chain(&e), "Bridge stopped");
            ExitCode::FAILURE
        }
    }
}

async fn bridge(cli: &Cli) -> Result<(), BridgeError> {
    let settings = Settings::load(&cli.config)?;
    info!(config = %cli.config.display(), "Loaded settings");

    let authorizer = Presigner::from_settings(&settings.aws)?;
    let connector = MqttConnector::from_settings(&settings.aws.mqtt);
    let options = SessionOptions::from_settings(&settings.aws.mqtt);

    let (events_tx, events_rx) = sensor_channel();
    let mut session = PublishSession::new(authorizer, connector, options, events_rx);
    session.connect().await.map_err(BridgeError::InitialConnect)?;

    info!(device = %settings.monostick.device, "Create TWELITE session.");
    let serial = SerialSession::open(&settings.monostick, events_tx)?;

    info!("Waiting to receive sensor data from MONOSTICK.");
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let interrupted = loop {
        tokio::select! {
            signal = &mut shutdown => {
                if let Err(e) = signal {
                    warn!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Interrupted, shutting down.");
                break true;
            }
            event = session.next_event() => {
                if event.is_none() {
                    break false;
                }
            }
        }
    };

    let end = serial.close().await;
    session.shutdown().await;
    info!(end = ?end, reconnects = session.reconnects(), "Bridge stopped");

    match end {
        StreamEnd::DeviceLost if !interrupted => Err(BridgeError::DeviceLost),
        _ => Ok(()),
    }
}

/// Render an error with all of its sources, outermost first
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut text = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        text.push_str(": ");
        text.push_str(&cause.to_string());
        source = cause.source();
    }
    text
}
