// src/io/mqtt/mod.rs
//
// MQTT publisher for AWS IoT device shadows.
// The session owns the connection and reconnects on loss; the transport is
// abstracted so the session can run against any broker client.

mod backoff;
mod client;
mod presign;
mod session;
mod shadow;

pub use backoff::Backoff;
pub use client::{MqttConnection, MqttConnector};
pub use presign::{Authorize, ConnectionTarget, Credentials, Presigner};
pub use session::{PublishSession, SessionEvent, SessionOptions, SessionState};
pub use shadow::{shadow_update_topic, Shadow, ShadowReport, ShadowState, TIMESTAMP_FORMAT};

pub use rumqttc::QoS;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::TransportError;

/// Opens connections to a presigned target
#[async_trait]
pub trait Connector: Send + Sync {
    type Connection: Connection;

    /// Open a connection and wait until the broker accepts it
    async fn connect(
        &self,
        target: &ConnectionTarget,
        client_id: &str,
    ) -> Result<Self::Connection, TransportError>;
}

/// A live broker connection. Discarded, never reused, once lost.
#[async_trait]
pub trait Connection: Send {
    /// Publish and wait until the transport acknowledges the message
    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), TransportError>;

    /// Cancelled when the transport reports the connection as lost
    fn lost(&self) -> CancellationToken;

    async fn disconnect(&mut self);
}
