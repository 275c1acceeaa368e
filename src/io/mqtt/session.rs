// src/io/mqtt/session.rs
//
// Publish session: owns the broker connection, drains the sensor channel and
// publishes each reading as a shadow update.
//
// Connection lifecycle:
//   Disconnected -> Connecting -> Connected -(loss)-> Connecting -> ...
// A loss never ends the session; it signs a new URL and reconnects with
// backoff until it succeeds. Delivery is at most once: a reading whose publish
// fails is logged and dropped.

use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::backoff::Backoff;
use super::presign::Authorize;
use super::shadow::{shadow_update_topic, Shadow, TIMESTAMP_FORMAT};
use super::{Connection, Connector, QoS};
use crate::error::TransportError;
use crate::io::{ParseFailure, Reading, SensorEvent, SensorEventReceiver};
use crate::settings::MqttSettings;

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    Connecting,
    Connected,
    /// Terminal; entered only through `shutdown()`
    Shutdown,
}

#[derive(Clone, Debug)]
pub struct SessionOptions {
    pub client_id: String,
    pub topic: String,
    pub qos: QoS,
    pub reconnect_initial_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl SessionOptions {
    pub fn from_settings(settings: &MqttSettings) -> Self {
        Self {
            client_id: settings.client_id.clone(),
            topic: shadow_update_topic(&settings.thing_name),
            qos: QoS::AtMostOnce,
            reconnect_initial_delay: settings.reconnect_initial_delay,
            reconnect_max_delay: settings.reconnect_max_delay,
        }
    }
}

/// What happened to one item taken from the sensor channel
#[derive(Debug)]
pub enum SessionEvent {
    Published(Reading),
    /// Publish failed; the reading is not retried
    Dropped {
        reading: Reading,
        error: TransportError,
    },
    /// Frame rejected by the parser; logged, never published
    Rejected(ParseFailure),
}

// ============================================================================
// Publish Session
// ============================================================================

pub struct PublishSession<A, C>
where
    A: Authorize,
    C: Connector,
{
    authorizer: A,
    connector: C,
    options: SessionOptions,
    events: SensorEventReceiver,
    connection: Option<C::Connection>,
    state: SessionState,
    backoff: Backoff,
    reconnects: u64,
}

impl<A, C> PublishSession<A, C>
where
    A: Authorize,
    C: Connector,
{
    pub fn new(
        authorizer: A,
        connector: C,
        options: SessionOptions,
        events: SensorEventReceiver,
    ) -> Self {
        let backoff = Backoff::new(options.reconnect_initial_delay, options.reconnect_max_delay);
        Self {
            authorizer,
            connector,
            options,
            events,
            connection: None,
            state: SessionState::Disconnected,
            backoff,
            reconnects: 0,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Successful reconnects after a loss
    pub fn reconnects(&self) -> u64 {
        self.reconnects
    }

    /// Sign a fresh target and open a new connection, replacing any old one.
    /// One attempt; at startup a failure here is fatal to the caller.
    pub async fn connect(&mut self) -> Result<(), TransportError> {
        if self.state == SessionState::Shutdown {
            return Err(TransportError::NotConnected);
        }
        info!(client_id = %self.options.client_id, "Initialize client.");
        self.state = SessionState::Connecting;
        self.connection = None;

        let result = match self.authorizer.authorize() {
            Ok(target) => {
                debug!(expires_at = %target.expires_at, "Signed connection URL");
                self.connector.connect(&target, &self.options.client_id).await
            }
            Err(e) => Err(TransportError::Authorize(e)),
        };

        match result {
            Ok(connection) => {
                self.connection = Some(connection);
                self.state = SessionState::Connected;
                self.backoff.reset();
                info!("Connected.");
                Ok(())
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Retry `connect()` with backoff until it succeeds. Gives up and returns
    /// `false` once the producer has closed the channel.
    async fn reconnect(&mut self) -> bool {
        loop {
            if self.events.is_closed() {
                return false;
            }
            info!("Reconnecting...");
            match self.connect().await {
                Ok(()) => {
                    self.reconnects += 1;
                    return true;
                }
                Err(e) => {
                    let delay = self.backoff.next_delay();
                    warn!(
                        attempt = self.backoff.attempt(),
                        retry_in = ?delay,
                        error = %e,
                        "Reconnect failed"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Wait for the next channel item and handle it.
    /// Reconnects transparently when the connection is lost while waiting.
    /// Returns `None` once the channel is closed or after `shutdown()`.
    pub async fn next_event(&mut self) -> Option<SessionEvent> {
        loop {
            if self.state == SessionState::Shutdown {
                return None;
            }

            let lost = match self.connection.as_ref().map(|c| c.lost()) {
                Some(lost) => lost,
                None => {
                    if self.reconnect().await {
                        continue;
                    }
                    // Producer is gone: flush what is left without a connection
                    let item = self.events.recv().await;
                    return self.handle(item).await;
                }
            };

            let item = tokio::select! {
                biased;
                _ = lost.cancelled() => {
                    warn!("Connection is lost.");
                    self.connection = None;
                    self.state = SessionState::Disconnected;
                    continue;
                }
                item = self.events.recv() => item,
            };

            return self.handle(item).await;
        }
    }

    async fn handle(&mut self, item: Option<SensorEvent>) -> Option<SessionEvent> {
        match item {
            Some(SensorEvent::Reading(reading)) => Some(self.publish(reading).await),
            Some(SensorEvent::ParseFailure(failure)) => {
                error!(error = %failure, "Got an error.");
                Some(SessionEvent::Rejected(failure))
            }
            None => None,
        }
    }

    /// Publish one reading on the current connection. Never retried.
    pub async fn publish(&mut self, reading: Reading) -> SessionEvent {
        info!(
            timestamp = %reading.timestamp.format(TIMESTAMP_FORMAT),
            lqi = reading.lqi,
            child_id = %reading.child_id,
            power_supply_voltage = reading.power_supply_voltage,
            sensor_mode = reading.sensor_mode,
            x = reading.x,
            y = reading.y,
            z = reading.z,
            "Got data."
        );

        let result = match Shadow::from(&reading).to_payload() {
            Ok(payload) => match self.connection.as_mut() {
                Some(connection) => {
                    connection
                        .publish(&self.options.topic, self.options.qos, payload)
                        .await
                }
                None => Err(TransportError::NotConnected),
            },
            Err(e) => Err(TransportError::Encode(e)),
        };

        match result {
            Ok(()) => SessionEvent::Published(reading),
            Err(error) => {
                error!(topic = %self.options.topic, error = %error, "Failed to publish.");
                SessionEvent::Dropped { reading, error }
            }
        }
    }

    /// Disconnect and stop; later calls to `next_event` return `None`
    pub async fn shutdown(&mut self) {
        self.state = SessionState::Shutdown;
        if let Some(mut connection) = self.connection.take() {
            connection.disconnect().await;
        }
        self.events.close();
    }
}
