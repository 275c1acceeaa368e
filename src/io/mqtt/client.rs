// src/io/mqtt/client.rs
//
// rumqttc transport over secure websockets.
// Each connection owns one event loop on its own task. rumqttc would redial on
// the next poll after an error; instead the loop stops, the loss token fires and
// the session builds a new connection from a freshly signed URL.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, Transport,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{Connection, ConnectionTarget, Connector};
use crate::error::TransportError;
use crate::settings::MqttSettings;

/// Request queue depth between client handle and event loop
const REQUEST_CAPACITY: usize = 16;

const WSS_DEFAULT_PORT: u16 = 443;

// ============================================================================
// Connector
// ============================================================================

#[derive(Clone, Debug)]
pub struct MqttConnector {
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    pub publish_timeout: Duration,
}

impl MqttConnector {
    pub fn from_settings(settings: &MqttSettings) -> Self {
        Self {
            keep_alive: settings.keep_alive,
            connect_timeout: settings.connect_timeout,
            publish_timeout: settings.publish_timeout,
        }
    }

    fn options(&self, target: &ConnectionTarget, client_id: &str) -> MqttOptions {
        // Websocket transports take the full URL as the broker address
        let port = target.url.port_or_known_default().unwrap_or(WSS_DEFAULT_PORT);
        let mut options = MqttOptions::new(client_id, target.url.as_str(), port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(true);
        options.set_transport(Transport::wss_with_default_config());
        options
    }
}

#[async_trait]
impl Connector for MqttConnector {
    type Connection = MqttConnection;

    async fn connect(
        &self,
        target: &ConnectionTarget,
        client_id: &str,
    ) -> Result<MqttConnection, TransportError> {
        let (client, eventloop) =
            AsyncClient::new(self.options(target, client_id), REQUEST_CAPACITY);

        let lost = CancellationToken::new();
        let (ready_tx, ready_rx) = oneshot::channel();
        let (written_tx, written_rx) = mpsc::unbounded_channel();
        let task_handle = tokio::spawn(drive_event_loop(
            eventloop,
            Some(ready_tx),
            lost.clone(),
            written_tx,
        ));

        let connection = MqttConnection {
            client,
            lost,
            written_rx,
            task_handle,
            publish_timeout: self.publish_timeout,
        };

        // Dropping `connection` on any early return stops the event loop
        match timeout(self.connect_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(connection),
            Ok(Ok(Err(e))) => Err(TransportError::Connection(e)),
            Ok(Err(_)) => Err(TransportError::ConnectionLost),
            Err(_) => Err(TransportError::Timeout(self.connect_timeout)),
        }
    }
}

// ============================================================================
// Connection
// ============================================================================

pub struct MqttConnection {
    client: AsyncClient,
    lost: CancellationToken,
    /// One item per publish written to the socket
    written_rx: mpsc::UnboundedReceiver<()>,
    task_handle: JoinHandle<()>,
    publish_timeout: Duration,
}

#[async_trait]
impl Connection for MqttConnection {
    async fn publish(
        &mut self,
        topic: &str,
        qos: QoS,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        if self.lost.is_cancelled() {
            return Err(TransportError::ConnectionLost);
        }

        // Acks left over from a publish that timed out
        while self.written_rx.try_recv().is_ok() {}

        self.client.publish(topic, qos, false, payload).await?;

        match timeout(self.publish_timeout, self.written_rx.recv()).await {
            Ok(Some(())) => Ok(()),
            Ok(None) => Err(TransportError::ConnectionLost),
            Err(_) => Err(TransportError::Timeout(self.publish_timeout)),
        }
    }

    fn lost(&self) -> CancellationToken {
        self.lost.clone()
    }

    async fn disconnect(&mut self) {
        if !self.lost.is_cancelled() {
            if let Err(e) = self.client.disconnect().await {
                debug!(error = %e, "MQTT disconnect request failed");
            }
            // Give the event loop a moment to flush the DISCONNECT packet
            let _ = timeout(Duration::from_millis(500), &mut self.task_handle).await;
        }
        self.lost.cancel();
    }
}

impl Drop for MqttConnection {
    fn drop(&mut self) {
        self.lost.cancel();
        self.task_handle.abort();
    }
}

// ============================================================================
// Event Loop Task
// ============================================================================

async fn drive_event_loop(
    mut eventloop: EventLoop,
    mut ready: Option<oneshot::Sender<Result<(), ConnectionError>>>,
    lost: CancellationToken,
    written: mpsc::UnboundedSender<()>,
) {
    loop {
        let event = tokio::select! {
            _ = lost.cancelled() => break,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                debug!(code = ?ack.code, "MQTT connection accepted");
                if let Some(tx) = ready.take() {
                    let _ = tx.send(Ok(()));
                }
            }
            Ok(Event::Outgoing(Outgoing::Publish(_))) => {
                let _ = written.send(());
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                debug!("MQTT disconnect sent");
                break;
            }
            Ok(_) => {}
            Err(e) => {
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(e));
                    }
                    None => warn!(error = %e, "MQTT event loop stopped"),
                }
                break;
            }
        }
    }

    lost.cancel();
}
