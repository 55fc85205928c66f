use std::time::Duration;

use async_trait::async_trait;
use rumqttc::AsyncClient;
use rumqttc::Event;
use rumqttc::LastWill as RumqttcLastWill;
use rumqttc::MqttOptions;
use rumqttc::Outgoing;
use rumqttc::Packet;
use rumqttc::QoS;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::MqttConfig;

/// How long `disconnect()` waits for the event loop to flush the DISCONNECT
const DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// MQTT message received from a subscription
#[derive(Debug, Clone)]
pub struct MqttMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

/// Events delivered by a connected client
#[derive(Debug, Clone)]
pub enum BusEvent {
    /// A session was established, either the initial one or after a reconnect.
    /// Subscriptions do not survive reconnects and must be re-issued.
    Connected,

    /// A message arrived on a subscribed topic
    Message(MqttMessage),
}

/// Receiver for [`BusEvent`]s, fed by the client's event loop
pub type BusEvents = mpsc::UnboundedReceiver<BusEvent>;

/// Message the broker publishes on our behalf if we vanish without a clean
/// disconnect
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: String,
    pub payload: String,
}

/// Session parameters chosen by the engine
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub client_id: String,
    pub last_will: LastWill,
}

#[derive(Debug, thiserror::Error)]
pub enum MqttError {
    #[error("MQTT client not connected. Call connect() first.")]
    NotConnected,

    #[error("Failed to connect to MQTT broker: {0}")]
    Connection(String),

    #[error("No CONNACK from MQTT broker within {0:?}")]
    ConnectTimeout(Duration),

    #[error("Failed to publish to {topic}: {reason}")]
    Publish { topic: String, reason: String },

    #[error("Failed to subscribe to {topic}: {reason}")]
    Subscribe { topic: String, reason: String },

    #[error("Failed to disconnect: {0}")]
    Disconnect(String),
}

/// Trait for MQTT client operations
///
/// This trait allows for mocking the MQTT client for testing purposes
#[async_trait]
pub trait MqttClient: Send + Sync {
    /// Connect to the MQTT broker
    ///
    /// Resolves once the broker has accepted the session. The returned
    /// receiver yields `BusEvent::Connected` for this session first, and again
    /// after every reconnect.
    async fn connect(&mut self, options: &ConnectOptions) -> Result<BusEvents, MqttError>;

    /// Subscribe to an MQTT topic
    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError>;

    /// Publish a message to an MQTT topic
    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool)
    -> Result<(), MqttError>;

    /// Disconnect cleanly, so the broker does not publish the last will
    async fn disconnect(&mut self) -> Result<(), MqttError>;
}

/// Mock MQTT client for testing
#[cfg(test)]
#[derive(Debug, Default)]
pub struct MockMqttClient {
    pub subscriptions: Vec<String>,
    pub published: Vec<(String, Vec<u8>, bool)>,
    pub is_connected: bool,
    pub connect_options: Option<ConnectOptions>,
    /// Topics whose publishes fail
    pub failing_publishes: std::collections::HashSet<String>,
    /// Topics whose subscriptions fail
    pub failing_subscriptions: std::collections::HashSet<String>,
    pub refuse_connection: bool,
    events_tx: Option<mpsc::UnboundedSender<BusEvent>>,
}

#[cfg(test)]
#[async_trait]
impl MqttClient for MockMqttClient {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<BusEvents, MqttError> {
        if self.refuse_connection {
            return Err(MqttError::Connection("connection refused".to_string()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(BusEvent::Connected)
            .map_err(|e| MqttError::Connection(e.to_string()))?;
        self.events_tx = Some(tx);
        self.connect_options = Some(options.clone());
        self.is_connected = true;
        Ok(rx)
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        if self.failing_subscriptions.contains(topic) {
            return Err(MqttError::Subscribe {
                topic: topic.to_string(),
                reason: "mock failure".to_string(),
            });
        }
        self.subscriptions.push(topic.to_string());
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), MqttError> {
        if self.failing_publishes.contains(topic) {
            return Err(MqttError::Publish {
                topic: topic.to_string(),
                reason: "mock failure".to_string(),
            });
        }
        self.published
            .push((topic.to_string(), payload.to_vec(), retain));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        self.is_connected = false;
        self.events_tx = None;
        Ok(())
    }
}

#[cfg(test)]
impl MockMqttClient {
    /// Create a new mock MQTT client
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an event as if it came from the broker
    pub fn push_event(&self, event: BusEvent) {
        if let Some(tx) = &self.events_tx {
            tx.send(event).ok();
        }
    }

    /// Close the event stream, ending `Engine::run`
    pub fn close_events(&mut self) {
        self.events_tx = None;
    }

    /// Payloads published to `topic`, in order
    pub fn published_to(&self, topic: &str) -> Vec<String> {
        self.published
            .iter()
            .filter(|(t, _, _)| t == topic)
            .map(|(_, payload, _)| String::from_utf8_lossy(payload).into_owned())
            .collect()
    }

    /// One line per publish: `<topic> <payload>`, with ` (retained)` appended
    /// for retained messages
    pub fn publish_log(&self) -> String {
        self.published
            .iter()
            .map(|(topic, payload, retain)| {
                let retained = if *retain { " (retained)" } else { "" };
                format!("{} {}{}", topic, String::from_utf8_lossy(payload), retained)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Real MQTT client implementation using rumqttc
pub struct RumqttcClient {
    host: String,
    port: u16,
    credentials: Option<(String, String)>,
    keep_alive: Duration,
    connect_timeout: Duration,

    /// AsyncClient (created in connect())
    client: Option<AsyncClient>,

    /// Background event loop task handle
    event_loop_task: Option<JoinHandle<()>>,
}

impl RumqttcClient {
    /// Create a new RumqttcClient from configuration
    pub fn new(config: &MqttConfig) -> Result<Self, MqttError> {
        let (host, port) = config.broker_address().map_err(MqttError::Connection)?;

        Ok(Self {
            host,
            port,
            credentials: config
                .credentials()
                .map(|(user, pass)| (user.to_string(), pass.to_string())),
            keep_alive: Duration::from_secs(config.keep_alive),
            connect_timeout: Duration::from_secs(config.connect_timeout),
            client: None,
            event_loop_task: None,
        })
    }

    fn client(&self) -> Result<&AsyncClient, MqttError> {
        self.client.as_ref().ok_or(MqttError::NotConnected)
    }
}

#[async_trait]
impl MqttClient for RumqttcClient {
    async fn connect(&mut self, options: &ConnectOptions) -> Result<BusEvents, MqttError> {
        let mut mqtt_options = MqttOptions::new(options.client_id.clone(), &self.host, self.port);
        mqtt_options.set_keep_alive(self.keep_alive);
        mqtt_options.set_clean_session(true);
        mqtt_options.set_last_will(RumqttcLastWill::new(
            options.last_will.topic.clone(),
            options.last_will.payload.clone(),
            QoS::AtLeastOnce,
            true,
        ));

        // Set credentials if provided
        if let Some((username, password)) = &self.credentials {
            mqtt_options.set_credentials(username, password);
        }

        // Create client and event loop
        let (client, mut event_loop) = AsyncClient::new(mqtt_options, 10);

        // Drive the event loop until the broker acknowledges the session
        let handshake = async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(_) => {}
                    Err(e) => return Err(MqttError::Connection(e.to_string())),
                }
            }
        };
        tokio::time::timeout(self.connect_timeout, handshake)
            .await
            .map_err(|_| MqttError::ConnectTimeout(self.connect_timeout))??;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        event_tx
            .send(BusEvent::Connected)
            .map_err(|e| MqttError::Connection(e.to_string()))?;

        // Spawn background task to poll event loop; polling after an error
        // makes rumqttc reconnect
        let task = tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Reconnected to MQTT broker");
                        if event_tx.send(BusEvent::Connected).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let msg = MqttMessage {
                            topic: publish.topic.to_string(),
                            payload: publish.payload.to_vec(),
                            retain: publish.retain,
                        };

                        // Send to channel; if receiver dropped, exit
                        if event_tx.send(BusEvent::Message(msg)).is_err() {
                            break;
                        }
                    }
                    Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                        debug!("Sent DISCONNECT");
                        break;
                    }
                    Ok(_) => {
                        // Ignore other events (puback, suback, pings, etc.)
                    }
                    Err(e) => {
                        warn!("MQTT event loop error: {}", e);
                        // Sleep briefly before retrying
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
            info!("MQTT event loop task exiting");
        });

        self.client = Some(client);
        self.event_loop_task = Some(task);

        Ok(event_rx)
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), MqttError> {
        self.client()?
            .subscribe(topic, QoS::AtLeastOnce)
            .await
            .map_err(|e| MqttError::Subscribe {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: &[u8],
        retain: bool,
    ) -> Result<(), MqttError> {
        self.client()?
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|e| MqttError::Publish {
                topic: topic.to_string(),
                reason: e.to_string(),
            })
    }

    async fn disconnect(&mut self) -> Result<(), MqttError> {
        let client = self.client.take().ok_or(MqttError::NotConnected)?;
        client
            .disconnect()
            .await
            .map_err(|e| MqttError::Disconnect(e.to_string()))?;

        // Let the event loop flush queued publishes and the DISCONNECT itself
        if let Some(task) = self.event_loop_task.take() {
            if tokio::time::timeout(DISCONNECT_GRACE, task).await.is_err() {
                warn!("MQTT event loop did not stop within {:?}", DISCONNECT_GRACE);
            }
        }
        Ok(())
    }
}

impl Drop for RumqttcClient {
    fn drop(&mut self) {
        if let Some(task) = self.event_loop_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> ConnectOptions {
        ConnectOptions {
            client_id: "home-0000000000000001".to_string(),
            last_will: LastWill {
                topic: "home/available".to_string(),
                payload: "offline".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_mock_connect_emits_connected() {
        let mut client = MockMqttClient::new();
        let mut events = client.connect(&options()).await.unwrap();

        assert!(client.is_connected);
        assert!(matches!(events.recv().await, Some(BusEvent::Connected)));
        assert_eq!(
            client.connect_options.unwrap().last_will.topic,
            "home/available"
        );
    }

    #[tokio::test]
    async fn test_mock_publish_failure() {
        let mut client = MockMqttClient::new();
        client.failing_publishes.insert("a/b".to_string());

        let err = client.publish("a/b", b"x", true).await.unwrap_err();
        assert!(matches!(err, MqttError::Publish { .. }));
        assert!(client.publish("a/c", b"y", true).await.is_ok());
        assert_eq!(client.publish_log(), "a/c y (retained)");
    }

    #[test]
    fn test_rumqttc_client_rejects_bad_broker() {
        let config = MqttConfig {
            broker: "tcp://localhost:notaport".to_string(),
            ..MqttConfig::default()
        };
        assert!(RumqttcClient::new(&config).is_err());
    }

    #[tokio::test]
    async fn test_rumqttc_client_requires_connect() {
        let config = MqttConfig {
            broker: "localhost".to_string(),
            ..MqttConfig::default()
        };
        let mut client = RumqttcClient::new(&config).unwrap();
        assert!(matches!(
            client.publish("a", b"x", true).await,
            Err(MqttError::NotConnected)
        ));
        assert!(matches!(
            client.subscribe("a").await,
            Err(MqttError::NotConnected)
        ));
    }
}
