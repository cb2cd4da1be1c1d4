use chrono::{DateTime, Local};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::color::{ColorError, Rgb};
use super::config::{
    BrokerEndpoint, BrokerSettings, Channel, ConnectOptions, TopicMap, CLIENT_ID_PREFIX,
};
use super::dispatch::{DispatchOutcome, TopicDispatcher};
use super::message_manager::{InboundMessage, LogDirection, MessageLog};
use super::transport::{BrokerTransport, QosLevel, TransportError, TransportEvent};
use crate::ui::common::dashboard;
use crate::ui::RenderSink;

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Lost,
}

#[derive(Clone, Debug, Default)]
pub struct MqttStatus {
    pub connection_state: ConnectionState,
    pub messages_received: usize,
    pub messages_sent: usize,
    pub last_activity: Option<DateTime<Local>>,
}

#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("not connected to a broker")]
    NotConnected,

    #[error("invalid color: {0}")]
    InvalidColor(#[from] ColorError),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("no broker accepted the connection after {attempts} attempts")]
    FailoverExhausted { attempts: usize },

    #[error("no broker endpoints configured")]
    NoEndpoints,
}

pub fn generate_client_id() -> String {
    format!(
        "{}{:06x}",
        CLIENT_ID_PREFIX,
        rand::random::<u32>() & 0x00FF_FFFF
    )
}

/// Owns the single broker connection of the dashboard.
pub struct BrokerClient {
    transport: Box<dyn BrokerTransport>,
    settings: BrokerSettings,
    options: ConnectOptions,
    client_id: String,
    endpoint_index: usize,
    status: MqttStatus,
    dispatcher: TopicDispatcher,
    log: MessageLog,
    sink: Arc<dyn RenderSink>,
}

impl BrokerClient {
    pub fn new(
        transport: Box<dyn BrokerTransport>,
        settings: BrokerSettings,
        topics: TopicMap,
        log_capacity: usize,
        sink: Arc<dyn RenderSink>,
    ) -> Self {
        let client_id = generate_client_id();
        info!("Initializing MQTT client {}", client_id);

        let client = BrokerClient {
            transport,
            options: settings.connect_options(),
            settings,
            client_id,
            endpoint_index: 0,
            status: MqttStatus::default(),
            dispatcher: TopicDispatcher::new(topics, sink.clone()),
            log: MessageLog::new(log_capacity, sink.clone()),
            sink,
        };
        client.update_ui();
        client
    }

    pub fn state(&self) -> ConnectionState {
        self.status.connection_state
    }

    pub fn status(&self) -> &MqttStatus {
        &self.status
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn log(&self) -> &MessageLog {
        &self.log
    }

    pub fn current_endpoint(&self) -> Option<&BrokerEndpoint> {
        self.settings.endpoints.get(self.endpoint_index)
    }

    /// No-op with a warning while a connection exists or is being set up.
    ///
    /// A failed attempt leaves the client `Disconnected`; with `auto_failover`
    /// the remaining endpoints are tried before giving up.
    pub async fn connect(&mut self) -> Result<(), BrokerError> {
        if self.is_busy() {
            warn!("Connect requested while {:?}", self.state());
            self.log
                .push(LogDirection::Warning, "⚠️ Já conectado ao broker");
            return Ok(());
        }

        match self.attempt_connect().await {
            Ok(()) => Ok(()),
            Err(e) if self.settings.auto_failover && self.settings.endpoints.len() > 1 => {
                debug!("Primary broker failed ({}), starting failover", e);
                let remaining = self.settings.endpoints.len() - 1;
                self.rotate_through(remaining).await
            }
            Err(e) => Err(e),
        }
    }

    /// Tries the following endpoints in order (wrapping around), at most once each.
    ///
    /// After a full cycle without success the client stays `Disconnected` and
    /// only a manual [`connect`](Self::connect) starts over.
    pub async fn failover(&mut self) -> Result<(), BrokerError> {
        if self.is_busy() {
            warn!("Failover requested while {:?}", self.state());
            return Ok(());
        }
        let candidates = self.settings.endpoints.len();
        self.rotate_through(candidates).await
    }

    async fn rotate_through(&mut self, attempts: usize) -> Result<(), BrokerError> {
        let candidates = self.settings.endpoints.len();
        if candidates == 0 {
            return Err(BrokerError::NoEndpoints);
        }

        for attempt in 1..=attempts {
            self.endpoint_index = (self.endpoint_index + 1) % candidates;
            if let Some(endpoint) = self.current_endpoint() {
                info!("Failover attempt {}/{} to {}", attempt, attempts, endpoint);
                let line = format!("🔁 Tentando broker alternativo: {}", endpoint);
                self.log.push(LogDirection::Info, line);
            }
            if self.attempt_connect().await.is_ok() {
                return Ok(());
            }
        }

        error!("Failover gave up after {} attempts", attempts);
        self.log.push(
            LogDirection::Error,
            "❌ Nenhum broker disponível. Conecte manualmente para tentar novamente.",
        );
        Err(BrokerError::FailoverExhausted { attempts })
    }

    async fn attempt_connect(&mut self) -> Result<(), BrokerError> {
        let endpoint = self
            .current_endpoint()
            .cloned()
            .ok_or(BrokerError::NoEndpoints)?;

        self.set_state(ConnectionState::Connecting);
        self.log
            .push(LogDirection::Info, "🔄 Conectando ao broker...");
        info!("Connecting to {} as {}", endpoint, self.client_id);

        match self
            .transport
            .connect(&endpoint, &self.client_id, &self.options)
            .await
        {
            Ok(()) => {
                self.on_connect_success(&endpoint).await;
                Ok(())
            }
            Err(e) => {
                error!("MQTT connection to {} failed: {}", endpoint, e);
                self.set_state(ConnectionState::Disconnected);
                self.log.push(
                    LogDirection::Error,
                    format!("❌ Falha na conexão: {}", e.user_reason()),
                );
                Err(e.into())
            }
        }
    }

    async fn on_connect_success(&mut self, endpoint: &BrokerEndpoint) {
        info!("Connected to MQTT broker {}", endpoint);
        self.set_state(ConnectionState::Connected);
        self.status.last_activity = Some(Local::now());
        self.log
            .push(LogDirection::Success, "✅ Conectado ao broker MQTT");

        for topic in self.dispatcher.topics().topics() {
            match self.transport.subscribe(&topic).await {
                Ok(()) => {
                    debug!("Subscribed to {}", topic);
                    self.log
                        .push(LogDirection::Info, format!("📝 Inscrito em: {}", topic));
                }
                Err(e) => {
                    warn!("Subscription to {} failed: {}", topic, e);
                    self.log.push(
                        LogDirection::Error,
                        format!("❌ Falha ao inscrever em: {}", topic),
                    );
                }
            }
        }
    }

    /// Applies an asynchronous notification from the transport.
    pub async fn handle_event(&mut self, event: TransportEvent) -> Result<(), BrokerError> {
        match event {
            TransportEvent::MessageArrived { topic, payload } => {
                self.on_message(topic, payload);
                Ok(())
            }
            TransportEvent::ConnectionLost { reason } => {
                if self.state() != ConnectionState::Connected {
                    debug!("Ignoring connection loss while {:?}", self.state());
                    return Ok(());
                }
                warn!("MQTT connection lost: {}", reason);
                self.set_state(ConnectionState::Lost);
                self.log.push(
                    LogDirection::Warning,
                    format!("🔌 Conexão perdida: {}", reason),
                );
                if self.settings.auto_failover {
                    self.failover().await
                } else {
                    Ok(())
                }
            }
            TransportEvent::SubscriptionRejected { topic } => {
                self.log.push(
                    LogDirection::Error,
                    format!("❌ Inscrição recusada: {}", topic),
                );
                Ok(())
            }
        }
    }

    pub fn on_message(&mut self, topic: String, payload: String) -> DispatchOutcome {
        self.status.messages_received += 1;
        self.status.last_activity = Some(Local::now());
        let message = InboundMessage::from_topic(topic, payload);
        self.dispatcher.dispatch(&message, &mut self.log)
    }

    /// Sends at QoS 0. Fails without logging an outgoing line unless connected.
    pub fn publish(&mut self, channel: Channel, payload: &str) -> Result<(), BrokerError> {
        if self.state() != ConnectionState::Connected {
            warn!("Publish to {} while {:?}", channel, self.state());
            self.log
                .push(LogDirection::Error, "❌ Não conectado ao broker");
            return Err(BrokerError::NotConnected);
        }

        let topic = self.dispatcher.topics().topic(channel).to_string();
        if let Err(e) = self.transport.send(&topic, payload, QosLevel::AtMostOnce) {
            error!("Publishing to {} failed: {}", topic, e);
            self.log
                .push(LogDirection::Error, format!("❌ Erro ao publicar: {}", e));
            return Err(e.into());
        }

        debug!("Published {} to {}", payload, topic);
        self.status.messages_sent += 1;
        self.status.last_activity = Some(Local::now());
        self.log.push(
            LogDirection::Outgoing,
            format!("📤 [{}]: {}", topic, payload),
        );
        Ok(())
    }

    pub fn control_led(&mut self, state: &str) -> Result<(), BrokerError> {
        self.publish(Channel::Led, state)
    }

    pub fn control_motor(&mut self, state: &str) -> Result<(), BrokerError> {
        self.publish(Channel::Motor, state)
    }

    /// Publishes `#RRGGBB` as `r,g,b`; malformed colours never reach the broker.
    pub fn control_rgb(&mut self, color: &str) -> Result<(), BrokerError> {
        let rgb = match Rgb::from_hex(color) {
            Ok(rgb) => rgb,
            Err(e) => {
                warn!("Rejected color {:?}: {}", color, e);
                self.log
                    .push(LogDirection::Error, format!("❌ Cor inválida: {}", color));
                return Err(e.into());
            }
        };
        self.publish(Channel::Rgb, &rgb.to_string())?;
        self.sink.set_text(dashboard::COLOR_STATUS, &rgb.to_hex());
        Ok(())
    }

    pub async fn disconnect(&mut self) -> Result<(), BrokerError> {
        if self.state() != ConnectionState::Connected {
            debug!("Disconnect ignored while {:?}", self.state());
            return Ok(());
        }

        if let Err(e) = self.transport.disconnect().await {
            warn!("Transport teardown reported: {}", e);
        }
        self.set_state(ConnectionState::Disconnected);
        self.log
            .push(LogDirection::Info, "🔌 Desconectado do broker");
        info!("Disconnected from MQTT broker");
        Ok(())
    }

    /// Settles a connect whose future was dropped before the broker answered.
    pub fn abandon_connect(&mut self) {
        if self.state() == ConnectionState::Connecting {
            warn!("Connect to broker abandoned");
            self.set_state(ConnectionState::Disconnected);
            self.log
                .push(LogDirection::Warning, "⚠️ Conexão cancelada");
        }
    }

    pub fn clear_log(&mut self) {
        self.log.clear();
    }

    fn is_busy(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Connecting
        )
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.status.connection_state != state {
            debug!(
                "MQTT state {:?} -> {:?}",
                self.status.connection_state, state
            );
        }
        self.status.connection_state = state;
        self.update_ui();
    }

    fn update_ui(&self) {
        let connected = self.state() == ConnectionState::Connected;
        let (label, class) = if connected {
            ("Conectado", "status-badge connected")
        } else {
            ("Desconectado", "status-badge disconnected")
        };
        self.sink.set_text(dashboard::MQTT_STATUS, label);
        self.sink.set_class(dashboard::MQTT_STATUS, class);
        self.sink
            .set_enabled(dashboard::CONNECT_BUTTON, !self.is_busy());
        self.sink.set_enabled(dashboard::DISCONNECT_BUTTON, connected);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeTransport, RecordingSink};

    fn settings(hosts: &[&str], auto_failover: bool) -> BrokerSettings {
        BrokerSettings {
            endpoints: hosts
                .iter()
                .map(|host| BrokerEndpoint::tcp(host, 1883))
                .collect(),
            auto_failover,
            ..BrokerSettings::default()
        }
    }

    fn client(
        transport: &FakeTransport,
        settings: BrokerSettings,
    ) -> (BrokerClient, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::default());
        let client = BrokerClient::new(
            Box::new(transport.clone()),
            settings,
            TopicMap::default(),
            100,
            sink.clone(),
        );
        (client, sink)
    }

    #[test]
    fn client_id_has_prefix_and_random_suffix() {
        let id = generate_client_id();
        let suffix = id.strip_prefix("iot_dashboard_").unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[tokio::test]
    async fn connect_subscribes_every_topic() {
        let transport = FakeTransport::default();
        let (mut client, sink) = client(&transport, settings(&["a"], false));

        client.connect().await.unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(transport.subscriptions(), TopicMap::default().topics());
        assert_eq!(
            sink.last_text(dashboard::MQTT_STATUS).as_deref(),
            Some("Conectado")
        );
        assert_eq!(sink.last_enabled(dashboard::CONNECT_BUTTON), Some(false));
        assert_eq!(sink.last_enabled(dashboard::DISCONNECT_BUTTON), Some(true));

        let (_, _, options) = transport.log.lock().unwrap().connects[0].clone();
        assert!(options.clean_session);
        assert_eq!(options.keep_alive.as_secs(), 60);
    }

    #[tokio::test]
    async fn second_connect_is_a_no_op() {
        let transport = FakeTransport::default();
        let (mut client, _sink) = client(&transport, settings(&["a"], false));

        client.connect().await.unwrap();
        client.connect().await.unwrap();

        assert_eq!(transport.connect_count(), 1);
        assert_eq!(client.log().count(LogDirection::Warning), 1);
    }

    #[tokio::test]
    async fn abandoned_connect_settles_disconnected() {
        let transport = FakeTransport {
            connect_delay: Some(std::time::Duration::from_secs(5)),
            ..FakeTransport::default()
        };
        let (mut client, sink) = client(&transport, settings(&["a"], false));

        let attempt =
            tokio::time::timeout(std::time::Duration::from_millis(50), client.connect()).await;
        assert!(attempt.is_err());
        assert_eq!(client.state(), ConnectionState::Connecting);

        client.abandon_connect();
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert_eq!(sink.last_enabled(dashboard::CONNECT_BUTTON), Some(true));
        assert_eq!(client.log().count(LogDirection::Warning), 1);
    }

    #[tokio::test]
    async fn failed_connect_leaves_disconnected_without_subscriptions() {
        let transport = FakeTransport::failing_connects(1);
        let (mut client, sink) = client(&transport, settings(&["a"], false));

        let result = client.connect().await;

        assert!(matches!(
            result,
            Err(BrokerError::Transport(TransportError::Refused(_)))
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(transport.subscriptions().is_empty());
        assert_eq!(
            sink.last_text(dashboard::MQTT_STATUS).as_deref(),
            Some("Desconectado")
        );
        assert_eq!(sink.last_enabled(dashboard::CONNECT_BUTTON), Some(true));
    }

    #[tokio::test]
    async fn failover_moves_to_next_endpoint() {
        let transport = FakeTransport::failing_connects(2);
        let (mut client, _sink) = client(&transport, settings(&["a", "b", "c"], true));

        client.connect().await.unwrap();

        assert_eq!(transport.connected_hosts(), vec!["a", "b", "c"]);
        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(client.current_endpoint().unwrap().host, "c");
    }

    #[tokio::test]
    async fn failover_gives_up_after_one_cycle() {
        let transport = FakeTransport::failing_connects(10);
        let (mut client, _sink) = client(&transport, settings(&["a", "b", "c"], true));

        let result = client.connect().await;

        assert!(matches!(
            result,
            Err(BrokerError::FailoverExhausted { attempts: 2 })
        ));
        assert_eq!(transport.connect_count(), 3);
        assert_eq!(client.state(), ConnectionState::Disconnected);

        // a manual failover cycles once more through all candidates
        let result = client.failover().await;
        assert!(matches!(
            result,
            Err(BrokerError::FailoverExhausted { attempts: 3 })
        ));
        assert_eq!(transport.connect_count(), 6);
    }

    #[tokio::test]
    async fn lost_connection_waits_for_manual_action_without_failover() {
        let transport = FakeTransport::default();
        let (mut client, _sink) = client(&transport, settings(&["a", "b"], false));
        client.connect().await.unwrap();

        client
            .handle_event(TransportEvent::ConnectionLost {
                reason: "keep alive timeout".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(client.state(), ConnectionState::Lost);
        assert_eq!(transport.connect_count(), 1);

        client.connect().await.unwrap();
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn lost_connection_fails_over_when_enabled() {
        let transport = FakeTransport::default();
        let (mut client, _sink) = client(&transport, settings(&["a", "b"], true));
        client.connect().await.unwrap();

        client
            .handle_event(TransportEvent::ConnectionLost {
                reason: "eof".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(transport.connected_hosts(), vec!["a", "b"]);
        assert_eq!(client.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn publish_requires_connection() {
        let transport = FakeTransport::default();
        let (mut client, sink) = client(&transport, settings(&["a"], false));

        let result = client.publish(Channel::Led, "ON");

        assert!(matches!(result, Err(BrokerError::NotConnected)));
        assert!(transport.sent().is_empty());
        assert_eq!(sink.log_count(LogDirection::Outgoing), 0);
        assert_eq!(client.log().count(LogDirection::Error), 1);
    }

    #[tokio::test]
    async fn rgb_control_publishes_triple() {
        let transport = FakeTransport::default();
        let (mut client, sink) = client(&transport, settings(&["a"], false));
        client.connect().await.unwrap();

        client.control_rgb("#00FF80").unwrap();

        assert_eq!(
            transport.sent(),
            vec![(
                "fatec/iot/rgb".to_string(),
                "0,255,128".to_string(),
                QosLevel::AtMostOnce
            )]
        );
        assert_eq!(
            sink.last_text(dashboard::COLOR_STATUS).as_deref(),
            Some("#00FF80")
        );
        assert_eq!(client.status().messages_sent, 1);
        assert_eq!(client.log().count(LogDirection::Outgoing), 1);
    }

    #[tokio::test]
    async fn malformed_rgb_is_not_published() {
        let transport = FakeTransport::default();
        let (mut client, _sink) = client(&transport, settings(&["a"], false));
        client.connect().await.unwrap();

        let result = client.control_rgb("#ZZ");

        assert!(matches!(result, Err(BrokerError::InvalidColor(_))));
        assert!(transport.sent().is_empty());
    }

    #[tokio::test]
    async fn led_and_motor_use_their_topics() {
        let transport = FakeTransport::default();
        let (mut client, _sink) = client(&transport, settings(&["a"], false));
        client.connect().await.unwrap();

        client.control_led("ON").unwrap();
        client.control_motor("OFF").unwrap();

        let topics: Vec<_> = transport.sent().into_iter().map(|(t, _, _)| t).collect();
        assert_eq!(topics, vec!["fatec/iot/led", "fatec/iot/motor"]);
    }

    #[tokio::test]
    async fn rejected_subscription_keeps_connection() {
        let transport = FakeTransport::default();
        transport
            .rejected_topics
            .lock()
            .unwrap()
            .push("fatec/iot/motor".to_string());
        let (mut client, _sink) = client(&transport, settings(&["a"], false));

        client.connect().await.unwrap();

        assert_eq!(client.state(), ConnectionState::Connected);
        assert_eq!(transport.subscriptions().len(), 6);
        assert!(client
            .log()
            .entries()
            .any(|e| e.text == "❌ Falha ao inscrever em: fatec/iot/motor"));
    }

    #[tokio::test]
    async fn disconnect_only_when_connected() {
        let transport = FakeTransport::default();
        let (mut client, _sink) = client(&transport, settings(&["a"], false));

        client.disconnect().await.unwrap();
        assert_eq!(transport.log.lock().unwrap().disconnects, 0);

        client.connect().await.unwrap();
        client.disconnect().await.unwrap();
        assert_eq!(transport.log.lock().unwrap().disconnects, 1);
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn inbound_message_is_dispatched_and_counted() {
        let transport = FakeTransport::default();
        let (mut client, sink) = client(&transport, settings(&["a"], false));
        client.connect().await.unwrap();

        client
            .handle_event(TransportEvent::MessageArrived {
                topic: "fatec/iot/sensor/temperature".to_string(),
                payload: "23.5".to_string(),
            })
            .await
            .unwrap();

        assert_eq!(sink.last_text("temperature-value").as_deref(), Some("23.5"));
        assert_eq!(client.status().messages_received, 1);
    }
}
