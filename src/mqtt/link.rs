//! rumqttc-backed broker transport with a statum-driven event loop.
//!
//! # State Machine
//!
//! ```text
//! Configured ──establish──► Established ──run_until_shutdown──► Closed
//!     │                          │
//!     └── CONNACK refused /      └── poll error: ConnectionLost event
//!         timeout: error             DISCONNECT sent / shutdown: silent
//! ```
//!
//! The established link runs in its own tokio task and forwards everything the
//! Broker Client needs to know as [`TransportEvent`]s.

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Outgoing,
    Packet, QoS, SubscribeReasonCode, Transport,
};
use statum::{machine, state};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, trace, warn};

use super::config::{BrokerEndpoint, ConnectOptions};
use super::transport::{BrokerTransport, QosLevel, TransportError, TransportEvent};

const REQUEST_CAPACITY: usize = 100;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[state]
#[derive(Debug, Clone)]
pub enum LinkState {
    Configured,  // Event loop created, nothing on the wire yet
    Established, // CONNACK received, polling for traffic
    Closed,      // Event loop stopped, no further events
}

#[machine]
pub struct MqttLink<S: LinkState> {
    event_loop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    pending_subscriptions: Arc<Mutex<VecDeque<String>>>,
    in_flight: HashMap<u16, String>,
    endpoint: String,
}

impl<S: LinkState> MqttLink<S> {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl MqttLink<Configured> {
    pub fn create(
        event_loop: EventLoop,
        events: mpsc::Sender<TransportEvent>,
        pending_subscriptions: Arc<Mutex<VecDeque<String>>>,
        endpoint: String,
    ) -> Self {
        debug!("Creating MQTT link for {}", endpoint);
        Self::new(
            event_loop,
            events,
            pending_subscriptions,
            HashMap::new(),
            endpoint,
        )
    }

    /// Polls until the broker acknowledged the connection.
    ///
    /// The caller bounds this with the configured connect timeout.
    pub async fn establish(mut self) -> Result<MqttLink<Established>, TransportError> {
        loop {
            match self.event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    if ack.code == ConnectReturnCode::Success {
                        info!("MQTT link established with {}", self.endpoint);
                        return Ok(self.transition());
                    }
                    warn!("Broker {} refused connection: {:?}", self.endpoint, ack.code);
                    return Err(TransportError::Refused(format!("{:?}", ack.code)));
                }
                Ok(event) => trace!("Pre-CONNACK event: {:?}", event),
                Err(e) => {
                    warn!("Connecting to {} failed: {}", self.endpoint, e);
                    return Err(classify_connection_error(e));
                }
            }
        }
    }
}

impl MqttLink<Established> {
    /// Drives the event loop until the link closes.
    ///
    /// A poll error is reported as connection loss. A locally requested
    /// DISCONNECT or a shutdown signal closes silently.
    pub async fn run_until_shutdown(
        mut self,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) -> MqttLink<Closed> {
        info!("Starting MQTT event loop for {}", self.endpoint);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    info!("Shutdown signal received for {}", self.endpoint);
                    break;
                }

                polled = self.event_loop.poll() => {
                    match polled {
                        Ok(event) => {
                            if self.handle_event(event).await {
                                info!("Disconnect sent to {}", self.endpoint);
                                break;
                            }
                        }
                        Err(e) => {
                            warn!("Connection to {} lost: {}", self.endpoint, e);
                            self.emit(TransportEvent::ConnectionLost {
                                reason: e.to_string(),
                            })
                            .await;
                            break;
                        }
                    }
                }
            }
        }

        self.transition()
    }

    /// Returns `true` once our own DISCONNECT went out.
    async fn handle_event(&mut self, event: Event) -> bool {
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                let payload = String::from_utf8_lossy(&publish.payload).into_owned();
                debug!("Message on {}: {}", publish.topic, payload);
                self.emit(TransportEvent::MessageArrived {
                    topic: publish.topic,
                    payload,
                })
                .await;
            }
            Event::Outgoing(Outgoing::Subscribe(pkid)) => {
                let topic = match self.pending_subscriptions.lock() {
                    Ok(mut queue) => queue.pop_front(),
                    Err(e) => {
                        error!("Subscription queue poisoned: {}", e);
                        None
                    }
                };
                if let Some(topic) = topic {
                    self.in_flight.insert(pkid, topic);
                }
            }
            Event::Incoming(Packet::SubAck(ack)) => {
                let topic = self.in_flight.remove(&ack.pkid).unwrap_or_default();
                let rejected = ack
                    .return_codes
                    .iter()
                    .any(|code| matches!(code, SubscribeReasonCode::Failure));
                if rejected {
                    warn!("Broker rejected subscription to {}", topic);
                    self.emit(TransportEvent::SubscriptionRejected { topic })
                        .await;
                } else {
                    debug!("Subscription to {} acknowledged", topic);
                }
            }
            Event::Outgoing(Outgoing::Disconnect) => return true,
            other => trace!("MQTT event: {:?}", other),
        }
        false
    }

    async fn emit(&mut self, event: TransportEvent) {
        if self.events.send(event).await.is_err() {
            debug!("Transport event receiver dropped");
        }
    }
}

impl MqttLink<Closed> {}

fn classify_connection_error(error: ConnectionError) -> TransportError {
    match error {
        ConnectionError::ConnectionRefused(code) => TransportError::Refused(format!("{code:?}")),
        ConnectionError::NetworkTimeout => TransportError::Timeout(0),
        ConnectionError::Io(e) => TransportError::Unreachable(e.to_string()),
        ConnectionError::Tls(e) => TransportError::Tls(e.to_string()),
        other => TransportError::Request(other.to_string()),
    }
}

fn mqtt_options(
    endpoint: &BrokerEndpoint,
    client_id: &str,
    options: &ConnectOptions,
) -> MqttOptions {
    let mut mqtt_options = match endpoint.websocket_url() {
        Some(url) => MqttOptions::new(client_id, url, endpoint.port),
        None => MqttOptions::new(client_id, endpoint.host.clone(), endpoint.port),
    };
    mqtt_options
        .set_keep_alive(options.keep_alive)
        .set_clean_session(options.clean_session);

    if let Some((user, password)) = &options.credentials {
        mqtt_options.set_credentials(user.clone(), password.clone());
    }

    let transport = match (endpoint.websocket_path.is_some(), endpoint.use_tls) {
        (false, false) => Transport::Tcp,
        (false, true) => Transport::tls_with_default_config(),
        (true, false) => Transport::Ws,
        (true, true) => Transport::wss_with_default_config(),
    };
    mqtt_options.set_transport(transport);
    mqtt_options
}

struct LinkSession {
    client: AsyncClient,
    pending_subscriptions: Arc<Mutex<VecDeque<String>>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl LinkSession {
    async fn close(mut self) {
        // give the event loop a moment to flush DISCONNECT before forcing it down
        match tokio::time::timeout(CLOSE_GRACE, &mut self.task).await {
            Ok(_) => debug!("MQTT event loop finished"),
            Err(_) => {
                if let Some(tx) = self.shutdown_tx.take() {
                    let _ = tx.send(());
                }
                if let Err(e) = self.task.await {
                    error!("MQTT event loop task failed: {}", e);
                }
            }
        }
    }
}

/// [`BrokerTransport`] over rumqttc.
pub struct RumqttTransport {
    events: mpsc::Sender<TransportEvent>,
    session: Option<LinkSession>,
}

impl RumqttTransport {
    pub fn new(events: mpsc::Sender<TransportEvent>) -> Self {
        RumqttTransport {
            events,
            session: None,
        }
    }

    async fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            if let Some(tx) = session.shutdown_tx.take() {
                let _ = tx.send(());
            }
            session.close().await;
        }
    }
}

#[async_trait]
impl BrokerTransport for RumqttTransport {
    async fn connect(
        &mut self,
        endpoint: &BrokerEndpoint,
        client_id: &str,
        options: &ConnectOptions,
    ) -> Result<(), TransportError> {
        // a lost link may still hold its task handle
        self.drop_session().await;

        let (client, event_loop) =
            AsyncClient::new(mqtt_options(endpoint, client_id, options), REQUEST_CAPACITY);
        let pending_subscriptions = Arc::new(Mutex::new(VecDeque::new()));
        let link = MqttLink::create(
            event_loop,
            self.events.clone(),
            pending_subscriptions.clone(),
            endpoint.to_string(),
        );

        let established = match tokio::time::timeout(options.timeout, link.establish()).await {
            Ok(result) => result?,
            Err(_) => return Err(TransportError::Timeout(options.timeout.as_secs())),
        };

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(async move {
            let closed = established.run_until_shutdown(shutdown_rx).await;
            debug!("MQTT link to {} closed", closed.endpoint());
        });

        self.session = Some(LinkSession {
            client,
            pending_subscriptions,
            shutdown_tx: Some(shutdown_tx),
            task,
        });
        Ok(())
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        if let Ok(mut queue) = session.pending_subscriptions.lock() {
            queue.push_back(topic.to_string());
        }
        session
            .client
            .subscribe(topic, QoS::AtMostOnce)
            .await
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    fn send(&mut self, topic: &str, payload: &str, qos: QosLevel) -> Result<(), TransportError> {
        let session = self.session.as_ref().ok_or(TransportError::NotConnected)?;
        session
            .client
            .try_publish(topic, qos.into(), false, payload.as_bytes().to_vec())
            .map_err(|e| TransportError::Request(e.to_string()))
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        let session = self.session.take().ok_or(TransportError::NotConnected)?;
        let result = session
            .client
            .disconnect()
            .await
            .map_err(|e| TransportError::Request(e.to_string()));
        session.close().await;
        result
    }
}
