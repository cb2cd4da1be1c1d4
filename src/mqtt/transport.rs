//! Broker transport boundary.
//!
//! The Broker Client only sees this trait. Requests are awaited, asynchronous
//! notifications (inbound messages, connection loss) arrive as [`TransportEvent`]s
//! on the channel handed to the transport at construction.

use async_trait::async_trait;
use thiserror::Error;

use super::config::{BrokerEndpoint, ConnectOptions};

/// Delivery level for outgoing messages. Device commands are
/// fire-and-forget, so only QoS 0 is offered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QosLevel {
    AtMostOnce,
}

impl From<QosLevel> for rumqttc::QoS {
    fn from(qos: QosLevel) -> Self {
        match qos {
            QosLevel::AtMostOnce => rumqttc::QoS::AtMostOnce,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    MessageArrived { topic: String, payload: String },
    ConnectionLost { reason: String },
    SubscriptionRejected { topic: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("connection timed out after {0}s")]
    Timeout(u64),

    #[error("broker refused the connection: {0}")]
    Refused(String),

    #[error("broker unreachable: {0}")]
    Unreachable(String),

    #[error("TLS error: {0}")]
    Tls(String),

    #[error("not connected")]
    NotConnected,

    #[error("request failed: {0}")]
    Request(String),
}

impl TransportError {
    /// Short Portuguese reason shown in the broker log.
    pub fn user_reason(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "tempo de conexão esgotado",
            TransportError::Refused(_) => "conexão recusada pelo broker",
            TransportError::Unreachable(_) => "broker inacessível",
            TransportError::Tls(_) => "erro de segurança (TLS)",
            TransportError::NotConnected => "não conectado",
            TransportError::Request(_) => "erro na requisição",
        }
    }
}

#[async_trait]
pub trait BrokerTransport: Send {
    /// Opens a connection and resolves once the broker acknowledged it.
    async fn connect(
        &mut self,
        endpoint: &BrokerEndpoint,
        client_id: &str,
        options: &ConnectOptions,
    ) -> Result<(), TransportError>;

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError>;

    /// Fire-and-forget publish, no acknowledgement tracking.
    fn send(&mut self, topic: &str, payload: &str, qos: QosLevel) -> Result<(), TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}
