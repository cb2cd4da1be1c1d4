//! # MQTT Integration Module
//!
//! Broker side of the dashboard: one connection to a public broker, subscriptions
//! to the sensor and device topics, and publishing of device commands.
//!
//! ## Module Architecture
//!
//! ```text
//! mqtt/
//! ├── config.rs           - Endpoints, connect options and the topic table
//! ├── transport.rs        - Transport boundary, events and error classification
//! ├── link.rs             - rumqttc transport driven by a typestate link
//! ├── dispatch.rs         - Routing of inbound messages to display updates
//! ├── color.rs            - `#RRGGBB` to `r,g,b` conversion
//! ├── message_manager.rs  - Log entries and the bounded message log
//! └── mqtt_handler.rs     - Connection state, failover and device controls
//! ```
//!
//! ## Data Flow
//!
//! ```text
//! UI command ──► BrokerClient ──► BrokerTransport::send ──► broker
//!
//! broker ──► MqttLink task ──► TransportEvent (mpsc) ──► BrokerClient::handle_event
//!                                                          └─► TopicDispatcher ──► RenderSink
//! ```
//!
//! The link task never touches client state. Everything it observes is turned
//! into a [`transport::TransportEvent`] and applied on the dashboard's event
//! loop, so connection state has exactly one writer.

pub mod color;
pub mod config;
pub mod dispatch;
pub mod link;
pub mod message_manager;
pub mod mqtt_handler;
pub mod transport;
