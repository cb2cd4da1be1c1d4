use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::time::Duration;

pub const CLIENT_ID_PREFIX: &str = "iot_dashboard_";

/// One broker the client may connect to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokerEndpoint {
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub use_tls: bool,
    /// Connect over WebSocket on this path (e.g. `/mqtt`) instead of plain TCP.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub websocket_path: Option<String>,
}

impl BrokerEndpoint {
    pub fn tcp(host: &str, port: u16) -> Self {
        BrokerEndpoint {
            host: host.to_string(),
            port,
            use_tls: false,
            websocket_path: None,
        }
    }

    /// URL form understood by websocket transports, `ws(s)://host:port/path`.
    pub fn websocket_url(&self) -> Option<String> {
        self.websocket_path.as_ref().map(|path| {
            let scheme = if self.use_tls { "wss" } else { "ws" };
            let path = if path.starts_with('/') {
                path.clone()
            } else {
                format!("/{path}")
            };
            format!("{scheme}://{}:{}{}", self.host, self.port, path)
        })
    }
}

impl fmt::Display for BrokerEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.websocket_url() {
            Some(url) => write!(f, "{url}"),
            None => write!(f, "{}:{}", self.host, self.port),
        }
    }
}

/// Broker section of the configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerSettings {
    /// Ordered failover candidates; the first one is used for a manual connect.
    pub endpoints: Vec<BrokerEndpoint>,
    pub username: String,
    pub password: String,
    pub timeout_secs: u64,
    pub keep_alive_secs: u64,
    pub clean_session: bool,
    pub auto_failover: bool,
}

impl Default for BrokerSettings {
    fn default() -> Self {
        BrokerSettings {
            endpoints: vec![
                BrokerEndpoint::tcp("broker.emqx.io", 1883),
                BrokerEndpoint::tcp("test.mosquitto.org", 1883),
                BrokerEndpoint::tcp("broker.hivemq.com", 1883),
            ],
            username: String::new(),
            password: String::new(),
            timeout_secs: 3,
            keep_alive_secs: 60,
            clean_session: true,
            auto_failover: true,
        }
    }
}

impl BrokerSettings {
    pub fn connect_options(&self) -> ConnectOptions {
        let credentials = if self.username.is_empty() {
            None
        } else {
            Some((self.username.clone(), self.password.clone()))
        };
        ConnectOptions {
            timeout: Duration::from_secs(self.timeout_secs.max(1)),
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(5)),
            clean_session: self.clean_session,
            credentials,
        }
    }
}

/// Options handed to the transport for a single connection attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectOptions {
    pub timeout: Duration,
    pub keep_alive: Duration,
    pub clean_session: bool,
    pub credentials: Option<(String, String)>,
}

/// Logical channels of the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Led,
    Motor,
    Rgb,
    Temperature,
    Luminosity,
    Humidity,
    Pressure,
}

impl Channel {
    pub const ALL: [Channel; 7] = [
        Channel::Led,
        Channel::Motor,
        Channel::Rgb,
        Channel::Temperature,
        Channel::Luminosity,
        Channel::Humidity,
        Channel::Pressure,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Channel::Led => "led",
            Channel::Motor => "motor",
            Channel::Rgb => "rgb",
            Channel::Temperature => "temperature",
            Channel::Luminosity => "luminosity",
            Channel::Humidity => "humidity",
            Channel::Pressure => "pressure",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Topic section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicSettings {
    pub led: String,
    pub motor: String,
    pub rgb: String,
    pub temperature: String,
    pub luminosity: String,
    pub humidity: String,
    pub pressure: String,
}

impl Default for TopicSettings {
    fn default() -> Self {
        TopicSettings {
            led: "fatec/iot/led".to_string(),
            motor: "fatec/iot/motor".to_string(),
            rgb: "fatec/iot/rgb".to_string(),
            temperature: "fatec/iot/sensor/temperature".to_string(),
            luminosity: "fatec/iot/sensor/luminosity".to_string(),
            humidity: "fatec/iot/sensor/humidity".to_string(),
            pressure: "fatec/iot/sensor/pressure".to_string(),
        }
    }
}

impl TopicSettings {
    fn topic(&self, channel: Channel) -> &str {
        match channel {
            Channel::Led => &self.led,
            Channel::Motor => &self.motor,
            Channel::Rgb => &self.rgb,
            Channel::Temperature => &self.temperature,
            Channel::Luminosity => &self.luminosity,
            Channel::Humidity => &self.humidity,
            Channel::Pressure => &self.pressure,
        }
    }

    /// First wire topic assigned to more than one channel, if any.
    pub fn duplicate_topic(&self) -> Option<&str> {
        let mut seen = HashSet::new();
        Channel::ALL
            .iter()
            .map(|channel| self.topic(*channel))
            .find(|topic| !seen.insert(*topic))
    }
}

/// Fixed channel <-> wire topic table, built once from configuration.
#[derive(Debug, Clone)]
pub struct TopicMap {
    by_channel: HashMap<Channel, String>,
    by_topic: HashMap<String, Channel>,
}

impl TopicMap {
    pub fn from_settings(settings: &TopicSettings) -> Self {
        let mut by_channel = HashMap::new();
        let mut by_topic = HashMap::new();
        for channel in Channel::ALL {
            let topic = settings.topic(channel).to_string();
            by_topic.insert(topic.clone(), channel);
            by_channel.insert(channel, topic);
        }
        TopicMap {
            by_channel,
            by_topic,
        }
    }

    pub fn topic(&self, channel: Channel) -> &str {
        // every channel is inserted in from_settings
        self.by_channel
            .get(&channel)
            .map(String::as_str)
            .unwrap_or_default()
    }

    /// Exact string match, no wildcard semantics.
    pub fn channel(&self, topic: &str) -> Option<Channel> {
        self.by_topic.get(topic).copied()
    }

    /// Subscription order is the declaration order of [`Channel::ALL`].
    pub fn topics(&self) -> Vec<String> {
        Channel::ALL
            .iter()
            .map(|channel| self.topic(*channel).to_string())
            .collect()
    }
}

impl Default for TopicMap {
    fn default() -> Self {
        TopicMap::from_settings(&TopicSettings::default())
    }
}
