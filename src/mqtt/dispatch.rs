//! Inbound message routing.
//!
//! A plain topic -> channel table. Every message produces exactly one effect:
//! a field update plus its log line, or a generic log line for unknown topics.

use std::sync::Arc;
use tracing::debug;

use super::config::{Channel, TopicMap};
use super::message_manager::{InboundMessage, LogDirection, MessageLog};
use crate::ui::common::dashboard;
use crate::ui::RenderSink;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Updated(Channel),
    Unmatched,
}

/// Element ids for a sensor reading: value and time of arrival.
fn sensor_elements(channel: Channel) -> Option<(&'static str, &'static str)> {
    match channel {
        Channel::Temperature => Some(("temperature-value", "temp-time")),
        Channel::Luminosity => Some(("luminosity-value", "luminosity-time")),
        Channel::Humidity => Some(("humidity-value", "humidity-time")),
        Channel::Pressure => Some(("pressure-value", "pressure-time")),
        _ => None,
    }
}

pub struct TopicDispatcher {
    topics: TopicMap,
    sink: Arc<dyn RenderSink>,
}

impl TopicDispatcher {
    pub fn new(topics: TopicMap, sink: Arc<dyn RenderSink>) -> Self {
        TopicDispatcher { topics, sink }
    }

    pub fn topics(&self) -> &TopicMap {
        &self.topics
    }

    pub fn dispatch(&self, message: &InboundMessage, log: &mut MessageLog) -> DispatchOutcome {
        let Some(channel) = self.topics.channel(&message.topic) else {
            debug!("No channel for topic {}", message.topic);
            log.push(
                LogDirection::Incoming,
                format!("📨 [{}]: {}", message.topic, message.payload),
            );
            return DispatchOutcome::Unmatched;
        };

        match channel {
            Channel::Temperature | Channel::Luminosity | Channel::Humidity | Channel::Pressure => {
                if let Some((value_id, time_id)) = sensor_elements(channel) {
                    self.sink.set_text(value_id, &message.payload);
                    self.sink.set_text(time_id, &message.time_label());
                }
                log.push(
                    LogDirection::Incoming,
                    format!("📊 {}: {}", channel, message.payload),
                );
            }
            Channel::Led | Channel::Motor => {
                let status_id = format!("{}-status", channel);
                self.sink.set_text(&status_id, &message.payload);
                self.sink.set_class(
                    &status_id,
                    &format!("status-value {}", message.payload.to_lowercase()),
                );
                log.push(
                    LogDirection::Incoming,
                    format!("⚡ {} {}", channel, message.payload),
                );
            }
            Channel::Rgb => {
                self.sink.set_text(dashboard::COLOR_STATUS, &message.payload);
                log.push(
                    LogDirection::Incoming,
                    format!("🎨 {} {}", channel, message.payload),
                );
            }
        }

        DispatchOutcome::Updated(channel)
    }
}
