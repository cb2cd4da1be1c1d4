//! # UI Common Definitions
//!
//! Shared vocabulary between the dashboard components and whatever renders them:
//! screen identifiers, element ids and message severities.
//!
//! ## Why This Module Exists
//!
//! The Session Manager and the Broker Client never talk to each other. They only
//! meet in the page they both draw into. Keeping the element ids in one place
//! makes that shared page explicit and keeps both components from inventing
//! their own names for the same widget.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Top-level screens of the dashboard.
///
/// Exactly one screen is visible at a time. Which one is decided by the session
/// state alone: no user means [`Screen::Login`], a user means [`Screen::Dashboard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Screen {
    /// Credential form, password reset and federated sign-in
    Login,
    /// Sensor readings, device controls and the broker log
    Dashboard,
}

impl fmt::Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Screen::Login => write!(f, "login-screen"),
            Screen::Dashboard => write!(f, "dashboard-screen"),
        }
    }
}

/// Severity of a user-facing message, drives styling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Success,
    Info,
    Warning,
    Error,
}

impl MessageKind {
    pub fn css_class(&self) -> &'static str {
        match self {
            MessageKind::Success => "success",
            MessageKind::Info => "info",
            MessageKind::Warning => "warning",
            MessageKind::Error => "error",
        }
    }

    /// Success and info messages disappear on their own, warnings and errors stay
    /// until the next message replaces them.
    pub fn auto_hide_after(&self, delay: Duration) -> Option<Duration> {
        match self {
            MessageKind::Success | MessageKind::Info => Some(delay),
            MessageKind::Warning | MessageKind::Error => None,
        }
    }
}

/// Element ids of the login screen.
pub mod login {
    pub const FORM: &str = "login-form";
    pub const SUBMIT_BUTTON: &str = "login-button";
    pub const LOADING: &str = "loading";
}

/// Element ids of the dashboard screen.
pub mod dashboard {
    pub const USER_EMAIL: &str = "user-email";
    pub const MQTT_STATUS: &str = "mqtt-status";
    pub const CONNECT_BUTTON: &str = "connect-mqtt";
    pub const DISCONNECT_BUTTON: &str = "disconnect-mqtt";
    pub const COLOR_STATUS: &str = "color-status";
}
