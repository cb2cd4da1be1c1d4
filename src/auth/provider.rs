//! Identity provider boundary.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use tokio::sync::watch;

/// Signed-in user as reported by the provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match &self.display_name {
            Some(name) => write!(f, "{} <{}>", name, self.email),
            None => write!(f, "{}", self.email),
        }
    }
}

/// Raw provider failure. `code` follows the `auth/<kind>` convention.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct ProviderError {
    pub code: String,
    pub message: String,
}

impl ProviderError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ProviderError {
            code: code.into(),
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FederatedSignIn {
    pub identity: Identity,
    pub is_new_user: bool,
}

#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError>;

    async fn create_account(&self, email: &str, password: &str)
        -> Result<Identity, ProviderError>;

    /// Sets the display name of the currently signed-in identity.
    async fn update_profile(&self, display_name: &str) -> Result<(), ProviderError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError>;

    async fn sign_in_with_federated(
        &self,
        provider_id: &str,
        scopes: &[String],
    ) -> Result<FederatedSignIn, ProviderError>;

    async fn sign_out(&self) -> Result<(), ProviderError>;

    /// Stream of the current identity; fires on every change, including
    /// changes the dashboard did not ask for (expiry).
    fn subscribe_auth_state(&self) -> watch::Receiver<Option<Identity>>;
}

/// Side record written once for identities created through federated sign-in.
#[async_trait]
pub trait UserRecordSink: Send + Sync {
    async fn record_new_user(&self, identity: &Identity) -> color_eyre::Result<()>;
}
