//! Identity provider backed by the Identity Toolkit REST API.
//!
//! Email/password flows go straight to the `accounts:*` endpoints. The auth
//! state stream is driven locally: every successful sign-in publishes the
//! identity and arms an expiry timer that publishes `None` when the ID token
//! runs out, the same way the hosted SDK reports an expired session.
//!
//! Federated sign-in gets its provider credential from [`BrowserSignIn`] and
//! trades it for a session at `accounts:signInWithIdp`.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::oauth::{BrowserSignIn, OAuthSettings};
use super::provider::{FederatedSignIn, Identity, IdentityProvider, ProviderError};

pub const DEFAULT_BASE_URL: &str = "https://identitytoolkit.googleapis.com/v1";

const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

// signInWithIdp only checks that this is a valid URL when the credential is
// passed in postBody
const IDP_REQUEST_URI: &str = "http://localhost";

#[derive(Debug, Error)]
pub enum ProviderInitError {
    #[error("identity provider api key is not configured")]
    MissingApiKey,

    #[error("could not build http client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub api_key: String,
    pub base_url: String,
    pub request_timeout_secs: u64,
    pub federated_provider: String,
    pub federated_scopes: Vec<String>,
    pub oauth: OAuthSettings,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        ProviderSettings {
            api_key: String::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: 10,
            federated_provider: "google.com".to_string(),
            federated_scopes: vec!["email".to_string(), "profile".to_string()],
            oauth: OAuthSettings::default(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateProfileRequest<'a> {
    id_token: &'a str,
    display_name: &'a str,
    return_secure_token: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct OobCodeRequest<'a> {
    request_type: &'static str,
    email: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct IdpRequest<'a> {
    post_body: String,
    request_uri: &'a str,
    return_secure_token: bool,
    return_idp_credential: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TokenResponse {
    local_id: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    display_name: Option<String>,
    id_token: String,
    #[serde(default)]
    expires_in: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IdpResponse {
    #[serde(flatten)]
    token: TokenResponse,
    #[serde(default)]
    is_new_user: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// Token of the identity currently signed in.
#[derive(Debug, Clone)]
struct RestSession {
    identity: Identity,
    id_token: String,
}

/// Maps the REST error message (`EMAIL_NOT_FOUND`, `WEAK_PASSWORD : ...`)
/// to an `auth/` code.
pub fn code_for_rest_error(message: &str) -> &'static str {
    let head = message.split(" : ").next().unwrap_or(message).trim();
    match head {
        "EMAIL_NOT_FOUND" => "auth/user-not-found",
        "INVALID_PASSWORD" => "auth/wrong-password",
        "INVALID_LOGIN_CREDENTIALS" => "auth/invalid-credential",
        "USER_DISABLED" => "auth/user-disabled",
        "EMAIL_EXISTS" => "auth/email-already-in-use",
        "WEAK_PASSWORD" => "auth/weak-password",
        "INVALID_EMAIL" | "MISSING_EMAIL" => "auth/invalid-email",
        "TOO_MANY_ATTEMPTS_TRY_LATER" => "auth/too-many-requests",
        "INVALID_IDP_RESPONSE" | "INVALID_ID_TOKEN" => "auth/invalid-credential",
        "OPERATION_NOT_ALLOWED" => "auth/operation-not-allowed",
        _ => "auth/internal-error",
    }
}

pub struct FirebaseRestProvider {
    http: reqwest::Client,
    settings: ProviderSettings,
    state: Arc<watch::Sender<Option<Identity>>>,
    session: Arc<Mutex<Option<RestSession>>>,
    expiry: Mutex<Option<CancellationToken>>,
}

impl FirebaseRestProvider {
    pub fn new(settings: ProviderSettings) -> Result<Self, ProviderInitError> {
        if settings.api_key.trim().is_empty() {
            return Err(ProviderInitError::MissingApiKey);
        }
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        let (state, _) = watch::channel(None);
        debug!("Identity provider ready at {}", settings.base_url);

        Ok(FirebaseRestProvider {
            http,
            settings,
            state: Arc::new(state),
            session: Arc::new(Mutex::new(None)),
            expiry: Mutex::new(None),
        })
    }

    fn endpoint(&self, action: &str) -> String {
        format!(
            "{}/accounts:{}",
            self.settings.base_url.trim_end_matches('/'),
            action
        )
    }

    async fn post<B, R>(&self, action: &str, body: &B) -> Result<R, ProviderError>
    where
        B: Serialize + ?Sized + Sync,
        R: DeserializeOwned,
    {
        let response = self
            .http
            .post(self.endpoint(action))
            .query(&[("key", self.settings.api_key.as_str())])
            .json(body)
            .send()
            .await
            .map_err(|e| ProviderError::new("auth/network-request-failed", e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ProviderError::new("auth/network-request-failed", e.to_string()))?;

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorEnvelope>(&text)
                .map(|envelope| envelope.error.message)
                .unwrap_or_else(|_| format!("HTTP {status}"));
            debug!("accounts:{} answered {}: {}", action, status, message);
            return Err(ProviderError::new(code_for_rest_error(&message), message));
        }

        serde_json::from_str(&text)
            .map_err(|e| ProviderError::new("auth/internal-error", format!("bad response: {e}")))
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<RestSession>> {
        self.session.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn start_session(&self, response: TokenResponse) -> Identity {
        let identity = Identity {
            uid: response.local_id,
            email: response.email,
            display_name: response.display_name.filter(|name| !name.is_empty()),
        };
        let lifetime = response
            .expires_in
            .and_then(|secs| secs.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

        *self.lock_session() = Some(RestSession {
            identity: identity.clone(),
            id_token: response.id_token,
        });
        self.state.send_replace(Some(identity.clone()));
        self.arm_expiry(Duration::from_secs(lifetime));
        identity
    }

    fn arm_expiry(&self, lifetime: Duration) {
        let token = CancellationToken::new();
        let cancelled = token.clone();
        if let Some(previous) = self
            .expiry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(token)
        {
            previous.cancel();
        }

        let state = self.state.clone();
        let session = self.session.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = cancelled.cancelled() => {}
                _ = tokio::time::sleep(lifetime) => {
                    info!("Identity token expired");
                    *session.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
                    state.send_replace(None);
                }
            }
        });
    }

    fn end_session(&self) {
        if let Some(timer) = self
            .expiry
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
        {
            timer.cancel();
        }
        *self.lock_session() = None;
        self.state.send_replace(None);
    }
}

#[async_trait]
impl IdentityProvider for FirebaseRestProvider {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Identity, ProviderError> {
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: TokenResponse = self.post("signInWithPassword", &body).await?;
        Ok(self.start_session(response))
    }

    async fn create_account(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Identity, ProviderError> {
        let body = PasswordRequest {
            email,
            password,
            return_secure_token: true,
        };
        let response: TokenResponse = self.post("signUp", &body).await?;
        Ok(self.start_session(response))
    }

    async fn update_profile(&self, display_name: &str) -> Result<(), ProviderError> {
        let Some(session) = self.lock_session().clone() else {
            return Err(ProviderError::new(
                "auth/no-current-user",
                "no signed-in identity",
            ));
        };
        let body = UpdateProfileRequest {
            id_token: &session.id_token,
            display_name,
            return_secure_token: false,
        };
        let _: serde_json::Value = self.post("update", &body).await?;

        let mut identity = session.identity;
        identity.display_name = Some(display_name.to_string());
        if let Some(current) = self.lock_session().as_mut() {
            current.identity = identity.clone();
        }
        self.state.send_replace(Some(identity));
        Ok(())
    }

    async fn send_password_reset(&self, email: &str) -> Result<(), ProviderError> {
        let body = OobCodeRequest {
            request_type: "PASSWORD_RESET",
            email,
        };
        let _: serde_json::Value = self.post("sendOobCode", &body).await?;
        Ok(())
    }

    async fn sign_in_with_federated(
        &self,
        provider_id: &str,
        scopes: &[String],
    ) -> Result<FederatedSignIn, ProviderError> {
        info!("Starting browser sign-in with {}", provider_id);
        let credential = BrowserSignIn::new(&self.http, &self.settings.oauth)
            .obtain(scopes)
            .await?;

        let body = IdpRequest {
            post_body: credential.post_body(provider_id),
            request_uri: IDP_REQUEST_URI,
            return_secure_token: true,
            return_idp_credential: true,
        };
        let response: IdpResponse = self.post("signInWithIdp", &body).await?;
        let is_new_user = response.is_new_user;
        let identity = self.start_session(response.token);
        debug!("{} signed in with {} (new: {})", identity.uid, provider_id, is_new_user);
        Ok(FederatedSignIn {
            identity,
            is_new_user,
        })
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.end_session();
        Ok(())
    }

    fn subscribe_auth_state(&self) -> watch::Receiver<Option<Identity>> {
        self.state.subscribe()
    }
}
