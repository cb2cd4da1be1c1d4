//! Session Manager: the single owner of "who is logged in".
//!
//! # State Machine
//!
//! ```text
//!             submit login/register/federated
//! LoggedOut ───────────────────────────────────► AuthPending
//!     ▲  ▲                                         │     │
//!     │  └────────── provider error ───────────────┘     │ provider success
//!     │                                                  ▼
//!     └──────────────── logout ──────────────────── LoggedIn
//!
//! any state ── auth-state notification ──► LoggedOut | LoggedIn
//! ```
//!
//! The provider's auth-state stream is authoritative. Local operations only
//! anticipate what it will report.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::error::{AuthError, AuthOperation, SessionError, ValidationError};
use super::provider::{Identity, IdentityProvider, ProviderError, UserRecordSink};
use super::validation::{validate_credentials, validate_email, validate_new_password};
use crate::ui::common::{dashboard, login};
use crate::ui::{MessageKind, RenderSink, Screen};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    LoggedOut,
    AuthPending,
    LoggedIn(Identity),
}

impl SessionState {
    pub fn user(&self) -> Option<&Identity> {
        match self {
            SessionState::LoggedIn(identity) => Some(identity),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub federated_provider: String,
    pub federated_scopes: Vec<String>,
    pub message_auto_hide: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        SessionSettings {
            federated_provider: "google.com".to_string(),
            federated_scopes: vec!["email".to_string(), "profile".to_string()],
            message_auto_hide: Duration::from_secs(5),
        }
    }
}

/// Loading indicator and disabled submit control for the lifetime of a request.
///
/// Released on drop, so every exit path (success, classified failure, early
/// return or unwinding) clears the pending UI.
pub struct PendingGuard {
    sink: Arc<dyn RenderSink>,
}

impl PendingGuard {
    pub fn acquire(sink: Arc<dyn RenderSink>) -> Self {
        sink.set_visible(login::LOADING, true);
        sink.set_enabled(login::SUBMIT_BUTTON, false);
        PendingGuard { sink }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.sink.set_visible(login::LOADING, false);
        self.sink.set_enabled(login::SUBMIT_BUTTON, true);
    }
}

pub struct SessionManager {
    provider: Arc<dyn IdentityProvider>,
    user_records: Option<Arc<dyn UserRecordSink>>,
    settings: SessionSettings,
    state: SessionState,
    sink: Arc<dyn RenderSink>,
    hide_timer: Option<CancellationToken>,
    // false until the first screen for the current state was shown
    drawn: bool,
}

impl SessionManager {
    pub fn new(
        provider: Arc<dyn IdentityProvider>,
        user_records: Option<Arc<dyn UserRecordSink>>,
        settings: SessionSettings,
        sink: Arc<dyn RenderSink>,
    ) -> Self {
        SessionManager {
            provider,
            user_records,
            settings,
            state: SessionState::LoggedOut,
            sink,
            hide_timer: None,
            drawn: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_logged_in(&self) -> bool {
        self.state.user().is_some()
    }

    pub fn provider(&self) -> &Arc<dyn IdentityProvider> {
        &self.provider
    }

    pub async fn login(&mut self, email: &str, password: &str) -> Result<Identity, SessionError> {
        let email = match validate_credentials(email, password) {
            Ok(email) => email,
            Err(e) => return Err(self.reject(e)),
        };

        let _pending = PendingGuard::acquire(self.sink.clone());
        self.sink.hide_message();
        self.state = SessionState::AuthPending;
        info!("Attempting login for {}", email);

        match self.provider.sign_in(email, password).await {
            Ok(identity) => {
                info!("Login succeeded for {}", identity.email);
                self.enter_logged_in(identity.clone());
                self.notify("Login realizado com sucesso!", MessageKind::Success);
                Ok(identity)
            }
            Err(e) => Err(self.fail(AuthOperation::Login, e)),
        }
    }

    pub async fn register(
        &mut self,
        name: &str,
        email: &str,
        password: &str,
        confirm_password: &str,
    ) -> Result<Identity, SessionError> {
        let name = name.trim();
        if name.is_empty() || confirm_password.is_empty() {
            return Err(self.reject(ValidationError::MissingFields));
        }
        let email = match validate_credentials(email, password)
            .and_then(|email| validate_new_password(password, confirm_password).map(|_| email))
        {
            Ok(email) => email,
            Err(e) => return Err(self.reject(e)),
        };

        let _pending = PendingGuard::acquire(self.sink.clone());
        self.sink.hide_message();
        self.state = SessionState::AuthPending;
        info!("Creating account for {}", email);

        let mut identity = match self.provider.create_account(email, password).await {
            Ok(identity) => identity,
            Err(e) => return Err(self.fail(AuthOperation::Register, e)),
        };

        match self.provider.update_profile(name).await {
            Ok(()) => identity.display_name = Some(name.to_string()),
            Err(e) => warn!("Account created but display name not set: {}", e),
        }

        info!("Account created for {}", identity.email);
        self.enter_logged_in(identity.clone());
        self.notify("Conta criada com sucesso!", MessageKind::Success);
        Ok(identity)
    }

    pub async fn reset_password(&mut self, email: &str) -> Result<(), SessionError> {
        if email.trim().is_empty() {
            return Err(self.reject(ValidationError::MissingEmail));
        }
        let email = match validate_email(email) {
            Ok(email) => email,
            Err(e) => return Err(self.reject(e)),
        };

        let _pending = PendingGuard::acquire(self.sink.clone());
        info!("Sending password reset to {}", email);

        match self.provider.send_password_reset(email).await {
            Ok(()) => {
                self.notify(
                    "Email de recuperação enviado! Verifique sua caixa de entrada.",
                    MessageKind::Success,
                );
                Ok(())
            }
            Err(e) => {
                error!("Password reset failed: {}", e);
                let err = AuthError::classify(AuthOperation::ResetPassword, e);
                self.notify(err.user_message(), MessageKind::Error);
                Err(err.into())
            }
        }
    }

    pub async fn login_with_federated_provider(&mut self) -> Result<Identity, SessionError> {
        let _pending = PendingGuard::acquire(self.sink.clone());
        self.sink.hide_message();
        self.state = SessionState::AuthPending;
        info!(
            "Starting federated sign-in with {}",
            self.settings.federated_provider
        );

        let outcome = match self
            .provider
            .sign_in_with_federated(
                &self.settings.federated_provider,
                &self.settings.federated_scopes,
            )
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.fail(AuthOperation::FederatedLogin, e)),
        };

        if outcome.is_new_user {
            self.record_new_user(&outcome.identity).await;
        }

        info!("Federated login succeeded for {}", outcome.identity.email);
        self.enter_logged_in(outcome.identity.clone());
        self.notify("Login realizado com sucesso!", MessageKind::Success);
        Ok(outcome.identity)
    }

    /// On failure the local state is left alone; the auth-state stream decides.
    pub async fn logout(&mut self) -> Result<(), SessionError> {
        info!("Logging out");
        match self.provider.sign_out().await {
            Ok(()) => {
                self.enter_logged_out();
                self.notify("Logout realizado com sucesso!", MessageKind::Success);
                Ok(())
            }
            Err(e) => {
                error!("Logout failed: {}", e);
                let err = AuthError::classify(AuthOperation::Logout, e);
                self.notify(err.user_message(), MessageKind::Error);
                Err(err.into())
            }
        }
    }

    /// Applies a notification from the provider's auth-state stream.
    pub fn apply_auth_state(&mut self, user: Option<Identity>) {
        // our own login/logout already rendered this state; keep its message up
        if self.drawn && self.state.user() == user.as_ref() {
            trace!("Auth state unchanged");
            return;
        }
        debug!(
            "Auth state changed: {}",
            user.as_ref().map_or("no user", |u| u.email.as_str())
        );
        match user {
            Some(identity) => {
                self.enter_logged_in(identity);
                self.hide_message();
            }
            None => self.enter_logged_out(),
        }
    }

    async fn record_new_user(&self, identity: &Identity) {
        let Some(records) = &self.user_records else {
            debug!("No user record store configured");
            return;
        };
        match records.record_new_user(identity).await {
            Ok(()) => info!("Recorded new user {}", identity.uid),
            Err(e) => warn!("Could not record new user {}: {}", identity.uid, e),
        }
    }

    fn enter_logged_in(&mut self, identity: Identity) {
        self.sink.set_text(dashboard::USER_EMAIL, &identity.email);
        self.sink.show_screen(Screen::Dashboard);
        self.state = SessionState::LoggedIn(identity);
        self.drawn = true;
    }

    fn enter_logged_out(&mut self) {
        self.state = SessionState::LoggedOut;
        self.sink.show_screen(Screen::Login);
        self.sink.reset_form(login::FORM);
        self.drawn = true;
    }

    fn reject(&mut self, error: ValidationError) -> SessionError {
        warn!("Validation failed: {:?}", error);
        self.notify(&error.to_string(), MessageKind::Error);
        error.into()
    }

    fn fail(&mut self, operation: AuthOperation, source: ProviderError) -> SessionError {
        error!("{:?} failed at the provider: {}", operation, source);
        let err = AuthError::classify(operation, source);
        self.state = SessionState::LoggedOut;
        let kind = if err.kind.is_recoverable() {
            MessageKind::Warning
        } else {
            MessageKind::Error
        };
        self.notify(err.user_message(), kind);
        err.into()
    }

    fn notify(&mut self, text: &str, kind: MessageKind) {
        if let Some(timer) = self.hide_timer.take() {
            timer.cancel();
        }
        self.sink.show_message(text, kind);

        if let Some(delay) = kind.auto_hide_after(self.settings.message_auto_hide) {
            let token = CancellationToken::new();
            let cancelled = token.clone();
            let sink = self.sink.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancelled.cancelled() => {}
                    _ = tokio::time::sleep(delay) => sink.hide_message(),
                }
            });
            self.hide_timer = Some(token);
        }
    }

    fn hide_message(&mut self) {
        if let Some(timer) = self.hide_timer.take() {
            timer.cancel();
        }
        self.sink.hide_message();
    }
}
