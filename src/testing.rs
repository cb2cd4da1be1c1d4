//! In-memory doubles for the render, identity and transport boundaries.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;

use crate::auth::provider::{
    FederatedSignIn, Identity, IdentityProvider, ProviderError, UserRecordSink,
};
use crate::mqtt::config::{BrokerEndpoint, ConnectOptions};
use crate::mqtt::message_manager::LogDirection;
use crate::mqtt::transport::{BrokerTransport, QosLevel, TransportError};
use crate::ui::{MessageKind, RenderSink, Screen};

#[derive(Debug, Clone, PartialEq)]
pub enum RenderOp {
    Text(String, String),
    Class(String, String),
    Enabled(String, bool),
    Visible(String, bool),
    Screen(Screen),
    Log(String, LogDirection),
    ClearLog,
    Message(String, MessageKind),
    HideMessage,
    ResetForm(String),
}

#[derive(Default)]
pub struct RecordingSink {
    ops: Mutex<Vec<RenderOp>>,
}

impl RecordingSink {
    fn record(&self, op: RenderOp) {
        self.ops.lock().unwrap().push(op);
    }

    pub fn ops(&self) -> Vec<RenderOp> {
        self.ops.lock().unwrap().clone()
    }

    pub fn reset(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn log_lines(&self) -> Vec<(String, LogDirection)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::Log(text, kind) => Some((text, kind)),
                _ => None,
            })
            .collect()
    }

    pub fn log_count(&self, kind: LogDirection) -> usize {
        self.log_lines().iter().filter(|(_, k)| *k == kind).count()
    }

    pub fn text_updates(&self) -> Vec<(String, String)> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                RenderOp::Text(id, value) => Some((id, value)),
                _ => None,
            })
            .collect()
    }

    pub fn last_text(&self, element_id: &str) -> Option<String> {
        self.text_updates()
            .into_iter()
            .rev()
            .find(|(id, _)| id == element_id)
            .map(|(_, value)| value)
    }

    pub fn last_class(&self, element_id: &str) -> Option<String> {
        self.ops().into_iter().rev().find_map(|op| match op {
            RenderOp::Class(id, class) if id == element_id => Some(class),
            _ => None,
        })
    }

    pub fn last_enabled(&self, element_id: &str) -> Option<bool> {
        self.ops().into_iter().rev().find_map(|op| match op {
            RenderOp::Enabled(id, enabled) if id == element_id => Some(enabled),
            _ => None,
        })
    }

    pub fn last_visible(&self, element_id: &str) -> Option<bool> {
        self.ops().into_iter().rev().find_map(|op| match op {
            RenderOp::Visible(id, visible) if id == element_id => Some(visible),
            _ => None,
        })
    }

    pub fn last_screen(&self) -> Option<Screen> {
        self.ops().into_iter().rev().find_map(|op| match op {
            RenderOp::Screen(screen) => Some(screen),
            _ => None,
        })
    }

    pub fn last_message(&self) -> Option<(String, MessageKind)> {
        self.ops().into_iter().rev().find_map(|op| match op {
            RenderOp::Message(text, kind) => Some((text, kind)),
            _ => None,
        })
    }

    pub fn clear_count(&self) -> usize {
        self.ops()
            .iter()
            .filter(|op| matches!(op, RenderOp::ClearLog))
            .count()
    }
}

impl RenderSink for RecordingSink {
    fn set_text(&self, element_id: &str, value: &str) {
        self.record(RenderOp::Text(element_id.to_string(), value.to_string()));
    }

    fn set_class(&self, element_id: &str, class_name: &str) {
        self.record(RenderOp::Class(
            element_id.to_string(),
            class_name.to_string(),
        ));
    }

    fn set_enabled(&self, element_id: &str, enabled: bool) {
        self.record(RenderOp::Enabled(element_id.to_string(), enabled));
    }

    fn set_visible(&self, element_id: &str, visible: bool) {
        self.record(RenderOp::Visible(element_id.to_string(), visible));
    }

    fn show_screen(&self, screen: Screen) {
        self.record(RenderOp::Screen(screen));
    }

    fn append_log_line(&self, text: &str, kind: LogDirection) {
        self.record(RenderOp::Log(text.to_string(), kind));
    }

    fn clear_log(&self) {
        self.record(RenderOp::ClearLog);
    }

    fn show_message(&self, text: &str, kind: MessageKind) {
        self.record(RenderOp::Message(text.to_string(), kind));
    }

    fn hide_message(&self) {
        self.record(RenderOp::HideMessage);
    }

    fn reset_form(&self, form_id: &str) {
        self.record(RenderOp::ResetForm(form_id.to_string()));
    }
}

pub fn identity(email: &str) -> Identity {
    Identity {
        uid: format!("uid-{email}"),
        email: email.to_string(),
        display_name: None,
    }
}

/// Provider whose answers are queued up front. Unqueued calls succeed.
pub struct ScriptedProvider {
    pub calls: Mutex<Vec<String>>,
    pub sign_in_results: Mutex<VecDeque<Result<Identity, ProviderError>>>,
    pub create_results: Mutex<VecDeque<Result<Identity, ProviderError>>>,
    pub update_results: Mutex<VecDeque<Result<(), ProviderError>>>,
    pub reset_results: Mutex<VecDeque<Result<(), ProviderError>>>,
    pub federated_results: Mutex<VecDeque<Result<FederatedSignIn, ProviderError>>>,
    pub sign_out_results: Mutex<VecDeque<Result<(), ProviderError>>>,
    state_tx: watch::Sender<Option<Identity>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        let (state_tx, _) = watch::channel(None);
        ScriptedProvider {
            calls: Mutex::new(Vec::new()),
            sign_in_results: Mutex::new(VecDeque::new()),
            create_results: Mutex::new(VecDeque::new()),
            update_results: Mutex::new(VecDeque::new()),
            reset_results: Mutex::new(VecDeque::new()),
            federated_results: Mutex::new(VecDeque::new()),
            sign_out_results: Mutex::new(VecDeque::new()),
            state_tx,
        }
    }
}

impl ScriptedProvider {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn push_auth_state(&self, user: Option<Identity>) {
        self.state_tx.send_replace(user);
    }

    fn call(&self, name: &str) {
        self.calls.lock().unwrap().push(name.to_string());
    }

    /// Successful sign-ins are announced on the auth-state stream, as the
    /// real provider does.
    fn publish<T>(
        &self,
        result: Result<T, ProviderError>,
        user: impl Fn(&T) -> Identity,
    ) -> Result<T, ProviderError> {
        if let Ok(value) = &result {
            self.state_tx.send_replace(Some(user(value)));
        }
        result
    }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn sign_in(&self, email: &str, _password: &str) -> Result<Identity, ProviderError> {
        self.call("sign_in");
        let result = self
            .sign_in_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(identity(email)));
        self.publish(result, Identity::clone)
    }

    async fn create_account(
        &self,
        email: &str,
        _password: &str,
    ) -> Result<Identity, ProviderError> {
        self.call("create_account");
        let result = self
            .create_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(identity(email)));
        self.publish(result, Identity::clone)
    }

    async fn update_profile(&self, _display_name: &str) -> Result<(), ProviderError> {
        self.call("update_profile");
        self.update_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn send_password_reset(&self, _email: &str) -> Result<(), ProviderError> {
        self.call("send_password_reset");
        self.reset_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn sign_in_with_federated(
        &self,
        _provider_id: &str,
        _scopes: &[String],
    ) -> Result<FederatedSignIn, ProviderError> {
        self.call("sign_in_with_federated");
        let result = self
            .federated_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Ok(FederatedSignIn {
                    identity: identity("federated@example.com"),
                    is_new_user: false,
                })
            });
        self.publish(result, |signed_in| signed_in.identity.clone())
    }

    async fn sign_out(&self) -> Result<(), ProviderError> {
        self.call("sign_out");
        let result = self
            .sign_out_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()));
        if result.is_ok() {
            self.state_tx.send_replace(None);
        }
        result
    }

    fn subscribe_auth_state(&self) -> watch::Receiver<Option<Identity>> {
        self.state_tx.subscribe()
    }
}

#[derive(Default)]
pub struct RecordingUserRecords {
    pub recorded: Mutex<Vec<Identity>>,
    pub fail: bool,
}

#[async_trait]
impl UserRecordSink for RecordingUserRecords {
    async fn record_new_user(&self, identity: &Identity) -> color_eyre::Result<()> {
        if self.fail {
            return Err(color_eyre::eyre::eyre!("record store unavailable"));
        }
        self.recorded.lock().unwrap().push(identity.clone());
        Ok(())
    }
}

/// Everything the fake transport was asked to do.
#[derive(Default, Debug)]
pub struct TransportLog {
    pub connects: Vec<(BrokerEndpoint, String, ConnectOptions)>,
    pub subscriptions: Vec<String>,
    pub sent: Vec<(String, String, QosLevel)>,
    pub disconnects: usize,
}

/// Transport with scripted connect results. Unscripted connects succeed.
#[derive(Default, Clone)]
pub struct FakeTransport {
    pub log: Arc<Mutex<TransportLog>>,
    pub connect_results: Arc<Mutex<VecDeque<Result<(), TransportError>>>>,
    pub rejected_topics: Arc<Mutex<Vec<String>>>,
    /// Each connect waits this long before answering, like a silent broker.
    pub connect_delay: Option<Duration>,
}

impl FakeTransport {
    pub fn failing_connects(count: usize) -> Self {
        let fake = FakeTransport::default();
        {
            let mut results = fake.connect_results.lock().unwrap();
            for _ in 0..count {
                results.push_back(Err(TransportError::Refused(
                    "connection refused".to_string(),
                )));
            }
        }
        fake
    }

    pub fn connect_count(&self) -> usize {
        self.log.lock().unwrap().connects.len()
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.log.lock().unwrap().subscriptions.clone()
    }

    pub fn sent(&self) -> Vec<(String, String, QosLevel)> {
        self.log.lock().unwrap().sent.clone()
    }

    pub fn connected_hosts(&self) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .connects
            .iter()
            .map(|(endpoint, _, _)| endpoint.host.clone())
            .collect()
    }
}

#[async_trait]
impl BrokerTransport for FakeTransport {
    async fn connect(
        &mut self,
        endpoint: &BrokerEndpoint,
        client_id: &str,
        options: &ConnectOptions,
    ) -> Result<(), TransportError> {
        self.log.lock().unwrap().connects.push((
            endpoint.clone(),
            client_id.to_string(),
            options.clone(),
        ));
        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        self.connect_results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn subscribe(&mut self, topic: &str) -> Result<(), TransportError> {
        if self.rejected_topics.lock().unwrap().iter().any(|t| t == topic) {
            return Err(TransportError::Request(format!("subscribe {topic} refused")));
        }
        self.log
            .lock()
            .unwrap()
            .subscriptions
            .push(topic.to_string());
        Ok(())
    }

    fn send(&mut self, topic: &str, payload: &str, qos: QosLevel) -> Result<(), TransportError> {
        self.log
            .lock()
            .unwrap()
            .sent
            .push((topic.to_string(), payload.to_string(), qos));
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.log.lock().unwrap().disconnects += 1;
        Ok(())
    }
}
