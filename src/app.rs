//! Composition root of the dashboard.
//!
//! One task owns both components and serializes every input through a single
//! `select!`: typed commands, auth-state notifications and transport events.
//! Nothing here is shared across tasks, so no locks are involved.

use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::auth::provider::Identity;
use crate::auth::session::SessionManager;
use crate::mqtt::mqtt_handler::BrokerClient;
use crate::mqtt::transport::TransportEvent;
use crate::ui::common::login;
use crate::ui::console::{UiCommand, HELP};
use crate::ui::{MessageKind, RenderSink, Screen};

pub const AUTH_UNAVAILABLE: &str =
    "Erro: Serviço de autenticação não carregou. Recarregue a página.";

const LOGIN_REQUIRED: &str = "Faça login para acessar o dashboard.";
const ALREADY_LOGGED_IN: &str = "Você já está logado. Faça logout primeiro.";

/// Static banner for when no identity provider could be built.
pub fn show_auth_unavailable(sink: &dyn RenderSink) {
    sink.show_screen(Screen::Login);
    sink.set_enabled(login::SUBMIT_BUTTON, false);
    sink.show_message(AUTH_UNAVAILABLE, MessageKind::Error);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Dashboard {
    session: SessionManager,
    broker: BrokerClient,
    sink: Arc<dyn RenderSink>,
}

impl Dashboard {
    pub fn new(session: SessionManager, broker: BrokerClient, sink: Arc<dyn RenderSink>) -> Self {
        Dashboard {
            session,
            broker,
            sink,
        }
    }

    pub fn session(&self) -> &SessionManager {
        &self.session
    }

    pub fn broker(&self) -> &BrokerClient {
        &self.broker
    }

    pub async fn run(
        &mut self,
        mut commands: mpsc::Receiver<UiCommand>,
        mut events: mpsc::Receiver<TransportEvent>,
        mut auth_state: watch::Receiver<Option<Identity>>,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let initial = auth_state.borrow_and_update().clone();
        self.on_auth_state(initial).await;
        let mut auth_open = true;

        info!("Dashboard running");
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break;
                }
                changed = auth_state.changed(), if auth_open => {
                    if changed.is_err() {
                        warn!("Auth state stream closed");
                        auth_open = false;
                        continue;
                    }
                    let user = auth_state.borrow_and_update().clone();
                    self.on_auth_state(user).await;
                }
                Some(event) = events.recv() => {
                    // a lost link may start a failover cycle
                    let flow = tokio::select! {
                        _ = self.on_transport_event(event) => Flow::Continue,
                        _ = shutdown.cancelled() => Flow::Quit,
                    };
                    if flow == Flow::Quit {
                        info!("Shutdown requested during failover");
                        break;
                    }
                }
                command = commands.recv() => {
                    let Some(command) = command else {
                        debug!("Command channel closed");
                        break;
                    };
                    // connects and provider requests can take many seconds
                    let flow = tokio::select! {
                        flow = self.handle_command(command) => flow,
                        _ = shutdown.cancelled() => {
                            info!("Shutdown requested while a command was running");
                            Flow::Quit
                        }
                    };
                    if flow == Flow::Quit {
                        break;
                    }
                }
            }
        }

        self.broker.abandon_connect();
        if let Err(e) = self.broker.disconnect().await {
            warn!("Disconnect on shutdown failed: {}", e);
        }
        info!("Dashboard stopped");
        Ok(())
    }

    pub async fn on_auth_state(&mut self, user: Option<Identity>) {
        self.session.apply_auth_state(user);
        self.release_broker_if_logged_out().await;
    }

    pub async fn on_transport_event(&mut self, event: TransportEvent) {
        if let Err(e) = self.broker.handle_event(event).await {
            debug!("Transport event left broker in {:?}: {}", self.broker.state(), e);
        }
    }

    pub async fn handle_command(&mut self, command: UiCommand) -> Flow {
        debug!("Command {:?}", command);
        let logged_in = self.session.is_logged_in();
        if command.needs_dashboard() && !logged_in {
            self.sink.show_message(LOGIN_REQUIRED, MessageKind::Warning);
            return Flow::Continue;
        }

        match command {
            UiCommand::Login { .. } | UiCommand::Register { .. } | UiCommand::FederatedLogin
                if logged_in =>
            {
                self.sink
                    .show_message(ALREADY_LOGGED_IN, MessageKind::Warning);
            }
            UiCommand::Login { email, password } => {
                let _ = self.session.login(&email, &password).await;
            }
            UiCommand::Register {
                name,
                email,
                password,
                confirm_password,
            } => {
                let _ = self
                    .session
                    .register(&name, &email, &password, &confirm_password)
                    .await;
            }
            UiCommand::ResetPassword { email } => {
                let _ = self.session.reset_password(&email).await;
            }
            UiCommand::FederatedLogin => {
                let _ = self.session.login_with_federated_provider().await;
            }
            UiCommand::Logout => {
                let _ = self.session.logout().await;
                self.release_broker_if_logged_out().await;
            }
            UiCommand::Connect => {
                let _ = self.broker.connect().await;
            }
            UiCommand::Disconnect => {
                let _ = self.broker.disconnect().await;
            }
            UiCommand::Led(state) => {
                let _ = self.broker.control_led(&state);
            }
            UiCommand::Motor(state) => {
                let _ = self.broker.control_motor(&state);
            }
            UiCommand::Rgb(color) => {
                let _ = self.broker.control_rgb(&color);
            }
            UiCommand::ClearLog => self.broker.clear_log(),
            UiCommand::Help => self.sink.show_message(HELP, MessageKind::Info),
            UiCommand::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    async fn release_broker_if_logged_out(&mut self) {
        if !self.session.is_logged_in() {
            if let Err(e) = self.broker.disconnect().await {
                warn!("Broker disconnect after sign-out failed: {}", e);
            }
        }
    }
}
