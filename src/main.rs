pub mod app;
pub mod auth;
pub mod config;
pub mod mqtt;
pub mod ui;

#[cfg(test)]
mod testing;

use crate::app::Dashboard;
use crate::auth::firebase::FirebaseRestProvider;
use crate::auth::provider::IdentityProvider;
use crate::auth::session::SessionManager;
use crate::auth::user_records::TomlUserRecords;
use crate::config::AppConfig;
use crate::mqtt::config::TopicMap;
use crate::mqtt::link::RumqttTransport;
use crate::mqtt::mqtt_handler::BrokerClient;
use crate::ui::console::{spawn_stdin_reader, ConsoleRenderer};
use crate::ui::RenderSink;
use color_eyre::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    setup()?;

    let config_path = AppConfig::default_path();
    AppConfig::ensure_default_config(&config_path).await?;
    let config = AppConfig::load(&config_path).await?;

    let sink: Arc<dyn RenderSink> = Arc::new(ConsoleRenderer::stdout());

    let provider = match FirebaseRestProvider::new(config.provider.clone()) {
        Ok(provider) => Arc::new(provider),
        Err(e) => {
            error!("Identity provider unavailable: {}", e);
            app::show_auth_unavailable(sink.as_ref());
            return Ok(());
        }
    };
    let auth_state = provider.subscribe_auth_state();
    let user_records = Arc::new(TomlUserRecords::in_dir(&AppConfig::config_dir()));

    info!("Initializing broker client");
    let (event_tx, event_rx) = mpsc::channel(100);
    let broker = BrokerClient::new(
        Box::new(RumqttTransport::new(event_tx)),
        config.broker.clone(),
        TopicMap::from_settings(&config.topics),
        config.ui.log_capacity,
        sink.clone(),
    );

    let session = SessionManager::new(
        provider,
        Some(user_records),
        config.session_settings(),
        sink.clone(),
    );

    let shutdown = CancellationToken::new();
    let ctrl_c = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Unable to listen for ctrl-c: {}", e);
            return;
        }
        ctrl_c.cancel();
    });

    let (command_tx, command_rx) = mpsc::channel(32);
    let _stdin_handle = spawn_stdin_reader(command_tx, sink.clone());

    let mut dashboard = Dashboard::new(session, broker, sink);
    dashboard
        .run(command_rx, event_rx, auth_state, shutdown)
        .await
}

fn setup() -> Result<()> {
    if std::env::var("RUST_LIB_BACKTRACE").is_err() {
        std::env::set_var("RUST_LIB_BACKTRACE", "0")
    }
    color_eyre::install()?;
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info")
    }
    setup_logging_env();
    Ok(())
}

fn setup_logging_env() {
    FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_target(false)
        .with_file(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();
}
