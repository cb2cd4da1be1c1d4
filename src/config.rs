use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::auth::firebase::ProviderSettings;
use crate::auth::session::SessionSettings;
use crate::mqtt::config::{BrokerSettings, TopicSettings};
use crate::mqtt::message_manager::DEFAULT_LOG_CAPACITY;

const CONFIG_DIR: &str = ".config/iot-dashboard";
const CONFIG_FILE: &str = "config.toml";

#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct UiSettings {
    pub log_capacity: usize,
    pub message_auto_hide_secs: u64,
}

impl Default for UiSettings {
    fn default() -> Self {
        UiSettings {
            log_capacity: DEFAULT_LOG_CAPACITY,
            message_auto_hide_secs: 5,
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct AppConfig {
    pub provider: ProviderSettings,
    pub broker: BrokerSettings,
    pub topics: TopicSettings,
    pub ui: UiSettings,
}

impl AppConfig {
    pub fn config_dir() -> PathBuf {
        let mut base_path = get_home_dir();
        base_path.push(CONFIG_DIR);
        base_path
    }

    pub fn default_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE)
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
        let config: AppConfig =
            toml::from_str(&content).map_err(|e| eyre!("Failed to parse config file: {}", e))?;
        debug!("Loaded configuration from {}", path.display());
        config.validate()?;
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create config directory: {}", e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| eyre!("Failed to serialize config: {}", e))?;
        tokio::fs::write(path, content)
            .await
            .map_err(|e| eyre!("Failed to write config file: {}", e))?;
        Ok(())
    }

    /// Writes the default configuration when none exists yet.
    pub async fn ensure_default_config(path: &Path) -> Result<()> {
        if !tokio::fs::try_exists(path)
            .await
            .map_err(|e| eyre!("Failed to check if config file exists: {}", e))?
        {
            info!("Creating default configuration at {}", path.display());
            AppConfig::default().save(path).await?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.broker.endpoints.is_empty() {
            return Err(eyre!("At least one broker endpoint must be configured"));
        }
        if let Some(topic) = self.topics.duplicate_topic() {
            return Err(eyre!(
                "Topic '{}' is configured for more than one channel",
                topic
            ));
        }
        if self.ui.log_capacity == 0 {
            return Err(eyre!("ui.log_capacity must be greater than zero"));
        }
        if self.provider.api_key.trim().is_empty() {
            warn!("provider.api_key is empty, authentication will be unavailable");
        }
        Ok(())
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            federated_provider: self.provider.federated_provider.clone(),
            federated_scopes: self.provider.federated_scopes.clone(),
            message_auto_hide: Duration::from_secs(self.ui.message_auto_hide_secs),
        }
    }
}

fn get_home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| {
        warn!("Could not determine home directory, using current directory");
        PathBuf::from(".")
    })
}
