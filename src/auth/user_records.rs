use async_trait::async_trait;
use chrono::{DateTime, Local};
use color_eyre::{eyre::eyre, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::provider::{Identity, UserRecordSink};

pub const USERS_FILE: &str = "users.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRecord {
    pub uid: String,
    pub email: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Local>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct UserRecordFile {
    #[serde(default)]
    users: Vec<UserRecord>,
}

/// Keeps one record per identity first seen through federated sign-in.
pub struct TomlUserRecords {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl TomlUserRecords {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        TomlUserRecords {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(USERS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn load(&self) -> Result<Vec<UserRecord>> {
        Ok(self.read_file().await?.users)
    }

    async fn read_file(&self) -> Result<UserRecordFile> {
        if !tokio::fs::try_exists(&self.path)
            .await
            .map_err(|e| eyre!("Failed to check user records file: {}", e))?
        {
            debug!("No user records at {}", self.path.display());
            return Ok(UserRecordFile::default());
        }
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| eyre!("Failed to read user records: {}", e))?;
        toml::from_str(&content).map_err(|e| eyre!("Failed to parse user records: {}", e))
    }
}

#[async_trait]
impl UserRecordSink for TomlUserRecords {
    async fn record_new_user(&self, identity: &Identity) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut file = self.read_file().await?;

        if file.users.iter().any(|user| user.uid == identity.uid) {
            debug!("User {} already recorded", identity.uid);
            return Ok(());
        }

        file.users.push(UserRecord {
            uid: identity.uid.clone(),
            email: identity.email.clone(),
            display_name: identity.display_name.clone(),
            created_at: Local::now(),
        });

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| eyre!("Failed to create user records directory: {}", e))?;
        }
        let content = toml::to_string_pretty(&file)
            .map_err(|e| eyre!("Failed to serialize user records: {}", e))?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| eyre!("Failed to write user records: {}", e))?;

        info!("Recorded user {} in {}", identity.email, self.path.display());
        Ok(())
    }
}
