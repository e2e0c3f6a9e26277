use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf, sync::RwLock};
use tokio::sync::watch;
use uuid::Uuid;

/// Operator settings for the donation service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteSettings {
    /// Opaque remote blob handed out by the service operators.
    #[serde(default)]
    pub remote: String,
    /// Key used to authenticate with the remote.
    #[serde(default = "random_key")]
    pub key: String,
}

fn random_key() -> String {
    Uuid::new_v4().to_string()
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            remote: String::new(),
            key: random_key(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct UserSettings {
    #[serde(default)]
    donations: RemoteSettings,
}

/// JSON-file backed settings with change notification.
pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<UserSettings>,
    changes: watch::Sender<RemoteSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let (data, needs_write) = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            match serde_json::from_str::<UserSettings>(&contents) {
                Ok(data) => (data, false),
                Err(err) => {
                    log::warn!("Replacing unreadable settings at {}: {err}", path.display());
                    (UserSettings::default(), true)
                }
            }
        } else {
            (UserSettings::default(), true)
        };

        let (changes, _) = watch::channel(data.donations.clone());
        let store = Self {
            path,
            data: RwLock::new(data),
            changes,
        };

        // Persist the generated key so it survives restarts.
        if needs_write {
            let snapshot = store.read().clone();
            store.persist(&snapshot)?;
        }

        Ok(store)
    }

    pub fn remote_settings(&self) -> RemoteSettings {
        self.read().donations.clone()
    }

    pub fn update_remote_settings(&self, settings: RemoteSettings) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap_or_else(|p| p.into_inner());
            guard.donations = settings.clone();
            self.persist(&guard)?;
        }
        self.changes.send_replace(settings);
        Ok(())
    }

    /// Receives every settings change; the current value is marked seen.
    pub fn subscribe(&self) -> watch::Receiver<RemoteSettings> {
        self.changes.subscribe()
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: UserSettings = serde_json::from_str(&contents)?;
        let settings = data.donations.clone();
        *self.data.write().unwrap_or_else(|p| p.into_inner()) = data;
        self.changes.send_replace(settings);
        Ok(())
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, UserSettings> {
        self.data.read().unwrap_or_else(|p| p.into_inner())
    }

    fn persist(&self, data: &UserSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }
}
