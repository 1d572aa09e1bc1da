//! Configuration storage

use anyhow::{bail, Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

use crate::models::{Role, SenderIdentity};
use crate::notifications::ToastSettings;

const DEFAULT_API_BASE: &str = "http://localhost:5000";

/// Keys accepted by `config set`.
pub const KEYS: &[&str] = &[
    "api_base_url",
    "realtime_url",
    "user.id",
    "user.role",
    "user.role_id",
    "user.name",
    "notifications.toast_seconds",
    "notifications.sticky_toast_seconds",
    "notifications.max_toasts",
    "highlight_ms",
    "data_dir",
];

/// The signed-in user, as far as this client knows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Unified user id
    pub id: Option<u64>,
    pub role: Option<Role>,
    /// Student or staff id, depending on `role`
    pub role_id: Option<u64>,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    pub toast_seconds: u64,
    pub sticky_toast_seconds: u64,
    pub max_toasts: usize,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        let defaults = ToastSettings::default();
        Self {
            toast_seconds: defaults.transient.as_secs(),
            sticky_toast_seconds: defaults.sticky.as_secs(),
            max_toasts: defaults.max_visible,
        }
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// REST API base URL
    pub api_base_url: String,
    /// Socket.IO server, when it is not served from the API base
    pub realtime_url: Option<String>,
    /// How long a jumped-to message stays highlighted
    pub highlight_ms: u64,
    /// Where local state is kept; defaults to the platform data directory
    pub data_dir: Option<PathBuf>,
    pub user: LocalUser,
    pub notifications: NotificationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE.to_string(),
            realtime_url: None,
            highlight_ms: 2000,
            data_dir: None,
            user: LocalUser::default(),
            notifications: NotificationConfig::default(),
        }
    }
}

impl Config {
    fn project_dirs() -> Result<ProjectDirs> {
        ProjectDirs::from("com", "grouptech", "grouptech")
            .context("Could not determine config directory")
    }

    /// Get config directory path
    fn config_dir() -> Result<PathBuf> {
        Ok(Self::project_dirs()?.config_dir().to_path_buf())
    }

    /// Get config file path
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from disk
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;

        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        toml::from_str(&content).context("Failed to parse config file")
    }

    /// Save configuration to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir()?;
        fs::create_dir_all(&dir).context("Failed to create config directory")?;

        let path = Self::config_path()?;
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(&path, content).context("Failed to write config file")?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = fs::Permissions::from_mode(0o600);
            fs::set_permissions(&path, perms).context("Failed to set config permissions")?;
        }

        Ok(())
    }

    /// Directory for persisted client state.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(Self::project_dirs()?.data_dir().to_path_buf()),
        }
    }

    pub fn api_base(&self) -> Result<Url> {
        Url::parse(&self.api_base_url)
            .with_context(|| format!("Invalid api_base_url: {}", self.api_base_url))
    }

    /// Base URL of the Socket.IO server.
    pub fn realtime_base(&self) -> Result<Url> {
        match &self.realtime_url {
            Some(url) => Url::parse(url).with_context(|| format!("Invalid realtime_url: {}", url)),
            None => self.api_base(),
        }
    }

    /// Identity fields the local user sends with messages.
    pub fn sender_identity(&self) -> SenderIdentity {
        let mut sender = SenderIdentity {
            user_id: self.user.id,
            ..SenderIdentity::default()
        };
        match (self.user.role, self.user.role_id) {
            (Some(Role::Student), Some(id)) => sender.student_id = Some(id),
            (Some(Role::Staff), Some(id)) => {
                sender.staff_id = Some(id);
                sender.is_staff = true;
            }
            _ => {}
        }
        sender
    }

    /// Unified id of the local user; required by anything that talks as them.
    pub fn require_user_id(&self) -> Result<u64> {
        self.user
            .id
            .context("No local user configured. Run `grouptech config set user.id <id>` first.")
    }

    pub fn toast_settings(&self) -> ToastSettings {
        ToastSettings {
            transient: Duration::from_secs(self.notifications.toast_seconds),
            sticky: Duration::from_secs(self.notifications.sticky_toast_seconds),
            max_visible: self.notifications.max_toasts.max(1),
        }
    }

    pub fn highlight(&self) -> Duration {
        Duration::from_millis(self.highlight_ms)
    }

    /// Set one key from its string form. An empty value clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        fn number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
        where
            T::Err: std::fmt::Display,
        {
            value
                .parse()
                .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e))
        }
        fn optional(value: &str) -> Option<&str> {
            Some(value.trim()).filter(|v| !v.is_empty())
        }

        match key {
            "api_base_url" => {
                Url::parse(value).with_context(|| format!("Invalid URL: {}", value))?;
                self.api_base_url = value.to_string();
            }
            "realtime_url" => {
                if let Some(url) = optional(value) {
                    Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
                }
                self.realtime_url = optional(value).map(String::from);
            }
            "user.id" => {
                self.user.id = optional(value).map(|v| number(key, v)).transpose()?;
            }
            "user.role" => {
                self.user.role = match optional(value).map(str::to_lowercase).as_deref() {
                    Some("student") => Some(Role::Student),
                    Some("staff") => Some(Role::Staff),
                    None => None,
                    Some(other) => bail!("Unknown role: {}. Use: student, staff", other),
                };
            }
            "user.role_id" => {
                self.user.role_id = optional(value).map(|v| number(key, v)).transpose()?;
            }
            "user.name" => self.user.name = optional(value).map(String::from),
            "notifications.toast_seconds" => {
                self.notifications.toast_seconds = number(key, value)?;
            }
            "notifications.sticky_toast_seconds" => {
                self.notifications.sticky_toast_seconds = number(key, value)?;
            }
            "notifications.max_toasts" => {
                self.notifications.max_toasts = number(key, value)?;
            }
            "highlight_ms" => self.highlight_ms = number(key, value)?,
            "data_dir" => self.data_dir = optional(value).map(PathBuf::from),
            other => bail!("Unknown config key: {}. Keys: {}", other, KEYS.join(", ")),
        }
        Ok(())
    }
}
