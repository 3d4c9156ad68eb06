use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;
use shared::domain::{ChannelName, Identity, DEFAULT_CHANNEL};

pub const DEFAULT_CONFIG_PATH: &str = "chat.toml";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Settings {
    pub database_url: String,
    pub channel: String,
    pub user_id: Option<String>,
    pub email: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://./data/chat.db".into(),
            channel: DEFAULT_CHANNEL.into(),
            user_id: None,
            email: None,
        }
    }
}

impl Settings {
    pub fn channel_name(&self) -> ChannelName {
        ChannelName::new(self.channel.clone())
    }

    /// The signed-in identity, when both halves are configured.
    pub fn identity(&self) -> Option<Identity> {
        match (&self.user_id, &self.email) {
            (Some(user_id), Some(email)) => Some(Identity::new(user_id.clone(), email.clone())),
            _ => None,
        }
    }
}

/// Defaults, then the config file (if readable), then the environment.
pub fn load_settings(config_path: &Path) -> Settings {
    let mut settings = Settings::default();
    if let Ok(raw) = fs::read_to_string(config_path) {
        apply_file(&mut settings, &raw);
    }
    apply_env(&mut settings, |key| std::env::var(key).ok());
    settings.database_url = normalize_database_url(&settings.database_url);
    settings
}

fn apply_file(settings: &mut Settings, raw: &str) {
    let Ok(file_cfg) = toml::from_str::<HashMap<String, String>>(raw) else {
        return;
    };
    if let Some(v) = file_cfg.get("database_url") {
        settings.database_url = v.clone();
    }
    if let Some(v) = file_cfg.get("channel") {
        settings.channel = v.clone();
    }
    if let Some(v) = file_cfg.get("user_id") {
        settings.user_id = Some(v.clone());
    }
    if let Some(v) = file_cfg.get("email") {
        settings.email = Some(v.clone());
    }
}

fn apply_env(settings: &mut Settings, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(v) = lookup("CHAT_DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("APP__DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = lookup("CHAT_CHANNEL") {
        settings.channel = v;
    }
    if let Some(v) = lookup("CHAT_USER_ID") {
        settings.user_id = Some(v);
    }
    if let Some(v) = lookup("CHAT_EMAIL") {
        settings.email = Some(v);
    }
}

pub fn normalize_database_url(raw_database_url: &str) -> String {
    let raw_database_url = raw_database_url.trim();

    if raw_database_url.is_empty() {
        return Settings::default().database_url;
    }

    if raw_database_url.starts_with("sqlite:") || raw_database_url.contains("://") {
        return raw_database_url.to_string();
    }

    format!("sqlite://{}", raw_database_url.replace('\\', "/"))
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
