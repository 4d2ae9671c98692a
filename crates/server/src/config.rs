use std::fs;

use serde::Deserialize;
use tracing::warn;

pub const DEFAULT_MAX_BODY_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub server_bind: String,
    pub database_url: String,
    pub max_body_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_bind: "127.0.0.1:8080".into(),
            database_url: "sqlite://./data/surveys.db".into(),
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
        }
    }
}

/// Optional `server.toml` contents.
#[derive(Debug, Default, Deserialize)]
struct FileSettings {
    bind_addr: Option<String>,
    database_url: Option<String>,
    max_body_bytes: Option<usize>,
}

/// Defaults, then `server.toml`, then environment variables.
pub fn load_settings() -> Settings {
    let file_cfg = match fs::read_to_string("server.toml") {
        Ok(raw) => parse_file_settings(&raw),
        Err(_) => FileSettings::default(),
    };
    apply_overrides(Settings::default(), file_cfg, |key| std::env::var(key).ok())
}

fn parse_file_settings(raw: &str) -> FileSettings {
    toml::from_str::<FileSettings>(raw).unwrap_or_else(|error| {
        warn!(%error, "ignoring unreadable server.toml");
        FileSettings::default()
    })
}

fn apply_overrides(
    mut settings: Settings,
    file_cfg: FileSettings,
    env: impl Fn(&str) -> Option<String>,
) -> Settings {
    if let Some(v) = file_cfg.bind_addr {
        settings.server_bind = v;
    }
    if let Some(v) = file_cfg.database_url {
        settings.database_url = v;
    }
    if let Some(v) = file_cfg.max_body_bytes {
        settings.max_body_bytes = v;
    }

    if let Some(v) = env("SERVER_BIND") {
        settings.server_bind = v;
    }
    if let Some(v) = env("APP__BIND_ADDR") {
        settings.server_bind = v;
    }

    if let Some(v) = env("DATABASE_URL") {
        settings.database_url = v;
    }
    if let Some(v) = env("APP__DATABASE_URL") {
        settings.database_url = v;
    }

    if let Some(v) = env("APP__MAX_BODY_BYTES") {
        match v.parse::<usize>() {
            Ok(parsed) if parsed > 0 => settings.max_body_bytes = parsed,
            _ => warn!(value = %v, "ignoring invalid APP__MAX_BODY_BYTES"),
        }
    }

    settings
}

/// Normalizes the configured url and makes sure a file-backed database has
/// somewhere to live.
pub fn prepare_database_url(raw_database_url: &str) -> anyhow::Result<String> {
    let database_url = normalize_database_url(raw_database_url);
    storage::ensure_sqlite_parent_dir_exists(&database_url)?;
    Ok(database_url)
}

fn normalize_database_url(raw_database_url: &str) -> String {
    let raw = raw_database_url.trim();
    if raw.is_empty() {
        return Settings::default().database_url;
    }
    if raw.starts_with("sqlite::memory:") || raw.contains("://") {
        return raw.to_string();
    }

    let path = raw.strip_prefix("sqlite:").unwrap_or(raw).replace('\\', "/");
    format!("sqlite://{path}")
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
