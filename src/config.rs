//! Configuration du relais
//! config.json dans le répertoire courant, sinon le répertoire de config
//! de la plateforme

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config.json file not found at {0}")]
    NotFound(PathBuf),
    #[error("config.json is not a valid JSON file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("'{0}' is missing in config.json")]
    Missing(&'static str),
    #[error("'{0}' has an empty value in config.json")]
    Empty(&'static str),
    #[error("'{0}' must contain only digits in config.json")]
    NotNumeric(&'static str),
    #[error("'desktop_clients' must be a non-empty list in config.json")]
    EmptyClientList,
}

/// Raw file shape; ids come in as strings so validation can report them
/// with the same rules regardless of the JSON number quirks
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    token: Option<String>,
    server_id: Option<String>,
    voice_channel_id: Option<String>,
    announce_channel_id: Option<String>,
    desktop_clients: Option<Vec<String>>,
    microphone_id: Option<String>,
}

/// Validated process configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub token: String,
    pub server_id: u64,
    pub voice_channel_id: u64,
    pub announce_channel_id: u64,
    /// Allow-list of reporting applications for media announcements
    pub desktop_clients: Vec<String>,
    pub microphone_id: String,
}

/// config.json next to the process if present, else the platform config dir
pub fn default_path() -> PathBuf {
    let local = PathBuf::from("config.json");
    if local.exists() {
        return local;
    }

    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("voxbridge")
        .join("config.json")
}

impl RelayConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content =
            fs::read_to_string(path).map_err(|_| ConfigError::NotFound(path.to_path_buf()))?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(content)?;

        let token = require(raw.token, "token")?;
        let server_id = require_id(raw.server_id, "server_id")?;
        let voice_channel_id = require_id(raw.voice_channel_id, "voice_channel_id")?;
        let announce_channel_id = require_id(raw.announce_channel_id, "announce_channel_id")?;
        let microphone_id = require(raw.microphone_id, "microphone_id")?;

        let desktop_clients = raw
            .desktop_clients
            .ok_or(ConfigError::Missing("desktop_clients"))?;
        if desktop_clients.is_empty() {
            return Err(ConfigError::EmptyClientList);
        }

        Ok(Self {
            token,
            server_id,
            voice_channel_id,
            announce_channel_id,
            desktop_clients,
            microphone_id,
        })
    }
}

fn require(value: Option<String>, key: &'static str) -> Result<String, ConfigError> {
    let value = value.ok_or(ConfigError::Missing(key))?;
    if value.is_empty() {
        return Err(ConfigError::Empty(key));
    }
    Ok(value)
}

fn require_id(value: Option<String>, key: &'static str) -> Result<u64, ConfigError> {
    let value = require(value, key)?;
    if !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(ConfigError::NotNumeric(key));
    }
    value.parse().map_err(|_| ConfigError::NotNumeric(key))
}
