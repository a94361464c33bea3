// Configuration management for playtally
// Handles loading/saving settings, with sensible defaults when config is missing
// Secrets can also come from the environment so the file never has to hold them

use crate::playlists::threshold_from_days;
use anyhow::{Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_path: PathBuf,
    pub spotify: SpotifyConfig,
    pub polling: PollingConfig,
    pub rollover: RolloverConfig,
    pub generator: GeneratorConfig,
    pub alerts: AlertConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpotifyConfig {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub api_url: String,
    pub token_url: String,
    pub market: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolloverConfig {
    pub chart_size: usize,
    pub publish_playlists: bool,
    pub inactive_threshold_days: i64,
    pub sweep_enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratorConfig {
    pub api_key: Option<String>,
    pub api_url: String,
    pub model: String,
    pub max_reprompts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertConfig {
    pub desktop_notifications: bool,
}

impl Default for Config {
    fn default() -> Self {
        let config_dir = config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playtally");

        Self {
            database_path: config_dir.join("music_data.db"),
            spotify: SpotifyConfig {
                client_id: None,
                client_secret: None,
                access_token: None,
                refresh_token: None,
                api_url: "https://api.spotify.com/v1".to_string(),
                token_url: "https://accounts.spotify.com/api/token".to_string(),
                market: "KR".to_string(),
            },
            polling: PollingConfig {
                interval_ms: 10_000,
                request_timeout_ms: 5_000,
            },
            rollover: RolloverConfig {
                chart_size: 5,
                publish_playlists: false,
                inactive_threshold_days: 7,
                sweep_enabled: true,
            },
            generator: GeneratorConfig {
                api_key: None,
                api_url: "https://api.openai.com/v1/chat/completions".to_string(),
                model: "gpt-4.1".to_string(),
                max_reprompts: 3,
            },
            alerts: AlertConfig {
                desktop_notifications: false,
            },
        }
    }
}

impl Config {
    /// Load from the default location, writing defaults there on first run
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(config_path: &Path) -> Result<Self> {
        let mut config = if config_path.exists() {
            let content = fs::read_to_string(config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(config_path)?;
            config
        };

        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;
        self.save_to(&config_path)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(config_path, content)?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("playtally");

        Ok(config_dir.join("config.toml"))
    }

    fn apply_env_overrides(&mut self) {
        override_from_env(&mut self.spotify.client_id, "SPOTIFY_CLIENT_ID");
        override_from_env(&mut self.spotify.client_secret, "SPOTIFY_CLIENT_SECRET");
        override_from_env(&mut self.spotify.access_token, "SPOTIFY_ACCESS_TOKEN");
        override_from_env(&mut self.spotify.refresh_token, "SPOTIFY_REFRESH_TOKEN");
        override_from_env(&mut self.generator.api_key, "OPENAI_API_KEY");
    }

    fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            anyhow::bail!("polling.interval_ms must be greater than zero");
        }
        if self.polling.request_timeout_ms == 0 {
            anyhow::bail!("polling.request_timeout_ms must be greater than zero");
        }
        threshold_from_days(self.rollover.inactive_threshold_days)
            .context("rollover.inactive_threshold_days")?;
        Ok(())
    }
}

fn override_from_env(slot: &mut Option<String>, key: &str) {
    if let Ok(value) = env::var(key) {
        if !value.trim().is_empty() {
            *slot = Some(value);
        }
    }
}
