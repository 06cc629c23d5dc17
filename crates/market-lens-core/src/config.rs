use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

use crate::error::{Error, Result};
use crate::extract::SummaryPolicy;
use crate::locale::Locale;

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:5000/api";
pub const API_URL_ENV: &str = "MARKET_LENS_API_URL";
pub const LOCALE_ENV: &str = "MARKET_LENS_LOCALE";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub locale: Locale,
    pub request_timeout_secs: u64,
    pub stream_idle_timeout_secs: u64,
    pub summary_policy: SummaryPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            locale: Locale::default(),
            request_timeout_secs: 120,
            stream_idle_timeout_secs: 90,
            summary_policy: SummaryPolicy::default(),
        }
    }

    /// Loads the user config file (defaults when it does not exist) and
    /// applies environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env_overrides();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(
            std::env::var(API_URL_ENV).ok(),
            std::env::var(LOCALE_ENV).ok(),
        );
    }

    fn apply_overrides(&mut self, api_url: Option<String>, locale: Option<String>) {
        if let Some(url) = api_url.filter(|u| !u.trim().is_empty()) {
            self.api_base_url = url.trim().to_string();
        }
        if let Some(code) = locale {
            match code.parse() {
                Ok(locale) => self.locale = locale,
                Err(e) => warn!("ignoring {}: {}", LOCALE_ENV, e),
            }
        }
    }

    /// Base URL without a trailing slash, ready for `format!("{}/chat/...")`.
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_secs(self.stream_idle_timeout_secs)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or(Error::NoConfigDir)?;
        Ok(config_dir.join("market-lens").join("config.json"))
    }
}
