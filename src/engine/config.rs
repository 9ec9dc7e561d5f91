// Sommaii Chat Engine — Client configuration
//
// Resolution order (later wins):
//   1. Built-in defaults
//   2. <config_dir>/sommaii/config.toml
//   3. Environment: SOMMAII_BACKEND_API, SOMMAII_TOKEN_FILE

use crate::atoms::constants::{
    CONFIG_DIR_NAME, CONFIG_FILE_NAME, DEFAULT_BACKEND_URL, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_EVENT_BUFFER, DEFAULT_REQUEST_TIMEOUT_SECS, ENV_BACKEND_API, ENV_TOKEN_FILE,
    NO_ANSWER_MARKER, TOKEN_FILE_NAME,
};
use crate::atoms::error::{EngineError, EngineResult};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL of the chatbot backend API.
    pub backend_url: String,
    pub connect_timeout_secs: u64,
    /// Total timeout for REST calls. The question stream has none.
    pub request_timeout_secs: u64,
    /// Answers containing this phrase skip the law-reference lookup.
    pub no_answer_marker: String,
    pub default_model_id: Option<String>,
    pub token_file: Option<PathBuf>,
    /// Capacity of the turn-update broadcast channel.
    pub event_buffer: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            backend_url: DEFAULT_BACKEND_URL.to_string(),
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            no_answer_marker: NO_ANSWER_MARKER.to_string(),
            default_model_id: None,
            token_file: None,
            event_buffer: DEFAULT_EVENT_BUFFER,
        }
    }
}

impl ClientConfig {
    /// Directory holding config.toml and the token file.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME))
    }

    /// Load from the default location, apply env overrides, validate.
    pub fn load() -> EngineResult<Self> {
        let path = Self::config_dir().map(|d| d.join(CONFIG_FILE_NAME));
        let mut config = match path {
            Some(ref p) if p.exists() => Self::from_file(p)?,
            _ => ClientConfig::default(),
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> EngineResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&raw)?;
        info!("[config] Loaded {}", path.display());
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> EngineResult<Self> {
        Ok(toml::from_str(raw)?)
    }

    /// Apply environment overrides through `lookup` (injectable for tests).
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_BACKEND_API).filter(|v| !v.trim().is_empty()) {
            self.backend_url = url.trim().to_string();
        }
        if let Some(path) = lookup(ENV_TOKEN_FILE).filter(|v| !v.trim().is_empty()) {
            self.token_file = Some(PathBuf::from(path.trim()));
        }
    }

    pub fn validate(&self) -> EngineResult<()> {
        let url = self.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(EngineError::Config(format!(
                "backend_url must be http(s), got scheme '{}'",
                url.scheme()
            )));
        }
        if self.event_buffer == 0 {
            return Err(EngineError::Config("event_buffer must be at least 1".into()));
        }
        if self.no_answer_marker.is_empty() {
            warn!("[config] no_answer_marker is empty, every answer will skip law references");
        }
        Ok(())
    }

    /// Backend base URL, normalized with a trailing slash so `Url::join`
    /// appends endpoint paths instead of replacing the last segment.
    pub fn base_url(&self) -> EngineResult<Url> {
        let trimmed = self.backend_url.trim();
        if trimmed.is_empty() {
            return Err(EngineError::Config("backend_url is empty".into()));
        }
        let normalized = if trimmed.ends_with('/') {
            trimmed.to_string()
        } else {
            format!("{}/", trimmed)
        };
        Ok(Url::parse(&normalized)?)
    }

    /// Where tokens persist: explicit override, else the config dir.
    pub fn token_path(&self) -> Option<PathBuf> {
        self.token_file
            .clone()
            .or_else(|| Self::config_dir().map(|d| d.join(TOKEN_FILE_NAME)))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.no_answer_marker, NO_ANSWER_MARKER);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = ClientConfig::from_toml(
            r#"
            backend_url = "https://api.example.com/api/v1"
            default_model_id = "typhoon"
            "#,
        )
        .unwrap();
        assert_eq!(config.default_model_id.as_deref(), Some("typhoon"));
        assert_eq!(config.request_timeout_secs, DEFAULT_REQUEST_TIMEOUT_SECS);
        assert_eq!(
            config.base_url().unwrap().join("chats/question").unwrap().as_str(),
            "https://api.example.com/api/v1/chats/question"
        );
    }

    #[test]
    fn env_overrides_file() {
        let mut config = ClientConfig::default();
        config.apply_env(|key| match key {
            ENV_BACKEND_API => Some(" https://override.test/ ".into()),
            ENV_TOKEN_FILE => Some("/tmp/tokens.json".into()),
            _ => None,
        });
        assert_eq!(config.backend_url, "https://override.test/");
        assert_eq!(config.token_path(), Some(PathBuf::from("/tmp/tokens.json")));
    }

    #[test]
    fn rejects_bad_backend_url() {
        let mut config = ClientConfig::default();
        config.backend_url = "ftp://files.example.com".into();
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        config.backend_url = "  ".into();
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        config.backend_url = "not a url".into();
        assert!(matches!(config.validate(), Err(EngineError::Url(_))));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = ClientConfig::from_toml("backend_url = [").unwrap_err();
        assert!(matches!(err, EngineError::ConfigParse(_)));
    }
}
