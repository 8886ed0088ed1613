use secrecy::{ExposeSecret, SecretBox};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable that overrides the persisted `apiKey` entry.
pub const API_KEY_ENV: &str = "COMPANION_API_KEY";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(String),
    #[error("Config parse error: {0}")]
    Parse(String),
    #[error("Config write error: {0}")]
    Write(String),
    #[error("Missing API key: set {API_KEY_ENV} or the apiKey config entry")]
    MissingApiKey,
}

/// Persisted user settings. Loaded once at startup and treated as an
/// immutable snapshot by the controller; only explicit user action
/// (CLI overrides followed by `save`) writes it back.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    /// Chat API key. Empty means "take it from the environment".
    pub api_key: String,
    /// Trigger phrase, matched case-insensitively as a substring.
    pub wake_word: String,
    /// Software gain applied to microphone samples (clamped to 1x-4x).
    pub mic_gain_multiplier: f32,
    /// Which built-in personality to load.
    pub personality_id: String,
    /// Inactivity window while listening before giving up, in seconds.
    pub listen_timeout_secs: u64,
    /// Ignore wake matches this soon after a completed session, in seconds.
    pub wake_cooldown_secs: u64,
    /// When set, each recognition session is dumped as a WAV file here.
    pub capture_dump_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            wake_word: "mango".to_string(),
            mic_gain_multiplier: 2.0,
            personality_id: "casual".to_string(),
            listen_timeout_secs: 8,
            wake_cooldown_secs: 2,
            capture_dump_dir: None,
        }
    }
}

impl Config {
    /// Load config from a JSON file. A missing file is reported as
    /// `NotFound` so callers can fall back to defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ConfigError::NotFound(path.display().to_string()));
            }
            Err(e) => return Err(ConfigError::Parse(e.to_string())),
        };

        let mut config: Config =
            serde_json::from_str(&raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.mic_gain_multiplier = config.mic_gain_multiplier.clamp(1.0, 4.0);
        Ok(config)
    }

    /// Load config, falling back to defaults if the file is missing or
    /// unreadable. A broken config never aborts startup.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => {
                log::info!("Loaded config from {}", path.display());
                config
            }
            Err(ConfigError::NotFound(_)) => {
                log::info!("No config at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                log::warn!("Config load failed ({}), using defaults", e);
                Self::default()
            }
        }
    }

    /// Persist the config as pretty-printed JSON.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| ConfigError::Write(e.to_string()))?;
        std::fs::write(path, raw).map_err(|e| ConfigError::Write(e.to_string()))?;
        log::info!("Saved config to {}", path.display());
        Ok(())
    }

    pub fn listen_timeout(&self) -> Duration {
        Duration::from_secs(self.listen_timeout_secs)
    }

    pub fn wake_cooldown(&self) -> Duration {
        Duration::from_secs(self.wake_cooldown_secs)
    }

    /// Resolve the API credential: the environment wins over the config
    /// file so keys can stay out of persisted settings.
    pub fn api_credential(&self) -> Result<ApiCredential, ConfigError> {
        dotenvy::dotenv().ok();

        let key = match env::var(API_KEY_ENV) {
            Ok(key) if !key.trim().is_empty() => key,
            _ if !self.api_key.trim().is_empty() => self.api_key.clone(),
            _ => return Err(ConfigError::MissingApiKey),
        };

        Ok(ApiCredential {
            key: SecretBox::new(Box::new(key)),
        })
    }
}

/// API key kept behind `secrecy` so it never lands in debug output.
#[derive(Debug)]
pub struct ApiCredential {
    key: SecretBox<String>,
}

impl ApiCredential {
    /// Expose the key for an outbound request header.
    pub fn key(&self) -> &str {
        self.key.expose_secret()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.wake_word, "mango");
        assert_eq!(config.listen_timeout(), Duration::from_secs(8));
        assert_eq!(config.wake_cooldown(), Duration::from_secs(2));
        assert!(config.capture_dump_dir.is_none());
    }

    #[test]
    fn round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("companion.json");

        let mut config = Config::default();
        config.wake_word = "beebo".to_string();
        config.mic_gain_multiplier = 3.0;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn missing_file_is_not_found() {
        let dir = tempdir().unwrap();
        let err = Config::load(&dir.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn load_or_default_recovers_from_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("companion.json");
        std::fs::write(&path, "not json at all").unwrap();

        let config = Config::load_or_default(&path);
        assert_eq!(config, Config::default());
    }

    #[test]
    fn camel_case_keys_on_disk() {
        let json = serde_json::to_string(&Config::default()).unwrap();
        assert!(json.contains("\"apiKey\""));
        assert!(json.contains("\"wakeWord\""));
        assert!(json.contains("\"micGainMultiplier\""));
        assert!(json.contains("\"personalityId\""));
    }

    #[test]
    fn gain_is_clamped_on_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("companion.json");
        std::fs::write(&path, r#"{"micGainMultiplier": 9.5}"#).unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.mic_gain_multiplier, 4.0);
    }

    #[test]
    fn config_api_key_used_when_env_unset() {
        let mut config = Config::default();
        config.api_key = "test_key_1234".to_string();
        // Only meaningful when the env override is absent.
        if env::var(API_KEY_ENV).is_err() {
            let cred = config.api_credential().unwrap();
            assert_eq!(cred.key(), "test_key_1234");
        }
    }
}
