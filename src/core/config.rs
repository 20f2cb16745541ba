use std::error::Error as StdError;
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::core::aggregator::RacePolicy;
use crate::core::retry::RetryPolicy;

pub const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";
pub const DEFAULT_REFERER: &str = "https://github.com/chimera-ai/chimera";
pub const DEFAULT_TITLE: &str = "ChimeraAI";

/// OpenRouter free-tier roster used when no models are configured.
const DEFAULT_MODELS: &[&str] = &[
    "google/gemini-2.0-flash-exp:free",
    "deepseek/deepseek-chat:free",
    "meta-llama/llama-3.3-70b-instruct:free",
];

const API_KEY_VARS: &[&str] = &["OPENROUTER_API_KEY", "CHIMERA_API_KEY"];

/// Errors that can occur when loading configuration from disk.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "Failed to read config at {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "Failed to parse config at {}: {}", path.display(), source)
            }
        }
    }
}

impl StdError for ConfigError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub base_url: Option<String>,
    pub models: Option<Vec<String>>,
    pub race_policy: Option<String>,
    pub session_file: Option<String>,
    pub referer: Option<String>,
    pub title: Option<String>,
    pub retry: Option<RetryConfig>,
}

impl Config {
    pub fn load() -> Result<Config, Box<dyn StdError>> {
        Self::load_from_path(&Self::config_path())
    }

    pub fn load_from_path(config_path: &PathBuf) -> Result<Config, Box<dyn StdError>> {
        if config_path.exists() {
            let contents = fs::read_to_string(config_path).map_err(|source| ConfigError::Read {
                path: config_path.clone(),
                source,
            })?;
            let config: Config =
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: config_path.clone(),
                    source,
                })?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    pub fn save(&self) -> Result<(), Box<dyn StdError>> {
        self.save_to_path(&Self::config_path())
    }

    pub(crate) fn save_to_path(&self, config_path: &Path) -> Result<(), Box<dyn StdError>> {
        let parent = config_path
            .parent()
            .filter(|dir| !dir.as_os_str().is_empty());

        if let Some(dir) = parent {
            fs::create_dir_all(dir)?;
        }

        let contents = toml::to_string_pretty(self)?;
        let mut temp_file = match parent {
            Some(dir) => NamedTempFile::new_in(dir)?,
            None => NamedTempFile::new()?,
        };

        temp_file.write_all(contents.as_bytes())?;
        temp_file
            .persist(config_path)
            .map_err(|err| -> Box<dyn StdError> { Box::new(err) })?;
        Ok(())
    }

    pub(crate) fn config_path() -> PathBuf {
        let proj_dirs =
            ProjectDirs::from("ai", "chimera", "chimera").expect("Failed to determine config directory");
        proj_dirs.config_dir().join("config.toml")
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    pub fn referer(&self) -> &str {
        self.referer.as_deref().unwrap_or(DEFAULT_REFERER)
    }

    pub fn title(&self) -> &str {
        self.title.as_deref().unwrap_or(DEFAULT_TITLE)
    }

    pub fn models(&self) -> Vec<String> {
        match &self.models {
            Some(models) if !models.is_empty() => models.clone(),
            _ => DEFAULT_MODELS.iter().map(|m| m.to_string()).collect(),
        }
    }

    pub fn race_policy(&self) -> RacePolicy {
        self.race_policy
            .as_deref()
            .and_then(RacePolicy::from_config)
            .unwrap_or_default()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let defaults = RetryPolicy::default();
        match &self.retry {
            None => defaults,
            Some(retry) => RetryPolicy {
                max_attempts: retry.max_attempts.unwrap_or(defaults.max_attempts),
                base_delay: retry
                    .base_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.base_delay),
                max_delay: retry
                    .max_delay_ms
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.max_delay),
                jitter: defaults.jitter,
            },
        }
    }

    pub fn session_file(&self) -> Option<PathBuf> {
        self.session_file.as_ref().map(PathBuf::from)
    }

    /// The bearer token comes from the environment, never from the config
    /// file on disk.
    pub fn api_key() -> Result<String, Box<dyn StdError>> {
        for var in API_KEY_VARS {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    return Ok(key);
                }
            }
        }
        Err(format!(
            "No API key found. Set one of: {}",
            API_KEY_VARS.join(", ")
        )
        .into())
    }

    pub fn set(&mut self, key: &str, value: &str) -> Result<String, Box<dyn StdError>> {
        match key {
            "base-url" => {
                self.base_url = Some(value.to_string());
                Ok(format!("Set base-url to {value}"))
            }
            "models" => {
                let models: Vec<String> = value
                    .split(',')
                    .map(str::trim)
                    .filter(|m| !m.is_empty())
                    .map(str::to_string)
                    .collect();
                if models.is_empty() {
                    return Err("models must be a comma-separated list of model ids".into());
                }
                let summary = models.join(", ");
                self.models = Some(models);
                Ok(format!("Set models to {summary}"))
            }
            "race-policy" => {
                let policy = RacePolicy::from_config(value)
                    .ok_or("race-policy must be first-settled or first-success")?;
                self.race_policy = Some(policy.as_str().to_string());
                Ok(format!("Set race-policy to {}", policy.as_str()))
            }
            "session-file" => {
                self.session_file = Some(value.to_string());
                Ok(format!("Set session-file to {value}"))
            }
            _ => Err(format!("Unknown config key: {key}").into()),
        }
    }

    pub fn unset(&mut self, key: &str) -> Result<String, Box<dyn StdError>> {
        match key {
            "base-url" => self.base_url = None,
            "models" => self.models = None,
            "race-policy" => self.race_policy = None,
            "session-file" => self.session_file = None,
            _ => return Err(format!("Unknown config key: {key}").into()),
        }
        Ok(format!("Unset {key}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_fields_are_absent() {
        let config = Config::default();
        assert_eq!(config.base_url(), DEFAULT_BASE_URL);
        assert_eq!(config.models().len(), 3);
        assert_eq!(config.race_policy(), RacePolicy::FirstSettled);
        assert_eq!(config.retry_policy().max_attempts, 3);
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");

        let mut config = Config::default();
        config.set("base-url", "https://example.com/v1").unwrap();
        config.set("models", "a/one, b/two").unwrap();
        config.set("race-policy", "first-success").unwrap();
        config.save_to_path(&path).expect("save");

        let loaded = Config::load_from_path(&path).expect("load");
        assert_eq!(loaded.base_url(), "https://example.com/v1");
        assert_eq!(loaded.models(), vec!["a/one", "b/two"]);
        assert_eq!(loaded.race_policy(), RacePolicy::FirstSuccess);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut config = Config::default();
        assert!(config.set("race-policy", "fastest").is_err());
        assert!(config.set("models", " , ,").is_err());
        assert!(config.set("nope", "x").is_err());
        assert!(config.unset("nope").is_err());
    }

    #[test]
    fn retry_policy_honors_overrides() {
        let config = Config {
            retry: Some(RetryConfig {
                max_attempts: Some(5),
                base_delay_ms: Some(250),
                max_delay_ms: None,
            }),
            ..Config::default()
        };
        let policy = config.retry_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.base_delay, Duration::from_millis(250));
        assert_eq!(policy.max_delay, Duration::from_millis(10000));
    }
}
