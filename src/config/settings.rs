use crate::engine::EngineConfig;
use crate::error::{Result, SigError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub flag: FlagConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Rule file. Rules are kept in memory only when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct FlagConfig {
    /// Installed as the `flag` rule on start-up if no such rule exists
    #[serde(default)]
    pub regex: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_write_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            path: None,
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl StorageConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

impl Settings {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            SigError::ConfigError(format!("Failed to read config file: {}", e))
        })?;

        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        let settings: Settings = serde_yaml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.storage.write_timeout_ms == 0 {
            return Err(SigError::ConfigError(
                "Storage write timeout must be greater than 0".to_string(),
            ));
        }

        if let Some(ref path) = self.storage.path {
            if path.is_dir() {
                return Err(SigError::ConfigError(format!(
                    "Storage path {:?} is a directory",
                    path
                )));
            }
            if !path.exists() {
                tracing::warn!("Rule file does not exist yet: {:?}", path);
            }
        }

        if self.engine.stream_window == 0 {
            return Err(SigError::ConfigError(
                "Engine stream window must be greater than 0".to_string(),
            ));
        }

        if self.engine.pattern_size_limit == 0 || self.engine.set_size_limit == 0 {
            return Err(SigError::ConfigError(
                "Engine size limits must be greater than 0".to_string(),
            ));
        }

        if let Some(ref regex) = self.flag.regex {
            if regex.is_empty() {
                return Err(SigError::ConfigError("Flag regex cannot be empty".to_string()));
            }
        }

        match self.logging.format.as_str() {
            "pretty" | "compact" | "json" => {}
            other => {
                return Err(SigError::ConfigError(format!(
                    "Unknown log format {:?} (expected pretty, compact or json)",
                    other
                )))
            }
        }

        Ok(())
    }

    pub fn default_config() -> Self {
        Settings {
            storage: StorageConfig {
                path: Some(PathBuf::from("rules.json")),
                write_timeout_ms: 5_000,
            },
            engine: EngineConfig::default(),
            flag: FlagConfig {
                regex: Some("FLAG\\{[A-Za-z0-9_]+\\}".to_string()),
            },
            logging: LoggingConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::PublishMode;

    #[test]
    fn test_default_config() {
        let config = Settings::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.storage.write_timeout(), Duration::from_secs(5));
        assert_eq!(config.engine.publish_mode, PublishMode::Blocking);
    }

    #[test]
    fn test_minimal_yaml() {
        let settings = Settings::from_yaml("{}").unwrap();
        assert!(settings.storage.path.is_none());
        assert!(settings.flag.regex.is_none());
        assert_eq!(settings.logging.level, "info");
        assert_eq!(settings.engine, EngineConfig::default());
    }

    #[test]
    fn test_engine_section() {
        let yaml = r#"
engine:
  publish_mode: supersede
  max_patterns: 100
  stream_window: 4096
flag:
  regex: "CTF\\{.+?\\}"
"#;
        let settings = Settings::from_yaml(yaml).unwrap();
        assert_eq!(settings.engine.publish_mode, PublishMode::Supersede);
        assert_eq!(settings.engine.max_patterns, 100);
        assert_eq!(settings.engine.stream_window, 4096);
        assert_eq!(settings.flag.regex.as_deref(), Some("CTF\\{.+?\\}"));
    }

    #[test]
    fn test_invalid_settings() {
        assert!(matches!(
            Settings::from_yaml("storage:\n  write_timeout_ms: 0\n"),
            Err(SigError::ConfigError(_))
        ));
        assert!(matches!(
            Settings::from_yaml("logging:\n  format: xml\n"),
            Err(SigError::ConfigError(_))
        ));
        assert!(matches!(
            Settings::from_yaml("engine:\n  publish_mode: sometimes\n"),
            Err(SigError::YamlError(_))
        ));
    }

    #[test]
    fn test_round_trip_default_config() {
        let yaml = serde_yaml::to_string(&Settings::default_config()).unwrap();
        let parsed = Settings::from_yaml(&yaml).unwrap();
        assert_eq!(parsed.storage.path, Some(PathBuf::from("rules.json")));
    }
}
