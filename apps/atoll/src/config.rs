use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::PathBuf;
use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://api.atoll.sh";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to determine a configuration directory for this platform")]
    NoConfigDir,
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid configuration file {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

/// Persisted CLI state: the API base and the default app/env selection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api_base: Option<String>,
    #[serde(default)]
    pub default_app: Option<String>,
    #[serde(default)]
    pub default_env: Option<String>,
}

impl Config {
    /// Load the stored configuration, if any. The `ATOLL_API_BASE`
    /// environment variable and `--api-base` flag take precedence over the
    /// stored value; that resolution happens in [`Config::resolve_api_base`].
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_file_path()?;
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = config_file_path()?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::Write {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let raw = toml::to_string_pretty(self)?;
        fs::write(&path, raw).map_err(|source| ConfigError::Write {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn resolve_api_base(&self, flag: Option<&str>) -> String {
        if let Some(flag) = flag {
            let trimmed = flag.trim();
            if !trimmed.is_empty() {
                return trimmed.to_string();
            }
        }
        if let Ok(value) = env::var("ATOLL_API_BASE") {
            let trimmed = value.trim().to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.api_base
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| DEFAULT_API_BASE.to_string())
    }

    /// Resolve the target app/env from flags, falling back to the stored
    /// defaults. Returns `None` when neither source names both halves.
    pub fn resolve_target(
        &self,
        app_flag: Option<&str>,
        env_flag: Option<&str>,
    ) -> Option<(String, String)> {
        let app = app_flag
            .map(str::to_string)
            .or_else(|| self.default_app.clone())?;
        let env = env_flag
            .map(str::to_string)
            .or_else(|| self.default_env.clone())?;
        Some((app, env))
    }
}

pub fn config_dir() -> Result<PathBuf, ConfigError> {
    let dirs = ProjectDirs::from("sh", "Atoll", "atoll").ok_or(ConfigError::NoConfigDir)?;
    Ok(dirs.config_dir().to_path_buf())
}

fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{LazyLock, Mutex};

    // Environment variable tests must not run in parallel.
    static ENV_MUTEX: LazyLock<Mutex<()>> = LazyLock::new(|| Mutex::new(()));

    #[test]
    fn flag_wins_over_everything() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let config = Config {
            api_base: Some("https://stored.example".into()),
            ..Config::default()
        };
        assert_eq!(
            config.resolve_api_base(Some("https://flag.example")),
            "https://flag.example"
        );
    }

    #[test]
    fn env_wins_over_stored_value() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let original = env::var("ATOLL_API_BASE").ok();
        unsafe {
            env::set_var("ATOLL_API_BASE", "https://env.example");
        }
        let config = Config {
            api_base: Some("https://stored.example".into()),
            ..Config::default()
        };
        assert_eq!(config.resolve_api_base(None), "https://env.example");
        unsafe {
            match original {
                Some(value) => env::set_var("ATOLL_API_BASE", value),
                None => env::remove_var("ATOLL_API_BASE"),
            }
        }
    }

    #[test]
    fn defaults_to_public_api_base() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let original = env::var("ATOLL_API_BASE").ok();
        unsafe {
            env::remove_var("ATOLL_API_BASE");
        }
        let config = Config::default();
        assert_eq!(config.resolve_api_base(None), DEFAULT_API_BASE);
        unsafe {
            if let Some(value) = original {
                env::set_var("ATOLL_API_BASE", value);
            }
        }
    }

    #[test]
    fn resolve_target_prefers_flags() {
        let config = Config {
            default_app: Some("stored-app".into()),
            default_env: Some("develop".into()),
            ..Config::default()
        };
        assert_eq!(
            config.resolve_target(Some("flag-app"), None),
            Some(("flag-app".into(), "develop".into()))
        );
        assert_eq!(
            config.resolve_target(None, None),
            Some(("stored-app".into(), "develop".into()))
        );
    }

    #[test]
    fn resolve_target_requires_both_halves() {
        let config = Config::default();
        assert_eq!(config.resolve_target(Some("app"), None), None);
        assert_eq!(config.resolve_target(None, Some("env")), None);
    }
}
