use std::ffi::OsString;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const CONFIG_FILE: &str = "config.toml";
const DATA_DIR: &str = "data";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

/// Optional settings from `config.toml`. Every field may be omitted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub data_dir: Option<PathBuf>,
    pub log_filter: Option<String>,
    pub export_dir: Option<PathBuf>,
}

/// Where the config comes from and whether it has to exist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSource {
    pub path: PathBuf,
    pub required: bool,
}

impl ConfigSource {
    /// `--config` wins over `DAYLOG_CONFIG`; both must point at a real file.
    /// Otherwise the state directory copy is used when present.
    pub fn resolve(cli: Option<PathBuf>, env_value: Option<OsString>, state_dir: &Path) -> Self {
        if let Some(path) = cli {
            return Self { path, required: true };
        }
        if let Some(path) = env_value.filter(|value| !value.is_empty()) {
            return Self {
                path: PathBuf::from(path),
                required: true,
            };
        }
        Self {
            path: state_dir.join(CONFIG_FILE),
            required: false,
        }
    }

    pub fn load(&self) -> Result<Config, ConfigError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound && !self.required => {
                return Ok(Config::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: self.path.clone(),
                    source,
                });
            }
        };
        toml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: self.path.clone(),
            source,
        })
    }
}

impl Config {
    /// `DAYLOG_DATA_DIR` over the config value over `<state_dir>/data`.
    pub fn data_dir(&self, env_value: Option<OsString>, state_dir: &Path) -> PathBuf {
        env_value
            .filter(|value| !value.is_empty())
            .map(PathBuf::from)
            .or_else(|| self.data_dir.clone())
            .unwrap_or_else(|| state_dir.join(DATA_DIR))
    }

    /// `DAYLOG_LOG` over the config value over `info`.
    pub fn log_filter(&self, env_value: Option<String>) -> String {
        env_value
            .filter(|value| !value.trim().is_empty())
            .or_else(|| self.log_filter.clone())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string())
    }

    pub fn export_dir(&self) -> PathBuf {
        self.export_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::fs;
    use std::path::PathBuf;

    use tempfile::tempdir;

    use super::{Config, ConfigError, ConfigSource};

    #[test]
    fn missing_default_config_means_defaults() {
        let state = tempdir().expect("temp dir");
        let source = ConfigSource::resolve(None, None, state.path());
        assert!(!source.required);
        assert_eq!(source.load().expect("defaults"), Config::default());
    }

    #[test]
    fn explicit_config_must_exist() {
        let state = tempdir().expect("temp dir");
        let source = ConfigSource::resolve(
            Some(state.path().join("nope.toml")),
            Some(OsString::from("ignored.toml")),
            state.path(),
        );
        assert!(source.required);
        assert!(matches!(source.load(), Err(ConfigError::Read { .. })));
    }

    #[test]
    fn env_config_path_is_used_without_flag() {
        let state = tempdir().expect("temp dir");
        let source = ConfigSource::resolve(None, Some(OsString::from("/etc/daylog.toml")), state.path());
        assert_eq!(source.path, PathBuf::from("/etc/daylog.toml"));
        assert!(source.required);
    }

    #[test]
    fn parses_settings_and_rejects_unknown_keys() {
        let state = tempdir().expect("temp dir");
        let path = state.path().join("config.toml");
        fs::write(
            &path,
            "data_dir = \"/srv/daylog\"\nlog_filter = \"daylog=debug\"\nexport_dir = \"/tmp/out\"\n",
        )
        .expect("write config");

        let config = ConfigSource::resolve(None, None, state.path())
            .load()
            .expect("config should parse");
        assert_eq!(config.data_dir, Some(PathBuf::from("/srv/daylog")));
        assert_eq!(config.log_filter(None), "daylog=debug");
        assert_eq!(config.export_dir(), PathBuf::from("/tmp/out"));

        fs::write(&path, "colour = \"red\"\n").expect("write config");
        let err = ConfigSource::resolve(None, None, state.path())
            .load()
            .expect_err("unknown key");
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn environment_overrides_config() {
        let config = Config {
            data_dir: Some(PathBuf::from("/from/config")),
            log_filter: Some("warn".to_string()),
            export_dir: None,
        };
        let state = PathBuf::from("/state");

        assert_eq!(
            config.data_dir(Some(OsString::from("/from/env")), &state),
            PathBuf::from("/from/env")
        );
        assert_eq!(config.data_dir(None, &state), PathBuf::from("/from/config"));
        assert_eq!(Config::default().data_dir(None, &state), PathBuf::from("/state/data"));

        assert_eq!(config.log_filter(Some("trace".to_string())), "trace");
        assert_eq!(config.log_filter(Some(" ".to_string())), "warn");
        assert_eq!(Config::default().log_filter(None), "info");
        assert_eq!(Config::default().export_dir(), PathBuf::from("."));
    }
}
