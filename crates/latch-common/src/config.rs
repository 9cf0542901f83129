use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_FILE: &str = ".latch/config.toml";
const DEFAULT_KNOWN_HOSTS_FILE: &str = ".latch/known_hosts";
const DAEMON_LOG_FILE: &str = "latch.log";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatchConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_true")]
    pub use_tls: bool,
    /// Extra CA bundle; when set the chain is validated as well as pinned.
    pub ca_certs: Option<PathBuf>,
    pub nickname: String,
    pub password: Option<String>,
    #[serde(default)]
    pub channels: Vec<String>,
    pub known_hosts_file: PathBuf,
    pub pid_file: Option<PathBuf>,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconnectConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 1_000,
            max_delay_ms: 300_000,
        }
    }
}

impl Default for LatchConfig {
    fn default() -> Self {
        let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self {
            host: "irc.libera.chat".to_string(),
            port: default_port(),
            use_tls: true,
            ca_certs: None,
            nickname: "latch".to_string(),
            password: None,
            channels: Vec::new(),
            known_hosts_file: home.join(DEFAULT_KNOWN_HOSTS_FILE),
            pid_file: None,
            log_level: "info".to_string(),
            log_file: None,
            reconnect: ReconnectConfig::default(),
        }
    }
}

fn default_port() -> u16 {
    6697
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config at {path}: {source}")]
    ReadFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to write config at {path}: {source}")]
    WriteFailed {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config at {path}: {source}")]
    ParseFailed {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("failed to serialize default config: {0}")]
    SerializeFailed(#[from] toml::ser::Error),
    #[error("config has invalid value: {0}")]
    ValidationFailed(String),
}

impl LatchConfig {
    pub fn resolve_path() -> PathBuf {
        if let Ok(path) = env::var("LATCH_CONFIG")
            && !path.trim().is_empty()
        {
            return PathBuf::from(path);
        }

        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(DEFAULT_CONFIG_FILE)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::ReadFailed {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&raw).map_err(|source| ConfigError::ParseFailed {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let raw = toml::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| ConfigError::WriteFailed {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        fs::write(path, raw).map_err(|source| ConfigError::WriteFailed {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(())
    }

    /// Loads the config at `path`, writing the defaults there first if it is missing.
    pub fn load_or_create(path: &Path) -> Result<(Self, bool), ConfigError> {
        if path.exists() {
            return Ok((Self::load(path)?, false));
        }

        let cfg = Self::default();
        cfg.save(path)?;
        Ok((cfg, true))
    }

    /// Log destination for this run. A daemonized process has no terminal, so
    /// without an explicit `log_file` it logs next to the known_hosts file.
    pub fn effective_log_file(&self, daemonized: bool) -> Option<PathBuf> {
        if self.log_file.is_some() || !daemonized {
            return self.log_file.clone();
        }
        let dir = self
            .known_hosts_file
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        Some(dir.join(DAEMON_LOG_FILE))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.host.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "host cannot be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(ConfigError::ValidationFailed(
                "port must be non-zero".to_string(),
            ));
        }
        if self.nickname.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "nickname cannot be empty".to_string(),
            ));
        }
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "log_level cannot be empty".to_string(),
            ));
        }
        if self.known_hosts_file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "known_hosts_file cannot be empty".to_string(),
            ));
        }
        if self.reconnect.max_delay_ms < self.reconnect.initial_delay_ms {
            return Err(ConfigError::ValidationFailed(
                "reconnect.max_delay_ms must be >= reconnect.initial_delay_ms".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn creates_default_config_on_first_load() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("config.toml");

        let (cfg, created) = LatchConfig::load_or_create(&path).expect("create");
        assert!(created);
        assert!(path.exists());
        cfg.validate().expect("defaults are valid");

        let (reloaded, created) = LatchConfig::load_or_create(&path).expect("reload");
        assert!(!created);
        assert_eq!(reloaded.host, cfg.host);
        assert_eq!(reloaded.reconnect, cfg.reconnect);
    }

    #[test]
    fn missing_optional_fields_take_defaults() {
        let raw = r#"
host = "irc.example.net"
nickname = "bot"
known_hosts_file = "/tmp/known_hosts"
log_level = "debug"
"#;
        let cfg: LatchConfig = toml::from_str(raw).expect("parse");
        assert_eq!(cfg.port, 6697);
        assert!(cfg.use_tls);
        assert!(cfg.channels.is_empty());
        assert_eq!(cfg.reconnect, ReconnectConfig::default());
    }

    #[test]
    fn rejects_inverted_backoff_bounds() {
        let mut cfg = LatchConfig::default();
        cfg.reconnect.initial_delay_ms = 10_000;
        cfg.reconnect.max_delay_ms = 5;
        let err = cfg.validate().expect_err("must fail");
        assert!(err.to_string().contains("max_delay_ms"));
    }

    #[test]
    fn daemon_always_gets_a_log_file() {
        let cfg = LatchConfig {
            known_hosts_file: PathBuf::from("/var/lib/latch/known_hosts"),
            log_file: None,
            ..LatchConfig::default()
        };
        assert_eq!(cfg.effective_log_file(false), None);
        assert_eq!(
            cfg.effective_log_file(true),
            Some(PathBuf::from("/var/lib/latch/latch.log"))
        );

        let explicit = LatchConfig {
            log_file: Some(PathBuf::from("/tmp/custom.log")),
            ..cfg
        };
        assert_eq!(
            explicit.effective_log_file(true),
            Some(PathBuf::from("/tmp/custom.log"))
        );
        assert_eq!(
            explicit.effective_log_file(false),
            Some(PathBuf::from("/tmp/custom.log"))
        );
    }

    #[test]
    fn rejects_empty_host() {
        let cfg = LatchConfig {
            host: "  ".to_string(),
            ..LatchConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }
}
