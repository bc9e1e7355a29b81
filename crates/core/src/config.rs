use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Startup option used when a session is started without one.
pub const DEFAULT_STARTUP_OPTION: &str = "-nodesktop";

/// Startup option used when no shared session exists and one must be launched.
pub const DEFAULT_SHARED_STARTUP_OPTION: &str = "-r matlab.engine.shareEngine";

/// First delay between two polls of a pending call.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2;

/// Upper bound for the poll back-off.
pub const DEFAULT_MAX_POLL_INTERVAL_MS: u64 = 50;

/// On-disk client settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Startup option for plain session starts.
    #[serde(default = "default_startup_option")]
    pub startup_option: String,
    /// Startup option used to launch a shared session when none exists.
    #[serde(default = "default_shared_startup_option")]
    pub shared_startup_option: String,
    /// First poll interval in milliseconds (0 = default).
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Poll back-off cap in milliseconds (0 = default).
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,
    /// `tracing` filter directive used when `RUST_LOG` is not set.
    #[serde(default)]
    pub log_filter: Option<String>,
}

fn default_startup_option() -> String {
    DEFAULT_STARTUP_OPTION.to_string()
}

fn default_shared_startup_option() -> String {
    DEFAULT_SHARED_STARTUP_OPTION.to_string()
}

fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_max_poll_interval_ms() -> u64 {
    DEFAULT_MAX_POLL_INTERVAL_MS
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            startup_option: default_startup_option(),
            shared_startup_option: default_shared_startup_option(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            max_poll_interval_ms: DEFAULT_MAX_POLL_INTERVAL_MS,
            log_filter: None,
        }
    }
}

impl ClientConfig {
    fn normalize(&mut self) {
        self.startup_option = self.startup_option.trim().to_string();

        self.shared_startup_option = self.shared_startup_option.trim().to_string();
        if self.shared_startup_option.is_empty() {
            self.shared_startup_option = default_shared_startup_option();
        }

        if self.poll_interval_ms == 0 {
            self.poll_interval_ms = DEFAULT_POLL_INTERVAL_MS;
        }
        if self.max_poll_interval_ms == 0 {
            self.max_poll_interval_ms = DEFAULT_MAX_POLL_INTERVAL_MS;
        }
        self.max_poll_interval_ms = self.max_poll_interval_ms.max(self.poll_interval_ms);

        self.log_filter = self.log_filter.as_ref().map(|s| s.trim().to_string());
        if matches!(self.log_filter.as_deref(), Some(s) if s.is_empty()) {
            self.log_filter = None;
        }
    }
}

fn xdg_config_home() -> anyhow::Result<PathBuf> {
    if let Some(dir) = std::env::var_os("XDG_CONFIG_HOME") {
        let dir = PathBuf::from(dir);
        if dir.as_os_str().is_empty() {
            anyhow::bail!("XDG_CONFIG_HOME is set but empty");
        }
        return Ok(dir);
    }

    let home = std::env::var_os("HOME").ok_or_else(|| anyhow::anyhow!("HOME is not set"))?;
    let home = PathBuf::from(home);
    if home.as_os_str().is_empty() {
        anyhow::bail!("HOME is set but empty");
    }
    Ok(home.join(".config"))
}

/// `$XDG_CONFIG_HOME/enginelink/config.json`.
pub fn client_config_path() -> anyhow::Result<PathBuf> {
    Ok(xdg_config_home()?.join("enginelink").join("config.json"))
}

/// Load the client config from its default location. `None` if no file exists.
pub fn load_client_config() -> anyhow::Result<Option<ClientConfig>> {
    load_client_config_from(&client_config_path()?)
}

/// Load the client config from `path`. `None` if no file exists.
pub fn load_client_config_from(path: &Path) -> anyhow::Result<Option<ClientConfig>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = std::fs::read_to_string(path)?;
    let mut cfg: ClientConfig = serde_json::from_str(&raw)
        .map_err(|err| anyhow::anyhow!("parse {}: {err}", path.display()))?;
    cfg.normalize();
    debug!(path = %path.display(), "loaded client config");
    Ok(Some(cfg))
}

/// Save the client config to its default location.
pub fn save_client_config(cfg: &ClientConfig) -> anyhow::Result<()> {
    save_client_config_to(&client_config_path()?, cfg)
}

/// Save the client config to `path`, replacing any existing file atomically.
pub fn save_client_config_to(path: &Path, cfg: &ClientConfig) -> anyhow::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("invalid config path: {}", path.display()))?;
    std::fs::create_dir_all(dir)?;

    let mut cfg = cfg.clone();
    cfg.normalize();

    let json = serde_json::to_string_pretty(&cfg)?;
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, json)?;
    std::fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        assert_eq!(load_client_config_from(&path).unwrap(), None);
    }

    #[test]
    fn partial_file_gets_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{ "poll_interval_ms": 0, "log_filter": "  " }"#).unwrap();

        let cfg = load_client_config_from(&path).unwrap().unwrap();
        assert_eq!(cfg, ClientConfig::default());
    }

    #[test]
    fn save_then_load_normalizes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let cfg = ClientConfig {
            startup_option: "  -nosplash ".to_string(),
            poll_interval_ms: 100,
            max_poll_interval_ms: 10,
            log_filter: Some("enginelink=debug".to_string()),
            ..ClientConfig::default()
        };
        save_client_config_to(&path, &cfg).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let loaded = load_client_config_from(&path).unwrap().unwrap();
        assert_eq!(loaded.startup_option, "-nosplash");
        assert_eq!(loaded.poll_interval_ms, 100);
        assert_eq!(loaded.max_poll_interval_ms, 100);
        assert_eq!(loaded.log_filter.as_deref(), Some("enginelink=debug"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        let err = load_client_config_from(&path).unwrap_err();
        assert!(err.to_string().contains("config.json"));
    }
}
