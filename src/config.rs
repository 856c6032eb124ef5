//! Worker configuration
//!
//! Built once at startup and shared immutably. Sources, lowest precedence first:
//! built-in defaults, a JSON file, then `SWCACHE_*` environment variables.

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::net::{FetchError, DEFAULT_REQUEST_TIMEOUT};
use crate::strategy::{default_rules, StrategyRule, StrategyTable};

/// Default socket path for the control channel
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/swcache.sock";

/// Raw settings as they appear in the config file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Origin the worker is scoped to; relative paths resolve against it
    pub origin: String,
    /// Generation tag embedded in the core store name
    pub version: String,
    /// Prefix shared by every generation's core store
    pub core_prefix: String,
    /// Paths pre-cached at install
    pub manifest: Vec<String>,
    /// Document served when both cache and network fail
    pub offline_path: String,
    pub strategies: Vec<StrategyRule>,
    /// Activate right after install even if another generation is active
    pub skip_waiting: bool,
    pub request_timeout_secs: u64,
    pub socket_path: PathBuf,
    /// Persist stores to disk (under `cache_dir`, or the platform cache dir)
    pub persist: bool,
    pub cache_dir: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            origin: "http://localhost:4000/".to_string(),
            version: "v2".to_string(),
            core_prefix: "fullstack-ai-".to_string(),
            manifest: [
                "/",
                "/archives/",
                "/categories/",
                "/tags/",
                "/css/index.css",
                "/js/main.js",
                "/js/utils.js",
                "/js/search/local-search.js",
                "/offline.html",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            offline_path: "/offline.html".to_string(),
            strategies: default_rules(),
            skip_waiting: false,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
            socket_path: PathBuf::from(DEFAULT_SOCKET_PATH),
            persist: true,
            cache_dir: None,
        }
    }
}

impl Settings {
    /// Load settings from `path`, or from the default config location if present
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match Self::default_path() {
                Some(path) if path.exists() => Self::from_file(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env();
        Ok(settings)
    }

    fn from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        serde_json::from_slice(&data)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    /// `$XDG_CONFIG_HOME/swcache/config.json` or the platform equivalent
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("swcache").join("config.json"))
    }

    fn apply_env(&mut self) {
        if let Ok(origin) = env::var("SWCACHE_ORIGIN") {
            self.origin = origin;
        }
        if let Ok(version) = env::var("SWCACHE_VERSION") {
            self.version = version;
        }
        if let Ok(socket) = env::var("SWCACHE_SOCKET") {
            self.socket_path = PathBuf::from(socket);
        }
    }
}

/// Validated, immutable worker configuration
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub origin: Url,
    pub generation_tag: String,
    pub core_prefix: String,
    pub manifest: Vec<String>,
    pub offline_path: String,
    pub strategies: StrategyTable,
    pub skip_waiting: bool,
    pub request_timeout: Duration,
    pub socket_path: PathBuf,
    pub persist: bool,
    pub cache_dir: Option<PathBuf>,
}

impl WorkerConfig {
    pub fn from_settings(settings: Settings) -> Result<Self> {
        let origin = Url::parse(&settings.origin)
            .with_context(|| format!("Invalid origin: {}", settings.origin))?;
        if !matches!(origin.scheme(), "http" | "https") {
            bail!("Origin must be http or https: {}", origin);
        }
        if settings.version.trim().is_empty() {
            bail!("Generation tag (version) must not be empty");
        }
        if settings.core_prefix.is_empty() {
            bail!("Core store prefix must not be empty");
        }

        let strategies = StrategyTable::from_rules(&settings.strategies)
            .map_err(|e| anyhow!("Invalid strategy pattern: {}", e))?;

        Ok(Self {
            origin,
            generation_tag: settings.version,
            core_prefix: settings.core_prefix,
            manifest: settings.manifest,
            offline_path: settings.offline_path,
            strategies,
            skip_waiting: settings.skip_waiting,
            request_timeout: Duration::from_secs(settings.request_timeout_secs.max(1)),
            socket_path: settings.socket_path,
            persist: settings.persist,
            cache_dir: settings.cache_dir,
        })
    }

    /// Name of this generation's core store
    pub fn core_cache_name(&self) -> String {
        format!("{}{}", self.core_prefix, self.generation_tag)
    }

    /// Whether `name` belongs to some generation's core store
    pub fn is_core_cache(&self, name: &str) -> bool {
        name.starts_with(&self.core_prefix)
    }

    /// Resolve a manifest path or seed URL against the origin
    pub fn resolve_url(&self, path: &str) -> Result<Url, FetchError> {
        Ok(self.origin.join(path)?)
    }

    pub fn offline_url(&self) -> Result<Url, FetchError> {
        self.resolve_url(&self.offline_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(version: &str) -> WorkerConfig {
        WorkerConfig::from_settings(Settings {
            origin: "https://blog.example.com/".to_string(),
            version: version.to_string(),
            ..Settings::default()
        })
        .unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::from_settings(Settings::default()).unwrap();
        assert_eq!(config.generation_tag, "v2");
        assert_eq!(config.core_cache_name(), "fullstack-ai-v2");
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(!config.skip_waiting);
    }

    #[test]
    fn test_core_cache_naming() {
        let config = config_with("v2");
        assert_eq!(config.core_cache_name(), "fullstack-ai-v2");
        assert!(config.is_core_cache("fullstack-ai-v1"));
        assert!(!config.is_core_cache("cdn-cache"));
    }

    #[test]
    fn test_resolve_url() {
        let config = config_with("v2");
        assert_eq!(
            config.resolve_url("/css/index.css").unwrap().as_str(),
            "https://blog.example.com/css/index.css"
        );
        assert_eq!(
            config.resolve_url("https://cdn.jsdelivr.net/x.js").unwrap().as_str(),
            "https://cdn.jsdelivr.net/x.js"
        );
        assert_eq!(config.offline_url().unwrap().path(), "/offline.html");
    }

    #[test]
    fn test_validation() {
        let bad_origin = Settings {
            origin: "ftp://blog.example.com/".to_string(),
            ..Settings::default()
        };
        assert!(WorkerConfig::from_settings(bad_origin).is_err());

        let empty_version = Settings {
            version: "  ".to_string(),
            ..Settings::default()
        };
        assert!(WorkerConfig::from_settings(empty_version).is_err());
    }

    #[test]
    fn test_partial_config_file_uses_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("config.json");
        std::fs::write(&path, r#"{"origin":"https://blog.example.com/","version":"v3"}"#).unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.version, "v3");
        assert_eq!(settings.offline_path, "/offline.html");
        assert_eq!(settings.strategies.len(), 5);
    }
}
