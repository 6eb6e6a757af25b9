use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable overriding `api.base_url`.
pub const API_URL_ENV: &str = "STUDENTHUB_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub retry: RetryConfig,
  pub cache: CacheConfig,
}

/// How the session credential travels to the backend.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CredentialMode {
  /// `Authorization: Bearer <token>` only
  Bearer,
  /// Rely on the session cookie set by the backend
  Cookie,
  /// Send both; whichever the deployment honours wins
  #[default]
  Both,
}

impl CredentialMode {
  pub fn sends_bearer(self) -> bool {
    matches!(self, Self::Bearer | Self::Both)
  }

  pub fn keeps_cookies(self) -> bool {
    matches!(self, Self::Cookie | Self::Both)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Timeout for reads, in seconds
  pub timeout_secs: u64,
  /// Timeout for mutations; twice the read timeout when unset
  pub write_timeout_secs: Option<u64>,
  pub credentials: CredentialMode,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: "https://studenthub-backend.vercel.app".to_string(),
      timeout_secs: 20,
      write_timeout_secs: None,
      credentials: CredentialMode::default(),
    }
  }
}

impl ApiConfig {
  pub fn timeout(&self) -> Duration {
    Duration::from_secs(self.timeout_secs)
  }

  pub fn write_timeout(&self) -> Duration {
    self
      .write_timeout_secs
      .map(Duration::from_secs)
      .unwrap_or_else(|| self.timeout() * 2)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  /// Total attempts for idempotent reads, first try included
  pub max_attempts: u32,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_attempts: 3,
      base_delay_ms: 250,
      max_delay_ms: 4000,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Default staleness for cached reads that don't ask for live data
  pub stale_secs: u64,
  /// How long an unobserved entry survives before collection
  pub gc_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      stale_secs: 60,
      gc_secs: 300,
    }
  }
}

impl CacheConfig {
  pub fn stale_time(&self) -> Duration {
    Duration::from_secs(self.stale_secs)
  }

  pub fn gc_time(&self) -> Duration {
    Duration::from_secs(self.gc_secs)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./studenthub.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/studenthub/config.yaml
  ///
  /// Without any file the built-in defaults are used. `STUDENTHUB_API_URL`
  /// overrides the backend URL either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_api_url_override(std::env::var(API_URL_ENV).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("studenthub.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("studenthub").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    // An empty file is valid and means "all defaults".
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents)?;
    Ok(config)
  }

  fn with_api_url_override(mut self, url: Option<String>) -> Self {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
      self.api.base_url = url;
    }
    self
  }

  /// Directory for the credential database and log files.
  pub fn data_dir() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("studenthub"))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_partial_yaml_keeps_defaults() {
    let config = Config::parse(
      r#"
api:
  base_url: http://localhost:8080
  credentials: bearer
retry:
  max_attempts: 5
"#,
    )
    .unwrap();

    assert_eq!(config.api.base_url, "http://localhost:8080");
    assert_eq!(config.api.credentials, CredentialMode::Bearer);
    assert_eq!(config.api.timeout(), Duration::from_secs(20));
    assert_eq!(config.api.write_timeout(), Duration::from_secs(40));
    assert_eq!(config.retry.max_attempts, 5);
    assert_eq!(config.retry.base_delay_ms, 250);
    assert_eq!(config.cache.gc_secs, 300);
  }

  #[test]
  fn test_empty_file_is_default() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.credentials, CredentialMode::Both);
    assert!(config.api.credentials.sends_bearer());
    assert!(config.api.credentials.keeps_cookies());
  }

  #[test]
  fn test_explicit_write_timeout() {
    let config = Config::parse("api:\n  timeout_secs: 10\n  write_timeout_secs: 15\n").unwrap();
    assert_eq!(config.api.write_timeout(), Duration::from_secs(15));
  }

  #[test]
  fn test_missing_explicit_path_is_error() {
    let err = Config::load(Some(Path::new("/definitely/not/here.yaml"))).unwrap_err();
    assert!(err.to_string().contains("Config file not found"));
  }

  #[test]
  fn test_url_override() {
    let config = Config::default().with_api_url_override(Some("http://127.0.0.1:9".to_string()));
    assert_eq!(config.api.base_url, "http://127.0.0.1:9");

    let config = Config::default().with_api_url_override(Some("  ".to_string()));
    assert_eq!(config.api.base_url, ApiConfig::default().base_url);
  }

  #[test]
  fn test_loads_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("studenthub.yaml");
    std::fs::write(&path, "cache:\n  stale_secs: 5\n").unwrap();

    let config = Config::load_from_path(&path).unwrap();
    assert_eq!(config.cache.stale_time(), Duration::from_secs(5));
  }
}
