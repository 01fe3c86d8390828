use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  /// Name stamped on parecer audit fields
  pub user: Option<String>,
  /// Default clinic/provider for new drafts
  pub clinic: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_ttl_minutes")]
  pub ttl_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_minutes: default_ttl_minutes(),
    }
  }
}

fn default_timeout_secs() -> u64 {
  30
}

fn default_true() -> bool {
  true
}

fn default_ttl_minutes() -> i64 {
  crate::cache::DEFAULT_TTL_MINUTES
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./previas.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/previas/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/previas/config.yaml\n\
                 See config.example.yaml for the format."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("previas.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("previas").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents)?;
    if config.cache.ttl_minutes <= 0 {
      return Err(eyre!("cache.ttl_minutes must be positive"));
    }
    Ok(config)
  }

  /// API token from `PREVIAS_API_TOKEN`, if set. The API may also run unauthenticated.
  pub fn get_api_token() -> Option<String> {
    std::env::var("PREVIAS_API_TOKEN")
      .ok()
      .map(|t| t.trim().to_string())
      .filter(|t| !t.is_empty())
  }

  pub fn cache_ttl(&self) -> chrono::Duration {
    chrono::Duration::minutes(self.cache.ttl_minutes)
  }
}

/// Directory for the cache database and log files.
pub fn data_dir() -> Result<PathBuf> {
  let base = dirs::data_dir().ok_or_else(|| eyre!("Could not determine data directory"))?;
  let dir = base.join("previas");
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create data directory {}: {}", dir.display(), e))?;
  Ok(dir)
}
