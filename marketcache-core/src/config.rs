//! Configuration: TOML file plus environment overrides.
//!
//! Precedence: explicit file path, then `MARKETCACHE_*` environment
//! variables, then defaults. The API key has no default and must come
//! from one of the two.

use crate::data::provider::DataError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_BASE_URL: &str = "https://www.alphavantage.co";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub api_key: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("market_cache")
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, DataError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| DataError::ConfigError(format!("read {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| DataError::ConfigError(format!("parse {}: {e}", path.display())))
    }

    pub fn from_env() -> Result<Self, DataError> {
        let api_key = std::env::var("MARKETCACHE_API_KEY").map_err(|_| {
            DataError::ConfigError(
                "MARKETCACHE_API_KEY is not set and no config file was given".into(),
            )
        })?;
        let base_url = std::env::var("MARKETCACHE_BASE_URL").unwrap_or_else(|_| default_base_url());
        let cache_dir = std::env::var("MARKETCACHE_CACHE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_cache_dir());
        Ok(Config {
            api_key,
            base_url,
            cache_dir,
        })
    }

    /// File config when a path is given, environment otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self, DataError> {
        match path {
            Some(p) => Self::from_file(p),
            None => Self::from_env(),
        }
    }
}
