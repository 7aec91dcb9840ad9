use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

use crate::dedup::DedupConfig;
use crate::geocode::DEFAULT_NOMINATIM_URL;
use crate::osm::MatchConfig;
use crate::wikivoyage::DEFAULT_API_URL;

const DEFAULT_USER_AGENT: &str = "citywiki/0.1 (city guide importer)";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no database path configured (set global.db_path or pass --db)")]
    MissingDbPath,

    #[error("no OSM extract configured (pass --extract)")]
    MissingExtract,

    #[error("OSM extract not found: {0}")]
    ExtractNotFound(PathBuf),

    #[error("no cities configured (pass --city or add [[cities]] entries)")]
    NoCities,
}

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub global: GlobalConfig,
    pub matching: MatchConfig,
    pub dedup: DedupConfig,
    pub geocoding: GeocodingConfig,
    pub cities: Vec<CityConfig>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GlobalConfig {
    pub db_path: Option<PathBuf>,
    pub wiki_api_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub max_fetch_attempts: u32,
    pub max_concurrent_imports: usize,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            wiki_api_url: DEFAULT_API_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout_secs: 30,
            max_fetch_attempts: 3,
            max_concurrent_imports: 4,
        }
    }
}

impl GlobalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GeocodingConfig {
    pub url: String,
    pub user_agent: String,
    /// Pause between requests; public Nominatim allows one per second
    pub request_delay_ms: u64,
}

impl Default for GeocodingConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_NOMINATIM_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_delay_ms: 1000,
        }
    }
}

impl GeocodingConfig {
    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CityConfig {
    pub name: String,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
}

fn default_max_depth() -> u32 {
    2
}

impl Config {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path).context("Failed to read config file")?;
        let config: Config = toml::from_str(&content).context("Failed to parse config file")?;
        Ok(config)
    }

    /// Load `path` if given, otherwise start from defaults
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// Database path from the command line, falling back to the file
    pub fn require_db_path(&self, cli: Option<&Path>) -> Result<PathBuf, ConfigError> {
        cli.map(Path::to_path_buf)
            .or_else(|| self.global.db_path.clone())
            .ok_or(ConfigError::MissingDbPath)
    }
}

/// Check an extract path before any work starts
pub fn require_extract(path: Option<&Path>) -> Result<PathBuf, ConfigError> {
    let path = path.ok_or(ConfigError::MissingExtract)?;
    if !path.exists() {
        return Err(ConfigError::ExtractNotFound(path.to_path_buf()));
    }
    Ok(path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::RuleKind;
    use std::io::Write;

    #[test]
    fn test_full_config() {
        let raw = r#"
            [global]
            db_path = "/var/lib/citywiki"
            max_concurrent_imports = 8

            [matching]
            batch_radius_m = 15.0
            single_radius_m = 15.0

            [dedup]
            rule = "category_or_name"

            [geocoding]
            url = "http://localhost:8080"

            [[cities]]
            name = "Paris"

            [[cities]]
            name = "Lyon"
            max_depth = 1
        "#;
        let config: Config = toml::from_str(raw).unwrap();

        assert_eq!(config.global.db_path, Some(PathBuf::from("/var/lib/citywiki")));
        assert_eq!(config.global.max_concurrent_imports, 8);
        assert_eq!(config.global.wiki_api_url, DEFAULT_API_URL);
        assert_eq!(config.matching.batch_radius_m, 15.0);
        assert_eq!(config.matching.chunk_size, 100);
        assert_eq!(config.dedup.rule, RuleKind::CategoryOrName);
        assert_eq!(config.dedup.name_threshold, 0.85);
        assert_eq!(config.geocoding.url, "http://localhost:8080");
        assert_eq!(config.geocoding.request_delay_ms, 1000);
        assert_eq!(config.cities.len(), 2);
        assert_eq!(config.cities[0].max_depth, 2);
        assert_eq!(config.cities[1].max_depth, 1);
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.global.max_fetch_attempts, 3);
        assert_eq!(config.matching.batch_radius_m, 20.0);
        assert_eq!(config.matching.single_radius_m, 5.0);
        assert_eq!(config.dedup.rule, RuleKind::NameGated);
        assert!(config.cities.is_empty());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[[cities]]\nname = \"Rome\"").unwrap();

        let config = Config::load_from_file(file.path()).unwrap();
        assert_eq!(config.cities[0].name, "Rome");

        assert!(Config::load_from_file("/nonexistent/citywiki.toml").is_err());
    }

    #[test]
    fn test_required_paths() {
        let config = Config::default();
        assert!(matches!(config.require_db_path(None), Err(ConfigError::MissingDbPath)));
        assert_eq!(
            config.require_db_path(Some(Path::new("/tmp/db"))).unwrap(),
            PathBuf::from("/tmp/db")
        );

        assert!(matches!(require_extract(None), Err(ConfigError::MissingExtract)));
        assert!(matches!(
            require_extract(Some(Path::new("/nonexistent/city.osm.pbf"))),
            Err(ConfigError::ExtractNotFound(_))
        ));
    }
}
