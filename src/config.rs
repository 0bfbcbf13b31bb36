use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    #[serde(default)]
    pub library: LibraryConfig,

    #[serde(default)]
    pub scanner: ScannerConfig,

    #[serde(default)]
    pub similarity: SimilarityConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// On-disk layout of the photo library.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibraryConfig {
    /// Root of the incoming scans, walked recursively.
    #[serde(default = "default_unprocessed_dir")]
    pub unprocessed_dir: PathBuf,

    /// Destination for corrected photos, partitioned `YYYY/MM`.
    #[serde(default = "default_processed_dir")]
    pub processed_dir: PathBuf,

    #[serde(default = "default_thumbs_dir")]
    pub thumbs_dir: PathBuf,
}

fn default_unprocessed_dir() -> PathBuf {
    data_root().join("photos/unprocessed")
}

fn default_processed_dir() -> PathBuf {
    data_root().join("photos/processed")
}

fn default_thumbs_dir() -> PathBuf {
    data_root().join("thumbs")
}

fn data_root() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("photodate")
}

impl Default for LibraryConfig {
    fn default() -> Self {
        Self {
            unprocessed_dir: default_unprocessed_dir(),
            processed_dir: default_processed_dir(),
            thumbs_dir: default_thumbs_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    /// Filename substrings that mark vendor sidecars and OS metadata files.
    #[serde(default = "default_ignore_patterns")]
    pub ignore_patterns: Vec<String>,

    /// Freshness window for the memoized scan listing, in seconds.
    #[serde(default = "default_cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Photo sets per page in the unprocessed listing.
    #[serde(default = "default_sets_per_page")]
    pub sets_per_page: usize,

    #[serde(default = "default_thumbnail_size")]
    pub thumbnail_size: u32,
}

fn default_image_extensions() -> Vec<String> {
    vec![
        "jpg".to_string(),
        "jpeg".to_string(),
        "png".to_string(),
        "tiff".to_string(),
        "bmp".to_string(),
    ]
}

fn default_ignore_patterns() -> Vec<String> {
    vec![
        "SYNOFILE_".to_string(),
        ".DS_Store".to_string(),
        "Thumbs.db".to_string(),
    ]
}

fn default_cache_ttl_secs() -> u64 {
    60
}

fn default_sets_per_page() -> usize {
    250
}

fn default_thumbnail_size() -> u32 {
    300
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            image_extensions: default_image_extensions(),
            ignore_patterns: default_ignore_patterns(),
            cache_ttl_secs: default_cache_ttl_secs(),
            sets_per_page: default_sets_per_page(),
            thumbnail_size: default_thumbnail_size(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimilarityConfig {
    /// DBSCAN neighborhood radius over the cosine distance matrix.
    /// Lower values group more strictly.
    #[serde(default = "default_eps")]
    pub eps: f32,

    /// Minimum neighborhood size for a core point.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,
}

fn default_eps() -> f32 {
    0.3
}

fn default_min_samples() -> usize {
    2
}

impl Default for SimilarityConfig {
    fn default() -> Self {
        Self {
            eps: default_eps(),
            min_samples: default_min_samples(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between scheduled processing runs. 0 disables scheduling.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Upper bound of the random delay before the first run, to avoid
    /// hammering a shared catalog when several instances start together.
    #[serde(default = "default_startup_jitter_secs")]
    pub startup_jitter_secs: u64,
}

fn default_interval_secs() -> u64 {
    3600
}

fn default_startup_jitter_secs() -> u64 {
    30
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            startup_jitter_secs: default_startup_jitter_secs(),
        }
    }
}

fn default_db_path() -> PathBuf {
    data_root().join("photodate.db")
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            library: LibraryConfig::default(),
            scanner: ScannerConfig::default(),
            similarity: SimilarityConfig::default(),
            scheduler: SchedulerConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(Self::config_path())
    }

    pub fn load_from(config_path: PathBuf) -> Result<Self> {
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            // Create default config
            let config = Config::default();
            config.save_to(&config_path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path())
    }

    fn save_to(&self, config_path: &PathBuf) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("photodate")
            .join("config.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_roundtrip() {
        let config = Config::default();
        let content = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&content).unwrap();
        assert_eq!(parsed.scanner.sets_per_page, 250);
        assert_eq!(parsed.similarity.min_samples, 2);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let parsed: Config = toml::from_str("[similarity]\neps = 0.5\n").unwrap();
        assert!((parsed.similarity.eps - 0.5).abs() < f32::EPSILON);
        assert_eq!(parsed.similarity.min_samples, 2);
        assert_eq!(parsed.scanner.cache_ttl_secs, 60);
    }
}
