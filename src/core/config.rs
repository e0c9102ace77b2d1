//! Cache configuration
//!
//! Configuration can be built in code or loaded from TOML:
//!
//! ```toml
//! path = "/srv/assets/cache"
//! read_only = true
//! catalog_cache_capacity = 64
//! default_compression = "gzip"
//! ```

use crate::core::compression::Compression;
use crate::core::error::{CacheError, Result};
use crate::core::table_cache::DEFAULT_TABLE_CACHE_CAPACITY;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory holding the data container and location indexes.
    /// `None` keeps the whole cache in memory.
    pub path: Option<PathBuf>,

    /// Reject every write
    pub read_only: bool,

    /// Create the directory and an empty container when missing
    pub create_if_missing: bool,

    /// Number of categories whose reference tables stay decoded
    pub catalog_cache_capacity: usize,

    /// Codec used by `put_blob`
    pub default_compression: Compression,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            path: None,
            read_only: false,
            create_if_missing: false,
            catalog_cache_capacity: DEFAULT_TABLE_CACHE_CAPACITY,
            default_compression: Compression::Gzip,
        }
    }
}

impl CacheConfig {
    /// Config for an existing on-disk cache
    pub fn at<P: AsRef<Path>>(path: P) -> Self {
        CacheConfig {
            path: Some(path.as_ref().to_path_buf()),
            ..Default::default()
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: CacheConfig =
            toml::from_str(text).map_err(|e| CacheError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|e| CacheError::Config(e.to_string()))
    }

    /// Reject combinations that cannot be opened
    pub fn validate(&self) -> Result<()> {
        if self.read_only && self.create_if_missing {
            return Err(CacheError::Config(
                "create_if_missing cannot be combined with read_only".into(),
            ));
        }
        if self.read_only && self.path.is_none() {
            return Err(CacheError::Config(
                "an in-memory cache cannot be read-only".into(),
            ));
        }
        if self.catalog_cache_capacity == 0 {
            return Err(CacheError::Config(
                "catalog_cache_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert!(config.path.is_none());
        assert!(!config.read_only);
        assert_eq!(config.catalog_cache_capacity, DEFAULT_TABLE_CACHE_CAPACITY);
        assert_eq!(config.default_compression, Compression::Gzip);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_toml() {
        let config = CacheConfig::from_toml_str(
            r#"
            path = "/srv/assets/cache"
            read_only = true
            catalog_cache_capacity = 64
            default_compression = "bzip2"
            "#,
        )
        .unwrap();

        assert_eq!(config.path, Some(PathBuf::from("/srv/assets/cache")));
        assert!(config.read_only);
        assert_eq!(config.catalog_cache_capacity, 64);
        assert_eq!(config.default_compression, Compression::Bzip2);
    }

    #[test]
    fn test_toml_round_trip() {
        let mut config = CacheConfig::at("/tmp/cache");
        config.default_compression = Compression::Lzma;
        let text = config.to_toml_string().unwrap();
        assert_eq!(CacheConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_configs() {
        assert!(matches!(
            CacheConfig::from_toml_str("default_compression = \"zstd\""),
            Err(CacheError::Config(_))
        ));
        assert!(matches!(
            CacheConfig::from_toml_str("unknown_key = 1"),
            Err(CacheError::Config(_))
        ));
        assert!(matches!(
            CacheConfig::from_toml_str("read_only = true"),
            Err(CacheError::Config(_))
        ));
        assert!(matches!(
            CacheConfig::from_toml_str("path = \"/x\"\nread_only = true\ncreate_if_missing = true"),
            Err(CacheError::Config(_))
        ));
        assert!(matches!(
            CacheConfig::from_toml_str("catalog_cache_capacity = 0"),
            Err(CacheError::Config(_))
        ));
    }
}
