//! Sink Configuration
//!
//! Parsed once at startup from a string key-value map.
//!
//! | Key                | Description                                  | Default   |
//! |--------------------|----------------------------------------------|-----------|
//! | `store.url`        | Root URI of the file store                   | required  |
//! | `topics.dir`       | Subdirectory under the root for topic data   | `topics`  |
//! | `flush.size`       | Records per committed file (rotation point)  | `1000`    |
//! | `retry.backoff.ms` | Backoff after a storage failure (ms)         | `5000`    |
//! | `storage.class`    | Storage implementation: `local`, `s3`, `memory` | `local` |
//! | `format`           | Record writer format: `json`, `avro`         | `json`    |

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SinkError};

/// Configuration for a sink writer task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    /// Root URI of the distributed file store.
    pub url: String,

    /// Subdirectory under the root holding all topic data.
    pub topics_dir: String,

    /// Rotation threshold in records.
    pub flush_size: usize,

    /// Base backoff applied after a storage failure, in milliseconds.
    pub retry_backoff_ms: u64,

    /// Key selecting the storage implementation.
    pub storage_class: String,

    /// Key selecting the record writer format.
    pub format: String,
}

impl SinkConfig {
    /// Parse a `SinkConfig` from a string key-value map.
    pub fn from_config_map(config: &HashMap<String, String>) -> Result<Self> {
        let url = config
            .get("store.url")
            .ok_or_else(|| SinkError::Config("missing required 'store.url'".to_string()))?
            .clone();

        let topics_dir = config
            .get("topics.dir")
            .cloned()
            .unwrap_or_else(|| "topics".to_string());

        let flush_size = config
            .get("flush.size")
            .map(|s| {
                s.parse::<usize>()
                    .map_err(|e| SinkError::Config(format!("invalid flush.size: {}", e)))
            })
            .transpose()?
            .unwrap_or(1000);
        if flush_size == 0 {
            return Err(SinkError::Config(
                "flush.size must be a positive integer".to_string(),
            ));
        }

        let retry_backoff_ms = config
            .get("retry.backoff.ms")
            .map(|s| {
                s.parse::<u64>()
                    .map_err(|e| SinkError::Config(format!("invalid retry.backoff.ms: {}", e)))
            })
            .transpose()?
            .unwrap_or(5000);

        let storage_class = config
            .get("storage.class")
            .cloned()
            .unwrap_or_else(|| "local".to_string());

        let format = config
            .get("format")
            .cloned()
            .unwrap_or_else(|| "json".to_string());

        Ok(SinkConfig {
            url,
            topics_dir,
            flush_size,
            retry_backoff_ms,
            storage_class,
            format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config_map() -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("store.url".to_string(), "file:///data/basin".to_string());
        m
    }

    #[test]
    fn test_parse_minimal() {
        let config = SinkConfig::from_config_map(&base_config_map()).unwrap();
        assert_eq!(config.url, "file:///data/basin");
        assert_eq!(config.topics_dir, "topics");
        assert_eq!(config.flush_size, 1000);
        assert_eq!(config.retry_backoff_ms, 5000);
        assert_eq!(config.storage_class, "local");
        assert_eq!(config.format, "json");
    }

    #[test]
    fn test_parse_all_options() {
        let mut m = base_config_map();
        m.insert("topics.dir".to_string(), "streams".to_string());
        m.insert("flush.size".to_string(), "50".to_string());
        m.insert("retry.backoff.ms".to_string(), "250".to_string());
        m.insert("storage.class".to_string(), "s3".to_string());
        m.insert("format".to_string(), "avro".to_string());

        let config = SinkConfig::from_config_map(&m).unwrap();
        assert_eq!(config.topics_dir, "streams");
        assert_eq!(config.flush_size, 50);
        assert_eq!(config.retry_backoff_ms, 250);
        assert_eq!(config.storage_class, "s3");
        assert_eq!(config.format, "avro");
    }

    #[test]
    fn test_missing_url() {
        let result = SinkConfig::from_config_map(&HashMap::new());
        assert!(matches!(result, Err(SinkError::Config(_))));
    }

    #[test]
    fn test_invalid_flush_size() {
        let mut m = base_config_map();
        m.insert("flush.size".to_string(), "not_a_number".to_string());
        assert!(SinkConfig::from_config_map(&m).is_err());
    }

    #[test]
    fn test_zero_flush_size_rejected() {
        let mut m = base_config_map();
        m.insert("flush.size".to_string(), "0".to_string());
        assert!(SinkConfig::from_config_map(&m).is_err());
    }

    #[test]
    fn test_invalid_backoff() {
        let mut m = base_config_map();
        m.insert("retry.backoff.ms".to_string(), "-5".to_string());
        assert!(SinkConfig::from_config_map(&m).is_err());
    }
}
