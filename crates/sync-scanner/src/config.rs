//! Scanner configuration.

use serde::{Deserialize, Serialize};

/// How a repository is scanned. Deserialized from the repository section of
/// the application's config file; defaults match the wire protocol's
/// standard block size.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ScanConfig {
    /// Block size in bytes used when hashing file content.
    pub block_size: usize,
    /// Name of the per-directory ignore file, if any.
    pub ignore_file: Option<String>,
    /// Ignore permission bits when detecting changes; scanned records carry
    /// no permission information.
    pub ignore_perms: bool,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            block_size: 128 * 1024,
            ignore_file: None,
            ignore_perms: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ScanConfig::default();
        assert_eq!(config.block_size, 131072);
        assert_eq!(config.ignore_file, None);
        assert!(!config.ignore_perms);
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: ScanConfig = serde_json::from_str(r#"{"ignore_file": ".ignore"}"#).unwrap();
        assert_eq!(config.ignore_file.as_deref(), Some(".ignore"));
        assert_eq!(config.block_size, 131072);
    }

    #[test]
    fn test_roundtrip() {
        let config = ScanConfig {
            block_size: 1024,
            ignore_file: Some(".ignore".to_string()),
            ignore_perms: true,
        };
        let json = serde_json::to_string(&config).unwrap();
        let parsed: ScanConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, config);
    }
}
