use crate::core::{MapperError, Result};
use serde::{Deserialize, Serialize};

/// Default byte length above which text is stored as an unindexed long text.
pub const DEFAULT_LARGE_TEXT_THRESHOLD: usize = 1500;

/// On-disk layout generation; gates which derived data gets written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageVersion {
    ParentsDoNotReferToChildren,
    WriteOwnedChildKeysToParents,
    ReadOwnedChildKeysFromParents,
}

impl StorageVersion {
    pub fn at_least(&self, required: StorageVersion) -> bool {
        *self >= required
    }
}

impl Default for StorageVersion {
    fn default() -> Self {
        Self::WriteOwnedChildKeysToParents
    }
}

/// Mapper configuration
///
/// Built in code with the setters below or loaded from JSON:
///
/// ```
/// use entitymapper::{MapperConfig, StorageVersion};
///
/// let config = MapperConfig::from_json(
///     r#"{ "storage_version": "parents_do_not_refer_to_children" }"#,
/// ).unwrap();
/// assert_eq!(config.storage_version, StorageVersion::ParentsDoNotReferToChildren);
/// assert_eq!(config.large_text_threshold, 1500);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperConfig {
    /// Controls whether owned child keys are mirrored onto parent records
    pub storage_version: StorageVersion,

    /// Text longer than this many bytes is stored as long text
    pub large_text_threshold: usize,
}

impl MapperConfig {
    pub fn new() -> Self {
        Self {
            storage_version: StorageVersion::default(),
            large_text_threshold: DEFAULT_LARGE_TEXT_THRESHOLD,
        }
    }

    /// Set the storage version
    pub fn storage_version(mut self, version: StorageVersion) -> Self {
        self.storage_version = version;
        self
    }

    /// Set the long-text threshold
    pub fn large_text_threshold(mut self, bytes: usize) -> Self {
        self.large_text_threshold = bytes;
        self
    }

    /// Parse and validate a JSON document; missing fields keep their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.large_text_threshold == 0 {
            return Err(MapperError::Config(
                "large_text_threshold must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn writes_owned_child_keys(&self) -> bool {
        self.storage_version
            .at_least(StorageVersion::WriteOwnedChildKeysToParents)
    }
}

impl Default for MapperConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MapperConfig::default();
        assert_eq!(config.storage_version, StorageVersion::WriteOwnedChildKeysToParents);
        assert_eq!(config.large_text_threshold, DEFAULT_LARGE_TEXT_THRESHOLD);
        assert!(config.writes_owned_child_keys());
    }

    #[test]
    fn test_storage_version_ordering() {
        assert!(StorageVersion::ReadOwnedChildKeysFromParents
            .at_least(StorageVersion::WriteOwnedChildKeysToParents));
        assert!(!StorageVersion::ParentsDoNotReferToChildren
            .at_least(StorageVersion::WriteOwnedChildKeysToParents));
    }

    #[test]
    fn test_from_json() {
        let config = MapperConfig::from_json(
            r#"{"storage_version":"read_owned_child_keys_from_parents","large_text_threshold":500}"#,
        )
        .unwrap();
        assert_eq!(config.storage_version, StorageVersion::ReadOwnedChildKeysFromParents);
        assert_eq!(config.large_text_threshold, 500);

        assert!(matches!(
            MapperConfig::from_json(r#"{"large_text_threshold":0}"#),
            Err(MapperError::Config(_))
        ));
        assert!(matches!(
            MapperConfig::from_json(r#"{"storage_version":"v9"}"#),
            Err(MapperError::Config(_))
        ));
    }

    #[test]
    fn test_builder_setters() {
        let config = MapperConfig::new()
            .storage_version(StorageVersion::ParentsDoNotReferToChildren)
            .large_text_threshold(64);
        assert!(!config.writes_owned_child_keys());
        assert_eq!(config.large_text_threshold, 64);
    }
}
