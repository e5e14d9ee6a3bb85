//! Storage facet configuration.

use crate::policy::WritePolicy;
use serde::{Deserialize, Serialize};

/// Configuration for one repository's storage facet.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Name of the blob store holding this repository's binary content.
    pub blob_store_name: String,
    /// Write policy applied to assets and blobs.
    #[serde(default)]
    pub write_policy: WritePolicy,
    /// When true, a declared content type that contradicts the sniffed
    /// content is rejected instead of trusted.
    #[serde(default = "default_strict_content_validation")]
    pub strict_content_validation: bool,
}

impl StorageConfig {
    /// Create a configuration with defaults for the given blob store.
    pub fn new(blob_store_name: impl Into<String>) -> Self {
        Self {
            blob_store_name: blob_store_name.into(),
            write_policy: WritePolicy::default(),
            strict_content_validation: default_strict_content_validation(),
        }
    }

    /// Use the given write policy.
    pub fn with_write_policy(mut self, write_policy: WritePolicy) -> Self {
        self.write_policy = write_policy;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> crate::Result<()> {
        if self.blob_store_name.is_empty() {
            return Err(crate::Error::Config(
                "blob_store_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_strict_content_validation() -> bool {
    true
}
