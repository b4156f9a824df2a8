//! Transfer settings.
//!
//! Read from a JSON file; a missing file means defaults, and so does a
//! file that fails to parse (with a warning).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::UploadError;

const MIB: u64 = 1024 * 1024;

/// Smallest part an object store accepts, except for the last one.
pub const MIN_PART_SIZE: u64 = 5 * MIB;

/// Largest object an object store accepts.
pub const MAX_BLOB_SIZE: u64 = 5 * 1024 * 1024 * MIB;

/// Settings consumed by the upload orchestrator and its worker pools.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferSettings {
    /// Lower bound for the computed part size.
    pub minimum_part_size: u64,
    /// Largest content a single `write_blob` call accepts.
    pub chunk_size: u64,
    /// Concurrent part uploads for normal priority writes.
    pub normal_pool_size: usize,
    /// Concurrent part uploads for high priority writes.
    pub priority_pool_size: usize,
    /// Seconds to wait for create, complete and abort requests.
    pub transfer_timeout: u64,
    /// Ask the store for part checksums and validate them.
    pub integrity_check: bool,
}

impl Default for TransferSettings {
    fn default() -> Self {
        Self {
            minimum_part_size: MIN_PART_SIZE,
            chunk_size: 1024 * MIB,
            normal_pool_size: 16,
            priority_pool_size: 4,
            transfer_timeout: 30,
            integrity_check: false,
        }
    }
}

impl TransferSettings {
    /// Loads settings from `path` and validates them.
    pub fn load(path: &Path) -> Result<Self, UploadError> {
        let mut settings = Self::default();

        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<Self>(&content) {
                Ok(parsed) => settings = parsed,
                Err(e) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %e,
                        "failed to parse transfer settings, using defaults"
                    );
                }
            }
        }

        settings.validate()?;
        Ok(settings)
    }

    /// Writes the settings to `path` as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), UploadError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| UploadError::Config(e.to_string()))?;
        std::fs::write(path, json)?;
        tracing::debug!(path = %path.display(), "transfer settings saved");
        Ok(())
    }

    pub fn validate(&self) -> Result<(), UploadError> {
        if self.minimum_part_size < MIN_PART_SIZE {
            return Err(UploadError::Config(format!(
                "minimum_part_size must be at least {MIN_PART_SIZE} bytes, got {}",
                self.minimum_part_size
            )));
        }
        if self.chunk_size < self.minimum_part_size {
            return Err(UploadError::Config(format!(
                "chunk_size must be at least minimum_part_size ({}), got {}",
                self.minimum_part_size, self.chunk_size
            )));
        }
        if self.chunk_size > MAX_BLOB_SIZE {
            return Err(UploadError::Config(format!(
                "chunk_size must be at most {MAX_BLOB_SIZE} bytes, got {}",
                self.chunk_size
            )));
        }
        if self.normal_pool_size == 0 || self.priority_pool_size == 0 {
            return Err(UploadError::Config(
                "normal_pool_size and priority_pool_size must be at least 1".into(),
            ));
        }
        if self.transfer_timeout == 0 {
            return Err(UploadError::Config(
                "transfer_timeout must be at least 1 second".into(),
            ));
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout)
    }
}
