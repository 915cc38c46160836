//! ---
//! dl_section: "02-update-store"
//! dl_subsection: "module"
//! dl_type: "source"
//! dl_scope: "code"
//! dl_description: "Update records, assets and their persistence."
//! dl_version: "v0.0.0-prealpha"
//! dl_owner: "tbd"
//! ---
#![warn(missing_docs)]

//! Update store: validated update records built from raw manifests, the
//! assets they reference, retention (`keep`) bookkeeping and garbage
//! collection over a pluggable persistence collaborator.

use uuid::Uuid;

/// Result alias for persistence operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Raised when a raw manifest cannot be turned into an [`Update`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// The manifest document is not a JSON object.
    #[error("manifest must be a JSON object")]
    NotAnObject,
    /// A required field is absent.
    #[error("manifest is missing required field `{0}`")]
    MissingField(&'static str),
    /// A field is present but cannot be interpreted.
    #[error("manifest field `{field}` is malformed: {reason}")]
    Malformed {
        /// Name of the offending field.
        field: &'static str,
        /// Human readable explanation.
        reason: String,
    },
    /// The runtime version is not in the configured format.
    #[error("runtime version '{0}' does not match the configured format")]
    RuntimeVersionFormat(String),
    /// The bundle referenced by the manifest is not part of its asset list.
    #[error("bundle asset {0} is not present in the asset list")]
    MissingBundleAsset(String),
    /// Two asset descriptors share the same key.
    #[error("asset key '{0}' appears more than once")]
    DuplicateAssetKey(String),
    /// An asset lacks the expected checksum required by configuration.
    #[error("asset '{0}' has no expected hash")]
    MissingAssetHash(String),
    /// Development-mode updates are disabled by configuration.
    #[error("development-mode updates are disabled")]
    DevelopmentModeDisabled,
}

/// Error type for the persistence collaborator.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Wrapper for IO errors encountered while reading/writing store files.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Wrapper for JSON serialization issues.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// A persisted record failed integrity verification.
    #[error("record hash mismatch for update {0}")]
    HashMismatch(Uuid),
    /// Downloaded asset content does not match its expected hash.
    #[error("content of asset '{0}' does not match its expected hash")]
    AssetIntegrity(String),
    /// The addressed update does not exist in the store.
    #[error("update {0} not found")]
    NotFound(Uuid),
    /// The backing store refused the operation.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Errors raised by [`UpdateStore`] operations that both validate and persist.
#[derive(Debug, thiserror::Error)]
pub enum UpdateStoreError {
    /// The manifest was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationError),
    /// The persistence collaborator failed.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// An update with the same id is already stored.
    #[error("update {0} already exists")]
    Duplicate(Uuid),
}

pub mod asset;
pub mod database;
pub mod file_database;
pub mod metrics;
pub mod store;
pub mod update;

pub use asset::Asset;
pub use database::{MemoryDatabase, UpdateDatabase};
pub use file_database::FileDatabase;
pub use metrics::UpdateStoreMetrics;
pub use store::{GcReport, UpdateStore};
pub use update::{select_launchable, Update, UpdateRecord};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_render_field_names() {
        let err = ValidationError::MissingField("commitTime");
        assert_eq!(
            err.to_string(),
            "manifest is missing required field `commitTime`"
        );
        let wrapped = UpdateStoreError::from(err.clone());
        assert_eq!(wrapped.to_string(), err.to_string());
    }
}
