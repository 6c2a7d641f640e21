//! Project layout, module registry, and backups for GenoRing.
//!
//! This crate provides the storage layer: `ProjectLayout` for the directory
//! structure of a project, `ModuleRegistry` for module discovery and the
//! persisted module configuration (with its explicit `RegistryCache`),
//! `BackupStore` for checksummed project archives, and `EngineConfig` for the
//! optional `genoring.toml`.

pub mod backup;
pub mod config;
pub mod layout;
pub mod registry;

pub use backup::{
    default_backup_name, pack_paths, unpack_archive, validate_backup_name, BackupManifest,
    BackupStore,
};
pub use config::EngineConfig;
pub use layout::{list_stems, ModulePaths, ProjectLayout};
pub use registry::{
    EnabledSet, ModuleRecord, ModuleRegistry, ModuleStatus, PersistedConfig, RegistryCache,
};

use std::path::Path;
use thiserror::Error;

/// Fsync a directory so that a preceding `rename()` is durable on every
/// filesystem, not only those with ordered metadata writes.
pub(crate) fn fsync_dir(dir: &Path) -> Result<(), std::io::Error> {
    let f = std::fs::File::open(dir)?;
    f.sync_all()
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("module not found: {0}")]
    ModuleNotFound(String),
    #[error(transparent)]
    Descriptor(#[from] genoring_schema::DescriptorError),
    #[error("failed to parse configuration: {0}")]
    ParseToml(#[from] toml::de::Error),
    #[error("failed to write configuration: {0}")]
    WriteToml(#[from] toml::ser::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("invalid engine configuration: {0}")]
    Config(String),
    #[error("invalid name: {0}")]
    InvalidName(String),
    #[error("backup not found: {0}")]
    BackupNotFound(String),
    #[error("integrity check failed for backup '{name}': expected {expected}, got {actual}")]
    IntegrityFailure {
        name: String,
        expected: String,
        actual: String,
    },
}
