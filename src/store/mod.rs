//! Extract storage.
//!
//! The [`ExtractStore`] trait owns the per-extract directory and its
//! `config.json`.  [`FsExtractStore`] is the production implementation backed
//! by `{root}/containers/{id}`; `MemoryExtractStore` keeps config records in
//! memory for tests.

pub mod fs;
#[cfg(test)]
pub mod memory;

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::error::ExtractResult;
use crate::extract::ExtractConfig;

pub use fs::FsExtractStore;
#[cfg(test)]
pub use memory::MemoryExtractStore;

/// File name of the persisted [`ExtractConfig`] inside an extract directory.
pub const CONFIG_FILE: &str = "config.json";

#[async_trait]
pub trait ExtractStore: Send + Sync {
    /// Directory that holds the files of extract `id`.  Pure path
    /// computation; the directory may not exist.
    fn extract_dir(&self, id: &str) -> PathBuf;

    /// `true` iff the extract's directory exists and is non-empty.
    async fn exists(&self, id: &str) -> bool;

    /// Allocate the directory for `id`.
    ///
    /// Fails with `AlreadyExists` when a non-empty directory is present.
    async fn create(&self, id: &str) -> ExtractResult<PathBuf>;

    /// Fails with `NotFound` when there is no record and `Corrupt` when the
    /// record cannot be decoded.
    async fn read_config(&self, id: &str) -> ExtractResult<ExtractConfig>;

    /// Persist the record for `id`.  Write-once: a second call fails with
    /// `AlreadyExists`.
    async fn write_config(&self, id: &str, config: &ExtractConfig) -> ExtractResult<()>;

    /// Remove the extract and everything in it.
    async fn delete(&self, id: &str) -> ExtractResult<()>;

    /// Ids of all extract directories.
    async fn list(&self) -> ExtractResult<Vec<String>>;
}

/// `true` when `dir` is a directory with at least one entry.
pub(crate) async fn dir_is_non_empty(dir: &Path) -> bool {
    match tokio::fs::read_dir(dir).await {
        Ok(mut entries) => matches!(entries.next_entry().await, Ok(Some(_))),
        Err(_) => false,
    }
}
