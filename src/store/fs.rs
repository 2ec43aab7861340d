//! Directory-tree extract store.
//!
//! Extracts are stored as `{containers}/{id}/config.json` plus whatever files
//! the lifecycle manager writes next to it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::error::{ExtractError, ExtractResult};
use crate::extract::ExtractConfig;

use super::{dir_is_non_empty, ExtractStore, CONFIG_FILE};

/// Stores extracts under a `containers` directory on local disk.
#[derive(Debug, Clone)]
pub struct FsExtractStore {
    /// Root directory holding one sub-directory per extract.
    base_path: PathBuf,
}

impl FsExtractStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Total size in bytes of everything under the containers directory.
    pub async fn total_size_bytes(&self) -> ExtractResult<u64> {
        let path = self.base_path.clone();
        tokio::task::spawn_blocking(move || dir_size(&path))
            .await
            .map_err(|e| ExtractError::io(&self.base_path, std::io::Error::other(e)))
    }

    fn config_path(&self, id: &str) -> PathBuf {
        self.extract_dir(id).join(CONFIG_FILE)
    }
}

#[async_trait]
impl ExtractStore for FsExtractStore {
    fn extract_dir(&self, id: &str) -> PathBuf {
        self.base_path.join(id)
    }

    async fn exists(&self, id: &str) -> bool {
        dir_is_non_empty(&self.extract_dir(id)).await
    }

    #[instrument(skip(self), fields(base = %self.base_path.display()))]
    async fn create(&self, id: &str) -> ExtractResult<PathBuf> {
        let path = self.extract_dir(id);
        if dir_is_non_empty(&path).await {
            return Err(ExtractError::AlreadyExists { id: id.to_string() });
        }

        // `create_dir_all` tolerates a concurrent creator; the config record is
        // what guards against double initialisation.
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| ExtractError::io(&path, e))?;

        info!(path = %path.display(), "created extract directory");
        Ok(path)
    }

    #[instrument(skip(self))]
    async fn read_config(&self, id: &str) -> ExtractResult<ExtractConfig> {
        let path = self.config_path(id);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ExtractError::not_found(id)),
            Err(e) => return Err(ExtractError::io(&path, e)),
        };

        serde_json::from_slice(&bytes).map_err(|e| {
            warn!(path = %path.display(), error = %e, "unreadable extract config");
            ExtractError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            }
        })
    }

    #[instrument(skip(self, config))]
    async fn write_config(&self, id: &str, config: &ExtractConfig) -> ExtractResult<()> {
        let path = self.config_path(id);
        let json = serde_json::to_vec_pretty(config).map_err(|e| {
            ExtractError::InvalidConfiguration(format!("cannot serialize config: {e}"))
        })?;

        let mut file = match tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
        {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(ExtractError::AlreadyExists { id: id.to_string() })
            }
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(ExtractError::not_found(id)),
            Err(e) => return Err(ExtractError::io(&path, e)),
        };

        file.write_all(&json)
            .await
            .map_err(|e| ExtractError::io(&path, e))?;
        file.sync_all()
            .await
            .map_err(|e| ExtractError::io(&path, e))?;

        debug!(path = %path.display(), "wrote extract config");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: &str) -> ExtractResult<()> {
        let path = self.extract_dir(id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                info!(path = %path.display(), "removed extract directory");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Err(ExtractError::not_found(id)),
            Err(e) => Err(ExtractError::io(&path, e)),
        }
    }

    async fn list(&self) -> ExtractResult<Vec<String>> {
        let mut ids = Vec::new();

        let mut entries = match tokio::fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(ids),
            Err(e) => return Err(ExtractError::io(&self.base_path, e)),
        };

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ExtractError::io(&self.base_path, e))?
        {
            let is_dir = entry
                .file_type()
                .await
                .map(|t| t.is_dir())
                .unwrap_or(false);
            if is_dir {
                ids.push(entry.file_name().to_string_lossy().into_owned());
            }
        }

        ids.sort();
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Recursively compute the total size of all files under `dir`.
fn dir_size(dir: &Path) -> u64 {
    let mut total: u64 = 0;

    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        let entries = match std::fs::read_dir(&current) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let meta = match entry.metadata() {
                Ok(m) => m,
                Err(_) => continue,
            };
            if meta.is_dir() {
                stack.push(entry.path());
            } else {
                total += meta.len();
            }
        }
    }

    total
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::UpdateMode;

    fn config(id: &str) -> ExtractConfig {
        ExtractConfig {
            id: id.to_string(),
            file_name: "a.pbf".to_string(),
            update_file_name: "a.osc".to_string(),
            osm_download_address: "http://x/a.pbf".to_string(),
            osm_time_stamp_address: None,
            base_update_address: "http://x/replication".to_string(),
            update_mode: UpdateMode::Day,
        }
    }

    #[tokio::test]
    async fn create_then_exists_once_config_written() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsExtractStore::new(tmp.path().join("containers"));

        assert!(!store.exists("a").await);
        let dir = store.create("a").await.unwrap();
        assert!(dir.is_dir());
        // An empty directory does not count as an extract.
        assert!(!store.exists("a").await);

        store.write_config("a", &config("a")).await.unwrap();
        assert!(store.exists("a").await);
        assert!(matches!(
            store.create("a").await,
            Err(ExtractError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn config_round_trips_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsExtractStore::new(tmp.path());
        store.create("a").await.unwrap();
        store.write_config("a", &config("a")).await.unwrap();

        assert_eq!(store.read_config("a").await.unwrap(), config("a"));
        assert!(tmp.path().join("a").join(CONFIG_FILE).is_file());
    }

    #[tokio::test]
    async fn config_is_write_once() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsExtractStore::new(tmp.path());
        store.create("a").await.unwrap();
        store.write_config("a", &config("a")).await.unwrap();

        let mut changed = config("a");
        changed.file_name = "b.pbf".to_string();
        assert!(matches!(
            store.write_config("a", &changed).await,
            Err(ExtractError::AlreadyExists { .. })
        ));
        assert_eq!(store.read_config("a").await.unwrap().file_name, "a.pbf");
    }

    #[tokio::test]
    async fn missing_and_corrupt_config() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsExtractStore::new(tmp.path());

        assert!(matches!(
            store.read_config("nope").await,
            Err(ExtractError::NotFound { .. })
        ));

        store.create("bad").await.unwrap();
        std::fs::write(tmp.path().join("bad").join(CONFIG_FILE), b"{not json").unwrap();
        assert!(matches!(
            store.read_config("bad").await,
            Err(ExtractError::Corrupt { .. })
        ));
    }

    #[tokio::test]
    async fn delete_removes_everything() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsExtractStore::new(tmp.path());
        store.create("a").await.unwrap();
        store.write_config("a", &config("a")).await.unwrap();
        std::fs::write(tmp.path().join("a").join("a.pbf"), b"pbf").unwrap();

        store.delete("a").await.unwrap();
        assert!(!tmp.path().join("a").exists());
        assert!(matches!(
            store.delete("a").await,
            Err(ExtractError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn list_only_reports_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsExtractStore::new(tmp.path().join("containers"));
        assert!(store.list().await.unwrap().is_empty());

        store.create("b").await.unwrap();
        store.create("a").await.unwrap();
        std::fs::write(tmp.path().join("containers").join("stray.txt"), b"x").unwrap();

        assert_eq!(store.list().await.unwrap(), vec!["a", "b"]);
    }

    #[tokio::test]
    async fn total_size_counts_nested_files() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsExtractStore::new(tmp.path());
        store.create("a").await.unwrap();
        std::fs::write(tmp.path().join("a").join("x"), b"hello").unwrap(); // 5
        std::fs::write(tmp.path().join("a").join("y"), b"abc").unwrap(); // 3
        assert_eq!(store.total_size_bytes().await.unwrap(), 8);
    }
}
