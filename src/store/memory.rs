//! In-memory extract store.
//!
//! Config records live in a map; the directories the lifecycle manager writes
//! artifacts into are still allocated under `scratch` so the external tools
//! have a working directory.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{ExtractError, ExtractResult};
use crate::extract::ExtractConfig;

use super::{dir_is_non_empty, ExtractStore};

#[derive(Debug)]
pub struct MemoryExtractStore {
    scratch: PathBuf,
    /// `None` between `create` and `write_config`.
    records: Mutex<HashMap<String, Option<ExtractConfig>>>,
}

impl MemoryExtractStore {
    pub fn new(scratch: impl Into<PathBuf>) -> Self {
        Self {
            scratch: scratch.into(),
            records: Mutex::new(HashMap::new()),
        }
    }

    fn with_records<T>(&self, f: impl FnOnce(&mut HashMap<String, Option<ExtractConfig>>) -> T) -> T {
        let mut guard = self
            .records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut guard)
    }
}

#[async_trait]
impl ExtractStore for MemoryExtractStore {
    fn extract_dir(&self, id: &str) -> PathBuf {
        self.scratch.join(id)
    }

    async fn exists(&self, id: &str) -> bool {
        let has_config = self.with_records(|r| matches!(r.get(id), Some(Some(_))));
        has_config || dir_is_non_empty(&self.extract_dir(id)).await
    }

    async fn create(&self, id: &str) -> ExtractResult<PathBuf> {
        if self.exists(id).await {
            return Err(ExtractError::AlreadyExists { id: id.to_string() });
        }
        let path = self.extract_dir(id);
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| ExtractError::io(&path, e))?;
        self.with_records(|r| {
            r.entry(id.to_string()).or_insert(None);
        });
        Ok(path)
    }

    async fn read_config(&self, id: &str) -> ExtractResult<ExtractConfig> {
        self.with_records(|r| r.get(id).cloned().flatten())
            .ok_or_else(|| ExtractError::not_found(id))
    }

    async fn write_config(&self, id: &str, config: &ExtractConfig) -> ExtractResult<()> {
        self.with_records(|r| match r.get_mut(id) {
            None => Err(ExtractError::not_found(id)),
            Some(Some(_)) => Err(ExtractError::AlreadyExists { id: id.to_string() }),
            Some(slot @ None) => {
                *slot = Some(config.clone());
                Ok(())
            }
        })
    }

    async fn delete(&self, id: &str) -> ExtractResult<()> {
        let known = self.with_records(|r| r.remove(id).is_some());
        let path = self.extract_dir(id);
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                if known {
                    Ok(())
                } else {
                    Err(ExtractError::not_found(id))
                }
            }
            Err(e) => Err(ExtractError::io(&path, e)),
        }
    }

    async fn list(&self) -> ExtractResult<Vec<String>> {
        let mut ids = self.with_records(|r| r.keys().cloned().collect::<Vec<_>>());
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::UpdateMode;

    #[tokio::test]
    async fn behaves_like_a_write_once_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = MemoryExtractStore::new(tmp.path());
        let config = ExtractConfig {
            id: "m".to_string(),
            file_name: "m.pbf".to_string(),
            update_file_name: String::new(),
            osm_download_address: "http://x/m.pbf".to_string(),
            osm_time_stamp_address: None,
            base_update_address: String::new(),
            update_mode: UpdateMode::None,
        };

        assert!(matches!(
            store.write_config("m", &config).await,
            Err(ExtractError::NotFound { .. })
        ));
        store.create("m").await.unwrap();
        assert!(!store.exists("m").await);
        store.write_config("m", &config).await.unwrap();
        assert!(store.exists("m").await);
        assert!(store.write_config("m", &config).await.is_err());
        assert_eq!(store.read_config("m").await.unwrap(), config);
        assert_eq!(store.list().await.unwrap(), vec!["m"]);

        store.delete("m").await.unwrap();
        assert!(!store.exists("m").await);
        assert!(matches!(
            store.delete("m").await,
            Err(ExtractError::NotFound { .. })
        ));
    }
}
