//! The extract lifecycle manager.
//!
//! [`ExtractManager`] owns every mutation of file content inside an extract
//! directory.  It never creates or removes directories itself; that is the
//! store's job.  All mutating operations run under the extract's lock from
//! [`ExtractLocks`].

use std::io::ErrorKind;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tracing::{info, instrument, warn, Span};
use uuid::Uuid;

use crate::config::ToolsConfig;
use crate::error::{ExtractError, ExtractResult};
use crate::extract::names::is_plain_segment;
use crate::extract::{validate_segment, CreateRequest, ExtractConfig, UpdateRequest};
use crate::fetch::{FetchedFile, Fetcher};
use crate::metrics::{Metrics, Operation, Tool};
use crate::process::tools::{convert_args, update_args};
use crate::process::{ProcessRunner, ToolInvocation, ToolOutcome};
use crate::store::{ExtractStore, CONFIG_FILE};

use super::locks::ExtractLocks;
use super::timestamp::parse_timestamp_marker;

/// A file inside an extract, opened for streaming.
#[derive(Debug)]
pub struct OpenFile {
    pub file: tokio::fs::File,
    pub file_name: String,
    pub len: u64,
}

pub struct ExtractManager {
    store: Arc<dyn ExtractStore>,
    fetcher: Arc<dyn Fetcher>,
    runner: Arc<dyn ProcessRunner>,
    tools: ToolsConfig,
    locks: ExtractLocks,
    metrics: Arc<Metrics>,
}

impl ExtractManager {
    pub fn new(
        store: Arc<dyn ExtractStore>,
        fetcher: Arc<dyn Fetcher>,
        runner: Arc<dyn ProcessRunner>,
        tools: ToolsConfig,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            store,
            fetcher,
            runner,
            tools,
            locks: ExtractLocks::new(),
            metrics,
        }
    }

    // -----------------------------------------------------------------------
    // Read side
    // -----------------------------------------------------------------------

    /// Ids of all extracts on disk.
    pub async fn list(&self) -> ExtractResult<Vec<String>> {
        let ids = self.store.list().await?;
        self.metrics.extracts.set(ids.len() as i64);
        Ok(ids)
    }

    /// Open the canonical artifact of extract `id`.
    #[instrument(skip(self))]
    pub async fn artifact(&self, id: &str) -> ExtractResult<OpenFile> {
        self.ensure_exists(id).await?;
        let config = self.store.read_config(id).await?;
        self.open_in_extract(id, &config.file_name).await
    }

    // -----------------------------------------------------------------------
    // Create
    // -----------------------------------------------------------------------

    /// Create and populate an extract.  Returns its id.
    ///
    /// Idempotent: when the extract already exists nothing is fetched or
    /// written and the existing id is returned.
    #[instrument(skip(self, request), fields(id = tracing::field::Empty))]
    pub async fn create(&self, request: CreateRequest) -> ExtractResult<String> {
        let result = self.create_inner(request).await;
        self.metrics
            .record_operation(Operation::Create, result.is_ok());
        self.refresh_extract_count().await;
        result
    }

    async fn create_inner(&self, request: CreateRequest) -> ExtractResult<String> {
        let id = match request.id.as_deref() {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            _ => Uuid::new_v4().to_string(),
        };
        Span::current().record("id", id.as_str());

        validate_segment("id", &id)?;

        let _guard = self.locks.lock(&id).await;

        // A retried create returns the existing id whatever the body says.
        if self.store.exists(&id).await {
            info!("extract already exists, nothing to do");
            return Ok(id);
        }

        let config = ExtractConfig::from_request(id.clone(), request)?;

        match self.store.create(&id).await {
            Ok(path) => info!(path = %path.display(), "creating extract"),
            Err(ExtractError::AlreadyExists { .. }) => return Ok(id),
            Err(e) => return Err(e),
        }

        match self.store.write_config(&id, &config).await {
            Ok(()) => {}
            Err(ExtractError::AlreadyExists { .. }) => return Ok(id),
            Err(e) => return Err(e),
        }

        self.download_locked(&id, &config).await?;
        info!("finished creating extract");
        Ok(id)
    }

    // -----------------------------------------------------------------------
    // Update
    // -----------------------------------------------------------------------

    /// Re-download the base snapshot and/or apply incremental updates.
    /// When both are requested the download runs first.
    #[instrument(skip(self))]
    pub async fn update(&self, id: &str, request: UpdateRequest) -> ExtractResult<()> {
        let result: ExtractResult<()> = async {
            let _guard = self.locks.lock(id).await;
            self.ensure_exists(id).await?;
            let config = self.store.read_config(id).await?;

            if request.download_file {
                self.download_locked(id, &config).await?;
            }
            if request.update_file {
                self.update_to_latest_locked(id).await?;
            }
            info!("finished extract manipulation");
            Ok(())
        }
        .await;

        self.metrics
            .record_operation(Operation::Update, result.is_ok());
        result
    }

    /// Run a full update cycle, then open the change file it produced.
    #[instrument(skip(self))]
    pub async fn get_updates(&self, id: &str) -> ExtractResult<OpenFile> {
        let result: ExtractResult<OpenFile> = async {
            let _guard = self.locks.lock(id).await;
            self.ensure_exists(id).await?;
            let config = self.store.read_config(id).await?;
            if config.update_file_name.is_empty() {
                return Err(ExtractError::InvalidConfiguration(format!(
                    "extract {id} has no updateFileName"
                )));
            }

            self.update_to_latest_locked(id).await?;
            self.open_in_extract(id, &config.update_file_name).await
        }
        .await;

        self.metrics
            .record_operation(Operation::GetUpdates, result.is_ok());
        result
    }

    // -----------------------------------------------------------------------
    // Delete
    // -----------------------------------------------------------------------

    #[instrument(skip(self))]
    pub async fn delete(&self, id: &str) -> ExtractResult<()> {
        let result: ExtractResult<()> = async {
            let _guard = self.locks.lock(id).await;
            self.ensure_exists(id).await?;
            self.store.delete(id).await
        }
        .await;

        self.metrics
            .record_operation(Operation::Delete, result.is_ok());
        self.refresh_extract_count().await;
        result
    }

    // -----------------------------------------------------------------------
    // Download (caller holds the extract lock)
    // -----------------------------------------------------------------------

    async fn download_locked(&self, id: &str, config: &ExtractConfig) -> ExtractResult<()> {
        let result = self.download_steps(id, config).await;
        self.metrics
            .record_operation(Operation::Download, result.is_ok());
        result
    }

    async fn download_steps(&self, id: &str, config: &ExtractConfig) -> ExtractResult<()> {
        let dir = self.store.extract_dir(id);

        info!(url = %config.osm_download_address, "starting snapshot download");
        let snapshot = self.fetch_required(&config.osm_download_address).await?;
        let timestamp_url = config.timestamp_address();
        let snapshot_name = snapshot_file_name(&snapshot, config, timestamp_url.is_some());

        write_atomically(&dir, &snapshot_name, &snapshot.content).await?;
        info!(
            path = %dir.join(&snapshot_name).display(),
            bytes = snapshot.content.len(),
            "saved snapshot"
        );

        match timestamp_url {
            Some(url) => {
                let marker = self.fetch_required(url).await?;
                let text = String::from_utf8_lossy(&marker.content);
                let timestamp = parse_timestamp_marker(&text).ok_or_else(|| {
                    ExtractError::UpstreamFetchFailed {
                        url: url.to_string(),
                        reason: "timestamp marker has no value".to_string(),
                    }
                })?;
                self.restamp(&dir, config, &snapshot_name, &timestamp)
                    .await?;
            }
            None if snapshot_name != config.file_name => {
                let from = dir.join(&snapshot_name);
                let to = dir.join(&config.file_name);
                tokio::fs::rename(&from, &to)
                    .await
                    .map_err(|e| ExtractError::io(&to, e))?;
            }
            None => {}
        }

        Ok(())
    }

    /// Fetch `url`, treating an empty body as a failed fetch.
    async fn fetch_required(&self, url: &str) -> ExtractResult<FetchedFile> {
        let file = self.fetcher.fetch(url).await?;
        if file.is_empty() {
            return Err(ExtractError::UpstreamFetchFailed {
                url: url.to_string(),
                reason: "no content received".to_string(),
            });
        }
        self.metrics
            .fetched_bytes_total
            .inc_by(file.content.len() as u64);
        Ok(file)
    }

    /// Stamp `snapshot_name` with `timestamp` into a temp file, then rename it
    /// over the canonical artifact.  On any failure the artifact is untouched.
    async fn restamp(
        &self,
        dir: &Path,
        config: &ExtractConfig,
        snapshot_name: &str,
        timestamp: &str,
    ) -> ExtractResult<()> {
        let temp_name = config.temp_file_name();
        let temp_path = dir.join(&temp_name);
        let invocation = ToolInvocation::new(
            &self.tools.convert_program,
            convert_args(timestamp, snapshot_name, &temp_name),
            dir,
            self.tools.convert_timeout(),
        );

        let outcome = match self.run_tool(Tool::Convert, &invocation).await {
            Ok(outcome) => outcome,
            Err(e) => {
                discard(&temp_path).await;
                return Err(e);
            }
        };
        if !outcome.is_success() {
            discard(&temp_path).await;
            return Err(ExtractError::ExternalToolFailed {
                tool: self.tools.convert_program.clone(),
                reason: outcome.describe(),
            });
        }

        let target = dir.join(&config.file_name);
        tokio::fs::rename(&temp_path, &target)
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => ExtractError::ExternalToolFailed {
                    tool: self.tools.convert_program.clone(),
                    reason: format!("did not produce {temp_name}"),
                },
                _ => ExtractError::io(&target, e),
            })?;

        info!(%timestamp, "artifact aligned with server timestamp");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Incremental update (caller holds the extract lock)
    // -----------------------------------------------------------------------

    async fn update_to_latest_locked(&self, id: &str) -> ExtractResult<()> {
        let result = self.update_steps(id).await;
        self.metrics
            .record_operation(Operation::UpdateToLatest, result.is_ok());
        result
    }

    async fn update_steps(&self, id: &str) -> ExtractResult<()> {
        info!("starting update to latest");
        let config = self.store.read_config(id).await?;

        let cadence = config.update_mode.cadence().ok_or_else(|| {
            ExtractError::InvalidConfiguration(format!(
                "extract {id} has updateMode None; recreate it with Minute, Hour or Day to pull updates"
            ))
        })?;
        if config.base_update_address.trim().is_empty() {
            return Err(ExtractError::InvalidConfiguration(format!(
                "extract {id} has no baseUpdateAddress"
            )));
        }

        let dir = self.store.extract_dir(id);
        if !is_file(&dir.join(&config.file_name)).await {
            return Err(ExtractError::ArtifactMissing {
                id: id.to_string(),
                file: config.file_name.clone(),
            });
        }

        let invocation = ToolInvocation::new(
            &self.tools.update_program,
            update_args(&config.base_update_address, cadence, &config.file_name),
            &dir,
            self.tools.update_timeout(),
        );
        let outcome = self.run_tool(Tool::Update, &invocation).await?;
        if !outcome.is_success() {
            return Err(ExtractError::ExternalToolFailed {
                tool: self.tools.update_program.clone(),
                reason: outcome.describe(),
            });
        }

        info!(%cadence, "finished updating to latest");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn run_tool(&self, tool: Tool, invocation: &ToolInvocation) -> ExtractResult<ToolOutcome> {
        let started = Instant::now();
        let result = self.runner.run(invocation).await;
        let label = match &result {
            Ok(outcome) => outcome.label(),
            Err(_) => "failure",
        };
        self.metrics.record_tool_run(tool, label, started.elapsed());
        result
    }

    /// A missing, empty or unnameable directory all mean "not created yet".
    async fn ensure_exists(&self, id: &str) -> ExtractResult<()> {
        if is_plain_segment(id) && self.store.exists(id).await {
            Ok(())
        } else {
            Err(ExtractError::not_found(id))
        }
    }

    async fn open_in_extract(&self, id: &str, file_name: &str) -> ExtractResult<OpenFile> {
        let path = self.store.extract_dir(id).join(file_name);
        let file = match tokio::fs::File::open(&path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(ExtractError::ArtifactMissing {
                    id: id.to_string(),
                    file: file_name.to_string(),
                })
            }
            Err(e) => return Err(ExtractError::io(&path, e)),
        };
        let len = file
            .metadata()
            .await
            .map_err(|e| ExtractError::io(&path, e))?
            .len();

        Ok(OpenFile {
            file,
            file_name: file_name.to_string(),
            len,
        })
    }

    async fn refresh_extract_count(&self) {
        if let Ok(ids) = self.store.list().await {
            self.metrics.extracts.set(ids.len() as i64);
        }
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

/// Name under which a downloaded snapshot is stored.
///
/// When the snapshot still has to be stamped, it must not land on the
/// artifact (or the convert output) before conversion succeeds, and it may
/// never replace the config record.
fn snapshot_file_name(snapshot: &FetchedFile, config: &ExtractConfig, needs_stamp: bool) -> String {
    let name = snapshot
        .suggested_name
        .clone()
        .unwrap_or_else(|| config.file_name.clone());

    let clashes = name == CONFIG_FILE
        || name == config.update_file_name
        || name == config.temp_file_name()
        || (needs_stamp && name == config.file_name);

    if !clashes {
        name
    } else if needs_stamp {
        format!("raw-{}", config.file_name)
    } else {
        config.file_name.clone()
    }
}

/// Write `content` to `dir/name` via a temp file and rename.
async fn write_atomically(dir: &Path, name: &str, content: &[u8]) -> ExtractResult<()> {
    let target = dir.join(name);
    let partial = dir.join(format!(".{name}.part"));

    let result: ExtractResult<()> = async {
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| ExtractError::io(&partial, e))?;
        file.write_all(content)
            .await
            .map_err(|e| ExtractError::io(&partial, e))?;
        file.sync_all()
            .await
            .map_err(|e| ExtractError::io(&partial, e))?;
        drop(file);
        tokio::fs::rename(&partial, &target)
            .await
            .map_err(|e| ExtractError::io(&target, e))
    }
    .await;

    if result.is_err() {
        discard(&partial).await;
    }
    result
}

/// Best-effort removal of a temp file.
async fn discard(path: &Path) {
    if let Err(e) = tokio::fs::remove_file(path).await {
        if e.kind() != ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "failed to remove temp file");
        }
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}
