use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde::Serialize;

use crate::config::Config;
use crate::store::FsExtractStore;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub checks: HealthChecks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Ok,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Serialize)]
pub struct HealthChecks {
    pub storage: CheckResult,
    pub convert_tool: CheckResult,
    pub update_tool: CheckResult,
}

#[derive(Debug, Serialize)]
pub struct CheckResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl CheckResult {
    fn healthy(detail: impl Into<String>) -> Self {
        Self {
            ok: true,
            detail: Some(detail.into()),
        }
    }

    fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            ok: false,
            detail: Some(detail.into()),
        }
    }
}

// ---------------------------------------------------------------------------
// Shared state expected by the handler
// ---------------------------------------------------------------------------

/// Subset of `AppState` the health check needs.
#[derive(Clone)]
pub struct HealthState {
    pub config: Arc<Config>,
    pub store: Arc<FsExtractStore>,
}

// ---------------------------------------------------------------------------
// Individual checks
// ---------------------------------------------------------------------------

async fn check_storage(store: &FsExtractStore) -> CheckResult {
    let path = store.base_path();
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => {}
        Ok(_) => {
            return CheckResult::unhealthy(format!("{} is not a directory", path.display()))
        }
        Err(e) => return CheckResult::unhealthy(format!("{}: {e}", path.display())),
    }

    match store.total_size_bytes().await {
        Ok(used) => CheckResult::healthy(format!("used {used} bytes under {}", path.display())),
        Err(e) => CheckResult::unhealthy(format!("disk usage check failed: {e}")),
    }
}

/// Resolve `program` the way the process runner will when spawning it.
async fn check_tool(program: &str) -> CheckResult {
    let name = program.to_string();
    match tokio::task::spawn_blocking(move || which::which(name)).await {
        Ok(Ok(path)) => CheckResult::healthy(path.display().to_string()),
        Ok(Err(e)) => CheckResult::unhealthy(format!("{program}: {e}")),
        Err(e) => CheckResult::unhealthy(format!("tool lookup task failed: {e}")),
    }
}

// ---------------------------------------------------------------------------
// Aggregate status
// ---------------------------------------------------------------------------

fn aggregate_status(checks: &HealthChecks) -> HealthStatus {
    // Without storage nothing can be served; a missing tool only breaks
    // timestamp alignment or updates.
    if !checks.storage.ok {
        HealthStatus::Unhealthy
    } else if !checks.convert_tool.ok || !checks.update_tool.ok {
        HealthStatus::Degraded
    } else {
        HealthStatus::Ok
    }
}

// ---------------------------------------------------------------------------
// Axum handler
// ---------------------------------------------------------------------------

/// `GET /api/health` handler.  Returns 200 on Ok/Degraded, 503 on Unhealthy.
pub async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let (storage, convert_tool, update_tool) = tokio::join!(
        check_storage(&state.store),
        check_tool(&state.config.tools.convert_program),
        check_tool(&state.config.tools.update_program),
    );

    let checks = HealthChecks {
        storage,
        convert_tool,
        update_tool,
    };
    let status = aggregate_status(&checks);
    let body = HealthResponse { status, checks };

    let http_status = match status {
        HealthStatus::Ok | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (http_status, Json(body))
}
