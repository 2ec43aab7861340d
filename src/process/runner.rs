//! Process runner using [`tokio::process::Command`].

use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{error, info, instrument, warn};

use crate::error::{ExtractError, ExtractResult};

use super::{ProcessRunner, ToolInvocation, ToolOutcome};

/// Spawns tools with captured output and waits up to the invocation timeout.
#[derive(Debug, Clone)]
pub struct TokioProcessRunner {
    /// When set, a tool still running at its timeout is killed; otherwise it is
    /// abandoned and keeps running detached.
    kill_on_timeout: bool,
}

impl TokioProcessRunner {
    pub fn new(kill_on_timeout: bool) -> Self {
        Self { kill_on_timeout }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    #[instrument(skip(self, invocation), fields(
        program = %invocation.program,
        work_dir = %invocation.work_dir.display(),
    ))]
    async fn run(&self, invocation: &ToolInvocation) -> ExtractResult<ToolOutcome> {
        let mut cmd = Command::new(&invocation.program);
        cmd.args(&invocation.args)
            .current_dir(&invocation.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(self.kill_on_timeout);

        info!(args = ?invocation.args, "starting process");

        let child = cmd.spawn().map_err(|e| ExtractError::ExternalToolFailed {
            tool: invocation.program.clone(),
            reason: format!("failed to spawn: {e}"),
        })?;

        // Dropping the `wait_with_output` future on timeout drops the child,
        // which kills it when `kill_on_drop` is set.
        let output = match tokio::time::timeout(invocation.timeout, child.wait_with_output()).await
        {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ExtractError::ExternalToolFailed {
                    tool: invocation.program.clone(),
                    reason: format!("failed to wait for process: {e}"),
                })
            }
            Err(_) => {
                warn!(
                    args = ?invocation.args,
                    timeout = ?invocation.timeout,
                    killed = self.kill_on_timeout,
                    "process did not finish in time"
                );
                return Ok(ToolOutcome::TimedOut {
                    after: invocation.timeout,
                });
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            error!(
                args = ?invocation.args,
                status = %output.status,
                stderr = %stderr,
                "process finished without success"
            );
            return Ok(ToolOutcome::Failed {
                status: output.status.to_string(),
                stderr,
            });
        }

        info!(args = ?invocation.args, "process finished successfully");
        Ok(ToolOutcome::Success)
    }
}
