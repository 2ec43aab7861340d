//! External tool execution.
//!
//! The convert and incremental-update tools are black boxes with an exit-code
//! contract.  [`ProcessRunner`] is the seam the lifecycle manager calls
//! through; [`TokioProcessRunner`] spawns real processes via
//! [`tokio::process::Command`].  Arguments are always passed as a discrete
//! list, never through a shell.

pub mod runner;
pub mod tools;

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::ExtractResult;

pub use runner::TokioProcessRunner;

/// One invocation of an external program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolInvocation {
    pub program: String,
    pub args: Vec<String>,
    pub work_dir: PathBuf,
    pub timeout: Duration,
}

impl ToolInvocation {
    pub fn new(
        program: impl Into<String>,
        args: Vec<String>,
        work_dir: impl Into<PathBuf>,
        timeout: Duration,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            work_dir: work_dir.into(),
            timeout,
        }
    }
}

/// How an invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success,
    /// Exited with a non-zero status.
    Failed { status: String, stderr: String },
    /// Still running when the timeout elapsed.
    TimedOut { after: Duration },
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed { .. } => "failure",
            Self::TimedOut { .. } => "timeout",
        }
    }

    /// Human-readable reason for a non-success outcome.
    pub fn describe(&self) -> String {
        match self {
            Self::Success => "exited successfully".to_string(),
            Self::Failed { status, stderr } if stderr.is_empty() => format!("exited with {status}"),
            Self::Failed { status, stderr } => format!("exited with {status}: {stderr}"),
            Self::TimedOut { after } => format!("did not finish within {after:?}"),
        }
    }
}

#[async_trait]
pub trait ProcessRunner: Send + Sync {
    /// Run `invocation` to completion or timeout.  Only a failure to start the
    /// program is reported as `Err`.
    async fn run(&self, invocation: &ToolInvocation) -> ExtractResult<ToolOutcome>;
}
