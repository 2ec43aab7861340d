//! Test doubles for the lifecycle manager's collaborators.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;

use crate::config::ToolsConfig;
use crate::error::ExtractResult;
use crate::fetch::{derive_file_name, FetchedFile, Fetcher};
use crate::lifecycle::ExtractManager;
use crate::metrics::MetricsRegistry;
use crate::process::{ProcessRunner, ToolInvocation, ToolOutcome};
use crate::store::ExtractStore;

/// Change-file name the scripted updater writes.
pub const CHANGE_FILE: &str = "changes.osc";

/// Ordered record of fetches and tool runs across both fakes.
pub type EventLog = Arc<Mutex<Vec<String>>>;

fn push(log: &EventLog, event: String) {
    log.lock().unwrap().push(event);
}

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Serves canned bodies by URL; unknown URLs behave like a 404.
pub struct FakeFetcher {
    bodies: Mutex<HashMap<String, Bytes>>,
    events: EventLog,
}

impl FakeFetcher {
    pub fn new(events: EventLog) -> Self {
        Self {
            bodies: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn serve(&self, url: &str, body: impl Into<Bytes>) {
        self.bodies.lock().unwrap().insert(url.to_string(), body.into());
    }

    pub fn fetch_count(&self, url: &str) -> usize {
        let wanted = format!("fetch {url}");
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|e| **e == wanted)
            .count()
    }
}

#[async_trait]
impl Fetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> ExtractResult<FetchedFile> {
        push(&self.events, format!("fetch {url}"));
        let content = self
            .bodies
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_default();
        Ok(FetchedFile {
            suggested_name: derive_file_name(None, url),
            content,
        })
    }
}

// ---------------------------------------------------------------------------
// Process runner
// ---------------------------------------------------------------------------

/// What a scripted tool does when invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Succeed,
    /// Writes partial output, then exits non-zero.
    Fail,
    /// Writes partial output, then reports a timeout.
    Hang,
}

/// Emulates the convert and update tools by touching files in the working
/// directory the way the real programs would.
pub struct ScriptedRunner {
    tools: ToolsConfig,
    convert: Mutex<Script>,
    update: Mutex<Script>,
    invocations: Mutex<Vec<ToolInvocation>>,
    events: EventLog,
}

impl ScriptedRunner {
    pub fn new(tools: ToolsConfig, events: EventLog) -> Self {
        Self {
            tools,
            convert: Mutex::new(Script::Succeed),
            update: Mutex::new(Script::Succeed),
            invocations: Mutex::new(Vec::new()),
            events,
        }
    }

    pub fn script_convert(&self, script: Script) {
        *self.convert.lock().unwrap() = script;
    }

    pub fn script_update(&self, script: Script) {
        *self.update.lock().unwrap() = script;
    }

    pub fn invocations(&self) -> Vec<ToolInvocation> {
        self.invocations.lock().unwrap().clone()
    }

    fn convert(&self, invocation: &ToolInvocation, dir: &Path) -> ToolOutcome {
        let timestamp = invocation.args[0].trim_start_matches("--timestamp=");
        let snapshot = std::fs::read(dir.join(&invocation.args[1])).unwrap_or_default();
        let output = dir.join(invocation.args[2].trim_start_matches("-o="));

        let mut stamped = format!("stamped@{timestamp}:").into_bytes();
        stamped.extend_from_slice(&snapshot);

        match *self.convert.lock().unwrap() {
            Script::Succeed => {
                std::fs::write(output, stamped).unwrap();
                ToolOutcome::Success
            }
            Script::Fail => {
                std::fs::write(output, b"partial").unwrap();
                ToolOutcome::Failed {
                    status: "exit status: 1".to_string(),
                    stderr: "corrupt input".to_string(),
                }
            }
            Script::Hang => {
                std::fs::write(output, b"partial").unwrap();
                ToolOutcome::TimedOut {
                    after: invocation.timeout,
                }
            }
        }
    }

    fn update(&self, invocation: &ToolInvocation, dir: &Path) -> ToolOutcome {
        let server = &invocation.args[1];
        let artifact = dir.join(&invocation.args[2]);

        match *self.update.lock().unwrap() {
            Script::Succeed => {
                let mut content = std::fs::read(&artifact).unwrap_or_default();
                content.extend_from_slice(b"+diff");
                std::fs::write(&artifact, content).unwrap();
                // Stand-in for the change file the real deployment produces.
                let change_file = dir.join(CHANGE_FILE);
                std::fs::write(change_file, format!("<osmChange from=\"{server}\"/>")).unwrap();
                ToolOutcome::Success
            }
            Script::Fail => ToolOutcome::Failed {
                status: "exit status: 2".to_string(),
                stderr: "replication server unreachable".to_string(),
            },
            Script::Hang => ToolOutcome::TimedOut {
                after: invocation.timeout,
            },
        }
    }
}

#[async_trait]
impl ProcessRunner for ScriptedRunner {
    async fn run(&self, invocation: &ToolInvocation) -> ExtractResult<ToolOutcome> {
        push(
            &self.events,
            format!("run {} {}", invocation.program, invocation.args.join(" ")),
        );
        self.invocations.lock().unwrap().push(invocation.clone());

        let dir = invocation.work_dir.clone();
        let outcome = if invocation.program == self.tools.convert_program {
            self.convert(invocation, &dir)
        } else if invocation.program == self.tools.update_program {
            self.update(invocation, &dir)
        } else {
            panic!("unexpected program {}", invocation.program);
        };
        Ok(outcome)
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

/// A manager wired to fakes, plus handles to drive and inspect them.
pub struct Harness {
    pub manager: Arc<ExtractManager>,
    pub fetcher: Arc<FakeFetcher>,
    pub runner: Arc<ScriptedRunner>,
    pub events: EventLog,
    pub metrics: MetricsRegistry,
}

pub fn test_tools() -> ToolsConfig {
    ToolsConfig {
        convert_program: "osmconvert".to_string(),
        update_program: "pyosmium-up-to-date".to_string(),
        convert_timeout_secs: 60,
        update_timeout_secs: 3600,
        kill_on_timeout: true,
    }
}

pub fn harness(store: Arc<dyn ExtractStore>) -> Harness {
    let events: EventLog = Arc::new(Mutex::new(Vec::new()));
    let fetcher = Arc::new(FakeFetcher::new(Arc::clone(&events)));
    let runner = Arc::new(ScriptedRunner::new(test_tools(), Arc::clone(&events)));
    let metrics = MetricsRegistry::new();
    let manager = Arc::new(ExtractManager::new(
        store,
        Arc::clone(&fetcher) as Arc<dyn Fetcher>,
        Arc::clone(&runner) as Arc<dyn ProcessRunner>,
        test_tools(),
        Arc::clone(&metrics.metrics),
    ));
    Harness {
        manager,
        fetcher,
        runner,
        events,
        metrics,
    }
}

