use std::sync::Arc;
use std::time::Duration;

use prometheus_client::encoding::{EncodeLabelSet, EncodeLabelValue};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::metrics::histogram::{exponential_buckets, Histogram};
use prometheus_client::registry::Registry;

// ---------------------------------------------------------------------------
// Label types
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OperationLabels {
    pub operation: Operation,
    pub outcome: Outcome,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Operation {
    Create,
    Download,
    UpdateToLatest,
    GetUpdates,
    Update,
    Delete,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Outcome {
    Success,
    Error,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolRunLabels {
    pub tool: Tool,
    /// `success`, `failure` or `timeout`.
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ToolLabels {
    pub tool: Tool,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, EncodeLabelValue)]
pub enum Tool {
    Convert,
    Update,
}

// ---------------------------------------------------------------------------
// Metrics struct
// ---------------------------------------------------------------------------

/// Every Prometheus metric exposed by the service.
pub struct Metrics {
    pub operations_total: Family<OperationLabels, Counter>,
    pub tool_runs_total: Family<ToolRunLabels, Counter>,
    pub tool_duration_seconds: Family<ToolLabels, Histogram>,
    pub fetched_bytes_total: Counter,
    pub extracts: Gauge,
}

impl Metrics {
    /// Create a new [`Metrics`] instance and register every metric with the
    /// supplied `registry`.
    pub fn new(registry: &mut Registry) -> Self {
        let operations_total = Family::<OperationLabels, Counter>::default();
        registry.register(
            "extract_operations",
            "Extract lifecycle operations by kind and outcome",
            operations_total.clone(),
        );

        let tool_runs_total = Family::<ToolRunLabels, Counter>::default();
        registry.register(
            "extract_tool_runs",
            "External tool invocations by tool and outcome",
            tool_runs_total.clone(),
        );

        // Tools run from sub-second up to the one-hour timeout.
        let tool_duration_seconds = Family::<ToolLabels, Histogram>::new_with_constructor(|| {
            Histogram::new(exponential_buckets(0.5, 2.0, 14))
        });
        registry.register(
            "extract_tool_duration_seconds",
            "External tool wall-clock time in seconds",
            tool_duration_seconds.clone(),
        );

        let fetched_bytes_total = Counter::default();
        registry.register(
            "extract_fetched_bytes",
            "Bytes downloaded from upstream snapshot and marker URLs",
            fetched_bytes_total.clone(),
        );

        let extracts: Gauge = Gauge::default();
        registry.register(
            "extract_extracts",
            "Number of extract directories on disk",
            extracts.clone(),
        );

        Self {
            operations_total,
            tool_runs_total,
            tool_duration_seconds,
            fetched_bytes_total,
            extracts,
        }
    }

    pub fn record_operation(&self, operation: Operation, success: bool) {
        let outcome = if success {
            Outcome::Success
        } else {
            Outcome::Error
        };
        self.operations_total
            .get_or_create(&OperationLabels { operation, outcome })
            .inc();
    }

    pub fn record_tool_run(&self, tool: Tool, outcome: &str, elapsed: Duration) {
        self.tool_runs_total
            .get_or_create(&ToolRunLabels {
                tool,
                outcome: outcome.to_string(),
            })
            .inc();
        self.tool_duration_seconds
            .get_or_create(&ToolLabels { tool })
            .observe(elapsed.as_secs_f64());
    }
}

// ---------------------------------------------------------------------------
// Shared handle
// ---------------------------------------------------------------------------

/// Thread-safe wrapper for the metrics registry, used in `AppState`.
#[derive(Clone)]
pub struct MetricsRegistry {
    pub registry: Arc<Registry>,
    pub metrics: Arc<Metrics>,
}

impl MetricsRegistry {
    /// Build a fresh registry and pre-register all service metrics.
    pub fn new() -> Self {
        let mut registry = Registry::default();
        let metrics = Metrics::new(&mut registry);
        Self {
            registry: Arc::new(registry),
            metrics: Arc::new(metrics),
        }
    }

    /// Render the registry in OpenMetrics text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buf = String::new();
        prometheus_client::encoding::text::encode(&mut buf, &self.registry)?;
        Ok(buf)
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
