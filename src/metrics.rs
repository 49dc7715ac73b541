use axum::{routing::get, Router};
use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use once_cell::sync::OnceCell;

static DESCRIBED: OnceCell<()> = OnceCell::new();

pub struct Metrics {
    pub handle: PrometheusHandle,
}

impl Metrics {
    /// Install the Prometheus recorder (once per process) and describe our series.
    pub fn init() -> Result<Self, BuildError> {
        let handle = PrometheusBuilder::new().install_recorder()?;
        describe_metrics();
        Ok(Self { handle })
    }

    /// `/metrics` in the Prometheus exposition format.
    pub fn router(&self) -> Router {
        let handle = self.handle.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let h = handle.clone();
                async move { h.render() }
            }),
        )
    }
}

pub fn describe_metrics() {
    DESCRIBED.get_or_init(|| {
        describe_counter!(
            "threads_labeled_total",
            "Threads labeled, by behavior and strategy"
        );
        describe_counter!(
            "remote_classify_errors_total",
            "Remote classification calls that failed and fell back to Unknown"
        );
        describe_counter!("decisions_logged_total", "Reviewer decisions appended to the ledger");
        describe_counter!("audit_write_errors_total", "Ledger appends that failed");
        describe_counter!("rule_table_saves_total", "Rule table writes");
        describe_histogram!("pipeline_batch_ms", "Wall time of one classify batch, ms");
    });
}
