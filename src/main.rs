//! Review service entrypoint.
//! Boots the Axum HTTP server over the file-backed rule table, ledger and predictions.

use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};

use email_behavior_orchestrator::{api, metrics::Metrics, telemetry, OrchestratorConfig};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    telemetry::init_tracing("email_behavior_orchestrator=info,warn");

    let cfg = OrchestratorConfig::load().map_err(anyhow::Error::from)?;
    info!(
        strategy = ?cfg.pipeline.strategy,
        predictions = %cfg.paths.predictions.display(),
        ledger = %cfg.paths.ledger.display(),
        rules = %cfg.paths.rules.display(),
        "configuration loaded"
    );

    let mut router = api::router(api::AppState::from_config(&cfg));

    let metrics_enabled = std::env::var("ORCHESTRATOR_METRICS")
        .map(|v| v != "0")
        .unwrap_or(true);
    if metrics_enabled {
        match Metrics::init() {
            Ok(m) => router = router.merge(m.router()),
            Err(e) => warn!(error = %e, "prometheus recorder not installed"),
        }
    }

    Ok(router.into())
}
