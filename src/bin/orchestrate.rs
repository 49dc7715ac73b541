//! Offline pipeline runs.
//!
//! Usage:
//!   orchestrate classify            corpus → predictions (configured strategy, resumable)
//!   orchestrate train               predictions → model artifact
//!   orchestrate predict <text...>   single text through the trained artifact
//!   orchestrate metrics             ledger summary

use anyhow::{bail, Context, Result};
use tracing::info;

use email_behavior_orchestrator::{
    config::OrchestratorConfig,
    labeler::{build_labeler, ModelArtifact, TrainParams},
    ledger::{JsonFileLedger, LedgerStore},
    pipeline::{Pipeline, PredictionSummary},
    rules::{resolve, JsonFileRuleStore, RuleStore},
    store::{load_threads, PredictionsFile},
    telemetry,
};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    telemetry::init_tracing("email_behavior_orchestrator=info,orchestrate=info,warn");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let cfg = OrchestratorConfig::load().context("loading configuration")?;

    match args.first().map(String::as_str) {
        Some("classify") => classify(&cfg).await,
        Some("train") => train(&cfg),
        Some("predict") => predict(&cfg, &args[1..].join(" ")),
        Some("metrics") => metrics(&cfg),
        _ => bail!("usage: orchestrate <classify|train|predict <text>|metrics>"),
    }
}

async fn classify(cfg: &OrchestratorConfig) -> Result<()> {
    let threads = load_threads(&cfg.paths.input)
        .with_context(|| format!("reading corpus {}", cfg.paths.input.display()))?;
    let rules = JsonFileRuleStore::new(&cfg.paths.rules).load()?;
    let labeler = build_labeler(cfg)?;
    let pipeline = Pipeline::new(labeler, cfg.pipeline.normalizer, cfg.pipeline.text_policy);

    let mut sink = PredictionsFile::new(&cfg.paths.predictions);
    let report = pipeline
        .run_incremental(&threads, &rules, &mut sink, cfg.pipeline.resume)
        .await?;
    info!(
        labeled = report.labeled,
        skipped = report.skipped,
        unknown = report.unknown,
        out = %cfg.paths.predictions.display(),
        "predictions written"
    );
    print_summary(&PredictionSummary::from_predictions(&sink.load()?))
}

fn train(cfg: &OrchestratorConfig) -> Result<()> {
    let predictions = PredictionsFile::new(&cfg.paths.predictions).load()?;
    if predictions.is_empty() {
        bail!(
            "no predictions at {}; run `orchestrate classify` first",
            cfg.paths.predictions.display()
        );
    }
    print_summary(&PredictionSummary::from_predictions(&predictions))?;

    let artifact = ModelArtifact::train_from_predictions(
        &predictions,
        cfg.pipeline.normalizer,
        &TrainParams::from(&cfg.supervised),
    )?;
    artifact.save(&cfg.paths.model)?;
    println!(
        "model trained on {} samples, {} features → {}",
        artifact.trained_on,
        artifact.vectorizer.dim(),
        cfg.paths.model.display()
    );
    Ok(())
}

fn predict(cfg: &OrchestratorConfig, text: &str) -> Result<()> {
    if text.trim().is_empty() {
        bail!("usage: orchestrate predict <text>");
    }
    let artifact = ModelArtifact::load(&cfg.paths.model)?;
    let labeled = artifact.predict_text(text)?;
    let rules = JsonFileRuleStore::new(&cfg.paths.rules).load()?;
    let out = serde_json::json!({
        "predicted_behavior": labeled.label,
        "suggested_action": resolve(labeled.label, &rules),
        "confidence": labeled.confidence,
    });
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn metrics(cfg: &OrchestratorConfig) -> Result<()> {
    let m = JsonFileLedger::new(&cfg.paths.ledger).metrics()?;
    println!("decisions logged : {}", m.total);
    println!("approved         : {}", m.approved_count);
    println!("overridden       : {}", m.overridden_count);
    println!("accuracy         : {}", m.accuracy_display());
    for (action, n) in &m.action_distribution {
        println!("  {action:<28} {n}");
    }
    Ok(())
}

fn print_summary(s: &PredictionSummary) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(s)?);
    Ok(())
}
