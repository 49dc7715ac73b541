// tests/remote_labeler.rs
//
// Remote strategy against scripted providers: extraction, failure isolation,
// and the minimum spacing between calls (virtual time).

use std::sync::Arc;
use std::time::Duration;

use email_behavior_orchestrator::{
    labeler::{
        extract_label,
        provider::{DisabledProvider, MockProvider},
        BehaviorLabeler, LabelDoc, RemoteLabeler,
    },
    pipeline::Pipeline,
    normalize::NormalizerMode,
    rules::RuleTable,
    thread::{TextPolicy, Thread},
    config::remote::MAX_MIN_DELAY_SECS,
    BehaviorLabel, OrchestratorConfig, OrchestratorError,
};

fn docs(n: usize) -> Vec<LabelDoc> {
    (0..n)
        .map(|i| LabelDoc::new(format!("T{i}"), format!("message number {i}")))
        .collect()
}

#[test]
fn extraction_contract() {
    assert_eq!(extract_label("The category is escalation."), BehaviorLabel::Escalation);
    assert_eq!(extract_label("**Escalation**"), BehaviorLabel::Escalation);
    assert_eq!(extract_label("Sorry, I am not sure."), BehaviorLabel::Unknown);
}

#[tokio::test]
async fn failed_call_is_unknown_and_batch_continues() {
    let provider = Arc::new(MockProvider::scripted(
        vec![
            Ok("Objection".into()),
            Err("429 quota exceeded".into()),
            Ok("New Information".into()),
        ],
        "Unknown",
    ));
    let labeler = RemoteLabeler::new(provider.clone(), Duration::ZERO);

    let out = labeler.label_batch(&docs(3)).await;
    let labels: Vec<_> = out.iter().map(|l| l.label).collect();
    assert_eq!(
        labels,
        vec![
            BehaviorLabel::Objection,
            BehaviorLabel::Unknown,
            BehaviorLabel::NewInformation
        ]
    );
    assert_eq!(provider.prompts().len(), 3);
}

#[tokio::test]
async fn whole_thread_is_sent_unnormalized() {
    let provider = Arc::new(MockProvider::fixed("Escalation"));
    let labeler = Arc::new(RemoteLabeler::new(provider.clone(), Duration::ZERO));
    let pipeline = Pipeline::new(labeler, NormalizerMode::Basic, TextPolicy::FullThread);

    let thread = Thread::new(
        "T9",
        "c@x.y",
        vec!["Order #12 is late.".into(), "Get me your MANAGER.".into()],
    );
    let out = pipeline.classify(&[thread], &RuleTable::default_table()).await;
    assert_eq!(out[0].predicted_behavior, BehaviorLabel::Escalation);
    assert_eq!(out[0].suggested_action, "Forward to Manager");

    let prompt = &provider.prompts()[0];
    assert!(prompt.contains("Order #12 is late.\n---\nGet me your MANAGER."));
}

#[tokio::test]
async fn provider_failure_is_a_typed_error_for_the_thread() {
    let provider = Arc::new(MockProvider::scripted(
        vec![Err("503 unavailable".into())],
        "Confirmation",
    ));
    let labeler = RemoteLabeler::new(provider, Duration::ZERO);
    let doc = LabelDoc::new("T42", "where is my refund");

    match labeler.try_label(&doc).await {
        Err(OrchestratorError::RemoteClassification { thread_id, reason }) => {
            assert_eq!(thread_id, "T42");
            assert!(reason.contains("503"), "reason: {reason}");
        }
        other => panic!("expected RemoteClassification, got {other:?}"),
    }
    // Script exhausted: the fallback reply is used.
    assert_eq!(labeler.try_label(&doc).await.unwrap(), BehaviorLabel::Confirmation);
}

#[tokio::test(start_paused = true)]
async fn oversized_delay_does_not_panic() {
    let provider = Arc::new(MockProvider::fixed("Objection"));
    let labeler = Arc::new(RemoteLabeler::new(provider, Duration::MAX));

    assert_eq!(
        labeler.label_batch(&docs(1)).await[0].label,
        BehaviorLabel::Objection
    );
    // The second call waits (practically) forever instead of overflowing.
    let second = tokio::spawn({
        let labeler = labeler.clone();
        async move { labeler.label_batch(&docs(1)).await }
    });
    tokio::time::sleep(Duration::from_secs(86_400)).await;
    assert!(!second.is_finished());
    second.abort();
}

#[test]
fn configured_delay_far_too_large_is_clamped() {
    let cfg = OrchestratorConfig::from_toml_str("[remote]\nmin_delay_secs = 1e20").unwrap();
    assert_eq!(cfg.remote.min_delay_secs, MAX_MIN_DELAY_SECS);
    assert_eq!(cfg.remote.min_delay(), Duration::from_secs(3600));
}

#[tokio::test]
async fn disabled_provider_labels_everything_unknown() {
    let labeler = RemoteLabeler::new(Arc::new(DisabledProvider), Duration::ZERO);
    let out = labeler.label_batch(&docs(2)).await;
    assert!(out.iter().all(|l| l.label == BehaviorLabel::Unknown));
}

#[tokio::test(start_paused = true)]
async fn calls_are_spaced_by_min_delay() {
    let provider = Arc::new(MockProvider::fixed("Confirmation"));
    let labeler = RemoteLabeler::new(provider, Duration::from_secs(15));

    let start = tokio::time::Instant::now();
    let out = labeler.label_batch(&docs(3)).await;
    let elapsed = start.elapsed();

    assert_eq!(out.len(), 3);
    // N calls → at least (N-1) gaps.
    assert!(elapsed >= Duration::from_secs(30), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(45), "elapsed {elapsed:?}");

    // The spacing also applies across batches.
    let start = tokio::time::Instant::now();
    labeler.label_batch(&docs(1)).await;
    assert!(start.elapsed() >= Duration::from_secs(15));
}
