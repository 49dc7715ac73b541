// tests/config_env.rs
//
// Config lookup order and env overrides. Env-mutating tests run serially.

use std::{env, fs};

use email_behavior_orchestrator::{
    config::{OrchestratorConfig, Strategy},
    labeler::build_labeler,
    OrchestratorError,
};

/// Restores the listed env vars and the working directory on drop.
struct EnvSnapshot {
    vars: Vec<(&'static str, Option<String>)>,
    cwd: std::path::PathBuf,
}

impl EnvSnapshot {
    fn take(keys: &[&'static str]) -> Self {
        Self {
            vars: keys.iter().map(|k| (*k, env::var(k).ok())).collect(),
            cwd: env::current_dir().unwrap(),
        }
    }
}

impl Drop for EnvSnapshot {
    fn drop(&mut self) {
        for (k, v) in &self.vars {
            match v {
                Some(val) => env::set_var(k, val),
                None => env::remove_var(k),
            }
        }
        let _ = env::set_current_dir(&self.cwd);
    }
}

const KEYS: &[&str] = &[
    "ORCHESTRATOR_CONFIG_PATH",
    "ORCHESTRATOR_STRATEGY",
    "ORCHESTRATOR_MIN_DELAY_SECS",
    "REMOTE_TEST_MODE",
    "GEMINI_API_KEY",
    "GOOGLE_API_KEY",
];

fn clear() -> EnvSnapshot {
    let snap = EnvSnapshot::take(KEYS);
    for k in KEYS {
        env::remove_var(k);
    }
    snap
}

#[serial_test::serial]
#[test]
fn defaults_when_no_file_and_no_env() {
    let _snap = clear();
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();

    let cfg = OrchestratorConfig::load().unwrap();
    assert_eq!(cfg.pipeline.strategy, Strategy::Clustering);
    assert_eq!(cfg.remote.min_delay_secs, 15.0);
}

#[serial_test::serial]
#[test]
fn env_path_then_overrides() {
    let _snap = clear();
    let tmp = tempfile::tempdir().unwrap();
    let path = tmp.path().join("custom.toml");
    fs::write(
        &path,
        r#"
[pipeline]
strategy = "supervised"

[remote]
provider = "openai"
min_delay_secs = 20.0
"#,
    )
    .unwrap();
    env::set_var("ORCHESTRATOR_CONFIG_PATH", path.display().to_string());

    let cfg = OrchestratorConfig::load().unwrap();
    assert_eq!(cfg.pipeline.strategy, Strategy::Supervised);
    assert_eq!(cfg.remote.provider, "openai");

    env::set_var("ORCHESTRATOR_STRATEGY", "remote");
    env::set_var("ORCHESTRATOR_MIN_DELAY_SECS", "0.5");
    env::set_var("REMOTE_TEST_MODE", "mock");
    let cfg = OrchestratorConfig::load().unwrap();
    assert_eq!(cfg.pipeline.strategy, Strategy::Remote);
    assert_eq!(cfg.remote.min_delay_secs, 0.5);
    assert_eq!(cfg.remote.provider, "mock");
    assert_eq!(build_labeler(&cfg).unwrap().name(), "remote");
}

#[serial_test::serial]
#[test]
fn missing_env_path_and_bad_strategy_are_errors() {
    let _snap = clear();
    env::set_var("ORCHESTRATOR_CONFIG_PATH", "/definitely/not/here.toml");
    assert!(matches!(
        OrchestratorConfig::load(),
        Err(OrchestratorError::Configuration(_))
    ));

    env::remove_var("ORCHESTRATOR_CONFIG_PATH");
    let tmp = tempfile::tempdir().unwrap();
    env::set_current_dir(tmp.path()).unwrap();
    env::set_var("ORCHESTRATOR_STRATEGY", "astrology");
    assert!(matches!(
        OrchestratorConfig::load(),
        Err(OrchestratorError::Configuration(_))
    ));
}

#[serial_test::serial]
#[test]
fn gemini_key_comes_from_env() {
    let _snap = clear();
    let mut cfg = OrchestratorConfig::default();
    cfg.pipeline.strategy = Strategy::Remote;

    assert!(matches!(
        build_labeler(&cfg),
        Err(OrchestratorError::Configuration(_))
    ));

    env::set_var("GEMINI_API_KEY", "test-key");
    assert_eq!(cfg.remote.resolve_api_key().unwrap(), "test-key");
    assert_eq!(build_labeler(&cfg).unwrap().name(), "remote");
}

#[serial_test::serial]
#[test]
fn shipped_config_file_parses() {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config/orchestrator.toml");
    let cfg = OrchestratorConfig::load_from(&path).unwrap();
    assert_eq!(cfg.clustering.k, 4);
    assert_eq!(cfg.clustering.cluster_map().unwrap().len(), 4);
}
