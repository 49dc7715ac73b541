// src/config/remote.rs
use serde::{Deserialize, Serialize};
use std::env;

use crate::error::{OrchestratorError, Result};

pub const DEFAULT_MIN_DELAY_SECS: f64 = 15.0;
/// Upper bound for `min_delay_secs`; larger values are clamped to it.
pub const MAX_MIN_DELAY_SECS: f64 = 3600.0;

fn default_provider() -> String {
    "gemini".to_string()
}
fn default_api_key() -> String {
    "ENV".to_string()
}
fn default_min_delay() -> f64 {
    DEFAULT_MIN_DELAY_SECS
}
fn default_connect_timeout() -> u64 {
    4
}
fn default_timeout() -> u64 {
    30
}

/// Settings for the remote categorical classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    /// "gemini" | "openai" | "mock" (case-insensitive)
    #[serde(default = "default_provider")]
    pub provider: String,
    /// Provider model name; each provider has its own default.
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" means: read from GEMINI_API_KEY / OPENAI_API_KEY (by provider)
    #[serde(default = "default_api_key")]
    pub api_key: String,
    /// Minimum spacing between the starts of two consecutive remote calls.
    #[serde(default = "default_min_delay")]
    pub min_delay_secs: f64,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            api_key: default_api_key(),
            min_delay_secs: default_min_delay(),
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_timeout(),
        }
    }
}

impl RemoteConfig {
    /// Normalize provider name and clamp nonsense values back to defaults.
    pub fn sanitize(&mut self) {
        self.provider = self.provider.trim().to_lowercase();
        if !self.min_delay_secs.is_finite() || self.min_delay_secs < 0.0 {
            self.min_delay_secs = default_min_delay();
        }
        self.min_delay_secs = self.min_delay_secs.min(MAX_MIN_DELAY_SECS);
        if self.connect_timeout_secs == 0 {
            self.connect_timeout_secs = default_connect_timeout();
        }
        if self.timeout_secs == 0 {
            self.timeout_secs = default_timeout();
        }
    }

    /// Resolve the API key, following "ENV" to the provider's variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        if !self.api_key.trim().eq_ignore_ascii_case("env") {
            return Ok(self.api_key.trim().to_string());
        }
        let vars: &[&str] = match self.provider.as_str() {
            "gemini" => &["GEMINI_API_KEY", "GOOGLE_API_KEY"],
            "openai" => &["OPENAI_API_KEY"],
            "mock" => return Ok(String::new()),
            other => {
                return Err(OrchestratorError::Configuration(format!(
                    "unsupported remote provider: {other}"
                )))
            }
        };
        vars.iter()
            .find_map(|v| env::var(v).ok().filter(|s| !s.trim().is_empty()))
            .ok_or_else(|| {
                OrchestratorError::Configuration(format!("missing {} env var", vars[0]))
            })
    }

    /// Never panics, even on an unsanitized value.
    pub fn min_delay(&self) -> std::time::Duration {
        std::time::Duration::try_from_secs_f64(self.min_delay_secs.clamp(0.0, MAX_MIN_DELAY_SECS))
            .unwrap_or_else(|_| std::time::Duration::from_secs_f64(DEFAULT_MIN_DELAY_SECS))
    }
}
