//! Remote text-generation providers used by the remote labeler.
//!
//! A provider takes one prompt and returns the raw model reply. It knows
//! nothing about behavior categories; extraction happens in `remote`.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::RemoteConfig;
use crate::error::{OrchestratorError, Result};

const USER_AGENT: &str = "email-behavior-orchestrator/0.1";
const SYSTEM_PROMPT: &str =
    "You classify customer email threads. Reply with exactly one category name and nothing else.";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("provider returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("provider returned no text")]
    EmptyResponse,
    #[error("remote classification is disabled")]
    Disabled,
    #[error("{0}")]
    Scripted(String),
}

pub type ProviderFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<String, ProviderError>> + Send + 'a>>;

/// Does a single remote call.
pub trait Provider: Send + Sync + 'static {
    fn generate<'a>(&'a self, prompt: &'a str) -> ProviderFuture<'a>;
    fn name(&self) -> &'static str;
}

pub type DynProvider = Arc<dyn Provider>;

/// Build the provider named in config. `mock` replies "Unknown" unless scripted.
pub fn build_provider(cfg: &RemoteConfig) -> Result<DynProvider> {
    match cfg.provider.as_str() {
        "mock" => Ok(Arc::new(MockProvider::fixed("Unknown"))),
        "gemini" => Ok(Arc::new(GeminiProvider::new(cfg)?)),
        "openai" => Ok(Arc::new(OpenAiProvider::new(cfg)?)),
        other => Err(OrchestratorError::Configuration(format!(
            "unsupported remote provider: {other}"
        ))),
    }
}

fn http_client(cfg: &RemoteConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .timeout(Duration::from_secs(cfg.timeout_secs))
        .build()
        .map_err(|e| OrchestratorError::Configuration(format!("http client: {e}")))
}

async fn error_for_status(
    resp: reqwest::Response,
) -> std::result::Result<reqwest::Response, ProviderError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(ProviderError::Status {
        status: status.as_u16(),
        body: sanitize_reply(&body, 200),
    })
}

// ------------------------------------------------------------
// Gemini
// ------------------------------------------------------------

pub struct GeminiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl GeminiProvider {
    pub const DEFAULT_MODEL: &'static str = "gemini-1.5-flash";

    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(cfg)?,
            api_key: cfg.resolve_api_key()?,
            model: cfg
                .model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
        })
    }
}

impl Provider for GeminiProvider {
    fn generate<'a>(&'a self, prompt: &'a str) -> ProviderFuture<'a> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Part<'a> {
                text: &'a str,
            }
            #[derive(Serialize)]
            struct Content<'a> {
                parts: Vec<Part<'a>>,
            }
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct GenerationConfig {
                temperature: f32,
                max_output_tokens: u32,
            }
            #[derive(Serialize)]
            #[serde(rename_all = "camelCase")]
            struct Req<'a> {
                contents: Vec<Content<'a>>,
                generation_config: GenerationConfig,
            }
            #[derive(Deserialize)]
            struct Resp {
                #[serde(default)]
                candidates: Vec<Candidate>,
            }
            #[derive(Deserialize)]
            struct Candidate {
                content: Option<RespContent>,
            }
            #[derive(Deserialize)]
            struct RespContent {
                #[serde(default)]
                parts: Vec<RespPart>,
            }
            #[derive(Deserialize)]
            struct RespPart {
                #[serde(default)]
                text: String,
            }

            let url = format!(
                "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent",
                self.model
            );
            let req = Req {
                contents: vec![Content {
                    parts: vec![Part { text: prompt }],
                }],
                generation_config: GenerationConfig {
                    temperature: 0.0,
                    max_output_tokens: 16,
                },
            };

            let resp = self
                .http
                .post(url)
                .header("x-goog-api-key", &self.api_key)
                .json(&req)
                .send()
                .await?;
            let body: Resp = error_for_status(resp).await?.json().await?;
            let text: String = body
                .candidates
                .into_iter()
                .next()
                .and_then(|c| c.content)
                .map(|c| c.parts.into_iter().map(|p| p.text).collect())
                .unwrap_or_default();
            if text.trim().is_empty() {
                return Err(ProviderError::EmptyResponse);
            }
            Ok(text)
        })
    }

    fn name(&self) -> &'static str {
        "gemini"
    }
}

// ------------------------------------------------------------
// OpenAI (Chat Completions)
// ------------------------------------------------------------

pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub const DEFAULT_MODEL: &'static str = "gpt-4o-mini";

    pub fn new(cfg: &RemoteConfig) -> Result<Self> {
        Ok(Self {
            http: http_client(cfg)?,
            api_key: cfg.resolve_api_key()?,
            model: cfg
                .model
                .clone()
                .unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
        })
    }
}

impl Provider for OpenAiProvider {
    fn generate<'a>(&'a self, prompt: &'a str) -> ProviderFuture<'a> {
        Box::pin(async move {
            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                max_tokens: u32,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                #[serde(default)]
                content: Option<String>,
            }

            let req = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: SYSTEM_PROMPT,
                    },
                    Msg {
                        role: "user",
                        content: prompt,
                    },
                ],
                temperature: 0.0,
                max_tokens: 16,
            };

            let resp = self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&req)
                .send()
                .await?;
            let body: Resp = error_for_status(resp).await?.json().await?;
            body.choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .filter(|s| !s.trim().is_empty())
                .ok_or(ProviderError::EmptyResponse)
        })
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

// ------------------------------------------------------------
// Offline providers
// ------------------------------------------------------------

/// Always fails with `Disabled`; every thread ends up `Unknown`.
pub struct DisabledProvider;

impl Provider for DisabledProvider {
    fn generate<'a>(&'a self, _prompt: &'a str) -> ProviderFuture<'a> {
        Box::pin(async { Err(ProviderError::Disabled) })
    }
    fn name(&self) -> &'static str {
        "disabled"
    }
}

/// Deterministic provider for tests and local runs.
///
/// Scripted replies are consumed in order; once exhausted, `fallback` is returned.
/// Every prompt received is recorded.
pub struct MockProvider {
    script: Mutex<VecDeque<std::result::Result<String, String>>>,
    fallback: String,
    prompts: Mutex<Vec<String>>,
}

impl MockProvider {
    pub fn fixed(reply: impl Into<String>) -> Self {
        Self::scripted(Vec::new(), reply)
    }

    pub fn scripted(
        replies: Vec<std::result::Result<String, String>>,
        fallback: impl Into<String>,
    ) -> Self {
        Self {
            script: Mutex::new(replies.into()),
            fallback: fallback.into(),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|g| g.clone()).unwrap_or_default()
    }
}

impl Provider for MockProvider {
    fn generate<'a>(&'a self, prompt: &'a str) -> ProviderFuture<'a> {
        if let Ok(mut g) = self.prompts.lock() {
            g.push(prompt.to_string());
        }
        let next = self
            .script
            .lock()
            .ok()
            .and_then(|mut g| g.pop_front())
            .unwrap_or_else(|| Ok(self.fallback.clone()));
        Box::pin(async move { next.map_err(ProviderError::Scripted) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

/// ASCII-only, single line, at most `max` chars, whitespace collapsed. For logs.
pub fn sanitize_reply(input: &str, max: usize) -> String {
    let mut out = String::with_capacity(max.min(input.len()));
    let mut prev_space = false;
    for ch in input.chars() {
        let c = match ch {
            '\r' | '\n' | '\t' => ' ',
            c if c.is_ascii() => c,
            _ => ' ',
        };
        if c == ' ' {
            if !prev_space && !out.is_empty() {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(c);
            prev_space = false;
        }
        if out.len() >= max {
            break;
        }
    }
    out.trim().to_string()
}
