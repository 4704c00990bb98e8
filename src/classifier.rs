// src/classifier.rs: the external text-classifier seam and its adapters.
//
// The pipeline never talks to a vendor API directly; it holds a
// `dyn TextClassifier` and the adapters below translate. `OpenAiClassifier`
// speaks the chat-completions dialect, `RetryingClassifier` adds the
// bounded-latency contract (per-attempt timeout, bounded retries with
// backoff), and `MockClassifier` drives tests and the demo without a
// network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::AnalyzerConfig;
use crate::error::AnalysisError;

/// Instruction-set version sent with every request; bump when the contract
/// with the model changes.
pub const PROMPT_VERSION: &str = "csat-rater/v1";

pub const ENV_OPENAI_API_KEY: &str = "SENTINEL_OPENAI_API_KEY";

const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_ATTEMPT_TIMEOUT_SECS: u64 = 10;
const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_RETRY_BASE_MS: u64 = 300;

const SYSTEM_PROMPT: &str = concat!(
    "You are csat-rater/v1, a customer-support sentiment rater. ",
    "You receive redacted case text: the case description first, then customer ",
    "messages in chronological order, most recent last. ",
    "Reply with STRICT JSON only, no prose, no code fences: ",
    r#"{"score": <0.0-1.0, 0 = furious, 1 = delighted>, "#,
    r#""confidence": <0.0-1.0>, "#,
    r#""key_phrases": [<up to 8 short verbatim phrases>], "#,
    r#""concerns": [<up to 8 short concern summaries>]}"#,
);

/// Raw verdict from a classifier, before validation and clamping.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClassifierVerdict {
    pub score: f32,
    #[serde(default)]
    pub confidence: Option<f32>,
    #[serde(default)]
    pub key_phrases: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
}

impl ClassifierVerdict {
    pub fn scored(score: f32, confidence: f32) -> Self {
        Self {
            score,
            confidence: Some(confidence),
            key_phrases: Vec::new(),
            concerns: Vec::new(),
        }
    }
}

#[async_trait::async_trait]
pub trait TextClassifier: Send + Sync {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, AnalysisError>;
    fn name(&self) -> &'static str;
}

// --- OpenAI-compatible provider ----------------------------------------

pub struct OpenAiClassifier {
    api_key: String,
    model: String,
    endpoint: String,
    client: reqwest::Client,
}

impl OpenAiClassifier {
    pub fn new(api_key: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(4))
            // Hard ceiling; the per-attempt timeout in RetryingClassifier is
            // the one callers tune.
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            client,
        }
    }

    /// Build from `SENTINEL_OPENAI_API_KEY`, or `None` when unset.
    pub fn from_env() -> Option<Self> {
        let key = std::env::var(ENV_OPENAI_API_KEY).ok()?;
        let key = key.trim().to_string();
        if key.is_empty() {
            return None;
        }
        Some(Self::new(key))
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: String,
}

#[async_trait::async_trait]
impl TextClassifier for OpenAiClassifier {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, AnalysisError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: text,
                },
            ],
            temperature: 0.0,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| AnalysisError::unavailable(format!("request failed: {e}"), 1))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnalysisError::unavailable(
                format!("classifier endpoint returned HTTP {status}"),
                1,
            ));
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| AnalysisError::malformed(format!("invalid response envelope: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|c| c.message.content.trim())
            .unwrap_or_default();
        if content.is_empty() {
            return Err(AnalysisError::malformed("empty completion"));
        }
        parse_verdict(content)
    }

    fn name(&self) -> &'static str {
        "openai"
    }
}

/// Parse the JSON verdict out of a completion, tolerating the code fences
/// models love to add despite instructions.
pub fn parse_verdict(content: &str) -> Result<ClassifierVerdict, AnalysisError> {
    let trimmed = content.trim();
    let trimmed = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    let trimmed = trimmed.strip_suffix("```").unwrap_or(trimmed).trim();
    serde_json::from_str::<ClassifierVerdict>(trimmed)
        .map_err(|e| AnalysisError::malformed(format!("verdict is not the agreed JSON: {e}")))
}

// --- retry wrapper ------------------------------------------------------

/// Adds the bounded-latency contract around any classifier: each attempt is
/// timed out individually, failed attempts back off exponentially, and the
/// last error is surfaced once the budget is spent.
pub struct RetryingClassifier<C> {
    inner: C,
    max_attempts: u32,
    retry_base: Duration,
    attempt_timeout: Duration,
}

impl<C: TextClassifier> RetryingClassifier<C> {
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_base: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
            attempt_timeout: Duration::from_secs(DEFAULT_ATTEMPT_TIMEOUT_SECS),
        }
    }

    pub fn from_config(inner: C, cfg: &AnalyzerConfig) -> Self {
        Self::new(inner)
            .with_attempts(cfg.max_attempts)
            .with_retry_base(Duration::from_millis(cfg.retry_base_ms))
            .with_attempt_timeout(Duration::from_secs(cfg.request_timeout_secs))
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    pub fn with_retry_base(mut self, base: Duration) -> Self {
        self.retry_base = base;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    fn backoff_after(&self, attempt: u32) -> Duration {
        Duration::from_millis((self.retry_base.as_millis() as u64) << (attempt - 1))
    }
}

#[async_trait::async_trait]
impl<C: TextClassifier> TextClassifier for RetryingClassifier<C> {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, AnalysisError> {
        let mut last: Option<AnalysisError> = None;
        for attempt in 1..=self.max_attempts {
            match tokio::time::timeout(self.attempt_timeout, self.inner.classify(text)).await {
                Ok(Ok(verdict)) => {
                    if attempt > 1 {
                        debug!(classifier = self.inner.name(), attempt, "classifier recovered");
                    }
                    return Ok(verdict);
                }
                Ok(Err(err)) => {
                    metrics::counter!("classifier_failures_total").increment(1);
                    warn!(
                        classifier = self.inner.name(),
                        attempt,
                        error = %err,
                        "classifier attempt failed"
                    );
                    last = Some(err);
                }
                Err(_) => {
                    metrics::counter!("classifier_failures_total").increment(1);
                    warn!(
                        classifier = self.inner.name(),
                        attempt,
                        timeout_ms = self.attempt_timeout.as_millis() as u64,
                        "classifier attempt timed out"
                    );
                    last = Some(AnalysisError::unavailable(
                        format!("attempt timed out after {}ms", self.attempt_timeout.as_millis()),
                        attempt,
                    ));
                }
            }
            if attempt < self.max_attempts {
                tokio::time::sleep(self.backoff_after(attempt)).await;
            }
        }
        Err(match last {
            Some(AnalysisError::Unavailable { reason, .. }) => AnalysisError::Unavailable {
                reason,
                attempts: self.max_attempts,
            },
            Some(other) => other,
            None => AnalysisError::unavailable("no attempts were made", 0),
        })
    }

    fn name(&self) -> &'static str {
        "retrying"
    }
}

// --- scripted mock ------------------------------------------------------

/// Deterministic classifier for tests and the demo. Pops scripted steps in
/// order; once the script runs dry it serves the fallback verdict, or an
/// unavailable error when there is none. Records every input it saw so
/// tests can assert on what actually crossed the seam.
#[derive(Default)]
pub struct MockClassifier {
    script: Mutex<VecDeque<Result<ClassifierVerdict, AnalysisError>>>,
    fallback: Option<ClassifierVerdict>,
    calls: AtomicUsize,
    inputs: Mutex<Vec<String>>,
}

impl MockClassifier {
    /// Always returns the same verdict.
    pub fn fixed(verdict: ClassifierVerdict) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(verdict),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Serves the given steps in order, then errors.
    pub fn scripted(steps: Vec<Result<ClassifierVerdict, AnalysisError>>) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            fallback: None,
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    /// Serves the steps in order, then falls back to a fixed verdict.
    pub fn scripted_then_fixed(
        steps: Vec<Result<ClassifierVerdict, AnalysisError>>,
        fallback: ClassifierVerdict,
    ) -> Self {
        Self {
            script: Mutex::new(steps.into()),
            fallback: Some(fallback),
            calls: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().expect("mock input mutex poisoned").clone()
    }
}

#[async_trait::async_trait]
impl TextClassifier for MockClassifier {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, AnalysisError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inputs
            .lock()
            .expect("mock input mutex poisoned")
            .push(text.to_string());
        if let Some(step) = self
            .script
            .lock()
            .expect("mock script mutex poisoned")
            .pop_front()
        {
            return step;
        }
        match &self.fallback {
            Some(v) => Ok(v.clone()),
            None => Err(AnalysisError::unavailable("mock script exhausted", 1)),
        }
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
