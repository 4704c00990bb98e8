// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod alert;
pub mod case;
pub mod classifier;
pub mod config;
pub mod error;
pub mod history;
pub mod rules;
pub mod scrub;
pub mod sentiment;

// Evaluation pipeline (per-case orchestration, alert reconciliation, fleet scan)
pub mod pipeline;
pub mod reconcile;
pub mod scan;

// Edges: case source, alert sink, outbound delivery
pub mod notify;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::alert::{Alert, AlertPriority, AlertType};
pub use crate::case::{Case, CaseSeverity, CaseStatus, Direction, EntryType, TimelineEntry};
pub use crate::classifier::{
    ClassifierVerdict, MockClassifier, OpenAiClassifier, RetryingClassifier, TextClassifier,
};
pub use crate::config::{HotReloadConfig, PipelineConfig};
pub use crate::error::{AnalysisError, EvaluationError};
pub use crate::history::SentimentHistory;
pub use crate::notify::{AlertNotifier, ChatWebhookNotifier, NotifierMux};
pub use crate::pipeline::{
    CaseEvaluator, Clock, EvalStage, EvaluationResult, FixedClock, SystemClock,
};
pub use crate::reconcile::reconcile;
pub use crate::rules::{ComplianceLevel, RuleBook, RuleType, RuleViolation};
pub use crate::scan::{ScanSummary, Scanner, ShutdownFlag};
pub use crate::scrub::{scrub_patterns, ContextDetector, Scrubber};
pub use crate::sentiment::{SentimentAnalyzer, SentimentLabel, SentimentResult, SentimentTrend};
pub use crate::store::{AlertSink, CaseStore, InMemoryAlertSink, InMemoryCaseStore};

use tracing::{info, warn};

/// One-off smoke test of the classifier wiring. Call it after tracing
/// init; it logs the outcome and never panics, so a missing key or a
/// down endpoint cannot take the host process with it.
pub async fn run_classifier_quick_probe() -> anyhow::Result<()> {
    let Some(classifier) = OpenAiClassifier::from_env() else {
        warn!("classifier quick probe skipped: no API key in the environment");
        return Ok(());
    };
    match classifier
        .classify("The replacement arrived and everything works now, thank you.")
        .await
    {
        Ok(verdict) => {
            info!(score = verdict.score, "classifier quick probe ok");
        }
        Err(err) => {
            warn!(error = %err, "classifier quick probe failed");
        }
    }
    Ok(())
}
