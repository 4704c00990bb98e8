//! # Per-case evaluation
//!
//! One case goes through: sentiment analysis and rule evaluation in
//! parallel, merge, reconcile against open alerts. Classifier trouble
//! degrades the run to rules-only and marks the result partial; it never
//! takes the case down. Stage transitions are traced so a stuck or failed
//! case is attributable to a specific phase.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

use crate::alert::Alert;
use crate::case::{Case, CaseStatus};
use crate::error::EvaluationError;
use crate::reconcile;
use crate::rules::{self, RuleBook, RuleViolation};
use crate::sentiment::{SentimentAnalyzer, SentimentResult};

/// Wall-clock seam; one `now` per scan is taken from it and threaded
/// through every time computation so tests stay deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Frozen clock for tests and replay.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

/// Phases of a single case evaluation. `Done` and `Partial` are terminal;
/// partial means the rules ran but sentiment was unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EvalStage {
    Pending,
    Analyzing,
    Evaluating,
    Merged,
    Deduplicated,
    Done,
    Partial,
}

impl EvalStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Partial)
    }

    fn may_advance_to(self, next: EvalStage) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Analyzing)
                | (Self::Analyzing, Self::Evaluating)
                | (Self::Evaluating, Self::Merged)
                | (Self::Merged, Self::Deduplicated)
                | (Self::Deduplicated, Self::Done)
                | (Self::Deduplicated, Self::Partial)
        )
    }
}

struct StageTracker {
    case_id: String,
    stage: EvalStage,
}

impl StageTracker {
    fn new(case_id: &str) -> Self {
        Self {
            case_id: case_id.to_string(),
            stage: EvalStage::Pending,
        }
    }

    fn advance(&mut self, next: EvalStage) {
        if self.stage.may_advance_to(next) {
            debug!(case = %self.case_id, from = ?self.stage, to = ?next, "evaluation stage");
            self.stage = next;
        } else {
            warn!(case = %self.case_id, from = ?self.stage, to = ?next, "illegal stage transition ignored");
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub case_id: String,
    /// `None` when the classifier was unavailable or malformed; the last
    /// stored result remains untouched in history.
    pub sentiment: Option<SentimentResult>,
    pub violations: Vec<RuleViolation>,
    pub new_alerts: Vec<Alert>,
    pub state: EvalStage,
}

pub struct CaseEvaluator {
    analyzer: SentimentAnalyzer,
    rules: RuleBook,
}

impl CaseEvaluator {
    pub fn new(analyzer: SentimentAnalyzer, rules: RuleBook) -> Self {
        Self { analyzer, rules }
    }

    /// Evaluate one case against the open-alert view the caller fetched.
    /// The only hard failure is a case the pipeline cannot work with at
    /// all; everything classifier-related degrades to a partial result.
    pub async fn evaluate_case(
        &self,
        case: &Case,
        now: DateTime<Utc>,
        open_alerts: &[Alert],
    ) -> Result<EvaluationResult, EvaluationError> {
        if case.id.trim().is_empty() {
            return Err(EvaluationError::aborted("case id is empty"));
        }

        let mut tracker = StageTracker::new(&case.id);
        tracker.advance(EvalStage::Analyzing);
        let (sentiment_outcome, violations) = tokio::join!(
            self.analyzer.analyze(case, now),
            async { rules::evaluate(case, now, &self.rules) },
        );
        tracker.advance(EvalStage::Evaluating);

        let sentiment = match sentiment_outcome {
            Ok(result) => Some(result),
            Err(err) => {
                warn!(case = %case.id, error = %err, "sentiment unavailable; continuing with rules only");
                None
            }
        };
        let degraded = sentiment.is_none();
        tracker.advance(EvalStage::Merged);

        // Closed cases may still be scored above, but they never alert.
        let new_alerts = if case.status == CaseStatus::Active {
            reconcile::reconcile(
                &case.id,
                case.severity,
                &violations,
                sentiment.as_ref(),
                open_alerts,
                now,
            )
        } else {
            Vec::new()
        };
        tracker.advance(EvalStage::Deduplicated);

        let state = if degraded {
            EvalStage::Partial
        } else {
            EvalStage::Done
        };
        tracker.advance(state);

        Ok(EvaluationResult {
            case_id: case.id.clone(),
            sentiment,
            violations,
            new_alerts,
            state,
        })
    }
}
