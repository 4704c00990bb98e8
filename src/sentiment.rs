//! # Sentiment analysis
//!
//! Turns a case into classifier input, enforces the scrub-before-send rule,
//! validates the verdict, and derives the label and trend. The analyzer
//! itself holds no vendor knowledge; everything external sits behind the
//! `TextClassifier` seam.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::case::{Case, EntryType, TimelineEntry};
use crate::classifier::{ClassifierVerdict, TextClassifier};
use crate::config::AnalyzerConfig;
use crate::error::AnalysisError;
use crate::history::SentimentHistory;
use crate::scrub::Scrubber;

/// Scores below this are negative; scores from here up to
/// `SCORE_POSITIVE_MIN` are neutral.
pub const SCORE_NEGATIVE_MAX: f32 = 0.40;
pub const SCORE_POSITIVE_MIN: f32 = 0.60;
pub const DEFAULT_TREND_EPSILON: f32 = 0.05;

const DEFAULT_CONFIDENCE: f32 = 0.5;
const MAX_PHRASE_CHARS: usize = 80;
const NEAR_DUPLICATE_SIM: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentLabel {
    Negative,
    Neutral,
    Positive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SentimentTrend {
    Improving,
    Stable,
    Declining,
}

/// Validated output of one analysis run for one case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentResult {
    pub score: f32,
    pub label: SentimentLabel,
    pub trend: SentimentTrend,
    #[serde(default)]
    pub key_phrases: Vec<String>,
    #[serde(default)]
    pub concerns: Vec<String>,
    pub confidence: f32,
}

pub fn label_for_score(score: f32) -> SentimentLabel {
    if score < SCORE_NEGATIVE_MAX {
        SentimentLabel::Negative
    } else if score < SCORE_POSITIVE_MIN {
        SentimentLabel::Neutral
    } else {
        SentimentLabel::Positive
    }
}

/// Trend against the previous stored score. First-ever evaluation is
/// `Stable`; moves inside the epsilon dead band are `Stable` too.
pub fn trend_for(previous: Option<f32>, current: f32, epsilon: f32) -> SentimentTrend {
    let Some(prev) = previous else {
        return SentimentTrend::Stable;
    };
    let delta = current - prev;
    if delta > epsilon {
        SentimentTrend::Improving
    } else if delta < -epsilon {
        SentimentTrend::Declining
    } else {
        SentimentTrend::Stable
    }
}

#[inline]
fn clamp01(v: f32) -> f32 {
    v.clamp(0.0, 1.0)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        return s.to_string();
    }
    s.chars().take(max).collect()
}

/// Classifier input for a case: description first, then customer-authored
/// entries in chronological order, most recent last. The budget is enforced
/// by dropping the oldest inbound entries first; the description itself is
/// truncated only when it alone exceeds the budget.
pub fn build_analysis_text(case: &Case, budget_chars: usize) -> String {
    let desc = case.description.trim();
    let desc_len = desc.chars().count();
    let mut out = if desc_len > budget_chars {
        truncate_chars(desc, budget_chars)
    } else {
        desc.to_string()
    };
    let mut remaining = budget_chars.saturating_sub(desc_len);

    let mut inbound: Vec<&TimelineEntry> = case
        .timeline
        .iter()
        .filter(|e| e.entry_type == EntryType::InboundCommunication)
        .collect();
    // Entries without a timestamp sort oldest, so they are the first to go.
    inbound.sort_by_key(|e| e.created_at);

    let mut picked: Vec<&str> = Vec::new();
    for entry in inbound.iter().rev() {
        let content = entry.content.trim();
        if content.is_empty() {
            continue;
        }
        let cost = content.chars().count() + 2;
        if cost > remaining {
            break;
        }
        picked.push(content);
        remaining -= cost;
    }
    for content in picked.iter().rev() {
        out.push_str("\n\n");
        out.push_str(content);
    }
    out
}

/// Phrase hygiene: trim, drop empties, cap length, drop near-duplicates,
/// cap count.
fn tidy_phrases(raw: Vec<String>, cap: usize) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for phrase in raw {
        let trimmed = phrase.trim();
        if trimmed.is_empty() {
            continue;
        }
        let candidate = truncate_chars(trimmed, MAX_PHRASE_CHARS);
        let lower = candidate.to_lowercase();
        let dup = out.iter().any(|kept| {
            strsim::normalized_levenshtein(&kept.to_lowercase(), &lower) >= NEAR_DUPLICATE_SIM
        });
        if dup {
            continue;
        }
        out.push(candidate);
        if out.len() == cap {
            break;
        }
    }
    out
}

pub struct SentimentAnalyzer {
    classifier: Arc<dyn TextClassifier>,
    scrubber: Scrubber,
    history: Arc<SentimentHistory>,
    text_budget_chars: usize,
    trend_epsilon: f32,
    max_key_phrases: usize,
}

impl SentimentAnalyzer {
    pub fn new(
        classifier: Arc<dyn TextClassifier>,
        scrubber: Scrubber,
        history: Arc<SentimentHistory>,
    ) -> Self {
        let defaults = AnalyzerConfig::default();
        Self::from_config(classifier, scrubber, history, &defaults)
    }

    pub fn from_config(
        classifier: Arc<dyn TextClassifier>,
        scrubber: Scrubber,
        history: Arc<SentimentHistory>,
        cfg: &AnalyzerConfig,
    ) -> Self {
        Self {
            classifier,
            scrubber,
            history,
            text_budget_chars: cfg.text_budget_chars,
            trend_epsilon: cfg.trend_epsilon,
            max_key_phrases: cfg.max_key_phrases,
        }
    }

    /// Analyze one case. Classifier trouble surfaces as `AnalysisError`; the
    /// stored history is left untouched in that event, so the next
    /// successful run still trends against the last known score.
    pub async fn analyze(
        &self,
        case: &Case,
        now: DateTime<Utc>,
    ) -> Result<SentimentResult, AnalysisError> {
        let raw = build_analysis_text(case, self.text_budget_chars);
        // Hard invariant: nothing crosses the classifier seam unscrubbed.
        let clean = self.scrubber.scrub(&raw).await;
        let verdict = self.classifier.classify(&clean).await?;
        let result = self.validate(case, verdict)?;
        self.history.push(&case.id, result.clone(), now);
        Ok(result)
    }

    fn validate(
        &self,
        case: &Case,
        verdict: ClassifierVerdict,
    ) -> Result<SentimentResult, AnalysisError> {
        if !verdict.score.is_finite() {
            return Err(AnalysisError::malformed("score is not a finite number"));
        }
        let score = clamp01(verdict.score);
        let confidence = match verdict.confidence {
            Some(c) if c.is_finite() => clamp01(c),
            Some(_) => DEFAULT_CONFIDENCE,
            None => {
                debug!(case = %case.id, "verdict carried no confidence; defaulting to 0.5");
                DEFAULT_CONFIDENCE
            }
        };
        let previous = self.history.latest_score(&case.id);
        Ok(SentimentResult {
            score,
            label: label_for_score(score),
            trend: trend_for(previous, score, self.trend_epsilon),
            key_phrases: tidy_phrases(verdict.key_phrases, self.max_key_phrases),
            concerns: tidy_phrases(verdict.concerns, self.max_key_phrases),
            confidence,
        })
    }
}
