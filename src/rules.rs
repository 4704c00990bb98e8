//! # Time-based case hygiene rules
//!
//! Pure evaluation over a case snapshot and an injected `now`. Each rule in
//! the book yields exactly one result per run, graded compliant, warning,
//! or breach; downstream reconciliation decides which grades become alerts.
//! Boundary semantics: a metric equal to a threshold lands in the stricter
//! tier.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::case::{Case, EntryType};
use crate::config::RulesConfig;

const MS_PER_DAY: f64 = 86_400_000.0;
const MS_PER_HOUR: f64 = 3_600_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleType {
    CommunicationGap,
    NotesStaleness,
    EmailToNotesGap,
}

impl RuleType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommunicationGap => "communication_gap",
            Self::NotesStaleness => "notes_staleness",
            Self::EmailToNotesGap => "email_to_notes_gap",
        }
    }
}

/// Ordered so the stricter grade always wins a `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceLevel {
    Compliant,
    Warning,
    Breach,
}

/// One graded rule result. `metric_value` is days for the gap rules and
/// hours for email-to-notes; `threshold_warning` is absent for rules that
/// only know a breach tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleViolation {
    pub rule_type: RuleType,
    pub severity: ComplianceLevel,
    pub metric_value: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub threshold_warning: Option<f64>,
    pub threshold_breach: f64,
}

/// A rule plus its thresholds. Adding a rule means adding a variant and its
/// metric arm in `evaluate_rule`; grading and orchestration stay untouched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RuleSpec {
    CommunicationGap { warning_days: f64, breach_days: f64 },
    NotesStaleness { warning_days: f64, breach_days: f64 },
    EmailToNotesGap { breach_hours: f64, lookback_days: f64 },
}

impl RuleSpec {
    pub fn rule_type(&self) -> RuleType {
        match self {
            Self::CommunicationGap { .. } => RuleType::CommunicationGap,
            Self::NotesStaleness { .. } => RuleType::NotesStaleness,
            Self::EmailToNotesGap { .. } => RuleType::EmailToNotesGap,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RuleBook {
    rules: Vec<RuleSpec>,
}

impl Default for RuleBook {
    fn default() -> Self {
        Self::from_config(&RulesConfig::default())
    }
}

impl RuleBook {
    pub fn from_config(cfg: &RulesConfig) -> Self {
        Self {
            rules: vec![
                RuleSpec::CommunicationGap {
                    warning_days: cfg.communication_gap.warning_days,
                    breach_days: cfg.communication_gap.breach_days,
                },
                RuleSpec::NotesStaleness {
                    warning_days: cfg.notes_staleness.warning_days,
                    breach_days: cfg.notes_staleness.breach_days,
                },
                RuleSpec::EmailToNotesGap {
                    breach_hours: cfg.email_to_notes.breach_hours,
                    lookback_days: cfg.email_to_notes.lookback_days,
                },
            ],
        }
    }

    pub fn rules(&self) -> &[RuleSpec] {
        &self.rules
    }
}

/// Evaluate every rule in the book against one case. Non-active cases get
/// an empty result; entries without timestamps are invisible to the time
/// math but never abort the run.
pub fn evaluate(case: &Case, now: DateTime<Utc>, book: &RuleBook) -> Vec<RuleViolation> {
    if !case.is_active() {
        return Vec::new();
    }
    let missing_ts = case
        .timeline
        .iter()
        .filter(|e| e.created_at.is_none())
        .count();
    if missing_ts > 0 {
        debug!(
            case = %case.id,
            skipped = missing_ts,
            "timeline entries without timestamps are invisible to rules"
        );
    }
    book.rules()
        .iter()
        .map(|spec| evaluate_rule(case, now, spec))
        .collect()
}

fn evaluate_rule(case: &Case, now: DateTime<Utc>, spec: &RuleSpec) -> RuleViolation {
    match *spec {
        RuleSpec::CommunicationGap {
            warning_days,
            breach_days,
        } => {
            let days = days_since_last(case, now, EntryType::OutboundCommunication);
            violation(RuleType::CommunicationGap, days, Some(warning_days), breach_days)
        }
        RuleSpec::NotesStaleness {
            warning_days,
            breach_days,
        } => {
            let days = days_since_last(case, now, EntryType::InternalNote);
            violation(RuleType::NotesStaleness, days, Some(warning_days), breach_days)
        }
        RuleSpec::EmailToNotesGap {
            breach_hours,
            lookback_days,
        } => {
            let hours = max_unanswered_gap_hours(case, now, lookback_days);
            violation(RuleType::EmailToNotesGap, hours, None, breach_hours)
        }
    }
}

/// Days since the newest entry of `kind`; with no timestamped entry of that
/// kind, days since the case was created.
fn days_since_last(case: &Case, now: DateTime<Utc>, kind: EntryType) -> f64 {
    let anchor = case.last_timestamp_of(kind).unwrap_or(case.created_at);
    duration_days(now - anchor)
}

/// Largest unanswered outbound gap inside the lookback window, in hours.
/// An outbound entry counts as answered once any note exists at or after
/// its timestamp; unanswered gaps are measured to `now`.
fn max_unanswered_gap_hours(case: &Case, now: DateTime<Utc>, lookback_days: f64) -> f64 {
    let cutoff = now - Duration::milliseconds((lookback_days * MS_PER_DAY) as i64);
    let note_times: Vec<DateTime<Utc>> = case
        .entries_of(EntryType::InternalNote)
        .filter_map(|e| e.created_at)
        .collect();

    let mut worst: f64 = 0.0;
    for entry in case.entries_of(EntryType::OutboundCommunication) {
        let Some(sent) = entry.created_at else {
            continue;
        };
        if sent < cutoff || sent > now {
            continue;
        }
        if note_times.iter().any(|n| *n >= sent) {
            continue;
        }
        worst = worst.max(duration_hours(now - sent));
    }
    worst
}

fn violation(
    rule_type: RuleType,
    metric: f64,
    warning: Option<f64>,
    breach: f64,
) -> RuleViolation {
    RuleViolation {
        rule_type,
        severity: grade(metric, warning, breach),
        metric_value: metric,
        threshold_warning: warning,
        threshold_breach: breach,
    }
}

/// Threshold grading; equality lands in the stricter tier.
pub fn grade(metric: f64, warning: Option<f64>, breach: f64) -> ComplianceLevel {
    if metric >= breach {
        ComplianceLevel::Breach
    } else if warning.is_some_and(|w| metric >= w) {
        ComplianceLevel::Warning
    } else {
        ComplianceLevel::Compliant
    }
}

fn duration_days(d: Duration) -> f64 {
    d.num_milliseconds().max(0) as f64 / MS_PER_DAY
}

fn duration_hours(d: Duration) -> f64 {
    d.num_milliseconds().max(0) as f64 / MS_PER_HOUR
}
