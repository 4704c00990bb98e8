//! # Alert reconciliation
//!
//! Decides which findings become alerts. Candidates are rule results graded
//! warning or worse plus a negative-sentiment finding with enough
//! confidence; a candidate whose dedup key matches an open alert is
//! suppressed. Reconciliation only ever creates; closing alerts is the
//! host's workflow.
//!
//! Priority is evaluation-wide: the highest priority among the conditions
//! that fired is stamped on every alert created in that evaluation, so a
//! breach escalates the sentiment alert born in the same run.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::alert::{self, Alert, AlertPriority, AlertType};
use crate::case::CaseSeverity;
use crate::rules::{ComplianceLevel, RuleViolation};
use crate::sentiment::{SentimentLabel, SentimentResult};

/// Sentiment fires as an alert candidate only at or above this confidence.
pub const SENTIMENT_CONFIDENCE_FLOOR: f32 = 0.60;
/// Score rungs for the priority ladder.
pub const SENTIMENT_SCORE_CRITICAL: f32 = 0.25;
pub const SENTIMENT_SCORE_HIGH: f32 = 0.40;

pub fn reconcile(
    case_id: &str,
    case_severity: CaseSeverity,
    violations: &[RuleViolation],
    sentiment: Option<&SentimentResult>,
    open_alerts: &[Alert],
    now: DateTime<Utc>,
) -> Vec<Alert> {
    let fired: Vec<&RuleViolation> = violations
        .iter()
        .filter(|v| v.severity >= ComplianceLevel::Warning)
        .collect();
    let sentiment_fired = sentiment.filter(|s| {
        s.label == SentimentLabel::Negative && s.confidence >= SENTIMENT_CONFIDENCE_FLOOR
    });

    let Some(priority) = evaluation_priority(case_severity, &fired, sentiment_fired) else {
        return Vec::new();
    };

    let mut created = Vec::new();
    for violation in fired {
        push_unless_open(
            &mut created,
            case_id,
            AlertType::from(violation.rule_type),
            priority,
            alert::violation_message(case_id, violation),
            open_alerts,
            now,
        );
    }
    if let Some(s) = sentiment_fired {
        push_unless_open(
            &mut created,
            case_id,
            AlertType::SentimentRisk,
            priority,
            alert::sentiment_message(case_id, s),
            open_alerts,
            now,
        );
    }
    created
}

/// Highest priority over every condition that fired; `None` when nothing
/// fired. A sentiment finding below the confidence floor contributes
/// nothing, so a shaky guess never escalates a rule alert.
fn evaluation_priority(
    case_severity: CaseSeverity,
    fired: &[&RuleViolation],
    sentiment: Option<&SentimentResult>,
) -> Option<AlertPriority> {
    let mut top: Option<AlertPriority> = None;
    for violation in fired {
        let p = match violation.severity {
            ComplianceLevel::Breach if case_severity == CaseSeverity::Critical => {
                AlertPriority::Critical
            }
            ComplianceLevel::Breach => AlertPriority::High,
            ComplianceLevel::Warning => AlertPriority::Medium,
            ComplianceLevel::Compliant => continue,
        };
        top = Some(top.map_or(p, |t| t.max(p)));
    }
    if let Some(s) = sentiment {
        let p = if s.score < SENTIMENT_SCORE_CRITICAL {
            AlertPriority::Critical
        } else if s.score < SENTIMENT_SCORE_HIGH {
            AlertPriority::High
        } else {
            AlertPriority::Medium
        };
        top = Some(top.map_or(p, |t| t.max(p)));
    }
    top
}

fn push_unless_open(
    created: &mut Vec<Alert>,
    case_id: &str,
    alert_type: AlertType,
    priority: AlertPriority,
    message: String,
    open_alerts: &[Alert],
    now: DateTime<Utc>,
) {
    let key = Alert::dedup_key_for(case_id, alert_type);
    if open_alerts.iter().any(|a| a.dedup_key == key) {
        debug!(
            case = case_id,
            alert_type = alert_type.as_str(),
            "open alert already covers this concern; suppressed"
        );
        metrics::counter!("scan_alerts_suppressed_total").increment(1);
        return;
    }
    created.push(Alert::new(case_id, alert_type, priority, message, now));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RuleType;
    use crate::sentiment::{label_for_score, SentimentTrend};

    fn violation(rule_type: RuleType, severity: ComplianceLevel, metric: f64) -> RuleViolation {
        RuleViolation {
            rule_type,
            severity,
            metric_value: metric,
            threshold_warning: Some(2.0),
            threshold_breach: 3.0,
        }
    }

    fn sentiment(score: f32, confidence: f32) -> SentimentResult {
        SentimentResult {
            score,
            label: label_for_score(score),
            trend: SentimentTrend::Stable,
            key_phrases: vec![],
            concerns: vec![],
            confidence,
        }
    }

    #[test]
    fn nothing_fired_creates_nothing() {
        let violations = vec![violation(RuleType::CommunicationGap, ComplianceLevel::Compliant, 1.0)];
        let out = reconcile(
            "case-001",
            CaseSeverity::Medium,
            &violations,
            Some(&sentiment(0.7, 0.9)),
            &[],
            Utc::now(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn breach_on_high_case_is_high_priority() {
        let violations = vec![violation(RuleType::CommunicationGap, ComplianceLevel::Breach, 10.0)];
        let out = reconcile("case-004", CaseSeverity::High, &violations, None, &[], Utc::now());
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].alert_type, AlertType::CommunicationGap);
        assert_eq!(out[0].priority, AlertPriority::High);
        assert!(out[0].message.contains("10.0 days"));
    }

    #[test]
    fn breach_on_critical_case_is_critical_priority() {
        let violations = vec![violation(RuleType::NotesStaleness, ComplianceLevel::Breach, 8.0)];
        let out = reconcile("case-009", CaseSeverity::Critical, &violations, None, &[], Utc::now());
        assert_eq!(out[0].priority, AlertPriority::Critical);
    }

    #[test]
    fn warning_alone_is_medium_priority() {
        let violations = vec![violation(RuleType::NotesStaleness, ComplianceLevel::Warning, 5.5)];
        let out = reconcile("case-002", CaseSeverity::Low, &violations, None, &[], Utc::now());
        assert_eq!(out[0].priority, AlertPriority::Medium);
    }

    #[test]
    fn very_negative_sentiment_is_critical() {
        let out = reconcile(
            "case-010",
            CaseSeverity::Low,
            &[],
            Some(&sentiment(0.2, 0.9)),
            &[],
            Utc::now(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].alert_type, AlertType::SentimentRisk);
        assert_eq!(out[0].priority, AlertPriority::Critical);
    }

    #[test]
    fn negative_sentiment_above_critical_rung_is_high() {
        let out = reconcile(
            "case-010",
            CaseSeverity::Low,
            &[],
            Some(&sentiment(0.3, 0.7)),
            &[],
            Utc::now(),
        );
        assert_eq!(out[0].priority, AlertPriority::High);
    }

    #[test]
    fn low_confidence_sentiment_never_fires() {
        let out = reconcile(
            "case-010",
            CaseSeverity::Low,
            &[],
            Some(&sentiment(0.1, 0.59)),
            &[],
            Utc::now(),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn low_confidence_sentiment_does_not_escalate_rule_alerts() {
        let violations = vec![violation(RuleType::NotesStaleness, ComplianceLevel::Warning, 5.5)];
        let out = reconcile(
            "case-002",
            CaseSeverity::Low,
            &violations,
            Some(&sentiment(0.1, 0.3)),
            &[],
            Utc::now(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].alert_type, AlertType::NotesStaleness);
        assert_eq!(out[0].priority, AlertPriority::Medium);
    }

    #[test]
    fn evaluation_priority_is_stamped_on_every_alert() {
        // A breach (high) plus a warning plus firing sentiment: everything
        // created in this evaluation carries the highest priority.
        let violations = vec![
            violation(RuleType::CommunicationGap, ComplianceLevel::Breach, 10.0),
            violation(RuleType::NotesStaleness, ComplianceLevel::Warning, 5.5),
        ];
        let out = reconcile(
            "case-011",
            CaseSeverity::Medium,
            &violations,
            Some(&sentiment(0.35, 0.8)),
            &[],
            Utc::now(),
        );
        assert_eq!(out.len(), 3);
        assert!(out.iter().all(|a| a.priority == AlertPriority::High));
    }

    #[test]
    fn open_alert_suppresses_same_concern_only() {
        let now = Utc::now();
        let open = vec![Alert::new(
            "case-004",
            AlertType::CommunicationGap,
            AlertPriority::High,
            "existing",
            now - chrono::Duration::hours(4),
        )];
        let violations = vec![
            violation(RuleType::CommunicationGap, ComplianceLevel::Breach, 10.0),
            violation(RuleType::NotesStaleness, ComplianceLevel::Breach, 9.0),
        ];
        let out = reconcile("case-004", CaseSeverity::High, &violations, None, &open, now);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].alert_type, AlertType::NotesStaleness);
    }

    #[test]
    fn open_alert_on_another_case_does_not_suppress() {
        let now = Utc::now();
        let open = vec![Alert::new(
            "case-777",
            AlertType::CommunicationGap,
            AlertPriority::High,
            "other case",
            now,
        )];
        let violations = vec![violation(RuleType::CommunicationGap, ComplianceLevel::Breach, 4.0)];
        let out = reconcile("case-004", CaseSeverity::High, &violations, None, &open, now);
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn reconcile_is_idempotent_against_its_own_output() {
        let now = Utc::now();
        let violations = vec![violation(RuleType::CommunicationGap, ComplianceLevel::Breach, 4.0)];
        let first = reconcile("case-004", CaseSeverity::High, &violations, None, &[], now);
        assert_eq!(first.len(), 1);
        let second = reconcile("case-004", CaseSeverity::High, &violations, None, &first, now);
        assert!(second.is_empty());
    }
}
