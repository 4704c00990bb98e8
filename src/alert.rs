// src/alert.rs: alert record, identity derivation, and message templates.
//
// Identity is content-derived: the dedup key hashes (case, alert type) so
// one concern can hold at most one open alert per case, and the alert id
// additionally hashes the creation instant so a re-alert after resolution
// gets a fresh id with the same dedup key.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::rules::{RuleType, RuleViolation};
use crate::sentiment::SentimentResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    CommunicationGap,
    NotesStaleness,
    EmailToNotesGap,
    SentimentRisk,
}

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CommunicationGap => "communication_gap",
            Self::NotesStaleness => "notes_staleness",
            Self::EmailToNotesGap => "email_to_notes_gap",
            Self::SentimentRisk => "sentiment_risk",
        }
    }
}

impl From<RuleType> for AlertType {
    fn from(rule: RuleType) -> Self {
        match rule {
            RuleType::CommunicationGap => Self::CommunicationGap,
            RuleType::NotesStaleness => Self::NotesStaleness,
            RuleType::EmailToNotesGap => Self::EmailToNotesGap,
        }
    }
}

/// Ordered so `max` picks the more urgent priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl AlertPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: String,
    pub case_id: String,
    pub alert_type: AlertType,
    pub priority: AlertPriority,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub dedup_key: String,
}

const KEY_HEX_CHARS: usize = 16;

fn short_hash(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            hasher.update([0x1f]);
        }
        hasher.update(part.as_bytes());
    }
    hasher
        .finalize()
        .iter()
        .take(KEY_HEX_CHARS / 2)
        .map(|b| format!("{b:02x}"))
        .collect()
}

impl Alert {
    /// Stable identity of "this concern on this case", independent of when
    /// the alert fires.
    pub fn dedup_key_for(case_id: &str, alert_type: AlertType) -> String {
        short_hash(&[case_id, alert_type.as_str()])
    }

    pub fn new(
        case_id: &str,
        alert_type: AlertType,
        priority: AlertPriority,
        message: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let dedup_key = Self::dedup_key_for(case_id, alert_type);
        let id = format!(
            "alert-{}",
            short_hash(&[case_id, alert_type.as_str(), &created_at.to_rfc3339()])
        );
        Self {
            id,
            case_id: case_id.to_string(),
            alert_type,
            priority,
            message: message.into(),
            created_at,
            dedup_key,
        }
    }
}

// Messages carry case ids and metrics only; customer text never appears in
// an alert.

pub fn violation_message(case_id: &str, v: &RuleViolation) -> String {
    match v.rule_type {
        RuleType::CommunicationGap => format!(
            "Case {case_id}: no outbound communication to the customer in {:.1} days",
            v.metric_value
        ),
        RuleType::NotesStaleness => format!(
            "Case {case_id}: case notes have not been updated in {:.1} days",
            v.metric_value
        ),
        RuleType::EmailToNotesGap => format!(
            "Case {case_id}: an outbound communication has waited {:.1} hours without a follow-up note",
            v.metric_value
        ),
    }
}

pub fn sentiment_message(case_id: &str, s: &SentimentResult) -> String {
    format!(
        "Case {case_id}: customer sentiment is negative (score {:.2}, confidence {:.2})",
        s.score, s.confidence
    )
}
