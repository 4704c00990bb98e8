// src/case.rs: support-case data model shared by every pipeline stage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a case. Only `Active` cases are scanned for alerts;
/// resolved and cancelled cases may still be scored for sentiment history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Active,
    Resolved,
    Cancelled,
}

/// Business severity of a case, ordered so `max` picks the stricter one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl CaseSeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    OutboundCommunication,
    InboundCommunication,
    InternalNote,
}

/// Message direction; meaningful only for communication entries, absent on
/// internal notes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// One timeline event on a case. `created_at` is optional because upstream
/// stores can hold entries with a null timestamp; such entries carry content
/// but are invisible to time-based rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub id: String,
    pub entry_type: EntryType,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    pub author: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub direction: Option<Direction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub title: String,
    pub description: String,
    pub severity: CaseSeverity,
    pub status: CaseStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub timeline: Vec<TimelineEntry>,
}

impl Case {
    pub fn is_active(&self) -> bool {
        self.status == CaseStatus::Active
    }

    /// Timeline entries of one kind, in stored order.
    pub fn entries_of(&self, kind: EntryType) -> impl Iterator<Item = &TimelineEntry> {
        self.timeline.iter().filter(move |e| e.entry_type == kind)
    }

    /// Most recent timestamp among entries of one kind; entries without a
    /// timestamp do not participate.
    pub fn last_timestamp_of(&self, kind: EntryType) -> Option<DateTime<Utc>> {
        self.entries_of(kind).filter_map(|e| e.created_at).max()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_orders_low_to_critical() {
        assert!(CaseSeverity::Low < CaseSeverity::Medium);
        assert!(CaseSeverity::Medium < CaseSeverity::High);
        assert!(CaseSeverity::High < CaseSeverity::Critical);
        assert_eq!(
            CaseSeverity::High.max(CaseSeverity::Critical),
            CaseSeverity::Critical
        );
    }

    #[test]
    fn enums_serialize_snake_case() {
        assert_eq!(
            serde_json::to_string(&EntryType::OutboundCommunication).unwrap(),
            "\"outbound_communication\""
        );
        assert_eq!(
            serde_json::to_string(&CaseStatus::Active).unwrap(),
            "\"active\""
        );
        assert_eq!(
            serde_json::to_string(&CaseSeverity::Critical).unwrap(),
            "\"critical\""
        );
    }

    #[test]
    fn last_timestamp_skips_null_entries() {
        let t0 = Utc::now();
        let case = Case {
            id: "c-1".into(),
            title: "t".into(),
            description: String::new(),
            severity: CaseSeverity::Low,
            status: CaseStatus::Active,
            created_at: t0,
            timeline: vec![
                TimelineEntry {
                    id: "e-1".into(),
                    entry_type: EntryType::InternalNote,
                    content: "no ts".into(),
                    created_at: None,
                    author: "agent".into(),
                    direction: None,
                },
                TimelineEntry {
                    id: "e-2".into(),
                    entry_type: EntryType::InternalNote,
                    content: "with ts".into(),
                    created_at: Some(t0),
                    author: "agent".into(),
                    direction: None,
                },
            ],
        };
        assert_eq!(case.last_timestamp_of(EntryType::InternalNote), Some(t0));
        assert_eq!(case.last_timestamp_of(EntryType::InboundCommunication), None);
    }
}
