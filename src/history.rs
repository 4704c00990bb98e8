//! # Sentiment history
//!
//! Per-case record of prior analyzer results. The analyzer consults it for
//! the previous score (trend derivation) and pushes the fresh result after
//! every successful classification. Retention is bounded per case by count
//! and, optionally, by age; durable persistence across restarts belongs to
//! the host.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use crate::config::AnalyzerConfig;
use crate::sentiment::SentimentResult;

#[derive(Debug, Clone)]
pub struct StoredResult {
    pub at: DateTime<Utc>,
    pub result: SentimentResult,
}

#[derive(Debug)]
pub struct SentimentHistory {
    inner: Mutex<HashMap<String, VecDeque<StoredResult>>>,
    keep_per_case: usize,
    max_age: Option<Duration>,
}

impl SentimentHistory {
    pub fn new(keep_per_case: usize) -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
            keep_per_case: keep_per_case.max(1),
            max_age: None,
        }
    }

    pub fn with_max_age_days(mut self, days: f64) -> Self {
        self.max_age = Some(Duration::milliseconds((days * 86_400_000.0) as i64));
        self
    }

    pub fn from_config(cfg: &AnalyzerConfig) -> Self {
        let mut h = Self::new(cfg.history_keep);
        if let Some(days) = cfg.history_max_age_days {
            h = h.with_max_age_days(days);
        }
        h
    }

    /// Append a result for a case, pruning anything past the retention
    /// bounds. Newest entries live at the back.
    pub fn push(&self, case_id: &str, result: SentimentResult, at: DateTime<Utc>) {
        let mut guard = self.inner.lock().expect("history mutex poisoned");
        let ring = guard.entry(case_id.to_string()).or_default();
        if let Some(max_age) = self.max_age {
            let horizon = at - max_age;
            while ring.front().is_some_and(|s| s.at < horizon) {
                ring.pop_front();
            }
        }
        ring.push_back(StoredResult { at, result });
        while ring.len() > self.keep_per_case {
            ring.pop_front();
        }
    }

    /// Score of the most recent stored result for a case, if any.
    pub fn latest_score(&self, case_id: &str) -> Option<f32> {
        self.inner
            .lock()
            .expect("history mutex poisoned")
            .get(case_id)
            .and_then(|ring| ring.back())
            .map(|s| s.result.score)
    }

    pub fn latest(&self, case_id: &str) -> Option<StoredResult> {
        self.inner
            .lock()
            .expect("history mutex poisoned")
            .get(case_id)
            .and_then(|ring| ring.back())
            .cloned()
    }

    /// Number of retained results for one case.
    pub fn len_for(&self, case_id: &str) -> usize {
        self.inner
            .lock()
            .expect("history mutex poisoned")
            .get(case_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Snapshot of a case's retained results, oldest first.
    pub fn snapshot(&self, case_id: &str) -> Vec<StoredResult> {
        self.inner
            .lock()
            .expect("history mutex poisoned")
            .get(case_id)
            .map(|ring| ring.iter().cloned().collect())
            .unwrap_or_default()
    }
}
