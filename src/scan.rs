//! # Fleet scan
//!
//! One scan pass pulls every active case from the store and evaluates
//! them concurrently under a semaphore bound. A single `now` is taken at
//! the start of the pass so every case in it is judged against the same
//! instant. Per-case failures are counted, logged and skipped; the pass
//! itself only fails when the case store does.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::case::Case;
use crate::notify::NotifierMux;
use crate::pipeline::{CaseEvaluator, Clock, EvalStage, SystemClock};
use crate::store::{AlertSink, CaseStore};

static METRICS_DESCRIBED: OnceCell<()> = OnceCell::new();

/// Register metric descriptions once per process. Emission works without
/// this; it only improves what an exporter renders.
pub fn ensure_metrics_described() {
    METRICS_DESCRIBED.get_or_init(|| {
        describe_counter!(
            "scan_cases_total",
            "Cases that reached a terminal evaluation state, any outcome."
        );
        describe_counter!(
            "scan_cases_partial_total",
            "Cases evaluated with rules only because sentiment was unavailable."
        );
        describe_counter!("scan_cases_failed_total", "Cases that failed evaluation.");
        describe_counter!("scan_alerts_created_total", "Alerts recorded in the sink.");
        describe_counter!(
            "scan_alerts_suppressed_total",
            "Alert candidates dropped because the same concern was already open."
        );
        describe_counter!(
            "classifier_failures_total",
            "Individual text classifier attempts that failed."
        );
        describe_gauge!(
            "scan_last_run_ts",
            "Unix timestamp of the most recent completed scan pass."
        );
        describe_histogram!("case_eval_ms", "Wall time of one case evaluation.");
    });
}

/// Cooperative cancellation handle. Cancelling stops new dispatch;
/// cases already in flight run to completion.
#[derive(Clone, Default)]
pub struct ShutdownFlag(Arc<AtomicBool>);

impl ShutdownFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub started_at: DateTime<Utc>,
    pub cases_seen: usize,
    pub cases_done: usize,
    pub cases_partial: usize,
    pub cases_failed: usize,
    pub alerts_created: usize,
    pub skipped_by_shutdown: usize,
    pub elapsed_ms: u64,
}

enum CaseOutcome {
    Done { alerts: usize },
    Partial { alerts: usize },
    Failed,
}

pub struct Scanner {
    evaluator: Arc<CaseEvaluator>,
    store: Arc<dyn CaseStore>,
    sink: Arc<dyn AlertSink>,
    clock: Arc<dyn Clock>,
    notifiers: Arc<NotifierMux>,
    max_concurrency: usize,
    shutdown: ShutdownFlag,
}

impl Scanner {
    pub fn new(
        evaluator: Arc<CaseEvaluator>,
        store: Arc<dyn CaseStore>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            evaluator,
            store,
            sink,
            clock: Arc::new(SystemClock),
            notifiers: Arc::new(NotifierMux::new()),
            max_concurrency: 4,
            shutdown: ShutdownFlag::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifiers(mut self, notifiers: Arc<NotifierMux>) -> Self {
        self.notifiers = notifiers;
        self
    }

    pub fn with_max_concurrency(mut self, max: usize) -> Self {
        self.max_concurrency = max.max(1);
        self
    }

    /// Handle for cancelling this scanner from another task or a signal
    /// handler.
    pub fn shutdown_flag(&self) -> ShutdownFlag {
        self.shutdown.clone()
    }

    pub async fn scan_once(&self) -> anyhow::Result<ScanSummary> {
        ensure_metrics_described();
        let started = Instant::now();
        let now = self.clock.now();
        let cases = self.store.active_cases().await.context("loading active cases")?;
        let cases_seen = cases.len();

        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut join_set: JoinSet<CaseOutcome> = JoinSet::new();
        let mut skipped_by_shutdown = 0usize;

        for case in cases {
            if self.shutdown.is_cancelled() {
                skipped_by_shutdown += 1;
                continue;
            }
            let permit = semaphore.clone().acquire_owned().await?;
            let evaluator = Arc::clone(&self.evaluator);
            let sink = Arc::clone(&self.sink);
            let notifiers = Arc::clone(&self.notifiers);
            join_set.spawn(async move {
                let _permit = permit;
                run_case(evaluator, sink, notifiers, case, now).await
            });
        }

        let mut cases_done = 0usize;
        let mut cases_partial = 0usize;
        let mut cases_failed = 0usize;
        let mut alerts_created = 0usize;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(CaseOutcome::Done { alerts }) => {
                    cases_done += 1;
                    alerts_created += alerts;
                    counter!("scan_cases_total").increment(1);
                }
                Ok(CaseOutcome::Partial { alerts }) => {
                    cases_partial += 1;
                    alerts_created += alerts;
                    counter!("scan_cases_total").increment(1);
                    counter!("scan_cases_partial_total").increment(1);
                }
                Ok(CaseOutcome::Failed) => {
                    cases_failed += 1;
                    counter!("scan_cases_total").increment(1);
                    counter!("scan_cases_failed_total").increment(1);
                }
                Err(err) => {
                    cases_failed += 1;
                    counter!("scan_cases_total").increment(1);
                    counter!("scan_cases_failed_total").increment(1);
                    error!(error = %err, "case evaluation task aborted");
                }
            }
        }

        gauge!("scan_last_run_ts").set(now.timestamp() as f64);
        let summary = ScanSummary {
            started_at: now,
            cases_seen,
            cases_done,
            cases_partial,
            cases_failed,
            alerts_created,
            skipped_by_shutdown,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            target: "scan",
            seen = summary.cases_seen,
            done = summary.cases_done,
            partial = summary.cases_partial,
            failed = summary.cases_failed,
            alerts = summary.alerts_created,
            skipped = summary.skipped_by_shutdown,
            elapsed_ms = summary.elapsed_ms,
            "scan pass complete"
        );
        Ok(summary)
    }
}

async fn run_case(
    evaluator: Arc<CaseEvaluator>,
    sink: Arc<dyn AlertSink>,
    notifiers: Arc<NotifierMux>,
    case: Case,
    now: DateTime<Utc>,
) -> CaseOutcome {
    let case_started = Instant::now();
    let open = match sink.open_alerts(&case.id).await {
        Ok(open) => open,
        Err(err) => {
            error!(case = %case.id, error = %err, "failed to load open alerts");
            return CaseOutcome::Failed;
        }
    };

    let result = match evaluator.evaluate_case(&case, now, &open).await {
        Ok(result) => result,
        Err(err) => {
            error!(case = %case.id, error = %err, "case evaluation failed");
            return CaseOutcome::Failed;
        }
    };
    histogram!("case_eval_ms").record(case_started.elapsed().as_millis() as f64);

    let mut recorded = 0usize;
    for alert in &result.new_alerts {
        match sink.record(alert.clone()).await {
            Ok(()) => {
                recorded += 1;
                counter!("scan_alerts_created_total").increment(1);
                info!(
                    case = %alert.case_id,
                    alert = %alert.id,
                    kind = alert.alert_type.as_str(),
                    priority = alert.priority.as_str(),
                    "alert raised"
                );
                notifiers.notify_all(alert).await;
            }
            Err(err) => {
                error!(case = %alert.case_id, alert = %alert.id, error = %err, "failed to record alert");
            }
        }
    }

    match result.state {
        EvalStage::Partial => CaseOutcome::Partial { alerts: recorded },
        _ => CaseOutcome::Done { alerts: recorded },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::case::{CaseSeverity, CaseStatus, EntryType, TimelineEntry};
    use crate::classifier::{ClassifierVerdict, MockClassifier};
    use crate::history::SentimentHistory;
    use crate::pipeline::FixedClock;
    use crate::rules::RuleBook;
    use crate::scrub::Scrubber;
    use crate::sentiment::SentimentAnalyzer;
    use crate::store::{InMemoryAlertSink, InMemoryCaseStore};
    use chrono::TimeZone;

    fn mk_scanner(
        store: Arc<InMemoryCaseStore>,
        sink: Arc<InMemoryAlertSink>,
        score: f32,
        now: DateTime<Utc>,
    ) -> Scanner {
        let analyzer = SentimentAnalyzer::new(
            Arc::new(MockClassifier::fixed(ClassifierVerdict::scored(score, 0.9))),
            Scrubber::pattern_only(),
            Arc::new(SentimentHistory::new(4)),
        );
        let evaluator = Arc::new(CaseEvaluator::new(analyzer, RuleBook::default()));
        Scanner::new(evaluator, store, sink).with_clock(Arc::new(FixedClock(now)))
    }

    fn stale_case(id: &str, now: DateTime<Utc>) -> Case {
        Case {
            id: id.into(),
            title: "t".into(),
            description: "waiting on fix".into(),
            severity: CaseSeverity::Medium,
            status: CaseStatus::Active,
            created_at: now - chrono::Duration::days(30),
            timeline: vec![
                TimelineEntry {
                    id: "o1".into(),
                    entry_type: EntryType::OutboundCommunication,
                    content: "update".into(),
                    created_at: Some(now - chrono::Duration::days(10)),
                    author: "agent".into(),
                    direction: Some(crate::case::Direction::Outbound),
                },
                TimelineEntry {
                    id: "n1".into(),
                    entry_type: EntryType::InternalNote,
                    content: "note".into(),
                    created_at: Some(now - chrono::Duration::days(10)),
                    author: "agent".into(),
                    direction: None,
                },
            ],
        }
    }

    fn base_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 15, 12, 0, 0).unwrap()
    }

    #[test]
    fn shutdown_flag_is_shared() {
        let flag = ShutdownFlag::new();
        let clone = flag.clone();
        assert!(!clone.is_cancelled());
        flag.cancel();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn empty_store_yields_an_empty_summary() {
        let store = Arc::new(InMemoryCaseStore::new());
        let sink = Arc::new(InMemoryAlertSink::new());
        let scanner = mk_scanner(store, sink, 0.8, base_now());
        let summary = scanner.scan_once().await.unwrap();
        assert_eq!(summary.cases_seen, 0);
        assert_eq!(summary.cases_done, 0);
        assert_eq!(summary.alerts_created, 0);
    }

    #[tokio::test]
    async fn second_pass_creates_nothing_new() {
        let now = base_now();
        let store = Arc::new(InMemoryCaseStore::seed(vec![stale_case("case-1", now)]));
        let sink = Arc::new(InMemoryAlertSink::new());
        let scanner = mk_scanner(store, Arc::clone(&sink), 0.8, now);

        let first = scanner.scan_once().await.unwrap();
        assert_eq!(first.cases_done, 1);
        // 10 days stale on both rules: two breach alerts.
        assert_eq!(first.alerts_created, 2);
        assert_eq!(sink.open_count(), 2);

        let second = scanner.scan_once().await.unwrap();
        assert_eq!(second.alerts_created, 0);
        assert_eq!(sink.open_count(), 2);
    }

    #[tokio::test]
    async fn cancelled_scanner_dispatches_no_cases() {
        let now = base_now();
        let store = Arc::new(InMemoryCaseStore::seed(vec![
            stale_case("case-1", now),
            stale_case("case-2", now),
        ]));
        let sink = Arc::new(InMemoryAlertSink::new());
        let scanner = mk_scanner(store, Arc::clone(&sink), 0.8, now);
        scanner.shutdown_flag().cancel();

        let summary = scanner.scan_once().await.unwrap();
        assert_eq!(summary.skipped_by_shutdown, 2);
        assert_eq!(summary.cases_done, 0);
        assert_eq!(sink.open_count(), 0);
    }
}
