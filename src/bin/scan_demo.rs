//! End-to-end walkthrough on seeded cases: two scan passes over a small
//! fleet, showing rule alerts, sentiment alerts and dedup on the second
//! pass. Uses a keyword classifier so it runs without an API key; set
//! `SENTINEL_WEBHOOK_URL` to see real deliveries.

use std::sync::Arc;

use chrono::{Duration, Utc};
use csat_sentinel::classifier::{ClassifierVerdict, TextClassifier};
use csat_sentinel::config::PipelineConfig;
use csat_sentinel::error::AnalysisError;
use csat_sentinel::{
    AlertSink, Case, CaseEvaluator, CaseSeverity, CaseStatus, Direction, EntryType,
    InMemoryAlertSink, InMemoryCaseStore, NotifierMux, RuleBook, Scanner, Scrubber,
    SentimentAnalyzer, SentimentHistory, TimelineEntry,
};

/// Offline stand-in for the hosted model: counts complaint and praise
/// keywords. Good enough to drive the pipeline end to end.
struct KeywordClassifier;

#[async_trait::async_trait]
impl TextClassifier for KeywordClassifier {
    async fn classify(&self, text: &str) -> Result<ClassifierVerdict, AnalysisError> {
        let lowered = text.to_lowercase();
        let negative = ["unacceptable", "escalate", "still broken", "frustrated"]
            .iter()
            .filter(|w| lowered.contains(*w))
            .count() as f32;
        let positive = ["thanks", "resolved", "great", "works now"]
            .iter()
            .filter(|w| lowered.contains(*w))
            .count() as f32;
        let score = (0.5 + 0.15 * (positive - negative)).clamp(0.0, 1.0);
        Ok(ClassifierVerdict::scored(score, 0.8))
    }

    fn name(&self) -> &'static str {
        "keyword-demo"
    }
}

fn entry(
    id: &str,
    kind: EntryType,
    content: &str,
    days_ago: i64,
    direction: Option<Direction>,
) -> TimelineEntry {
    TimelineEntry {
        id: id.into(),
        entry_type: kind,
        content: content.into(),
        created_at: Some(Utc::now() - Duration::days(days_ago)),
        author: "demo".into(),
        direction,
    }
}

fn seed_cases() -> Vec<Case> {
    let now = Utc::now();
    vec![
        // Stale on both time rules.
        Case {
            id: "case-001".into(),
            title: "Sync job fails nightly".into(),
            description: "Nightly sync aborts with a timeout.".into(),
            severity: CaseSeverity::High,
            status: CaseStatus::Active,
            created_at: now - Duration::days(30),
            timeline: vec![
                entry(
                    "e1",
                    EntryType::OutboundCommunication,
                    "We are looking into it.",
                    9,
                    Some(Direction::Outbound),
                ),
                entry("e2", EntryType::InternalNote, "Reproduced locally.", 9, None),
            ],
        },
        // Fresh but the customer is unhappy; mail address exercises the scrubber.
        Case {
            id: "case-002".into(),
            title: "Billing portal rejects card".into(),
            description: "Customer cannot pay an overdue invoice.".into(),
            severity: CaseSeverity::Critical,
            status: CaseStatus::Active,
            created_at: now - Duration::days(4),
            timeline: vec![
                entry(
                    "e1",
                    EntryType::InboundCommunication,
                    "This is unacceptable, I will escalate. Reach me at pat.doe@example.com.",
                    1,
                    Some(Direction::Inbound),
                ),
                entry(
                    "e2",
                    EntryType::OutboundCommunication,
                    "Apologies, we are on it.",
                    1,
                    Some(Direction::Outbound),
                ),
                entry("e3", EntryType::InternalNote, "Payment gateway bug.", 1, None),
            ],
        },
        // Healthy.
        Case {
            id: "case-003".into(),
            title: "How to export reports".into(),
            description: "Question about CSV export.".into(),
            severity: CaseSeverity::Low,
            status: CaseStatus::Active,
            created_at: now - Duration::days(2),
            timeline: vec![
                entry(
                    "e1",
                    EntryType::InboundCommunication,
                    "Thanks, that works now, great support.",
                    1,
                    Some(Direction::Inbound),
                ),
                entry(
                    "e2",
                    EntryType::OutboundCommunication,
                    "Guide attached.",
                    1,
                    Some(Direction::Outbound),
                ),
                entry("e3", EntryType::InternalNote, "Sent export guide.", 1, None),
            ],
        },
    ]
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt().with_target(false).init();

    let config = PipelineConfig::load_or_default();
    let analyzer = SentimentAnalyzer::from_config(
        Arc::new(KeywordClassifier),
        Scrubber::pattern_only(),
        Arc::new(SentimentHistory::from_config(&config.analyzer)),
        &config.analyzer,
    );

    let store = Arc::new(InMemoryCaseStore::seed(seed_cases()));
    let sink = Arc::new(InMemoryAlertSink::new());
    let evaluator = Arc::new(CaseEvaluator::new(
        analyzer,
        RuleBook::from_config(&config.rules),
    ));
    let scanner = Scanner::new(evaluator, store, Arc::clone(&sink) as Arc<dyn AlertSink>)
        .with_notifiers(Arc::new(NotifierMux::from_env()))
        .with_max_concurrency(config.scan.max_concurrency);

    let first = scanner.scan_once().await?;
    println!(
        "pass 1: {} case(s), {} alert(s) created",
        first.cases_seen, first.alerts_created
    );

    // Nothing changed, so the same concerns are still open and the
    // second pass raises nothing new.
    let second = scanner.scan_once().await?;
    println!(
        "pass 2: {} case(s), {} alert(s) created",
        second.cases_seen, second.alerts_created
    );

    println!("\nalert ledger:");
    for stored in sink.all() {
        println!(
            "  [{}] {} {} ({})",
            stored.alert.priority.as_str().to_uppercase(),
            stored.alert.id,
            stored.alert.message,
            if stored.open { "open" } else { "resolved" }
        );
    }

    println!(
        "\nscrubbed sample: {}",
        csat_sentinel::scrub_patterns("call 555-867-5309 or mail pat.doe@example.com")
    );
    Ok(())
}
