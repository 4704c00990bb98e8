//! Case source and alert sink seams. Production deployments put a CRM
//! client behind `CaseStore` and a ticketing or paging system behind
//! `AlertSink`; the in-memory pair here backs tests and the demo binary.

use async_trait::async_trait;
use std::sync::Mutex;

use crate::alert::Alert;
use crate::case::{Case, CaseStatus};

#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Cases eligible for a scan pass. Implementations filter to
    /// active status so closed work is never re-evaluated.
    async fn active_cases(&self) -> anyhow::Result<Vec<Case>>;

    async fn case(&self, id: &str) -> anyhow::Result<Option<Case>>;
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    /// Open alerts for one case; the dedup pass matches against these.
    async fn open_alerts(&self, case_id: &str) -> anyhow::Result<Vec<Alert>>;

    async fn record(&self, alert: Alert) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct InMemoryCaseStore {
    cases: Mutex<Vec<Case>>,
}

impl InMemoryCaseStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(cases: Vec<Case>) -> Self {
        Self {
            cases: Mutex::new(cases),
        }
    }

    /// Insert or replace by case id.
    pub fn upsert(&self, case: Case) {
        let mut cases = self.cases.lock().expect("case store mutex poisoned");
        if let Some(slot) = cases.iter_mut().find(|c| c.id == case.id) {
            *slot = case;
        } else {
            cases.push(case);
        }
    }
}

#[async_trait]
impl CaseStore for InMemoryCaseStore {
    async fn active_cases(&self) -> anyhow::Result<Vec<Case>> {
        let cases = self.cases.lock().expect("case store mutex poisoned");
        Ok(cases
            .iter()
            .filter(|c| c.status == CaseStatus::Active)
            .cloned()
            .collect())
    }

    async fn case(&self, id: &str) -> anyhow::Result<Option<Case>> {
        let cases = self.cases.lock().expect("case store mutex poisoned");
        Ok(cases.iter().find(|c| c.id == id).cloned())
    }
}

/// An alert plus its lifecycle bit. Alerts stay open until an operator
/// resolves them; resolution is what re-arms the dedup key.
#[derive(Debug, Clone)]
pub struct StoredAlert {
    pub alert: Alert,
    pub open: bool,
}

#[derive(Default)]
pub struct InMemoryAlertSink {
    alerts: Mutex<Vec<StoredAlert>>,
}

impl InMemoryAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark every open alert with this dedup key resolved. Returns how
    /// many were closed.
    pub fn resolve(&self, dedup_key: &str) -> usize {
        let mut alerts = self.alerts.lock().expect("alert sink mutex poisoned");
        let mut closed = 0;
        for stored in alerts.iter_mut() {
            if stored.open && stored.alert.dedup_key == dedup_key {
                stored.open = false;
                closed += 1;
            }
        }
        closed
    }

    pub fn all(&self) -> Vec<StoredAlert> {
        self.alerts
            .lock()
            .expect("alert sink mutex poisoned")
            .clone()
    }

    pub fn open_count(&self) -> usize {
        self.alerts
            .lock()
            .expect("alert sink mutex poisoned")
            .iter()
            .filter(|s| s.open)
            .count()
    }
}

#[async_trait]
impl AlertSink for InMemoryAlertSink {
    async fn open_alerts(&self, case_id: &str) -> anyhow::Result<Vec<Alert>> {
        let alerts = self.alerts.lock().expect("alert sink mutex poisoned");
        Ok(alerts
            .iter()
            .filter(|s| s.open && s.alert.case_id == case_id)
            .map(|s| s.alert.clone())
            .collect())
    }

    async fn record(&self, alert: Alert) -> anyhow::Result<()> {
        let mut alerts = self.alerts.lock().expect("alert sink mutex poisoned");
        alerts.push(StoredAlert { alert, open: true });
        Ok(())
    }
}
