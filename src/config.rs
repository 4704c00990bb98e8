//! Pipeline configuration with hot-reload from config/pipeline.toml.
//!
//! Every key is optional; an absent file, an absent table, or an absent key
//! falls back to the built-in defaults, so the library is usable with zero
//! setup. On each `current()` call the hot wrapper checks the file's
//! modified time and reloads if it changed, which lets a running scanner
//! pick up threshold edits between scans.

use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, RwLock},
    time::SystemTime,
};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::warn;

pub const ENV_CONFIG_PATH: &str = "SENTINEL_CONFIG_PATH";
pub const ENV_SCAN_CONCURRENCY: &str = "SENTINEL_SCAN_CONCURRENCY";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

// --- rule thresholds ---

/// No outbound communication to the customer for too long.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct CommunicationGapConfig {
    pub warning_days: f64,
    pub breach_days: f64,
}

impl Default for CommunicationGapConfig {
    fn default() -> Self {
        Self {
            warning_days: 2.0,
            breach_days: 3.0,
        }
    }
}

/// Internal notes not updated for too long.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct NotesStalenessConfig {
    pub warning_days: f64,
    pub breach_days: f64,
}

impl Default for NotesStalenessConfig {
    fn default() -> Self {
        Self {
            warning_days: 5.0,
            breach_days: 7.0,
        }
    }
}

/// Outbound communication without a follow-up note. Breach-only rule; the
/// lookback bounds how far back outbound entries are considered.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct EmailToNotesConfig {
    pub breach_hours: f64,
    pub lookback_days: f64,
}

impl Default for EmailToNotesConfig {
    fn default() -> Self {
        Self {
            breach_hours: 5.0,
            lookback_days: 14.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    pub communication_gap: CommunicationGapConfig,
    pub notes_staleness: NotesStalenessConfig,
    pub email_to_notes: EmailToNotesConfig,
}

// --- analyzer tuning ---

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Character budget for classifier input; oldest inbound entries are
    /// dropped first when a case exceeds it.
    pub text_budget_chars: usize,
    pub max_attempts: u32,
    pub retry_base_ms: u64,
    pub request_timeout_secs: u64,
    pub trend_epsilon: f32,
    /// Prior results retained per case for trend derivation.
    pub history_keep: usize,
    /// Optional age cap on retained results, in days.
    pub history_max_age_days: Option<f64>,
    pub max_key_phrases: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            text_budget_chars: 8000,
            max_attempts: 3,
            retry_base_ms: 300,
            request_timeout_secs: 10,
            trend_epsilon: 0.05,
            history_keep: 8,
            history_max_age_days: None,
            max_key_phrases: 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// Concurrent case evaluations; sized to the classifier rate limit.
    pub max_concurrency: usize,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self { max_concurrency: 4 }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub rules: RulesConfig,
    pub analyzer: AnalyzerConfig,
    pub scan: ScanConfig,
}

impl PipelineConfig {
    /// Strict load for tests and tools: missing file or bad TOML is an error.
    pub fn from_path(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let cfg: PipelineConfig = toml::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(cfg.sanitized())
    }

    /// Tolerant load: resolves the path from `SENTINEL_CONFIG_PATH` or the
    /// default location, falls back to defaults when the file is absent or
    /// unparseable, then applies env overrides.
    pub fn load_or_default() -> Self {
        let path = env::var(ENV_CONFIG_PATH)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));
        let mut cfg = match Self::from_path(&path) {
            Ok(cfg) => cfg,
            Err(err) => {
                if path.exists() {
                    warn!(path = %path.display(), error = %err, "config unreadable; using defaults");
                }
                Self::default()
            }
        };
        cfg.apply_env_overrides();
        cfg
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(raw) = env::var(ENV_SCAN_CONCURRENCY) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n >= 1 => self.scan.max_concurrency = n,
                _ => warn!(value = %raw, "ignoring invalid {ENV_SCAN_CONCURRENCY}"),
            }
        }
    }

    /// Replace nonsense values with defaults so a bad config file cannot
    /// disable rule evaluation.
    pub fn sanitized(mut self) -> Self {
        let d = CommunicationGapConfig::default();
        let c = &mut self.rules.communication_gap;
        if c.warning_days <= 0.0 || c.breach_days <= 0.0 || c.warning_days >= c.breach_days {
            warn!(
                warning_days = c.warning_days,
                breach_days = c.breach_days,
                "invalid communication_gap thresholds; using defaults"
            );
            *c = d;
        }

        let d = NotesStalenessConfig::default();
        let n = &mut self.rules.notes_staleness;
        if n.warning_days <= 0.0 || n.breach_days <= 0.0 || n.warning_days >= n.breach_days {
            warn!(
                warning_days = n.warning_days,
                breach_days = n.breach_days,
                "invalid notes_staleness thresholds; using defaults"
            );
            *n = d;
        }

        let d = EmailToNotesConfig::default();
        let e = &mut self.rules.email_to_notes;
        if e.breach_hours <= 0.0 || e.lookback_days <= 0.0 {
            warn!(
                breach_hours = e.breach_hours,
                lookback_days = e.lookback_days,
                "invalid email_to_notes thresholds; using defaults"
            );
            *e = d;
        }

        let a = &mut self.analyzer;
        if a.max_attempts == 0 {
            a.max_attempts = 1;
        }
        if a.text_budget_chars == 0 {
            a.text_budget_chars = AnalyzerConfig::default().text_budget_chars;
        }
        if !a.trend_epsilon.is_finite() || a.trend_epsilon < 0.0 {
            a.trend_epsilon = AnalyzerConfig::default().trend_epsilon;
        }
        if a.history_keep == 0 {
            a.history_keep = 1;
        }

        if self.scan.max_concurrency == 0 {
            self.scan.max_concurrency = 1;
        }
        self
    }
}

// --- hot reload ---

/// Hot-reload wrapper: reloads when the config file mtime changes. Keeps
/// the last good config when the file disappears or turns unparseable.
#[derive(Debug)]
pub struct HotReloadConfig {
    path: PathBuf,
    inner: RwLock<State>,
}

#[derive(Debug)]
struct State {
    config: Arc<PipelineConfig>,
    last_modified: Option<SystemTime>,
}

impl HotReloadConfig {
    /// Create with a path (defaults to "config/pipeline.toml" if `None`).
    /// The first load happens lazily on `current()`.
    pub fn new(path: Option<&Path>) -> Self {
        let path = path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
        Self {
            path,
            inner: RwLock::new(State {
                config: Arc::new(PipelineConfig::default()),
                last_modified: None,
            }),
        }
    }

    /// Latest config, reloading if the file changed.
    pub fn current(&self) -> Arc<PipelineConfig> {
        let needs_reload = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(mtime) => {
                let guard = self.inner.read().unwrap();
                guard.last_modified != Some(mtime)
            }
            // File absent: keep whatever we have.
            Err(_) => false,
        };

        if !needs_reload {
            return self.inner.read().unwrap().config.clone();
        }

        let mut guard = self.inner.write().unwrap();
        // Double-check in case of races.
        if let Ok(meta) = fs::metadata(&self.path) {
            if let Ok(mtime) = meta.modified() {
                if guard.last_modified != Some(mtime) {
                    match PipelineConfig::from_path(&self.path) {
                        Ok(cfg) => {
                            guard.config = Arc::new(cfg);
                            guard.last_modified = Some(mtime);
                        }
                        Err(err) => {
                            warn!(path = %self.path.display(), error = %err, "config reload failed; keeping previous");
                            guard.last_modified = Some(mtime);
                        }
                    }
                }
            }
        }
        guard.config.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_rule_table() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.rules.communication_gap.warning_days, 2.0);
        assert_eq!(cfg.rules.communication_gap.breach_days, 3.0);
        assert_eq!(cfg.rules.notes_staleness.warning_days, 5.0);
        assert_eq!(cfg.rules.notes_staleness.breach_days, 7.0);
        assert_eq!(cfg.rules.email_to_notes.breach_hours, 5.0);
        assert_eq!(cfg.rules.email_to_notes.lookback_days, 14.0);
        assert_eq!(cfg.scan.max_concurrency, 4);
        assert_eq!(cfg.analyzer.max_attempts, 3);
    }

    #[test]
    fn partial_toml_overrides_only_named_keys() {
        let toml = r#"
            [rules.communication_gap]
            warning_days = 1.0
            breach_days = 2.0

            [scan]
            max_concurrency = 9
        "#;
        let cfg: PipelineConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.rules.communication_gap.warning_days, 1.0);
        assert_eq!(cfg.rules.communication_gap.breach_days, 2.0);
        // Untouched tables keep defaults.
        assert_eq!(cfg.rules.notes_staleness.breach_days, 7.0);
        assert_eq!(cfg.scan.max_concurrency, 9);
    }

    #[test]
    fn sanitize_rejects_inverted_thresholds() {
        let toml = r#"
            [rules.communication_gap]
            warning_days = 5.0
            breach_days = 2.0
        "#;
        let cfg: PipelineConfig = toml::from_str(toml).unwrap();
        let cfg = cfg.sanitized();
        assert_eq!(cfg.rules.communication_gap, CommunicationGapConfig::default());
    }

    #[test]
    fn sanitize_floors_zero_knobs() {
        let toml = r#"
            [analyzer]
            max_attempts = 0
            text_budget_chars = 0

            [scan]
            max_concurrency = 0
        "#;
        let cfg: PipelineConfig = toml::from_str::<PipelineConfig>(toml).unwrap().sanitized();
        assert_eq!(cfg.analyzer.max_attempts, 1);
        assert_eq!(cfg.analyzer.text_budget_chars, 8000);
        assert_eq!(cfg.scan.max_concurrency, 1);
    }

    #[test]
    #[serial_test::serial]
    fn env_override_sets_concurrency() {
        std::env::set_var(ENV_SCAN_CONCURRENCY, "7");
        let mut cfg = PipelineConfig::default();
        cfg.apply_env_overrides();
        std::env::remove_var(ENV_SCAN_CONCURRENCY);
        assert_eq!(cfg.scan.max_concurrency, 7);
    }

    #[test]
    #[serial_test::serial]
    fn env_override_ignores_garbage() {
        std::env::set_var(ENV_SCAN_CONCURRENCY, "lots");
        let mut cfg = PipelineConfig::default();
        cfg.apply_env_overrides();
        std::env::remove_var(ENV_SCAN_CONCURRENCY);
        assert_eq!(cfg.scan.max_concurrency, 4);
    }

    #[test]
    fn hot_reload_picks_up_edits() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, "[scan]\nmax_concurrency = 2\n").unwrap();
            f.sync_all().unwrap();
        }

        let hot = HotReloadConfig::new(Some(&path));
        assert_eq!(hot.current().scan.max_concurrency, 2);

        // Ensure a different mtime even on coarse-grained filesystems.
        std::thread::sleep(std::time::Duration::from_millis(1100));

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, "[scan]\nmax_concurrency = 6\n").unwrap();
            f.sync_all().unwrap();
        }

        assert_eq!(hot.current().scan.max_concurrency, 6);
    }

    #[test]
    fn hot_reload_keeps_last_good_on_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, "[scan]\nmax_concurrency = 3\n").unwrap();
            f.sync_all().unwrap();
        }

        let hot = HotReloadConfig::new(Some(&path));
        assert_eq!(hot.current().scan.max_concurrency, 3);

        std::thread::sleep(std::time::Duration::from_millis(1100));

        {
            let mut f = fs::File::create(&path).unwrap();
            write!(f, "[[[not toml").unwrap();
            f.sync_all().unwrap();
        }

        assert_eq!(hot.current().scan.max_concurrency, 3);
    }
}
