//! # PII scrubbing
//!
//! Every piece of case text leaving the process boundary goes through this
//! module first. Pass 1 is a fixed table of compiled patterns applied in one
//! sweep over the original text; pass 2 is an optional contextual detector
//! behind an async seam. The scrubber is total: it always returns a string,
//! and a broken detector degrades to the pass-1 output.
//!
//! Detector order matters only for ties at the same start offset. The
//! specific digit patterns (card, SSN) come before the permissive phone
//! pattern so a card number is never half-claimed as a phone number.

use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

struct Detector {
    placeholder: &'static str,
    re: Regex,
}

static DETECTORS: Lazy<Vec<Detector>> = Lazy::new(|| {
    vec![
        Detector {
            placeholder: "[EMAIL_REDACTED]",
            re: Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}")
                .expect("email regex"),
        },
        Detector {
            placeholder: "[CARD_REDACTED]",
            re: Regex::new(r"\b(?:\d{4}[ -]?){3}\d{4}\b").expect("card regex"),
        },
        Detector {
            placeholder: "[SSN_REDACTED]",
            re: Regex::new(r"\b\d{3}-\d{2}-\d{4}\b").expect("ssn regex"),
        },
        Detector {
            placeholder: "[PHONE_REDACTED]",
            re: Regex::new(r"(?:\+?1[ .-]?)?\(?\d{3}\)?[ .-]?\d{3}[ .-]?\d{4}\b")
                .expect("phone regex"),
        },
        Detector {
            placeholder: "[IP_REDACTED]",
            re: Regex::new(r"\b(?:\d{1,3}\.){3}\d{1,3}\b").expect("ipv4 regex"),
        },
    ]
});

/// Pattern pass: collect matches from every detector against the original
/// text, keep a non-overlapping set (earliest start wins, ties go to the
/// earlier detector), and rebuild the string once. Placeholders are never
/// re-scanned.
pub fn scrub_patterns(text: &str) -> String {
    let mut matches: Vec<(usize, usize, usize)> = Vec::new();
    for (idx, det) in DETECTORS.iter().enumerate() {
        for m in det.re.find_iter(text) {
            matches.push((m.start(), m.end(), idx));
        }
    }
    if matches.is_empty() {
        return text.to_string();
    }
    matches.sort_by(|a, b| (a.0, a.2).cmp(&(b.0, b.2)));

    let mut out = String::with_capacity(text.len());
    let mut cursor = 0usize;
    for (start, end, idx) in matches {
        if start < cursor {
            // Overlaps a span already claimed by an earlier match.
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(DETECTORS[idx].placeholder);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Contextual second pass, e.g. an NER service that catches names and
/// addresses the patterns cannot. Receives text that already went through
/// the pattern pass.
#[async_trait::async_trait]
pub trait ContextDetector: Send + Sync {
    async fn redact(&self, text: &str) -> anyhow::Result<String>;
    fn name(&self) -> &'static str;
}

/// Two-pass scrubber. `scrub` never fails; a failing contextual detector
/// leaves the pattern-pass output in place.
#[derive(Clone, Default)]
pub struct Scrubber {
    detector: Option<Arc<dyn ContextDetector>>,
}

impl Scrubber {
    pub fn pattern_only() -> Self {
        Self { detector: None }
    }

    pub fn with_detector(detector: Arc<dyn ContextDetector>) -> Self {
        Self {
            detector: Some(detector),
        }
    }

    pub async fn scrub(&self, text: &str) -> String {
        let base = scrub_patterns(text);
        let Some(det) = self.detector.as_ref() else {
            return base;
        };
        match det.redact(&base).await {
            Ok(redacted) => redacted,
            Err(err) => {
                debug!(detector = det.name(), error = %err, "contextual pass failed; keeping pattern output");
                base
            }
        }
    }
}
