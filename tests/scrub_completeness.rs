// tests/scrub_completeness.rs
//
// Randomized completeness checks for the pattern pass: generated PII in
// surrounding prose must never survive scrubbing. Seeded for determinism.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use csat_sentinel::scrub_patterns;

const FILLER: &[&str] = &[
    "customer", "wrote", "back", "about", "the", "invoice", "and", "asked", "for", "an", "update",
    "on", "their", "open", "request",
];

fn pick<'a>(rng: &mut StdRng, pool: &[&'a str]) -> &'a str {
    pool[rng.random_range(0..pool.len())]
}

fn filler_sentence(rng: &mut StdRng) -> String {
    let words: Vec<&str> = (0..rng.random_range(3..8)).map(|_| pick(rng, FILLER)).collect();
    words.join(" ")
}

fn digits(rng: &mut StdRng, n: usize) -> String {
    (0..n).map(|_| char::from(b'0' + rng.random_range(0..10) as u8)).collect()
}

fn longest_digit_run(s: &str) -> usize {
    let mut best = 0;
    let mut run = 0;
    for c in s.chars() {
        if c.is_ascii_digit() {
            run += 1;
            best = best.max(run);
        } else {
            run = 0;
        }
    }
    best
}

fn random_email(rng: &mut StdRng) -> String {
    const LOCAL: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789._";
    const DOMAIN: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
    let local: String = (0..rng.random_range(3..10))
        .map(|_| char::from(LOCAL[rng.random_range(0..LOCAL.len())]))
        .collect();
    let domain: String = (0..rng.random_range(3..8))
        .map(|_| char::from(DOMAIN[rng.random_range(0..DOMAIN.len())]))
        .collect();
    let tld = pick(rng, &["com", "org", "net", "io", "dev"]);
    format!("{local}@{domain}.{tld}")
}

fn random_phone(rng: &mut StdRng) -> String {
    let a = digits(rng, 3);
    let b = digits(rng, 3);
    let c = digits(rng, 4);
    match rng.random_range(0..4) {
        0 => format!("{a}-{b}-{c}"),
        1 => format!("({a}) {b}-{c}"),
        2 => format!("+1 {a} {b} {c}"),
        _ => format!("{a}.{b}.{c}"),
    }
}

fn random_card(rng: &mut StdRng) -> String {
    let groups: Vec<String> = (0..4).map(|_| digits(rng, 4)).collect();
    let sep = pick(rng, &["", " ", "-"]);
    groups.join(sep)
}

fn random_ssn(rng: &mut StdRng) -> String {
    format!("{}-{}-{}", digits(rng, 3), digits(rng, 2), digits(rng, 4))
}

fn random_ip(rng: &mut StdRng) -> String {
    let octets: Vec<String> = (0..4).map(|_| rng.random_range(0u16..256).to_string()).collect();
    octets.join(".")
}

#[test]
fn generated_emails_never_survive() {
    let mut rng = StdRng::seed_from_u64(11);
    for _ in 0..50 {
        let email = random_email(&mut rng);
        let text = format!(
            "{} {} {}",
            filler_sentence(&mut rng),
            email,
            filler_sentence(&mut rng)
        );
        let out = scrub_patterns(&text);
        assert!(!out.contains('@'), "address leaked from {text:?}: {out:?}");
        assert!(out.contains("[EMAIL_REDACTED]"));
        assert!(!out.contains(&email));
    }
}

#[test]
fn generated_digit_pii_never_survives() {
    let mut rng = StdRng::seed_from_u64(12);
    for round in 0..50 {
        let (value, placeholder) = match round % 4 {
            0 => (random_phone(&mut rng), "[PHONE_REDACTED]"),
            1 => (random_card(&mut rng), "[CARD_REDACTED]"),
            2 => (random_ssn(&mut rng), "[SSN_REDACTED]"),
            _ => (random_ip(&mut rng), "[IP_REDACTED]"),
        };
        let text = format!(
            "{} {} {}",
            filler_sentence(&mut rng),
            value,
            filler_sentence(&mut rng)
        );
        let out = scrub_patterns(&text);
        assert!(
            out.contains(placeholder),
            "expected {placeholder} for {value:?}, got {out:?}"
        );
        assert!(!out.contains(&value), "raw value leaked: {out:?}");
        assert!(
            longest_digit_run(&out) < 4,
            "digit run survived scrubbing {value:?}: {out:?}"
        );
    }
}

#[test]
fn one_message_with_every_category_is_fully_scrubbed() {
    let text = "Reach me at pat.doe@example.com or 555-867-5309. Card 4111 1111 1111 1111, \
                SSN 078-05-1120, server 10.0.0.12.";
    let out = scrub_patterns(text);
    for placeholder in [
        "[EMAIL_REDACTED]",
        "[PHONE_REDACTED]",
        "[CARD_REDACTED]",
        "[SSN_REDACTED]",
        "[IP_REDACTED]",
    ] {
        assert!(out.contains(placeholder), "missing {placeholder} in {out:?}");
    }
    assert!(!out.contains("pat.doe"));
    assert!(longest_digit_run(&out) < 4);
}

#[test]
fn scrubbing_is_idempotent() {
    let mut rng = StdRng::seed_from_u64(13);
    for _ in 0..20 {
        let text = format!(
            "{} {} and {} then {}",
            random_email(&mut rng),
            random_phone(&mut rng),
            random_card(&mut rng),
            filler_sentence(&mut rng)
        );
        let once = scrub_patterns(&text);
        let twice = scrub_patterns(&once);
        assert_eq!(once, twice, "second pass changed output for {text:?}");
    }
}

#[test]
fn clean_text_passes_through_untouched() {
    let text = "The customer confirmed the fix works and closed the request.";
    assert_eq!(scrub_patterns(text), text);
    assert_eq!(scrub_patterns(""), "");
}
