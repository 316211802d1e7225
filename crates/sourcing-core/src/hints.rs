//! Hint sanitization and quality scoring
//!
//! SERP captures arrive with name / headline / location / company fragments
//! of wildly varying quality. These helpers score that quality and enforce
//! the replace-when-strictly-better rule used everywhere hints are persisted.

use std::sync::LazyLock;

use regex::Regex;

use crate::geo;

/// Placeholder strings that carry no information.
const PLACEHOLDERS: &[&str] = &[
    "na", "n/a", "n.a.", "unknown", "none", "null", "-", "--", "...", "nil", "tbd",
];

/// Words that mark bio-shaped text rather than a location or company name.
const BIO_WORDS: &[&str] = &[
    "experience",
    "experienced",
    "years",
    "yrs",
    "degree",
    "bachelor",
    "master",
    "engineer",
    "developer",
    "manager",
    "lead",
    "architect",
    "consultant",
    "specialist",
    "analyst",
    "designer",
    "recruiter",
    "founder",
    "director",
    "intern",
    "student",
    "passionate",
    "seeking",
    "skilled",
];

static URL_ISH: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(https?://|www\.|\.com\b|\.io\b|\.in\b/)").expect("url regex")
});

static VIEW_PROFILE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)view\b.*\bprofile").expect("view-profile regex"));

/// Trim to `None` when empty.
pub fn normalize(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Placeholder, ellipsis, URL-ish, or boilerplate SERP text.
pub fn is_noisy(text: &str) -> bool {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return true;
    }
    let lowered = trimmed.to_lowercase();
    if PLACEHOLDERS.contains(&lowered.as_str()) {
        return true;
    }
    if lowered.contains('\u{2026}') || lowered.contains("...") {
        return true;
    }
    if URL_ISH.is_match(&lowered) || lowered.contains("linkedin") {
        return true;
    }
    VIEW_PROFILE.is_match(&lowered)
}

/// 0 for noisy/empty text, otherwise word count clamped to [1, 4].
pub fn quality_score(text: Option<&str>) -> u32 {
    let Some(text) = text else { return 0 };
    if is_noisy(text) {
        return 0;
    }
    (text.split_whitespace().count() as u32).clamp(1, 4)
}

/// Replacement must be a strict quality improvement.
pub fn should_replace(existing: Option<&str>, incoming: Option<&str>) -> bool {
    quality_score(incoming) > quality_score(existing)
}

/// Whether text plausibly names a place rather than a bio fragment.
///
/// Requires a known city/country token or a "City, XX" comma pattern, and
/// rejects anything containing role-title or education vocabulary.
pub fn is_likely_location_hint(text: &str) -> bool {
    if is_noisy(text) {
        return false;
    }
    let lowered = text.to_lowercase();
    if BIO_WORDS.iter().any(|w| contains_word(&lowered, w)) {
        return false;
    }
    if text.split_whitespace().count() > 6 {
        return false;
    }
    let canonical = geo::canonicalize_location(text);
    if geo::contains_known_city(&canonical) || geo::contains_country_token(&canonical) {
        return true;
    }
    has_city_comma_pattern(text)
}

/// "City, XX" / "City, State": a comma followed by a short trailing segment.
fn has_city_comma_pattern(text: &str) -> bool {
    let mut segments = text.split(',');
    let first = segments.next().map(str::trim).unwrap_or_default();
    let second = segments.next().map(str::trim).unwrap_or_default();
    if first.is_empty() || second.is_empty() {
        return false;
    }
    first.split_whitespace().count() <= 3 && second.split_whitespace().count() <= 3
}

/// 3 = city + state/country, 2 = city or region indicator, 1 = country only,
/// 0 = not a usable location.
pub fn location_hint_quality_score(text: Option<&str>) -> u32 {
    let Some(text) = text else { return 0 };
    if !is_likely_location_hint(text) {
        return 0;
    }
    let canonical = geo::canonicalize_location(text);
    let has_city = geo::contains_known_city(&canonical) || has_city_comma_pattern(text);
    let has_country = geo::contains_country_token(&canonical);

    if has_city && (has_country || text.contains(',')) {
        return 3;
    }
    if has_city || contains_word(&canonical, "region") || contains_word(&canonical, "area") {
        return 2;
    }
    if has_country {
        return 1;
    }
    0
}

pub fn should_replace_location_hint(existing: Option<&str>, incoming: Option<&str>) -> bool {
    location_hint_quality_score(incoming) > location_hint_quality_score(existing)
}

/// Short text free of bio vocabulary; company names don't describe careers.
pub fn is_likely_company_hint(text: &str) -> bool {
    if is_noisy(text) {
        return false;
    }
    let lowered = text.to_lowercase();
    if BIO_WORDS.iter().any(|w| contains_word(&lowered, w)) {
        return false;
    }
    text.split_whitespace().count() <= 6
}

pub fn company_hint_quality_score(text: Option<&str>) -> u32 {
    let Some(text) = text else { return 0 };
    if !is_likely_company_hint(text) {
        return 0;
    }
    (text.split_whitespace().count() as u32).clamp(1, 4)
}

pub fn should_replace_company_hint(existing: Option<&str>, incoming: Option<&str>) -> bool {
    company_hint_quality_score(incoming) > company_hint_quality_score(existing)
}

fn contains_word(text: &str, word: &str) -> bool {
    text.split(|c: char| !c.is_alphanumeric())
        .any(|token| token == word)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(normalize(Some("  Priya Sharma  ")).as_deref(), Some("Priya Sharma"));
        assert_eq!(normalize(Some("   ")), None);
        assert_eq!(normalize(None), None);
    }

    #[test]
    fn test_noisy_placeholders() {
        for text in ["N/A", "na", "unknown", "None", "null", "-", "..."] {
            assert!(is_noisy(text), "{text} should be noisy");
        }
        assert!(is_noisy("See more on LinkedIn"));
        assert!(is_noisy("View Priya's full profile"));
        assert!(is_noisy("https://example.com/p"));
        assert!(is_noisy("Senior engineer at\u{2026}"));
        assert!(!is_noisy("Priya Sharma"));
    }

    #[test]
    fn test_quality_score_word_count() {
        assert_eq!(quality_score(None), 0);
        assert_eq!(quality_score(Some("n/a")), 0);
        assert_eq!(quality_score(Some("Priya")), 1);
        assert_eq!(quality_score(Some("Priya Sharma")), 2);
        assert_eq!(quality_score(Some("one two three four five six")), 4);
    }

    #[test]
    fn test_should_replace_is_strict() {
        assert!(should_replace(Some("Priya"), Some("Priya Sharma")));
        assert!(!should_replace(Some("Priya Sharma"), Some("Arjun Rao")));
        assert!(!should_replace(Some("Priya Sharma"), Some("n/a")));
        assert!(should_replace(None, Some("Priya")));
    }

    #[test]
    fn test_replacement_monotonicity() {
        // should_replace(a, b) implies quality(b) > quality(a) and !is_noisy(b)
        let samples = [
            None,
            Some("n/a"),
            Some("Priya"),
            Some("Priya Sharma"),
            Some("view full profile"),
            Some("Senior Platform Engineer at Example"),
        ];
        for a in samples {
            for b in samples {
                if should_replace(a, b) {
                    assert!(quality_score(b) > quality_score(a));
                    assert!(!is_noisy(b.unwrap()));
                }
            }
        }
    }

    #[test]
    fn test_location_hint_rejects_bio_text() {
        assert!(!is_likely_location_hint("10 years experience in fintech"));
        assert!(!is_likely_location_hint("Senior Engineer"));
        assert!(!is_likely_location_hint("Bachelor of Engineering"));
        assert!(is_likely_location_hint("Bengaluru, Karnataka"));
        assert!(is_likely_location_hint("Pune, India"));
        assert!(is_likely_location_hint("Austin, TX"));
    }

    #[test]
    fn test_location_hint_quality() {
        assert_eq!(location_hint_quality_score(Some("Bengaluru, Karnataka")), 3);
        assert_eq!(location_hint_quality_score(Some("Bangalore")), 2);
        assert_eq!(location_hint_quality_score(Some("Bay Area, CA")), 3);
        assert_eq!(location_hint_quality_score(Some("India")), 1);
        assert_eq!(location_hint_quality_score(Some("Senior Engineer")), 0);
        assert_eq!(location_hint_quality_score(None), 0);
    }

    #[test]
    fn test_should_replace_location_uses_location_score() {
        // "India" is two words short of "Senior Engineer" but scores higher
        // on the location-specific scale.
        assert!(should_replace_location_hint(Some("Senior Engineer"), Some("India")));
        assert!(should_replace_location_hint(Some("India"), Some("Pune, India")));
        assert!(!should_replace_location_hint(Some("Pune, India"), Some("India")));
    }

    #[test]
    fn test_company_hint() {
        assert!(is_likely_company_hint("Acme Robotics"));
        assert!(!is_likely_company_hint("Senior Engineer at Acme"));
        assert_eq!(company_hint_quality_score(Some("Acme Robotics")), 2);
        assert!(should_replace_company_hint(None, Some("Acme")));
        assert!(!should_replace_company_hint(Some("Acme Robotics"), Some("10 years experience")));
    }
}
