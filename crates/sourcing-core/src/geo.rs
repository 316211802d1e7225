//! Location canonicalization tables
//!
//! Shared by the hint sanitizer, the ranker's location tier gate, and the
//! country guard. Canonicalization lowercases, strips punctuation, and
//! rewrites common city aliases so that "Bengaluru" and "Bangalore" compare
//! equal.

use std::collections::HashMap;
use std::sync::LazyLock;

/// City alias rewrites applied during canonicalization.
static CITY_ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("bengaluru", "bangalore"),
        ("bombay", "mumbai"),
        ("nyc", "new york"),
        ("new york city", "new york"),
        ("sf", "san francisco"),
        ("gurugram", "gurgaon"),
        ("madras", "chennai"),
        ("calcutta", "kolkata"),
    ])
});

/// Cities recognized as location evidence by the hint sanitizer.
static KNOWN_CITIES: LazyLock<Vec<&'static str>> = LazyLock::new(|| {
    vec![
        "bangalore",
        "mumbai",
        "delhi",
        "new delhi",
        "hyderabad",
        "chennai",
        "pune",
        "gurgaon",
        "noida",
        "kolkata",
        "ahmedabad",
        "jaipur",
        "kochi",
        "new york",
        "san francisco",
        "seattle",
        "austin",
        "boston",
        "chicago",
        "los angeles",
        "london",
        "manchester",
        "dublin",
        "berlin",
        "munich",
        "amsterdam",
        "paris",
        "toronto",
        "vancouver",
        "singapore",
        "dubai",
        "sydney",
        "melbourne",
        "tokyo",
        "remote",
    ]
});

/// Country tokens mapped to ISO 3166-1 alpha-2 codes.
static COUNTRY_TOKENS: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("india", "IN"),
        ("in", "IN"),
        ("usa", "US"),
        ("us", "US"),
        ("united states", "US"),
        ("america", "US"),
        ("uk", "GB"),
        ("united kingdom", "GB"),
        ("england", "GB"),
        ("canada", "CA"),
        ("germany", "DE"),
        ("france", "FR"),
        ("netherlands", "NL"),
        ("ireland", "IE"),
        ("singapore", "SG"),
        ("australia", "AU"),
        ("uae", "AE"),
        ("united arab emirates", "AE"),
        ("japan", "JP"),
    ])
});

/// Countries implied by a city, for country-guard checks when only a city
/// token is present.
static CITY_COUNTRIES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("bangalore", "IN"),
        ("mumbai", "IN"),
        ("delhi", "IN"),
        ("new delhi", "IN"),
        ("hyderabad", "IN"),
        ("chennai", "IN"),
        ("pune", "IN"),
        ("gurgaon", "IN"),
        ("noida", "IN"),
        ("kolkata", "IN"),
        ("ahmedabad", "IN"),
        ("jaipur", "IN"),
        ("kochi", "IN"),
        ("new york", "US"),
        ("san francisco", "US"),
        ("seattle", "US"),
        ("austin", "US"),
        ("boston", "US"),
        ("chicago", "US"),
        ("los angeles", "US"),
        ("london", "GB"),
        ("manchester", "GB"),
        ("dublin", "IE"),
        ("berlin", "DE"),
        ("munich", "DE"),
        ("amsterdam", "NL"),
        ("paris", "FR"),
        ("toronto", "CA"),
        ("vancouver", "CA"),
        ("singapore", "SG"),
        ("dubai", "AE"),
        ("sydney", "AU"),
        ("melbourne", "AU"),
        ("tokyo", "JP"),
    ])
});

/// Lowercase, strip punctuation to spaces, collapse whitespace. No alias
/// rewrites; used to distinguish exact city matches from alias matches.
pub fn normalize_text(raw: &str) -> String {
    raw.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, strip punctuation to spaces, collapse whitespace, and apply
/// city alias rewrites. Idempotent: canonicalizing twice equals once.
pub fn canonicalize_location(raw: &str) -> String {
    let mut text = normalize_text(raw);

    // Multi-word aliases first so "new york city" rewrites before "nyc".
    let mut aliases: Vec<(&str, &str)> = CITY_ALIASES.iter().map(|(k, v)| (*k, *v)).collect();
    aliases.sort_by_key(|(k, _)| std::cmp::Reverse(k.len()));
    for (alias, canonical) in aliases {
        text = replace_word(&text, alias, canonical);
    }
    text
}

fn replace_word(text: &str, word: &str, replacement: &str) -> String {
    if !text.contains(word) {
        return text.to_string();
    }
    let padded = format!(" {} ", text);
    let replaced = padded.replace(&format!(" {} ", word), &format!(" {} ", replacement));
    replaced.trim().split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether any known-city token appears in already-canonicalized text.
pub fn contains_known_city(canonical: &str) -> bool {
    let padded = format!(" {} ", canonical);
    KNOWN_CITIES
        .iter()
        .any(|city| padded.contains(&format!(" {} ", city)))
}

/// Whether any country token appears in already-canonicalized text.
pub fn contains_country_token(canonical: &str) -> bool {
    country_code_for(canonical).is_some()
}

/// Resolve a country code from canonicalized location text. Country tokens
/// win over city-implied countries; two-letter tokens only count when they
/// stand alone as a trailing segment token.
pub fn country_code_for(canonical: &str) -> Option<&'static str> {
    let padded = format!(" {} ", canonical);
    let last_token = canonical.rsplit(' ').next().unwrap_or_default();

    let mut tokens: Vec<(&str, &str)> = COUNTRY_TOKENS.iter().map(|(k, v)| (*k, *v)).collect();
    tokens.sort_by_key(|(k, _)| (std::cmp::Reverse(k.len()), *k));
    for (token, code) in tokens {
        // Short codes ("in", "us") double as common words; only a trailing
        // segment token counts as country evidence.
        let matched = if token.len() <= 2 {
            last_token == token
        } else {
            padded.contains(&format!(" {} ", token))
        };
        if matched {
            return Some(code);
        }
    }

    let mut cities: Vec<(&str, &str)> = CITY_COUNTRIES.iter().map(|(k, v)| (*k, *v)).collect();
    cities.sort_by_key(|(k, _)| (std::cmp::Reverse(k.len()), *k));
    for (city, code) in cities {
        if padded.contains(&format!(" {} ", city)) {
            return Some(code);
        }
    }
    None
}

/// Extract the primary city from a raw target location: first comma segment,
/// with "greater X area/region/metropolitan" wrappers stripped, canonicalized.
pub fn primary_city(raw_location: &str) -> Option<String> {
    extract_city(raw_location, true)
}

/// Same extraction without alias rewrites, for exact-match comparison.
pub fn primary_city_pre_alias(raw_location: &str) -> Option<String> {
    extract_city(raw_location, false)
}

fn extract_city(raw_location: &str, apply_aliases: bool) -> Option<String> {
    let first_segment = raw_location.split(',').next()?.trim();
    if first_segment.is_empty() {
        return None;
    }
    let canonical = if apply_aliases {
        canonicalize_location(first_segment)
    } else {
        normalize_text(first_segment)
    };
    let stripped = canonical
        .split_whitespace()
        .filter(|w| !matches!(*w, "greater" | "area" | "region" | "metropolitan" | "metro"))
        .collect::<Vec<_>>()
        .join(" ");
    if stripped.is_empty() {
        return None;
    }
    // A segment that is only a country token carries no city.
    if COUNTRY_TOKENS.contains_key(stripped.as_str()) {
        return None;
    }
    Some(stripped)
}

/// Word-level containment over canonicalized text.
pub fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    if phrase.is_empty() {
        return false;
    }
    format!(" {} ", haystack).contains(&format!(" {} ", phrase))
}
