//! Location tier gate
//!
//! Location never contributes to the fit score. It partitions candidates
//! into the strict and expanded tiers that drive assembly order.

use serde::{Deserialize, Serialize};

use crate::geo;
use crate::hints;

/// Hard output partition; strict rows always rank ahead of expanded rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MatchTier {
    #[serde(rename = "strict_location")]
    Strict,
    #[serde(rename = "expanded_location")]
    Expanded,
}

impl MatchTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict_location",
            Self::Expanded => "expanded_location",
        }
    }
}

/// How the candidate's location related to the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationMatchType {
    CityExact,
    CityAlias,
    CountryOnly,
    None,
}

impl LocationMatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CityExact => "city_exact",
            Self::CityAlias => "city_alias",
            Self::CountryOnly => "country_only",
            Self::None => "none",
        }
    }
}

/// Classify a candidate location against the target location.
pub fn classify(
    target_location: Option<&str>,
    candidate_location: Option<&str>,
) -> (MatchTier, LocationMatchType) {
    // No meaningful target: everyone is strict.
    let Some(target) = target_location.map(str::trim).filter(|t| !t.is_empty()) else {
        return (MatchTier::Strict, LocationMatchType::None);
    };
    let target_canonical = geo::canonicalize_location(target);
    if target_canonical.is_empty() {
        return (MatchTier::Strict, LocationMatchType::None);
    }

    // Missing or noisy candidate location: expanded, unknown.
    let Some(candidate) = candidate_location.map(str::trim).filter(|c| !c.is_empty()) else {
        return (MatchTier::Expanded, LocationMatchType::None);
    };
    if hints::is_noisy(candidate) {
        return (MatchTier::Expanded, LocationMatchType::None);
    }
    let candidate_canonical = geo::canonicalize_location(candidate);

    let target_city = geo::primary_city(target);

    if let Some(city) = &target_city {
        if geo::contains_phrase(&candidate_canonical, city) {
            // Exact when the match also holds on the pre-alias raw forms.
            let raw_match = match geo::primary_city_pre_alias(target) {
                Some(raw_city) => {
                    geo::contains_phrase(&geo::normalize_text(candidate), &raw_city)
                }
                None => false,
            };
            let match_type = if raw_match {
                LocationMatchType::CityExact
            } else {
                LocationMatchType::CityAlias
            };
            return (MatchTier::Strict, match_type);
        }
    }

    let target_country = geo::country_code_for(&target_canonical);
    let candidate_country = geo::country_code_for(&candidate_canonical);
    if let (Some(tc), Some(cc)) = (target_country, candidate_country) {
        if tc == cc {
            return if target_city.is_none() {
                (MatchTier::Strict, LocationMatchType::CountryOnly)
            } else {
                (MatchTier::Expanded, LocationMatchType::CountryOnly)
            };
        }
    }

    (MatchTier::Expanded, LocationMatchType::None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_target_everyone_strict() {
        assert_eq!(
            classify(None, Some("Pune, India")),
            (MatchTier::Strict, LocationMatchType::None)
        );
        assert_eq!(
            classify(Some("  "), None),
            (MatchTier::Strict, LocationMatchType::None)
        );
    }

    #[test]
    fn test_missing_or_noisy_candidate_expanded() {
        assert_eq!(
            classify(Some("Bangalore, India"), None),
            (MatchTier::Expanded, LocationMatchType::None)
        );
        assert_eq!(
            classify(Some("Bangalore, India"), Some("n/a")),
            (MatchTier::Expanded, LocationMatchType::None)
        );
    }

    #[test]
    fn test_city_exact_match() {
        assert_eq!(
            classify(Some("Bangalore, India"), Some("Bangalore, Karnataka")),
            (MatchTier::Strict, LocationMatchType::CityExact)
        );
    }

    #[test]
    fn test_city_alias_match() {
        // Candidate says Bengaluru, target says Bangalore: match survives
        // canonicalization but not the pre-alias comparison.
        assert_eq!(
            classify(Some("Bangalore, India"), Some("Bengaluru")),
            (MatchTier::Strict, LocationMatchType::CityAlias)
        );
        assert_eq!(
            classify(Some("NYC"), Some("New York, USA")),
            (MatchTier::Strict, LocationMatchType::CityAlias)
        );
    }

    #[test]
    fn test_greater_area_wrapper_stripped() {
        assert_eq!(
            classify(Some("Greater Bengaluru Area, India"), Some("Bangalore")),
            (MatchTier::Strict, LocationMatchType::CityAlias)
        );
    }

    #[test]
    fn test_country_only() {
        // Target has a city: same-country candidates are expanded.
        assert_eq!(
            classify(Some("Bangalore, India"), Some("Pune, India")),
            (MatchTier::Expanded, LocationMatchType::CountryOnly)
        );
        // Target is country-only: same-country candidates are strict.
        assert_eq!(
            classify(Some("India"), Some("Pune, India")),
            (MatchTier::Strict, LocationMatchType::CountryOnly)
        );
    }

    #[test]
    fn test_no_overlap_expanded_none() {
        assert_eq!(
            classify(Some("Bangalore, India"), Some("Berlin, Germany")),
            (MatchTier::Expanded, LocationMatchType::None)
        );
    }

    #[test]
    fn test_candidate_side_idempotent_under_canonicalization() {
        // Re-canonicalizing the candidate text never changes the outcome.
        let target = "Bangalore, India";
        let candidate = "Bengaluru, Karnataka";
        let direct = classify(Some(target), Some(candidate));
        let canonical_candidate = crate::geo::canonicalize_location(candidate);
        let recanonicalized = classify(Some(target), Some(&canonical_candidate));
        assert_eq!(direct.0, recanonicalized.0);
    }
}
