//! Candidate fit ranking
//!
//! A pure function from candidate facts and job requirements to a fit score
//! with a component breakdown. Deterministic by construction: equal inputs
//! produce byte-identical output, which the rerank worker relies on.

pub mod location;

use std::cmp::Ordering;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::requirements::{skill_surface_forms, JobRequirements};
use crate::taxonomy::{self, RoleFamily, SeniorityBand};

pub use location::{LocationMatchType, MatchTier};

const SKILL_WEIGHT: f64 = 0.45;
const ROLE_WEIGHT: f64 = 0.15;
const SENIORITY_WEIGHT: f64 = 0.25;
const FRESHNESS_WEIGHT: f64 = 0.15;

/// Short alphabetic forms that still count as skill evidence in free text.
const SHORT_FORM_ALLOWLIST: &[&str] = &["ts", "js", "go", "pg", "k8s"];

/// Cached facts from the candidate's latest intelligence snapshot.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SnapshotFacts {
    pub skills_normalized: Vec<String>,
    pub role_type: Option<String>,
    pub seniority_band: Option<String>,
    pub location: Option<String>,
    pub computed_at: Option<DateTime<Utc>>,
}

/// Everything the ranker may consult about one candidate.
#[derive(Debug, Clone, Default)]
pub struct RankInput {
    pub candidate_id: Uuid,
    pub name_hint: Option<String>,
    pub headline_hint: Option<String>,
    pub location_hint: Option<String>,
    pub company_hint: Option<String>,
    pub search_title: Option<String>,
    pub search_snippet: Option<String>,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub snapshot: Option<SnapshotFacts>,
}

impl RankInput {
    fn text_bag(&self) -> String {
        [
            self.headline_hint.as_deref(),
            self.search_title.as_deref(),
            self.search_snippet.as_deref(),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
    }

    /// Best available location text: snapshot first, then the hint.
    pub fn best_location(&self) -> Option<&str> {
        self.snapshot
            .as_ref()
            .and_then(|s| s.location.as_deref())
            .or(self.location_hint.as_deref())
    }
}

/// Which evidence path produced the skill score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkillScoreMethod {
    Snapshot,
    TextFallback,
}

/// How much the underlying evidence can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataConfidence {
    Low,
    Medium,
    High,
}

impl DataConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }
}

/// Per-component scores persisted alongside each output row.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FitBreakdown {
    pub skill_score: f64,
    pub role_score: f64,
    pub seniority_score: f64,
    pub freshness_score: f64,
    pub skill_score_method: SkillScoreMethod,
}

/// One ranked candidate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub candidate_id: Uuid,
    pub fit_score: f64,
    pub breakdown: FitBreakdown,
    pub match_tier: MatchTier,
    pub location_match: LocationMatchType,
    pub data_confidence: DataConfidence,
}

/// Ranking knobs plumbed from configuration.
#[derive(Debug, Clone, Copy)]
pub struct RankOptions {
    pub fit_score_epsilon: f64,
    /// Accepted for interface compatibility; location is a tier gate, not a
    /// score component, so no weight is applied.
    pub location_boost_weight: f64,
}

impl Default for RankOptions {
    fn default() -> Self {
        Self {
            fit_score_epsilon: 0.02,
            location_boost_weight: 0.1,
        }
    }
}

/// Score and sort candidates, best fit first.
pub fn rank(
    inputs: &[RankInput],
    requirements: &JobRequirements,
    options: &RankOptions,
) -> Vec<ScoredCandidate> {
    let now = Utc::now();
    let mut scored: Vec<ScoredCandidate> = inputs
        .iter()
        .map(|input| score_one(input, requirements, now))
        .collect();
    scored.sort_by(|a, b| compare_fit_with_confidence(a, b, options.fit_score_epsilon));
    scored
}

/// Score a single candidate without sorting.
pub fn score_one(
    input: &RankInput,
    requirements: &JobRequirements,
    now: DateTime<Utc>,
) -> ScoredCandidate {
    let (skill_score, skill_method) = skill_score(input, requirements);
    let role_score = role_score(input, requirements);
    let seniority_score = seniority_score(input, requirements);
    let freshness_score = freshness_score(input, now);

    let fit_score = SKILL_WEIGHT * skill_score
        + ROLE_WEIGHT * role_score
        + SENIORITY_WEIGHT * seniority_score
        + FRESHNESS_WEIGHT * freshness_score;

    let (match_tier, location_match) =
        location::classify(requirements.location.as_deref(), input.best_location());

    ScoredCandidate {
        candidate_id: input.candidate_id,
        fit_score,
        breakdown: FitBreakdown {
            skill_score,
            role_score,
            seniority_score,
            freshness_score,
            skill_score_method: skill_method,
        },
        match_tier,
        location_match,
        data_confidence: data_confidence(input),
    }
}

fn data_confidence(input: &RankInput) -> DataConfidence {
    match &input.snapshot {
        Some(snapshot) if !snapshot.skills_normalized.is_empty() => DataConfidence::High,
        Some(_) => DataConfidence::Medium,
        None if input.headline_hint.is_some() => DataConfidence::Medium,
        None => DataConfidence::Low,
    }
}

fn skill_score(input: &RankInput, requirements: &JobRequirements) -> (f64, SkillScoreMethod) {
    if requirements.top_skills.is_empty() {
        return (0.0, SkillScoreMethod::TextFallback);
    }

    let (overlap, method) = match &input.snapshot {
        Some(snapshot) if !snapshot.skills_normalized.is_empty() => {
            let candidate_skills: std::collections::HashSet<String> = snapshot
                .skills_normalized
                .iter()
                .map(|s| crate::requirements::canonicalize_skill(s))
                .collect();
            let hits = requirements
                .top_skills
                .iter()
                .filter(|skill| candidate_skills.contains(*skill))
                .count();
            (
                hits as f64 / requirements.top_skills.len() as f64,
                SkillScoreMethod::Snapshot,
            )
        }
        _ => (
            text_fallback_overlap(&input.text_bag(), &requirements.top_skills),
            SkillScoreMethod::TextFallback,
        ),
    };

    let domain_match = match requirements.domain.as_deref() {
        Some(domain) => {
            let needle = domain.trim().to_lowercase();
            let bag = input.text_bag();
            let snapshot_role = input
                .snapshot
                .as_ref()
                .and_then(|s| s.role_type.as_deref())
                .unwrap_or_default()
                .to_lowercase();
            if !needle.is_empty() && (bag.contains(&needle) || snapshot_role.contains(&needle)) {
                1.0
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    (0.8 * overlap + 0.2 * domain_match, method)
}

static WORD_REGEX_CACHE: LazyLock<std::sync::Mutex<std::collections::HashMap<String, Regex>>> =
    LazyLock::new(|| std::sync::Mutex::new(std::collections::HashMap::new()));

fn surface_form_regex(form: &str) -> Option<Regex> {
    let mut cache = WORD_REGEX_CACHE.lock().unwrap();
    if let Some(regex) = cache.get(form) {
        return Some(regex.clone());
    }
    let escaped = regex::escape(form);
    let prefix = if form.starts_with(|c: char| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };
    let suffix = if form.ends_with(|c: char| c.is_alphanumeric()) {
        r"\b"
    } else {
        ""
    };
    let regex = Regex::new(&format!("{prefix}{escaped}{suffix}")).ok()?;
    cache.insert(form.to_string(), regex.clone());
    Some(regex)
}

fn text_fallback_overlap(bag: &str, top_skills: &[String]) -> f64 {
    if bag.trim().is_empty() {
        return 0.0;
    }
    let hits = top_skills
        .iter()
        .filter(|skill| {
            skill_surface_forms(skill).iter().any(|form| {
                // Tiny purely-alphabetic forms match too much prose.
                let too_short = form.len() <= 2
                    && form.chars().all(|c| c.is_ascii_alphabetic())
                    && !SHORT_FORM_ALLOWLIST.contains(&form.as_str());
                if too_short {
                    return false;
                }
                surface_form_regex(form).is_some_and(|r| r.is_match(bag))
            })
        })
        .count();
    hits as f64 / top_skills.len() as f64
}

fn candidate_role_family(input: &RankInput) -> Option<RoleFamily> {
    if let Some(snapshot) = &input.snapshot {
        if let Some(role_type) = snapshot.role_type.as_deref() {
            if let Ok(family) = role_type.parse() {
                return Some(family);
            }
            if let Some(family) = taxonomy::detect_role_family(role_type) {
                return Some(family);
            }
        }
    }
    let bag = input.text_bag();
    if bag.is_empty() {
        None
    } else {
        taxonomy::detect_role_family(&bag)
    }
}

fn role_score(input: &RankInput, requirements: &JobRequirements) -> f64 {
    let Some(target) = requirements.role_family else {
        return 0.5;
    };
    match candidate_role_family(input) {
        Some(candidate) if candidate == target => 1.0,
        Some(candidate) if adjacent_stack(candidate, target) => 0.7,
        Some(_) => 0.1,
        None => 0.3,
    }
}

/// Fullstack is a near-match for either side of the stack.
fn adjacent_stack(a: RoleFamily, b: RoleFamily) -> bool {
    matches!(
        (a, b),
        (RoleFamily::Fullstack, RoleFamily::Frontend)
            | (RoleFamily::Fullstack, RoleFamily::Backend)
            | (RoleFamily::Frontend, RoleFamily::Fullstack)
            | (RoleFamily::Backend, RoleFamily::Fullstack)
    )
}

fn candidate_seniority(input: &RankInput) -> Option<SeniorityBand> {
    if let Some(snapshot) = &input.snapshot {
        if let Some(band) = snapshot.seniority_band.as_deref() {
            if let Ok(parsed) = band.parse() {
                return Some(parsed);
            }
        }
    }
    let bag = input.text_bag();
    if bag.is_empty() {
        None
    } else {
        taxonomy::detect_seniority(&bag)
    }
}

fn seniority_score(input: &RankInput, requirements: &JobRequirements) -> f64 {
    let Some(target) = requirements.seniority else {
        return 0.5;
    };
    match candidate_seniority(input) {
        Some(candidate) => match candidate.distance(&target) {
            0 => 1.0,
            1 => 0.5,
            _ => 0.0,
        },
        None => 0.3,
    }
}

fn freshness_score(input: &RankInput, now: DateTime<Utc>) -> f64 {
    let timestamp = input
        .snapshot
        .as_ref()
        .and_then(|s| s.computed_at)
        .or(input.last_enriched_at);
    let Some(timestamp) = timestamp else {
        return 0.1;
    };
    let days = (now - timestamp).num_days();
    match days {
        d if d <= 30 => 1.0,
        d if d <= 90 => 0.7,
        d if d <= 180 => 0.4,
        _ => 0.1,
    }
}

/// Primary sort by fit descending; ties within epsilon fall back to data
/// confidence, then candidate id for a stable total order.
pub fn compare_fit_with_confidence(
    a: &ScoredCandidate,
    b: &ScoredCandidate,
    epsilon: f64,
) -> Ordering {
    if (a.fit_score - b.fit_score).abs() <= epsilon {
        b.data_confidence
            .cmp(&a.data_confidence)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    } else {
        b.fit_score
            .partial_cmp(&a.fit_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.candidate_id.cmp(&b.candidate_id))
    }
}
