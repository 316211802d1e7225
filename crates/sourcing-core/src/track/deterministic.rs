//! Deterministic track scorer
//!
//! Weighted keyword lists compiled once to word-boundary regexes. Strong
//! keywords weigh 1.0, moderate 0.5; a detected engineering role family adds
//! a flat +2.0 to the tech side.

use std::sync::LazyLock;

use regex::Regex;

use crate::requirements::{JobContext, JobRequirements};
use crate::track::{DeterministicSignals, Track};

/// Flat bonus applied to the tech side when a role family was detected.
const ROLE_FAMILY_TECH_BONUS: f64 = 2.0;

const STRONG: f64 = 1.0;
const MODERATE: f64 = 0.5;

struct CompiledKeyword {
    term: &'static str,
    weight: f64,
    regex: Regex,
}

fn compile(entries: &[(&'static str, f64)]) -> Vec<CompiledKeyword> {
    entries
        .iter()
        .map(|(term, weight)| {
            let escaped = regex::escape(term);
            let prefix = if term.starts_with(|c: char| c.is_alphanumeric()) {
                r"\b"
            } else {
                ""
            };
            let suffix = if term.ends_with(|c: char| c.is_alphanumeric()) {
                r"\b"
            } else {
                ""
            };
            CompiledKeyword {
                term,
                weight: *weight,
                regex: Regex::new(&format!("{prefix}{escaped}{suffix}")).expect("keyword regex"),
            }
        })
        .collect()
}

static TECH_KEYWORDS: LazyLock<Vec<CompiledKeyword>> = LazyLock::new(|| {
    compile(&[
        ("python", STRONG),
        ("java", STRONG),
        ("javascript", STRONG),
        ("typescript", STRONG),
        ("golang", STRONG),
        ("rust", STRONG),
        ("kubernetes", STRONG),
        ("docker", STRONG),
        ("aws", STRONG),
        ("azure", STRONG),
        ("gcp", STRONG),
        ("postgresql", STRONG),
        ("mysql", STRONG),
        ("mongodb", STRONG),
        ("redis", STRONG),
        ("react", STRONG),
        ("angular", STRONG),
        ("vue", STRONG),
        ("node.js", STRONG),
        ("graphql", STRONG),
        ("microservices", STRONG),
        ("backend", STRONG),
        ("frontend", STRONG),
        ("fullstack", STRONG),
        ("full stack", STRONG),
        ("devops", STRONG),
        ("terraform", STRONG),
        ("api", STRONG),
        ("sql", STRONG),
        ("machine learning", STRONG),
        ("data pipeline", STRONG),
        ("software", STRONG),
        ("linux", STRONG),
        ("c++", STRONG),
        ("c#", STRONG),
        ("engineer", MODERATE),
        ("engineering", MODERATE),
        ("developer", MODERATE),
        ("technical", MODERATE),
        ("integration", MODERATE),
        ("cloud", MODERATE),
        ("automation", MODERATE),
        ("scalable", MODERATE),
        ("architecture", MODERATE),
        ("database", MODERATE),
        ("deployment", MODERATE),
        ("distributed", MODERATE),
        ("algorithm", MODERATE),
        ("testing", MODERATE),
    ])
});

static NON_TECH_KEYWORDS: LazyLock<Vec<CompiledKeyword>> = LazyLock::new(|| {
    compile(&[
        ("sales", STRONG),
        ("marketing", STRONG),
        ("recruiting", STRONG),
        ("recruiter", STRONG),
        ("talent acquisition", STRONG),
        ("human resources", STRONG),
        ("account executive", STRONG),
        ("account manager", STRONG),
        ("business development", STRONG),
        ("customer success", STRONG),
        ("crm", STRONG),
        ("salesforce", STRONG),
        ("quota", STRONG),
        ("negotiation", STRONG),
        ("revenue", STRONG),
        ("partnerships", STRONG),
        ("payroll", STRONG),
        ("accounting", STRONG),
        ("stakeholder", STRONG),
        ("brand", STRONG),
        ("seo", STRONG),
        ("lead generation", STRONG),
        ("cold calling", STRONG),
        ("upsell", STRONG),
        ("campaign", STRONG),
        ("program manager", MODERATE),
        ("project manager", MODERATE),
        ("communication", MODERATE),
        ("presentation", MODERATE),
        ("client", MODERATE),
        ("customer", MODERATE),
        ("budget", MODERATE),
        ("strategy", MODERATE),
        ("operations", MODERATE),
        ("agile", MODERATE),
        ("planning", MODERATE),
        ("relationship", MODERATE),
        ("finance", MODERATE),
    ])
});

fn scan(keywords: &[CompiledKeyword], text: &str) -> (Vec<String>, usize, f64) {
    let mut matched = Vec::new();
    let mut strong = 0usize;
    let mut raw = 0.0;
    for keyword in keywords {
        if keyword.regex.is_match(text) {
            matched.push(keyword.term.to_string());
            raw += keyword.weight;
            if keyword.weight >= STRONG {
                strong += 1;
            }
        }
    }
    (matched, strong, raw)
}

/// Concatenated lowercase bag of everything the request says about the job.
pub fn text_bag(ctx: &JobContext) -> String {
    let mut parts: Vec<&str> = Vec::new();
    if let Some(title) = ctx.title.as_deref() {
        parts.push(title);
    }
    parts.push(&ctx.jd_digest);
    parts.extend(ctx.skills.iter().map(String::as_str));
    parts.extend(ctx.good_to_have_skills.iter().map(String::as_str));
    parts.join(" ").to_lowercase()
}

/// Score the text bag and produce the deterministic decision inputs.
pub fn score(
    ctx: &JobContext,
    requirements: &JobRequirements,
    blend_threshold: f64,
) -> (Track, f64, DeterministicSignals) {
    let bag = text_bag(ctx);

    let (matched_tech, strong_tech, mut tech_raw) = scan(&TECH_KEYWORDS, &bag);
    let (matched_non_tech, strong_non_tech, non_tech_raw) = scan(&NON_TECH_KEYWORDS, &bag);

    let role_family_signal = requirements.role_family.map(|f| f.as_str().to_string());
    if role_family_signal.is_some() {
        tech_raw += ROLE_FAMILY_TECH_BONUS;
    }

    let total = tech_raw + non_tech_raw;
    let mut signals = DeterministicSignals {
        matched_tech_keywords: matched_tech,
        matched_non_tech_keywords: matched_non_tech,
        strong_tech_count: strong_tech,
        strong_non_tech_count: strong_non_tech,
        role_family_signal,
        tech_raw,
        non_tech_raw,
        tech_score: 0.0,
        non_tech_score: 0.0,
        margin: 0.0,
    };

    if total == 0.0 {
        return (Track::Tech, 0.30, signals);
    }

    let tech_score = tech_raw / total;
    let non_tech_score = non_tech_raw / total;
    let margin = (tech_score - non_tech_score).abs();
    signals.tech_score = tech_score;
    signals.non_tech_score = non_tech_score;
    signals.margin = margin;

    let margin_confidence = (0.6 + 0.8 * margin).min(0.99);

    // Dominance override: a heavy, uncontested keyword presence settles it.
    if strong_tech >= 5 && strong_non_tech == 0 {
        return (Track::Tech, margin_confidence.max(0.95), signals);
    }
    if strong_non_tech >= 5 && strong_tech == 0 {
        return (Track::NonTech, margin_confidence.max(0.95), signals);
    }

    if margin < blend_threshold {
        return (Track::Blended, 0.5 + margin, signals);
    }

    let track = if tech_score > non_tech_score {
        Track::Tech
    } else {
        Track::NonTech
    };
    (track, margin_confidence, signals)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::requirements::JobRequirements;

    fn classify(title: &str, digest: &str, skills: &[&str]) -> (Track, f64, DeterministicSignals) {
        let ctx = JobContext {
            jd_digest: digest.to_string(),
            title: Some(title.to_string()),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            ..JobContext::default()
        };
        let requirements = JobRequirements::build(&ctx);
        score(&ctx, &requirements, 0.15)
    }

    #[test]
    fn test_clear_tech_role() {
        let (track, confidence, signals) = classify(
            "Senior Backend Engineer",
            "Build and maintain scalable microservices",
            &["python", "kubernetes", "postgresql"],
        );
        assert_eq!(track, Track::Tech);
        assert!(confidence >= 0.85, "confidence {confidence}");
        assert!(signals.matched_tech_keywords.len() >= 3);
        assert_eq!(signals.role_family_signal.as_deref(), Some("backend"));
    }

    #[test]
    fn test_clear_non_tech_role() {
        let (track, confidence, _) = classify(
            "Account Executive - Enterprise Sales",
            "Manage enterprise accounts and drive revenue growth",
            &["crm", "salesforce", "pipeline management", "quota", "negotiation"],
        );
        assert_eq!(track, Track::NonTech);
        assert!(confidence >= 0.85, "confidence {confidence}");
    }

    #[test]
    fn test_ambiguous_role_blends_or_hedges() {
        let (track, confidence, _) = classify(
            "Technical Program Manager",
            "Work with engineering teams on integration projects",
            &["api", "agile", "stakeholder management", "budget"],
        );
        assert!(
            track == Track::Blended || confidence < 0.75,
            "track {track:?} confidence {confidence}"
        );
    }

    #[test]
    fn test_no_signal_defaults_to_low_confidence_tech() {
        let (track, confidence, signals) = classify("Wizard", "Do wizardry", &[]);
        assert_eq!(track, Track::Tech);
        assert_eq!(confidence, 0.30);
        assert_eq!(signals.tech_raw, 0.0);
        assert_eq!(signals.non_tech_raw, 0.0);
    }

    #[test]
    fn test_word_boundaries_respected() {
        // "class" must not match "sales"; "apink" must not match "api".
        let (_, _, signals) = classify("Curator", "classic apink collection", &[]);
        assert!(signals.matched_tech_keywords.is_empty());
        assert!(signals.matched_non_tech_keywords.is_empty());
    }
}
