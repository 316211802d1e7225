//! Requirements builder
//!
//! Normalizes a request's job context into ranking requirements. The jd
//! digest is parsed as structured JSON when possible and degrades to
//! comma/semicolon token splitting. Skills pass through a canonical alias
//! table so "k8s" and "kubernetes" collapse to one requirement.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde::{Deserialize, Serialize};

use crate::taxonomy::{self, RoleFamily, SeniorityBand};

/// Merged skill lists are clipped to this many canonical entries.
const MAX_TOP_SKILLS: usize = 12;

/// The structured job context carried on a sourcing request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobContext {
    #[serde(default)]
    pub jd_digest: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub good_to_have_skills: Vec<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub experience_years: Option<f64>,
    #[serde(default)]
    pub education: Option<String>,
}

impl JobContext {
    /// A context is usable when it names anything to match on.
    pub fn is_usable(&self) -> bool {
        !self.jd_digest.trim().is_empty()
            || self.title.as_deref().is_some_and(|t| !t.trim().is_empty())
            || !self.skills.is_empty()
    }
}

/// Structured form of the jd digest, when the caller sent JSON.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JdDigest {
    #[serde(default)]
    top_skills: Vec<String>,
    #[serde(default)]
    seniority_level: Option<String>,
    #[serde(default)]
    domain: Option<String>,
    #[serde(default)]
    role_family: Option<String>,
}

/// Normalized requirements the ranker and planner consume.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobRequirements {
    pub top_skills: Vec<String>,
    pub seniority: Option<SeniorityBand>,
    pub role_family: Option<RoleFamily>,
    pub domain: Option<String>,
    pub title: Option<String>,
    pub location: Option<String>,
}

impl JobRequirements {
    /// Build requirements from a job context.
    pub fn build(ctx: &JobContext) -> Self {
        let digest = parse_digest(&ctx.jd_digest);

        let mut skills: Vec<String> = Vec::new();
        let mut push = |raw: &str| {
            let canonical = canonicalize_skill(raw);
            if !canonical.is_empty() && !skills.contains(&canonical) {
                skills.push(canonical);
            }
        };
        for skill in &digest.top_skills {
            push(skill);
        }
        for skill in &ctx.skills {
            push(skill);
        }
        for skill in &ctx.good_to_have_skills {
            push(skill);
        }
        skills.truncate(MAX_TOP_SKILLS);

        let title = ctx.title.as_deref().map(str::trim).filter(|t| !t.is_empty());

        let seniority = digest
            .seniority_level
            .as_deref()
            .and_then(|s| s.parse().ok())
            .or_else(|| title.and_then(taxonomy::detect_seniority));

        let role_family = digest
            .role_family
            .as_deref()
            .and_then(|s| s.parse().ok())
            .or_else(|| title.and_then(taxonomy::detect_role_family));

        Self {
            top_skills: skills,
            seniority,
            role_family,
            domain: digest.domain.filter(|d| !d.trim().is_empty()),
            title: title.map(str::to_string),
            location: ctx
                .location
                .as_deref()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string),
        }
    }

    /// Whether the request constrains location at all.
    pub fn has_location_constraint(&self) -> bool {
        self.location.is_some()
    }
}

fn parse_digest(raw: &str) -> JdDigest {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return JdDigest::default();
    }
    if trimmed.starts_with('{') {
        if let Ok(digest) = serde_json::from_str::<JdDigest>(trimmed) {
            return digest;
        }
    }
    // Token fallback: comma/semicolon-separated fragments become skills.
    JdDigest {
        top_skills: trimmed
            .split([',', ';'])
            .map(str::trim)
            .filter(|t| !t.is_empty() && t.split_whitespace().count() <= 4)
            .map(str::to_string)
            .collect(),
        ..JdDigest::default()
    }
}

/// Skill alias table: every key rewrites to its canonical form.
static SKILL_ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    HashMap::from([
        ("nodejs", "node.js"),
        ("node", "node.js"),
        ("k8s", "kubernetes"),
        ("ts", "typescript"),
        ("js", "javascript"),
        ("py", "python"),
        ("golang", "go"),
        ("postgres", "postgresql"),
        ("pg", "postgresql"),
        ("reactjs", "react"),
        ("react.js", "react"),
        ("vuejs", "vue"),
        ("vue.js", "vue"),
        ("nextjs", "next.js"),
        ("mongo", "mongodb"),
        ("dotnet", ".net"),
        ("c sharp", "c#"),
        ("ml", "machine learning"),
        ("rest api", "rest"),
        ("restful", "rest"),
        ("cicd", "ci/cd"),
        ("ci cd", "ci/cd"),
    ])
});

/// Concept surface forms: the canonical term and the variants that count as
/// a match when scanning free text.
static CONCEPT_FORMS: LazyLock<HashMap<&'static str, Vec<&'static str>>> = LazyLock::new(|| {
    HashMap::from([
        (
            "microservices",
            vec!["microservice", "service oriented", "soa"],
        ),
        ("kubernetes", vec!["k8s", "container orchestration"]),
        ("machine learning", vec!["ml", "deep learning"]),
        ("rest", vec!["rest api", "restful"]),
        ("ci/cd", vec!["continuous integration", "continuous delivery", "cicd"]),
        ("postgresql", vec!["postgres"]),
        ("node.js", vec!["nodejs", "node"]),
        ("typescript", vec!["ts"]),
        ("javascript", vec!["js"]),
        ("go", vec!["golang"]),
    ])
});

/// Lowercase, trim, and rewrite through the alias table.
pub fn canonicalize_skill(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let collapsed = lowered.split_whitespace().collect::<Vec<_>>().join(" ");
    match SKILL_ALIASES.get(collapsed.as_str()) {
        Some(canonical) => canonical.to_string(),
        None => collapsed,
    }
}

/// Canonical form plus every alias and concept variant, for text scanning.
pub fn skill_surface_forms(raw: &str) -> Vec<String> {
    let canonical = canonicalize_skill(raw);
    let mut forms = vec![canonical.clone()];
    for (alias, target) in SKILL_ALIASES.iter() {
        if *target == canonical && !forms.iter().any(|f| f == alias) {
            forms.push(alias.to_string());
        }
    }
    if let Some(variants) = CONCEPT_FORMS.get(canonical.as_str()) {
        for variant in variants {
            if !forms.iter().any(|f| f == variant) {
                forms.push(variant.to_string());
            }
        }
    }
    forms
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(digest: &str, title: Option<&str>, skills: &[&str]) -> JobContext {
        JobContext {
            jd_digest: digest.to_string(),
            title: title.map(str::to_string),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            ..JobContext::default()
        }
    }

    #[test]
    fn test_structured_digest() {
        let ctx = ctx(
            r#"{"topSkills":["K8s","Python"],"seniorityLevel":"senior","roleFamily":"backend","domain":"fintech"}"#,
            None,
            &["postgres"],
        );
        let req = JobRequirements::build(&ctx);
        assert_eq!(req.top_skills, vec!["kubernetes", "python", "postgresql"]);
        assert_eq!(req.seniority, Some(SeniorityBand::Senior));
        assert_eq!(req.role_family, Some(RoleFamily::Backend));
        assert_eq!(req.domain.as_deref(), Some("fintech"));
    }

    #[test]
    fn test_token_fallback_digest() {
        let ctx = ctx("python, django; rest apis", None, &[]);
        let req = JobRequirements::build(&ctx);
        assert_eq!(req.top_skills, vec!["python", "django", "rest apis"]);
    }

    #[test]
    fn test_title_inference_when_digest_silent() {
        let ctx = ctx("build things", Some("Senior Backend Engineer"), &["go"]);
        let req = JobRequirements::build(&ctx);
        assert_eq!(req.seniority, Some(SeniorityBand::Senior));
        assert_eq!(req.role_family, Some(RoleFamily::Backend));
    }

    #[test]
    fn test_skills_merged_deduped_clipped() {
        let many: Vec<String> = (0..20).map(|i| format!("skill-{i}")).collect();
        let many_refs: Vec<&str> = many.iter().map(String::as_str).collect();
        let context = ctx("", None, &many_refs);
        let req = JobRequirements::build(&context);
        assert_eq!(req.top_skills.len(), 12);

        let context = ctx("", None, &["K8s", "kubernetes", "k8s"]);
        let req = JobRequirements::build(&context);
        assert_eq!(req.top_skills, vec!["kubernetes"]);
    }

    #[test]
    fn test_empty_digest_and_skills() {
        let context = ctx("", None, &[]);
        let req = JobRequirements::build(&context);
        assert!(req.top_skills.is_empty());
        assert!(req.seniority.is_none());
        assert!(!context.is_usable());
    }

    #[test]
    fn test_canonicalize_skill() {
        assert_eq!(canonicalize_skill(" NodeJS "), "node.js");
        assert_eq!(canonicalize_skill("TS"), "typescript");
        assert_eq!(canonicalize_skill("rust"), "rust");
    }

    #[test]
    fn test_surface_forms_cover_aliases_and_concepts() {
        let forms = skill_surface_forms("k8s");
        assert!(forms.contains(&"kubernetes".to_string()));
        assert!(forms.contains(&"k8s".to_string()));
        assert!(forms.contains(&"container orchestration".to_string()));

        let forms = skill_surface_forms("microservices");
        assert!(forms.contains(&"microservice".to_string()));
        assert!(forms.contains(&"soa".to_string()));
    }
}
