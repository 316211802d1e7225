//! Discovery query planner
//!
//! Builds the strict (location-targeted) and fallback query plans. The
//! deterministic plan is always produced; hybrid mode merges LLM-generated
//! queries onto it and never replaces it.

use std::sync::Arc;

use serde::Deserialize;

use crate::config::QueryGenMode;
use crate::llm::{generate_with_policy, StructuredLlm, StructuredRequest};
use crate::requirements::{canonicalize_skill, skill_surface_forms, JobRequirements};

/// Hard clip applied to every query string.
const MAX_QUERY_LEN: usize = 240;

const SITE_PREFIX: &str = "site:linkedin.com/in";

/// Queries the LLM may contribute per phase.
const MAX_LLM_QUERIES: usize = 12;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryPlan {
    pub strict: Vec<String>,
    pub fallback: Vec<String>,
}

impl QueryPlan {
    pub fn is_empty(&self) -> bool {
        self.strict.is_empty() && self.fallback.is_empty()
    }

    pub fn total(&self) -> usize {
        self.strict.len() + self.fallback.len()
    }
}

/// Search terms for the top-N skills, canonicalized through the surface-form
/// table so abbreviations query as full concepts.
pub fn discovery_skill_terms(skills: &[String], n: usize) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for skill in skills.iter().take(n) {
        let canonical = canonicalize_skill(skill);
        // The table confirms the canonical form exists; tiny leftovers are
        // poor query tokens.
        let usable = !canonical.is_empty()
            && (canonical.len() > 2 || skill_surface_forms(&canonical).len() > 1);
        if usable && !terms.contains(&canonical) {
            terms.push(canonical);
        }
    }
    terms
}

fn quoted(term: &str) -> String {
    if term.contains(' ') {
        format!("\"{term}\"")
    } else {
        term.to_string()
    }
}

/// Normalize one query: site prefix, whitespace collapse, length clip.
fn normalize_query(core: &str) -> String {
    let collapsed = core.split_whitespace().collect::<Vec<_>>().join(" ");
    let with_prefix = if collapsed.to_lowercase().contains(SITE_PREFIX) {
        collapsed
    } else {
        format!("{SITE_PREFIX} {collapsed}")
    };
    with_prefix.chars().take(MAX_QUERY_LEN).collect()
}

fn push_query(queries: &mut Vec<String>, seen: &mut Vec<String>, core: &str, cap: usize) {
    if queries.len() >= cap {
        return;
    }
    let normalized = normalize_query(core);
    let key = normalized.to_lowercase();
    if normalized.trim() == SITE_PREFIX || seen.contains(&key) {
        return;
    }
    seen.push(key);
    queries.push(normalized);
}

/// The deterministic plan; order within each phase matters.
pub fn deterministic_plan(requirements: &JobRequirements, max_queries: usize) -> QueryPlan {
    let family = requirements.role_family.map(|f| quoted(f.search_term()));
    let title = requirements.title.as_deref().map(quoted);
    let location = requirements.location.as_deref().map(quoted);
    let skills3 = discovery_skill_terms(&requirements.top_skills, 3);
    let skills2 = discovery_skill_terms(&requirements.top_skills, 2);
    let join = |terms: &[String]| {
        terms
            .iter()
            .map(|t| quoted(t))
            .collect::<Vec<_>>()
            .join(" ")
    };

    let mut strict = Vec::new();
    let mut strict_seen = Vec::new();
    if let (Some(family), Some(location)) = (&family, &location) {
        if !skills3.is_empty() {
            push_query(
                &mut strict,
                &mut strict_seen,
                &format!("{family} {} {location}", join(&skills3)),
                max_queries,
            );
        }
        if !skills2.is_empty() {
            push_query(
                &mut strict,
                &mut strict_seen,
                &format!("{family} {} {location}", join(&skills2)),
                max_queries,
            );
        }
    }
    if let (Some(title), Some(location)) = (&title, &location) {
        push_query(
            &mut strict,
            &mut strict_seen,
            &format!("{title} {location}"),
            max_queries,
        );
    }
    if let (Some(family), Some(location)) = (&family, &location) {
        if skills3.is_empty() {
            push_query(
                &mut strict,
                &mut strict_seen,
                &format!("{family} {location}"),
                max_queries,
            );
        }
    }

    let mut fallback = Vec::new();
    let mut fallback_seen = strict_seen.clone();
    if let Some(family) = &family {
        if !skills3.is_empty() {
            push_query(
                &mut fallback,
                &mut fallback_seen,
                &format!("{family} {}", join(&skills3)),
                max_queries,
            );
        }
    }
    if let Some(title) = &title {
        push_query(&mut fallback, &mut fallback_seen, title, max_queries);
        if !skills3.is_empty() {
            push_query(
                &mut fallback,
                &mut fallback_seen,
                &format!("{title} {}", join(&skills3)),
                max_queries,
            );
        }
    }
    if !skills3.is_empty() {
        push_query(&mut fallback, &mut fallback_seen, &join(&skills3), max_queries);
    }
    if let Some(family) = &family {
        if !skills2.is_empty() {
            push_query(
                &mut fallback,
                &mut fallback_seen,
                &format!("{family} {}", join(&skills2)),
                max_queries,
            );
        }
        push_query(&mut fallback, &mut fallback_seen, family, max_queries);
    }
    if let Some(location) = &location {
        push_query(&mut fallback, &mut fallback_seen, location, max_queries);
    }

    QueryPlan { strict, fallback }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawLlmPlan {
    #[serde(default)]
    strict_queries: Vec<String>,
    #[serde(default)]
    fallback_queries: Vec<String>,
}

const PLANNER_SYSTEM: &str = "You write web search queries that surface public \
LinkedIn profiles for a recruiting search. Respond with JSON only: \
{\"strictQueries\": [...], \"fallbackQueries\": [...]}. Strict queries target \
the requested location; fallback queries drop it. At most 12 per list. Do not \
include the site: operator, it is added automatically.";

/// Plans queries per the configured mode.
pub struct QueryPlanner {
    mode: QueryGenMode,
    llm: Option<Arc<dyn StructuredLlm>>,
    timeout_ms: u64,
    max_retries: u32,
}

impl QueryPlanner {
    pub fn deterministic() -> Self {
        Self {
            mode: QueryGenMode::Deterministic,
            llm: None,
            timeout_ms: 0,
            max_retries: 0,
        }
    }

    pub fn hybrid(llm: Arc<dyn StructuredLlm>, timeout_ms: u64, max_retries: u32) -> Self {
        Self {
            mode: QueryGenMode::Hybrid,
            llm: Some(llm),
            timeout_ms,
            max_retries,
        }
    }

    pub async fn plan(&self, requirements: &JobRequirements, max_queries: usize) -> QueryPlan {
        let deterministic = deterministic_plan(requirements, max_queries);

        let llm = match (self.mode, &self.llm) {
            (QueryGenMode::Hybrid, Some(llm)) => llm,
            _ => return deterministic,
        };

        match self.llm_plan(llm.as_ref(), requirements).await {
            Ok(raw) => merge_plans(raw, &deterministic, max_queries),
            Err(err) => {
                tracing::warn!(error = %err, "Hybrid query generation failed, using deterministic plan");
                deterministic
            }
        }
    }

    async fn llm_plan(
        &self,
        llm: &dyn StructuredLlm,
        requirements: &JobRequirements,
    ) -> crate::errors::Result<RawLlmPlan> {
        let prompt = format!(
            "Role: {}\nTitle: {}\nSkills: {}\nLocation: {}",
            requirements
                .role_family
                .map(|f| f.search_term())
                .unwrap_or("(unknown)"),
            requirements.title.as_deref().unwrap_or("(none)"),
            requirements.top_skills.join(", "),
            requirements.location.as_deref().unwrap_or("(none)"),
        );
        let request = StructuredRequest::new(PLANNER_SYSTEM, prompt);
        let value = generate_with_policy(llm, &request, self.timeout_ms, self.max_retries).await?;
        Ok(serde_json::from_value(value)?)
    }
}

/// LLM queries first, deterministic appended, both phases capped; fallback
/// excludes anything already planned strict.
fn merge_plans(raw: RawLlmPlan, deterministic: &QueryPlan, max_queries: usize) -> QueryPlan {
    let mut strict = Vec::new();
    let mut strict_seen = Vec::new();
    for query in raw
        .strict_queries
        .iter()
        .take(MAX_LLM_QUERIES)
        .chain(deterministic.strict.iter())
    {
        push_query(&mut strict, &mut strict_seen, query, max_queries);
    }

    let mut fallback = Vec::new();
    let mut fallback_seen = strict_seen;
    for query in raw
        .fallback_queries
        .iter()
        .take(MAX_LLM_QUERIES)
        .chain(deterministic.fallback.iter())
    {
        push_query(&mut fallback, &mut fallback_seen, query, max_queries);
    }

    QueryPlan { strict, fallback }
}
