//! LLM classification fallback
//!
//! Consulted only when the deterministic scorer is unsure. The model is
//! constrained to `tech` or `non_tech` (never `blended`) so disagreement
//! handling stays in the merge rules, not the prompt.

use serde::Deserialize;

use crate::errors::{Result, SourcingError};
use crate::llm::{generate_with_policy, StructuredLlm, StructuredRequest};
use crate::requirements::JobContext;
use crate::track::{GroqOutcome, Track};

const SYSTEM_PROMPT: &str = "You classify job postings for a recruiting pipeline. \
Decide whether the role is primarily a technology role (software, data, infrastructure) \
or a non-technology role (sales, marketing, operations, HR, finance). \
Respond with JSON only: {\"track\": \"tech\" | \"non_tech\", \"confidence\": 0.0-1.0, \
\"reasons\": [up to 5 short strings], \"ambiguityFlag\": boolean}. \
Never invent a third category.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClassification {
    track: String,
    confidence: f64,
    #[serde(default)]
    reasons: Vec<String>,
    #[serde(default)]
    ambiguity_flag: bool,
}

pub struct GroqTrackClassifier {
    llm: std::sync::Arc<dyn StructuredLlm>,
    timeout_ms: u64,
    max_retries: u32,
}

impl GroqTrackClassifier {
    pub fn new(llm: std::sync::Arc<dyn StructuredLlm>, timeout_ms: u64, max_retries: u32) -> Self {
        Self {
            llm,
            timeout_ms,
            max_retries,
        }
    }

    pub async fn classify(&self, ctx: &JobContext) -> Result<GroqOutcome> {
        let digest_clip: String = ctx.jd_digest.chars().take(800).collect();
        let prompt = format!(
            "Title: {}\nSkills: {}\nGood-to-have: {}\nSummary: {}",
            ctx.title.as_deref().unwrap_or("(none)"),
            ctx.skills.join(", "),
            ctx.good_to_have_skills.join(", "),
            digest_clip,
        );

        let request = StructuredRequest::new(SYSTEM_PROMPT, prompt);
        let value =
            generate_with_policy(self.llm.as_ref(), &request, self.timeout_ms, self.max_retries)
                .await?;

        let raw: RawClassification = serde_json::from_value(value)
            .map_err(|e| SourcingError::Llm(format!("malformed classification: {e}")))?;

        let track = match raw.track.trim().to_lowercase().as_str() {
            "tech" => Track::Tech,
            "non_tech" | "non-tech" | "nontech" => Track::NonTech,
            other => {
                return Err(SourcingError::Llm(format!(
                    "classifier returned unsupported track '{other}'"
                )))
            }
        };

        let mut reasons = raw.reasons;
        reasons.truncate(5);

        Ok(GroqOutcome {
            track,
            confidence: raw.confidence.clamp(0.0, 1.0),
            reasons,
            ambiguity_flag: raw.ambiguity_flag,
            cached: false,
        })
    }
}
