//! Job track classification
//!
//! Two-stage classifier: a deterministic keyword scorer resolves most
//! postings; low-confidence results fall back to an LLM behind a cache and
//! a circuit breaker. Resolution never fails - any unexpected error path
//! degrades to a low-confidence tech decision.

pub mod breaker;
pub mod cache;
pub mod deterministic;
pub mod groq;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::SourcingConfig;
use crate::llm::StructuredLlm;
use crate::requirements::{JobContext, JobRequirements};

use self::breaker::CircuitBreaker;
use self::cache::{ClassificationCache, KvStore};
use self::groq::GroqTrackClassifier;

/// Resolved job track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Track {
    Tech,
    NonTech,
    Blended,
}

impl Track {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Tech => "tech",
            Self::NonTech => "non_tech",
            Self::Blended => "blended",
        }
    }
}

impl std::fmt::Display for Track {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the final decision was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClassifierMethod {
    #[serde(rename = "deterministic")]
    Deterministic,
    #[serde(rename = "groq")]
    Groq,
    #[serde(rename = "deterministic+groq")]
    DeterministicGroq,
}

/// Raw evidence from the deterministic scorer, kept for telemetry even when
/// an explicit hint decides the track.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeterministicSignals {
    pub matched_tech_keywords: Vec<String>,
    pub matched_non_tech_keywords: Vec<String>,
    pub strong_tech_count: usize,
    pub strong_non_tech_count: usize,
    pub role_family_signal: Option<String>,
    pub tech_raw: f64,
    pub non_tech_raw: f64,
    pub tech_score: f64,
    pub non_tech_score: f64,
    pub margin: f64,
}

/// The LLM sub-result, when consulted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroqOutcome {
    pub track: Track,
    pub confidence: f64,
    pub reasons: Vec<String>,
    pub ambiguity_flag: bool,
    pub cached: bool,
}

/// The resolved classification stored in request diagnostics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackDecision {
    pub track: Track,
    pub confidence: f64,
    pub method: ClassifierMethod,
    pub classifier_version: String,
    pub signals: DeterministicSignals,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub groq: Option<GroqOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint_used: Option<String>,
    pub resolved_at: DateTime<Utc>,
}

impl TrackDecision {
    /// The degraded decision used when anything unexpected goes wrong.
    pub fn fallback(version: &str) -> Self {
        Self {
            track: Track::Tech,
            confidence: 0.30,
            method: ClassifierMethod::Deterministic,
            classifier_version: version.to_string(),
            signals: DeterministicSignals::default(),
            groq: None,
            hint_used: None,
            resolved_at: Utc::now(),
        }
    }
}

/// Explicit caller hint on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TrackHint {
    Tech,
    NonTech,
    Auto,
}

fn parse_hint(raw: Option<&str>) -> TrackHint {
    match raw.map(|h| h.trim().to_lowercase()) {
        Some(h) if h == "tech" => TrackHint::Tech,
        Some(h) if h == "non_tech" || h == "non-tech" => TrackHint::NonTech,
        _ => TrackHint::Auto,
    }
}

/// Resolves the track for a job context. Construction wires the optional
/// LLM fallback; without it the resolver is purely deterministic.
pub struct TrackResolver {
    config: SourcingConfig,
    cache: Option<ClassificationCache>,
    breaker: Option<CircuitBreaker>,
    classifier: Option<GroqTrackClassifier>,
}

impl TrackResolver {
    pub fn new(config: SourcingConfig) -> Self {
        Self {
            config,
            cache: None,
            breaker: None,
            classifier: None,
        }
    }

    /// Enable the LLM fallback, with its cache and breaker on the given KV.
    pub fn with_groq(mut self, llm: Arc<dyn StructuredLlm>, kv: Arc<dyn KvStore>) -> Self {
        self.cache = Some(ClassificationCache::new(
            kv.clone(),
            self.config.track_classifier_version.clone(),
            self.config.track_groq_cache_ttl_days,
        ));
        self.breaker = Some(CircuitBreaker::new(
            kv,
            self.config.track_cb_threshold,
            self.config.track_cb_window_sec,
            self.config.track_cb_cooldown_sec,
        ));
        self.classifier = Some(GroqTrackClassifier::new(
            llm,
            self.config.track_groq_timeout_ms,
            self.config.track_groq_max_retries,
        ));
        self
    }

    /// Resolve the track. Infallible: every failure path degrades to the
    /// deterministic result or, at worst, the low-confidence fallback.
    pub async fn resolve(
        &self,
        ctx: &JobContext,
        requirements: &JobRequirements,
        hint: Option<&str>,
    ) -> TrackDecision {
        let version = self.config.track_classifier_version.clone();
        let (det_track, det_confidence, signals) =
            deterministic::score(ctx, requirements, self.config.track_blend_threshold);

        // Explicit hints win outright; signals are still recorded.
        match parse_hint(hint) {
            TrackHint::Tech => {
                return TrackDecision {
                    track: Track::Tech,
                    confidence: 1.0,
                    method: ClassifierMethod::Deterministic,
                    classifier_version: version,
                    signals,
                    groq: None,
                    hint_used: Some("tech".to_string()),
                    resolved_at: Utc::now(),
                }
            }
            TrackHint::NonTech => {
                return TrackDecision {
                    track: Track::NonTech,
                    confidence: 1.0,
                    method: ClassifierMethod::Deterministic,
                    classifier_version: version,
                    signals,
                    groq: None,
                    hint_used: Some("non_tech".to_string()),
                    resolved_at: Utc::now(),
                }
            }
            TrackHint::Auto => {}
        }

        let mut decision = TrackDecision {
            track: det_track,
            confidence: det_confidence,
            method: ClassifierMethod::Deterministic,
            classifier_version: version,
            signals,
            groq: None,
            hint_used: None,
            resolved_at: Utc::now(),
        };

        let wants_fallback = self.config.track_groq_enabled
            && decision.confidence < self.config.track_low_conf_threshold;
        if !wants_fallback {
            return decision;
        }
        let Some(classifier) = &self.classifier else {
            return decision;
        };

        let outcome = match self.lookup_or_classify(ctx, classifier).await {
            Some(outcome) => outcome,
            None => return decision,
        };

        let (merged_track, merged_confidence) = merge(
            decision.track,
            decision.confidence,
            decision.signals.margin,
            &outcome,
        );
        decision.track = merged_track;
        decision.confidence = merged_confidence.clamp(0.0, 1.0);
        decision.method = ClassifierMethod::DeterministicGroq;
        decision.groq = Some(outcome);
        decision
    }

    async fn lookup_or_classify(
        &self,
        ctx: &JobContext,
        classifier: &GroqTrackClassifier,
    ) -> Option<GroqOutcome> {
        if let Some(cache) = &self.cache {
            if let Some(mut hit) = cache.get(ctx).await {
                hit.cached = true;
                return Some(hit);
            }
        }

        if let Some(breaker) = &self.breaker {
            if breaker.is_open().await {
                tracing::debug!("Classifier breaker open, staying deterministic");
                return None;
            }
        }

        match classifier.classify(ctx).await {
            Ok(outcome) => {
                if let Some(cache) = &self.cache {
                    cache.put(ctx, &outcome).await;
                }
                Some(outcome)
            }
            Err(err) => {
                tracing::warn!(error = %err, "LLM track classification failed");
                if let Some(breaker) = &self.breaker {
                    breaker.record_failure().await;
                }
                None
            }
        }
    }
}

/// Merge the LLM result onto the deterministic one. Disagreement with a
/// deterministic leaning never flips the track - it blends.
fn merge(
    det_track: Track,
    det_confidence: f64,
    det_margin: f64,
    g: &GroqOutcome,
) -> (Track, f64) {
    let leaning = match det_track {
        Track::Blended => None,
        t => Some(t),
    };

    match leaning {
        Some(t) if g.track == t && g.confidence >= 0.60 => (t, det_confidence.max(g.confidence)),
        None if g.confidence >= 0.80 => (g.track, g.confidence),
        Some(t) if g.track != t => (Track::Blended, 0.5 + det_margin),
        _ => (det_track, det_confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourcingError;
    use crate::llm::testing::FakeLlm;
    use crate::track::cache::MemoryKv;

    fn tech_ctx() -> (JobContext, JobRequirements) {
        let ctx = JobContext {
            jd_digest: "Build and maintain scalable microservices".to_string(),
            title: Some("Senior Backend Engineer".to_string()),
            skills: vec!["python".into(), "kubernetes".into(), "postgresql".into()],
            ..JobContext::default()
        };
        let req = JobRequirements::build(&ctx);
        (ctx, req)
    }

    fn vague_ctx() -> (JobContext, JobRequirements) {
        let ctx = JobContext {
            jd_digest: "Help the team succeed".to_string(),
            title: Some("Generalist".to_string()),
            ..JobContext::default()
        };
        let req = JobRequirements::build(&ctx);
        (ctx, req)
    }

    #[tokio::test]
    async fn test_explicit_hint_short_circuits() {
        let resolver = TrackResolver::new(SourcingConfig::default());
        let (ctx, req) = tech_ctx();
        let decision = resolver.resolve(&ctx, &req, Some("non_tech")).await;
        assert_eq!(decision.track, Track::NonTech);
        assert_eq!(decision.confidence, 1.0);
        assert_eq!(decision.method, ClassifierMethod::Deterministic);
        assert_eq!(decision.hint_used.as_deref(), Some("non_tech"));
        // Deterministic signals are still computed for telemetry.
        assert!(!decision.signals.matched_tech_keywords.is_empty());
    }

    #[tokio::test]
    async fn test_auto_hint_proceeds_deterministically() {
        let resolver = TrackResolver::new(SourcingConfig::default());
        let (ctx, req) = tech_ctx();
        let decision = resolver.resolve(&ctx, &req, Some("auto")).await;
        assert_eq!(decision.track, Track::Tech);
        assert!(decision.confidence >= 0.85);
        assert!(decision.hint_used.is_none());
    }

    #[tokio::test]
    async fn test_confident_deterministic_skips_llm() {
        let llm = Arc::new(FakeLlm::returning(vec![]));
        let resolver = TrackResolver::new(SourcingConfig::default())
            .with_groq(llm.clone(), Arc::new(MemoryKv::new()));
        let (ctx, req) = tech_ctx();
        let decision = resolver.resolve(&ctx, &req, None).await;
        assert_eq!(decision.method, ClassifierMethod::Deterministic);
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_merge_agreement_takes_max_confidence() {
        let llm = Arc::new(FakeLlm::returning(vec![Ok(serde_json::json!({
            "track": "tech", "confidence": 0.85, "reasons": [], "ambiguityFlag": false
        }))]));
        let resolver =
            TrackResolver::new(SourcingConfig::default()).with_groq(llm, Arc::new(MemoryKv::new()));
        let (ctx, req) = vague_ctx();
        let decision = resolver.resolve(&ctx, &req, None).await;
        // Deterministic leaned tech at 0.30; agreement adopts the higher confidence.
        assert_eq!(decision.track, Track::Tech);
        assert_eq!(decision.confidence, 0.85);
        assert_eq!(decision.method, ClassifierMethod::DeterministicGroq);
        assert!(decision.groq.is_some());
    }

    #[tokio::test]
    async fn test_merge_disagreement_blends() {
        let llm = Arc::new(FakeLlm::returning(vec![Ok(serde_json::json!({
            "track": "non_tech", "confidence": 0.95, "reasons": [], "ambiguityFlag": false
        }))]));
        let resolver =
            TrackResolver::new(SourcingConfig::default()).with_groq(llm, Arc::new(MemoryKv::new()));
        let (ctx, req) = vague_ctx();
        let decision = resolver.resolve(&ctx, &req, None).await;
        assert_eq!(decision.track, Track::Blended);
    }

    #[tokio::test]
    async fn test_llm_failure_keeps_deterministic() {
        let llm = Arc::new(FakeLlm::returning(vec![
            Err(SourcingError::Llm("down".to_string())),
            Err(SourcingError::Llm("down".to_string())),
        ]));
        let resolver =
            TrackResolver::new(SourcingConfig::default()).with_groq(llm, Arc::new(MemoryKv::new()));
        let (ctx, req) = vague_ctx();
        let decision = resolver.resolve(&ctx, &req, None).await;
        assert_eq!(decision.track, Track::Tech);
        assert_eq!(decision.confidence, 0.30);
        assert_eq!(decision.method, ClassifierMethod::Deterministic);
    }

    #[tokio::test]
    async fn test_cache_hit_marks_cached_and_skips_call() {
        let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());
        let llm = Arc::new(FakeLlm::returning(vec![Ok(serde_json::json!({
            "track": "tech", "confidence": 0.9, "reasons": [], "ambiguityFlag": false
        }))]));
        let resolver = TrackResolver::new(SourcingConfig::default())
            .with_groq(llm.clone(), kv.clone());
        let (ctx, req) = vague_ctx();

        let first = resolver.resolve(&ctx, &req, None).await;
        assert!(!first.groq.as_ref().unwrap().cached);
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 1);

        let second = resolver.resolve(&ctx, &req, None).await;
        assert!(second.groq.as_ref().unwrap().cached);
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_open_breaker_skips_provider() {
        let kv: Arc<MemoryKv> = Arc::new(MemoryKv::new());
        let config = SourcingConfig {
            track_cb_threshold: 1,
            ..SourcingConfig::default()
        };
        let llm = Arc::new(FakeLlm::returning(vec![
            Err(SourcingError::Llm("down".to_string())),
            Err(SourcingError::Llm("down".to_string())),
            Ok(serde_json::json!({"track": "tech", "confidence": 0.9})),
        ]));
        let resolver = TrackResolver::new(config).with_groq(llm.clone(), kv);
        let (ctx, req) = vague_ctx();

        // First resolve fails (retry included) and trips the breaker.
        resolver.resolve(&ctx, &req, None).await;
        let calls_after_trip = llm.calls.load(std::sync::atomic::Ordering::SeqCst);

        // Second resolve must not touch the provider.
        let decision = resolver.resolve(&ctx, &req, None).await;
        assert_eq!(decision.method, ClassifierMethod::Deterministic);
        assert_eq!(llm.calls.load(std::sync::atomic::Ordering::SeqCst), calls_after_trip);
    }

    #[test]
    fn test_fallback_decision_shape() {
        let decision = TrackDecision::fallback("v3");
        assert_eq!(decision.track, Track::Tech);
        assert_eq!(decision.confidence, 0.30);
        assert_eq!(decision.method, ClassifierMethod::Deterministic);
        assert!(decision.signals.matched_tech_keywords.is_empty());
    }

    #[test]
    fn test_confidence_always_in_unit_interval() {
        let outcome = GroqOutcome {
            track: Track::Tech,
            confidence: 0.99,
            reasons: vec![],
            ambiguity_flag: false,
            cached: false,
        };
        let (_, confidence) = merge(Track::Tech, 0.7, 0.9, &outcome);
        assert!((0.0..=1.0).contains(&confidence));
    }
}
