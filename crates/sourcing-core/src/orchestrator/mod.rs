//! Sourcing orchestrator
//!
//! Runs one sourcing request end to end: load and rank the tenant pool,
//! guard by country, assess quality, discover when warranted (under the
//! daily budget), assemble the two-tier output, persist it atomically, and
//! enqueue enrichment. Every stage leaves a trace in the returned result,
//! which becomes the request's diagnostics.

pub mod assembly;
pub mod enrich;
pub mod quality;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::budget::{BudgetGuard, DailyCounter};
use crate::config::{QueryGenMode, SourcingConfig};
use crate::discovery::{AdaptiveSettings, DiscoveryRunner, QueryPlanner, StoppedReason};
use crate::errors::Result;
use crate::geo;
use crate::hints;
use crate::llm::StructuredLlm;
use crate::ranker::{self, MatchTier, RankOptions, ScoredCandidate};
use crate::requirements::{JobContext, JobRequirements};
use crate::serp::SerpProvider;
use crate::store::models::{
    select_snapshot, snapshot_track_filter, Candidate, EnrichmentStatus, NewSourcingCandidate,
    PoolCandidate, SourceType, StoredFitBreakdown,
};
use crate::store::{
    CandidateStore, EnrichmentSessions, NoveltyStore, OutputStore, TelemetryStore,
};
use crate::track::TrackDecision;

use self::assembly::{assemble, suppress_novelty, AssembledRow, AssemblyOptions, RowOrigin};
use self::enrich::{enqueue_enrichment, serp_meta_country, EnrichStats};
use self::quality::QualityAssessment;

/// Pool rows considered per run.
const POOL_LIMIT: usize = 5000;

/// Everything a run observed, persisted into request diagnostics.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrchestratorResult {
    pub result_count: usize,
    pub queries_executed: usize,
    pub pool_size: usize,
    pub track_filter: Vec<String>,
    pub quality: QualityAssessment,
    pub quality_gate_triggered: bool,
    pub discovery_target: usize,
    pub discovery_reason: Option<String>,
    pub discovered_count: usize,
    pub promotion_qualified_count: usize,
    pub discovered_in_output: usize,
    pub discovery_stopped_reason: Option<String>,
    pub strict_shifted_early: bool,
    pub budget_skipped_reason: Option<String>,
    pub budget_reserved: usize,
    pub country_guard_dropped_count: usize,
    pub country_guard_serp_locale_skipped_count: usize,
    pub strict_demoted_count: usize,
    pub demoted_strict_with_city_match: usize,
    pub strict_rescued_count: usize,
    pub expansion_reason: Option<String>,
    pub novelty_suppressed_count: usize,
    pub enrich: EnrichStats,
}

pub struct Orchestrator {
    config: SourcingConfig,
    candidates: Arc<dyn CandidateStore>,
    outputs: Arc<dyn OutputStore>,
    sessions: Arc<dyn EnrichmentSessions>,
    novelty: Arc<dyn NoveltyStore>,
    planner: QueryPlanner,
    runner: DiscoveryRunner,
    budget: BudgetGuard,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: SourcingConfig,
        candidates: Arc<dyn CandidateStore>,
        outputs: Arc<dyn OutputStore>,
        sessions: Arc<dyn EnrichmentSessions>,
        novelty: Arc<dyn NoveltyStore>,
        telemetry: Arc<dyn TelemetryStore>,
        serp: Arc<dyn SerpProvider>,
        counter: Arc<dyn DailyCounter>,
        llm: Option<Arc<dyn StructuredLlm>>,
    ) -> Self {
        let planner = match (config.query_gen_mode, llm) {
            (QueryGenMode::Hybrid, Some(llm)) => QueryPlanner::hybrid(
                llm,
                config.query_groq_timeout_ms,
                config.query_groq_max_retries,
            ),
            _ => QueryPlanner::deterministic(),
        };
        let runner = DiscoveryRunner::new(
            serp,
            candidates.clone(),
            telemetry,
            AdaptiveSettings {
                min_strict_attempts: config.adaptive_min_strict_attempts,
                strict_min_yield: config.adaptive_strict_min_yield,
                min_fallback_attempts: config.adaptive_min_fallback_attempts,
                fallback_min_yield: config.adaptive_fallback_min_yield,
            },
        );
        let budget = BudgetGuard::new(counter, config.daily_serp_cap_per_tenant);
        Self {
            config,
            candidates,
            outputs,
            sessions,
            novelty,
            planner,
            runner,
            budget,
        }
    }

    /// Run the full pipeline for one request.
    #[instrument(skip(self, ctx, decision), fields(request_id = %request_id, tenant_id = %tenant_id))]
    pub async fn run(
        &self,
        request_id: Uuid,
        tenant_id: &str,
        ctx: &JobContext,
        decision: &TrackDecision,
    ) -> Result<OrchestratorResult> {
        let mut result = OrchestratorResult::default();
        let filter = snapshot_track_filter(decision.track);
        result.track_filter = filter.iter().map(|t| t.to_string()).collect();

        let requirements = JobRequirements::build(ctx);
        let has_location = requirements.has_location_constraint();
        let target_country = requirements
            .location
            .as_deref()
            .map(geo::canonicalize_location)
            .and_then(|c| geo::country_code_for(&c));

        // 1-3. Pool load and ranking.
        let pool = self
            .candidates
            .load_pool(tenant_id, &filter, POOL_LIMIT)
            .await?;
        result.pool_size = pool.len();

        let mut by_id: HashMap<Uuid, Candidate> = pool
            .iter()
            .map(|p| (p.candidate.id, p.candidate.clone()))
            .collect();
        let best_location: HashMap<Uuid, Option<String>> = pool
            .iter()
            .map(|p| {
                (
                    p.candidate.id,
                    p.rank_input(&filter).best_location().map(str::to_string),
                )
            })
            .collect();
        let snapshot_backed: HashSet<Uuid> = pool
            .iter()
            .filter(|p| select_snapshot(&p.snapshots, &filter).is_some())
            .map(|p| p.candidate.id)
            .collect();

        let rank_options = RankOptions {
            fit_score_epsilon: self.config.fit_score_epsilon,
            location_boost_weight: self.config.location_boost_weight,
        };
        let inputs: Vec<ranker::RankInput> =
            pool.iter().map(|p| p.rank_input(&filter)).collect();
        let mut scored = ranker::rank(&inputs, &requirements, &rank_options);

        // 4. Country guard.
        if self.config.country_guard_enabled {
            if let Some(target) = target_country {
                let before = scored.len();
                scored.retain(|s| {
                    self.country_guard_keeps(s.candidate_id, target, &by_id, &best_location, &mut result)
                });
                result.country_guard_dropped_count = before - scored.len();
            }
        }

        // 5. Quality gate.
        let coverage = location_hint_coverage(&scored, &best_location);
        let assessment = quality::assess(&scored, coverage, has_location, &self.config);
        result.quality_gate_triggered = assessment.triggered;
        let strict_pool_count = scored
            .iter()
            .filter(|s| s.match_tier == MatchTier::Strict)
            .count();

        // 6. Discovery sizing.
        let (discovery_target, discovery_reason) = quality::discovery_target(
            scored.len(),
            strict_pool_count,
            assessment.triggered,
            has_location,
            &self.config,
        );
        result.discovery_target = discovery_target;
        result.discovery_reason = discovery_reason.map(|r| r.as_str().to_string());
        result.quality = assessment;

        // 7. Discovery under budget.
        let mut discovered: Vec<Candidate> = Vec::new();
        if discovery_target > 0 {
            let plan = self
                .planner
                .plan(&requirements, self.config.max_serp_queries)
                .await;
            if plan.is_empty() {
                result.discovery_stopped_reason =
                    Some(StoppedReason::NoQueries.as_str().to_string());
            } else {
                let want = if result.quality_gate_triggered {
                    self.config.max_serp_queries * self.config.dynamic_query_multiplier
                } else {
                    self.config.max_serp_queries
                };
                let reservation = self.budget.reserve(tenant_id, want.min(plan.total())).await;
                result.budget_skipped_reason =
                    reservation.skipped_reason.map(|r| r.as_str().to_string());
                result.budget_reserved = reservation.reserved_queries;

                if reservation.allowed {
                    let outcome = self
                        .runner
                        .run(
                            request_id,
                            tenant_id,
                            &plan,
                            reservation.max_queries,
                            discovery_target,
                        )
                        .await?;
                    self.budget.release(&reservation, outcome.queries_executed).await;

                    result.queries_executed = outcome.queries_executed;
                    result.strict_shifted_early = outcome.strict_shifted_early;
                    result.discovery_stopped_reason =
                        outcome.stopped_reason.map(|r| r.as_str().to_string());
                    discovered = outcome.discovered;
                }
            }
        }
        result.discovered_count = discovered.len();
        for candidate in &discovered {
            by_id.insert(candidate.id, candidate.clone());
        }

        // 8. Score discoveries and mark promotion qualification.
        let discovered_pool: Vec<PoolCandidate> = discovered
            .iter()
            .map(|candidate| PoolCandidate {
                candidate: candidate.clone(),
                snapshots: Vec::new(),
            })
            .collect();
        let discovered_inputs: Vec<ranker::RankInput> = discovered_pool
            .iter()
            .map(|p| p.rank_input(&filter))
            .collect();
        let discovered_scored = ranker::rank(&discovered_inputs, &requirements, &rank_options);
        let promotion_qualified: HashSet<Uuid> = discovered_scored
            .iter()
            .filter(|s| !has_location || s.match_tier == MatchTier::Strict)
            .filter(|s| s.fit_score >= self.config.discovered_promotion_min_fit_score)
            .map(|s| s.candidate_id)
            .collect();
        result.promotion_qualified_count = promotion_qualified.len();

        // 9. Assembly and novelty suppression.
        let assembly_options = AssemblyOptions {
            target_count: self.config.target_count,
            min_discovered_in_output: self.config.min_discovered_in_output,
            best_matches_min_fit_score: self.config.best_matches_min_fit_score,
            strict_rescue_count: self.config.strict_rescue_count,
            strict_rescue_min_fit_score: self.config.strict_rescue_min_fit_score,
            fit_score_epsilon: self.config.fit_score_epsilon,
        };
        let mut assembled = assemble(
            &scored,
            &discovered_scored,
            &promotion_qualified,
            &assembly_options,
        );

        if self.config.novelty_enabled {
            if let (Some(family), Some(city)) = (
                requirements.role_family,
                requirements.location.as_deref().and_then(geo::primary_city),
            ) {
                match self
                    .novelty
                    .recently_exposed(
                        tenant_id,
                        family.as_str(),
                        &city,
                        self.config.novelty_window_days,
                    )
                    .await
                {
                    Ok(exposed) => suppress_novelty(
                        &mut assembled,
                        &exposed,
                        &scored,
                        &discovered_scored,
                        &assembly_options,
                    ),
                    Err(err) => {
                        warn!(error = %err, "Novelty lookup failed, skipping suppression");
                    }
                }
            }
        }
        result.strict_demoted_count = assembled.stats.strict_demoted_count;
        result.demoted_strict_with_city_match = assembled.stats.demoted_strict_with_city_match;
        result.strict_rescued_count = assembled.stats.strict_rescued_count;
        result.expansion_reason = assembled.stats.expansion_reason.map(str::to_string);
        result.novelty_suppressed_count = assembled.stats.novelty_suppressed_count;
        result.discovered_in_output = assembled.stats.discovered_in_output;

        // 10. Persist atomically with contiguous ranks.
        let rows = to_rows(&assembled.rows, &by_id, &snapshot_backed);
        self.outputs.replace_for_request(request_id, &rows).await?;
        result.result_count = rows.len();

        // 11. Enrichment enqueue.
        let placed: HashSet<Uuid> = assembled
            .rows
            .iter()
            .map(|r| r.score.candidate_id)
            .collect();
        let orphans: Vec<Candidate> = discovered
            .iter()
            .filter(|c| !placed.contains(&c.id))
            .cloned()
            .collect();
        let now = Utc::now();
        let stale_horizon = now - chrono::Duration::days(self.config.snapshot_stale_days);
        let stale_ids: Vec<Uuid> = pool
            .iter()
            .filter_map(|p| {
                select_snapshot(&p.snapshots, &filter)
                    .filter(|s| s.stale_after < now || s.computed_at < stale_horizon)
                    .map(|_| p.candidate.id)
            })
            .collect();
        result.enrich = enqueue_enrichment(
            &self.sessions,
            tenant_id,
            &assembled.rows,
            &by_id,
            &orphans,
            &stale_ids,
            target_country,
            &self.config,
        )
        .await?;

        info!(
            result_count = result.result_count,
            queries_executed = result.queries_executed,
            discovered = result.discovered_count,
            quality_gate = result.quality_gate_triggered,
            "Sourcing run assembled"
        );
        Ok(result)
    }

    /// Country-guard retention rule for one scored pool candidate.
    fn country_guard_keeps(
        &self,
        candidate_id: Uuid,
        target_country: &str,
        by_id: &HashMap<Uuid, Candidate>,
        best_location: &HashMap<Uuid, Option<String>>,
        result: &mut OrchestratorResult,
    ) -> bool {
        let location = best_location.get(&candidate_id).and_then(|l| l.as_deref());
        if let Some(location) = location {
            return match geo::country_code_for(&geo::canonicalize_location(location)) {
                Some(code) => code == target_country,
                // A location that names no known country stays in.
                None => true,
            };
        }

        // No location at all: the capture locale is a weaker signal.
        let Some(candidate) = by_id.get(&candidate_id) else {
            return true;
        };
        match serp_meta_country(candidate) {
            Some(code) if self.config.country_guard_serp_locale_enabled => code == target_country,
            Some(_) => {
                result.country_guard_serp_locale_skipped_count += 1;
                true
            }
            // Neither location nor locale: keep.
            None => true,
        }
    }
}

fn location_hint_coverage(
    scored: &[ScoredCandidate],
    best_location: &HashMap<Uuid, Option<String>>,
) -> f64 {
    if scored.is_empty() {
        return 0.0;
    }
    let with_location = scored
        .iter()
        .filter(|s| {
            best_location
                .get(&s.candidate_id)
                .and_then(|l| l.as_deref())
                .is_some_and(hints::is_likely_location_hint)
        })
        .count();
    with_location as f64 / scored.len() as f64
}

fn to_rows(
    assembled: &[AssembledRow],
    by_id: &HashMap<Uuid, Candidate>,
    snapshot_backed: &HashSet<Uuid>,
) -> Vec<NewSourcingCandidate> {
    assembled
        .iter()
        .map(|row| {
            let candidate_id = row.score.candidate_id;
            let source_type = match row.origin {
                RowOrigin::Discovered => SourceType::Discovered,
                RowOrigin::Pool if snapshot_backed.contains(&candidate_id) => {
                    SourceType::PoolEnriched
                }
                RowOrigin::Pool => SourceType::Pool,
            };
            NewSourcingCandidate {
                candidate_id,
                fit_score: row.score.fit_score,
                fit_breakdown: StoredFitBreakdown {
                    components: row.score.breakdown.clone(),
                    match_tier: row.score.match_tier,
                    location_match_type: row.score.location_match,
                    data_confidence: row.score.data_confidence,
                },
                source_type,
                enrichment_status: by_id
                    .get(&candidate_id)
                    .map(|c| c.enrichment_status)
                    .unwrap_or(EnrichmentStatus::Pending),
            }
        })
        .collect()
}
