//! Post-enrichment rerank
//!
//! When enrichment completes for a candidate, every completed request
//! containing that candidate gets a delayed rerank job. Scheduling dedupes
//! on the job id so bursts of completions coalesce into one recompute; the
//! worker recomputes the full ranking from scratch, so running once or five
//! times lands on the same ordering.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::diagnostics::Diagnostics;
use crate::errors::{Result, SourcingError};
use crate::queue::{AddOptions, JobQueue, JobState};
use crate::ranker::{self, MatchTier, ScoredCandidate};
use crate::requirements::{JobContext, JobRequirements};
use crate::store::models::{
    snapshot_track_filter, RequestStatus, RerankUpdate, StoredFitBreakdown,
};
use crate::store::{CandidateStore, OutputStore, RequestStore};
use crate::track::Track;

pub fn rerank_job_id(request_id: Uuid) -> String {
    format!("rerank:{request_id}")
}

/// Payload carried by rerank jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RerankJob {
    pub request_id: Uuid,
}

/// Schedules deduped, delayed rerank jobs.
pub struct RerankScheduler {
    queue: Arc<dyn JobQueue>,
    outputs: Arc<dyn OutputStore>,
    delay: Duration,
    enabled: bool,
}

impl RerankScheduler {
    pub fn new(
        queue: Arc<dyn JobQueue>,
        outputs: Arc<dyn OutputStore>,
        delay_ms: u64,
        enabled: bool,
    ) -> Self {
        Self {
            queue,
            outputs,
            delay: Duration::from_millis(delay_ms),
            enabled,
        }
    }

    /// Entry point for enrichment-completion notifications. Returns how
    /// many rerank jobs were newly scheduled.
    pub async fn on_enrichment_completed(
        &self,
        tenant_id: &str,
        candidate_id: Uuid,
    ) -> Result<usize> {
        if !self.enabled {
            return Ok(0);
        }
        let requests = self
            .outputs
            .requests_containing(tenant_id, candidate_id, RequestStatus::Complete)
            .await?;

        let mut scheduled = 0usize;
        for request_id in requests {
            if self.schedule(request_id).await? {
                scheduled += 1;
            }
        }
        Ok(scheduled)
    }

    /// Schedule one request's rerank, deduped against live jobs.
    pub async fn schedule(&self, request_id: Uuid) -> Result<bool> {
        let job_id = rerank_job_id(request_id);

        match self.queue.get_state(&job_id).await? {
            // A live job will observe this completion too.
            Some(JobState::Waiting) | Some(JobState::Delayed) | Some(JobState::Active) => {
                return Ok(false)
            }
            Some(JobState::Completed) | Some(JobState::Failed) => {
                self.queue.remove(&job_id).await?;
            }
            None => {}
        }

        let payload = serde_json::to_value(RerankJob { request_id })?;
        match self
            .queue
            .add(&job_id, payload, AddOptions::rerank(self.delay))
            .await
        {
            Ok(()) => Ok(true),
            // A concurrent notifier won the add race; coalescing is the point.
            Err(SourcingError::Queue(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }
}

/// Result of one rerank execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RerankOutcome {
    /// Rows updated in rank order.
    Updated { rows: usize },
    /// Request missing, not complete, or carrying an unusable context.
    Skipped(&'static str),
}

/// Idempotent rerank executor.
pub struct RerankExecutor {
    requests: Arc<dyn RequestStore>,
    outputs: Arc<dyn OutputStore>,
    candidates: Arc<dyn CandidateStore>,
    fit_score_epsilon: f64,
}

impl RerankExecutor {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        outputs: Arc<dyn OutputStore>,
        candidates: Arc<dyn CandidateStore>,
        fit_score_epsilon: f64,
    ) -> Self {
        Self {
            requests,
            outputs,
            candidates,
            fit_score_epsilon,
        }
    }

    pub async fn rerank(&self, request_id: Uuid) -> Result<RerankOutcome> {
        let Some(request) = self.requests.get(request_id).await? else {
            return Ok(RerankOutcome::Skipped("request_not_found"));
        };
        if request.status != RequestStatus::Complete {
            return Ok(RerankOutcome::Skipped("not_complete"));
        }
        let Ok(ctx) = serde_json::from_value::<JobContext>(request.job_context.clone()) else {
            return Ok(RerankOutcome::Skipped("invalid_job_context"));
        };
        if !ctx.is_usable() {
            return Ok(RerankOutcome::Skipped("invalid_job_context"));
        }

        let rows = self.outputs.list_for_request(request_id).await?;
        if rows.is_empty() {
            return Ok(RerankOutcome::Skipped("no_rows"));
        }

        // The persisted track decision pins the snapshot filter.
        let track = Diagnostics::from_value(request.diagnostics.as_ref())
            .track_decision
            .map(|d| d.track)
            .unwrap_or(Track::Tech);
        let filter = snapshot_track_filter(track);

        let candidate_ids: Vec<Uuid> = rows.iter().map(|r| r.candidate_id).collect();
        let pool = self
            .candidates
            .load_with_snapshots(&request.tenant_id, &candidate_ids, &filter)
            .await?;

        let requirements = JobRequirements::build(&ctx);
        let now = Utc::now();

        let mut scored: std::collections::HashMap<Uuid, ScoredCandidate> = pool
            .iter()
            .map(|p| {
                (
                    p.candidate.id,
                    ranker::score_one(&p.rank_input(&filter), &requirements, now),
                )
            })
            .collect();
        let enrichment: std::collections::HashMap<Uuid, _> = pool
            .iter()
            .map(|p| (p.candidate.id, p.candidate.enrichment_status))
            .collect();

        // Order rows: strict tier strictly before expanded, then the fit
        // comparator. Rows whose candidate vanished keep their stored data.
        let mut ordered: Vec<(ScoredCandidate, &crate::store::models::SourcingCandidateRow)> =
            rows.iter()
                .map(|row| {
                    let score = scored
                        .remove(&row.candidate_id)
                        .unwrap_or_else(|| stored_score(row));
                    (score, row)
                })
                .collect();
        ordered.sort_by(|(a, _), (b, _)| {
            tier_order(a.match_tier)
                .cmp(&tier_order(b.match_tier))
                .then_with(|| ranker::compare_fit_with_confidence(a, b, self.fit_score_epsilon))
        });

        let updates: Vec<RerankUpdate> = ordered
            .iter()
            .enumerate()
            .map(|(index, (score, row))| RerankUpdate {
                candidate_id: score.candidate_id,
                fit_score: score.fit_score,
                fit_breakdown: StoredFitBreakdown {
                    components: score.breakdown.clone(),
                    match_tier: score.match_tier,
                    location_match_type: score.location_match,
                    data_confidence: score.data_confidence,
                },
                enrichment_status: enrichment
                    .get(&score.candidate_id)
                    .copied()
                    .unwrap_or(row.enrichment_status),
                rank: (index + 1) as i32,
            })
            .collect();

        self.outputs
            .apply_rerank(request_id, &updates, Utc::now())
            .await?;

        tracing::info!(request_id = %request_id, rows = updates.len(), "Rerank applied");
        Ok(RerankOutcome::Updated {
            rows: updates.len(),
        })
    }
}

fn tier_order(tier: MatchTier) -> u8 {
    match tier {
        MatchTier::Strict => 0,
        MatchTier::Expanded => 1,
    }
}

/// Reconstruct a comparable score from a stored row when the underlying
/// candidate could not be reloaded.
fn stored_score(row: &crate::store::models::SourcingCandidateRow) -> ScoredCandidate {
    let stored: Option<StoredFitBreakdown> =
        serde_json::from_value(row.fit_breakdown.clone()).ok();
    match stored {
        Some(stored) => ScoredCandidate {
            candidate_id: row.candidate_id,
            fit_score: row.fit_score,
            breakdown: stored.components,
            match_tier: stored.match_tier,
            location_match: stored.location_match_type,
            data_confidence: stored.data_confidence,
        },
        None => ScoredCandidate {
            candidate_id: row.candidate_id,
            fit_score: row.fit_score,
            breakdown: crate::ranker::FitBreakdown {
                skill_score: 0.0,
                role_score: 0.0,
                seniority_score: 0.0,
                freshness_score: 0.0,
                skill_score_method: crate::ranker::SkillScoreMethod::TextFallback,
            },
            match_tier: MatchTier::Expanded,
            location_match: crate::ranker::LocationMatchType::None,
            data_confidence: crate::ranker::DataConfidence::Low,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::MemoryJobQueue;
    use crate::store::memory::{blank_candidate, MemoryStore};
    use crate::store::models::{
        EnrichmentStatus, IntelligenceSnapshot, NewSourcingCandidate, SourceType, SourcingRequest,
    };

    fn snapshot(candidate_id: Uuid, skills: &[&str]) -> IntelligenceSnapshot {
        let now = Utc::now();
        IntelligenceSnapshot {
            candidate_id,
            track: "tech".to_string(),
            skills_normalized: skills.iter().map(|s| s.to_string()).collect(),
            role_type: None,
            seniority_band: None,
            location: Some("Bangalore".to_string()),
            activity_recency_days: None,
            computed_at: now,
            stale_after: now + chrono::Duration::days(30),
        }
    }

    fn complete_request(store: &MemoryStore, tenant: &str) -> SourcingRequest {
        let now = Utc::now();
        let request = SourcingRequest {
            id: Uuid::new_v4(),
            tenant_id: tenant.to_string(),
            external_job_id: "job-1".to_string(),
            callback_url: "https://example.test/cb".to_string(),
            job_context: serde_json::json!({
                "jdDigest": "Build scalable services",
                "title": "Senior Backend Engineer",
                "skills": ["python", "kubernetes"],
                "location": "Bangalore, India"
            }),
            status: RequestStatus::Complete,
            diagnostics: None,
            result_count: Some(2),
            queries_executed: Some(0),
            quality_gate_triggered: Some(false),
            callback_attempts: 0,
            last_callback_error: None,
            completed_at: Some(now),
            last_reranked_at: None,
            created_at: now,
            updated_at: now,
        };
        store.insert_request(request.clone());
        request
    }

    fn row(candidate_id: Uuid, fit: f64) -> NewSourcingCandidate {
        NewSourcingCandidate {
            candidate_id,
            fit_score: fit,
            fit_breakdown: StoredFitBreakdown {
                components: crate::ranker::FitBreakdown {
                    skill_score: fit,
                    role_score: 0.5,
                    seniority_score: 0.5,
                    freshness_score: 0.1,
                    skill_score_method: crate::ranker::SkillScoreMethod::TextFallback,
                },
                match_tier: MatchTier::Expanded,
                location_match_type: crate::ranker::LocationMatchType::None,
                data_confidence: crate::ranker::DataConfidence::Low,
            },
            source_type: SourceType::Pool,
            enrichment_status: EnrichmentStatus::Pending,
        }
    }

    fn scheduler(queue: Arc<MemoryJobQueue>, store: Arc<MemoryStore>) -> RerankScheduler {
        RerankScheduler::new(queue, store, 2_000, true)
    }

    fn executor(store: Arc<MemoryStore>) -> RerankExecutor {
        RerankExecutor::new(store.clone(), store.clone(), store, 0.02)
    }

    #[tokio::test(start_paused = true)]
    async fn test_notifications_coalesce_into_one_job() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new("sourcing-rerank"));
        let request = complete_request(&store, "t1");

        // Four candidates, all rows of the same request.
        let mut candidate_ids = Vec::new();
        for i in 0..4 {
            let candidate = blank_candidate("t1", &format!("person-{i}"));
            candidate_ids.push(candidate.id);
            store.insert_candidate(candidate);
        }
        let rows: Vec<NewSourcingCandidate> = candidate_ids
            .iter()
            .map(|id| row(*id, 0.5))
            .collect();
        store.replace_for_request(request.id, &rows).await.unwrap();

        let scheduler = scheduler(queue.clone(), store.clone());
        let mut scheduled = 0;
        for candidate_id in &candidate_ids {
            scheduled += scheduler
                .on_enrichment_completed("t1", *candidate_id)
                .await
                .unwrap();
        }
        // Exactly one job despite four notifications.
        assert_eq!(scheduled, 1);
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.delayed + counts.waiting, 1);
    }

    #[tokio::test]
    async fn test_finished_job_is_replaced() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new("sourcing-rerank"));
        let request = complete_request(&store, "t1");
        let scheduler = RerankScheduler::new(queue.clone(), store.clone(), 0, true);

        assert!(scheduler.schedule(request.id).await.unwrap());
        let job = queue.next_ready().await.unwrap().unwrap();
        queue.complete(&job.id).await.unwrap();

        // A completed job does not block a fresh schedule.
        assert!(scheduler.schedule(request.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_disabled_scheduler_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let queue = Arc::new(MemoryJobQueue::new("sourcing-rerank"));
        let scheduler = RerankScheduler::new(queue.clone(), store.clone(), 0, false);
        assert_eq!(
            scheduler
                .on_enrichment_completed("t1", Uuid::new_v4())
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_rerank_reorders_on_new_snapshots() {
        let store = Arc::new(MemoryStore::new());
        let request = complete_request(&store, "t1");

        let weak = blank_candidate("t1", "weak");
        let strong = blank_candidate("t1", "strong");
        let weak_id = weak.id;
        let strong_id = strong.id;
        store.insert_candidate(weak);
        store.insert_candidate(strong);

        // Initial order has "weak" first.
        store
            .replace_for_request(request.id, &[row(weak_id, 0.9), row(strong_id, 0.2)])
            .await
            .unwrap();

        // Enrichment later reveals "strong" matches both skills.
        store.insert_snapshot(snapshot(strong_id, &["python", "kubernetes"]));

        let outcome = executor(store.clone()).rerank(request.id).await.unwrap();
        assert_eq!(outcome, RerankOutcome::Updated { rows: 2 });

        let rows = store.list_for_request(request.id).await.unwrap();
        assert_eq!(rows[0].candidate_id, strong_id);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[1].rank, 2);
        // Source type was never touched.
        assert!(rows.iter().all(|r| r.source_type == SourceType::Pool));

        let stored = store.get(request.id).await.unwrap().unwrap();
        assert!(stored.last_reranked_at.is_some());
    }

    #[tokio::test]
    async fn test_rerank_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let request = complete_request(&store, "t1");

        let mut ids = Vec::new();
        for i in 0..6 {
            let candidate = blank_candidate("t1", &format!("p{i}"));
            ids.push(candidate.id);
            store.insert_snapshot(snapshot(candidate.id, if i % 2 == 0 { &["python"] } else { &[] }));
            store.insert_candidate(candidate);
        }
        let rows: Vec<NewSourcingCandidate> =
            ids.iter().enumerate().map(|(i, id)| row(*id, i as f64 / 10.0)).collect();
        store.replace_for_request(request.id, &rows).await.unwrap();

        let executor = executor(store.clone());
        executor.rerank(request.id).await.unwrap();
        let first: Vec<(Uuid, i32)> = store
            .list_for_request(request.id)
            .await
            .unwrap()
            .iter()
            .map(|r| (r.candidate_id, r.rank))
            .collect();

        executor.rerank(request.id).await.unwrap();
        let second: Vec<(Uuid, i32)> = store
            .list_for_request(request.id)
            .await
            .unwrap()
            .iter()
            .map(|r| (r.candidate_id, r.rank))
            .collect();

        assert_eq!(first, second);
        // Ranks are a contiguous 1..=N permutation.
        let ranks: Vec<i32> = first.iter().map(|(_, rank)| *rank).collect();
        assert_eq!(ranks, (1..=6).collect::<Vec<i32>>());
    }

    #[tokio::test]
    async fn test_rerank_skips_non_complete_requests() {
        let store = Arc::new(MemoryStore::new());
        let request = complete_request(&store, "t1");
        store
            .set_status(request.id, RequestStatus::CallbackSent)
            .await
            .unwrap();

        let outcome = executor(store.clone()).rerank(request.id).await.unwrap();
        assert_eq!(outcome, RerankOutcome::Skipped("not_complete"));
    }

    #[tokio::test]
    async fn test_strict_rows_rank_before_expanded() {
        let store = Arc::new(MemoryStore::new());
        let request = complete_request(&store, "t1");

        let local = blank_candidate("t1", "local");
        let remote = blank_candidate("t1", "remote");
        let local_id = local.id;
        let remote_id = remote.id;
        store.insert_candidate(local);
        store.insert_candidate(remote);

        // Remote has great skills; local merely matches the city.
        store.insert_snapshot(snapshot(local_id, &[]));
        store.insert_snapshot(IntelligenceSnapshot {
            location: Some("Berlin, Germany".to_string()),
            ..snapshot(remote_id, &["python", "kubernetes"])
        });

        store
            .replace_for_request(request.id, &[row(remote_id, 0.9), row(local_id, 0.1)])
            .await
            .unwrap();

        executor(store.clone()).rerank(request.id).await.unwrap();
        let rows = store.list_for_request(request.id).await.unwrap();
        // Strict-location row leads despite the lower fit score.
        assert_eq!(rows[0].candidate_id, local_id);
    }
}
