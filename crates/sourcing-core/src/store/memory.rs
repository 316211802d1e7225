//! In-memory store
//!
//! A single struct implementing every store trait over mutex-guarded maps.
//! Used by unit tests and by the examples-free local development loop; the
//! semantics mirror the Postgres implementation, including the strictly-
//! better hint rule and atomic output replacement.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::diagnostics::Diagnostics;
use crate::errors::{Result, SourcingError};
use crate::geo;
use crate::hints;
use crate::requirements::{JobContext, JobRequirements};

use super::models::{
    Candidate, DiscoveredProfile, EnrichmentStatus, IntelligenceSnapshot, NewSourcingCandidate,
    PoolCandidate, QueryRunTelemetry, RequestStatus, RerankUpdate, SourceType,
    SourcingCandidateRow, SourcingRequest, UpsertOutcome,
};
use super::{
    CandidateStore, EnrichmentSessions, NoveltyStore, OutputStore, RequestStore, TelemetryStore,
};

#[derive(Debug, Clone)]
pub struct EnrichmentSessionRecord {
    pub tenant_id: String,
    pub candidate_id: Uuid,
    pub priority: u8,
    pub status: String,
}

#[derive(Default)]
pub struct MemoryStore {
    pub candidates: Mutex<Vec<Candidate>>,
    pub snapshots: Mutex<Vec<IntelligenceSnapshot>>,
    pub requests: Mutex<HashMap<Uuid, SourcingRequest>>,
    pub outputs: Mutex<HashMap<Uuid, Vec<SourcingCandidateRow>>>,
    pub sessions: Mutex<Vec<EnrichmentSessionRecord>>,
    pub telemetry: Mutex<Vec<QueryRunTelemetry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_candidate(&self, candidate: Candidate) {
        self.candidates.lock().unwrap().push(candidate);
    }

    pub fn insert_snapshot(&self, snapshot: IntelligenceSnapshot) {
        self.snapshots.lock().unwrap().push(snapshot);
    }

    pub fn insert_request(&self, request: SourcingRequest) {
        self.requests.lock().unwrap().insert(request.id, request);
    }

    fn snapshots_for(&self, candidate_id: Uuid, tracks: &[&str]) -> Vec<IntelligenceSnapshot> {
        let snapshots = self.snapshots.lock().unwrap();
        tracks
            .iter()
            .filter_map(|track| {
                snapshots
                    .iter()
                    .filter(|s| s.candidate_id == candidate_id && s.track == *track)
                    .max_by_key(|s| s.computed_at)
                    .cloned()
            })
            .collect()
    }
}

/// Build a blank candidate for test setup.
pub fn blank_candidate(tenant_id: &str, handle: &str) -> Candidate {
    let now = Utc::now();
    Candidate {
        id: Uuid::new_v4(),
        tenant_id: tenant_id.to_string(),
        profile_url: format!("https://linkedin.com/in/{handle}"),
        profile_handle: handle.to_string(),
        search_provider: None,
        search_query: None,
        search_title: None,
        search_snippet: None,
        search_meta: None,
        name_hint: None,
        headline_hint: None,
        location_hint: None,
        company_hint: None,
        capture_source: None,
        enrichment_status: EnrichmentStatus::Pending,
        last_enriched_at: None,
        role_type: None,
        confidence_score: None,
        created_at: now,
        updated_at: now,
    }
}

#[async_trait]
impl CandidateStore for MemoryStore {
    async fn load_pool(
        &self,
        tenant_id: &str,
        tracks: &[&str],
        limit: usize,
    ) -> Result<Vec<PoolCandidate>> {
        let mut candidates: Vec<Candidate> = self
            .candidates
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.tenant_id == tenant_id)
            .cloned()
            .collect();
        candidates.sort_by_key(|c| std::cmp::Reverse(c.updated_at));
        candidates.truncate(limit);

        Ok(candidates
            .into_iter()
            .map(|candidate| {
                let snapshots = self.snapshots_for(candidate.id, tracks);
                PoolCandidate {
                    candidate,
                    snapshots,
                }
            })
            .collect())
    }

    async fn known_handles(
        &self,
        tenant_id: &str,
        handles: &[String],
    ) -> Result<HashSet<String>> {
        let wanted: HashSet<&String> = handles.iter().collect();
        Ok(self
            .candidates
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.tenant_id == tenant_id && wanted.contains(&c.profile_handle))
            .map(|c| c.profile_handle.clone())
            .collect())
    }

    async fn upsert_discovered(
        &self,
        tenant_id: &str,
        profile: &DiscoveredProfile,
    ) -> Result<UpsertOutcome> {
        let mut candidates = self.candidates.lock().unwrap();
        let now = Utc::now();

        if let Some(existing) = candidates
            .iter_mut()
            .find(|c| c.tenant_id == tenant_id && c.profile_handle == profile.profile_handle)
        {
            if hints::should_replace(existing.name_hint.as_deref(), profile.name_hint.as_deref()) {
                existing.name_hint = profile.name_hint.clone();
            }
            if hints::should_replace(
                existing.headline_hint.as_deref(),
                profile.headline_hint.as_deref(),
            ) {
                existing.headline_hint = profile.headline_hint.clone();
            }
            if hints::should_replace_location_hint(
                existing.location_hint.as_deref(),
                profile.location_hint.as_deref(),
            ) {
                existing.location_hint = profile.location_hint.clone();
            }
            if hints::should_replace_company_hint(
                existing.company_hint.as_deref(),
                profile.company_hint.as_deref(),
            ) {
                existing.company_hint = profile.company_hint.clone();
            }
            existing.search_provider = Some(profile.search_provider.clone());
            existing.search_query = Some(profile.search_query.clone());
            existing.search_title = profile.search_title.clone();
            existing.search_snippet = profile.search_snippet.clone();
            existing.search_meta = profile.search_meta.clone();
            existing.updated_at = now;

            return Ok(UpsertOutcome {
                candidate: existing.clone(),
                newly_created: false,
            });
        }

        let candidate = Candidate {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            profile_url: profile.profile_url.clone(),
            profile_handle: profile.profile_handle.clone(),
            search_provider: Some(profile.search_provider.clone()),
            search_query: Some(profile.search_query.clone()),
            search_title: profile.search_title.clone(),
            search_snippet: profile.search_snippet.clone(),
            search_meta: profile.search_meta.clone(),
            name_hint: profile.name_hint.clone(),
            headline_hint: profile.headline_hint.clone(),
            location_hint: profile.location_hint.clone(),
            company_hint: profile.company_hint.clone(),
            capture_source: Some("sourcing".to_string()),
            enrichment_status: EnrichmentStatus::Pending,
            last_enriched_at: None,
            role_type: None,
            confidence_score: None,
            created_at: now,
            updated_at: now,
        };
        candidates.push(candidate.clone());
        Ok(UpsertOutcome {
            candidate,
            newly_created: true,
        })
    }

    async fn load_with_snapshots(
        &self,
        tenant_id: &str,
        candidate_ids: &[Uuid],
        tracks: &[&str],
    ) -> Result<Vec<PoolCandidate>> {
        let wanted: HashSet<Uuid> = candidate_ids.iter().copied().collect();
        let candidates: Vec<Candidate> = self
            .candidates
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.tenant_id == tenant_id && wanted.contains(&c.id))
            .cloned()
            .collect();

        Ok(candidates
            .into_iter()
            .map(|candidate| {
                let snapshots = self.snapshots_for(candidate.id, tracks);
                PoolCandidate {
                    candidate,
                    snapshots,
                }
            })
            .collect())
    }
}

#[async_trait]
impl RequestStore for MemoryStore {
    async fn get(&self, request_id: Uuid) -> Result<Option<SourcingRequest>> {
        Ok(self.requests.lock().unwrap().get(&request_id).cloned())
    }

    async fn mark_processing(&self, request_id: Uuid) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        if let Some(request) = requests.get_mut(&request_id) {
            if request.status == RequestStatus::Queued {
                request.status = RequestStatus::Processing;
                request.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn merge_diagnostics(&self, request_id: Uuid, patch: Diagnostics) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&request_id)
            .ok_or(SourcingError::RequestNotFound(request_id))?;
        let mut diagnostics = Diagnostics::from_value(request.diagnostics.as_ref());
        diagnostics.merge(patch);
        request.diagnostics = Some(diagnostics.to_value());
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn complete(
        &self,
        request_id: Uuid,
        result_count: i64,
        queries_executed: i64,
        quality_gate_triggered: bool,
        patch: Diagnostics,
    ) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&request_id)
            .ok_or(SourcingError::RequestNotFound(request_id))?;
        let mut diagnostics = Diagnostics::from_value(request.diagnostics.as_ref());
        diagnostics.merge(patch);
        request.diagnostics = Some(diagnostics.to_value());
        request.status = RequestStatus::Complete;
        request.result_count = Some(result_count);
        request.queries_executed = Some(queries_executed);
        request.quality_gate_triggered = Some(quality_gate_triggered);
        request.completed_at = Some(Utc::now());
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn fail(&self, request_id: Uuid, error: &str) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&request_id)
            .ok_or(SourcingError::RequestNotFound(request_id))?;
        let mut diagnostics = Diagnostics::from_value(request.diagnostics.as_ref());
        diagnostics.merge(Diagnostics {
            error: Some(error.to_string()),
            ..Diagnostics::default()
        });
        request.diagnostics = Some(diagnostics.to_value());
        request.status = RequestStatus::Failed;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn record_callback_attempt(&self, request_id: Uuid, error: Option<&str>) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&request_id)
            .ok_or(SourcingError::RequestNotFound(request_id))?;
        request.callback_attempts += 1;
        if let Some(error) = error {
            request.last_callback_error = Some(error.to_string());
        }
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn set_status(&self, request_id: Uuid, status: RequestStatus) -> Result<()> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .get_mut(&request_id)
            .ok_or(SourcingError::RequestNotFound(request_id))?;
        request.status = status;
        request.updated_at = Utc::now();
        Ok(())
    }

    async fn sweepable_callback_failures(
        &self,
        completed_before: DateTime<Utc>,
        limit: usize,
        tenant_id: Option<&str>,
    ) -> Result<Vec<SourcingRequest>> {
        let requests = self.requests.lock().unwrap();
        let mut matching: Vec<SourcingRequest> = requests
            .values()
            .filter(|r| r.status == RequestStatus::CallbackFailed)
            .filter(|r| r.completed_at.is_some_and(|at| at < completed_before))
            .filter(|r| tenant_id.map_or(true, |t| r.tenant_id == t))
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.completed_at);
        matching.truncate(limit);
        Ok(matching)
    }
}

#[async_trait]
impl OutputStore for MemoryStore {
    async fn replace_for_request(
        &self,
        request_id: Uuid,
        rows: &[NewSourcingCandidate],
    ) -> Result<()> {
        let replacement: Vec<SourcingCandidateRow> = rows
            .iter()
            .enumerate()
            .map(|(index, row)| {
                Ok(SourcingCandidateRow {
                    request_id,
                    candidate_id: row.candidate_id,
                    fit_score: row.fit_score,
                    fit_breakdown: serde_json::to_value(&row.fit_breakdown)?,
                    source_type: row.source_type,
                    enrichment_status: row.enrichment_status,
                    rank: (index + 1) as i32,
                })
            })
            .collect::<Result<_>>()?;
        self.outputs.lock().unwrap().insert(request_id, replacement);
        Ok(())
    }

    async fn list_for_request(&self, request_id: Uuid) -> Result<Vec<SourcingCandidateRow>> {
        let mut rows = self
            .outputs
            .lock()
            .unwrap()
            .get(&request_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|r| r.rank);
        Ok(rows)
    }

    async fn apply_rerank(
        &self,
        request_id: Uuid,
        updates: &[RerankUpdate],
        reranked_at: DateTime<Utc>,
    ) -> Result<()> {
        {
            let mut outputs = self.outputs.lock().unwrap();
            let rows = outputs.entry(request_id).or_default();
            for update in updates {
                if let Some(row) = rows
                    .iter_mut()
                    .find(|r| r.candidate_id == update.candidate_id)
                {
                    row.fit_score = update.fit_score;
                    row.fit_breakdown = serde_json::to_value(&update.fit_breakdown)?;
                    row.enrichment_status = update.enrichment_status;
                    row.rank = update.rank;
                }
            }
        }
        let mut requests = self.requests.lock().unwrap();
        if let Some(request) = requests.get_mut(&request_id) {
            request.last_reranked_at = Some(reranked_at);
        }
        Ok(())
    }

    async fn requests_containing(
        &self,
        tenant_id: &str,
        candidate_id: Uuid,
        status: RequestStatus,
    ) -> Result<Vec<Uuid>> {
        let requests = self.requests.lock().unwrap();
        let outputs = self.outputs.lock().unwrap();
        Ok(outputs
            .iter()
            .filter(|(request_id, rows)| {
                rows.iter().any(|r| r.candidate_id == candidate_id)
                    && requests
                        .get(request_id)
                        .is_some_and(|r| r.tenant_id == tenant_id && r.status == status)
            })
            .map(|(request_id, _)| *request_id)
            .collect())
    }
}

#[async_trait]
impl EnrichmentSessions for MemoryStore {
    async fn create(&self, tenant_id: &str, candidate_id: Uuid, priority: u8) -> Result<bool> {
        let mut sessions = self.sessions.lock().unwrap();
        let active = sessions.iter().any(|s| {
            s.tenant_id == tenant_id
                && s.candidate_id == candidate_id
                && (s.status == "queued" || s.status == "running")
        });
        if active {
            return Ok(false);
        }
        sessions.push(EnrichmentSessionRecord {
            tenant_id: tenant_id.to_string(),
            candidate_id,
            priority,
            status: "queued".to_string(),
        });
        Ok(true)
    }
}

#[async_trait]
impl NoveltyStore for MemoryStore {
    async fn recently_exposed(
        &self,
        tenant_id: &str,
        role_family: &str,
        city: &str,
        window_days: i64,
    ) -> Result<HashSet<Uuid>> {
        let since = Utc::now() - Duration::days(window_days.max(1));
        let requests = self.requests.lock().unwrap();
        let outputs = self.outputs.lock().unwrap();

        let matching: Vec<Uuid> = requests
            .values()
            .filter(|r| r.tenant_id == tenant_id)
            .filter(|r| {
                matches!(
                    r.status,
                    RequestStatus::Complete | RequestStatus::CallbackSent
                )
            })
            .filter(|r| r.completed_at.is_some_and(|at| at >= since))
            .filter(|r| {
                let Ok(ctx) = serde_json::from_value::<JobContext>(r.job_context.clone()) else {
                    return false;
                };
                let requirements = JobRequirements::build(&ctx);
                requirements
                    .role_family
                    .map(|f| f.as_str() == role_family)
                    .unwrap_or(false)
                    && requirements
                        .location
                        .as_deref()
                        .and_then(geo::primary_city)
                        .map(|c| c == city)
                        .unwrap_or(false)
            })
            .map(|r| r.id)
            .collect();

        Ok(matching
            .iter()
            .filter_map(|id| outputs.get(id))
            .flatten()
            .map(|row| row.candidate_id)
            .collect())
    }
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn record_query_run(&self, telemetry: &QueryRunTelemetry) -> Result<()> {
        self.telemetry.lock().unwrap().push(telemetry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_upsert_applies_strictly_better_rule() {
        let store = MemoryStore::new();
        let profile = DiscoveredProfile {
            profile_url: "https://linkedin.com/in/priya".to_string(),
            profile_handle: "priya".to_string(),
            search_provider: "serper".to_string(),
            search_query: "backend engineer bangalore".to_string(),
            name_hint: Some("Priya".to_string()),
            location_hint: Some("India".to_string()),
            ..DiscoveredProfile::default()
        };
        let first = store.upsert_discovered("t1", &profile).await.unwrap();
        assert!(first.newly_created);

        // Better hints replace; worse ones don't.
        let better = DiscoveredProfile {
            name_hint: Some("Priya Sharma".to_string()),
            location_hint: Some("Bengaluru, Karnataka".to_string()),
            search_query: "newer query".to_string(),
            ..profile.clone()
        };
        let second = store.upsert_discovered("t1", &better).await.unwrap();
        assert!(!second.newly_created);
        assert_eq!(second.candidate.name_hint.as_deref(), Some("Priya Sharma"));
        assert_eq!(
            second.candidate.location_hint.as_deref(),
            Some("Bengaluru, Karnataka")
        );
        assert_eq!(second.candidate.search_query.as_deref(), Some("newer query"));

        let worse = DiscoveredProfile {
            name_hint: Some("P".to_string()),
            location_hint: Some("India".to_string()),
            ..profile.clone()
        };
        let third = store.upsert_discovered("t1", &worse).await.unwrap();
        assert_eq!(third.candidate.name_hint.as_deref(), Some("Priya Sharma"));
        assert_eq!(
            third.candidate.location_hint.as_deref(),
            Some("Bengaluru, Karnataka")
        );
    }

    #[tokio::test]
    async fn test_replace_assigns_contiguous_ranks() {
        let store = MemoryStore::new();
        let request_id = Uuid::new_v4();
        let rows: Vec<NewSourcingCandidate> = (0..5)
            .map(|i| NewSourcingCandidate {
                candidate_id: Uuid::from_u128(i),
                fit_score: 0.9 - (i as f64) * 0.1,
                fit_breakdown: test_breakdown(),
                source_type: SourceType::Pool,
                enrichment_status: EnrichmentStatus::Pending,
            })
            .collect();
        store.replace_for_request(request_id, &rows).await.unwrap();

        let stored = store.list_for_request(request_id).await.unwrap();
        let ranks: Vec<i32> = stored.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_enrichment_dedupe() {
        let store = MemoryStore::new();
        let candidate = Uuid::new_v4();
        assert!(store.create("t1", candidate, 10).await.unwrap());
        assert!(!store.create("t1", candidate, 11).await.unwrap());
        // Other tenants are independent.
        assert!(store.create("t2", candidate, 10).await.unwrap());
    }

    fn test_breakdown() -> crate::store::models::StoredFitBreakdown {
        use crate::ranker::{
            DataConfidence, FitBreakdown, LocationMatchType, MatchTier, SkillScoreMethod,
        };
        crate::store::models::StoredFitBreakdown {
            components: FitBreakdown {
                skill_score: 0.5,
                role_score: 0.5,
                seniority_score: 0.5,
                freshness_score: 0.5,
                skill_score_method: SkillScoreMethod::TextFallback,
            },
            match_tier: MatchTier::Strict,
            location_match_type: LocationMatchType::None,
            data_confidence: DataConfidence::Medium,
        }
    }
}
