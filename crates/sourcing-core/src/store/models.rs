//! Persistence models
//!
//! Tenant-scoped entities the pipeline reads and writes. Status enums map
//! to lowercase text columns; timestamps are UTC throughout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ranker::{FitBreakdown, LocationMatchType, MatchTier, DataConfidence};
use crate::track::Track;

/// Candidate enrichment lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnrichmentStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl EnrichmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for EnrichmentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// A person identified by a stable profile handle on the target platform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: Uuid,
    pub tenant_id: String,
    pub profile_url: String,
    /// Unique per tenant.
    pub profile_handle: String,
    pub search_provider: Option<String>,
    pub search_query: Option<String>,
    pub search_title: Option<String>,
    pub search_snippet: Option<String>,
    /// Provider metadata from the capturing SERP result.
    pub search_meta: Option<serde_json::Value>,
    pub name_hint: Option<String>,
    pub headline_hint: Option<String>,
    pub location_hint: Option<String>,
    pub company_hint: Option<String>,
    pub capture_source: Option<String>,
    pub enrichment_status: EnrichmentStatus,
    pub last_enriched_at: Option<DateTime<Utc>>,
    pub role_type: Option<String>,
    pub confidence_score: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Derived, cached facts about a candidate under one track.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceSnapshot {
    pub candidate_id: Uuid,
    /// "tech" or "non_tech"; snapshots are computed per track.
    pub track: String,
    pub skills_normalized: Vec<String>,
    pub role_type: Option<String>,
    pub seniority_band: Option<String>,
    pub location: Option<String>,
    pub activity_recency_days: Option<i64>,
    pub computed_at: DateTime<Utc>,
    pub stale_after: DateTime<Utc>,
}

impl IntelligenceSnapshot {
    /// Fresh iff `stale_after >= now`; stale snapshots stay usable.
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.stale_after >= now
    }
}

/// Which snapshot tracks a decision admits, tech first for blended.
pub fn snapshot_track_filter(track: Track) -> Vec<&'static str> {
    match track {
        Track::Tech => vec!["tech"],
        Track::NonTech => vec!["non_tech"],
        Track::Blended => vec!["tech", "non_tech"],
    }
}

/// Pick the selected snapshot under a filter, preferring earlier entries in
/// the filter order (tech-first for blended).
pub fn select_snapshot<'a>(
    snapshots: &'a [IntelligenceSnapshot],
    filter: &[&str],
) -> Option<&'a IntelligenceSnapshot> {
    filter
        .iter()
        .find_map(|track| snapshots.iter().find(|s| s.track == *track))
}

/// Sourcing request lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Queued,
    Processing,
    Complete,
    CallbackSent,
    CallbackFailed,
    Failed,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Complete => "complete",
            Self::CallbackSent => "callback_sent",
            Self::CallbackFailed => "callback_failed",
            Self::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RequestStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(Self::Queued),
            "processing" => Ok(Self::Processing),
            "complete" => Ok(Self::Complete),
            "callback_sent" => Ok(Self::CallbackSent),
            "callback_failed" => Ok(Self::CallbackFailed),
            "failed" => Ok(Self::Failed),
            _ => Err(()),
        }
    }
}

/// One caller-initiated sourcing job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcingRequest {
    pub id: Uuid,
    pub tenant_id: String,
    pub external_job_id: String,
    pub callback_url: String,
    pub job_context: serde_json::Value,
    pub status: RequestStatus,
    pub diagnostics: Option<serde_json::Value>,
    pub result_count: Option<i64>,
    pub queries_executed: Option<i64>,
    pub quality_gate_triggered: Option<bool>,
    pub callback_attempts: i64,
    pub last_callback_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_reranked_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where an output row came from. Immutable after creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Pool,
    PoolEnriched,
    Discovered,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pool => "pool",
            Self::PoolEnriched => "pool_enriched",
            Self::Discovered => "discovered",
        }
    }
}

impl std::str::FromStr for SourceType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pool" => Ok(Self::Pool),
            "pool_enriched" => Ok(Self::PoolEnriched),
            "discovered" => Ok(Self::Discovered),
            _ => Err(()),
        }
    }
}

/// One row of a request's ranked output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourcingCandidateRow {
    pub request_id: Uuid,
    pub candidate_id: Uuid,
    pub fit_score: f64,
    pub fit_breakdown: serde_json::Value,
    pub source_type: SourceType,
    pub enrichment_status: EnrichmentStatus,
    pub rank: i32,
}

/// The persisted shape of a fit breakdown, carrying tier and confidence
/// alongside the component scores.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredFitBreakdown {
    #[serde(flatten)]
    pub components: FitBreakdown,
    pub match_tier: MatchTier,
    pub location_match_type: LocationMatchType,
    pub data_confidence: DataConfidence,
}

/// A new output row, pre-rank-assignment.
#[derive(Debug, Clone)]
pub struct NewSourcingCandidate {
    pub candidate_id: Uuid,
    pub fit_score: f64,
    pub fit_breakdown: StoredFitBreakdown,
    pub source_type: SourceType,
    pub enrichment_status: EnrichmentStatus,
}

/// In-place rerank update for one row. `source_type` is deliberately absent:
/// rerank may not reclassify a row.
#[derive(Debug, Clone)]
pub struct RerankUpdate {
    pub candidate_id: Uuid,
    pub fit_score: f64,
    pub fit_breakdown: StoredFitBreakdown,
    pub enrichment_status: EnrichmentStatus,
    pub rank: i32,
}

/// A profile captured from one SERP result, sanitized upstream.
#[derive(Debug, Clone, Default)]
pub struct DiscoveredProfile {
    pub profile_url: String,
    pub profile_handle: String,
    pub search_provider: String,
    pub search_query: String,
    pub search_title: Option<String>,
    pub search_snippet: Option<String>,
    pub search_meta: Option<serde_json::Value>,
    pub name_hint: Option<String>,
    pub headline_hint: Option<String>,
    pub location_hint: Option<String>,
    pub company_hint: Option<String>,
}

/// Result of upserting a discovered profile.
#[derive(Debug, Clone)]
pub struct UpsertOutcome {
    pub candidate: Candidate,
    pub newly_created: bool,
}

/// A pool candidate with the snapshots admitted by the track filter.
#[derive(Debug, Clone)]
pub struct PoolCandidate {
    pub candidate: Candidate,
    pub snapshots: Vec<IntelligenceSnapshot>,
}

impl PoolCandidate {
    /// Ranker input using the selected snapshot under the filter.
    pub fn rank_input(&self, filter: &[&str]) -> crate::ranker::RankInput {
        let snapshot = select_snapshot(&self.snapshots, filter).map(|s| {
            crate::ranker::SnapshotFacts {
                skills_normalized: s.skills_normalized.clone(),
                role_type: s.role_type.clone(),
                seniority_band: s.seniority_band.clone(),
                location: s.location.clone(),
                computed_at: Some(s.computed_at),
            }
        });
        crate::ranker::RankInput {
            candidate_id: self.candidate.id,
            name_hint: self.candidate.name_hint.clone(),
            headline_hint: self.candidate.headline_hint.clone(),
            location_hint: self.candidate.location_hint.clone(),
            company_hint: self.candidate.company_hint.clone(),
            search_title: self.candidate.search_title.clone(),
            search_snippet: self.candidate.search_snippet.clone(),
            last_enriched_at: self.candidate.last_enriched_at,
            snapshot,
        }
    }
}

/// Telemetry for one executed discovery query.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryRunTelemetry {
    pub request_id: Uuid,
    pub tenant_id: String,
    pub phase: String,
    pub query: String,
    pub provider_used: String,
    pub used_fallback_provider: bool,
    pub result_count: usize,
    pub accepted_count: usize,
    pub cumulative_discovered: usize,
    pub latency_ms: u64,
    pub executed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_track_filter() {
        assert_eq!(snapshot_track_filter(Track::Tech), vec!["tech"]);
        assert_eq!(snapshot_track_filter(Track::NonTech), vec!["non_tech"]);
        assert_eq!(snapshot_track_filter(Track::Blended), vec!["tech", "non_tech"]);
    }

    #[test]
    fn test_select_snapshot_prefers_filter_order() {
        let mk = |track: &str| IntelligenceSnapshot {
            candidate_id: Uuid::from_u128(1),
            track: track.to_string(),
            skills_normalized: vec![],
            role_type: None,
            seniority_band: None,
            location: None,
            activity_recency_days: None,
            computed_at: Utc::now(),
            stale_after: Utc::now(),
        };
        let snapshots = vec![mk("non_tech"), mk("tech")];
        let filter = snapshot_track_filter(Track::Blended);
        assert_eq!(select_snapshot(&snapshots, &filter).unwrap().track, "tech");
    }

    #[test]
    fn test_snapshot_freshness() {
        let now = Utc::now();
        let snapshot = IntelligenceSnapshot {
            candidate_id: Uuid::from_u128(1),
            track: "tech".to_string(),
            skills_normalized: vec![],
            role_type: None,
            seniority_band: None,
            location: None,
            activity_recency_days: None,
            computed_at: now,
            stale_after: now + chrono::Duration::days(1),
        };
        assert!(snapshot.is_fresh(now));
        assert!(!snapshot.is_fresh(now + chrono::Duration::days(2)));
    }

    #[test]
    fn test_status_round_trips() {
        for status in [
            RequestStatus::Queued,
            RequestStatus::Processing,
            RequestStatus::Complete,
            RequestStatus::CallbackSent,
            RequestStatus::CallbackFailed,
            RequestStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<RequestStatus>(), Ok(status));
        }
        for source in [SourceType::Pool, SourceType::PoolEnriched, SourceType::Discovered] {
            assert_eq!(source.as_str().parse::<SourceType>(), Ok(source));
        }
    }
}
