//! Persistence layer
//!
//! Store traits abstract every database touchpoint so the orchestrator and
//! workers are testable against in-memory implementations. The Postgres
//! implementations live in [`postgres`]; the fakes in [`memory`].

pub mod memory;
pub mod models;
pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::diagnostics::Diagnostics;
use crate::errors::Result;

use self::models::{
    DiscoveredProfile, NewSourcingCandidate, PoolCandidate, QueryRunTelemetry, RequestStatus,
    RerankUpdate, SourcingCandidateRow, SourcingRequest, UpsertOutcome,
};

/// Candidate pool reads and discovery upserts.
#[async_trait]
pub trait CandidateStore: Send + Sync {
    /// The tenant's most recently updated candidates, each with the latest
    /// snapshot per admitted track.
    async fn load_pool(
        &self,
        tenant_id: &str,
        tracks: &[&str],
        limit: usize,
    ) -> Result<Vec<PoolCandidate>>;

    /// Which of the given handles already exist for the tenant.
    async fn known_handles(&self, tenant_id: &str, handles: &[String])
        -> Result<HashSet<String>>;

    /// Create or refresh a candidate from a SERP capture. Hints follow the
    /// replace-when-strictly-better rule; search metadata always updates.
    async fn upsert_discovered(
        &self,
        tenant_id: &str,
        profile: &DiscoveredProfile,
    ) -> Result<UpsertOutcome>;

    /// Load specific candidates with snapshots under the track filter.
    async fn load_with_snapshots(
        &self,
        tenant_id: &str,
        candidate_ids: &[Uuid],
        tracks: &[&str],
    ) -> Result<Vec<PoolCandidate>>;
}

/// Sourcing request lifecycle persistence.
#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn get(&self, request_id: Uuid) -> Result<Option<SourcingRequest>>;

    /// queued -> processing.
    async fn mark_processing(&self, request_id: Uuid) -> Result<()>;

    /// Append-only diagnostics merge; preserves any stored track decision.
    async fn merge_diagnostics(&self, request_id: Uuid, patch: Diagnostics) -> Result<()>;

    /// processing -> complete, with run counters and the final diagnostics
    /// merge, atomically.
    async fn complete(
        &self,
        request_id: Uuid,
        result_count: i64,
        queries_executed: i64,
        quality_gate_triggered: bool,
        patch: Diagnostics,
    ) -> Result<()>;

    /// processing -> failed, recording the error without disturbing the
    /// stored track decision.
    async fn fail(&self, request_id: Uuid, error: &str) -> Result<()>;

    /// Bump the attempt counter; a `None` error clears nothing, a `Some`
    /// overwrites the last callback error.
    async fn record_callback_attempt(&self, request_id: Uuid, error: Option<&str>) -> Result<()>;

    async fn set_status(&self, request_id: Uuid, status: RequestStatus) -> Result<()>;

    /// callback_failed requests old enough for the re-delivery sweeper.
    async fn sweepable_callback_failures(
        &self,
        completed_before: DateTime<Utc>,
        limit: usize,
        tenant_id: Option<&str>,
    ) -> Result<Vec<SourcingRequest>>;
}

/// Ranked output rows of a request.
#[async_trait]
pub trait OutputStore: Send + Sync {
    /// Atomically replace the request's rows; ranks are assigned 1-based
    /// from slice order within a single transaction.
    async fn replace_for_request(
        &self,
        request_id: Uuid,
        rows: &[NewSourcingCandidate],
    ) -> Result<()>;

    async fn list_for_request(&self, request_id: Uuid) -> Result<Vec<SourcingCandidateRow>>;

    /// Apply a rerank and stamp the request's `last_reranked_at` in one
    /// transaction. `source_type` is never touched.
    async fn apply_rerank(
        &self,
        request_id: Uuid,
        updates: &[RerankUpdate],
        reranked_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Requests in the given status containing this candidate.
    async fn requests_containing(
        &self,
        tenant_id: &str,
        candidate_id: Uuid,
        status: RequestStatus,
    ) -> Result<Vec<Uuid>>;
}

/// Enrichment session enqueue, deduped per (tenant, candidate).
#[async_trait]
pub trait EnrichmentSessions: Send + Sync {
    /// Returns false when a queued or running session already exists.
    async fn create(&self, tenant_id: &str, candidate_id: Uuid, priority: u8) -> Result<bool>;
}

/// Recently-exposed candidate reads for novelty suppression.
#[async_trait]
pub trait NoveltyStore: Send + Sync {
    async fn recently_exposed(
        &self,
        tenant_id: &str,
        role_family: &str,
        city: &str,
        window_days: i64,
    ) -> Result<HashSet<Uuid>>;
}

/// Per-query discovery telemetry.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn record_query_run(&self, telemetry: &QueryRunTelemetry) -> Result<()>;
}
