//! Postgres store implementation
//!
//! One pool-backed struct implements every store trait. Queries use runtime
//! binding; row mapping is explicit so schema drift fails loudly.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use crate::diagnostics::Diagnostics;
use crate::errors::Result;
use crate::hints;
use crate::geo;
use crate::requirements::{JobContext, JobRequirements};

use super::models::{
    Candidate, DiscoveredProfile, EnrichmentStatus, IntelligenceSnapshot, NewSourcingCandidate,
    PoolCandidate, QueryRunTelemetry, RequestStatus, RerankUpdate, SourceType,
    SourcingCandidateRow, SourcingRequest, UpsertOutcome,
};
use super::{
    CandidateStore, EnrichmentSessions, NoveltyStore, OutputStore, RequestStore, TelemetryStore,
};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create tables and indexes this service owns.
    pub async fn setup(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS candidates (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                profile_url TEXT NOT NULL,
                profile_handle TEXT NOT NULL,
                search_provider TEXT,
                search_query TEXT,
                search_title TEXT,
                search_snippet TEXT,
                search_meta JSONB,
                name_hint TEXT,
                headline_hint TEXT,
                location_hint TEXT,
                company_hint TEXT,
                capture_source TEXT,
                enrichment_status TEXT NOT NULL DEFAULT 'pending',
                last_enriched_at TIMESTAMPTZ,
                role_type TEXT,
                confidence_score DOUBLE PRECISION,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL,
                UNIQUE (tenant_id, profile_handle)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_candidates_tenant_updated
                ON candidates (tenant_id, updated_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS intelligence_snapshots (
                candidate_id UUID NOT NULL,
                track TEXT NOT NULL,
                skills_normalized TEXT[] NOT NULL DEFAULT '{}',
                role_type TEXT,
                seniority_band TEXT,
                location TEXT,
                activity_recency_days BIGINT,
                computed_at TIMESTAMPTZ NOT NULL,
                stale_after TIMESTAMPTZ NOT NULL,
                PRIMARY KEY (candidate_id, track, computed_at)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sourcing_requests (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                external_job_id TEXT NOT NULL,
                callback_url TEXT NOT NULL,
                job_context JSONB NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                diagnostics JSONB,
                result_count BIGINT,
                queries_executed BIGINT,
                quality_gate_triggered BOOLEAN,
                callback_attempts BIGINT NOT NULL DEFAULT 0,
                last_callback_error TEXT,
                completed_at TIMESTAMPTZ,
                last_reranked_at TIMESTAMPTZ,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_requests_callback_sweep
                ON sourcing_requests (status, completed_at)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sourcing_candidates (
                request_id UUID NOT NULL,
                candidate_id UUID NOT NULL,
                fit_score DOUBLE PRECISION NOT NULL,
                fit_breakdown JSONB NOT NULL,
                source_type TEXT NOT NULL,
                enrichment_status TEXT NOT NULL,
                rank INTEGER NOT NULL,
                PRIMARY KEY (request_id, candidate_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_output_candidate
                ON sourcing_candidates (candidate_id)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS enrichment_sessions (
                id UUID PRIMARY KEY,
                tenant_id TEXT NOT NULL,
                candidate_id UUID NOT NULL,
                priority INTEGER NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                created_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS sourcing_query_runs (
                id UUID PRIMARY KEY,
                request_id UUID NOT NULL,
                tenant_id TEXT NOT NULL,
                phase TEXT NOT NULL,
                query TEXT NOT NULL,
                provider_used TEXT NOT NULL,
                used_fallback_provider BOOLEAN NOT NULL,
                result_count INTEGER NOT NULL,
                accepted_count INTEGER NOT NULL,
                cumulative_discovered INTEGER NOT NULL,
                latency_ms BIGINT NOT NULL,
                executed_at TIMESTAMPTZ NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

fn row_to_candidate(row: &PgRow) -> sqlx::Result<Candidate> {
    let status: String = row.try_get("enrichment_status")?;
    Ok(Candidate {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        profile_url: row.try_get("profile_url")?,
        profile_handle: row.try_get("profile_handle")?,
        search_provider: row.try_get("search_provider")?,
        search_query: row.try_get("search_query")?,
        search_title: row.try_get("search_title")?,
        search_snippet: row.try_get("search_snippet")?,
        search_meta: row.try_get("search_meta")?,
        name_hint: row.try_get("name_hint")?,
        headline_hint: row.try_get("headline_hint")?,
        location_hint: row.try_get("location_hint")?,
        company_hint: row.try_get("company_hint")?,
        capture_source: row.try_get("capture_source")?,
        enrichment_status: EnrichmentStatus::from_str(&status)
            .unwrap_or(EnrichmentStatus::Pending),
        last_enriched_at: row.try_get("last_enriched_at")?,
        role_type: row.try_get("role_type")?,
        confidence_score: row.try_get("confidence_score")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_snapshot(row: &PgRow) -> sqlx::Result<IntelligenceSnapshot> {
    Ok(IntelligenceSnapshot {
        candidate_id: row.try_get("candidate_id")?,
        track: row.try_get("track")?,
        skills_normalized: row.try_get("skills_normalized")?,
        role_type: row.try_get("role_type")?,
        seniority_band: row.try_get("seniority_band")?,
        location: row.try_get("location")?,
        activity_recency_days: row.try_get("activity_recency_days")?,
        computed_at: row.try_get("computed_at")?,
        stale_after: row.try_get("stale_after")?,
    })
}

fn row_to_request(row: &PgRow) -> sqlx::Result<SourcingRequest> {
    let status: String = row.try_get("status")?;
    Ok(SourcingRequest {
        id: row.try_get("id")?,
        tenant_id: row.try_get("tenant_id")?,
        external_job_id: row.try_get("external_job_id")?,
        callback_url: row.try_get("callback_url")?,
        job_context: row.try_get("job_context")?,
        status: RequestStatus::from_str(&status).unwrap_or(RequestStatus::Queued),
        diagnostics: row.try_get("diagnostics")?,
        result_count: row.try_get("result_count")?,
        queries_executed: row.try_get("queries_executed")?,
        quality_gate_triggered: row.try_get("quality_gate_triggered")?,
        callback_attempts: row.try_get("callback_attempts")?,
        last_callback_error: row.try_get("last_callback_error")?,
        completed_at: row.try_get("completed_at")?,
        last_reranked_at: row.try_get("last_reranked_at")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn row_to_output(row: &PgRow) -> sqlx::Result<SourcingCandidateRow> {
    let source_type: String = row.try_get("source_type")?;
    let enrichment_status: String = row.try_get("enrichment_status")?;
    Ok(SourcingCandidateRow {
        request_id: row.try_get("request_id")?,
        candidate_id: row.try_get("candidate_id")?,
        fit_score: row.try_get("fit_score")?,
        fit_breakdown: row.try_get("fit_breakdown")?,
        source_type: SourceType::from_str(&source_type).unwrap_or(SourceType::Pool),
        enrichment_status: EnrichmentStatus::from_str(&enrichment_status)
            .unwrap_or(EnrichmentStatus::Pending),
        rank: row.try_get("rank")?,
    })
}

async fn snapshots_for(
    pool: &PgPool,
    candidate_ids: &[Uuid],
    tracks: &[&str],
) -> Result<HashMap<Uuid, Vec<IntelligenceSnapshot>>> {
    if candidate_ids.is_empty() || tracks.is_empty() {
        return Ok(HashMap::new());
    }
    let track_list: Vec<String> = tracks.iter().map(|t| t.to_string()).collect();
    let rows = sqlx::query(
        r#"
        SELECT DISTINCT ON (candidate_id, track) *
        FROM intelligence_snapshots
        WHERE candidate_id = ANY($1) AND track = ANY($2)
        ORDER BY candidate_id, track, computed_at DESC
        "#,
    )
    .bind(candidate_ids)
    .bind(&track_list)
    .fetch_all(pool)
    .await?;

    let mut by_candidate: HashMap<Uuid, Vec<IntelligenceSnapshot>> = HashMap::new();
    for row in &rows {
        let snapshot = row_to_snapshot(row)?;
        by_candidate
            .entry(snapshot.candidate_id)
            .or_default()
            .push(snapshot);
    }
    Ok(by_candidate)
}

#[async_trait]
impl CandidateStore for PgStore {
    async fn load_pool(
        &self,
        tenant_id: &str,
        tracks: &[&str],
        limit: usize,
    ) -> Result<Vec<PoolCandidate>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM candidates
            WHERE tenant_id = $1
            ORDER BY updated_at DESC
            LIMIT $2
            "#,
        )
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<Candidate> = rows
            .iter()
            .map(row_to_candidate)
            .collect::<sqlx::Result<_>>()?;
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        let mut snapshots = snapshots_for(&self.pool, &ids, tracks).await?;

        Ok(candidates
            .into_iter()
            .map(|candidate| {
                let snaps = snapshots.remove(&candidate.id).unwrap_or_default();
                PoolCandidate {
                    candidate,
                    snapshots: snaps,
                }
            })
            .collect())
    }

    async fn known_handles(
        &self,
        tenant_id: &str,
        handles: &[String],
    ) -> Result<HashSet<String>> {
        if handles.is_empty() {
            return Ok(HashSet::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT profile_handle FROM candidates
            WHERE tenant_id = $1 AND profile_handle = ANY($2)
            "#,
        )
        .bind(tenant_id)
        .bind(handles)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<String, _>("profile_handle")?))
            .collect()
    }

    async fn upsert_discovered(
        &self,
        tenant_id: &str,
        profile: &DiscoveredProfile,
    ) -> Result<UpsertOutcome> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now();

        let existing = sqlx::query(
            r#"
            SELECT * FROM candidates
            WHERE tenant_id = $1 AND profile_handle = $2
            FOR UPDATE
            "#,
        )
        .bind(tenant_id)
        .bind(&profile.profile_handle)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match existing {
            None => {
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
                sqlx::query(
                    r#"
                    INSERT INTO candidates (
                        id, tenant_id, profile_url, profile_handle,
                        search_provider, search_query, search_title, search_snippet,
                        search_meta, name_hint, headline_hint, location_hint,
                        company_hint, capture_source, enrichment_status,
                        created_at, updated_at
                    ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
                    "#,
                )
                .bind(candidate.id)
                .bind(&candidate.tenant_id)
                .bind(&candidate.profile_url)
                .bind(&candidate.profile_handle)
                .bind(&candidate.search_provider)
                .bind(&candidate.search_query)
                .bind(&candidate.search_title)
                .bind(&candidate.search_snippet)
                .bind(&candidate.search_meta)
                .bind(&candidate.name_hint)
                .bind(&candidate.headline_hint)
                .bind(&candidate.location_hint)
                .bind(&candidate.company_hint)
                .bind(&candidate.capture_source)
                .bind(candidate.enrichment_status.as_str())
                .bind(candidate.created_at)
                .bind(candidate.updated_at)
                .execute(&mut *tx)
                .await?;

                UpsertOutcome {
                    candidate,
                    newly_created: true,
                }
            }
            Some(row) => {
                let mut candidate = row_to_candidate(&row)?;

                if hints::should_replace(
                    candidate.name_hint.as_deref(),
                    profile.name_hint.as_deref(),
                ) {
                    candidate.name_hint = profile.name_hint.clone();
                }
                if hints::should_replace(
                    candidate.headline_hint.as_deref(),
                    profile.headline_hint.as_deref(),
                ) {
                    candidate.headline_hint = profile.headline_hint.clone();
                }
                if hints::should_replace_location_hint(
                    candidate.location_hint.as_deref(),
                    profile.location_hint.as_deref(),
                ) {
                    candidate.location_hint = profile.location_hint.clone();
                }
                if hints::should_replace_company_hint(
                    candidate.company_hint.as_deref(),
                    profile.company_hint.as_deref(),
                ) {
                    candidate.company_hint = profile.company_hint.clone();
                }

                // Search metadata always reflects the most recent capture.
                candidate.search_provider = Some(profile.search_provider.clone());
                candidate.search_query = Some(profile.search_query.clone());
                candidate.search_title = profile.search_title.clone();
                candidate.search_snippet = profile.search_snippet.clone();
                candidate.search_meta = profile.search_meta.clone();
                candidate.updated_at = now;

                sqlx::query(
                    r#"
                    UPDATE candidates SET
                        search_provider = $1,
                        search_query = $2,
                        search_title = $3,
                        search_snippet = $4,
                        search_meta = $5,
                        name_hint = $6,
                        headline_hint = $7,
                        location_hint = $8,
                        company_hint = $9,
                        updated_at = $10
                    WHERE id = $11
                    "#,
                )
                .bind(&candidate.search_provider)
                .bind(&candidate.search_query)
                .bind(&candidate.search_title)
                .bind(&candidate.search_snippet)
                .bind(&candidate.search_meta)
                .bind(&candidate.name_hint)
                .bind(&candidate.headline_hint)
                .bind(&candidate.location_hint)
                .bind(&candidate.company_hint)
                .bind(candidate.updated_at)
                .bind(candidate.id)
                .execute(&mut *tx)
                .await?;

                UpsertOutcome {
                    candidate,
                    newly_created: false,
                }
            }
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn load_with_snapshots(
        &self,
        tenant_id: &str,
        candidate_ids: &[Uuid],
        tracks: &[&str],
    ) -> Result<Vec<PoolCandidate>> {
        if candidate_ids.is_empty() {
            return Ok(Vec::new());
        }
        let rows = sqlx::query(
            r#"
            SELECT * FROM candidates
            WHERE tenant_id = $1 AND id = ANY($2)
            "#,
        )
        .bind(tenant_id)
        .bind(candidate_ids)
        .fetch_all(&self.pool)
        .await?;

        let candidates: Vec<Candidate> = rows
            .iter()
            .map(row_to_candidate)
            .collect::<sqlx::Result<_>>()?;
        let ids: Vec<Uuid> = candidates.iter().map(|c| c.id).collect();
        let mut snapshots = snapshots_for(&self.pool, &ids, tracks).await?;

        Ok(candidates
            .into_iter()
            .map(|candidate| {
                let snaps = snapshots.remove(&candidate.id).unwrap_or_default();
                PoolCandidate {
                    candidate,
                    snapshots: snaps,
                }
            })
            .collect())
    }
}

#[async_trait]
impl RequestStore for PgStore {
    async fn get(&self, request_id: Uuid) -> Result<Option<SourcingRequest>> {
        let row = sqlx::query(r#"SELECT * FROM sourcing_requests WHERE id = $1"#)
            .bind(request_id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row_to_request(&row)?)),
            None => Ok(None),
        }
    }

    async fn mark_processing(&self, request_id: Uuid) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sourcing_requests
            SET status = 'processing', updated_at = $1
            WHERE id = $2 AND status = 'queued'
            "#,
        )
        .bind(Utc::now())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn merge_diagnostics(&self, request_id: Uuid, patch: Diagnostics) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(r#"SELECT diagnostics FROM sourcing_requests WHERE id = $1 FOR UPDATE"#)
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(crate::errors::SourcingError::RequestNotFound(request_id));
        };

        let current: Option<serde_json::Value> = row.try_get("diagnostics")?;
        let mut diagnostics = Diagnostics::from_value(current.as_ref());
        diagnostics.merge(patch);

        sqlx::query(
            r#"UPDATE sourcing_requests SET diagnostics = $1, updated_at = $2 WHERE id = $3"#,
        )
        .bind(diagnostics.to_value())
        .bind(Utc::now())
        .bind(request_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
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
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(r#"SELECT diagnostics FROM sourcing_requests WHERE id = $1 FOR UPDATE"#)
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(crate::errors::SourcingError::RequestNotFound(request_id));
        };

        let current: Option<serde_json::Value> = row.try_get("diagnostics")?;
        let mut diagnostics = Diagnostics::from_value(current.as_ref());
        diagnostics.merge(patch);

        let now = Utc::now();
        sqlx::query(
            r#"
            UPDATE sourcing_requests SET
                status = 'complete',
                completed_at = $1,
                result_count = $2,
                queries_executed = $3,
                quality_gate_triggered = $4,
                diagnostics = $5,
                updated_at = $6
            WHERE id = $7
            "#,
        )
        .bind(now)
        .bind(result_count)
        .bind(queries_executed)
        .bind(quality_gate_triggered)
        .bind(diagnostics.to_value())
        .bind(now)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn fail(&self, request_id: Uuid, error: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(r#"SELECT diagnostics FROM sourcing_requests WHERE id = $1 FOR UPDATE"#)
            .bind(request_id)
            .fetch_optional(&mut *tx)
            .await?;
        let Some(row) = row else {
            return Err(crate::errors::SourcingError::RequestNotFound(request_id));
        };

        let current: Option<serde_json::Value> = row.try_get("diagnostics")?;
        let mut diagnostics = Diagnostics::from_value(current.as_ref());
        diagnostics.merge(Diagnostics {
            error: Some(error.to_string()),
            ..Diagnostics::default()
        });

        sqlx::query(
            r#"
            UPDATE sourcing_requests
            SET status = 'failed', diagnostics = $1, updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(diagnostics.to_value())
        .bind(Utc::now())
        .bind(request_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn record_callback_attempt(&self, request_id: Uuid, error: Option<&str>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sourcing_requests
            SET callback_attempts = callback_attempts + 1,
                last_callback_error = COALESCE($1, last_callback_error),
                updated_at = $2
            WHERE id = $3
            "#,
        )
        .bind(error)
        .bind(Utc::now())
        .bind(request_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, request_id: Uuid, status: RequestStatus) -> Result<()> {
        sqlx::query(r#"UPDATE sourcing_requests SET status = $1, updated_at = $2 WHERE id = $3"#)
            .bind(status.as_str())
            .bind(Utc::now())
            .bind(request_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn sweepable_callback_failures(
        &self,
        completed_before: DateTime<Utc>,
        limit: usize,
        tenant_id: Option<&str>,
    ) -> Result<Vec<SourcingRequest>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM sourcing_requests
            WHERE status = 'callback_failed'
              AND completed_at IS NOT NULL
              AND completed_at < $1
              AND ($2::TEXT IS NULL OR tenant_id = $2)
            ORDER BY completed_at ASC
            LIMIT $3
            "#,
        )
        .bind(completed_before)
        .bind(tenant_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| Ok(row_to_request(row)?)).collect()
    }
}

#[async_trait]
impl OutputStore for PgStore {
    async fn replace_for_request(
        &self,
        request_id: Uuid,
        rows: &[NewSourcingCandidate],
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(r#"DELETE FROM sourcing_candidates WHERE request_id = $1"#)
            .bind(request_id)
            .execute(&mut *tx)
            .await?;

        for (index, row) in rows.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO sourcing_candidates (
                    request_id, candidate_id, fit_score, fit_breakdown,
                    source_type, enrichment_status, rank
                ) VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(request_id)
            .bind(row.candidate_id)
            .bind(row.fit_score)
            .bind(serde_json::to_value(&row.fit_breakdown)?)
            .bind(row.source_type.as_str())
            .bind(row.enrichment_status.as_str())
            .bind((index + 1) as i32)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_for_request(&self, request_id: Uuid) -> Result<Vec<SourcingCandidateRow>> {
        let rows = sqlx::query(
            r#"SELECT * FROM sourcing_candidates WHERE request_id = $1 ORDER BY rank ASC"#,
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(|row| Ok(row_to_output(row)?)).collect()
    }

    async fn apply_rerank(
        &self,
        request_id: Uuid,
        updates: &[RerankUpdate],
        reranked_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for update in updates {
            sqlx::query(
                r#"
                UPDATE sourcing_candidates SET
                    fit_score = $1,
                    fit_breakdown = $2,
                    enrichment_status = $3,
                    rank = $4
                WHERE request_id = $5 AND candidate_id = $6
                "#,
            )
            .bind(update.fit_score)
            .bind(serde_json::to_value(&update.fit_breakdown)?)
            .bind(update.enrichment_status.as_str())
            .bind(update.rank)
            .bind(request_id)
            .bind(update.candidate_id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"UPDATE sourcing_requests SET last_reranked_at = $1, updated_at = $1 WHERE id = $2"#,
        )
        .bind(reranked_at)
        .bind(request_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn requests_containing(
        &self,
        tenant_id: &str,
        candidate_id: Uuid,
        status: RequestStatus,
    ) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            r#"
            SELECT sc.request_id
            FROM sourcing_candidates sc
            JOIN sourcing_requests sr ON sr.id = sc.request_id
            WHERE sr.tenant_id = $1 AND sc.candidate_id = $2 AND sr.status = $3
            "#,
        )
        .bind(tenant_id)
        .bind(candidate_id)
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<Uuid, _>("request_id")?))
            .collect()
    }
}

#[async_trait]
impl EnrichmentSessions for PgStore {
    async fn create(&self, tenant_id: &str, candidate_id: Uuid, priority: u8) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let active = sqlx::query(
            r#"
            SELECT 1 AS present FROM enrichment_sessions
            WHERE tenant_id = $1 AND candidate_id = $2 AND status IN ('queued', 'running')
            LIMIT 1
            "#,
        )
        .bind(tenant_id)
        .bind(candidate_id)
        .fetch_optional(&mut *tx)
        .await?;

        if active.is_some() {
            tx.commit().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            INSERT INTO enrichment_sessions (id, tenant_id, candidate_id, priority, status, created_at)
            VALUES ($1, $2, $3, $4, 'queued', $5)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(tenant_id)
        .bind(candidate_id)
        .bind(priority as i32)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl NoveltyStore for PgStore {
    async fn recently_exposed(
        &self,
        tenant_id: &str,
        role_family: &str,
        city: &str,
        window_days: i64,
    ) -> Result<HashSet<Uuid>> {
        let since = Utc::now() - Duration::days(window_days.max(1));

        // Recent requests first; role family and city are derived from each
        // request's job context, so the filter happens here rather than SQL.
        let rows = sqlx::query(
            r#"
            SELECT id, job_context FROM sourcing_requests
            WHERE tenant_id = $1
              AND status IN ('complete', 'callback_sent')
              AND completed_at >= $2
            "#,
        )
        .bind(tenant_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut matching_requests: Vec<Uuid> = Vec::new();
        for row in &rows {
            let id: Uuid = row.try_get("id")?;
            let job_context: serde_json::Value = row.try_get("job_context")?;
            let Ok(ctx) = serde_json::from_value::<JobContext>(job_context) else {
                continue;
            };
            let requirements = JobRequirements::build(&ctx);
            let family_matches = requirements
                .role_family
                .map(|f| f.as_str() == role_family)
                .unwrap_or(false);
            let city_matches = requirements
                .location
                .as_deref()
                .and_then(geo::primary_city)
                .map(|c| c == city)
                .unwrap_or(false);
            if family_matches && city_matches {
                matching_requests.push(id);
            }
        }

        if matching_requests.is_empty() {
            return Ok(HashSet::new());
        }

        let rows = sqlx::query(
            r#"SELECT DISTINCT candidate_id FROM sourcing_candidates WHERE request_id = ANY($1)"#,
        )
        .bind(&matching_requests)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| Ok(row.try_get::<Uuid, _>("candidate_id")?))
            .collect()
    }
}

#[async_trait]
impl TelemetryStore for PgStore {
    async fn record_query_run(&self, telemetry: &QueryRunTelemetry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sourcing_query_runs (
                id, request_id, tenant_id, phase, query, provider_used,
                used_fallback_provider, result_count, accepted_count,
                cumulative_discovered, latency_ms, executed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(telemetry.request_id)
        .bind(&telemetry.tenant_id)
        .bind(&telemetry.phase)
        .bind(&telemetry.query)
        .bind(&telemetry.provider_used)
        .bind(telemetry.used_fallback_provider)
        .bind(telemetry.result_count as i32)
        .bind(telemetry.accepted_count as i32)
        .bind(telemetry.cumulative_discovered as i32)
        .bind(telemetry.latency_ms as i64)
        .bind(telemetry.executed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
