//! Enrichment session planning
//!
//! After assembly, four separate budgets feed the enrichment subsystem:
//! rank-driven sessions for the top of the output, a reserve for discovered
//! rows, a reserve for discovered orphans, and stale-snapshot refreshes.
//! Priorities are adjusted by SERP capture evidence and clamped to [1, 99].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use uuid::Uuid;

use crate::config::SourcingConfig;
use crate::errors::Result;
use crate::geo;
use crate::store::models::{Candidate, EnrichmentStatus};
use crate::store::EnrichmentSessions;

use super::assembly::{AssembledRow, RowOrigin};

/// Priority bands per budget.
const RANK_DRIVEN_BASE: i32 = 10;
const DISCOVERED_RESERVE_BASE: i32 = 30;
const DISCOVERED_ORPHAN_BASE: i32 = 40;
const STALE_REFRESH_PRIORITY: i32 = 50;

#[derive(Debug, Clone, Default, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichStats {
    pub rank_driven: usize,
    pub discovered_reserve: usize,
    pub discovered_orphans: usize,
    pub stale_refresh: usize,
    pub deduped: usize,
}

impl EnrichStats {
    pub fn total(&self) -> usize {
        self.rank_driven + self.discovered_reserve + self.discovered_orphans + self.stale_refresh
    }
}

fn needs_enrichment(candidate: &Candidate) -> bool {
    matches!(
        candidate.enrichment_status,
        EnrichmentStatus::Pending | EnrichmentStatus::Failed
    )
}

/// Country resolved from the candidate's best evidence: location hint
/// first, then the SERP capture locale.
fn candidate_country(candidate: &Candidate) -> Option<&'static str> {
    if let Some(hint) = candidate.location_hint.as_deref() {
        if let Some(code) = geo::country_code_for(&geo::canonicalize_location(hint)) {
            return Some(code);
        }
    }
    serp_meta_country(candidate)
}

/// Country claimed by the capturing SERP result's locale metadata.
pub fn serp_meta_country(candidate: &Candidate) -> Option<&'static str> {
    let meta = candidate.search_meta.as_ref()?;
    for field in ["locale", "gl", "countryCode", "country"] {
        if let Some(value) = meta.get(field).and_then(|v| v.as_str()) {
            if let Some(code) = geo::country_code_for(&geo::canonicalize_location(value)) {
                return Some(code);
            }
        }
    }
    None
}

fn capture_age_days(candidate: &Candidate) -> Option<i64> {
    candidate
        .search_meta
        .as_ref()
        .and_then(|meta| meta.get("ageDays"))
        .and_then(|v| v.as_i64())
}

/// Adjust a base priority by SERP capture evidence; lower runs sooner.
fn adjust_priority(base: i32, candidate: &Candidate, target_country: Option<&str>) -> u8 {
    let mut priority = base;

    if let Some(age) = capture_age_days(candidate) {
        if age <= 30 {
            priority -= 3;
        } else if age <= 90 {
            priority -= 1;
        } else if age > 365 {
            priority += 2;
        }
    }

    if let (Some(target), Some(candidate_code)) = (target_country, candidate_country(candidate)) {
        if candidate_code == target {
            priority -= 4;
        } else {
            priority += 4;
        }
    }

    priority.clamp(1, 99) as u8
}

/// Enqueue all four enrichment budgets, deduped against live sessions.
#[allow(clippy::too_many_arguments)]
pub async fn enqueue_enrichment(
    sessions: &Arc<dyn EnrichmentSessions>,
    tenant_id: &str,
    assembled: &[AssembledRow],
    candidates_by_id: &HashMap<Uuid, Candidate>,
    discovered_orphans: &[Candidate],
    stale_pool_ids: &[Uuid],
    target_country: Option<&str>,
    config: &SourcingConfig,
) -> Result<EnrichStats> {
    let mut stats = EnrichStats::default();
    let mut requested: HashSet<Uuid> = HashSet::new();
    let cap = config.job_max_enrich;

    // Rank-driven: top unenriched assembled rows.
    let mut batch: Vec<(Uuid, u8)> = Vec::new();
    for (index, row) in assembled.iter().enumerate() {
        if batch.len() >= config.initial_enrich_count {
            break;
        }
        let Some(candidate) = candidates_by_id.get(&row.score.candidate_id) else {
            continue;
        };
        if !needs_enrichment(candidate) || requested.contains(&candidate.id) {
            continue;
        }
        let rank = (index + 1) as i32;
        let priority = adjust_priority(RANK_DRIVEN_BASE + (rank - 1), candidate, target_country);
        requested.insert(candidate.id);
        batch.push((candidate.id, priority));
    }
    let (created, deduped) = create_all(sessions, tenant_id, &batch, cap, stats.total()).await?;
    stats.rank_driven = created;
    stats.deduped += deduped;

    // Reserve for discovered rows already in the output.
    let mut batch: Vec<(Uuid, u8)> = Vec::new();
    for row in assembled.iter().filter(|r| r.origin == RowOrigin::Discovered) {
        if batch.len() >= config.discovered_enrich_reserve {
            break;
        }
        let Some(candidate) = candidates_by_id.get(&row.score.candidate_id) else {
            continue;
        };
        if !needs_enrichment(candidate) || requested.contains(&candidate.id) {
            continue;
        }
        let priority = adjust_priority(
            DISCOVERED_RESERVE_BASE + batch.len() as i32,
            candidate,
            target_country,
        );
        requested.insert(candidate.id);
        batch.push((candidate.id, priority));
    }
    let (created, deduped) = create_all(sessions, tenant_id, &batch, cap, stats.total()).await?;
    stats.discovered_reserve = created;
    stats.deduped += deduped;

    // Reserve for discovered candidates that missed the output.
    let mut batch: Vec<(Uuid, u8)> = Vec::new();
    for candidate in discovered_orphans {
        if batch.len() >= config.discovered_orphan_enrich_reserve {
            break;
        }
        if !needs_enrichment(candidate) || requested.contains(&candidate.id) {
            continue;
        }
        let priority = adjust_priority(
            DISCOVERED_ORPHAN_BASE + batch.len() as i32,
            candidate,
            target_country,
        );
        requested.insert(candidate.id);
        batch.push((candidate.id, priority));
    }
    let (created, deduped) = create_all(sessions, tenant_id, &batch, cap, stats.total()).await?;
    stats.discovered_orphans = created;
    stats.deduped += deduped;

    // Stale snapshot refreshes.
    let mut batch: Vec<(Uuid, u8)> = Vec::new();
    for candidate_id in stale_pool_ids {
        if batch.len() >= config.stale_refresh_max_per_run {
            break;
        }
        if requested.contains(candidate_id) {
            continue;
        }
        requested.insert(*candidate_id);
        batch.push((*candidate_id, STALE_REFRESH_PRIORITY as u8));
    }
    let (created, deduped) = create_all(sessions, tenant_id, &batch, cap, stats.total()).await?;
    stats.stale_refresh = created;
    stats.deduped += deduped;

    Ok(stats)
}

async fn create_all(
    sessions: &Arc<dyn EnrichmentSessions>,
    tenant_id: &str,
    batch: &[(Uuid, u8)],
    cap: usize,
    already_placed: usize,
) -> Result<(usize, usize)> {
    let mut created = 0usize;
    let mut deduped = 0usize;
    for (candidate_id, priority) in batch {
        if already_placed + created >= cap {
            break;
        }
        if sessions.create(tenant_id, *candidate_id, *priority).await? {
            created += 1;
        } else {
            deduped += 1;
        }
    }
    Ok((created, deduped))
}
