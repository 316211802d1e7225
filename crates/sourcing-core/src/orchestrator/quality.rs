//! Pool quality gate and discovery sizing
//!
//! The gate decides whether the tenant's pool alone can serve the request;
//! its verdict widens the SERP budget and feeds the discovery target.

use serde::Serialize;

use crate::config::SourcingConfig;
use crate::ranker::{MatchTier, ScoredCandidate};

/// Quality metrics over the scored pool.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityAssessment {
    pub triggered: bool,
    pub avg_fit_top_k: f64,
    pub count_above_threshold: usize,
    pub strict_top_k_count: usize,
    pub strict_coverage_rate: f64,
    pub location_hint_coverage: f64,
    pub top_k_size: usize,
}

/// Assess the scored pool (already sorted best-first).
pub fn assess(
    scored: &[ScoredCandidate],
    location_hint_coverage: f64,
    has_location_constraint: bool,
    config: &SourcingConfig,
) -> QualityAssessment {
    let top_k: &[ScoredCandidate] = &scored[..scored.len().min(config.quality_top_k)];

    if top_k.is_empty() {
        return QualityAssessment {
            triggered: true,
            location_hint_coverage,
            ..QualityAssessment::default()
        };
    }

    let avg_fit_top_k =
        top_k.iter().map(|s| s.fit_score).sum::<f64>() / top_k.len() as f64;
    let count_above_threshold = top_k
        .iter()
        .filter(|s| s.fit_score >= config.quality_threshold)
        .count();
    let strict_top_k_count = top_k
        .iter()
        .filter(|s| s.match_tier == MatchTier::Strict)
        .count();
    let strict_coverage_rate = strict_top_k_count as f64 / top_k.len() as f64;

    let strict_coverage_deficient = has_location_constraint
        && strict_top_k_count < config.min_strict_matches_before_expand.min(top_k.len());

    let triggered = avg_fit_top_k < config.quality_min_avg_fit
        || count_above_threshold < config.quality_min_count_above.min(top_k.len())
        || strict_coverage_deficient
        || (has_location_constraint && location_hint_coverage < config.location_coverage_floor);

    QualityAssessment {
        triggered,
        avg_fit_top_k,
        count_above_threshold,
        strict_top_k_count,
        strict_coverage_rate,
        location_hint_coverage,
        top_k_size: top_k.len(),
    }
}

/// Why discovery ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryReason {
    PoolDeficit,
    LowQualityPool,
    DeficitAndLowQuality,
    MinimumDiscoveryFloor,
}

impl DiscoveryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PoolDeficit => "pool_deficit",
            Self::LowQualityPool => "low_quality_pool",
            Self::DeficitAndLowQuality => "deficit_and_low_quality",
            Self::MinimumDiscoveryFloor => "minimum_discovery_floor",
        }
    }
}

/// How many discovered candidates to chase, and why.
pub fn discovery_target(
    pool_size: usize,
    strict_pool_count: usize,
    gate_triggered: bool,
    has_location_constraint: bool,
    config: &SourcingConfig,
) -> (usize, Option<DiscoveryReason>) {
    let target_count = config.target_count;
    if target_count == 0 {
        return (0, None);
    }

    let pool_deficit = target_count.saturating_sub(pool_size);
    let quality_driven = if gate_triggered {
        (config.min_discovery_share_low_quality * target_count as f64).ceil() as usize
    } else {
        0
    };
    let strict_coverage_deficit = if has_location_constraint {
        config
            .min_strict_matches_before_expand
            .saturating_sub(strict_pool_count)
    } else {
        0
    };

    let want = pool_deficit
        .max(quality_driven)
        .max(strict_coverage_deficit)
        .max(config.min_discovery_per_run);
    let cap = (config.max_discovery_share * target_count as f64).floor() as usize;
    let target = want.min(cap);

    if target == 0 {
        return (0, None);
    }

    let deficit_drove = pool_deficit > 0;
    let quality_drove = gate_triggered && quality_driven > 0;
    let reason = match (deficit_drove, quality_drove) {
        (true, true) => DiscoveryReason::DeficitAndLowQuality,
        (true, false) => DiscoveryReason::PoolDeficit,
        (false, true) => DiscoveryReason::LowQualityPool,
        (false, false) => DiscoveryReason::MinimumDiscoveryFloor,
    };
    (target, Some(reason))
}
