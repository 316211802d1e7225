//! Two-tier output assembly
//!
//! The ordering contract of the whole system: a discovered reserve at the
//! top, strict pool next (after low-fit demotion and optional rescue),
//! expanded pool after that, remaining discovered last. Novelty suppression
//! then swaps recently-exposed low-tier rows for fresh backfill.

use std::collections::HashSet;

use uuid::Uuid;

use crate::ranker::{compare_fit_with_confidence, MatchTier, ScoredCandidate};

/// Where an assembled row came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrigin {
    Pool,
    Discovered,
}

/// One row of the assembled output.
#[derive(Debug, Clone)]
pub struct AssembledRow {
    pub score: ScoredCandidate,
    pub origin: RowOrigin,
}

/// Assembly knobs, lifted from configuration.
#[derive(Debug, Clone, Copy)]
pub struct AssemblyOptions {
    pub target_count: usize,
    pub min_discovered_in_output: usize,
    pub best_matches_min_fit_score: f64,
    pub strict_rescue_count: usize,
    pub strict_rescue_min_fit_score: f64,
    pub fit_score_epsilon: f64,
}

/// Counters reported in diagnostics.
#[derive(Debug, Clone, Default)]
pub struct AssemblyStats {
    pub strict_demoted_count: usize,
    pub demoted_strict_with_city_match: usize,
    pub strict_rescued_count: usize,
    pub expansion_reason: Option<&'static str>,
    pub discovered_in_output: usize,
    pub novelty_suppressed_count: usize,
}

pub struct Assembled {
    pub rows: Vec<AssembledRow>,
    pub stats: AssemblyStats,
}

/// Assemble the final ordering from the scored pool and scored discoveries.
///
/// `promotion_qualified` marks discovered candidates allowed into the
/// top-of-list reserve.
pub fn assemble(
    pool: &[ScoredCandidate],
    discovered: &[ScoredCandidate],
    promotion_qualified: &HashSet<Uuid>,
    options: &AssemblyOptions,
) -> Assembled {
    let mut stats = AssemblyStats::default();
    let target = options.target_count;
    if target == 0 {
        return Assembled {
            rows: Vec::new(),
            stats,
        };
    }

    let epsilon = options.fit_score_epsilon;
    let by_fit =
        |a: &ScoredCandidate, b: &ScoredCandidate| compare_fit_with_confidence(a, b, epsilon);

    // 1. Discovered reserve, filled with promotion-qualified strict rows.
    let reserve = options
        .min_discovered_in_output
        .min(discovered.len())
        .min(target);
    let mut promoted: Vec<&ScoredCandidate> = discovered
        .iter()
        .filter(|s| {
            promotion_qualified.contains(&s.candidate_id) && s.match_tier == MatchTier::Strict
        })
        .collect();
    promoted.sort_by(|a, b| by_fit(a, b));
    promoted.truncate(reserve);

    let mut rows: Vec<AssembledRow> = promoted
        .iter()
        .map(|s| AssembledRow {
            score: (*s).clone(),
            origin: RowOrigin::Discovered,
        })
        .collect();
    let remaining_reserve = reserve - rows.len();
    let pool_fill_limit = target - remaining_reserve;

    // 2. Demote low-fit strict pool rows to expanded.
    let mut strict: Vec<&ScoredCandidate> = Vec::new();
    let mut expanded: Vec<&ScoredCandidate> = Vec::new();
    let mut demoted: Vec<&ScoredCandidate> = Vec::new();
    for score in pool {
        match score.match_tier {
            MatchTier::Strict if score.fit_score < options.best_matches_min_fit_score => {
                demoted.push(score);
            }
            MatchTier::Strict => strict.push(score),
            MatchTier::Expanded => expanded.push(score),
        }
    }
    // 3. Strict rescue when demotion emptied the strict tier.
    if strict.is_empty() && !demoted.is_empty() {
        stats.expansion_reason = Some("strict_low_quality");
        if options.strict_rescue_count > 0 {
            let mut rescuable: Vec<&ScoredCandidate> = demoted
                .iter()
                .copied()
                .filter(|s| s.fit_score >= options.strict_rescue_min_fit_score)
                .collect();
            rescuable.sort_by(|a, b| by_fit(a, b));
            rescuable.truncate(options.strict_rescue_count);
            stats.strict_rescued_count = rescuable.len();
            let rescued: HashSet<Uuid> = rescuable.iter().map(|s| s.candidate_id).collect();
            demoted.retain(|s| !rescued.contains(&s.candidate_id));
            strict = rescuable;
        }
    }

    // Rescued rows no longer count as demoted.
    stats.strict_demoted_count = demoted.len();
    stats.demoted_strict_with_city_match = demoted
        .iter()
        .filter(|s| {
            matches!(
                s.location_match,
                crate::ranker::LocationMatchType::CityExact
                    | crate::ranker::LocationMatchType::CityAlias
            )
        })
        .count();

    // Demoted rows compete as expanded from here on.
    expanded.extend(demoted);

    strict.sort_by(|a, b| by_fit(a, b));
    expanded.sort_by(|a, b| by_fit(a, b));

    // 4. Strict pool, then expanded pool, up to the pool fill limit.
    for score in strict.iter().chain(expanded.iter()) {
        if rows.len() >= pool_fill_limit {
            break;
        }
        let mut row_score = (*score).clone();
        // A demoted row rides in the expanded section; its persisted tier
        // must agree with its position.
        if row_score.match_tier == MatchTier::Strict
            && row_score.fit_score < options.best_matches_min_fit_score
            && !strict.iter().any(|s| s.candidate_id == row_score.candidate_id)
        {
            row_score.match_tier = MatchTier::Expanded;
        }
        rows.push(AssembledRow {
            score: row_score,
            origin: RowOrigin::Pool,
        });
    }

    // 5. Remaining discovered fill to target, qualified first.
    let placed: HashSet<Uuid> = rows.iter().map(|r| r.score.candidate_id).collect();
    let mut tail: Vec<&ScoredCandidate> = discovered
        .iter()
        .filter(|s| !placed.contains(&s.candidate_id))
        .collect();
    tail.sort_by(|a, b| {
        let qa = promotion_qualified.contains(&a.candidate_id);
        let qb = promotion_qualified.contains(&b.candidate_id);
        qb.cmp(&qa).then_with(|| by_fit(a, b))
    });
    for score in tail {
        if rows.len() >= target {
            break;
        }
        rows.push(AssembledRow {
            score: score.clone(),
            origin: RowOrigin::Discovered,
        });
    }

    stats.discovered_in_output = rows
        .iter()
        .filter(|r| r.origin == RowOrigin::Discovered)
        .count();

    Assembled { rows, stats }
}

/// Suppress recently-exposed, below-threshold expanded rows, backfilling
/// from the unplaced remainder of the pool and discoveries.
pub fn suppress_novelty(
    assembled: &mut Assembled,
    recently_exposed: &HashSet<Uuid>,
    pool: &[ScoredCandidate],
    discovered: &[ScoredCandidate],
    options: &AssemblyOptions,
) {
    if recently_exposed.is_empty() || assembled.rows.is_empty() {
        return;
    }

    // Fit threshold at the top decile of the current assembly.
    let mut fits: Vec<f64> = assembled.rows.iter().map(|r| r.score.fit_score).collect();
    fits.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
    let decile_index = (assembled.rows.len() / 10).min(fits.len().saturating_sub(1));
    let threshold = fits[decile_index];

    let suppressed: Vec<usize> = assembled
        .rows
        .iter()
        .enumerate()
        .filter(|(_, row)| {
            row.score.match_tier == MatchTier::Expanded
                && recently_exposed.contains(&row.score.candidate_id)
                && row.score.fit_score < threshold
        })
        .map(|(index, _)| index)
        .collect();
    if suppressed.is_empty() {
        return;
    }

    for index in suppressed.iter().rev() {
        assembled.rows.remove(*index);
    }
    assembled.stats.novelty_suppressed_count = suppressed.len();

    // Backfill from unplaced expanded pool first, then unplaced discovered,
    // skipping anything that would itself be suppressed.
    let placed: HashSet<Uuid> = assembled
        .rows
        .iter()
        .map(|r| r.score.candidate_id)
        .collect();
    let backfill: Vec<(&ScoredCandidate, RowOrigin)> = pool
        .iter()
        .map(|s| (s, RowOrigin::Pool))
        .chain(discovered.iter().map(|s| (s, RowOrigin::Discovered)))
        .filter(|(s, _)| !placed.contains(&s.candidate_id))
        .filter(|(s, _)| !recently_exposed.contains(&s.candidate_id))
        .collect();

    for (score, origin) in backfill {
        if assembled.rows.len() >= options.target_count {
            break;
        }
        let mut row_score = score.clone();
        // Backfill lands in the expanded section.
        row_score.match_tier = MatchTier::Expanded;
        assembled.rows.push(AssembledRow {
            score: row_score,
            origin,
        });
    }

    assembled.stats.discovered_in_output = assembled
        .rows
        .iter()
        .filter(|r| r.origin == RowOrigin::Discovered)
        .count();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ranker::{DataConfidence, FitBreakdown, LocationMatchType, SkillScoreMethod};

    fn scored(id: u128, fit: f64, tier: MatchTier, location: LocationMatchType) -> ScoredCandidate {
        ScoredCandidate {
            candidate_id: Uuid::from_u128(id),
            fit_score: fit,
            breakdown: FitBreakdown {
                skill_score: fit,
                role_score: 0.5,
                seniority_score: 0.5,
                freshness_score: 0.1,
                skill_score_method: SkillScoreMethod::TextFallback,
            },
            match_tier: tier,
            location_match: location,
            data_confidence: DataConfidence::Medium,
        }
    }

    fn options() -> AssemblyOptions {
        AssemblyOptions {
            target_count: 100,
            min_discovered_in_output: 15,
            best_matches_min_fit_score: 0.45,
            strict_rescue_count: 5,
            strict_rescue_min_fit_score: 0.30,
            fit_score_epsilon: 0.02,
        }
    }

    /// Low-quality strict pool with discovery: promoted discovered lead,
    /// rescued strict follow, expanded fills the remainder.
    #[test]
    fn test_low_quality_strict_pool_with_discovery() {
        // 40 strict matches, all below the 0.45 bar.
        let mut pool: Vec<ScoredCandidate> = (0..40)
            .map(|i| scored(i, 0.30, MatchTier::Strict, LocationMatchType::CityExact))
            .collect();
        // 60 expanded matches of varying scores.
        pool.extend(
            (100..160).map(|i| {
                scored(i, 0.20 + ((i - 100) as f64) * 0.005, MatchTier::Expanded, LocationMatchType::None)
            }),
        );

        // 15 discovered, 6 promotion-qualified strict.
        let mut discovered: Vec<ScoredCandidate> = (200..206)
            .map(|i| scored(i, 0.60, MatchTier::Strict, LocationMatchType::CityExact))
            .collect();
        discovered.extend(
            (206..215).map(|i| scored(i, 0.25, MatchTier::Expanded, LocationMatchType::None)),
        );
        let qualified: HashSet<Uuid> = (200..206).map(Uuid::from_u128).collect();

        let assembled = assemble(&pool, &discovered, &qualified, &options());

        assert_eq!(assembled.rows.len(), 100);
        assert_eq!(assembled.stats.strict_demoted_count, 35);
        assert_eq!(assembled.stats.demoted_strict_with_city_match, 35);
        assert_eq!(assembled.stats.strict_rescued_count, 5);
        assert_eq!(assembled.stats.expansion_reason, Some("strict_low_quality"));

        // Ranks 1..=6: promoted discovered.
        for row in &assembled.rows[..6] {
            assert_eq!(row.origin, RowOrigin::Discovered);
            assert_eq!(row.score.match_tier, MatchTier::Strict);
        }
        // Ranks 7..=11: rescued strict pool rows.
        for row in &assembled.rows[6..11] {
            assert_eq!(row.origin, RowOrigin::Pool);
            assert_eq!(row.score.match_tier, MatchTier::Strict);
        }
        // Everything after rank 11 is expanded tier.
        for row in &assembled.rows[11..] {
            assert_eq!(row.score.match_tier, MatchTier::Expanded);
        }
        // Strict rows strictly precede expanded rows.
        let first_expanded = assembled
            .rows
            .iter()
            .position(|r| r.score.match_tier == MatchTier::Expanded)
            .unwrap();
        assert!(assembled.rows[first_expanded..]
            .iter()
            .all(|r| r.score.match_tier == MatchTier::Expanded));
    }

    #[test]
    fn test_target_zero_returns_empty() {
        let pool = vec![scored(1, 0.9, MatchTier::Strict, LocationMatchType::CityExact)];
        let assembled = assemble(
            &pool,
            &[],
            &HashSet::new(),
            &AssemblyOptions {
                target_count: 0,
                ..options()
            },
        );
        assert!(assembled.rows.is_empty());
    }

    #[test]
    fn test_healthy_strict_pool_keeps_order() {
        let pool: Vec<ScoredCandidate> = (0..30)
            .map(|i| {
                scored(
                    i,
                    0.9 - (i as f64) * 0.01,
                    MatchTier::Strict,
                    LocationMatchType::CityExact,
                )
            })
            .collect();
        let assembled = assemble(&pool, &[], &HashSet::new(), &options());

        assert_eq!(assembled.rows.len(), 30);
        assert_eq!(assembled.stats.strict_demoted_count, 0);
        assert!(assembled.stats.expansion_reason.is_none());
        // Descending fit order preserved.
        let fits: Vec<f64> = assembled.rows.iter().map(|r| r.score.fit_score).collect();
        let mut sorted = fits.clone();
        sorted.sort_by(|a, b| b.partial_cmp(a).unwrap());
        assert_eq!(fits, sorted);
    }

    #[test]
    fn test_reserve_capped_by_discovered_count() {
        let pool: Vec<ScoredCandidate> = (0..200)
            .map(|i| scored(i, 0.8, MatchTier::Strict, LocationMatchType::CityExact))
            .collect();
        let discovered =
            vec![scored(500, 0.7, MatchTier::Strict, LocationMatchType::CityExact)];
        let qualified: HashSet<Uuid> = [Uuid::from_u128(500)].into_iter().collect();

        let assembled = assemble(&pool, &discovered, &qualified, &options());
        assert_eq!(assembled.rows.len(), 100);
        assert_eq!(assembled.stats.discovered_in_output, 1);
        assert_eq!(assembled.rows[0].origin, RowOrigin::Discovered);
    }

    #[test]
    fn test_unqualified_discovered_fill_tail() {
        let pool: Vec<ScoredCandidate> = (0..5)
            .map(|i| scored(i, 0.8, MatchTier::Strict, LocationMatchType::CityExact))
            .collect();
        let discovered: Vec<ScoredCandidate> = (100..104)
            .map(|i| scored(i, 0.2, MatchTier::Expanded, LocationMatchType::None))
            .collect();

        let assembled = assemble(&pool, &discovered, &HashSet::new(), &options());
        // Pool first, unqualified discovered in the tail.
        assert_eq!(assembled.rows.len(), 9);
        assert!(assembled.rows[..5].iter().all(|r| r.origin == RowOrigin::Pool));
        assert!(assembled.rows[5..]
            .iter()
            .all(|r| r.origin == RowOrigin::Discovered));
    }

    #[test]
    fn test_novelty_suppression_swaps_stale_expanded_rows() {
        // 10 assembled: 2 strict, 8 expanded; plus spare pool for backfill.
        let pool: Vec<ScoredCandidate> = (0..2)
            .map(|i| scored(i, 0.9, MatchTier::Strict, LocationMatchType::CityExact))
            .chain((10..18).map(|i| {
                scored(i, 0.5 - ((i - 10) as f64) * 0.03, MatchTier::Expanded, LocationMatchType::None)
            }))
            .chain((50..55).map(|i| scored(i, 0.2, MatchTier::Expanded, LocationMatchType::None)))
            .collect();

        let small = AssemblyOptions {
            target_count: 10,
            min_discovered_in_output: 0,
            ..options()
        };
        let mut assembled = assemble(&pool, &[], &HashSet::new(), &small);
        assert_eq!(assembled.rows.len(), 10);

        // The two weakest expanded rows were recently exposed.
        let exposed: HashSet<Uuid> = [Uuid::from_u128(16), Uuid::from_u128(17)]
            .into_iter()
            .collect();
        suppress_novelty(&mut assembled, &exposed, &pool, &[], &small);

        assert_eq!(assembled.stats.novelty_suppressed_count, 2);
        assert_eq!(assembled.rows.len(), 10);
        for row in &assembled.rows {
            assert!(!exposed.contains(&row.score.candidate_id));
        }
        // Backfill came from the spare expanded pool.
        assert!(assembled
            .rows
            .iter()
            .any(|r| r.score.candidate_id == Uuid::from_u128(50)));
    }

    #[test]
    fn test_novelty_disabled_set_empty_is_noop() {
        let pool: Vec<ScoredCandidate> = (0..5)
            .map(|i| scored(i, 0.5, MatchTier::Expanded, LocationMatchType::None))
            .collect();
        let mut assembled = assemble(&pool, &[], &HashSet::new(), &options());
        let before: Vec<Uuid> = assembled.rows.iter().map(|r| r.score.candidate_id).collect();
        suppress_novelty(&mut assembled, &HashSet::new(), &pool, &[], &options());
        let after: Vec<Uuid> = assembled.rows.iter().map(|r| r.score.candidate_id).collect();
        assert_eq!(before, after);
        assert_eq!(assembled.stats.novelty_suppressed_count, 0);
    }
}
