//! Discovery query runner
//!
//! Executes a query plan under a reserved budget, upserting unseen profiles
//! as pending candidates. Yield is watched per phase: a strict phase that
//! stops producing shifts to fallback early, and a dry fallback phase stops
//! the run.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::errors::Result;
use crate::hints;
use crate::serp::{extract_profile_handle, ProfileSummary, SerpProvider};
use crate::store::models::{Candidate, DiscoveredProfile, QueryRunTelemetry};
use crate::store::{CandidateStore, TelemetryStore};

/// Results fetched per query.
const RESULTS_PER_QUERY: usize = 20;

/// Why the run ended (or shifted phases).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppedReason {
    TargetReached,
    BudgetExhausted,
    CompletedQueries,
    NoQueries,
    StrictLowYieldShifted,
    FallbackLowYieldStopped,
}

impl StoppedReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TargetReached => "target_reached",
            Self::BudgetExhausted => "budget_exhausted",
            Self::CompletedQueries => "completed_queries",
            Self::NoQueries => "no_queries",
            Self::StrictLowYieldShifted => "strict_low_yield_shifted",
            Self::FallbackLowYieldStopped => "fallback_low_yield_stopped",
        }
    }
}

/// Adaptive early-stop thresholds.
#[derive(Debug, Clone, Copy)]
pub struct AdaptiveSettings {
    pub min_strict_attempts: usize,
    pub strict_min_yield: f64,
    pub min_fallback_attempts: usize,
    pub fallback_min_yield: f64,
}

/// Outcome of one discovery run.
#[derive(Debug, Default)]
pub struct DiscoveryOutcome {
    pub discovered: Vec<Candidate>,
    pub queries_executed: usize,
    pub strict_executed: usize,
    pub fallback_executed: usize,
    pub stopped_reason: Option<StoppedReason>,
    pub strict_shifted_early: bool,
}

pub struct DiscoveryRunner {
    serp: Arc<dyn SerpProvider>,
    candidates: Arc<dyn CandidateStore>,
    telemetry: Arc<dyn TelemetryStore>,
    adaptive: AdaptiveSettings,
}

impl DiscoveryRunner {
    pub fn new(
        serp: Arc<dyn SerpProvider>,
        candidates: Arc<dyn CandidateStore>,
        telemetry: Arc<dyn TelemetryStore>,
        adaptive: AdaptiveSettings,
    ) -> Self {
        Self {
            serp,
            candidates,
            telemetry,
            adaptive,
        }
    }

    /// Run the plan: at most `max_queries` across both phases, stopping at
    /// `target_count` accepted candidates.
    pub async fn run(
        &self,
        request_id: Uuid,
        tenant_id: &str,
        plan: &super::planner::QueryPlan,
        max_queries: usize,
        target_count: usize,
    ) -> Result<DiscoveryOutcome> {
        let mut outcome = DiscoveryOutcome::default();
        if plan.is_empty() || max_queries == 0 || target_count == 0 {
            outcome.stopped_reason = Some(StoppedReason::NoQueries);
            return Ok(outcome);
        }

        let mut seen_handles: HashSet<String> = HashSet::new();
        let mut strict_accepted = 0usize;
        let mut fallback_accepted = 0usize;

        'phases: for (phase, queries) in [("strict", &plan.strict), ("fallback", &plan.fallback)] {
            for query in queries {
                if outcome.queries_executed >= max_queries {
                    outcome.stopped_reason = Some(StoppedReason::BudgetExhausted);
                    break 'phases;
                }
                if outcome.discovered.len() >= target_count {
                    outcome.stopped_reason = Some(StoppedReason::TargetReached);
                    break 'phases;
                }

                let accepted = self
                    .run_query(request_id, tenant_id, phase, query, &mut seen_handles, &mut outcome)
                    .await;

                outcome.queries_executed += 1;
                if phase == "strict" {
                    outcome.strict_executed += 1;
                    strict_accepted += accepted;
                } else {
                    outcome.fallback_executed += 1;
                    fallback_accepted += accepted;
                }

                // Adaptive yield checks.
                if phase == "strict"
                    && outcome.strict_executed >= self.adaptive.min_strict_attempts
                    && yield_of(strict_accepted, outcome.strict_executed)
                        < self.adaptive.strict_min_yield
                {
                    if !plan.fallback.is_empty() {
                        tracing::info!(
                            strict_executed = outcome.strict_executed,
                            strict_accepted,
                            "Strict phase yield low, shifting to fallback"
                        );
                        outcome.strict_shifted_early = true;
                        outcome.stopped_reason = Some(StoppedReason::StrictLowYieldShifted);
                        continue 'phases;
                    }
                }
                if phase == "fallback"
                    && outcome.fallback_executed >= self.adaptive.min_fallback_attempts
                    && yield_of(fallback_accepted, outcome.fallback_executed)
                        < self.adaptive.fallback_min_yield
                {
                    outcome.stopped_reason = Some(StoppedReason::FallbackLowYieldStopped);
                    break 'phases;
                }
            }
        }

        if outcome.stopped_reason.is_none()
            || outcome.stopped_reason == Some(StoppedReason::StrictLowYieldShifted)
        {
            outcome.stopped_reason = Some(if outcome.discovered.len() >= target_count {
                StoppedReason::TargetReached
            } else {
                StoppedReason::CompletedQueries
            });
        }

        Ok(outcome)
    }

    /// Execute one query; provider failures log, record empty telemetry,
    /// and return zero accepted.
    async fn run_query(
        &self,
        request_id: Uuid,
        tenant_id: &str,
        phase: &str,
        query: &str,
        seen_handles: &mut HashSet<String>,
        outcome: &mut DiscoveryOutcome,
    ) -> usize {
        let started = Instant::now();
        let search = match self.serp.search_profiles(query, RESULTS_PER_QUERY).await {
            Ok(search) => search,
            Err(err) => {
                tracing::warn!(query, error = %err, "SERP query failed, continuing");
                self.record_telemetry(
                    request_id,
                    tenant_id,
                    phase,
                    query,
                    "unavailable",
                    false,
                    0,
                    0,
                    outcome.discovered.len(),
                    started.elapsed().as_millis() as u64,
                )
                .await;
                return 0;
            }
        };

        // Handle-level dedupe: first against this run, then tenant-wide.
        let mut fresh: Vec<(String, &ProfileSummary)> = Vec::new();
        for result in &search.results {
            let Some(handle) = extract_profile_handle(&result.profile_url) else {
                continue;
            };
            if seen_handles.contains(&handle) || fresh.iter().any(|(h, _)| *h == handle) {
                continue;
            }
            fresh.push((handle, result));
        }
        let handles: Vec<String> = fresh.iter().map(|(h, _)| h.clone()).collect();
        let known = match self.candidates.known_handles(tenant_id, &handles).await {
            Ok(known) => known,
            Err(err) => {
                tracing::warn!(error = %err, "Handle lookup failed, skipping query results");
                HashSet::new()
            }
        };

        let mut accepted = 0usize;
        for (handle, result) in fresh {
            seen_handles.insert(handle.clone());
            if known.contains(&handle) {
                continue;
            }
            let profile = sanitize_profile(query, &search.provider_used, handle, result);
            match self.candidates.upsert_discovered(tenant_id, &profile).await {
                Ok(upserted) => {
                    outcome.discovered.push(upserted.candidate);
                    accepted += 1;
                }
                Err(err) => {
                    tracing::warn!(handle = %profile.profile_handle, error = %err, "Candidate upsert failed");
                }
            }
        }

        self.record_telemetry(
            request_id,
            tenant_id,
            phase,
            query,
            &search.provider_used,
            search.used_fallback,
            search.results.len(),
            accepted,
            outcome.discovered.len(),
            started.elapsed().as_millis() as u64,
        )
        .await;

        accepted
    }

    #[allow(clippy::too_many_arguments)]
    async fn record_telemetry(
        &self,
        request_id: Uuid,
        tenant_id: &str,
        phase: &str,
        query: &str,
        provider_used: &str,
        used_fallback_provider: bool,
        result_count: usize,
        accepted_count: usize,
        cumulative_discovered: usize,
        latency_ms: u64,
    ) {
        let telemetry = QueryRunTelemetry {
            request_id,
            tenant_id: tenant_id.to_string(),
            phase: phase.to_string(),
            query: query.to_string(),
            provider_used: provider_used.to_string(),
            used_fallback_provider,
            result_count,
            accepted_count,
            cumulative_discovered,
            latency_ms,
            executed_at: Utc::now(),
        };
        if let Err(err) = self.telemetry.record_query_run(&telemetry).await {
            tracing::warn!(error = %err, "Failed to record query telemetry");
        }
    }
}

fn yield_of(accepted: usize, executed: usize) -> f64 {
    if executed == 0 {
        1.0
    } else {
        accepted as f64 / executed as f64
    }
}

/// Build the sanitized profile for persistence from a raw result.
fn sanitize_profile(
    query: &str,
    provider: &str,
    handle: String,
    result: &ProfileSummary,
) -> DiscoveredProfile {
    let name_hint = hints::normalize(result.name.as_deref()).filter(|n| !hints::is_noisy(n));
    let headline_hint = hints::normalize(result.headline.as_deref())
        .or_else(|| hints::normalize(result.title.as_deref()))
        .filter(|h| !hints::is_noisy(h));
    let location_hint = hints::normalize(result.location.as_deref())
        .filter(|l| hints::is_likely_location_hint(l));

    DiscoveredProfile {
        profile_url: result.profile_url.clone(),
        profile_handle: handle,
        search_provider: provider.to_string(),
        search_query: query.to_string(),
        search_title: result.title.clone(),
        search_snippet: result.snippet.clone(),
        search_meta: result.provider_meta.clone(),
        name_hint,
        headline_hint,
        location_hint,
        company_hint: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::planner::QueryPlan;
    use crate::errors::SourcingError;
    use crate::serp::SerpSearch;
    use crate::store::memory::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Yields a fixed number of unique profiles per query.
    struct ScriptedSerp {
        per_query: Mutex<Vec<usize>>,
        counter: AtomicUsize,
        fail_queries: bool,
    }

    impl ScriptedSerp {
        fn yielding(per_query: Vec<usize>) -> Self {
            Self {
                per_query: Mutex::new(per_query),
                counter: AtomicUsize::new(0),
                fail_queries: false,
            }
        }

        fn failing() -> Self {
            Self {
                per_query: Mutex::new(vec![]),
                counter: AtomicUsize::new(0),
                fail_queries: true,
            }
        }
    }

    #[async_trait]
    impl SerpProvider for ScriptedSerp {
        async fn search_profiles(&self, _query: &str, _limit: usize) -> Result<SerpSearch> {
            if self.fail_queries {
                return Err(SourcingError::Serp("provider down".to_string()));
            }
            let mut per_query = self.per_query.lock().unwrap();
            let count = if per_query.is_empty() { 0 } else { per_query.remove(0) };
            let results = (0..count)
                .map(|_| {
                    let n = self.counter.fetch_add(1, Ordering::SeqCst);
                    ProfileSummary {
                        profile_url: format!("https://linkedin.com/in/person-{n}"),
                        title: Some(format!("Engineer {n}")),
                        name: Some(format!("Person {n}")),
                        location: Some("Bangalore, India".to_string()),
                        ..ProfileSummary::default()
                    }
                })
                .collect();
            Ok(SerpSearch {
                results,
                provider_used: "serper".to_string(),
                used_fallback: false,
            })
        }
    }

    fn adaptive() -> AdaptiveSettings {
        AdaptiveSettings {
            min_strict_attempts: 2,
            strict_min_yield: 0.5,
            min_fallback_attempts: 2,
            fallback_min_yield: 0.5,
        }
    }

    fn plan(strict: usize, fallback: usize) -> QueryPlan {
        QueryPlan {
            strict: (0..strict).map(|i| format!("strict query {i}")).collect(),
            fallback: (0..fallback).map(|i| format!("fallback query {i}")).collect(),
        }
    }

    fn runner(serp: ScriptedSerp, store: Arc<MemoryStore>) -> DiscoveryRunner {
        DiscoveryRunner::new(Arc::new(serp), store.clone(), store, adaptive())
    }

    #[tokio::test]
    async fn test_empty_plan_short_circuits() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(ScriptedSerp::yielding(vec![]), store);
        let outcome = runner
            .run(Uuid::new_v4(), "t1", &QueryPlan::default(), 10, 50)
            .await
            .unwrap();
        assert_eq!(outcome.stopped_reason, Some(StoppedReason::NoQueries));
        assert_eq!(outcome.queries_executed, 0);
    }

    #[tokio::test]
    async fn test_target_reached_stops_early() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(ScriptedSerp::yielding(vec![5, 5, 5, 5]), store.clone());
        let outcome = runner
            .run(Uuid::new_v4(), "t1", &plan(4, 0), 10, 8)
            .await
            .unwrap();
        assert_eq!(outcome.stopped_reason, Some(StoppedReason::TargetReached));
        assert!(outcome.discovered.len() >= 8);
        assert!(outcome.queries_executed < 4);
    }

    #[tokio::test]
    async fn test_budget_exhausted() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(ScriptedSerp::yielding(vec![1, 1, 1, 1, 1, 1]), store);
        let outcome = runner
            .run(Uuid::new_v4(), "t1", &plan(6, 0), 3, 100)
            .await
            .unwrap();
        assert_eq!(outcome.stopped_reason, Some(StoppedReason::BudgetExhausted));
        assert_eq!(outcome.queries_executed, 3);
    }

    #[tokio::test]
    async fn test_strict_low_yield_shifts_to_fallback() {
        let store = Arc::new(MemoryStore::new());
        // Two dry strict queries, then fallback produces.
        let runner = runner(ScriptedSerp::yielding(vec![0, 0, 5, 5]), store.clone());
        let outcome = runner
            .run(Uuid::new_v4(), "t1", &plan(5, 2), 10, 100)
            .await
            .unwrap();
        assert!(outcome.strict_shifted_early);
        assert_eq!(outcome.strict_executed, 2);
        assert_eq!(outcome.fallback_executed, 2);
        assert_eq!(outcome.discovered.len(), 10);
    }

    #[tokio::test]
    async fn test_fallback_low_yield_stops() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(ScriptedSerp::yielding(vec![0, 0, 0, 0]), store);
        let outcome = runner
            .run(Uuid::new_v4(), "t1", &plan(0, 6), 10, 100)
            .await
            .unwrap();
        assert_eq!(
            outcome.stopped_reason,
            Some(StoppedReason::FallbackLowYieldStopped)
        );
        assert_eq!(outcome.fallback_executed, 2);
    }

    #[tokio::test]
    async fn test_provider_failure_records_telemetry_and_continues() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(ScriptedSerp::failing(), store.clone());
        let outcome = runner
            .run(Uuid::new_v4(), "t1", &plan(1, 0), 10, 100)
            .await
            .unwrap();
        assert_eq!(outcome.queries_executed, 1);
        assert_eq!(outcome.discovered.len(), 0);

        let telemetry = store.telemetry.lock().unwrap();
        assert_eq!(telemetry.len(), 1);
        assert_eq!(telemetry[0].result_count, 0);
        assert_eq!(telemetry[0].provider_used, "unavailable");
    }

    #[tokio::test]
    async fn test_known_handles_are_not_recounted() {
        let store = Arc::new(MemoryStore::new());
        // Pre-seed the tenant with the first handle the provider will emit.
        store.insert_candidate(crate::store::memory::blank_candidate("t1", "person-0"));

        let runner = runner(ScriptedSerp::yielding(vec![3]), store.clone());
        let outcome = runner
            .run(Uuid::new_v4(), "t1", &plan(1, 0), 10, 100)
            .await
            .unwrap();
        // person-0 was already known; only two new candidates accepted.
        assert_eq!(outcome.discovered.len(), 2);

        let telemetry = store.telemetry.lock().unwrap();
        assert_eq!(telemetry[0].result_count, 3);
        assert_eq!(telemetry[0].accepted_count, 2);
    }

    #[tokio::test]
    async fn test_telemetry_rows_per_query() {
        let store = Arc::new(MemoryStore::new());
        let runner = runner(ScriptedSerp::yielding(vec![2, 2]), store.clone());
        runner
            .run(Uuid::new_v4(), "t1", &plan(2, 0), 10, 100)
            .await
            .unwrap();
        let telemetry = store.telemetry.lock().unwrap();
        assert_eq!(telemetry.len(), 2);
        assert_eq!(telemetry[0].phase, "strict");
        assert_eq!(telemetry[1].cumulative_discovered, 4);
    }
}
