//! Per-tenant daily SERP budget guard
//!
//! A reservation protocol over an atomic daily counter. Reservations are
//! taken greedily (largest first) with INCRBY/DECRBY probes; unused
//! reservations are released after discovery. The guard fails closed: if
//! the counter backend is unreachable, discovery is skipped rather than
//! risking unmetered provider spend.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};
use redis::AsyncCommands;

use crate::errors::Result;

/// Why a reservation was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    DailySerpCapReached,
    CapGuardUnavailable,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DailySerpCapReached => "daily_serp_cap_reached",
            Self::CapGuardUnavailable => "cap_guard_unavailable",
        }
    }
}

/// Outcome of a reservation attempt.
#[derive(Debug, Clone)]
pub struct BudgetDecision {
    pub allowed: bool,
    pub max_queries: usize,
    pub key: String,
    pub reserved_queries: usize,
    pub skipped_reason: Option<SkipReason>,
}

/// Atomic counter with day-scoped TTL semantics.
#[async_trait]
pub trait DailyCounter: Send + Sync {
    /// Increment and return the new total; TTL applies on first touch.
    async fn incr_by(&self, key: &str, amount: i64, ttl_secs: u64) -> Result<i64>;

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64>;

    async fn get(&self, key: &str) -> Result<i64>;
}

/// Redis-backed counter.
pub struct RedisDailyCounter {
    conn: redis::aio::ConnectionManager,
}

impl RedisDailyCounter {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl DailyCounter for RedisDailyCounter {
    async fn incr_by(&self, key: &str, amount: i64, ttl_secs: u64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let total: i64 = conn.incr(key, amount).await?;
        if total == amount {
            conn.expire::<_, ()>(key, ttl_secs as i64).await?;
        }
        Ok(total)
    }

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let mut conn = self.conn.clone();
        Ok(conn.decr(key, amount).await?)
    }

    async fn get(&self, key: &str) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await?;
        Ok(value.unwrap_or(0))
    }
}

/// In-memory counter for tests.
#[derive(Default)]
pub struct MemoryDailyCounter {
    counters: std::sync::Mutex<std::collections::HashMap<String, i64>>,
}

impl MemoryDailyCounter {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DailyCounter for MemoryDailyCounter {
    async fn incr_by(&self, key: &str, amount: i64, _ttl_secs: u64) -> Result<i64> {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(key.to_string()).or_insert(0);
        *entry += amount;
        Ok(*entry)
    }

    async fn decr_by(&self, key: &str, amount: i64) -> Result<i64> {
        let mut counters = self.counters.lock().unwrap();
        let entry = counters.entry(key.to_string()).or_insert(0);
        *entry -= amount;
        Ok(*entry)
    }

    async fn get(&self, key: &str) -> Result<i64> {
        Ok(*self.counters.lock().unwrap().get(key).unwrap_or(&0))
    }
}

/// The guard itself, bound to a tenant-day cap.
pub struct BudgetGuard {
    counter: Arc<dyn DailyCounter>,
    daily_cap: i64,
}

impl BudgetGuard {
    pub fn new(counter: Arc<dyn DailyCounter>, daily_cap: i64) -> Self {
        Self { counter, daily_cap }
    }

    fn key_for(tenant_id: &str) -> String {
        format!("sourcing:serper:{}:{}", tenant_id, Utc::now().format("%Y-%m-%d"))
    }

    fn seconds_until_utc_midnight() -> u64 {
        let now = Utc::now();
        let tomorrow = now.date_naive() + Duration::days(1);
        let midnight = Utc
            .from_utc_datetime(&tomorrow.and_hms_opt(0, 0, 0).expect("valid midnight"));
        (midnight - now).num_seconds().max(1) as u64
    }

    /// Try to reserve up to `want` queries for the tenant's current UTC day.
    pub async fn reserve(&self, tenant_id: &str, want: usize) -> BudgetDecision {
        let key = Self::key_for(tenant_id);

        if self.daily_cap <= 0 {
            // Uncapped: nothing reserved, nothing to release.
            return BudgetDecision {
                allowed: true,
                max_queries: want,
                key,
                reserved_queries: 0,
                skipped_reason: None,
            };
        }
        if want == 0 {
            return BudgetDecision {
                allowed: false,
                max_queries: 0,
                key,
                reserved_queries: 0,
                skipped_reason: Some(SkipReason::DailySerpCapReached),
            };
        }

        let ttl = Self::seconds_until_utc_midnight();
        for reserve in (1..=want as i64).rev() {
            match self.counter.incr_by(&key, reserve, ttl).await {
                Ok(total) if total <= self.daily_cap => {
                    return BudgetDecision {
                        allowed: true,
                        max_queries: reserve as usize,
                        key,
                        reserved_queries: reserve as usize,
                        skipped_reason: None,
                    };
                }
                Ok(_) => {
                    if let Err(err) = self.counter.decr_by(&key, reserve).await {
                        tracing::warn!(error = %err, "Failed to roll back budget probe");
                        return self.unavailable(key);
                    }
                }
                Err(err) => {
                    tracing::warn!(error = %err, "Budget counter unavailable, skipping discovery");
                    return self.unavailable(key);
                }
            }
        }

        BudgetDecision {
            allowed: false,
            max_queries: 0,
            key,
            reserved_queries: 0,
            skipped_reason: Some(SkipReason::DailySerpCapReached),
        }
    }

    fn unavailable(&self, key: String) -> BudgetDecision {
        BudgetDecision {
            allowed: false,
            max_queries: 0,
            key,
            reserved_queries: 0,
            skipped_reason: Some(SkipReason::CapGuardUnavailable),
        }
    }

    /// Release the reservation's unused remainder after discovery.
    pub async fn release(&self, decision: &BudgetDecision, used_queries: usize) {
        let unused = decision.reserved_queries.saturating_sub(used_queries) as i64;
        if unused <= 0 || decision.reserved_queries == 0 {
            return;
        }
        if let Err(err) = self.counter.decr_by(&decision.key, unused).await {
            // The TTL bounds the damage to one tenant-day.
            tracing::warn!(error = %err, unused, "Failed to release unused budget reservation");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SourcingError;

    #[tokio::test]
    async fn test_reserve_grants_largest_fitting_reservation() {
        let counter = Arc::new(MemoryDailyCounter::new());
        let guard = BudgetGuard::new(counter.clone(), 5);

        let first = guard.reserve("t1", 3).await;
        assert!(first.allowed);
        assert_eq!(first.max_queries, 3);

        // Only two slots remain; the probe shrinks until one fits.
        let second = guard.reserve("t1", 3).await;
        assert!(second.allowed);
        assert_eq!(second.max_queries, 2);

        let third = guard.reserve("t1", 3).await;
        assert!(!third.allowed);
        assert_eq!(third.skipped_reason, Some(SkipReason::DailySerpCapReached));
    }

    #[tokio::test]
    async fn test_release_returns_unused() {
        let counter = Arc::new(MemoryDailyCounter::new());
        let guard = BudgetGuard::new(counter.clone(), 10);

        let decision = guard.reserve("t1", 6).await;
        assert_eq!(decision.reserved_queries, 6);

        // Used 2 of 6; the counter should settle at 2.
        guard.release(&decision, 2).await;
        assert_eq!(counter.get(&decision.key).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_concurrent_reservations_respect_cap() {
        let counter = Arc::new(MemoryDailyCounter::new());
        let guard = Arc::new(BudgetGuard::new(counter.clone(), 5));

        let (a, b) = tokio::join!(guard.reserve("t1", 3), guard.reserve("t1", 3));
        let granted = a.max_queries + b.max_queries;
        assert!(granted <= 5);
        assert_eq!(granted, 5, "both reservations together fill the cap");

        // Each uses everything it reserved; counter equals total used.
        guard.release(&a, a.max_queries).await;
        guard.release(&b, b.max_queries).await;
        assert_eq!(counter.get(&a.key).await.unwrap(), granted as i64);
    }

    #[tokio::test]
    async fn test_zero_cap_is_uncapped() {
        let counter = Arc::new(MemoryDailyCounter::new());
        let guard = BudgetGuard::new(counter.clone(), 0);

        let decision = guard.reserve("t1", 50).await;
        assert!(decision.allowed);
        assert_eq!(decision.max_queries, 50);
        assert_eq!(decision.reserved_queries, 0);
        // Release is a no-op for uncapped decisions.
        guard.release(&decision, 50).await;
        assert_eq!(counter.get(&decision.key).await.unwrap(), 0);
    }

    struct BrokenCounter;

    #[async_trait]
    impl DailyCounter for BrokenCounter {
        async fn incr_by(&self, _key: &str, _amount: i64, _ttl_secs: u64) -> Result<i64> {
            Err(SourcingError::Queue("redis down".to_string()))
        }

        async fn decr_by(&self, _key: &str, _amount: i64) -> Result<i64> {
            Err(SourcingError::Queue("redis down".to_string()))
        }

        async fn get(&self, _key: &str) -> Result<i64> {
            Err(SourcingError::Queue("redis down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_counter_outage_fails_closed() {
        let guard = BudgetGuard::new(Arc::new(BrokenCounter), 10);
        let decision = guard.reserve("t1", 5).await;
        assert!(!decision.allowed);
        assert_eq!(decision.skipped_reason, Some(SkipReason::CapGuardUnavailable));
    }

    #[test]
    fn test_key_shape() {
        let key = BudgetGuard::key_for("tenant-a");
        assert!(key.starts_with("sourcing:serper:tenant-a:"));
        // YYYY-MM-DD suffix.
        let date_part = key.rsplit(':').next().unwrap();
        assert_eq!(date_part.len(), 10);
    }
}
