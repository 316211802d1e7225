//! Classifier circuit breaker
//!
//! Process-wide, Redis-backed. A burst of LLM failures inside the rolling
//! window opens the breaker for a cooldown; while open, classification runs
//! deterministically without touching the provider. Breaker state reads
//! default to closed so a Redis outage never blocks classification.

use std::sync::Arc;

use chrono::Utc;

use crate::track::cache::KvStore;

const FAILURES_KEY: &str = "track:groq:cb:failures";
const OPEN_UNTIL_KEY: &str = "track:groq:cb:open_until";

pub struct CircuitBreaker {
    kv: Arc<dyn KvStore>,
    threshold: u32,
    window_sec: u64,
    cooldown_sec: u64,
}

impl CircuitBreaker {
    pub fn new(kv: Arc<dyn KvStore>, threshold: u32, window_sec: u64, cooldown_sec: u64) -> Self {
        Self {
            kv,
            threshold: threshold.max(1),
            window_sec,
            cooldown_sec,
        }
    }

    /// Whether calls should currently be skipped.
    pub async fn is_open(&self) -> bool {
        match self.kv.get(OPEN_UNTIL_KEY).await {
            Ok(Some(raw)) => raw
                .parse::<i64>()
                .map(|open_until_ms| Utc::now().timestamp_millis() < open_until_ms)
                .unwrap_or(false),
            // Unknown state fails toward use.
            Ok(None) | Err(_) => false,
        }
    }

    /// Count a provider failure; trips the breaker at the threshold.
    pub async fn record_failure(&self) {
        let failures = match self.kv.incr_ex(FAILURES_KEY, self.window_sec).await {
            Ok(count) => count,
            Err(err) => {
                tracing::warn!(error = %err, "Circuit breaker failure count unavailable");
                return;
            }
        };

        if failures >= self.threshold as i64 {
            let open_until_ms = Utc::now().timestamp_millis() + (self.cooldown_sec as i64) * 1000;
            if let Err(err) = self
                .kv
                .set_ex(OPEN_UNTIL_KEY, &open_until_ms.to_string(), self.cooldown_sec)
                .await
            {
                tracing::warn!(error = %err, "Failed to open classifier circuit breaker");
            } else {
                tracing::warn!(
                    failures,
                    cooldown_sec = self.cooldown_sec,
                    "Classifier circuit breaker opened"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{Result, SourcingError};
    use crate::track::cache::MemoryKv;
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_breaker_opens_at_threshold() {
        let breaker = CircuitBreaker::new(Arc::new(MemoryKv::new()), 3, 60, 60);
        assert!(!breaker.is_open().await);

        breaker.record_failure().await;
        breaker.record_failure().await;
        assert!(!breaker.is_open().await);

        breaker.record_failure().await;
        assert!(breaker.is_open().await);
    }

    #[tokio::test]
    async fn test_breaker_stays_open_for_cooldown() {
        let breaker = CircuitBreaker::new(Arc::new(MemoryKv::new()), 1, 60, 60);
        breaker.record_failure().await;
        // Every check within the cooldown skips the provider.
        for _ in 0..5 {
            assert!(breaker.is_open().await);
        }
    }

    struct BrokenKv;

    #[async_trait]
    impl KvStore for BrokenKv {
        async fn get(&self, _key: &str) -> Result<Option<String>> {
            Err(SourcingError::Queue("kv down".to_string()))
        }

        async fn set_ex(&self, _key: &str, _value: &str, _ttl_secs: u64) -> Result<()> {
            Err(SourcingError::Queue("kv down".to_string()))
        }

        async fn incr_ex(&self, _key: &str, _ttl_secs: u64) -> Result<i64> {
            Err(SourcingError::Queue("kv down".to_string()))
        }
    }

    #[tokio::test]
    async fn test_breaker_errors_default_to_closed() {
        let breaker = CircuitBreaker::new(Arc::new(BrokenKv), 1, 60, 60);
        breaker.record_failure().await;
        assert!(!breaker.is_open().await);
    }
}
