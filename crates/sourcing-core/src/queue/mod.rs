//! Job queue abstraction
//!
//! Both worker queues (`sourcing` and `sourcing-rerank`) run on this
//! interface: delayed jobs, bounded retries with exponential backoff, and
//! explicit job-id control so rerank scheduling can dedupe. The Redis
//! implementation is the production backend; the in-memory one drives tests.

pub mod memory;
pub mod redis_backend;
pub mod worker;

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::Result;

pub use memory::MemoryJobQueue;
pub use redis_backend::RedisJobQueue;
pub use worker::{JobHandler, QueueWorker};

/// Observable job lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Delayed,
    Active,
    Completed,
    Failed,
}

/// Retention for finished jobs.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub count: usize,
    pub age: Duration,
}

/// Enqueue options.
#[derive(Debug, Clone, Copy)]
pub struct AddOptions {
    pub delay: Option<Duration>,
    pub attempts: u32,
    pub backoff_initial: Duration,
    pub remove_on_complete: Retention,
    pub remove_on_fail: Retention,
}

impl AddOptions {
    /// Defaults for sourcing orchestration jobs.
    pub fn sourcing() -> Self {
        Self {
            delay: None,
            attempts: 2,
            backoff_initial: Duration::from_secs(10),
            remove_on_complete: Retention {
                count: 500,
                age: Duration::from_secs(24 * 3600),
            },
            remove_on_fail: Retention {
                count: 2000,
                age: Duration::from_secs(7 * 24 * 3600),
            },
        }
    }

    /// Defaults for rerank jobs; the delay coalesces enrichment bursts.
    pub fn rerank(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::sourcing()
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

/// A job handed to a worker.
#[derive(Debug, Clone)]
pub struct QueuedJob {
    pub id: String,
    pub payload: serde_json::Value,
    pub attempts_made: u32,
    pub max_attempts: u32,
}

/// Queue depth snapshot for the health surface.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct QueueCounts {
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    pub delayed: usize,
}

#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    /// Enqueue a job under an explicit id. Fails with a queue error when a
    /// live job (waiting, delayed, or active) already holds the id.
    async fn add(&self, job_id: &str, payload: serde_json::Value, options: AddOptions)
        -> Result<()>;

    async fn get_state(&self, job_id: &str) -> Result<Option<JobState>>;

    /// Remove a job in any state. Returns whether anything was removed.
    async fn remove(&self, job_id: &str) -> Result<bool>;

    /// Pop the next ready job, promoting due delayed jobs first.
    async fn next_ready(&self) -> Result<Option<QueuedJob>>;

    /// Mark an active job completed.
    async fn complete(&self, job_id: &str) -> Result<()>;

    /// Mark an active job failed; requeues with exponential backoff while
    /// attempts remain. Returns true when the job will retry.
    async fn fail(&self, job_id: &str, error: &str) -> Result<bool>;

    async fn counts(&self) -> Result<QueueCounts>;
}

/// Backoff for the next retry: initial * 2^(attempts_made - 1).
pub(crate) fn retry_backoff(initial: Duration, attempts_made: u32) -> Duration {
    let exponent = attempts_made.saturating_sub(1).min(16);
    initial.saturating_mul(2u32.saturating_pow(exponent))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sourcing_defaults() {
        let options = AddOptions::sourcing();
        assert_eq!(options.attempts, 2);
        assert_eq!(options.backoff_initial, Duration::from_secs(10));
        assert_eq!(options.remove_on_complete.count, 500);
        assert_eq!(options.remove_on_fail.count, 2000);
    }

    #[test]
    fn test_retry_backoff_doubles() {
        let initial = Duration::from_secs(10);
        assert_eq!(retry_backoff(initial, 1), Duration::from_secs(10));
        assert_eq!(retry_backoff(initial, 2), Duration::from_secs(20));
        assert_eq!(retry_backoff(initial, 3), Duration::from_secs(40));
    }
}
