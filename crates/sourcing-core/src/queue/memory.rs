//! In-memory job queue
//!
//! Mirrors the Redis queue's semantics (explicit ids, delayed promotion,
//! retry backoff, duplicate-id rejection) for tests and local development.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

// tokio's Instant respects the paused test clock.
use tokio::time::Instant;

use async_trait::async_trait;

use crate::errors::{Result, SourcingError};

use super::{retry_backoff, AddOptions, JobQueue, JobState, QueueCounts, QueuedJob};

struct MemJob {
    payload: serde_json::Value,
    state: JobState,
    ready_at: Instant,
    attempts_made: u32,
    max_attempts: u32,
    backoff_initial: Duration,
    enqueued_seq: u64,
}

#[derive(Default)]
pub struct MemoryJobQueue {
    name: String,
    jobs: Mutex<HashMap<String, MemJob>>,
    seq: std::sync::atomic::AtomicU64,
}

impl MemoryJobQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            jobs: Mutex::new(HashMap::new()),
            seq: std::sync::atomic::AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(
        &self,
        job_id: &str,
        payload: serde_json::Value,
        options: AddOptions,
    ) -> Result<()> {
        let mut jobs = self.jobs.lock().unwrap();
        if let Some(existing) = jobs.get(job_id) {
            if matches!(
                existing.state,
                JobState::Waiting | JobState::Delayed | JobState::Active
            ) {
                return Err(SourcingError::Queue(format!(
                    "duplicate job id: {job_id}"
                )));
            }
        }
        let now = Instant::now();
        let (state, ready_at) = match options.delay {
            Some(delay) if !delay.is_zero() => (JobState::Delayed, now + delay),
            _ => (JobState::Waiting, now),
        };
        jobs.insert(
            job_id.to_string(),
            MemJob {
                payload,
                state,
                ready_at,
                attempts_made: 0,
                max_attempts: options.attempts.max(1),
                backoff_initial: options.backoff_initial,
                enqueued_seq: self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst),
            },
        );
        Ok(())
    }

    async fn get_state(&self, job_id: &str) -> Result<Option<JobState>> {
        Ok(self.jobs.lock().unwrap().get(job_id).map(|j| j.state))
    }

    async fn remove(&self, job_id: &str) -> Result<bool> {
        Ok(self.jobs.lock().unwrap().remove(job_id).is_some())
    }

    async fn next_ready(&self) -> Result<Option<QueuedJob>> {
        let mut jobs = self.jobs.lock().unwrap();
        let now = Instant::now();

        // Promote due delayed jobs.
        for job in jobs.values_mut() {
            if job.state == JobState::Delayed && job.ready_at <= now {
                job.state = JobState::Waiting;
            }
        }

        let next_id = jobs
            .iter()
            .filter(|(_, job)| job.state == JobState::Waiting)
            .min_by_key(|(_, job)| job.enqueued_seq)
            .map(|(id, _)| id.clone());

        let Some(id) = next_id else { return Ok(None) };
        let job = jobs.get_mut(&id).expect("job present");
        job.state = JobState::Active;
        job.attempts_made += 1;
        Ok(Some(QueuedJob {
            id,
            payload: job.payload.clone(),
            attempts_made: job.attempts_made,
            max_attempts: job.max_attempts,
        }))
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        if let Some(job) = self.jobs.lock().unwrap().get_mut(job_id) {
            job.state = JobState::Completed;
        }
        Ok(())
    }

    async fn fail(&self, job_id: &str, _error: &str) -> Result<bool> {
        let mut jobs = self.jobs.lock().unwrap();
        let Some(job) = jobs.get_mut(job_id) else {
            return Ok(false);
        };
        if job.attempts_made < job.max_attempts {
            job.state = JobState::Delayed;
            job.ready_at = Instant::now() + retry_backoff(job.backoff_initial, job.attempts_made);
            Ok(true)
        } else {
            job.state = JobState::Failed;
            Ok(false)
        }
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let jobs = self.jobs.lock().unwrap();
        let mut counts = QueueCounts::default();
        for job in jobs.values() {
            match job.state {
                JobState::Waiting => counts.waiting += 1,
                JobState::Delayed => counts.delayed += 1,
                JobState::Active => counts.active += 1,
                JobState::Completed => counts.completed += 1,
                JobState::Failed => counts.failed += 1,
            }
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_consumption() {
        let queue = MemoryJobQueue::new("test");
        queue
            .add("a", serde_json::json!({"n": 1}), AddOptions::sourcing())
            .await
            .unwrap();
        queue
            .add("b", serde_json::json!({"n": 2}), AddOptions::sourcing())
            .await
            .unwrap();

        let first = queue.next_ready().await.unwrap().unwrap();
        assert_eq!(first.id, "a");
        assert_eq!(first.attempts_made, 1);
        let second = queue.next_ready().await.unwrap().unwrap();
        assert_eq!(second.id, "b");
        assert!(queue.next_ready().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_live_id_rejected() {
        let queue = MemoryJobQueue::new("test");
        queue
            .add("job", serde_json::json!({}), AddOptions::sourcing())
            .await
            .unwrap();
        let err = queue
            .add("job", serde_json::json!({}), AddOptions::sourcing())
            .await
            .unwrap_err();
        assert!(matches!(err, SourcingError::Queue(_)));

        // Finished jobs free the id after removal.
        let job = queue.next_ready().await.unwrap().unwrap();
        queue.complete(&job.id).await.unwrap();
        assert!(queue.remove("job").await.unwrap());
        assert!(queue
            .add("job", serde_json::json!({}), AddOptions::sourcing())
            .await
            .is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_jobs_wait() {
        let queue = MemoryJobQueue::new("test");
        queue
            .add(
                "later",
                serde_json::json!({}),
                AddOptions::sourcing().with_delay(Duration::from_secs(5)),
            )
            .await
            .unwrap();

        assert!(queue.next_ready().await.unwrap().is_none());
        assert_eq!(
            queue.get_state("later").await.unwrap(),
            Some(JobState::Delayed)
        );

        tokio::time::advance(Duration::from_secs(6)).await;
        let job = queue.next_ready().await.unwrap().unwrap();
        assert_eq!(job.id, "later");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_retries_with_backoff_then_dies() {
        let queue = MemoryJobQueue::new("test");
        queue
            .add("flaky", serde_json::json!({}), AddOptions::sourcing())
            .await
            .unwrap();

        let job = queue.next_ready().await.unwrap().unwrap();
        assert!(queue.fail(&job.id, "boom").await.unwrap());
        assert_eq!(
            queue.get_state("flaky").await.unwrap(),
            Some(JobState::Delayed)
        );

        tokio::time::advance(Duration::from_secs(11)).await;
        let job = queue.next_ready().await.unwrap().unwrap();
        assert_eq!(job.attempts_made, 2);

        // Second failure exhausts the two sourcing attempts.
        assert!(!queue.fail(&job.id, "boom").await.unwrap());
        assert_eq!(
            queue.get_state("flaky").await.unwrap(),
            Some(JobState::Failed)
        );
    }

    #[tokio::test]
    async fn test_counts() {
        let queue = MemoryJobQueue::new("test");
        queue
            .add("a", serde_json::json!({}), AddOptions::sourcing())
            .await
            .unwrap();
        queue
            .add(
                "b",
                serde_json::json!({}),
                AddOptions::sourcing().with_delay(Duration::from_secs(60)),
            )
            .await
            .unwrap();
        let counts = queue.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
        assert_eq!(counts.delayed, 1);
    }
}
