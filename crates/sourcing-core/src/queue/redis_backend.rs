//! Redis job queue
//!
//! Waiting jobs live in a list, delayed jobs in a sorted set scored by
//! ready time, job bodies in per-job hashes. Promotion happens on poll.
//! Finished jobs are retained on capped lists with TTL'd bodies.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use redis::AsyncCommands;

use crate::errors::{Result, SourcingError};

use super::{retry_backoff, AddOptions, JobQueue, JobState, QueueCounts, QueuedJob};

/// Delayed jobs promoted per poll.
const PROMOTE_BATCH: isize = 100;

pub struct RedisJobQueue {
    name: String,
    conn: redis::aio::ConnectionManager,
}

impl RedisJobQueue {
    pub fn new(name: impl Into<String>, conn: redis::aio::ConnectionManager) -> Self {
        Self {
            name: name.into(),
            conn,
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("sourcing:queue:{}:{}", self.name, suffix)
    }

    fn job_key(&self, job_id: &str) -> String {
        self.key(&format!("job:{job_id}"))
    }

    async fn promote_due(&self, conn: &mut redis::aio::ConnectionManager) -> Result<()> {
        let now_ms = Utc::now().timestamp_millis();
        let due: Vec<String> = conn
            .zrangebyscore_limit(self.key("delayed"), 0i64, now_ms, 0, PROMOTE_BATCH)
            .await?;
        for job_id in due {
            let removed: i64 = conn.zrem(self.key("delayed"), &job_id).await?;
            if removed == 0 {
                continue;
            }
            conn.hset::<_, _, _, ()>(self.job_key(&job_id), "state", "waiting")
                .await?;
            conn.rpush::<_, _, ()>(self.key("waiting"), &job_id).await?;
        }
        Ok(())
    }
}

fn parse_state(raw: &str) -> Option<JobState> {
    match raw {
        "waiting" => Some(JobState::Waiting),
        "delayed" => Some(JobState::Delayed),
        "active" => Some(JobState::Active),
        "completed" => Some(JobState::Completed),
        "failed" => Some(JobState::Failed),
        _ => None,
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.name
    }

    async fn add(
        &self,
        job_id: &str,
        payload: serde_json::Value,
        options: AddOptions,
    ) -> Result<()> {
        let mut conn = self.conn.clone();

        let existing: Option<String> = conn.hget(self.job_key(job_id), "state").await?;
        if let Some(state) = existing.as_deref().and_then(parse_state) {
            if matches!(state, JobState::Waiting | JobState::Delayed | JobState::Active) {
                return Err(SourcingError::Queue(format!("duplicate job id: {job_id}")));
            }
        }

        let delayed = options.delay.filter(|d| !d.is_zero());
        let state = if delayed.is_some() { "delayed" } else { "waiting" };
        conn.hset_multiple::<_, _, _, ()>(
            self.job_key(job_id),
            &[
                ("payload", payload.to_string()),
                ("state", state.to_string()),
                ("attempts_made", "0".to_string()),
                ("max_attempts", options.attempts.max(1).to_string()),
                ("backoff_ms", options.backoff_initial.as_millis().to_string()),
                (
                    "retain_complete_secs",
                    options.remove_on_complete.age.as_secs().to_string(),
                ),
                (
                    "retain_fail_secs",
                    options.remove_on_fail.age.as_secs().to_string(),
                ),
            ],
        )
        .await?;

        match delayed {
            Some(delay) => {
                let ready_at = Utc::now().timestamp_millis() + delay.as_millis() as i64;
                conn.zadd::<_, _, _, ()>(self.key("delayed"), job_id, ready_at)
                    .await?;
            }
            None => {
                conn.rpush::<_, _, ()>(self.key("waiting"), job_id).await?;
            }
        }

        Ok(())
    }

    async fn get_state(&self, job_id: &str) -> Result<Option<JobState>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.hget(self.job_key(job_id), "state").await?;
        Ok(raw.as_deref().and_then(parse_state))
    }

    async fn remove(&self, job_id: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let existed: i64 = conn.del(self.job_key(job_id)).await?;
        conn.lrem::<_, _, ()>(self.key("waiting"), 0, job_id).await?;
        conn.zrem::<_, _, ()>(self.key("delayed"), job_id).await?;
        conn.srem::<_, _, ()>(self.key("active"), job_id).await?;
        conn.lrem::<_, _, ()>(self.key("completed"), 0, job_id).await?;
        conn.lrem::<_, _, ()>(self.key("failed"), 0, job_id).await?;
        Ok(existed > 0)
    }

    async fn next_ready(&self) -> Result<Option<QueuedJob>> {
        let mut conn = self.conn.clone();
        self.promote_due(&mut conn).await?;

        let popped: Option<String> = conn.lpop(self.key("waiting"), None).await?;
        let Some(job_id) = popped else {
            return Ok(None);
        };

        let attempts_made: i64 = conn.hincr(self.job_key(&job_id), "attempts_made", 1).await?;
        conn.hset::<_, _, _, ()>(self.job_key(&job_id), "state", "active")
            .await?;
        conn.sadd::<_, _, ()>(self.key("active"), &job_id).await?;

        let payload_raw: Option<String> = conn.hget(self.job_key(&job_id), "payload").await?;
        let max_attempts: Option<i64> = conn.hget(self.job_key(&job_id), "max_attempts").await?;
        let payload = payload_raw
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or(serde_json::Value::Null);

        Ok(Some(QueuedJob {
            id: job_id,
            payload,
            attempts_made: attempts_made.max(1) as u32,
            max_attempts: max_attempts.unwrap_or(1).max(1) as u32,
        }))
    }

    async fn complete(&self, job_id: &str) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(self.key("active"), job_id).await?;
        conn.hset::<_, _, _, ()>(self.job_key(job_id), "state", "completed")
            .await?;

        let retain_secs: Option<i64> = conn
            .hget(self.job_key(job_id), "retain_complete_secs")
            .await?;
        conn.expire::<_, ()>(
            self.job_key(job_id),
            retain_secs.unwrap_or(24 * 3600).max(60),
        )
        .await?;
        conn.rpush::<_, _, ()>(self.key("completed"), job_id).await?;
        conn.ltrim::<_, ()>(self.key("completed"), -500, -1).await?;
        Ok(())
    }

    async fn fail(&self, job_id: &str, error: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        conn.srem::<_, _, ()>(self.key("active"), job_id).await?;
        conn.hset::<_, _, _, ()>(self.job_key(job_id), "last_error", error)
            .await?;

        let attempts_made: Option<i64> = conn.hget(self.job_key(job_id), "attempts_made").await?;
        let max_attempts: Option<i64> = conn.hget(self.job_key(job_id), "max_attempts").await?;
        let attempts_made = attempts_made.unwrap_or(1).max(1) as u32;
        let max_attempts = max_attempts.unwrap_or(1).max(1) as u32;

        if attempts_made < max_attempts {
            let backoff_ms: Option<i64> = conn.hget(self.job_key(job_id), "backoff_ms").await?;
            let backoff = retry_backoff(
                Duration::from_millis(backoff_ms.unwrap_or(10_000).max(1) as u64),
                attempts_made,
            );
            let ready_at = Utc::now().timestamp_millis() + backoff.as_millis() as i64;
            conn.hset::<_, _, _, ()>(self.job_key(job_id), "state", "delayed")
                .await?;
            conn.zadd::<_, _, _, ()>(self.key("delayed"), job_id, ready_at)
                .await?;
            return Ok(true);
        }

        conn.hset::<_, _, _, ()>(self.job_key(job_id), "state", "failed")
            .await?;
        let retain_secs: Option<i64> = conn.hget(self.job_key(job_id), "retain_fail_secs").await?;
        conn.expire::<_, ()>(
            self.job_key(job_id),
            retain_secs.unwrap_or(7 * 24 * 3600).max(60),
        )
        .await?;
        conn.rpush::<_, _, ()>(self.key("failed"), job_id).await?;
        conn.ltrim::<_, ()>(self.key("failed"), -2000, -1).await?;
        Ok(false)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let mut conn = self.conn.clone();
        let waiting: usize = conn.llen(self.key("waiting")).await?;
        let delayed: usize = conn.zcard(self.key("delayed")).await?;
        let active: usize = conn.scard(self.key("active")).await?;
        let completed: usize = conn.llen(self.key("completed")).await?;
        let failed: usize = conn.llen(self.key("failed")).await?;
        Ok(QueueCounts {
            waiting,
            active,
            completed,
            failed,
            delayed,
        })
    }
}
