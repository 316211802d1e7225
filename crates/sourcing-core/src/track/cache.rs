//! Classification cache
//!
//! Successful LLM classifications are cached in Redis keyed by a version-
//! prefixed digest of the job context, so repeated postings skip the call
//! entirely. The KV abstraction also backs the circuit breaker and keeps
//! tests off a live Redis.

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use sha2::{Digest, Sha256};

use crate::errors::Result;
use crate::requirements::JobContext;
use crate::track::GroqOutcome;

/// Minimal async KV surface: string get, set-with-TTL, counter-with-TTL.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()>;

    /// Increment and return the new value; the TTL is applied when the key
    /// is first created.
    async fn incr_ex(&self, key: &str, ttl_secs: u64) -> Result<i64>;
}

/// Redis-backed KV using a shared connection manager.
pub struct RedisKv {
    conn: redis::aio::ConnectionManager,
}

impl RedisKv {
    pub fn new(conn: redis::aio::ConnectionManager) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl KvStore for RedisKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key).await?)
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        let mut conn = self.conn.clone();
        conn.set_ex::<_, _, ()>(key, value, ttl_secs).await?;
        Ok(())
    }

    async fn incr_ex(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = conn.incr(key, 1).await?;
        if value == 1 {
            conn.expire::<_, ()>(key, ttl_secs as i64).await?;
        }
        Ok(value)
    }
}

/// In-memory KV for tests; honors TTLs against a monotonic clock.
pub struct MemoryKv {
    entries: std::sync::Mutex<std::collections::HashMap<String, (String, std::time::Instant)>>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self {
            entries: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }
}

impl Default for MemoryKv {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = self.entries.lock().unwrap();
        match entries.get(key) {
            Some((value, expires)) if *expires > std::time::Instant::now() => {
                Ok(Some(value.clone()))
            }
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_ex(&self, key: &str, value: &str, ttl_secs: u64) -> Result<()> {
        self.entries.lock().unwrap().insert(
            key.to_string(),
            (
                value.to_string(),
                std::time::Instant::now() + std::time::Duration::from_secs(ttl_secs),
            ),
        );
        Ok(())
    }

    async fn incr_ex(&self, key: &str, ttl_secs: u64) -> Result<i64> {
        let mut entries = self.entries.lock().unwrap();
        let now = std::time::Instant::now();
        let next = match entries.get(key) {
            Some((value, expires)) if *expires > now => {
                value.parse::<i64>().unwrap_or(0) + 1
            }
            _ => 1,
        };
        let expires = match entries.get(key) {
            Some((_, e)) if *e > now && next > 1 => *e,
            _ => now + std::time::Duration::from_secs(ttl_secs),
        };
        entries.insert(key.to_string(), (next.to_string(), expires));
        Ok(next)
    }
}

/// Version-prefixed cache over classification outcomes.
pub struct ClassificationCache {
    kv: Arc<dyn KvStore>,
    version: String,
    ttl_days: i64,
}

impl ClassificationCache {
    pub fn new(kv: Arc<dyn KvStore>, version: impl Into<String>, ttl_days: i64) -> Self {
        Self {
            kv,
            version: version.into(),
            ttl_days,
        }
    }

    /// `track:groq:<version>:<sha256(title | sorted skills | digest[..500])[..16]>`
    pub fn key_for(&self, ctx: &JobContext) -> String {
        let mut skills: Vec<String> = ctx
            .skills
            .iter()
            .chain(ctx.good_to_have_skills.iter())
            .map(|s| s.trim().to_lowercase())
            .collect();
        skills.sort();

        let digest_clip: String = ctx.jd_digest.chars().take(500).collect();
        let material = format!(
            "{}|{}|{}",
            ctx.title.as_deref().unwrap_or_default(),
            skills.join(","),
            digest_clip
        );

        let hash = Sha256::digest(material.as_bytes());
        format!("track:groq:{}:{}", self.version, &hex::encode(hash)[..16])
    }

    pub async fn get(&self, ctx: &JobContext) -> Option<GroqOutcome> {
        // Cache misses and Redis errors both fall through to the live call.
        let raw = self.kv.get(&self.key_for(ctx)).await.ok()??;
        serde_json::from_str(&raw).ok()
    }

    pub async fn put(&self, ctx: &JobContext, outcome: &GroqOutcome) {
        let Ok(serialized) = serde_json::to_string(outcome) else {
            return;
        };
        let ttl = (self.ttl_days.max(1) as u64) * 86_400;
        if let Err(err) = self.kv.set_ex(&self.key_for(ctx), &serialized, ttl).await {
            tracing::warn!(error = %err, "Failed to cache track classification");
        }
    }
}
