//! Callback delivery
//!
//! The caller gets exactly one final callback per request: a JWT-signed
//! POST retried on a jittered exponential schedule. Exhausted deliveries
//! park the request in `callback_failed`, where the re-delivery sweeper
//! picks it up later.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::Utc;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{Result, SourcingError};
use crate::store::models::{RequestStatus, SourcingRequest};
use crate::store::RequestStore;

/// Delivery attempts per payload.
pub const MAX_ATTEMPTS: usize = 5;

/// Base delays between attempts, jittered by [0.8, 1.2].
const RETRY_DELAYS_SECS: [u64; 4] = [1, 3, 10, 30];

/// Per-request HTTP timeout.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Signed token lifetime.
const TOKEN_TTL_SECS: i64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CallbackStatus {
    Complete,
    Partial,
    Failed,
}

/// The callback body, version 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackPayload {
    pub version: u32,
    pub request_id: Uuid,
    pub external_job_id: String,
    pub status: CallbackStatus,
    pub candidate_count: i64,
    pub enriched_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallbackPayload {
    pub fn complete(request: &SourcingRequest, candidate_count: i64, enriched_count: i64) -> Self {
        Self {
            version: 1,
            request_id: request.id,
            external_job_id: request.external_job_id.clone(),
            status: CallbackStatus::Complete,
            candidate_count,
            enriched_count,
            error: None,
        }
    }

    pub fn failed(request: &SourcingRequest, error: impl Into<String>) -> Self {
        Self {
            version: 1,
            request_id: request.id,
            external_job_id: request.external_job_id.clone(),
            status: CallbackStatus::Failed,
            candidate_count: 0,
            enriched_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Signs bearer tokens for callback requests.
pub trait TokenSigner: Send + Sync {
    fn sign(&self, tenant_id: &str, request_id: Uuid) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct Claims {
    iss: &'static str,
    aud: &'static str,
    sub: &'static str,
    tenant_id: String,
    request_id: String,
    scopes: &'static str,
    jti: String,
    iat: i64,
    exp: i64,
}

/// RS256 signer; the PEM is parsed once and cached for the process.
pub struct CallbackSigner {
    key: EncodingKey,
    kid: String,
}

impl CallbackSigner {
    /// Accepts raw PEM or base64-wrapped PEM key material.
    pub fn from_key_material(material: &str, kid: impl Into<String>) -> Result<Self> {
        let trimmed = material.trim();
        let pem = if trimmed.starts_with("-----BEGIN") {
            trimmed.as_bytes().to_vec()
        } else {
            base64::engine::general_purpose::STANDARD
                .decode(trimmed.as_bytes())
                .map_err(|e| SourcingError::Config(format!("JWT key is neither PEM nor base64: {e}")))?
        };
        let key = EncodingKey::from_rsa_pem(&pem)
            .map_err(|e| SourcingError::Config(format!("Invalid RSA private key: {e}")))?;
        Ok(Self {
            key,
            kid: kid.into(),
        })
    }
}

impl TokenSigner for CallbackSigner {
    fn sign(&self, tenant_id: &str, request_id: Uuid) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: "signal",
            aud: "vantahire",
            sub: "sourcing",
            tenant_id: tenant_id.to_string(),
            request_id: request_id.to_string(),
            scopes: "callbacks:write",
            jti: Uuid::new_v4().to_string(),
            iat: now,
            exp: now + TOKEN_TTL_SECS,
        };
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(self.kid.clone());
        encode(&header, &claims, &self.key)
            .map_err(|e| SourcingError::Callback(format!("JWT signing failed: {e}")))
    }
}

/// One HTTP attempt's observable outcome.
#[derive(Debug, Clone)]
pub struct CallbackResponse {
    pub status: u16,
    pub body: String,
}

impl CallbackResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Transport seam; production posts over reqwest, tests script responses.
#[async_trait]
pub trait CallbackTransport: Send + Sync {
    async fn post(
        &self,
        url: &str,
        bearer: &str,
        payload: &CallbackPayload,
    ) -> Result<CallbackResponse>;
}

pub struct HttpCallbackTransport {
    client: reqwest::Client,
}

impl HttpCallbackTransport {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| SourcingError::Callback(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl CallbackTransport for HttpCallbackTransport {
    async fn post(
        &self,
        url: &str,
        bearer: &str,
        payload: &CallbackPayload,
    ) -> Result<CallbackResponse> {
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {bearer}"))
            .json(payload)
            .send()
            .await
            .map_err(|e| SourcingError::Callback(e.to_string()))?;

        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(CallbackResponse { status, body })
    }
}

/// Retried, persisted callback delivery.
pub struct CallbackDelivery {
    transport: Arc<dyn CallbackTransport>,
    signer: Arc<dyn TokenSigner>,
    requests: Arc<dyn RequestStore>,
}

impl CallbackDelivery {
    pub fn new(
        transport: Arc<dyn CallbackTransport>,
        signer: Arc<dyn TokenSigner>,
        requests: Arc<dyn RequestStore>,
    ) -> Self {
        Self {
            transport,
            signer,
            requests,
        }
    }

    /// Deliver with retries. Returns whether the receiver acked. When
    /// `update_status` is set, the request transitions to `callback_sent`
    /// on ack or `callback_failed` on exhaustion.
    pub async fn deliver(
        &self,
        request: &SourcingRequest,
        payload: &CallbackPayload,
        update_status: bool,
    ) -> Result<bool> {
        for attempt in 1..=MAX_ATTEMPTS {
            let outcome = self.attempt_once(request, payload).await;

            match outcome {
                Ok(response) if response.is_success() => {
                    self.requests.record_callback_attempt(request.id, None).await?;
                    if update_status {
                        self.requests
                            .set_status(request.id, RequestStatus::CallbackSent)
                            .await?;
                    }
                    tracing::info!(request_id = %request.id, attempt, "Callback acknowledged");
                    return Ok(true);
                }
                Ok(response) => {
                    let error = format!("HTTP {}: {}", response.status, clip(&response.body, 500));
                    tracing::warn!(request_id = %request.id, attempt, error = %error, "Callback rejected");
                    self.requests
                        .record_callback_attempt(request.id, Some(&error))
                        .await?;
                }
                Err(err) => {
                    let error = err.to_string();
                    tracing::warn!(request_id = %request.id, attempt, error = %error, "Callback attempt failed");
                    self.requests
                        .record_callback_attempt(request.id, Some(&error))
                        .await?;
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(jittered_delay(attempt)).await;
            }
        }

        if update_status {
            self.requests
                .set_status(request.id, RequestStatus::CallbackFailed)
                .await?;
        }
        tracing::error!(request_id = %request.id, "Callback delivery exhausted all attempts");
        Ok(false)
    }

    async fn attempt_once(
        &self,
        request: &SourcingRequest,
        payload: &CallbackPayload,
    ) -> Result<CallbackResponse> {
        // Tokens are short-lived; each attempt signs a fresh one.
        let token = self.signer.sign(&request.tenant_id, request.id)?;
        self.transport
            .post(&request.callback_url, &token, payload)
            .await
    }
}

/// Sweep `callback_failed` requests older than the age threshold, re-
/// emitting the canonical completion payload. Returns delivered count.
pub async fn sweep_failed_callbacks(
    requests: &Arc<dyn RequestStore>,
    delivery: &CallbackDelivery,
    max_age_minutes: i64,
    batch_size: usize,
    tenant_id: Option<&str>,
) -> Result<usize> {
    let cutoff = Utc::now() - chrono::Duration::minutes(max_age_minutes);
    let stale = requests
        .sweepable_callback_failures(cutoff, batch_size, tenant_id)
        .await?;

    let mut delivered = 0usize;
    for request in &stale {
        let payload =
            CallbackPayload::complete(request, request.result_count.unwrap_or(0), 0);
        match delivery.deliver(request, &payload, true).await {
            Ok(true) => delivered += 1,
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(request_id = %request.id, error = %err, "Sweeper redelivery errored");
            }
        }
    }

    if !stale.is_empty() {
        tracing::info!(swept = stale.len(), delivered, "Callback redelivery cycle finished");
    }
    Ok(delivered)
}

fn jittered_delay(attempt: usize) -> Duration {
    let base = RETRY_DELAYS_SECS[(attempt - 1).min(RETRY_DELAYS_SECS.len() - 1)];
    let factor = rand::thread_rng().gen_range(0.8..=1.2);
    Duration::from_millis((base as f64 * 1000.0 * factor) as u64)
}

fn clip(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
