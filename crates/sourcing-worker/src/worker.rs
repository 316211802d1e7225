//! Queue job handlers
//!
//! The sourcing handler drives one request through the orchestrator and
//! always attempts a callback; the rerank handler recomputes a completed
//! request's ordering. Transient failures surface as handler errors so the
//! queue's retry policy applies; only a final attempt marks the request
//! failed and emits the failure callback.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};
use uuid::Uuid;

use sourcing_core::callback::{CallbackDelivery, CallbackPayload, CallbackStatus};
use sourcing_core::diagnostics::Diagnostics;
use sourcing_core::errors::{Result, SourcingError};
use sourcing_core::queue::{JobHandler, QueuedJob};
use sourcing_core::requirements::JobContext;
use sourcing_core::rerank::{RerankExecutor, RerankJob};
use sourcing_core::store::models::RequestStatus;
use sourcing_core::store::RequestStore;
use sourcing_core::track::TrackResolver;
use sourcing_core::{Orchestrator, SourcingConfig};

/// Payload of jobs on the `sourcing` queue.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourcingJob {
    pub request_id: Uuid,
}

pub struct SourcingJobHandler {
    requests: Arc<dyn RequestStore>,
    resolver: Arc<TrackResolver>,
    orchestrator: Arc<Orchestrator>,
    delivery: Arc<CallbackDelivery>,
    config: SourcingConfig,
}

impl SourcingJobHandler {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        resolver: Arc<TrackResolver>,
        orchestrator: Arc<Orchestrator>,
        delivery: Arc<CallbackDelivery>,
        config: SourcingConfig,
    ) -> Self {
        Self {
            requests,
            resolver,
            orchestrator,
            delivery,
            config,
        }
    }

    async fn fail_request(&self, request_id: Uuid, error: &str) {
        if let Err(err) = self.requests.fail(request_id, error).await {
            warn!(request_id = %request_id, error = %err, "Failed to mark request failed");
        }
        // The failure callback is best-effort and never changes status.
        if let Ok(Some(request)) = self.requests.get(request_id).await {
            let payload = CallbackPayload::failed(&request, error);
            if let Err(err) = self.delivery.deliver(&request, &payload, false).await {
                warn!(request_id = %request_id, error = %err, "Failure callback errored");
            }
        }
    }
}

#[async_trait]
impl JobHandler for SourcingJobHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let parsed: SourcingJob = serde_json::from_value(job.payload.clone())
            .map_err(|e| SourcingError::Queue(format!("bad sourcing payload: {e}")))?;
        let request_id = parsed.request_id;
        let final_attempt = job.attempts_made >= job.max_attempts;

        let Some(request) = self.requests.get(request_id).await? else {
            warn!(request_id = %request_id, "Sourcing job for unknown request, dropping");
            return Ok(());
        };
        if !matches!(
            request.status,
            RequestStatus::Queued | RequestStatus::Processing
        ) {
            info!(request_id = %request_id, status = request.status.as_str(), "Request already settled, skipping");
            return Ok(());
        }

        self.requests.mark_processing(request_id).await?;

        let ctx: JobContext = match serde_json::from_value(request.job_context.clone()) {
            Ok(ctx) => ctx,
            Err(err) => {
                // Misuse error: no retry will fix the payload.
                let message = format!("invalid job context: {err}");
                self.fail_request(request_id, &message).await;
                return Ok(());
            }
        };
        if !ctx.is_usable() {
            self.fail_request(request_id, "job context names nothing to match on")
                .await;
            return Ok(());
        }

        // Resolve and persist the track decision before orchestration so a
        // later crash still leaves it in diagnostics.
        let requirements = sourcing_core::requirements::JobRequirements::build(&ctx);
        let hint = request
            .job_context
            .get("trackHint")
            .and_then(|v| v.as_str())
            .map(str::to_string);
        let decision = self.resolver.resolve(&ctx, &requirements, hint.as_deref()).await;
        self.requests
            .merge_diagnostics(
                request_id,
                Diagnostics {
                    track_decision: Some(decision.clone()),
                    ..Diagnostics::default()
                },
            )
            .await?;

        match self
            .orchestrator
            .run(request_id, &request.tenant_id, &ctx, &decision)
            .await
        {
            Ok(result) => {
                let patch = Diagnostics {
                    orchestrator: Some(serde_json::to_value(&result)?),
                    ..Diagnostics::default()
                };
                self.requests
                    .complete(
                        request_id,
                        result.result_count as i64,
                        result.queries_executed as i64,
                        result.quality_gate_triggered,
                        patch,
                    )
                    .await?;

                let Some(request) = self.requests.get(request_id).await? else {
                    return Ok(());
                };
                let mut payload = CallbackPayload::complete(
                    &request,
                    result.result_count as i64,
                    result.enrich.total() as i64,
                );
                // A thin shortlist still completes, but the caller should
                // know it fell short.
                if result.result_count < self.config.min_good_enough {
                    payload.status = CallbackStatus::Partial;
                }
                self.delivery.deliver(&request, &payload, true).await?;
                Ok(())
            }
            Err(err) => {
                let message = err.to_string();
                warn!(request_id = %request_id, error = %message, final_attempt, "Sourcing run failed");
                if final_attempt {
                    self.fail_request(request_id, &message).await;
                }
                Err(err)
            }
        }
    }
}

pub struct RerankJobHandler {
    executor: Arc<RerankExecutor>,
}

impl RerankJobHandler {
    pub fn new(executor: Arc<RerankExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl JobHandler for RerankJobHandler {
    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let parsed: RerankJob = serde_json::from_value(job.payload.clone())
            .map_err(|e| SourcingError::Queue(format!("bad rerank payload: {e}")))?;
        let outcome = self.executor.rerank(parsed.request_id).await?;
        info!(request_id = %parsed.request_id, ?outcome, "Rerank job finished");
        Ok(())
    }
}
