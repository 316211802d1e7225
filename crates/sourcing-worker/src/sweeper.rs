//! Callback re-delivery sweeper
//!
//! A periodic timer that retries requests stuck in `callback_failed`. One
//! cycle runs at a time; overlapping ticks are skipped rather than queued.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use sourcing_core::callback::{sweep_failed_callbacks, CallbackDelivery};
use sourcing_core::config::WorkerSettings;
use sourcing_core::store::RequestStore;

pub struct CallbackSweeper {
    requests: Arc<dyn RequestStore>,
    delivery: Arc<CallbackDelivery>,
    settings: WorkerSettings,
    running: AtomicBool,
}

impl CallbackSweeper {
    pub fn new(
        requests: Arc<dyn RequestStore>,
        delivery: Arc<CallbackDelivery>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            requests,
            delivery,
            settings,
            running: AtomicBool::new(false),
        }
    }

    /// Run one sweep cycle unless one is already in flight.
    pub async fn tick(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("Sweeper cycle still running, skipping tick");
            return;
        }
        let outcome = sweep_failed_callbacks(
            &self.requests,
            &self.delivery,
            self.settings.callback_redelivery_max_age_minutes,
            self.settings.callback_redelivery_batch_size,
            None,
        )
        .await;
        if let Err(err) = outcome {
            warn!(error = %err, "Callback redelivery sweep failed");
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Spawn the periodic loop; stops on shutdown broadcast.
    pub fn start(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        let interval_minutes = self.settings.callback_redelivery_interval_minutes;
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(interval_minutes * 60));
            // The immediate first tick would race worker startup.
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => self.tick().await,
                    _ = shutdown.recv() => break,
                }
            }
            debug!("Callback sweeper stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use sourcing_core::callback::{
        CallbackPayload, CallbackResponse, CallbackTransport, TokenSigner,
    };
    use sourcing_core::errors::Result;
    use sourcing_core::store::memory::MemoryStore;
    use sourcing_core::store::models::{RequestStatus, SourcingRequest};
    use uuid::Uuid;

    struct OkTransport;

    #[async_trait]
    impl CallbackTransport for OkTransport {
        async fn post(
            &self,
            _url: &str,
            _bearer: &str,
            _payload: &CallbackPayload,
        ) -> Result<CallbackResponse> {
            Ok(CallbackResponse {
                status: 200,
                body: String::new(),
            })
        }
    }

    struct FakeSigner;

    impl TokenSigner for FakeSigner {
        fn sign(&self, _tenant_id: &str, _request_id: Uuid) -> Result<String> {
            Ok("token".to_string())
        }
    }

    #[tokio::test]
    async fn test_tick_redelivers_old_failures() {
        let store = Arc::new(MemoryStore::new());
        let now = Utc::now();
        store.insert_request(SourcingRequest {
            id: Uuid::new_v4(),
            tenant_id: "t1".to_string(),
            external_job_id: "ext".to_string(),
            callback_url: "https://example.test/cb".to_string(),
            job_context: serde_json::json!({}),
            status: RequestStatus::CallbackFailed,
            diagnostics: None,
            result_count: Some(7),
            queries_executed: Some(1),
            quality_gate_triggered: Some(false),
            callback_attempts: 5,
            last_callback_error: Some("HTTP 500".to_string()),
            completed_at: Some(now - chrono::Duration::minutes(60)),
            last_reranked_at: None,
            created_at: now,
            updated_at: now,
        });

        let requests: Arc<dyn RequestStore> = store.clone();
        let delivery = Arc::new(CallbackDelivery::new(
            Arc::new(OkTransport),
            Arc::new(FakeSigner),
            requests.clone(),
        ));
        let sweeper = CallbackSweeper::new(requests, delivery, WorkerSettings::default());

        sweeper.tick().await;

        let swept: Vec<_> = store
            .requests
            .lock()
            .unwrap()
            .values()
            .cloned()
            .collect();
        assert_eq!(swept[0].status, RequestStatus::CallbackSent);
        assert_eq!(swept[0].callback_attempts, 6);
    }
}
