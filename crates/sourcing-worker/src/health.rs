//! Worker HTTP surface
//!
//! A small axum app: liveness with queue depths, plus the inbound hook the
//! enrichment subsystem calls when a candidate finishes enriching.

use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::warn;
use uuid::Uuid;

use sourcing_core::queue::JobQueue;
use sourcing_core::rerank::RerankScheduler;

pub struct AppState {
    pub started_at: Instant,
    pub concurrency: usize,
    pub queues: Vec<Arc<dyn JobQueue>>,
    pub rerank: Arc<RerankScheduler>,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/internal/enrichment-complete", post(enrichment_complete))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let mut queues = serde_json::Map::new();
    for queue in &state.queues {
        let counts = queue.counts().await.unwrap_or_default();
        queues.insert(
            queue.name().to_string(),
            serde_json::to_value(counts).unwrap_or(json!({})),
        );
    }

    Json(json!({
        "status": "ok",
        "uptimeSecs": state.started_at.elapsed().as_secs(),
        "concurrency": state.concurrency,
        "queues": queues,
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnrichmentCompleteBody {
    tenant_id: String,
    candidate_id: Uuid,
}

async fn enrichment_complete(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnrichmentCompleteBody>,
) -> (StatusCode, Json<serde_json::Value>) {
    match state
        .rerank
        .on_enrichment_completed(&body.tenant_id, body.candidate_id)
        .await
    {
        Ok(scheduled) => (
            StatusCode::ACCEPTED,
            Json(json!({"scheduled": scheduled})),
        ),
        Err(err) => {
            warn!(error = %err, "Enrichment-complete notification failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({"error": err.to_string()})),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sourcing_core::queue::MemoryJobQueue;
    use sourcing_core::store::memory::MemoryStore;
    use tower::ServiceExt;

    fn state() -> Arc<AppState> {
        let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new("sourcing"));
        let rerank_queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new("sourcing-rerank"));
        let store = Arc::new(MemoryStore::new());
        Arc::new(AppState {
            started_at: Instant::now(),
            concurrency: 2,
            queues: vec![queue, rerank_queue.clone()],
            rerank: Arc::new(RerankScheduler::new(rerank_queue, store, 1000, true)),
        })
    }

    #[tokio::test]
    async fn test_health_reports_queues() {
        let app = router(state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/health")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["concurrency"], 2);
        assert!(body["queues"]["sourcing"]["waiting"].is_number());
        assert!(body["queues"]["sourcing-rerank"].is_object());
    }

    #[tokio::test]
    async fn test_enrichment_complete_accepted() {
        let app = router(state());
        let response = app
            .oneshot(
                axum::http::Request::builder()
                    .method("POST")
                    .uri("/internal/enrichment-complete")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(
                        serde_json::json!({
                            "tenantId": "t1",
                            "candidateId": Uuid::new_v4()
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
    }
}
