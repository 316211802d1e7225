//! Sourcing worker entrypoint
//!
//! Boots the Postgres and Redis handles, the two queue consumers, the
//! health HTTP surface, and the callback re-delivery sweeper, then waits
//! for SIGINT/SIGTERM and drains everything in order.

mod health;
mod serp_client;
mod sweeper;
mod worker;

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sourcing_core::budget::RedisDailyCounter;
use sourcing_core::callback::{
    CallbackDelivery, CallbackSigner, HttpCallbackTransport, TokenSigner,
};
use sourcing_core::config::{Secrets, SourcingConfig, WorkerSettings};
use sourcing_core::errors::SourcingError;
use sourcing_core::llm::{GroqClient, StructuredLlm};
use sourcing_core::queue::{JobQueue, QueueWorker, RedisJobQueue};
use sourcing_core::rerank::{RerankExecutor, RerankScheduler};
use sourcing_core::serp::{SerpProvider, SerpSearch};
use sourcing_core::store::postgres::PgStore;
use sourcing_core::store::RequestStore;
use sourcing_core::track::cache::RedisKv;
use sourcing_core::track::TrackResolver;
use sourcing_core::Orchestrator;

use crate::health::AppState;
use crate::sweeper::CallbackSweeper;
use crate::worker::{RerankJobHandler, SourcingJobHandler};

/// Signer used when no key material is configured: every callback fails
/// as a configuration error instead of going out unsigned.
struct MissingKeySigner;

impl TokenSigner for MissingKeySigner {
    fn sign(
        &self,
        _tenant_id: &str,
        _request_id: uuid::Uuid,
    ) -> sourcing_core::errors::Result<String> {
        Err(SourcingError::Config(
            "SIGNAL_JWT_PRIVATE_KEY is not set".to_string(),
        ))
    }
}

/// SERP provider stub used until a concrete client is wired in; every
/// query reports the provider as unavailable so runs degrade to the pool.
struct UnconfiguredSerp;

#[async_trait::async_trait]
impl SerpProvider for UnconfiguredSerp {
    async fn search_profiles(
        &self,
        _query: &str,
        _limit: usize,
    ) -> sourcing_core::errors::Result<SerpSearch> {
        Err(SourcingError::Serp("no SERP provider configured".to_string()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = SourcingConfig::from_env();
    let settings = WorkerSettings::from_env();
    let secrets = Secrets::from_env();

    info!(
        concurrency = settings.concurrency,
        port = settings.port,
        "Starting sourcing worker"
    );

    // Persistence handles.
    let store = Arc::new(
        PgStore::connect(&secrets.database_url)
            .await
            .context("connecting to Postgres")?,
    );
    store.setup().await.context("running store setup")?;

    let redis_client =
        redis::Client::open(secrets.redis_url.as_str()).context("parsing REDIS_URL")?;
    let redis_conn = redis::aio::ConnectionManager::new(redis_client)
        .await
        .context("connecting to Redis")?;

    // Optional LLM provider.
    let llm: Option<Arc<dyn StructuredLlm>> = secrets
        .groq_api_key
        .as_deref()
        .map(|key| Arc::new(GroqClient::new(key)) as Arc<dyn StructuredLlm>);
    if llm.is_none() {
        warn!("GROQ_API_KEY not set; classifier and query generation stay deterministic");
    }

    // Callback delivery.
    let signer: Arc<dyn TokenSigner> = match secrets.jwt_private_key.as_deref() {
        Some(material) => Arc::new(
            CallbackSigner::from_key_material(material, secrets.jwt_active_kid.clone())
                .context("parsing SIGNAL_JWT_PRIVATE_KEY")?,
        ),
        None => {
            warn!("SIGNAL_JWT_PRIVATE_KEY not set; callbacks will fail until configured");
            Arc::new(MissingKeySigner)
        }
    };
    let requests: Arc<dyn RequestStore> = store.clone();
    let delivery = Arc::new(CallbackDelivery::new(
        Arc::new(HttpCallbackTransport::new().context("building callback client")?),
        signer,
        requests.clone(),
    ));

    // Classifier.
    let mut resolver = TrackResolver::new(config.clone());
    if let Some(llm) = llm.clone() {
        resolver = resolver.with_groq(llm, Arc::new(RedisKv::new(redis_conn.clone())));
    }
    let resolver = Arc::new(resolver);

    // Orchestrator.
    let serp: Arc<dyn SerpProvider> = match std::env::var("SERPER_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Arc::new(
            serp_client::SerperProvider::new(key).context("building SERP client")?,
        ),
        _ => {
            warn!("SERPER_API_KEY not set; discovery will be skipped");
            Arc::new(UnconfiguredSerp)
        }
    };
    let orchestrator = Arc::new(Orchestrator::new(
        config.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        store.clone(),
        serp,
        Arc::new(RedisDailyCounter::new(redis_conn.clone())),
        llm,
    ));

    // Queues and consumers.
    let sourcing_queue: Arc<dyn JobQueue> =
        Arc::new(RedisJobQueue::new("sourcing", redis_conn.clone()));
    let rerank_queue: Arc<dyn JobQueue> =
        Arc::new(RedisJobQueue::new("sourcing-rerank", redis_conn.clone()));

    let sourcing_handler = Arc::new(SourcingJobHandler::new(
        requests.clone(),
        resolver,
        orchestrator,
        delivery.clone(),
        config.clone(),
    ));
    let rerank_handler = Arc::new(RerankJobHandler::new(Arc::new(RerankExecutor::new(
        store.clone(),
        store.clone(),
        store.clone(),
        config.fit_score_epsilon,
    ))));

    let mut sourcing_worker =
        QueueWorker::new(sourcing_queue.clone(), sourcing_handler, settings.concurrency);
    let mut rerank_worker = QueueWorker::new(rerank_queue.clone(), rerank_handler, 2);
    sourcing_worker.start();
    rerank_worker.start();

    // HTTP surface.
    let rerank_scheduler = Arc::new(RerankScheduler::new(
        rerank_queue.clone(),
        store.clone(),
        config.rerank_delay_ms,
        config.rerank_after_enrichment,
    ));
    let state = Arc::new(AppState {
        started_at: Instant::now(),
        concurrency: settings.concurrency,
        queues: vec![sourcing_queue, rerank_queue],
        rerank: rerank_scheduler,
    });
    let app = health::router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("binding port {}", settings.port))?;
    info!(port = settings.port, "Health endpoint listening");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    let server_shutdown = shutdown_tx.subscribe();
    let server = tokio::spawn(async move {
        let mut shutdown = server_shutdown;
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await;
        if let Err(err) = result {
            warn!(error = %err, "Health server exited with error");
        }
    });

    // Sweeper.
    let sweeper_handle = if settings.callback_redelivery_enabled {
        let sweeper = Arc::new(CallbackSweeper::new(
            requests,
            delivery,
            settings.clone(),
        ));
        Some(sweeper.start(shutdown_tx.subscribe()))
    } else {
        None
    };

    wait_for_shutdown_signal().await;
    info!("Shutdown signal received, draining");

    // Order matters: stop the sweeper timer, drain workers, then the rest.
    let _ = shutdown_tx.send(());
    if let Some(handle) = sweeper_handle {
        let _ = handle.await;
    }
    sourcing_worker.shutdown().await;
    rerank_worker.shutdown().await;
    let _ = server.await;

    info!("Sourcing worker stopped cleanly");
    Ok(())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
