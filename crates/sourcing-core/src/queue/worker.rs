//! Queue consumer
//!
//! Polls a queue with a fixed number of concurrent slots, dispatching jobs
//! to a handler and reporting completion or failure back to the queue.
//! Shutdown is broadcast; slots finish their current job and exit.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::errors::Result;

use super::{JobQueue, QueuedJob};

/// Handles one job at a time.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, job: &QueuedJob) -> Result<()>;
}

pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    poll_interval: Duration,
    shutdown_tx: broadcast::Sender<()>,
    slots: Vec<JoinHandle<()>>,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, concurrency: usize) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            queue,
            handler,
            concurrency: concurrency.max(1),
            poll_interval: Duration::from_millis(500),
            shutdown_tx,
            slots: Vec::new(),
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn queue(&self) -> &Arc<dyn JobQueue> {
        &self.queue
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Spawn the consumer slots.
    pub fn start(&mut self) {
        info!(
            queue = self.queue.name(),
            concurrency = self.concurrency,
            "Starting queue worker"
        );
        for slot in 0..self.concurrency {
            let queue = self.queue.clone();
            let handler = self.handler.clone();
            let poll_interval = self.poll_interval;
            let mut shutdown_rx = self.shutdown_tx.subscribe();
            let slot_name = format!("{}-{}", queue.name(), slot);

            self.slots.push(tokio::spawn(async move {
                debug!(slot = %slot_name, "Worker slot started");
                loop {
                    match shutdown_rx.try_recv() {
                        Ok(_) | Err(broadcast::error::TryRecvError::Closed) => break,
                        Err(_) => {}
                    }

                    match queue.next_ready().await {
                        Ok(Some(job)) => {
                            process_job(queue.as_ref(), handler.as_ref(), &job).await;
                        }
                        Ok(None) => {
                            tokio::time::sleep(poll_interval).await;
                        }
                        Err(err) => {
                            error!(slot = %slot_name, error = %err, "Queue poll failed");
                            tokio::time::sleep(poll_interval).await;
                        }
                    }
                }
                debug!(slot = %slot_name, "Worker slot stopped");
            }));
        }
    }

    /// Signal shutdown and wait for slots to drain.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(());
        for handle in self.slots.drain(..) {
            let _ = handle.await;
        }
        info!(queue = self.queue.name(), "Queue worker stopped");
    }
}

async fn process_job(queue: &dyn JobQueue, handler: &dyn JobHandler, job: &QueuedJob) {
    debug!(queue = queue.name(), job_id = %job.id, attempt = job.attempts_made, "Processing job");
    match handler.handle(job).await {
        Ok(()) => {
            if let Err(err) = queue.complete(&job.id).await {
                error!(job_id = %job.id, error = %err, "Failed to mark job completed");
            }
        }
        Err(handler_err) => {
            error!(job_id = %job.id, error = %handler_err, "Job handler failed");
            match queue.fail(&job.id, &handler_err.to_string()).await {
                Ok(true) => debug!(job_id = %job.id, "Job scheduled for retry"),
                Ok(false) => debug!(job_id = %job.id, "Job exhausted retries"),
                Err(err) => error!(job_id = %job.id, error = %err, "Failed to mark job failed"),
            }
        }
    }
}
