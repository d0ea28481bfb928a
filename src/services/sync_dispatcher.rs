//! In-process background sync dispatcher
//!
//! Runs queued materialization jobs on the tokio runtime. A job id stays
//! pending until its task finishes; enqueueing the same id meanwhile is a
//! no-op. Failures are logged, counted and published on the failure channel.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info};
use uuid::Uuid;

use crate::errors::Result;
use crate::metrics_core::{MetricsRecorder, NoopMetrics};
use crate::services::collaborators::{EnqueueOutcome, JobEnqueuer, SyncJob};
use crate::services::materializer::Materializer;

/// A background job that did not complete
#[derive(Debug, Clone)]
pub struct SyncFailure {
    pub job: SyncJob,
    pub code: &'static str,
    pub message: String,
}

pub struct SyncDispatcher {
    materializer: Arc<Materializer>,
    pending: Arc<DashMap<String, SyncJob>>,
    idle: Arc<Notify>,
    failures: mpsc::UnboundedSender<SyncFailure>,
    metrics: Arc<dyn MetricsRecorder>,
    backfill_days: u32,
}

impl SyncDispatcher {
    /// Returns the dispatcher and the receiving end of its failure channel
    pub fn new(
        materializer: Arc<Materializer>,
        backfill_days: u32,
    ) -> (Self, mpsc::UnboundedReceiver<SyncFailure>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            materializer,
            pending: Arc::new(DashMap::new()),
            idle: Arc::new(Notify::new()),
            failures: tx,
            metrics: NoopMetrics::arc(),
            backfill_days: backfill_days.max(1),
        };
        (dispatcher, rx)
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn pending_jobs(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, job_id: &str) -> bool {
        self.pending.contains_key(job_id)
    }

    /// Resolve once no job is pending
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.is_empty() {
                return;
            }
            notified.await;
        }
    }

    fn spawn(&self, job: SyncJob) {
        let materializer = self.materializer.clone();
        let pending = self.pending.clone();
        let idle = self.idle.clone();
        let failures = self.failures.clone();
        let metrics = self.metrics.clone();
        let days = self.backfill_days;
        let run_id = Uuid::new_v4();

        tokio::spawn(async move {
            debug!(job_id = %job.job_id, %run_id, "Background sync started");
            let result = materializer
                .backfill(&job.tenant_id, &job.brand_id, job.platform, days)
                .await;
            match result {
                Ok(outcome) => {
                    metrics.inc_background_sync("ok");
                    debug!(
                        job_id = %job.job_id,
                        %run_id,
                        outcome = outcome.as_str(),
                        "Background sync finished"
                    );
                }
                Err(e) => {
                    metrics.inc_background_sync("failed");
                    error!(job_id = %job.job_id, %run_id, "Background sync failed: {}", e);
                    // 接收端可能已被丢弃
                    let _ = failures.send(SyncFailure {
                        job: job.clone(),
                        code: e.code(),
                        message: e.message(),
                    });
                }
            }
            pending.remove(&job.job_id);
            idle.notify_waiters();
        });
    }
}

#[async_trait]
impl JobEnqueuer for SyncDispatcher {
    async fn enqueue(&self, job: SyncJob) -> Result<EnqueueOutcome> {
        match self.pending.entry(job.job_id.clone()) {
            Entry::Occupied(_) => {
                self.metrics.inc_background_sync("duplicate");
                debug!(job_id = %job.job_id, "Sync job already pending");
                Ok(EnqueueOutcome::Duplicate)
            }
            Entry::Vacant(slot) => {
                slot.insert(job.clone());
                self.metrics.inc_background_sync("enqueued");
                info!(
                    job_id = %job.job_id,
                    tenant_id = %job.tenant_id,
                    brand_id = %job.brand_id,
                    "Sync job enqueued"
                );
                self.spawn(job);
                Ok(EnqueueOutcome::Enqueued)
            }
        }
    }
}
