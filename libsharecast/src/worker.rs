//! Worker pool executing queued jobs
//!
//! Each poller claims one job at a time from the [`JobQueue`], runs its
//! handler and records the result. Publishing is idempotent on the share
//! side, so a job delivered twice is harmless.

use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::error::Result;
use crate::jobs::{ClaimedJob, Job, JobQueue, JobStatus};
use crate::service::shares::{PublishOutcome, ShareService};

#[derive(Clone)]
pub struct Worker {
    queue: Arc<dyn JobQueue>,
    shares: ShareService,
}

impl Worker {
    pub fn new(queue: Arc<dyn JobQueue>, shares: ShareService) -> Self {
        Self { queue, shares }
    }

    /// Claim and run one job; `false` when the queue had nothing runnable
    pub async fn process_next(&self) -> Result<bool> {
        let Some(claimed) = self.queue.claim_next(Utc::now()).await? else {
            return Ok(false);
        };

        let ClaimedJob { id, job, attempts } = claimed;
        debug!(job_id = id, attempts, description = %job.description(), "Running job");

        match self.handle(id, &job).await {
            Ok(()) => self.queue.complete(id).await?,
            Err(e) => {
                let status = self.queue.fail(id, &e.to_string(), Utc::now()).await?;
                match status {
                    JobStatus::Failed => error!(job_id = id, error = %e, "Job failed permanently"),
                    _ => warn!(job_id = id, error = %e, "Job failed, will retry"),
                }
            }
        }
        Ok(true)
    }

    /// Run jobs until the queue has nothing runnable, returning how many ran
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.process_next().await? {
            processed += 1;
        }
        Ok(processed)
    }

    async fn handle(&self, job_id: i64, job: &Job) -> Result<()> {
        match job {
            Job::PublishShare(publish) => {
                self.queue.progress(job_id, 0.0).await?;
                let outcome = self.shares.publish_by_id(publish.share_id, Utc::now()).await?;
                self.queue.progress(job_id, 1.0).await?;

                match outcome {
                    PublishOutcome::Published(_) | PublishOutcome::Failed(_) => {}
                    skipped => info!(
                        job_id,
                        share_id = publish.share_id,
                        reason = skipped.label(),
                        "Publish job skipped"
                    ),
                }
                Ok(())
            }
        }
    }

    /// Run `concurrency` pollers until `shutdown` is set
    ///
    /// Idle pollers wake on new jobs or after `poll_interval`. A poller
    /// finishes its current job before observing the shutdown flag.
    pub async fn run(self, concurrency: usize, poll_interval: Duration, shutdown: Arc<AtomicBool>) {
        info!(concurrency, poll_interval_secs = poll_interval.as_secs(), "Worker pool starting");

        let pollers = (0..concurrency.max(1)).map(|index| {
            let worker = self.clone();
            let shutdown = Arc::clone(&shutdown);
            tokio::spawn(async move { worker.poll(index, poll_interval, shutdown).await })
        });

        for result in join_all(pollers).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }

    async fn poll(&self, index: usize, poll_interval: Duration, shutdown: Arc<AtomicBool>) {
        // Wake at least once a second to observe shutdown
        let idle_wait = poll_interval.min(Duration::from_secs(1));

        while !shutdown.load(Ordering::Relaxed) {
            match self.process_next().await {
                Ok(true) => {}
                Ok(false) => self.queue.wait(idle_wait).await,
                Err(e) => {
                    error!(poller = index, error = %e, "Error processing jobs");
                    tokio::time::sleep(idle_wait).await;
                }
            }
        }
        debug!(poller = index, "Poller stopped");
    }
}
