//! Claims jobs and runs their handlers under a lease.
//!
//! A handler runs on a blocking thread while this task keeps the lease
//! alive with heartbeats. If a heartbeat finds the lease gone, the handler's
//! token is cancelled and its output dropped without being released.

mod context;
mod handlers;

pub use context::WorkerContext;
pub use handlers::{dispatch, HandlerResult, JobReport};

use crate::config::WorkerSettings;
use crate::error::{CrawlError, CrawlResult};
use crate::lease::{AttemptOutcome, ClaimOutcome, HeartbeatOutcome, Lease, LeaseManager, ReleaseOutcome};
use crate::model::{Job, JobKind};
use crate::scheduler::JobScheduler;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// How one claimed job ended.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRun {
    pub job_id: String,
    pub job_uri: String,
    pub kind: JobKind,
    pub release: ReleaseOutcome,
    /// `None` unless the handler succeeded.
    pub report: Option<JobReport>,
}

/// Runs a blocking store or lease operation off the async threads.
async fn blocking<T, F>(f: F) -> CrawlResult<T>
where
    T: Send + 'static,
    F: FnOnce() -> CrawlResult<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| CrawlError::Store(format!("Blocking task failed: {}", e)))?
}

pub struct JobExecutor {
    ctx: WorkerContext,
    scheduler: JobScheduler,
    leases: LeaseManager,
    heartbeat_interval: Duration,
    claim_batch: usize,
}

impl JobExecutor {
    pub fn new(
        ctx: WorkerContext,
        scheduler: JobScheduler,
        leases: LeaseManager,
        settings: &WorkerSettings,
    ) -> Self {
        Self {
            ctx,
            scheduler,
            leases,
            heartbeat_interval: Duration::from_secs(settings.heartbeat_interval_secs),
            claim_batch: settings.claim_batch,
        }
    }

    /// Overrides the heartbeat cadence, mainly so tests need not wait seconds.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    pub fn context(&self) -> &WorkerContext {
        &self.ctx
    }

    /// Claim the best runnable job and run it. Returns whether a job was
    /// processed.
    pub async fn run_next(&self) -> CrawlResult<bool> {
        match self.claim_next().await? {
            Some((lease, job)) => {
                self.execute(lease, job).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Walk the candidates in order until one claim succeeds.
    pub async fn claim_next(&self) -> CrawlResult<Option<(Lease, Job)>> {
        let services = self.ctx.services.names();
        if services.is_empty() {
            return Ok(None);
        }

        let scheduler = self.scheduler.clone();
        let limit = self.claim_batch;
        let candidates = blocking(move || scheduler.next_candidates(&services, limit)).await?;

        for candidate in candidates {
            if self.ctx.is_cancelled() {
                break;
            }
            let leases = self.leases.clone();
            let job_id = candidate.job_id.clone();
            let worker_id = self.ctx.worker_id.clone();
            let lease = match blocking(move || leases.try_claim(&job_id, &worker_id)).await? {
                ClaimOutcome::Claimed(lease) => lease,
                ClaimOutcome::AlreadyClaimed | ClaimOutcome::NotFound | ClaimOutcome::Exhausted => {
                    continue
                }
            };

            let store = self.ctx.store.clone();
            let job_id = lease.job_id.clone();
            match blocking(move || store.get_job(&job_id)).await? {
                Some(job) => return Ok(Some((lease, job))),
                None => debug!("Job {} vanished right after claim", lease.job_id),
            }
        }
        Ok(None)
    }

    /// Run `job`'s handler under `lease` and release the lease with the
    /// outcome. Always releases unless the lease was lost.
    pub async fn execute(&self, lease: Lease, job: Job) -> CrawlResult<JobRun> {
        info!(
            "Running {} job {} (attempt {})",
            job.kind, job.job_uri, lease.attempts
        );
        let started = std::time::Instant::now();

        let job_ctx = self.ctx.for_job();
        let job_token = job_ctx.cancellation_token.clone();
        let handler_job = job.clone();
        let mut handle = tokio::task::spawn_blocking(move || handlers::dispatch(&job_ctx, &handler_job));

        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.heartbeat_interval,
            self.heartbeat_interval,
        );
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // a lease not refreshed for a whole timeout counts as lost
        let lease_timeout = self.leases.lease_timeout_secs();
        let mut last_refresh = lease.claimed_at;
        let mut lease_lost = false;
        let joined = loop {
            tokio::select! {
                joined = &mut handle => break joined,
                _ = ticker.tick() => {
                    let leases = self.leases.clone();
                    let beat = lease.clone();
                    let refreshed = match blocking(move || leases.heartbeat(&beat)).await {
                        Ok(HeartbeatOutcome::Ok) => true,
                        Ok(HeartbeatOutcome::LeaseLost) => {
                            lease_lost = true;
                            false
                        }
                        Ok(HeartbeatOutcome::Deferred) => false,
                        Err(e) => {
                            warn!("Heartbeat for job {} failed: {}", lease.job_id, e);
                            false
                        }
                    };
                    let now = self.ctx.clock.now();
                    if refreshed {
                        last_refresh = now;
                    } else if !lease_lost && now - last_refresh >= lease_timeout {
                        warn!(
                            "Lease on job {} not refreshed for {}s, treating it as lost",
                            lease.job_id,
                            now - last_refresh
                        );
                        lease_lost = true;
                    }
                    if lease_lost {
                        job_token.cancel();
                        break (&mut handle).await;
                    }
                }
            }
        };

        let mut run = JobRun {
            job_id: job.job_id.clone(),
            job_uri: job.job_uri.clone(),
            kind: job.kind,
            release: ReleaseOutcome::LeaseLost,
            report: None,
        };
        if lease_lost {
            warn!(
                "Lease on job {} lost while running, result discarded",
                job.job_uri
            );
            return Ok(run);
        }

        let outcome = match joined {
            Ok(Ok(result)) => {
                run.report = Some(result.report);
                AttemptOutcome::Succeeded(result.output)
            }
            Ok(Err(CrawlError::Cancelled)) => {
                info!("Job {} interrupted by shutdown", job.job_uri);
                AttemptOutcome::Abandoned
            }
            Ok(Err(CrawlError::PermanentJob(msg))) => AttemptOutcome::Failed { error: msg },
            Ok(Err(e)) => AttemptOutcome::Retry {
                error: e.to_string(),
            },
            Err(join_err) => {
                error!("Handler for job {} panicked: {}", job.job_uri, join_err);
                AttemptOutcome::Retry {
                    error: format!("Handler panicked: {}", join_err),
                }
            }
        };

        let leases = self.leases.clone();
        let release_lease = lease.clone();
        run.release = blocking(move || leases.release(&release_lease, outcome)).await?;

        if let ReleaseOutcome::Completed(summary) = &run.release {
            info!(
                "Finished {} job {} in {:?} ({} new jobs, {} histograms, {} memberships)",
                job.kind,
                job.job_uri,
                started.elapsed(),
                summary.jobs_inserted,
                summary.histograms_upserted,
                summary.memberships_recorded
            );
        }
        Ok(run)
    }
}
