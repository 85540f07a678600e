//! The worker loop: lease reaping, recurring scheduling and purging on their
//! own intervals, and claim/execute rounds in between.

use crate::config::{AppConfig, WorkerSettings};
use crate::executor::{JobExecutor, WorkerContext};
use crate::lease::{Clock, LeaseManager, RetryPolicy};
use crate::scheduler::JobScheduler;
use crate::services::{BpmAnalyzer, ServiceRegistry};
use crate::store::{CrawlStore, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Maintenance {
    Reap,
    Schedule,
    Purge,
}

/// Periodic task with its next due time.
struct Periodic {
    task: Maintenance,
    every: Duration,
    next_due: Instant,
}

pub struct Worker {
    worker_id: String,
    executor: JobExecutor,
    scheduler: JobScheduler,
    settings: WorkerSettings,
    shutdown_token: CancellationToken,
}

impl Worker {
    pub fn new<S: CrawlStore + 'static>(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        services: ServiceRegistry,
        analyzer: Arc<dyn BpmAnalyzer>,
        config: &AppConfig,
        shutdown_token: CancellationToken,
    ) -> Self {
        let settings = config.worker.clone();
        let crawl_store: Arc<dyn CrawlStore> = store.clone();
        let job_store: Arc<dyn JobStore> = store;

        let scheduler = JobScheduler::new(crawl_store.clone(), clock.clone(), &settings);
        let leases = LeaseManager::new(
            job_store,
            clock.clone(),
            RetryPolicy::new(&settings),
            settings.lease_timeout_secs,
        );
        let ctx = WorkerContext::new(
            config.worker_id.clone(),
            crawl_store,
            clock,
            services,
            analyzer,
            config.matcher,
            shutdown_token.clone(),
        );
        let executor = JobExecutor::new(ctx, scheduler.clone(), leases, &settings);

        Self {
            worker_id: config.worker_id.clone(),
            executor,
            scheduler,
            settings,
            shutdown_token,
        }
    }

    pub fn scheduler(&self) -> &JobScheduler {
        &self.scheduler
    }

    /// Runs until the shutdown token fires. A job in flight at shutdown is
    /// handed back to the queue.
    pub async fn run(&self) {
        let backends = self.executor.context().services.names();
        info!(
            "Starting worker {} with backends [{}]",
            self.worker_id,
            backends.join(", ")
        );
        if backends.is_empty() {
            warn!("No music service backends registered, running maintenance only");
        }

        let start = Instant::now();
        let mut periodic = [
            (Maintenance::Reap, self.settings.reap_interval_secs),
            (Maintenance::Schedule, self.settings.schedule_interval_secs),
            (Maintenance::Purge, self.settings.purge_interval_secs),
        ]
        .map(|(task, secs)| Periodic {
            task,
            every: Duration::from_secs(secs),
            next_due: start,
        });
        let poll_interval = Duration::from_secs(self.settings.poll_interval_secs);

        loop {
            if self.shutdown_token.is_cancelled() {
                info!("Worker received shutdown signal");
                break;
            }

            for p in periodic.iter_mut() {
                let now = Instant::now();
                if now >= p.next_due {
                    self.run_maintenance(p.task).await;
                    p.next_due = now + p.every;
                }
            }

            let processed = match self.executor.run_next().await {
                Ok(processed) => processed,
                Err(e) => {
                    error!("Job round failed: {}", e);
                    false
                }
            };
            if processed {
                continue;
            }

            let next_due = periodic
                .iter()
                .map(|p| p.next_due)
                .min()
                .unwrap_or_else(|| Instant::now() + poll_interval);
            let idle = poll_interval.min(next_due.saturating_duration_since(Instant::now()));
            debug!("No runnable job, sleeping for {:?}", idle);

            tokio::select! {
                _ = tokio::time::sleep(idle) => {}
                _ = self.shutdown_token.cancelled() => {
                    info!("Worker received shutdown signal");
                    break;
                }
            }
        }

        info!("Worker {} stopped", self.worker_id);
    }

    async fn run_maintenance(&self, task: Maintenance) {
        let scheduler = self.scheduler.clone();
        let result = tokio::task::spawn_blocking(move || match task {
            Maintenance::Reap => scheduler.reap().map(|_| ()),
            Maintenance::Schedule => scheduler.schedule_recurring().map(|_| ()),
            Maintenance::Purge => scheduler.purge().map(|_| ()),
        })
        .await;

        match result {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!("{:?} pass failed: {}", task, e),
            Err(e) => error!("{:?} pass panicked: {}", task, e),
        }
    }
}
