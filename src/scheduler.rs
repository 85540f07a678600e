//! Decides which jobs must exist and which one a worker should try next.
//!
//! Scheduling is idempotent: enqueueing work whose `job_uri` already has an
//! unfinished job is a no-op, and the recurring pass stamps each entity
//! with a guarded update before enqueueing, so concurrent workers running
//! the same pass schedule each entity once per interval.

use crate::config::WorkerSettings;
use crate::error::CrawlResult;
use crate::lease::Clock;
use crate::model::{Job, JobSpec, StampedEntity, User};
use crate::store::{CrawlStore, InsertOutcome};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Jobs created by one recurring pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleReport {
    pub scans_enqueued: usize,
    pub picks_enqueued: usize,
}

#[derive(Clone)]
pub struct JobScheduler {
    store: Arc<dyn CrawlStore>,
    clock: Arc<dyn Clock>,
    lease_timeout_secs: i64,
    scan_interval_secs: i64,
    pick_interval_secs: i64,
    job_retention_secs: i64,
}

impl JobScheduler {
    pub fn new(store: Arc<dyn CrawlStore>, clock: Arc<dyn Clock>, settings: &WorkerSettings) -> Self {
        Self {
            store,
            clock,
            lease_timeout_secs: settings.lease_timeout_secs as i64,
            scan_interval_secs: settings.scan_interval_secs as i64,
            pick_interval_secs: settings.pick_interval_secs as i64,
            job_retention_secs: settings.job_retention_secs as i64,
        }
    }

    /// Insert a job for `spec`. An existing job with the same `job_uri`
    /// is reported as `AlreadyExists`.
    pub fn enqueue(&self, spec: &JobSpec) -> CrawlResult<InsertOutcome> {
        let job = Job::new(spec, self.clock.now());
        let outcome = self.store.insert_job(&job)?;
        if outcome == InsertOutcome::Inserted {
            debug!("Enqueued {} ({})", job.job_uri, job.job_id);
        }
        Ok(outcome)
    }

    /// Like `enqueue`, but a finished job with the same `job_uri` is
    /// archived first so the work runs again.
    pub fn enqueue_recurring(&self, spec: &JobSpec) -> CrawlResult<InsertOutcome> {
        let job_uri = spec.job_uri();
        if let Some(existing) = self.store.get_job_by_uri(&job_uri)? {
            if !existing.finished {
                return Ok(InsertOutcome::AlreadyExists);
            }
            self.store.delete_finished_by_uri(&job_uri)?;
        }
        self.enqueue(spec)
    }

    /// Enqueue `scan_playlist` per playlist and `pick_tracks` per target
    /// whose last schedule is older than the configured interval.
    pub fn schedule_recurring(&self) -> CrawlResult<ScheduleReport> {
        let now = self.clock.now();
        let enabled_services: BTreeSet<String> = self
            .store
            .list_services()?
            .into_iter()
            .filter(|s| s.enabled)
            .map(|s| s.name)
            .collect();
        let users: BTreeMap<String, User> = self
            .store
            .list_users()?
            .into_iter()
            .map(|u| (u.user.clone(), u))
            .collect();
        let schedulable = |user: &str, service: &str| {
            enabled_services.contains(service)
                && users
                    .get(user)
                    .is_some_and(|u| u.enabled && u.credentials(service).is_some())
        };

        let mut report = ScheduleReport::default();

        for playlist in self.store.list_playlists()? {
            if !schedulable(&playlist.user, &playlist.service) {
                continue;
            }
            if !self.store.stamp_scheduled(
                StampedEntity::Playlist,
                &playlist.playlist_uri,
                now,
                self.scan_interval_secs,
            )? {
                continue;
            }
            let spec = JobSpec::scan_playlist(
                &playlist.user,
                &playlist.service,
                &playlist.service_playlist_id,
            );
            if self.enqueue_recurring(&spec)? == InsertOutcome::Inserted {
                report.scans_enqueued += 1;
            }
        }

        for target in self.store.list_targets()? {
            if !schedulable(&target.user, &target.service) {
                continue;
            }
            if !self.store.stamp_scheduled(
                StampedEntity::Target,
                &target.target_uri,
                now,
                self.pick_interval_secs,
            )? {
                continue;
            }
            let spec = JobSpec::pick_tracks(&target.user, &target.service, &target.target);
            if self.enqueue_recurring(&spec)? == InsertOutcome::Inserted {
                report.picks_enqueued += 1;
            }
        }

        if report != ScheduleReport::default() {
            info!(
                "Scheduled {} playlist scans and {} target picks",
                report.scans_enqueued, report.picks_enqueued
            );
        }
        Ok(report)
    }

    /// Release leases whose holder stopped heartbeating.
    pub fn reap(&self) -> CrawlResult<usize> {
        let stale_before = self.clock.now() - self.lease_timeout_secs;
        let reclaimed = self.store.reset_expired_leases(stale_before)?;
        if reclaimed > 0 {
            info!("Reclaimed {} abandoned job leases", reclaimed);
        }
        Ok(reclaimed)
    }

    /// Delete finished jobs past the retention window. Unfinished jobs are kept.
    pub fn purge(&self) -> CrawlResult<usize> {
        let cutoff = self.clock.now() - self.job_retention_secs;
        let purged = self.store.delete_finished_before(cutoff)?;
        if purged > 0 {
            info!("Purged {} finished jobs", purged);
        }
        Ok(purged)
    }

    /// Claimable jobs for `services`, best first.
    pub fn next_candidates(&self, services: &[String], limit: usize) -> CrawlResult<Vec<Job>> {
        let now = self.clock.now();
        self.store
            .find_claimable(services, now, now - self.lease_timeout_secs, limit)
    }
}
