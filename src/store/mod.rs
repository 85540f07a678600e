//! Persistent store contract for jobs and crawl entities.
//!
//! Every conditional update returns whether its guard matched, so callers
//! never need a read-then-write of their own.

mod schema;
mod sqlite_store;

pub use schema::CRAWL_VERSIONED_SCHEMAS;
pub use sqlite_store::SqliteCrawlStore;

use crate::error::CrawlResult;
use crate::model::{
    Job, JobKind, JobSpec, JobStatus, Playlist, Service, StampedEntity, Target, Timestamp,
    TrackHistogram, User,
};

/// Result of inserting a job whose `job_uri` may already exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    AlreadyExists,
}

/// Writes a handler stages while it runs. Nothing here reaches the store
/// unless the job is still leased by the same worker at commit time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobOutput {
    pub new_jobs: Vec<JobSpec>,
    pub histograms: Vec<TrackHistogram>,
    /// (track_uri, playlist_uri) pairs merged into `from_playlists`.
    pub memberships: Vec<(String, String)>,
    /// Entity whose `timestamp_last_job_finished` is stamped on commit.
    pub finished_stamp: Option<(StampedEntity, String)>,
}

/// What a successful commit wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitSummary {
    pub jobs_inserted: usize,
    pub jobs_existing: usize,
    pub histograms_upserted: usize,
    pub memberships_recorded: usize,
}

/// Job queue operations.
pub trait JobStore: Send + Sync {
    // === Insert / lookup ===

    /// Insert a new job. A `job_uri` collision is `AlreadyExists`, not an error.
    fn insert_job(&self, job: &Job) -> CrawlResult<InsertOutcome>;

    fn get_job(&self, job_id: &str) -> CrawlResult<Option<Job>>;

    fn get_job_by_uri(&self, job_uri: &str) -> CrawlResult<Option<Job>>;

    /// Most recently created first.
    fn list_jobs(&self, kind: Option<JobKind>, limit: usize) -> CrawlResult<Vec<Job>>;

    /// Unfinished jobs for `services` that are free (or whose lease went
    /// stale before `stale_before`) and past their `not_before`, ordered by
    /// priority then age.
    fn find_claimable(
        &self,
        services: &[String],
        now: Timestamp,
        stale_before: Timestamp,
        limit: usize,
    ) -> CrawlResult<Vec<Job>>;

    fn count_by_status(&self) -> CrawlResult<Vec<(JobStatus, usize)>>;

    // === Lease transitions (atomic, guarded) ===

    /// Take the lease if the job is free or stale. Returns whether the guard matched.
    fn try_lock(
        &self,
        job_id: &str,
        worker_id: &str,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> CrawlResult<bool>;

    /// Refresh `timestamp_updated` while the lease is still ours.
    fn touch(&self, job_id: &str, worker_id: &str, now: Timestamp) -> CrawlResult<bool>;

    /// Commit `output` and mark the job succeeded in one transaction.
    /// `None` if the lease was lost; nothing is written in that case.
    fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        now: Timestamp,
        output: &JobOutput,
    ) -> CrawlResult<Option<CommitSummary>>;

    /// Clear the lease so another claim can pick the job up.
    /// `refund_attempt` undoes the attempt counted by the claim.
    fn requeue(
        &self,
        job_id: &str,
        worker_id: &str,
        not_before: Option<Timestamp>,
        last_error: Option<&str>,
        refund_attempt: bool,
    ) -> CrawlResult<bool>;

    /// Mark the job finished with status failed.
    fn fail(&self, job_id: &str, worker_id: &str, now: Timestamp, error: &str) -> CrawlResult<bool>;

    // === Maintenance ===

    /// Reset leases of unfinished jobs not updated since `stale_before`.
    fn reset_expired_leases(&self, stale_before: Timestamp) -> CrawlResult<usize>;

    /// Delete finished jobs that finished before `cutoff`.
    fn delete_finished_before(&self, cutoff: Timestamp) -> CrawlResult<usize>;

    /// Delete the job with `job_uri` if it is finished.
    fn delete_finished_by_uri(&self, job_uri: &str) -> CrawlResult<bool>;
}

/// Crawl entity operations, all keyed by derived identity.
pub trait EntityStore: Send + Sync {
    fn upsert_service(&self, service: &Service) -> CrawlResult<()>;
    fn list_services(&self) -> CrawlResult<Vec<Service>>;

    fn upsert_user(&self, user: &User) -> CrawlResult<()>;
    fn get_user(&self, user: &str) -> CrawlResult<Option<User>>;
    fn list_users(&self) -> CrawlResult<Vec<User>>;

    /// Insert or rename; never touches the scheduling timestamps.
    fn upsert_playlist(&self, playlist: &Playlist) -> CrawlResult<()>;
    fn get_playlist(&self, playlist_uri: &str) -> CrawlResult<Option<Playlist>>;
    fn list_playlists(&self) -> CrawlResult<Vec<Playlist>>;

    /// Replaces `histogram`, merges `from_playlists`.
    fn upsert_histogram(&self, histogram: &TrackHistogram) -> CrawlResult<()>;
    fn get_histogram(&self, track_uri: &str) -> CrawlResult<Option<TrackHistogram>>;

    /// Insert or update range and sources; never touches the scheduling timestamps.
    fn upsert_target(&self, target: &Target) -> CrawlResult<()>;
    fn get_target(&self, target_uri: &str) -> CrawlResult<Option<Target>>;
    fn list_targets(&self) -> CrawlResult<Vec<Target>>;

    /// Set `timestamp_last_job_scheduled = now` only if the previous stamp
    /// is absent or at least `min_interval` seconds old. Returns whether it did.
    fn stamp_scheduled(
        &self,
        entity: StampedEntity,
        uri: &str,
        now: Timestamp,
        min_interval: i64,
    ) -> CrawlResult<bool>;
}

/// Everything a worker needs from the store.
pub trait CrawlStore: JobStore + EntityStore {}

impl<T: JobStore + EntityStore> CrawlStore for T {}
