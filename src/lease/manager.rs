//! Claim/heartbeat/release protocol giving one worker exclusive,
//! time-bounded ownership of one job.
//!
//! The claim is a single guarded UPDATE. A successful write is still
//! followed by a re-read of the row: only a row that carries our worker id
//! and lock token counts as `Claimed`. Losing a claim is normal and only
//! logged at debug.

use super::clock::Clock;
use super::retry_policy::RetryPolicy;
use crate::error::{CrawlError, CrawlResult};
use crate::model::{lock_token, Timestamp};
use crate::store::{CommitSummary, JobOutput, JobStore};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, trace, warn};

/// Exclusive, time-bounded ownership of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lease {
    pub job_id: String,
    pub worker_id: String,
    pub lock_token: String,
    /// Claims so far, this one included.
    pub attempts: u32,
    pub claimed_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    Claimed(Lease),
    AlreadyClaimed,
    NotFound,
    /// Earlier holders never released the job and it ran out of attempts.
    /// It was failed instead of claimed.
    Exhausted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatOutcome {
    Ok,
    /// Another worker owns the job now (or it was reaped). Abort the attempt.
    LeaseLost,
    /// The store stayed unreachable through all retries; try again next tick.
    Deferred,
}

/// How an attempt ended, as reported by the executor.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    Succeeded(JobOutput),
    /// Retryable failure; becomes terminal once attempts run out.
    Retry { error: String },
    /// Terminal failure, no further attempts.
    Failed { error: String },
    /// Give the job back untouched (worker shutdown).
    Abandoned,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    Completed(CommitSummary),
    RetryScheduled { not_before: Timestamp },
    FailedPermanently,
    Abandoned,
    /// The lease was already gone; nothing was written.
    LeaseLost,
}

/// Bounded, jittered retry of transient store errors inside the lease layer.
#[derive(Debug, Clone)]
pub struct StoreRetry {
    pub max_tries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for StoreRetry {
    fn default() -> Self {
        Self {
            max_tries: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
        }
    }
}

impl StoreRetry {
    fn delay(&self, try_index: u32) -> Duration {
        let exp = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(try_index))
            .min(self.max_delay);
        let jitter_ms = rand::rng().random_range(0..=exp.as_millis() as u64 / 2);
        exp + Duration::from_millis(jitter_ms)
    }
}

/// Lease operations are blocking; call them from a blocking context.
#[derive(Clone)]
pub struct LeaseManager {
    store: Arc<dyn JobStore>,
    clock: Arc<dyn Clock>,
    retry_policy: RetryPolicy,
    lease_timeout_secs: i64,
    store_retry: StoreRetry,
}

impl LeaseManager {
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: Arc<dyn Clock>,
        retry_policy: RetryPolicy,
        lease_timeout_secs: u64,
    ) -> Self {
        Self {
            store,
            clock,
            retry_policy,
            lease_timeout_secs: lease_timeout_secs as i64,
            store_retry: StoreRetry::default(),
        }
    }

    pub fn with_store_retry(mut self, store_retry: StoreRetry) -> Self {
        self.store_retry = store_retry;
        self
    }

    pub fn lease_timeout_secs(&self) -> i64 {
        self.lease_timeout_secs
    }

    /// Leases not refreshed since this instant are considered abandoned.
    pub fn stale_before(&self, now: Timestamp) -> Timestamp {
        now - self.lease_timeout_secs
    }

    fn retrying<T>(
        &self,
        op: &str,
        mut f: impl FnMut() -> CrawlResult<T>,
    ) -> CrawlResult<T> {
        let mut try_index = 0;
        loop {
            match f() {
                Err(CrawlError::TransientStore(msg)) if try_index + 1 < self.store_retry.max_tries => {
                    let delay = self.store_retry.delay(try_index);
                    warn!(
                        "Transient store error during {} (try {}), retrying in {:?}: {}",
                        op,
                        try_index + 1,
                        delay,
                        msg
                    );
                    std::thread::sleep(delay);
                    try_index += 1;
                }
                result => return result,
            }
        }
    }

    pub fn try_claim(&self, job_id: &str, worker_id: &str) -> CrawlResult<ClaimOutcome> {
        let now = self.clock.now();
        let stale_before = self.stale_before(now);

        let written = match self.retrying("claim", || {
            self.store.try_lock(job_id, worker_id, now, stale_before)
        }) {
            Ok(written) => written,
            Err(CrawlError::DuplicateKey(_)) => {
                debug!("Job {} claim by {} rejected by lock index", job_id, worker_id);
                return Ok(ClaimOutcome::AlreadyClaimed);
            }
            Err(e) => return Err(e),
        };

        let job = match self.retrying("claim verify", || self.store.get_job(job_id))? {
            Some(job) => job,
            None => return Ok(ClaimOutcome::NotFound),
        };

        if written && job.is_locked_by(worker_id) {
            if job.attempts > self.retry_policy.max_attempts {
                let error = format!(
                    "Abandoned by its workers, gave up after {} attempts",
                    job.attempts - 1
                );
                return Ok(match self.fail(job_id, worker_id, now, &error)? {
                    ReleaseOutcome::FailedPermanently => ClaimOutcome::Exhausted,
                    _ => ClaimOutcome::AlreadyClaimed,
                });
            }
            debug!("Worker {} claimed job {} ({})", worker_id, job_id, job.job_uri);
            Ok(ClaimOutcome::Claimed(Lease {
                job_id: job_id.to_string(),
                worker_id: worker_id.to_string(),
                lock_token: lock_token(job_id, worker_id),
                attempts: job.attempts,
                claimed_at: now,
            }))
        } else {
            debug!(
                "Worker {} lost claim on job {} to {:?}",
                worker_id, job_id, job.worker_id
            );
            Ok(ClaimOutcome::AlreadyClaimed)
        }
    }

    pub fn heartbeat(&self, lease: &Lease) -> CrawlResult<HeartbeatOutcome> {
        let now = self.clock.now();
        match self.retrying("heartbeat", || {
            self.store.touch(&lease.job_id, &lease.worker_id, now)
        }) {
            Ok(true) => {
                trace!("Heartbeat for job {}", lease.job_id);
                Ok(HeartbeatOutcome::Ok)
            }
            Ok(false) => {
                warn!(
                    "Worker {} lost lease on job {}",
                    lease.worker_id, lease.job_id
                );
                Ok(HeartbeatOutcome::LeaseLost)
            }
            Err(CrawlError::TransientStore(msg)) => {
                warn!("Heartbeat for job {} deferred: {}", lease.job_id, msg);
                Ok(HeartbeatOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    pub fn release(&self, lease: &Lease, outcome: AttemptOutcome) -> CrawlResult<ReleaseOutcome> {
        let now = self.clock.now();
        let (job_id, worker_id) = (lease.job_id.as_str(), lease.worker_id.as_str());

        let released = match outcome {
            AttemptOutcome::Succeeded(output) => {
                match self.retrying("complete", || {
                    self.store.complete(job_id, worker_id, now, &output)
                })? {
                    Some(summary) => ReleaseOutcome::Completed(summary),
                    None => ReleaseOutcome::LeaseLost,
                }
            }
            AttemptOutcome::Retry { error } if self.retry_policy.should_retry(lease.attempts) => {
                let not_before = self.retry_policy.next_attempt_at(now, lease.attempts);
                let requeued = self.retrying("requeue", || {
                    self.store
                        .requeue(job_id, worker_id, Some(not_before), Some(&error), false)
                })?;
                if requeued {
                    warn!(
                        "Job {} attempt {} failed, retrying after {}: {}",
                        job_id, lease.attempts, not_before, error
                    );
                    ReleaseOutcome::RetryScheduled { not_before }
                } else {
                    ReleaseOutcome::LeaseLost
                }
            }
            AttemptOutcome::Retry { error } => {
                let error = format!("{} (gave up after {} attempts)", error, lease.attempts);
                self.fail(job_id, worker_id, now, &error)?
            }
            AttemptOutcome::Failed { error } => self.fail(job_id, worker_id, now, &error)?,
            AttemptOutcome::Abandoned => {
                if self.retrying("abandon", || {
                    self.store.requeue(job_id, worker_id, None, None, true)
                })? {
                    debug!("Job {} handed back by {}", job_id, worker_id);
                    ReleaseOutcome::Abandoned
                } else {
                    ReleaseOutcome::LeaseLost
                }
            }
        };

        if released == ReleaseOutcome::LeaseLost {
            warn!(
                "Lease on job {} was gone at release, result of {} discarded",
                job_id, worker_id
            );
        }
        Ok(released)
    }

    fn fail(
        &self,
        job_id: &str,
        worker_id: &str,
        now: Timestamp,
        error: &str,
    ) -> CrawlResult<ReleaseOutcome> {
        if self.retrying("fail", || self.store.fail(job_id, worker_id, now, error))? {
            error!("Job {} failed permanently: {}", job_id, error);
            Ok(ReleaseOutcome::FailedPermanently)
        } else {
            Ok(ReleaseOutcome::LeaseLost)
        }
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::BusyStore;
    use super::*;
    use crate::lease::ManualClock;
    use crate::model::{Job, JobSpec, JobStatus};
    use crate::store::SqliteCrawlStore;
    use std::sync::atomic::Ordering;

    const START: Timestamp = 1_700_000_000;
    const TIMEOUT: u64 = 60;

    struct Fixture {
        store: Arc<SqliteCrawlStore>,
        clock: Arc<ManualClock>,
        leases: LeaseManager,
    }

    fn fixture_with_policy(policy: RetryPolicy) -> Fixture {
        let store = Arc::new(SqliteCrawlStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::new(START));
        let leases = LeaseManager::new(store.clone(), clock.clone(), policy, TIMEOUT);
        Fixture {
            store,
            clock,
            leases,
        }
    }

    fn fixture() -> Fixture {
        fixture_with_policy(RetryPolicy {
            max_attempts: 2,
            initial_backoff_secs: 30,
            max_backoff_secs: 3600,
            backoff_multiplier: 2.0,
        })
    }

    fn enqueue(f: &Fixture) -> Job {
        let job = Job::new(&JobSpec::calc_bpm("alice", "ym", "1"), START);
        f.store.insert_job(&job).unwrap();
        job
    }

    fn claim(f: &Fixture, job: &Job, worker: &str) -> Lease {
        match f.leases.try_claim(&job.job_id, worker).unwrap() {
            ClaimOutcome::Claimed(lease) => lease,
            other => panic!("expected claim, got {:?}", other),
        }
    }

    #[test]
    fn test_claim_then_contend() {
        let f = fixture();
        let job = enqueue(&f);

        let lease = claim(&f, &job, "a");
        assert_eq!(lease.attempts, 1);
        assert_eq!(lease.lock_token, format!("{}-locked-a", job.job_id));
        assert_eq!(
            f.leases.try_claim(&job.job_id, "b").unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
        assert_eq!(
            f.leases.try_claim("no-such-job", "b").unwrap(),
            ClaimOutcome::NotFound
        );
    }

    #[test]
    fn test_expired_lease_moves_to_new_worker() {
        let f = fixture();
        let job = enqueue(&f);
        let lease_a = claim(&f, &job, "a");

        f.clock.advance(TIMEOUT as i64 - 1);
        assert_eq!(f.leases.heartbeat(&lease_a).unwrap(), HeartbeatOutcome::Ok);

        // silence past the timeout
        f.clock.advance(TIMEOUT as i64 + 1);
        let lease_b = claim(&f, &job, "b");
        assert_eq!(lease_b.attempts, 2);

        assert_eq!(f.leases.heartbeat(&lease_a).unwrap(), HeartbeatOutcome::LeaseLost);
        assert_eq!(
            f.leases
                .release(&lease_a, AttemptOutcome::Succeeded(JobOutput::default()))
                .unwrap(),
            ReleaseOutcome::LeaseLost
        );
        assert!(matches!(
            f.leases
                .release(&lease_b, AttemptOutcome::Succeeded(JobOutput::default()))
                .unwrap(),
            ReleaseOutcome::Completed(_)
        ));
    }

    #[test]
    fn test_retry_then_give_up() {
        let f = fixture();
        let job = enqueue(&f);

        let lease = claim(&f, &job, "a");
        let outcome = f
            .leases
            .release(&lease, AttemptOutcome::Retry { error: "503".to_string() })
            .unwrap();
        assert_eq!(
            outcome,
            ReleaseOutcome::RetryScheduled {
                not_before: START + 30
            }
        );

        // backoff gate holds
        assert_eq!(
            f.leases.try_claim(&job.job_id, "a").unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
        f.clock.advance(30);
        let lease = claim(&f, &job, "a");
        assert_eq!(lease.attempts, 2);

        let outcome = f
            .leases
            .release(&lease, AttemptOutcome::Retry { error: "503".to_string() })
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::FailedPermanently);

        let failed = f.store.get_job(&job.job_id).unwrap().unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.finished);
        assert!(failed.last_error.unwrap().contains("gave up after 2 attempts"));
    }

    #[test]
    fn test_failed_is_terminal_immediately() {
        let f = fixture();
        let job = enqueue(&f);
        let lease = claim(&f, &job, "a");

        let outcome = f
            .leases
            .release(&lease, AttemptOutcome::Failed { error: "bad def".to_string() })
            .unwrap();
        assert_eq!(outcome, ReleaseOutcome::FailedPermanently);
        assert_eq!(
            f.leases.try_claim(&job.job_id, "a").unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[test]
    fn test_abandon_refunds_attempt() {
        let f = fixture();
        let job = enqueue(&f);
        let lease = claim(&f, &job, "a");

        assert_eq!(
            f.leases.release(&lease, AttemptOutcome::Abandoned).unwrap(),
            ReleaseOutcome::Abandoned
        );
        let lease = claim(&f, &job, "b");
        assert_eq!(lease.attempts, 1);
    }

    #[test]
    fn test_never_released_job_fails_once_attempts_run_out() {
        let f = fixture();
        let job = enqueue(&f);

        // two holders crash without releasing
        claim(&f, &job, "a");
        f.clock.advance(TIMEOUT as i64 + 1);
        let lease = claim(&f, &job, "b");
        assert_eq!(lease.attempts, 2);
        f.clock.advance(TIMEOUT as i64 + 1);

        assert_eq!(
            f.leases.try_claim(&job.job_id, "c").unwrap(),
            ClaimOutcome::Exhausted
        );
        let failed = f.store.get_job(&job.job_id).unwrap().unwrap();
        assert!(failed.finished);
        assert_eq!(failed.status, JobStatus::Failed);
        assert!(failed.locked.is_none());
        assert!(failed.last_error.unwrap().contains("gave up after 2 attempts"));

        f.clock.advance(TIMEOUT as i64 + 1);
        assert_eq!(
            f.leases.try_claim(&job.job_id, "d").unwrap(),
            ClaimOutcome::AlreadyClaimed
        );
    }

    #[test]
    fn test_heartbeat_defers_after_bounded_retries() {
        let store = Arc::new(BusyStore::new(Arc::new(SqliteCrawlStore::in_memory().unwrap())));
        let clock = Arc::new(ManualClock::new(START));
        let leases = LeaseManager::new(store.clone(), clock, RetryPolicy::default(), TIMEOUT)
            .with_store_retry(StoreRetry {
                max_tries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
            });

        let job = Job::new(&JobSpec::calc_bpm("alice", "ym", "1"), START);
        store.insert_job(&job).unwrap();
        let lease = match leases.try_claim(&job.job_id, "a").unwrap() {
            ClaimOutcome::Claimed(lease) => lease,
            other => panic!("expected claim, got {:?}", other),
        };

        assert_eq!(leases.heartbeat(&lease).unwrap(), HeartbeatOutcome::Deferred);
        assert_eq!(store.touches.load(Ordering::SeqCst), 3);
    }
}
