//! Test fixture creation for the crawl database

#![allow(dead_code)]

use super::constants::*;
use super::fakes::{FakeMusicService, FixedAnalyzer};
use bpmcrawl::config::WorkerSettings;
use bpmcrawl::executor::{JobExecutor, WorkerContext};
use bpmcrawl::lease::{LeaseManager, ManualClock, RetryPolicy};
use bpmcrawl::matcher::MatchConfig;
use bpmcrawl::model::{
    BpmRange, Histogram, Job, JobSpec, Playlist, Service, ServiceCredentials, Target,
    TargetSources, TrackHistogram, User,
};
use bpmcrawl::scheduler::JobScheduler;
use bpmcrawl::services::ServiceRegistry;
use bpmcrawl::store::{EntityStore, InsertOutcome, JobStore, SqliteCrawlStore};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

/// A crawl database in a temporary directory plus a manual clock.
pub struct TestEnv {
    _dir: TempDir,
    pub db_path: PathBuf,
    pub store: Arc<SqliteCrawlStore>,
    pub clock: Arc<ManualClock>,
    pub settings: WorkerSettings,
}

impl TestEnv {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let db_path = dir.path().join("crawl.db");
        let store = Arc::new(SqliteCrawlStore::new(&db_path).unwrap());
        Self {
            _dir: dir,
            db_path,
            store,
            clock: Arc::new(ManualClock::new(NOW)),
            settings: WorkerSettings {
                heartbeat_interval_secs: HEARTBEAT_SECS,
                lease_timeout_secs: LEASE_TIMEOUT_SECS,
                max_attempts: 3,
                initial_backoff_secs: 30,
                ..Default::default()
            },
        }
    }

    /// A second, independent connection to the same database file, as
    /// another worker process would open it.
    pub fn open_store(&self) -> Arc<SqliteCrawlStore> {
        Arc::new(SqliteCrawlStore::new(&self.db_path).unwrap())
    }

    pub fn seed_user(&self, user: &str, service: &str) {
        self.store
            .upsert_service(&Service {
                name: service.to_string(),
                enabled: true,
            })
            .unwrap();
        let mut services = BTreeMap::new();
        services.insert(
            service.to_string(),
            ServiceCredentials {
                token: USER_TOKEN.to_string(),
            },
        );
        self.store
            .upsert_user(&User {
                user: user.to_string(),
                email: USER_EMAIL.to_string(),
                display_name: user.to_string(),
                enabled: true,
                services,
            })
            .unwrap();
    }

    pub fn seed_playlist(&self, playlist_id: &str) {
        self.store
            .upsert_playlist(&Playlist::new(SERVICE, USER, playlist_id, PLAYLIST_NAME))
            .unwrap();
    }

    pub fn seed_target(&self, sources: TargetSources) {
        self.store
            .upsert_target(&Target::new(
                USER,
                SERVICE,
                TARGET,
                BpmRange::new(TARGET_MIN_BPM, TARGET_MAX_BPM).unwrap(),
                sources,
            ))
            .unwrap();
    }

    pub fn add_histogram(&self, track_id: &str, bins: &[(f64, f64)]) {
        self.store
            .upsert_histogram(&TrackHistogram::new(
                SERVICE,
                track_id,
                Histogram::new(bins.iter().copied()).unwrap(),
            ))
            .unwrap();
    }

    pub fn enqueue(&self, spec: &JobSpec) -> Job {
        let job = Job::new(spec, NOW);
        assert_eq!(self.store.insert_job(&job).unwrap(), InsertOutcome::Inserted);
        job
    }

    pub fn scheduler(&self) -> JobScheduler {
        JobScheduler::new(self.store.clone(), self.clock.clone(), &self.settings)
    }

    pub fn lease_manager(&self, store: Arc<SqliteCrawlStore>) -> LeaseManager {
        LeaseManager::new(
            store,
            self.clock.clone(),
            RetryPolicy::new(&self.settings),
            self.settings.lease_timeout_secs,
        )
    }

    pub fn executor(
        &self,
        worker_id: &str,
        service: Arc<FakeMusicService>,
        analyzer: FixedAnalyzer,
    ) -> JobExecutor {
        let mut registry = ServiceRegistry::new();
        registry.register(service);
        let ctx = WorkerContext::new(
            worker_id,
            self.store.clone(),
            self.clock.clone(),
            registry,
            Arc::new(analyzer),
            MatchConfig::default(),
            CancellationToken::new(),
        );
        JobExecutor::new(
            ctx,
            self.scheduler(),
            self.lease_manager(self.store.clone()),
            &self.settings,
        )
    }

    pub fn jobs_of_kind(&self, kind: bpmcrawl::model::JobKind) -> Vec<Job> {
        self.store.list_jobs(Some(kind), 1000).unwrap()
    }
}
