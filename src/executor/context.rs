use crate::error::{CrawlError, CrawlResult};
use crate::lease::Clock;
use crate::matcher::MatchConfig;
use crate::model::ServiceCredentials;
use crate::services::{BpmAnalyzer, MusicService, ServiceRegistry};
use crate::store::CrawlStore;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Everything a handler may touch while running one job.
///
/// Passed explicitly down the call chain. The executor hands each job a
/// copy carrying a child token, so cancelling one job leaves the worker
/// running.
#[derive(Clone)]
pub struct WorkerContext {
    pub worker_id: String,

    pub store: Arc<dyn CrawlStore>,

    pub clock: Arc<dyn Clock>,

    /// Backends this worker can run jobs for.
    pub services: ServiceRegistry,

    pub analyzer: Arc<dyn BpmAnalyzer>,

    pub match_config: MatchConfig,

    /// Fires on worker shutdown, or on lease loss for a per-job copy.
    pub cancellation_token: CancellationToken,
}

impl WorkerContext {
    pub fn new(
        worker_id: impl Into<String>,
        store: Arc<dyn CrawlStore>,
        clock: Arc<dyn Clock>,
        services: ServiceRegistry,
        analyzer: Arc<dyn BpmAnalyzer>,
        match_config: MatchConfig,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            store,
            clock,
            services,
            analyzer,
            match_config,
            cancellation_token,
        }
    }

    /// Copy of this context whose token can be cancelled on its own.
    pub fn for_job(&self) -> Self {
        Self {
            cancellation_token: self.cancellation_token.child_token(),
            ..self.clone()
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation_token.is_cancelled()
    }

    /// Handlers call this between units of work.
    pub fn check_cancelled(&self) -> CrawlResult<()> {
        if self.is_cancelled() {
            Err(CrawlError::Cancelled)
        } else {
            Ok(())
        }
    }

    pub fn service(&self, name: &str) -> CrawlResult<Arc<dyn MusicService>> {
        self.services
            .get(name)
            .ok_or_else(|| CrawlError::external(name, "No backend registered on this worker"))
    }

    /// Credentials of an enabled user for `service`. Anything missing is
    /// permanent: retrying will not make the user appear.
    pub fn credentials(&self, user: &str, service: &str) -> CrawlResult<ServiceCredentials> {
        let record = self
            .store
            .get_user(user)?
            .ok_or_else(|| CrawlError::permanent(format!("Unknown user {}", user)))?;
        if !record.enabled {
            return Err(CrawlError::permanent(format!("User {} is disabled", user)));
        }
        record.credentials(service).cloned().ok_or_else(|| {
            CrawlError::permanent(format!("User {} has no credentials for {}", user, service))
        })
    }
}
