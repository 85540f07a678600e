//! bpmcrawl library
//!
//! Lease-based job queue and worker for the BPM crawling pipeline. The
//! modules are exposed for the binary, for tests and for embedding with
//! real music-service backends.

pub mod config;
pub mod error;
pub mod executor;
pub mod lease;
pub mod matcher;
pub mod model;
pub mod scheduler;
pub mod seed;
pub mod services;
pub mod sqlite_persistence;
pub mod store;
pub mod worker;

// Re-export commonly used types for convenience
pub use error::{CrawlError, CrawlResult};
pub use executor::{JobExecutor, JobReport, JobRun, WorkerContext};
pub use lease::{Clock, LeaseManager, ManualClock, SystemClock};
pub use scheduler::JobScheduler;
pub use services::{AudioSource, BpmAnalyzer, MusicService, ServiceRegistry};
pub use store::{CrawlStore, EntityStore, JobStore, SqliteCrawlStore};
pub use worker::Worker;
