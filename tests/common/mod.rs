//! Common test infrastructure
//!
//! Shared by the integration tests: a temporary on-disk crawl database,
//! in-memory music-service and analyzer fakes, and the constants the
//! fixtures are built from.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestEnv, FakeMusicService, USER, SERVICE};
//! use std::sync::Arc;
//!
//! #[tokio::test]
//! async fn test_scan() {
//!     let env = TestEnv::new();
//!     env.seed_user(USER, SERVICE);
//!     let service = Arc::new(FakeMusicService::new(SERVICE));
//!     let executor = env.executor("worker-1", service, Default::default());
//! }
//! ```

mod constants;
mod fakes;
mod fixtures;

// Public API - this is what tests import
pub use constants::*;
pub use fakes::{FakeMusicService, FixedAnalyzer};
pub use fixtures::TestEnv;
