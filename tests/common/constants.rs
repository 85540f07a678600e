//! Test constants used across integration tests

#![allow(dead_code)]

/// Fixed "now" every ManualClock starts from.
pub const NOW: i64 = 1_700_000_000;

pub const SERVICE: &str = "yandexmusic";
pub const USER: &str = "alice";
pub const USER_EMAIL: &str = "alice@example.com";
pub const USER_TOKEN: &str = "alice-token";

pub const PLAYLIST_ID: &str = "PLOD";
pub const PLAYLIST_NAME: &str = "Running";
pub const OTHER_PLAYLIST_ID: &str = "LIKED";

pub const TARGET: &str = "run180";
pub const TARGET_MIN_BPM: f64 = 176.0;
pub const TARGET_MAX_BPM: f64 = 182.0;

/// Heartbeat and lease timeout used by fixtures.
pub const HEARTBEAT_SECS: u64 = 10;
pub const LEASE_TIMEOUT_SECS: u64 = 60;
