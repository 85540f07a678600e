use crate::matcher::MatchMode;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_path: Option<String>,
    pub worker_id: Option<String>,
    pub poll_interval_secs: Option<u64>,
    pub heartbeat_interval_secs: Option<u64>,
    pub lease_timeout_secs: Option<u64>,

    // Feature configs
    pub worker: Option<WorkerConfig>,
    pub matcher: Option<MatcherConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    pub reap_interval_secs: Option<u64>,
    pub schedule_interval_secs: Option<u64>,
    pub purge_interval_secs: Option<u64>,
    pub claim_batch: Option<usize>,
    // Retry settings
    pub max_attempts: Option<u32>,
    pub initial_backoff_secs: Option<u64>,
    pub max_backoff_secs: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    // Recurring scheduling
    pub scan_interval_secs: Option<u64>,
    pub pick_interval_secs: Option<u64>,
    pub job_retention_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct MatcherConfig {
    pub min_share: Option<f64>,
    /// "exact" or "tempo_multiples"
    pub mode: Option<MatchMode>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
