mod file_config;

pub use file_config::{FileConfig, MatcherConfig, WorkerConfig};

use crate::matcher::MatchConfig;
use anyhow::{bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub worker_id: Option<String>,
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    pub lease_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub worker_id: String,
    pub worker: WorkerSettings,
    pub matcher: MatchConfig,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db-path or in config file")
            })?;

        // The database file may be created, its directory may not
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !parent.is_dir() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let worker_id = file
            .worker_id
            .or_else(|| cli.worker_id.clone())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if worker_id.trim().is_empty() {
            bail!("worker_id must not be empty");
        }

        let defaults = WorkerSettings::default();
        let w = file.worker.unwrap_or_default();
        let worker = WorkerSettings {
            poll_interval_secs: file.poll_interval_secs.unwrap_or(cli.poll_interval_secs),
            heartbeat_interval_secs: file
                .heartbeat_interval_secs
                .unwrap_or(cli.heartbeat_interval_secs),
            lease_timeout_secs: file.lease_timeout_secs.unwrap_or(cli.lease_timeout_secs),
            reap_interval_secs: w.reap_interval_secs.unwrap_or(defaults.reap_interval_secs),
            schedule_interval_secs: w
                .schedule_interval_secs
                .unwrap_or(defaults.schedule_interval_secs),
            purge_interval_secs: w.purge_interval_secs.unwrap_or(defaults.purge_interval_secs),
            claim_batch: w.claim_batch.unwrap_or(defaults.claim_batch),
            max_attempts: w.max_attempts.unwrap_or(defaults.max_attempts),
            initial_backoff_secs: w
                .initial_backoff_secs
                .unwrap_or(defaults.initial_backoff_secs),
            max_backoff_secs: w.max_backoff_secs.unwrap_or(defaults.max_backoff_secs),
            backoff_multiplier: w.backoff_multiplier.unwrap_or(defaults.backoff_multiplier),
            scan_interval_secs: w.scan_interval_secs.unwrap_or(defaults.scan_interval_secs),
            pick_interval_secs: w.pick_interval_secs.unwrap_or(defaults.pick_interval_secs),
            job_retention_secs: w.job_retention_secs.unwrap_or(defaults.job_retention_secs),
        };
        worker.validate()?;

        let m = file.matcher.unwrap_or_default();
        let default_matcher = MatchConfig::default();
        let matcher = MatchConfig {
            min_share: m.min_share.unwrap_or(default_matcher.min_share),
            mode: m.mode.unwrap_or(default_matcher.mode),
        };
        if !(0.0..=1.0).contains(&matcher.min_share) {
            bail!("matcher.min_share must be within [0, 1], got {}", matcher.min_share);
        }

        Ok(Self {
            db_path,
            worker_id,
            worker,
            matcher,
        })
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Idle sleep between claim attempts when no job was runnable.
    pub poll_interval_secs: u64,
    pub heartbeat_interval_secs: u64,
    /// A lease not refreshed for this long is abandoned.
    pub lease_timeout_secs: u64,
    pub reap_interval_secs: u64,
    pub schedule_interval_secs: u64,
    pub purge_interval_secs: u64,
    /// Candidates fetched per claim round.
    pub claim_batch: usize,
    pub max_attempts: u32,
    pub initial_backoff_secs: u64,
    pub max_backoff_secs: u64,
    pub backoff_multiplier: f64,
    /// Minimum time between two scan_playlist jobs for one playlist.
    pub scan_interval_secs: u64,
    /// Minimum time between two pick_tracks jobs for one target.
    pub pick_interval_secs: u64,
    /// Finished jobs older than this are purged.
    pub job_retention_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            poll_interval_secs: 5,
            heartbeat_interval_secs: 10,
            lease_timeout_secs: 60,
            reap_interval_secs: 30,
            schedule_interval_secs: 60,
            purge_interval_secs: 3600,
            claim_batch: 16,
            max_attempts: 5,
            initial_backoff_secs: 30,
            max_backoff_secs: 3600,
            backoff_multiplier: 2.0,
            scan_interval_secs: 6 * 3600,
            pick_interval_secs: 3600,
            job_retention_secs: 7 * 24 * 3600,
        }
    }
}

impl WorkerSettings {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("poll_interval_secs", self.poll_interval_secs),
            ("heartbeat_interval_secs", self.heartbeat_interval_secs),
            ("lease_timeout_secs", self.lease_timeout_secs),
            ("reap_interval_secs", self.reap_interval_secs),
            ("schedule_interval_secs", self.schedule_interval_secs),
            ("purge_interval_secs", self.purge_interval_secs),
        ] {
            if value == 0 {
                bail!("{} must be positive", name);
            }
        }
        if self.lease_timeout_secs < 3 * self.heartbeat_interval_secs {
            bail!(
                "lease_timeout_secs ({}) must be at least 3x heartbeat_interval_secs ({})",
                self.lease_timeout_secs,
                self.heartbeat_interval_secs
            );
        }
        if self.claim_batch == 0 {
            bail!("claim_batch must be positive");
        }
        if self.max_attempts == 0 {
            bail!("max_attempts must be positive");
        }
        if self.backoff_multiplier < 1.0 {
            bail!("backoff_multiplier must be >= 1, got {}", self.backoff_multiplier);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::MatchMode;
    use tempfile::TempDir;

    fn cli(dir: &TempDir) -> CliConfig {
        CliConfig {
            db_path: Some(dir.path().join("crawl.db")),
            worker_id: None,
            poll_interval_secs: 5,
            heartbeat_interval_secs: 10,
            lease_timeout_secs: 60,
        }
    }

    #[test]
    fn test_resolve_cli_only() {
        let temp_dir = TempDir::new().unwrap();
        let config = AppConfig::resolve(&cli(&temp_dir), None).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("crawl.db"));
        assert_eq!(config.worker.heartbeat_interval_secs, 10);
        assert_eq!(config.worker.lease_timeout_secs, 60);
        assert_eq!(config.worker.max_attempts, 5);
        assert_eq!(config.matcher, MatchConfig::default());
        // generated uuid
        assert_eq!(config.worker_id.len(), 36);
    }

    #[test]
    fn test_resolve_toml_overrides_cli() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = cli(&temp_dir);
        cli.worker_id = Some("cli-worker".to_string());
        cli.db_path = Some(PathBuf::from("/should/be/overridden/crawl.db"));

        let file_config = FileConfig {
            db_path: Some(temp_dir.path().join("toml.db").to_string_lossy().to_string()),
            heartbeat_interval_secs: Some(20),
            worker: Some(WorkerConfig {
                max_attempts: Some(2),
                ..Default::default()
            }),
            matcher: Some(MatcherConfig {
                min_share: Some(0.05),
                mode: Some(MatchMode::TempoMultiples),
            }),
            ..Default::default()
        };

        let config = AppConfig::resolve(&cli, Some(file_config)).unwrap();

        assert_eq!(config.db_path, temp_dir.path().join("toml.db"));
        assert_eq!(config.worker.heartbeat_interval_secs, 20);
        assert_eq!(config.worker.max_attempts, 2);
        assert_eq!(config.matcher.min_share, 0.05);
        assert_eq!(config.matcher.mode, MatchMode::TempoMultiples);
        // CLI value used when TOML doesn't specify
        assert_eq!(config.worker_id, "cli-worker");
        assert_eq!(config.worker.lease_timeout_secs, 60);
    }

    #[test]
    fn test_resolve_missing_db_path_error() {
        let result = AppConfig::resolve(&CliConfig::default(), None);
        assert!(result.unwrap_err().to_string().contains("db_path must be specified"));
    }

    #[test]
    fn test_resolve_missing_db_directory_error() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = cli(&temp_dir);
        cli.db_path = Some(temp_dir.path().join("nope").join("crawl.db"));

        let result = AppConfig::resolve(&cli, None);
        assert!(result.unwrap_err().to_string().contains("does not exist"));
    }

    #[test]
    fn test_lease_timeout_must_cover_three_heartbeats() {
        let temp_dir = TempDir::new().unwrap();
        let mut cli = cli(&temp_dir);
        cli.lease_timeout_secs = 29;

        let err = AppConfig::resolve(&cli, None).unwrap_err().to_string();
        assert!(err.contains("at least 3x"));

        cli.lease_timeout_secs = 30;
        assert!(AppConfig::resolve(&cli, None).is_ok());
    }

    #[test]
    fn test_zero_interval_rejected() {
        let settings = WorkerSettings {
            poll_interval_secs: 0,
            ..Default::default()
        };
        assert!(settings
            .validate()
            .unwrap_err()
            .to_string()
            .contains("poll_interval_secs"));
        assert!(WorkerSettings::default().validate().is_ok());
    }

    #[test]
    fn test_min_share_out_of_range_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let file_config = FileConfig {
            matcher: Some(MatcherConfig {
                min_share: Some(1.5),
                mode: None,
            }),
            ..Default::default()
        };
        assert!(AppConfig::resolve(&cli(&temp_dir), Some(file_config)).is_err());
    }
}
