//! Job records and their typed parameter bags.

use super::entities::Timestamp;
use crate::error::{CrawlError, CrawlResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    ScanPlaylist,
    CalcBpm,
    PickTracks,
}

impl JobKind {
    pub const ALL: [JobKind; 3] = [JobKind::ScanPlaylist, JobKind::CalcBpm, JobKind::PickTracks];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::ScanPlaylist => "scan_playlist",
            JobKind::CalcBpm => "calc_bpm",
            JobKind::PickTracks => "pick_tracks",
        }
    }

    /// Lower runs first: histograms feed picks, so they drain before them.
    pub fn priority(&self) -> i64 {
        match self {
            JobKind::CalcBpm => 1,
            JobKind::ScanPlaylist => 2,
            JobKind::PickTracks => 3,
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("Unknown job kind: {}", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub const ALL: [JobStatus; 4] = [
        JobStatus::Pending,
        JobStatus::Running,
        JobStatus::Succeeded,
        JobStatus::Failed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        JobStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("Unknown job status: {}", s))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanPlaylistDef {
    pub user: String,
    pub service: String,
    /// Service-side playlist id.
    pub playlist: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalcBpmDef {
    /// Whose credentials fetch the audio. Not part of the job identity.
    pub user: String,
    pub service: String,
    pub track_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PickTracksDef {
    pub user: String,
    pub service: String,
    /// Target label.
    pub target: String,
}

/// A job's kind together with its parsed `def`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobSpec {
    ScanPlaylist(ScanPlaylistDef),
    CalcBpm(CalcBpmDef),
    PickTracks(PickTracksDef),
}

impl JobSpec {
    pub fn scan_playlist(user: &str, service: &str, playlist: &str) -> Self {
        JobSpec::ScanPlaylist(ScanPlaylistDef {
            user: user.to_string(),
            service: service.to_string(),
            playlist: playlist.to_string(),
        })
    }

    pub fn calc_bpm(user: &str, service: &str, track_id: &str) -> Self {
        JobSpec::CalcBpm(CalcBpmDef {
            user: user.to_string(),
            service: service.to_string(),
            track_id: track_id.to_string(),
        })
    }

    pub fn pick_tracks(user: &str, service: &str, target: &str) -> Self {
        JobSpec::PickTracks(PickTracksDef {
            user: user.to_string(),
            service: service.to_string(),
            target: target.to_string(),
        })
    }

    pub fn kind(&self) -> JobKind {
        match self {
            JobSpec::ScanPlaylist(_) => JobKind::ScanPlaylist,
            JobSpec::CalcBpm(_) => JobKind::CalcBpm,
            JobSpec::PickTracks(_) => JobKind::PickTracks,
        }
    }

    pub fn service(&self) -> &str {
        match self {
            JobSpec::ScanPlaylist(def) => &def.service,
            JobSpec::CalcBpm(def) => &def.service,
            JobSpec::PickTracks(def) => &def.service,
        }
    }

    /// Identity of the work, equal for equivalent jobs.
    pub fn job_uri(&self) -> String {
        match self {
            JobSpec::ScanPlaylist(def) => {
                format!("scan_playlist/{}/{}/{}", def.service, def.user, def.playlist)
            }
            JobSpec::CalcBpm(def) => format!("calc_bpm/{}/{}", def.service, def.track_id),
            JobSpec::PickTracks(def) => {
                format!("pick_tracks/{}/{}/{}", def.user, def.service, def.target)
            }
        }
    }

    pub fn to_def(&self) -> serde_json::Value {
        // serializing plain string structs cannot fail
        match self {
            JobSpec::ScanPlaylist(def) => serde_json::to_value(def),
            JobSpec::CalcBpm(def) => serde_json::to_value(def),
            JobSpec::PickTracks(def) => serde_json::to_value(def),
        }
        .unwrap_or(serde_json::Value::Null)
    }

    pub fn from_parts(kind: JobKind, def: &serde_json::Value) -> CrawlResult<Self> {
        let malformed =
            |e: serde_json::Error| CrawlError::permanent(format!("Malformed {} def: {}", kind, e));
        Ok(match kind {
            JobKind::ScanPlaylist => {
                JobSpec::ScanPlaylist(serde_json::from_value(def.clone()).map_err(malformed)?)
            }
            JobKind::CalcBpm => {
                JobSpec::CalcBpm(serde_json::from_value(def.clone()).map_err(malformed)?)
            }
            JobKind::PickTracks => {
                JobSpec::PickTracks(serde_json::from_value(def.clone()).map_err(malformed)?)
            }
        })
    }
}

/// Lock token written to the uniquely indexed `locked` column.
pub fn lock_token(job_id: &str, worker_id: &str) -> String {
    format!("{}-locked-{}", job_id, worker_id)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub job_id: String,
    pub job_uri: String,
    pub kind: JobKind,
    pub def: serde_json::Value,
    pub service: String,
    pub status: JobStatus,
    pub priority: i64,

    // Lease fields
    pub worker_id: Option<String>,
    pub locked: Option<String>,
    pub started: bool,
    pub finished: bool,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub not_before: Option<Timestamp>,

    pub timestamp_created: Timestamp,
    pub timestamp_started: Option<Timestamp>,
    pub timestamp_updated: Option<Timestamp>,
    pub timestamp_finished: Option<Timestamp>,
    /// Seconds between the last claim and completion.
    pub time_took: Option<i64>,
}

impl Job {
    pub fn new(spec: &JobSpec, now: Timestamp) -> Self {
        let kind = spec.kind();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            job_uri: spec.job_uri(),
            kind,
            def: spec.to_def(),
            service: spec.service().to_string(),
            status: JobStatus::Pending,
            priority: kind.priority(),
            worker_id: None,
            locked: None,
            started: false,
            finished: false,
            attempts: 0,
            last_error: None,
            not_before: None,
            timestamp_created: now,
            timestamp_started: None,
            timestamp_updated: None,
            timestamp_finished: None,
            time_took: None,
        }
    }

    pub fn spec(&self) -> CrawlResult<JobSpec> {
        JobSpec::from_parts(self.kind, &self.def)
    }

    pub fn is_locked_by(&self, worker_id: &str) -> bool {
        self.worker_id.as_deref() == Some(worker_id)
            && self.locked.as_deref() == Some(lock_token(&self.job_id, worker_id).as_str())
    }
}
