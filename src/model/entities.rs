//! Records shared between the scheduler and the job handlers.
//!
//! Every record that other records point at is keyed by an identity derived
//! from its natural fields, so upserts are idempotent.

use super::histogram::Histogram;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Unix timestamp in seconds.
pub type Timestamp = i64;

pub fn playlist_uri(service: &str, user: &str, service_playlist_id: &str) -> String {
    format!("{}/{}/{}", service, user, service_playlist_id)
}

pub fn track_uri(service: &str, service_track_id: &str) -> String {
    format!("{}/{}", service, service_track_id)
}

pub fn target_uri(user: &str, service: &str, target: &str) -> String {
    format!("{}/{}/{}", user, service, target)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Per-service credentials stored on the user record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceCredentials {
    pub token: String,
}

impl fmt::Debug for ServiceCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceCredentials")
            .field("token", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub user: String,
    pub email: String,
    #[serde(rename = "displayName", default)]
    pub display_name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub services: BTreeMap<String, ServiceCredentials>,
}

impl User {
    pub fn credentials(&self, service: &str) -> Option<&ServiceCredentials> {
        self.services.get(service)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Playlist {
    pub playlist_uri: String,
    pub service: String,
    pub service_playlist_id: String,
    pub name: String,
    pub user: String,
    pub timestamp_last_job_scheduled: Option<Timestamp>,
    pub timestamp_last_job_finished: Option<Timestamp>,
}

impl Playlist {
    pub fn new(service: &str, user: &str, service_playlist_id: &str, name: &str) -> Self {
        Self {
            playlist_uri: playlist_uri(service, user, service_playlist_id),
            service: service.to_string(),
            service_playlist_id: service_playlist_id.to_string(),
            name: name.to_string(),
            user: user.to_string(),
            timestamp_last_job_scheduled: None,
            timestamp_last_job_finished: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackHistogram {
    pub track_uri: String,
    pub service: String,
    pub service_track_id: String,
    pub histogram: Histogram,
    /// playlist_uri -> membership marker (always 1).
    pub from_playlists: BTreeMap<String, u32>,
    pub timestamp_last_job_scheduled: Option<Timestamp>,
    pub timestamp_last_job_finished: Option<Timestamp>,
}

impl TrackHistogram {
    pub fn new(service: &str, service_track_id: &str, histogram: Histogram) -> Self {
        Self {
            track_uri: track_uri(service, service_track_id),
            service: service.to_string(),
            service_track_id: service_track_id.to_string(),
            histogram,
            from_playlists: BTreeMap::new(),
            timestamp_last_job_scheduled: None,
            timestamp_last_job_finished: None,
        }
    }
}

/// Closed BPM interval, both ends inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawBpmRange")]
pub struct BpmRange {
    pub min: f64,
    pub max: f64,
}

#[doc(hidden)]
#[derive(Deserialize)]
pub struct RawBpmRange {
    min: f64,
    max: f64,
}

impl BpmRange {
    pub fn new(min: f64, max: f64) -> Result<Self, String> {
        if !min.is_finite() || !max.is_finite() || min < 0.0 {
            return Err(format!("Invalid BPM range {{{}, {}}}", min, max));
        }
        if min > max {
            return Err(format!("BPM range min {} is greater than max {}", min, max));
        }
        Ok(Self { min, max })
    }

    pub fn contains(&self, bpm: f64) -> bool {
        bpm >= self.min && bpm <= self.max
    }
}

impl TryFrom<RawBpmRange> for BpmRange {
    type Error = String;

    fn try_from(raw: RawBpmRange) -> Result<Self, Self::Error> {
        BpmRange::new(raw.min, raw.max)
    }
}

/// Where `pick_tracks` looks for candidates. Each category maps a
/// service-side identifier to a marker, mirroring `{"PLOD": 1}` documents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSources {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub playlists: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub artists: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub albums: BTreeMap<String, u32>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tracks: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub target_uri: String,
    pub user: String,
    pub service: String,
    /// Label, also the name of the service-side playlist tracks are added to.
    pub target: String,
    pub bpms: BpmRange,
    pub sources: TargetSources,
    pub timestamp_last_job_scheduled: Option<Timestamp>,
    pub timestamp_last_job_finished: Option<Timestamp>,
}

impl Target {
    pub fn new(user: &str, service: &str, target: &str, bpms: BpmRange, sources: TargetSources) -> Self {
        Self {
            target_uri: target_uri(user, service, target),
            user: user.to_string(),
            service: service.to_string(),
            target: target.to_string(),
            bpms,
            sources,
            timestamp_last_job_scheduled: None,
            timestamp_last_job_finished: None,
        }
    }
}

/// Entities carrying the two scheduling timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StampedEntity {
    Playlist,
    Target,
    Histogram,
}
