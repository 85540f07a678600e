//! Contracts for the external collaborators: music-service backends and
//! the BPM analyzer.
//!
//! Backends are plugged in by embedding code. Errors are plain
//! `anyhow::Error`; the executor classifies them as external-service
//! failures.

use crate::model::{Histogram, ServiceCredentials};
use anyhow::Result;
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Audio handed from a music service to the analyzer.
#[derive(Clone, PartialEq, Eq)]
pub enum AudioSource {
    /// Downloaded or cached file on local disk.
    File(PathBuf),
    /// Remote stream the analyzer fetches itself.
    Url(String),
    /// Encoded audio already in memory.
    Bytes(Vec<u8>),
}

impl fmt::Debug for AudioSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AudioSource::File(path) => f.debug_tuple("File").field(path).finish(),
            AudioSource::Url(url) => f.debug_tuple("Url").field(url).finish(),
            AudioSource::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
        }
    }
}

/// A playlist as seen on the service side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemotePlaylist {
    pub id: String,
    pub name: String,
}

/// One music-service backend. Calls are blocking; the executor runs them
/// on a blocking thread.
pub trait MusicService: Send + Sync {
    /// Service name as used in job defs and entity URIs.
    fn name(&self) -> &str;

    fn list_playlist_tracks(&self, creds: &ServiceCredentials, playlist_id: &str) -> Result<Vec<String>>;

    fn list_artist_tracks(&self, creds: &ServiceCredentials, artist_id: &str) -> Result<Vec<String>>;

    fn list_album_tracks(&self, creds: &ServiceCredentials, album_id: &str) -> Result<Vec<String>>;

    /// Find the user's playlist called `name`, creating it if missing.
    fn get_or_create_playlist(&self, creds: &ServiceCredentials, name: &str) -> Result<RemotePlaylist>;

    fn add_track_to_playlist(
        &self,
        creds: &ServiceCredentials,
        playlist_id: &str,
        track_id: &str,
    ) -> Result<()>;

    fn fetch_audio(&self, creds: &ServiceCredentials, track_id: &str) -> Result<AudioSource>;
}

pub trait BpmAnalyzer: Send + Sync {
    fn compute_bpm_histogram(&self, audio: &AudioSource) -> Result<Histogram>;
}

/// Backends available to this worker, keyed by service name.
#[derive(Clone, Default)]
pub struct ServiceRegistry {
    services: BTreeMap<String, Arc<dyn MusicService>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under its own name, replacing any previous backend.
    pub fn register(&mut self, service: Arc<dyn MusicService>) {
        self.services.insert(service.name().to_string(), service);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MusicService>> {
        self.services.get(name).cloned()
    }

    /// Sorted service names. The worker only claims jobs for these.
    pub fn names(&self) -> Vec<String> {
        self.services.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}

/// Analyzer used when none is configured: every request fails, so calc_bpm
/// jobs are retried until a real analyzer is plugged in.
#[derive(Debug, Default)]
pub struct UnavailableAnalyzer;

impl BpmAnalyzer for UnavailableAnalyzer {
    fn compute_bpm_histogram(&self, _audio: &AudioSource) -> Result<Histogram> {
        anyhow::bail!("No BPM analyzer configured")
    }
}
