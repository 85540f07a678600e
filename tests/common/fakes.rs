//! In-memory collaborators

#![allow(dead_code)]

use anyhow::{bail, Result};
use bpmcrawl::model::{Histogram, ServiceCredentials};
use bpmcrawl::services::{AudioSource, BpmAnalyzer, MusicService, RemotePlaylist};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

/// Music service keeping playlists in memory. Playlists created through
/// `get_or_create_playlist` are keyed by their name.
pub struct FakeMusicService {
    name: String,
    playlists: Mutex<HashMap<String, Vec<String>>>,
    artists: Mutex<HashMap<String, Vec<String>>>,
    albums: Mutex<HashMap<String, Vec<String>>>,
    expected_token: Option<String>,
    fail_listing: AtomicBool,
    audio_fetches: AtomicUsize,
}

impl FakeMusicService {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            playlists: Mutex::new(HashMap::new()),
            artists: Mutex::new(HashMap::new()),
            albums: Mutex::new(HashMap::new()),
            expected_token: None,
            fail_listing: AtomicBool::new(false),
            audio_fetches: AtomicUsize::new(0),
        }
    }

    /// Every call made with another token fails.
    pub fn requiring_token(mut self, token: &str) -> Self {
        self.expected_token = Some(token.to_string());
        self
    }

    pub fn with_playlist(self, id: &str, tracks: &[&str]) -> Self {
        self.set_playlist(id, tracks);
        self
    }

    pub fn with_artist(self, id: &str, tracks: &[&str]) -> Self {
        self.artists
            .lock()
            .unwrap()
            .insert(id.to_string(), tracks.iter().map(|t| t.to_string()).collect());
        self
    }

    pub fn set_playlist(&self, id: &str, tracks: &[&str]) {
        self.playlists
            .lock()
            .unwrap()
            .insert(id.to_string(), tracks.iter().map(|t| t.to_string()).collect());
    }

    pub fn playlist(&self, id: &str) -> Vec<String> {
        self.playlists
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn audio_fetches(&self) -> usize {
        self.audio_fetches.load(Ordering::SeqCst)
    }

    fn check(&self, creds: &ServiceCredentials) -> Result<()> {
        match &self.expected_token {
            Some(token) if token != &creds.token => bail!("{}: invalid token", self.name),
            _ => Ok(()),
        }
    }
}

impl MusicService for FakeMusicService {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_playlist_tracks(&self, creds: &ServiceCredentials, playlist_id: &str) -> Result<Vec<String>> {
        self.check(creds)?;
        if self.fail_listing.load(Ordering::SeqCst) {
            bail!("{}: 503 Service Unavailable", self.name);
        }
        match self.playlists.lock().unwrap().get(playlist_id) {
            Some(tracks) => Ok(tracks.clone()),
            None => bail!("{}: playlist {} not found", self.name, playlist_id),
        }
    }

    fn list_artist_tracks(&self, creds: &ServiceCredentials, artist_id: &str) -> Result<Vec<String>> {
        self.check(creds)?;
        Ok(self
            .artists
            .lock()
            .unwrap()
            .get(artist_id)
            .cloned()
            .unwrap_or_default())
    }

    fn list_album_tracks(&self, creds: &ServiceCredentials, album_id: &str) -> Result<Vec<String>> {
        self.check(creds)?;
        Ok(self
            .albums
            .lock()
            .unwrap()
            .get(album_id)
            .cloned()
            .unwrap_or_default())
    }

    fn get_or_create_playlist(&self, creds: &ServiceCredentials, name: &str) -> Result<RemotePlaylist> {
        self.check(creds)?;
        self.playlists
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        Ok(RemotePlaylist {
            id: name.to_string(),
            name: name.to_string(),
        })
    }

    fn add_track_to_playlist(
        &self,
        creds: &ServiceCredentials,
        playlist_id: &str,
        track_id: &str,
    ) -> Result<()> {
        self.check(creds)?;
        match self.playlists.lock().unwrap().get_mut(playlist_id) {
            Some(tracks) => {
                tracks.push(track_id.to_string());
                Ok(())
            }
            None => bail!("{}: playlist {} not found", self.name, playlist_id),
        }
    }

    fn fetch_audio(&self, creds: &ServiceCredentials, track_id: &str) -> Result<AudioSource> {
        self.check(creds)?;
        self.audio_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(AudioSource::Url(format!("fake://{}/{}", self.name, track_id)))
    }
}

/// Analyzer returning preset histograms, keyed by track id.
#[derive(Default)]
pub struct FixedAnalyzer {
    histograms: HashMap<String, Vec<(f64, f64)>>,
}

impl FixedAnalyzer {
    pub fn with(mut self, track_id: &str, bins: &[(f64, f64)]) -> Self {
        self.histograms.insert(track_id.to_string(), bins.to_vec());
        self
    }
}

impl BpmAnalyzer for FixedAnalyzer {
    fn compute_bpm_histogram(&self, audio: &AudioSource) -> Result<Histogram> {
        let AudioSource::Url(url) = audio else {
            bail!("unsupported audio source {:?}", audio);
        };
        let track_id = url.rsplit('/').next().unwrap_or_default();
        match self.histograms.get(track_id) {
            Some(bins) => Ok(Histogram::new(bins.iter().copied())?),
            None => bail!("no tempo detected for {}", track_id),
        }
    }
}
