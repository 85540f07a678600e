//! Loading services, users, playlists and targets from a TOML seed file.
//!
//! ```toml
//! [[services]]
//! name = "yandexmusic"
//!
//! [[users]]
//! user = "alice"
//! email = "alice@example.com"
//! displayName = "Alice"
//! [users.services.yandexmusic]
//! token = "..."
//!
//! [[playlists]]
//! service = "yandexmusic"
//! user = "alice"
//! service_playlist_id = "PLOD"
//! name = "Running"
//!
//! [[targets]]
//! user = "alice"
//! service = "yandexmusic"
//! target = "run180"
//! bpms = { min = 176, max = 182 }
//! [targets.sources]
//! playlists = { PLOD = 1 }
//! ```
//!
//! URIs are always derived from the natural fields, never read from the file.

use crate::model::{BpmRange, Playlist, Service, Target, TargetSources, User};
use crate::store::EntityStore;
use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct PlaylistSeed {
    pub service: String,
    pub user: String,
    pub service_playlist_id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct TargetSeed {
    pub user: String,
    pub service: String,
    pub target: String,
    pub bpms: BpmRange,
    #[serde(default)]
    pub sources: TargetSources,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct SeedFile {
    pub services: Vec<Service>,
    pub users: Vec<User>,
    pub playlists: Vec<PlaylistSeed>,
    pub targets: Vec<TargetSeed>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub services: usize,
    pub users: usize,
    pub playlists: usize,
    pub targets: usize,
}

fn check_identifier(kind: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        bail!("{} must not be empty", kind);
    }
    if value.contains('/') {
        bail!("{} {:?} must not contain '/'", kind, value);
    }
    Ok(())
}

impl SeedFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read seed file: {:?}", path))?;
        Self::parse(&content).with_context(|| format!("Invalid seed file: {:?}", path))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let seed: SeedFile = toml::from_str(content)?;
        seed.validate()?;
        Ok(seed)
    }

    /// Identifiers end up as URI segments, so they may not be empty or
    /// contain the separator.
    fn validate(&self) -> Result<()> {
        for service in &self.services {
            check_identifier("Service name", &service.name)?;
        }
        for user in &self.users {
            check_identifier("User name", &user.user)?;
            if user.email.trim().is_empty() {
                bail!("User {} has no email", user.user);
            }
        }
        for playlist in &self.playlists {
            check_identifier("Playlist service", &playlist.service)?;
            check_identifier("Playlist user", &playlist.user)?;
            check_identifier("Playlist id", &playlist.service_playlist_id)?;
        }
        for target in &self.targets {
            check_identifier("Target service", &target.service)?;
            check_identifier("Target user", &target.user)?;
            check_identifier("Target name", &target.target)?;
        }
        Ok(())
    }

    /// Upserts everything in file order: services, users, playlists, targets.
    pub fn apply(&self, store: &dyn EntityStore) -> Result<SeedSummary> {
        for service in &self.services {
            store
                .upsert_service(service)
                .with_context(|| format!("Failed to store service {}", service.name))?;
        }
        for user in &self.users {
            store
                .upsert_user(user)
                .with_context(|| format!("Failed to store user {}", user.user))?;
        }
        for seed in &self.playlists {
            let playlist = Playlist::new(&seed.service, &seed.user, &seed.service_playlist_id, &seed.name);
            store
                .upsert_playlist(&playlist)
                .with_context(|| format!("Failed to store playlist {}", playlist.playlist_uri))?;
        }
        for seed in &self.targets {
            let target = Target::new(
                &seed.user,
                &seed.service,
                &seed.target,
                seed.bpms,
                seed.sources.clone(),
            );
            store
                .upsert_target(&target)
                .with_context(|| format!("Failed to store target {}", target.target_uri))?;
        }

        let summary = SeedSummary {
            services: self.services.len(),
            users: self.users.len(),
            playlists: self.playlists.len(),
            targets: self.targets.len(),
        };
        info!(
            "Seeded {} services, {} users, {} playlists, {} targets",
            summary.services, summary.users, summary.playlists, summary.targets
        );
        Ok(summary)
    }
}
