use super::{external, HandlerResult};
use crate::error::{CrawlError, CrawlResult};
use crate::executor::context::WorkerContext;
use crate::matcher;
use crate::model::{
    target_uri, track_uri, JobSpec, PickTracksDef, ServiceCredentials, StampedEntity, TargetSources,
};
use crate::services::MusicService;
use std::collections::HashSet;
use tracing::{debug, info};

/// Candidate track ids from `sources`: playlists, then artists, then
/// albums, then explicit tracks. The first occurrence of a track wins.
fn collect_candidates(
    ctx: &WorkerContext,
    service: &dyn MusicService,
    creds: &ServiceCredentials,
    sources: &TargetSources,
) -> CrawlResult<Vec<String>> {
    let on_error = external(service.name());
    let mut batches = Vec::new();
    for playlist_id in sources.playlists.keys() {
        ctx.check_cancelled()?;
        batches.push(service.list_playlist_tracks(creds, playlist_id).map_err(&on_error)?);
    }
    for artist_id in sources.artists.keys() {
        ctx.check_cancelled()?;
        batches.push(service.list_artist_tracks(creds, artist_id).map_err(&on_error)?);
    }
    for album_id in sources.albums.keys() {
        ctx.check_cancelled()?;
        batches.push(service.list_album_tracks(creds, album_id).map_err(&on_error)?);
    }
    batches.push(sources.tracks.keys().cloned().collect());

    let mut seen = HashSet::new();
    Ok(batches
        .into_iter()
        .flatten()
        .filter(|track_id| seen.insert(track_id.clone()))
        .collect())
}

/// Adds every candidate whose histogram matches the target range to the
/// service playlist named after the target. Candidates without a
/// histogram get a `calc_bpm` job and are picked up on a later run.
pub(super) fn run(ctx: &WorkerContext, def: &PickTracksDef) -> CrawlResult<HandlerResult> {
    let uri = target_uri(&def.user, &def.service, &def.target);
    let target = ctx
        .store
        .get_target(&uri)?
        .ok_or_else(|| CrawlError::permanent(format!("Unknown target {}", uri)))?;
    let creds = ctx.credentials(&def.user, &def.service)?;
    let service = ctx.service(&def.service)?;

    let candidates = collect_candidates(ctx, service.as_ref(), &creds, &target.sources)?;

    let mut result = HandlerResult::default();
    let mut matched = Vec::new();
    for track_id in &candidates {
        ctx.check_cancelled()?;
        match ctx.store.get_histogram(&track_uri(&def.service, track_id))? {
            Some(record) => {
                if let Some(summary) = matcher::evaluate(&record.histogram, &target.bpms, &ctx.match_config) {
                    debug!(
                        "Track {} matches {}: {:.2} of weight in range, {:.1} BPM",
                        track_id, uri, summary.in_range_share, summary.average_bpm
                    );
                    matched.push(track_id.clone());
                }
            }
            None => result
                .output
                .new_jobs
                .push(JobSpec::calc_bpm(&def.user, &def.service, track_id)),
        }
    }

    if !matched.is_empty() {
        let on_error = external(&def.service);
        let playlist = service
            .get_or_create_playlist(&creds, &target.target)
            .map_err(&on_error)?;
        let present: HashSet<String> = service
            .list_playlist_tracks(&creds, &playlist.id)
            .map_err(&on_error)?
            .into_iter()
            .collect();

        for track_id in &matched {
            if present.contains(track_id) {
                continue;
            }
            // an addition cannot be rolled back, so never make one without the lease
            ctx.check_cancelled()?;
            service
                .add_track_to_playlist(&creds, &playlist.id, track_id)
                .map_err(&on_error)?;
            result.report.added_tracks.push(track_id.clone());
        }
    }
    result.output.finished_stamp = Some((StampedEntity::Target, uri.clone()));

    result.report.tracks_seen = candidates.len();
    result.report.matched_tracks = matched.len();
    result.report.jobs_staged = result.output.new_jobs.len();
    info!(
        "Picked for {}: {} candidates, {} match, {} added, {} awaiting BPM",
        uri,
        result.report.tracks_seen,
        result.report.matched_tracks,
        result.report.added_tracks.len(),
        result.report.jobs_staged
    );
    Ok(result)
}
