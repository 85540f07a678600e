use super::{external, HandlerResult};
use crate::executor::context::WorkerContext;
use crate::error::CrawlResult;
use crate::model::{playlist_uri, track_uri, JobSpec, Playlist, ScanPlaylistDef, StampedEntity};
use std::collections::HashSet;
use tracing::{debug, info};

/// Lists the playlist's tracks. Tracks with a histogram get the playlist
/// recorded in `from_playlists`; the others get a `calc_bpm` job.
pub(super) fn run(ctx: &WorkerContext, def: &ScanPlaylistDef) -> CrawlResult<HandlerResult> {
    let creds = ctx.credentials(&def.user, &def.service)?;
    let service = ctx.service(&def.service)?;
    let uri = playlist_uri(&def.service, &def.user, &def.playlist);

    // Playlists enqueued by hand may not be known yet
    if ctx.store.get_playlist(&uri)?.is_none() {
        debug!("Registering playlist {}", uri);
        ctx.store.upsert_playlist(&Playlist::new(
            &def.service,
            &def.user,
            &def.playlist,
            &def.playlist,
        ))?;
    }

    let tracks = service
        .list_playlist_tracks(&creds, &def.playlist)
        .map_err(external(&def.service))?;

    let mut result = HandlerResult::default();
    let mut seen = HashSet::new();
    for track_id in tracks {
        if !seen.insert(track_id.clone()) {
            continue;
        }
        ctx.check_cancelled()?;
        let track = track_uri(&def.service, &track_id);
        if ctx.store.get_histogram(&track)?.is_some() {
            result.output.memberships.push((track, uri.clone()));
        } else {
            result
                .output
                .new_jobs
                .push(JobSpec::calc_bpm(&def.user, &def.service, &track_id));
        }
    }
    result.output.finished_stamp = Some((StampedEntity::Playlist, uri.clone()));

    result.report.tracks_seen = seen.len();
    result.report.memberships_staged = result.output.memberships.len();
    result.report.jobs_staged = result.output.new_jobs.len();
    info!(
        "Scanned {}: {} tracks, {} need BPM",
        uri, result.report.tracks_seen, result.report.jobs_staged
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use crate::error::CrawlError;
    use crate::model::{Histogram, TrackHistogram};
    use crate::store::EntityStore;
    use std::sync::Arc;

    fn def() -> ScanPlaylistDef {
        ScanPlaylistDef {
            user: "alice".to_string(),
            service: "ym".to_string(),
            playlist: "PLOD".to_string(),
        }
    }

    #[test]
    fn test_scan_stages_jobs_and_memberships() {
        let store = store_with_user(true);
        store
            .upsert_histogram(&TrackHistogram::new(
                "ym",
                "known",
                Histogram::new([(180.0, 1.0)]).unwrap(),
            ))
            .unwrap();
        let service = Arc::new(FakeService::default().with_playlist("PLOD", &["known", "new", "new"]));
        let ctx = context(store.clone(), service, TableAnalyzer::default());

        let result = run(&ctx, &def()).unwrap();

        assert_eq!(
            result.output.new_jobs,
            vec![JobSpec::calc_bpm("alice", "ym", "new")]
        );
        assert_eq!(
            result.output.memberships,
            vec![("ym/known".to_string(), "ym/alice/PLOD".to_string())]
        );
        assert_eq!(
            result.output.finished_stamp,
            Some((StampedEntity::Playlist, "ym/alice/PLOD".to_string()))
        );
        assert_eq!(result.report.tracks_seen, 2);
        // nothing committed yet
        assert!(store.get_histogram("ym/known").unwrap().unwrap().from_playlists.is_empty());
        assert!(store.get_playlist("ym/alice/PLOD").unwrap().is_some());
    }

    #[test]
    fn test_scan_service_failure_is_retryable() {
        let service = Arc::new(FakeService {
            failing: true,
            ..Default::default()
        });
        let ctx = context(store_with_user(true), service, TableAnalyzer::default());

        let err = run(&ctx, &def()).unwrap_err();
        assert!(err.is_retryable());
    }

    #[test]
    fn test_scan_for_disabled_user_is_permanent() {
        let ctx = context(
            store_with_user(false),
            Arc::new(FakeService::default()),
            TableAnalyzer::default(),
        );
        assert!(matches!(run(&ctx, &def()), Err(CrawlError::PermanentJob(_))));
    }
}
