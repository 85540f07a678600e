//! End-to-end tests for picking tracks into a target playlist

mod common;

use bpmcrawl::lease::ReleaseOutcome;
use bpmcrawl::model::{target_uri, JobKind, JobSpec, JobStatus, TargetSources};
use bpmcrawl::store::{EntityStore, JobStore};
use common::{FakeMusicService, FixedAnalyzer, TestEnv, NOW, PLAYLIST_ID, SERVICE, TARGET, USER};
use std::collections::BTreeMap;
use std::sync::Arc;

const ARTIST_ID: &str = "ART";

fn sources() -> TargetSources {
    TargetSources {
        playlists: BTreeMap::from([(PLAYLIST_ID.to_string(), 1)]),
        artists: BTreeMap::from([(ARTIST_ID.to_string(), 1)]),
        ..Default::default()
    }
}

/// a, d and e match 176-182 BPM, b does not, c has no histogram yet.
fn setup() -> (TestEnv, Arc<FakeMusicService>) {
    let env = TestEnv::new();
    env.seed_user(USER, SERVICE);
    env.seed_target(sources());
    env.add_histogram("a", &[(178.0, 1.0)]);
    env.add_histogram("b", &[(120.0, 0.8), (180.0, 0.2)]);
    env.add_histogram("d", &[(180.0, 0.5), (90.0, 0.5)]);
    env.add_histogram("e", &[(181.0, 0.9), (60.0, 0.1)]);
    let service = Arc::new(
        FakeMusicService::new(SERVICE)
            .with_playlist(PLAYLIST_ID, &["a", "b", "c", "d"])
            .with_artist(ARTIST_ID, &["a", "e"]),
    );
    (env, service)
}

#[tokio::test]
async fn test_pick_adds_matching_tracks_in_candidate_order() {
    let (env, service) = setup();
    let executor = env.executor("worker-1", service.clone(), FixedAnalyzer::default());
    env.enqueue(&JobSpec::pick_tracks(USER, SERVICE, TARGET));

    let (lease, job) = executor.claim_next().await.unwrap().unwrap();
    assert_eq!(job.kind, JobKind::PickTracks);
    let run = executor.execute(lease, job).await.unwrap();

    let report = run.report.unwrap();
    assert_eq!(report.added_tracks, vec!["a", "d", "e"]);
    assert_eq!(report.tracks_seen, 5);
    assert_eq!(report.matched_tracks, 3);
    assert_eq!(service.playlist(TARGET), vec!["a", "d", "e"]);

    let ReleaseOutcome::Completed(summary) = run.release else {
        panic!("pick should complete, got {:?}", run.release);
    };
    assert_eq!(summary.jobs_inserted, 1);
    let calc_jobs = env.jobs_of_kind(JobKind::CalcBpm);
    assert_eq!(calc_jobs.len(), 1);
    assert_eq!(calc_jobs[0].job_uri, "calc_bpm/yandexmusic/c");

    let target = env
        .store
        .get_target(&target_uri(USER, SERVICE, TARGET))
        .unwrap()
        .unwrap();
    assert_eq!(target.timestamp_last_job_finished, Some(NOW));
}

#[tokio::test]
async fn test_next_pick_adds_newly_measured_track_only() {
    let (env, service) = setup();
    let analyzer = FixedAnalyzer::default().with("c", &[(179.0, 1.0)]);
    let executor = env.executor("worker-1", service.clone(), analyzer);
    let scheduler = env.scheduler();
    let pick = JobSpec::pick_tracks(USER, SERVICE, TARGET);

    scheduler.enqueue(&pick).unwrap();
    assert!(executor.run_next().await.unwrap()); // pick_tracks
    assert!(executor.run_next().await.unwrap()); // calc_bpm for c
    assert!(env.store.get_histogram("yandexmusic/c").unwrap().is_some());

    env.clock.advance(3600);
    scheduler.enqueue_recurring(&pick).unwrap();
    let (lease, job) = executor.claim_next().await.unwrap().unwrap();
    let run = executor.execute(lease, job).await.unwrap();

    assert_eq!(run.report.unwrap().added_tracks, vec!["c"]);
    assert_eq!(service.playlist(TARGET), vec!["a", "d", "e", "c"]);
    assert_eq!(env.jobs_of_kind(JobKind::CalcBpm).len(), 1);
}

#[tokio::test]
async fn test_service_outage_schedules_retry_without_side_effects() {
    let (env, service) = setup();
    service.set_fail_listing(true);
    let executor = env.executor("worker-1", service.clone(), FixedAnalyzer::default());
    let job = env.enqueue(&JobSpec::pick_tracks(USER, SERVICE, TARGET));

    assert!(executor.run_next().await.unwrap());

    let stored = env.store.get_job(&job.job_id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Pending);
    assert!(!stored.finished);
    assert!(stored.locked.is_none());
    assert!(stored.not_before.is_some_and(|t| t > NOW));
    assert!(stored.last_error.unwrap().contains("503"));
    assert!(service.playlist(TARGET).is_empty());
    assert!(env.jobs_of_kind(JobKind::CalcBpm).is_empty());
}

#[tokio::test]
async fn test_disabled_user_fails_permanently() {
    let (env, service) = setup();
    let mut user = env.store.get_user(USER).unwrap().unwrap();
    user.enabled = false;
    env.store.upsert_user(&user).unwrap();
    let executor = env.executor("worker-1", service.clone(), FixedAnalyzer::default());
    let job = env.enqueue(&JobSpec::pick_tracks(USER, SERVICE, TARGET));

    let (lease, claimed) = executor.claim_next().await.unwrap().unwrap();
    let run = executor.execute(lease, claimed).await.unwrap();

    assert_eq!(run.release, ReleaseOutcome::FailedPermanently);
    let stored = env.store.get_job(&job.job_id).unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert!(stored.finished);
    assert!(service.playlist(TARGET).is_empty());
}
