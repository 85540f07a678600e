//! One handler per job kind.
//!
//! Handlers are blocking. They read freely from the store, but every write
//! that belongs to the job's result is staged in the returned `JobOutput`
//! and committed by the lease manager only while the lease still holds.
//! Calls to music services are the one exception: a playlist addition
//! cannot be staged, so `pick_tracks` checks the token before each one.

mod calc_bpm;
mod pick_tracks;
mod scan_playlist;

use super::context::WorkerContext;
use crate::error::{CrawlError, CrawlResult};
use crate::model::{Job, JobSpec};
use crate::store::JobOutput;

/// What a handler did, for logging and for callers that need the details.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub tracks_seen: usize,
    /// `calc_bpm` jobs staged for tracks without a histogram.
    pub jobs_staged: usize,
    pub memberships_staged: usize,
    pub histograms_computed: usize,
    pub matched_tracks: usize,
    /// Tracks added to the target playlist, in candidate order.
    pub added_tracks: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct HandlerResult {
    pub output: JobOutput,
    pub report: JobReport,
}

/// Runs the handler for `job`'s kind. A `def` that does not parse is a
/// permanent failure.
pub fn dispatch(ctx: &WorkerContext, job: &Job) -> CrawlResult<HandlerResult> {
    ctx.check_cancelled()?;
    match job.spec()? {
        JobSpec::ScanPlaylist(def) => scan_playlist::run(ctx, &def),
        JobSpec::CalcBpm(def) => calc_bpm::run(ctx, &def, job),
        JobSpec::PickTracks(def) => pick_tracks::run(ctx, &def),
    }
}

fn external(service: &str) -> impl Fn(anyhow::Error) -> CrawlError + '_ {
    move |e| CrawlError::external(service, format!("{:#}", e))
}
