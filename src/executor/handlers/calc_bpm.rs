use super::{external, HandlerResult, JobReport};
use crate::executor::context::WorkerContext;
use crate::error::CrawlResult;
use crate::model::{CalcBpmDef, Job, TrackHistogram};
use crate::store::JobOutput;
use tracing::{debug, info};

const ANALYZER: &str = "bpm-analyzer";

pub(super) fn run(ctx: &WorkerContext, def: &CalcBpmDef, job: &Job) -> CrawlResult<HandlerResult> {
    let creds = ctx.credentials(&def.user, &def.service)?;
    let service = ctx.service(&def.service)?;

    let audio = service
        .fetch_audio(&creds, &def.track_id)
        .map_err(external(&def.service))?;
    debug!("Fetched audio for {}/{}: {:?}", def.service, def.track_id, audio);
    ctx.check_cancelled()?;

    let histogram = ctx
        .analyzer
        .compute_bpm_histogram(&audio)
        .map_err(external(ANALYZER))?;
    ctx.check_cancelled()?;

    let mut record = TrackHistogram::new(&def.service, &def.track_id, histogram);
    record.timestamp_last_job_scheduled = Some(job.timestamp_created);
    record.timestamp_last_job_finished = Some(ctx.clock.now());

    match record.histogram.dominant() {
        Some((bpm, weight)) => info!(
            "Computed histogram for {}: {} buckets, dominant {} BPM ({:.2})",
            record.track_uri,
            record.histogram.len(),
            bpm,
            weight
        ),
        None => info!("Computed empty histogram for {}", record.track_uri),
    }

    Ok(HandlerResult {
        output: JobOutput {
            histograms: vec![record],
            ..Default::default()
        },
        report: JobReport {
            histograms_computed: 1,
            ..Default::default()
        },
    })
}
