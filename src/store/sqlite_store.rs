//! SQLite-backed crawl store.
//!
//! Several worker processes may open the same database file. Each guarded
//! transition is a single UPDATE (or one IMMEDIATE transaction), so SQLite's
//! write lock is the only serialization point between workers.

use super::schema::CRAWL_VERSIONED_SCHEMAS;
use super::{CommitSummary, EntityStore, InsertOutcome, JobOutput, JobStore};
use crate::error::{CrawlError, CrawlResult};
use crate::model::{
    lock_token, BpmRange, Job, JobKind, JobStatus, Playlist, Service, StampedEntity, Target,
    Timestamp, TrackHistogram, User,
};
use crate::sqlite_persistence::open_versioned;
use anyhow::{Context, Result};
use rusqlite::types::{Type, Value};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const JOB_COLUMNS: &str = "job_id, job_uri, kind, def, service, status, priority, worker_id, \
     locked, started, finished, attempts, last_error, not_before, timestamp_created, \
     timestamp_started, timestamp_updated, timestamp_finished, time_took";

const HISTOGRAM_COLUMNS: &str = "track_uri, service, service_track_id, histogram, from_playlists, \
     timestamp_last_job_scheduled, timestamp_last_job_finished";

const PLAYLIST_COLUMNS: &str = "playlist_uri, service, service_playlist_id, name, user, \
     timestamp_last_job_scheduled, timestamp_last_job_finished";

const TARGET_COLUMNS: &str = "target_uri, user, service, target, bpm_min, bpm_max, sources, \
     timestamp_last_job_scheduled, timestamp_last_job_finished";

#[derive(Clone)]
pub struct SqliteCrawlStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCrawlStore {
    /// Open (or create) the crawl database at `db_path`.
    pub fn new<P: AsRef<Path>>(db_path: P) -> Result<Self> {
        let mut conn = Connection::open(&db_path)
            .with_context(|| format!("Failed to open crawl database {:?}", db_path.as_ref()))?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal_mode: String =
            conn.query_row("PRAGMA journal_mode = WAL;", [], |row| row.get(0))?;
        debug!("Crawl database journal mode: {}", journal_mode);

        open_versioned(&mut conn, CRAWL_VERSIONED_SCHEMAS, "crawl")?;

        Ok(SqliteCrawlStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Private in-memory database, for tests and dry runs.
    pub fn in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory()?;
        open_versioned(&mut conn, CRAWL_VERSIONED_SCHEMAS, "crawl")?;
        Ok(SqliteCrawlStore {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn row_to_job(row: &Row) -> rusqlite::Result<Job> {
        Ok(Job {
            job_id: row.get(0)?,
            job_uri: row.get(1)?,
            kind: parse_column::<JobKind>(row, 2)?,
            def: json_column(row, 3)?,
            service: row.get(4)?,
            status: parse_column::<JobStatus>(row, 5)?,
            priority: row.get(6)?,
            worker_id: row.get(7)?,
            locked: row.get(8)?,
            started: row.get(9)?,
            finished: row.get(10)?,
            attempts: row.get(11)?,
            last_error: row.get(12)?,
            not_before: row.get(13)?,
            timestamp_created: row.get(14)?,
            timestamp_started: row.get(15)?,
            timestamp_updated: row.get(16)?,
            timestamp_finished: row.get(17)?,
            time_took: row.get(18)?,
        })
    }

    fn row_to_user(row: &Row) -> rusqlite::Result<User> {
        Ok(User {
            user: row.get(0)?,
            email: row.get(1)?,
            display_name: row.get(2)?,
            enabled: row.get(3)?,
            services: json_column(row, 4)?,
        })
    }

    fn row_to_playlist(row: &Row) -> rusqlite::Result<Playlist> {
        Ok(Playlist {
            playlist_uri: row.get(0)?,
            service: row.get(1)?,
            service_playlist_id: row.get(2)?,
            name: row.get(3)?,
            user: row.get(4)?,
            timestamp_last_job_scheduled: row.get(5)?,
            timestamp_last_job_finished: row.get(6)?,
        })
    }

    fn row_to_histogram(row: &Row) -> rusqlite::Result<TrackHistogram> {
        Ok(TrackHistogram {
            track_uri: row.get(0)?,
            service: row.get(1)?,
            service_track_id: row.get(2)?,
            histogram: json_column(row, 3)?,
            from_playlists: json_column(row, 4)?,
            timestamp_last_job_scheduled: row.get(5)?,
            timestamp_last_job_finished: row.get(6)?,
        })
    }

    fn row_to_target(row: &Row) -> rusqlite::Result<Target> {
        let bpms = BpmRange::new(row.get(4)?, row.get(5)?)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Real, e.into()))?;
        Ok(Target {
            target_uri: row.get(0)?,
            user: row.get(1)?,
            service: row.get(2)?,
            target: row.get(3)?,
            bpms,
            sources: json_column(row, 6)?,
            timestamp_last_job_scheduled: row.get(7)?,
            timestamp_last_job_finished: row.get(8)?,
        })
    }
}

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn parse_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let text: String = row.get(idx)?;
    text.parse::<T>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into()))
}

fn entity_table(entity: StampedEntity) -> (&'static str, &'static str) {
    match entity {
        StampedEntity::Playlist => ("playlists", "playlist_uri"),
        StampedEntity::Target => ("targets", "target_uri"),
        StampedEntity::Histogram => ("histograms", "track_uri"),
    }
}

// Helpers below take a plain connection so they run both standalone and
// inside the commit transaction.

fn insert_job_row(conn: &Connection, job: &Job) -> CrawlResult<InsertOutcome> {
    let result = conn.execute(
        &format!(
            "INSERT INTO jobs ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, \
             ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
            JOB_COLUMNS
        ),
        params![
            job.job_id,
            job.job_uri,
            job.kind.as_str(),
            job.def.to_string(),
            job.service,
            job.status.as_str(),
            job.priority,
            job.worker_id,
            job.locked,
            job.started,
            job.finished,
            job.attempts,
            job.last_error,
            job.not_before,
            job.timestamp_created,
            job.timestamp_started,
            job.timestamp_updated,
            job.timestamp_finished,
            job.time_took,
        ],
    );
    match result.map_err(CrawlError::from) {
        Ok(_) => Ok(InsertOutcome::Inserted),
        Err(CrawlError::DuplicateKey(_)) => Ok(InsertOutcome::AlreadyExists),
        Err(e) => Err(e),
    }
}

fn upsert_histogram_row(conn: &Connection, histogram: &TrackHistogram) -> CrawlResult<()> {
    conn.execute(
        &format!(
            "INSERT INTO histograms ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(track_uri) DO UPDATE SET
                histogram = excluded.histogram,
                from_playlists = json_patch(histograms.from_playlists, excluded.from_playlists),
                timestamp_last_job_scheduled =
                    COALESCE(excluded.timestamp_last_job_scheduled, histograms.timestamp_last_job_scheduled),
                timestamp_last_job_finished =
                    COALESCE(excluded.timestamp_last_job_finished, histograms.timestamp_last_job_finished)",
            HISTOGRAM_COLUMNS
        ),
        params![
            histogram.track_uri,
            histogram.service,
            histogram.service_track_id,
            serde_json::to_string(&histogram.histogram)?,
            serde_json::to_string(&histogram.from_playlists)?,
            histogram.timestamp_last_job_scheduled,
            histogram.timestamp_last_job_finished,
        ],
    )?;
    Ok(())
}

/// Returns false if the track has no histogram yet.
fn record_membership(conn: &Connection, track_uri: &str, playlist_uri: &str) -> CrawlResult<bool> {
    let changed = conn.execute(
        "UPDATE histograms SET from_playlists = json_patch(from_playlists, json_object(?2, 1))
         WHERE track_uri = ?1",
        params![track_uri, playlist_uri],
    )?;
    Ok(changed == 1)
}

fn stamp_finished(conn: &Connection, entity: StampedEntity, uri: &str, now: Timestamp) -> CrawlResult<()> {
    let (table, key) = entity_table(entity);
    conn.execute(
        &format!(
            "UPDATE {} SET timestamp_last_job_finished = ?2 WHERE {} = ?1",
            table, key
        ),
        params![uri, now],
    )?;
    Ok(())
}

impl JobStore for SqliteCrawlStore {
    fn insert_job(&self, job: &Job) -> CrawlResult<InsertOutcome> {
        let conn = self.conn.lock().unwrap();
        insert_job_row(&conn, job)
    }

    fn get_job(&self, job_id: &str) -> CrawlResult<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE job_id = ?1", JOB_COLUMNS),
                params![job_id],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn get_job_by_uri(&self, job_uri: &str) -> CrawlResult<Option<Job>> {
        let conn = self.conn.lock().unwrap();
        let job = conn
            .query_row(
                &format!("SELECT {} FROM jobs WHERE job_uri = ?1", JOB_COLUMNS),
                params![job_uri],
                Self::row_to_job,
            )
            .optional()?;
        Ok(job)
    }

    fn list_jobs(&self, kind: Option<JobKind>, limit: usize) -> CrawlResult<Vec<Job>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs WHERE (?1 IS NULL OR kind = ?1)
             ORDER BY timestamp_created DESC, rowid DESC LIMIT ?2",
            JOB_COLUMNS
        ))?;
        let jobs = stmt
            .query_map(
                params![kind.map(|k| k.as_str()), limit as i64],
                Self::row_to_job,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn find_claimable(
        &self,
        services: &[String],
        now: Timestamp,
        stale_before: Timestamp,
        limit: usize,
    ) -> CrawlResult<Vec<Job>> {
        if services.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = (0..services.len())
            .map(|i| format!("?{}", i + 4))
            .collect::<Vec<_>>()
            .join(", ");
        let mut values = vec![
            Value::Integer(stale_before),
            Value::Integer(now),
            Value::Integer(limit as i64),
        ];
        values.extend(services.iter().map(|s| Value::Text(s.clone())));

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM jobs
             WHERE finished = 0
               AND (locked IS NULL OR timestamp_updated < ?1)
               AND (not_before IS NULL OR not_before <= ?2)
               AND service IN ({})
             ORDER BY priority ASC, timestamp_created ASC, rowid ASC
             LIMIT ?3",
            JOB_COLUMNS, placeholders
        ))?;
        let jobs = stmt
            .query_map(params_from_iter(values.iter()), Self::row_to_job)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(jobs)
    }

    fn count_by_status(&self) -> CrawlResult<Vec<(JobStatus, usize)>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let counts: BTreeMap<String, i64> = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<rusqlite::Result<_>>()?;
        Ok(JobStatus::ALL
            .into_iter()
            .map(|status| {
                let count = counts.get(status.as_str()).copied().unwrap_or(0);
                (status, count as usize)
            })
            .collect())
    }

    fn try_lock(
        &self,
        job_id: &str,
        worker_id: &str,
        now: Timestamp,
        stale_before: Timestamp,
    ) -> CrawlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET
                worker_id = ?2,
                locked = ?3,
                started = 1,
                status = 'running',
                attempts = attempts + 1,
                timestamp_started = ?4,
                timestamp_updated = ?4
             WHERE job_id = ?1
               AND finished = 0
               AND (locked IS NULL OR timestamp_updated < ?5)
               AND (not_before IS NULL OR not_before <= ?4)",
            params![job_id, worker_id, lock_token(job_id, worker_id), now, stale_before],
        )?;
        Ok(changed == 1)
    }

    fn touch(&self, job_id: &str, worker_id: &str, now: Timestamp) -> CrawlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET timestamp_updated = ?3
             WHERE job_id = ?1 AND worker_id = ?2 AND locked = ?4 AND finished = 0",
            params![job_id, worker_id, now, lock_token(job_id, worker_id)],
        )?;
        Ok(changed == 1)
    }

    fn complete(
        &self,
        job_id: &str,
        worker_id: &str,
        now: Timestamp,
        output: &JobOutput,
    ) -> CrawlResult<Option<CommitSummary>> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

        let owned = tx.execute(
            "UPDATE jobs SET
                finished = 1,
                status = 'succeeded',
                locked = NULL,
                not_before = NULL,
                timestamp_finished = ?3,
                timestamp_updated = ?3,
                time_took = ?3 - COALESCE(timestamp_started, ?3)
             WHERE job_id = ?1 AND worker_id = ?2 AND locked = ?4 AND finished = 0",
            params![job_id, worker_id, now, lock_token(job_id, worker_id)],
        )?;
        if owned != 1 {
            // dropping the transaction rolls it back
            return Ok(None);
        }

        let mut summary = CommitSummary::default();
        for spec in &output.new_jobs {
            match insert_job_row(&tx, &Job::new(spec, now))? {
                InsertOutcome::Inserted => summary.jobs_inserted += 1,
                InsertOutcome::AlreadyExists => summary.jobs_existing += 1,
            }
        }
        for histogram in &output.histograms {
            upsert_histogram_row(&tx, histogram)?;
            summary.histograms_upserted += 1;
        }
        for (track_uri, playlist_uri) in &output.memberships {
            if record_membership(&tx, track_uri, playlist_uri)? {
                summary.memberships_recorded += 1;
            }
        }
        if let Some((entity, uri)) = &output.finished_stamp {
            stamp_finished(&tx, *entity, uri, now)?;
        }

        tx.commit()?;
        Ok(Some(summary))
    }

    fn requeue(
        &self,
        job_id: &str,
        worker_id: &str,
        not_before: Option<Timestamp>,
        last_error: Option<&str>,
        refund_attempt: bool,
    ) -> CrawlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET
                worker_id = NULL,
                locked = NULL,
                status = 'pending',
                not_before = ?3,
                last_error = COALESCE(?4, last_error),
                attempts = CASE WHEN ?5 THEN MAX(attempts - 1, 0) ELSE attempts END
             WHERE job_id = ?1 AND worker_id = ?2 AND locked = ?6 AND finished = 0",
            params![
                job_id,
                worker_id,
                not_before,
                last_error,
                refund_attempt,
                lock_token(job_id, worker_id)
            ],
        )?;
        Ok(changed == 1)
    }

    fn fail(&self, job_id: &str, worker_id: &str, now: Timestamp, error: &str) -> CrawlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET
                finished = 1,
                status = 'failed',
                locked = NULL,
                last_error = ?4,
                timestamp_finished = ?3,
                timestamp_updated = ?3,
                time_took = ?3 - COALESCE(timestamp_started, ?3)
             WHERE job_id = ?1 AND worker_id = ?2 AND locked = ?5 AND finished = 0",
            params![job_id, worker_id, now, error, lock_token(job_id, worker_id)],
        )?;
        Ok(changed == 1)
    }

    fn reset_expired_leases(&self, stale_before: Timestamp) -> CrawlResult<usize> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "UPDATE jobs SET worker_id = NULL, locked = NULL, status = 'pending'
             WHERE finished = 0 AND locked IS NOT NULL AND timestamp_updated < ?1",
            params![stale_before],
        )?;
        Ok(changed)
    }

    fn delete_finished_before(&self, cutoff: Timestamp) -> CrawlResult<usize> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE finished = 1 AND timestamp_finished < ?1",
            params![cutoff],
        )?;
        Ok(deleted)
    }

    fn delete_finished_by_uri(&self, job_uri: &str) -> CrawlResult<bool> {
        let conn = self.conn.lock().unwrap();
        let deleted = conn.execute(
            "DELETE FROM jobs WHERE job_uri = ?1 AND finished = 1",
            params![job_uri],
        )?;
        Ok(deleted == 1)
    }
}

impl EntityStore for SqliteCrawlStore {
    fn upsert_service(&self, service: &Service) -> CrawlResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO services (name, enabled) VALUES (?1, ?2)
             ON CONFLICT(name) DO UPDATE SET enabled = excluded.enabled",
            params![service.name, service.enabled],
        )?;
        Ok(())
    }

    fn list_services(&self) -> CrawlResult<Vec<Service>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare("SELECT name, enabled FROM services ORDER BY name")?;
        let services = stmt
            .query_map([], |row| {
                Ok(Service {
                    name: row.get(0)?,
                    enabled: row.get(1)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(services)
    }

    fn upsert_user(&self, user: &User) -> CrawlResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO users (user, email, display_name, enabled, services)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user) DO UPDATE SET
                email = excluded.email,
                display_name = excluded.display_name,
                enabled = excluded.enabled,
                services = excluded.services",
            params![
                user.user,
                user.email,
                user.display_name,
                user.enabled,
                serde_json::to_string(&user.services)?,
            ],
        )?;
        Ok(())
    }

    fn get_user(&self, user: &str) -> CrawlResult<Option<User>> {
        let conn = self.conn.lock().unwrap();
        let user = conn
            .query_row(
                "SELECT user, email, display_name, enabled, services FROM users WHERE user = ?1",
                params![user],
                Self::row_to_user,
            )
            .optional()?;
        Ok(user)
    }

    fn list_users(&self) -> CrawlResult<Vec<User>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT user, email, display_name, enabled, services FROM users ORDER BY user",
        )?;
        let users = stmt
            .query_map([], Self::row_to_user)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(users)
    }

    fn upsert_playlist(&self, playlist: &Playlist) -> CrawlResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO playlists (playlist_uri, service, service_playlist_id, name, user)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(playlist_uri) DO UPDATE SET name = excluded.name",
            params![
                playlist.playlist_uri,
                playlist.service,
                playlist.service_playlist_id,
                playlist.name,
                playlist.user,
            ],
        )?;
        Ok(())
    }

    fn get_playlist(&self, playlist_uri: &str) -> CrawlResult<Option<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let playlist = conn
            .query_row(
                &format!("SELECT {} FROM playlists WHERE playlist_uri = ?1", PLAYLIST_COLUMNS),
                params![playlist_uri],
                Self::row_to_playlist,
            )
            .optional()?;
        Ok(playlist)
    }

    fn list_playlists(&self) -> CrawlResult<Vec<Playlist>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM playlists ORDER BY playlist_uri",
            PLAYLIST_COLUMNS
        ))?;
        let playlists = stmt
            .query_map([], Self::row_to_playlist)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(playlists)
    }

    fn upsert_histogram(&self, histogram: &TrackHistogram) -> CrawlResult<()> {
        let conn = self.conn.lock().unwrap();
        upsert_histogram_row(&conn, histogram)
    }

    fn get_histogram(&self, track_uri: &str) -> CrawlResult<Option<TrackHistogram>> {
        let conn = self.conn.lock().unwrap();
        let histogram = conn
            .query_row(
                &format!("SELECT {} FROM histograms WHERE track_uri = ?1", HISTOGRAM_COLUMNS),
                params![track_uri],
                Self::row_to_histogram,
            )
            .optional()?;
        Ok(histogram)
    }

    fn upsert_target(&self, target: &Target) -> CrawlResult<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO targets (target_uri, user, service, target, bpm_min, bpm_max, sources)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(target_uri) DO UPDATE SET
                bpm_min = excluded.bpm_min,
                bpm_max = excluded.bpm_max,
                sources = excluded.sources",
            params![
                target.target_uri,
                target.user,
                target.service,
                target.target,
                target.bpms.min,
                target.bpms.max,
                serde_json::to_string(&target.sources)?,
            ],
        )?;
        Ok(())
    }

    fn get_target(&self, target_uri: &str) -> CrawlResult<Option<Target>> {
        let conn = self.conn.lock().unwrap();
        let target = conn
            .query_row(
                &format!("SELECT {} FROM targets WHERE target_uri = ?1", TARGET_COLUMNS),
                params![target_uri],
                Self::row_to_target,
            )
            .optional()?;
        Ok(target)
    }

    fn list_targets(&self) -> CrawlResult<Vec<Target>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM targets ORDER BY target_uri",
            TARGET_COLUMNS
        ))?;
        let targets = stmt
            .query_map([], Self::row_to_target)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(targets)
    }

    fn stamp_scheduled(
        &self,
        entity: StampedEntity,
        uri: &str,
        now: Timestamp,
        min_interval: i64,
    ) -> CrawlResult<bool> {
        let (table, key) = entity_table(entity);
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET timestamp_last_job_scheduled = ?2
                 WHERE {} = ?1
                   AND (timestamp_last_job_scheduled IS NULL OR timestamp_last_job_scheduled <= ?3)",
                table, key
            ),
            params![uri, now, now - min_interval],
        )?;
        Ok(changed == 1)
    }
}
