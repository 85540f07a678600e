//! Database schema for the crawl store.
//!
//! One table per seed collection. Mapping-valued fields are JSON text.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, Index, SqlType, Table, VersionedSchema};

// =============================================================================
// Entity tables - Version 0
// =============================================================================

const SERVICES_TABLE_V0: Table = Table {
    name: "services",
    columns: &[
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("enabled", &SqlType::Integer, non_null = true, default_value = Some("1")),
    ],
    indices: &[Index {
        name: "idx_services_name",
        columns: "name",
        unique: true,
    }],
};

const USERS_TABLE_V0: Table = Table {
    name: "users",
    columns: &[
        sqlite_column!("user", &SqlType::Text, is_primary_key = true),
        sqlite_column!("email", &SqlType::Text, non_null = true),
        sqlite_column!("display_name", &SqlType::Text, non_null = true),
        sqlite_column!("enabled", &SqlType::Integer, non_null = true, default_value = Some("1")),
        // JSON: service name -> {"token": ...}
        sqlite_column!("services", &SqlType::Text, non_null = true),
    ],
    indices: &[Index {
        name: "idx_users_email_user",
        columns: "email, user",
        unique: true,
    }],
};

const PLAYLISTS_TABLE_V0: Table = Table {
    name: "playlists",
    columns: &[
        sqlite_column!("playlist_uri", &SqlType::Text, non_null = true),
        sqlite_column!("service", &SqlType::Text, non_null = true),
        sqlite_column!("service_playlist_id", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text, non_null = true),
        sqlite_column!("user", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp_last_job_scheduled", &SqlType::Integer),
        sqlite_column!("timestamp_last_job_finished", &SqlType::Integer),
    ],
    indices: &[
        Index {
            name: "idx_playlists_uri",
            columns: "playlist_uri",
            unique: true,
        },
        Index {
            name: "idx_playlists_service_id",
            columns: "service, service_playlist_id",
            unique: false,
        },
    ],
};

const HISTOGRAMS_TABLE_V0: Table = Table {
    name: "histograms",
    columns: &[
        sqlite_column!("track_uri", &SqlType::Text, non_null = true),
        sqlite_column!("service", &SqlType::Text, non_null = true),
        sqlite_column!("service_track_id", &SqlType::Text, non_null = true),
        // JSON: {"90": 0.9, "181": 0.1}
        sqlite_column!("histogram", &SqlType::Text, non_null = true),
        // JSON: {"<playlist_uri>": 1}
        sqlite_column!("from_playlists", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp_last_job_scheduled", &SqlType::Integer),
        sqlite_column!("timestamp_last_job_finished", &SqlType::Integer),
    ],
    indices: &[
        Index {
            name: "idx_histograms_track_uri",
            columns: "track_uri",
            unique: true,
        },
        Index {
            name: "idx_histograms_service_id",
            columns: "service, service_track_id",
            unique: false,
        },
    ],
};

const TARGETS_TABLE_V0: Table = Table {
    name: "targets",
    columns: &[
        sqlite_column!("target_uri", &SqlType::Text, non_null = true),
        sqlite_column!("user", &SqlType::Text, non_null = true),
        sqlite_column!("service", &SqlType::Text, non_null = true),
        sqlite_column!("target", &SqlType::Text, non_null = true),
        sqlite_column!("bpm_min", &SqlType::Real, non_null = true),
        sqlite_column!("bpm_max", &SqlType::Real, non_null = true),
        // JSON: {"playlists": {"PLOD": 1}, ...}
        sqlite_column!("sources", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp_last_job_scheduled", &SqlType::Integer),
        sqlite_column!("timestamp_last_job_finished", &SqlType::Integer),
    ],
    indices: &[
        Index {
            name: "idx_targets_uri",
            columns: "target_uri",
            unique: true,
        },
        Index {
            name: "idx_targets_user_service_target",
            columns: "user, service, target",
            unique: true,
        },
    ],
};

// =============================================================================
// Jobs table - Version 0
// =============================================================================

const JOBS_TABLE_V0: Table = Table {
    name: "jobs",
    columns: &[
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("job_uri", &SqlType::Text, non_null = true),
        sqlite_column!("kind", &SqlType::Text, non_null = true),
        // JSON parameter bag, shape depends on kind
        sqlite_column!("def", &SqlType::Text, non_null = true),
        sqlite_column!("service", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("priority", &SqlType::Integer, non_null = true),
        sqlite_column!("worker_id", &SqlType::Text),
        sqlite_column!("locked", &SqlType::Text),
        sqlite_column!("started", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("finished", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("attempts", &SqlType::Integer, non_null = true, default_value = Some("0")),
        sqlite_column!("last_error", &SqlType::Text),
        sqlite_column!("not_before", &SqlType::Integer),
        sqlite_column!("timestamp_created", &SqlType::Integer, non_null = true),
        sqlite_column!("timestamp_started", &SqlType::Integer),
        sqlite_column!("timestamp_updated", &SqlType::Integer),
        sqlite_column!("timestamp_finished", &SqlType::Integer),
        sqlite_column!("time_took", &SqlType::Integer),
    ],
    indices: &[
        Index {
            name: "idx_jobs_job_id",
            columns: "job_id",
            unique: true,
        },
        Index {
            name: "idx_jobs_job_uri",
            columns: "job_uri",
            unique: true,
        },
        // NULLs never collide, so only held leases are constrained
        Index {
            name: "idx_jobs_locked",
            columns: "locked",
            unique: true,
        },
        Index {
            name: "idx_jobs_pickup",
            columns: "finished, priority, timestamp_created",
            unique: false,
        },
        Index {
            name: "idx_jobs_service",
            columns: "service",
            unique: false,
        },
        Index {
            name: "idx_jobs_updated",
            columns: "timestamp_updated",
            unique: false,
        },
    ],
};

pub const CRAWL_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 0,
    tables: &[
        SERVICES_TABLE_V0,
        USERS_TABLE_V0,
        PLAYLISTS_TABLE_V0,
        HISTOGRAMS_TABLE_V0,
        TARGETS_TABLE_V0,
        JOBS_TABLE_V0,
    ],
    migration: None,
}];
