//! SQLite schema definitions for the job database.
//!
//! Holds one record per transcribable resource, the transcript segments the
//! last successful run produced, and the audit trail of job lifecycle events.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, ForeignKey, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Job records and transcript segments
// =============================================================================

const JOB_RECORDS_TABLE_V1: Table = Table {
    name: "job_records",
    columns: &[
        sqlite_column!("id", &SqlType::Text, is_primary_key = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!(
            "progress",
            &SqlType::Real,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("stage", &SqlType::Text),
        sqlite_column!("started_at", &SqlType::Text),
        sqlite_column!("completed_at", &SqlType::Text),
        sqlite_column!("error_kind", &SqlType::Text),
        sqlite_column!("error_message", &SqlType::Text),
        sqlite_column!(
            "output_count",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
        sqlite_column!("updated_at", &SqlType::Text, non_null = true),
    ],
    indices: &[("idx_job_records_status", "status")],
    unique_constraints: &[],
};

const JOB_RECORDS_FK: ForeignKey = ForeignKey {
    foreign_table: "job_records",
    foreign_column: "id",
};

const TRANSCRIPT_SEGMENTS_TABLE_V1: Table = Table {
    name: "transcript_segments",
    columns: &[
        sqlite_column!(
            "job_id",
            &SqlType::Text,
            non_null = true,
            foreign_key = Some(&JOB_RECORDS_FK)
        ),
        sqlite_column!("segment_index", &SqlType::Integer, non_null = true),
        sqlite_column!("start_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("end_ms", &SqlType::Integer, non_null = true),
        sqlite_column!("text", &SqlType::Text, non_null = true),
    ],
    indices: &[],
    unique_constraints: &[&["job_id", "segment_index"]],
};

// =============================================================================
// Version 2 - Job audit log
// =============================================================================

const JOB_EVENTS_TABLE_V2: Table = Table {
    name: "job_events",
    columns: &[
        sqlite_column!("id", &SqlType::Integer, is_primary_key = true),
        sqlite_column!("job_id", &SqlType::Text, non_null = true),
        sqlite_column!("event_type", &SqlType::Text, non_null = true),
        sqlite_column!("timestamp", &SqlType::Text, non_null = true),
        sqlite_column!("duration_ms", &SqlType::Integer),
        sqlite_column!("details", &SqlType::Text),
        sqlite_column!("error", &SqlType::Text),
    ],
    indices: &[
        ("idx_job_events_job_id", "job_id"),
        ("idx_job_events_timestamp", "timestamp DESC"),
    ],
    unique_constraints: &[],
};

fn migrate_v1_to_v2(conn: &rusqlite::Connection) -> anyhow::Result<()> {
    JOB_EVENTS_TABLE_V2.create(conn)
}

/// All versioned schemas for the job database.
///
/// Version 1: job records and transcript segments
/// Version 2: job audit log
pub const JOB_VERSIONED_SCHEMAS: &[VersionedSchema] = &[
    VersionedSchema {
        version: 1,
        tables: &[JOB_RECORDS_TABLE_V1, TRANSCRIPT_SEGMENTS_TABLE_V1],
        migration: None,
    },
    VersionedSchema {
        version: 2,
        tables: &[
            JOB_RECORDS_TABLE_V1,
            TRANSCRIPT_SEGMENTS_TABLE_V1,
            JOB_EVENTS_TABLE_V2,
        ],
        migration: Some(migrate_v1_to_v2),
    },
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite_persistence::open_versioned;
    use rusqlite::Connection;
    use tempfile::TempDir;

    #[test]
    fn every_version_creates_and_validates() {
        for schema in JOB_VERSIONED_SCHEMAS {
            let conn = Connection::open_in_memory().unwrap();
            schema.create(&conn).unwrap();
            schema.validate(&conn).unwrap();
        }
    }

    #[test]
    fn v1_database_is_migrated_to_latest() {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("jobs.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            JOB_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        }

        let conn = open_versioned(&db_path, JOB_VERSIONED_SCHEMAS, "job").unwrap();
        JOB_VERSIONED_SCHEMAS.last().unwrap().validate(&conn).unwrap();
    }

    #[test]
    fn validation_rejects_missing_table_columns() {
        let conn = Connection::open_in_memory().unwrap();
        JOB_VERSIONED_SCHEMAS[0].create(&conn).unwrap();
        let err = JOB_VERSIONED_SCHEMAS[1].validate(&conn).unwrap_err();
        assert!(err.to_string().contains("job_events"));
    }
}
