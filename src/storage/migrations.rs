//! Database schema for the memory core.

use rusqlite::Connection;

use crate::error::Result;

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Run all migrations up to [`SCHEMA_VERSION`], tracked in a
/// `schema_version` table so repeated calls on an already-migrated
/// connection are no-ops.
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

fn migrate_v1(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Long-term memory records (C4). Immutable once persisted_at is set,
        -- except for the enrichment-owned columns.
        CREATE TABLE IF NOT EXISTS records (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            text TEXT NOT NULL,
            memory_type TEXT NOT NULL,
            namespace TEXT,
            user_id TEXT,
            session_id TEXT,
            event_date TEXT,
            created_at TEXT NOT NULL,
            last_accessed_at TEXT,
            access_count INTEGER NOT NULL DEFAULT 0,
            persisted_at TEXT,
            hash TEXT NOT NULL,
            vector BLOB,
            vector_dim INTEGER,
            superseded_by INTEGER REFERENCES records(id),
            discrete_source_ids TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_records_hash ON records(hash);
        CREATE INDEX IF NOT EXISTS idx_records_scope
            ON records(namespace, user_id, session_id);
        CREATE INDEX IF NOT EXISTS idx_records_superseded_by ON records(superseded_by);
        CREATE INDEX IF NOT EXISTS idx_records_last_accessed ON records(last_accessed_at);

        -- Enrichment-owned set fields, normalized for index scans (§4.1 secondary indexes).
        CREATE TABLE IF NOT EXISTS record_topics (
            record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
            value TEXT NOT NULL,
            PRIMARY KEY (record_id, value)
        );
        CREATE INDEX IF NOT EXISTS idx_record_topics_value ON record_topics(value);

        CREATE TABLE IF NOT EXISTS record_entities (
            record_id INTEGER NOT NULL REFERENCES records(id) ON DELETE CASCADE,
            value TEXT NOT NULL,
            PRIMARY KEY (record_id, value)
        );
        CREATE INDEX IF NOT EXISTS idx_record_entities_value ON record_entities(value);

        -- Working memory (C3), keyed by the C1 working-memory key.
        CREATE TABLE IF NOT EXISTS working_memory (
            key TEXT PRIMARY KEY,
            session_id TEXT NOT NULL,
            user_id TEXT,
            namespace TEXT,
            context TEXT,
            data TEXT NOT NULL DEFAULT '{}',
            strategy TEXT NOT NULL DEFAULT '{"kind":"discrete"}',
            ttl_seconds INTEGER NOT NULL,
            tokens_estimate INTEGER NOT NULL DEFAULT 0,
            last_accessed_at TEXT NOT NULL,
            promotion_watermark TEXT,
            summarization_epoch INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS working_memory_messages (
            wm_key TEXT NOT NULL REFERENCES working_memory(key) ON DELETE CASCADE,
            id TEXT NOT NULL,
            role TEXT NOT NULL,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL,
            PRIMARY KEY (wm_key, id)
        );

        CREATE TABLE IF NOT EXISTS working_memory_staged (
            wm_key TEXT NOT NULL REFERENCES working_memory(key) ON DELETE CASCADE,
            seq INTEGER NOT NULL,
            record TEXT NOT NULL,
            PRIMARY KEY (wm_key, seq)
        );

        -- Background task runtime (C6): durable at-least-once queue with
        -- at-most-one-in-flight per fingerprint.
        CREATE TABLE IF NOT EXISTS tasks (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            task_name TEXT NOT NULL,
            args TEXT NOT NULL,
            fingerprint TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            attempts INTEGER NOT NULL DEFAULT 0,
            scheduled_at TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP,
            last_error TEXT,
            UNIQUE(fingerprint, status) ON CONFLICT IGNORE
        );
        CREATE INDEX IF NOT EXISTS idx_tasks_scheduled ON tasks(status, scheduled_at);

        CREATE TABLE IF NOT EXISTS periodic_tasks (
            task_name TEXT PRIMARY KEY,
            interval_seconds INTEGER NOT NULL,
            last_run_at TEXT
        );

        -- Monotonic id allocation for long-term records, independent of
        -- records.id's AUTOINCREMENT so C4 owns id assignment per §4.4.
        CREATE TABLE IF NOT EXISTS id_sequence (
            name TEXT PRIMARY KEY,
            value INTEGER NOT NULL
        );
        INSERT OR IGNORE INTO id_sequence (name, value) VALUES ('records', 0);
        "#,
    )?;

    conn.execute(
        "INSERT INTO schema_version (version) VALUES (1)",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let count: i32 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn records_table_exists() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn.execute("SELECT id FROM records LIMIT 0", []).unwrap();
    }
}
