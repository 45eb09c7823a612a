use rusqlite::Connection;

use crate::error::Result;

/// Initialise the scheduled job tables and their indexes.
///
/// Safe to call on every startup; uses `IF NOT EXISTS` throughout.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS scheduled_job (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            label             TEXT,
            description       TEXT,
            is_active         INTEGER NOT NULL DEFAULT 1,
            scheduler_name    TEXT,
            job_type          TEXT,
            repeat_seconds    INTEGER,
            cron_expression   TEXT,
            foreign_key_type  TEXT,
            foreign_key_value TEXT,
            create_date       TEXT NOT NULL,
            modify_date       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_scheduled_job_foreign_key
            ON scheduled_job(foreign_key_type, foreign_key_value);
        CREATE INDEX IF NOT EXISTS idx_scheduled_job_active
            ON scheduled_job(is_active);

        CREATE TABLE IF NOT EXISTS scheduled_job_parameter (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            scheduled_job_id INTEGER NOT NULL
                REFERENCES scheduled_job(id) ON DELETE CASCADE,
            seq              INTEGER NOT NULL,  -- preserves declaration order
            key              TEXT NOT NULL,
            value            TEXT NOT NULL,
            UNIQUE (scheduled_job_id, key)
        );",
    )?;
    Ok(())
}
