use std::sync::Mutex;

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, instrument};

use crate::db::init_db;
use crate::error::{Result, StoreError};
use crate::types::{ScheduledJobParameter, ScheduledJobRecord};

/// CRUD over scheduled job records.
///
/// Implementations only persist; informing the scheduler about a mutation is
/// the caller's responsibility (see `ScheduledJobService` in
/// `hourglass-scheduler`).
pub trait ScheduledJobStore: Send + Sync {
    /// Persist a new record and return it with `id` and dates filled in.
    fn insert(&self, record: &ScheduledJobRecord) -> Result<ScheduledJobRecord>;

    /// Overwrite an existing record, parameters included.
    fn update(&self, record: &ScheduledJobRecord) -> Result<ScheduledJobRecord>;

    /// Delete a record and its parameters. `NotFound` if no row matched.
    fn delete(&self, id: i64) -> Result<()>;

    fn get(&self, id: i64) -> Result<Option<ScheduledJobRecord>>;

    /// All records ordered by id.
    fn list(&self) -> Result<Vec<ScheduledJobRecord>>;

    /// Active records ordered by id.
    fn list_active(&self) -> Result<Vec<ScheduledJobRecord>>;

    /// Records created by a record-sync bridge for one source row.
    fn find_by_foreign_key(&self, key_type: &str, key_value: &str)
        -> Result<Vec<ScheduledJobRecord>>;
}

const SELECT_JOB: &str = "SELECT id, label, description, is_active, scheduler_name, job_type,
        repeat_seconds, cron_expression, foreign_key_type, foreign_key_value,
        create_date, modify_date
     FROM scheduled_job";

/// SQLite-backed store.
///
/// Wraps a single connection in a `Mutex`, same as the rest of the
/// workspace's SQLite stores; the scheduled job table is small and writes are
/// rare.
pub struct SqliteScheduledJobStore {
    db: Mutex<Connection>,
}

impl SqliteScheduledJobStore {
    /// Wrap an open connection, creating the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            db: Mutex::new(conn),
        })
    }

    /// Fresh in-memory database; used by tests and `check` runs.
    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }

    fn query_jobs(
        &self,
        where_clause: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> Result<Vec<ScheduledJobRecord>> {
        let db = self.db.lock().expect("scheduled job store poisoned");
        let sql = format!("{SELECT_JOB} {where_clause} ORDER BY id");
        let mut stmt = db.prepare(&sql)?;
        let mut jobs: Vec<ScheduledJobRecord> = stmt
            .query_map(params, row_to_job)?
            .collect::<rusqlite::Result<_>>()?;
        for job in &mut jobs {
            if let Some(id) = job.id {
                job.job_parameters = load_parameters(&db, id)?;
            }
        }
        Ok(jobs)
    }
}

impl ScheduledJobStore for SqliteScheduledJobStore {
    #[instrument(skip(self, record), fields(label = ?record.label))]
    fn insert(&self, record: &ScheduledJobRecord) -> Result<ScheduledJobRecord> {
        record.check_parameters()?;
        let repeat_seconds = repeat_seconds_column(record)?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut db = self.db.lock().expect("scheduled job store poisoned");
        let tx = db.transaction()?;
        tx.execute(
            "INSERT INTO scheduled_job
             (label, description, is_active, scheduler_name, job_type, repeat_seconds,
              cron_expression, foreign_key_type, foreign_key_value, create_date, modify_date)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?10)",
            rusqlite::params![
                record.label,
                record.description,
                record.is_active,
                record.scheduler_name,
                record.job_type,
                repeat_seconds,
                record.cron_expression,
                record.foreign_key_type,
                record.foreign_key_value,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        write_parameters(&tx, id, &record.job_parameters)?;
        tx.commit()?;

        debug!(id, "scheduled job inserted");
        let mut saved = record.clone();
        saved.id = Some(id);
        saved.create_date = Some(now.clone());
        saved.modify_date = Some(now);
        Ok(saved)
    }

    #[instrument(skip(self, record), fields(id = ?record.id))]
    fn update(&self, record: &ScheduledJobRecord) -> Result<ScheduledJobRecord> {
        let id = record
            .id
            .ok_or_else(|| StoreError::InvalidRecord("update requires an id".to_string()))?;
        record.check_parameters()?;
        let repeat_seconds = repeat_seconds_column(record)?;
        let now = chrono::Utc::now().to_rfc3339();

        let mut db = self.db.lock().expect("scheduled job store poisoned");
        let tx = db.transaction()?;
        let rows_changed = tx.execute(
            "UPDATE scheduled_job
             SET label = ?1, description = ?2, is_active = ?3, scheduler_name = ?4,
                 job_type = ?5, repeat_seconds = ?6, cron_expression = ?7,
                 foreign_key_type = ?8, foreign_key_value = ?9, modify_date = ?10
             WHERE id = ?11",
            rusqlite::params![
                record.label,
                record.description,
                record.is_active,
                record.scheduler_name,
                record.job_type,
                repeat_seconds,
                record.cron_expression,
                record.foreign_key_type,
                record.foreign_key_value,
                now,
                id,
            ],
        )?;
        if rows_changed == 0 {
            return Err(StoreError::NotFound { id });
        }
        tx.execute(
            "DELETE FROM scheduled_job_parameter WHERE scheduled_job_id = ?1",
            [id],
        )?;
        write_parameters(&tx, id, &record.job_parameters)?;
        let create_date: String = tx.query_row(
            "SELECT create_date FROM scheduled_job WHERE id = ?1",
            [id],
            |row| row.get(0),
        )?;
        tx.commit()?;

        debug!(id, "scheduled job updated");
        let mut saved = record.clone();
        saved.create_date = Some(create_date);
        saved.modify_date = Some(now);
        Ok(saved)
    }

    #[instrument(skip(self))]
    fn delete(&self, id: i64) -> Result<()> {
        let mut db = self.db.lock().expect("scheduled job store poisoned");
        let tx = db.transaction()?;
        // Explicit so the cascade does not depend on PRAGMA foreign_keys.
        tx.execute(
            "DELETE FROM scheduled_job_parameter WHERE scheduled_job_id = ?1",
            [id],
        )?;
        let rows_changed = tx.execute("DELETE FROM scheduled_job WHERE id = ?1", [id])?;
        if rows_changed == 0 {
            return Err(StoreError::NotFound { id });
        }
        tx.commit()?;
        debug!(id, "scheduled job deleted");
        Ok(())
    }

    #[instrument(skip(self))]
    fn get(&self, id: i64) -> Result<Option<ScheduledJobRecord>> {
        let db = self.db.lock().expect("scheduled job store poisoned");
        let sql = format!("{SELECT_JOB} WHERE id = ?1");
        let job = db.query_row(&sql, [id], row_to_job).optional()?;
        match job {
            Some(mut job) => {
                job.job_parameters = load_parameters(&db, id)?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    fn list(&self) -> Result<Vec<ScheduledJobRecord>> {
        self.query_jobs("", &[])
    }

    fn list_active(&self) -> Result<Vec<ScheduledJobRecord>> {
        self.query_jobs("WHERE is_active = 1", &[])
    }

    #[instrument(skip(self))]
    fn find_by_foreign_key(
        &self,
        key_type: &str,
        key_value: &str,
    ) -> Result<Vec<ScheduledJobRecord>> {
        self.query_jobs(
            "WHERE foreign_key_type = ?1 AND foreign_key_value = ?2",
            &[&key_type, &key_value],
        )
    }
}

fn write_parameters(
    conn: &Connection,
    job_id: i64,
    parameters: &[ScheduledJobParameter],
) -> Result<()> {
    let mut stmt = conn.prepare_cached(
        "INSERT INTO scheduled_job_parameter (scheduled_job_id, seq, key, value)
         VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (seq, p) in parameters.iter().enumerate() {
        stmt.execute(rusqlite::params![job_id, seq as i64, p.key, p.value])?;
    }
    Ok(())
}

fn load_parameters(conn: &Connection, job_id: i64) -> Result<Vec<ScheduledJobParameter>> {
    let mut stmt = conn.prepare_cached(
        "SELECT key, value FROM scheduled_job_parameter
         WHERE scheduled_job_id = ?1 ORDER BY seq",
    )?;
    let rows = stmt.query_map([job_id], |row| {
        Ok(ScheduledJobParameter {
            key: row.get(0)?,
            value: row.get(1)?,
        })
    })?;
    Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
}

/// SQLite integers are signed; larger intervals are refused, not wrapped.
fn repeat_seconds_column(record: &ScheduledJobRecord) -> Result<Option<i64>> {
    record
        .repeat_seconds
        .map(|s| {
            i64::try_from(s).map_err(|_| {
                StoreError::InvalidRecord(format!("repeat_seconds {s} is out of range"))
            })
        })
        .transpose()
}

/// Map a SQLite row to a record without its parameters.
fn row_to_job(row: &rusqlite::Row<'_>) -> rusqlite::Result<ScheduledJobRecord> {
    Ok(ScheduledJobRecord {
        id: Some(row.get(0)?),
        label: row.get(1)?,
        description: row.get(2)?,
        is_active: row.get(3)?,
        scheduler_name: row.get(4)?,
        job_type: row.get(5)?,
        repeat_seconds: row
            .get::<_, Option<i64>>(6)?
            .map(|s| {
                u64::try_from(s).map_err(|e| {
                    rusqlite::Error::FromSqlConversionFailure(6, rusqlite::types::Type::Integer, Box::new(e))
                })
            })
            .transpose()?,
        cron_expression: row.get(7)?,
        foreign_key_type: row.get(8)?,
        foreign_key_value: row.get(9)?,
        job_parameters: Vec::new(),
        create_date: row.get(10)?,
        modify_date: row.get(11)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{params, ScheduledJobType};

    fn store() -> SqliteScheduledJobStore {
        SqliteScheduledJobStore::open_in_memory().expect("open store")
    }

    fn process_job() -> ScheduledJobRecord {
        ScheduledJobRecord::new()
            .with_label("nightly")
            .with_scheduler_name("SIMPLE")
            .with_type(ScheduledJobType::Process)
            .with_repeat_seconds(60)
            .with_parameter(params::PROCESS_NAME, "cleanup")
            .with_parameter("zeta", "last")
            .with_parameter("alpha", "after zeta")
    }

    #[test]
    fn insert_assigns_id_and_round_trips_parameters_in_order() {
        let store = store();
        let saved = store.insert(&process_job()).unwrap();
        let id = saved.id.expect("id assigned");
        assert!(saved.create_date.is_some());

        let loaded = store.get(id).unwrap().expect("row exists");
        assert_eq!(loaded.label.as_deref(), Some("nightly"));
        assert_eq!(loaded.repeat_seconds, Some(60));
        let keys: Vec<_> = loaded.job_parameters.iter().map(|p| p.key.as_str()).collect();
        assert_eq!(keys, vec![params::PROCESS_NAME, "zeta", "alpha"]);
    }

    #[test]
    fn update_replaces_parameters_and_keeps_create_date() {
        let store = store();
        let saved = store.insert(&process_job()).unwrap();

        let mut changed = saved.clone();
        changed.repeat_seconds = Some(61);
        changed.remove_parameter("zeta");
        let updated = store.update(&changed).unwrap();
        assert_eq!(updated.create_date, saved.create_date);

        let loaded = store.get(saved.id.unwrap()).unwrap().unwrap();
        assert_eq!(loaded.repeat_seconds, Some(61));
        assert_eq!(loaded.job_parameters.len(), 2);
        assert!(loaded.parameter("zeta").is_none());
    }

    #[test]
    fn update_without_id_is_rejected() {
        let store = store();
        assert!(matches!(
            store.update(&process_job()),
            Err(StoreError::InvalidRecord(_))
        ));
    }

    #[test]
    fn update_unknown_id_is_not_found() {
        let store = store();
        let job = process_job().with_id(999);
        assert!(matches!(store.update(&job), Err(StoreError::NotFound { id: 999 })));
    }

    #[test]
    fn delete_removes_row_and_parameters() {
        let store = store();
        let id = store.insert(&process_job()).unwrap().id.unwrap();
        store.delete(id).unwrap();
        assert!(store.get(id).unwrap().is_none());
        assert!(matches!(store.delete(id), Err(StoreError::NotFound { .. })));

        let db = store.db.lock().unwrap();
        let orphans: i64 = db
            .query_row("SELECT COUNT(*) FROM scheduled_job_parameter", [], |r| r.get(0))
            .unwrap();
        assert_eq!(orphans, 0);
    }

    #[test]
    fn list_active_skips_inactive_rows() {
        let store = store();
        store.insert(&process_job()).unwrap();
        store.insert(&process_job().with_active(false)).unwrap();
        assert_eq!(store.list().unwrap().len(), 2);
        let active = store.list_active().unwrap();
        assert_eq!(active.len(), 1);
        assert!(active[0].is_active);
    }

    #[test]
    fn find_by_foreign_key_matches_type_and_value() {
        let store = store();
        store
            .insert(&process_job().with_foreign_key("campaign", "1"))
            .unwrap();
        store
            .insert(&process_job().with_foreign_key("campaign", "2"))
            .unwrap();
        store
            .insert(&process_job().with_foreign_key("report", "1"))
            .unwrap();

        let found = store.find_by_foreign_key("campaign", "1").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].foreign_key_value.as_deref(), Some("1"));
        assert_eq!(found[0].parameter(params::PROCESS_NAME), Some("cleanup"));
    }

    #[test]
    fn duplicate_parameter_keys_are_rejected_on_insert() {
        let store = store();
        let mut job = process_job();
        job.job_parameters
            .push(ScheduledJobParameter::new(params::PROCESS_NAME, "again"));
        assert!(matches!(
            store.insert(&job),
            Err(StoreError::DuplicateParameter { .. })
        ));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn repeat_seconds_outside_sqlite_range_are_refused() {
        let store = store();
        let huge = process_job().with_repeat_seconds(u64::MAX);
        assert!(matches!(store.insert(&huge), Err(StoreError::InvalidRecord(_))));
        assert!(store.list().unwrap().is_empty());

        let saved = store.insert(&process_job()).unwrap();
        assert!(matches!(
            store.update(&saved.clone().with_repeat_seconds(u64::MAX)),
            Err(StoreError::InvalidRecord(_))
        ));
        let id = saved.id.unwrap();
        assert_eq!(store.get(id).unwrap().unwrap().repeat_seconds, Some(60));

        store
            .db
            .lock()
            .unwrap()
            .execute("UPDATE scheduled_job SET repeat_seconds = -5 WHERE id = ?1", [id])
            .unwrap();
        assert!(matches!(store.get(id), Err(StoreError::Database(_))));
    }
}
