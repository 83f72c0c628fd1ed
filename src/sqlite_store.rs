use std::collections::BTreeSet;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Context;
use async_trait::async_trait;
use log::debug;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Type, ValueRef};
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use rust_decimal::Decimal;

use crate::error::StorageError;
use crate::repository::{TaskCatalog, TimeEntryRepository};
use crate::settings::TimeTrackingSettings;
use crate::time_entry::{
    BillableRate, EntrySource, Task, TimeEntry, TimeEntryFilter, TimeEntryPage,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS tasks (
    id TEXT PRIMARY KEY,
    project_id TEXT NOT NULL REFERENCES projects(id),
    name TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS billable_rates (
    user_id TEXT NOT NULL,
    project_id TEXT NOT NULL REFERENCES projects(id),
    hourly_rate TEXT NOT NULL,
    currency TEXT NOT NULL,
    PRIMARY KEY (user_id, project_id)
);
CREATE TABLE IF NOT EXISTS time_entries (
    id TEXT PRIMARY KEY,
    task_id TEXT NOT NULL,
    project_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    description TEXT,
    start_time TEXT NOT NULL,
    end_time TEXT,
    duration INTEGER NOT NULL CHECK (duration >= 0),
    billable INTEGER NOT NULL,
    billable_rate TEXT,
    invoice_id TEXT,
    tags TEXT NOT NULL,
    source TEXT NOT NULL,
    version INTEGER NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE UNIQUE INDEX IF NOT EXISTS idx_time_entries_running
    ON time_entries (user_id) WHERE end_time IS NULL;
CREATE INDEX IF NOT EXISTS idx_time_entries_user_start
    ON time_entries (user_id, start_time);
CREATE TABLE IF NOT EXISTS time_tracking_settings (
    user_id TEXT PRIMARY KEY,
    settings TEXT NOT NULL
);
"#;

const ENTRY_COLUMNS: &str = "id, task_id, project_id, user_id, description, start_time, end_time, \
     duration, billable, billable_rate, invoice_id, tags, source, version, created_at, updated_at";

// ?2以降が NULL の条件は無視する
const ENTRY_FILTER: &str = "user_id = ?1 \
     AND (?2 IS NULL OR project_id = ?2) \
     AND (?3 IS NULL OR task_id = ?3) \
     AND (?4 IS NULL OR start_time >= ?4) \
     AND (?5 IS NULL OR start_time < ?5) \
     AND (?6 IS NULL OR billable = ?6)";

/// SQLiteにtime entryを保存するストア。
///
/// `Clone`しても同じ接続を共有する。
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    /// データベースファイルを開き、スキーマを作成する。
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open database: {}", path.display()))?;
        Self::from_connection(conn)
    }

    /// メモリ上のデータベースを開く。
    pub fn open_in_memory() -> anyhow::Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory database")?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> anyhow::Result<Self> {
        conn.execute_batch(SCHEMA)
            .context("Failed to initialize database schema")?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StorageError> {
        self.conn
            .lock()
            .map_err(|_| StorageError::Rejected("database connection lock poisoned".to_string()))
    }

    /// プロジェクトを登録する。既にあれば名前を更新する。
    pub fn upsert_project(&self, id: &str, name: &str) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO projects (id, name) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET name = excluded.name",
            params![id, name],
        )?;
        Ok(())
    }

    /// タスクを登録する。既にあればプロジェクトと名前を更新する。
    pub fn upsert_task(&self, task: &Task) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO tasks (id, project_id, name) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET project_id = excluded.project_id, name = excluded.name",
            params![task.id, task.project_id, task.name],
        )?;
        Ok(())
    }

    /// ユーザー・プロジェクトの時間単価を設定する。
    pub fn set_billable_rate(&self, rate: &BillableRate) -> Result<(), StorageError> {
        self.lock()?.execute(
            "INSERT INTO billable_rates (user_id, project_id, hourly_rate, currency)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(user_id, project_id)
             DO UPDATE SET hourly_rate = excluded.hourly_rate, currency = excluded.currency",
            params![
                rate.user_id,
                rate.project_id,
                rate.hourly_rate.to_string(),
                rate.currency
            ],
        )?;
        Ok(())
    }
}

// ロック待ちとI/Oの失敗だけを一時的な失敗として扱う
impl From<rusqlite::Error> for StorageError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::SystemIoFailure
                | ErrorCode::CannotOpen
                | ErrorCode::OutOfMemory,
            ) => StorageError::Unavailable(err.to_string()),
            _ => StorageError::Rejected(err.to_string()),
        }
    }
}

fn is_unique_violation(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

impl ToSql for EntrySource {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for EntrySource {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "timer" => Ok(EntrySource::Timer),
            "manual" => Ok(EntrySource::Manual),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

fn conversion_error<E>(index: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err))
}

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<TimeEntry> {
    let billable_rate = row
        .get::<_, Option<String>>(9)?
        .map(|raw| raw.parse::<Decimal>())
        .transpose()
        .map_err(|err| conversion_error(9, err))?;
    let tags: BTreeSet<String> = serde_json::from_str(&row.get::<_, String>(11)?)
        .map_err(|err| conversion_error(11, err))?;

    Ok(TimeEntry {
        id: row.get(0)?,
        task_id: row.get(1)?,
        project_id: row.get(2)?,
        user_id: row.get(3)?,
        description: row.get(4)?,
        start_time: row.get(5)?,
        end_time: row.get(6)?,
        duration: row.get(7)?,
        billable: row.get(8)?,
        billable_rate,
        invoice_id: row.get(10)?,
        tags,
        source: row.get(12)?,
        version: row.get(13)?,
        created_at: row.get(14)?,
        updated_at: row.get(15)?,
    })
}

fn encode_tags(tags: &BTreeSet<String>) -> Result<String, StorageError> {
    serde_json::to_string(tags).map_err(|err| StorageError::Rejected(err.to_string()))
}

fn select_entry(conn: &Connection, id: &str) -> rusqlite::Result<Option<TimeEntry>> {
    conn.query_row(
        &format!("SELECT {} FROM time_entries WHERE id = ?1", ENTRY_COLUMNS),
        params![id],
        entry_from_row,
    )
    .optional()
}

#[async_trait]
impl TimeEntryRepository for SqliteStore {
    async fn get_time_entry(&self, id: &str) -> Result<Option<TimeEntry>, StorageError> {
        let conn = self.lock()?;
        Ok(select_entry(&conn, id)?)
    }

    async fn create_time_entry(&self, entry: TimeEntry) -> Result<TimeEntry, StorageError> {
        let tags = encode_tags(&entry.tags)?;
        let conn = self.lock()?;
        let inserted = conn.execute(
            &format!(
                "INSERT INTO time_entries ({}) VALUES \
                 (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
                ENTRY_COLUMNS
            ),
            params![
                entry.id,
                entry.task_id,
                entry.project_id,
                entry.user_id,
                entry.description,
                entry.start_time,
                entry.end_time,
                entry.duration,
                entry.billable,
                entry.billable_rate.map(|rate| rate.to_string()),
                entry.invoice_id,
                tags,
                entry.source,
                entry.version,
                entry.created_at,
                entry.updated_at,
            ],
        );

        match inserted {
            Ok(_) => {}
            // 主キーはUUIDなので、一意制約違反は動作中タイマーの部分ユニークインデックスによるもの
            Err(err) if is_unique_violation(&err) && entry.end_time.is_none() => {
                return Err(StorageError::ActiveTimerExists);
            }
            Err(err) => return Err(err.into()),
        }
        debug!("created time entry {} for user {}", entry.id, entry.user_id);

        select_entry(&conn, &entry.id)?.ok_or(StorageError::NotFound)
    }

    async fn update_time_entry(
        &self,
        entry: TimeEntry,
        expected_version: i64,
    ) -> Result<TimeEntry, StorageError> {
        let tags = encode_tags(&entry.tags)?;
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let actual: Option<i64> = tx
            .query_row(
                "SELECT version FROM time_entries WHERE id = ?1",
                params![entry.id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(actual) = actual else {
            return Err(StorageError::NotFound);
        };
        if actual != expected_version {
            return Err(StorageError::VersionMismatch {
                expected: expected_version,
                actual,
            });
        }

        let updated = tx.execute(
            "UPDATE time_entries
             SET task_id = ?3,
                 project_id = ?4,
                 description = ?5,
                 start_time = ?6,
                 end_time = ?7,
                 duration = ?8,
                 billable = ?9,
                 billable_rate = ?10,
                 invoice_id = ?11,
                 tags = ?12,
                 version = ?2 + 1,
                 updated_at = ?13
             WHERE id = ?1 AND version = ?2",
            params![
                entry.id,
                expected_version,
                entry.task_id,
                entry.project_id,
                entry.description,
                entry.start_time,
                entry.end_time,
                entry.duration,
                entry.billable,
                entry.billable_rate.map(|rate| rate.to_string()),
                entry.invoice_id,
                tags,
                entry.updated_at,
            ],
        );
        match updated {
            Ok(1) => {}
            Ok(_) => return Err(StorageError::NotFound),
            Err(err) if is_unique_violation(&err) && entry.end_time.is_none() => {
                return Err(StorageError::ActiveTimerExists);
            }
            Err(err) => return Err(err.into()),
        }

        let stored = select_entry(&tx, &entry.id)?.ok_or(StorageError::NotFound)?;
        tx.commit()?;
        debug!("updated time entry {} to version {}", stored.id, stored.version);

        Ok(stored)
    }

    async fn delete_time_entry(&self, id: &str) -> Result<(), StorageError> {
        let deleted = self.lock()?.execute(
            "DELETE FROM time_entries WHERE id = ?1 AND invoice_id IS NULL",
            params![id],
        )?;
        if deleted == 0 {
            return Err(StorageError::NotFound);
        }

        Ok(())
    }

    async fn list_time_entries(
        &self,
        user_id: &str,
        filter: &TimeEntryFilter,
    ) -> Result<TimeEntryPage, StorageError> {
        let conn = self.lock()?;
        let page = filter.page.max(1);
        let limit = filter.limit.max(1);
        let offset = (u64::from(page) - 1) * u64::from(limit);

        let total: i64 = conn.query_row(
            &format!("SELECT COUNT(*) FROM time_entries WHERE {}", ENTRY_FILTER),
            params![
                user_id,
                filter.project_id,
                filter.task_id,
                filter.start_date,
                filter.end_date,
                filter.billable,
            ],
            |row| row.get(0),
        )?;

        let mut statement = conn.prepare(&format!(
            "SELECT {} FROM time_entries WHERE {} ORDER BY start_time DESC, id LIMIT ?7 OFFSET ?8",
            ENTRY_COLUMNS, ENTRY_FILTER
        ))?;
        let entries = statement
            .query_map(
                params![
                    user_id,
                    filter.project_id,
                    filter.task_id,
                    filter.start_date,
                    filter.end_date,
                    filter.billable,
                    i64::from(limit),
                    offset as i64,
                ],
                entry_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(TimeEntryPage {
            entries,
            total: total.max(0) as u64,
            page,
            limit,
        })
    }

    async fn get_current_timer(&self, user_id: &str) -> Result<Option<TimeEntry>, StorageError> {
        let conn = self.lock()?;
        let entry = conn
            .query_row(
                &format!(
                    "SELECT {} FROM time_entries WHERE user_id = ?1 AND end_time IS NULL",
                    ENTRY_COLUMNS
                ),
                params![user_id],
                entry_from_row,
            )
            .optional()?;

        Ok(entry)
    }

    async fn get_settings(
        &self,
        user_id: &str,
    ) -> Result<Option<TimeTrackingSettings>, StorageError> {
        let raw: Option<String> = self
            .lock()?
            .query_row(
                "SELECT settings FROM time_tracking_settings WHERE user_id = ?1",
                params![user_id],
                |row| row.get(0),
            )
            .optional()?;

        raw.map(|raw| serde_json::from_str(&raw))
            .transpose()
            .map_err(|err| StorageError::Rejected(err.to_string()))
    }

    async fn save_settings(
        &self,
        settings: TimeTrackingSettings,
    ) -> Result<TimeTrackingSettings, StorageError> {
        let raw = serde_json::to_string(&settings)
            .map_err(|err| StorageError::Rejected(err.to_string()))?;
        self.lock()?.execute(
            "INSERT INTO time_tracking_settings (user_id, settings) VALUES (?1, ?2)
             ON CONFLICT(user_id) DO UPDATE SET settings = excluded.settings",
            params![settings.user_id, raw],
        )?;

        Ok(settings)
    }

    async fn get_billable_rate(
        &self,
        user_id: &str,
        project_id: &str,
    ) -> Result<Option<BillableRate>, StorageError> {
        let row: Option<(String, String)> = self
            .lock()?
            .query_row(
                "SELECT hourly_rate, currency FROM billable_rates
                 WHERE user_id = ?1 AND project_id = ?2",
                params![user_id, project_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        row.map(|(hourly_rate, currency)| {
            let hourly_rate = hourly_rate
                .parse::<Decimal>()
                .map_err(|err| StorageError::Rejected(err.to_string()))?;
            Ok(BillableRate {
                user_id: user_id.to_string(),
                project_id: project_id.to_string(),
                hourly_rate,
                currency,
            })
        })
        .transpose()
    }
}

#[async_trait]
impl TaskCatalog for SqliteStore {
    async fn get_task(&self, task_id: &str) -> Result<Option<Task>, StorageError> {
        let task = self
            .lock()?
            .query_row(
                "SELECT id, project_id, name FROM tasks WHERE id = ?1",
                params![task_id],
                |row| {
                    Ok(Task {
                        id: row.get(0)?,
                        project_id: row.get(1)?,
                        name: row.get(2)?,
                    })
                },
            )
            .optional()?;

        Ok(task)
    }
}
