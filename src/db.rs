use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::task_id::Mode;

#[derive(Debug, Clone, FromRow, serde::Serialize)]
pub struct PocRecord {
    pub poc_id: String,
    pub agent_id: String,
    pub task_id: String,
    pub poc_hash: String,
    pub poc_length: i64,
    pub vul_exit_code: Option<i64>,
    pub fix_exit_code: Option<i64>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PocRecord {
    pub fn exit_code_for(&self, mode: Mode) -> Option<i64> {
        match mode {
            Mode::Vul => self.vul_exit_code,
            Mode::Fix => self.fix_exit_code,
        }
    }
}

/// Persistent keyed records per (agent_id, task_id, poc_hash), backed by
/// a single-file SQLite database. The uniqueness index is the arbiter of
/// record identity under concurrent first-submissions; a process-wide
/// mutex serializes the write path since SQLite tolerates one writer at a
/// time, while reads go straight through the pool.
pub struct PocStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl PocStore {
    pub async fn connect(url: &str) -> Result<Self, AppError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(8)
            .connect(url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS poc_records (
                poc_id TEXT NOT NULL PRIMARY KEY,
                agent_id TEXT NOT NULL,
                task_id TEXT NOT NULL,
                poc_hash TEXT NOT NULL,
                poc_length INTEGER NOT NULL,
                vul_exit_code INTEGER,
                fix_exit_code INTEGER,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS idx_poc_triple
            ON poc_records(agent_id, task_id, poc_hash)
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Exact match on all three of (agent_id, task_id, poc_hash) — used by
    /// the submission coordinator's dedup lookup. More than one row here
    /// is a consistency violation (invariant I1).
    pub async fn get_by_triple(
        &self,
        agent_id: &str,
        task_id: &str,
        poc_hash: &str,
    ) -> Result<Vec<PocRecord>, AppError> {
        let records = sqlx::query_as::<_, PocRecord>(
            "SELECT * FROM poc_records WHERE agent_id = ? AND task_id = ? AND poc_hash = ?",
        )
        .bind(agent_id)
        .bind(task_id)
        .bind(poc_hash)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    /// Used by `/query-poc`: filters by whichever of `agent_id`/`task_id`
    /// are present, returning every PoC that matches.
    pub async fn get_by_query(
        &self,
        agent_id: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<Vec<PocRecord>, AppError> {
        let records = sqlx::query_as::<_, PocRecord>(
            r#"
            SELECT * FROM poc_records
            WHERE (?1 IS NULL OR agent_id = ?1)
              AND (?2 IS NULL OR task_id = ?2)
            ORDER BY created_at ASC
            "#,
        )
        .bind(agent_id)
        .bind(task_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(records)
    }

    pub async fn get_by_agent(&self, agent_id: &str) -> Result<Vec<PocRecord>, AppError> {
        self.get_by_query(Some(agent_id), None).await
    }

    /// Used by single-PoC re-verification. Exactly one record must exist
    /// for a given `poc_id`; zero or more than one is a server error.
    pub async fn get_by_poc_id(&self, poc_id: &str) -> Result<PocRecord, AppError> {
        let records =
            sqlx::query_as::<_, PocRecord>("SELECT * FROM poc_records WHERE poc_id = ?")
                .bind(poc_id)
                .fetch_all(&self.pool)
                .await?;

        if records.len() != 1 {
            return Err(AppError::PocIdCardinality(records.len()));
        }

        Ok(records.into_iter().next().unwrap())
    }

    /// Idempotent insert: if a record with the same (agent_id, task_id,
    /// poc_hash) already exists, it is returned unchanged; otherwise a
    /// fresh row is inserted with the given `poc_id`. The write lock plus
    /// the unique index together ensure concurrent first-submissions with
    /// identical content resolve to a single row.
    pub async fn get_or_create(
        &self,
        agent_id: &str,
        task_id: &str,
        poc_id: &str,
        poc_hash: &str,
        poc_length: i64,
    ) -> Result<PocRecord, AppError> {
        let _guard = self.write_lock.lock().await;

        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT OR IGNORE INTO poc_records
                (poc_id, agent_id, task_id, poc_hash, poc_length, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(poc_id)
        .bind(agent_id)
        .bind(task_id)
        .bind(poc_hash)
        .bind(poc_length)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        let records = self.get_by_triple(agent_id, task_id, poc_hash).await?;
        if records.len() != 1 {
            return Err(AppError::DuplicateRecords);
        }

        Ok(records.into_iter().next().unwrap())
    }

    pub async fn update_exit_code(
        &self,
        poc_id: &str,
        mode: Mode,
        exit_code: i64,
    ) -> Result<(), AppError> {
        let _guard = self.write_lock.lock().await;

        let column = match mode {
            Mode::Vul => "vul_exit_code",
            Mode::Fix => "fix_exit_code",
        };

        let sql = format!(
            "UPDATE poc_records SET {column} = ?, updated_at = ? WHERE poc_id = ?"
        );

        sqlx::query(&sql)
            .bind(exit_code)
            .bind(Utc::now())
            .bind(poc_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn in_memory_store() -> PocStore {
        PocStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent() {
        let store = in_memory_store().await;
        let first = store
            .get_or_create("agent", "arvo:1", "poc-id-1", "hash-1", 10)
            .await
            .unwrap();
        let second = store
            .get_or_create("agent", "arvo:1", "poc-id-2", "hash-1", 10)
            .await
            .unwrap();

        assert_eq!(first.poc_id, second.poc_id);
        assert_eq!(first.poc_id, "poc-id-1");
    }

    #[tokio::test]
    async fn update_exit_code_sets_only_that_mode() {
        let store = in_memory_store().await;
        store
            .get_or_create("agent", "arvo:1", "poc-id-1", "hash-1", 10)
            .await
            .unwrap();

        store
            .update_exit_code("poc-id-1", Mode::Vul, 1)
            .await
            .unwrap();

        let record = store.get_by_poc_id("poc-id-1").await.unwrap();
        assert_eq!(record.vul_exit_code, Some(1));
        assert_eq!(record.fix_exit_code, None);
    }

    #[tokio::test]
    async fn get_by_poc_id_errors_when_absent() {
        let store = in_memory_store().await;
        assert!(matches!(
            store.get_by_poc_id("missing").await,
            Err(AppError::PocIdCardinality(0))
        ));
    }

    #[tokio::test]
    async fn get_by_agent_returns_insertion_order() {
        let store = in_memory_store().await;
        store
            .get_or_create("agent", "arvo:1", "poc-1", "hash-1", 1)
            .await
            .unwrap();
        store
            .get_or_create("agent", "arvo:2", "poc-2", "hash-2", 1)
            .await
            .unwrap();

        let records = store.get_by_agent("agent").await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].poc_id, "poc-1");
        assert_eq!(records[1].poc_id, "poc-2");
    }
}
