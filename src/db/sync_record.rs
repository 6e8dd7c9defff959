use chrono::{DateTime, Duration, Utc};
use sqlx::SqlitePool;

/// Last successful refresh instant for one reference table.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct SyncRecord {
    pub table_name: String,
    pub last_synced_at: String,
}

pub struct SyncRecordStore {
    pool: SqlitePool,
}

impl SyncRecordStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, table_name: &str) -> Result<Option<SyncRecord>, sqlx::Error> {
        sqlx::query_as(
            "SELECT table_name, last_synced_at FROM sync_records WHERE table_name = ?",
        )
        .bind(table_name)
        .fetch_optional(&self.pool)
        .await
    }

    /// Stamps the table as refreshed right now.
    pub async fn touch(&self, table_name: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT OR REPLACE INTO sync_records (table_name, last_synced_at) VALUES (?, ?)",
        )
        .bind(table_name)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// True when the table was refreshed within the window. A missing or
    /// unparseable stamp counts as stale.
    pub async fn is_fresh(
        &self,
        table_name: &str,
        max_age: Duration,
    ) -> Result<bool, sqlx::Error> {
        let record = match self.get(table_name).await? {
            Some(record) => record,
            None => return Ok(false),
        };
        match DateTime::parse_from_rfc3339(&record.last_synced_at) {
            Ok(stamp) => {
                let age = Utc::now().signed_duration_since(stamp.with_timezone(&Utc));
                Ok(age < max_age)
            }
            Err(_) => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_db;
    use tempfile::TempDir;

    struct TestContext {
        store: SyncRecordStore,
        pool: SqlitePool,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let pool = init_db(&db_path).await.unwrap();
        TestContext {
            store: SyncRecordStore::new(pool.clone()),
            pool,
            _temp_dir: temp_dir,
        }
    }

    #[tokio::test]
    async fn test_touch_then_fresh() {
        let ctx = setup().await;

        assert!(!ctx.store.is_fresh("tasks", Duration::hours(12)).await.unwrap());

        ctx.store.touch("tasks").await.unwrap();
        assert!(ctx.store.is_fresh("tasks", Duration::hours(12)).await.unwrap());

        let record = ctx.store.get("tasks").await.unwrap().unwrap();
        assert!(DateTime::parse_from_rfc3339(&record.last_synced_at).is_ok());
    }

    #[tokio::test]
    async fn test_old_stamp_is_stale() {
        let ctx = setup().await;

        let thirteen_hours_ago = (Utc::now() - Duration::hours(13)).to_rfc3339();
        sqlx::query("INSERT INTO sync_records (table_name, last_synced_at) VALUES (?, ?)")
            .bind("tasks")
            .bind(&thirteen_hours_ago)
            .execute(&ctx.pool)
            .await
            .unwrap();

        assert!(!ctx.store.is_fresh("tasks", Duration::hours(12)).await.unwrap());
        assert!(ctx.store.is_fresh("tasks", Duration::hours(24)).await.unwrap());
    }

    #[tokio::test]
    async fn test_garbage_stamp_is_stale() {
        let ctx = setup().await;

        sqlx::query("INSERT INTO sync_records (table_name, last_synced_at) VALUES (?, ?)")
            .bind("tasks")
            .bind("not a timestamp")
            .execute(&ctx.pool)
            .await
            .unwrap();

        assert!(!ctx.store.is_fresh("tasks", Duration::hours(12)).await.unwrap());
    }

    #[tokio::test]
    async fn test_touch_replaces_previous_stamp() {
        let ctx = setup().await;

        ctx.store.touch("tasks").await.unwrap();
        ctx.store.touch("tasks").await.unwrap();

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM sync_records")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
