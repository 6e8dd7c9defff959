pub mod identity_link;
pub mod repository;
pub mod sync_record;
pub mod value;

pub use identity_link::IdentityLinkRepository;
pub use repository::{Filter, Repository, RepositoryError};
pub use sync_record::SyncRecordStore;
pub use value::{Record, Value};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

use crate::schema::{registry, SchemaManager};

/// Initialize the database connection pool and converge the schema
pub async fn init_db(db_path: &Path) -> Result<SqlitePool, sqlx::Error> {
    // Ensure parent directory exists
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create database directory");
    }

    let db_url = format!("sqlite:{}?mode=rwc", db_path.display());

    let options = SqliteConnectOptions::from_str(&db_url)?
        .foreign_keys(true)
        .create_if_missing(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    let report = SchemaManager::new(pool.clone()).migrate(registry::all()).await;
    tracing::debug!(
        "Schema ready: {} created, {} migrated, {} unchanged, {} failed",
        report.created.len(),
        report.migrated.len(),
        report.unchanged.len(),
        report.failed.len()
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_init_db_creates_tables() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let pool = init_db(&db_path).await.unwrap();

        // Verify tables exist
        let tables: Vec<(String,)> = sqlx::query_as(
            "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(table_names.contains(&"respondents"));
        assert!(table_names.contains(&"respondent_statuses"));
        assert!(table_names.contains(&"interactions"));
        assert!(table_names.contains(&"interaction_subcategories"));
        assert!(table_names.contains(&"identity_links"));
        assert!(table_names.contains(&"sync_records"));
        assert!(table_names.contains(&"tasks"));
        assert!(table_names.contains(&"indicators"));
        assert!(table_names.contains(&"vocabulary_terms"));
    }

    #[tokio::test]
    async fn test_init_db_is_reentrant() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("test.db");

        let pool = init_db(&db_path).await.unwrap();
        sqlx::query("INSERT INTO respondents (uuid, first_name, last_name, created_on) VALUES ('u-1', 'Amara', 'Diallo', '2026-03-14')")
            .execute(&pool)
            .await
            .unwrap();
        pool.close().await;

        // A second open against the same file must leave data alone.
        let pool = init_db(&db_path).await.unwrap();
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM respondents")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(count.0, 1);
    }
}
