use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use super::{quote_identifier, EntityDescriptor, SchemaError};

/// Brings on-device tables in line with the declared entity descriptors.
///
/// Convergence is additive and best effort: a table whose observed signature
/// differs from its descriptor is rebuilt, carrying forward the data of
/// every column present in both shapes. Columns dropped from a descriptor
/// lose their data.
pub struct SchemaManager {
    pool: SqlitePool,
}

#[derive(Debug, Default)]
pub struct MigrationReport {
    pub created: Vec<String>,
    pub migrated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<(String, MigrationError)>,
}

enum Outcome {
    Created,
    Converged,
    Unchanged,
}

impl SchemaManager {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Migrates every entity, isolating failures: one bad descriptor or one
    /// failed rebuild never blocks the remaining tables.
    pub async fn migrate(&self, entities: &[EntityDescriptor]) -> MigrationReport {
        let mut report = MigrationReport::default();
        for entity in entities {
            match self.apply(entity).await {
                Ok(Outcome::Created) => report.created.push(entity.table.to_string()),
                Ok(Outcome::Converged) => report.migrated.push(entity.table.to_string()),
                Ok(Outcome::Unchanged) => report.unchanged.push(entity.table.to_string()),
                Err(e) => {
                    tracing::warn!("Schema migration failed for {}: {}", entity.table, e);
                    report.failed.push((entity.table.to_string(), e));
                }
            }
        }
        report
    }

    async fn apply(&self, entity: &EntityDescriptor) -> Result<Outcome, MigrationError> {
        entity.validate()?;

        let existing: Option<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
                .bind(entity.table)
                .fetch_optional(&self.pool)
                .await?;

        if existing.is_none() {
            sqlx::query(&entity.create_table_sql())
                .execute(&self.pool)
                .await?;
            return Ok(Outcome::Created);
        }

        let observed = self.observe(entity.table).await?;
        if observed == expected_signature(entity) {
            return Ok(Outcome::Unchanged);
        }

        let old_columns: Vec<String> = observed.columns.into_iter().map(|c| c.name).collect();
        self.converge(entity, &old_columns).await?;
        Ok(Outcome::Converged)
    }

    async fn observe(&self, table: &str) -> Result<TableSignature, MigrationError> {
        let quoted = quote_identifier(table);

        let columns = sqlx::query(&format!("PRAGMA table_info({})", quoted))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(column_signature)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;

        let mut foreign_keys = sqlx::query(&format!("PRAGMA foreign_key_list({})", quoted))
            .fetch_all(&self.pool)
            .await?
            .iter()
            .map(foreign_key_signature)
            .collect::<Result<Vec<_>, sqlx::Error>>()?;
        foreign_keys.sort();

        Ok(TableSignature {
            columns,
            foreign_keys,
        })
    }

    /// Rebuilds a table in place: rename aside, create from the descriptor,
    /// copy the column intersection forward, drop the old table. Runs on a
    /// dedicated connection with foreign-key enforcement off and legacy
    /// rename semantics on, so REFERENCES clauses in other tables keep
    /// naming this table rather than following the rename.
    async fn converge(
        &self,
        entity: &EntityDescriptor,
        old_columns: &[String],
    ) -> Result<(), MigrationError> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query("PRAGMA foreign_keys = OFF")
            .execute(&mut *conn)
            .await?;
        sqlx::query("PRAGMA legacy_alter_table = ON")
            .execute(&mut *conn)
            .await?;

        let rebuilt = Self::rebuild(&mut conn, entity, old_columns).await;

        let legacy = sqlx::query("PRAGMA legacy_alter_table = OFF")
            .execute(&mut *conn)
            .await;
        let enforce = sqlx::query("PRAGMA foreign_keys = ON")
            .execute(&mut *conn)
            .await;

        rebuilt?;
        legacy?;
        enforce?;
        Ok(())
    }

    async fn rebuild(
        conn: &mut sqlx::pool::PoolConnection<sqlx::Sqlite>,
        entity: &EntityDescriptor,
        old_columns: &[String],
    ) -> Result<(), MigrationError> {
        use sqlx::Connection;

        let table = quote_identifier(entity.table);
        let aside = quote_identifier(&format!("{}__old", entity.table));

        let carried: Vec<String> = entity
            .storage_columns()
            .into_iter()
            .filter(|col| old_columns.iter().any(|old| old == col.name))
            .map(|col| quote_identifier(col.name))
            .collect();

        let mut tx = conn.begin().await?;

        sqlx::query(&format!("ALTER TABLE {} RENAME TO {}", table, aside))
            .execute(&mut *tx)
            .await?;
        sqlx::query(&entity.create_table_sql())
            .execute(&mut *tx)
            .await?;
        if !carried.is_empty() {
            let columns = carried.join(", ");
            sqlx::query(&format!(
                "INSERT INTO {} ({}) SELECT {} FROM {}",
                table, columns, columns, aside
            ))
            .execute(&mut *tx)
            .await?;
        }
        sqlx::query(&format!("DROP TABLE {}", aside))
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }
}

#[derive(Debug, PartialEq, Eq)]
struct TableSignature {
    columns: Vec<ColumnSignature>,
    foreign_keys: Vec<ForeignKeySignature>,
}

#[derive(Debug, PartialEq, Eq)]
struct ColumnSignature {
    name: String,
    ty: String,
    notnull: bool,
    default: Option<String>,
    primary_key: bool,
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct ForeignKeySignature {
    from: String,
    table: String,
    to: String,
}

fn expected_signature(entity: &EntityDescriptor) -> TableSignature {
    let columns = entity
        .storage_columns()
        .into_iter()
        .map(|col| ColumnSignature {
            name: col.name.to_string(),
            ty: col.ty.sql().to_string(),
            // primary keys are rendered without NOT NULL
            notnull: !col.nullable && !col.primary_key,
            default: col.default_literal(),
            primary_key: col.primary_key,
        })
        .collect();

    let mut foreign_keys: Vec<ForeignKeySignature> = entity
        .storage_columns()
        .into_iter()
        .filter_map(|col| {
            col.references.as_ref().map(|fk| ForeignKeySignature {
                from: col.name.to_string(),
                table: fk.table.to_string(),
                to: fk.column.to_string(),
            })
        })
        .collect();
    foreign_keys.sort();

    TableSignature {
        columns,
        foreign_keys,
    }
}

fn column_signature(row: &SqliteRow) -> Result<ColumnSignature, sqlx::Error> {
    Ok(ColumnSignature {
        name: row.try_get("name")?,
        ty: row.try_get::<String, _>("type")?.to_ascii_uppercase(),
        notnull: row.try_get::<i64, _>("notnull")? != 0,
        default: row.try_get("dflt_value")?,
        primary_key: row.try_get::<i64, _>("pk")? != 0,
    })
}

fn foreign_key_signature(row: &SqliteRow) -> Result<ForeignKeySignature, sqlx::Error> {
    Ok(ForeignKeySignature {
        from: row.try_get("from")?,
        table: row.try_get("table")?,
        to: row.try_get::<Option<String>, _>("to")?.unwrap_or_default(),
    })
}

#[derive(Debug)]
pub enum MigrationError {
    Schema(SchemaError),
    Database(sqlx::Error),
}

impl std::fmt::Display for MigrationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MigrationError::Schema(e) => write!(f, "schema error: {}", e),
            MigrationError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for MigrationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            MigrationError::Schema(e) => Some(e),
            MigrationError::Database(e) => Some(e),
        }
    }
}

impl From<SchemaError> for MigrationError {
    fn from(e: SchemaError) -> Self {
        MigrationError::Schema(e)
    }
}

impl From<sqlx::Error> for MigrationError {
    fn from(e: sqlx::Error) -> Self {
        MigrationError::Database(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{ColumnDef, ColumnType};
    use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
    use std::str::FromStr;
    use tempfile::TempDir;

    struct TestContext {
        pool: SqlitePool,
        _temp_dir: TempDir,
    }

    async fn setup() -> TestContext {
        let temp_dir = TempDir::new().unwrap();
        let db_path = temp_dir.path().join("test.db");
        let options =
            SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", db_path.display()))
                .unwrap()
                .foreign_keys(true)
                .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .unwrap();
        TestContext {
            pool,
            _temp_dir: temp_dir,
        }
    }

    fn people_v1() -> EntityDescriptor {
        EntityDescriptor::new("people")
            .with_column(ColumnDef::new("name", ColumnType::Text))
            .with_column(ColumnDef::new("email", ColumnType::Text).nullable())
    }

    #[tokio::test]
    async fn test_creates_missing_table() {
        let ctx = setup().await;
        let manager = SchemaManager::new(ctx.pool.clone());

        let report = manager.migrate(&[people_v1()]).await;
        assert_eq!(report.created, vec!["people"]);
        assert!(report.failed.is_empty());

        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE name = 'people'")
                .fetch_one(&ctx.pool)
                .await
                .unwrap();
        assert_eq!(count.0, 1);
    }

    #[tokio::test]
    async fn test_unchanged_descriptor_preserves_rows() {
        let ctx = setup().await;
        let manager = SchemaManager::new(ctx.pool.clone());

        manager.migrate(&[people_v1()]).await;
        sqlx::query("INSERT INTO people (name, email) VALUES ('Ana', 'ana@example.org')")
            .execute(&ctx.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO people (name) VALUES ('Beto')")
            .execute(&ctx.pool)
            .await
            .unwrap();

        let report = manager.migrate(&[people_v1()]).await;
        assert_eq!(report.unchanged, vec!["people"]);
        assert!(report.migrated.is_empty());

        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM people")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(count.0, 2);
    }

    #[tokio::test]
    async fn test_added_column_keeps_existing_data() {
        let ctx = setup().await;
        let manager = SchemaManager::new(ctx.pool.clone());

        manager.migrate(&[people_v1()]).await;
        sqlx::query("INSERT INTO people (name, email) VALUES ('Ana', 'ana@example.org')")
            .execute(&ctx.pool)
            .await
            .unwrap();

        let v2 = people_v1().with_column(ColumnDef::new("phone", ColumnType::Text).nullable());
        let report = manager.migrate(&[v2]).await;
        assert_eq!(report.migrated, vec!["people"]);

        let row: (String, String, Option<String>) =
            sqlx::query_as("SELECT name, email, phone FROM people")
                .fetch_one(&ctx.pool)
                .await
                .unwrap();
        assert_eq!(row.0, "Ana");
        assert_eq!(row.1, "ana@example.org");
        assert_eq!(row.2, None);
    }

    #[tokio::test]
    async fn test_removed_column_drops_only_its_data() {
        let ctx = setup().await;
        let manager = SchemaManager::new(ctx.pool.clone());

        manager.migrate(&[people_v1()]).await;
        sqlx::query("INSERT INTO people (name, email) VALUES ('Ana', 'ana@example.org')")
            .execute(&ctx.pool)
            .await
            .unwrap();

        let v2 = EntityDescriptor::new("people")
            .with_column(ColumnDef::new("name", ColumnType::Text));
        let report = manager.migrate(&[v2]).await;
        assert_eq!(report.migrated, vec!["people"]);

        let row: (String,) = sqlx::query_as("SELECT name FROM people")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(row.0, "Ana");

        let columns: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM pragma_table_info('people')")
                .fetch_all(&ctx.pool)
                .await
                .unwrap();
        assert!(!columns.iter().any(|c| c.0 == "email"));
    }

    #[tokio::test]
    async fn test_bad_descriptor_does_not_block_siblings() {
        let ctx = setup().await;
        let manager = SchemaManager::new(ctx.pool.clone());

        let broken = EntityDescriptor::new("broken")
            .with_column(ColumnDef::new("a", ColumnType::Integer).primary_key())
            .with_column(ColumnDef::new("b", ColumnType::Integer).primary_key());
        let report = manager.migrate(&[broken, people_v1()]).await;

        assert_eq!(report.created, vec!["people"]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, "broken");
        assert!(matches!(
            report.failed[0].1,
            MigrationError::Schema(SchemaError::DuplicatePrimaryKey(_))
        ));
    }

    #[tokio::test]
    async fn test_rebuild_keeps_other_tables_pointing_here() {
        let ctx = setup().await;
        let manager = SchemaManager::new(ctx.pool.clone());

        let parent = EntityDescriptor::new("groups")
            .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .with_column(ColumnDef::new("name", ColumnType::Text));
        let child = EntityDescriptor::new("members")
            .with_column(ColumnDef::new("group_id", ColumnType::Integer).references("groups", "id"))
            .with_column(ColumnDef::new("name", ColumnType::Text));
        manager.migrate(&[parent.clone(), child]).await;

        sqlx::query("INSERT INTO groups (id, name) VALUES (1, 'north')")
            .execute(&ctx.pool)
            .await
            .unwrap();
        sqlx::query("INSERT INTO members (group_id, name) VALUES (1, 'Ana')")
            .execute(&ctx.pool)
            .await
            .unwrap();

        let parent_v2 =
            parent.with_column(ColumnDef::new("region", ColumnType::Text).nullable());
        let report = manager.migrate(&[parent_v2]).await;
        assert_eq!(report.migrated, vec!["groups"]);

        // The child's REFERENCES clause must still name "groups" and enforce
        // against the rebuilt table.
        sqlx::query("INSERT INTO members (group_id, name) VALUES (1, 'Beto')")
            .execute(&ctx.pool)
            .await
            .unwrap();
        let orphan = sqlx::query("INSERT INTO members (group_id, name) VALUES (99, 'Caro')")
            .execute(&ctx.pool)
            .await;
        assert!(orphan.is_err());
    }

    #[tokio::test]
    async fn test_foreign_keys_still_enforced_after_rebuild() {
        let ctx = setup().await;
        let manager = SchemaManager::new(ctx.pool.clone());

        manager.migrate(&[people_v1()]).await;
        let v2 = people_v1().with_column(ColumnDef::new("phone", ColumnType::Text).nullable());
        manager.migrate(&[v2]).await;

        let enforced: (i64,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&ctx.pool)
            .await
            .unwrap();
        assert_eq!(enforced.0, 1);
    }
}
