use futures::future::BoxFuture;
use sqlx::sqlite::SqliteRow;
use sqlx::SqlitePool;

use crate::db::{Record, Value};
use crate::schema::{quote_identifier, registry, DeletePolicy, EntityDescriptor};

/// Generic data access over one entity table, driven entirely by its
/// descriptor. One instance per entity; all instances share the pool.
pub struct Repository {
    pool: SqlitePool,
    entity: &'static EntityDescriptor,
}

/// A single conjunctive condition for `filter` and `count`.
#[derive(Debug, Clone)]
pub enum Filter {
    Eq(Value),
    IsNull,
    IsNotNull,
}

impl Repository {
    pub fn new(pool: SqlitePool, table: &str) -> Result<Self, RepositoryError> {
        let entity = registry::get(table)
            .ok_or_else(|| RepositoryError::UnknownEntity(table.to_string()))?;
        Ok(Self { pool, entity })
    }

    pub fn entity(&self) -> &'static EntityDescriptor {
        self.entity
    }

    fn related(&self, table: &str) -> Result<Repository, RepositoryError> {
        Repository::new(self.pool.clone(), table)
    }

    fn column_name(&self, name: &str) -> Result<&'static str, RepositoryError> {
        self.entity
            .column(name)
            .map(|c| c.name)
            .ok_or_else(|| RepositoryError::UnknownColumn {
                table: self.entity.table.to_string(),
                column: name.to_string(),
            })
    }

    fn decode_row(&self, row: &SqliteRow) -> Result<Record, sqlx::Error> {
        let mut record = Record::new();
        for col in self.entity.storage_columns() {
            record.insert(col.name.to_string(), Value::decode(row, col.name, col.ty)?);
        }
        Ok(record)
    }

    pub async fn find(&self, key: &Value) -> Result<Option<Record>, RepositoryError> {
        self.find_by(self.entity.primary_key().name, key).await
    }

    pub async fn find_by(
        &self,
        column: &str,
        value: &Value,
    ) -> Result<Option<Record>, RepositoryError> {
        let column = self.column_name(column)?;
        let sql = format!(
            "SELECT * FROM {} WHERE {} = ? LIMIT 1",
            quote_identifier(self.entity.table),
            quote_identifier(column)
        );
        let row = value
            .bind_to(sqlx::query(&sql))
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.decode_row(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn filter(
        &self,
        conditions: &[(&str, Filter)],
    ) -> Result<Vec<Record>, RepositoryError> {
        self.filter_limit(conditions, None).await
    }

    pub async fn filter_limit(
        &self,
        conditions: &[(&str, Filter)],
        limit: Option<i64>,
    ) -> Result<Vec<Record>, RepositoryError> {
        let (clause, binds) = self.where_clause(conditions)?;
        let mut sql = format!("SELECT * FROM {}", quote_identifier(self.entity.table));
        sql.push_str(&clause);
        sql.push_str(&format!(
            " ORDER BY {}",
            quote_identifier(self.entity.primary_key().name)
        ));
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut query = sqlx::query(&sql);
        for value in binds {
            query = value.bind_to(query);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| self.decode_row(row).map_err(RepositoryError::from))
            .collect()
    }

    pub async fn count(&self, conditions: &[(&str, Filter)]) -> Result<i64, RepositoryError> {
        let (clause, binds) = self.where_clause(conditions)?;
        let sql = format!(
            "SELECT COUNT(*) FROM {}{}",
            quote_identifier(self.entity.table),
            clause
        );
        let mut query = sqlx::query_scalar::<_, i64>(&sql);
        for value in binds {
            query = match value {
                Value::Null => query.bind(None::<i64>),
                Value::Integer(n) => query.bind(*n),
                Value::Real(x) => query.bind(*x),
                Value::Text(s) => query.bind(s.clone()),
            };
        }
        Ok(query.fetch_one(&self.pool).await?)
    }

    fn where_clause<'a>(
        &self,
        conditions: &'a [(&str, Filter)],
    ) -> Result<(String, Vec<&'a Value>), RepositoryError> {
        let mut clauses = Vec::new();
        let mut binds = Vec::new();
        for (name, filter) in conditions {
            let column = quote_identifier(self.column_name(name)?);
            match filter {
                Filter::Eq(value) => {
                    clauses.push(format!("{} = ?", column));
                    binds.push(value);
                }
                Filter::IsNull => clauses.push(format!("{} IS NULL", column)),
                Filter::IsNotNull => clauses.push(format!("{} IS NOT NULL", column)),
            }
        }
        if clauses.is_empty() {
            Ok((String::new(), binds))
        } else {
            Ok((format!(" WHERE {}", clauses.join(" AND ")), binds))
        }
    }

    /// Case-insensitive substring match across the entity's searchable
    /// columns. An entity that declares none always matches nothing.
    pub async fn search(&self, term: &str) -> Result<Vec<Record>, RepositoryError> {
        if self.entity.searchable.is_empty() {
            tracing::warn!(
                "Search on {} which declares no searchable columns",
                self.entity.table
            );
            return Ok(Vec::new());
        }
        let pattern = format!("%{}%", escape_like(&term.to_lowercase()));
        let clauses: Vec<String> = self
            .entity
            .searchable
            .iter()
            .map(|name| format!("LOWER({}) LIKE ? ESCAPE '\\'", quote_identifier(name)))
            .collect();
        let sql = format!(
            "SELECT * FROM {} WHERE {} ORDER BY {}",
            quote_identifier(self.entity.table),
            clauses.join(" OR "),
            quote_identifier(self.entity.primary_key().name)
        );

        let mut query = sqlx::query(&sql);
        for _ in 0..clauses.len() {
            query = query.bind(pattern.clone());
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| self.decode_row(row).map_err(RepositoryError::from))
            .collect()
    }

    /// Upsert. With `id`, an existing row keyed by `id_column` is updated in
    /// place; otherwise the data is inserted (INSERT OR REPLACE, so an
    /// explicit duplicate primary key silently overwrites). Returns the
    /// primary key of the written row.
    pub async fn save(
        &self,
        data: &Record,
        id: Option<&Value>,
        id_column: &str,
    ) -> Result<Value, RepositoryError> {
        for name in data.keys() {
            self.column_name(name)?;
        }
        let key_column = self.column_name(id_column)?;

        if let Some(key) = id {
            if self.find_by(key_column, key).await?.is_some() {
                let assignments: Vec<String> = data
                    .keys()
                    .filter(|name| name.as_str() != key_column)
                    .map(|name| format!("{} = ?", quote_identifier(name)))
                    .collect();
                if assignments.is_empty() {
                    return Ok(key.clone());
                }
                let sql = format!(
                    "UPDATE {} SET {} WHERE {} = ?",
                    quote_identifier(self.entity.table),
                    assignments.join(", "),
                    quote_identifier(key_column)
                );
                let mut query = sqlx::query(&sql);
                for (name, value) in data {
                    if name.as_str() != key_column {
                        query = value.bind_to(query);
                    }
                }
                query = key.bind_to(query);
                query.execute(&self.pool).await?;
                return Ok(key.clone());
            }
        }

        let mut row = data.clone();
        if let Some(key) = id {
            row.insert(key_column.to_string(), key.clone());
        }

        if row.is_empty() {
            let sql = format!(
                "INSERT INTO {} DEFAULT VALUES",
                quote_identifier(self.entity.table)
            );
            let result = sqlx::query(&sql).execute(&self.pool).await?;
            return Ok(Value::Integer(result.last_insert_rowid()));
        }

        let columns: Vec<String> = row.keys().map(|name| quote_identifier(name)).collect();
        let placeholders: Vec<&str> = row.keys().map(|_| "?").collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_identifier(self.entity.table),
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for value in row.values() {
            query = value.bind_to(query);
        }
        let result = query.execute(&self.pool).await?;

        let pk = self.entity.primary_key();
        match row.get(pk.name) {
            Some(value) => Ok(value.clone()),
            None => Ok(Value::Integer(result.last_insert_rowid())),
        }
    }

    /// Insert on a caller-owned transaction. Validates columns like `save`
    /// but never updates in place; cache replacement pairs this with
    /// `clear_in` so an aborted swap rolls back whole.
    pub async fn insert_in(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        data: &Record,
    ) -> Result<(), RepositoryError> {
        for name in data.keys() {
            self.column_name(name)?;
        }
        if data.is_empty() {
            let sql = format!(
                "INSERT INTO {} DEFAULT VALUES",
                quote_identifier(self.entity.table)
            );
            sqlx::query(&sql).execute(&mut **tx).await?;
            return Ok(());
        }

        let columns: Vec<String> = data.keys().map(|name| quote_identifier(name)).collect();
        let placeholders: Vec<&str> = data.keys().map(|_| "?").collect();
        let sql = format!(
            "INSERT OR REPLACE INTO {} ({}) VALUES ({})",
            quote_identifier(self.entity.table),
            columns.join(", "),
            placeholders.join(", ")
        );
        let mut query = sqlx::query(&sql);
        for value in data.values() {
            query = value.bind_to(query);
        }
        query.execute(&mut **tx).await?;
        Ok(())
    }

    /// Deletes one row after evaluating its dependent relationships, in
    /// policy order: every protect check runs before anything is touched,
    /// then cascades, nullifies, and the row itself inside one transaction.
    pub async fn delete(&self, key: &Value, key_column: &str) -> Result<(), RepositoryError> {
        let key_column = self.column_name(key_column)?;
        let row = match self.find_by(key_column, key).await? {
            Some(row) => row,
            None => return Ok(()),
        };

        let mut cascades: Vec<(Repository, &'static str, Value)> = Vec::new();
        let mut nullifies: Vec<(Repository, &'static str, Value)> = Vec::new();

        for rel in self.entity.dependent_relationships() {
            let link = row.get(rel.local_column).cloned().unwrap_or(Value::Null);
            if link.is_null() {
                continue;
            }
            let related = self.related(rel.entity)?;
            let foreign = related.column_name(rel.foreign_column)?;
            match rel.on_delete {
                DeletePolicy::Protect => {
                    let dependents = related
                        .count(&[(foreign, Filter::Eq(link.clone()))])
                        .await?;
                    if dependents > 0 {
                        return Err(RepositoryError::RelationshipViolation {
                            table: self.entity.table.to_string(),
                            relationship: rel.name.to_string(),
                            dependents,
                        });
                    }
                }
                DeletePolicy::Cascade => cascades.push((related, foreign, link)),
                DeletePolicy::Nullify => nullifies.push((related, foreign, link)),
            }
        }

        let mut tx = self.pool.begin().await?;
        for (related, foreign, link) in &cascades {
            let sql = format!(
                "DELETE FROM {} WHERE {} = ?",
                quote_identifier(related.entity.table),
                quote_identifier(foreign)
            );
            link.bind_to(sqlx::query(&sql)).execute(&mut *tx).await?;
        }
        for (related, foreign, link) in &nullifies {
            let sql = format!(
                "UPDATE {} SET {} = NULL WHERE {} = ?",
                quote_identifier(related.entity.table),
                quote_identifier(foreign),
                quote_identifier(foreign)
            );
            link.bind_to(sqlx::query(&sql)).execute(&mut *tx).await?;
        }
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_identifier(self.entity.table),
            quote_identifier(key_column)
        );
        key.bind_to(sqlx::query(&sql)).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Row deletion without relationship evaluation. Sync reconciliation
    /// goes through here.
    pub async fn delete_where(
        &self,
        column: &str,
        value: &Value,
    ) -> Result<u64, RepositoryError> {
        let column = self.column_name(column)?;
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote_identifier(self.entity.table),
            quote_identifier(column)
        );
        let result = value.bind_to(sqlx::query(&sql)).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    pub async fn update_where(
        &self,
        set_column: &str,
        set_value: &Value,
        where_column: &str,
        where_value: &Value,
    ) -> Result<u64, RepositoryError> {
        let set_column = self.column_name(set_column)?;
        let where_column = self.column_name(where_column)?;
        let sql = format!(
            "UPDATE {} SET {} = ? WHERE {} = ?",
            quote_identifier(self.entity.table),
            quote_identifier(set_column),
            quote_identifier(where_column)
        );
        let query = sqlx::query(&sql);
        let query = set_value.bind_to(query);
        let query = where_value.bind_to(query);
        Ok(query.execute(&self.pool).await?.rows_affected())
    }

    /// Empties the table on a caller-owned transaction.
    pub async fn clear_in(
        &self,
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    ) -> Result<u64, RepositoryError> {
        let sql = format!("DELETE FROM {}", quote_identifier(self.entity.table));
        Ok(sqlx::query(&sql).execute(&mut **tx).await?.rows_affected())
    }

    /// Renders a row as JSON and walks its eager relationships: dependents
    /// become an array (empty when none), a parent becomes an object or
    /// null. The eager graph is declared acyclic.
    pub fn serialize<'a>(
        &'a self,
        record: &'a Record,
    ) -> BoxFuture<'a, Result<serde_json::Value, RepositoryError>> {
        Box::pin(async move {
            let mut map = serde_json::Map::new();
            for (name, value) in record {
                map.insert(name.clone(), value.to_json());
            }

            for rel in self.entity.relationships.iter().filter(|r| r.eager) {
                let related = self.related(rel.entity)?;
                let link = record.get(rel.local_column).cloned().unwrap_or(Value::Null);

                if rel.many {
                    let rows = if link.is_null() {
                        Vec::new()
                    } else {
                        related
                            .filter(&[(rel.foreign_column, Filter::Eq(link))])
                            .await?
                    };
                    let mut items = Vec::with_capacity(rows.len());
                    for row in &rows {
                        items.push(related.serialize(row).await?);
                    }
                    map.insert(rel.name.to_string(), serde_json::Value::Array(items));
                } else {
                    let parent = if link.is_null() {
                        None
                    } else {
                        related.find_by(rel.foreign_column, &link).await?
                    };
                    let rendered = match parent {
                        Some(row) => related.serialize(&row).await?,
                        None => serde_json::Value::Null,
                    };
                    map.insert(rel.name.to_string(), rendered);
                }
            }

            Ok(serde_json::Value::Object(map))
        })
    }
}

fn escape_like(term: &str) -> String {
    term.replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

#[derive(Debug)]
pub enum RepositoryError {
    UnknownEntity(String),
    UnknownColumn { table: String, column: String },
    RelationshipViolation {
        table: String,
        relationship: String,
        dependents: i64,
    },
    Database(sqlx::Error),
}

impl std::fmt::Display for RepositoryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RepositoryError::UnknownEntity(table) => {
                write!(f, "no entity registered for table {}", table)
            }
            RepositoryError::UnknownColumn { table, column } => {
                write!(f, "table {} has no column {}", table, column)
            }
            RepositoryError::RelationshipViolation {
                table,
                relationship,
                dependents,
            } => write!(
                f,
                "cannot delete from {}: {} dependent row(s) via {}",
                table, dependents, relationship
            ),
            RepositoryError::Database(e) => write!(f, "database error: {}", e),
        }
    }
}

impl std::error::Error for RepositoryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RepositoryError::Database(e) => Some(e),
            _ => None,
        }
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        RepositoryError::Database(e)
    }
}
