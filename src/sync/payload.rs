//! Renders local rows into the JSON shapes the server accepts.

use sqlx::SqlitePool;

use crate::db::{Filter, Record, Repository, RepositoryError, Value};
use crate::schema::{ColumnDef, ColumnType};

/// Contact fields that travel on a separate endpoint when an aggregate is
/// uploaded one at a time.
pub const PRIVATE_FIELDS: [&str; 3] = ["phone", "email", "notes"];

/// One respondent aggregate rendered for upload, plus the local row ids the
/// reconciliation step needs once the server accepts it.
#[derive(Debug)]
pub struct AssembledAggregate {
    pub client_uuid: String,
    pub payload: serde_json::Value,
    pub status_ids: Vec<i64>,
    pub interaction_ids: Vec<i64>,
    pub subcategory_ids: Vec<i64>,
}

/// Errors from payload assembly.
#[derive(Debug)]
pub enum AssembleError {
    /// The aggregate root row is missing locally
    RootNotFound(String),
    /// Reading rows failed
    Repository(RepositoryError),
}

impl std::fmt::Display for AssembleError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AssembleError::RootNotFound(uuid) => {
                write!(f, "No local respondent with uuid {}", uuid)
            }
            AssembleError::Repository(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for AssembleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AssembleError::Repository(e) => Some(e),
            _ => None,
        }
    }
}

impl From<RepositoryError> for AssembleError {
    fn from(e: RepositoryError) -> Self {
        AssembleError::Repository(e)
    }
}

/// Builds upload payloads from the local store.
pub struct PayloadAssembler {
    respondents: Repository,
    statuses: Repository,
    interactions: Repository,
    subcategories: Repository,
}

impl PayloadAssembler {
    pub fn new(pool: SqlitePool) -> Result<Self, RepositoryError> {
        Ok(Self {
            respondents: Repository::new(pool.clone(), "respondents")?,
            statuses: Repository::new(pool.clone(), "respondent_statuses")?,
            interactions: Repository::new(pool.clone(), "interactions")?,
            subcategories: Repository::new(pool, "interaction_subcategories")?,
        })
    }

    /// Builds the upload payload for one respondent aggregate: the root's
    /// fields, its status names, and its unsynced interactions with their
    /// subcategory values.
    pub async fn assemble_respondent(
        &self,
        uuid: &str,
    ) -> Result<AssembledAggregate, AssembleError> {
        let root = self
            .respondents
            .find_by("uuid", &Value::from(uuid))
            .await?
            .ok_or_else(|| AssembleError::RootNotFound(uuid.to_string()))?;

        let mut payload = record_fields(&self.respondents, &root, &["synced"]);

        let status_rows = self
            .statuses
            .filter(&[
                ("respondent_uuid", Filter::Eq(Value::from(uuid))),
                ("synced", Filter::Eq(Value::from(false))),
            ])
            .await?;
        let mut status_ids = Vec::new();
        let mut statuses = Vec::new();
        for row in &status_rows {
            if let Some(id) = row.get("id").and_then(Value::as_integer) {
                status_ids.push(id);
            }
            if let Some(name) = row.get("status").and_then(Value::as_text) {
                statuses.push(serde_json::Value::String(name.to_string()));
            }
        }
        payload.insert("statuses".to_string(), serde_json::Value::Array(statuses));

        let interaction_rows = self
            .interactions
            .filter(&[
                ("respondent_uuid", Filter::Eq(Value::from(uuid))),
                ("synced", Filter::Eq(Value::from(false))),
            ])
            .await?;
        let mut interaction_ids = Vec::new();
        let mut subcategory_ids = Vec::new();
        let mut nested = Vec::new();
        for row in &interaction_rows {
            if let Some(id) = row.get("id").and_then(Value::as_integer) {
                interaction_ids.push(id);
            }
            nested.push(self.interaction_json(row, &mut subcategory_ids).await?);
        }
        payload.insert("interactions".to_string(), serde_json::Value::Array(nested));

        Ok(AssembledAggregate {
            client_uuid: uuid.to_string(),
            payload: serde_json::Value::Object(payload),
            status_ids,
            interaction_ids,
            subcategory_ids,
        })
    }

    /// Builds the payload for one interaction uploaded on its own, returning
    /// it with the subcategory row ids it covers.
    pub async fn assemble_interaction(
        &self,
        row: &Record,
    ) -> Result<(serde_json::Value, Vec<i64>), AssembleError> {
        let mut subcategory_ids = Vec::new();
        let payload = self.interaction_json(row, &mut subcategory_ids).await?;
        Ok((payload, subcategory_ids))
    }

    async fn interaction_json(
        &self,
        row: &Record,
        subcategory_ids: &mut Vec<i64>,
    ) -> Result<serde_json::Value, AssembleError> {
        let mut map = record_fields(&self.interactions, row, &["respondent_uuid", "synced"]);

        let uuid = row.get("uuid").cloned().unwrap_or(Value::Null);
        let sub_rows = if uuid.is_null() {
            Vec::new()
        } else {
            self.subcategories
                .filter(&[("interaction_uuid", Filter::Eq(uuid))])
                .await?
        };
        let mut entries = Vec::with_capacity(sub_rows.len());
        for sub in &sub_rows {
            if let Some(id) = sub.get("id").and_then(Value::as_integer) {
                subcategory_ids.push(id);
            }
            let mut entry = serde_json::Map::new();
            entry.insert("id".to_string(), json_field(sub, "subcategory_id"));
            entry.insert("name".to_string(), json_field(sub, "name"));
            entry.insert("value".to_string(), json_field(sub, "value"));
            entries.push(serde_json::Value::Object(entry));
        }
        map.insert(
            "subcategories".to_string(),
            serde_json::Value::Array(entries),
        );

        Ok(serde_json::Value::Object(map))
    }
}

/// Splits a respondent payload into its public part and the private contact
/// fields. Null private fields are dropped rather than split out.
pub fn split_private(payload: serde_json::Value) -> (serde_json::Value, serde_json::Value) {
    let mut map = match payload {
        serde_json::Value::Object(map) => map,
        other => return (other, serde_json::Value::Object(serde_json::Map::new())),
    };
    let mut private = serde_json::Map::new();
    for field in PRIVATE_FIELDS {
        if let Some(value) = map.remove(field) {
            if !value.is_null() {
                private.insert(field.to_string(), value);
            }
        }
    }
    (
        serde_json::Value::Object(map),
        serde_json::Value::Object(private),
    )
}

/// Renders a record's declared columns as JSON, skipping the listed names.
/// The surrogate row id is never declared, so it never leaves the store.
fn record_fields(
    repo: &Repository,
    record: &Record,
    skip: &[&str],
) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    for col in &repo.entity().columns {
        if skip.contains(&col.name) {
            continue;
        }
        let value = record.get(col.name).cloned().unwrap_or(Value::Null);
        map.insert(col.name.to_string(), column_json(col, &value));
    }
    map
}

fn column_json(col: &ColumnDef, value: &Value) -> serde_json::Value {
    if col.ty == ColumnType::Boolean {
        match value.as_bool() {
            Some(b) => serde_json::Value::Bool(b),
            None => serde_json::Value::Null,
        }
    } else {
        value.to_json()
    }
}

fn json_field(record: &Record, name: &str) -> serde_json::Value {
    record
        .get(name)
        .map(|v| v.to_json())
        .unwrap_or(serde_json::Value::Null)
}
