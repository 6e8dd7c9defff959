pub mod migrate;
pub mod registry;

pub use migrate::SchemaManager;

use crate::db::Value;

/// Declared column types. `Date` stores a calendar-date string and `Boolean`
/// a 0/1 integer; both exist so callers and the payload assembler can tell
/// them apart from plain text and integers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Integer,
    Real,
    Text,
    Date,
    Boolean,
}

impl ColumnType {
    pub fn sql(&self) -> &'static str {
        match self {
            ColumnType::Integer | ColumnType::Boolean => "INTEGER",
            ColumnType::Real => "REAL",
            ColumnType::Text | ColumnType::Date => "TEXT",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub table: &'static str,
    pub column: &'static str,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub ty: ColumnType,
    pub nullable: bool,
    pub default: Option<Value>,
    pub primary_key: bool,
    pub references: Option<ForeignKey>,
}

/// Surrogate key added to any entity that does not declare its own.
const SURROGATE_ID: ColumnDef = ColumnDef {
    name: "id",
    ty: ColumnType::Integer,
    nullable: false,
    default: None,
    primary_key: true,
    references: None,
};

impl ColumnDef {
    pub fn new(name: &'static str, ty: ColumnType) -> Self {
        Self {
            name,
            ty,
            nullable: false,
            default: None,
            primary_key: false,
            references: None,
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn default_value(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn references(mut self, table: &'static str, column: &'static str) -> Self {
        self.references = Some(ForeignKey { table, column });
        self
    }

    /// Default rendered as a SQL literal, exactly as it should read back
    /// from the table signature.
    pub fn default_literal(&self) -> Option<String> {
        self.default.as_ref().map(|v| match v {
            Value::Null => "NULL".to_string(),
            Value::Integer(n) => n.to_string(),
            Value::Real(x) => {
                let s = x.to_string();
                if s.contains('.') {
                    s
                } else {
                    format!("{}.0", s)
                }
            }
            Value::Text(s) => format!("'{}'", s.replace('\'', "''")),
        })
    }
}

/// What happens to dependent rows when the row they reference is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeletePolicy {
    Cascade,
    Protect,
    Nullify,
}

/// A named edge between two entities, declared on the side that owns the
/// join. `many = true` reads "this row has dependent rows over there";
/// `many = false` reads "this row points at one row over there". Delete
/// policies are evaluated for dependent edges only.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub name: &'static str,
    pub entity: &'static str,
    pub local_column: &'static str,
    pub foreign_column: &'static str,
    pub many: bool,
    pub on_delete: DeletePolicy,
    pub eager: bool,
}

impl Relationship {
    pub fn dependents(
        name: &'static str,
        entity: &'static str,
        local_column: &'static str,
        foreign_column: &'static str,
        on_delete: DeletePolicy,
    ) -> Self {
        Self {
            name,
            entity,
            local_column,
            foreign_column,
            many: true,
            on_delete,
            eager: false,
        }
    }

    pub fn parent(
        name: &'static str,
        entity: &'static str,
        local_column: &'static str,
        foreign_column: &'static str,
    ) -> Self {
        Self {
            name,
            entity,
            local_column,
            foreign_column,
            many: false,
            on_delete: DeletePolicy::Nullify,
            eager: false,
        }
    }

    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }
}

/// The full declared shape of one entity table. Eager relationship graphs
/// must be acyclic; serialization follows them recursively.
#[derive(Debug, Clone)]
pub struct EntityDescriptor {
    pub table: &'static str,
    pub columns: Vec<ColumnDef>,
    pub relationships: Vec<Relationship>,
    pub searchable: &'static [&'static str],
}

impl EntityDescriptor {
    pub fn new(table: &'static str) -> Self {
        Self {
            table,
            columns: Vec::new(),
            relationships: Vec::new(),
            searchable: &[],
        }
    }

    pub fn with_column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn with_relationship(mut self, relationship: Relationship) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn with_searchable(mut self, columns: &'static [&'static str]) -> Self {
        self.searchable = columns;
        self
    }

    pub fn has_declared_primary_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key)
    }

    /// Declared columns plus the surrogate key when none is declared, in
    /// table order.
    pub fn storage_columns(&self) -> Vec<&ColumnDef> {
        if self.has_declared_primary_key() {
            self.columns.iter().collect()
        } else {
            std::iter::once(&SURROGATE_ID)
                .chain(self.columns.iter())
                .collect()
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.storage_columns().into_iter().find(|c| c.name == name)
    }

    pub fn primary_key(&self) -> &ColumnDef {
        self.columns
            .iter()
            .find(|c| c.primary_key)
            .unwrap_or(&SURROGATE_ID)
    }

    pub fn dependent_relationships(&self) -> impl Iterator<Item = &Relationship> {
        self.relationships.iter().filter(|r| r.many)
    }

    pub fn validate(&self) -> Result<(), SchemaError> {
        if !valid_identifier(self.table) {
            return Err(SchemaError::InvalidIdentifier(self.table.to_string()));
        }
        let mut primary_keys = 0;
        for column in &self.columns {
            if !valid_identifier(column.name) {
                return Err(SchemaError::InvalidIdentifier(column.name.to_string()));
            }
            if column.primary_key {
                primary_keys += 1;
            }
            if let Some(fk) = &column.references {
                if !valid_identifier(fk.table) || !valid_identifier(fk.column) {
                    return Err(SchemaError::InvalidIdentifier(format!(
                        "{}.{}",
                        fk.table, fk.column
                    )));
                }
            }
        }
        if primary_keys > 1 {
            return Err(SchemaError::DuplicatePrimaryKey(self.table.to_string()));
        }
        for name in self.searchable {
            if self.column(name).is_none() {
                return Err(SchemaError::UnknownColumn {
                    table: self.table.to_string(),
                    column: name.to_string(),
                });
            }
        }
        for rel in &self.relationships {
            if self.column(rel.local_column).is_none() {
                return Err(SchemaError::UnknownColumn {
                    table: self.table.to_string(),
                    column: rel.local_column.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn create_table_sql(&self) -> String {
        let surrogate = !self.has_declared_primary_key();
        let columns: Vec<String> = self
            .storage_columns()
            .into_iter()
            .map(|col| {
                let mut sql = format!("{} {}", quote_identifier(col.name), col.ty.sql());
                if col.primary_key {
                    sql.push_str(" PRIMARY KEY");
                    if surrogate {
                        sql.push_str(" AUTOINCREMENT");
                    }
                } else {
                    if !col.nullable {
                        sql.push_str(" NOT NULL");
                    }
                    if let Some(literal) = col.default_literal() {
                        sql.push_str(" DEFAULT ");
                        sql.push_str(&literal);
                    }
                }
                if let Some(fk) = &col.references {
                    sql.push_str(&format!(
                        " REFERENCES {}({})",
                        quote_identifier(fk.table),
                        quote_identifier(fk.column)
                    ));
                }
                sql
            })
            .collect();
        format!(
            "CREATE TABLE {} ({})",
            quote_identifier(self.table),
            columns.join(", ")
        )
    }
}

/// Identifiers get interpolated into generated SQL, so only a conservative
/// shape is allowed: leading letter or underscore, then letters, digits,
/// underscores.
pub fn valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name)
}

#[derive(Debug)]
pub enum SchemaError {
    InvalidIdentifier(String),
    DuplicatePrimaryKey(String),
    UnknownColumn { table: String, column: String },
}

impl std::fmt::Display for SchemaError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchemaError::InvalidIdentifier(name) => {
                write!(f, "invalid identifier: {}", name)
            }
            SchemaError::DuplicatePrimaryKey(table) => {
                write!(f, "table {} declares more than one primary key", table)
            }
            SchemaError::UnknownColumn { table, column } => {
                write!(f, "table {} has no column {}", table, column)
            }
        }
    }
}

impl std::error::Error for SchemaError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_identifier() {
        assert!(valid_identifier("respondents"));
        assert!(valid_identifier("_private"));
        assert!(valid_identifier("table2"));
        assert!(!valid_identifier(""));
        assert!(!valid_identifier("2fast"));
        assert!(!valid_identifier("drop table"));
        assert!(!valid_identifier("name\"; --"));
    }

    #[test]
    fn test_surrogate_key_injected() {
        let entity = EntityDescriptor::new("things")
            .with_column(ColumnDef::new("name", ColumnType::Text));
        let columns = entity.storage_columns();
        assert_eq!(columns[0].name, "id");
        assert!(columns[0].primary_key);
        assert_eq!(entity.primary_key().name, "id");
    }

    #[test]
    fn test_declared_primary_key_wins() {
        let entity = EntityDescriptor::new("links")
            .with_column(ColumnDef::new("client_uuid", ColumnType::Text).primary_key())
            .with_column(ColumnDef::new("server_id", ColumnType::Integer).nullable());
        assert_eq!(entity.primary_key().name, "client_uuid");
        assert_eq!(entity.storage_columns().len(), 2);
    }

    #[test]
    fn test_create_table_sql() {
        let entity = EntityDescriptor::new("respondent_statuses")
            .with_column(ColumnDef::new("respondent_uuid", ColumnType::Text))
            .with_column(ColumnDef::new("status", ColumnType::Text))
            .with_column(
                ColumnDef::new("synced", ColumnType::Boolean).default_value(false),
            );
        assert_eq!(
            entity.create_table_sql(),
            "CREATE TABLE \"respondent_statuses\" (\
             \"id\" INTEGER PRIMARY KEY AUTOINCREMENT, \
             \"respondent_uuid\" TEXT NOT NULL, \
             \"status\" TEXT NOT NULL, \
             \"synced\" INTEGER NOT NULL DEFAULT 0)"
        );
    }

    #[test]
    fn test_create_table_sql_with_foreign_key() {
        let entity = EntityDescriptor::new("indicator_subcategories")
            .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
            .with_column(
                ColumnDef::new("indicator_id", ColumnType::Integer)
                    .references("indicators", "id"),
            )
            .with_column(ColumnDef::new("name", ColumnType::Text));
        assert_eq!(
            entity.create_table_sql(),
            "CREATE TABLE \"indicator_subcategories\" (\
             \"id\" INTEGER PRIMARY KEY, \
             \"indicator_id\" INTEGER NOT NULL REFERENCES \"indicators\"(\"id\"), \
             \"name\" TEXT NOT NULL)"
        );
    }

    #[test]
    fn test_validate_rejects_two_primary_keys() {
        let entity = EntityDescriptor::new("broken")
            .with_column(ColumnDef::new("a", ColumnType::Integer).primary_key())
            .with_column(ColumnDef::new("b", ColumnType::Integer).primary_key());
        match entity.validate() {
            Err(SchemaError::DuplicatePrimaryKey(table)) => assert_eq!(table, "broken"),
            other => panic!("expected DuplicatePrimaryKey, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_unknown_searchable_column() {
        let entity = EntityDescriptor::new("things")
            .with_column(ColumnDef::new("name", ColumnType::Text))
            .with_searchable(&["name", "missing"]);
        assert!(matches!(
            entity.validate(),
            Err(SchemaError::UnknownColumn { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_bad_identifier() {
        let entity = EntityDescriptor::new("bad table");
        assert!(matches!(
            entity.validate(),
            Err(SchemaError::InvalidIdentifier(_))
        ));
    }
}
