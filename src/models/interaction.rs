use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::db::{Record, Value};

/// A field visit or touchpoint with a respondent, recorded offline and
/// uploaded with (or after) its respondent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    pub uuid: Uuid,
    pub respondent_uuid: Uuid,
    pub task_id: Option<i64>,
    pub occurred_on: NaiveDate,
    pub notes: Option<String>,
    pub subcategories: Vec<SubcategoryEntry>,
    pub synced: bool,
}

/// One quantified indicator pick attached to an interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubcategoryEntry {
    pub subcategory_id: i64,
    pub name: String,
    pub value: f64,
}

impl Interaction {
    pub fn new(respondent_uuid: Uuid) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            respondent_uuid,
            task_id: None,
            occurred_on: Utc::now().date_naive(),
            notes: None,
            subcategories: Vec::new(),
            synced: false,
        }
    }

    pub fn with_task(mut self, task_id: i64) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_occurred_on(mut self, date: NaiveDate) -> Self {
        self.occurred_on = date;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_subcategories(mut self, subcategories: Vec<SubcategoryEntry>) -> Self {
        self.subcategories = subcategories;
        self
    }

    /// The interactions-table columns. Subcategory entries live in their own
    /// table and are written separately.
    pub fn to_record(&self) -> Record {
        Record::from([
            ("uuid".to_string(), Value::from(self.uuid)),
            (
                "respondent_uuid".to_string(),
                Value::from(self.respondent_uuid),
            ),
            ("task_id".to_string(), Value::from(self.task_id)),
            (
                "occurred_on".to_string(),
                Value::from(self.occurred_on.to_string()),
            ),
            ("notes".to_string(), Value::from(self.notes.clone())),
            ("synced".to_string(), Value::from(self.synced)),
        ])
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        let uuid = Uuid::parse_str(record.get("uuid")?.as_text()?).ok()?;
        let respondent_uuid =
            Uuid::parse_str(record.get("respondent_uuid")?.as_text()?).ok()?;
        let occurred_on = record
            .get("occurred_on")
            .and_then(|v| v.as_text())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| Utc::now().date_naive());
        Some(Self {
            uuid,
            respondent_uuid,
            task_id: record.get("task_id").and_then(|v| v.as_integer()),
            occurred_on,
            notes: record
                .get("notes")
                .and_then(|v| v.as_text())
                .map(String::from),
            subcategories: Vec::new(),
            synced: record
                .get("synced")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        })
    }
}

impl SubcategoryEntry {
    pub fn new(subcategory_id: i64, name: impl Into<String>, value: f64) -> Self {
        Self {
            subcategory_id,
            name: name.into(),
            value,
        }
    }

    pub fn to_record(&self, interaction_uuid: Uuid) -> Record {
        Record::from([
            (
                "interaction_uuid".to_string(),
                Value::from(interaction_uuid),
            ),
            (
                "subcategory_id".to_string(),
                Value::Integer(self.subcategory_id),
            ),
            ("name".to_string(), Value::from(self.name.as_str())),
            ("value".to_string(), Value::Real(self.value)),
            ("synced".to_string(), Value::from(false)),
        ])
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        Some(Self {
            subcategory_id: record.get("subcategory_id")?.as_integer()?,
            name: record.get("name")?.as_text()?.to_string(),
            value: record.get("value")?.as_real()?,
        })
    }
}

impl fmt::Display for Interaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} interaction {}", self.occurred_on, self.uuid)?;
        if let Some(task_id) = self.task_id {
            write!(f, " (task {})", task_id)?;
        }
        writeln!(f)?;
        if let Some(notes) = &self.notes {
            writeln!(f, "Notes: {}", notes)?;
        }
        if !self.subcategories.is_empty() {
            writeln!(f, "Recorded:")?;
            for entry in &self.subcategories {
                writeln!(f, "  - {}: {}", entry.name, entry.value)?;
            }
        }
        writeln!(f, "Synced: {}", if self.synced { "yes" } else { "no" })?;
        Ok(())
    }
}
