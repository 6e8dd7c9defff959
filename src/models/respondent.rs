use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::db::{Record, Value};

/// A person enrolled by a field collector. Created offline with a client
/// identity; the server only learns about it at upload time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Respondent {
    pub uuid: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub nickname: Option<String>,
    pub birth_year: Option<i64>,
    pub gender: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub organization_id: Option<i64>,
    pub project_id: Option<i64>,
    pub notes: Option<String>,
    pub created_on: NaiveDate,
    pub statuses: Vec<String>,
    pub synced: bool,
}

impl Respondent {
    pub fn new(first_name: impl Into<String>, last_name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            first_name: first_name.into(),
            last_name: last_name.into(),
            nickname: None,
            birth_year: None,
            gender: None,
            phone: None,
            email: None,
            organization_id: None,
            project_id: None,
            notes: None,
            created_on: Utc::now().date_naive(),
            statuses: Vec::new(),
            synced: false,
        }
    }

    pub fn with_nickname(mut self, nickname: impl Into<String>) -> Self {
        self.nickname = Some(nickname.into());
        self
    }

    pub fn with_birth_year(mut self, year: i64) -> Self {
        self.birth_year = Some(year);
        self
    }

    pub fn with_gender(mut self, gender: impl Into<String>) -> Self {
        self.gender = Some(gender.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_organization(mut self, organization_id: i64) -> Self {
        self.organization_id = Some(organization_id);
        self
    }

    pub fn with_project(mut self, project_id: i64) -> Self {
        self.project_id = Some(project_id);
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn with_statuses(mut self, statuses: Vec<String>) -> Self {
        self.statuses = statuses;
        self
    }

    /// The respondents-table columns. Statuses live in their own table and
    /// are written separately.
    pub fn to_record(&self) -> Record {
        Record::from([
            ("uuid".to_string(), Value::from(self.uuid)),
            ("first_name".to_string(), Value::from(self.first_name.as_str())),
            ("last_name".to_string(), Value::from(self.last_name.as_str())),
            ("nickname".to_string(), Value::from(self.nickname.clone())),
            ("birth_year".to_string(), Value::from(self.birth_year)),
            ("gender".to_string(), Value::from(self.gender.clone())),
            ("phone".to_string(), Value::from(self.phone.clone())),
            ("email".to_string(), Value::from(self.email.clone())),
            (
                "organization_id".to_string(),
                Value::from(self.organization_id),
            ),
            ("project_id".to_string(), Value::from(self.project_id)),
            ("notes".to_string(), Value::from(self.notes.clone())),
            (
                "created_on".to_string(),
                Value::from(self.created_on.to_string()),
            ),
            ("synced".to_string(), Value::from(self.synced)),
        ])
    }

    pub fn from_record(record: &Record) -> Option<Self> {
        let uuid = Uuid::parse_str(record.get("uuid")?.as_text()?).ok()?;
        let created_on = record
            .get("created_on")
            .and_then(|v| v.as_text())
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| Utc::now().date_naive());
        Some(Self {
            uuid,
            first_name: record.get("first_name")?.as_text()?.to_string(),
            last_name: record.get("last_name")?.as_text()?.to_string(),
            nickname: record
                .get("nickname")
                .and_then(|v| v.as_text())
                .map(String::from),
            birth_year: record.get("birth_year").and_then(|v| v.as_integer()),
            gender: record
                .get("gender")
                .and_then(|v| v.as_text())
                .map(String::from),
            phone: record
                .get("phone")
                .and_then(|v| v.as_text())
                .map(String::from),
            email: record
                .get("email")
                .and_then(|v| v.as_text())
                .map(String::from),
            organization_id: record
                .get("organization_id")
                .and_then(|v| v.as_integer()),
            project_id: record.get("project_id").and_then(|v| v.as_integer()),
            notes: record
                .get("notes")
                .and_then(|v| v.as_text())
                .map(String::from),
            created_on,
            statuses: Vec::new(),
            synced: record
                .get("synced")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
        })
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

impl fmt::Display for Respondent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.full_name();
        writeln!(f, "{}", name)?;
        writeln!(f, "{}", "=".repeat(name.len()))?;
        writeln!(f, "UUID: {}", self.uuid)?;
        if let Some(nickname) = &self.nickname {
            writeln!(f, "Nickname: {}", nickname)?;
        }
        if let Some(year) = self.birth_year {
            writeln!(f, "Born: {}", year)?;
        }
        if let Some(gender) = &self.gender {
            writeln!(f, "Gender: {}", gender)?;
        }
        if let Some(phone) = &self.phone {
            writeln!(f, "Phone: {}", phone)?;
        }
        if let Some(email) = &self.email {
            writeln!(f, "Email: {}", email)?;
        }
        if let Some(notes) = &self.notes {
            writeln!(f, "Notes: {}", notes)?;
        }
        writeln!(f, "Created: {}", self.created_on)?;
        writeln!(f, "Synced: {}", if self.synced { "yes" } else { "no" })?;

        if !self.statuses.is_empty() {
            writeln!(f, "\nStatuses:")?;
            for status in &self.statuses {
                writeln!(f, "  - {}", status)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_respondent_new() {
        let respondent = Respondent::new("Amara", "Diallo");

        assert_eq!(respondent.first_name, "Amara");
        assert_eq!(respondent.last_name, "Diallo");
        assert!(!respondent.synced);
        assert!(respondent.statuses.is_empty());
    }

    #[test]
    fn test_respondent_builders() {
        let respondent = Respondent::new("Amara", "Diallo")
            .with_nickname("Ama")
            .with_birth_year(1993)
            .with_statuses(vec!["enrolled".into(), "consented".into()]);

        assert_eq!(respondent.nickname.as_deref(), Some("Ama"));
        assert_eq!(respondent.birth_year, Some(1993));
        assert_eq!(respondent.statuses.len(), 2);
    }

    #[test]
    fn test_record_round_trip() {
        let respondent = Respondent::new("Amara", "Diallo")
            .with_phone("555-0100")
            .with_organization(3);

        let record = respondent.to_record();
        assert_eq!(
            record.get("uuid"),
            Some(&Value::Text(respondent.uuid.to_string()))
        );
        assert_eq!(record.get("synced"), Some(&Value::Integer(0)));

        let restored = Respondent::from_record(&record).unwrap();
        assert_eq!(restored.uuid, respondent.uuid);
        assert_eq!(restored.phone.as_deref(), Some("555-0100"));
        assert_eq!(restored.organization_id, Some(3));
        assert_eq!(restored.nickname, None);
    }

    #[test]
    fn test_from_record_requires_uuid() {
        let mut record = Respondent::new("Amara", "Diallo").to_record();
        record.insert("uuid".to_string(), Value::from("not a uuid"));
        assert!(Respondent::from_record(&record).is_none());
    }

    #[test]
    fn test_respondent_display() {
        let respondent = Respondent::new("Amara", "Diallo")
            .with_nickname("Ama")
            .with_statuses(vec!["enrolled".into()]);

        let output = format!("{}", respondent);
        assert!(output.contains("Amara Diallo"));
        assert!(output.contains("Nickname: Ama"));
        assert!(output.contains("- enrolled"));
        assert!(output.contains("Synced: no"));
    }
}
