//! Wire types for the field data server's HTTP API.

use serde::{Deserialize, Serialize};

use crate::db::{Record, Value};

/// Response from the token endpoint.
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
}

/// Per-aggregate outcome inside a bulk upload response. `id` is set for
/// aggregates the server accepted; `errors` explains the ones it rejected.
#[derive(Debug, Clone, Deserialize)]
pub struct BulkUploadItemResult {
    pub uuid: String,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BulkUploadResponse {
    #[serde(default)]
    pub results: Vec<BulkUploadItemResult>,
}

/// Response to a single-aggregate upload.
#[derive(Debug, Deserialize)]
pub struct SingleUploadResponse {
    pub id: i64,
}

/// Interactions for one respondent the server already knows.
#[derive(Debug, Serialize)]
pub struct InteractionBatchRequest {
    pub respondent_id: i64,
    pub interactions: Vec<serde_json::Value>,
}

/// Task as served by the reference endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTask {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sort_order: i64,
}

impl RemoteTask {
    pub fn to_record(&self) -> Record {
        Record::from([
            ("id".to_string(), Value::Integer(self.id)),
            ("name".to_string(), Value::from(self.name.clone())),
            (
                "description".to_string(),
                Value::from(self.description.clone()),
            ),
            ("sort_order".to_string(), Value::Integer(self.sort_order)),
        ])
    }
}

/// Indicator with its nested subcategories and prerequisites.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteIndicator {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategories: Vec<RemoteSubcategory>,
    #[serde(default)]
    pub prerequisites: Vec<RemotePrerequisite>,
}

impl RemoteIndicator {
    pub fn to_record(&self) -> Record {
        Record::from([
            ("id".to_string(), Value::Integer(self.id)),
            ("name".to_string(), Value::from(self.name.clone())),
            ("category".to_string(), Value::from(self.category.clone())),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteSubcategory {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub unit: Option<String>,
}

impl RemoteSubcategory {
    pub fn to_record(&self, indicator_id: i64) -> Record {
        Record::from([
            ("id".to_string(), Value::Integer(self.id)),
            ("indicator_id".to_string(), Value::Integer(indicator_id)),
            ("name".to_string(), Value::from(self.name.clone())),
            ("unit".to_string(), Value::from(self.unit.clone())),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemotePrerequisite {
    pub id: i64,
    pub name: String,
}

impl RemotePrerequisite {
    pub fn to_record(&self, indicator_id: i64) -> Record {
        Record::from([
            ("id".to_string(), Value::Integer(self.id)),
            ("indicator_id".to_string(), Value::Integer(indicator_id)),
            ("name".to_string(), Value::from(self.name.clone())),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteOrganization {
    pub id: i64,
    pub name: String,
}

impl RemoteOrganization {
    pub fn to_record(&self) -> Record {
        Record::from([
            ("id".to_string(), Value::Integer(self.id)),
            ("name".to_string(), Value::from(self.name.clone())),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteProject {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub organization_id: Option<i64>,
}

impl RemoteProject {
    pub fn to_record(&self) -> Record {
        Record::from([
            ("id".to_string(), Value::Integer(self.id)),
            ("name".to_string(), Value::from(self.name.clone())),
            (
                "organization_id".to_string(),
                Value::from(self.organization_id),
            ),
        ])
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RemoteTerm {
    pub id: i64,
    pub category: String,
    pub term: String,
    #[serde(default)]
    pub sort_order: i64,
}

impl RemoteTerm {
    pub fn to_record(&self) -> Record {
        Record::from([
            ("id".to_string(), Value::Integer(self.id)),
            ("category".to_string(), Value::from(self.category.clone())),
            ("term".to_string(), Value::from(self.term.clone())),
            ("sort_order".to_string(), Value::Integer(self.sort_order)),
        ])
    }
}

/// One page of a server-side respondent search.
#[derive(Debug, Deserialize)]
pub struct SearchPage {
    #[serde(default)]
    pub results: Vec<RemoteRespondent>,
    #[serde(default)]
    pub has_more: bool,
}

/// Respondent summary as returned by the server's search endpoint. Only the
/// fields the browse listing shows are kept; the rest of the server's
/// payload is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRespondent {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    #[serde(default)]
    pub birth_year: Option<i64>,
    #[serde(default)]
    pub gender: Option<String>,
}

impl RemoteRespondent {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_result_defaults_missing_fields() {
        let json = r#"{"results": [{"uuid": "u-1", "id": 42}, {"uuid": "u-2", "errors": ["birth_year out of range"]}]}"#;
        let response: BulkUploadResponse = serde_json::from_str(json).unwrap();

        assert_eq!(response.results.len(), 2);
        assert_eq!(response.results[0].id, Some(42));
        assert!(response.results[0].errors.is_empty());
        assert_eq!(response.results[1].id, None);
        assert_eq!(response.results[1].errors.len(), 1);
    }

    #[test]
    fn test_empty_bulk_response() {
        let response: BulkUploadResponse = serde_json::from_str("{}").unwrap();
        assert!(response.results.is_empty());
    }

    #[test]
    fn test_indicator_with_children() {
        let json = r#"{
            "id": 3,
            "name": "Household income",
            "subcategories": [{"id": 30, "name": "Monthly income", "unit": "USD"}],
            "prerequisites": [{"id": 7, "name": "Consent on file"}]
        }"#;
        let indicator: RemoteIndicator = serde_json::from_str(json).unwrap();

        assert_eq!(indicator.category, None);
        assert_eq!(indicator.subcategories[0].unit.as_deref(), Some("USD"));

        let child = indicator.subcategories[0].to_record(indicator.id);
        assert_eq!(child.get("indicator_id"), Some(&Value::Integer(3)));
        assert_eq!(child.get("name"), Some(&Value::from("Monthly income")));
    }

    #[test]
    fn test_search_page_defaults() {
        let page: SearchPage = serde_json::from_str(r#"{"results": []}"#).unwrap();
        assert!(page.results.is_empty());
        assert!(!page.has_more);
    }

    #[test]
    fn test_search_result_ignores_unlisted_fields() {
        // The server sends more than the browse listing shows.
        let json = r#"{
            "results": [{
                "id": 4,
                "first_name": "Amara",
                "last_name": "Diallo",
                "nickname": "Ama",
                "organization_id": 7,
                "project_id": 3
            }],
            "has_more": true
        }"#;
        let page: SearchPage = serde_json::from_str(json).unwrap();

        assert_eq!(page.results[0].id, 4);
        assert_eq!(page.results[0].full_name(), "Amara Diallo");
        assert!(page.has_more);
    }

    #[test]
    fn test_task_record_carries_null_description() {
        let task = RemoteTask {
            id: 9,
            name: "Baseline visit".to_string(),
            description: None,
            sort_order: 2,
        };
        let record = task.to_record();
        assert_eq!(record.get("description"), Some(&Value::Null));
        assert_eq!(record.get("sort_order"), Some(&Value::Integer(2)));
    }
}
