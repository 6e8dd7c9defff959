use std::sync::OnceLock;

use super::{ColumnDef, ColumnType, DeletePolicy, EntityDescriptor, Relationship};

static REGISTRY: OnceLock<Vec<EntityDescriptor>> = OnceLock::new();

/// Every entity this client stores, in creation order (parents before the
/// tables that REFERENCE them).
pub fn all() -> &'static [EntityDescriptor] {
    REGISTRY.get_or_init(build)
}

pub fn get(table: &str) -> Option<&'static EntityDescriptor> {
    all().iter().find(|d| d.table == table)
}

fn build() -> Vec<EntityDescriptor> {
    vec![
        respondents(),
        respondent_statuses(),
        interactions(),
        interaction_subcategories(),
        identity_links(),
        sync_records(),
        tasks(),
        indicators(),
        indicator_subcategories(),
        indicator_prerequisites(),
        organizations(),
        projects(),
        vocabulary_terms(),
    ]
}

// Aggregate join columns (respondent_uuid, interaction_uuid) deliberately
// carry no REFERENCES clause: a dependent row must stay resolvable through
// the identity link after its parent's local row is uploaded and removed.

fn respondents() -> EntityDescriptor {
    EntityDescriptor::new("respondents")
        .with_column(ColumnDef::new("uuid", ColumnType::Text))
        .with_column(ColumnDef::new("first_name", ColumnType::Text))
        .with_column(ColumnDef::new("last_name", ColumnType::Text))
        .with_column(ColumnDef::new("nickname", ColumnType::Text).nullable())
        .with_column(ColumnDef::new("birth_year", ColumnType::Integer).nullable())
        .with_column(ColumnDef::new("gender", ColumnType::Text).nullable())
        .with_column(ColumnDef::new("phone", ColumnType::Text).nullable())
        .with_column(ColumnDef::new("email", ColumnType::Text).nullable())
        .with_column(ColumnDef::new("organization_id", ColumnType::Integer).nullable())
        .with_column(ColumnDef::new("project_id", ColumnType::Integer).nullable())
        .with_column(ColumnDef::new("notes", ColumnType::Text).nullable())
        .with_column(ColumnDef::new("created_on", ColumnType::Date))
        .with_column(ColumnDef::new("synced", ColumnType::Boolean).default_value(false))
        .with_searchable(&["first_name", "last_name", "nickname"])
        .with_relationship(
            Relationship::dependents(
                "statuses",
                "respondent_statuses",
                "uuid",
                "respondent_uuid",
                DeletePolicy::Cascade,
            )
            .eager(),
        )
        .with_relationship(Relationship::dependents(
            "interactions",
            "interactions",
            "uuid",
            "respondent_uuid",
            DeletePolicy::Protect,
        ))
}

fn respondent_statuses() -> EntityDescriptor {
    EntityDescriptor::new("respondent_statuses")
        .with_column(ColumnDef::new("respondent_uuid", ColumnType::Text))
        .with_column(ColumnDef::new("status", ColumnType::Text))
        .with_column(ColumnDef::new("synced", ColumnType::Boolean).default_value(false))
}

fn interactions() -> EntityDescriptor {
    EntityDescriptor::new("interactions")
        .with_column(ColumnDef::new("uuid", ColumnType::Text))
        .with_column(ColumnDef::new("respondent_uuid", ColumnType::Text))
        .with_column(ColumnDef::new("task_id", ColumnType::Integer).nullable())
        .with_column(ColumnDef::new("occurred_on", ColumnType::Date))
        .with_column(ColumnDef::new("notes", ColumnType::Text).nullable())
        .with_column(ColumnDef::new("synced", ColumnType::Boolean).default_value(false))
        .with_searchable(&["notes"])
        .with_relationship(
            Relationship::dependents(
                "subcategories",
                "interaction_subcategories",
                "uuid",
                "interaction_uuid",
                DeletePolicy::Cascade,
            )
            .eager(),
        )
        .with_relationship(
            Relationship::parent("respondent", "respondents", "respondent_uuid", "uuid").eager(),
        )
}

fn interaction_subcategories() -> EntityDescriptor {
    EntityDescriptor::new("interaction_subcategories")
        .with_column(ColumnDef::new("interaction_uuid", ColumnType::Text))
        .with_column(ColumnDef::new("subcategory_id", ColumnType::Integer))
        .with_column(ColumnDef::new("name", ColumnType::Text))
        .with_column(ColumnDef::new("value", ColumnType::Real))
        .with_column(ColumnDef::new("synced", ColumnType::Boolean).default_value(false))
}

fn identity_links() -> EntityDescriptor {
    EntityDescriptor::new("identity_links")
        .with_column(ColumnDef::new("client_uuid", ColumnType::Text).primary_key())
        .with_column(ColumnDef::new("server_id", ColumnType::Integer).nullable())
}

fn sync_records() -> EntityDescriptor {
    EntityDescriptor::new("sync_records")
        .with_column(ColumnDef::new("table_name", ColumnType::Text).primary_key())
        .with_column(ColumnDef::new("last_synced_at", ColumnType::Text))
}

fn tasks() -> EntityDescriptor {
    EntityDescriptor::new("tasks")
        .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .with_column(ColumnDef::new("name", ColumnType::Text))
        .with_column(ColumnDef::new("description", ColumnType::Text).nullable())
        .with_column(ColumnDef::new("sort_order", ColumnType::Integer).default_value(0))
        .with_searchable(&["name"])
        .with_relationship(Relationship::dependents(
            "interactions",
            "interactions",
            "id",
            "task_id",
            DeletePolicy::Nullify,
        ))
}

fn indicators() -> EntityDescriptor {
    EntityDescriptor::new("indicators")
        .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .with_column(ColumnDef::new("name", ColumnType::Text))
        .with_column(ColumnDef::new("category", ColumnType::Text).nullable())
        .with_searchable(&["name"])
        .with_relationship(
            Relationship::dependents(
                "subcategories",
                "indicator_subcategories",
                "id",
                "indicator_id",
                DeletePolicy::Cascade,
            )
            .eager(),
        )
        .with_relationship(
            Relationship::dependents(
                "prerequisites",
                "indicator_prerequisites",
                "id",
                "indicator_id",
                DeletePolicy::Cascade,
            )
            .eager(),
        )
}

fn indicator_subcategories() -> EntityDescriptor {
    EntityDescriptor::new("indicator_subcategories")
        .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .with_column(
            ColumnDef::new("indicator_id", ColumnType::Integer).references("indicators", "id"),
        )
        .with_column(ColumnDef::new("name", ColumnType::Text))
        .with_column(ColumnDef::new("unit", ColumnType::Text).nullable())
}

fn indicator_prerequisites() -> EntityDescriptor {
    EntityDescriptor::new("indicator_prerequisites")
        .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .with_column(
            ColumnDef::new("indicator_id", ColumnType::Integer).references("indicators", "id"),
        )
        .with_column(ColumnDef::new("name", ColumnType::Text))
}

fn organizations() -> EntityDescriptor {
    EntityDescriptor::new("organizations")
        .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .with_column(ColumnDef::new("name", ColumnType::Text))
}

// organization_id is a plain lookup value. Organizations are wholesale
// replaced on refresh, so a REFERENCES clause here would make the two
// tables' refresh order observable.
fn projects() -> EntityDescriptor {
    EntityDescriptor::new("projects")
        .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .with_column(ColumnDef::new("name", ColumnType::Text))
        .with_column(ColumnDef::new("organization_id", ColumnType::Integer).nullable())
}

fn vocabulary_terms() -> EntityDescriptor {
    EntityDescriptor::new("vocabulary_terms")
        .with_column(ColumnDef::new("id", ColumnType::Integer).primary_key())
        .with_column(ColumnDef::new("category", ColumnType::Text))
        .with_column(ColumnDef::new("term", ColumnType::Text))
        .with_column(ColumnDef::new("sort_order", ColumnType::Integer).default_value(0))
}
