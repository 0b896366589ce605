//! Field exposure policy for the CRM plugin data source.
//!
//! The CRM stores one physical collection per organization
//! (`<collection>_<organization_id>`) and encrypts personal data at rest.
//! Encrypted fields are never exposed, except through the curated views of
//! `holders` and `aliases`, whose values the report worker decrypts.

use crate::models::{CollectionSchema, TableDetails};

/// ID of the CRM plugin data source.
pub const PLUGIN_CRM_ID: &str = "plugin_crm";

/// Pseudo-table carrying the organization ID in persisted mapped fields.
pub const ORGANIZATION_TABLE: &str = "organization";

/// Hashed search index; always exposed.
const SEARCH_FIELD: &str = "search";

const HOLDERS_COLLECTION: &str = "holders";
const ALIASES_COLLECTION: &str = "aliases";

/// Field names stored encrypted, at any nesting depth.
const ENCRYPTED_FIELDS: &[&str] = &[
    "document",
    "name",
    "mother_name",
    "father_name",
    "primary_email",
    "secondary_email",
    "mobile_phone",
    "other_phone",
    "account",
    "iban",
];

const HOLDERS_FIELDS: &[&str] = &[
    "id",
    "external_id",
    "type",
    "name",
    "document",
    "addresses.primary.line1",
    "addresses.primary.line2",
    "addresses.primary.zip_code",
    "addresses.primary.city",
    "addresses.primary.state",
    "addresses.primary.country",
    "contact.primary_email",
    "contact.secondary_email",
    "contact.mobile_phone",
    "contact.other_phone",
    "natural_person.favorite_name",
    "natural_person.social_name",
    "natural_person.gender",
    "natural_person.birth_date",
    "natural_person.civil_status",
    "natural_person.nationality",
    "natural_person.mother_name",
    "natural_person.father_name",
    "natural_person.status",
    "legal_person.trade_name",
    "legal_person.activity",
    "legal_person.type",
    "legal_person.founding_date",
    "legal_person.size",
    "legal_person.status",
    "legal_person.representative.name",
    "legal_person.representative.document",
    "legal_person.representative.email",
    "legal_person.representative.role",
    "metadata",
    "created_at",
    "updated_at",
];

const ALIASES_FIELDS: &[&str] = &[
    "id",
    "holder_id",
    "ledger_id",
    "account_id",
    "type",
    "document",
    "banking_details.branch",
    "banking_details.account",
    "banking_details.type",
    "banking_details.opening_date",
    "banking_details.iban",
    "banking_details.country_code",
    "banking_details.bank_id",
    "metadata",
    "created_at",
    "updated_at",
];

pub fn is_plugin_crm(datasource_id: &str) -> bool {
    datasource_id == PLUGIN_CRM_ID
}

/// Collection name without its organization suffix (everything after the last `_`).
pub fn collection_base_name(name: &str) -> &str {
    match name.rfind('_') {
        Some(idx) => &name[..idx],
        None => name,
    }
}

/// Physical collection name of `table` for an organization.
pub fn organization_collection(table: &str, organization_id: &str) -> String {
    format!("{}_{}", table, organization_id)
}

/// Whether a field path may be exposed outside the curated views.
pub fn is_exposed_field(path: &str) -> bool {
    if path == SEARCH_FIELD || path.starts_with("search.") {
        return true;
    }
    !path
        .split('.')
        .any(|segment| ENCRYPTED_FIELDS.contains(&segment))
}

/// Fields exposed for a CRM collection.
pub fn exposed_fields(collection: &CollectionSchema) -> Vec<String> {
    match collection_base_name(&collection.name) {
        HOLDERS_COLLECTION => HOLDERS_FIELDS.iter().map(|f| f.to_string()).collect(),
        ALIASES_COLLECTION => ALIASES_FIELDS.iter().map(|f| f.to_string()).collect(),
        _ => collection
            .fields
            .iter()
            .map(|f| f.name.clone())
            .filter(|name| is_exposed_field(name))
            .collect(),
    }
}

/// Client-facing view of a CRM collection.
pub fn project_collection(collection: &CollectionSchema) -> TableDetails {
    TableDetails {
        name: collection_base_name(&collection.name).to_string(),
        fields: exposed_fields(collection),
    }
}
