//! Report filter models.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::MappedFields;

/// `datasource -> table -> field -> condition`.
pub type ReportFilters = BTreeMap<String, BTreeMap<String, BTreeMap<String, FilterCondition>>>;

/// Comparators applied to one field. Empty arrays are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FilterCondition {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub equals: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub not_equals: Vec<JsonValue>,
    #[serde(default, rename = "in", skip_serializing_if = "Vec::is_empty")]
    pub in_values: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub greater_than: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub less_than: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub greater_or_equal: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub less_or_equal: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub between: Vec<JsonValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub like: Vec<JsonValue>,
}

impl FilterCondition {
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty()
            && self.not_equals.is_empty()
            && self.in_values.is_empty()
            && self.greater_than.is_empty()
            && self.less_than.is_empty()
            && self.greater_or_equal.is_empty()
            && self.less_or_equal.is_empty()
            && self.between.is_empty()
            && self.like.is_empty()
    }
}

/// Whether a filter set restricts anything.
pub fn has_filters(filters: Option<&ReportFilters>) -> bool {
    filters.is_some_and(|f| {
        f.values()
            .flat_map(|tables| tables.values())
            .any(|fields| !fields.is_empty())
    })
}

/// Field map referenced by a filter set, keeping at most `max_fields` per table.
///
/// Fields are taken in key order so the preview is deterministic.
pub fn fields_from_filters(filters: &ReportFilters, max_fields: usize) -> MappedFields {
    let mut mapped = MappedFields::new();

    for (datasource, tables) in filters {
        for (table, fields) in tables {
            let names: Vec<String> = fields.keys().take(max_fields).cloned().collect();
            if names.is_empty() {
                continue;
            }
            mapped
                .entry(datasource.clone())
                .or_default()
                .insert(table.clone(), names);
        }
    }

    mapped
}
