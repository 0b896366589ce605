//! Validation of mapped fields against live data-source schemas.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::config::DEFAULT_SQL_SCHEMA;
use crate::context::RequestContext;
use crate::error::{AppResult, BusinessError};
use crate::models::{CollectionSchema, MappedFields, TableSchema};
use crate::services::datasource::crm;
use crate::services::datasource::details::{DiscoveredSchema, discover};
use crate::services::datasource::{DataSource, DataSourceLookup};

/// Tables still to be accounted for, per data source.
type PendingTables = BTreeMap<String, Vec<String>>;

/// Checks `datasource -> table -> [field]` maps against the registry and the
/// discovered schemas.
#[derive(Clone)]
pub struct FieldValidator {
    registry: Arc<dyn DataSourceLookup>,
}

impl FieldValidator {
    pub fn new(registry: Arc<dyn DataSourceLookup>) -> Self {
        Self { registry }
    }

    /// Resolve every data source, table and field of `fields`.
    #[instrument(name = "fields.validate", skip(self, ctx, fields), fields(request_id = %ctx.request_id))]
    pub async fn validate(&self, ctx: &RequestContext, fields: &MappedFields) -> AppResult<()> {
        let mut sources = Vec::with_capacity(fields.len());
        let mut missing = Vec::new();

        for id in fields.keys() {
            match self.registry.get(id) {
                Some(ds) if self.registry.is_valid(id) => sources.push(ds),
                _ => missing.push(id.clone()),
            }
        }

        if !missing.is_empty() {
            return Err(BusinessError::MissingDataSource(missing).into());
        }

        let mut pending = working_copy(fields, &sources);

        for ds in &sources {
            let tables = pending.remove(&ds.id).unwrap_or_default();
            validate_source(ds, tables).await?;
        }

        debug!("Validated fields of {} data sources", sources.len());
        Ok(())
    }
}

/// Deep copy of `fields` with `plugin_crm` tables renamed to their
/// per-organization collections.
fn working_copy(fields: &MappedFields, sources: &[Arc<DataSource>]) -> MappedFields {
    let mut copy = fields.clone();

    for ds in sources.iter().filter(|ds| crm::is_plugin_crm(&ds.id)) {
        let Some(org) = ds.organization_id() else {
            continue;
        };
        if let Some(tables) = copy.remove(&ds.id) {
            let renamed = tables
                .into_iter()
                .map(|(table, fields)| (crm::organization_collection(&table, org), fields))
                .collect();
            copy.insert(ds.id.clone(), renamed);
        }
    }

    copy
}

async fn validate_source(ds: &DataSource, pending: PendingTables) -> AppResult<()> {
    ds.acquire().await?;

    let outcome = match discover(ds).await {
        Ok(DiscoveredSchema::Tables(tables)) => check_tables(&ds.id, &tables, pending),
        Ok(DiscoveredSchema::Collections(collections)) => check_collections(ds, &collections, pending),
        Err(e) => Err(e),
    };

    let closed = ds.release().await;

    match (outcome, closed) {
        (Ok(()), Err(close_err)) => Err(close_err),
        (Err(e), Err(close_err)) => {
            warn!("Failed to close data source {} after validation: {}", ds.id, close_err);
            Err(e)
        }
        (outcome, Ok(())) => outcome,
    }
}

// ============================================================================
// SQL
// ============================================================================

/// Reject bare table names present in several schemas, none of them `public`.
pub fn check_ambiguity(pending: &PendingTables, tables: &[TableSchema]) -> AppResult<()> {
    for name in pending.keys() {
        if name.contains('.') || name.contains("__") {
            continue;
        }

        let schemas: BTreeSet<&str> = tables
            .iter()
            .filter(|t| &t.table_name == name)
            .map(|t| t.schema_name.as_str())
            .collect();

        if schemas.len() > 1 && !schemas.contains(DEFAULT_SQL_SCHEMA) {
            return Err(BusinessError::SchemaAmbiguous {
                table: name.clone(),
                schemas: schemas.into_iter().map(str::to_string).collect(),
            }
            .into());
        }
    }

    Ok(())
}

/// Whether `field` is a column, or a path into a JSON column.
fn column_matches(columns: &[String], field: &str) -> bool {
    columns.iter().any(|column| {
        field == column
            || field
                .strip_prefix(column.as_str())
                .is_some_and(|rest| rest.starts_with('.'))
    })
}

fn check_tables(datasource: &str, tables: &[TableSchema], mut pending: PendingTables) -> AppResult<()> {
    check_ambiguity(&pending, tables)?;

    // `public` wins bare-name lookups
    let mut ordered: Vec<&TableSchema> = tables.iter().collect();
    ordered.sort_by_key(|t| t.schema_name != DEFAULT_SQL_SCHEMA);

    for table in ordered {
        let keys = [
            format!("{}__{}", table.schema_name, table.table_name),
            table.qualified_name(),
            table.table_name.clone(),
        ];
        let Some(key) = keys.into_iter().find(|k| pending.contains_key(k)) else {
            continue;
        };

        let columns = table.column_names();
        let missing: Vec<String> = pending[&key]
            .iter()
            .filter(|field| !column_matches(&columns, field))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(BusinessError::MissingTableFields {
                datasource: datasource.to_string(),
                table: key,
                fields: missing,
            }
            .into());
        }

        pending.remove(&key);
    }

    leftovers(datasource, pending, None)
}

// ============================================================================
// Documents
// ============================================================================

/// Nested paths match when one is a prefix of the other.
fn document_field_matches(known: &[String], field: &str) -> bool {
    let is_parent = |parent: &str, child: &str| {
        child
            .strip_prefix(parent)
            .is_some_and(|rest| rest.starts_with('.'))
    };

    known
        .iter()
        .any(|k| k == field || is_parent(field, k.as_str()) || is_parent(k.as_str(), field))
}

fn check_collections(
    ds: &DataSource,
    collections: &[CollectionSchema],
    mut pending: PendingTables,
) -> AppResult<()> {
    let is_crm = crm::is_plugin_crm(&ds.id);

    for collection in collections {
        let Some(requested) = pending.get(&collection.name) else {
            continue;
        };

        let known: Vec<String> = if is_crm {
            crm::exposed_fields(collection)
        } else {
            collection.fields.iter().map(|f| f.name.clone()).collect()
        };

        let missing: Vec<String> = requested
            .iter()
            .filter(|field| !document_field_matches(&known, field))
            .cloned()
            .collect();

        if !missing.is_empty() {
            return Err(BusinessError::MissingTableFields {
                datasource: ds.id.clone(),
                table: display_name(ds, &collection.name),
                fields: missing,
            }
            .into());
        }

        pending.remove(&collection.name);
    }

    leftovers(&ds.id, pending, Some(ds))
}

/// Collection name as the template wrote it.
fn display_name(ds: &DataSource, name: &str) -> String {
    match ds.organization_id() {
        Some(org) if crm::is_plugin_crm(&ds.id) => name
            .strip_suffix(&format!("_{}", org))
            .unwrap_or(name)
            .to_string(),
        _ => name.to_string(),
    }
}

fn leftovers(datasource: &str, pending: PendingTables, ds: Option<&DataSource>) -> AppResult<()> {
    if pending.is_empty() {
        return Ok(());
    }

    let tables = pending
        .into_keys()
        .map(|name| match ds {
            Some(ds) => display_name(ds, &name),
            None => name,
        })
        .collect();

    Err(BusinessError::MissingSchemaTable {
        datasource: datasource.to_string(),
        tables,
    }
    .into())
}
