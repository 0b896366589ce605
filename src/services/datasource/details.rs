//! Schema discovery with a per-tenant cache in front of it.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, instrument, warn};

use super::crm;
use super::{DataSource, DataSourceLookup, SchemaSource};
use crate::config::{DATASOURCE_DETAILS_KEY_PREFIX, DEFAULT_SQL_SCHEMA};
use crate::context::RequestContext;
use crate::error::{AppResult, BusinessError};
use crate::models::{CollectionSchema, DataSourceDetails, TableDetails, TableSchema};
use crate::services::cache::Cache;
use crate::services::tenant::scoped_key;

/// Raw catalog as returned by a driver.
#[derive(Debug, Clone)]
pub enum DiscoveredSchema {
    Tables(Vec<TableSchema>),
    Collections(Vec<CollectionSchema>),
}

/// Fetch the raw catalog of a connected data source.
///
/// SQL sources scan their configured schemas (`public` when none are set);
/// `plugin_crm` is narrowed to its organization's collections.
pub async fn discover(ds: &DataSource) -> AppResult<DiscoveredSchema> {
    match ds.source() {
        SchemaSource::Sql(sql) => {
            let schemas = if ds.schemas.is_empty() {
                vec![DEFAULT_SQL_SCHEMA.to_string()]
            } else {
                ds.schemas.clone()
            };
            Ok(DiscoveredSchema::Tables(
                sql.get_database_schema(&schemas).await?,
            ))
        }
        SchemaSource::Document(doc) => {
            let collections = match ds.organization_id() {
                Some(org) if crm::is_plugin_crm(&ds.id) => {
                    doc.get_database_schema_for_organization(org).await?
                }
                _ => doc.get_database_schema().await?,
            };
            Ok(DiscoveredSchema::Collections(collections))
        }
    }
}

/// Discover under a lease. A close failure replaces a successful result.
pub async fn discover_and_close(ds: &DataSource) -> AppResult<DiscoveredSchema> {
    ds.acquire().await?;

    let discovered = discover(ds).await;
    let closed = ds.release().await;

    match (discovered, closed) {
        (Ok(schema), Ok(())) => Ok(schema),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(err), Ok(())) => Err(err),
        (Err(err), Err(close_err)) => {
            warn!(
                "Failed to close data source {} after discovery error: {}",
                ds.id, close_err
            );
            Err(err)
        }
    }
}

/// Client-facing view of a discovered catalog.
pub fn project(ds: &DataSource, schema: DiscoveredSchema) -> DataSourceDetails {
    let tables = match schema {
        DiscoveredSchema::Tables(tables) => tables
            .iter()
            .map(|table| TableDetails {
                name: if table.schema_name == DEFAULT_SQL_SCHEMA {
                    table.table_name.clone()
                } else {
                    table.qualified_name()
                },
                fields: table.column_names(),
            })
            .collect(),
        DiscoveredSchema::Collections(collections) if crm::is_plugin_crm(&ds.id) => {
            collections.iter().map(crm::project_collection).collect()
        }
        DiscoveredSchema::Collections(collections) => collections
            .into_iter()
            .map(|collection| TableDetails {
                name: collection.name,
                fields: collection.fields.into_iter().map(|f| f.name).collect(),
            })
            .collect(),
    };

    DataSourceDetails {
        id: ds.id.clone(),
        external_name: ds.database_name.clone(),
        kind: ds.kind,
        tables,
    }
}

/// Discovers data-source schemas and memoizes them per tenant.
#[derive(Clone)]
pub struct SchemaDiscovery {
    registry: Arc<dyn DataSourceLookup>,
    cache: Arc<dyn Cache>,
    ttl: Duration,
}

impl SchemaDiscovery {
    pub fn new(registry: Arc<dyn DataSourceLookup>, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        Self {
            registry,
            cache,
            ttl,
        }
    }

    fn cache_key(ctx: &RequestContext, id: &str) -> String {
        scoped_key(ctx, &format!("{}:{}", DATASOURCE_DETAILS_KEY_PREFIX, id))
    }

    async fn cached(&self, key: &str) -> Option<DataSourceDetails> {
        let raw = match self.cache.get(key).await {
            Ok(raw) if !raw.is_empty() => raw,
            Ok(_) => return None,
            Err(e) => {
                warn!("Schema cache read failed for {}: {}", key, e);
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(details) => Some(details),
            Err(e) => {
                warn!("Discarding undecodable schema cache entry {}: {}", key, e);
                None
            }
        }
    }

    /// Schema of one registered data source.
    #[instrument(name = "datasource.get_details", skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn get_details(&self, ctx: &RequestContext, id: &str) -> AppResult<DataSourceDetails> {
        let key = Self::cache_key(ctx, id);

        if let Some(details) = self.cached(&key).await {
            debug!("Schema cache hit for {}", key);
            return Ok(details);
        }

        let ds = self
            .registry
            .get(id)
            .ok_or_else(|| BusinessError::MissingDataSource(vec![id.to_string()]))?;

        let schema = discover_and_close(&ds).await?;
        let details = project(&ds, schema);

        let payload = serde_json::to_string(&details)?;
        self.cache.set(&key, &payload, self.ttl).await?;

        debug!(
            "Cached schema of {} ({} tables) for {:?}",
            id,
            details.tables.len(),
            self.ttl
        );

        Ok(details)
    }
}
