//! Data source registry and schema discovery.
//!
//! The set of data sources is fixed at startup. Templates and filters may
//! only reference IDs that were registered; connections are opened lazily
//! when the first request leases a data source and closed when the last
//! lease is released.

pub mod crm;
pub mod details;
pub mod postgres;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::DataSourceSettings;
use crate::error::{AppError, AppResult};
use crate::models::{CollectionSchema, DataSourceKind, TableSchema};

pub use details::SchemaDiscovery;
pub use postgres::PostgresSchemaSource;

/// SQL database contract used for schema discovery.
#[async_trait]
pub trait SqlSchemaSource: Send + Sync {
    async fn connect(&self) -> AppResult<()>;

    /// Tables and columns of the given schemas.
    async fn get_database_schema(&self, schemas: &[String]) -> AppResult<Vec<TableSchema>>;

    async fn close_connection(&self) -> AppResult<()>;
}

/// Document database contract used for schema discovery.
#[async_trait]
pub trait DocumentSchemaSource: Send + Sync {
    async fn connect(&self) -> AppResult<()>;

    async fn get_database_schema(&self) -> AppResult<Vec<CollectionSchema>>;

    /// Collections belonging to one organization (collections suffixed `_<organization_id>`).
    async fn get_database_schema_for_organization(
        &self,
        organization_id: &str,
    ) -> AppResult<Vec<CollectionSchema>>;

    async fn close_connection(&self) -> AppResult<()>;
}

/// Driver behind a data source.
#[derive(Clone)]
pub enum SchemaSource {
    Sql(Arc<dyn SqlSchemaSource>),
    Document(Arc<dyn DocumentSchemaSource>),
}

/// Requests currently using a data source.
#[derive(Debug, Default)]
struct Leases {
    active: usize,
    connected: bool,
}

/// A registered data source.
pub struct DataSource {
    pub id: String,
    pub kind: DataSourceKind,
    /// External database name.
    pub database_name: String,
    /// SQL schemas to scan.
    pub schemas: Vec<String>,
    /// External organization ID (`plugin_crm` only).
    pub organization_id: Option<String>,
    source: SchemaSource,
    leases: Mutex<Leases>,
}

impl DataSource {
    pub fn sql(
        id: impl Into<String>,
        database_name: impl Into<String>,
        schemas: Vec<String>,
        source: Arc<dyn SqlSchemaSource>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: DataSourceKind::PostgreSql,
            database_name: database_name.into(),
            schemas,
            organization_id: None,
            source: SchemaSource::Sql(source),
            leases: Mutex::new(Leases::default()),
        }
    }

    pub fn document(
        id: impl Into<String>,
        database_name: impl Into<String>,
        organization_id: Option<String>,
        source: Arc<dyn DocumentSchemaSource>,
    ) -> Self {
        Self {
            id: id.into(),
            kind: DataSourceKind::MongoDb,
            database_name: database_name.into(),
            schemas: Vec::new(),
            organization_id: organization_id.filter(|o| !o.is_empty()),
            source: SchemaSource::Document(source),
            leases: Mutex::new(Leases::default()),
        }
    }

    /// Build a descriptor from configuration.
    ///
    /// PostgreSQL sources get a SeaORM driver; document sources need an
    /// injected driver since none is bound in this crate.
    pub fn from_settings(
        settings: &DataSourceSettings,
        document_source: Option<Arc<dyn DocumentSchemaSource>>,
    ) -> AppResult<Self> {
        match settings.kind {
            DataSourceKind::PostgreSql => Ok(Self::sql(
                settings.id.clone(),
                settings.database.clone(),
                settings.schemas.clone(),
                Arc::new(PostgresSchemaSource::new(settings.url.clone())),
            )),
            DataSourceKind::MongoDb => {
                let source = document_source.ok_or_else(|| {
                    AppError::Internal(format!(
                        "unsupported database type: no document driver bound for data source {}",
                        settings.id
                    ))
                })?;
                Ok(Self::document(
                    settings.id.clone(),
                    settings.database.clone(),
                    settings.organization_id.clone(),
                    source,
                ))
            }
        }
    }

    pub fn source(&self) -> &SchemaSource {
        &self.source
    }

    /// Organization ID if set and non-empty.
    pub fn organization_id(&self) -> Option<&str> {
        self.organization_id.as_deref().filter(|o| !o.is_empty())
    }

    pub async fn is_connected(&self) -> bool {
        self.leases.lock().await.connected
    }

    /// Take a lease, opening the connection on first use.
    ///
    /// Every successful call must be paired with one [`DataSource::release`].
    /// The lease lock is held across connect and close only, so discovery
    /// queries of concurrent requests run in parallel on one connection.
    pub async fn acquire(&self) -> AppResult<()> {
        let mut leases = self.leases.lock().await;

        if !leases.connected {
            match &self.source {
                SchemaSource::Sql(sql) => sql.connect().await?,
                SchemaSource::Document(doc) => doc.connect().await?,
            }
            leases.connected = true;
            debug!("Connected to data source {}", self.id);
        }

        leases.active += 1;
        Ok(())
    }

    /// Return a lease. The last one out closes the connection.
    pub async fn release(&self) -> AppResult<()> {
        let mut leases = self.leases.lock().await;
        leases.active = leases.active.saturating_sub(1);

        if leases.active > 0 || !leases.connected {
            return Ok(());
        }

        leases.connected = false;
        debug!("Closing data source {}", self.id);

        match &self.source {
            SchemaSource::Sql(sql) => sql.close_connection().await,
            SchemaSource::Document(doc) => doc.close_connection().await,
        }
    }
}

impl std::fmt::Debug for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSource")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("database_name", &self.database_name)
            .field("schemas", &self.schemas)
            .field("organization_id", &self.organization_id)
            .finish()
    }
}

/// Read-only view of the registered data sources.
pub trait DataSourceLookup: Send + Sync {
    /// Whether `id` was declared at startup.
    fn is_valid(&self, id: &str) -> bool;

    /// Descriptor for a declared `id`.
    fn get(&self, id: &str) -> Option<Arc<DataSource>>;
}

/// Process-wide registry; the ID set is frozen at construction.
pub struct DataSourceRegistry {
    allowed: BTreeSet<String>,
    sources: HashMap<String, Arc<DataSource>>,
}

impl DataSourceRegistry {
    pub fn new(sources: Vec<DataSource>) -> Self {
        let allowed = sources.iter().map(|s| s.id.clone()).collect();
        let sources = sources
            .into_iter()
            .map(|s| (s.id.clone(), Arc::new(s)))
            .collect();

        Self { allowed, sources }
    }

    /// Build the registry from configuration.
    ///
    /// `document_sources` supplies drivers for document data sources, keyed by ID.
    pub fn from_settings(
        settings: &[DataSourceSettings],
        mut document_sources: HashMap<String, Arc<dyn DocumentSchemaSource>>,
    ) -> AppResult<Self> {
        let mut sources = Vec::with_capacity(settings.len());
        for ds in settings {
            sources.push(DataSource::from_settings(ds, document_sources.remove(&ds.id))?);
        }

        let registry = Self::new(sources);
        info!(
            "Registered data sources: {}",
            registry.allowed.iter().cloned().collect::<Vec<_>>().join(", ")
        );

        Ok(registry)
    }

    /// Registered IDs in sorted order.
    pub fn ids(&self) -> Vec<String> {
        self.allowed.iter().cloned().collect()
    }
}

impl DataSourceLookup for DataSourceRegistry {
    fn is_valid(&self, id: &str) -> bool {
        self.allowed.contains(id)
    }

    fn get(&self, id: &str) -> Option<Arc<DataSource>> {
        if !self.is_valid(id) {
            return None;
        }
        self.sources.get(id).cloned()
    }
}
