//! Service wiring for embedding binaries.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::db::DbPool;
use crate::error::AppResult;
use crate::services::cache::LocalCache;
use crate::services::datasource::{DataSourceRegistry, DocumentSchemaSource, SchemaDiscovery};
use crate::services::queue::BroadcastQueue;
use crate::services::storage::Storage;
use crate::services::{ReportService, TemplateService};

/// Fully wired use-cases sharing one registry, cache and queue.
#[derive(Clone)]
pub struct AppState {
    pub templates: TemplateService,
    pub reports: ReportService,
    pub discovery: SchemaDiscovery,
    pub registry: Arc<DataSourceRegistry>,
    /// Report jobs go to its subscribers. Without one, report creation fails
    /// and the report is marked `error`.
    pub queue: BroadcastQueue,
}

impl AppState {
    /// Connect the metadata store, apply migrations and build the services.
    ///
    /// `document_sources` supplies drivers for document data sources, keyed by ID.
    pub async fn build(
        config: &Config,
        document_sources: HashMap<String, Arc<dyn DocumentSchemaSource>>,
    ) -> AppResult<Self> {
        info!("Environment: {}", config.environment);
        if config.is_development() {
            warn!("Running in DEVELOPMENT mode - do not use in production!");
        }

        let pool = Arc::new(DbPool::connect(&config.database_url).await?);
        pool.run_migrations().await?;

        let template_storage = Arc::new(Storage::new(&config.template_storage).await?);
        let report_storage = Arc::new(Storage::new(&config.report_storage).await?);

        let registry = Arc::new(DataSourceRegistry::from_settings(
            &config.datasources,
            document_sources,
        )?);
        let cache = Arc::new(LocalCache::new());
        let queue = BroadcastQueue::new();

        let discovery = SchemaDiscovery::new(registry.clone(), cache.clone(), config.cache.schema_ttl);

        let templates = TemplateService::new(pool.clone(), template_storage, registry.clone());

        let reports = ReportService::new(
            pool.clone(),
            pool,
            report_storage,
            Arc::new(queue.clone()),
            registry.clone(),
            config.queue.clone(),
            config.max_schema_preview_keys,
        )
        .with_idempotency(cache, config.cache.idempotency_ttl);

        info!(
            "Report manager ready ({} data sources)",
            registry.ids().len()
        );

        Ok(Self {
            templates,
            reports,
            discovery,
            registry,
            queue,
        })
    }
}
