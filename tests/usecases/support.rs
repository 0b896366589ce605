//! Shared fakes and fixtures for the use-case tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use reporter_manager::config::QueueSettings;
use reporter_manager::context::RequestContext;
use reporter_manager::db::{ReportRepository, TemplateRepository};
use reporter_manager::error::{AppError, AppResult};
use reporter_manager::models::{
    CollectionSchema, ColumnInfo, FieldInfo, MappedFields, OutputFormat, Report, ReportListFilter,
    ReportStatus, TableSchema, Template, TemplateListFilter, TemplatePatch, UploadedFile,
};
use reporter_manager::services::cache::LocalCache;
use reporter_manager::services::datasource::{
    DataSource, DataSourceRegistry, DocumentSchemaSource, SqlSchemaSource,
};
use reporter_manager::services::queue::{BroadcastQueue, MessageQueue, PublishedMessage};
use reporter_manager::services::storage::ObjectStorage;
use reporter_manager::services::{ReportService, TemplateService};

pub const EXCHANGE: &str = "reporter.generate-report.exchange";
pub const ROUTING_KEY: &str = "reporter.generate-report.key";
pub const MAX_PREVIEW_KEYS: usize = 10;

// ============================================================================
// Metadata store
// ============================================================================

struct Row<T> {
    tenant: Option<String>,
    record: T,
}

fn owned_by<T>(row: &Row<T>, ctx: &RequestContext) -> bool {
    row.tenant.as_deref() == ctx.tenant_id()
}

/// Tenant-aware in-memory implementation of both repositories.
#[derive(Default)]
pub struct MemoryStore {
    templates: Mutex<Vec<Row<Template>>>,
    reports: Mutex<Vec<Row<Report>>>,
    pub report_writes: AtomicUsize,
    pub fail_template_updates: AtomicBool,
    pub fail_status_updates: AtomicBool,
}

impl MemoryStore {
    /// Insert a template directly, bypassing validation.
    pub fn seed_template(&self, ctx: &RequestContext, template: Template) {
        self.templates.lock().unwrap().push(Row {
            tenant: ctx.tenant_id().map(str::to_string),
            record: template,
        });
    }

    /// Force a report into `status`, as the worker would.
    pub fn set_report_status(&self, id: Uuid, status: ReportStatus) {
        let mut reports = self.reports.lock().unwrap();
        if let Some(row) = reports.iter_mut().find(|r| r.record.id == id) {
            row.record.status = status;
            row.record.completed_at = status.is_terminal().then(Utc::now);
        }
    }

    pub fn report_count(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn template_count(&self) -> usize {
        self.templates.lock().unwrap().len()
    }
}

#[async_trait]
impl TemplateRepository for MemoryStore {
    async fn create_template(&self, ctx: &RequestContext, template: &Template) -> AppResult<Template> {
        self.seed_template(ctx, template.clone());
        Ok(template.clone())
    }

    async fn find_template_by_id(&self, ctx: &RequestContext, id: Uuid) -> AppResult<Option<Template>> {
        let templates = self.templates.lock().unwrap();
        Ok(templates
            .iter()
            .filter(|r| owned_by(r, ctx) && r.record.deleted_at.is_none())
            .find(|r| r.record.id == id)
            .map(|r| r.record.clone()))
    }

    async fn list_templates(
        &self,
        ctx: &RequestContext,
        filter: &TemplateListFilter,
    ) -> AppResult<Vec<Template>> {
        let templates = self.templates.lock().unwrap();
        Ok(templates
            .iter()
            .filter(|r| owned_by(r, ctx) && r.record.deleted_at.is_none())
            .filter(|r| filter.output_format.is_none_or(|f| r.record.output_format == f))
            .map(|r| r.record.clone())
            .collect())
    }

    async fn update_template(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        patch: &TemplatePatch,
    ) -> AppResult<bool> {
        if self.fail_template_updates.load(Ordering::SeqCst) {
            return Err(AppError::Database("connection reset".to_string()));
        }

        let mut templates = self.templates.lock().unwrap();
        let Some(row) = templates
            .iter_mut()
            .find(|r| owned_by(r, ctx) && r.record.deleted_at.is_none() && r.record.id == id)
        else {
            return Ok(false);
        };

        if let Some(ref description) = patch.description {
            row.record.description = description.clone();
        }
        if let Some(format) = patch.output_format {
            row.record.output_format = format;
        }
        if let Some(ref fields) = patch.mapped_fields {
            row.record.mapped_fields = fields.clone();
        }
        row.record.updated_at = patch.updated_at;
        Ok(true)
    }

    async fn delete_template(&self, ctx: &RequestContext, id: Uuid, hard_delete: bool) -> AppResult<bool> {
        let mut templates = self.templates.lock().unwrap();
        if hard_delete {
            let before = templates.len();
            templates.retain(|r| !(owned_by(r, ctx) && r.record.id == id));
            return Ok(templates.len() < before);
        }

        match templates
            .iter_mut()
            .find(|r| owned_by(r, ctx) && r.record.deleted_at.is_none() && r.record.id == id)
        {
            Some(row) => {
                row.record.deleted_at = Some(Utc::now());
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn find_output_format_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> AppResult<Option<OutputFormat>> {
        Ok(self
            .find_template_by_id(ctx, id)
            .await?
            .map(|t| t.output_format))
    }

    async fn find_mapped_fields_and_output_format_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> AppResult<Option<(OutputFormat, MappedFields)>> {
        Ok(self
            .find_template_by_id(ctx, id)
            .await?
            .map(|t| (t.output_format, t.mapped_fields)))
    }
}

#[async_trait]
impl ReportRepository for MemoryStore {
    async fn create_report(&self, ctx: &RequestContext, report: &Report) -> AppResult<Report> {
        self.report_writes.fetch_add(1, Ordering::SeqCst);
        self.reports.lock().unwrap().push(Row {
            tenant: ctx.tenant_id().map(str::to_string),
            record: report.clone(),
        });
        Ok(report.clone())
    }

    async fn find_report_by_id(&self, ctx: &RequestContext, id: Uuid) -> AppResult<Option<Report>> {
        let reports = self.reports.lock().unwrap();
        Ok(reports
            .iter()
            .find(|r| owned_by(r, ctx) && r.record.id == id)
            .map(|r| r.record.clone()))
    }

    async fn list_reports(
        &self,
        ctx: &RequestContext,
        filter: &ReportListFilter,
    ) -> AppResult<Vec<Report>> {
        let reports = self.reports.lock().unwrap();
        Ok(reports
            .iter()
            .filter(|r| owned_by(r, ctx))
            .filter(|r| filter.status.is_none_or(|s| r.record.status == s))
            .filter(|r| filter.template_id.is_none_or(|t| r.record.template_id == t))
            .map(|r| r.record.clone())
            .collect())
    }

    async fn update_report_status_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: ReportStatus,
        completed_at: DateTime<Utc>,
        metadata: Option<JsonMap<String, JsonValue>>,
    ) -> AppResult<bool> {
        if self.fail_status_updates.load(Ordering::SeqCst) {
            return Err(AppError::Database("connection reset".to_string()));
        }

        let mut reports = self.reports.lock().unwrap();
        let Some(row) = reports.iter_mut().find(|r| {
            owned_by(r, ctx) && r.record.id == id && r.record.status == ReportStatus::Processing
        }) else {
            return Ok(false);
        };

        row.record.status = ReportStatus::Processing.transition(status)?;
        row.record.completed_at = Some(completed_at);
        row.record.updated_at = Utc::now();
        if metadata.is_some() {
            row.record.metadata = metadata;
        }
        Ok(true)
    }
}

// ============================================================================
// Object storage
// ============================================================================

#[derive(Default)]
pub struct MemoryStorage {
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pub fail_puts: AtomicBool,
}

impl MemoryStorage {
    pub fn contains(&self, name: &str) -> bool {
        self.objects.lock().unwrap().contains_key(name)
    }

    pub fn insert(&self, name: &str, data: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), data.to_vec());
    }
}

#[async_trait]
impl ObjectStorage for MemoryStorage {
    async fn put(&self, name: &str, _content_type: &str, data: Vec<u8>) -> AppResult<()> {
        if self.fail_puts.load(Ordering::SeqCst) {
            return Err(AppError::Storage("bucket unavailable".to_string()));
        }
        self.objects.lock().unwrap().insert(name.to_string(), data);
        Ok(())
    }

    async fn get(&self, name: &str) -> AppResult<Vec<u8>> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .cloned()
            .ok_or_else(|| AppError::Storage(format!("no such key: {}", name)))
    }

    async fn delete(&self, name: &str) -> AppResult<()> {
        self.objects.lock().unwrap().remove(name);
        Ok(())
    }
}

// ============================================================================
// Queue
// ============================================================================

/// Broker that refuses every publish.
pub struct FailingQueue;

#[async_trait]
impl MessageQueue for FailingQueue {
    async fn publish_default(&self, _exchange: &str, _routing_key: &str, _message: &[u8]) -> AppResult<()> {
        Err(AppError::Queue("channel closed".to_string()))
    }
}

// ============================================================================
// Schema sources
// ============================================================================

pub struct StaticSql {
    tables: Vec<TableSchema>,
}

#[async_trait]
impl SqlSchemaSource for StaticSql {
    async fn connect(&self) -> AppResult<()> {
        Ok(())
    }

    async fn get_database_schema(&self, schemas: &[String]) -> AppResult<Vec<TableSchema>> {
        Ok(self
            .tables
            .iter()
            .filter(|t| schemas.contains(&t.schema_name))
            .cloned()
            .collect())
    }

    async fn close_connection(&self) -> AppResult<()> {
        Ok(())
    }
}

/// SQL source whose queries need the connection opened by `connect`, and
/// that takes `query_delay` to answer.
pub struct PooledSql {
    tables: Vec<TableSchema>,
    open: AtomicBool,
    query_delay: Duration,
}

impl PooledSql {
    pub fn new(tables: Vec<TableSchema>, query_delay: Duration) -> Self {
        Self {
            tables,
            open: AtomicBool::new(false),
            query_delay,
        }
    }
}

#[async_trait]
impl SqlSchemaSource for PooledSql {
    async fn connect(&self) -> AppResult<()> {
        self.open.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn get_database_schema(&self, schemas: &[String]) -> AppResult<Vec<TableSchema>> {
        tokio::time::sleep(self.query_delay).await;
        if !self.open.load(Ordering::SeqCst) {
            return Err(AppError::DataSource("Data source is not connected".to_string()));
        }
        Ok(self
            .tables
            .iter()
            .filter(|t| schemas.contains(&t.schema_name))
            .cloned()
            .collect())
    }

    async fn close_connection(&self) -> AppResult<()> {
        self.open.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub struct StaticCrm {
    collections: Vec<CollectionSchema>,
}

#[async_trait]
impl DocumentSchemaSource for StaticCrm {
    async fn connect(&self) -> AppResult<()> {
        Ok(())
    }

    async fn get_database_schema(&self) -> AppResult<Vec<CollectionSchema>> {
        Ok(self.collections.clone())
    }

    async fn get_database_schema_for_organization(
        &self,
        organization_id: &str,
    ) -> AppResult<Vec<CollectionSchema>> {
        let suffix = format!("_{}", organization_id);
        Ok(self
            .collections
            .iter()
            .filter(|c| c.name.ends_with(&suffix))
            .cloned()
            .collect())
    }

    async fn close_connection(&self) -> AppResult<()> {
        Ok(())
    }
}

pub fn table(schema: &str, name: &str, columns: &[&str]) -> TableSchema {
    TableSchema {
        schema_name: schema.to_string(),
        table_name: name.to_string(),
        columns: columns
            .iter()
            .map(|c| ColumnInfo {
                name: c.to_string(),
                data_type: "text".to_string(),
            })
            .collect(),
    }
}

pub fn collection(name: &str, fields: &[&str]) -> CollectionSchema {
    CollectionSchema {
        name: name.to_string(),
        fields: fields
            .iter()
            .map(|f| FieldInfo {
                name: f.to_string(),
                data_type: "string".to_string(),
            })
            .collect(),
    }
}

pub fn sql_source(id: &str, schemas: &[&str], tables: Vec<TableSchema>) -> DataSource {
    DataSource::sql(
        id,
        id,
        schemas.iter().map(|s| s.to_string()).collect(),
        Arc::new(StaticSql { tables }),
    )
}

pub fn crm_source(organization_id: Option<&str>, collections: Vec<CollectionSchema>) -> DataSource {
    DataSource::document(
        "plugin_crm",
        "crm",
        organization_id.map(str::to_string),
        Arc::new(StaticCrm { collections }),
    )
}

/// `midaz_onboarding` with `public.asset` and `public.account`.
pub fn onboarding_source() -> DataSource {
    sql_source(
        "midaz_onboarding",
        &["public"],
        vec![
            table("public", "asset", &["id", "name", "code"]),
            table("public", "account", &["id", "alias", "metadata"]),
        ],
    )
}

pub fn onboarding_registry() -> DataSourceRegistry {
    DataSourceRegistry::new(vec![onboarding_source()])
}

/// Onboarding registry backed by [`PooledSql`].
pub fn pooled_onboarding_registry(query_delay: Duration) -> DataSourceRegistry {
    let tables = vec![
        table("public", "asset", &["id", "name", "code"]),
        table("public", "account", &["id", "alias", "metadata"]),
    ];
    DataSourceRegistry::new(vec![DataSource::sql(
        "midaz_onboarding",
        "midaz_onboarding",
        vec!["public".to_string()],
        Arc::new(PooledSql::new(tables, query_delay)),
    )])
}

// ============================================================================
// Harness
// ============================================================================

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub template_storage: Arc<MemoryStorage>,
    pub report_storage: Arc<MemoryStorage>,
    pub queue: BroadcastQueue,
    pub cache: Arc<LocalCache>,
    pub templates: TemplateService,
    pub reports: ReportService,
    /// Stands in for the report worker so published jobs are routable.
    _worker: Option<broadcast::Receiver<PublishedMessage>>,
}

impl Harness {
    pub fn new(registry: DataSourceRegistry) -> Self {
        let queue = BroadcastQueue::new();
        let worker = queue.subscribe();
        Self::build(registry, queue.clone(), Arc::new(queue), Some(worker))
    }

    /// Harness whose in-process queue has no worker subscribed.
    pub fn without_worker(registry: DataSourceRegistry) -> Self {
        let queue = BroadcastQueue::new();
        Self::build(registry, queue.clone(), Arc::new(queue), None)
    }

    /// Harness whose report publishes always fail.
    pub fn with_failing_queue(registry: DataSourceRegistry) -> Self {
        Self::build(registry, BroadcastQueue::new(), Arc::new(FailingQueue), None)
    }

    fn build(
        registry: DataSourceRegistry,
        queue: BroadcastQueue,
        publisher: Arc<dyn MessageQueue>,
        worker: Option<broadcast::Receiver<PublishedMessage>>,
    ) -> Self {
        let registry = Arc::new(registry);
        let store = Arc::new(MemoryStore::default());
        let template_storage = Arc::new(MemoryStorage::default());
        let report_storage = Arc::new(MemoryStorage::default());
        let cache = Arc::new(LocalCache::new());

        let templates =
            TemplateService::new(store.clone(), template_storage.clone(), registry.clone());

        let reports = ReportService::new(
            store.clone(),
            store.clone(),
            report_storage.clone(),
            publisher,
            registry,
            QueueSettings {
                exchange: EXCHANGE.to_string(),
                generate_report_key: ROUTING_KEY.to_string(),
            },
            MAX_PREVIEW_KEYS,
        )
        .with_idempotency(cache.clone(), Duration::from_secs(60));

        Self {
            store,
            template_storage,
            report_storage,
            queue,
            cache,
            templates,
            reports,
            _worker: worker,
        }
    }

    /// Seed an active template directly into the store.
    pub fn seed_template(
        &self,
        ctx: &RequestContext,
        output_format: OutputFormat,
        mapped_fields: MappedFields,
    ) -> Template {
        let template = Template::new(output_format, "seeded", mapped_fields);
        self.store.seed_template(ctx, template.clone());
        template
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn html_file(body: &str) -> UploadedFile {
    UploadedFile::new("report.tpl", format!("<html><body>{}</body></html>", body))
}

pub fn fields(entries: &[(&str, &str, &[&str])]) -> MappedFields {
    let mut map = MappedFields::new();
    for (datasource, table, columns) in entries {
        map.entry(datasource.to_string())
            .or_default()
            .insert(table.to_string(), columns.iter().map(|c| c.to_string()).collect());
    }
    map
}
