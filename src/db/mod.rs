//! Metadata store: connection management, migrations and the repository
//! contracts consumed by the template and report use-cases.

pub mod reports;
pub mod templates;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{ColumnTrait, ConnectOptions, Condition, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::info;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::error::{AppError, AppResult};
use crate::migration::Migrator;
use crate::models::{
    MappedFields, OutputFormat, Report, ReportListFilter, ReportStatus, Template,
    TemplateListFilter, TemplatePatch,
};

/// Template metadata store.
///
/// Every call is scoped to the context's tenant. Soft-deleted templates are
/// invisible to reads and updates.
#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn create_template(&self, ctx: &RequestContext, template: &Template) -> AppResult<Template>;

    async fn find_template_by_id(&self, ctx: &RequestContext, id: Uuid) -> AppResult<Option<Template>>;

    async fn list_templates(
        &self,
        ctx: &RequestContext,
        filter: &TemplateListFilter,
    ) -> AppResult<Vec<Template>>;

    /// Apply a sparse patch. Returns false when no active template matched.
    async fn update_template(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        patch: &TemplatePatch,
    ) -> AppResult<bool>;

    /// Soft delete (stamp `deleted_at`) or erase the row. Returns false when nothing matched.
    async fn delete_template(&self, ctx: &RequestContext, id: Uuid, hard_delete: bool) -> AppResult<bool>;

    async fn find_output_format_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> AppResult<Option<OutputFormat>>;

    async fn find_mapped_fields_and_output_format_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> AppResult<Option<(OutputFormat, MappedFields)>>;
}

/// Report metadata store.
#[async_trait]
pub trait ReportRepository: Send + Sync {
    async fn create_report(&self, ctx: &RequestContext, report: &Report) -> AppResult<Report>;

    async fn find_report_by_id(&self, ctx: &RequestContext, id: Uuid) -> AppResult<Option<Report>>;

    async fn list_reports(
        &self,
        ctx: &RequestContext,
        filter: &ReportListFilter,
    ) -> AppResult<Vec<Report>>;

    /// Move a `processing` report to a terminal status.
    ///
    /// Returns false when no report is still `processing` under `id`.
    async fn update_report_status_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: ReportStatus,
        completed_at: DateTime<Utc>,
        metadata: Option<JsonMap<String, JsonValue>>,
    ) -> AppResult<bool>;
}

/// SeaORM connection wrapper implementing both repositories.
#[derive(Clone)]
pub struct DbPool {
    conn: DatabaseConnection,
}

impl DbPool {
    /// Connect to the metadata database.
    pub async fn connect(database_url: &str) -> AppResult<Self> {
        let mut options = ConnectOptions::new(database_url.to_string());
        options.max_connections(20).sqlx_logging(false);

        let conn = Database::connect(options)
            .await
            .map_err(|e| AppError::Database(format!("Failed to connect to database: {}", e)))?;

        info!("Database connection established");
        Ok(Self { conn })
    }

    pub fn from_connection(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Get access to the connection for executing queries.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Apply pending migrations.
    pub async fn run_migrations(&self) -> AppResult<()> {
        Migrator::up(&self.conn, None)
            .await
            .map_err(|e| AppError::Database(format!("Migration failed: {}", e)))?;
        info!("Database migrations applied");
        Ok(())
    }
}

/// Rows visible to the context: its tenant's, or untenanted rows in single-tenant mode.
pub(crate) fn tenant_condition<C: ColumnTrait>(column: C, ctx: &RequestContext) -> Condition {
    match ctx.tenant_id() {
        Some(tenant) => Condition::all().add(column.eq(tenant)),
        None => Condition::all().add(column.is_null()),
    }
}

/// `[day 00:00, next day 00:00)` in UTC on `column`.
pub(crate) fn created_on<C: ColumnTrait>(column: C, day: NaiveDate) -> Condition {
    let start = day.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
    let end = day
        .succ_opt()
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc());

    let mut condition = Condition::all();
    if let Some(start) = start {
        condition = condition.add(column.gte(start));
    }
    if let Some(end) = end {
        condition = condition.add(column.lt(end));
    }
    condition
}

/// `ILIKE '%needle%'` with LIKE wildcards in `needle` escaped.
pub(crate) fn contains_ignore_case(column_sql: &str, needle: &str) -> Condition {
    let escaped = needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_");
    Condition::all().add(Expr::cust_with_values(
        format!("{} ILIKE $1", column_sql),
        [format!("%{}%", escaped)],
    ))
}
