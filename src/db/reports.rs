//! Database queries for reports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::entity::report::{self as report, ActiveModel, Entity as ReportEntity};
use crate::error::{AppError, AppResult};
use crate::models::{Report, ReportFilters, ReportListFilter, ReportStatus, SortOrder};

use super::{DbPool, ReportRepository, created_on, tenant_condition};

impl TryFrom<report::Model> for Report {
    type Error = AppError;

    fn try_from(model: report::Model) -> AppResult<Self> {
        let status = ReportStatus::parse(&model.status).ok_or_else(|| {
            AppError::Database(format!("Stored report status is invalid: {}", model.status))
        })?;

        let filters: Option<ReportFilters> = match model.filters {
            Some(JsonValue::Null) | None => None,
            Some(value) => Some(serde_json::from_value(value).map_err(|e| {
                AppError::Database(format!("Stored report filters are invalid: {}", e))
            })?),
        };

        let metadata = match model.metadata {
            Some(JsonValue::Object(map)) => Some(map),
            _ => None,
        };

        Ok(Report {
            id: model.id,
            template_id: model.template_id,
            status,
            filters,
            metadata,
            completed_at: model.completed_at,
            created_at: model.created_at,
            updated_at: model.updated_at,
            deleted_at: model.deleted_at,
        })
    }
}

fn visible(ctx: &RequestContext) -> Condition {
    Condition::all()
        .add(tenant_condition(report::Column::TenantId, ctx))
        .add(report::Column::DeletedAt.is_null())
}

#[async_trait]
impl ReportRepository for DbPool {
    async fn create_report(&self, ctx: &RequestContext, record: &Report) -> AppResult<Report> {
        let filters = match record.filters {
            Some(ref filters) => Some(serde_json::to_value(filters)?),
            None => None,
        };

        let model = ActiveModel {
            id: Set(record.id),
            tenant_id: Set(ctx.tenant_id().map(str::to_string)),
            template_id: Set(record.template_id),
            status: Set(record.status.as_str().to_string()),
            filters: Set(filters),
            metadata: Set(record.metadata.clone().map(JsonValue::Object)),
            completed_at: Set(record.completed_at),
            created_at: Set(record.created_at),
            updated_at: Set(record.updated_at),
            deleted_at: Set(None),
        };

        let result = model
            .insert(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert report: {}", e)))?;

        result.try_into()
    }

    async fn find_report_by_id(&self, ctx: &RequestContext, id: Uuid) -> AppResult<Option<Report>> {
        let result = ReportEntity::find_by_id(id)
            .filter(visible(ctx))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get report: {}", e)))?;

        result.map(Report::try_from).transpose()
    }

    async fn list_reports(
        &self,
        ctx: &RequestContext,
        filter: &ReportListFilter,
    ) -> AppResult<Vec<Report>> {
        let mut select = ReportEntity::find().filter(visible(ctx));

        if let Some(status) = filter.status {
            select = select.filter(report::Column::Status.eq(status.as_str()));
        }

        if let Some(template_id) = filter.template_id {
            select = select.filter(report::Column::TemplateId.eq(template_id));
        }

        if let Some(day) = filter.created_at {
            select = select.filter(created_on(report::Column::CreatedAt, day));
        }

        select = match filter.pagination.sort_order {
            SortOrder::Asc => select.order_by_asc(report::Column::CreatedAt),
            SortOrder::Desc => select.order_by_desc(report::Column::CreatedAt),
        };

        let reports = select
            .offset(filter.pagination.offset() as u64)
            .limit(filter.pagination.clamped_limit() as u64)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list reports: {}", e)))?;

        reports.into_iter().map(Report::try_from).collect()
    }

    async fn update_report_status_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        status: ReportStatus,
        completed_at: DateTime<Utc>,
        metadata: Option<JsonMap<String, JsonValue>>,
    ) -> AppResult<bool> {
        let status = ReportStatus::Processing.transition(status)?;

        let mut update = ReportEntity::update_many()
            .col_expr(report::Column::Status, Expr::value(status.as_str().to_string()))
            .col_expr(report::Column::CompletedAt, Expr::value(completed_at))
            .col_expr(report::Column::UpdatedAt, Expr::value(Utc::now()));

        if let Some(metadata) = metadata {
            update = update.col_expr(
                report::Column::Metadata,
                Expr::value(JsonValue::Object(metadata)),
            );
        }

        // Terminal reports are never rewritten
        let result = update
            .filter(report::Column::Id.eq(id))
            .filter(report::Column::Status.eq(ReportStatus::Processing.as_str()))
            .filter(visible(ctx))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to update report status: {}", e)))?;

        Ok(result.rows_affected > 0)
    }
}
