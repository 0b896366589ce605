//! Database queries for templates.

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, EntityTrait, QueryFilter, QueryOrder, QuerySelect,
    Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::context::RequestContext;
use crate::entity::template::{self as template, ActiveModel, Entity as TemplateEntity};
use crate::error::{AppError, AppResult};
use crate::models::{
    MappedFields, OutputFormat, SortOrder, Template, TemplateListFilter, TemplatePatch,
};

use super::{DbPool, TemplateRepository, contains_ignore_case, created_on, tenant_condition};

fn parse_output_format(value: &str) -> AppResult<OutputFormat> {
    OutputFormat::parse(value)
        .map_err(|_| AppError::Database(format!("Stored output format is invalid: {}", value)))
}

fn parse_mapped_fields(value: JsonValue) -> AppResult<MappedFields> {
    serde_json::from_value(value)
        .map_err(|e| AppError::Database(format!("Stored mapped fields are invalid: {}", e)))
}

impl TryFrom<template::Model> for Template {
    type Error = AppError;

    fn try_from(model: template::Model) -> AppResult<Self> {
        Ok(Template {
            id: model.id,
            output_format: parse_output_format(&model.output_format)?,
            description: model.description,
            file_name: model.file_name,
            mapped_fields: parse_mapped_fields(model.mapped_fields)?,
            created_at: model.created_at,
            updated_at: model.updated_at,
            deleted_at: model.deleted_at,
        })
    }
}

/// Active templates of the context's tenant.
fn visible(ctx: &RequestContext) -> Condition {
    Condition::all()
        .add(tenant_condition(template::Column::TenantId, ctx))
        .add(template::Column::DeletedAt.is_null())
}

#[async_trait]
impl TemplateRepository for DbPool {
    async fn create_template(&self, ctx: &RequestContext, record: &Template) -> AppResult<Template> {
        let model = ActiveModel {
            id: Set(record.id),
            tenant_id: Set(ctx.tenant_id().map(str::to_string)),
            output_format: Set(record.output_format.as_str().to_string()),
            description: Set(record.description.clone()),
            file_name: Set(record.file_name.clone()),
            mapped_fields: Set(serde_json::to_value(&record.mapped_fields)?),
            created_at: Set(record.created_at),
            updated_at: Set(record.updated_at),
            deleted_at: Set(None),
        };

        let result = model
            .insert(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to insert template: {}", e)))?;

        result.try_into()
    }

    async fn find_template_by_id(&self, ctx: &RequestContext, id: Uuid) -> AppResult<Option<Template>> {
        let result = TemplateEntity::find_by_id(id)
            .filter(visible(ctx))
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get template: {}", e)))?;

        result.map(Template::try_from).transpose()
    }

    async fn list_templates(
        &self,
        ctx: &RequestContext,
        filter: &TemplateListFilter,
    ) -> AppResult<Vec<Template>> {
        let mut select = TemplateEntity::find().filter(visible(ctx));

        if let Some(format) = filter.output_format {
            select = select.filter(template::Column::OutputFormat.eq(format.as_str()));
        }

        if let Some(ref description) = filter.description {
            select = select.filter(contains_ignore_case("description", description));
        }

        if let Some(day) = filter.created_at {
            select = select.filter(created_on(template::Column::CreatedAt, day));
        }

        select = match filter.pagination.sort_order {
            SortOrder::Asc => select.order_by_asc(template::Column::CreatedAt),
            SortOrder::Desc => select.order_by_desc(template::Column::CreatedAt),
        };

        let templates = select
            .offset(filter.pagination.offset() as u64)
            .limit(filter.pagination.clamped_limit() as u64)
            .all(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to list templates: {}", e)))?;

        templates.into_iter().map(Template::try_from).collect()
    }

    async fn update_template(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        patch: &TemplatePatch,
    ) -> AppResult<bool> {
        let mut update = TemplateEntity::update_many()
            .col_expr(template::Column::UpdatedAt, Expr::value(patch.updated_at));

        if let Some(ref description) = patch.description {
            update = update.col_expr(template::Column::Description, Expr::value(description.clone()));
        }

        if let Some(format) = patch.output_format {
            update = update.col_expr(
                template::Column::OutputFormat,
                Expr::value(format.as_str().to_string()),
            );
        }

        if let Some(ref mapped_fields) = patch.mapped_fields {
            update = update.col_expr(
                template::Column::MappedFields,
                Expr::value(serde_json::to_value(mapped_fields)?),
            );
        }

        let result = update
            .filter(template::Column::Id.eq(id))
            .filter(visible(ctx))
            .exec(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to update template: {}", e)))?;

        Ok(result.rows_affected > 0)
    }

    async fn delete_template(&self, ctx: &RequestContext, id: Uuid, hard_delete: bool) -> AppResult<bool> {
        let rows_affected = if hard_delete {
            TemplateEntity::delete_many()
                .filter(template::Column::Id.eq(id))
                .filter(tenant_condition(template::Column::TenantId, ctx))
                .exec(self.connection())
                .await
                .map_err(|e| AppError::Database(format!("Failed to delete template: {}", e)))?
                .rows_affected
        } else {
            let now = Utc::now();
            TemplateEntity::update_many()
                .col_expr(template::Column::DeletedAt, Expr::value(now))
                .col_expr(template::Column::UpdatedAt, Expr::value(now))
                .filter(template::Column::Id.eq(id))
                .filter(visible(ctx))
                .exec(self.connection())
                .await
                .map_err(|e| AppError::Database(format!("Failed to soft delete template: {}", e)))?
                .rows_affected
        };

        Ok(rows_affected > 0)
    }

    async fn find_output_format_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> AppResult<Option<OutputFormat>> {
        let format: Option<String> = TemplateEntity::find_by_id(id)
            .filter(visible(ctx))
            .select_only()
            .column(template::Column::OutputFormat)
            .into_tuple()
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get template output format: {}", e)))?;

        format.as_deref().map(parse_output_format).transpose()
    }

    async fn find_mapped_fields_and_output_format_by_id(
        &self,
        ctx: &RequestContext,
        id: Uuid,
    ) -> AppResult<Option<(OutputFormat, MappedFields)>> {
        let row: Option<(String, JsonValue)> = TemplateEntity::find_by_id(id)
            .filter(visible(ctx))
            .select_only()
            .column(template::Column::OutputFormat)
            .column(template::Column::MappedFields)
            .into_tuple()
            .one(self.connection())
            .await
            .map_err(|e| AppError::Database(format!("Failed to get template fields: {}", e)))?;

        row.map(|(format, fields)| Ok((parse_output_format(&format)?, parse_mapped_fields(fields)?)))
            .transpose()
    }
}
