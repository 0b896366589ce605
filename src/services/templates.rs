//! Template use-cases.
//!
//! Create writes metadata first and the blob second, hard-deleting the
//! metadata if the upload fails. Update writes the blob first: blob writes
//! are idempotent, so a failed metadata patch converges on the next update.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::context::RequestContext;
use crate::db::TemplateRepository;
use crate::error::{AppError, AppResult, BusinessError};
use crate::models::{
    MappedFields, OutputFormat, Template, TemplateListFilter, TemplatePatch, UploadedFile,
};
use crate::services::datasource::DataSourceLookup;
use crate::services::datasource::crm::{self, ORGANIZATION_TABLE};
use crate::services::field_validator::FieldValidator;
use crate::services::storage::ObjectStorage;
use crate::services::template_parser;

/// Deadline for the compensating delete after a failed upload.
const ROLLBACK_TIMEOUT: Duration = Duration::from_secs(5);

const TEMPLATE_ENTITY: &str = "template";

/// Add the `organization` pseudo-table to `plugin_crm` entries.
///
/// Other data sources, and `plugin_crm` without an organization ID, are
/// returned unchanged.
pub fn fields_for_persistence(
    mut fields: MappedFields,
    registry: &dyn DataSourceLookup,
) -> MappedFields {
    for (datasource, tables) in fields.iter_mut() {
        if !crm::is_plugin_crm(datasource) {
            continue;
        }
        let organization = registry
            .get(datasource)
            .and_then(|ds| ds.organization_id().map(str::to_string));
        if let Some(organization) = organization {
            tables.insert(ORGANIZATION_TABLE.to_string(), vec![organization]);
        }
    }
    fields
}

#[derive(Clone)]
pub struct TemplateService {
    repository: Arc<dyn TemplateRepository>,
    storage: Arc<dyn ObjectStorage>,
    registry: Arc<dyn DataSourceLookup>,
    validator: FieldValidator,
}

impl TemplateService {
    pub fn new(
        repository: Arc<dyn TemplateRepository>,
        storage: Arc<dyn ObjectStorage>,
        registry: Arc<dyn DataSourceLookup>,
    ) -> Self {
        Self {
            repository,
            storage,
            validator: FieldValidator::new(registry.clone()),
            registry,
        }
    }

    /// Extract and validate the fields of a template file.
    ///
    /// Returns the fields as they are persisted.
    async fn check_file(
        &self,
        ctx: &RequestContext,
        file: &UploadedFile,
        output_format: OutputFormat,
    ) -> AppResult<MappedFields> {
        let fields = template_parser::extract_fields(file.text()?)?;
        self.check_fields(ctx, file, fields, output_format).await
    }

    /// Validate already extracted fields against `output_format` and the data sources.
    async fn check_fields(
        &self,
        ctx: &RequestContext,
        file: &UploadedFile,
        fields: MappedFields,
        output_format: OutputFormat,
    ) -> AppResult<MappedFields> {
        output_format.validate_content(file.text()?)?;

        self.validator.validate(ctx, &fields).await?;

        Ok(fields_for_persistence(fields, self.registry.as_ref()))
    }

    /// Create a template from an uploaded file.
    #[instrument(
        name = "template.create",
        skip(self, ctx, file, description),
        fields(request_id = %ctx.request_id, file_name = %file.file_name)
    )]
    pub async fn create(
        &self,
        ctx: &RequestContext,
        file: &UploadedFile,
        output_format: &str,
        description: &str,
    ) -> AppResult<Template> {
        let output_format = OutputFormat::parse(output_format)?;
        let mapped_fields = self.check_file(ctx, file, output_format).await?;

        let template = Template::new(output_format, description, mapped_fields);
        let created = self.repository.create_template(ctx, &template).await?;

        if let Err(upload_err) = self
            .storage
            .put(
                &created.file_name,
                created.output_format.as_str(),
                file.bytes.clone(),
            )
            .await
        {
            error!(
                "Failed to upload template {}: {}; rolling back",
                created.id, upload_err
            );
            self.rollback_create(ctx, created.id).await;
            return Err(upload_err);
        }

        info!(
            "Created template {} ({}, {} data sources)",
            created.id,
            created.output_format,
            created.mapped_fields.len()
        );

        Ok(created)
    }

    async fn rollback_create(&self, ctx: &RequestContext, id: Uuid) {
        match tokio::time::timeout(
            ROLLBACK_TIMEOUT,
            self.repository.delete_template(ctx, id, true),
        )
        .await
        {
            Ok(Ok(_)) => info!("Rolled back template {}", id),
            Ok(Err(e)) => error!("Failed to roll back template {}: {}", id, e),
            Err(_) => error!(
                "Rolling back template {} timed out after {:?}",
                id, ROLLBACK_TIMEOUT
            ),
        }
    }

    /// Update description, output format and/or file.
    ///
    /// A new output format requires a new file.
    #[instrument(
        name = "template.update",
        skip(self, ctx, output_format, description, file),
        fields(request_id = %ctx.request_id)
    )]
    pub async fn update(
        &self,
        ctx: &RequestContext,
        id: Uuid,
        output_format: Option<&str>,
        description: Option<&str>,
        file: Option<&UploadedFile>,
    ) -> AppResult<Template> {
        let output_format = output_format.filter(|f| !f.trim().is_empty());
        if output_format.is_some() && file.is_none() {
            return Err(BusinessError::OutputFormatWithoutTemplateFile.into());
        }
        let new_format = output_format.map(OutputFormat::parse).transpose()?;

        let mut patch = TemplatePatch {
            description: description.map(str::to_string),
            output_format: new_format,
            mapped_fields: None,
            updated_at: Utc::now(),
        };

        if let Some(file) = file {
            // Script tags are rejected before the store is touched
            let fields = template_parser::extract_fields(file.text()?)?;

            let current = self.get_by_id(ctx, id).await?;
            let effective_format = new_format.unwrap_or(current.output_format);

            patch.mapped_fields =
                Some(self.check_fields(ctx, file, fields, effective_format).await?);

            self.storage
                .put(
                    &current.file_name,
                    effective_format.as_str(),
                    file.bytes.clone(),
                )
                .await?;
        }

        match self.repository.update_template(ctx, id, &patch).await {
            Ok(true) => {}
            Ok(false) => return Err(AppError::not_found(TEMPLATE_ENTITY)),
            Err(e) => {
                if file.is_some() {
                    warn!(
                        "Template {} blob was replaced but its metadata update failed: {}",
                        id, e
                    );
                }
                return Err(e);
            }
        }

        info!("Updated template {}", id);
        self.get_by_id(ctx, id).await
    }

    /// Soft or hard delete. A hard delete also removes the blob, best-effort.
    #[instrument(name = "template.delete", skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn delete(&self, ctx: &RequestContext, id: Uuid, hard_delete: bool) -> AppResult<()> {
        if !self.repository.delete_template(ctx, id, hard_delete).await? {
            return Err(AppError::not_found(TEMPLATE_ENTITY));
        }

        if hard_delete {
            let file_name = Template::file_name_for(id);
            if let Err(e) = self.storage.delete(&file_name).await {
                warn!("Failed to delete template blob {}: {}", file_name, e);
            }
        }

        info!("Deleted template {} (hard: {})", id, hard_delete);
        Ok(())
    }

    #[instrument(name = "template.get", skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn get_by_id(&self, ctx: &RequestContext, id: Uuid) -> AppResult<Template> {
        self.repository
            .find_template_by_id(ctx, id)
            .await?
            .ok_or_else(|| AppError::not_found(TEMPLATE_ENTITY))
    }

    #[instrument(name = "template.list", skip(self, ctx, filter), fields(request_id = %ctx.request_id))]
    pub async fn list(
        &self,
        ctx: &RequestContext,
        filter: &TemplateListFilter,
    ) -> AppResult<Vec<Template>> {
        self.repository.list_templates(ctx, filter).await
    }
}
