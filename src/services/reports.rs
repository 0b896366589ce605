//! Report use-cases.
//!
//! Create persists a `processing` report and publishes a generation job. A
//! failed publish moves the report to `error`, so callers see both the error
//! and a terminal record.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Map as JsonMap, Value as JsonValue};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::config::QueueSettings;
use crate::context::RequestContext;
use crate::db::{ReportRepository, TemplateRepository};
use crate::error::{AppError, AppResult, BusinessError};
use crate::models::filter::{fields_from_filters, has_filters};
use crate::models::{
    CreateReportInput, MappedFields, OutputFormat, Report, ReportDownload, ReportJobMessage,
    ReportListFilter, ReportStatus,
};
use crate::services::cache::Cache;
use crate::services::datasource::DataSourceLookup;
use crate::services::field_validator::FieldValidator;
use crate::services::idempotency::{Acquisition, IdempotencyCoordinator};
use crate::services::queue::MessageQueue;
use crate::services::storage::ObjectStorage;

/// Reason recorded on reports whose job could not be queued.
pub const QUEUE_FAILURE_REASON: &str = "Failed to send report to queue";

const REPORT_ENTITY: &str = "report";
const TEMPLATE_ENTITY: &str = "templates";

/// Persisted report plus what the worker needs to render it.
struct PendingJob {
    report: Report,
    output_format: OutputFormat,
    mapped_fields: MappedFields,
}

#[derive(Clone)]
pub struct ReportService {
    reports: Arc<dyn ReportRepository>,
    templates: Arc<dyn TemplateRepository>,
    storage: Arc<dyn ObjectStorage>,
    queue: Arc<dyn MessageQueue>,
    validator: FieldValidator,
    idempotency: Option<IdempotencyCoordinator>,
    queue_settings: QueueSettings,
    max_schema_preview_keys: usize,
}

impl ReportService {
    pub fn new(
        reports: Arc<dyn ReportRepository>,
        templates: Arc<dyn TemplateRepository>,
        storage: Arc<dyn ObjectStorage>,
        queue: Arc<dyn MessageQueue>,
        registry: Arc<dyn DataSourceLookup>,
        queue_settings: QueueSettings,
        max_schema_preview_keys: usize,
    ) -> Self {
        Self {
            reports,
            templates,
            storage,
            queue,
            validator: FieldValidator::new(registry),
            idempotency: None,
            queue_settings,
            max_schema_preview_keys,
        }
    }

    /// Enable at-most-once create through `cache`.
    pub fn with_idempotency(mut self, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        self.idempotency = Some(IdempotencyCoordinator::new(cache, ttl));
        self
    }

    /// Create a report and queue its generation.
    #[instrument(name = "report.create", skip(self, ctx, input), fields(request_id = %ctx.request_id))]
    pub async fn create(&self, ctx: &RequestContext, input: &CreateReportInput) -> AppResult<Report> {
        let key = match &self.idempotency {
            Some(coordinator) => match coordinator.acquire::<_, Report>(ctx, input).await? {
                Acquisition::Replay(report) => return Ok(report),
                Acquisition::Acquired(key) => Some((coordinator, key)),
            },
            None => None,
        };

        let job = match self.persist(ctx, input).await {
            Ok(job) => job,
            Err(e) => {
                if let Some((coordinator, key)) = &key {
                    coordinator.release(key).await;
                }
                return Err(e);
            }
        };

        if let Err(publish_err) = self.publish(&job).await {
            error!(
                "Failed to publish report {}: {}",
                job.report.id, publish_err
            );

            match self.mark_failed(ctx, &job.report).await {
                Some(failed) => {
                    if let Some((coordinator, key)) = &key {
                        coordinator.publish(key, &failed).await;
                    }
                }
                None => {
                    if let Some((coordinator, key)) = &key {
                        coordinator.release(key).await;
                    }
                }
            }

            return Err(publish_err);
        }

        if let Some((coordinator, key)) = &key {
            coordinator.publish(key, &job.report).await;
        }

        info!(
            "Created report {} for template {}",
            job.report.id, job.report.template_id
        );

        Ok(job.report)
    }

    /// Resolve the template, validate filters and store a `processing` report.
    async fn persist(&self, ctx: &RequestContext, input: &CreateReportInput) -> AppResult<PendingJob> {
        let template_id =
            Uuid::parse_str(input.template_id.trim()).map_err(|_| BusinessError::InvalidTemplateId)?;

        let (output_format, mapped_fields) = self
            .templates
            .find_mapped_fields_and_output_format_by_id(ctx, template_id)
            .await?
            .ok_or_else(|| AppError::not_found(TEMPLATE_ENTITY))?;

        if let Some(filters) = input.filters.as_ref().filter(|f| has_filters(Some(*f))) {
            let filtered = fields_from_filters(filters, self.max_schema_preview_keys);
            self.validator.validate(ctx, &filtered).await?;
        }

        let report = Report::new(template_id, input.filters.clone());
        let report = self.reports.create_report(ctx, &report).await?;

        Ok(PendingJob {
            report,
            output_format,
            mapped_fields,
        })
    }

    async fn publish(&self, job: &PendingJob) -> AppResult<()> {
        let message = ReportJobMessage {
            report_id: job.report.id,
            template_id: job.report.template_id,
            output_format: job.output_format,
            mapped_fields: job.mapped_fields.clone(),
            filters: job.report.filters.clone(),
        };
        let body = serde_json::to_vec(&message)?;

        self.queue
            .publish_default(
                &self.queue_settings.exchange,
                &self.queue_settings.generate_report_key,
                &body,
            )
            .await
    }

    /// Move `report` to `error`. Returns the updated record, or `None` if the
    /// store could not be updated.
    async fn mark_failed(&self, ctx: &RequestContext, report: &Report) -> Option<Report> {
        let now = Utc::now();
        let mut metadata = JsonMap::new();
        metadata.insert(
            "error".to_string(),
            JsonValue::String(QUEUE_FAILURE_REASON.to_string()),
        );

        match self
            .reports
            .update_report_status_by_id(ctx, report.id, ReportStatus::Error, now, Some(metadata.clone()))
            .await
        {
            Ok(true) => Some(Report {
                status: ReportStatus::Error,
                metadata: Some(metadata),
                completed_at: Some(now),
                updated_at: now,
                ..report.clone()
            }),
            Ok(false) => {
                warn!("Report {} was no longer processing when marking it failed", report.id);
                None
            }
            Err(e) => {
                error!("Failed to mark report {} as failed: {}", report.id, e);
                None
            }
        }
    }

    #[instrument(name = "report.get", skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn get_by_id(&self, ctx: &RequestContext, id: Uuid) -> AppResult<Report> {
        self.reports
            .find_report_by_id(ctx, id)
            .await?
            .ok_or_else(|| AppError::not_found(REPORT_ENTITY))
    }

    #[instrument(name = "report.list", skip(self, ctx, filter), fields(request_id = %ctx.request_id))]
    pub async fn list(&self, ctx: &RequestContext, filter: &ReportListFilter) -> AppResult<Vec<Report>> {
        self.reports.list_reports(ctx, filter).await
    }

    /// Fetch the generated artifact of a finished report.
    #[instrument(name = "report.download", skip(self, ctx), fields(request_id = %ctx.request_id))]
    pub async fn download(&self, ctx: &RequestContext, id: Uuid) -> AppResult<ReportDownload> {
        let report = self.get_by_id(ctx, id).await?;
        if report.status != ReportStatus::Finished {
            return Err(BusinessError::ReportStatusNotFinished.into());
        }

        let output_format = self
            .templates
            .find_output_format_by_id(ctx, report.template_id)
            .await?
            .ok_or_else(|| AppError::not_found(TEMPLATE_ENTITY))?;

        let bytes = self.storage.get(&report.object_name(output_format)).await?;

        Ok(ReportDownload {
            bytes,
            file_name: report.download_file_name(output_format),
            content_type: output_format.mime_type(),
        })
    }
}
