//! Report domain models and DTOs.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map as JsonMap, Value as JsonValue};
use uuid::Uuid;

use super::{MappedFields, OutputFormat, PaginationParams, ReportFilters};
use crate::error::{AppError, AppResult};

/// Report status.
///
/// `Processing` is the only non-terminal state. A report moves to exactly
/// one of `Finished` or `Error` and never leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Processing,
    Finished,
    Error,
}

impl ReportStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Finished => "finished",
            Self::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "processing" => Some(Self::Processing),
            "finished" => Some(Self::Finished),
            "error" => Some(Self::Error),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Processing)
    }

    /// Validate a status change.
    pub fn transition(self, next: ReportStatus) -> AppResult<ReportStatus> {
        if self == Self::Processing && next.is_terminal() {
            Ok(next)
        } else {
            Err(AppError::Internal(format!(
                "illegal report status transition {} -> {}",
                self, next
            )))
        }
    }
}

impl std::fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A report generation request and its outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: Uuid,
    pub template_id: Uuid,
    pub status: ReportStatus,
    #[serde(default)]
    pub filters: Option<ReportFilters>,
    /// Free-form; `error` holds the failure reason for `Error` reports.
    #[serde(default)]
    pub metadata: Option<JsonMap<String, JsonValue>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Report {
    /// Build a new `Processing` report with a fresh UUIDv7.
    pub fn new(template_id: Uuid, filters: Option<ReportFilters>) -> Self {
        let now = Utc::now();

        Report {
            id: Uuid::now_v7(),
            template_id,
            status: ReportStatus::Processing,
            filters,
            metadata: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Object name of the generated artifact: `<templateID>/<reportID>.<format>`.
    pub fn object_name(&self, format: OutputFormat) -> String {
        format!("{}/{}", self.template_id, self.download_file_name(format))
    }

    /// File name offered to the client: `<reportID>.<format>`.
    pub fn download_file_name(&self, format: OutputFormat) -> String {
        format!("{}.{}", self.id, format.as_str())
    }
}

/// Body of a create-report request.
///
/// Serialized form is the canonical input of the idempotency fingerprint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateReportInput {
    #[serde(rename = "templateId")]
    pub template_id: String,
    #[serde(default)]
    pub filters: Option<ReportFilters>,
}

/// Job message published to the report worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportJobMessage {
    #[serde(rename = "reportID")]
    pub report_id: Uuid,
    #[serde(rename = "templateID")]
    pub template_id: Uuid,
    #[serde(rename = "outputFormat")]
    pub output_format: OutputFormat,
    #[serde(rename = "mappedFields")]
    pub mapped_fields: MappedFields,
    pub filters: Option<ReportFilters>,
}

/// Filters for listing reports.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportListFilter {
    #[serde(default)]
    pub status: Option<ReportStatus>,
    #[serde(default)]
    pub template_id: Option<Uuid>,
    /// Only reports created on this day (UTC).
    #[serde(default)]
    pub created_at: Option<NaiveDate>,
    #[serde(flatten)]
    pub pagination: PaginationParams,
}

/// A generated report ready to be served.
#[derive(Debug, Clone)]
pub struct ReportDownload {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub content_type: &'static str,
}
