//! Template domain models.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MappedFields, PaginationParams};
use crate::error::{AppResult, BusinessError};

/// Extension of stored template blobs.
const TEMPLATE_FILE_EXTENSION: &str = "tpl";

/// Report output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Xml,
    Html,
    Pdf,
    Csv,
}

impl OutputFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Xml => "xml",
            Self::Html => "html",
            Self::Pdf => "pdf",
            Self::Csv => "csv",
        }
    }

    /// Parse a user-supplied format. Case-insensitive.
    pub fn parse(s: &str) -> AppResult<Self> {
        match s.trim().to_lowercase().as_str() {
            "xml" => Ok(Self::Xml),
            "html" => Ok(Self::Html),
            "pdf" => Ok(Self::Pdf),
            "csv" => Ok(Self::Csv),
            _ => Err(BusinessError::InvalidOutputFormat(s.to_string()).into()),
        }
    }

    /// MIME type used when serving a generated report.
    pub fn mime_type(&self) -> &'static str {
        match self {
            Self::Xml => "application/xml",
            Self::Html => "text/html",
            Self::Pdf => "application/pdf",
            Self::Csv => "text/csv",
        }
    }

    /// Check that a template body can produce this format.
    ///
    /// PDF reports are rendered from HTML, so both require an `<html` element.
    pub fn validate_content(&self, content: &str) -> AppResult<()> {
        let trimmed = content.trim_start();
        let compatible = match self {
            Self::Html | Self::Pdf => content.to_lowercase().contains("<html"),
            Self::Xml => trimmed.starts_with('<'),
            Self::Csv => content.contains(',') || content.contains(';'),
        };

        if trimmed.is_empty() || !compatible {
            return Err(BusinessError::FileContentInvalid(self.as_str().to_string()).into());
        }

        Ok(())
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A report template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    pub id: Uuid,
    pub output_format: OutputFormat,
    pub description: String,
    pub file_name: String,
    pub mapped_fields: MappedFields,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Template {
    /// Build a new template with a fresh UUIDv7 and derived file name.
    pub fn new(output_format: OutputFormat, description: &str, mapped_fields: MappedFields) -> Self {
        let id = Uuid::now_v7();
        let now = Utc::now();

        Template {
            id,
            output_format,
            description: description.to_string(),
            file_name: Self::file_name_for(id),
            mapped_fields,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    /// Blob name of a template: `<id>.tpl`.
    pub fn file_name_for(id: Uuid) -> String {
        format!("{}.{}", id, TEMPLATE_FILE_EXTENSION)
    }
}

/// Sparse update applied to a stored template. `None` leaves a field untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplatePatch {
    pub description: Option<String>,
    pub output_format: Option<OutputFormat>,
    pub mapped_fields: Option<MappedFields>,
    pub updated_at: DateTime<Utc>,
}

/// Filters for listing templates.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateListFilter {
    #[serde(default)]
    pub output_format: Option<OutputFormat>,
    /// Case-insensitive substring match on the description.
    #[serde(default)]
    pub description: Option<String>,
    /// Only templates created on this day (UTC).
    #[serde(default)]
    pub created_at: Option<NaiveDate>,
    #[serde(flatten)]
    pub pagination: PaginationParams,
}

/// An uploaded template file.
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

impl UploadedFile {
    pub fn new(file_name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            bytes: bytes.into(),
        }
    }

    /// Template source as UTF-8 text.
    pub fn text(&self) -> AppResult<&str> {
        std::str::from_utf8(&self.bytes).map_err(|_| {
            BusinessError::FileContentInvalid(format!("{} is not UTF-8 text", self.file_name))
                .into()
        })
    }
}
