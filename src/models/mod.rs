//! Domain models for the report manager.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod datasource;
pub mod filter;
pub mod report;
pub mod template;

// Re-export commonly used types
pub use datasource::{
    CollectionSchema, ColumnInfo, DataSourceDetails, DataSourceKind, FieldInfo, TableDetails,
    TableSchema,
};
pub use filter::{FilterCondition, ReportFilters};
pub use report::{
    CreateReportInput, Report, ReportDownload, ReportJobMessage, ReportListFilter, ReportStatus,
};
pub use template::{OutputFormat, Template, TemplateListFilter, TemplatePatch, UploadedFile};

/// `datasource -> table -> [field, ...]`.
///
/// Ordered maps keep serialization canonical, which the idempotency
/// fingerprint relies on.
pub type MappedFields = BTreeMap<String, BTreeMap<String, Vec<String>>>;

/// Sort direction on `created_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Pagination parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaginationParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    #[serde(default)]
    pub sort_order: SortOrder,
}

fn default_page() -> u32 {
    1
}

fn default_limit() -> u32 {
    10
}

impl PaginationParams {
    /// Calculate the offset for database queries.
    pub fn offset(&self) -> u32 {
        let page = self.page.unwrap_or(default_page());
        (page.saturating_sub(1)) * self.clamped_limit()
    }

    /// Clamp limit to maximum allowed value.
    pub fn clamped_limit(&self) -> u32 {
        self.limit.unwrap_or(default_limit()).clamp(1, 100)
    }
}
