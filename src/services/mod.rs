//! Business logic services.

pub mod cache;
pub mod datasource;
pub mod field_validator;
pub mod idempotency;
pub mod queue;
pub mod reports;
pub mod storage;
pub mod template_parser;
pub mod templates;
pub mod tenant;

pub use reports::ReportService;
pub use templates::TemplateService;
