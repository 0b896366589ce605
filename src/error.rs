//! Domain error types for the report manager.
//!
//! Uses thiserror for ergonomic error handling with automatic Display implementations.
//! Business errors carry a stable code and arguments; infrastructure errors
//! carry the upstream message verbatim.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use std::fmt;

/// End-user visible errors with stable codes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusinessError {
    #[error("Template ID is not a valid UUID")]
    InvalidTemplateId,

    #[error("No {0} entity was found for the given ID")]
    EntityNotFound(String),

    #[error("Data sources are not registered: {}", .0.join(", "))]
    MissingDataSource(Vec<String>),

    #[error("Fields {} do not exist in table {table} of data source {datasource}", .fields.join(", "))]
    MissingTableFields {
        datasource: String,
        table: String,
        fields: Vec<String>,
    },

    #[error("Tables {} do not exist in data source {datasource}", .tables.join(", "))]
    MissingSchemaTable {
        datasource: String,
        tables: Vec<String>,
    },

    #[error("Table {table} is ambiguous: it exists in schemas {}", .schemas.join(", "))]
    SchemaAmbiguous { table: String, schemas: Vec<String> },

    #[error("Output format '{0}' is not supported (expected xml, html, pdf or csv)")]
    InvalidOutputFormat(String),

    #[error("Output format can only be changed together with a new template file")]
    OutputFormatWithoutTemplateFile,

    #[error("Template contains a <script> tag")]
    ScriptTagDetected,

    #[error("Template file content is not valid for output format '{0}'")]
    FileContentInvalid(String),

    #[error("Report is not finished yet")]
    ReportStatusNotFinished,

    #[error("A request with the same idempotency key is still being processed")]
    DuplicateRequestInFlight,
}

impl BusinessError {
    /// Stable code for transports and clients.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidTemplateId => "INVALID_TEMPLATE_ID",
            Self::EntityNotFound(_) => "ENTITY_NOT_FOUND",
            Self::MissingDataSource(_) => "MISSING_DATA_SOURCE",
            Self::MissingTableFields { .. } => "MISSING_TABLE_FIELDS",
            Self::MissingSchemaTable { .. } => "MISSING_SCHEMA_TABLE",
            Self::SchemaAmbiguous { .. } => "SCHEMA_AMBIGUOUS",
            Self::InvalidOutputFormat(_) => "INVALID_OUTPUT_FORMAT",
            Self::OutputFormatWithoutTemplateFile => "OUTPUT_FORMAT_WITHOUT_TEMPLATE_FILE",
            Self::ScriptTagDetected => "SCRIPT_TAG_DETECTED",
            Self::FileContentInvalid(_) => "FILE_CONTENT_INVALID",
            Self::ReportStatusNotFinished => "REPORT_STATUS_NOT_FINISHED",
            Self::DuplicateRequestInFlight => "DUPLICATE_REQUEST_IN_FLIGHT",
        }
    }

    /// Message arguments, in the order they appear in the message.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::EntityNotFound(entity) => vec![entity.clone()],
            Self::MissingDataSource(ids) => ids.clone(),
            Self::MissingTableFields {
                datasource,
                table,
                fields,
            } => {
                let mut args = vec![datasource.clone(), table.clone()];
                args.extend(fields.iter().cloned());
                args
            }
            Self::MissingSchemaTable { datasource, tables } => {
                let mut args = vec![datasource.clone()];
                args.extend(tables.iter().cloned());
                args
            }
            Self::SchemaAmbiguous { table, schemas } => {
                let mut args = vec![table.clone()];
                args.extend(schemas.iter().cloned());
                args
            }
            Self::InvalidOutputFormat(value) | Self::FileContentInvalid(value) => {
                vec![value.clone()]
            }
            Self::InvalidTemplateId
            | Self::OutputFormatWithoutTemplateFile
            | Self::ScriptTagDetected
            | Self::ReportStatusNotFinished
            | Self::DuplicateRequestInFlight => Vec::new(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::EntityNotFound(_) => StatusCode::NOT_FOUND,
            Self::DuplicateRequestInFlight => StatusCode::CONFLICT,
            Self::MissingTableFields { .. }
            | Self::MissingSchemaTable { .. }
            | Self::SchemaAmbiguous { .. }
            | Self::FileContentInvalid(_) => StatusCode::UNPROCESSABLE_ENTITY,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

/// Application-level errors.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Business(#[from] BusinessError),

    /// Metadata store operation failed
    #[error("Database error: {0}")]
    Database(String),

    /// Object storage (S3) operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Distributed cache operation failed
    #[error("Cache error: {0}")]
    Cache(String),

    /// Message queue publish failed
    #[error("Queue error: {0}")]
    Queue(String),

    /// External data source (schema discovery, connection) failed
    #[error("Data source error: {0}")]
    DataSource(String),

    /// Programmer error or unreachable state
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Shorthand for `EntityNotFound`.
    pub fn not_found(entity: &str) -> Self {
        BusinessError::EntityNotFound(entity.to_string()).into()
    }

    /// The business error, if this is one.
    pub fn business(&self) -> Option<&BusinessError> {
        match self {
            AppError::Business(err) => Some(err),
            _ => None,
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Business(err) => err.status_code(),
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let body = match self {
            AppError::Business(err) => ErrorResponse {
                error: err.code().to_string(),
                message: err.to_string(),
                args: err.args(),
            },
            AppError::Database(err_str) => {
                tracing::error!("Database error: {}", err_str);
                ErrorResponse::internal("DATABASE_ERROR", "An internal database error occurred")
            }
            AppError::Storage(err_str) => {
                tracing::error!("Storage error: {}", err_str);
                ErrorResponse::internal("STORAGE_ERROR", "An internal storage error occurred")
            }
            AppError::Cache(err_str) => {
                tracing::error!("Cache error: {}", err_str);
                ErrorResponse::internal("CACHE_ERROR", "An internal cache error occurred")
            }
            AppError::Queue(err_str) => {
                tracing::error!("Queue error: {}", err_str);
                ErrorResponse::internal("QUEUE_ERROR", "An internal queue error occurred")
            }
            AppError::DataSource(err_str) => {
                tracing::error!("Data source error: {}", err_str);
                ErrorResponse::internal("DATA_SOURCE_ERROR", "A data source could not be reached")
            }
            AppError::Internal(err_str) => {
                tracing::error!("Internal error: {}", err_str);
                ErrorResponse::internal("INTERNAL_ERROR", "An internal error occurred")
            }
        };

        HttpResponse::build(self.status_code()).json(body)
    }
}

/// Error response body.
#[derive(Debug, serde::Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl ErrorResponse {
    fn internal(code: &str, message: &str) -> Self {
        Self {
            error: code.to_string(),
            message: message.to_string(),
            args: Vec::new(),
        }
    }
}

impl fmt::Display for ErrorResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;

// Conversion implementations for common error types

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON error: {}", err))
    }
}

impl From<sea_orm::DbErr> for AppError {
    fn from(err: sea_orm::DbErr) -> Self {
        AppError::Database(err.to_string())
    }
}
