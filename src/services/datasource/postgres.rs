//! PostgreSQL schema source backed by SeaORM.

use std::sync::Mutex;

use async_trait::async_trait;
use sea_orm::{
    ConnectOptions, Database, DatabaseBackend, DatabaseConnection, FromQueryResult, Statement,
};
use tracing::debug;

use super::SqlSchemaSource;
use crate::error::{AppError, AppResult};
use crate::models::{ColumnInfo, TableSchema};

/// Reads tables and columns from `information_schema`.
pub struct PostgresSchemaSource {
    url: String,
    conn: Mutex<Option<DatabaseConnection>>,
}

#[derive(Debug, FromQueryResult)]
struct ColumnRow {
    table_schema: String,
    table_name: String,
    column_name: String,
    data_type: String,
}

impl PostgresSchemaSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            conn: Mutex::new(None),
        }
    }

    /// Handle to the open pool, if any. The lock is released before any query.
    fn current(&self) -> Option<DatabaseConnection> {
        self.conn.lock().ok().and_then(|guard| guard.clone())
    }
}

/// Group rows ordered by schema and table into tables.
fn group_columns(rows: Vec<ColumnRow>) -> Vec<TableSchema> {
    let mut tables: Vec<TableSchema> = Vec::new();

    for row in rows {
        let column = ColumnInfo {
            name: row.column_name,
            data_type: row.data_type,
        };

        match tables.last_mut() {
            Some(last) if last.schema_name == row.table_schema && last.table_name == row.table_name => {
                last.columns.push(column);
            }
            _ => tables.push(TableSchema {
                schema_name: row.table_schema,
                table_name: row.table_name,
                columns: vec![column],
            }),
        }
    }

    tables
}

#[async_trait]
impl SqlSchemaSource for PostgresSchemaSource {
    async fn connect(&self) -> AppResult<()> {
        if self.current().is_some() {
            return Ok(());
        }

        let mut options = ConnectOptions::new(self.url.clone());
        options.max_connections(2).sqlx_logging(false);

        let conn = Database::connect(options)
            .await
            .map_err(|e| AppError::DataSource(format!("Failed to connect: {}", e)))?;

        if let Ok(mut guard) = self.conn.lock() {
            *guard = Some(conn);
        }

        Ok(())
    }

    async fn get_database_schema(&self, schemas: &[String]) -> AppResult<Vec<TableSchema>> {
        if schemas.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self
            .current()
            .ok_or_else(|| AppError::DataSource("Data source is not connected".to_string()))?;

        let placeholders: Vec<String> = (1..=schemas.len()).map(|i| format!("${}", i)).collect();
        let sql = format!(
            "SELECT table_schema, table_name, column_name, data_type \
             FROM information_schema.columns \
             WHERE table_schema IN ({}) \
             ORDER BY table_schema, table_name, ordinal_position",
            placeholders.join(", ")
        );
        let values: Vec<sea_orm::Value> = schemas.iter().map(|s| s.clone().into()).collect();

        let rows = ColumnRow::find_by_statement(Statement::from_sql_and_values(
            DatabaseBackend::Postgres,
            &sql,
            values,
        ))
        .all(&conn)
        .await
        .map_err(|e| AppError::DataSource(format!("Failed to read schema: {}", e)))?;

        let tables = group_columns(rows);
        debug!("Discovered {} tables in {:?}", tables.len(), schemas);

        Ok(tables)
    }

    async fn close_connection(&self) -> AppResult<()> {
        let conn = self.conn.lock().ok().and_then(|mut guard| guard.take());
        if let Some(conn) = conn {
            conn.close()
                .await
                .map_err(|e| AppError::DataSource(format!("Failed to close connection: {}", e)))?;
        }
        Ok(())
    }
}
