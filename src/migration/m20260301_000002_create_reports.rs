//! Migration: Create reports table.
//!
//! Reports are generation requests for a template; the worker fills in the
//! terminal status.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                CREATE TABLE reports (
                    id UUID PRIMARY KEY,
                    tenant_id VARCHAR(255),
                    -- No FK: templates may be hard-deleted while reports are kept
                    template_id UUID NOT NULL,
                    status VARCHAR(20) NOT NULL DEFAULT 'processing'
                        CHECK (status IN ('processing', 'finished', 'error')),

                    -- {datasource: {table: {field: {equals: [...], greater_than: [...]}}}}
                    filters JSONB,
                    -- Free-form; {"error": "..."} for failed reports
                    metadata JSONB,

                    completed_at TIMESTAMPTZ
                        CHECK ((status = 'processing') = (completed_at IS NULL)),
                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    deleted_at TIMESTAMPTZ
                );

                CREATE INDEX idx_reports_tenant_created_at ON reports(tenant_id, created_at DESC)
                    WHERE deleted_at IS NULL;

                CREATE INDEX idx_reports_template_id ON reports(template_id)
                    WHERE deleted_at IS NULL;

                CREATE INDEX idx_reports_status ON reports(status)
                    WHERE deleted_at IS NULL;

                CREATE TRIGGER update_reports_updated_at
                    BEFORE UPDATE ON reports
                    FOR EACH ROW
                    EXECUTE FUNCTION update_updated_at_column();
                "#,
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .get_connection()
            .execute_unprepared(
                r#"
                DROP TRIGGER IF EXISTS update_reports_updated_at ON reports;
                DROP TABLE IF EXISTS reports CASCADE;
                "#,
            )
            .await?;

        Ok(())
    }
}
