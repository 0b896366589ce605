//! Migration: Create templates table and shared trigger function.

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
                -- Shared trigger function for updated_at
                CREATE OR REPLACE FUNCTION update_updated_at_column()
                RETURNS TRIGGER AS $$
                BEGIN
                    NEW.updated_at = NOW();
                    RETURN NEW;
                END;
                $$ LANGUAGE plpgsql;

                CREATE TABLE templates (
                    id UUID PRIMARY KEY, -- UUIDv7 for time-ordered sorting
                    tenant_id VARCHAR(255), -- NULL in single-tenant mode
                    output_format VARCHAR(10) NOT NULL
                        CHECK (output_format IN ('xml', 'html', 'pdf', 'csv')),
                    description TEXT NOT NULL DEFAULT '',
                    file_name VARCHAR(100) NOT NULL,

                    -- {datasource: {table: [field, ...]}}
                    mapped_fields JSONB NOT NULL DEFAULT '{}'::jsonb,

                    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    deleted_at TIMESTAMPTZ
                );

                -- Listing per tenant (active only)
                CREATE INDEX idx_templates_tenant_created_at ON templates(tenant_id, created_at DESC)
                    WHERE deleted_at IS NULL;

                CREATE INDEX idx_templates_output_format ON templates(output_format)
                    WHERE deleted_at IS NULL;

                CREATE TRIGGER update_templates_updated_at
                    BEFORE UPDATE ON templates
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
                DROP TRIGGER IF EXISTS update_templates_updated_at ON templates;
                DROP TABLE IF EXISTS templates CASCADE;
                DROP FUNCTION IF EXISTS update_updated_at_column();
                "#,
            )
            .await?;

        Ok(())
    }
}
