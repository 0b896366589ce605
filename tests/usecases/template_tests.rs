//! Template create, update and delete flows.

use std::sync::atomic::Ordering;
use std::time::Duration;

use reporter_manager::context::RequestContext;
use reporter_manager::error::{AppError, BusinessError};
use reporter_manager::models::{OutputFormat, TemplateListFilter, UploadedFile};
use reporter_manager::services::datasource::DataSourceRegistry;

use super::support::{
    Harness, collection, crm_source, fields, html_file, onboarding_registry, onboarding_source,
    pooled_onboarding_registry, sql_source, table,
};

const ACCOUNT_LOOP: &str =
    "{% for a in midaz_onboarding.account %}<td>{{ a.alias }}</td><td>{{ a.id }}</td>{% endfor %}";

fn business(err: AppError) -> BusinessError {
    err.business().cloned().unwrap_or_else(|| panic!("expected a business error, got {err:?}"))
}

#[tokio::test]
async fn test_create_stores_metadata_and_blob() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();

    let template = harness
        .templates
        .create(&ctx, &html_file(ACCOUNT_LOOP), "PDF", "Account aliases")
        .await
        .unwrap();

    assert_eq!(template.output_format, OutputFormat::Pdf);
    assert_eq!(template.file_name, format!("{}.tpl", template.id));
    assert_eq!(
        template.mapped_fields,
        fields(&[("midaz_onboarding", "account", &["alias", "id"])])
    );
    assert!(harness.template_storage.contains(&template.file_name));

    let stored = harness.templates.get_by_id(&ctx, template.id).await.unwrap();
    assert_eq!(stored, template);
}

#[tokio::test]
async fn test_storage_failure_rolls_back_metadata() {
    let harness = Harness::new(onboarding_registry());
    harness.template_storage.fail_puts.store(true, Ordering::SeqCst);
    let ctx = RequestContext::new();

    let err = harness
        .templates
        .create(&ctx, &html_file(ACCOUNT_LOOP), "html", "Account aliases")
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Storage(_)));
    assert_eq!(harness.store.template_count(), 0);
    assert!(harness
        .templates
        .list(&ctx, &TemplateListFilter::default())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_ambiguous_bare_table_is_rejected() {
    let registry = DataSourceRegistry::new(vec![sql_source(
        "midaz_onboarding",
        &["billing", "sales"],
        vec![
            table("billing", "users", &["id", "email"]),
            table("sales", "users", &["id", "email"]),
        ],
    )]);
    let harness = Harness::new(registry);
    let file = html_file("{% for u in midaz_onboarding.users %}{{ u.email }}{% endfor %}");

    let err = harness
        .templates
        .create(&RequestContext::new(), &file, "html", "Users")
        .await
        .unwrap_err();

    assert_eq!(
        business(err),
        BusinessError::SchemaAmbiguous {
            table: "users".to_string(),
            schemas: vec!["billing".to_string(), "sales".to_string()],
        }
    );
    assert_eq!(harness.store.template_count(), 0);
}

#[tokio::test]
async fn test_public_schema_breaks_ties() {
    let registry = DataSourceRegistry::new(vec![sql_source(
        "midaz_onboarding",
        &["public", "sales"],
        vec![
            table("public", "users", &["id", "email"]),
            table("sales", "users", &["id"]),
        ],
    )]);
    let harness = Harness::new(registry);
    let file = html_file("{% for u in midaz_onboarding.users %}{{ u.email }}{% endfor %}");

    let template = harness
        .templates
        .create(&RequestContext::new(), &file, "html", "Users")
        .await
        .unwrap();

    assert_eq!(
        template.mapped_fields,
        fields(&[("midaz_onboarding", "users", &["email"])])
    );
}

#[tokio::test]
async fn test_qualified_table_reference() {
    let registry = DataSourceRegistry::new(vec![sql_source(
        "midaz_onboarding",
        &["billing", "sales"],
        vec![
            table("billing", "users", &["id", "email"]),
            table("sales", "users", &["id"]),
        ],
    )]);
    let harness = Harness::new(registry);
    let file = html_file(
        "{% for u in midaz_onboarding.billing__users %}{{ u.email }}{% endfor %}",
    );

    assert!(harness
        .templates
        .create(&RequestContext::new(), &file, "html", "Billing users")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_unknown_datasource_is_rejected() {
    let harness = Harness::new(onboarding_registry());
    let file = html_file("{% for l in midaz_ledger.ledger %}{{ l.name }}{% endfor %}");

    let err = harness
        .templates
        .create(&RequestContext::new(), &file, "html", "Ledgers")
        .await
        .unwrap_err();

    assert_eq!(
        business(err),
        BusinessError::MissingDataSource(vec!["midaz_ledger".to_string()])
    );
}

#[tokio::test]
async fn test_unknown_fields_and_tables_are_rejected() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();

    let err = harness
        .templates
        .create(
            &ctx,
            &html_file("{% for a in midaz_onboarding.account %}{{ a.balance }}{% endfor %}"),
            "html",
            "Balances",
        )
        .await
        .unwrap_err();
    assert_eq!(
        business(err),
        BusinessError::MissingTableFields {
            datasource: "midaz_onboarding".to_string(),
            table: "account".to_string(),
            fields: vec!["balance".to_string()],
        }
    );

    let err = harness
        .templates
        .create(
            &ctx,
            &html_file("{% for p in midaz_onboarding.portfolio %}{{ p.name }}{% endfor %}"),
            "html",
            "Portfolios",
        )
        .await
        .unwrap_err();
    assert_eq!(
        business(err),
        BusinessError::MissingSchemaTable {
            datasource: "midaz_onboarding".to_string(),
            tables: vec!["portfolio".to_string()],
        }
    );
}

#[tokio::test]
async fn test_json_column_paths_are_accepted() {
    let harness = Harness::new(onboarding_registry());
    let file = html_file(
        "{% for a in midaz_onboarding.account %}{{ a.metadata.cost_center }}{% endfor %}",
    );

    assert!(harness
        .templates
        .create(&RequestContext::new(), &file, "html", "Cost centers")
        .await
        .is_ok());
}

#[tokio::test]
async fn test_script_tag_is_rejected_before_any_write() {
    let harness = Harness::new(onboarding_registry());
    let file = html_file("<ScRiPt>alert(1)</script>");

    let err = harness
        .templates
        .create(&RequestContext::new(), &file, "html", "Evil")
        .await
        .unwrap_err();

    assert_eq!(business(err), BusinessError::ScriptTagDetected);
    assert_eq!(harness.store.template_count(), 0);
}

#[tokio::test]
async fn test_overlapping_creates_share_the_connection() {
    let harness = Harness::new(pooled_onboarding_registry(Duration::from_millis(20)));
    let ctx = RequestContext::new();
    let file = html_file(ACCOUNT_LOOP);

    let first = harness.templates.create(&ctx, &file, "html", "First");
    let second = async {
        tokio::time::sleep(Duration::from_millis(5)).await;
        harness.templates.create(&ctx, &file, "html", "Second").await
    };
    let (first, second) = tokio::join!(first, second);

    first.unwrap();
    second.unwrap();
    assert_eq!(harness.store.template_count(), 2);
}

#[tokio::test]
async fn test_format_and_content_checks() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();

    let err = harness
        .templates
        .create(&ctx, &html_file(ACCOUNT_LOOP), "docx", "Word")
        .await
        .unwrap_err();
    assert_eq!(business(err), BusinessError::InvalidOutputFormat("docx".to_string()));

    let plain = UploadedFile::new("plain.tpl", "{% for a in midaz_onboarding.account %}{{ a.id }}{% endfor %}");
    let err = harness
        .templates
        .create(&ctx, &plain, "pdf", "No markup")
        .await
        .unwrap_err();
    assert_eq!(business(err), BusinessError::FileContentInvalid("pdf".to_string()));
}

#[tokio::test]
async fn test_crm_templates_carry_organization() {
    let registry = DataSourceRegistry::new(vec![crm_source(
        Some("org-1"),
        vec![collection("holders_org-1", &["_id", "document", "name"])],
    )]);
    let harness = Harness::new(registry);
    let file = html_file("{% for h in plugin_crm.holders %}{{ h.document }}{% endfor %}");

    let template = harness
        .templates
        .create(&RequestContext::new(), &file, "html", "Holders")
        .await
        .unwrap();

    assert_eq!(
        template.mapped_fields,
        fields(&[
            ("plugin_crm", "holders", &["document"]),
            ("plugin_crm", "organization", &["org-1"]),
        ])
    );
}

#[tokio::test]
async fn test_update_format_requires_file() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();
    let template = harness.seed_template(
        &ctx,
        OutputFormat::Html,
        fields(&[("midaz_onboarding", "account", &["alias"])]),
    );

    let err = harness
        .templates
        .update(&ctx, template.id, Some("csv"), None, None)
        .await
        .unwrap_err();

    assert_eq!(business(err), BusinessError::OutputFormatWithoutTemplateFile);
}

#[tokio::test]
async fn test_update_description_only() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();
    let template = harness.seed_template(
        &ctx,
        OutputFormat::Html,
        fields(&[("midaz_onboarding", "account", &["alias"])]),
    );

    let updated = harness
        .templates
        .update(&ctx, template.id, None, Some("Renamed"), None)
        .await
        .unwrap();

    assert_eq!(updated.description, "Renamed");
    assert_eq!(updated.output_format, OutputFormat::Html);
    assert_eq!(updated.mapped_fields, template.mapped_fields);
    assert!(!harness.template_storage.contains(&template.file_name));
}

#[tokio::test]
async fn test_update_with_new_file_and_format() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();
    let template = harness.seed_template(
        &ctx,
        OutputFormat::Html,
        fields(&[("midaz_onboarding", "account", &["alias"])]),
    );
    let csv = UploadedFile::new(
        "assets.tpl",
        "{% for s in midaz_onboarding.asset %}{{ s.code }};{{ s.name }}\n{% endfor %}",
    );

    let updated = harness
        .templates
        .update(&ctx, template.id, Some("CSV"), None, Some(&csv))
        .await
        .unwrap();

    assert_eq!(updated.output_format, OutputFormat::Csv);
    assert_eq!(
        updated.mapped_fields,
        fields(&[("midaz_onboarding", "asset", &["code", "name"])])
    );
    assert!(harness.template_storage.contains(&template.file_name));
}

#[tokio::test]
async fn test_update_checks_file_against_current_format() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();
    let template = harness.seed_template(
        &ctx,
        OutputFormat::Html,
        fields(&[("midaz_onboarding", "account", &["alias"])]),
    );
    let csv = UploadedFile::new(
        "assets.tpl",
        "{% for s in midaz_onboarding.asset %}{{ s.code }};{{ s.name }}\n{% endfor %}",
    );

    let err = harness
        .templates
        .update(&ctx, template.id, None, None, Some(&csv))
        .await
        .unwrap_err();

    assert_eq!(business(err), BusinessError::FileContentInvalid("html".to_string()));
    assert!(!harness.template_storage.contains(&template.file_name));
    let stored = harness.templates.get_by_id(&ctx, template.id).await.unwrap();
    assert_eq!(stored.mapped_fields, template.mapped_fields);
}

#[tokio::test]
async fn test_update_rejects_script_before_lookup() {
    let harness = Harness::new(onboarding_registry());

    let err = harness
        .templates
        .update(
            &RequestContext::new(),
            uuid::Uuid::now_v7(),
            None,
            None,
            Some(&html_file("<script>alert(1)</script>")),
        )
        .await
        .unwrap_err();

    assert_eq!(business(err), BusinessError::ScriptTagDetected);
}

#[tokio::test]
async fn test_update_metadata_failure_after_blob_write() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();
    let template = harness.seed_template(
        &ctx,
        OutputFormat::Html,
        fields(&[("midaz_onboarding", "account", &["alias"])]),
    );
    harness.store.fail_template_updates.store(true, Ordering::SeqCst);

    let err = harness
        .templates
        .update(&ctx, template.id, None, None, Some(&html_file(ACCOUNT_LOOP)))
        .await
        .unwrap_err();

    assert!(matches!(err, AppError::Database(_)));
    // blob writes are idempotent; the next update converges
    assert!(harness.template_storage.contains(&template.file_name));
}

#[tokio::test]
async fn test_update_missing_template() {
    let harness = Harness::new(onboarding_registry());

    let err = harness
        .templates
        .update(&RequestContext::new(), uuid::Uuid::now_v7(), None, Some("x"), None)
        .await
        .unwrap_err();

    assert_eq!(business(err), BusinessError::EntityNotFound("template".to_string()));
}

#[tokio::test]
async fn test_soft_and_hard_delete() {
    let harness = Harness::new(onboarding_registry());
    let ctx = RequestContext::new();

    let soft = harness
        .templates
        .create(&ctx, &html_file(ACCOUNT_LOOP), "html", "Soft")
        .await
        .unwrap();
    harness.templates.delete(&ctx, soft.id, false).await.unwrap();
    assert!(harness.templates.get_by_id(&ctx, soft.id).await.is_err());
    assert!(harness.template_storage.contains(&soft.file_name));

    let err = harness.templates.delete(&ctx, soft.id, false).await.unwrap_err();
    assert_eq!(business(err), BusinessError::EntityNotFound("template".to_string()));

    let hard = harness
        .templates
        .create(&ctx, &html_file(ACCOUNT_LOOP), "html", "Hard")
        .await
        .unwrap();
    harness.templates.delete(&ctx, hard.id, true).await.unwrap();
    assert!(!harness.template_storage.contains(&hard.file_name));
    assert_eq!(harness.store.template_count(), 1);
}

#[tokio::test]
async fn test_templates_are_tenant_scoped() {
    let harness = Harness::new(DataSourceRegistry::new(vec![onboarding_source()]));
    let acme = RequestContext::new().with_tenant("acme");
    let globex = RequestContext::new().with_tenant("globex");

    let template = harness
        .templates
        .create(&acme, &html_file(ACCOUNT_LOOP), "html", "Acme only")
        .await
        .unwrap();

    let err = harness.templates.get_by_id(&globex, template.id).await.unwrap_err();
    assert_eq!(business(err), BusinessError::EntityNotFound("template".to_string()));
    assert!(harness
        .templates
        .list(&globex, &TemplateListFilter::default())
        .await
        .unwrap()
        .is_empty());
    assert_eq!(
        harness
            .templates
            .list(&acme, &TemplateListFilter::default())
            .await
            .unwrap()
            .len(),
        1
    );
}
