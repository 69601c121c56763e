//! Audit-trail contract tests: one record per operation outcome, correlated
//! per request, with no sensitive material anywhere in the trail.

mod common;

use common::{setup_engine, test_master_key_b64};
use vaultry::domain::SecretKind;
use vaultry::services::PutSecretRequest;
use vaultry::storage::AuditLogRepository;

#[tokio::test]
async fn every_operation_outcome_writes_exactly_one_record() {
    let harness = setup_engine("audit_one_per_op").await;
    let engine = &harness.engine;
    let workspace = harness.create_workspace("ws-audit").await;
    let issued = harness.issue_admin_token(&workspace).await;

    // One authentication per operation, as a transport adapter would do:
    // the correlation id identifies the request.
    let mut correlations = Vec::new();

    let ctx = harness.authenticate(&issued.cleartext).await;
    correlations.push(ctx.correlation_id().to_string());
    engine
        .secrets
        .put(
            &ctx,
            &workspace.id,
            PutSecretRequest {
                key: "db/password".into(),
                kind: SecretKind::String,
                value: b"hunter2".to_vec(),
                tags: vec![],
                description: None,
            },
        )
        .await
        .unwrap();

    let ctx = harness.authenticate(&issued.cleartext).await;
    correlations.push(ctx.correlation_id().to_string());
    engine.secrets.get(&ctx, &workspace.id, "db/password", None).await.unwrap();

    let ctx = harness.authenticate(&issued.cleartext).await;
    correlations.push(ctx.correlation_id().to_string());
    engine.secrets.get(&ctx, &workspace.id, "missing/key", None).await.unwrap_err();

    let ctx = harness.authenticate(&issued.cleartext).await;
    correlations.push(ctx.correlation_id().to_string());
    engine.secrets.delete(&ctx, &workspace.id, "db/password").await.unwrap();

    engine.flush_audit().await.unwrap();

    let audit = AuditLogRepository::new(engine.pool.clone());
    let binding = engine.workspaces.provisioning_binding(&workspace);

    for correlation_id in &correlations {
        let records = audit.find_by_correlation(&binding, correlation_id).await.unwrap();
        assert_eq!(
            records.len(),
            1,
            "correlation {} should map to exactly one record",
            correlation_id
        );
    }

    // The failed read is among them, marked unsuccessful with a reason.
    let records = audit.list(&binding, 50, 0).await.unwrap();
    assert_eq!(records.len(), correlations.len());
    let failed: Vec<_> = records.iter().filter(|r| !r.success).collect();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].failure_reason.as_deref(), Some("not_found"));
}

#[tokio::test]
async fn trail_never_contains_sensitive_material() {
    let harness = setup_engine("audit_sensitive").await;
    let engine = &harness.engine;
    let workspace = harness.create_workspace("ws-audit").await;
    let issued = harness.issue_admin_token(&workspace).await;
    let ctx = harness.authenticate(&issued.cleartext).await;

    let plaintext = "super-sensitive-plaintext-value";
    engine
        .secrets
        .put(
            &ctx,
            &workspace.id,
            PutSecretRequest {
                key: "db/password".into(),
                kind: SecretKind::String,
                value: plaintext.as_bytes().to_vec(),
                tags: vec![],
                description: None,
            },
        )
        .await
        .unwrap();
    engine.secrets.get(&ctx, &workspace.id, "db/password", None).await.unwrap();
    engine.keyring.rotate(&ctx, &workspace.id).await.unwrap();
    engine.flush_audit().await.unwrap();

    // Scan every text column of the trail for the plaintext, the token
    // cleartext, the master key, and any stored wrapped DEK.
    let wrapped_deks: Vec<(String,)> =
        sqlx::query_as("SELECT wrapped_dek FROM keyring_entries")
            .fetch_all(&engine.pool)
            .await
            .unwrap();

    let rows: Vec<(String, String, Option<String>, String)> = sqlx::query_as(
        "SELECT resource_id, metadata, failure_reason, correlation_id FROM audit_log",
    )
    .fetch_all(&engine.pool)
    .await
    .unwrap();
    assert!(!rows.is_empty());

    for (resource_id, metadata, failure_reason, correlation_id) in rows {
        let blob =
            format!("{} {} {} {}", resource_id, metadata, failure_reason.unwrap_or_default(), correlation_id);
        assert!(!blob.contains(plaintext));
        assert!(!blob.contains(&issued.cleartext));
        assert!(!blob.contains(&test_master_key_b64()));
        for (wrapped,) in &wrapped_deks {
            assert!(!blob.contains(wrapped.as_str()));
        }
    }
}

#[tokio::test]
async fn rotation_is_audited_with_the_new_key_version() {
    let harness = setup_engine("audit_rotate").await;
    let engine = &harness.engine;
    let (workspace, ctx) = harness.workspace_with_admin("ws-audit").await;

    engine.keyring.rotate(&ctx, &workspace.id).await.unwrap();
    engine.flush_audit().await.unwrap();

    let audit = AuditLogRepository::new(engine.pool.clone());
    let binding = engine.workspaces.provisioning_binding(&workspace);
    let records = audit.list(&binding, 10, 0).await.unwrap();

    let rotate = records
        .iter()
        .find(|r| r.action.as_str() == "ROTATE")
        .expect("rotation should be audited");
    assert!(rotate.success);
    assert_eq!(rotate.resource.as_str(), "keyring");
    assert_eq!(rotate.resource_id, "ws-audit"); // natural key, not a surrogate id
    assert_eq!(rotate.metadata["new_key_version"], serde_json::json!(2));
}

#[tokio::test]
async fn retention_purge_removes_only_expired_records() {
    let harness = setup_engine("audit_retention").await;
    let engine = &harness.engine;
    let (workspace, ctx) = harness.workspace_with_admin("ws-audit").await;

    engine
        .secrets
        .put(
            &ctx,
            &workspace.id,
            PutSecretRequest {
                key: "fresh".into(),
                kind: SecretKind::String,
                value: b"v".to_vec(),
                tags: vec![],
                description: None,
            },
        )
        .await
        .unwrap();
    engine.flush_audit().await.unwrap();

    // Plant an expired record directly; the sweep deletes by age only.
    sqlx::query(
        "INSERT INTO audit_log (id, workspace_id, action, resource_type, resource_id, correlation_id, success, metadata, created_at) \
         VALUES ($1, $2, 'READ', 'secret', 'old/key', 'old-corr', 1, '{}', $3)",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(workspace.id.as_str())
    .bind(chrono::Utc::now() - chrono::Duration::days(120))
    .execute(&engine.pool)
    .await
    .unwrap();

    let purged = engine.purge_expired_audit_records().await.unwrap();
    assert_eq!(purged, 1);

    let audit = AuditLogRepository::new(engine.pool.clone());
    let binding = engine.workspaces.provisioning_binding(&workspace);
    let remaining = audit.list(&binding, 50, 0).await.unwrap();
    assert!(remaining.iter().all(|r| r.resource_id != "old/key"));
    assert!(!remaining.is_empty());
}
