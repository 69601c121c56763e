//! Tenant-isolation tests: a token bound to one workspace can observe
//! nothing in any other, and every attempt is audited under the token's own
//! workspace.

mod common;

use common::setup_engine;
use vaultry::domain::SecretKind;
use vaultry::services::PutSecretRequest;
use vaultry::storage::AuditLogRepository;
use vaultry::VaultryError;

#[tokio::test]
async fn cross_workspace_read_is_denied_and_audited() {
    let harness = setup_engine("isolation_read").await;
    let engine = &harness.engine;

    // ws-a holds the secret; the token is bound to ws-b.
    let (ws_a, ctx_a) = harness.workspace_with_admin("ws-a").await;
    engine
        .secrets
        .put(
            &ctx_a,
            &ws_a.id,
            PutSecretRequest {
                key: "k".into(),
                kind: SecretKind::String,
                value: b"value-a".to_vec(),
                tags: vec![],
                description: None,
            },
        )
        .await
        .unwrap();
    engine.flush_audit().await.unwrap();

    let audit = AuditLogRepository::new(engine.pool.clone());
    let binding_a = engine.workspaces.provisioning_binding(&ws_a);
    let ws_a_baseline = audit.count(&binding_a).await.unwrap();

    let (ws_b, ctx_b) = harness.workspace_with_admin("ws-b").await;

    let err = engine.secrets.get(&ctx_b, &ws_a.id, "k", None).await.unwrap_err();
    assert!(matches!(err, VaultryError::WorkspaceAccess { .. }));

    // The denial reveals nothing about what lives in ws-a: a missing key
    // produces the identical error.
    let err_missing = engine.secrets.get(&ctx_b, &ws_a.id, "does-not-exist", None).await.unwrap_err();
    assert_eq!(err.to_string(), err_missing.to_string());
    assert_eq!(err.to_string(), "Workspace access denied");

    engine.flush_audit().await.unwrap();

    // One failure record under ws-b; nothing new under ws-a.
    let binding_b = engine.workspaces.provisioning_binding(&ws_b);
    let ws_b_records = audit.list(&binding_b, 10, 0).await.unwrap();
    let denials: Vec<_> = ws_b_records.iter().filter(|r| !r.success).collect();
    assert_eq!(denials.len(), 2); // one per attempted read
    assert_eq!(denials[0].failure_reason.as_deref(), Some("workspace_access"));

    assert_eq!(audit.count(&binding_a).await.unwrap(), ws_a_baseline);
}

#[tokio::test]
async fn cross_workspace_writes_and_rotation_are_denied() {
    let harness = setup_engine("isolation_write").await;
    let engine = &harness.engine;

    let (ws_a, _ctx_a) = harness.workspace_with_admin("ws-a").await;
    let (_ws_b, ctx_b) = harness.workspace_with_admin("ws-b").await;

    let err = engine
        .secrets
        .put(
            &ctx_b,
            &ws_a.id,
            PutSecretRequest {
                key: "planted".into(),
                kind: SecretKind::String,
                value: b"intruder".to_vec(),
                tags: vec![],
                description: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, VaultryError::WorkspaceAccess { .. }));

    let err = engine.secrets.delete(&ctx_b, &ws_a.id, "anything").await.unwrap_err();
    assert!(matches!(err, VaultryError::WorkspaceAccess { .. }));

    let err = engine.secrets.list(&ctx_b, &ws_a.id, None, 10, 0).await.unwrap_err();
    assert!(matches!(err, VaultryError::WorkspaceAccess { .. }));

    let err = engine.keyring.rotate(&ctx_b, &ws_a.id).await.unwrap_err();
    assert!(matches!(err, VaultryError::WorkspaceAccess { .. }));

    // Nothing was planted in ws-a.
    let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM secrets WHERE workspace_id = $1")
        .bind(ws_a.id.as_str())
        .fetch_one(&engine.pool)
        .await
        .unwrap();
    assert_eq!(count.0, 0);
}

#[tokio::test]
async fn listings_never_cross_the_boundary() {
    let harness = setup_engine("isolation_list").await;
    let engine = &harness.engine;

    let (ws_a, ctx_a) = harness.workspace_with_admin("ws-a").await;
    let (ws_b, ctx_b) = harness.workspace_with_admin("ws-b").await;

    for (ctx, ws, key) in [(&ctx_a, &ws_a, "alpha/secret"), (&ctx_b, &ws_b, "beta/secret")] {
        engine
            .secrets
            .put(
                ctx,
                &ws.id,
                PutSecretRequest {
                    key: key.into(),
                    kind: SecretKind::String,
                    value: b"v".to_vec(),
                    tags: vec![],
                    description: None,
                },
            )
            .await
            .unwrap();
    }

    let (items_a, total_a) = engine.secrets.list(&ctx_a, &ws_a.id, None, 100, 0).await.unwrap();
    assert_eq!(total_a, 1);
    assert_eq!(items_a[0].key, "alpha/secret");

    let (items_b, total_b) = engine.secrets.list(&ctx_b, &ws_b.id, None, 100, 0).await.unwrap();
    assert_eq!(total_b, 1);
    assert_eq!(items_b[0].key, "beta/secret");
}

#[tokio::test]
async fn same_key_in_two_workspaces_stays_distinct() {
    let harness = setup_engine("isolation_same_key").await;
    let engine = &harness.engine;

    let (ws_a, ctx_a) = harness.workspace_with_admin("ws-a").await;
    let (ws_b, ctx_b) = harness.workspace_with_admin("ws-b").await;

    for (ctx, ws, value) in [(&ctx_a, &ws_a, "value-a"), (&ctx_b, &ws_b, "value-b")] {
        engine
            .secrets
            .put(
                ctx,
                &ws.id,
                PutSecretRequest {
                    key: "shared/name".into(),
                    kind: SecretKind::String,
                    value: value.as_bytes().to_vec(),
                    tags: vec![],
                    description: None,
                },
            )
            .await
            .unwrap();
    }

    let a = engine.secrets.get(&ctx_a, &ws_a.id, "shared/name", None).await.unwrap();
    let b = engine.secrets.get(&ctx_b, &ws_b.id, "shared/name", None).await.unwrap();
    assert_eq!(a.value, b"value-a");
    assert_eq!(b.value, b"value-b");
}
