mod common;

use auth_service::models::{AuditEvent, AuditEventType, PrincipalMutation};
use auth_service::services::{PrincipalStore, ServiceError};
use common::*;
use uuid::Uuid;

fn key(family: &str, id: Uuid) -> String {
    format!("{}:{}", family, id)
}

#[tokio::test]
async fn test_role_change_bumps_version_and_desynchronizes_old_tokens() {
    let app = TestApp::spawn().await;
    let alice = app.seed_principal("alice", &["user"], 3).await;
    app.seed_principal("root", &["admin"], 1).await;

    let grant = app.login("alice", CHROME_WINDOWS).await;
    let old_access = grant.tokens.access_token.clone();
    assert!(app.auth().authenticate(&old_access).await.is_ok());

    let cache = app.auth().cache();
    assert_eq!(cache.roles_by_id(alice.id).await.unwrap(), Some(roles(&["user"])));
    cache.snapshot_by_id(alice.id, true).await.unwrap();
    cache.snapshot_by_login("alice", true).await.unwrap();
    assert!(app.cache.contains(&key("roles-by-id", alice.id)));
    assert!(app.cache.contains(&key("any-by-id", alice.id)));
    assert!(app.cache.contains(&key("version-by-id", alice.id)));
    assert!(app.cache.contains("any-by-login:alice"));

    let admin = app.actor(&app.login("root", CHROME_MAC).await).await;
    app.cache.clear_deleted_log();
    let updated = app
        .auth()
        .change_roles(&admin, alice.id, roles(&["user", "moderator"]))
        .await
        .unwrap();
    assert_eq!(updated.version, 4);

    assert!(!app.cache.contains(&key("roles-by-id", alice.id)));
    assert!(!app.cache.contains(&key("any-by-id", alice.id)));
    assert!(!app.cache.contains(&key("version-by-id", alice.id)));
    // Login-keyed entries map to the id only and stay valid.
    assert!(app.cache.contains("any-by-login:alice"));
    assert!(!app.cache.deleted_keys().iter().any(|k| k.contains("by-login")));

    let err = app.auth().authenticate(&old_access).await.unwrap_err();
    assert!(matches!(
        err,
        ServiceError::VersionDesynchronized { token: 3, current: 4 }
    ));

    assert_eq!(
        cache.roles_by_id(alice.id).await.unwrap(),
        Some(roles(&["user", "moderator"]))
    );
}

#[tokio::test]
async fn test_role_change_writes_audit_and_revokes_sessions_atomically() {
    let app = TestApp::spawn().await;
    let alice = app.seed_principal("alice", &["user"], 1).await;
    let root = app.seed_principal("root", &["admin"], 1).await;

    app.login("alice", CHROME_WINDOWS).await;
    app.login("alice", FIREFOX_WINDOWS).await;
    let admin = app.actor(&app.login("root", CHROME_MAC).await).await;

    app.auth()
        .change_roles(&admin, alice.id, roles(&["moderator"]))
        .await
        .unwrap();

    assert!(app.store.all_sessions(alice.id).iter().all(|s| s.is_revoked()));

    let events = app.store.audit_events();
    assert_eq!(events.len(), 1);
    assert_eq!(
        events[0].event_type_code,
        AuditEventType::PrincipalRolesChanged.as_str()
    );
    assert_eq!(events[0].actor_id, Some(root.id));
    assert_eq!(events[0].target_id, alice.id);
    let data = events[0].event_data.as_ref().expect("Role change should carry data");
    assert_eq!(data["old_roles"], serde_json::json!(["user"]));
    assert_eq!(data["new_roles"], serde_json::json!(["moderator"]));
}

#[tokio::test]
async fn test_login_change_touches_only_login_derived_keys() {
    let app = TestApp::spawn().await;
    let alice = app.seed_principal("alice", &["user"], 1).await;
    let grant = app.login("alice", CHROME_WINDOWS).await;
    let actor = app.actor(&grant).await;

    let cache = app.auth().cache();
    cache.roles_by_id(alice.id).await.unwrap();
    cache.deleted_by_id(alice.id).await.unwrap();
    cache.snapshot_by_login("alice", false).await.unwrap();

    app.cache.clear_deleted_log();
    app.auth()
        .change_login(&actor, alice.id, "alice.smith")
        .await
        .unwrap();

    // Id-keyed snapshots embed the login and the version bumps, so those
    // families go too. Roles and deletion state are left alone.
    let mut deleted = app.cache.deleted_keys();
    deleted.sort();
    let mut expected = vec![
        key("active-by-id", alice.id),
        "active-by-login:alice".to_string(),
        "active-by-login:alice.smith".to_string(),
        key("any-by-id", alice.id),
        "any-by-login:alice".to_string(),
        "any-by-login:alice.smith".to_string(),
        key("version-by-id", alice.id),
    ];
    expected.sort();
    assert_eq!(deleted, expected);

    assert!(app.cache.contains(&key("roles-by-id", alice.id)));
    assert!(app.cache.contains(&key("deleted-by-id", alice.id)));

    assert!(cache.snapshot_by_login("alice", false).await.unwrap().is_none());
    let renamed = cache
        .snapshot_by_login("alice.smith", false)
        .await
        .unwrap()
        .expect("Renamed principal should resolve");
    assert_eq!(renamed.id, alice.id);

    // Sessions survive a login change.
    assert!(app
        .store
        .all_sessions(alice.id)
        .iter()
        .all(|s| !s.is_revoked()));
}

#[tokio::test]
async fn test_login_change_to_taken_login_is_a_conflict() {
    let app = TestApp::spawn().await;
    let alice = app.seed_principal("alice", &["user"], 1).await;
    app.seed_principal("bob", &["user"], 1).await;
    let actor = app.actor(&app.login("alice", CHROME_WINDOWS).await).await;

    let err = app
        .auth()
        .change_login(&actor, alice.id, "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));

    let stored = app.store.get_principal_by_id(alice.id).await.unwrap().unwrap();
    assert_eq!(stored.version, 1);
    assert!(app.store.audit_events().is_empty());
}

#[tokio::test]
async fn test_undecodable_entry_is_deleted_and_reloaded() {
    let app = TestApp::spawn().await;
    let alice = app.seed_principal("alice", &["user"], 7).await;
    let version_key = key("version-by-id", alice.id);

    app.cache.insert_raw(&version_key, "{not json");
    let version = app.auth().cache().version_by_id(alice.id).await.unwrap();

    assert_eq!(version, Some(7));
    assert!(app.cache.deleted_keys().contains(&version_key));
    assert_eq!(app.cache.get_raw(&version_key).as_deref(), Some("7"));
}

#[tokio::test]
async fn test_cache_read_failure_falls_back_to_store() {
    let app = TestApp::spawn().await;
    app.seed_principal("alice", &["user"], 1).await;
    let grant = app.login("alice", CHROME_WINDOWS).await;

    app.cache.fail_reads(true);
    app.cache.fail_writes(true);

    let authenticated = app
        .auth()
        .authenticate(&grant.tokens.access_token)
        .await
        .expect("Store fallback should authenticate");
    assert_eq!(authenticated.claims.ver, 1);
}

#[tokio::test]
async fn test_failed_invalidation_does_not_undo_committed_mutation() {
    let app = TestApp::spawn().await;
    let alice = app.seed_principal("alice", &["user"], 1).await;
    app.seed_principal("root", &["admin"], 1).await;
    let admin = app.actor(&app.login("root", CHROME_WINDOWS).await).await;

    app.cache.fail_deletes(true);
    let updated = app
        .auth()
        .change_roles(&admin, alice.id, roles(&["moderator"]))
        .await
        .expect("Committed mutation should succeed despite cache failure");
    assert_eq!(updated.version, 2);

    let stored = app.store.get_principal_by_id(alice.id).await.unwrap().unwrap();
    assert_eq!(stored.roles, roles(&["moderator"]));
    assert_eq!(app.store.audit_events().len(), 1);
}

#[tokio::test]
async fn test_stale_read_version_is_rejected_by_store() {
    let app = TestApp::spawn().await;
    let alice = app.seed_principal("alice", &["user"], 1).await;
    let root = app.seed_principal("root", &["admin"], 1).await;
    let admin = app.actor(&app.login("root", CHROME_WINDOWS).await).await;

    app.auth()
        .change_roles(&admin, alice.id, roles(&["moderator"]))
        .await
        .unwrap();

    // Mutating from the pre-change record loses the race.
    let mutation = PrincipalMutation::SoftDelete;
    let audit = AuditEvent::principal_action(
        root.id,
        mutation.audit_event_type(),
        alice.id,
        None,
        app.clock_now(),
    );
    let err = app
        .store
        .mutate_principal(&alice, &mutation, &audit, app.clock_now())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Conflict(_)));
    assert_eq!(app.store.audit_events().len(), 1);
}

#[tokio::test]
async fn test_delete_purges_deleted_scoped_keys_and_revokes_sessions() {
    let app = TestApp::spawn().await;
    let alice = app.seed_principal("alice", &["user"], 1).await;
    let grant = app.login("alice", CHROME_WINDOWS).await;
    let actor = app.actor(&grant).await;

    let cache = app.auth().cache();
    assert_eq!(cache.deleted_by_id(alice.id).await.unwrap(), Some(false));
    cache.snapshot_by_id(alice.id, false).await.unwrap();
    cache.snapshot_by_login("alice", false).await.unwrap();

    app.auth().delete_principal(&actor, alice.id).await.unwrap();

    assert_eq!(cache.deleted_by_id(alice.id).await.unwrap(), Some(true));
    assert!(cache.snapshot_by_id(alice.id, false).await.unwrap().is_none());
    assert!(cache.snapshot_by_login("alice", false).await.unwrap().is_none());
    assert!(cache.snapshot_by_login("alice", true).await.unwrap().is_some());

    assert!(matches!(
        app.auth().authenticate(&grant.tokens.access_token).await,
        Err(ServiceError::VersionDesynchronized { token: 1, current: 2 })
    ));
}
