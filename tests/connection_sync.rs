mod common;

use common::{
    connection_resource, connection_resource_generic, org_resource, setup_test_db, spawn_stub_crm,
    test_client,
};
use orgsync::models::user::{self, META_PRIMARY_ORG_UUID};
use orgsync::models::{connection, organization};
use orgsync::services::connection_sync;

#[tokio::test]
async fn sync_rewrites_active_set_to_match_remote() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
        state.organizations.push(org_resource("org-b", "Org B"));
        state.organizations.push(org_resource("org-c", "Org C"));
        state.connections.insert(
            "person-1".to_string(),
            vec![
                connection_resource("conn-a", "org-a"),
                connection_resource("conn-b", "org-b"),
            ],
        );
    });

    let count = connection_sync::sync_person_connections(&pool, &client, "person-1", None)
        .await
        .unwrap();
    assert_eq!(count, 2);

    // Remote moves the person from {A, B} to {B, C}
    crm.configure(|state| {
        state.connections.insert(
            "person-1".to_string(),
            vec![
                connection_resource("conn-b", "org-b"),
                connection_resource("conn-c", "org-c"),
            ],
        );
    });

    connection_sync::sync_person_connections(&pool, &client, "person-1", None)
        .await
        .unwrap();

    let active = connection::get_active_connections_for_person(&pool, "person-1")
        .await
        .unwrap();
    let active_orgs: Vec<&str> = active.iter().map(|c| c.org_uuid.as_str()).collect();
    assert_eq!(active_orgs, vec!["org-b", "org-c"]);

    // The dropped connection survives as an inactive row
    let conn_a = connection::get_connection(&pool, "conn-a")
        .await
        .unwrap()
        .unwrap();
    assert!(!conn_a.is_active);
}

#[tokio::test]
async fn successful_empty_response_clears_active_set() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
        state.connections.insert(
            "person-1".to_string(),
            vec![connection_resource("conn-a", "org-a")],
        );
    });

    connection_sync::sync_person_connections(&pool, &client, "person-1", None)
        .await
        .unwrap();

    crm.configure(|state| {
        state.connections.insert("person-1".to_string(), vec![]);
    });

    let count = connection_sync::sync_person_connections(&pool, &client, "person-1", None)
        .await
        .unwrap();
    assert_eq!(count, 0);

    let active = connection::get_active_connections_for_person(&pool, "person-1")
        .await
        .unwrap();
    assert!(active.is_empty());
}

#[tokio::test]
async fn failed_fetch_leaves_cache_untouched() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
        state.connections.insert(
            "person-1".to_string(),
            vec![connection_resource("conn-a", "org-a")],
        );
    });

    connection_sync::sync_person_connections(&pool, &client, "person-1", None)
        .await
        .unwrap();

    crm.configure(|state| {
        state.broken_connection_fetches.insert("person-1".to_string());
    });

    let result = connection_sync::sync_person_connections(&pool, &client, "person-1", None).await;
    assert!(result.is_err());

    // The previously synced connection is still active
    let active = connection::get_active_connections_for_person(&pool, "person-1")
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].org_uuid, "org-a");
}

#[tokio::test]
async fn generic_relationship_shape_is_normalized() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
        state.organizations.push(org_resource("org-b", "Org B"));
        state.connections.insert(
            "person-1".to_string(),
            vec![
                connection_resource("conn-a", "org-a"),
                connection_resource_generic("conn-b", "org-b"),
            ],
        );
    });

    connection_sync::sync_person_connections(&pool, &client, "person-1", None)
        .await
        .unwrap();

    let active = connection::get_active_connections_for_person(&pool, "person-1")
        .await
        .unwrap();
    let active_orgs: Vec<&str> = active.iter().map(|c| c.org_uuid.as_str()).collect();
    assert_eq!(active_orgs, vec!["org-a", "org-b"]);
}

#[tokio::test]
async fn referenced_organizations_are_cached_opportunistically() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
        state.connections.insert(
            "person-1".to_string(),
            vec![connection_resource("conn-a", "org-a")],
        );
    });

    // No catalog sync ran; the org arrives via the connection's reference
    assert!(organization::get_organization(&pool, "org-a")
        .await
        .unwrap()
        .is_none());

    connection_sync::sync_person_connections(&pool, &client, "person-1", None)
        .await
        .unwrap();

    let cached = organization::get_organization(&pool, "org-a")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cached.legal_name, "Org A");

    // The joined view resolves the name too
    let active = connection::get_active_connections_for_person(&pool, "person-1")
        .await
        .unwrap();
    assert_eq!(active[0].legal_name.as_deref(), Some("Org A"));
}

#[tokio::test]
async fn sync_maintains_primary_org_for_linked_user() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    let user_id = user::create_user(&pool, "a@example.com", None).await.unwrap();

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
        state.organizations.push(org_resource("org-b", "Org B"));
        state.connections.insert(
            "person-1".to_string(),
            vec![
                connection_resource("conn-a", "org-a"),
                connection_resource("conn-b", "org-b"),
            ],
        );
    });

    connection_sync::sync_person_connections(&pool, &client, "person-1", Some(user_id))
        .await
        .unwrap();

    // First by insertion order wins
    let primary = user::get_user_meta(&pool, user_id, META_PRIMARY_ORG_UUID)
        .await
        .unwrap();
    assert_eq!(primary.as_deref(), Some("org-a"));

    // The person loses org-a; the stale pointer is re-derived
    crm.configure(|state| {
        state.connections.insert(
            "person-1".to_string(),
            vec![connection_resource("conn-b", "org-b")],
        );
    });

    connection_sync::sync_person_connections(&pool, &client, "person-1", Some(user_id))
        .await
        .unwrap();

    let primary = user::get_user_meta(&pool, user_id, META_PRIMARY_ORG_UUID)
        .await
        .unwrap();
    assert_eq!(primary.as_deref(), Some("org-b"));

    // All connections gone: pointer cleared
    crm.configure(|state| {
        state.connections.insert("person-1".to_string(), vec![]);
    });

    connection_sync::sync_person_connections(&pool, &client, "person-1", Some(user_id))
        .await
        .unwrap();

    let primary = user::get_user_meta(&pool, user_id, META_PRIMARY_ORG_UUID)
        .await
        .unwrap();
    assert!(primary.is_none());
}

#[tokio::test]
async fn create_connection_mirrors_into_cache() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    let user_id = user::create_user(&pool, "a@example.com", None).await.unwrap();

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
    });

    let already_existed = connection_sync::create_person_connection(
        &pool,
        &client,
        "person-1",
        "org-a",
        "member",
        Some(user_id),
    )
    .await
    .unwrap();
    assert!(!already_existed);

    let active = connection::get_active_connections_for_person(&pool, "person-1")
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].connection_uuid, "conn-created");
    assert_eq!(active[0].org_uuid, "org-a");

    let primary = user::get_user_meta(&pool, user_id, META_PRIMARY_ORG_UUID)
        .await
        .unwrap();
    assert_eq!(primary.as_deref(), Some("org-a"));
}

#[tokio::test]
async fn create_connection_without_uuid_falls_back_to_full_sync() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
        state.create_connection_response = Some(serde_json::json!({
            "success": true,
            "already_existed": true
        }));
        // What the full re-sync will find
        state.connections.insert(
            "person-1".to_string(),
            vec![connection_resource("conn-existing", "org-a")],
        );
    });

    let already_existed =
        connection_sync::create_person_connection(&pool, &client, "person-1", "org-a", "member", None)
            .await
            .unwrap();
    assert!(already_existed);

    let active = connection::get_active_connections_for_person(&pool, "person-1")
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].connection_uuid, "conn-existing");
}

#[tokio::test]
async fn remove_connection_deactivates_cached_row() {
    let pool = setup_test_db().await;
    let crm = spawn_stub_crm().await;
    let client = test_client(&crm.base_url);

    crm.configure(|state| {
        state.organizations.push(org_resource("org-a", "Org A"));
        state.connections.insert(
            "person-1".to_string(),
            vec![connection_resource("conn-a", "org-a")],
        );
    });

    connection_sync::sync_person_connections(&pool, &client, "person-1", None)
        .await
        .unwrap();

    let deleted = connection_sync::remove_person_connection(&pool, &client, "conn-a")
        .await
        .unwrap();
    assert!(deleted);

    let conn = connection::get_connection(&pool, "conn-a")
        .await
        .unwrap()
        .unwrap();
    assert!(!conn.is_active);
}
