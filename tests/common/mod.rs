//! Shared test fixtures: a temp-file database and an in-process stub CRM.
//!
//! The stub serves the JSON:API shapes the client consumes, with knobs for
//! failure injection (flaky pages, broken connection endpoints) and a lying
//! `total_pages` so pagination edge cases can be driven end to end.

#![allow(dead_code)]

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use orgsync::db::pool::DbPool;
use orgsync::services::crm_client::{CrmClient, CrmClientConfig};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

/// Mutable behavior of the stub CRM.
#[derive(Default)]
pub struct StubState {
    /// Organization resources, in catalog order.
    pub organizations: Vec<Value>,

    /// Connection resources per person UUID.
    pub connections: HashMap<String, Vec<Value>>,

    /// Primary-email lookup table.
    pub people_by_email: HashMap<String, String>,

    /// Remaining 500s to serve per organization page number.
    pub org_page_failures: HashMap<u32, u32>,

    /// Person UUIDs whose connection fetch returns 500.
    pub broken_connection_fetches: HashSet<String>,

    /// Overrides the computed `total_pages` in page metadata.
    pub total_pages_override: Option<u32>,

    /// Canned response body for POST /connections.
    pub create_connection_response: Option<Value>,

    /// Organization page requests observed, including failed ones.
    pub org_page_requests: u32,
}

/// Handle to a running stub CRM.
pub struct StubCrm {
    pub state: Arc<Mutex<StubState>>,
    pub base_url: String,
}

impl StubCrm {
    /// Run a closure against the locked stub state.
    pub fn configure<F: FnOnce(&mut StubState)>(&self, f: F) {
        let mut state = self.state.lock().unwrap();
        f(&mut state);
    }

    pub fn org_page_requests(&self) -> u32 {
        self.state.lock().unwrap().org_page_requests
    }
}

/// Bind the stub CRM on an ephemeral port and serve it in the background.
pub async fn spawn_stub_crm() -> StubCrm {
    let state = Arc::new(Mutex::new(StubState::default()));

    let app = Router::new()
        .route("/organizations", get(list_organizations))
        .route("/organizations/{uuid}", get(get_organization))
        .route("/people", get(find_people))
        .route("/people/{uuid}/connections", get(person_connections))
        .route("/connections", post(create_connection))
        .route("/connections/{uuid}", delete(delete_connection))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    StubCrm {
        state,
        base_url: format!("http://{}", addr),
    }
}

/// Open a fresh database in a temp directory, schema applied.
pub async fn setup_test_db() -> DbPool {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("test.db");
    std::mem::forget(dir);

    orgsync::db::initialize(&db_path).await.unwrap()
}

/// Client wired to the stub with throwaway credentials.
pub fn test_client(base_url: &str) -> CrmClient {
    CrmClient::new(CrmClientConfig {
        base_url: base_url.to_string(),
        api_secret: "test-secret".to_string(),
        admin_person_uuid: "admin-person".to_string(),
        timeout_secs: 5,
    })
    .unwrap()
}

/// A minimal organization resource.
pub fn org_resource(uuid: &str, legal_name: &str) -> Value {
    json!({
        "id": uuid,
        "type": "organizations",
        "attributes": {
            "legal_name": legal_name,
            "type": "company",
            "people_count": 1
        }
    })
}

/// A connection resource using the named `organization` relationship.
pub fn connection_resource(uuid: &str, org_uuid: &str) -> Value {
    json!({
        "id": uuid,
        "type": "connections",
        "attributes": {"type": "member"},
        "relationships": {
            "organization": {"data": {"type": "organizations", "id": org_uuid}}
        }
    })
}

/// A connection resource using the generic `to` relationship.
pub fn connection_resource_generic(uuid: &str, org_uuid: &str) -> Value {
    json!({
        "id": uuid,
        "type": "connections",
        "attributes": {"type": "member"},
        "relationships": {
            "to": {"data": {"type": "organizations", "id": org_uuid}}
        }
    })
}

fn server_error() -> (StatusCode, Json<Value>) {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({"errors": [{"detail": "injected failure"}]})),
    )
}

async fn list_organizations(
    State(state): State<Arc<Mutex<StubState>>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let page: u32 = params
        .get("page[number]")
        .and_then(|v| v.parse().ok())
        .unwrap_or(1);
    let per_page: usize = params
        .get("page[size]")
        .and_then(|v| v.parse().ok())
        .unwrap_or(100);

    let mut state = state.lock().unwrap();
    state.org_page_requests += 1;

    if let Some(remaining) = state.org_page_failures.get_mut(&page) {
        if *remaining > 0 {
            *remaining -= 1;
            return server_error();
        }
    }

    let start = (page.saturating_sub(1) as usize) * per_page;
    let slice: Vec<Value> = state
        .organizations
        .iter()
        .skip(start)
        .take(per_page)
        .cloned()
        .collect();

    let computed = (state.organizations.len().max(1) + per_page - 1) / per_page;
    let total_pages = state.total_pages_override.unwrap_or(computed as u32);

    (
        StatusCode::OK,
        Json(json!({
            "data": slice,
            "meta": {"page": {"total_pages": total_pages}}
        })),
    )
}

async fn get_organization(
    State(state): State<Arc<Mutex<StubState>>>,
    Path(uuid): Path<String>,
) -> impl IntoResponse {
    let state = state.lock().unwrap();

    match state
        .organizations
        .iter()
        .find(|org| org["id"].as_str() == Some(uuid.as_str()))
    {
        Some(org) => (StatusCode::OK, Json(json!({"data": org}))),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({"errors": [{"detail": "organization not found"}]})),
        ),
    }
}

async fn find_people(
    State(state): State<Arc<Mutex<StubState>>>,
    Query(params): Query<HashMap<String, String>>,
) -> impl IntoResponse {
    let state = state.lock().unwrap();

    let matches: Vec<Value> = params
        .get("filter[emails_primary_email_eq]")
        .and_then(|email| state.people_by_email.get(email))
        .map(|uuid| vec![json!({"id": uuid, "type": "people"})])
        .unwrap_or_default();

    (StatusCode::OK, Json(json!({"data": matches})))
}

async fn person_connections(
    State(state): State<Arc<Mutex<StubState>>>,
    Path(uuid): Path<String>,
) -> impl IntoResponse {
    let state = state.lock().unwrap();

    if state.broken_connection_fetches.contains(&uuid) {
        return server_error();
    }

    let data = state.connections.get(&uuid).cloned().unwrap_or_default();
    (StatusCode::OK, Json(json!({"data": data})))
}

async fn create_connection(
    State(state): State<Arc<Mutex<StubState>>>,
    Json(_body): Json<Value>,
) -> impl IntoResponse {
    let state = state.lock().unwrap();

    let body = state.create_connection_response.clone().unwrap_or(json!({
        "success": true,
        "already_existed": false,
        "connection_uuid": "conn-created"
    }));

    (StatusCode::OK, Json(body))
}

async fn delete_connection(
    State(_state): State<Arc<Mutex<StubState>>>,
    Path(_uuid): Path<String>,
) -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"success": true})))
}
