//! Mock cluster API for integration tests
//!
//! Serves the REST paths used by the HTTP object store, backed by an
//! in-memory store so tests can inspect and mutate what the server holds.

#![allow(dead_code)]

use std::collections::HashMap;
use std::time::Duration;

use axum::{
    body::Body,
    extract::{Path, Query, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures::StreamExt;

use capacity_broadcaster::cluster::{Advertisement, LabelSelector, ResourceList};
use capacity_broadcaster::store::{InMemoryObjectStore, ObjectStore, StoreError};

const ADVERTISEMENTS: &str = "/apis/protocol.peering.io/v1/namespaces/{ns}/advertisements";

#[derive(Clone)]
struct ApiState {
    store: InMemoryObjectStore,
    token: Option<String>,
}

fn check_auth(state: &ApiState, headers: &HeaderMap) -> Result<(), Response> {
    let Some(ref token) = state.token else {
        return Ok(());
    };
    let expected = format!("Bearer {}", token);
    match headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        Some(v) if v == expected => Ok(()),
        _ => Err((StatusCode::UNAUTHORIZED, "unauthorized").into_response()),
    }
}

fn store_error(e: StoreError) -> Response {
    let status = match e {
        StoreError::NotFound { .. } => StatusCode::NOT_FOUND,
        StoreError::AlreadyExists { .. } | StoreError::Conflict { .. } => StatusCode::CONFLICT,
        StoreError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, e.to_string()).into_response()
}

async fn list_configmaps(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(ns): Path<String>,
) -> Response {
    if let Err(r) = check_auth(&state, &headers) {
        return r;
    }
    match state.store.list_config_records(&ns).await {
        Ok(items) => Json(ResourceList::new("ConfigMapList", items)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn list_nodes(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = check_auth(&state, &headers) {
        return r;
    }
    let selector: LabelSelector = match query.get("labelSelector") {
        Some(s) => match s.parse() {
            Ok(selector) => selector,
            Err(e) => return (StatusCode::BAD_REQUEST, e).into_response(),
        },
        None => LabelSelector::default(),
    };
    match state.store.list_nodes(&selector).await {
        Ok(items) => Json(ResourceList::new("NodeList", items)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn watch_advertisements(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path(ns): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    if let Err(r) = check_auth(&state, &headers) {
        return r;
    }
    if query.get("watch").map(String::as_str) != Some("true") {
        return StatusCode::NOT_IMPLEMENTED.into_response();
    }
    let Some(name) = query
        .get("fieldSelector")
        .and_then(|f| f.strip_prefix("metadata.name="))
    else {
        return (StatusCode::BAD_REQUEST, "fieldSelector required").into_response();
    };

    let events = match state
        .store
        .watch_advertisement(&ns, name, query.get("resourceVersion").cloned())
        .await
    {
        Ok(events) => events,
        Err(e) => return store_error(e),
    };

    let lines = events.map(|event| {
        let line = match event {
            Ok(event) => serde_json::to_string(&event).unwrap_or_default(),
            Err(e) => serde_json::json!({
                "type": "ERROR",
                "object": {"code": 500, "message": e.to_string()}
            })
            .to_string(),
        };
        Ok::<_, std::io::Error>(format!("{}\n", line))
    });
    Body::from_stream(lines).into_response()
}

async fn create_advertisement(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(adv): Json<Advertisement>,
) -> Response {
    if let Err(r) = check_auth(&state, &headers) {
        return r;
    }
    match state.store.create_advertisement(&adv).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => store_error(e),
    }
}

async fn get_advertisement(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Path((ns, name)): Path<(String, String)>,
) -> Response {
    if let Err(r) = check_auth(&state, &headers) {
        return r;
    }
    match state.store.get_advertisement(&ns, &name).await {
        Ok(Some(adv)) => Json(adv).into_response(),
        Ok(None) => StatusCode::NOT_FOUND.into_response(),
        Err(e) => store_error(e),
    }
}

async fn update_advertisement(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Json(adv): Json<Advertisement>,
) -> Response {
    if let Err(r) = check_auth(&state, &headers) {
        return r;
    }
    match state.store.update_advertisement(&adv).await {
        Ok(updated) => Json(updated).into_response(),
        Err(e) => store_error(e),
    }
}

fn router(store: InMemoryObjectStore, token: Option<&str>) -> Router {
    let state = ApiState {
        store,
        token: token.map(str::to_string),
    };
    Router::new()
        .route("/api/v1/namespaces/{ns}/configmaps", get(list_configmaps))
        .route("/api/v1/nodes", get(list_nodes))
        .route(
            ADVERTISEMENTS,
            get(watch_advertisements).post(create_advertisement),
        )
        .route(
            &format!("{}/{{name}}", ADVERTISEMENTS),
            get(get_advertisement).put(update_advertisement),
        )
        .with_state(state)
}

/// Serve `store` on an ephemeral port and return the base URL
pub async fn spawn_mock_api(store: InMemoryObjectStore, token: Option<&str>) -> String {
    let app = router(store, token);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind mock API");
    let addr = listener.local_addr().expect("Failed to get local address");

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    format!("http://{}", addr)
}

/// Poll `check` until it holds or five seconds pass
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}
