//! HTTP surface for plugin-provided endpoints.
//!
//! Every endpoint a live plugin exposes is served under
//! `/plugin/{remote}/{path}`. Dispatch goes through the manager's endpoint
//! table on each request, so endpoints appear and vanish with their plugin.

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use axum::{Json, Router};
use serde_json::{Value, json};
use tracing::{error, warn};

use super::manager::PluginManager;
use super::plugin::{EndpointMethod, EndpointRequest};

/// Shared state for plugin routes.
#[derive(Clone)]
pub struct PluginRouteState {
    pub manager: Arc<PluginManager>,
}

/// Build the plugin endpoint routes.
pub fn plugin_routes(state: PluginRouteState) -> Router {
    Router::new()
        .route("/plugin/{name}/{*path}", any(dispatch))
        .route("/api/plugins/endpoints", get(list_endpoints))
        .with_state(state)
}

fn endpoint_method(method: &Method) -> Option<EndpointMethod> {
    match *method {
        Method::GET => Some(EndpointMethod::Get),
        Method::POST => Some(EndpointMethod::Post),
        Method::PUT => Some(EndpointMethod::Put),
        Method::DELETE => Some(EndpointMethod::Delete),
        _ => None,
    }
}

/// ANY /plugin/{name}/{*path}
async fn dispatch(
    State(state): State<PluginRouteState>,
    method: Method,
    Path((name, path)): Path<(String, String)>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let Some(method) = endpoint_method(&method) else {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    };

    let Some(endpoint) = state.manager.find_endpoint(&name, method, &path).await else {
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("No endpoint {method} /plugin/{name}/{path}") })),
        )
            .into_response();
    };

    let body = if body.is_empty() {
        Value::Null
    } else {
        match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                warn!(plugin = %name, path = %path, error = %e, "Rejected non-JSON endpoint body");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(json!({ "error": format!("Invalid JSON body: {e}") })),
                )
                    .into_response();
            }
        }
    };

    match endpoint.handler.handle(EndpointRequest { query, body }).await {
        Ok(reply) => Json(reply).into_response(),
        Err(e) => {
            error!(plugin = %name, path = %path, error = %e, "Plugin endpoint failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": format!("{e:#}") })),
            )
                .into_response()
        }
    }
}

/// GET /api/plugins/endpoints
async fn list_endpoints(State(state): State<PluginRouteState>) -> impl IntoResponse {
    let listing: HashMap<String, Vec<Value>> = state
        .manager
        .endpoints()
        .await
        .into_iter()
        .map(|(remote, endpoints)| {
            let entries = endpoints
                .iter()
                .map(|e| json!({ "method": e.method.to_string(), "path": e.path }))
                .collect();
            (remote, entries)
        })
        .collect();
    Json(listing)
}
