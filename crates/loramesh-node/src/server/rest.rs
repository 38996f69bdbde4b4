//! REST API endpoints

use axum::{extract::State, http::StatusCode, Json};
use loramesh_gateway::{GatewayHandle, NodeRecord};
use serde::Serialize;
use tracing::debug;

/// Body of `GET /meshnodesinfo`
#[derive(Debug, Serialize)]
pub struct MeshNodesInfo {
    /// Every known node, in the order first heard
    #[serde(rename = "MeshNodesInfo")]
    pub nodes: Vec<NodeRecord>,
}

/// List the node registry
pub async fn mesh_nodes_info(State(handle): State<GatewayHandle>) -> Json<MeshNodesInfo> {
    let nodes = handle.nodes();
    debug!(nodes = nodes.len(), link = %handle.link_state(), "Serving node registry");
    Json(MeshNodesInfo { nodes })
}

/// Health check endpoint
pub async fn health() -> &'static str {
    "OK"
}

/// Fallback for unknown routes
pub async fn not_found() -> (StatusCode, &'static str) {
    (StatusCode::NOT_FOUND, "Not Found")
}
