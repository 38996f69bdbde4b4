//! Read API server
//!
//! Serves the node registry to dashboards over HTTP (or HTTPS with
//! `--secure`). Every response carries the permissive CORS headers the
//! dashboards expect, preflight requests included.

pub mod rest;

use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    response::Response,
    routing::get,
    Router,
};
use loramesh_gateway::GatewayHandle;
use tower_http::cors::{Any, CorsLayer};

const ALLOW_ORIGIN: &str = "*";
const ALLOW_METHODS: &str = "GET,PUT,POST,DELETE";
const ALLOW_HEADERS: &str = "Content-Type,Authorization";

/// Create the server router
pub fn create_router(handle: GatewayHandle) -> Router {
    Router::new()
        // Health check
        .route("/health", get(rest::health))
        // Node registry
        .route("/meshnodesinfo", get(rest::mesh_nodes_info))
        .fallback(rest::not_found)
        // Preflight handling
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods([Method::GET, Method::PUT, Method::POST, Method::DELETE])
                .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
        )
        .layer(middleware::map_response(stamp_cors_headers))
        .with_state(handle)
}

/// Set the CORS headers on every response, not only on preflights
async fn stamp_cors_headers(mut response: Response) -> Response {
    let headers = response.headers_mut();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static(ALLOW_METHODS),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use loramesh_gateway::test_utils::{sample_report, MockRadio};
    use loramesh_gateway::{Gateway, GatewayConfig};
    use tower::ServiceExt;

    async fn populated_handle() -> GatewayHandle {
        let radio = MockRadio::new().with_report(sample_report());
        let (mut gateway, handle) = Gateway::new(radio, GatewayConfig::default()).unwrap();
        gateway.connect().await;
        gateway.report_cycle().await.unwrap();
        handle
    }

    fn assert_cors(response: &Response) {
        let headers = response.headers();
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "*");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_METHODS],
            "GET,PUT,POST,DELETE"
        );
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "Content-Type,Authorization"
        );
    }

    #[tokio::test]
    async fn test_mesh_nodes_info() {
        let app = create_router(populated_handle().await);
        let response = app
            .oneshot(Request::get("/meshnodesinfo").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(&response);

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        let nodes = json["MeshNodesInfo"].as_array().unwrap();
        assert_eq!(nodes.len(), 3);
        assert_eq!(nodes[0]["ID"], "a1b2c3d4");
        assert_eq!(nodes[0]["User"], "Base Camp");
        assert_eq!(nodes[0]["Latitude"], "3.1390 [degree]");
        assert_eq!(nodes[2]["SNR"], "N/A");
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let (_, handle) = Gateway::new(MockRadio::new(), GatewayConfig::default()).unwrap();
        let response = create_router(handle)
            .oneshot(Request::get("/meshnodesinfo").body(Body::empty()).unwrap())
            .await
            .unwrap();

        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], br#"{"MeshNodesInfo":[]}"#);
    }

    #[tokio::test]
    async fn test_health() {
        let (_, handle) = Gateway::new(MockRadio::new(), GatewayConfig::default()).unwrap();
        let response = create_router(handle)
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_cors(&response);
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"OK");
    }

    #[tokio::test]
    async fn test_preflight_and_unknown_routes_carry_cors() {
        let (_, handle) = Gateway::new(MockRadio::new(), GatewayConfig::default()).unwrap();
        let app = create_router(handle);

        let preflight = Request::builder()
            .method(Method::OPTIONS)
            .uri("/meshnodesinfo")
            .header(header::ORIGIN, "http://dashboard.local")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();
        let response = app.clone().oneshot(preflight).await.unwrap();
        assert!(response.status().is_success());
        assert_cors(&response);

        let response = app
            .oneshot(Request::get("/nowhere").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_cors(&response);
    }
}
