//! HTTP API Server
//!
//! Serves the remote network driver protocol: one POST route per
//! operation, JSON in and out.

use std::future::Future;
use std::sync::Arc;

use axum::{
    async_trait,
    body::Bytes,
    extract::{FromRequest, Request, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{de::DeserializeOwned, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::ServerConfig;
use crate::driver::protocol::{
    CreateEndpointRequest, CreateNetworkRequest, DeleteNetworkRequest, EndpointRequest,
    ErrorResponse, JoinRequest,
};
use crate::driver::Driver;
use crate::error::{Error, ErrorKind, Result};

/// Media type of plugin protocol bodies
pub const PLUGIN_CONTENT_TYPE: &str = "application/vnd.docker.plugins.v1+json";

/// HTTP API server
pub struct HttpServer {
    config: ServerConfig,
    driver: Arc<Driver>,
}

impl HttpServer {
    /// Create a new HTTP server
    pub fn new(config: ServerConfig, driver: Arc<Driver>) -> Self {
        Self { config, driver }
    }

    /// Create the router
    pub fn create_router(driver: Arc<Driver>) -> Router {
        Router::new()
            // Plugin handshake
            .route("/Plugin.Activate", post(handle_activate))
            .route("/NetworkDriver.GetCapabilities", post(handle_capabilities))
            // Networks
            .route("/NetworkDriver.CreateNetwork", post(handle_create_network))
            .route("/NetworkDriver.DeleteNetwork", post(handle_delete_network))
            // Endpoints
            .route("/NetworkDriver.CreateEndpoint", post(handle_create_endpoint))
            .route("/NetworkDriver.EndpointOperInfo", post(handle_endpoint_info))
            .route("/NetworkDriver.DeleteEndpoint", post(handle_delete_endpoint))
            .route("/NetworkDriver.Join", post(handle_join))
            .route("/NetworkDriver.Leave", post(handle_leave))
            // Discovery is not used by this driver
            .route("/NetworkDriver.DiscoverNew", post(handle_discover))
            .route("/NetworkDriver.DiscoverDelete", post(handle_discover))
            .fallback(handle_not_implemented)
            .layer(TraceLayer::new_for_http())
            .with_state(driver)
    }

    /// Serve until `shutdown` resolves
    pub async fn start(&self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let app = Self::create_router(Arc::clone(&self.driver));

        let listener = tokio::net::TcpListener::bind(&self.config.bind_address).await?;
        tracing::info!("Plugin API listening on {}", self.config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::Internal(format!("HTTP server error: {}", e)))?;

        Ok(())
    }
}

// ============ Body handling ============

/// JSON body extractor that ignores the Content-Type header
///
/// The host labels bodies with its own media type, which `Json` rejects.
pub struct PluginJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for PluginJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let bytes = Bytes::from_request(req, state)
            .await
            .map_err(IntoResponse::into_response)?;
        serde_json::from_slice(&bytes)
            .map(PluginJson)
            .map_err(|e| error_response(&Error::InvalidRequest(e.to_string())))
    }
}

fn plugin_json<T: Serialize>(body: T) -> Response {
    ([(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)], Json(body)).into_response()
}

/// Errors travel as `{"Err": "..."}` with a 200 status
fn error_response(err: &Error) -> Response {
    match err.kind() {
        ErrorKind::Persistence | ErrorKind::ExternalTool | ErrorKind::Internal => {
            tracing::error!(retryable = err.is_retryable(), "Request failed: {:?}", err)
        }
        _ => tracing::warn!("Request rejected: {:?}", err),
    }
    plugin_json(ErrorResponse {
        err: err.to_string(),
    })
}

/// Run a driver call on its own task
///
/// Hyper drops the handler future when the client disconnects; a
/// half-finished Join would leave an interface without a binding. The
/// spawned task always runs to completion.
async fn detached<T, F>(call: F) -> Result<T>
where
    F: Future<Output = Result<T>> + Send + 'static,
    T: Send + 'static,
{
    tokio::spawn(call)
        .await
        .map_err(|e| Error::Internal(format!("driver task failed: {}", e)))?
}

fn reply<T: Serialize>(result: Result<T>) -> Response {
    match result {
        Ok(body) => plugin_json(body),
        Err(e) => error_response(&e),
    }
}

// ============ Handlers ============

async fn handle_activate(State(driver): State<Arc<Driver>>) -> Response {
    plugin_json(driver.activate())
}

async fn handle_capabilities(State(driver): State<Arc<Driver>>) -> Response {
    plugin_json(driver.capabilities())
}

async fn handle_create_network(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<CreateNetworkRequest>,
) -> Response {
    reply(detached(async move { driver.create_network(req).await }).await)
}

async fn handle_delete_network(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<DeleteNetworkRequest>,
) -> Response {
    reply(detached(async move { driver.delete_network(req).await }).await)
}

async fn handle_create_endpoint(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<CreateEndpointRequest>,
) -> Response {
    reply(detached(async move { driver.create_endpoint(req).await }).await)
}

async fn handle_endpoint_info(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<EndpointRequest>,
) -> Response {
    plugin_json(driver.endpoint_info(req))
}

async fn handle_delete_endpoint(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<EndpointRequest>,
) -> Response {
    reply(detached(async move { driver.delete_endpoint(req).await }).await)
}

async fn handle_join(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<JoinRequest>,
) -> Response {
    reply(detached(async move { driver.join(req).await }).await)
}

async fn handle_leave(
    State(driver): State<Arc<Driver>>,
    PluginJson(req): PluginJson<EndpointRequest>,
) -> Response {
    reply(detached(async move { driver.leave(req).await }).await)
}

async fn handle_discover(State(driver): State<Arc<Driver>>) -> Response {
    plugin_json(driver.discover())
}

async fn handle_not_implemented() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, "not implemented")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InterfaceConfig;
    use crate::interface::testing::FakeLink;
    use crate::interface::Interfaces;
    use crate::state::testing::MemoryBackend;
    use crate::state::NetworkStore;
    use axum::body::Body;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tower::ServiceExt;

    fn router() -> Router {
        router_with(Arc::new(FakeLink::default())).0
    }

    fn router_with(link: Arc<FakeLink>) -> (Router, Arc<NetworkStore>) {
        let store = Arc::new(NetworkStore::with_backend(Box::new(MemoryBackend::default())).unwrap());
        let interfaces = Interfaces::new(link, &InterfaceConfig::default());
        let driver = Arc::new(Driver::new(Arc::clone(&store), interfaces, "wg".to_string()));
        (HttpServer::create_router(driver), store)
    }

    async fn call(app: &Router, path: &str, body: &str) -> (StatusCode, Vec<u8>) {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri(path)
            .header(header::CONTENT_TYPE, PLUGIN_CONTENT_TYPE)
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    async fn call_json(app: &Router, path: &str, body: Value) -> Value {
        let (status, bytes) = call(app, path, &body.to_string()).await;
        assert_eq!(status, StatusCode::OK);
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_handshake() {
        let app = router();
        assert_eq!(
            call_json(&app, "/Plugin.Activate", json!({})).await,
            json!({"Implements": ["NetworkDriver"]})
        );
        assert_eq!(
            call_json(&app, "/NetworkDriver.GetCapabilities", json!({})).await,
            json!({"Scope": "local", "ConnectivityScope": "local"})
        );
        assert_eq!(call_json(&app, "/NetworkDriver.DiscoverNew", json!({})).await, json!({}));
        assert_eq!(call_json(&app, "/NetworkDriver.DiscoverDelete", json!({})).await, json!({}));
    }

    #[tokio::test]
    async fn test_unknown_route() {
        let app = router();
        let (status, body) = call(&app, "/IpamDriver.RequestPool", "{}").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body, b"not implemented");
    }

    #[tokio::test]
    async fn test_full_lifecycle() {
        let app = router();
        let ids = json!({"NetworkID": "n1", "EndpointID": "e1"});

        let created = call_json(
            &app,
            "/NetworkDriver.CreateNetwork",
            json!({
                "NetworkID": "n1",
                "Options": {"com.docker.network.generic": {
                    "io.bestov.wg.peer": "203.0.113.1:51820",
                    "io.bestov.wg.peerkey": "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=",
                    "io.bestov.wg.seed": "c2VlZA=="
                }}
            }),
        )
        .await;
        assert_eq!(created, json!({}));

        let endpoint = call_json(
            &app,
            "/NetworkDriver.CreateEndpoint",
            json!({"NetworkID": "n1", "EndpointID": "e1", "Interface": {"Address": "10.0.0.2/24"}}),
        )
        .await;
        assert_eq!(endpoint, json!({"Interface": {}}));

        assert_eq!(
            call_json(&app, "/NetworkDriver.EndpointOperInfo", ids.clone()).await,
            json!({"Value": {}})
        );

        let joined = call_json(&app, "/NetworkDriver.Join", ids.clone()).await;
        assert_eq!(joined["InterfaceName"]["SrcName"], "bste1");
        assert_eq!(joined["StaticRoutes"][0]["RouteType"], 1);

        let again = call_json(&app, "/NetworkDriver.Join", ids.clone()).await;
        assert_eq!(again, json!({"Err": "endpoint already joined"}));

        assert_eq!(call_json(&app, "/NetworkDriver.Leave", ids.clone()).await, json!({}));
        assert_eq!(
            call_json(&app, "/NetworkDriver.Leave", ids.clone()).await,
            json!({"Err": "endpoint not joined"})
        );
        assert_eq!(call_json(&app, "/NetworkDriver.DeleteEndpoint", ids).await, json!({}));
        assert_eq!(
            call_json(&app, "/NetworkDriver.DeleteNetwork", json!({"NetworkID": "n1"})).await,
            json!({})
        );
        assert_eq!(
            call_json(&app, "/NetworkDriver.DeleteNetwork", json!({"NetworkID": "n1"})).await,
            json!({"Err": "unknown network"})
        );
    }

    #[tokio::test]
    async fn test_join_completes_after_client_disconnect() {
        let link = Arc::new(FakeLink::default());
        let (app, store) = router_with(Arc::clone(&link));
        let created = call_json(
            &app,
            "/NetworkDriver.CreateNetwork",
            json!({
                "NetworkID": "n1",
                "Options": {"com.docker.network.generic": {
                    "io.bestov.wg.peer": "203.0.113.1:51820",
                    "io.bestov.wg.peerkey": "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=",
                    "io.bestov.wg.seed": "c2VlZA=="
                }}
            }),
        )
        .await;
        assert_eq!(created, json!({}));
        call_json(
            &app,
            "/NetworkDriver.CreateEndpoint",
            json!({"NetworkID": "n1", "EndpointID": "e1", "Interface": {"Address": "10.0.0.2/24"}}),
        )
        .await;

        link.slow_configure(Duration::from_millis(300));
        let body = json!({"NetworkID": "n1", "EndpointID": "e1"}).to_string();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/NetworkDriver.Join")
            .body(Body::from(body))
            .unwrap();

        // The client gives up while the interface is being configured
        let abandoned = tokio::time::timeout(Duration::from_millis(50), app.clone().oneshot(request)).await;
        assert!(abandoned.is_err());
        assert!(link.exists_now("bste1"));

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let joined = loop {
            let (_, endpoint) = store.lookup("n1", "e1").await.unwrap();
            if endpoint.joined_interface.is_some() || tokio::time::Instant::now() > deadline {
                break endpoint.joined_interface;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };
        assert_eq!(joined.as_deref(), Some("bste1"));
        assert!(link.exists_now("bste1"));
    }

    #[tokio::test]
    async fn test_malformed_body() {
        let app = router();
        let (status, body) = call(&app, "/NetworkDriver.Join", "not json").await;
        assert_eq!(status, StatusCode::OK);
        let value: Value = serde_json::from_slice(&body).unwrap();
        assert!(value["Err"].as_str().unwrap().starts_with("invalid request"));
    }
}
