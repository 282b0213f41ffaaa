use crate::config::Config;
use crate::error::{RelayError, Result};
use crate::graph::TaskKind;
use crate::relay::{GraphRelay, Upload};
use axum::{
    extract::{DefaultBodyLimit, FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Check if a port is available by attempting to bind to it
async fn check_port_available(addr: &str) -> bool {
    tokio::net::TcpListener::bind(addr).await.is_ok()
}

/// HTTP front end for the graph relay
pub struct HttpRelayServer {
    relay: Arc<GraphRelay>,
    config: Config,
}

impl HttpRelayServer {
    pub fn new(relay: Arc<GraphRelay>, config: Config) -> Self {
        Self { relay, config }
    }

    /// Run the HTTP server
    pub async fn run(&self, port: u16) -> Result<()> {
        let app = self.router();

        let addr = format!("{}:{}", self.config.server.host, port);
        log::info!("Starting kgrelay HTTP server on http://{}", addr);
        log::info!("Endpoints: POST /upload/pdf, POST /upload/image, POST /update/graph");

        // Check if port is available before attempting to bind
        if !check_port_available(&addr).await {
            return Err(RelayError::Config(format!(
                "Port {} is already in use. Stop the other process or set server.port in config.toml",
                port
            )));
        }

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            RelayError::Io(std::io::Error::new(
                e.kind(),
                format!("Failed to bind to {}: {}", addr, e),
            ))
        })?;

        axum::serve(listener, app).await.map_err(|e| {
            RelayError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("HTTP server error: {}", e),
            ))
        })?;

        Ok(())
    }

    /// Create the axum router
    pub fn router(&self) -> Router {
        let allowed_origins = &self.config.server.allowed_origins;

        // Any origin when none are configured (local dev), otherwise the explicit list
        let cors = if allowed_origins.is_empty() {
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
        } else {
            let origins: Vec<axum::http::HeaderValue> = allowed_origins
                .iter()
                .filter_map(|o| o.parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(AllowOrigin::list(origins))
                .allow_methods(Any)
                .allow_headers(Any)
        };

        Router::new()
            .route("/upload/pdf", post(handle_upload_pdf))
            .route("/upload/image", post(handle_upload_image))
            .route("/update/graph", post(handle_update_graph))
            .route("/health", get(handle_health))
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(cors)
                    .layer(DefaultBodyLimit::max(self.config.uploads.max_upload_bytes)),
            )
            .with_state(AppState {
                relay: Arc::clone(&self.relay),
            })
    }
}

/// Application state shared across handlers
#[derive(Clone)]
struct AppState {
    relay: Arc<GraphRelay>,
}

/// urlencoded body of `/update/graph`
#[derive(Debug, Deserialize)]
struct GraphForm {
    graph_json: String,
}

/// Handle POST /upload/pdf
async fn handle_upload_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> std::result::Result<Json<Value>, RelayError> {
    ingest(state, TaskKind::Pdf, multipart).await
}

/// Handle POST /upload/image
async fn handle_upload_image(
    State(state): State<AppState>,
    multipart: Multipart,
) -> std::result::Result<Json<Value>, RelayError> {
    ingest(state, TaskKind::Image, multipart).await
}

async fn ingest(
    state: AppState,
    kind: TaskKind,
    multipart: Multipart,
) -> std::result::Result<Json<Value>, RelayError> {
    let (upload, graph_json) = read_upload_form(multipart).await?;
    let new_graph = state.relay.ingest_file(kind, upload, &graph_json).await?;

    Ok(Json(json!({
        "message": kind.success_message(),
        "new_graph": new_graph,
    })))
}

/// Handle POST /update/graph
///
/// Accepts `graph_json` either urlencoded or as a multipart form field.
async fn handle_update_graph(
    State(state): State<AppState>,
    request: Request,
) -> std::result::Result<Json<Value>, RelayError> {
    let graph_json = read_graph_field(request).await?;
    let updated_graph = state.relay.update_graph(&graph_json).await?;

    Ok(Json(json!({
        "message": TaskKind::Enhancement.success_message(),
        "updated_graph": updated_graph,
    })))
}

/// Handle health check endpoint
async fn handle_health() -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "status": "ok",
            "service": "kgrelay",
            "version": env!("CARGO_PKG_VERSION")
        })),
    )
        .into_response()
}

/// Map a body rejection to a relay error, keeping the size-limit status.
fn body_error(status: StatusCode, what: &str, reason: String) -> RelayError {
    if status == StatusCode::PAYLOAD_TOO_LARGE {
        RelayError::PayloadTooLarge(format!("{} exceeds the upload size limit", what))
    } else {
        RelayError::InvalidInput(format!("invalid {}: {}", what, reason))
    }
}

fn multipart_error(e: axum::extract::multipart::MultipartError) -> RelayError {
    body_error(e.status(), "multipart payload", e.body_text())
}

/// Collect the `file` and `graph_json` fields of an upload form.
async fn read_upload_form(mut multipart: Multipart) -> Result<(Upload, String)> {
    let mut upload: Option<Upload> = None;
    let mut graph_json: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field.bytes().await.map_err(multipart_error)?;
                upload = Some(Upload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            }
            Some("graph_json") => {
                graph_json = Some(field.text().await.map_err(multipart_error)?);
            }
            other => {
                log::debug!("Ignoring unexpected form field {:?}", other);
            }
        }
    }

    let upload = upload.ok_or_else(|| RelayError::InvalidInput("missing form field 'file'".to_string()))?;
    let graph_json =
        graph_json.ok_or_else(|| RelayError::InvalidInput("missing form field 'graph_json'".to_string()))?;
    Ok((upload, graph_json))
}

/// Pull `graph_json` out of a urlencoded or multipart body.
async fn read_graph_field(request: Request) -> Result<String> {
    let is_multipart = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|ct| ct.starts_with("multipart/form-data"))
        .unwrap_or(false);

    if is_multipart {
        let mut multipart = Multipart::from_request(request, &())
            .await
            .map_err(|e| body_error(e.status(), "multipart payload", e.body_text()))?;
        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            if field.name() == Some("graph_json") {
                return field.text().await.map_err(multipart_error);
            }
        }
        return Err(RelayError::InvalidInput(
            "missing form field 'graph_json'".to_string(),
        ));
    }

    let Form(form) = Form::<GraphForm>::from_request(request, &())
        .await
        .map_err(|e| body_error(e.status(), "form body", e.body_text()))?;
    Ok(form.graph_json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RetryPolicy;
    use crate::relay::tests::{test_policy, MockModel};
    use crate::storage::ScratchStore;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use tempfile::TempDir;
    use tower::ServiceExt;

    const BOUNDARY: &str = "kgrelay-test-boundary";

    fn app(model: Arc<MockModel>, dir: &std::path::Path) -> Router {
        app_with_config(model, dir, test_policy(), Config::default())
    }

    fn app_with_config(
        model: Arc<MockModel>,
        dir: &std::path::Path,
        policy: RetryPolicy,
        config: Config,
    ) -> Router {
        let relay = Arc::new(GraphRelay::new(model, policy, ScratchStore::new(dir)));
        HttpRelayServer::new(relay, config).router()
    }

    fn form_request(uri: &str, graph_json: &str) -> HttpRequest<Body> {
        let body = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("graph_json", graph_json)
            .finish();
        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body))
            .unwrap()
    }

    fn multipart_request(
        uri: &str,
        file: Option<(&str, &str, &[u8])>,
        graph_json: Option<&str>,
    ) -> HttpRequest<Body> {
        let mut body: Vec<u8> = Vec::new();
        if let Some(graph_json) = graph_json {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"graph_json\"\r\n\r\n{}\r\n",
                    BOUNDARY, graph_json
                )
                .as_bytes(),
            );
        }
        if let Some((name, content_type, bytes)) = file {
            body.extend_from_slice(
                format!(
                    "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: {}\r\n\r\n",
                    BOUNDARY, name, content_type
                )
                .as_bytes(),
            );
            body.extend_from_slice(bytes);
            body.extend_from_slice(b"\r\n");
        }
        body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());

        HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(
                CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(body))
            .unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_update_graph_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::replying(vec![Ok(
            "```json\n{\"nodes\":[],\"edges\":[]}\n```".to_string(),
        )]));

        let response = app(model.clone(), temp_dir.path())
            .oneshot(form_request("/update/graph", r#"{"nodes": [{"id": "x"}]}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Knowledge graph updated successfully");
        assert_eq!(body["updated_graph"], json!({"nodes": [], "edges": []}));
        assert_eq!(model.prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_update_graph_accepts_multipart() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::replying(vec![Ok("{\"nodes\": []}".to_string())]));

        let response = app(model, temp_dir.path())
            .oneshot(multipart_request("/update/graph", None, Some("{}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["updated_graph"], json!({"nodes": []}));
    }

    #[tokio::test]
    async fn test_malformed_graph_is_client_error() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::default());

        let response = app(model.clone(), temp_dir.path())
            .oneshot(form_request("/update/graph", r#"{"nodes": [{"id": "x"}"#))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert!(body["detail"].as_str().unwrap().contains("Invalid graph JSON"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_server_error() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::replying(vec![Ok(
            "I could not build a graph from this.".to_string(),
        )]));

        let response = app(model, temp_dir.path())
            .oneshot(form_request("/update/graph", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            json_body(response).await["detail"],
            crate::error::UNPARSEABLE_REPLY_DETAIL
        );
    }

    #[tokio::test]
    async fn test_model_failure_surfaces_message() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::replying(vec![Err(RelayError::model(
            Some(400),
            "API key not valid",
        ))]));

        let response = app(model, temp_dir.path())
            .oneshot(form_request("/update/graph", "{}"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = json_body(response).await;
        assert!(body["detail"].as_str().unwrap().contains("API key not valid"));
    }

    #[tokio::test]
    async fn test_upload_pdf_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::replying(vec![Ok(
            "```json\n{\"nodes\": [{\"id\": \"chapter-1\"}], \"edges\": []}\n```".to_string(),
        )]));

        let response = app(model.clone(), temp_dir.path())
            .oneshot(multipart_request(
                "/upload/pdf",
                Some(("notes.pdf", "application/pdf", b"%PDF-1.4 body".as_slice())),
                Some(r#"{"nodes": []}"#),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["message"], "PDF processed successfully");
        assert_eq!(body["new_graph"]["nodes"][0]["id"], "chapter-1");

        let uploads = model.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].1, "notes.pdf");
        assert_eq!(uploads[0].3, b"%PDF-1.4 body");
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_image_end_to_end() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::replying(vec![Ok("{\"nodes\": [\"chart\"]}".to_string())]));

        let response = app(model.clone(), temp_dir.path())
            .oneshot(multipart_request(
                "/upload/image",
                Some(("chart.png", "image/png", [0x89u8, b'P', b'N', b'G'].as_slice())),
                Some("{}"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["message"], "Image processed successfully");
        assert_eq!(body["new_graph"], json!({"nodes": ["chart"]}));
        assert!(model.prompts.lock().unwrap()[0].0.contains("newly provided Image"));
    }

    #[tokio::test]
    async fn test_upload_missing_file_field() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::default());

        let response = app(model.clone(), temp_dir.path())
            .oneshot(multipart_request("/upload/pdf", None, Some("{}")))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(json_body(response).await["detail"]
            .as_str()
            .unwrap()
            .contains("'file'"));
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_upload_malformed_graph_writes_nothing() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::default());

        let response = app(model.clone(), temp_dir.path())
            .oneshot(multipart_request(
                "/upload/image",
                Some(("a.png", "image/png", b"png".as_slice())),
                Some("{'nodes': []}"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(model.call_count(), 0);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_upload_over_size_limit() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::default());
        let mut config = Config::default();
        config.uploads.max_upload_bytes = 64;

        let pdf = vec![b'%'; 4096];
        let response = app_with_config(model.clone(), temp_dir.path(), test_policy(), config)
            .oneshot(multipart_request(
                "/upload/pdf",
                Some(("big.pdf", "application/pdf", pdf.as_slice())),
                Some("{}"),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert!(json_body(response).await["detail"]
            .as_str()
            .unwrap()
            .contains("size limit"));
        assert_eq!(model.call_count(), 0);
        assert_eq!(std::fs::read_dir(temp_dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_update_graph_over_size_limit() {
        let temp_dir = TempDir::new().unwrap();
        let model = Arc::new(MockModel::default());
        let mut config = Config::default();
        config.uploads.max_upload_bytes = 64;

        let graph = format!(r#"{{"notes": "{}"}}"#, "x".repeat(4096));
        let response = app_with_config(model.clone(), temp_dir.path(), test_policy(), config)
            .oneshot(form_request("/update/graph", &graph))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
        assert_eq!(model.call_count(), 0);
    }

    #[tokio::test]
    async fn test_health() {
        let temp_dir = TempDir::new().unwrap();
        let response = app(Arc::new(MockModel::default()), temp_dir.path())
            .oneshot(
                HttpRequest::builder()
                    .uri("/health")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["status"], "ok");
    }
}
