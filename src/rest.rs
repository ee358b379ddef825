/*!
geodash REST API Server

Serves a configured dashboard over HTTP. Every request is one render pass:
the dataset queries run again and the filter state comes from the query string.

## Usage

```bash
geodash-rest --config dashboard.toml --host 127.0.0.1 --port 3000
```

## Endpoints

- `GET /` - Render the HTML dashboard (`?category=..&threshold=..&<param>=..`)
- `GET /api/v1/render` - Render the kepler.gl map configuration (same query string)
- `GET /api/v1/health` - Health check
- `GET /api/v1/version` - Version information
*/

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use clap::Parser;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use geodash::writer::{HtmlWriter, KeplerWriter, Writer};
use geodash::{DashboardConfig, FilterState, GeodashError, Pipeline, VERSION};

/// CLI arguments for the REST API server
#[derive(Parser)]
#[command(name = "geodash-rest")]
#[command(about = "geodash REST API Server")]
#[command(version = VERSION)]
struct Cli {
    /// Dashboard config file (TOML)
    #[arg(long)]
    config: PathBuf,

    /// Override the config's connection string
    #[arg(long)]
    reader: Option<String>,

    /// Host address to bind to
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind to
    #[arg(long, default_value = "3334")]
    port: u16,

    /// CORS allowed origins (comma-separated)
    #[arg(long, default_value = "*")]
    cors_origin: String,
}

/// Shared application state
#[derive(Clone)]
struct AppState {
    /// One render pass at a time
    pipeline: Arc<Mutex<Pipeline>>,
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Successful API response
#[derive(Debug, Serialize)]
struct ApiSuccess<T> {
    status: String,
    data: T,
}

/// Error API response
#[derive(Debug, Serialize)]
struct ApiError {
    status: String,
    error: ErrorDetails,
}

#[derive(Debug, Serialize)]
struct ErrorDetails {
    message: String,
    #[serde(rename = "type")]
    error_type: String,
}

/// Health check response
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

/// Version response
#[derive(Debug, Serialize)]
struct VersionResponse {
    version: String,
    features: Vec<String>,
}

/// Filter state and query parameter overrides of one request
#[derive(Debug, Default, PartialEq)]
struct RenderRequest {
    filter: FilterState,
    overrides: BTreeMap<String, String>,
}

impl RenderRequest {
    /// `category` and `threshold` drive the controls; every other key
    /// overrides the query parameter of the same name. Empty values mean unset.
    fn from_query(query: HashMap<String, String>) -> Result<Self, ApiErrorResponse> {
        let mut request = RenderRequest::default();

        for (key, value) in query {
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "category" => request.filter.category = Some(value),
                "threshold" => {
                    let threshold = value.parse::<f64>().map_err(|_| {
                        ApiErrorResponse::from(format!("Invalid threshold: '{}'", value))
                    })?;
                    request.filter.threshold = Some(threshold);
                }
                _ => {
                    request.overrides.insert(key, value);
                }
            }
        }

        Ok(request)
    }
}

// ============================================================================
// Error Handling
// ============================================================================

/// Custom error type for API responses
#[derive(Debug)]
struct ApiErrorResponse {
    status: StatusCode,
    error: ApiError,
}

impl IntoResponse for ApiErrorResponse {
    fn into_response(self) -> Response {
        let json = Json(self.error);
        (self.status, json).into_response()
    }
}

impl From<GeodashError> for ApiErrorResponse {
    fn from(err: GeodashError) -> Self {
        let (status, error_type) = match &err {
            GeodashError::ConnectionError(_) => (StatusCode::BAD_GATEWAY, "ConnectionError"),
            GeodashError::QueryError(_) => (StatusCode::BAD_REQUEST, "QueryError"),
            GeodashError::ConfigError(_) => (StatusCode::BAD_REQUEST, "ConfigError"),
            GeodashError::LayerError(_) => (StatusCode::UNPROCESSABLE_ENTITY, "LayerError"),
            GeodashError::WriterError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WriterError"),
            GeodashError::InternalError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        };

        ApiErrorResponse {
            status,
            error: ApiError {
                status: "error".to_string(),
                error: ErrorDetails {
                    message: err.to_string(),
                    error_type: error_type.to_string(),
                },
            },
        }
    }
}

impl From<String> for ApiErrorResponse {
    fn from(msg: String) -> Self {
        ApiErrorResponse {
            status: StatusCode::BAD_REQUEST,
            error: ApiError {
                status: "error".to_string(),
                error: ErrorDetails {
                    message: msg,
                    error_type: "BadRequest".to_string(),
                },
            },
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Run one render pass on a blocking thread and write it with `writer`.
async fn render_with<W>(
    state: AppState,
    request: RenderRequest,
    writer: W,
) -> Result<W::Output, ApiErrorResponse>
where
    W: Writer + Send + 'static,
    W::Output: Send + 'static,
{
    let rendered = tokio::task::spawn_blocking(move || -> geodash::Result<W::Output> {
        let pipeline = state.pipeline.lock().map_err(|e| {
            GeodashError::InternalError(format!("Pipeline unavailable (mutex poisoned): {}", e))
        })?;
        let dashboard = pipeline.render_with_params(&request.filter, &request.overrides)?;
        info!(
            "Rendered {} layer(s), {} table(s)",
            dashboard.map.layers.len(),
            dashboard.tables.len()
        );
        writer.write(&dashboard)
    })
    .await
    .map_err(|e| GeodashError::InternalError(format!("Render task failed: {}", e)))??;

    Ok(rendered)
}

// ============================================================================
// Handler Functions
// ============================================================================

/// GET / - Render the HTML dashboard
async fn root_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Html<String>, ApiErrorResponse> {
    let request = RenderRequest::from_query(query)?;
    info!("Rendering page with {:?}", request.filter);
    let page = render_with(state, request, HtmlWriter::new()).await?;
    Ok(Html(page))
}

/// GET /api/v1/render - Render the kepler.gl map configuration
async fn render_handler(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiErrorResponse> {
    let request = RenderRequest::from_query(query)?;
    info!("Rendering map with {:?}", request.filter);
    let json = render_with(state, request, KeplerWriter::new()).await?;
    Ok(([(header::CONTENT_TYPE, "application/json")], json).into_response())
}

/// GET /api/v1/health - Health check
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: VERSION.to_string(),
    })
}

/// GET /api/v1/version - Version information
async fn version_handler() -> Json<ApiSuccess<VersionResponse>> {
    let mut features = Vec::new();

    #[cfg(feature = "duckdb")]
    features.push("duckdb".to_string());

    #[cfg(feature = "athena")]
    features.push("athena".to_string());

    Json(ApiSuccess {
        status: "success".to_string(),
        data: VersionResponse {
            version: VERSION.to_string(),
            features,
        },
    })
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/api/v1/render", get(render_handler))
        .route("/api/v1/health", get(health_handler))
        .route("/api/v1/version", get(version_handler))
        .with_state(state)
}

// ============================================================================
// Main Server
// ============================================================================

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "geodash=info,geodash_rest=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Parse CLI arguments
    let cli = Cli::parse();

    let mut config = DashboardConfig::from_file(&cli.config)?;
    if let Some(reader) = cli.reader {
        config.reader = reader;
    }
    info!(
        "Loaded '{}' ({} dataset(s), {} layer(s))",
        config.title,
        config.datasets.len(),
        config.layers.len()
    );

    let state = AppState {
        pipeline: Arc::new(Mutex::new(Pipeline::from_config(config)?)),
    };

    // Configure CORS
    let cors = if cli.cors_origin == "*" {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    } else {
        let origins: Vec<_> = cli
            .cors_origin
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(vec![header::CONTENT_TYPE])
    };

    let app = router(state)
        .layer(cors)
        .layer(tower_http::trace::TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", cli.host, cli.port).parse()?;

    info!("Starting geodash REST API server on {}", addr);
    info!("  GET  /               - HTML dashboard");
    info!("  GET  /api/v1/render  - kepler.gl map configuration");
    info!("  GET  /api/v1/health  - Health check");
    info!("  GET  /api/v1/version - Version info");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use geodash::reader::{PolarsReader, Reader};
    use polars::prelude::*;
    use tower::util::ServiceExt;

    const CONFIG: &str = r##"
title = "Hubs"
reader = "polars://memory"

[params]
min_gmv = 0

[[datasets]]
id = "hubs"
query = "SELECT * FROM hubs WHERE gmv >= {{min_gmv}}"
latitude = "lat"
longitude = "lng"

[[layers]]
id = "hub-gmv"
dataset = "hubs"
color_field = "gmv"

[controls.category]
column = "region"
label = "Region"
"##;

    fn create_test_app() -> Router {
        let reader = PolarsReader::new();
        let df = df! {
            "lat" => [-23.5, -22.9, -19.9],
            "lng" => [-46.6, -43.2, -43.9],
            "region" => ["SP", "RJ", "MG"],
            "gmv" => [300.0, 200.0, 100.0],
        }
        .unwrap();
        reader.register("hubs", df, false).unwrap();

        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        router(AppState {
            pipeline: Arc::new(Mutex::new(Pipeline::new(config, Box::new(reader)))),
        })
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn test_render_request_from_query() {
        let query = HashMap::from([
            ("category".to_string(), "SP".to_string()),
            ("threshold".to_string(), "2.5".to_string()),
            ("min_gmv".to_string(), "150".to_string()),
            ("empty".to_string(), String::new()),
        ]);
        let request = RenderRequest::from_query(query).unwrap();
        assert_eq!(request.filter.category.as_deref(), Some("SP"));
        assert_eq!(request.filter.threshold, Some(2.5));
        assert_eq!(
            request.overrides,
            BTreeMap::from([("min_gmv".to_string(), "150".to_string())])
        );

        let bad = HashMap::from([("threshold".to_string(), "high".to_string())]);
        assert!(RenderRequest::from_query(bad).is_err());
    }

    #[tokio::test]
    async fn test_root_renders_html_page() {
        let response = create_test_app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/?category=RJ")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("<h1>Hubs</h1>"));
        assert!(html.contains("<option value=\"RJ\" selected>RJ</option>"));
    }

    #[tokio::test]
    async fn test_render_endpoint_applies_filter_and_params() {
        let (status, json) = get_json(create_test_app(), "/api/v1/render").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["datasets"][0]["data"]["allData"].as_array().unwrap().len(), 3);
        assert_eq!(json["config"]["config"]["visState"]["layers"][0]["id"], "hub-gmv");

        let (_, json) = get_json(create_test_app(), "/api/v1/render?category=SP").await;
        assert_eq!(json["datasets"][0]["data"]["allData"].as_array().unwrap().len(), 1);

        let (_, json) = get_json(create_test_app(), "/api/v1/render?min_gmv=150").await;
        assert_eq!(json["datasets"][0]["data"]["allData"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_render_endpoint_rejects_untyped_params() {
        let (status, json) =
            get_json(create_test_app(), "/api/v1/render?min_gmv=9999%20OR%20TRUE").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "ConfigError");

        let (status, json) = get_json(create_test_app(), "/api/v1/render?region=SP").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(json["error"]["message"]
            .as_str()
            .unwrap()
            .contains("Unknown query parameter 'region'"));
    }

    #[tokio::test]
    async fn test_root_form_keeps_params() {
        let response = create_test_app()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/?min_gmv=250")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let html = String::from_utf8_lossy(&body);
        assert!(html.contains("name=\"min_gmv\" value=\"250\""));
    }

    #[tokio::test]
    async fn test_render_endpoint_invalid_threshold() {
        let (status, json) = get_json(create_test_app(), "/api/v1/render?threshold=abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["status"], "error");
        assert_eq!(json["error"]["type"], "BadRequest");
    }

    #[tokio::test]
    async fn test_query_failure_is_reported() {
        let reader = PolarsReader::new();
        let config = DashboardConfig::from_toml(CONFIG).unwrap();
        let app = router(AppState {
            pipeline: Arc::new(Mutex::new(Pipeline::new(config, Box::new(reader)))),
        });

        let (status, json) = get_json(app, "/api/v1/render").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(json["error"]["type"], "QueryError");
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let (status, json) = get_json(create_test_app(), "/api/v1/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["status"], "healthy");
        assert!(json["version"].is_string());
    }

    #[tokio::test]
    async fn test_version_endpoint() {
        let (status, json) = get_json(create_test_app(), "/api/v1/version").await;
        assert_eq!(status, StatusCode::OK);
        assert!(json["data"]["version"].is_string());
        assert!(json["data"]["features"].is_array());
    }
}
