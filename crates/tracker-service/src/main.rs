use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, Query, Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use clap::Parser;
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{DefaultOnResponse, TraceLayer};
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;
use tracker_api::{
    ApiError, ApiLocation, ApiResult, CreatedLocation, IntegrityReport, TrackerApi,
    UpdatedLocation, API_CONTRACT_VERSION,
};
use ulid::Ulid;

mod config;

use config::Config;

const SERVICE_CONTRACT_VERSION: &str = "service.v1";
const OPENAPI_YAML: &str = include_str!("../../../openapi/openapi.yaml");

#[derive(Clone)]
struct ServiceState {
    api: TrackerApi,
    password: Arc<str>,
}

#[derive(Debug, Clone, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug)]
struct ServiceError {
    status: StatusCode,
    message: String,
}

#[derive(Debug, Clone, Serialize)]
struct HealthResponse {
    status: &'static str,
    service_contract_version: &'static str,
    api_contract_version: &'static str,
    integrity: IntegrityReport,
}

#[derive(Debug, Clone, Deserialize)]
struct ChangeTimeQuery {
    change_time: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct DeletionTimeQuery {
    deletion_time: Option<String>,
}

#[derive(Debug, Parser)]
#[command(name = "tracker-service")]
#[command(about = "HTTP service for location tracking and client sync")]
struct Args {
    #[arg(long, default_value = "./config/config.yaml")]
    config: PathBuf,
    /// Overrides `database.path` from the config file.
    #[arg(long)]
    db: Option<PathBuf>,
    /// Overrides `server.host` and `server.port` from the config file.
    #[arg(long)]
    bind: Option<String>,
}

impl ServiceError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self { status, message: message.into() }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<ApiError> for ServiceError {
    fn from(value: ApiError) -> Self {
        match value {
            ApiError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, value.to_string()),
            ApiError::InvalidInput(message) => Self::bad_request(message),
            ApiError::Storage(err) => {
                error!(error = %format!("{err:#}"), "storage operation failed");
                Self::internal()
            }
        }
    }
}

impl From<JsonRejection> for ServiceError {
    fn from(value: JsonRejection) -> Self {
        Self::bad_request(format!("invalid JSON body: {}", value.body_text()))
    }
}

impl From<PathRejection> for ServiceError {
    fn from(value: PathRejection) -> Self {
        Self::bad_request(format!("invalid location id: {}", value.body_text()))
    }
}

/// Empty or absent parameters mean "no lower bound".
fn parse_watermark(name: &str, raw: Option<&str>) -> Result<Option<i64>, ServiceError> {
    match raw.map(str::trim) {
        None | Some("") => Ok(None),
        Some(value) => value
            .parse::<i64>()
            .map(Some)
            .map_err(|_| ServiceError::bad_request(format!("{name} must be an integer"))),
    }
}

async fn run_blocking<T, F>(operation: F) -> Result<T, ServiceError>
where
    F: FnOnce() -> ApiResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(operation).await {
        Ok(result) => result.map_err(ServiceError::from),
        Err(err) => {
            error!(error = %err, "blocking repository task failed");
            Err(ServiceError::internal())
        }
    }
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
}

fn app(state: ServiceState) -> Router {
    let protected = Router::new()
        .route("/api/v1/location", get(list_locations).post(create_location))
        .route(
            "/api/v1/location/:id",
            get(get_location).put(update_location).delete(delete_location),
        )
        .route("/api/v1/deleted_location", get(list_deleted_locations))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_password));

    let public =
        Router::new().route("/api/v1/health", get(health)).route("/api/v1/openapi", get(openapi));

    Router::new()
        .merge(protected)
        .merge(public)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|request: &Request| {
                    tracing::info_span!(
                        "request",
                        request_id = %Ulid::new(),
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer())
        .with_state(state)
}

fn init_tracing(level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .with_context(|| format!("invalid log level `{level}`"))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|err| anyhow!("failed to install tracing subscriber: {err}"))
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown signal received"),
        Err(err) => {
            error!(error = %err, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = Config::load(&args.config)?;
    if let Some(db) = args.db {
        config.database.path = db;
    }
    init_tracing(&config.log.level)?;
    info!(version = env!("CARGO_PKG_VERSION"), "starting tracker service");

    if let Some(parent) = config.database.path.parent().filter(|dir| !dir.as_os_str().is_empty())
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create database directory {}", parent.display()))?;
    }

    let api = TrackerApi::new(config.database.path.clone())
        .with_busy_timeout(config.database.busy_timeout());
    let before = api.schema_status()?;
    let after = api.migrate()?;
    info!(
        from_version = before.current_version,
        to_version = after.current_version,
        db = %config.database.path.display(),
        "database schema ready"
    );

    let state = ServiceState { api, password: Arc::from(config.auth.password.as_str()) };
    let bind = args.bind.unwrap_or_else(|| config.bind_address());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    info!(address = %listener.local_addr()?, "listening");

    axum::serve(listener, app(state)).with_graceful_shutdown(shutdown_signal()).await?;
    info!("tracker service stopped");
    Ok(())
}

async fn require_password(
    State(state): State<ServiceState>,
    request: Request,
    next: Next,
) -> Response {
    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .is_some_and(|value| value.as_bytes() == state.password.as_bytes());

    if !authorized {
        warn!(method = %request.method(), path = %request.uri().path(), "rejected unauthorized request");
        return ServiceError::unauthorized().into_response();
    }
    next.run(request).await
}

async fn health(State(state): State<ServiceState>) -> Response {
    let api = state.api.clone();
    let integrity = match tokio::task::spawn_blocking(move || api.health()).await {
        Ok(Ok(report)) => report,
        Ok(Err(err)) => {
            error!(error = %format!("{:#}", anyhow!(err)), "health check failed");
            return ServiceError::new(StatusCode::SERVICE_UNAVAILABLE, "health check failed")
                .into_response();
        }
        Err(err) => {
            error!(error = %err, "health check task failed");
            return ServiceError::new(StatusCode::SERVICE_UNAVAILABLE, "health check failed")
                .into_response();
        }
    };

    let (status_code, status) = if integrity.is_healthy() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };
    let body = HealthResponse {
        status,
        service_contract_version: SERVICE_CONTRACT_VERSION,
        api_contract_version: API_CONTRACT_VERSION,
        integrity,
    };
    (status_code, Json(body)).into_response()
}

async fn openapi() -> impl IntoResponse {
    (StatusCode::OK, [(header::CONTENT_TYPE, "application/yaml; charset=utf-8")], OPENAPI_YAML)
}

async fn list_locations(
    State(state): State<ServiceState>,
    Query(query): Query<ChangeTimeQuery>,
) -> Result<Json<Vec<ApiLocation>>, ServiceError> {
    let change_time = parse_watermark("change_time", query.change_time.as_deref())?;
    let api = state.api.clone();
    let locations = run_blocking(move || api.list_locations(change_time)).await?;
    Ok(Json(locations))
}

async fn create_location(
    State(state): State<ServiceState>,
    body: Result<Json<ApiLocation>, JsonRejection>,
) -> Result<Json<CreatedLocation>, ServiceError> {
    let Json(location) = body?;
    let api = state.api.clone();
    let created = run_blocking(move || api.create_location(&location)).await?;
    info!(id = created.id, change_time = created.change_time, "location created");
    Ok(Json(created))
}

async fn get_location(
    State(state): State<ServiceState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<ApiLocation>, ServiceError> {
    let Path(id) = id?;
    let api = state.api.clone();
    let location = run_blocking(move || api.get_location(id)).await?;
    Ok(Json(location))
}

async fn update_location(
    State(state): State<ServiceState>,
    id: Result<Path<i64>, PathRejection>,
    body: Result<Json<ApiLocation>, JsonRejection>,
) -> Result<Json<UpdatedLocation>, ServiceError> {
    let Path(id) = id?;
    let Json(location) = body?;
    let api = state.api.clone();
    let updated = run_blocking(move || api.update_location(id, &location)).await?;
    info!(id, change_time = updated.change_time, "location updated");
    Ok(Json(updated))
}

async fn delete_location(
    State(state): State<ServiceState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<StatusCode, ServiceError> {
    let Path(id) = id?;
    let api = state.api.clone();
    run_blocking(move || api.delete_location(id)).await?;
    info!(id, "location deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn list_deleted_locations(
    State(state): State<ServiceState>,
    Query(query): Query<DeletionTimeQuery>,
) -> Result<Json<Vec<i64>>, ServiceError> {
    let deletion_time = parse_watermark("deletion_time", query.deletion_time.as_deref())?;
    let api = state.api.clone();
    let ids = run_blocking(move || api.list_deleted_location_ids(deletion_time)).await?;
    Ok(Json(ids))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use http::Request;
    use tower::ServiceExt;

    const PASSWORD: &str = "test-password";

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("tracker-service-{}.sqlite3", Ulid::new()))
    }

    fn cleanup(db_path: &std::path::Path) {
        for suffix in ["", "-wal", "-shm"] {
            let _ = std::fs::remove_file(format!("{}{suffix}", db_path.display()));
        }
    }

    fn migrated_router() -> (Router, PathBuf) {
        let db_path = unique_temp_db_path();
        let api = TrackerApi::new(db_path.clone());
        if let Err(err) = api.migrate() {
            panic!("failed to migrate test database: {err}");
        }
        let state = ServiceState { api, password: Arc::from(PASSWORD) };
        (app(state), db_path)
    }

    fn request(method: &str, uri: &str, body: Option<&serde_json::Value>) -> Request<Body> {
        let builder =
            Request::builder().method(method).uri(uri).header("authorization", PASSWORD);
        let built = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string())),
            None => builder.body(Body::empty()),
        };
        built.unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    async fn send(router: &Router, request: Request<Body>) -> Response {
        match router.clone().oneshot(request).await {
            Ok(response) => response,
            Err(err) => panic!("router request failed: {err}"),
        }
    }

    async fn response_json(response: Response) -> serde_json::Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    fn park_payload() -> serde_json::Value {
        serde_json::json!({
            "name": "Park",
            "time": "2024-01-01T10:00:00Z",
            "lat": 48.2,
            "lng": 16.3,
            "description": "bench by the pond",
            "persons": [{"firstName": "Ann", "lastName": "Lee"}]
        })
    }

    #[tokio::test]
    async fn health_endpoint_reports_ok_without_auth() {
        let (router, db_path) = migrated_router();

        let response = send(
            &router,
            Request::builder()
                .uri("/api/v1/health")
                .method("GET")
                .body(Body::empty())
                .unwrap_or_else(|err| panic!("failed to build request: {err}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(value.get("status").and_then(serde_json::Value::as_str), Some("ok"));
        assert_eq!(
            value.get("service_contract_version").and_then(serde_json::Value::as_str),
            Some(SERVICE_CONTRACT_VERSION)
        );
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn health_reports_unavailable_for_unmigrated_database() {
        let db_path = unique_temp_db_path();
        let state =
            ServiceState { api: TrackerApi::new(db_path.clone()), password: Arc::from(PASSWORD) };
        let response = send(&app(state), request("GET", "/api/v1/health", None)).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn openapi_endpoint_lists_location_routes() {
        let (router, db_path) = migrated_router();
        let response = send(
            &router,
            Request::builder()
                .uri("/api/v1/openapi")
                .method("GET")
                .body(Body::empty())
                .unwrap_or_else(|err| panic!("failed to build request: {err}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = String::from_utf8_lossy(&bytes);
        assert!(body.contains("openapi: 3.1.0"));
        assert!(body.contains("/api/v1/location/{id}"));
        assert!(body.contains("/api/v1/deleted_location"));
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn protected_routes_require_exact_password() {
        let (router, db_path) = migrated_router();

        let missing = send(
            &router,
            Request::builder()
                .uri("/api/v1/location")
                .method("GET")
                .body(Body::empty())
                .unwrap_or_else(|err| panic!("failed to build request: {err}")),
        )
        .await;
        assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response_json(missing).await.get("error").and_then(serde_json::Value::as_str),
            Some("unauthorized")
        );

        for wrong in ["test-password ", "Bearer test-password", "TEST-PASSWORD"] {
            let response = send(
                &router,
                Request::builder()
                    .uri("/api/v1/deleted_location")
                    .method("GET")
                    .header("authorization", wrong)
                    .body(Body::empty())
                    .unwrap_or_else(|err| panic!("failed to build request: {err}")),
            )
            .await;
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "header {wrong:?}");
        }

        let allowed = send(&router, request("GET", "/api/v1/location", None)).await;
        assert_eq!(allowed.status(), StatusCode::OK);
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn cors_preflight_is_answered_without_auth() {
        let (router, db_path) = migrated_router();

        let response = send(
            &router,
            Request::builder()
                .uri("/api/v1/location")
                .method("OPTIONS")
                .header("origin", "http://client.example")
                .header("access-control-request-method", "POST")
                .header("access-control-request-headers", "authorization,content-type")
                .body(Body::empty())
                .unwrap_or_else(|err| panic!("failed to build request: {err}")),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get("access-control-allow-origin").and_then(|v| v.to_str().ok()),
            Some("*")
        );
        let methods = response
            .headers()
            .get("access-control-allow-methods")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        for method in ["GET", "POST", "PUT", "DELETE"] {
            assert!(methods.contains(method), "missing {method} in {methods}");
        }

        let mut simple = request("GET", "/api/v1/location", None);
        simple.headers_mut().insert(
            "origin",
            http::HeaderValue::from_static("http://client.example"),
        );
        let response = send(&router, simple).await;
        assert_eq!(
            response.headers().get("access-control-allow-origin").and_then(|v| v.to_str().ok()),
            Some("*")
        );
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn malformed_requests_map_to_bad_request() {
        let (router, db_path) = migrated_router();

        let bad_id = send(&router, request("GET", "/api/v1/location/abc", None)).await;
        assert_eq!(bad_id.status(), StatusCode::BAD_REQUEST);
        assert!(response_json(bad_id).await.get("error").is_some());

        let bad_query =
            send(&router, request("GET", "/api/v1/location?change_time=yesterday", None)).await;
        assert_eq!(bad_query.status(), StatusCode::BAD_REQUEST);

        let bad_deletion_query =
            send(&router, request("GET", "/api/v1/deleted_location?deletion_time=1.5", None))
                .await;
        assert_eq!(bad_deletion_query.status(), StatusCode::BAD_REQUEST);

        let bad_json = send(
            &router,
            Request::builder()
                .uri("/api/v1/location")
                .method("POST")
                .header("authorization", PASSWORD)
                .header("content-type", "application/json")
                .body(Body::from("{not json"))
                .unwrap_or_else(|err| panic!("failed to build request: {err}")),
        )
        .await;
        assert_eq!(bad_json.status(), StatusCode::BAD_REQUEST);

        let mut out_of_range = park_payload();
        out_of_range["lat"] = serde_json::json!(95.0);
        let invalid = send(&router, request("POST", "/api/v1/location", Some(&out_of_range))).await;
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
        let message = response_json(invalid).await;
        assert!(message
            .get("error")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|text| text.contains("lat")));

        let empty_query = send(&router, request("GET", "/api/v1/location?change_time=", None)).await;
        assert_eq!(empty_query.status(), StatusCode::OK);
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn unknown_location_ids_map_to_not_found() {
        let (router, db_path) = migrated_router();

        let get = send(&router, request("GET", "/api/v1/location/99", None)).await;
        assert_eq!(get.status(), StatusCode::NOT_FOUND);

        let put = send(&router, request("PUT", "/api/v1/location/99", Some(&park_payload()))).await;
        assert_eq!(put.status(), StatusCode::NOT_FOUND);

        let delete = send(&router, request("DELETE", "/api/v1/location/99", None)).await;
        assert_eq!(delete.status(), StatusCode::NOT_FOUND);

        let deleted = send(&router, request("GET", "/api/v1/deleted_location", None)).await;
        assert_eq!(response_json(deleted).await, serde_json::json!([]));
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn storage_failure_maps_to_generic_internal_error() {
        let (router, db_path) = migrated_router();
        cleanup(&db_path);
        if let Err(err) = std::fs::write(&db_path, vec![0xA5_u8; 4096]) {
            panic!("failed to corrupt test database: {err}");
        }

        let response = send(&router, request("GET", "/api/v1/location", None)).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response_json(response).await,
            serde_json::json!({"error": "internal server error"})
        );

        let create =
            send(&router, request("POST", "/api/v1/location", Some(&park_payload()))).await;
        assert_eq!(create.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = response_json(create).await;
        assert_eq!(body, serde_json::json!({"error": "internal server error"}));
        cleanup(&db_path);
    }

    #[tokio::test]
    async fn location_sync_flow_round_trip() {
        let (router, db_path) = migrated_router();

        let created = send(&router, request("POST", "/api/v1/location", Some(&park_payload()))).await;
        assert_eq!(created.status(), StatusCode::OK);
        let created = response_json(created).await;
        assert_eq!(created.get("id").and_then(serde_json::Value::as_i64), Some(1));
        let change_time = created
            .get("changeTime")
            .and_then(serde_json::Value::as_i64)
            .unwrap_or_else(|| panic!("missing changeTime in response: {created}"));

        let fetched = send(&router, request("GET", "/api/v1/location/1", None)).await;
        assert_eq!(fetched.status(), StatusCode::OK);
        let fetched = response_json(fetched).await;
        assert_eq!(fetched["name"], "Park");
        assert_eq!(fetched["time"], "2024-01-01T10:00:00Z");
        assert_eq!(fetched["changeTime"], change_time);
        assert_eq!(fetched["persons"], serde_json::json!([{"firstName": "Ann", "lastName": "Lee"}]));

        let since = send(
            &router,
            request("GET", &format!("/api/v1/location?change_time={change_time}"), None),
        )
        .await;
        assert_eq!(response_json(since).await.as_array().map(Vec::len), Some(1));
        let later = send(
            &router,
            request("GET", &format!("/api/v1/location?change_time={}", change_time + 1), None),
        )
        .await;
        assert_eq!(response_json(later).await, serde_json::json!([]));

        let mut changed = park_payload();
        changed["name"] = serde_json::json!("City Park");
        changed["persons"] = serde_json::Value::Null;
        let updated = send(&router, request("PUT", "/api/v1/location/1", Some(&changed))).await;
        assert_eq!(updated.status(), StatusCode::OK);
        let updated = response_json(updated).await;
        assert!(updated
            .get("changeTime")
            .and_then(serde_json::Value::as_i64)
            .is_some_and(|value| value >= change_time));

        let refetched = response_json(send(&router, request("GET", "/api/v1/location/1", None)).await).await;
        assert_eq!(refetched["name"], "City Park");
        assert_eq!(refetched["persons"], serde_json::json!([]));

        let deleted = send(&router, request("DELETE", "/api/v1/location/1", None)).await;
        assert_eq!(deleted.status(), StatusCode::NO_CONTENT);

        let gone = send(&router, request("GET", "/api/v1/location/1", None)).await;
        assert_eq!(gone.status(), StatusCode::NOT_FOUND);

        let tombstones = send(
            &router,
            request("GET", &format!("/api/v1/deleted_location?deletion_time={change_time}"), None),
        )
        .await;
        assert_eq!(tombstones.status(), StatusCode::OK);
        assert_eq!(response_json(tombstones).await, serde_json::json!([1]));

        let listing = send(&router, request("GET", "/api/v1/location", None)).await;
        assert_eq!(response_json(listing).await, serde_json::json!([]));
        cleanup(&db_path);
    }

    #[test]
    fn watermark_parsing_accepts_empty_and_integers() {
        assert!(matches!(parse_watermark("change_time", None), Ok(None)));
        assert!(matches!(parse_watermark("change_time", Some("")), Ok(None)));
        assert!(matches!(parse_watermark("change_time", Some(" 42 ")), Ok(Some(42))));
        assert!(matches!(parse_watermark("change_time", Some("-3")), Ok(Some(-3))));
        assert!(
            matches!(parse_watermark("change_time", Some("x")), Err(err) if err.status == StatusCode::BAD_REQUEST)
        );
    }

    #[test]
    fn cli_overrides_are_optional() {
        let args = Args::parse_from(["tracker-service"]);
        assert_eq!(args.config, PathBuf::from("./config/config.yaml"));
        assert!(args.db.is_none());
        assert!(args.bind.is_none());

        let args =
            Args::parse_from(["tracker-service", "--db", "/tmp/x.db", "--bind", "127.0.0.1:0"]);
        assert_eq!(args.db, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(args.bind.as_deref(), Some("127.0.0.1:0"));
    }
}
