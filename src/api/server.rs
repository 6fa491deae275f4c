use axum::{
    extract::{FromRef, Path, Query, State},
    http::{header, HeaderValue, Method},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{debug, info, warn};

use crate::{
    api::auth::{self, AuthenticatedUser, CredentialVerifier, StaticCredentials, TokenAuthority},
    config::GatewayConfig,
    gateway::MetricsGateway,
    metrics::{self, RequestTimer},
    models::{ContainerList, LoadAverage, ProcessCounts, RangeParams, Temperature, TimeRange, Uptime},
    query::{MetricName, PrometheusClient, QueryResponse},
    GatewayError, Result,
};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub gateway: Arc<MetricsGateway>,
    pub tokens: Arc<TokenAuthority>,
    pub credentials: Arc<dyn CredentialVerifier>,
}

#[derive(Debug, Deserialize)]
pub struct RawQueryParams {
    pub query: Option<String>,
    pub start: Option<i64>,
    pub end: Option<i64>,
    pub step: Option<String>,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    backend_reachable: bool,
}

fn resolve_range(params: &RangeParams) -> Result<TimeRange> {
    TimeRange::resolve(params, chrono::Utc::now().timestamp())
}

pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let api = Router::new()
        .route("/login", post(auth::login))
        .route("/metrics/uptime", get(uptime))
        .route("/metrics/load", get(load))
        .route("/metrics/processes", get(processes))
        .route("/metrics/temperature", get(temperature))
        .route("/metrics/containers", get(containers))
        .route("/metrics/query_range_raw", get(query_range_raw))
        .route("/metrics/:name", get(metric_series));

    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        .nest("/api", api)
        .with_state(state)
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {:?}", origin);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_credentials(true)
}

async fn root() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn health(State(gateway): State<Arc<MetricsGateway>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        backend_reachable: gateway.backend_reachable().await,
    })
}

async fn prometheus_metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::render(),
    )
}

async fn metric_series(
    AuthenticatedUser(token): AuthenticatedUser,
    State(gateway): State<Arc<MetricsGateway>>,
    Path(name): Path<String>,
    Query(params): Query<RangeParams>,
) -> Result<Response> {
    let name: MetricName = name.parse()?;
    let _timer = RequestTimer::new(name.as_str());
    debug!("{} requested {}", token.subject, name);

    let response = match name {
        MetricName::Uptime => Json(gateway.uptime().await).into_response(),
        MetricName::Load => Json(gateway.load().await).into_response(),
        MetricName::Processes => Json(gateway.processes().await).into_response(),
        MetricName::Temperature => Json(gateway.temperature().await).into_response(),
        MetricName::ContainerList => Json(gateway.containers().await).into_response(),
        MetricName::ContainerCpu | MetricName::ContainerMemory => {
            let range = resolve_range(&params)?;
            Json(gateway.labeled_series(name, &range).await?).into_response()
        }
        _ => {
            let range = resolve_range(&params)?;
            Json(gateway.series(name, &range).await?).into_response()
        }
    };

    Ok(response)
}

async fn uptime(
    _user: AuthenticatedUser,
    State(gateway): State<Arc<MetricsGateway>>,
) -> Json<Uptime> {
    let _timer = RequestTimer::new("uptime");
    Json(gateway.uptime().await)
}

async fn load(
    _user: AuthenticatedUser,
    State(gateway): State<Arc<MetricsGateway>>,
) -> Json<LoadAverage> {
    let _timer = RequestTimer::new("load");
    Json(gateway.load().await)
}

async fn processes(
    _user: AuthenticatedUser,
    State(gateway): State<Arc<MetricsGateway>>,
) -> Json<ProcessCounts> {
    let _timer = RequestTimer::new("processes");
    Json(gateway.processes().await)
}

async fn temperature(
    _user: AuthenticatedUser,
    State(gateway): State<Arc<MetricsGateway>>,
) -> Json<Temperature> {
    let _timer = RequestTimer::new("temperature");
    Json(gateway.temperature().await)
}

async fn containers(
    _user: AuthenticatedUser,
    State(gateway): State<Arc<MetricsGateway>>,
) -> Json<ContainerList> {
    let _timer = RequestTimer::new("containers");
    Json(gateway.containers().await)
}

async fn query_range_raw(
    _user: AuthenticatedUser,
    State(gateway): State<Arc<MetricsGateway>>,
    Query(params): Query<RawQueryParams>,
) -> Result<Json<QueryResponse>> {
    let _timer = RequestTimer::new("query_range_raw");
    let range = resolve_range(&RangeParams {
        start: params.start,
        end: params.end,
        step: params.step,
    })?;
    let expression = params.query.unwrap_or_default();
    Ok(Json(gateway.raw_range(&expression, &range).await?))
}

pub async fn start_server(config: GatewayConfig) -> Result<()> {
    let client = PrometheusClient::new(&config.backend)
        .map_err(|e| GatewayError::Internal(format!("Failed to build backend client: {}", e)))?;
    info!("Using time-series backend at {}", client.base_url());

    let state = AppState {
        gateway: Arc::new(MetricsGateway::new(Arc::new(client))),
        tokens: Arc::new(TokenAuthority::from_config(&config.auth)),
        credentials: Arc::new(StaticCredentials::from_config(&config.auth)),
    };

    let app = router(state, &config.cors_allow_origins);
    let addr = config.bind_addr();
    info!("Starting dashboard gateway on {}", addr);

    let listener = TcpListener::bind(&addr).await.map_err(|e|
        GatewayError::Internal(format!("Failed to bind to address: {}", e)))?;

    axum::serve(listener, app).await.map_err(|e|
        GatewayError::Internal(format!("Server error: {}", e)))?;

    Ok(())
}
