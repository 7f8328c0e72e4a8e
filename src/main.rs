use anyhow::Context;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{delete, get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::{sync::Arc, time::Duration};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use reliability_gate::alerts::AlertManager;
use reliability_gate::burn::BurnRateEngine;
use reliability_gate::config::Config;
use reliability_gate::error::Error;
use reliability_gate::forecast::ForecastEngine;
use reliability_gate::metrics::MetricsService;
use reliability_gate::models::{
    AggregatedMetrics, Alert, AlertFeed, AlertSeverity, AlertStatistics, AlertView,
    BurnRateComputation, BurnRecord, BurnStatistics, DashboardOverview, Deployment,
    ExhaustionSummary, Forecast, GateStatistics, GlobalCompliance, IngestReport, MetricSnapshot,
    NewService, NewSloTarget, ReleaseCheckRequest, ReleaseCheckResponse, ReliabilitySummary,
    RiskHeatmap, RiskLevel, Service, ServiceSloStatus, SloComputation, SloTarget,
};
use reliability_gate::narrative::NarrativeEngine;
use reliability_gate::release_gate::ReleaseGate;
use reliability_gate::scheduler::Coordinator;
use reliability_gate::simulator::MetricsSimulator;
use reliability_gate::slo::SloEngine;
use reliability_gate::store::{PostgresStore, Store};

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    metrics: MetricsService,
    burn: BurnRateEngine,
    slo: SloEngine,
    forecast: ForecastEngine,
    gate: ReleaseGate,
    alerts: AlertManager,
    narrative: NarrativeEngine,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: String,
    timestamp: chrono::DateTime<chrono::Utc>,
    version: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

fn error_response(e: Error) -> ApiError {
    (
        e.status_code(),
        Json(ErrorResponse {
            error: e.to_string(),
            code: e.code().to_string(),
        }),
    )
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Arc::new(Config::from_env()?);
    config.validate()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        "starting reliability gate"
    );

    let connect_options: PgConnectOptions = config
        .database_url
        .parse()
        .context("invalid DATABASE_URL")?;
    let connect_options = connect_options.options([(
        "statement_timeout",
        config.database.statement_timeout_ms.to_string(),
    )]);

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .acquire_timeout(Duration::from_secs(config.database.acquire_timeout_secs))
        .connect_with(connect_options)
        .await
        .context("failed to connect to database")?;

    let postgres = PostgresStore::new(pool);
    postgres.run_migrations().await?;
    let store: Arc<dyn Store> = Arc::new(postgres);

    let state = AppState {
        store: store.clone(),
        metrics: MetricsService::new(store.clone(), config.clone()),
        burn: BurnRateEngine::new(store.clone(), config.clone()),
        slo: SloEngine::new(store.clone(), config.clone()),
        forecast: ForecastEngine::new(store.clone(), config.clone()),
        gate: ReleaseGate::new(store.clone(), config.clone()),
        alerts: AlertManager::new(store.clone(), config.clone()),
        narrative: NarrativeEngine::new(store.clone(), config.clone()),
    };

    let coordinator = if config.scheduler.enabled {
        Some(Coordinator::new(store.clone(), config.clone()).start())
    } else {
        info!("scheduler disabled by configuration");
        None
    };

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/services", get(list_services).post(register_service))
        .route("/services/:id", delete(deactivate_service))
        .route("/metrics/ingest", post(ingest_metrics))
        .route("/metrics/simulate", post(simulate_metrics))
        .route("/metrics/:service_id", get(get_aggregated_metrics))
        .route("/burn/:service_id", get(get_burn_rate))
        .route("/burn/:service_id/windows", get(get_burn_windows))
        .route("/burn/:service_id/weighted", get(get_weighted_burn))
        .route("/burn/:service_id/history", get(get_burn_history))
        .route("/burn/:service_id/statistics", get(get_burn_statistics))
        .route("/slo/compliance", get(get_global_compliance))
        .route("/slo/status", get(get_all_slo_status))
        .route("/slo/:service_id", get(get_slo))
        .route("/slo/:service_id/targets", post(create_slo_target))
        .route("/forecast", get(get_all_forecasts))
        .route("/forecast/nearest", get(get_nearest_exhaustion))
        .route("/forecast/:service_id", get(get_forecast))
        .route("/summary", get(get_reliability_summary))
        .route("/summary/executive", get(get_executive_overview))
        .route("/summary/heatmap", get(get_risk_heatmap))
        .route("/summary/narrative/:service_name", get(get_service_narrative))
        .route("/release/check", post(check_release))
        .route("/release/history", get(get_release_history))
        .route("/release/statistics", get(get_release_statistics))
        .route("/alerts", get(get_alerts))
        .route("/alerts/feed", get(get_alert_feed))
        .route("/alerts/statistics", get(get_alert_statistics))
        .route("/alerts/acknowledge", post(bulk_acknowledge_alerts))
        .route("/alerts/:id/acknowledge", post(acknowledge_alert))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&config.server.bind_address).await?;
    info!("listening on {}", config.server.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = coordinator {
        handle.stop().await;
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
    }
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// Services

async fn list_services(State(state): State<AppState>) -> ApiResult<Vec<Service>> {
    state
        .store
        .active_services()
        .await
        .map(Json)
        .map_err(error_response)
}

async fn register_service(
    State(state): State<AppState>,
    Json(request): Json<NewService>,
) -> ApiResult<Service> {
    state
        .metrics
        .register_service(request)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn deactivate_service(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
) -> ApiResult<Service> {
    match state.store.set_service_active(service_id, false).await {
        Ok(Some(service)) => Ok(Json(service)),
        Ok(None) => Err(error_response(Error::ServiceNotFound(
            service_id.to_string(),
        ))),
        Err(e) => Err(error_response(e)),
    }
}

// Metrics

async fn ingest_metrics(
    State(state): State<AppState>,
    Json(snapshots): Json<Vec<MetricSnapshot>>,
) -> ApiResult<IngestReport> {
    state
        .metrics
        .ingest(snapshots)
        .await
        .map(Json)
        .map_err(error_response)
}

fn default_sim_hours() -> i64 {
    24
}

fn default_sim_interval() -> i64 {
    60
}

fn default_chaos() -> f64 {
    0.1
}

#[derive(Debug, Deserialize)]
struct SimulateRequest {
    #[serde(default = "default_sim_hours")]
    hours: i64,
    #[serde(default = "default_sim_interval")]
    interval_seconds: i64,
    #[serde(default = "default_chaos")]
    chaos_level: f64,
    seed: Option<u64>,
}

async fn simulate_metrics(
    State(state): State<AppState>,
    Json(request): Json<SimulateRequest>,
) -> ApiResult<IngestReport> {
    let mut simulator = match request.seed {
        Some(seed) => MetricsSimulator::with_seed(request.chaos_level, seed),
        None => MetricsSimulator::new(request.chaos_level),
    };
    let snapshots = simulator.generate_historical_data(request.hours, request.interval_seconds);
    state
        .metrics
        .ingest(snapshots)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct WindowQuery {
    #[serde(default = "default_window_minutes")]
    window_minutes: i64,
}

fn default_window_minutes() -> i64 {
    60
}

async fn get_aggregated_metrics(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<AggregatedMetrics> {
    state
        .metrics
        .aggregated_metrics(service_id, query.window_minutes)
        .await
        .map(Json)
        .map_err(error_response)
}

// Burn rate

async fn get_burn_rate(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Query(query): Query<WindowQuery>,
) -> ApiResult<BurnRateComputation> {
    state
        .burn
        .compute_burn_rate(service_id, query.window_minutes)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_burn_windows(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
) -> ApiResult<Vec<BurnRateComputation>> {
    state
        .burn
        .compute_all_windows(service_id)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Serialize)]
struct WeightedBurnResponse {
    service_id: i64,
    weighted_burn_rate: f64,
    composite_risk_level: RiskLevel,
}

async fn get_weighted_burn(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
) -> ApiResult<WeightedBurnResponse> {
    state
        .burn
        .weighted_burn_rate(service_id)
        .await
        .map(|(weighted_burn_rate, composite_risk_level)| {
            Json(WeightedBurnResponse {
                service_id,
                weighted_burn_rate,
                composite_risk_level,
            })
        })
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_hours")]
    hours: i64,
    #[serde(default = "default_window_minutes")]
    window_minutes: i64,
}

fn default_history_hours() -> i64 {
    24
}

async fn get_burn_history(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Query(query): Query<HistoryQuery>,
) -> ApiResult<Vec<BurnRecord>> {
    state
        .burn
        .burn_history(service_id, query.hours, query.window_minutes as i32)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct HoursQuery {
    #[serde(default = "default_history_hours")]
    hours: i64,
}

async fn get_burn_statistics(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Query(query): Query<HoursQuery>,
) -> ApiResult<BurnStatistics> {
    state
        .burn
        .burn_statistics(service_id, query.hours)
        .await
        .map(Json)
        .map_err(error_response)
}

// SLO

async fn get_slo(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
) -> ApiResult<Vec<SloComputation>> {
    state
        .slo
        .compute_slo(service_id, None)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_all_slo_status(State(state): State<AppState>) -> ApiResult<Vec<ServiceSloStatus>> {
    state
        .slo
        .all_services_status()
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_global_compliance(State(state): State<AppState>) -> ApiResult<GlobalCompliance> {
    state
        .slo
        .global_compliance()
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct SloTargetRequest {
    name: String,
    target_value: f64,
    #[serde(default = "default_slo_window_days")]
    window_days: i32,
    #[serde(default = "default_burn_threshold")]
    burn_rate_threshold: f64,
    #[serde(default = "default_critical_burn")]
    critical_burn_rate: f64,
}

fn default_slo_window_days() -> i32 {
    30
}

fn default_burn_threshold() -> f64 {
    1.0
}

fn default_critical_burn() -> f64 {
    2.0
}

async fn create_slo_target(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
    Json(request): Json<SloTargetRequest>,
) -> ApiResult<SloTarget> {
    state
        .slo
        .create_target(NewSloTarget {
            service_id,
            name: request.name,
            target_value: request.target_value,
            window_days: request.window_days,
            burn_rate_threshold: request.burn_rate_threshold,
            critical_burn_rate: request.critical_burn_rate,
        })
        .await
        .map(Json)
        .map_err(error_response)
}

// Forecast

async fn get_forecast(
    State(state): State<AppState>,
    Path(service_id): Path<i64>,
) -> ApiResult<Forecast> {
    state
        .forecast
        .forecast_exhaustion(service_id)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_all_forecasts(State(state): State<AppState>) -> ApiResult<Vec<Forecast>> {
    state
        .forecast
        .all_forecasts()
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_nearest_exhaustion(
    State(state): State<AppState>,
) -> ApiResult<Option<ExhaustionSummary>> {
    state
        .forecast
        .nearest_exhaustion()
        .await
        .map(Json)
        .map_err(error_response)
}

// Summary & dashboard

async fn get_reliability_summary(
    State(state): State<AppState>,
) -> ApiResult<ReliabilitySummary> {
    state
        .narrative
        .generate_summary()
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_executive_overview(State(state): State<AppState>) -> ApiResult<DashboardOverview> {
    state
        .narrative
        .dashboard_overview()
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct HeatmapQuery {
    #[serde(default = "default_history_hours")]
    hours: i64,
    #[serde(default = "default_heatmap_interval")]
    interval_hours: i64,
}

fn default_heatmap_interval() -> i64 {
    1
}

async fn get_risk_heatmap(
    State(state): State<AppState>,
    Query(query): Query<HeatmapQuery>,
) -> ApiResult<RiskHeatmap> {
    state
        .narrative
        .risk_heatmap(query.hours, query.interval_hours)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Serialize)]
struct ServiceNarrativeResponse {
    service_name: String,
    narrative: String,
}

async fn get_service_narrative(
    State(state): State<AppState>,
    Path(service_name): Path<String>,
) -> ApiResult<ServiceNarrativeResponse> {
    let service = match state.store.service_by_name(&service_name).await {
        Ok(Some(service)) => service,
        Ok(None) => {
            return Err(error_response(Error::ServiceNotFound(service_name)));
        }
        Err(e) => return Err(error_response(e)),
    };

    state
        .narrative
        .service_narrative(service.id)
        .await
        .map(|narrative| {
            Json(ServiceNarrativeResponse {
                service_name: service.name,
                narrative,
            })
        })
        .map_err(error_response)
}

// Release gate

async fn check_release(
    State(state): State<AppState>,
    Json(request): Json<ReleaseCheckRequest>,
) -> ApiResult<ReleaseCheckResponse> {
    state
        .gate
        .check_release(request)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct ReleaseHistoryQuery {
    service_id: Option<i64>,
    #[serde(default = "default_release_limit")]
    limit: i64,
}

fn default_release_limit() -> i64 {
    50
}

async fn get_release_history(
    State(state): State<AppState>,
    Query(query): Query<ReleaseHistoryQuery>,
) -> ApiResult<Vec<Deployment>> {
    state
        .gate
        .deployment_history(query.service_id, query.limit)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct DaysQuery {
    #[serde(default = "default_stat_days")]
    days: i64,
}

fn default_stat_days() -> i64 {
    7
}

async fn get_release_statistics(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<GateStatistics> {
    state
        .gate
        .gate_statistics(query.days)
        .await
        .map(Json)
        .map_err(error_response)
}

// Alerts

#[derive(Debug, Deserialize)]
struct AlertsQuery {
    service_id: Option<i64>,
    severity: Option<AlertSeverity>,
    acknowledged: Option<bool>,
    #[serde(default = "default_history_hours")]
    hours: i64,
    #[serde(default = "default_alert_limit")]
    limit: i64,
}

fn default_alert_limit() -> i64 {
    100
}

async fn get_alerts(
    State(state): State<AppState>,
    Query(query): Query<AlertsQuery>,
) -> ApiResult<Vec<AlertView>> {
    state
        .alerts
        .get_alerts(
            query.service_id,
            query.severity,
            query.acknowledged,
            query.hours,
            query.limit,
        )
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct FeedQuery {
    #[serde(default = "default_history_hours")]
    hours: i64,
    #[serde(default = "default_feed_limit")]
    limit: i64,
}

fn default_feed_limit() -> i64 {
    50
}

async fn get_alert_feed(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> ApiResult<AlertFeed> {
    state
        .alerts
        .alert_feed(query.hours, query.limit)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn get_alert_statistics(
    State(state): State<AppState>,
    Query(query): Query<DaysQuery>,
) -> ApiResult<AlertStatistics> {
    state
        .alerts
        .alert_statistics(query.days)
        .await
        .map(Json)
        .map_err(error_response)
}

#[derive(Debug, Deserialize)]
struct AcknowledgeRequest {
    acknowledged_by: String,
}

async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(alert_id): Path<i64>,
    Json(request): Json<AcknowledgeRequest>,
) -> ApiResult<Alert> {
    match state
        .alerts
        .acknowledge_alert(alert_id, &request.acknowledged_by)
        .await
    {
        Ok(Some(alert)) => Ok(Json(alert)),
        Ok(None) => Err((
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("alert {alert_id} not found"),
                code: "ALERT_NOT_FOUND".to_string(),
            }),
        )),
        Err(e) => Err(error_response(e)),
    }
}

#[derive(Debug, Deserialize)]
struct BulkAcknowledgeRequest {
    alert_ids: Vec<i64>,
    acknowledged_by: String,
}

#[derive(Debug, Serialize)]
struct BulkAcknowledgeResponse {
    updated: u64,
}

async fn bulk_acknowledge_alerts(
    State(state): State<AppState>,
    Json(request): Json<BulkAcknowledgeRequest>,
) -> ApiResult<BulkAcknowledgeResponse> {
    state
        .alerts
        .bulk_acknowledge(&request.alert_ids, &request.acknowledged_by)
        .await
        .map(|updated| Json(BulkAcknowledgeResponse { updated }))
        .map_err(error_response)
}
