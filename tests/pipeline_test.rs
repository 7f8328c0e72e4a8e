//! End-to-end pipeline over the in-memory store: simulator -> ingestion ->
//! coordinator tick -> SLO/forecast/gate/alert consumers.

use chrono::{Duration, Utc};
use std::sync::Arc;

use reliability_gate::config::Config;
use reliability_gate::forecast::ForecastEngine;
use reliability_gate::metrics::MetricsService;
use reliability_gate::models::{HealthBand, MetricSnapshot, ReleaseCheckRequest, RiskLevel};
use reliability_gate::narrative::NarrativeEngine;
use reliability_gate::release_gate::ReleaseGate;
use reliability_gate::scheduler::Coordinator;
use reliability_gate::simulator::{MetricsSimulator, SERVICE_PROFILES};
use reliability_gate::slo::SloEngine;
use reliability_gate::store::{AlertQuery, MemoryStore, Store};

fn release_request(service: &str, deployment: &str) -> ReleaseCheckRequest {
    ReleaseCheckRequest {
        service_name: service.to_string(),
        deployment_id: deployment.to_string(),
        version: Some("2.0.0".to_string()),
        requested_by: Some("ci".to_string()),
        override_requested: false,
        override_reason: None,
    }
}

#[tokio::test]
async fn simulated_traffic_flows_through_the_full_pipeline() {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let config = Arc::new(Config::default());

    // Two hours of simulated traffic for the whole roster.
    let mut simulator = MetricsSimulator::with_seed(0.2, 1234);
    let snapshots = simulator.generate_historical_data(2, 60);
    let metrics = MetricsService::new(store_dyn.clone(), config.clone());
    let report = metrics.ingest(snapshots).await.unwrap();
    assert_eq!(report.rejected, 0);
    assert!(report.processed > 0);

    // Every roster service was auto-registered with default targets.
    let services = store.active_services().await.unwrap();
    assert_eq!(services.len(), SERVICE_PROFILES.len());
    for service in &services {
        let targets = store.active_slo_targets(service.id).await.unwrap();
        assert_eq!(targets.len(), 2);
    }

    // One coordinator tick: burn history for every service and window.
    let coordinator = Coordinator::new(store_dyn.clone(), config.clone());
    coordinator.run_cycle().await;

    let since = Utc::now() - Duration::hours(1);
    for service in &services {
        for window in [5, 60, 1440] {
            let history = store
                .burn_history(service.id, window, since)
                .await
                .unwrap();
            assert_eq!(
                history.len(),
                1,
                "missing burn history for {} window {}",
                service.name,
                window
            );
            assert!(
                (history[0].error_budget_consumed + history[0].error_budget_remaining - 100.0)
                    .abs()
                    < 0.02
            );
        }
    }

    // SLO and forecast sweeps cover every service.
    let slo = SloEngine::new(store_dyn.clone(), config.clone());
    let compliance = slo.global_compliance().await.unwrap();
    assert_eq!(compliance.total_services, services.len());

    let forecast_engine = ForecastEngine::new(store_dyn.clone(), config.clone());
    let forecasts = forecast_engine.all_forecasts().await.unwrap();
    assert_eq!(forecasts.len(), services.len());

    // The narrative layer summarizes the same fleet.
    let narrative = NarrativeEngine::new(store_dyn.clone(), config.clone());
    let summary = narrative.generate_summary().await.unwrap();
    assert!(!summary.insights.is_empty());
    assert!(!summary.action_items.is_empty());

    let overview = narrative.dashboard_overview().await.unwrap();
    assert_eq!(overview.total_services, services.len());
    assert_eq!(
        overview.risk_distribution.values().sum::<usize>(),
        services.len()
    );

    let heatmap = narrative.risk_heatmap(24, 1).await.unwrap();
    assert_eq!(heatmap.services.len(), services.len());
    assert!(heatmap
        .risk_matrix
        .iter()
        .all(|row| row.len() == heatmap.timestamps.len()));

    // A release check yields exactly one auditable decision row.
    let gate = ReleaseGate::new(store_dyn.clone(), config.clone());
    let response = gate
        .check_release(release_request("api-gateway", "pipeline-1"))
        .await
        .unwrap();
    let deployments = store.deployment_history(None, 10).await.unwrap();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].allowed, response.allowed);
    assert_eq!(
        deployments[0].status,
        if response.allowed { "approved" } else { "rejected" }
    );
}

#[tokio::test]
async fn incident_traffic_raises_alerts_and_blocks_release() {
    let store = Arc::new(MemoryStore::new());
    let store_dyn: Arc<dyn Store> = store.clone();
    let config = Arc::new(Config::default());
    let metrics = MetricsService::new(store_dyn.clone(), config.clone());

    // An incident-shaped snapshot: 2.5x the allowed error rate.
    metrics
        .ingest(vec![MetricSnapshot {
            service: "payment-service".to_string(),
            timestamp: Utc::now() - Duration::minutes(5),
            total_requests: 600_000,
            error_count: 1_500,
            latency_p50: Some(80.0),
            latency_p95: Some(220.0),
            latency_p99: Some(450.0),
        }])
        .await
        .unwrap();

    let coordinator = Coordinator::new(store_dyn.clone(), config.clone());
    coordinator.run_cycle().await;

    let service = store
        .service_by_name("payment-service")
        .await
        .unwrap()
        .unwrap();
    let alerts = store
        .alerts_with_service(AlertQuery {
            service_id: Some(service.id),
            severity: None,
            acknowledged: None,
            since: Utc::now() - Duration::hours(1),
            limit: 50,
        })
        .await
        .unwrap();
    assert!(alerts.iter().any(|a| a.alert_type == "burn_rate_high"));
    assert!(alerts.iter().any(|a| a.alert_type == "budget_exhausted"));

    // A second tick inside the cooldown must not duplicate alerts.
    let alert_count = alerts.len();
    coordinator.run_cycle().await;
    let alerts_after = store
        .alerts_with_service(AlertQuery {
            service_id: Some(service.id),
            severity: None,
            acknowledged: None,
            since: Utc::now() - Duration::hours(1),
            limit: 50,
        })
        .await
        .unwrap();
    assert_eq!(alerts_after.len(), alert_count);

    // The gate blocks and records the rejection.
    let gate = ReleaseGate::new(store_dyn.clone(), config.clone());
    let response = gate
        .check_release(release_request("payment-service", "pipeline-2"))
        .await
        .unwrap();
    assert!(!response.allowed);
    assert_eq!(response.current_risk_level, RiskLevel::Freeze);

    let deployments = store.deployment_history(Some(service.id), 10).await.unwrap();
    assert_eq!(deployments.len(), 1);
    assert_eq!(deployments[0].status, "rejected");
    assert!(deployments[0].blocked_reason.is_some());

    // The narrative summary reflects the exhausted budget.
    let narrative = NarrativeEngine::new(store_dyn.clone(), config.clone());
    let summary = narrative.generate_summary().await.unwrap();
    assert_eq!(summary.overall_health, HealthBand::Critical);
    assert_eq!(
        summary.services_at_risk,
        vec!["payment-service".to_string()]
    );
    assert!(summary.executive_summary.contains("degraded"));
    assert!(summary
        .action_items
        .iter()
        .any(|a| a.contains("payment-service")));

    let report = narrative.service_narrative(service.id).await.unwrap();
    assert!(report.contains("## payment-service Reliability Report"));
    assert!(report.contains("**Risk Level:** FREEZE"));
}
