//! SLO Engine.
//!
//! Formulas:
//! - availability = (total_requests - error_count) / total_requests * 100
//! - error_budget_total = (1 - slo_target/100) * total_requests
//! - consumed_percentage = actual_errors / error_budget_total * 100
//! - remaining_percentage = 100 - consumed_percentage

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    round_dp, GlobalCompliance, NewSloTarget, Service, ServiceSloStatus, SloComputation, SloTarget,
};
use crate::store::Store;

/// Default SLO targets seeded for every newly registered service.
pub fn default_slo_targets(service_id: i64, config: &Config) -> Vec<NewSloTarget> {
    vec![
        NewSloTarget {
            service_id,
            name: "availability".to_string(),
            target_value: config.slo.default_availability_target,
            window_days: config.slo.default_window_days,
            burn_rate_threshold: 1.0,
            critical_burn_rate: 2.0,
        },
        NewSloTarget {
            service_id,
            name: "latency_p99".to_string(),
            target_value: config.slo.default_latency_target,
            window_days: config.slo.default_window_days,
            burn_rate_threshold: 1.0,
            critical_burn_rate: 2.0,
        },
    ]
}

#[derive(Clone)]
pub struct SloEngine {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

impl SloEngine {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Create an SLO target after validating it. Malformed targets are
    /// rejected here so compute paths never have to re-check.
    pub async fn create_target(&self, new: NewSloTarget) -> Result<SloTarget> {
        new.validate().map_err(Error::Validation)?;
        let service = self
            .store
            .service_by_id(new.service_id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(new.service_id.to_string()))?;
        let target = self.store.create_slo_target(new).await?;
        tracing::info!(service = %service.name, target = %target.name, "created SLO target");
        Ok(target)
    }

    /// Seed the default targets for a freshly registered service.
    pub async fn create_default_targets(&self, service_id: i64) -> Result<Vec<SloTarget>> {
        let mut targets = Vec::new();
        for new in default_slo_targets(service_id, &self.config) {
            targets.push(self.store.create_slo_target(new).await?);
        }
        Ok(targets)
    }

    /// Compute SLO state for a service, optionally restricted to one target.
    pub async fn compute_slo(
        &self,
        service_id: i64,
        slo_target_id: Option<i64>,
    ) -> Result<Vec<SloComputation>> {
        let service = self
            .store
            .service_by_id(service_id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;

        let targets = self.store.active_slo_targets(service_id).await?;
        let mut computations = Vec::new();
        for target in targets
            .iter()
            .filter(|t| slo_target_id.map_or(true, |id| t.id == id))
        {
            computations.push(self.compute_single(&service, target).await?);
        }
        Ok(computations)
    }

    async fn compute_single(
        &self,
        service: &Service,
        target: &SloTarget,
    ) -> Result<SloComputation> {
        let now = Utc::now();
        let window_start = now - Duration::days(target.window_days as i64);
        let totals = self
            .store
            .aggregate_metrics(service.id, window_start, now)
            .await?;

        let current_value = if totals.total_requests > 0 {
            round_dp(
                (totals.total_requests - totals.error_count) as f64
                    / totals.total_requests as f64
                    * 100.0,
                4,
            )
        } else {
            100.0
        };

        let allowed_error_rate = 1.0 - target.target_value / 100.0;
        let total_budget = if totals.total_requests > 0 {
            totals.total_requests as f64 * allowed_error_rate
        } else {
            0.0
        };

        let (consumed_pct, remaining_pct) = if total_budget > 0.0 {
            let consumed = ((totals.error_count as f64 / total_budget) * 100.0).min(100.0);
            (consumed, (100.0 - consumed).max(0.0))
        } else {
            (0.0, 100.0)
        };

        let availability_5m = self.window_availability(service.id, 5).await?;
        let availability_1h = self.window_availability(service.id, 60).await?;
        let availability_24h = self.window_availability(service.id, 1440).await?;

        Ok(SloComputation {
            service_id: service.id,
            service_name: service.name.clone(),
            slo_name: target.name.clone(),
            target_value: target.target_value,
            current_value,
            is_meeting_slo: current_value >= target.target_value,
            total_budget: round_dp(total_budget, 2),
            consumed_budget: totals.error_count,
            consumed_percentage: round_dp(consumed_pct, 2),
            remaining_percentage: round_dp(remaining_pct, 2),
            availability_5m,
            availability_1h,
            availability_24h,
            window_start,
            window_end: now,
            computed_at: now,
        })
    }

    /// Availability over a rolling window; None when the window has no
    /// traffic (absence of data is not 0% availability).
    pub async fn window_availability(
        &self,
        service_id: i64,
        window_minutes: i64,
    ) -> Result<Option<f64>> {
        let now = Utc::now();
        let start = now - Duration::minutes(window_minutes);
        let totals = self.store.aggregate_metrics(service_id, start, now).await?;

        if totals.total_requests == 0 {
            return Ok(None);
        }
        Ok(Some(round_dp(
            (totals.total_requests - totals.error_count) as f64 / totals.total_requests as f64
                * 100.0,
            4,
        )))
    }

    /// SLO status for every active service. A failing service is logged and
    /// skipped rather than failing the sweep.
    pub async fn all_services_status(&self) -> Result<Vec<ServiceSloStatus>> {
        let services = self.store.active_services().await?;

        let mut results = Vec::new();
        for service in services {
            match self.compute_slo(service.id, None).await {
                Ok(computations) => {
                    let overall_compliance = if computations.is_empty() {
                        100.0
                    } else {
                        let sum: f64 = computations
                            .iter()
                            .map(|c| {
                                if c.target_value > 0.0 {
                                    (c.current_value / c.target_value * 100.0).min(100.0)
                                } else {
                                    100.0
                                }
                            })
                            .sum();
                        sum / computations.len() as f64
                    };
                    results.push(ServiceSloStatus {
                        service_id: service.id,
                        service_name: service.name,
                        is_healthy: overall_compliance >= 100.0,
                        overall_compliance: round_dp(overall_compliance, 2),
                        computations,
                    });
                }
                Err(e) => {
                    warn!(service = %service.name, error = %e, "failed to compute SLO status");
                }
            }
        }
        Ok(results)
    }

    /// Platform-wide compliance rollup.
    pub async fn global_compliance(&self) -> Result<GlobalCompliance> {
        let statuses = self.all_services_status().await?;

        if statuses.is_empty() {
            return Ok(GlobalCompliance {
                total_services: 0,
                services_meeting_slo: 0,
                global_compliance: 100.0,
                services_at_risk: Vec::new(),
            });
        }

        let total = statuses.len();
        let meeting = statuses.iter().filter(|s| s.is_healthy).count();
        let global = statuses.iter().map(|s| s.overall_compliance).sum::<f64>() / total as f64;
        let at_risk = statuses
            .iter()
            .filter(|s| !s.is_healthy)
            .map(|s| s.service_name.clone())
            .collect();

        Ok(GlobalCompliance {
            total_services: total,
            services_meeting_slo: meeting,
            global_compliance: round_dp(global, 2),
            services_at_risk: at_risk,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMetric, NewService};
    use crate::store::MemoryStore;

    async fn setup() -> (SloEngine, Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(Config::default());
        let engine = SloEngine::new(store.clone(), config);
        let service = store
            .create_service(NewService {
                name: "payment-service".to_string(),
                description: None,
                team: None,
                tier: 1,
            })
            .await
            .unwrap();
        engine.create_default_targets(service.id).await.unwrap();
        (engine, store, service.id)
    }

    async fn seed_metrics(store: &MemoryStore, service_id: i64, total: i64, errors: i64) {
        store
            .insert_metrics(vec![NewMetric {
                service_id,
                timestamp: Utc::now() - Duration::minutes(2),
                total_requests: total,
                error_count: errors,
                latency_p50: None,
                latency_p95: None,
                latency_p99: None,
                success_rate: None,
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn default_targets_seeded() {
        let (_engine, store, service_id) = setup().await;
        let targets = store.active_slo_targets(service_id).await.unwrap();
        assert_eq!(targets.len(), 2);
        let availability = targets.iter().find(|t| t.name == "availability").unwrap();
        assert_eq!(availability.target_value, 99.9);
        assert_eq!(availability.window_days, 30);
        let latency = targets.iter().find(|t| t.name == "latency_p99").unwrap();
        assert_eq!(latency.target_value, 99.0);
    }

    #[tokio::test]
    async fn boundary_compliance_meets_slo() {
        let (engine, store, service_id) = setup().await;
        seed_metrics(&store, service_id, 1_000_000, 1_000).await;

        let computations = engine.compute_slo(service_id, None).await.unwrap();
        let availability = computations
            .iter()
            .find(|c| c.slo_name == "availability")
            .unwrap();
        assert_eq!(availability.current_value, 99.9);
        assert!(availability.is_meeting_slo);
        assert_eq!(availability.consumed_percentage, 100.0);
        assert_eq!(availability.remaining_percentage, 0.0);
    }

    #[tokio::test]
    async fn no_traffic_yields_full_availability() {
        let (engine, _store, service_id) = setup().await;

        let computations = engine.compute_slo(service_id, None).await.unwrap();
        let availability = computations
            .iter()
            .find(|c| c.slo_name == "availability")
            .unwrap();
        assert_eq!(availability.current_value, 100.0);
        assert!(availability.is_meeting_slo);
        assert_eq!(availability.consumed_percentage, 0.0);
        assert_eq!(availability.remaining_percentage, 100.0);
        assert!(availability.availability_1h.is_none());
    }

    #[tokio::test]
    async fn window_availability_none_iff_no_traffic() {
        let (engine, store, service_id) = setup().await;
        assert!(engine
            .window_availability(service_id, 60)
            .await
            .unwrap()
            .is_none());

        seed_metrics(&store, service_id, 1_000, 10).await;
        let availability = engine
            .window_availability(service_id, 60)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(availability, 99.0);
    }

    #[tokio::test]
    async fn global_compliance_flags_services_at_risk() {
        let (engine, store, healthy_id) = setup().await;
        seed_metrics(&store, healthy_id, 1_000_000, 100).await;

        let risky = store
            .create_service(NewService {
                name: "search-service".to_string(),
                description: None,
                team: None,
                tier: 2,
            })
            .await
            .unwrap();
        engine.create_default_targets(risky.id).await.unwrap();
        seed_metrics(&store, risky.id, 100_000, 5_000).await;

        let global = engine.global_compliance().await.unwrap();
        assert_eq!(global.total_services, 2);
        assert_eq!(global.services_meeting_slo, 1);
        assert_eq!(global.services_at_risk, vec!["search-service".to_string()]);
        assert!(global.global_compliance < 100.0);
    }

    #[tokio::test]
    async fn malformed_target_rejected_on_create() {
        let (engine, _store, service_id) = setup().await;
        let err = engine
            .create_target(NewSloTarget {
                service_id,
                name: "availability".to_string(),
                target_value: 120.0,
                window_days: 30,
                burn_rate_threshold: 1.0,
                critical_burn_rate: 2.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = engine
            .create_target(NewSloTarget {
                service_id,
                name: "availability".to_string(),
                target_value: 99.0,
                window_days: -1,
                burn_rate_threshold: 1.0,
                critical_burn_rate: 2.0,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
