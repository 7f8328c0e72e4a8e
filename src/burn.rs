//! Burn-Rate Engine.
//!
//! Core formula: `burn_rate = current_error_rate / allowed_error_rate`, where
//! `allowed_error_rate = 1 - slo_target/100`. A burn rate of 1.0 means the
//! service is on pace to consume exactly its error budget by window end;
//! 2.0 means twice as fast.

use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::config::{Config, RiskThresholds};
use crate::error::{Error, Result};
use crate::models::{
    round_dp, BurnRateComputation, BurnRecord, BurnStatistics, NewBurnRecord, RiskLevel,
};
use crate::store::Store;

#[derive(Debug, Clone, Copy)]
pub struct WindowSpec {
    pub minutes: i64,
    pub label: &'static str,
    pub weight: f64,
}

/// Canonical rolling windows. Weights favour the one-hour window for
/// stability while still reacting to the five-minute window.
pub const WINDOWS: [WindowSpec; 3] = [
    WindowSpec {
        minutes: 5,
        label: "5m",
        weight: 0.3,
    },
    WindowSpec {
        minutes: 60,
        label: "1h",
        weight: 0.4,
    },
    WindowSpec {
        minutes: 1440,
        label: "24h",
        weight: 0.3,
    },
];

/// Classify risk from burn rate and budget consumption.
///
/// Each dimension maps to a level with inclusive lower cutoffs; the final
/// level is the more severe of the two, so worsening either dimension can
/// never lower the classification.
pub fn classify_risk(burn_rate: f64, budget_consumed: f64, thresholds: &RiskThresholds) -> RiskLevel {
    let by_burn = if burn_rate >= thresholds.burn_rate_freeze {
        RiskLevel::Freeze
    } else if burn_rate >= thresholds.burn_rate_danger {
        RiskLevel::Danger
    } else if burn_rate >= thresholds.burn_rate_observe {
        RiskLevel::Observe
    } else {
        RiskLevel::Safe
    };

    let by_budget = if budget_consumed >= thresholds.budget_freeze {
        RiskLevel::Freeze
    } else if budget_consumed >= thresholds.budget_danger {
        RiskLevel::Danger
    } else if budget_consumed >= thresholds.budget_observe {
        RiskLevel::Observe
    } else {
        RiskLevel::Safe
    };

    by_burn.max(by_budget)
}

#[derive(Clone)]
pub struct BurnRateEngine {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

impl BurnRateEngine {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Compute the current burn rate for a service over one rolling window.
    ///
    /// Zero metrics in the window is not an error: it yields burn rate 0,
    /// an untouched budget, and SAFE risk.
    pub async fn compute_burn_rate(
        &self,
        service_id: i64,
        window_minutes: i64,
    ) -> Result<BurnRateComputation> {
        let service = self
            .store
            .service_by_id(service_id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;

        // Availability is the primary target; fall back to 99.9% when none
        // is configured.
        let target_value = self
            .store
            .find_active_slo_target(service_id, "availability")
            .await?
            .map(|t| t.target_value)
            .unwrap_or(self.config.slo.default_availability_target);

        let allowed_error_rate = (100.0 - target_value) / 100.0;

        let now = Utc::now();
        let window_start = now - Duration::minutes(window_minutes);
        let totals = self
            .store
            .aggregate_metrics(service_id, window_start, now)
            .await?;

        let current_error_rate = if totals.total_requests > 0 {
            totals.error_count as f64 / totals.total_requests as f64
        } else {
            0.0
        };

        let burn_rate = if allowed_error_rate > 0.0 {
            current_error_rate / allowed_error_rate
        } else {
            0.0
        };

        let total_budget = totals.total_requests as f64 * allowed_error_rate;
        let (consumed_pct, remaining_pct) = if total_budget > 0.0 {
            let consumed = ((totals.error_count as f64 / total_budget) * 100.0).min(100.0);
            (consumed, (100.0 - consumed).max(0.0))
        } else {
            (0.0, 100.0)
        };

        let risk_level = classify_risk(burn_rate, consumed_pct, &self.config.risk);

        Ok(BurnRateComputation {
            service_id,
            service_name: service.name,
            timestamp: now,
            window_minutes,
            current_error_rate: round_dp(current_error_rate, 6),
            allowed_error_rate: round_dp(allowed_error_rate, 6),
            burn_rate: round_dp(burn_rate, 3),
            error_budget_consumed: round_dp(consumed_pct, 2),
            error_budget_remaining: round_dp(remaining_pct, 2),
            risk_level,
            risk_color: risk_level.color().to_string(),
            risk_action: risk_level.action().to_string(),
        })
    }

    /// Compute burn rates for all canonical windows, in window order.
    pub async fn compute_all_windows(&self, service_id: i64) -> Result<Vec<BurnRateComputation>> {
        let mut results = Vec::with_capacity(WINDOWS.len());
        for window in WINDOWS {
            results.push(self.compute_burn_rate(service_id, window.minutes).await?);
        }
        Ok(results)
    }

    /// Weight-normalized mean burn rate plus the most severe risk level
    /// across the canonical windows.
    pub async fn weighted_burn_rate(&self, service_id: i64) -> Result<(f64, RiskLevel)> {
        let computations = self.compute_all_windows(service_id).await?;

        let mut weighted_burn = 0.0;
        let mut total_weight = 0.0;
        let mut worst_risk = RiskLevel::Safe;

        for (computation, window) in computations.iter().zip(WINDOWS.iter()) {
            weighted_burn += computation.burn_rate * window.weight;
            total_weight += window.weight;
            worst_risk = worst_risk.max(computation.risk_level);
        }

        let final_burn = if total_weight > 0.0 {
            weighted_burn / total_weight
        } else {
            0.0
        };
        Ok((round_dp(final_burn, 3), worst_risk))
    }

    /// Append a computation to burn history. The exhaustion forecast is left
    /// unset here; the forecast engine owns that column.
    pub async fn store_burn_history(&self, computation: &BurnRateComputation) -> Result<BurnRecord> {
        self.store
            .append_burn_record(NewBurnRecord {
                service_id: computation.service_id,
                timestamp: computation.timestamp,
                window_minutes: computation.window_minutes as i32,
                burn_rate: computation.burn_rate,
                error_budget_consumed: computation.error_budget_consumed,
                error_budget_remaining: computation.error_budget_remaining,
                time_to_exhaustion_hours: None,
                risk_level: computation.risk_level,
            })
            .await
    }

    /// Historical burn records for one window, most recent first.
    pub async fn burn_history(
        &self,
        service_id: i64,
        hours: i64,
        window_minutes: i32,
    ) -> Result<Vec<BurnRecord>> {
        let since = Utc::now() - Duration::hours(hours);
        let mut records = self
            .store
            .burn_history(service_id, window_minutes, since)
            .await?;
        records.reverse();
        Ok(records)
    }

    /// Burn-rate statistics over a trailing period.
    pub async fn burn_statistics(&self, service_id: i64, hours: i64) -> Result<BurnStatistics> {
        let since = Utc::now() - Duration::hours(hours);
        let aggregates = self.store.burn_aggregates(service_id, since).await?;

        Ok(match aggregates {
            Some(agg) => BurnStatistics {
                average_burn_rate: round_dp(agg.average_burn_rate, 3),
                peak_burn_rate: round_dp(agg.peak_burn_rate, 3),
                min_burn_rate: round_dp(agg.min_burn_rate, 3),
                average_budget_consumed: round_dp(agg.average_budget_consumed, 2),
                hours,
            },
            None => BurnStatistics {
                average_burn_rate: 0.0,
                peak_burn_rate: 0.0,
                min_burn_rate: 0.0,
                average_budget_consumed: 0.0,
                hours,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMetric, NewService};
    use crate::store::MemoryStore;

    async fn engine_with_service() -> (BurnRateEngine, i64, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(Config::default());
        let service = store
            .create_service(NewService {
                name: "api-gateway".to_string(),
                description: None,
                team: None,
                tier: 1,
            })
            .await
            .unwrap();
        let engine = BurnRateEngine::new(store.clone(), config);
        (engine, service.id, store)
    }

    async fn seed_window_metrics(store: &MemoryStore, service_id: i64, total: i64, errors: i64) {
        store
            .insert_metrics(vec![NewMetric {
                service_id,
                timestamp: Utc::now() - Duration::minutes(10),
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
    async fn healthy_service_classifies_safe() {
        let (engine, service_id, store) = engine_with_service().await;
        seed_window_metrics(&store, service_id, 600_000, 120).await;

        let computation = engine.compute_burn_rate(service_id, 60).await.unwrap();
        assert_eq!(computation.current_error_rate, 0.0002);
        assert_eq!(computation.allowed_error_rate, 0.001);
        assert_eq!(computation.burn_rate, 0.2);
        assert_eq!(computation.error_budget_consumed, 20.0);
        assert_eq!(computation.error_budget_remaining, 80.0);
        assert_eq!(computation.risk_level, RiskLevel::Safe);
        assert_eq!(computation.risk_color, "#22c55e");
        assert_eq!(computation.risk_action, "Normal operations");
    }

    #[tokio::test]
    async fn elevated_burn_clamps_budget_and_freezes() {
        let (engine, service_id, store) = engine_with_service().await;
        seed_window_metrics(&store, service_id, 600_000, 1_200).await;

        let computation = engine.compute_burn_rate(service_id, 60).await.unwrap();
        assert_eq!(computation.burn_rate, 2.0);
        assert_eq!(computation.error_budget_consumed, 100.0);
        assert_eq!(computation.error_budget_remaining, 0.0);
        // Budget consumption >= 95% dominates the burn-rate dimension.
        assert_eq!(computation.risk_level, RiskLevel::Freeze);
    }

    #[tokio::test]
    async fn no_data_is_neutral_not_an_error() {
        let (engine, service_id, _store) = engine_with_service().await;

        let computation = engine.compute_burn_rate(service_id, 60).await.unwrap();
        assert_eq!(computation.burn_rate, 0.0);
        assert_eq!(computation.error_budget_consumed, 0.0);
        assert_eq!(computation.error_budget_remaining, 100.0);
        assert_eq!(computation.risk_level, RiskLevel::Safe);
    }

    #[tokio::test]
    async fn unknown_service_is_an_error() {
        let (engine, _, _) = engine_with_service().await;
        let err = engine.compute_burn_rate(9999, 60).await.unwrap_err();
        assert!(matches!(err, Error::ServiceNotFound(_)));
    }

    #[test]
    fn budget_sum_invariant() {
        // consumed + remaining = 100 over a sweep of error counts
        for errors in [0i64, 10, 100, 500, 599, 600, 10_000] {
            let total = 600_000f64;
            let budget = total * 0.001;
            let consumed = ((errors as f64 / budget) * 100.0).min(100.0);
            let remaining = (100.0 - consumed).max(0.0);
            assert!((consumed + remaining - 100.0).abs() < 1e-9);
            assert!((0.0..=100.0).contains(&consumed));
            assert!((0.0..=100.0).contains(&remaining));
        }
    }

    #[test]
    fn classification_boundaries_are_inclusive() {
        let thresholds = Config::default().risk;
        assert_eq!(classify_risk(1.49, 0.0, &thresholds), RiskLevel::Safe);
        assert_eq!(classify_risk(1.5, 0.0, &thresholds), RiskLevel::Observe);
        assert_eq!(classify_risk(2.0, 0.0, &thresholds), RiskLevel::Danger);
        assert_eq!(classify_risk(3.0, 0.0, &thresholds), RiskLevel::Freeze);
        assert_eq!(classify_risk(0.0, 70.0, &thresholds), RiskLevel::Observe);
        assert_eq!(classify_risk(0.0, 85.0, &thresholds), RiskLevel::Danger);
        assert_eq!(classify_risk(0.0, 95.0, &thresholds), RiskLevel::Freeze);
        // The worse dimension wins.
        assert_eq!(classify_risk(1.6, 96.0, &thresholds), RiskLevel::Freeze);
        assert_eq!(classify_risk(3.5, 10.0, &thresholds), RiskLevel::Freeze);
    }

    #[test]
    fn classification_is_monotonic() {
        let thresholds = Config::default().risk;
        let burns = [0.0, 0.5, 1.0, 1.5, 2.0, 2.5, 3.0, 4.0];
        let budgets = [0.0, 30.0, 70.0, 85.0, 95.0, 100.0];

        for &budget in &budgets {
            let mut last = RiskLevel::Safe;
            for &burn in &burns {
                let level = classify_risk(burn, budget, &thresholds);
                assert!(level >= last, "risk decreased as burn rate increased");
                last = level;
            }
        }
        for &burn in &burns {
            let mut last = RiskLevel::Safe;
            for &budget in &budgets {
                let level = classify_risk(burn, budget, &thresholds);
                assert!(level >= last, "risk decreased as budget consumption increased");
                last = level;
            }
        }
    }

    #[tokio::test]
    async fn weighted_burn_uses_window_weights() {
        let (engine, service_id, store) = engine_with_service().await;
        // Metrics 10 minutes old: visible to the 1h and 24h windows only, so
        // the 5m window contributes zero to the weighted mean.
        seed_window_metrics(&store, service_id, 600_000, 600).await;

        let (weighted, risk) = engine.weighted_burn_rate(service_id).await.unwrap();
        // Windows: 5m -> 0.0, 1h -> 1.0, 24h -> 1.0; weights 0.3/0.4/0.3.
        assert!((weighted - 0.7).abs() < 1e-9);
        // 1h window consumed 100% of its budget -> FREEZE dominates.
        assert_eq!(risk, RiskLevel::Freeze);
    }

    #[tokio::test]
    async fn statistics_over_stored_history() {
        let (engine, service_id, store) = engine_with_service().await;
        seed_window_metrics(&store, service_id, 600_000, 120).await;

        let computation = engine.compute_burn_rate(service_id, 60).await.unwrap();
        engine.store_burn_history(&computation).await.unwrap();

        let stats = engine.burn_statistics(service_id, 24).await.unwrap();
        assert_eq!(stats.average_burn_rate, 0.2);
        assert_eq!(stats.peak_burn_rate, 0.2);
        assert_eq!(stats.min_burn_rate, 0.2);
        assert_eq!(stats.average_budget_consumed, 20.0);

        let empty = engine.burn_statistics(service_id + 1, 24).await.unwrap();
        assert_eq!(empty.average_burn_rate, 0.0);
        assert_eq!(empty.peak_burn_rate, 0.0);
    }
}
