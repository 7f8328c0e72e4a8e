//! Forecast Engine.
//!
//! Projects error budget exhaustion from the current burn rate, optionally
//! adjusted by a least-squares trend over recent burn history:
//!
//! `hours_to_exhaustion = (remaining / 100) * window_hours / burn_rate`
//!
//! The trend adjustment is deliberately asymmetric: an increasing trend
//! projects the burn rate one hour forward, a decreasing trend does not
//! discount it.

use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::burn::BurnRateEngine;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    round_dp, ConfidenceLevel, ExhaustionSummary, Forecast, TrendDirection,
};
use crate::store::Store;

/// Forecasts further than this out are not considered "at risk".
const EXHAUSTION_HORIZON_HOURS: f64 = 720.0;

/// Trend window and minimum sample size for the regression.
const TREND_LOOKBACK_HOURS: i64 = 6;
const TREND_MIN_POINTS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct TrendFit {
    pub slope: f64,
    pub r_squared: f64,
    pub data_points: usize,
}

/// Least-squares fit over (t, value) points. Returns None when there are too
/// few points or no variance in t.
pub fn linear_trend(points: &[(f64, f64)]) -> Option<TrendFit> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean_x = points.iter().map(|(x, _)| x).sum::<f64>() / nf;
    let mean_y = points.iter().map(|(_, y)| y).sum::<f64>() / nf;

    let numerator: f64 = points
        .iter()
        .map(|(x, y)| (x - mean_x) * (y - mean_y))
        .sum();
    let denominator: f64 = points.iter().map(|(x, _)| (x - mean_x).powi(2)).sum();
    if denominator == 0.0 {
        return None;
    }

    let slope = numerator / denominator;
    let intercept = mean_y - slope * mean_x;

    let ss_res: f64 = points
        .iter()
        .map(|(x, y)| {
            let fitted = slope * x + intercept;
            (y - fitted).powi(2)
        })
        .sum();
    let ss_tot: f64 = points.iter().map(|(_, y)| (y - mean_y).powi(2)).sum();
    let r_squared = if ss_tot > 0.0 {
        1.0 - ss_res / ss_tot
    } else {
        0.0
    };

    Some(TrendFit {
        slope,
        r_squared,
        data_points: n,
    })
}

pub fn trend_direction(slope: f64) -> TrendDirection {
    if slope > 0.1 {
        TrendDirection::Increasing
    } else if slope < -0.1 {
        TrendDirection::Decreasing
    } else {
        TrendDirection::Stable
    }
}

pub fn trend_confidence(r_squared: f64, data_points: usize) -> ConfidenceLevel {
    if r_squared > 0.7 && data_points >= 5 {
        ConfidenceLevel::High
    } else if r_squared > 0.4 && data_points >= 3 {
        ConfidenceLevel::Medium
    } else {
        ConfidenceLevel::Low
    }
}

/// Baseline exhaustion formula. Zero remaining budget is already exhausted;
/// a non-positive burn rate never exhausts.
pub fn hours_to_exhaustion(remaining_pct: f64, window_hours: f64, burn_rate: f64) -> Option<f64> {
    if remaining_pct <= 0.0 {
        return Some(0.0);
    }
    if burn_rate <= 0.0 {
        return None;
    }
    Some(round_dp(
        (remaining_pct / 100.0) * window_hours / burn_rate,
        2,
    ))
}

/// Format a duration in hours the way operators read it.
pub(crate) fn format_duration(hours: f64) -> String {
    if hours < 1.0 {
        format!("{} minutes", (hours * 60.0) as i64)
    } else if hours < 24.0 {
        format!("{hours:.1} hours")
    } else if hours < 72.0 {
        format!("{:.1} days", hours / 24.0)
    } else {
        format!("{} days", (hours / 24.0) as i64)
    }
}

fn forecast_message(
    service_name: &str,
    burn_rate: f64,
    remaining: f64,
    hours: Option<f64>,
    trend: TrendDirection,
) -> String {
    if remaining <= 0.0 {
        return format!("{service_name} has exhausted its error budget. Immediate action required.");
    }

    let hours = match hours {
        Some(h) => h,
        None => {
            return format!(
                "{service_name} error budget status is healthy with {remaining:.1}% remaining."
            );
        }
    };

    let time_str = format_duration(hours);

    let (severity, urgency) = if burn_rate >= 3.0 {
        (
            "critically fast".to_string(),
            "Immediate intervention required.",
        )
    } else if burn_rate >= 2.0 {
        (
            format!("{burn_rate:.1}× faster than allowed"),
            "Action recommended within the hour.",
        )
    } else if burn_rate >= 1.5 {
        (format!("{burn_rate:.1}× normal rate"), "Monitor closely.")
    } else if burn_rate >= 1.0 {
        ("at the allowed rate".to_string(), "Consider investigation.")
    } else {
        ("below normal".to_string(), "Budget is healthy.")
    };

    let trend_msg = match trend {
        TrendDirection::Increasing => " Burn rate is trending upward.",
        TrendDirection::Decreasing => " Burn rate is trending downward.",
        TrendDirection::Stable => "",
    };

    format!(
        "{service_name} is burning error budget {severity}. \
         Budget exhaustion projected in ~{time_str}.{trend_msg} {urgency}"
    )
}

#[derive(Clone)]
pub struct ForecastEngine {
    store: Arc<dyn Store>,
    config: Arc<Config>,
    burn_engine: BurnRateEngine,
}

impl ForecastEngine {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        let burn_engine = BurnRateEngine::new(store.clone(), config.clone());
        Self {
            store,
            config,
            burn_engine,
        }
    }

    /// Predict when the service's error budget will be exhausted.
    pub async fn forecast_exhaustion(&self, service_id: i64) -> Result<Forecast> {
        let service = self
            .store
            .service_by_id(service_id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;

        let current_burn = self.burn_engine.compute_burn_rate(service_id, 60).await?;

        let window_days = self
            .store
            .find_active_slo_target(service_id, "availability")
            .await?
            .map(|t| t.window_days)
            .unwrap_or(self.config.slo.default_window_days);
        let window_hours = window_days as f64 * 24.0;

        let mut burn_for_forecast = current_burn.burn_rate;
        let mut direction = TrendDirection::Stable;
        let mut slope = 0.0;
        let mut confidence = ConfidenceLevel::Medium;

        if let Some(fit) = self.burn_trend(service_id).await? {
            slope = fit.slope;
            direction = trend_direction(fit.slope);
            confidence = trend_confidence(fit.r_squared, fit.data_points);
            // Asymmetric on purpose: only an increasing trend is projected
            // forward one hour.
            if direction == TrendDirection::Increasing {
                burn_for_forecast = current_burn.burn_rate + fit.slope;
            }
        }

        let remaining = current_burn.error_budget_remaining;
        let now = Utc::now();
        let time_to_exhaustion = hours_to_exhaustion(remaining, window_hours, burn_for_forecast);
        let projected_exhaustion_time = time_to_exhaustion.map(|h| now + Duration::seconds((h * 3600.0) as i64));

        let message = forecast_message(
            &service.name,
            current_burn.burn_rate,
            remaining,
            time_to_exhaustion,
            direction,
        );

        Ok(Forecast {
            service_id,
            service_name: service.name,
            computed_at: now,
            current_burn_rate: current_burn.burn_rate,
            error_budget_remaining: remaining,
            time_to_exhaustion_hours: time_to_exhaustion,
            projected_exhaustion_time,
            confidence_level: confidence,
            burn_rate_trend: direction,
            trend_slope: round_dp(slope, 4),
            forecast_message: message,
        })
    }

    /// Fit a trend over the last six hours of one-hour-window burn history.
    /// Fewer than three points yields no trend.
    async fn burn_trend(&self, service_id: i64) -> Result<Option<TrendFit>> {
        let since = Utc::now() - Duration::hours(TREND_LOOKBACK_HOURS);
        let history = self.store.burn_history(service_id, 60, since).await?;
        if history.len() < TREND_MIN_POINTS {
            return Ok(None);
        }

        let base = history[0].timestamp;
        let points: Vec<(f64, f64)> = history
            .iter()
            .map(|record| {
                let hours = (record.timestamp - base).num_seconds() as f64 / 3600.0;
                (hours, record.burn_rate)
            })
            .collect();

        Ok(linear_trend(&points))
    }

    /// Forecasts for all active services; individual failures are logged and
    /// skipped.
    pub async fn all_forecasts(&self) -> Result<Vec<Forecast>> {
        let services = self.store.active_services().await?;
        let mut forecasts = Vec::new();
        for service in services {
            match self.forecast_exhaustion(service.id).await {
                Ok(forecast) => forecasts.push(forecast),
                Err(e) => warn!(service = %service.name, error = %e, "forecast failed"),
            }
        }
        Ok(forecasts)
    }

    /// The service closest to exhausting its budget within the 30-day
    /// horizon, if any.
    pub async fn nearest_exhaustion(&self) -> Result<Option<ExhaustionSummary>> {
        let forecasts = self.all_forecasts().await?;

        let nearest = forecasts
            .into_iter()
            .filter_map(|f| {
                f.time_to_exhaustion_hours.and_then(|hours| {
                    (hours < EXHAUSTION_HORIZON_HOURS).then_some((f, hours))
                })
            })
            .min_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        Ok(nearest.map(|(f, hours)| ExhaustionSummary {
            service_name: f.service_name,
            time_to_exhaustion_hours: hours,
            projected_exhaustion_time: f.projected_exhaustion_time,
            current_burn_rate: f.current_burn_rate,
            budget_remaining: f.error_budget_remaining,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBurnRecord, NewMetric, NewService, RiskLevel};
    use crate::store::MemoryStore;

    #[test]
    fn regression_matches_known_series() {
        // Hourly burn rates rising 1.0 -> 2.2 over six hours.
        let points: Vec<(f64, f64)> = [1.0, 1.2, 1.5, 1.8, 2.0, 2.2]
            .iter()
            .enumerate()
            .map(|(i, &y)| (i as f64, y))
            .collect();

        let fit = linear_trend(&points).unwrap();
        assert!((fit.slope - 0.2486).abs() < 0.001);
        assert!(fit.r_squared > 0.95);
        assert_eq!(trend_direction(fit.slope), TrendDirection::Increasing);
        assert_eq!(
            trend_confidence(fit.r_squared, fit.data_points),
            ConfidenceLevel::High
        );

        // Trend-adjusted projection: B' = 2.2 + slope, R = 40%, W = 720h.
        let hours = hours_to_exhaustion(40.0, 720.0, 2.2 + fit.slope).unwrap();
        assert!((hours - 117.62).abs() < 0.5);
    }

    #[test]
    fn regression_degenerate_inputs() {
        assert!(linear_trend(&[(0.0, 1.0)]).is_none());
        assert!(linear_trend(&[(1.0, 1.0), (1.0, 2.0)]).is_none());

        let flat = linear_trend(&[(0.0, 1.0), (1.0, 1.0), (2.0, 1.0)]).unwrap();
        assert_eq!(flat.slope, 0.0);
        assert_eq!(trend_direction(flat.slope), TrendDirection::Stable);
    }

    #[test]
    fn exhaustion_formula_round_trip() {
        // B = 2.0, R = 50%, W = 30 days.
        assert_eq!(hours_to_exhaustion(50.0, 720.0, 2.0), Some(180.0));
        assert_eq!(hours_to_exhaustion(0.0, 720.0, 2.0), Some(0.0));
        assert_eq!(hours_to_exhaustion(-1.0, 720.0, 2.0), Some(0.0));
        assert_eq!(hours_to_exhaustion(50.0, 720.0, 0.0), None);
    }

    #[test]
    fn duration_formatting_ladder() {
        assert_eq!(format_duration(0.5), "30 minutes");
        assert_eq!(format_duration(12.0), "12.0 hours");
        assert_eq!(format_duration(36.0), "1.5 days");
        assert_eq!(format_duration(200.0), "8 days");
    }

    #[test]
    fn messages_follow_burn_bands() {
        let exhausted = forecast_message("api", 2.0, 0.0, Some(0.0), TrendDirection::Stable);
        assert!(exhausted.contains("exhausted its error budget"));

        let healthy = forecast_message("api", 0.2, 95.0, None, TrendDirection::Stable);
        assert!(healthy.contains("healthy with 95.0% remaining"));

        let fast = forecast_message("api", 2.5, 40.0, Some(10.0), TrendDirection::Increasing);
        assert!(fast.contains("2.5× faster than allowed"));
        assert!(fast.contains("trending upward"));
        assert!(fast.contains("10.0 hours"));

        let critical = forecast_message("api", 3.5, 20.0, Some(2.0), TrendDirection::Decreasing);
        assert!(critical.contains("critically fast"));
        assert!(critical.contains("trending downward"));
    }

    async fn setup() -> (ForecastEngine, Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(Config::default());
        let engine = ForecastEngine::new(store.clone(), config);
        let service = store
            .create_service(NewService {
                name: "auth-service".to_string(),
                description: None,
                team: None,
                tier: 1,
            })
            .await
            .unwrap();
        (engine, store, service.id)
    }

    async fn seed_current_burn(store: &MemoryStore, service_id: i64, errors: i64) {
        store
            .insert_metrics(vec![NewMetric {
                service_id,
                timestamp: Utc::now() - Duration::minutes(10),
                total_requests: 600_000,
                error_count: errors,
                latency_p50: None,
                latency_p95: None,
                latency_p99: None,
                success_rate: None,
            }])
            .await
            .unwrap();
    }

    async fn seed_rising_history(store: &MemoryStore, service_id: i64) {
        let now = Utc::now();
        for (i, burn) in [1.0, 1.2, 1.5, 1.8, 2.0, 2.2].iter().enumerate() {
            store
                .append_burn_record(NewBurnRecord {
                    service_id,
                    timestamp: now - Duration::hours(5 - i as i64),
                    window_minutes: 60,
                    burn_rate: *burn,
                    error_budget_consumed: 50.0,
                    error_budget_remaining: 50.0,
                    time_to_exhaustion_hours: None,
                    risk_level: RiskLevel::Observe,
                })
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn increasing_trend_projects_burn_forward() {
        let (engine, store, service_id) = setup().await;
        // Burn 0.5 over the hour window: 50% of the window budget remaining.
        seed_current_burn(&store, service_id, 300).await;
        seed_rising_history(&store, service_id).await;

        let forecast = engine.forecast_exhaustion(service_id).await.unwrap();
        assert_eq!(forecast.current_burn_rate, 0.5);
        assert_eq!(forecast.error_budget_remaining, 50.0);
        assert_eq!(forecast.burn_rate_trend, TrendDirection::Increasing);
        assert_eq!(forecast.confidence_level, ConfidenceLevel::High);
        assert!(forecast.trend_slope > 0.2);

        // Projection uses B' = 0.5 + slope, so exhaustion arrives sooner than
        // the unadjusted (50/100)*720/0.5 = 720 hours.
        let hours = forecast.time_to_exhaustion_hours.unwrap();
        assert!(hours < 720.0);
        assert!(forecast.projected_exhaustion_time.is_some());
        assert!(forecast.forecast_message.contains("trending upward"));
    }

    #[tokio::test]
    async fn sparse_history_skips_trend() {
        let (engine, store, service_id) = setup().await;
        seed_current_burn(&store, service_id, 300).await;

        let forecast = engine.forecast_exhaustion(service_id).await.unwrap();
        assert_eq!(forecast.burn_rate_trend, TrendDirection::Stable);
        assert_eq!(forecast.confidence_level, ConfidenceLevel::Medium);
        assert_eq!(forecast.trend_slope, 0.0);
        assert_eq!(forecast.time_to_exhaustion_hours, Some(720.0));
    }

    #[tokio::test]
    async fn exhausted_budget_forecasts_zero_hours() {
        let (engine, store, service_id) = setup().await;
        seed_current_burn(&store, service_id, 1_200).await;

        let forecast = engine.forecast_exhaustion(service_id).await.unwrap();
        assert_eq!(forecast.error_budget_remaining, 0.0);
        assert_eq!(forecast.time_to_exhaustion_hours, Some(0.0));
        assert!(forecast.forecast_message.contains("exhausted"));
    }

    #[tokio::test]
    async fn nearest_exhaustion_picks_minimum() {
        let (engine, store, risky_id) = setup().await;
        seed_current_burn(&store, risky_id, 300).await;
        seed_rising_history(&store, risky_id).await;

        let calm = store
            .create_service(NewService {
                name: "notification-service".to_string(),
                description: None,
                team: None,
                tier: 3,
            })
            .await
            .unwrap();
        store
            .insert_metrics(vec![NewMetric {
                service_id: calm.id,
                timestamp: Utc::now() - Duration::minutes(10),
                total_requests: 600_000,
                error_count: 6,
                latency_p50: None,
                latency_p95: None,
                latency_p99: None,
                success_rate: None,
            }])
            .await
            .unwrap();

        let nearest = engine.nearest_exhaustion().await.unwrap().unwrap();
        assert_eq!(nearest.service_name, "auth-service");
        assert!(nearest.time_to_exhaustion_hours < 720.0);
    }

    #[tokio::test]
    async fn unknown_service_is_an_error() {
        let (engine, _store, _id) = setup().await;
        assert!(matches!(
            engine.forecast_exhaustion(404).await.unwrap_err(),
            Error::ServiceNotFound(_)
        ));
    }
}
