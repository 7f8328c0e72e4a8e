//! Narrative engine.
//!
//! Turns burn-rate, forecast, and SLO outputs into human-readable material:
//! per-service insights with a 0-100 health score, an executive summary
//! with prioritized action items, a dashboard overview, and a service x
//! time risk heatmap. Template-based with data interpolation; no model
//! calls involved.

use chrono::{Duration, Utc};
use serde_json::json;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

use crate::burn::BurnRateEngine;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::forecast::{format_duration, ForecastEngine};
use crate::models::{
    round_dp, AlertSeverity, BurnRateComputation, DashboardOverview, Forecast, HealthBand,
    InsightKind, ReliabilitySummary, RiskHeatmap, RiskLevel, ServiceInsight, TrendDirection,
};
use crate::slo::SloEngine;
use crate::store::Store;

/// Narrative template categories. Severity and health-score impact live in
/// the analysis rules, not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NarrativeKind {
    BurnCritical,
    BurnElevated,
    BurnHealthy,
    BudgetExhausted,
    BudgetCritical,
    TrendWorsening,
}

impl NarrativeKind {
    pub fn template(&self) -> &'static str {
        match self {
            NarrativeKind::BurnCritical => {
                "{service} is burning error budget {burn_rate}× faster than allowed. \
                 SLA breach likely in ~{time_to_exhaustion}."
            }
            NarrativeKind::BurnElevated => {
                "{service} error budget consumption is elevated at {burn_rate}× normal rate. \
                 {budget_remaining}% budget remaining."
            }
            NarrativeKind::BurnHealthy => {
                "{service} is operating within error budget parameters. \
                 Current burn rate: {burn_rate}×."
            }
            NarrativeKind::BudgetExhausted => {
                "{service} has EXHAUSTED its error budget. \
                 All non-critical deployments should be halted."
            }
            NarrativeKind::BudgetCritical => {
                "{service} error budget is critically low at {budget_remaining}%. \
                 Immediate attention required."
            }
            NarrativeKind::TrendWorsening => {
                "{service} reliability is degrading. Burn rate has increased \
                 {trend_change}% over the last hour."
            }
        }
    }
}

fn render(kind: NarrativeKind, vars: &[(&str, String)]) -> String {
    crate::alerts::render_template(kind.template(), vars)
}

/// Analyze one service's current state into insights plus a health score.
///
/// Deductions: exhausted budget -50, critical burn -40, elevated burn -20,
/// low budget -15, worsening trend -5. The score floors at zero.
pub fn analyze_service(burn: &BurnRateComputation, forecast: &Forecast) -> (Vec<ServiceInsight>, f64) {
    let mut insights = Vec::new();
    let mut health_score: f64 = 100.0;
    let service = &burn.service_name;

    if burn.error_budget_remaining <= 0.0 {
        insights.push(ServiceInsight {
            service_name: service.clone(),
            insight_type: InsightKind::Warning,
            message: render(
                NarrativeKind::BudgetExhausted,
                &[("service", service.clone())],
            ),
            severity: AlertSeverity::Critical,
            data: json!({ "budget_remaining": 0.0 }),
        });
        health_score -= 50.0;
    } else if burn.burn_rate >= 3.0 {
        let time_str = forecast
            .time_to_exhaustion_hours
            .map(format_duration)
            .unwrap_or_else(|| "unknown".to_string());
        insights.push(ServiceInsight {
            service_name: service.clone(),
            insight_type: InsightKind::Warning,
            message: render(
                NarrativeKind::BurnCritical,
                &[
                    ("service", service.clone()),
                    ("burn_rate", format!("{:.1}", burn.burn_rate)),
                    ("time_to_exhaustion", time_str),
                ],
            ),
            severity: AlertSeverity::Critical,
            data: json!({
                "burn_rate": burn.burn_rate,
                "time_to_exhaustion": forecast.time_to_exhaustion_hours,
            }),
        });
        health_score -= 40.0;
    } else if burn.burn_rate >= 1.5 {
        insights.push(ServiceInsight {
            service_name: service.clone(),
            insight_type: InsightKind::Warning,
            message: render(
                NarrativeKind::BurnElevated,
                &[
                    ("service", service.clone()),
                    ("burn_rate", format!("{:.1}", burn.burn_rate)),
                    (
                        "budget_remaining",
                        format!("{:.1}", burn.error_budget_remaining),
                    ),
                ],
            ),
            severity: AlertSeverity::Warning,
            data: json!({ "burn_rate": burn.burn_rate }),
        });
        health_score -= 20.0;
    }

    if burn.error_budget_remaining > 0.0 && burn.error_budget_remaining < 15.0 {
        insights.push(ServiceInsight {
            service_name: service.clone(),
            insight_type: InsightKind::Warning,
            message: render(
                NarrativeKind::BudgetCritical,
                &[
                    ("service", service.clone()),
                    (
                        "budget_remaining",
                        format!("{:.1}", burn.error_budget_remaining),
                    ),
                ],
            ),
            severity: AlertSeverity::Warning,
            data: json!({ "budget_remaining": burn.error_budget_remaining }),
        });
        health_score -= 15.0;
    }

    if forecast.burn_rate_trend == TrendDirection::Increasing {
        let severity = if burn.risk_level == RiskLevel::Safe {
            AlertSeverity::Info
        } else {
            AlertSeverity::Warning
        };
        insights.push(ServiceInsight {
            service_name: service.clone(),
            insight_type: InsightKind::Status,
            message: render(
                NarrativeKind::TrendWorsening,
                &[
                    ("service", service.clone()),
                    (
                        "trend_change",
                        format!("{:.0}", (forecast.trend_slope * 100.0).abs()),
                    ),
                ],
            ),
            severity,
            data: json!({ "trend_slope": forecast.trend_slope }),
        });
        health_score -= 5.0;
    }

    if insights.is_empty() {
        insights.push(ServiceInsight {
            service_name: service.clone(),
            insight_type: InsightKind::Status,
            message: render(
                NarrativeKind::BurnHealthy,
                &[
                    ("service", service.clone()),
                    ("burn_rate", format!("{:.2}", burn.burn_rate)),
                ],
            ),
            severity: AlertSeverity::Info,
            data: json!({ "burn_rate": burn.burn_rate }),
        });
    }

    (insights, health_score.max(0.0))
}

pub fn health_band(score: f64) -> HealthBand {
    if score >= 90.0 {
        HealthBand::Healthy
    } else if score >= 70.0 {
        HealthBand::Degraded
    } else {
        HealthBand::Critical
    }
}

fn executive_summary(
    total_services: usize,
    at_risk: &[String],
    score: f64,
    critical_count: usize,
    nearest: Option<&crate::models::ExhaustionSummary>,
) -> String {
    let mut parts = Vec::new();

    if score >= 95.0 {
        parts.push(format!(
            "Platform reliability is excellent with {total_services} services operating normally."
        ));
    } else if score >= 85.0 {
        parts.push(format!(
            "Platform reliability is good. {} of {total_services} services are healthy.",
            total_services - at_risk.len()
        ));
    } else if score >= 70.0 {
        parts.push(format!(
            "Platform reliability requires attention. {} services showing elevated error rates.",
            at_risk.len()
        ));
    } else {
        parts.push(format!(
            "Platform reliability is degraded. {} services at risk, {critical_count} critical issues detected.",
            at_risk.len()
        ));
    }

    if !at_risk.is_empty() {
        if at_risk.len() <= 3 {
            parts.push(format!(
                "Services requiring attention: {}.",
                at_risk.join(", ")
            ));
        } else {
            parts.push(format!(
                "{} services require attention including {}.",
                at_risk.len(),
                at_risk[..3].join(", ")
            ));
        }
    }

    if let Some(nearest) = nearest {
        parts.push(format!(
            "Nearest budget exhaustion: {} in ~{}.",
            nearest.service_name,
            format_duration(nearest.time_to_exhaustion_hours)
        ));
    }

    parts.join(" ")
}

fn action_items(insights: &[ServiceInsight], at_risk: &[String]) -> Vec<String> {
    let mut actions = Vec::new();

    let critical_services: BTreeSet<&str> = insights
        .iter()
        .filter(|i| i.severity == AlertSeverity::Critical)
        .map(|i| i.service_name.as_str())
        .collect();
    if !critical_services.is_empty() {
        actions.push(format!(
            "URGENT: Investigate critical issues in {}",
            critical_services.into_iter().collect::<Vec<_>>().join(", ")
        ));
    }

    let budget_exhaustion = insights.iter().any(|i| {
        let message = i.message.to_lowercase();
        message.contains("budget") && message.contains("exhaust")
    });
    if budget_exhaustion {
        actions.push(
            "Review error budget status and consider deployment freeze for affected services"
                .to_string(),
        );
    }

    let trending_up = insights.iter().any(|i| {
        i.insight_type == InsightKind::Status && i.message.to_lowercase().contains("degrading")
    });
    if trending_up {
        actions.push("Monitor trending services and prepare incident response".to_string());
    }

    if !at_risk.is_empty() {
        actions.push("Review recent deployments to at-risk services for potential rollback".to_string());
    }

    if actions.is_empty() {
        actions.push("Continue monitoring - all systems operating normally".to_string());
    }

    actions
}

#[derive(Clone)]
pub struct NarrativeEngine {
    store: Arc<dyn Store>,
    burn_engine: BurnRateEngine,
    forecast_engine: ForecastEngine,
    slo_engine: SloEngine,
}

impl NarrativeEngine {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        let burn_engine = BurnRateEngine::new(store.clone(), config.clone());
        let forecast_engine = ForecastEngine::new(store.clone(), config.clone());
        let slo_engine = SloEngine::new(store.clone(), config);
        Self {
            store,
            burn_engine,
            forecast_engine,
            slo_engine,
        }
    }

    /// Comprehensive reliability summary across all active services.
    pub async fn generate_summary(&self) -> Result<ReliabilitySummary> {
        let services = self.store.active_services().await?;

        let mut insights = Vec::new();
        let mut services_at_risk: Vec<String> = Vec::new();
        let mut total_health_score = 0.0;
        let mut critical_count = 0;

        for service in &services {
            let (service_insights, health_score) = self.analyze(service.id, &service.name).await;
            total_health_score += health_score;

            for insight in &service_insights {
                if matches!(
                    insight.severity,
                    AlertSeverity::Critical | AlertSeverity::Warning
                ) && !services_at_risk.contains(&service.name)
                {
                    services_at_risk.push(service.name.clone());
                }
                if insight.severity == AlertSeverity::Critical {
                    critical_count += 1;
                }
            }
            insights.extend(service_insights);
        }

        let overall_score = if services.is_empty() {
            100.0
        } else {
            total_health_score / services.len() as f64
        };

        let nearest = self.forecast_engine.nearest_exhaustion().await?;
        let summary = executive_summary(
            services.len(),
            &services_at_risk,
            overall_score,
            critical_count,
            nearest.as_ref(),
        );
        let actions = action_items(&insights, &services_at_risk);

        Ok(ReliabilitySummary {
            generated_at: Utc::now(),
            overall_health: health_band(overall_score),
            overall_score: round_dp(overall_score, 1),
            executive_summary: summary,
            insights,
            action_items: actions,
            services_at_risk,
            nearest_budget_exhaustion: nearest,
        })
    }

    /// Insights for one service; analysis failures degrade to a single
    /// informational insight rather than failing the sweep.
    async fn analyze(&self, service_id: i64, service_name: &str) -> (Vec<ServiceInsight>, f64) {
        let state = async {
            let burn = self.burn_engine.compute_burn_rate(service_id, 60).await?;
            let forecast = self.forecast_engine.forecast_exhaustion(service_id).await?;
            Ok::<_, Error>((burn, forecast))
        }
        .await;

        match state {
            Ok((burn, forecast)) => analyze_service(&burn, &forecast),
            Err(e) => {
                warn!(service = %service_name, error = %e, "service analysis failed");
                (
                    vec![ServiceInsight {
                        service_name: service_name.to_string(),
                        insight_type: InsightKind::Status,
                        message: format!("Unable to analyze {service_name}: insufficient data"),
                        severity: AlertSeverity::Info,
                        data: json!({ "error": e.to_string() }),
                    }],
                    100.0,
                )
            }
        }
    }

    /// Executive dashboard rollup.
    pub async fn dashboard_overview(&self) -> Result<DashboardOverview> {
        let compliance = self.slo_engine.global_compliance().await?;
        let services = self.store.active_services().await?;

        let mut risk_distribution: HashMap<String, usize> = [
            RiskLevel::Safe,
            RiskLevel::Observe,
            RiskLevel::Danger,
            RiskLevel::Freeze,
        ]
        .iter()
        .map(|level| (level.as_str().to_string(), 0))
        .collect();

        let mut budget_remaining = Vec::new();
        let mut lowest: Option<(String, f64)> = None;

        for service in &services {
            match self.burn_engine.compute_burn_rate(service.id, 60).await {
                Ok(burn) => {
                    *risk_distribution
                        .entry(burn.risk_level.as_str().to_string())
                        .or_insert(0) += 1;
                    budget_remaining.push(burn.error_budget_remaining);
                    let is_lowest = lowest
                        .as_ref()
                        .map_or(true, |(_, low)| burn.error_budget_remaining < *low);
                    if is_lowest {
                        lowest = Some((service.name.clone(), burn.error_budget_remaining));
                    }
                }
                Err(e) => {
                    warn!(service = %service.name, error = %e, "dashboard burn computation failed");
                }
            }
        }

        let average_budget_remaining = if budget_remaining.is_empty() {
            100.0
        } else {
            budget_remaining.iter().sum::<f64>() / budget_remaining.len() as f64
        };

        let nearest = self.forecast_engine.nearest_exhaustion().await?;

        let since = Utc::now() - Duration::hours(24);
        let (active_alerts, _) = self.store.count_alerts(since).await?;
        let severity_counts = self.store.alert_severity_counts(since).await?;
        let critical_alerts = severity_counts
            .get(&AlertSeverity::Critical)
            .copied()
            .unwrap_or(0)
            + severity_counts
                .get(&AlertSeverity::Emergency)
                .copied()
                .unwrap_or(0);

        Ok(DashboardOverview {
            total_services: compliance.total_services,
            services_meeting_slo: compliance.services_meeting_slo,
            services_at_risk: compliance.services_at_risk.len(),
            global_compliance_score: compliance.global_compliance,
            risk_distribution,
            average_budget_remaining: round_dp(average_budget_remaining, 2),
            lowest_budget_service: lowest.as_ref().map(|(name, _)| name.clone()),
            lowest_budget_percentage: lowest.map(|(_, pct)| pct),
            nearest_exhaustion: nearest,
            active_alerts,
            critical_alerts,
        })
    }

    /// Service x time risk matrix from persisted one-hour-window burn
    /// history. Cells with no record within 30 minutes default to SAFE.
    pub async fn risk_heatmap(&self, hours: i64, interval_hours: i64) -> Result<RiskHeatmap> {
        let services = self.store.active_services().await?;
        if services.is_empty() {
            return Ok(RiskHeatmap {
                services: Vec::new(),
                timestamps: Vec::new(),
                risk_matrix: Vec::new(),
            });
        }

        let now = Utc::now();
        let interval = interval_hours.max(1);
        let mut timestamps = Vec::new();
        let mut cursor = now - Duration::hours(hours);
        while cursor <= now {
            timestamps.push(cursor);
            cursor += Duration::hours(interval);
        }

        let half_window = Duration::minutes(30);
        let mut risk_matrix = Vec::with_capacity(services.len());
        for service in &services {
            let history = self
                .store
                .burn_history(service.id, 60, now - Duration::hours(hours) - half_window)
                .await?;

            let row = timestamps
                .iter()
                .map(|ts| {
                    history
                        .iter()
                        .filter(|record| {
                            (record.timestamp - *ts).abs() <= half_window
                        })
                        .min_by_key(|record| (record.timestamp - *ts).abs())
                        .map(|record| record.risk_level)
                        .unwrap_or(RiskLevel::Safe)
                })
                .collect();
            risk_matrix.push(row);
        }

        Ok(RiskHeatmap {
            services: services.into_iter().map(|s| s.name).collect(),
            timestamps,
            risk_matrix,
        })
    }

    /// Detailed markdown-style narrative for one service.
    pub async fn service_narrative(&self, service_id: i64) -> Result<String> {
        let service = self
            .store
            .service_by_id(service_id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))?;

        let state = async {
            let burn = self.burn_engine.compute_burn_rate(service_id, 60).await?;
            let forecast = self.forecast_engine.forecast_exhaustion(service_id).await?;
            Ok::<_, Error>((burn, forecast))
        }
        .await;

        let (burn, forecast) = match state {
            Ok(state) => state,
            Err(e) => {
                warn!(service = %service.name, error = %e, "narrative generation failed");
                return Ok(format!(
                    "Unable to generate report for {}: insufficient data",
                    service.name
                ));
            }
        };

        let mut parts = vec![format!("## {} Reliability Report\n", service.name)];
        parts.push(format!(
            "**Risk Level:** {}",
            burn.risk_level.as_str().to_uppercase()
        ));
        parts.push(format!(
            "**Burn Rate:** {:.2}× (1.0 = normal)",
            burn.burn_rate
        ));
        parts.push(format!(
            "**Error Budget:** {:.1}% remaining",
            burn.error_budget_remaining
        ));

        if let Some(hours) = forecast.time_to_exhaustion_hours {
            if hours > 0.0 {
                parts.push(format!(
                    "\n**Forecast:** Budget exhaustion in ~{}",
                    format_duration(hours)
                ));
            }
        }

        let trend = forecast.burn_rate_trend.as_str();
        let mut trend_label = trend.to_string();
        if let Some(first) = trend_label.get_mut(0..1) {
            first.make_ascii_uppercase();
        }
        parts.push(format!("**Trend:** {trend_label}"));
        parts.push(format!("\n{}", forecast.forecast_message));

        Ok(parts.join("\n"))
    }
}
