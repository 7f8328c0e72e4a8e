//! Alert Manager.
//!
//! Template-driven alert generation with per-(service, alert_type) cooldown
//! so repeated evaluations do not fatigue operators. Alerts are persisted
//! and marked dispatched here; actual delivery (SMTP, chat webhooks, paging)
//! belongs to downstream transports.

use chrono::{Duration, Utc};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use tracing::{info, warn};

use crate::burn::BurnRateEngine;
use crate::config::Config;
use crate::error::Result;
use crate::forecast::{format_duration, ForecastEngine};
use crate::models::{
    Alert, AlertChannel, AlertFeed, AlertSeverity, AlertStatistics, AlertView, NewAlert, RiskLevel,
};
use crate::store::{AlertQuery, Store};

/// Enumerated alert categories. Each kind carries its templates, severity,
/// and default channel; there is no subtype hierarchy behind this.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertKind {
    BudgetExhausted,
    BudgetCritical,
    BurnRateHigh,
    RiskEscalation,
    DeploymentBlocked,
    Recovery,
}

pub struct AlertTemplate {
    pub title: &'static str,
    pub message: &'static str,
    pub severity: AlertSeverity,
    pub default_channel: AlertChannel,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::BudgetExhausted => "budget_exhausted",
            AlertKind::BudgetCritical => "budget_critical",
            AlertKind::BurnRateHigh => "burn_rate_high",
            AlertKind::RiskEscalation => "risk_escalation",
            AlertKind::DeploymentBlocked => "deployment_blocked",
            AlertKind::Recovery => "recovery",
        }
    }

    pub fn template(&self) -> AlertTemplate {
        match self {
            AlertKind::BudgetExhausted => AlertTemplate {
                title: "[CRITICAL] Error Budget Exhausted: {service}",
                message: "Error budget for {service} has been completely exhausted. \
                          Deployment freeze recommended.",
                severity: AlertSeverity::Emergency,
                default_channel: AlertChannel::Slack,
            },
            AlertKind::BudgetCritical => AlertTemplate {
                title: "[WARNING] Error Budget Critical: {service}",
                message: "Error budget for {service} is critically low ({remaining}% \
                          remaining). Budget will be exhausted in ~{time}.",
                severity: AlertSeverity::Critical,
                default_channel: AlertChannel::Slack,
            },
            AlertKind::BurnRateHigh => AlertTemplate {
                title: "[ALERT] High Burn Rate: {service}",
                message: "{service} is burning error budget at {rate}× the allowed rate. \
                          Current risk level: {risk}.",
                severity: AlertSeverity::Warning,
                default_channel: AlertChannel::Ui,
            },
            AlertKind::RiskEscalation => AlertTemplate {
                title: "[NOTICE] Risk Level Changed: {service}",
                message: "{service} risk level has escalated from {from_risk} to {to_risk}.",
                severity: AlertSeverity::Warning,
                default_channel: AlertChannel::Ui,
            },
            AlertKind::DeploymentBlocked => AlertTemplate {
                title: "[INFO] Deployment Blocked: {service}",
                message: "Deployment {deployment_id} was blocked due to {reason}.",
                severity: AlertSeverity::Info,
                default_channel: AlertChannel::Ui,
            },
            AlertKind::Recovery => AlertTemplate {
                title: "[RESOLVED] Service Recovered: {service}",
                message: "{service} has recovered. Risk level is now {risk}.",
                severity: AlertSeverity::Info,
                default_channel: AlertChannel::Ui,
            },
        }
    }
}

/// Interpolate `{key}` placeholders. Unknown placeholders are left intact.
pub fn render_template(template: &str, vars: &[(&str, String)]) -> String {
    let mut output = template.to_string();
    for (key, value) in vars {
        output = output.replace(&format!("{{{key}}}"), value);
    }
    output
}

#[derive(Clone)]
pub struct AlertManager {
    store: Arc<dyn Store>,
    config: Arc<Config>,
    burn_engine: BurnRateEngine,
    forecast_engine: ForecastEngine,
}

impl AlertManager {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        let burn_engine = BurnRateEngine::new(store.clone(), config.clone());
        let forecast_engine = ForecastEngine::new(store.clone(), config.clone());
        Self {
            store,
            config,
            burn_engine,
            forecast_engine,
        }
    }

    /// Create an alert from a template unless the same (service, alert_type)
    /// fired within the cooldown. Returns None when suppressed.
    pub async fn create_alert(
        &self,
        service_id: i64,
        kind: AlertKind,
        channel: AlertChannel,
        vars: &[(&str, String)],
        extra_metadata: Option<JsonValue>,
    ) -> Result<Option<Alert>> {
        let template = kind.template();
        let title = render_template(template.title, vars);
        let message = render_template(template.message, vars);

        let mut metadata = json!({ "alert_type": kind.as_str() });
        if let (Some(target), Some(extra)) = (metadata.as_object_mut(), extra_metadata) {
            if let Some(extra) = extra.as_object() {
                for (key, value) in extra {
                    target.insert(key.clone(), value.clone());
                }
            }
        }

        let cooldown_start =
            Utc::now() - Duration::minutes(self.config.alerting.cooldown_minutes);
        let inserted = self
            .store
            .insert_alert_unless_recent(
                NewAlert {
                    service_id,
                    alert_type: kind.as_str().to_string(),
                    severity: template.severity,
                    channel,
                    title,
                    message,
                    metadata,
                },
                cooldown_start,
            )
            .await?;

        match inserted {
            Some(alert) => self.dispatch(alert).await.map(Some),
            None => Ok(None),
        }
    }

    /// Mark the alert dispatched and emit the externally visible log line.
    /// Delivery itself is delegated to transport integrations.
    async fn dispatch(&self, mut alert: Alert) -> Result<Alert> {
        let now = Utc::now();
        self.store.mark_alert_dispatched(alert.id, now).await?;
        alert.dispatched = true;
        alert.dispatched_at = Some(now);

        info!(
            channel = %alert.channel,
            severity = %alert.severity,
            title = %alert.title,
            "alert dispatched"
        );
        Ok(alert)
    }

    /// Evaluate a service's reliability state and raise whatever alerts
    /// apply. Unknown services produce no alerts.
    pub async fn evaluate_and_alert(&self, service_id: i64) -> Result<Vec<Alert>> {
        let service = match self.store.service_by_id(service_id).await? {
            Some(service) => service,
            None => return Ok(Vec::new()),
        };

        let mut alerts = Vec::new();
        let burn = self.burn_engine.compute_burn_rate(service_id, 60).await?;

        // Previous persisted risk, for escalation/recovery transitions. The
        // coordinator appends this tick's record before evaluating, so the
        // previous state is the second-newest row.
        let history = self
            .store
            .burn_history(service_id, 60, Utc::now() - Duration::hours(6))
            .await?;
        let previous_risk = if history.len() >= 2 {
            Some(history[history.len() - 2].risk_level)
        } else {
            None
        };

        if burn.error_budget_remaining <= 0.0 {
            if let Some(alert) = self
                .create_alert(
                    service_id,
                    AlertKind::BudgetExhausted,
                    AlertChannel::Slack,
                    &[("service", service.name.clone())],
                    None,
                )
                .await?
            {
                alerts.push(alert);
            }
        } else if burn.error_budget_remaining < self.config.alerting.budget_critical_threshold {
            let forecast = self.forecast_engine.forecast_exhaustion(service_id).await?;
            let time_str = forecast
                .time_to_exhaustion_hours
                .map(format_duration)
                .unwrap_or_else(|| "unknown".to_string());
            if let Some(alert) = self
                .create_alert(
                    service_id,
                    AlertKind::BudgetCritical,
                    AlertChannel::Slack,
                    &[
                        ("service", service.name.clone()),
                        ("remaining", format!("{:.1}", burn.error_budget_remaining)),
                        ("time", time_str),
                    ],
                    None,
                )
                .await?
            {
                alerts.push(alert);
            }
        }

        if burn.burn_rate >= self.config.risk.burn_rate_danger {
            if let Some(alert) = self
                .create_alert(
                    service_id,
                    AlertKind::BurnRateHigh,
                    AlertChannel::Ui,
                    &[
                        ("service", service.name.clone()),
                        ("rate", format!("{:.1}", burn.burn_rate)),
                        ("risk", burn.risk_level.as_str().to_uppercase()),
                    ],
                    None,
                )
                .await?
            {
                alerts.push(alert);
            }
        }

        if let Some(previous) = previous_risk {
            let current = burn.risk_level;
            if current > previous {
                if let Some(alert) = self
                    .create_alert(
                        service_id,
                        AlertKind::RiskEscalation,
                        AlertChannel::Ui,
                        &[
                            ("service", service.name.clone()),
                            ("from_risk", previous.as_str().to_uppercase()),
                            ("to_risk", current.as_str().to_uppercase()),
                        ],
                        None,
                    )
                    .await?
                {
                    alerts.push(alert);
                }
            } else if current == RiskLevel::Safe && previous != RiskLevel::Safe {
                if let Some(alert) = self
                    .create_alert(
                        service_id,
                        AlertKind::Recovery,
                        AlertChannel::Ui,
                        &[
                            ("service", service.name.clone()),
                            ("risk", current.as_str().to_uppercase()),
                        ],
                        None,
                    )
                    .await?
                {
                    alerts.push(alert);
                }
            }
        }

        Ok(alerts)
    }

    /// Hook invoked by the release gate when a deployment is blocked.
    pub async fn deployment_blocked(
        &self,
        service_id: i64,
        service_name: &str,
        deployment_id: &str,
        reason: &str,
    ) -> Result<Option<Alert>> {
        self.create_alert(
            service_id,
            AlertKind::DeploymentBlocked,
            AlertChannel::Ui,
            &[
                ("service", service_name.to_string()),
                ("deployment_id", deployment_id.to_string()),
                ("reason", reason.to_string()),
            ],
            Some(json!({ "deployment_id": deployment_id })),
        )
        .await
    }

    pub async fn get_alerts(
        &self,
        service_id: Option<i64>,
        severity: Option<AlertSeverity>,
        acknowledged: Option<bool>,
        hours: i64,
        limit: i64,
    ) -> Result<Vec<AlertView>> {
        self.store
            .alerts_with_service(AlertQuery {
                service_id,
                severity,
                acknowledged,
                since: Utc::now() - Duration::hours(hours),
                limit,
            })
            .await
    }

    pub async fn alert_feed(&self, hours: i64, limit: i64) -> Result<AlertFeed> {
        let alerts = self.get_alerts(None, None, None, hours, limit).await?;
        let (total, unacknowledged) = self
            .store
            .count_alerts(Utc::now() - Duration::hours(hours))
            .await?;
        Ok(AlertFeed {
            alerts,
            total,
            unacknowledged,
        })
    }

    pub async fn acknowledge_alert(
        &self,
        alert_id: i64,
        acknowledged_by: &str,
    ) -> Result<Option<Alert>> {
        let acknowledged = self
            .store
            .acknowledge_alert(alert_id, acknowledged_by, Utc::now())
            .await?;
        if acknowledged.is_none() {
            warn!(alert_id, "acknowledge requested for unknown alert");
        }
        Ok(acknowledged)
    }

    pub async fn bulk_acknowledge(&self, alert_ids: &[i64], acknowledged_by: &str) -> Result<u64> {
        self.store
            .acknowledge_alerts(alert_ids, acknowledged_by, Utc::now())
            .await
    }

    pub async fn alert_statistics(&self, days: i64) -> Result<AlertStatistics> {
        let since = Utc::now() - Duration::days(days);
        let counts = self.store.alert_severity_counts(since).await?;
        let total = counts.values().sum();
        let (_, unacknowledged) = self.store.count_alerts(since).await?;

        Ok(AlertStatistics {
            period_days: days,
            by_severity: counts
                .into_iter()
                .map(|(severity, count)| (severity.as_str().to_string(), count))
                .collect(),
            total,
            unacknowledged,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewBurnRecord, NewMetric, NewService};
    use crate::store::MemoryStore;

    #[test]
    fn template_interpolation() {
        let rendered = render_template(
            "{service} is burning error budget at {rate}× the allowed rate. Current risk level: {risk}.",
            &[
                ("service", "api-gateway".to_string()),
                ("rate", "2.5".to_string()),
                ("risk", "FREEZE".to_string()),
            ],
        );
        assert_eq!(
            rendered,
            "api-gateway is burning error budget at 2.5× the allowed rate. Current risk level: FREEZE."
        );
    }

    #[test]
    fn templates_carry_severity_and_channel() {
        assert_eq!(
            AlertKind::BudgetExhausted.template().severity,
            AlertSeverity::Emergency
        );
        assert_eq!(
            AlertKind::BudgetExhausted.template().default_channel,
            AlertChannel::Slack
        );
        assert_eq!(
            AlertKind::BurnRateHigh.template().severity,
            AlertSeverity::Warning
        );
        assert_eq!(
            AlertKind::DeploymentBlocked.template().severity,
            AlertSeverity::Info
        );
    }

    async fn setup() -> (AlertManager, Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let config = Arc::new(Config::default());
        let manager = AlertManager::new(store.clone(), config);
        let service = store
            .create_service(NewService {
                name: "api-gateway".to_string(),
                description: None,
                team: None,
                tier: 1,
            })
            .await
            .unwrap();
        (manager, store, service.id)
    }

    async fn seed_burn(store: &MemoryStore, service_id: i64, errors: i64) {
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

    #[tokio::test]
    async fn cooldown_suppresses_repeat_alerts() {
        let (manager, store, service_id) = setup().await;
        // Burn rate 2.5: high burn + exhausted budget.
        seed_burn(&store, service_id, 1_500).await;

        let first = manager.evaluate_and_alert(service_id).await.unwrap();
        let high_burn: Vec<_> = first
            .iter()
            .filter(|a| a.alert_type == "burn_rate_high")
            .collect();
        assert_eq!(high_burn.len(), 1);
        assert!(high_burn[0].dispatched);
        assert!(high_burn[0].message.contains("2.5×"));

        // Identical conditions inside the cooldown: nothing new.
        let second = manager.evaluate_and_alert(service_id).await.unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn critical_budget_includes_exhaustion_estimate() {
        let (manager, store, service_id) = setup().await;
        // Burn 0.9: 90% consumed, 10% remaining.
        seed_burn(&store, service_id, 540).await;

        let alerts = manager.evaluate_and_alert(service_id).await.unwrap();
        let critical: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == "budget_critical")
            .collect();
        assert_eq!(critical.len(), 1);
        assert_eq!(critical[0].severity, AlertSeverity::Critical);
        assert!(critical[0].message.contains("10.0% remaining"));
        assert!(!critical[0].message.contains("{time}"));
    }

    #[tokio::test]
    async fn risk_escalation_against_previous_history() {
        let (manager, store, service_id) = setup().await;
        seed_burn(&store, service_id, 1_500).await;

        let now = Utc::now();
        for (offset, risk, burn) in [(60i64, RiskLevel::Safe, 0.2), (0, RiskLevel::Freeze, 2.5)] {
            store
                .append_burn_record(NewBurnRecord {
                    service_id,
                    timestamp: now - Duration::minutes(offset),
                    window_minutes: 60,
                    burn_rate: burn,
                    error_budget_consumed: 50.0,
                    error_budget_remaining: 50.0,
                    time_to_exhaustion_hours: None,
                    risk_level: risk,
                })
                .await
                .unwrap();
        }

        let alerts = manager.evaluate_and_alert(service_id).await.unwrap();
        let escalation: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == "risk_escalation")
            .collect();
        assert_eq!(escalation.len(), 1);
        assert!(escalation[0].message.contains("from SAFE to FREEZE"));
    }

    #[tokio::test]
    async fn recovery_emitted_when_back_to_safe() {
        let (manager, store, service_id) = setup().await;
        // No recent errors: current risk is SAFE.
        seed_burn(&store, service_id, 0).await;

        let now = Utc::now();
        for (offset, risk) in [(60i64, RiskLevel::Danger), (0, RiskLevel::Safe)] {
            store
                .append_burn_record(NewBurnRecord {
                    service_id,
                    timestamp: now - Duration::minutes(offset),
                    window_minutes: 60,
                    burn_rate: 0.1,
                    error_budget_consumed: 10.0,
                    error_budget_remaining: 90.0,
                    time_to_exhaustion_hours: None,
                    risk_level: risk,
                })
                .await
                .unwrap();
        }

        let alerts = manager.evaluate_and_alert(service_id).await.unwrap();
        let recovery: Vec<_> = alerts
            .iter()
            .filter(|a| a.alert_type == "recovery")
            .collect();
        assert_eq!(recovery.len(), 1);
        assert!(recovery[0].message.contains("Risk level is now SAFE"));
    }

    #[tokio::test]
    async fn feed_acknowledge_and_statistics() {
        let (manager, store, service_id) = setup().await;
        seed_burn(&store, service_id, 1_500).await;
        manager.evaluate_and_alert(service_id).await.unwrap();

        let feed = manager.alert_feed(24, 50).await.unwrap();
        assert!(feed.total >= 2);
        assert_eq!(feed.unacknowledged, feed.total);
        assert_eq!(feed.alerts[0].service_name, "api-gateway");

        let first_id = feed.alerts[0].id;
        let acknowledged = manager
            .acknowledge_alert(first_id, "oncall@example.com")
            .await
            .unwrap()
            .unwrap();
        assert!(acknowledged.acknowledged);
        assert_eq!(
            acknowledged.acknowledged_by.as_deref(),
            Some("oncall@example.com")
        );

        let rest: Vec<i64> = feed.alerts.iter().skip(1).map(|a| a.id).collect();
        let updated = manager
            .bulk_acknowledge(&rest, "oncall@example.com")
            .await
            .unwrap();
        assert_eq!(updated as usize, rest.len());

        let stats = manager.alert_statistics(7).await.unwrap();
        assert_eq!(stats.unacknowledged, 0);
        assert_eq!(stats.total, feed.total);
        assert!(stats.by_severity.contains_key("emergency"));
    }

    #[tokio::test]
    async fn unknown_service_produces_no_alerts() {
        let (manager, _store, _service_id) = setup().await;
        let alerts = manager.evaluate_and_alert(999).await.unwrap();
        assert!(alerts.is_empty());
    }
}
