//! Release Gate.
//!
//! Turns the multi-window reliability state into a deploy / don't-deploy
//! decision. Every invocation writes exactly one deployment row for audit,
//! including checks against unknown services and internal failures.

use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

use crate::alerts::AlertManager;
use crate::burn::BurnRateEngine;
use crate::config::{Config, ReleaseGateConfig};
use crate::error::Result;
use crate::forecast::ForecastEngine;
use crate::models::{
    round_dp, Deployment, GateStatistics, NewDeployment, ReleaseCheckRequest,
    ReleaseCheckResponse, RiskLevel, Service,
};
use crate::store::Store;

/// Exhaustion sooner than this adds an advisory warning to allowed deploys.
const IMMINENT_EXHAUSTION_HOURS: f64 = 4.0;

/// Gate decision rules, first match wins. Returns (allowed, reason,
/// recommendations).
pub fn evaluate_gate(
    burn_rate: f64,
    risk_level: RiskLevel,
    budget_remaining: f64,
    time_to_exhaustion: Option<f64>,
    override_requested: bool,
    override_reason: Option<&str>,
    gate: &ReleaseGateConfig,
) -> (bool, String, Vec<String>) {
    let mut recommendations = Vec::new();
    let override_valid =
        override_requested && override_reason.map_or(false, |r| !r.trim().is_empty());

    // FREEZE: block unless explicitly overridden with a reason.
    if risk_level == RiskLevel::Freeze {
        if override_valid {
            return (
                true,
                format!(
                    "OVERRIDE: Deployment allowed despite FREEZE state. Reason: {}",
                    override_reason.unwrap_or_default()
                ),
                vec!["Deployment approved via override - monitor closely".to_string()],
            );
        }
        return (
            false,
            "Deployment blocked: System is in FREEZE state due to critical reliability issues"
                .to_string(),
            vec![
                "Investigate and resolve active incidents before deploying".to_string(),
                "Error budget is critically low or exhausted".to_string(),
                "Consider rolling back recent changes".to_string(),
            ],
        );
    }

    // DANGER: same override semantics.
    if risk_level == RiskLevel::Danger {
        recommendations.push("System is in DANGER state - consider waiting".to_string());
        if override_valid {
            recommendations.push("Monitor deployment closely and be ready to rollback".to_string());
            return (
                true,
                format!(
                    "OVERRIDE: Deployment allowed despite DANGER state. Reason: {}",
                    override_reason.unwrap_or_default()
                ),
                recommendations,
            );
        }
        recommendations.push("Error budget is running low".to_string());
        recommendations
            .push("Wait for system to stabilize or provide override with justification".to_string());
        return (
            false,
            "Deployment blocked: System is in DANGER state with elevated error rates".to_string(),
            recommendations,
        );
    }

    // Hard thresholds: no override path for these.
    if burn_rate > gate.burn_rate_threshold {
        return (
            false,
            format!(
                "Deployment blocked: Burn rate ({burn_rate:.2}x) exceeds threshold ({}x)",
                gate.burn_rate_threshold
            ),
            vec![
                "Current error rate is too high for safe deployment".to_string(),
                "Investigate recent changes that may have caused elevated errors".to_string(),
            ],
        );
    }

    let budget_consumed = 100.0 - budget_remaining;
    if budget_consumed > gate.budget_threshold {
        return (
            false,
            format!(
                "Deployment blocked: Error budget {budget_consumed:.1}% consumed exceeds threshold ({}%)",
                gate.budget_threshold
            ),
            vec![
                "Error budget is nearly exhausted".to_string(),
                "Prioritize reliability improvements before new deployments".to_string(),
            ],
        );
    }

    if let Some(hours) = time_to_exhaustion {
        if hours < IMMINENT_EXHAUSTION_HOURS {
            recommendations.push(format!(
                "Warning: Error budget will be exhausted in ~{hours:.1} hours"
            ));
        }
    }

    if risk_level == RiskLevel::Observe {
        recommendations
            .push("System is in OBSERVE state - increased monitoring recommended".to_string());
        recommendations.push("Consider smaller deployment batches".to_string());
        return (
            true,
            "Deployment allowed with caution: System reliability is being observed".to_string(),
            recommendations,
        );
    }

    if recommendations.is_empty() {
        recommendations.push("System is operating normally".to_string());
    }
    (
        true,
        "Deployment allowed: System reliability is healthy".to_string(),
        recommendations,
    )
}

#[derive(Clone)]
pub struct ReleaseGate {
    store: Arc<dyn Store>,
    config: Arc<Config>,
    burn_engine: BurnRateEngine,
    forecast_engine: ForecastEngine,
    alert_manager: AlertManager,
}

impl ReleaseGate {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        let burn_engine = BurnRateEngine::new(store.clone(), config.clone());
        let forecast_engine = ForecastEngine::new(store.clone(), config.clone());
        let alert_manager = AlertManager::new(store.clone(), config.clone());
        Self {
            store,
            config,
            burn_engine,
            forecast_engine,
            alert_manager,
        }
    }

    /// Evaluate whether a deployment may proceed, and record the decision.
    ///
    /// Internal failures become a block decision rather than an error; the
    /// only way this returns Err is when even the audit row cannot be
    /// persisted.
    pub async fn check_release(&self, request: ReleaseCheckRequest) -> Result<ReleaseCheckResponse> {
        let now = Utc::now();
        let deployment_id = if request.deployment_id.trim().is_empty() {
            Uuid::new_v4().to_string()
        } else {
            request.deployment_id.clone()
        };
        let checked_by = request
            .requested_by
            .clone()
            .unwrap_or_else(|| "system".to_string());

        let service = match self.store.service_by_name(&request.service_name).await {
            Ok(service) => service,
            Err(e) => {
                error!(service = %request.service_name, error = %e, "release check failed to load service, blocking");
                let reason = "Deployment blocked: internal error".to_string();
                self.store
                    .record_deployment(NewDeployment {
                        service_id: None,
                        service_name: request.service_name.clone(),
                        deployment_id: deployment_id.clone(),
                        version: request.version.clone(),
                        requested_by: request.requested_by.clone(),
                        allowed: false,
                        blocked_reason: Some(reason.clone()),
                        risk_level_at_request: RiskLevel::Freeze,
                        burn_rate_at_request: 0.0,
                    })
                    .await?;
                return Ok(ReleaseCheckResponse {
                    allowed: false,
                    reason,
                    service_name: request.service_name,
                    deployment_id,
                    current_risk_level: RiskLevel::Freeze,
                    current_burn_rate: 0.0,
                    error_budget_remaining: 0.0,
                    time_to_exhaustion_hours: None,
                    recommendations: vec!["Retry once the platform is healthy".to_string()],
                    checked_at: now,
                    checked_by,
                });
            }
        };

        let Some(service) = service else {
            let reason = format!("Service '{}' not found", request.service_name);
            self.store
                .record_deployment(NewDeployment {
                    service_id: None,
                    service_name: request.service_name.clone(),
                    deployment_id: deployment_id.clone(),
                    version: request.version.clone(),
                    requested_by: request.requested_by.clone(),
                    allowed: false,
                    blocked_reason: Some(reason.clone()),
                    risk_level_at_request: RiskLevel::Freeze,
                    burn_rate_at_request: 0.0,
                })
                .await?;
            return Ok(ReleaseCheckResponse {
                allowed: false,
                reason,
                service_name: request.service_name,
                deployment_id,
                current_risk_level: RiskLevel::Freeze,
                current_burn_rate: 0.0,
                error_budget_remaining: 0.0,
                time_to_exhaustion_hours: None,
                recommendations: vec!["Register the service before deploying".to_string()],
                checked_at: now,
                checked_by,
            });
        };

        match self.evaluate_service_state(&service).await {
            Ok((weighted_burn, worst_risk, budget_remaining, time_to_exhaustion)) => {
                let (allowed, reason, recommendations) = evaluate_gate(
                    weighted_burn,
                    worst_risk,
                    budget_remaining,
                    time_to_exhaustion,
                    request.override_requested,
                    request.override_reason.as_deref(),
                    &self.config.release_gate,
                );

                self.store
                    .record_deployment(NewDeployment {
                        service_id: Some(service.id),
                        service_name: service.name.clone(),
                        deployment_id: deployment_id.clone(),
                        version: request.version.clone(),
                        requested_by: request.requested_by.clone(),
                        allowed,
                        blocked_reason: (!allowed).then(|| reason.clone()),
                        risk_level_at_request: worst_risk,
                        burn_rate_at_request: weighted_burn,
                    })
                    .await?;

                if !allowed {
                    if let Err(e) = self
                        .alert_manager
                        .deployment_blocked(service.id, &service.name, &deployment_id, &reason)
                        .await
                    {
                        warn!(service = %service.name, error = %e, "failed to raise deployment_blocked alert");
                    }
                }

                Ok(ReleaseCheckResponse {
                    allowed,
                    reason,
                    service_name: service.name,
                    deployment_id,
                    current_risk_level: worst_risk,
                    current_burn_rate: weighted_burn,
                    error_budget_remaining: budget_remaining,
                    time_to_exhaustion_hours: time_to_exhaustion,
                    recommendations,
                    checked_at: now,
                    checked_by,
                })
            }
            Err(e) => {
                error!(service = %service.name, error = %e, "release check failed, blocking");
                let reason = "Deployment blocked: internal error".to_string();
                self.store
                    .record_deployment(NewDeployment {
                        service_id: Some(service.id),
                        service_name: service.name.clone(),
                        deployment_id: deployment_id.clone(),
                        version: request.version.clone(),
                        requested_by: request.requested_by.clone(),
                        allowed: false,
                        blocked_reason: Some(reason.clone()),
                        risk_level_at_request: RiskLevel::Freeze,
                        burn_rate_at_request: 0.0,
                    })
                    .await?;
                Ok(ReleaseCheckResponse {
                    allowed: false,
                    reason,
                    service_name: service.name,
                    deployment_id,
                    current_risk_level: RiskLevel::Freeze,
                    current_burn_rate: 0.0,
                    error_budget_remaining: 0.0,
                    time_to_exhaustion_hours: None,
                    recommendations: vec!["Retry once the platform is healthy".to_string()],
                    checked_at: now,
                    checked_by,
                })
            }
        }
    }

    async fn evaluate_service_state(
        &self,
        service: &Service,
    ) -> Result<(f64, RiskLevel, f64, Option<f64>)> {
        // Budget remaining shown in the response comes from the one-hour
        // window; burn and risk are the multi-window aggregates.
        let burn_1h = self.burn_engine.compute_burn_rate(service.id, 60).await?;
        let (weighted_burn, worst_risk) = self.burn_engine.weighted_burn_rate(service.id).await?;
        let forecast = self.forecast_engine.forecast_exhaustion(service.id).await?;

        Ok((
            weighted_burn,
            worst_risk,
            burn_1h.error_budget_remaining,
            forecast.time_to_exhaustion_hours,
        ))
    }

    pub async fn deployment_history(
        &self,
        service_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Deployment>> {
        self.store.deployment_history(service_id, limit).await
    }

    /// Gate decision statistics over a trailing period.
    pub async fn gate_statistics(&self, days: i64) -> Result<GateStatistics> {
        let since = Utc::now() - Duration::days(days);
        let deployments = self.store.deployments_since(since).await?;

        let total = deployments.len();
        let blocked = deployments.iter().filter(|d| !d.allowed).count();
        let mut risk_distribution: HashMap<String, usize> = HashMap::new();
        for deployment in &deployments {
            *risk_distribution
                .entry(deployment.risk_level_at_request.as_str().to_string())
                .or_insert(0) += 1;
        }

        let block_rate = if total > 0 {
            round_dp(blocked as f64 / total as f64 * 100.0, 2)
        } else {
            0.0
        };

        Ok(GateStatistics {
            period_days: days,
            total_deployments: total,
            blocked_deployments: blocked,
            allowed_deployments: total - blocked,
            block_rate,
            risk_distribution,
        })
    }
}
