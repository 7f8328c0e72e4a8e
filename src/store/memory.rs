//! In-memory [`Store`] implementation.
//!
//! Backs unit and integration tests; also useful for demos without a
//! database. All state lives behind one RwLock, so the cooldown
//! check-and-insert is naturally a single critical section.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

use crate::error::{Error, Result};
use crate::models::{
    Alert, AlertSeverity, AlertView, BurnRecord, Deployment, Metric, NewAlert, NewBurnRecord,
    NewDeployment, NewMetric, NewService, NewSloTarget, Service, SloTarget,
};
use crate::store::{AlertQuery, BurnAggregates, MetricTotals, Store};

#[derive(Default)]
struct State {
    next_id: i64,
    services: Vec<Service>,
    slo_targets: Vec<SloTarget>,
    metrics: Vec<Metric>,
    burn_history: Vec<BurnRecord>,
    deployments: Vec<Deployment>,
    alerts: Vec<Alert>,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn create_service(&self, new: NewService) -> Result<Service> {
        let mut state = self.state.write().await;
        if state.services.iter().any(|s| s.name == new.name) {
            return Err(Error::Validation(format!(
                "service '{}' already exists",
                new.name
            )));
        }
        let now = Utc::now();
        let service = Service {
            id: state.next_id(),
            name: new.name,
            description: new.description,
            team: new.team,
            tier: new.tier,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.services.push(service.clone());
        Ok(service)
    }

    async fn service_by_id(&self, id: i64) -> Result<Option<Service>> {
        let state = self.state.read().await;
        Ok(state.services.iter().find(|s| s.id == id).cloned())
    }

    async fn service_by_name(&self, name: &str) -> Result<Option<Service>> {
        let state = self.state.read().await;
        Ok(state.services.iter().find(|s| s.name == name).cloned())
    }

    async fn active_services(&self) -> Result<Vec<Service>> {
        let state = self.state.read().await;
        let mut services: Vec<Service> = state
            .services
            .iter()
            .filter(|s| s.is_active)
            .cloned()
            .collect();
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(services)
    }

    async fn set_service_active(&self, id: i64, active: bool) -> Result<Option<Service>> {
        let mut state = self.state.write().await;
        match state.services.iter_mut().find(|s| s.id == id) {
            Some(service) => {
                service.is_active = active;
                service.updated_at = Utc::now();
                Ok(Some(service.clone()))
            }
            None => Ok(None),
        }
    }

    async fn create_slo_target(&self, new: NewSloTarget) -> Result<SloTarget> {
        let mut state = self.state.write().await;
        // One active target per (service, name): replace by deactivating.
        for existing in state
            .slo_targets
            .iter_mut()
            .filter(|t| t.service_id == new.service_id && t.name == new.name && t.is_active)
        {
            existing.is_active = false;
        }
        let now = Utc::now();
        let target = SloTarget {
            id: state.next_id(),
            service_id: new.service_id,
            name: new.name,
            target_value: new.target_value,
            window_days: new.window_days,
            burn_rate_threshold: new.burn_rate_threshold,
            critical_burn_rate: new.critical_burn_rate,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.slo_targets.push(target.clone());
        Ok(target)
    }

    async fn active_slo_targets(&self, service_id: i64) -> Result<Vec<SloTarget>> {
        let state = self.state.read().await;
        Ok(state
            .slo_targets
            .iter()
            .filter(|t| t.service_id == service_id && t.is_active)
            .cloned()
            .collect())
    }

    async fn find_active_slo_target(
        &self,
        service_id: i64,
        name: &str,
    ) -> Result<Option<SloTarget>> {
        let state = self.state.read().await;
        Ok(state
            .slo_targets
            .iter()
            .find(|t| t.service_id == service_id && t.name == name && t.is_active)
            .cloned())
    }

    async fn insert_metrics(&self, metrics: Vec<NewMetric>) -> Result<()> {
        let mut state = self.state.write().await;
        for m in metrics {
            let id = state.next_id();
            state.metrics.push(Metric {
                id,
                service_id: m.service_id,
                timestamp: m.timestamp,
                total_requests: m.total_requests,
                error_count: m.error_count,
                latency_p50: m.latency_p50,
                latency_p95: m.latency_p95,
                latency_p99: m.latency_p99,
                success_rate: m.success_rate,
            });
        }
        Ok(())
    }

    async fn aggregate_metrics(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricTotals> {
        let state = self.state.read().await;
        let mut totals = MetricTotals::default();
        for m in state
            .metrics
            .iter()
            .filter(|m| m.service_id == service_id && m.timestamp >= start && m.timestamp <= end)
        {
            totals.total_requests += m.total_requests;
            totals.error_count += m.error_count;
        }
        Ok(totals)
    }

    async fn metrics_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Metric>> {
        let state = self.state.read().await;
        let mut rows: Vec<Metric> = state
            .metrics
            .iter()
            .filter(|m| m.service_id == service_id && m.timestamp >= start && m.timestamp <= end)
            .cloned()
            .collect();
        rows.sort_by_key(|m| std::cmp::Reverse(m.timestamp));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn latest_metric(&self, service_id: i64) -> Result<Option<Metric>> {
        let state = self.state.read().await;
        Ok(state
            .metrics
            .iter()
            .filter(|m| m.service_id == service_id)
            .max_by_key(|m| m.timestamp)
            .cloned())
    }

    async fn prune_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut state = self.state.write().await;
        let before = state.metrics.len();
        state.metrics.retain(|m| m.timestamp >= cutoff);
        Ok((before - state.metrics.len()) as u64)
    }

    async fn append_burn_record(&self, record: NewBurnRecord) -> Result<BurnRecord> {
        let mut state = self.state.write().await;
        let row = BurnRecord {
            id: state.next_id(),
            service_id: record.service_id,
            timestamp: record.timestamp,
            window_minutes: record.window_minutes,
            burn_rate: record.burn_rate,
            error_budget_consumed: record.error_budget_consumed,
            error_budget_remaining: record.error_budget_remaining,
            time_to_exhaustion_hours: record.time_to_exhaustion_hours,
            risk_level: record.risk_level,
        };
        state.burn_history.push(row.clone());
        Ok(row)
    }

    async fn burn_history(
        &self,
        service_id: i64,
        window_minutes: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<BurnRecord>> {
        let state = self.state.read().await;
        let mut rows: Vec<BurnRecord> = state
            .burn_history
            .iter()
            .filter(|r| {
                r.service_id == service_id
                    && r.window_minutes == window_minutes
                    && r.timestamp >= since
            })
            .cloned()
            .collect();
        rows.sort_by_key(|r| r.timestamp);
        Ok(rows)
    }

    async fn burn_aggregates(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<BurnAggregates>> {
        let state = self.state.read().await;
        let rows: Vec<&BurnRecord> = state
            .burn_history
            .iter()
            .filter(|r| r.service_id == service_id && r.timestamp >= since)
            .collect();
        if rows.is_empty() {
            return Ok(None);
        }
        let n = rows.len() as f64;
        let sum_burn: f64 = rows.iter().map(|r| r.burn_rate).sum();
        let sum_consumed: f64 = rows.iter().map(|r| r.error_budget_consumed).sum();
        let peak = rows.iter().map(|r| r.burn_rate).fold(f64::MIN, f64::max);
        let min = rows.iter().map(|r| r.burn_rate).fold(f64::MAX, f64::min);
        Ok(Some(BurnAggregates {
            average_burn_rate: sum_burn / n,
            peak_burn_rate: peak,
            min_burn_rate: min,
            average_budget_consumed: sum_consumed / n,
        }))
    }

    async fn record_deployment(&self, new: NewDeployment) -> Result<Deployment> {
        let mut state = self.state.write().await;
        if state
            .deployments
            .iter()
            .any(|d| d.deployment_id == new.deployment_id)
        {
            return Err(Error::Validation(format!(
                "deployment '{}' already recorded",
                new.deployment_id
            )));
        }
        let status = if new.allowed { "approved" } else { "rejected" };
        let row = Deployment {
            id: state.next_id(),
            service_id: new.service_id,
            service_name: new.service_name,
            deployment_id: new.deployment_id,
            version: new.version,
            requested_at: Utc::now(),
            requested_by: new.requested_by,
            allowed: new.allowed,
            blocked_reason: new.blocked_reason,
            risk_level_at_request: new.risk_level_at_request,
            burn_rate_at_request: new.burn_rate_at_request,
            status: status.to_string(),
        };
        state.deployments.push(row.clone());
        Ok(row)
    }

    async fn deployment_history(
        &self,
        service_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Deployment>> {
        let state = self.state.read().await;
        let mut rows: Vec<Deployment> = state
            .deployments
            .iter()
            .filter(|d| service_id.map_or(true, |id| d.service_id == Some(id)))
            .cloned()
            .collect();
        rows.sort_by_key(|d| std::cmp::Reverse(d.requested_at));
        rows.truncate(limit.max(0) as usize);
        Ok(rows)
    }

    async fn deployments_since(&self, since: DateTime<Utc>) -> Result<Vec<Deployment>> {
        let state = self.state.read().await;
        Ok(state
            .deployments
            .iter()
            .filter(|d| d.requested_at >= since)
            .cloned()
            .collect())
    }

    async fn insert_alert_unless_recent(
        &self,
        new: NewAlert,
        cooldown_start: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let mut state = self.state.write().await;
        let recent = state.alerts.iter().any(|a| {
            a.service_id == new.service_id
                && a.alert_type == new.alert_type
                && a.timestamp >= cooldown_start
        });
        if recent {
            return Ok(None);
        }
        let row = Alert {
            id: state.next_id(),
            service_id: new.service_id,
            timestamp: Utc::now(),
            alert_type: new.alert_type,
            severity: new.severity,
            channel: new.channel,
            title: new.title,
            message: new.message,
            metadata: new.metadata,
            dispatched: false,
            dispatched_at: None,
            acknowledged: false,
            acknowledged_by: None,
            acknowledged_at: None,
        };
        state.alerts.push(row.clone());
        Ok(Some(row))
    }

    async fn mark_alert_dispatched(&self, alert_id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(alert) = state.alerts.iter_mut().find(|a| a.id == alert_id) {
            alert.dispatched = true;
            alert.dispatched_at = Some(at);
        }
        Ok(())
    }

    async fn alerts_with_service(&self, query: AlertQuery) -> Result<Vec<AlertView>> {
        let state = self.state.read().await;
        let names: HashMap<i64, String> = state
            .services
            .iter()
            .map(|s| (s.id, s.name.clone()))
            .collect();
        let mut rows: Vec<AlertView> = state
            .alerts
            .iter()
            .filter(|a| {
                a.timestamp >= query.since
                    && query.service_id.map_or(true, |id| a.service_id == id)
                    && query.severity.map_or(true, |sev| a.severity == sev)
                    && query.acknowledged.map_or(true, |ack| a.acknowledged == ack)
            })
            .map(|a| AlertView {
                id: a.id,
                service_id: a.service_id,
                service_name: names.get(&a.service_id).cloned().unwrap_or_default(),
                timestamp: a.timestamp,
                alert_type: a.alert_type.clone(),
                severity: a.severity,
                channel: a.channel,
                title: a.title.clone(),
                message: a.message.clone(),
                metadata: a.metadata.clone(),
                dispatched: a.dispatched,
                acknowledged: a.acknowledged,
                acknowledged_by: a.acknowledged_by.clone(),
            })
            .collect();
        rows.sort_by_key(|a| std::cmp::Reverse(a.timestamp));
        rows.truncate(query.limit.max(0) as usize);
        Ok(rows)
    }

    async fn count_alerts(&self, since: DateTime<Utc>) -> Result<(usize, usize)> {
        let state = self.state.read().await;
        let total = state.alerts.iter().filter(|a| a.timestamp >= since).count();
        let unacknowledged = state
            .alerts
            .iter()
            .filter(|a| a.timestamp >= since && !a.acknowledged)
            .count();
        Ok((total, unacknowledged))
    }

    async fn acknowledge_alert(
        &self,
        alert_id: i64,
        acknowledged_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let mut state = self.state.write().await;
        match state.alerts.iter_mut().find(|a| a.id == alert_id) {
            Some(alert) => {
                alert.acknowledged = true;
                alert.acknowledged_by = Some(acknowledged_by.to_string());
                alert.acknowledged_at = Some(at);
                Ok(Some(alert.clone()))
            }
            None => Ok(None),
        }
    }

    async fn acknowledge_alerts(
        &self,
        alert_ids: &[i64],
        acknowledged_by: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut state = self.state.write().await;
        let mut updated = 0;
        for alert in state
            .alerts
            .iter_mut()
            .filter(|a| alert_ids.contains(&a.id))
        {
            alert.acknowledged = true;
            alert.acknowledged_by = Some(acknowledged_by.to_string());
            alert.acknowledged_at = Some(at);
            updated += 1;
        }
        Ok(updated)
    }

    async fn alert_severity_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<AlertSeverity, usize>> {
        let state = self.state.read().await;
        let mut counts = HashMap::new();
        for alert in state.alerts.iter().filter(|a| a.timestamp >= since) {
            *counts.entry(alert.severity).or_insert(0) += 1;
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    fn new_service(name: &str) -> NewService {
        NewService {
            name: name.to_string(),
            description: None,
            team: None,
            tier: 2,
        }
    }

    #[tokio::test]
    async fn duplicate_service_names_rejected() {
        let store = MemoryStore::new();
        store.create_service(new_service("api-gateway")).await.unwrap();
        assert!(store.create_service(new_service("api-gateway")).await.is_err());
    }

    #[tokio::test]
    async fn deactivated_services_leave_the_active_set() {
        let store = MemoryStore::new();
        let service = store.create_service(new_service("api-gateway")).await.unwrap();
        assert_eq!(store.active_services().await.unwrap().len(), 1);

        let updated = store
            .set_service_active(service.id, false)
            .await
            .unwrap()
            .unwrap();
        assert!(!updated.is_active);
        assert!(store.active_services().await.unwrap().is_empty());

        assert!(store.set_service_active(999, false).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn metric_aggregation_respects_window() {
        let store = MemoryStore::new();
        let service = store.create_service(new_service("api-gateway")).await.unwrap();
        let now = Utc::now();

        store
            .insert_metrics(vec![
                NewMetric {
                    service_id: service.id,
                    timestamp: now - Duration::minutes(2),
                    total_requests: 100,
                    error_count: 1,
                    latency_p50: None,
                    latency_p95: None,
                    latency_p99: None,
                    success_rate: Some(99.0),
                },
                NewMetric {
                    service_id: service.id,
                    timestamp: now - Duration::hours(3),
                    total_requests: 500,
                    error_count: 50,
                    latency_p50: None,
                    latency_p95: None,
                    latency_p99: None,
                    success_rate: Some(90.0),
                },
            ])
            .await
            .unwrap();

        let totals = store
            .aggregate_metrics(service.id, now - Duration::minutes(5), now)
            .await
            .unwrap();
        assert_eq!(totals.total_requests, 100);
        assert_eq!(totals.error_count, 1);

        let all = store
            .aggregate_metrics(service.id, now - Duration::hours(4), now)
            .await
            .unwrap();
        assert_eq!(all.total_requests, 600);
        assert_eq!(all.error_count, 51);
    }

    #[tokio::test]
    async fn one_active_slo_target_per_service_and_name() {
        let store = MemoryStore::new();
        let service = store.create_service(new_service("api-gateway")).await.unwrap();

        for target in [99.0, 99.9] {
            store
                .create_slo_target(NewSloTarget {
                    service_id: service.id,
                    name: "availability".to_string(),
                    target_value: target,
                    window_days: 30,
                    burn_rate_threshold: 1.0,
                    critical_burn_rate: 2.0,
                })
                .await
                .unwrap();
        }

        let active = store.active_slo_targets(service.id).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].target_value, 99.9);
    }

    #[tokio::test]
    async fn cooldown_insert_is_atomic() {
        let store = MemoryStore::new();
        let service = store.create_service(new_service("api-gateway")).await.unwrap();
        let alert = NewAlert {
            service_id: service.id,
            alert_type: "burn_rate_high".to_string(),
            severity: AlertSeverity::Warning,
            channel: crate::models::AlertChannel::Ui,
            title: "t".to_string(),
            message: "m".to_string(),
            metadata: json!({"alert_type": "burn_rate_high"}),
        };

        let cooldown_start = Utc::now() - Duration::minutes(15);
        let first = store
            .insert_alert_unless_recent(alert.clone(), cooldown_start)
            .await
            .unwrap();
        assert!(first.is_some());

        let second = store
            .insert_alert_unless_recent(alert, cooldown_start)
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn burn_history_is_ascending() {
        let store = MemoryStore::new();
        let service = store.create_service(new_service("api-gateway")).await.unwrap();
        let now = Utc::now();

        for offset in [3i64, 1, 2] {
            store
                .append_burn_record(NewBurnRecord {
                    service_id: service.id,
                    timestamp: now - Duration::hours(offset),
                    window_minutes: 60,
                    burn_rate: offset as f64,
                    error_budget_consumed: 10.0,
                    error_budget_remaining: 90.0,
                    time_to_exhaustion_hours: None,
                    risk_level: crate::models::RiskLevel::Safe,
                })
                .await
                .unwrap();
        }

        let history = store
            .burn_history(service.id, 60, now - Duration::hours(6))
            .await
            .unwrap();
        let times: Vec<_> = history.iter().map(|r| r.timestamp).collect();
        let mut sorted = times.clone();
        sorted.sort();
        assert_eq!(times, sorted);
    }
}
