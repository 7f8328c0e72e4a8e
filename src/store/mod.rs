//! Persistence layer.
//!
//! Engines talk to a single [`Store`] trait; the Postgres implementation
//! backs the running service and the in-memory implementation backs tests
//! and local experimentation. Both uphold the same ordering contracts:
//! burn history ascending by timestamp, feeds descending.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

use crate::error::Result;
use crate::models::{
    Alert, AlertSeverity, AlertView, BurnRecord, Deployment, Metric, NewAlert, NewBurnRecord,
    NewDeployment, NewMetric, NewService, NewSloTarget, Service, SloTarget,
};

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Request/error totals aggregated over a metric range.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricTotals {
    pub total_requests: i64,
    pub error_count: i64,
}

/// Burn-rate aggregates over a history range.
#[derive(Debug, Clone, Copy)]
pub struct BurnAggregates {
    pub average_burn_rate: f64,
    pub peak_burn_rate: f64,
    pub min_burn_rate: f64,
    pub average_budget_consumed: f64,
}

#[derive(Debug, Clone)]
pub struct AlertQuery {
    pub service_id: Option<i64>,
    pub severity: Option<AlertSeverity>,
    pub acknowledged: Option<bool>,
    pub since: DateTime<Utc>,
    pub limit: i64,
}

#[async_trait]
pub trait Store: Send + Sync {
    // Services

    async fn create_service(&self, new: NewService) -> Result<Service>;
    async fn service_by_id(&self, id: i64) -> Result<Option<Service>>;
    async fn service_by_name(&self, name: &str) -> Result<Option<Service>>;
    async fn active_services(&self) -> Result<Vec<Service>>;
    /// Soft-delete (or reactivate) a service by toggling its active flag.
    async fn set_service_active(&self, id: i64, active: bool) -> Result<Option<Service>>;

    // SLO targets

    async fn create_slo_target(&self, new: NewSloTarget) -> Result<SloTarget>;
    async fn active_slo_targets(&self, service_id: i64) -> Result<Vec<SloTarget>>;
    async fn find_active_slo_target(
        &self,
        service_id: i64,
        name: &str,
    ) -> Result<Option<SloTarget>>;

    // Metrics (append-only facts)

    async fn insert_metrics(&self, metrics: Vec<NewMetric>) -> Result<()>;
    async fn aggregate_metrics(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricTotals>;
    async fn metrics_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Metric>>;
    async fn latest_metric(&self, service_id: i64) -> Result<Option<Metric>>;
    async fn prune_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64>;

    // Burn history

    async fn append_burn_record(&self, record: NewBurnRecord) -> Result<BurnRecord>;
    /// Records for one (service, window) at or after `since`, ascending by time.
    async fn burn_history(
        &self,
        service_id: i64,
        window_minutes: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<BurnRecord>>;
    async fn burn_aggregates(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<BurnAggregates>>;

    // Deployments

    async fn record_deployment(&self, new: NewDeployment) -> Result<Deployment>;
    /// Most recent first, optionally restricted to one service.
    async fn deployment_history(
        &self,
        service_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Deployment>>;
    async fn deployments_since(&self, since: DateTime<Utc>) -> Result<Vec<Deployment>>;

    // Alerts

    /// Insert unless an alert with the same (service, alert_type) exists at or
    /// after `cooldown_start`. The check and the insert are one atomic step so
    /// concurrent evaluators cannot race in duplicates.
    async fn insert_alert_unless_recent(
        &self,
        new: NewAlert,
        cooldown_start: DateTime<Utc>,
    ) -> Result<Option<Alert>>;
    async fn mark_alert_dispatched(&self, alert_id: i64, at: DateTime<Utc>) -> Result<()>;
    /// Alerts joined with service name, most recent first.
    async fn alerts_with_service(&self, query: AlertQuery) -> Result<Vec<AlertView>>;
    /// (total, unacknowledged) counts at or after `since`.
    async fn count_alerts(&self, since: DateTime<Utc>) -> Result<(usize, usize)>;
    async fn acknowledge_alert(
        &self,
        alert_id: i64,
        acknowledged_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Alert>>;
    async fn acknowledge_alerts(
        &self,
        alert_ids: &[i64],
        acknowledged_by: &str,
        at: DateTime<Utc>,
    ) -> Result<u64>;
    async fn alert_severity_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<AlertSeverity, usize>>;
}
