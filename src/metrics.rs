//! Metric ingestion and retention.
//!
//! Accepts telemetry snapshot batches, validates them, auto-registers
//! previously unseen services (seeding their default SLO targets), and
//! serves windowed aggregations to the engines and the API.

use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::models::{
    round_dp, AggregatedMetrics, IngestReport, Metric, MetricSnapshot, NewMetric, NewService,
    Service,
};
use crate::slo::default_slo_targets;
use crate::store::Store;

const AGGREGATION_SCAN_LIMIT: i64 = 100_000;

#[derive(Clone)]
pub struct MetricsService {
    store: Arc<dyn Store>,
    config: Arc<Config>,
}

impl MetricsService {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        Self { store, config }
    }

    /// Register a service explicitly and seed its default SLO targets.
    pub async fn register_service(&self, new: NewService) -> Result<Service> {
        new.validate().map_err(Error::Validation)?;
        let service = self.store.create_service(new).await?;
        for target in default_slo_targets(service.id, &self.config) {
            self.store.create_slo_target(target).await?;
        }
        info!(service = %service.name, "registered service");
        Ok(service)
    }

    /// Ingest a batch of snapshots. Malformed rows are counted and skipped;
    /// the remainder is committed as one batch.
    pub async fn ingest(&self, snapshots: Vec<MetricSnapshot>) -> Result<IngestReport> {
        let mut batch = Vec::with_capacity(snapshots.len());
        let mut rejected = 0;

        for snapshot in snapshots {
            if let Err(reason) = snapshot.validate() {
                warn!(service = %snapshot.service, %reason, "rejected metric snapshot");
                rejected += 1;
                continue;
            }

            let service = self.find_or_register(&snapshot.service).await?;
            let success_rate = if snapshot.total_requests > 0 {
                Some(round_dp(
                    (snapshot.total_requests - snapshot.error_count) as f64
                        / snapshot.total_requests as f64
                        * 100.0,
                    4,
                ))
            } else {
                None
            };

            batch.push(NewMetric {
                service_id: service.id,
                timestamp: snapshot.timestamp,
                total_requests: snapshot.total_requests,
                error_count: snapshot.error_count,
                latency_p50: snapshot.latency_p50,
                latency_p95: snapshot.latency_p95,
                latency_p99: snapshot.latency_p99,
                success_rate,
            });
        }

        let processed = batch.len();
        self.store.insert_metrics(batch).await?;
        Ok(IngestReport {
            processed,
            rejected,
        })
    }

    async fn find_or_register(&self, name: &str) -> Result<Service> {
        if let Some(service) = self.store.service_by_name(name).await? {
            return Ok(service);
        }
        match self
            .store
            .create_service(NewService {
                name: name.to_string(),
                description: None,
                team: None,
                tier: 2,
            })
            .await
        {
            Ok(service) => {
                for target in default_slo_targets(service.id, &self.config) {
                    self.store.create_slo_target(target).await?;
                }
                info!(service = %service.name, "auto-registered service from telemetry");
                Ok(service)
            }
            // A concurrent ingester may have registered it between the
            // lookup and the insert.
            Err(Error::Validation(_)) => self
                .store
                .service_by_name(name)
                .await?
                .ok_or_else(|| Error::ServiceNotFound(name.to_string())),
            Err(e) => Err(e),
        }
    }

    async fn require_service(&self, service_id: i64) -> Result<Service> {
        self.store
            .service_by_id(service_id)
            .await?
            .ok_or_else(|| Error::ServiceNotFound(service_id.to_string()))
    }

    pub async fn get_metrics(
        &self,
        service_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
        limit: i64,
    ) -> Result<Vec<Metric>> {
        self.require_service(service_id).await?;
        let end = end.unwrap_or_else(Utc::now);
        let start = start.unwrap_or(end - Duration::days(self.config.metrics.retention_days));
        self.store
            .metrics_in_range(service_id, start, end, limit)
            .await
    }

    pub async fn latest_metric(&self, service_id: i64) -> Result<Option<Metric>> {
        self.store.latest_metric(service_id).await
    }

    /// Aggregate a rolling window for one service.
    pub async fn aggregated_metrics(
        &self,
        service_id: i64,
        window_minutes: i64,
    ) -> Result<AggregatedMetrics> {
        self.require_service(service_id).await?;
        let end = Utc::now();
        let start = end - Duration::minutes(window_minutes);
        let rows = self
            .store
            .metrics_in_range(service_id, start, end, AGGREGATION_SCAN_LIMIT)
            .await?;

        let total_requests: i64 = rows.iter().map(|m| m.total_requests).sum();
        let error_count: i64 = rows.iter().map(|m| m.error_count).sum();
        let availability = if total_requests > 0 {
            Some(round_dp(
                (total_requests - error_count) as f64 / total_requests as f64 * 100.0,
                4,
            ))
        } else {
            None
        };

        let latencies: Vec<f64> = rows.iter().filter_map(|m| m.latency_p99).collect();
        let avg_latency_p99 = if latencies.is_empty() {
            None
        } else {
            Some(round_dp(
                latencies.iter().sum::<f64>() / latencies.len() as f64,
                2,
            ))
        };

        Ok(AggregatedMetrics {
            total_requests,
            error_count,
            availability,
            avg_latency_p99,
            window_minutes,
            data_points: rows.len(),
        })
    }

    /// Drop metrics past the retention horizon. Returns the number deleted.
    pub async fn cleanup_old_metrics(&self, retention_days: Option<i64>) -> Result<u64> {
        let retention = retention_days.unwrap_or(self.config.metrics.retention_days);
        let cutoff = Utc::now() - Duration::days(retention);
        let deleted = self.store.prune_metrics(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "pruned expired metrics");
        }
        Ok(deleted)
    }
}
