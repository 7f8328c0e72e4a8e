//! PostgreSQL [`Store`] implementation.
//!
//! Uses the runtime query API with explicit row mapping so the crate builds
//! without a live database. Aggregations run server-side; sums and averages
//! are cast back to BIGINT / DOUBLE PRECISION to keep decoding simple.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::models::{
    Alert, AlertChannel, AlertSeverity, AlertView, BurnRecord, Deployment, Metric, NewAlert,
    NewBurnRecord, NewDeployment, NewMetric, NewService, NewSloTarget, RiskLevel, Service,
    SloTarget,
};
use crate::store::{AlertQuery, BurnAggregates, MetricTotals, Store};

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Internal(format!("migration failed: {e}")))?;
        Ok(())
    }
}

fn map_insert_error(e: sqlx::Error, what: &str) -> Error {
    match &e {
        sqlx::Error::Database(db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            Error::Validation(format!("{what} already exists"))
        }
        _ => Error::Storage(e),
    }
}

fn parse_risk(value: String) -> Result<RiskLevel> {
    value.parse().map_err(Error::Internal)
}

fn parse_severity(value: String) -> Result<AlertSeverity> {
    value.parse().map_err(Error::Internal)
}

fn parse_channel(value: String) -> Result<AlertChannel> {
    value.parse().map_err(Error::Internal)
}

fn service_from_row(row: &PgRow) -> Result<Service> {
    Ok(Service {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        description: row.try_get("description")?,
        team: row.try_get("team")?,
        tier: row.try_get("tier")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn slo_target_from_row(row: &PgRow) -> Result<SloTarget> {
    Ok(SloTarget {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        name: row.try_get("name")?,
        target_value: row.try_get("target_value")?,
        window_days: row.try_get("window_days")?,
        burn_rate_threshold: row.try_get("burn_rate_threshold")?,
        critical_burn_rate: row.try_get("critical_burn_rate")?,
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn metric_from_row(row: &PgRow) -> Result<Metric> {
    Ok(Metric {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        timestamp: row.try_get("timestamp")?,
        total_requests: row.try_get("total_requests")?,
        error_count: row.try_get("error_count")?,
        latency_p50: row.try_get("latency_p50")?,
        latency_p95: row.try_get("latency_p95")?,
        latency_p99: row.try_get("latency_p99")?,
        success_rate: row.try_get("success_rate")?,
    })
}

fn burn_record_from_row(row: &PgRow) -> Result<BurnRecord> {
    Ok(BurnRecord {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        timestamp: row.try_get("timestamp")?,
        window_minutes: row.try_get("window_minutes")?,
        burn_rate: row.try_get("burn_rate")?,
        error_budget_consumed: row.try_get("error_budget_consumed")?,
        error_budget_remaining: row.try_get("error_budget_remaining")?,
        time_to_exhaustion_hours: row.try_get("time_to_exhaustion_hours")?,
        risk_level: parse_risk(row.try_get("risk_level")?)?,
    })
}

fn deployment_from_row(row: &PgRow) -> Result<Deployment> {
    Ok(Deployment {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        service_name: row.try_get("service_name")?,
        deployment_id: row.try_get("deployment_id")?,
        version: row.try_get("version")?,
        requested_at: row.try_get("requested_at")?,
        requested_by: row.try_get("requested_by")?,
        allowed: row.try_get("allowed")?,
        blocked_reason: row.try_get("blocked_reason")?,
        risk_level_at_request: parse_risk(row.try_get("risk_level_at_request")?)?,
        burn_rate_at_request: row.try_get("burn_rate_at_request")?,
        status: row.try_get("status")?,
    })
}

fn alert_from_row(row: &PgRow) -> Result<Alert> {
    Ok(Alert {
        id: row.try_get("id")?,
        service_id: row.try_get("service_id")?,
        timestamp: row.try_get("timestamp")?,
        alert_type: row.try_get("alert_type")?,
        severity: parse_severity(row.try_get("severity")?)?,
        channel: parse_channel(row.try_get("channel")?)?,
        title: row.try_get("title")?,
        message: row.try_get("message")?,
        metadata: row
            .try_get::<Option<JsonValue>, _>("metadata")?
            .unwrap_or(JsonValue::Null),
        dispatched: row.try_get("dispatched")?,
        dispatched_at: row.try_get("dispatched_at")?,
        acknowledged: row.try_get("acknowledged")?,
        acknowledged_by: row.try_get("acknowledged_by")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
    })
}

#[async_trait]
impl Store for PostgresStore {
    async fn create_service(&self, new: NewService) -> Result<Service> {
        let now = Utc::now();
        let row = sqlx::query(
            r#"
            INSERT INTO services (name, description, team, tier, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, TRUE, $5, $5)
            RETURNING id, name, description, team, tier, is_active, created_at, updated_at
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(&new.team)
        .bind(new.tier)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &format!("service '{}'", new.name)))?;
        service_from_row(&row)
    }

    async fn service_by_id(&self, id: i64) -> Result<Option<Service>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, team, tier, is_active, created_at, updated_at
            FROM services WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(service_from_row).transpose()
    }

    async fn service_by_name(&self, name: &str) -> Result<Option<Service>> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, team, tier, is_active, created_at, updated_at
            FROM services WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(service_from_row).transpose()
    }

    async fn active_services(&self) -> Result<Vec<Service>> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, team, tier, is_active, created_at, updated_at
            FROM services WHERE is_active = TRUE ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(service_from_row).collect()
    }

    async fn set_service_active(&self, id: i64, active: bool) -> Result<Option<Service>> {
        let row = sqlx::query(
            r#"
            UPDATE services SET is_active = $2, updated_at = $3
            WHERE id = $1
            RETURNING id, name, description, team, tier, is_active, created_at, updated_at
            "#,
        )
        .bind(id)
        .bind(active)
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(service_from_row).transpose()
    }

    async fn create_slo_target(&self, new: NewSloTarget) -> Result<SloTarget> {
        let now = Utc::now();
        let mut tx = self.pool.begin().await?;

        // One active target per (service, name).
        sqlx::query(
            "UPDATE slo_targets SET is_active = FALSE, updated_at = $3
             WHERE service_id = $1 AND name = $2 AND is_active = TRUE",
        )
        .bind(new.service_id)
        .bind(&new.name)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query(
            r#"
            INSERT INTO slo_targets
                (service_id, name, target_value, window_days, burn_rate_threshold,
                 critical_burn_rate, is_active, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, TRUE, $7, $7)
            RETURNING id, service_id, name, target_value, window_days,
                      burn_rate_threshold, critical_burn_rate, is_active,
                      created_at, updated_at
            "#,
        )
        .bind(new.service_id)
        .bind(&new.name)
        .bind(new.target_value)
        .bind(new.window_days)
        .bind(new.burn_rate_threshold)
        .bind(new.critical_burn_rate)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        slo_target_from_row(&row)
    }

    async fn active_slo_targets(&self, service_id: i64) -> Result<Vec<SloTarget>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, name, target_value, window_days,
                   burn_rate_threshold, critical_burn_rate, is_active,
                   created_at, updated_at
            FROM slo_targets
            WHERE service_id = $1 AND is_active = TRUE
            ORDER BY name
            "#,
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(slo_target_from_row).collect()
    }

    async fn find_active_slo_target(
        &self,
        service_id: i64,
        name: &str,
    ) -> Result<Option<SloTarget>> {
        let row = sqlx::query(
            r#"
            SELECT id, service_id, name, target_value, window_days,
                   burn_rate_threshold, critical_burn_rate, is_active,
                   created_at, updated_at
            FROM slo_targets
            WHERE service_id = $1 AND name = $2 AND is_active = TRUE
            "#,
        )
        .bind(service_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(slo_target_from_row).transpose()
    }

    async fn insert_metrics(&self, metrics: Vec<NewMetric>) -> Result<()> {
        // One ingestion batch is one commit.
        let mut tx = self.pool.begin().await?;
        for m in metrics {
            sqlx::query(
                r#"
                INSERT INTO metrics
                    (service_id, timestamp, total_requests, error_count,
                     latency_p50, latency_p95, latency_p99, success_rate)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(m.service_id)
            .bind(m.timestamp)
            .bind(m.total_requests)
            .bind(m.error_count)
            .bind(m.latency_p50)
            .bind(m.latency_p95)
            .bind(m.latency_p99)
            .bind(m.success_rate)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn aggregate_metrics(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricTotals> {
        let (total_requests, error_count): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COALESCE(SUM(total_requests), 0)::BIGINT,
                   COALESCE(SUM(error_count), 0)::BIGINT
            FROM metrics
            WHERE service_id = $1 AND timestamp >= $2 AND timestamp <= $3
            "#,
        )
        .bind(service_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(MetricTotals {
            total_requests,
            error_count,
        })
    }

    async fn metrics_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<Metric>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, timestamp, total_requests, error_count,
                   latency_p50, latency_p95, latency_p99, success_rate
            FROM metrics
            WHERE service_id = $1 AND timestamp >= $2 AND timestamp <= $3
            ORDER BY timestamp DESC
            LIMIT $4
            "#,
        )
        .bind(service_id)
        .bind(start)
        .bind(end)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(metric_from_row).collect()
    }

    async fn latest_metric(&self, service_id: i64) -> Result<Option<Metric>> {
        let row = sqlx::query(
            r#"
            SELECT id, service_id, timestamp, total_requests, error_count,
                   latency_p50, latency_p95, latency_p99, success_rate
            FROM metrics
            WHERE service_id = $1
            ORDER BY timestamp DESC
            LIMIT 1
            "#,
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(metric_from_row).transpose()
    }

    async fn prune_metrics(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM metrics WHERE timestamp < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn append_burn_record(&self, record: NewBurnRecord) -> Result<BurnRecord> {
        let row = sqlx::query(
            r#"
            INSERT INTO burn_history
                (service_id, timestamp, window_minutes, burn_rate,
                 error_budget_consumed, error_budget_remaining,
                 time_to_exhaustion_hours, risk_level)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING id, service_id, timestamp, window_minutes, burn_rate,
                      error_budget_consumed, error_budget_remaining,
                      time_to_exhaustion_hours, risk_level
            "#,
        )
        .bind(record.service_id)
        .bind(record.timestamp)
        .bind(record.window_minutes)
        .bind(record.burn_rate)
        .bind(record.error_budget_consumed)
        .bind(record.error_budget_remaining)
        .bind(record.time_to_exhaustion_hours)
        .bind(record.risk_level.as_str())
        .fetch_one(&self.pool)
        .await?;
        burn_record_from_row(&row)
    }

    async fn burn_history(
        &self,
        service_id: i64,
        window_minutes: i32,
        since: DateTime<Utc>,
    ) -> Result<Vec<BurnRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, timestamp, window_minutes, burn_rate,
                   error_budget_consumed, error_budget_remaining,
                   time_to_exhaustion_hours, risk_level
            FROM burn_history
            WHERE service_id = $1 AND window_minutes = $2 AND timestamp >= $3
            ORDER BY timestamp ASC
            "#,
        )
        .bind(service_id)
        .bind(window_minutes)
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(burn_record_from_row).collect()
    }

    async fn burn_aggregates(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Option<BurnAggregates>> {
        let (avg_burn, max_burn, min_burn, avg_consumed): (
            Option<f64>,
            Option<f64>,
            Option<f64>,
            Option<f64>,
        ) = sqlx::query_as(
            r#"
            SELECT AVG(burn_rate)::DOUBLE PRECISION,
                   MAX(burn_rate)::DOUBLE PRECISION,
                   MIN(burn_rate)::DOUBLE PRECISION,
                   AVG(error_budget_consumed)::DOUBLE PRECISION
            FROM burn_history
            WHERE service_id = $1 AND timestamp >= $2
            "#,
        )
        .bind(service_id)
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        match (avg_burn, max_burn, min_burn, avg_consumed) {
            (Some(avg), Some(max), Some(min), Some(consumed)) => Ok(Some(BurnAggregates {
                average_burn_rate: avg,
                peak_burn_rate: max,
                min_burn_rate: min,
                average_budget_consumed: consumed,
            })),
            _ => Ok(None),
        }
    }

    async fn record_deployment(&self, new: NewDeployment) -> Result<Deployment> {
        let status = if new.allowed { "approved" } else { "rejected" };
        let row = sqlx::query(
            r#"
            INSERT INTO deployments
                (service_id, service_name, deployment_id, version, requested_at,
                 requested_by, allowed, blocked_reason, risk_level_at_request,
                 burn_rate_at_request, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING id, service_id, service_name, deployment_id, version,
                      requested_at, requested_by, allowed, blocked_reason,
                      risk_level_at_request, burn_rate_at_request, status
            "#,
        )
        .bind(new.service_id)
        .bind(&new.service_name)
        .bind(&new.deployment_id)
        .bind(&new.version)
        .bind(Utc::now())
        .bind(&new.requested_by)
        .bind(new.allowed)
        .bind(&new.blocked_reason)
        .bind(new.risk_level_at_request.as_str())
        .bind(new.burn_rate_at_request)
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_insert_error(e, &format!("deployment '{}'", new.deployment_id)))?;
        deployment_from_row(&row)
    }

    async fn deployment_history(
        &self,
        service_id: Option<i64>,
        limit: i64,
    ) -> Result<Vec<Deployment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, service_name, deployment_id, version,
                   requested_at, requested_by, allowed, blocked_reason,
                   risk_level_at_request, burn_rate_at_request, status
            FROM deployments
            WHERE ($1::BIGINT IS NULL OR service_id = $1)
            ORDER BY requested_at DESC
            LIMIT $2
            "#,
        )
        .bind(service_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(deployment_from_row).collect()
    }

    async fn deployments_since(&self, since: DateTime<Utc>) -> Result<Vec<Deployment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, service_id, service_name, deployment_id, version,
                   requested_at, requested_by, allowed, blocked_reason,
                   risk_level_at_request, burn_rate_at_request, status
            FROM deployments
            WHERE requested_at >= $1
            ORDER BY requested_at ASC
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(deployment_from_row).collect()
    }

    async fn insert_alert_unless_recent(
        &self,
        new: NewAlert,
        cooldown_start: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let mut tx = self.pool.begin().await?;

        let recent: Option<(i64,)> = sqlx::query_as(
            r#"
            SELECT id FROM alerts
            WHERE service_id = $1 AND alert_type = $2 AND timestamp >= $3
            LIMIT 1
            "#,
        )
        .bind(new.service_id)
        .bind(&new.alert_type)
        .bind(cooldown_start)
        .fetch_optional(&mut *tx)
        .await?;

        if recent.is_some() {
            tx.rollback().await?;
            return Ok(None);
        }

        let row = sqlx::query(
            r#"
            INSERT INTO alerts
                (service_id, timestamp, alert_type, severity, channel, title,
                 message, metadata, dispatched, acknowledged)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, FALSE, FALSE)
            RETURNING id, service_id, timestamp, alert_type, severity, channel,
                      title, message, metadata, dispatched, dispatched_at,
                      acknowledged, acknowledged_by, acknowledged_at
            "#,
        )
        .bind(new.service_id)
        .bind(Utc::now())
        .bind(&new.alert_type)
        .bind(new.severity.as_str())
        .bind(new.channel.as_str())
        .bind(&new.title)
        .bind(&new.message)
        .bind(&new.metadata)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        alert_from_row(&row).map(Some)
    }

    async fn mark_alert_dispatched(&self, alert_id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE alerts SET dispatched = TRUE, dispatched_at = $2 WHERE id = $1")
            .bind(alert_id)
            .bind(at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn alerts_with_service(&self, query: AlertQuery) -> Result<Vec<AlertView>> {
        let severity = query.severity.map(|s| s.as_str().to_string());
        let rows = sqlx::query(
            r#"
            SELECT a.id, a.service_id, s.name AS service_name, a.timestamp,
                   a.alert_type, a.severity, a.channel, a.title, a.message,
                   a.metadata, a.dispatched, a.acknowledged, a.acknowledged_by
            FROM alerts a
            JOIN services s ON a.service_id = s.id
            WHERE a.timestamp >= $1
            AND ($2::BIGINT IS NULL OR a.service_id = $2)
            AND ($3::TEXT IS NULL OR a.severity = $3)
            AND ($4::BOOLEAN IS NULL OR a.acknowledged = $4)
            ORDER BY a.timestamp DESC
            LIMIT $5
            "#,
        )
        .bind(query.since)
        .bind(query.service_id)
        .bind(severity)
        .bind(query.acknowledged)
        .bind(query.limit)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(AlertView {
                    id: row.try_get("id")?,
                    service_id: row.try_get("service_id")?,
                    service_name: row.try_get("service_name")?,
                    timestamp: row.try_get("timestamp")?,
                    alert_type: row.try_get("alert_type")?,
                    severity: parse_severity(row.try_get("severity")?)?,
                    channel: parse_channel(row.try_get("channel")?)?,
                    title: row.try_get("title")?,
                    message: row.try_get("message")?,
                    metadata: row
                        .try_get::<Option<JsonValue>, _>("metadata")?
                        .unwrap_or(JsonValue::Null),
                    dispatched: row.try_get("dispatched")?,
                    acknowledged: row.try_get("acknowledged")?,
                    acknowledged_by: row.try_get("acknowledged_by")?,
                })
            })
            .collect()
    }

    async fn count_alerts(&self, since: DateTime<Utc>) -> Result<(usize, usize)> {
        let (total, unacknowledged): (i64, i64) = sqlx::query_as(
            r#"
            SELECT COUNT(*)::BIGINT,
                   (COUNT(*) FILTER (WHERE acknowledged = FALSE))::BIGINT
            FROM alerts
            WHERE timestamp >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;
        Ok((total as usize, unacknowledged as usize))
    }

    async fn acknowledge_alert(
        &self,
        alert_id: i64,
        acknowledged_by: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<Alert>> {
        let row = sqlx::query(
            r#"
            UPDATE alerts
            SET acknowledged = TRUE, acknowledged_by = $2, acknowledged_at = $3
            WHERE id = $1
            RETURNING id, service_id, timestamp, alert_type, severity, channel,
                      title, message, metadata, dispatched, dispatched_at,
                      acknowledged, acknowledged_by, acknowledged_at
            "#,
        )
        .bind(alert_id)
        .bind(acknowledged_by)
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(alert_from_row).transpose()
    }

    async fn acknowledge_alerts(
        &self,
        alert_ids: &[i64],
        acknowledged_by: &str,
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE alerts
            SET acknowledged = TRUE, acknowledged_by = $2, acknowledged_at = $3
            WHERE id = ANY($1)
            "#,
        )
        .bind(alert_ids.to_vec())
        .bind(acknowledged_by)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn alert_severity_counts(
        &self,
        since: DateTime<Utc>,
    ) -> Result<HashMap<AlertSeverity, usize>> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            r#"
            SELECT severity, COUNT(*)::BIGINT
            FROM alerts
            WHERE timestamp >= $1
            GROUP BY severity
            "#,
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = HashMap::new();
        for (severity, count) in rows {
            counts.insert(parse_severity(severity)?, count as usize);
        }
        Ok(counts)
    }
}
