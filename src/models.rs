use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// Core enumerations
//
// These serialize to lowercase identifiers both on the wire and in the
// database; the string form is the durable contract, so `as_str`/`FromStr`
// are the single source of truth.

/// Risk classification levels for error budget state.
///
/// The derived ordering is meaningful: SAFE < OBSERVE < DANGER < FREEZE, so
/// `max()` yields the most severe level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Safe,
    Observe,
    Danger,
    Freeze,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "safe",
            RiskLevel::Observe => "observe",
            RiskLevel::Danger => "danger",
            RiskLevel::Freeze => "freeze",
        }
    }

    /// Numeric severity for histogram keys and comparisons in logs.
    pub fn severity(&self) -> u8 {
        match self {
            RiskLevel::Safe => 0,
            RiskLevel::Observe => 1,
            RiskLevel::Danger => 2,
            RiskLevel::Freeze => 3,
        }
    }

    /// Fixed display color per level (part of the external contract).
    pub fn color(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "#22c55e",
            RiskLevel::Observe => "#eab308",
            RiskLevel::Danger => "#f97316",
            RiskLevel::Freeze => "#ef4444",
        }
    }

    /// Fixed operator guidance per level (part of the external contract).
    pub fn action(&self) -> &'static str {
        match self {
            RiskLevel::Safe => "Normal operations",
            RiskLevel::Observe => "Increased monitoring",
            RiskLevel::Danger => "Limit non-critical changes",
            RiskLevel::Freeze => "Block all deployments",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "safe" => Ok(RiskLevel::Safe),
            "observe" => Ok(RiskLevel::Observe),
            "danger" => Ok(RiskLevel::Danger),
            "freeze" => Ok(RiskLevel::Freeze),
            other => Err(format!("unknown risk level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl AlertSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertSeverity::Info => "info",
            AlertSeverity::Warning => "warning",
            AlertSeverity::Critical => "critical",
            AlertSeverity::Emergency => "emergency",
        }
    }
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AlertSeverity::Info),
            "warning" => Ok(AlertSeverity::Warning),
            "critical" => Ok(AlertSeverity::Critical),
            "emergency" => Ok(AlertSeverity::Emergency),
            other => Err(format!("unknown alert severity: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertChannel {
    Email,
    Slack,
    Ui,
    Pagerduty,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::Email => "email",
            AlertChannel::Slack => "slack",
            AlertChannel::Ui => "ui",
            AlertChannel::Pagerduty => "pagerduty",
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(AlertChannel::Email),
            "slack" => Ok(AlertChannel::Slack),
            "ui" => Ok(AlertChannel::Ui),
            "pagerduty" => Ok(AlertChannel::Pagerduty),
            other => Err(format!("unknown alert channel: {other}")),
        }
    }
}

// Persisted entities

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub team: Option<String>,
    pub tier: i32,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SloTarget {
    pub id: i64,
    pub service_id: i64,
    pub name: String,
    pub target_value: f64,
    pub window_days: i32,
    pub burn_rate_threshold: f64,
    pub critical_burn_rate: f64,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub id: i64,
    pub service_id: i64,
    pub timestamp: DateTime<Utc>,
    pub total_requests: i64,
    pub error_count: i64,
    pub latency_p50: Option<f64>,
    pub latency_p95: Option<f64>,
    pub latency_p99: Option<f64>,
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurnRecord {
    pub id: i64,
    pub service_id: i64,
    pub timestamp: DateTime<Utc>,
    pub window_minutes: i32,
    pub burn_rate: f64,
    pub error_budget_consumed: f64,
    pub error_budget_remaining: f64,
    pub time_to_exhaustion_hours: Option<f64>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Deployment {
    pub id: i64,
    /// None when the gate was asked about a service that was never registered.
    pub service_id: Option<i64>,
    pub service_name: String,
    pub deployment_id: String,
    pub version: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub requested_by: Option<String>,
    pub allowed: bool,
    pub blocked_reason: Option<String>,
    pub risk_level_at_request: RiskLevel,
    pub burn_rate_at_request: f64,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub service_id: i64,
    pub timestamp: DateTime<Utc>,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub channel: AlertChannel,
    pub title: String,
    pub message: String,
    pub metadata: JsonValue,
    pub dispatched: bool,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

// Insert parameter records (ids and defaulted fields assigned by the store)

#[derive(Debug, Clone, Deserialize)]
pub struct NewService {
    pub name: String,
    pub description: Option<String>,
    pub team: Option<String>,
    #[serde(default = "default_tier")]
    pub tier: i32,
}

fn default_tier() -> i32 {
    2
}

impl NewService {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("service name cannot be empty".to_string());
        }
        if !(1..=3).contains(&self.tier) {
            return Err("tier must be between 1 and 3".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewSloTarget {
    pub service_id: i64,
    pub name: String,
    pub target_value: f64,
    pub window_days: i32,
    pub burn_rate_threshold: f64,
    pub critical_burn_rate: f64,
}

impl NewSloTarget {
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("SLO target name cannot be empty".to_string());
        }
        if !(0.0..=100.0).contains(&self.target_value) {
            return Err("target value must be between 0 and 100".to_string());
        }
        if self.window_days <= 0 {
            return Err("window days must be positive".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NewMetric {
    pub service_id: i64,
    pub timestamp: DateTime<Utc>,
    pub total_requests: i64,
    pub error_count: i64,
    pub latency_p50: Option<f64>,
    pub latency_p95: Option<f64>,
    pub latency_p99: Option<f64>,
    pub success_rate: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct NewBurnRecord {
    pub service_id: i64,
    pub timestamp: DateTime<Utc>,
    pub window_minutes: i32,
    pub burn_rate: f64,
    pub error_budget_consumed: f64,
    pub error_budget_remaining: f64,
    pub time_to_exhaustion_hours: Option<f64>,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub service_id: Option<i64>,
    pub service_name: String,
    pub deployment_id: String,
    pub version: Option<String>,
    pub requested_by: Option<String>,
    pub allowed: bool,
    pub blocked_reason: Option<String>,
    pub risk_level_at_request: RiskLevel,
    pub burn_rate_at_request: f64,
}

#[derive(Debug, Clone)]
pub struct NewAlert {
    pub service_id: i64,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub channel: AlertChannel,
    pub title: String,
    pub message: String,
    pub metadata: JsonValue,
}

// Ingestion types

/// One telemetry observation as submitted by an agent or the simulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSnapshot {
    pub service: String,
    pub timestamp: DateTime<Utc>,
    pub total_requests: i64,
    pub error_count: i64,
    pub latency_p50: Option<f64>,
    pub latency_p95: Option<f64>,
    pub latency_p99: Option<f64>,
}

impl MetricSnapshot {
    pub fn validate(&self) -> Result<(), String> {
        if self.service.trim().is_empty() {
            return Err("service name cannot be empty".to_string());
        }
        if self.total_requests < 0 {
            return Err("total_requests cannot be negative".to_string());
        }
        if self.error_count < 0 {
            return Err("error_count cannot be negative".to_string());
        }
        if self.error_count > self.total_requests {
            return Err("error_count cannot exceed total_requests".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub processed: usize,
    pub rejected: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AggregatedMetrics {
    pub total_requests: i64,
    pub error_count: i64,
    pub availability: Option<f64>,
    pub avg_latency_p99: Option<f64>,
    pub window_minutes: i64,
    pub data_points: usize,
}

// Computation outputs

#[derive(Debug, Clone, Serialize)]
pub struct BurnRateComputation {
    pub service_id: i64,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub window_minutes: i64,
    pub current_error_rate: f64,
    pub allowed_error_rate: f64,
    pub burn_rate: f64,
    pub error_budget_consumed: f64,
    pub error_budget_remaining: f64,
    pub risk_level: RiskLevel,
    pub risk_color: String,
    pub risk_action: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BurnStatistics {
    pub average_burn_rate: f64,
    pub peak_burn_rate: f64,
    pub min_burn_rate: f64,
    pub average_budget_consumed: f64,
    pub hours: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SloComputation {
    pub service_id: i64,
    pub service_name: String,
    pub slo_name: String,
    pub target_value: f64,
    pub current_value: f64,
    pub is_meeting_slo: bool,
    pub total_budget: f64,
    pub consumed_budget: i64,
    pub consumed_percentage: f64,
    pub remaining_percentage: f64,
    pub availability_5m: Option<f64>,
    pub availability_1h: Option<f64>,
    pub availability_24h: Option<f64>,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub computed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceSloStatus {
    pub service_id: i64,
    pub service_name: String,
    pub computations: Vec<SloComputation>,
    pub overall_compliance: f64,
    pub is_healthy: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct GlobalCompliance {
    pub total_services: usize,
    pub services_meeting_slo: usize,
    pub global_compliance: f64,
    pub services_at_risk: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Increasing,
    Stable,
    Decreasing,
}

impl TrendDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrendDirection::Increasing => "increasing",
            TrendDirection::Stable => "stable",
            TrendDirection::Decreasing => "decreasing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    High,
    Medium,
    Low,
}

impl ConfidenceLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::High => "high",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::Low => "low",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Forecast {
    pub service_id: i64,
    pub service_name: String,
    pub computed_at: DateTime<Utc>,
    pub current_burn_rate: f64,
    pub error_budget_remaining: f64,
    pub time_to_exhaustion_hours: Option<f64>,
    pub projected_exhaustion_time: Option<DateTime<Utc>>,
    pub confidence_level: ConfidenceLevel,
    pub burn_rate_trend: TrendDirection,
    pub trend_slope: f64,
    pub forecast_message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExhaustionSummary {
    pub service_name: String,
    pub time_to_exhaustion_hours: f64,
    pub projected_exhaustion_time: Option<DateTime<Utc>>,
    pub current_burn_rate: f64,
    pub budget_remaining: f64,
}

// Release gate types

#[derive(Debug, Clone, Deserialize)]
pub struct ReleaseCheckRequest {
    pub service_name: String,
    #[serde(default)]
    pub deployment_id: String,
    pub version: Option<String>,
    pub requested_by: Option<String>,
    #[serde(default, rename = "override")]
    pub override_requested: bool,
    pub override_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReleaseCheckResponse {
    pub allowed: bool,
    pub reason: String,
    pub service_name: String,
    pub deployment_id: String,
    pub current_risk_level: RiskLevel,
    pub current_burn_rate: f64,
    pub error_budget_remaining: f64,
    pub time_to_exhaustion_hours: Option<f64>,
    pub recommendations: Vec<String>,
    pub checked_at: DateTime<Utc>,
    pub checked_by: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct GateStatistics {
    pub period_days: i64,
    pub total_deployments: usize,
    pub blocked_deployments: usize,
    pub allowed_deployments: usize,
    pub block_rate: f64,
    pub risk_distribution: HashMap<String, usize>,
}

// Alert feed types

/// Alert joined with its service name for feed consumers.
#[derive(Debug, Clone, Serialize)]
pub struct AlertView {
    pub id: i64,
    pub service_id: i64,
    pub service_name: String,
    pub timestamp: DateTime<Utc>,
    pub alert_type: String,
    pub severity: AlertSeverity,
    pub channel: AlertChannel,
    pub title: String,
    pub message: String,
    pub metadata: JsonValue,
    pub dispatched: bool,
    pub acknowledged: bool,
    pub acknowledged_by: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertFeed {
    pub alerts: Vec<AlertView>,
    pub total: usize,
    pub unacknowledged: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertStatistics {
    pub period_days: i64,
    pub by_severity: HashMap<String, usize>,
    pub total: usize,
    pub unacknowledged: usize,
}

// Narrative / dashboard types

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthBand {
    Healthy,
    Degraded,
    Critical,
}

impl HealthBand {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthBand::Healthy => "healthy",
            HealthBand::Degraded => "degraded",
            HealthBand::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InsightKind {
    Warning,
    Status,
}

/// One human-readable observation about a service, with the raw numbers
/// that produced it.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInsight {
    pub service_name: String,
    pub insight_type: InsightKind,
    pub message: String,
    pub severity: AlertSeverity,
    pub data: JsonValue,
}

/// Platform-wide reliability summary for operators and reports.
#[derive(Debug, Clone, Serialize)]
pub struct ReliabilitySummary {
    pub generated_at: DateTime<Utc>,
    pub overall_health: HealthBand,
    pub overall_score: f64,
    pub executive_summary: String,
    pub insights: Vec<ServiceInsight>,
    pub action_items: Vec<String>,
    pub services_at_risk: Vec<String>,
    pub nearest_budget_exhaustion: Option<ExhaustionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DashboardOverview {
    pub total_services: usize,
    pub services_meeting_slo: usize,
    pub services_at_risk: usize,
    pub global_compliance_score: f64,
    pub risk_distribution: HashMap<String, usize>,
    pub average_budget_remaining: f64,
    pub lowest_budget_service: Option<String>,
    pub lowest_budget_percentage: Option<f64>,
    pub nearest_exhaustion: Option<ExhaustionSummary>,
    pub active_alerts: usize,
    pub critical_alerts: usize,
}

/// Service x time matrix of persisted risk levels.
#[derive(Debug, Clone, Serialize)]
pub struct RiskHeatmap {
    pub services: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    pub risk_matrix: Vec<Vec<RiskLevel>>,
}

// Shared numeric helpers

/// Round to a fixed number of decimal places.
pub fn round_dp(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round() / factor
}
