//! Metrics Simulator.
//!
//! Synthesizes Prometheus-style telemetry for a fixed roster of services:
//! a diurnal traffic curve, Gaussian noise scaled by a chaos level, and
//! randomly injected incidents that inflate error rates and latencies for
//! 5 to 30 minutes. Seedable so tests get reproducible streams.

use chrono::{DateTime, Duration, Timelike, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::HashMap;
use std::f64::consts::PI;

use crate::models::{round_dp, MetricSnapshot};

#[derive(Debug, Clone, Copy)]
pub struct ServiceProfile {
    pub name: &'static str,
    pub base_rps: f64,
    pub base_error_rate: f64,
}

pub const SERVICE_PROFILES: [ServiceProfile; 8] = [
    ServiceProfile {
        name: "api-gateway",
        base_rps: 10_000.0,
        base_error_rate: 0.001,
    },
    ServiceProfile {
        name: "user-service",
        base_rps: 5_000.0,
        base_error_rate: 0.002,
    },
    ServiceProfile {
        name: "payment-service",
        base_rps: 2_000.0,
        base_error_rate: 0.0005,
    },
    ServiceProfile {
        name: "inventory-service",
        base_rps: 3_000.0,
        base_error_rate: 0.001,
    },
    ServiceProfile {
        name: "notification-service",
        base_rps: 8_000.0,
        base_error_rate: 0.003,
    },
    ServiceProfile {
        name: "search-service",
        base_rps: 6_000.0,
        base_error_rate: 0.002,
    },
    ServiceProfile {
        name: "recommendation-engine",
        base_rps: 4_000.0,
        base_error_rate: 0.001,
    },
    ServiceProfile {
        name: "auth-service",
        base_rps: 7_000.0,
        base_error_rate: 0.0008,
    },
];

struct ActiveIncident {
    started_at: DateTime<Utc>,
    duration_secs: i64,
}

pub struct MetricsSimulator {
    chaos_level: f64,
    rng: StdRng,
    incidents: HashMap<String, ActiveIncident>,
}

impl MetricsSimulator {
    /// `chaos_level` ranges from 0.0 (stable) to 1.0 (chaotic); it scales
    /// both noise and incident probability.
    pub fn new(chaos_level: f64) -> Self {
        Self {
            chaos_level: chaos_level.clamp(0.0, 1.0),
            rng: StdRng::from_entropy(),
            incidents: HashMap::new(),
        }
    }

    /// Seeded constructor for reproducible streams.
    pub fn with_seed(chaos_level: f64, seed: u64) -> Self {
        Self {
            chaos_level: chaos_level.clamp(0.0, 1.0),
            rng: StdRng::seed_from_u64(seed),
            incidents: HashMap::new(),
        }
    }

    /// One snapshot per roster service at the given instant.
    pub fn generate_snapshot(&mut self, timestamp: DateTime<Utc>) -> Vec<MetricSnapshot> {
        SERVICE_PROFILES
            .iter()
            .map(|profile| self.generate_service_snapshot(profile, timestamp))
            .collect()
    }

    fn generate_service_snapshot(
        &mut self,
        profile: &ServiceProfile,
        timestamp: DateTime<Utc>,
    ) -> MetricSnapshot {
        // Daily traffic curve: trough at midnight, peak at noon.
        let hour = timestamp.hour() as f64;
        let day_factor = 1.0 + 0.3 * (hour / 24.0 * 2.0 * PI - PI / 2.0).sin();

        let variance = self.gauss(1.0, 0.1 * self.chaos_level);

        let mut is_incident = self.incidents.contains_key(profile.name);
        if !is_incident && self.rng.gen::<f64>() < 0.01 * self.chaos_level {
            self.incidents.insert(
                profile.name.to_string(),
                ActiveIncident {
                    started_at: timestamp,
                    duration_secs: self.rng.gen_range(300..=1800),
                },
            );
            is_incident = true;
        }

        let expired = self.incidents.get(profile.name).map_or(false, |incident| {
            (timestamp - incident.started_at).num_seconds() > incident.duration_secs
        });
        if expired {
            self.incidents.remove(profile.name);
            is_incident = false;
        }

        let total_requests = ((profile.base_rps * day_factor * variance) as i64).max(0);

        let raw_error_rate = if is_incident {
            profile.base_error_rate * self.rng.gen_range(5.0..50.0)
        } else {
            profile.base_error_rate * self.gauss(1.0, 0.2 * self.chaos_level)
        };
        let error_rate = raw_error_rate.clamp(0.0, 1.0);
        let error_count = (total_requests as f64 * error_rate) as i64;

        let base_latency = self.rng.gen_range(10.0..50.0);
        let latency_multiplier = if is_incident {
            self.rng.gen_range(1.5..3.0)
        } else {
            1.0
        };
        let latency_p50 = (base_latency * latency_multiplier * self.gauss(1.0, 0.1)).max(0.1);
        let latency_p95 = latency_p50 * self.rng.gen_range(2.0..4.0);
        let latency_p99 = latency_p95 * self.rng.gen_range(1.5..2.5);

        MetricSnapshot {
            service: profile.name.to_string(),
            timestamp,
            total_requests,
            error_count,
            latency_p50: Some(round_dp(latency_p50, 2)),
            latency_p95: Some(round_dp(latency_p95, 2)),
            latency_p99: Some(round_dp(latency_p99, 2)),
        }
    }

    /// Snapshots for every roster service across a trailing range.
    pub fn generate_historical_data(
        &mut self,
        hours: i64,
        interval_seconds: i64,
    ) -> Vec<MetricSnapshot> {
        let end = Utc::now();
        let mut current = end - Duration::hours(hours);
        let mut snapshots = Vec::new();
        while current <= end {
            snapshots.extend(self.generate_snapshot(current));
            current += Duration::seconds(interval_seconds);
        }
        snapshots
    }

    /// Test hook: start an incident for a service immediately.
    pub fn inject_incident(&mut self, service_name: &str) {
        self.incidents.insert(
            service_name.to_string(),
            ActiveIncident {
                started_at: Utc::now(),
                duration_secs: self.rng.gen_range(300..=1800),
            },
        );
    }

    /// Test hook: clear an incident.
    pub fn resolve_incident(&mut self, service_name: &str) {
        self.incidents.remove(service_name);
    }

    pub fn has_incident(&self, service_name: &str) -> bool {
        self.incidents.contains_key(service_name)
    }

    // Box-Muller transform; rand's core crate has no normal distribution.
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        if std_dev == 0.0 {
            return mean;
        }
        let u1: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        let u2: f64 = self.rng.gen::<f64>();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos();
        mean + std_dev * z
    }
}
