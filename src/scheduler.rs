//! Periodic Coordinator.
//!
//! A single background task that, every tick, computes burn rates for every
//! active service across the canonical windows, persists them, and runs
//! alert evaluation. Per-service failures are logged and never abort the
//! tick. The task is owned through an explicit handle; shutdown interrupts
//! the sleep promptly and lets the in-flight service finish.

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::alerts::AlertManager;
use crate::burn::{BurnRateEngine, WINDOWS};
use crate::config::Config;
use crate::error::Result;
use crate::store::Store;

pub struct Coordinator {
    store: Arc<dyn Store>,
    config: Arc<Config>,
    burn_engine: BurnRateEngine,
    alert_manager: AlertManager,
}

/// Handle to the running coordinator task.
pub struct CoordinatorHandle {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl CoordinatorHandle {
    /// Signal shutdown and wait for the loop to finish its in-flight work.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.handle.await {
            error!(error = %e, "coordinator task panicked");
        }
    }
}

impl Coordinator {
    pub fn new(store: Arc<dyn Store>, config: Arc<Config>) -> Self {
        let burn_engine = BurnRateEngine::new(store.clone(), config.clone());
        let alert_manager = AlertManager::new(store.clone(), config.clone());
        Self {
            store,
            config,
            burn_engine,
            alert_manager,
        }
    }

    /// Spawn the periodic loop and return its handle.
    pub fn start(self) -> CoordinatorHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let interval_secs = self.config.scheduler.computation_interval_seconds;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(interval_secs));
            info!(interval_secs, "coordinator started");

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.run_cycle().await;
                    }
                    _ = shutdown_rx.changed() => {
                        info!("coordinator shutting down");
                        break;
                    }
                }
            }
        });

        CoordinatorHandle { shutdown, handle }
    }

    /// One computation cycle over all active services.
    pub async fn run_cycle(&self) {
        let services = match self.store.active_services().await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "failed to enumerate services, skipping cycle");
                return;
            }
        };

        for service in &services {
            if let Err(e) = self.process_service(service.id).await {
                error!(service = %service.name, error = %e, "failed to process service");
            }
        }

        let cutoff = Utc::now() - ChronoDuration::days(self.config.metrics.retention_days);
        match self.store.prune_metrics(cutoff).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "pruned expired metrics"),
            Err(e) => warn!(error = %e, "metric pruning failed"),
        }

        debug!(services = services.len(), "computation cycle complete");
    }

    async fn process_service(&self, service_id: i64) -> Result<()> {
        for window in WINDOWS {
            let computation = self
                .burn_engine
                .compute_burn_rate(service_id, window.minutes)
                .await?;
            self.burn_engine.store_burn_history(&computation).await?;
        }
        self.alert_manager.evaluate_and_alert(service_id).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{NewMetric, NewService};
    use crate::store::MemoryStore;

    async fn seeded_store() -> (Arc<MemoryStore>, i64) {
        let store = Arc::new(MemoryStore::new());
        let service = store
            .create_service(NewService {
                name: "api-gateway".to_string(),
                description: None,
                team: None,
                tier: 1,
            })
            .await
            .unwrap();
        store
            .insert_metrics(vec![NewMetric {
                service_id: service.id,
                timestamp: Utc::now() - ChronoDuration::minutes(10),
                total_requests: 600_000,
                error_count: 1_500,
                latency_p50: None,
                latency_p95: None,
                latency_p99: None,
                success_rate: None,
            }])
            .await
            .unwrap();
        (store, service.id)
    }

    #[tokio::test]
    async fn cycle_persists_all_windows_and_evaluates_alerts() {
        let (store, service_id) = seeded_store().await;
        let coordinator = Coordinator::new(store.clone(), Arc::new(Config::default()));

        coordinator.run_cycle().await;

        let since = Utc::now() - ChronoDuration::hours(1);
        for window in WINDOWS {
            let history = store
                .burn_history(service_id, window.minutes as i32, since)
                .await
                .unwrap();
            assert_eq!(history.len(), 1, "window {} not persisted", window.label);
        }

        // Burn rate 2.5 over the 1h window should have raised alerts.
        let (total, _) = store.count_alerts(since).await.unwrap();
        assert!(total >= 1);
    }

    #[tokio::test]
    async fn cycle_continues_past_failing_services() {
        let (store, service_id) = seeded_store().await;
        // A second service with no metrics: computes neutral values without
        // failing, so both services end up with history.
        let quiet = store
            .create_service(NewService {
                name: "quiet-service".to_string(),
                description: None,
                team: None,
                tier: 3,
            })
            .await
            .unwrap();

        let coordinator = Coordinator::new(store.clone(), Arc::new(Config::default()));
        coordinator.run_cycle().await;

        let since = Utc::now() - ChronoDuration::hours(1);
        for id in [service_id, quiet.id] {
            let history = store.burn_history(id, 60, since).await.unwrap();
            assert_eq!(history.len(), 1);
        }
    }

    #[tokio::test]
    async fn cycle_prunes_expired_metrics() {
        let (store, service_id) = seeded_store().await;
        store
            .insert_metrics(vec![NewMetric {
                service_id,
                timestamp: Utc::now() - ChronoDuration::days(45),
                total_requests: 10,
                error_count: 0,
                latency_p50: None,
                latency_p95: None,
                latency_p99: None,
                success_rate: None,
            }])
            .await
            .unwrap();

        let coordinator = Coordinator::new(store.clone(), Arc::new(Config::default()));
        coordinator.run_cycle().await;

        let remaining = store
            .metrics_in_range(
                service_id,
                Utc::now() - ChronoDuration::days(60),
                Utc::now(),
                100,
            )
            .await
            .unwrap();
        assert_eq!(remaining.len(), 1);
    }

    #[tokio::test]
    async fn shutdown_interrupts_the_loop() {
        let (store, _service_id) = seeded_store().await;
        let mut config = Config::default();
        config.scheduler.computation_interval_seconds = 3600;

        let coordinator = Coordinator::new(store.clone(), Arc::new(config));
        let handle = coordinator.start();

        // Give the first (immediate) tick a moment to run.
        tokio::time::sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(5), handle.stop())
            .await
            .expect("coordinator did not stop promptly");
    }
}
