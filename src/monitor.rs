use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::check;
use crate::config::Config;
use crate::exporter;
use crate::logs::LogManager;
use crate::report::Reporter;
use crate::store::ResultStore;
use crate::system::{self, LinuxSystem, SystemProbe};

/// The monitoring agent: owns the result store, the log manager, and the
/// reporter, and drives one task per configured check and log source.
pub struct Monitor {
    config: Config,
    store: ResultStore,
    reporter: Reporter,
    logs: Arc<LogManager>,
    probe: Arc<dyn SystemProbe>,
}

impl Monitor {
    pub fn new(config: Config) -> Result<Self> {
        Self::with_probe(config, Arc::new(LinuxSystem))
    }

    pub fn with_probe(config: Config, probe: Arc<dyn SystemProbe>) -> Result<Self> {
        let reporter = Reporter::new(&config.report, &config.device)?;
        let logs = LogManager::new(config.log_sources.clone(), reporter.clone());
        Ok(Self {
            config,
            store: ResultStore::new(),
            reporter,
            logs,
            probe,
        })
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    pub fn logs(&self) -> &Arc<LogManager> {
        &self.logs
    }

    /// Run until the shutdown token fires, then wait for every task to return
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            checks = self.config.checks.len(),
            log_sources = self.config.log_sources.len(),
            "starting monitor"
        );

        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        if self.config.report.prometheus_metrics {
            tasks.push(tokio::spawn(exporter::serve(
                self.config.report.prometheus_port,
                self.store.clone(),
                self.config.device.clone(),
                shutdown.clone(),
            )));
        }

        for check in self.config.checks.iter().cloned() {
            tasks.push(tokio::spawn(check::run_check_loop(
                check,
                self.store.clone(),
                self.reporter.clone(),
                shutdown.clone(),
            )));
        }

        tasks.extend(self.logs.spawn_collectors(&shutdown));

        if self.config.system_metrics.enabled {
            tasks.push(tokio::spawn(run_metrics_loop(
                self.config.system_metrics.clone(),
                Arc::clone(&self.probe),
                self.store.clone(),
                self.reporter.clone(),
                shutdown.clone(),
            )));
        }

        if self.config.report.heartbeat.enabled {
            tasks.push(tokio::spawn(run_heartbeat_loop(
                self.config.report.heartbeat.interval,
                Arc::clone(&self.probe),
                self.reporter.clone(),
                shutdown.clone(),
            )));
        }

        shutdown.cancelled().await;
        info!("stopping monitor tasks");
        for task in tasks {
            let _ = task.await;
        }
        info!("monitor stopped");
    }
}

/// Sample host metrics each interval and ship them upstream
async fn run_metrics_loop(
    config: crate::config::SystemMetricsConfig,
    probe: Arc<dyn SystemProbe>,
    store: ResultStore,
    reporter: Reporter,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                if let Some(sample) =
                    system::collect_sample(probe.as_ref(), &config, &store).await
                {
                    reporter.report_metrics(&sample).await;
                }
            }
        }
    }
}

/// Announce liveness each interval
async fn run_heartbeat_loop(
    interval: std::time::Duration,
    probe: Arc<dyn SystemProbe>,
    reporter: Reporter,
    shutdown: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => return,
            _ = ticker.tick() => {
                let hostname = probe
                    .hostname()
                    .await
                    .unwrap_or_else(|_| "unknown".to_string());
                let ip = probe.primary_ip().await.unwrap_or_default();
                reporter.send_heartbeat(&hostname, &ip).await;
            }
        }
    }
}
