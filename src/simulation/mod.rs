pub mod config;
pub mod scenario;
pub mod scheduler;

pub use config::SimConfig;
pub use scenario::{AgentSpec, LifecycleEvent, Scenario, ScenarioPlan, ScheduledEvent, TransmitPolicy};
pub use scheduler::Scheduler;

use crate::metrics::analyzer::{AnalysisReport, EquilibriumAnalyzer};
use crate::metrics::logger::MetricsLogger;
use crate::metrics::{MetricsCollector, RunSummary};
use anyhow::{Result, anyhow};
use indicatif::{ProgressBar, ProgressStyle};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Everything a finished run leaves behind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub name: String,
    pub strategy: String,
    pub scenario: String,
    pub seed: u64,
    pub ticks_completed: u32,
    pub cancelled: bool,
    pub summary: RunSummary,
    /// Absent for multi-area scenarios.
    pub analysis: Option<AnalysisReport>,
}

pub struct Simulation {
    config: SimConfig,
    pub metrics: MetricsCollector,
    cancel: CancellationToken,
    show_progress: bool,
}

impl Simulation {
    pub fn new(config: SimConfig) -> Self {
        Self {
            config,
            metrics: MetricsCollector::new(),
            cancel: CancellationToken::new(),
            show_progress: true,
        }
    }

    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Cancelling stops the run between two ticks.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(&mut self) -> Result<RunReport> {
        info!("Starting simulation: {}", self.config.name);
        info!("Strategy: {}", self.config.strategy_name);
        info!("Ticks: {} x {} sub-ticks", self.config.ticks, self.config.sub_ticks);
        info!("Agents: {}, Networks: {:?}", self.config.num_agents, self.config.capacities);

        let mut scheduler = Scheduler::new(self.config.clone())?;
        let multi_area = scheduler.plan().is_multi_area();

        let pb = if self.show_progress {
            ProgressBar::new(u64::from(self.config.ticks))
        } else {
            ProgressBar::hidden()
        };
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40.orange/yellow} {pos}/{len} ticks {msg}")?
                .progress_chars("█▓░"),
        );

        let metrics = self.metrics.clone();
        let cancel = self.cancel.clone();
        let progress = pb.clone();
        let (scheduler, cancelled) = tokio::task::spawn_blocking(move || -> Result<(Scheduler, bool)> {
            while !scheduler.is_finished() {
                if cancel.is_cancelled() {
                    return Ok((scheduler, true));
                }
                let snapshot = scheduler.step()?;
                progress.inc(1);
                progress.set_message(format!("occupancy {:?}", snapshot.occupancy()));
                metrics.record(snapshot);
            }
            Ok((scheduler, false))
        })
        .await
        .map_err(|e| anyhow!("scheduler task failed: {}", e))??;

        if cancelled {
            pb.abandon_with_message("Simulation cancelled");
            warn!("Run cancelled after {} ticks", scheduler.tick());
        } else {
            pb.finish_with_message("Simulation complete");
        }

        let analysis = if multi_area {
            warn!("Distance to equilibrium is not defined across several areas; skipping analysis");
            None
        } else {
            let analyzer = EquilibriumAnalyzer::new(self.config.capacities.clone(), self.config.equilibrium_schedule()?);
            Some(analyzer.analyze(&self.metrics.occupancy_series()))
        };

        let summary = self.metrics.summary();
        info!("Switches: {}, explorations: {}", summary.switches, summary.explorations);
        info!("Mean gain: {:.3} Mbps, downloaded {:.1} MB", summary.mean_gain, summary.total_download_mb);
        if let Some(report) = &analysis {
            info!(
                "Time at equilibrium: {:.1}%, mean distance {:.2}%",
                report.percent_at_equilibrium, report.mean_distance
            );
        }

        Ok(RunReport {
            name: self.config.name.clone(),
            strategy: self.config.strategy_name.clone(),
            scenario: self.config.scenario.name().to_string(),
            seed: self.config.seed,
            ticks_completed: scheduler.tick(),
            cancelled,
            summary,
            analysis,
        })
    }

    /// Writes the CSV logs and JSON report under `root/<name>_<timestamp>/`.
    pub fn save_results(&self, report: &RunReport, root: impl AsRef<Path>) -> Result<PathBuf> {
        let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let dir = root.as_ref().join(format!("{}_{}", self.config.name, timestamp));

        let mut logger = MetricsLogger::new(&dir)?;
        logger.log_batch(&self.metrics.get_snapshots())?;
        info!("Logs saved to: {}", dir.display());

        std::fs::write(dir.join("config.json"), serde_json::to_string_pretty(&self.config)?)?;
        let report_path = dir.join("report.json");
        std::fs::write(&report_path, serde_json::to_string_pretty(report)?)?;
        info!("Report saved to: {}", report_path.display());
        Ok(dir)
    }
}
