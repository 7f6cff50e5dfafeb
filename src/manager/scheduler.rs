//! Background sweep over the registry: expires stale tasks and forwards
//! reports of tasks whose period elapsed.

use super::reporter::TaskReporter;
use crate::config::ReporterConfig;
use crate::registry::TaskRegistry;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, warn};

pub struct ReporterScheduler {
    registry: Arc<TaskRegistry>,
    default_reporters: Arc<RwLock<Vec<Arc<dyn TaskReporter>>>>,
    default_period: Duration,
    tick: Duration,
}

impl ReporterScheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        default_reporters: Arc<RwLock<Vec<Arc<dyn TaskReporter>>>>,
        config: &ReporterConfig,
    ) -> Self {
        Self {
            registry,
            default_reporters,
            default_period: config.report_period(),
            tick: config.tick(),
        }
    }

    pub fn spawn(self, handle: &Handle) -> JoinHandle<()> {
        handle.spawn(async move {
            let mut interval = tokio::time::interval(self.tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                self.sweep(Instant::now()).await;
            }
        })
    }

    /// One pass: expire, then report.
    pub async fn sweep(&self, now: Instant) {
        for task in self.registry.purge_expired(now) {
            warn!(task_id = %task.task_id(), "⏰ Task timed out - shutting down");
            if let Err(e) = task.shutdown() {
                debug!(task_id = %task.task_id(), error = %e, "Expired task was not running");
            }
        }

        for task in self.registry.due_for_report(now, self.default_period) {
            let report = task.report();
            let reporters: Vec<Arc<dyn TaskReporter>> = if task.reporters().is_empty() {
                self.default_reporters.read().clone()
            } else {
                task.reporters().to_vec()
            };
            for reporter in reporters {
                if let Err(e) = reporter.report(&report).await {
                    warn!(
                        task_id = %report.task_id,
                        reporter = reporter.reporter_name(),
                        error = %e,
                        "Task reporter failed"
                    );
                }
            }
        }
    }
}
