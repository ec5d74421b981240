//! Scheduler: a dedicated control loop that claims runnable tasks, dispatches
//! them to a bounded worker pool, and periodically sweeps expired leases.
//!
//! Follows the same shape as the codebase's other orchestration loop: a
//! `tokio` task looping over fixed ticks, a semaphore gating concurrent
//! worker fan-out, and a `CancellationToken` for graceful stop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use sqlx::SqlitePool;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use taskgraph_db::queries::tasks;

use crate::worker;

/// Scheduler tuning knobs. See the kernel configuration for where these are
/// sourced from (CLI flag, then environment, then default).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Capacity ceiling: at most this many tasks RUNNING at once.
    pub max_concurrent_tasks: usize,
    /// Target loop period.
    pub tick_interval: Duration,
    /// Lease length granted at claim time.
    pub lease_ms: i64,
    /// Minimum spacing between recovery sweeps.
    pub recovery_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: 4,
            tick_interval: Duration::from_millis(100),
            lease_ms: 60_000,
            recovery_interval: Duration::from_millis(1_000),
        }
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Runs the scheduler's control loop until `cancel` fires, then drains
/// in-flight workers (up to `drain_timeout`) before returning.
pub struct Scheduler {
    pool: SqlitePool,
    config: SchedulerConfig,
    cancel: CancellationToken,
    drain_timeout: Duration,
}

impl Scheduler {
    pub fn new(pool: SqlitePool, config: SchedulerConfig, cancel: CancellationToken) -> Self {
        Self { pool, config, cancel, drain_timeout: Duration::from_secs(10) }
    }

    /// Run the control loop. Returns once `cancel` has fired and in-flight
    /// workers have drained (or the drain timeout elapsed).
    pub async fn run(self) -> Result<()> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_tasks));
        let (done_tx, mut done_rx) = mpsc::channel::<()>(self.config.max_concurrent_tasks * 2);
        let mut in_flight: usize = 0;
        let mut last_recovery = now_millis() - self.config.recovery_interval.as_millis() as i64;

        info!(
            max_concurrent_tasks = self.config.max_concurrent_tasks,
            lease_ms = self.config.lease_ms,
            "scheduler starting"
        );

        loop {
            if self.cancel.is_cancelled() {
                info!(in_flight, "scheduler stopping, draining in-flight workers");
                let deadline = tokio::time::Instant::now() + self.drain_timeout;
                while in_flight > 0 {
                    match tokio::time::timeout_at(deadline, done_rx.recv()).await {
                        Ok(Some(())) => in_flight -= 1,
                        _ => break,
                    }
                }
                if in_flight > 0 {
                    warn!(remaining = in_flight, "drain timeout expired with workers still in flight");
                }
                info!("scheduler stopped");
                return Ok(());
            }

            while let Ok(()) = done_rx.try_recv() {
                in_flight = in_flight.saturating_sub(1);
            }

            let now = now_millis();
            debug!(now, in_flight, "tick start");

            if now - last_recovery >= self.config.recovery_interval.as_millis() as i64 {
                last_recovery = now;
                match tasks::sweep_expired_leases(&self.pool, now).await {
                    Ok(processed) => {
                        for (id, outcome) in &processed {
                            warn!(task_id = %id, outcome = ?outcome, "recovery swept expired lease");
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "recovery sweep failed, retrying next tick");
                    }
                }
            }

            let running = match tasks::count_running(&self.pool, now).await {
                Ok(n) => n as usize,
                Err(err) => {
                    warn!(error = %err, "failed to count running tasks, skipping claim this tick");
                    self.sleep_until_next_tick().await;
                    continue;
                }
            };
            let slots = self.config.max_concurrent_tasks.saturating_sub(running + in_flight);
            debug!(running, in_flight, slots, "capacity computed");

            if slots > 0 {
                match tasks::claim_runnable(&self.pool, now, self.config.lease_ms, slots as i64).await {
                    Ok(claimed) => {
                        debug!(claimed = claimed.len(), "claim query returned rows");
                        for task in claimed {
                            info!(task_id = %task.id, attempt = task.attempts, "task claimed");
                            let permit = match semaphore.clone().acquire_owned().await {
                                Ok(permit) => permit,
                                Err(_) => break,
                            };
                            in_flight += 1;

                            let pool = self.pool.clone();
                            let done_tx = done_tx.clone();
                            let task_id = task.id.clone();

                            tokio::spawn(async move {
                                let join_result = tokio::spawn(worker::run_task(pool.clone(), task)).await;
                                if let Err(join_err) = join_result {
                                    error!(task_id = %task_id, panic = %join_err, "worker task panicked");
                                    let now = now_millis();
                                    if let Err(err) = tasks::mark_failed_or_retry(
                                        &pool,
                                        &task_id,
                                        now,
                                        "worker panicked",
                                    )
                                    .await
                                    {
                                        warn!(task_id = %task_id, error = %err, "failed to record worker panic");
                                    }
                                }
                                drop(permit);
                                let _ = done_tx.send(()).await;
                            });
                        }
                    }
                    Err(err) => {
                        warn!(error = %err, "claim failed, retrying next tick");
                    }
                }
            }

            self.sleep_until_next_tick().await;
        }
    }

    async fn sleep_until_next_tick(&self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.tick_interval) => {}
            _ = self.cancel.cancelled() => {}
        }
    }
}
