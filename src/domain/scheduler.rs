//! Drives both pipelines on their own cadence.
//!
//! Each pipeline has a gate; a tick or manual trigger that finds the gate
//! held is skipped, so runs of the same pipeline never overlap. The two
//! pipelines may run concurrently with each other.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, Instrument};

use super::learning::{LearningPipeline, LearningState};
use super::operational::OperationalPipeline;
use super::state::OperationalState;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cadence {
    pub operational: Duration,
    pub learning: Duration,
}

impl Default for Cadence {
    fn default() -> Self {
        Cadence {
            operational: Duration::from_secs(15 * 60),
            learning: Duration::from_secs(24 * 60 * 60),
        }
    }
}

pub struct Scheduler {
    operational: OperationalPipeline,
    learning: LearningPipeline,
    operational_gate: Mutex<()>,
    learning_gate: Mutex<()>,
    cadence: Cadence,
}

impl Scheduler {
    pub fn new(operational: OperationalPipeline, learning: LearningPipeline, cadence: Cadence) -> Self {
        Scheduler {
            operational,
            learning,
            operational_gate: Mutex::new(()),
            learning_gate: Mutex::new(()),
            cadence,
        }
    }

    /// One operational run, or `None` if a run is already in flight.
    pub async fn trigger_operational(&self, cancel: &CancellationToken) -> Option<OperationalState> {
        let _gate = self.operational_gate.try_lock().ok()?;
        Some(self.operational.run_once(cancel).await)
    }

    /// One learning cycle, or `None` if a cycle is already in flight.
    pub async fn trigger_learning(&self, cancel: &CancellationToken) -> Option<LearningState> {
        let _gate = self.learning_gate.try_lock().ok()?;
        Some(self.learning.run_cycle(cancel).await)
    }

    async fn operational_loop(self: Arc<Self>, shutdown: CancellationToken) {
        info!(every = ?self.cadence.operational, "operational schedule started");
        let mut tick = interval(self.cadence.operational);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("operational schedule: shutdown requested");
                    break;
                }
                _ = tick.tick() => {
                    match self.trigger_operational(&shutdown).await {
                        Some(state) => {
                            if let Some(summary) = state.summary() {
                                debug!(run_id = %summary.run_id, status = %summary.status, "scheduled run done");
                            }
                        }
                        None => debug!("operational run still in flight, tick skipped"),
                    }
                }
            }
        }
    }

    async fn learning_loop(self: Arc<Self>, shutdown: CancellationToken) {
        info!(every = ?self.cadence.learning, "learning schedule started");
        let mut tick = interval(self.cadence.learning);
        tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("learning schedule: shutdown requested");
                    break;
                }
                _ = tick.tick() => {
                    match self.trigger_learning(&shutdown).await {
                        Some(state) => {
                            debug!(cycle_id = %state.cycle_id(), outcome = %state.outcome(), "scheduled cycle done");
                        }
                        None => debug!("learning cycle still in flight, tick skipped"),
                    }
                }
            }
        }
    }

    /// Run both schedules until `shutdown` is cancelled. Runs in flight at
    /// cancellation stop at their next node boundary and still record.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut loops = JoinSet::new();
        loops.spawn(
            Arc::clone(&self)
                .operational_loop(shutdown.clone())
                .instrument(info_span!("operational")),
        );
        loops.spawn(
            Arc::clone(&self)
                .learning_loop(shutdown.clone())
                .instrument(info_span!("learning")),
        );

        while let Some(res) = loops.join_next().await {
            match res {
                Ok(()) => debug!("schedule loop exited"),
                Err(e) => {
                    error!(error = %e, "schedule loop panicked, shutting down");
                    shutdown.cancel();
                }
            }
        }
        info!("scheduler stopped");
    }
}
