//! # Orchestration Loop
//!
//! Single-process driver for the stateless components. Each tick runs the
//! sequencer before the dispatcher (newly spawned successors get dispatched
//! in the same tick), then the batch finalizer; stall sweeps run on a slower
//! cadence. Relay events only shorten the wait for the next tick — the
//! interval timer remains the authoritative schedule, so a lost notification
//! costs latency, never progress.
//!
//! Several loops may run against the same database: every component claims
//! work with conditional transitions, so concurrent ticks partition the rows
//! instead of double-processing them.

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use conveyor_shared::compute::ComputeBackend;
use conveyor_shared::config::ConveyorConfig;
use conveyor_shared::events::{EventRelay, RelayListener};
use conveyor_shared::ConveyorResult;

use crate::dispatcher::{DispatchStats, Dispatcher};
use crate::lifecycle::{BatchFinalizer, StallMonitor, StallStats};
use crate::sequencer::{Sequencer, SequencerStats};

/// Combined outcome of one orchestration tick
#[derive(Debug, Clone, Copy, Default)]
pub struct TickStats {
    pub sequencer: SequencerStats,
    pub dispatcher: DispatchStats,
    pub batches_finalized: usize,
    pub stall: Option<StallStats>,
}

#[derive(Debug)]
pub struct OrchestrationLoop {
    pool: PgPool,
    config: ConveyorConfig,
    sequencer: Sequencer,
    dispatcher: Dispatcher,
    finalizer: BatchFinalizer,
    stall_monitor: StallMonitor,
}

impl OrchestrationLoop {
    pub fn new(pool: PgPool, backend: Arc<dyn ComputeBackend>, config: ConveyorConfig) -> Self {
        let relay = EventRelay::new(pool.clone(), config.relay.clone());
        let sequencer = Sequencer::new(
            pool.clone(),
            relay.clone(),
            config.orchestration.sequencer.clone(),
        );
        let dispatcher = Dispatcher::new(
            pool.clone(),
            backend,
            config.orchestration.dispatcher.clone(),
        );
        let finalizer = BatchFinalizer::new(pool.clone());
        let stall_monitor = StallMonitor::new(pool.clone(), config.orchestration.stall.clone());

        Self {
            pool,
            config,
            sequencer,
            dispatcher,
            finalizer,
            stall_monitor,
        }
    }

    /// One full orchestration tick. `tick_count` drives the stall sweep
    /// cadence; pass 0 to force a sweep.
    #[instrument(skip(self))]
    pub async fn tick(&self, tick_count: u64) -> ConveyorResult<TickStats> {
        let mut stats = TickStats {
            sequencer: self.sequencer.run_once().await?,
            dispatcher: self.dispatcher.run_once().await?,
            batches_finalized: self.finalizer.run_once().await?,
            stall: None,
        };

        let cadence = self.config.orchestration.stall.sweep_every_ticks as u64;
        if cadence > 0 && tick_count % cadence == 0 {
            stats.stall = Some(self.stall_monitor.run_once().await?);
        }

        Ok(stats)
    }

    /// Run until `shutdown` flips to true. Consumes the loop; the relay
    /// listener connection lives for the duration of this call.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) -> ConveyorResult<()> {
        let mut listener = if self.config.relay.enabled {
            match RelayListener::connect(&self.pool, &self.config.relay).await {
                Ok(listener) => Some(listener),
                Err(e) => {
                    warn!(error = %e, "Relay listener unavailable, polling only");
                    None
                }
            }
        } else {
            None
        };

        let mut interval =
            tokio::time::interval(Duration::from_millis(self.config.orchestration.tick_interval_ms));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_interval_ms = self.config.orchestration.tick_interval_ms,
            relay = listener.is_some(),
            "Orchestration loop started"
        );

        let mut tick_count: u64 = 0;
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                event = recv_wake(&mut listener), if listener.is_some() => {
                    match event {
                        Some(event) => {
                            debug!(batch_id = %event.batch_id(), "Relay wake");
                        }
                        None => {
                            warn!("Relay listener stopped, polling only");
                            listener = None;
                            continue;
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("Orchestration loop shutting down");
                        return Ok(());
                    }
                    continue;
                }
            }

            tick_count += 1;
            if let Err(e) = self.tick(tick_count).await {
                // Transient database errors must not kill the loop
                warn!(error = %e, "Orchestration tick failed, retrying next tick");
            }
        }
    }
}

async fn recv_wake(
    listener: &mut Option<RelayListener>,
) -> Option<conveyor_shared::events::RelayEvent> {
    match listener {
        Some(listener) => listener.recv().await,
        None => std::future::pending().await,
    }
}
