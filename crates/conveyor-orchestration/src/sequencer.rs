//! # Sequencer
//!
//! Advances completed work to the next step of its batch's frozen blueprint.
//! For every COMPLETED step state whose advancement marker is unset, the
//! sequencer ensures the successor row exists (create-if-absent, backed by
//! the tuple uniqueness constraint) and then sets the marker.
//!
//! Ordering matters: ensure first, mark second. A crash between the two
//! leaves a harmless duplicate ensure on the retry; marking first could lose
//! an advancement, which is the unacceptable direction.

use std::collections::HashMap;

use sqlx::PgPool;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use conveyor_shared::config::SequencerConfig;
use conveyor_shared::events::{EventRelay, RelayEvent};
use conveyor_shared::models::{Batch, StepState};
use conveyor_shared::ConveyorResult;

/// Where one step sits relative to its blueprint
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Successor<'a> {
    /// A next step exists
    Next(&'a str),
    /// The pipeline is exhausted for this item
    Exhausted,
    /// The current step is not in the blueprint at all (stale or edited-away
    /// registry data); treated as exhausted, with a warning
    NotInBlueprint,
}

/// Pure successor computation over a frozen blueprint
pub fn next_step<'a>(blueprint: &'a [String], current: &str) -> Successor<'a> {
    match blueprint.iter().position(|s| s == current) {
        Some(index) => match blueprint.get(index + 1) {
            Some(next) => Successor::Next(next),
            None => Successor::Exhausted,
        },
        None => Successor::NotInBlueprint,
    }
}

/// Outcome summary of one sequencer invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequencerStats {
    pub processed: usize,
    /// Successor rows ensured (whether created by us or already present)
    pub advanced: usize,
    /// Items whose pipeline is exhausted
    pub finished: usize,
    /// Successor rows actually created by this invocation
    pub spawned: usize,
}

#[derive(Debug, Clone)]
pub struct Sequencer {
    pool: PgPool,
    relay: EventRelay,
    config: SequencerConfig,
}

impl Sequencer {
    pub fn new(pool: PgPool, relay: EventRelay, config: SequencerConfig) -> Self {
        Self {
            pool,
            relay,
            config,
        }
    }

    /// One sequencer pass over advanceable rows. Blueprints are cached per
    /// pass; they are frozen, so the cache can never be stale.
    #[instrument(skip(self))]
    pub async fn run_once(&self) -> ConveyorResult<SequencerStats> {
        let advanceable =
            StepState::fetch_advanceable(&self.pool, self.config.batch_size).await?;

        if advanceable.is_empty() {
            return Ok(SequencerStats::default());
        }

        let mut stats = SequencerStats::default();
        let mut blueprints: HashMap<Uuid, Vec<String>> = HashMap::new();
        let mut woken_batches: Vec<Uuid> = Vec::new();

        for state in advanceable {
            stats.processed += 1;

            if !blueprints.contains_key(&state.batch_id) {
                let Some(batch) = Batch::find_by_id(&self.pool, state.batch_id).await? else {
                    warn!(
                        batch_id = %state.batch_id,
                        step_state_id = %state.id,
                        "Batch disappeared under a completed step state, marking advanced"
                    );
                    StepState::mark_advanced(&self.pool, state.id).await?;
                    continue;
                };
                blueprints.insert(state.batch_id, batch.blueprint.0);
            }
            let blueprint = &blueprints[&state.batch_id];

            match next_step(blueprint, &state.step_name) {
                Successor::Next(next) => {
                    let created =
                        StepState::ensure(&self.pool, state.batch_id, state.item_id, next).await?;
                    stats.advanced += 1;
                    if created {
                        stats.spawned += 1;
                        debug!(
                            batch_id = %state.batch_id,
                            item_id = %state.item_id,
                            from = %state.step_name,
                            to = %next,
                            "Spawned successor step state"
                        );
                        if !woken_batches.contains(&state.batch_id) {
                            woken_batches.push(state.batch_id);
                        }
                    }
                }
                Successor::Exhausted => {
                    stats.finished += 1;
                    debug!(
                        batch_id = %state.batch_id,
                        item_id = %state.item_id,
                        step = %state.step_name,
                        "Pipeline exhausted for item"
                    );
                }
                Successor::NotInBlueprint => {
                    stats.finished += 1;
                    warn!(
                        batch_id = %state.batch_id,
                        step = %state.step_name,
                        "Completed step not present in batch blueprint"
                    );
                }
            }

            StepState::mark_advanced(&self.pool, state.id).await?;
        }

        for batch_id in woken_batches {
            self.relay.publish(RelayEvent::StepsReady { batch_id });
        }

        if stats.processed > 0 {
            info!(
                processed = stats.processed,
                advanced = stats.advanced,
                finished = stats.finished,
                spawned = stats.spawned,
                "Sequencer pass complete"
            );
        }

        Ok(stats)
    }
}
