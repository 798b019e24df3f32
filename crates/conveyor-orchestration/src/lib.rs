//! # conveyor-orchestration
//!
//! The stateless control plane of the conveyor system: dispatcher (claim and
//! start compute), sequencer (advance completed work along frozen
//! blueprints), batch lifecycle (seeding, derived aggregate status, stall
//! recovery), pipeline resolution, the web API, and the loop that drives
//! them.
//!
//! Nothing here holds state between invocations. Every component reads the
//! store, applies conditional transitions, and exits; any number of
//! concurrent copies of any component is safe.

pub mod coordinator;
pub mod dispatcher;
pub mod lifecycle;
pub mod resolver;
pub mod sequencer;
pub mod web;

pub use coordinator::{OrchestrationLoop, TickStats};
pub use dispatcher::{DispatchStats, Dispatcher};
pub use lifecycle::{BatchFinalizer, BatchInitializer, BatchSeedRequest, StallMonitor};
pub use resolver::{PipelineResolver, ResolvedPipeline};
pub use sequencer::{Sequencer, SequencerStats};
