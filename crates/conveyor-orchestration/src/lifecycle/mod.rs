//! Batch lifecycle: seeding, operator actions, derived aggregate status, and
//! stall recovery. These layers sit on top of the per-item machine and are
//! never preconditions for it.

pub mod batch_finalizer;
pub mod batch_initializer;
pub mod stall_monitor;

pub use batch_finalizer::{derive_batch_status, BatchFinalizer};
pub use batch_initializer::{BatchInitializer, BatchSeedRequest, SeededBatch};
pub use stall_monitor::{StallMonitor, StallStats};
