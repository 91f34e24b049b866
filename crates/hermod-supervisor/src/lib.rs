//! Lease acquisition, workflow assignment, and the per-tick reconcile
//! loop that starts/stops per-workflow Engines (spec §4.5).

mod lease;
mod reconcile;
mod rendezvous;
mod sharding;

pub use lease::{LeaseRecord, LeaseStore, SqlLeaseStore};
pub use reconcile::{
    PlatformClient, ResourceHints, Supervisor, SupervisorConfig, Workflow, WorkflowRuntime,
};
pub use rendezvous::{pick_owner, WorkerWeight};
pub use sharding::owns_by_hash;
