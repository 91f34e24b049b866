//! Optional cross-cluster forwarding by region/cluster-id metadata
//! (spec §4.6).

mod receive;
mod registry;
mod router;

pub use receive::{router as receive_router, ReceiveState};
pub use registry::{EdgeFilters, PeerCluster, PeerRegistry};
pub use router::{MeshError, Router, CLUSTER_ID_HEADER};
