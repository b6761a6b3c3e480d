//! anyapp-controller
//!
//! Drives `AnyApplication` resources in one zone: keeps the application store,
//! talks to the local cluster and chart sources, runs the state machines and
//! their async jobs, and exchanges status with peer zones.
//!
//! Public API:
//! - `reconciler::Controller` - the reconcile loop fed by store events
//! - `store::MemoryStore` - application store with optional persistence
//! - `applications::ClusterApplications` - sync engine over a cluster backend
//! - `peers::PeerSync` - status exchange with other zones
//! - `report::Reports` - runtime and resource reports

pub mod applications;
pub mod charts;
pub mod clock;
pub mod cluster;
pub mod events;
pub mod fsm;
pub mod jobs;
pub mod local;
pub mod peers;
pub mod reconciler;
pub mod report;
pub mod status;
pub mod store;

#[cfg(test)]
mod testing;

pub use applications::{Applications, ClusterApplications};
pub use charts::{Charts, DirectoryCharts, HelmCharts};
pub use clock::{Clock, SystemClock};
pub use cluster::{Cluster, KubectlCluster, MemoryCluster};
pub use events::{Events, RecordingEvents, TracingEvents};
pub use jobs::{DefaultJobFactory, JobContext, Jobs};
pub use peers::PeerSync;
pub use reconciler::{Controller, Reconciler};
pub use report::Reports;
pub use store::{ApplicationStore, MemoryStore, StoreEvent};
