//! Resource model for AnyApplication
//!
//! - [`application`] - the resource itself, its metadata and spec
//! - [`status`] - global state, placements and per-zone conditions

mod application;
mod status;

pub use application::{
    AnyApplication, AnyApplicationSpec, ApplicationId, ApplicationMatcherSpec, HelmSelectorSpec,
    ObjectMeta, PlacementStrategy, PlacementStrategySpec, RecoverStrategySpec, SyncPolicySpec,
    API_VERSION, FINALIZER, KIND,
};
pub use status::{
    AnyApplicationStatus, ApplicationConditionType, ConditionStatus, DeploymentStatus,
    GlobalState, OwnershipTransferStatus, Placement, PlacementStatus, UndeploymentStatus,
    ZoneStatus,
};
