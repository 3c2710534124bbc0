//! Update platform data models — tenant-scoped, transport-agnostic.

pub mod action;
pub mod distribution_set;
pub mod filter_query;
pub mod rollout;
pub mod target;

pub use action::{
    Action, ActionState, ActionStatus, ActionType, MaintenanceWindow, Progress,
    DEFAULT_ACTION_WEIGHT,
};
pub use distribution_set::{ArtifactMeta, DistributionSet, DistributionSetType, SoftwareModule};
pub use filter_query::TargetFilterQuery;
pub use rollout::{
    GroupCounters, GroupState, GroupStrategy, Rollout, RolloutErrorAction, RolloutGroup,
    RolloutState, StartType, StopPolicy,
};
pub use target::{Target, UpdateStatus};
