//! The stack engine.
//!
//! A stack is a set of components, each a set of resources managed through
//! providers. Planning compares a [`StackConfig`] against stored state and
//! streams [`PlanEvent`]s; applying replays the plan's raw fragments and
//! streams [`ApplyEvent`]s whose patches the caller folds into its copy of
//! the state. [`StacksService`] exposes all of it behind integer handles.

pub mod apply;
pub mod config;
pub mod describe;
pub mod events;
pub mod migrate;
pub mod patch;
pub mod plan;
pub mod providers;
pub mod raw;
pub mod service;
pub mod state;

pub use apply::{apply_stack_changes, ApplyRequest};
pub use config::{
    ComponentInfo, DependencyLocks, DirectoryBundle, MemoryBundle, SourceBundle, StackConfig,
};
pub use describe::{AppliedDescription, ChangeAction, Described, DescribedValue, PlannedDescription};
pub use events::{
    AppliedChange, ApplyEvent, ChangeSummary, ComponentInstanceStatus, Phase, PlanEvent, PlannedChange,
    ProgressEvent, ResourceInstanceStatus, StackEvent,
};
pub use migrate::{migrate_stack_state, MigrateRequest};
pub use patch::{DescriptionOp, DescriptionPatch, RawPatch, StateFold};
pub use plan::{plan_stack_changes, PlanMode, PlanRequest};
pub use service::{
    ApplyStackChangesRequest, ConfigHandle, LocksHandle, MigrateStackStateRequest, PlanHandle,
    PlanStackChangesRequest, ProviderCacheHandle, ResourceIdentity, SourceBundleHandle, StacksService,
    StateHandle,
};
pub use state::{PriorState, RawState, StateKey};
