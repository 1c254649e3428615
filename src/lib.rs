//! Hemmer Stacks
//!
//! This crate is the plan/apply engine behind Hemmer stacks and the client
//! side of the Hemmer provider protocol.
//!
//! # Overview
//!
//! The crate provides:
//!
//! - **Dynamic values**: [`Value`] trees with unknowns, the MessagePack and
//!   JSON wire codecs, and human-facing rendering with sensitive values hidden
//! - **Schemas**: attribute types, blocks, identity and action schemas, with a
//!   process-wide single-flight cache of provider schemas
//! - **Provider sessions**: the [`Provider`] trait, a gRPC implementation over
//!   the provider wire protocol, and [`ProviderSession`], which enforces the
//!   configure-before-use lifecycle and tracks ephemeral resource leases
//! - **The stack engine**: planning, applying, state migration and the
//!   handle-based [`StacksService`] orchestration API
//! - **Logging**: `tracing` spans and events throughout, with helpers to
//!   install a subscriber
//!
//! # Quick Start
//!
//! ```ignore
//! use hemmer_stacks::{
//!     plan_stack_changes, DependencyLocks, EngineOptions, PlanMode, PlanRequest, PluginFactory,
//!     StackConfig, StackEvent,
//! };
//! use std::sync::Arc;
//! use tokio_stream::StreamExt;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     hemmer_stacks::init_logging();
//!     let config = StackConfig::parse(&std::fs::read_to_string("stack.json")?)?;
//!     let locks = DependencyLocks::parse(&std::fs::read_to_string("locks.json")?)?;
//!     let providers = PluginFactory::new().with_executable("hemmer/docker".parse()?, "./docker-provider");
//!
//!     let request = PlanRequest {
//!         config: Arc::new(config),
//!         prior_state: Arc::default(),
//!         locks: Arc::new(locks),
//!         providers: Arc::new(providers),
//!         inputs: Default::default(),
//!         mode: PlanMode::Normal,
//!         options: EngineOptions::from_env(),
//!     };
//!     let mut events = plan_stack_changes(request, CancellationToken::new());
//!     while let Some(event) = events.next().await {
//!         if let StackEvent::Diagnostic(diag) = event {
//!             eprintln!("{:?}", diag);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! # Diagnostics
//!
//! Operations report problems as [`Diagnostics`] rather than failing: a plan
//! that cannot reach a provider still streams everything it could work out,
//! followed by error diagnostics. `Result` is reserved for misuse such as
//! invalid handles.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod addrs;
pub mod codec;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod handles;
pub mod logging;
pub mod provider;
pub mod registry;
pub mod render;
pub mod schema;
pub mod stacks;
pub mod testing;
pub mod validation;
pub mod value;

#[allow(missing_docs)]
#[allow(clippy::all)]
pub mod generated;

// Re-export main types at crate root
pub use addrs::{
    AbsResourceInstanceAddr, ComponentInstanceAddr, DeposedKey, InstanceKey, ProviderAddr, ResourceAddr,
    ResourceInstanceAddr, ResourceInstanceObjectAddr, ResourceMode,
};
pub use codec::{DynamicValue, Format};
pub use config::EngineOptions;
pub use diagnostics::{Diagnostic, Diagnostics, Severity};
pub use error::{EngineError, SchemaMismatchError};
pub use handles::{Handle, HandleTable};
pub use logging::{init_logging, init_logging_with_default, try_init_logging};
pub use provider::{
    Deferred, DeferredReason, GrpcProvider, PluginFactory, Provider, ProviderFactory, ProviderSession,
};
pub use registry::SchemaRegistry;
pub use schema::{Attribute, AttributeType, Block, IdentitySchema, ProviderSchema, Schema};
pub use stacks::{
    apply_stack_changes, migrate_stack_state, plan_stack_changes, AppliedChange, ApplyEvent, ApplyRequest,
    DependencyLocks, MigrateRequest, PlanEvent, PlanMode, PlanRequest, PlannedChange, ProgressEvent,
    StackConfig, StackEvent, StacksService, StateFold,
};
pub use validation::{is_valid, validate, validate_result};
pub use value::{AttributePath, Value};

// Re-export async_trait for convenience
pub use async_trait::async_trait;

// Re-export commonly used external types
pub use serde_json;
pub use tonic;
pub use tracing;
