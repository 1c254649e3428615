//! Provider boundary.
//!
//! [`Provider`] is the typed view of one provider: every operation takes a
//! request struct and returns a response carrying [`Diagnostics`], never an
//! `Err`. [`grpc::GrpcProvider`] implements it over the wire protocol and
//! [`session::ProviderSession`] layers the configure/stop state machine and
//! ephemeral lease tracking on top of any implementation.

pub mod grpc;
pub mod rpc;
pub mod session;

use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::schema::ProviderSchema;
use crate::value::{AttributePath, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc;

pub use grpc::GrpcProvider;
pub use rpc::{ProviderRpc, TonicRpc};
pub use session::{PluginFactory, ProviderFactory, ProviderSession, SessionState};

/// Why a result could not be produced yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeferredReason {
    /// No specific reason given.
    Unknown,
    /// The owning component's instance set is not yet known.
    InstanceCountUnknown,
    /// The resource's configuration contains unknown values.
    ResourceConfigUnknown,
    /// The provider's configuration contains unknown values.
    ProviderConfigUnknown,
    /// A prerequisite object does not exist yet.
    AbsentPrereq,
    /// A prerequisite was itself deferred.
    DeferredPrereq,
}

/// A typed signal to retry in a later plan round. Not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Deferred {
    /// Why the result was deferred.
    pub reason: DeferredReason,
}

impl Deferred {
    /// A deferral with the given reason.
    pub fn new(reason: DeferredReason) -> Self {
        Self { reason }
    }
}

/// What the engine tells the provider it can handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ClientCapabilities {
    /// The engine accepts deferred results.
    pub deferral_allowed: bool,
}

/// Result of schema retrieval.
#[derive(Debug, Clone, Default)]
pub struct GetProviderSchemaResponse {
    /// The provider's schema; empty when retrieval failed.
    pub schema: Arc<ProviderSchema>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Validation of a provider configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidateProviderConfigRequest {
    /// Configuration value.
    pub config: Value,
}

/// Validation of a resource, data source, or list resource configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidateResourceConfigRequest {
    /// Type name.
    pub type_name: String,
    /// Configuration value.
    pub config: Value,
}

/// Upgrade of stored state to the current schema version.
#[derive(Debug, Clone, Default)]
pub struct UpgradeResourceStateRequest {
    /// Resource type name.
    pub type_name: String,
    /// Schema version the state was written with.
    pub version: u64,
    /// The stored state as JSON.
    pub raw_state_json: Vec<u8>,
}

/// Upgraded state.
#[derive(Debug, Clone, Default)]
pub struct UpgradeResourceStateResponse {
    /// The state in the current schema's shape.
    pub upgraded_state: Value,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Upgrade of a stored identity to the current identity schema version.
#[derive(Debug, Clone, Default)]
pub struct UpgradeResourceIdentityRequest {
    /// Resource type name.
    pub type_name: String,
    /// Identity schema version the identity was written with.
    pub version: u64,
    /// The stored identity as JSON.
    pub raw_identity_json: Vec<u8>,
}

/// Upgraded identity.
#[derive(Debug, Clone, Default)]
pub struct UpgradeResourceIdentityResponse {
    /// The identity in the current identity schema's shape.
    pub upgraded_identity: Value,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Provider configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigureProviderRequest {
    /// Version of the calling engine.
    pub engine_version: String,
    /// Configuration value.
    pub config: Value,
    /// Client capabilities.
    pub client_capabilities: ClientCapabilities,
}

/// Refresh of a managed resource.
#[derive(Debug, Clone, Default)]
pub struct ReadResourceRequest {
    /// Resource type name.
    pub type_name: String,
    /// The last known state.
    pub prior_state: Value,
    /// Opaque provider data from the last plan or apply.
    pub private: Vec<u8>,
    /// The last known identity, or null.
    pub current_identity: Value,
    /// Client capabilities.
    pub client_capabilities: ClientCapabilities,
}

/// Refreshed resource.
#[derive(Debug, Clone, Default)]
pub struct ReadResourceResponse {
    /// Current state; null if the object no longer exists.
    pub new_state: Value,
    /// Opaque provider data.
    pub private: Vec<u8>,
    /// Set when the read must be retried later.
    pub deferred: Option<Deferred>,
    /// Current identity, or null.
    pub identity: Value,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Planning of a proposed change.
#[derive(Debug, Clone, Default)]
pub struct PlanResourceChangeRequest {
    /// Resource type name.
    pub type_name: String,
    /// Current state; null for create.
    pub prior_state: Value,
    /// Configuration merged over prior state; null for destroy.
    pub proposed_new_state: Value,
    /// Configuration value.
    pub config: Value,
    /// Opaque provider data from the last read.
    pub prior_private: Vec<u8>,
    /// Current identity, or null.
    pub prior_identity: Value,
    /// Client capabilities.
    pub client_capabilities: ClientCapabilities,
}

/// Planned change.
#[derive(Debug, Clone, Default)]
pub struct PlanResourceChangeResponse {
    /// Planned state, possibly containing unknowns.
    pub planned_state: Value,
    /// Paths whose change forces replacement.
    pub requires_replace: Vec<AttributePath>,
    /// Opaque data to hand back at apply.
    pub planned_private: Vec<u8>,
    /// Planned identity, or null.
    pub planned_identity: Value,
    /// Set when planning must be retried later.
    pub deferred: Option<Deferred>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Application of a planned change.
#[derive(Debug, Clone, Default)]
pub struct ApplyResourceChangeRequest {
    /// Resource type name.
    pub type_name: String,
    /// Current state; null for create.
    pub prior_state: Value,
    /// Planned state; null for destroy.
    pub planned_state: Value,
    /// Configuration value.
    pub config: Value,
    /// Opaque data returned by planning.
    pub planned_private: Vec<u8>,
    /// Planned identity, or null.
    pub planned_identity: Value,
}

/// Applied change.
#[derive(Debug, Clone, Default)]
pub struct ApplyResourceChangeResponse {
    /// New state; null after destroy.
    pub new_state: Value,
    /// Opaque provider data.
    pub private: Vec<u8>,
    /// New identity, or null.
    pub new_identity: Value,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Import of an existing object.
#[derive(Debug, Clone, Default)]
pub struct ImportResourceStateRequest {
    /// Resource type name.
    pub type_name: String,
    /// Import ID; empty when importing by identity.
    pub id: String,
    /// Identity to import by, or null.
    pub identity: Value,
    /// Client capabilities.
    pub client_capabilities: ClientCapabilities,
}

/// One object produced by an import.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportedResource {
    /// Resource type name.
    pub type_name: String,
    /// Imported state.
    pub state: Value,
    /// Opaque provider data.
    pub private: Vec<u8>,
    /// Identity, or null.
    pub identity: Value,
}

/// Imported objects.
#[derive(Debug, Clone, Default)]
pub struct ImportResourceStateResponse {
    /// The imported objects.
    pub imported_resources: Vec<ImportedResource>,
    /// Set when the import must be retried later.
    pub deferred: Option<Deferred>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Move of state from one resource type to another.
#[derive(Debug, Clone, Default)]
pub struct MoveResourceStateRequest {
    /// Provider that owned the source object.
    pub source_provider_address: String,
    /// Source resource type.
    pub source_type_name: String,
    /// Source schema version.
    pub source_schema_version: u64,
    /// Source state as JSON.
    pub source_state_json: Vec<u8>,
    /// Target resource type.
    pub target_type_name: String,
    /// Source opaque provider data.
    pub source_private: Vec<u8>,
    /// Source identity as JSON, if any.
    pub source_identity_json: Vec<u8>,
    /// Source identity schema version.
    pub source_identity_schema_version: u64,
}

/// Moved state.
#[derive(Debug, Clone, Default)]
pub struct MoveResourceStateResponse {
    /// State under the target type.
    pub target_state: Value,
    /// Opaque provider data for the target.
    pub target_private: Vec<u8>,
    /// Identity under the target type, or null.
    pub target_identity: Value,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Read of a data source.
#[derive(Debug, Clone, Default)]
pub struct ReadDataSourceRequest {
    /// Data source type name.
    pub type_name: String,
    /// Configuration value.
    pub config: Value,
    /// Client capabilities.
    pub client_capabilities: ClientCapabilities,
}

/// Data source result.
#[derive(Debug, Clone, Default)]
pub struct ReadDataSourceResponse {
    /// The read state.
    pub state: Value,
    /// Set when the read must be retried later.
    pub deferred: Option<Deferred>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Opening of an ephemeral resource.
#[derive(Debug, Clone, Default)]
pub struct OpenEphemeralResourceRequest {
    /// Ephemeral resource type name.
    pub type_name: String,
    /// Configuration value.
    pub config: Value,
    /// Client capabilities.
    pub client_capabilities: ClientCapabilities,
}

/// An opened ephemeral resource.
#[derive(Debug, Clone, Default)]
pub struct OpenEphemeralResourceResponse {
    /// The ephemeral value. Never persisted.
    pub result: Value,
    /// Opaque token for renew and close.
    pub private: Vec<u8>,
    /// Renew before this instant to keep the value usable.
    pub renew_at: Option<DateTime<Utc>>,
    /// Set when opening must be retried later.
    pub deferred: Option<Deferred>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Renewal of an ephemeral resource.
#[derive(Debug, Clone, Default)]
pub struct RenewEphemeralResourceRequest {
    /// Ephemeral resource type name.
    pub type_name: String,
    /// Token from open or the last renew.
    pub private: Vec<u8>,
}

/// A renewed ephemeral resource.
#[derive(Debug, Clone, Default)]
pub struct RenewEphemeralResourceResponse {
    /// The next deadline, if any.
    pub renew_at: Option<DateTime<Utc>>,
    /// Replacement token.
    pub private: Vec<u8>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Closing of an ephemeral resource.
#[derive(Debug, Clone, Default)]
pub struct CloseEphemeralResourceRequest {
    /// Ephemeral resource type name.
    pub type_name: String,
    /// Token from open or the last renew.
    pub private: Vec<u8>,
}

/// Discovery of existing objects.
#[derive(Debug, Clone, Default)]
pub struct ListResourceRequest {
    /// List resource type name.
    pub type_name: String,
    /// Filter configuration.
    pub config: Value,
    /// Also return each object's full state.
    pub include_resource_object: bool,
    /// Maximum number of results.
    pub limit: usize,
}

/// One discovered object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListResourceResult {
    /// Human-readable name.
    pub display_name: String,
    /// Resource identity.
    pub identity: Value,
    /// Full state, when requested.
    pub state: Option<Value>,
    /// Diagnostics attached to this item.
    pub diagnostics: Diagnostics,
}

/// Discovered objects.
#[derive(Debug, Clone, Default)]
pub struct ListResourceResponse {
    /// At most `limit` results, in stream order.
    pub results: Vec<ListResourceResult>,
    /// Stream-level diagnostics plus every item's diagnostics.
    pub diagnostics: Diagnostics,
}

/// Per-linked-resource input to action planning.
#[derive(Debug, Clone, Default)]
pub struct LinkedResourcePlanData {
    /// Prior state.
    pub prior_state: Value,
    /// Planned state.
    pub planned_state: Value,
    /// Configuration.
    pub config: Value,
    /// Prior identity, or null.
    pub prior_identity: Value,
}

/// Per-linked-resource output of action planning.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkedResourcePlan {
    /// Planned state after the action.
    pub planned_state: Value,
    /// Planned identity, or null.
    pub planned_identity: Value,
}

/// Planning of an action.
#[derive(Debug, Clone, Default)]
pub struct PlanActionRequest {
    /// Action type name.
    pub action_type: String,
    /// Linked resources, in schema order.
    pub linked_resources: Vec<LinkedResourcePlanData>,
    /// Action configuration.
    pub config: Value,
    /// Client capabilities.
    pub client_capabilities: ClientCapabilities,
}

/// A planned action.
#[derive(Debug, Clone, Default)]
pub struct PlanActionResponse {
    /// Linked resource plans, in request order.
    pub linked_resources: Vec<LinkedResourcePlan>,
    /// Set when planning must be retried later.
    pub deferred: Option<Deferred>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
}

/// Per-linked-resource input to action invocation.
#[derive(Debug, Clone, Default)]
pub struct LinkedResourceInvokeData {
    /// Prior state.
    pub prior_state: Value,
    /// Planned state.
    pub planned_state: Value,
    /// Configuration.
    pub config: Value,
    /// Planned identity, or null.
    pub planned_identity: Value,
}

/// Per-linked-resource result of an action.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkedResourceResult {
    /// New state.
    pub new_state: Value,
    /// New identity, or null.
    pub new_identity: Value,
}

/// Invocation of an action.
#[derive(Debug, Clone, Default)]
pub struct InvokeActionRequest {
    /// Action type name.
    pub action_type: String,
    /// Linked resources, in schema order.
    pub linked_resources: Vec<LinkedResourceInvokeData>,
    /// Action configuration.
    pub config: Value,
}

/// One event of an action invocation.
#[derive(Debug, Clone, PartialEq)]
pub enum InvokeActionEvent {
    /// Free-text progress.
    Progress {
        /// Progress message.
        message: String,
    },
    /// The terminal event.
    Completed {
        /// Results per linked resource.
        linked_resources: Vec<LinkedResourceResult>,
        /// Diagnostics, including provider-reported failures.
        diagnostics: Diagnostics,
    },
}

impl InvokeActionEvent {
    /// Whether this is the terminal event.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }
}

/// A started action invocation.
#[derive(Debug, Default)]
pub struct InvokeActionResponse {
    /// Events in order, ending with exactly one `Completed`. The channel
    /// closing before `Completed` means abnormal termination.
    pub events: Option<mpsc::Receiver<InvokeActionEvent>>,
    /// Diagnostics from starting the call.
    pub diagnostics: Diagnostics,
}

/// Diagnostic for an operation the provider does not support.
pub fn unsupported(operation: &str) -> Diagnostic {
    Diagnostic::error("Unsupported provider operation")
        .with_detail(format!("This provider does not support {}.", operation))
}

/// Diagnostic for a type name missing from the provider's schema.
pub fn unknown_type(kind: &str, type_name: &str) -> Diagnostic {
    Diagnostic::error(format!("Unknown {} type", kind))
        .with_detail(format!("The provider has no {} type named \"{}\".", kind, type_name))
}

/// The typed interface to one provider.
///
/// Implementations must never panic on bad input; every failure is a
/// diagnostic on the response.
#[async_trait::async_trait]
pub trait Provider: Send + Sync {
    /// Retrieve the provider's complete schema.
    async fn get_provider_schema(&self) -> GetProviderSchemaResponse;

    /// Validate provider configuration.
    async fn validate_provider_config(&self, request: ValidateProviderConfigRequest) -> Diagnostics;

    /// Validate a managed resource configuration.
    async fn validate_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics;

    /// Validate a data source configuration.
    async fn validate_data_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics;

    /// Validate a list resource configuration.
    async fn validate_list_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        let _ = request;
        unsupported("list resources").into()
    }

    /// Upgrade stored state to the current schema version.
    async fn upgrade_resource_state(
        &self,
        request: UpgradeResourceStateRequest,
    ) -> UpgradeResourceStateResponse;

    /// Upgrade a stored identity to the current identity schema version.
    async fn upgrade_resource_identity(
        &self,
        request: UpgradeResourceIdentityRequest,
    ) -> UpgradeResourceIdentityResponse {
        let _ = request;
        UpgradeResourceIdentityResponse {
            diagnostics: unsupported("resource identities").into(),
            ..Default::default()
        }
    }

    /// Configure the provider.
    async fn configure_provider(&self, request: ConfigureProviderRequest) -> Diagnostics;

    /// Refresh a managed resource.
    async fn read_resource(&self, request: ReadResourceRequest) -> ReadResourceResponse;

    /// Plan a change to a managed resource.
    async fn plan_resource_change(&self, request: PlanResourceChangeRequest) -> PlanResourceChangeResponse;

    /// Apply a planned change.
    async fn apply_resource_change(
        &self,
        request: ApplyResourceChangeRequest,
    ) -> ApplyResourceChangeResponse;

    /// Import existing objects.
    async fn import_resource_state(
        &self,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse {
        let _ = request;
        ImportResourceStateResponse {
            diagnostics: unsupported("import").into(),
            ..Default::default()
        }
    }

    /// Move state from another resource type.
    async fn move_resource_state(&self, request: MoveResourceStateRequest) -> MoveResourceStateResponse {
        let _ = request;
        MoveResourceStateResponse {
            diagnostics: unsupported("moving resource state").into(),
            ..Default::default()
        }
    }

    /// Read a data source.
    async fn read_data_source(&self, request: ReadDataSourceRequest) -> ReadDataSourceResponse;

    /// Open an ephemeral resource.
    async fn open_ephemeral_resource(
        &self,
        request: OpenEphemeralResourceRequest,
    ) -> OpenEphemeralResourceResponse {
        let _ = request;
        OpenEphemeralResourceResponse {
            diagnostics: unsupported("ephemeral resources").into(),
            ..Default::default()
        }
    }

    /// Renew an ephemeral resource.
    async fn renew_ephemeral_resource(
        &self,
        request: RenewEphemeralResourceRequest,
    ) -> RenewEphemeralResourceResponse {
        let _ = request;
        RenewEphemeralResourceResponse {
            diagnostics: unsupported("ephemeral resources").into(),
            ..Default::default()
        }
    }

    /// Close an ephemeral resource.
    async fn close_ephemeral_resource(&self, request: CloseEphemeralResourceRequest) -> Diagnostics {
        let _ = request;
        unsupported("ephemeral resources").into()
    }

    /// Discover existing objects.
    async fn list_resource(&self, request: ListResourceRequest) -> ListResourceResponse {
        let _ = request;
        ListResourceResponse {
            diagnostics: unsupported("list resources").into(),
            ..Default::default()
        }
    }

    /// Plan an action.
    async fn plan_action(&self, request: PlanActionRequest) -> PlanActionResponse {
        let _ = request;
        PlanActionResponse {
            diagnostics: unsupported("actions").into(),
            ..Default::default()
        }
    }

    /// Start an action.
    async fn invoke_action(&self, request: InvokeActionRequest) -> InvokeActionResponse {
        let _ = request;
        InvokeActionResponse {
            events: None,
            diagnostics: unsupported("actions").into(),
        }
    }

    /// Stop the provider.
    async fn stop_provider(&self) -> Diagnostics {
        Diagnostics::new()
    }
}
