//! Testing utilities for the engine.
//!
//! This module provides in-process stand-ins for everything a stack
//! operation talks to, so plans and applies can be exercised without
//! launching a provider process.
//!
//! # Example
//!
//! ```ignore
//! use hemmer_stacks::testing::{assert_no_errors, parse_config, StackHarness};
//! use serde_json::json;
//!
//! #[tokio::test]
//! async fn test_create() {
//!     let mut harness = StackHarness::new(parse_config(json!({
//!         "providers": { "fake": { "source": "hemmer/fake" } },
//!         "components": { "web": { "resources": {
//!             "fake_thing.a": { "provider": "fake", "config": { "name": "a" } }
//!         } } }
//!     })));
//!
//!     let plan = harness.plan(PlanMode::Normal).await;
//!     assert!(plan.applyable());
//!     let applied = harness.apply(&plan).await;
//!     assert_no_errors(&applied.diagnostics);
//! }
//! ```

use crate::addrs::ProviderAddr;
use crate::codec;
use crate::config::EngineOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use crate::generated as pb;
use crate::provider::rpc::RpcStream;
use crate::provider::{
    unknown_type, ApplyResourceChangeRequest, ApplyResourceChangeResponse, CloseEphemeralResourceRequest,
    ConfigureProviderRequest, Deferred, DeferredReason, GetProviderSchemaResponse, ImportResourceStateRequest,
    ImportResourceStateResponse, ImportedResource, InvokeActionEvent, InvokeActionRequest, InvokeActionResponse,
    LinkedResourcePlan, LinkedResourceResult, ListResourceRequest, ListResourceResponse, ListResourceResult,
    MoveResourceStateRequest, MoveResourceStateResponse, OpenEphemeralResourceRequest,
    OpenEphemeralResourceResponse, PlanActionRequest, PlanActionResponse, PlanResourceChangeRequest,
    PlanResourceChangeResponse, Provider, ProviderFactory, ProviderRpc, ReadDataSourceRequest,
    ReadDataSourceResponse, ReadResourceRequest, ReadResourceResponse, RenewEphemeralResourceRequest,
    RenewEphemeralResourceResponse, UpgradeResourceIdentityRequest, UpgradeResourceIdentityResponse,
    UpgradeResourceStateRequest, UpgradeResourceStateResponse, ValidateProviderConfigRequest,
    ValidateResourceConfigRequest,
};
use crate::schema::{
    ActionLinkage, ActionSchema, Attribute, AttributeType, ExecutionOrder, IdentityAttribute, IdentitySchema,
    LinkedResourceSchema, ProviderSchema, Schema, ServerCapabilities,
};
use crate::stacks::apply::{apply_stack_changes, ApplyRequest};
use crate::stacks::config::{DependencyLocks, StackConfig};
use crate::stacks::describe::{ComponentInstanceChange, PlannedDescription, ResourceInstanceChange};
use crate::stacks::events::{AppliedChange, ProgressEvent, StackEvent};
use crate::stacks::patch::StateFold;
use crate::stacks::plan::{plan_stack_changes, PlanMode, PlanRequest};
use crate::validation::validate;
use crate::value::{AttributePath, Value};
use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, Notify};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tonic::Status;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// =========================================================================
// Wire Double
// =========================================================================

/// A scriptable in-process [`ProviderRpc`].
///
/// Each unary RPC answers with the response stored in the field of the same
/// name. Calls are counted by RPC name, e.g. `"ReadResource"`.
pub struct MockRpc {
    /// Answer to GetProviderSchema.
    pub schema: pb::GetProviderSchemaResponse,
    /// Answer to GetResourceIdentitySchemas; `None` answers Unimplemented.
    pub identity_schemas: Option<pb::GetResourceIdentitySchemasResponse>,
    /// Failure for GetResourceIdentitySchemas, checked first.
    pub identity_error: Option<Status>,
    /// RPCs that fail with the given status.
    pub fail_calls: Vec<(&'static str, Status)>,
    /// Answer to ReadResource.
    pub read_resource: pb::ReadResourceResponse,
    /// Answer to UpgradeResourceState.
    pub upgrade_resource_state: pb::UpgradeResourceStateResponse,
    /// Answer to UpgradeResourceIdentity.
    pub upgrade_resource_identity: pb::UpgradeResourceIdentityResponse,
    /// Answer to PlanResourceChange.
    pub plan_resource_change: pb::PlanResourceChangeResponse,
    /// Answer to ApplyResourceChange.
    pub apply_resource_change: pb::ApplyResourceChangeResponse,
    /// Answer to ImportResourceState.
    pub import_resource_state: pb::ImportResourceStateResponse,
    /// Answer to MoveResourceState.
    pub move_resource_state: pb::MoveResourceStateResponse,
    /// Answer to ReadDataSource.
    pub read_data_source: pb::ReadDataSourceResponse,
    /// Answer to OpenEphemeralResource.
    pub open_ephemeral: pb::OpenEphemeralResourceResponse,
    /// Answer to PlanAction.
    pub plan_action: pb::PlanActionResponse,
    /// Answer to StopProvider.
    pub stop: pb::StopProviderResponse,
    /// Events streamed by ListResource.
    pub list_events: Vec<pb::ListResourceEvent>,
    /// How many ListResource events the caller actually pulled.
    pub list_pulled: Arc<AtomicUsize>,
    /// Items streamed by InvokeAction.
    pub invoke_events: Vec<Result<pb::InvokeActionEvent, Status>>,
    calls: Mutex<HashMap<&'static str, usize>>,
}

impl MockRpc {
    /// A double answering GetProviderSchema with `schema` and every other
    /// RPC with an empty response.
    pub fn new(schema: pb::GetProviderSchemaResponse) -> Self {
        Self {
            schema,
            identity_schemas: Some(identity_schemas_fixture()),
            identity_error: None,
            fail_calls: Vec::new(),
            read_resource: Default::default(),
            upgrade_resource_state: Default::default(),
            upgrade_resource_identity: Default::default(),
            plan_resource_change: Default::default(),
            apply_resource_change: Default::default(),
            import_resource_state: Default::default(),
            move_resource_state: Default::default(),
            read_data_source: Default::default(),
            open_ephemeral: Default::default(),
            plan_action: Default::default(),
            stop: Default::default(),
            list_events: Vec::new(),
            list_pulled: Arc::new(AtomicUsize::new(0)),
            invoke_events: Vec::new(),
            calls: Mutex::new(HashMap::new()),
        }
    }

    /// How many times the named RPC was called.
    pub fn call_count(&self, rpc: &str) -> usize {
        lock(&self.calls).get(rpc).copied().unwrap_or(0)
    }

    fn record(&self, rpc: &'static str) -> Result<(), Status> {
        *lock(&self.calls).entry(rpc).or_insert(0) += 1;
        match self.fail_calls.iter().find(|(name, _)| *name == rpc) {
            Some((_, status)) => Err(status.clone()),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl ProviderRpc for MockRpc {
    async fn get_provider_schema(
        &self,
        _request: pb::GetProviderSchemaRequest,
    ) -> Result<pb::GetProviderSchemaResponse, Status> {
        self.record("GetProviderSchema")?;
        Ok(self.schema.clone())
    }

    async fn get_resource_identity_schemas(
        &self,
        _request: pb::GetResourceIdentitySchemasRequest,
    ) -> Result<pb::GetResourceIdentitySchemasResponse, Status> {
        self.record("GetResourceIdentitySchemas")?;
        if let Some(status) = &self.identity_error {
            return Err(status.clone());
        }
        self.identity_schemas
            .clone()
            .ok_or_else(|| Status::unimplemented("GetResourceIdentitySchemas"))
    }

    async fn validate_provider_config(
        &self,
        _request: pb::ValidateProviderConfigRequest,
    ) -> Result<pb::ValidateResponse, Status> {
        self.record("ValidateProviderConfig")?;
        Ok(Default::default())
    }

    async fn validate_resource_config(
        &self,
        _request: pb::ValidateResourceConfigRequest,
    ) -> Result<pb::ValidateResponse, Status> {
        self.record("ValidateResourceConfig")?;
        Ok(Default::default())
    }

    async fn validate_data_resource_config(
        &self,
        _request: pb::ValidateResourceConfigRequest,
    ) -> Result<pb::ValidateResponse, Status> {
        self.record("ValidateDataResourceConfig")?;
        Ok(Default::default())
    }

    async fn validate_list_resource_config(
        &self,
        _request: pb::ValidateResourceConfigRequest,
    ) -> Result<pb::ValidateResponse, Status> {
        self.record("ValidateListResourceConfig")?;
        Ok(Default::default())
    }

    async fn upgrade_resource_state(
        &self,
        _request: pb::UpgradeResourceStateRequest,
    ) -> Result<pb::UpgradeResourceStateResponse, Status> {
        self.record("UpgradeResourceState")?;
        Ok(self.upgrade_resource_state.clone())
    }

    async fn upgrade_resource_identity(
        &self,
        _request: pb::UpgradeResourceIdentityRequest,
    ) -> Result<pb::UpgradeResourceIdentityResponse, Status> {
        self.record("UpgradeResourceIdentity")?;
        Ok(self.upgrade_resource_identity.clone())
    }

    async fn configure_provider(
        &self,
        _request: pb::ConfigureProviderRequest,
    ) -> Result<pb::ConfigureProviderResponse, Status> {
        self.record("ConfigureProvider")?;
        Ok(Default::default())
    }

    async fn read_resource(&self, _request: pb::ReadResourceRequest) -> Result<pb::ReadResourceResponse, Status> {
        self.record("ReadResource")?;
        Ok(self.read_resource.clone())
    }

    async fn plan_resource_change(
        &self,
        _request: pb::PlanResourceChangeRequest,
    ) -> Result<pb::PlanResourceChangeResponse, Status> {
        self.record("PlanResourceChange")?;
        Ok(self.plan_resource_change.clone())
    }

    async fn apply_resource_change(
        &self,
        _request: pb::ApplyResourceChangeRequest,
    ) -> Result<pb::ApplyResourceChangeResponse, Status> {
        self.record("ApplyResourceChange")?;
        Ok(self.apply_resource_change.clone())
    }

    async fn import_resource_state(
        &self,
        _request: pb::ImportResourceStateRequest,
    ) -> Result<pb::ImportResourceStateResponse, Status> {
        self.record("ImportResourceState")?;
        Ok(self.import_resource_state.clone())
    }

    async fn move_resource_state(
        &self,
        _request: pb::MoveResourceStateRequest,
    ) -> Result<pb::MoveResourceStateResponse, Status> {
        self.record("MoveResourceState")?;
        Ok(self.move_resource_state.clone())
    }

    async fn read_data_source(
        &self,
        _request: pb::ReadDataSourceRequest,
    ) -> Result<pb::ReadDataSourceResponse, Status> {
        self.record("ReadDataSource")?;
        Ok(self.read_data_source.clone())
    }

    async fn open_ephemeral_resource(
        &self,
        _request: pb::OpenEphemeralResourceRequest,
    ) -> Result<pb::OpenEphemeralResourceResponse, Status> {
        self.record("OpenEphemeralResource")?;
        Ok(self.open_ephemeral.clone())
    }

    async fn renew_ephemeral_resource(
        &self,
        _request: pb::RenewEphemeralResourceRequest,
    ) -> Result<pb::RenewEphemeralResourceResponse, Status> {
        self.record("RenewEphemeralResource")?;
        Ok(Default::default())
    }

    async fn close_ephemeral_resource(
        &self,
        _request: pb::CloseEphemeralResourceRequest,
    ) -> Result<pb::CloseEphemeralResourceResponse, Status> {
        self.record("CloseEphemeralResource")?;
        Ok(Default::default())
    }

    async fn list_resource(
        &self,
        _request: pb::ListResourceRequest,
    ) -> Result<RpcStream<pb::ListResourceEvent>, Status> {
        self.record("ListResource")?;
        let pulled = self.list_pulled.clone();
        let stream = tokio_stream::iter(self.list_events.clone()).map(move |event| {
            pulled.fetch_add(1, Ordering::SeqCst);
            Ok(event)
        });
        Ok(Box::pin(stream))
    }

    async fn plan_action(&self, _request: pb::PlanActionRequest) -> Result<pb::PlanActionResponse, Status> {
        self.record("PlanAction")?;
        Ok(self.plan_action.clone())
    }

    async fn invoke_action(
        &self,
        _request: pb::InvokeActionRequest,
    ) -> Result<RpcStream<pb::InvokeActionEvent>, Status> {
        self.record("InvokeAction")?;
        Ok(Box::pin(tokio_stream::iter(self.invoke_events.clone())))
    }

    async fn stop_provider(&self, _request: pb::StopProviderRequest) -> Result<pb::StopProviderResponse, Status> {
        self.record("StopProvider")?;
        Ok(self.stop.clone())
    }
}

/// A MessagePack dynamic value for a wire response.
///
/// # Panics
///
/// Panics if `value` does not conform to `ty`.
pub fn msgpack(value: &Value, ty: &AttributeType) -> pb::DynamicValue {
    let bytes = codec::encode(value, ty)
        .unwrap_or_else(|err| panic!("fixture value does not encode: {}", err.message()));
    pb::DynamicValue {
        msgpack: bytes,
        json: Vec::new(),
    }
}

fn proto_string_attr(name: &str) -> pb::schema::Attribute {
    pb::schema::Attribute {
        name: name.to_string(),
        r#type: br#""string""#.to_vec(),
        optional: true,
        ..Default::default()
    }
}

fn proto_schema(attr: &str) -> pb::Schema {
    pb::Schema {
        version: 0,
        block: Some(pb::schema::Block {
            attributes: vec![proto_string_attr(attr)],
            ..Default::default()
        }),
    }
}

fn proto_action(linkage: pb::action_schema::Linkage) -> pb::ActionSchema {
    pb::ActionSchema {
        schema: Some(proto_schema("attr")),
        linkage: Some(linkage),
    }
}

fn linked_resource() -> pb::action_schema::LinkedResource {
    pb::action_schema::LinkedResource {
        type_name: "resource".to_string(),
        description: String::new(),
    }
}

/// A wire schema with one of every kind of type, each with a single
/// optional string attribute `attr`.
///
/// Actions: `unlinked`, `lifecycle` (one `resource`) and `linked` (two
/// `resource`s). The list resource `list` filters on `filter_attr`.
pub fn proto_schema_fixture() -> pb::GetProviderSchemaResponse {
    use pb::action_schema::{lifecycle::ExecutionOrder, Lifecycle, Linkage, Linked, Unlinked};

    pb::GetProviderSchemaResponse {
        provider: Some(pb::Schema {
            version: 0,
            block: Some(pb::schema::Block::default()),
        }),
        resource_schemas: [("resource".to_string(), proto_schema("attr"))].into_iter().collect(),
        data_source_schemas: [("data".to_string(), proto_schema("attr"))].into_iter().collect(),
        ephemeral_resource_schemas: [("ephemeral".to_string(), proto_schema("attr"))].into_iter().collect(),
        list_resource_schemas: [("list".to_string(), proto_schema("filter_attr"))].into_iter().collect(),
        action_schemas: [
            ("unlinked".to_string(), proto_action(Linkage::Unlinked(Unlinked {}))),
            (
                "lifecycle".to_string(),
                proto_action(Linkage::Lifecycle(Lifecycle {
                    executes: ExecutionOrder::After as i32,
                    linked_resource: Some(linked_resource()),
                })),
            ),
            (
                "linked".to_string(),
                proto_action(Linkage::Linked(Linked {
                    linked_resources: vec![linked_resource(), linked_resource()],
                })),
            ),
        ]
        .into_iter()
        .collect(),
        diagnostics: Vec::new(),
        server_capabilities: Some(pb::ServerCapabilities::default()),
    }
}

fn identity_schemas_fixture() -> pb::GetResourceIdentitySchemasResponse {
    pb::GetResourceIdentitySchemasResponse {
        identity_schemas: [(
            "resource".to_string(),
            pb::ResourceIdentitySchema {
                version: 0,
                identity_attributes: vec![pb::resource_identity_schema::IdentityAttribute {
                    name: "id_attr".to_string(),
                    r#type: br#""string""#.to_vec(),
                    required_for_import: true,
                    ..Default::default()
                }],
            },
        )]
        .into_iter()
        .collect(),
        diagnostics: Vec::new(),
    }
}

// =========================================================================
// Fake Provider
// =========================================================================

/// Address [`FakeProviderFactory`] serves.
pub fn fake_provider_addr() -> ProviderAddr {
    ProviderAddr::new("hemmer", "fake")
}

/// An in-memory provider.
///
/// Types:
/// - `fake_thing` (v1): `id` computed, `name` required, `size` optional
///   (changing it forces replacement), `secret` optional and sensitive.
///   Version 0 state called `name` `title`. Identity `{ id }`.
/// - `fake_legacy` (v0): `id`, `title`. Movable to `fake_thing`.
/// - data `fake_data`: `value` is `"data:<name>"`.
/// - ephemeral `fake_secret`.
/// - actions `fake_notify` (after `fake_thing` changes) and
///   `fake_broadcast` (unlinked).
///
/// Remote objects live in a shared map keyed by id, so every session opened
/// on the same fake sees the same world.
pub struct FakeProvider {
    schema: Arc<ProviderSchema>,
    objects: Mutex<BTreeMap<String, (String, Value)>>,
    calls: Mutex<HashMap<String, usize>>,
    fail_apply: Mutex<BTreeSet<String>>,
    block_apply: Mutex<BTreeSet<String>>,
    apply_blocked: Notify,
    defer_reads: AtomicBool,
    ephemeral_ttl: Mutex<Option<chrono::Duration>>,
    next_id: AtomicU64,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn thing_schema() -> Schema {
    Schema::new(1)
        .with_attribute("id", Attribute::computed_string())
        .with_attribute("name", Attribute::required_string())
        .with_attribute("size", Attribute::optional_int64())
        .with_attribute("secret", Attribute::optional_string().sensitive())
}

fn message_schema() -> Schema {
    Schema::v0().with_attribute("message", Attribute::optional_string())
}

fn id_identity() -> IdentitySchema {
    IdentitySchema::new(0).with_attribute(
        "id",
        IdentityAttribute {
            attr_type: AttributeType::String,
            required_for_import: true,
            optional_for_import: false,
            description: None,
        },
    )
}

fn with_attr(value: &Value, name: &str, attr: Value) -> Value {
    let mut attrs = match value {
        Value::Object(attrs) => attrs.clone(),
        _ => BTreeMap::new(),
    };
    attrs.insert(name.to_string(), attr);
    Value::Object(attrs)
}

fn known_id(value: &Value) -> Option<String> {
    value.get_attr("id").and_then(Value::as_str).map(str::to_string)
}

impl FakeProvider {
    /// A fake with no remote objects.
    pub fn new() -> Self {
        let schema = ProviderSchema::new()
            .with_provider_config(Schema::v0().with_attribute("region", Attribute::optional_string()))
            .with_resource("fake_thing", thing_schema())
            .with_resource(
                "fake_legacy",
                Schema::v0()
                    .with_attribute("id", Attribute::computed_string())
                    .with_attribute("title", Attribute::required_string()),
            )
            .with_data_source(
                "fake_data",
                Schema::v0()
                    .with_attribute("name", Attribute::required_string())
                    .with_attribute("value", Attribute::computed_string()),
            )
            .with_ephemeral_resource(
                "fake_secret",
                Schema::v0()
                    .with_attribute("name", Attribute::optional_string())
                    .with_attribute("value", Attribute::computed_string().sensitive()),
            )
            .with_list_resource(
                "fake_thing",
                Schema::v0().with_attribute("name_prefix", Attribute::optional_string()),
            )
            .with_action(
                "fake_notify",
                ActionSchema {
                    schema: message_schema(),
                    linkage: ActionLinkage::Lifecycle {
                        executes: ExecutionOrder::After,
                        resource: LinkedResourceSchema::new("fake_thing"),
                    },
                },
            )
            .with_action(
                "fake_broadcast",
                ActionSchema {
                    schema: message_schema(),
                    linkage: ActionLinkage::Unlinked,
                },
            )
            .with_identity("fake_thing", id_identity())
            .with_capabilities(ServerCapabilities {
                plan_destroy: true,
                get_provider_schema_optional: false,
                move_resource_state: true,
            });
        Self {
            schema: Arc::new(schema),
            objects: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(HashMap::new()),
            fail_apply: Mutex::new(BTreeSet::new()),
            block_apply: Mutex::new(BTreeSet::new()),
            apply_blocked: Notify::new(),
            defer_reads: AtomicBool::new(false),
            ephemeral_ttl: Mutex::new(None),
            next_id: AtomicU64::new(1),
        }
    }

    /// How many times the named method was called, e.g. `"read_resource"`.
    pub fn calls(&self, method: &str) -> usize {
        lock(&self.calls).get(method).copied().unwrap_or(0)
    }

    /// Seed a remote object. Its `id` attribute is the key.
    pub fn insert_object(&self, type_name: &str, value: Value) {
        if let Some(id) = known_id(&value) {
            lock(&self.objects).insert(id, (type_name.to_string(), value));
        }
    }

    /// The remote object with `id`.
    pub fn object(&self, id: &str) -> Option<Value> {
        lock(&self.objects).get(id).map(|(_, value)| value.clone())
    }

    /// Every remote object of `type_name`, by id.
    pub fn objects(&self, type_name: &str) -> BTreeMap<String, Value> {
        lock(&self.objects)
            .iter()
            .filter(|(_, (ty, _))| ty == type_name)
            .map(|(id, (_, value))| (id.clone(), value.clone()))
            .collect()
    }

    /// Make applies of objects named `name` fail.
    pub fn fail_apply_for(&self, name: &str) {
        lock(&self.fail_apply).insert(name.to_string());
    }

    /// Make applies of objects named `name` hang until the caller gives up.
    pub fn block_apply_for(&self, name: &str) {
        lock(&self.block_apply).insert(name.to_string());
    }

    /// Wait until an apply blocked by [`FakeProvider::block_apply_for`] has
    /// started.
    pub async fn apply_blocked(&self) {
        self.apply_blocked.notified().await;
    }

    /// Make every read defer.
    pub fn defer_reads(&self, defer: bool) {
        self.defer_reads.store(defer, Ordering::SeqCst);
    }

    /// Lease lifetime for ephemeral resources; `None` never expires.
    pub fn set_ephemeral_ttl(&self, ttl: chrono::Duration) {
        *lock(&self.ephemeral_ttl) = Some(ttl);
    }

    fn record(&self, method: &str) {
        *lock(&self.calls).entry(method.to_string()).or_insert(0) += 1;
    }

    fn next(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn renew_at(&self) -> Option<chrono::DateTime<Utc>> {
        lock(&self.ephemeral_ttl).map(|ttl| Utc::now() + ttl)
    }

    fn identity_for(&self, type_name: &str, value: &Value) -> Value {
        match (self.schema.identities.contains_key(type_name), known_id(value)) {
            (true, Some(id)) => Value::object([("id", Value::string(id))]),
            _ => Value::Null,
        }
    }
}

#[async_trait::async_trait]
impl Provider for FakeProvider {
    async fn get_provider_schema(&self) -> GetProviderSchemaResponse {
        self.record("get_provider_schema");
        GetProviderSchemaResponse {
            schema: self.schema.clone(),
            diagnostics: Diagnostics::new(),
        }
    }

    async fn validate_provider_config(&self, request: ValidateProviderConfigRequest) -> Diagnostics {
        self.record("validate_provider_config");
        validate(&self.schema.provider, &request.config)
    }

    async fn validate_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        self.record("validate_resource_config");
        match self.schema.resources.get(&request.type_name) {
            Some(schema) => validate(schema, &request.config),
            None => unknown_type("resource", &request.type_name).into(),
        }
    }

    async fn validate_data_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        self.record("validate_data_resource_config");
        match self.schema.data_sources.get(&request.type_name) {
            Some(schema) => validate(schema, &request.config),
            None => unknown_type("data source", &request.type_name).into(),
        }
    }

    async fn validate_list_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        self.record("validate_list_resource_config");
        if self.schema.list_resources.contains_key(&request.type_name) {
            Diagnostics::new()
        } else {
            unknown_type("list resource", &request.type_name).into()
        }
    }

    async fn upgrade_resource_state(&self, request: UpgradeResourceStateRequest) -> UpgradeResourceStateResponse {
        self.record("upgrade_resource_state");
        let Some(schema) = self.schema.resources.get(&request.type_name) else {
            return UpgradeResourceStateResponse {
                diagnostics: unknown_type("resource", &request.type_name).into(),
                ..Default::default()
            };
        };
        let mut json: serde_json::Value = match serde_json::from_slice(&request.raw_state_json) {
            Ok(json) => json,
            Err(err) => {
                return UpgradeResourceStateResponse {
                    diagnostics: EngineError::from(err).into(),
                    ..Default::default()
                }
            },
        };
        if request.type_name == "fake_thing" && request.version == 0 {
            if let Some(attrs) = json.as_object_mut() {
                if let Some(title) = attrs.remove("title") {
                    attrs.insert("name".to_string(), title);
                }
            }
        }
        let upgraded = serde_json::to_vec(&json)
            .map_err(EngineError::from)
            .and_then(|bytes| codec::decode_json(&bytes, &schema.block.implied_type()));
        match upgraded {
            Ok(upgraded_state) => UpgradeResourceStateResponse {
                upgraded_state,
                diagnostics: Diagnostics::new(),
            },
            Err(err) => UpgradeResourceStateResponse {
                diagnostics: err.into(),
                ..Default::default()
            },
        }
    }

    async fn upgrade_resource_identity(
        &self,
        request: UpgradeResourceIdentityRequest,
    ) -> UpgradeResourceIdentityResponse {
        self.record("upgrade_resource_identity");
        let Some(identity) = self.schema.identities.get(&request.type_name) else {
            return UpgradeResourceIdentityResponse {
                diagnostics: unknown_type("resource identity", &request.type_name).into(),
                ..Default::default()
            };
        };
        match codec::decode_json(&request.raw_identity_json, &identity.implied_type()) {
            Ok(upgraded_identity) => UpgradeResourceIdentityResponse {
                upgraded_identity,
                diagnostics: Diagnostics::new(),
            },
            Err(err) => UpgradeResourceIdentityResponse {
                diagnostics: err.into(),
                ..Default::default()
            },
        }
    }

    async fn configure_provider(&self, _request: ConfigureProviderRequest) -> Diagnostics {
        self.record("configure_provider");
        Diagnostics::new()
    }

    async fn read_resource(&self, request: ReadResourceRequest) -> ReadResourceResponse {
        self.record("read_resource");
        if self.defer_reads.load(Ordering::SeqCst) {
            return ReadResourceResponse {
                new_state: request.prior_state,
                private: request.private,
                deferred: Some(Deferred::new(DeferredReason::AbsentPrereq)),
                ..Default::default()
            };
        }
        let current = known_id(&request.prior_state).and_then(|id| self.object(&id));
        let new_state = current.unwrap_or_default();
        ReadResourceResponse {
            identity: self.identity_for(&request.type_name, &new_state),
            new_state,
            private: request.private,
            deferred: None,
            diagnostics: Diagnostics::new(),
        }
    }

    async fn plan_resource_change(&self, request: PlanResourceChangeRequest) -> PlanResourceChangeResponse {
        self.record("plan_resource_change");
        if request.proposed_new_state.is_null() {
            return PlanResourceChangeResponse {
                planned_private: request.prior_private,
                ..Default::default()
            };
        }
        let mut planned = request.proposed_new_state.clone();
        if planned.get_attr("id").map_or(true, Value::is_null) {
            planned = with_attr(&planned, "id", Value::Unknown);
        }
        let mut requires_replace = Vec::new();
        if !request.prior_state.is_null() && request.prior_state.get_attr("size") != planned.get_attr("size") {
            requires_replace.push(AttributePath::root().attr("size"));
        }
        PlanResourceChangeResponse {
            planned_identity: self.identity_for(&request.type_name, &planned),
            planned_state: planned,
            requires_replace,
            planned_private: request.prior_private,
            deferred: None,
            diagnostics: Diagnostics::new(),
        }
    }

    async fn apply_resource_change(&self, request: ApplyResourceChangeRequest) -> ApplyResourceChangeResponse {
        self.record("apply_resource_change");
        let name = request
            .planned_state
            .get_attr("name")
            .or_else(|| request.prior_state.get_attr("name"))
            .and_then(Value::as_str)
            .map(str::to_string);
        if let Some(name) = name {
            let blocked = lock(&self.block_apply).contains(&name);
            if blocked {
                self.apply_blocked.notify_one();
                return std::future::pending().await;
            }
            if lock(&self.fail_apply).contains(&name) {
                return ApplyResourceChangeResponse {
                    diagnostics: Diagnostic::error("Simulated apply failure")
                        .with_detail(format!("The fake provider refused to apply \"{}\".", name))
                        .into(),
                    ..Default::default()
                };
            }
        }

        if request.planned_state.is_null() {
            if let Some(id) = known_id(&request.prior_state) {
                lock(&self.objects).remove(&id);
            }
            return ApplyResourceChangeResponse::default();
        }

        let id = known_id(&request.planned_state).unwrap_or_else(|| format!("fake-{}", self.next()));
        let new_state = with_attr(&request.planned_state, "id", Value::string(id.clone()));
        lock(&self.objects).insert(id, (request.type_name.clone(), new_state.clone()));
        ApplyResourceChangeResponse {
            new_identity: self.identity_for(&request.type_name, &new_state),
            new_state,
            private: request.planned_private,
            diagnostics: Diagnostics::new(),
        }
    }

    async fn import_resource_state(&self, request: ImportResourceStateRequest) -> ImportResourceStateResponse {
        self.record("import_resource_state");
        match lock(&self.objects).get(&request.id) {
            Some((type_name, state)) if type_name == &request.type_name => ImportResourceStateResponse {
                imported_resources: vec![ImportedResource {
                    type_name: type_name.clone(),
                    state: state.clone(),
                    private: Vec::new(),
                    identity: self.identity_for(type_name, state),
                }],
                deferred: None,
                diagnostics: Diagnostics::new(),
            },
            _ => ImportResourceStateResponse {
                diagnostics: Diagnostic::error("Cannot import non-existent remote object")
                    .with_detail(format!("No {} object has id \"{}\".", request.type_name, request.id))
                    .into(),
                ..Default::default()
            },
        }
    }

    async fn move_resource_state(&self, request: MoveResourceStateRequest) -> MoveResourceStateResponse {
        self.record("move_resource_state");
        if request.source_type_name != "fake_legacy" || request.target_type_name != "fake_thing" {
            return MoveResourceStateResponse {
                diagnostics: Diagnostic::error("Unsupported move")
                    .with_detail(format!(
                        "Cannot move {} objects to {}.",
                        request.source_type_name, request.target_type_name
                    ))
                    .into(),
                ..Default::default()
            };
        }
        let source: serde_json::Value = match serde_json::from_slice(&request.source_state_json) {
            Ok(source) => source,
            Err(err) => {
                return MoveResourceStateResponse {
                    diagnostics: EngineError::from(err).into(),
                    ..Default::default()
                }
            },
        };
        let attr = |name: &str| Value::from_json(&source[name]);
        let target_state = Value::object([
            ("id", attr("id")),
            ("name", attr("title")),
            ("size", Value::Null),
            ("secret", Value::Null),
        ]);
        MoveResourceStateResponse {
            target_identity: self.identity_for("fake_thing", &target_state),
            target_state,
            target_private: request.source_private,
            diagnostics: Diagnostics::new(),
        }
    }

    async fn read_data_source(&self, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        self.record("read_data_source");
        if request.type_name != "fake_data" {
            return ReadDataSourceResponse {
                diagnostics: unknown_type("data source", &request.type_name).into(),
                ..Default::default()
            };
        }
        let name = request.config.get_attr("name").cloned().unwrap_or_default();
        let value = match name.as_str() {
            Some(name) => Value::string(format!("data:{}", name)),
            None => Value::Null,
        };
        ReadDataSourceResponse {
            state: Value::object([("name", name), ("value", value)]),
            deferred: None,
            diagnostics: Diagnostics::new(),
        }
    }

    async fn open_ephemeral_resource(&self, request: OpenEphemeralResourceRequest) -> OpenEphemeralResourceResponse {
        self.record("open_ephemeral_resource");
        let n = self.next();
        OpenEphemeralResourceResponse {
            result: Value::object([
                ("name", request.config.get_attr("name").cloned().unwrap_or_default()),
                ("value", Value::string(format!("secret-{}", n))),
            ]),
            private: format!("lease-{}", n).into_bytes(),
            renew_at: self.renew_at(),
            deferred: None,
            diagnostics: Diagnostics::new(),
        }
    }

    async fn renew_ephemeral_resource(
        &self,
        _request: RenewEphemeralResourceRequest,
    ) -> RenewEphemeralResourceResponse {
        self.record("renew_ephemeral_resource");
        RenewEphemeralResourceResponse {
            renew_at: self.renew_at(),
            private: format!("lease-{}", self.next()).into_bytes(),
            diagnostics: Diagnostics::new(),
        }
    }

    async fn close_ephemeral_resource(&self, _request: CloseEphemeralResourceRequest) -> Diagnostics {
        self.record("close_ephemeral_resource");
        Diagnostics::new()
    }

    async fn list_resource(&self, request: ListResourceRequest) -> ListResourceResponse {
        self.record("list_resource");
        let prefix = request
            .config
            .get_attr("name_prefix")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let results = self
            .objects(&request.type_name)
            .into_values()
            .filter(|value| {
                value
                    .get_attr("name")
                    .and_then(Value::as_str)
                    .is_some_and(|name| name.starts_with(&prefix))
            })
            .take(if request.limit == 0 { usize::MAX } else { request.limit })
            .map(|value| ListResourceResult {
                display_name: value.get_attr("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                identity: self.identity_for(&request.type_name, &value),
                state: request.include_resource_object.then(|| value.clone()),
                diagnostics: Diagnostics::new(),
            })
            .collect();
        ListResourceResponse {
            results,
            diagnostics: Diagnostics::new(),
        }
    }

    async fn plan_action(&self, request: PlanActionRequest) -> PlanActionResponse {
        self.record("plan_action");
        if !self.schema.actions.contains_key(&request.action_type) {
            return PlanActionResponse {
                diagnostics: unknown_type("action", &request.action_type).into(),
                ..Default::default()
            };
        }
        PlanActionResponse {
            linked_resources: request
                .linked_resources
                .into_iter()
                .map(|linked| LinkedResourcePlan {
                    planned_state: linked.planned_state,
                    planned_identity: linked.prior_identity,
                })
                .collect(),
            deferred: None,
            diagnostics: Diagnostics::new(),
        }
    }

    async fn invoke_action(&self, request: InvokeActionRequest) -> InvokeActionResponse {
        self.record("invoke_action");
        let message = request
            .config
            .get_attr("message")
            .and_then(Value::as_str)
            .unwrap_or("invoked")
            .to_string();
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.try_send(InvokeActionEvent::Progress {
            message: format!("{}: {}", request.action_type, message),
        });
        let _ = tx.try_send(InvokeActionEvent::Completed {
            linked_resources: request
                .linked_resources
                .into_iter()
                .map(|linked| LinkedResourceResult {
                    new_state: linked.planned_state,
                    new_identity: linked.planned_identity,
                })
                .collect(),
            diagnostics: Diagnostics::new(),
        });
        InvokeActionResponse {
            events: Some(rx),
            diagnostics: Diagnostics::new(),
        }
    }

    async fn stop_provider(&self) -> Diagnostics {
        self.record("stop_provider");
        Diagnostics::new()
    }
}

/// Serves one shared [`FakeProvider`] for [`fake_provider_addr`].
#[derive(Clone)]
pub struct FakeProviderFactory {
    fake: Arc<FakeProvider>,
}

impl FakeProviderFactory {
    /// Serve `fake`.
    pub fn new(fake: Arc<FakeProvider>) -> Self {
        Self { fake }
    }
}

#[async_trait::async_trait]
impl ProviderFactory for FakeProviderFactory {
    async fn new_provider(&self, addr: &ProviderAddr) -> Result<Arc<dyn Provider>, EngineError> {
        if addr == &fake_provider_addr() {
            Ok(self.fake.clone())
        } else {
            Err(EngineError::Configuration(format!("no provider available for {}", addr)))
        }
    }
}

// =========================================================================
// Stack Harness
// =========================================================================

/// Parse a configuration document.
///
/// # Panics
///
/// Panics if the document is not a valid configuration.
pub fn parse_config(doc: serde_json::Value) -> StackConfig {
    StackConfig::parse(&doc.to_string()).unwrap_or_else(|err| panic!("invalid test configuration: {}", err))
}

/// Everything one plan produced.
#[derive(Debug, Default)]
pub struct PlanRun {
    /// Raw fragments in emission order.
    pub fragments: Vec<Vec<u8>>,
    /// Decoded descriptions.
    pub descriptions: Vec<PlannedDescription>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
    /// Progress events.
    pub progress: Vec<ProgressEvent>,
}

impl PlanRun {
    /// Whether the plan ended applyable.
    pub fn applyable(&self) -> bool {
        self.descriptions
            .iter()
            .any(|d| matches!(d, PlannedDescription::PlanApplyable { applyable: true }))
    }

    /// The change planned for the object at `addr`.
    pub fn resource(&self, addr: &str) -> Option<&ResourceInstanceChange> {
        self.descriptions.iter().find_map(|d| match d {
            PlannedDescription::ResourceInstance(change) if change.addr.to_string() == addr => Some(change),
            _ => None,
        })
    }

    /// Every planned resource change.
    pub fn resources(&self) -> Vec<&ResourceInstanceChange> {
        self.descriptions
            .iter()
            .filter_map(|d| match d {
                PlannedDescription::ResourceInstance(change) => Some(change),
                _ => None,
            })
            .collect()
    }

    /// The change planned for the component instance at `addr`.
    pub fn component(&self, addr: &str) -> Option<&ComponentInstanceChange> {
        self.descriptions.iter().find_map(|d| match d {
            PlannedDescription::ComponentInstance(change) if change.addr.to_string() == addr => Some(change),
            _ => None,
        })
    }
}

/// Everything one apply produced.
#[derive(Debug, Default)]
pub struct ApplyRun {
    /// Changes in emission order.
    pub changes: Vec<AppliedChange>,
    /// Diagnostics.
    pub diagnostics: Diagnostics,
    /// Progress events.
    pub progress: Vec<ProgressEvent>,
}

/// Drives plans and applies against a [`FakeProvider`], folding applied
/// changes into state the way a caller would.
pub struct StackHarness {
    /// The provider every session talks to.
    pub fake: Arc<FakeProvider>,
    /// Input variable values.
    pub inputs: BTreeMap<String, Value>,
    /// Engine tuning.
    pub options: EngineOptions,
    config: Arc<StackConfig>,
    locks: Arc<DependencyLocks>,
    state: StateFold,
}

impl StackHarness {
    /// A harness with empty state and every configured provider locked.
    pub fn new(config: StackConfig) -> Self {
        let locks = config
            .provider_addrs()
            .into_iter()
            .fold(DependencyLocks::default(), |locks, addr| locks.with_provider(addr, "1.0.0"));
        Self {
            fake: Arc::new(FakeProvider::new()),
            inputs: BTreeMap::new(),
            options: EngineOptions::default(),
            config: Arc::new(config),
            locks: Arc::new(locks),
            state: StateFold::new(),
        }
    }

    /// Set an input variable.
    pub fn with_input(mut self, name: &str, value: Value) -> Self {
        self.inputs.insert(name.to_string(), value);
        self
    }

    /// Replace the configuration, keeping state and locks.
    pub fn set_config(&mut self, config: StackConfig) {
        self.config = Arc::new(config);
    }

    /// Replace the dependency locks.
    pub fn set_locks(&mut self, locks: DependencyLocks) {
        self.locks = Arc::new(locks);
    }

    /// The folded state so far.
    pub fn state(&self) -> &StateFold {
        &self.state
    }

    /// Replace the folded state.
    pub fn set_state(&mut self, state: StateFold) {
        self.state = state;
    }

    fn factory(&self) -> Arc<dyn ProviderFactory> {
        Arc::new(FakeProviderFactory::new(self.fake.clone()))
    }

    /// Plan against the current state.
    pub async fn plan(&self, mode: PlanMode) -> PlanRun {
        let request = PlanRequest {
            config: self.config.clone(),
            prior_state: Arc::new(self.state.raw().clone()),
            locks: self.locks.clone(),
            providers: self.factory(),
            inputs: self.inputs.clone(),
            mode,
            options: self.options.clone(),
        };
        let mut stream = plan_stack_changes(request, CancellationToken::new());
        let mut run = PlanRun::default();
        while let Some(event) = stream.next().await {
            match event {
                StackEvent::Change(change) => {
                    run.descriptions.extend(change.planned_descriptions());
                    run.fragments.extend(change.raw);
                },
                StackEvent::Progress(progress) => run.progress.push(progress),
                StackEvent::Diagnostic(diag) => run.diagnostics.push(diag),
            }
        }
        run
    }

    /// Apply `plan` and fold the result into state.
    pub async fn apply(&mut self, plan: &PlanRun) -> ApplyRun {
        let request = ApplyRequest {
            config: self.config.clone(),
            plan: plan.fragments.clone(),
            locks: self.locks.clone(),
            providers: self.factory(),
            inputs: self.inputs.clone(),
            options: self.options.clone(),
        };
        let mut stream = apply_stack_changes(request, CancellationToken::new());
        let mut run = ApplyRun::default();
        while let Some(event) = stream.next().await {
            match event {
                StackEvent::Change(change) => {
                    self.state.apply_raw(&change.raw);
                    self.state.apply_descriptions(&change.descriptions);
                    run.changes.push(change);
                },
                StackEvent::Progress(progress) => run.progress.push(progress),
                StackEvent::Diagnostic(diag) => run.diagnostics.push(diag),
            }
        }
        run
    }

    /// Plan in normal mode and apply.
    ///
    /// # Panics
    ///
    /// Panics if the plan reports errors.
    pub async fn converge(&mut self) -> ApplyRun {
        let plan = self.plan(PlanMode::Normal).await;
        assert_no_errors(&plan.diagnostics);
        self.apply(&plan).await
    }
}

// =========================================================================
// Assertion Helpers
// =========================================================================

fn error_summaries(diagnostics: &Diagnostics) -> Vec<String> {
    diagnostics
        .errors()
        .map(|d| match &d.detail {
            Some(detail) => format!("{}: {}", d.summary, detail),
            None => d.summary.clone(),
        })
        .collect()
}

/// Assert that diagnostics contain no errors.
///
/// # Panics
///
/// Panics if there are any error diagnostics.
pub fn assert_no_errors(diagnostics: &Diagnostics) {
    let errors = error_summaries(diagnostics);
    assert!(
        errors.is_empty(),
        "Expected no errors, but got {} error(s): {:?}",
        errors.len(),
        errors
    );
}

/// Assert that diagnostics contain at least one error.
///
/// # Panics
///
/// Panics if there are no error diagnostics.
pub fn assert_has_errors(diagnostics: &Diagnostics) {
    assert!(diagnostics.has_errors(), "Expected at least one error, but got none");
}

/// Assert that diagnostics contain an error whose summary contains
/// `substring`.
///
/// # Panics
///
/// Panics if no error diagnostic matches.
pub fn assert_error_contains(diagnostics: &Diagnostics, substring: &str) {
    let matched = diagnostics.errors().any(|d| d.summary.contains(substring));
    assert!(
        matched,
        "Expected an error containing '{}', but no matching error found. Errors: {:?}",
        substring,
        error_summaries(diagnostics)
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_err;

    #[tokio::test]
    async fn test_fake_apply_assigns_ids() {
        let fake = FakeProvider::new();
        let resp = fake
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: "fake_thing".to_string(),
                planned_state: Value::object([("id", Value::Unknown), ("name", Value::string("a"))]),
                ..Default::default()
            })
            .await;
        assert_no_errors(&resp.diagnostics);
        let id = known_id(&resp.new_state).unwrap();
        assert!(id.starts_with("fake-"));
        assert_eq!(fake.object(&id), Some(resp.new_state));
    }

    #[tokio::test]
    async fn test_fake_import_missing() {
        let fake = FakeProvider::new();
        let resp = fake
            .import_resource_state(ImportResourceStateRequest {
                type_name: "fake_thing".to_string(),
                id: "nope".to_string(),
                ..Default::default()
            })
            .await;
        assert_error_contains(&resp.diagnostics, "non-existent");
    }

    #[tokio::test]
    async fn test_fake_upgrade_renames_title() {
        let fake = FakeProvider::new();
        let resp = fake
            .upgrade_resource_state(UpgradeResourceStateRequest {
                type_name: "fake_thing".to_string(),
                version: 0,
                raw_state_json: br#"{"id":"x","title":"old"}"#.to_vec(),
            })
            .await;
        assert_no_errors(&resp.diagnostics);
        assert_eq!(resp.upgraded_state.get_attr("name"), Some(&Value::string("old")));
    }

    #[tokio::test]
    async fn test_factory_rejects_other_providers() {
        let factory = FakeProviderFactory::new(Arc::new(FakeProvider::new()));
        assert_err!(factory.new_provider(&ProviderAddr::new("hemmer", "other")).await.map(|_| ()));
    }

    #[test]
    #[should_panic(expected = "Expected an error containing")]
    fn test_assert_error_contains_panics() {
        let diags: Diagnostics = Diagnostic::error("Something else").into();
        assert_error_contains(&diags, "missing");
    }
}
