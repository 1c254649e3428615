//! [`Provider`] over the wire protocol.
//!
//! Every call resolves the provider's schema first (cached per instance, and
//! per address in a [`SchemaRegistry`]), checks what it can locally, encodes
//! values as MessagePack, and decodes responses against the current schema.
//! Transport failures become error diagnostics.

use super::rpc::{PluginProcess, ProviderRpc};
use super::*;
use crate::addrs::ProviderAddr;
use crate::codec::{DynamicValue, Format};
use crate::error::EngineError;
use crate::generated as pb;
use crate::registry::SchemaRegistry;
use crate::schema::{
    ActionLinkage, ActionSchema, Attribute, AttributeFlags, AttributeType, Block, ExecutionOrder,
    IdentityAttribute, IdentitySchema, LinkedResourceSchema, NestedBlock, NestingMode, Schema,
    ServerCapabilities,
};
use crate::validation;
use crate::value::PathStep;
use tokio_stream::StreamExt;
use tonic::Status;
use tracing::{debug, error, info, instrument, warn};

/// Default channel capacity for action event streams.
pub const DEFAULT_EVENT_BUFFER: usize = 64;

macro_rules! try_diag {
    ($resp:ident, $expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(diag) => {
                $resp.diagnostics.push(diag);
                return $resp;
            },
        }
    };
    (@diags $diags:ident, $expr:expr) => {
        match $expr {
            Ok(v) => v,
            Err(diag) => {
                $diags.push(diag);
                return $diags;
            },
        }
    };
}

/// A provider reached through a [`ProviderRpc`] transport.
pub struct GrpcProvider {
    rpc: Arc<dyn ProviderRpc>,
    addr: Option<ProviderAddr>,
    registry: Arc<SchemaRegistry>,
    schema: tokio::sync::Mutex<Option<Arc<ProviderSchema>>>,
    event_buffer: usize,
    // Held so the child is killed when the provider is dropped.
    process: Option<std::sync::Mutex<tokio::process::Child>>,
}

impl std::fmt::Debug for GrpcProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrpcProvider")
            .field("addr", &self.addr)
            .field("event_buffer", &self.event_buffer)
            .field("process", &self.process.is_some())
            .finish_non_exhaustive()
    }
}

impl GrpcProvider {
    /// Wrap a transport. Without an address the schema is cached only on
    /// this instance.
    pub fn new(rpc: Arc<dyn ProviderRpc>) -> Self {
        Self {
            rpc,
            addr: None,
            registry: SchemaRegistry::global(),
            schema: tokio::sync::Mutex::new(None),
            event_buffer: DEFAULT_EVENT_BUFFER,
            process: None,
        }
    }

    /// Wrap a launched provider process, tying its lifetime to this value.
    pub fn from_process(process: PluginProcess) -> Self {
        let mut provider = Self::new(Arc::new(process.rpc));
        provider.process = Some(std::sync::Mutex::new(process.child));
        provider
    }

    /// Set the provider address, enabling the shared schema cache.
    pub fn with_address(mut self, addr: ProviderAddr) -> Self {
        self.addr = Some(addr);
        self
    }

    /// Use a specific schema registry instead of the global one.
    pub fn with_registry(mut self, registry: Arc<SchemaRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Set the capacity of action event channels.
    pub fn with_event_buffer(mut self, event_buffer: usize) -> Self {
        self.event_buffer = event_buffer.max(1);
        self
    }

    async fn schema(&self) -> (Option<Arc<ProviderSchema>>, Diagnostics) {
        let mut local = self.schema.lock().await;
        if let Some(schema) = local.as_ref() {
            return (Some(schema.clone()), Diagnostics::new());
        }
        let (schema, diagnostics) = match &self.addr {
            Some(addr) => self.registry.get_or_fetch(addr, || self.fetch_schema()).await,
            None => {
                let (schema, diagnostics) = self.fetch_schema().await;
                (schema.map(Arc::new), diagnostics)
            },
        };
        if let Some(schema) = &schema {
            if !diagnostics.has_errors() {
                *local = Some(schema.clone());
            }
        }
        (schema, diagnostics)
    }

    #[instrument(skip(self), name = "provider.get_provider_schema")]
    async fn fetch_schema(&self) -> (Option<ProviderSchema>, Diagnostics) {
        debug!("GetProviderSchema called");
        let mut diags = Diagnostics::new();
        let mut resp = match self.rpc.get_provider_schema(pb::GetProviderSchemaRequest {}).await {
            Ok(resp) => resp,
            Err(status) => {
                error!(error = %status, "GetProviderSchema failed");
                diags.push(status_diagnostic(status));
                return (None, diags);
            },
        };
        diags.extend(diagnostics_from_proto(std::mem::take(&mut resp.diagnostics)));
        if diags.has_errors() {
            return (None, diags);
        }
        let mut schema = match provider_schema_from_proto(resp) {
            Ok(schema) => schema,
            Err(diag) => {
                diags.push(diag);
                return (None, diags);
            },
        };

        match self
            .rpc
            .get_resource_identity_schemas(pb::GetResourceIdentitySchemasRequest {})
            .await
        {
            Ok(resp) => {
                diags.extend(diagnostics_from_proto(resp.diagnostics));
                for (name, identity) in resp.identity_schemas {
                    match identity_schema_from_proto(identity) {
                        Ok(identity) => {
                            schema.identities.insert(name, identity);
                        },
                        Err(diag) => diags.push(diag),
                    }
                }
            },
            Err(status) if status.code() == tonic::Code::Unimplemented => {
                debug!("provider does not implement resource identity schemas");
            },
            Err(status) => {
                error!(error = %status, "GetResourceIdentitySchemas failed");
                diags.push(status_diagnostic(status));
                return (None, diags);
            },
        }
        if diags.has_errors() {
            return (None, diags);
        }

        info!(
            resources = schema.resources.len(),
            data_sources = schema.data_sources.len(),
            actions = schema.actions.len(),
            "GetProviderSchema completed"
        );
        (Some(schema), diags)
    }

    async fn validate_typed(
        &self,
        kind: ConfigKind,
        request: ValidateResourceConfigRequest,
    ) -> Diagnostics {
        let mut diags = Diagnostics::new();
        let (schema, d) = self.schema().await;
        diags.extend(d);
        let Some(schema) = schema else {
            return diags;
        };
        let block = try_diag!(@diags diags, kind.block(&schema, &request.type_name));
        let config = validation::complete_config(block, &request.config);
        diags.extend(validation::validate_block(block, &config));
        if diags.has_errors() {
            return diags;
        }
        let config = try_diag!(@diags diags, encode(&config, &block.implied_type()));
        let req = pb::ValidateResourceConfigRequest {
            type_name: request.type_name.clone(),
            config,
        };
        let result = match kind {
            ConfigKind::Resource => self.rpc.validate_resource_config(req).await,
            ConfigKind::Data => self.rpc.validate_data_resource_config(req).await,
            ConfigKind::List => self.rpc.validate_list_resource_config(req).await,
        };
        match result {
            Ok(resp) => diags.extend(diagnostics_from_proto(resp.diagnostics)),
            Err(status) => {
                error!(type_name = %request.type_name, error = %status, "config validation failed");
                diags.push(status_diagnostic(status));
            },
        }
        log_outcome("Validate", &diags);
        diags
    }
}

#[derive(Debug, Clone, Copy)]
enum ConfigKind {
    Resource,
    Data,
    List,
}

impl ConfigKind {
    fn block<'a>(self, schema: &'a ProviderSchema, type_name: &str) -> Result<&'a Block, Diagnostic> {
        match self {
            Self::Resource => resource_schema(schema, type_name).map(|s| &s.block),
            Self::Data => schema
                .data_sources
                .get(type_name)
                .map(|s| &s.block)
                .ok_or_else(|| unknown_type("data source", type_name)),
            Self::List => list_filter_block(schema, type_name),
        }
    }
}

fn resource_schema<'a>(schema: &'a ProviderSchema, type_name: &str) -> Result<&'a Schema, Diagnostic> {
    schema
        .resources
        .get(type_name)
        .ok_or_else(|| unknown_type("resource", type_name))
}

fn list_filter_block<'a>(schema: &'a ProviderSchema, type_name: &str) -> Result<&'a Block, Diagnostic> {
    let wrapper = schema
        .list_resources
        .get(type_name)
        .ok_or_else(|| unknown_type("list resource", type_name))?;
    wrapper
        .block
        .blocks
        .get("config")
        .map(|nested| &nested.block)
        .ok_or_else(|| unknown_type("list resource", type_name))
}

fn log_outcome(operation: &str, diagnostics: &Diagnostics) {
    if diagnostics.has_errors() {
        warn!(diagnostics = diagnostics.len(), "{} completed with errors", operation);
    } else {
        debug!("{} completed", operation);
    }
}

fn status_diagnostic(status: Status) -> Diagnostic {
    EngineError::from(status).into()
}

fn encode(value: &Value, ty: &AttributeType) -> Result<Option<pb::DynamicValue>, Diagnostic> {
    DynamicValue::encode(value, ty, Format::MsgPack)
        .map(|dv| Some(dv.into()))
        .map_err(Diagnostic::from)
}

fn decode(dv: Option<pb::DynamicValue>, block: &Block) -> Result<Value, Diagnostic> {
    match dv {
        None => Ok(Value::Null),
        Some(dv) => DynamicValue::from(dv)
            .decode_object(block)
            .map_err(Diagnostic::from),
    }
}

fn encode_identity(
    value: &Value,
    identity: Option<&IdentitySchema>,
) -> Result<Option<pb::ResourceIdentityData>, Diagnostic> {
    match identity {
        Some(identity) if !value.is_null() => Ok(Some(pb::ResourceIdentityData {
            identity_data: encode(value, &identity.implied_type())?,
        })),
        _ => Ok(None),
    }
}

fn decode_identity(
    data: Option<pb::ResourceIdentityData>,
    identity: Option<&IdentitySchema>,
    type_name: &str,
) -> Result<Value, Diagnostic> {
    let Some(dv) = data.and_then(|d| d.identity_data) else {
        return Ok(Value::Null);
    };
    let identity = identity.ok_or_else(|| unknown_type("resource identity", type_name))?;
    decode(Some(dv), &identity.as_block())
}

fn caps(caps: ClientCapabilities) -> Option<pb::ClientCapabilities> {
    Some(pb::ClientCapabilities {
        deferral_allowed: caps.deferral_allowed,
    })
}

fn check_deferral(
    deferred: Option<Deferred>,
    caps: ClientCapabilities,
    diagnostics: &mut Diagnostics,
) -> Option<Deferred> {
    if deferred.is_some() && !caps.deferral_allowed {
        diagnostics.push(
            Diagnostic::error("Provider deferred changes when the engine did not allow it")
                .with_detail("The provider returned a deferred response although deferrals were not allowed for this request."),
        );
    }
    deferred
}

fn arity_diagnostic(action_type: &str, expected: usize, got: usize) -> Diagnostic {
    Diagnostic::error("Invalid linked resources").with_detail(format!(
        "The action \"{}\" requires exactly {} linked resource(s), but {} were provided.",
        action_type, expected, got
    ))
}

/// Convert wire diagnostics.
pub fn diagnostics_from_proto(diagnostics: Vec<pb::Diagnostic>) -> Diagnostics {
    diagnostics.into_iter().map(diagnostic_from_proto).collect()
}

fn diagnostic_from_proto(d: pb::Diagnostic) -> Diagnostic {
    let mut diag = match pb::diagnostic::Severity::try_from(d.severity) {
        Ok(pb::diagnostic::Severity::Warning) => Diagnostic::warning(d.summary),
        _ => Diagnostic::error(d.summary),
    };
    if !d.detail.is_empty() {
        diag = diag.with_detail(d.detail);
    }
    if let Some(path) = d.attribute {
        diag = diag.with_attribute(path_from_proto(path));
    }
    diag
}

fn path_from_proto(path: pb::AttributePath) -> AttributePath {
    use pb::attribute_path::step::Selector;
    AttributePath::from_steps(
        path.steps
            .into_iter()
            .filter_map(|step| step.selector)
            .map(|selector| match selector {
                Selector::AttributeName(name) => PathStep::Attr(name),
                Selector::ElementKeyString(key) => PathStep::Key(key),
                Selector::ElementKeyInt(index) => PathStep::Index(index),
            })
            .collect(),
    )
}

/// Convert a domain attribute path to its wire form.
pub fn path_to_proto(path: &AttributePath) -> pb::AttributePath {
    use pb::attribute_path::step::Selector;
    pb::AttributePath {
        steps: path
            .steps()
            .iter()
            .map(|step| pb::attribute_path::Step {
                selector: Some(match step {
                    PathStep::Attr(name) => Selector::AttributeName(name.clone()),
                    PathStep::Key(key) => Selector::ElementKeyString(key.clone()),
                    PathStep::Index(index) => Selector::ElementKeyInt(*index),
                }),
            })
            .collect(),
    }
}

fn deferred_from_proto(deferred: Option<pb::Deferred>) -> Option<Deferred> {
    use pb::deferred::Reason;
    let deferred = deferred?;
    let reason = match Reason::try_from(deferred.reason) {
        Ok(Reason::ResourceConfigUnknown) => DeferredReason::ResourceConfigUnknown,
        Ok(Reason::ProviderConfigUnknown) => DeferredReason::ProviderConfigUnknown,
        Ok(Reason::AbsentPrereq) => DeferredReason::AbsentPrereq,
        _ => DeferredReason::Unknown,
    };
    Some(Deferred::new(reason))
}

fn timestamp_from_proto(ts: Option<prost_types::Timestamp>) -> Option<DateTime<Utc>> {
    let ts = ts?;
    DateTime::<Utc>::from_timestamp(ts.seconds, u32::try_from(ts.nanos).unwrap_or(0))
}

fn count_from_proto(n: i64) -> u32 {
    u32::try_from(n).unwrap_or(0)
}

fn block_from_proto(block: pb::schema::Block) -> Result<Block, Diagnostic> {
    use pb::schema::nested_block::NestingMode as PbNesting;
    let mut out = Block::new();
    for attr in block.attributes {
        let attr_type: AttributeType = serde_json::from_slice(&attr.r#type).map_err(|e| {
            Diagnostic::error("Invalid provider schema")
                .with_detail(format!("Attribute \"{}\" has an invalid type: {}", attr.name, e))
        })?;
        let flags = AttributeFlags {
            required: attr.required,
            optional: attr.optional,
            computed: attr.computed,
            sensitive: attr.sensitive,
            ephemeral: attr.ephemeral,
        };
        let mut attribute = Attribute::new(attr_type, flags);
        if !attr.description.is_empty() {
            attribute = attribute.with_description(attr.description);
        }
        out.attributes.insert(attr.name, attribute);
    }
    for nested in block.block_types {
        let nesting_mode = match PbNesting::try_from(nested.nesting) {
            Ok(PbNesting::Single) => NestingMode::Single,
            Ok(PbNesting::Group) => NestingMode::Group,
            Ok(PbNesting::List) => NestingMode::List,
            Ok(PbNesting::Set) => NestingMode::Set,
            Ok(PbNesting::Map) => NestingMode::Map,
            _ => {
                return Err(Diagnostic::error("Invalid provider schema").with_detail(format!(
                    "Block \"{}\" has an invalid nesting mode",
                    nested.type_name
                )))
            },
        };
        let inner = block_from_proto(nested.block.unwrap_or_default())?;
        out.blocks.insert(
            nested.type_name,
            NestedBlock {
                block: inner,
                nesting_mode,
                min_items: count_from_proto(nested.min_items),
                max_items: count_from_proto(nested.max_items),
            },
        );
    }
    if !block.description.is_empty() {
        out.description = Some(block.description);
    }
    Ok(out)
}

fn schema_from_proto(schema: pb::Schema) -> Result<Schema, Diagnostic> {
    Ok(Schema {
        version: u64::try_from(schema.version).unwrap_or(0),
        block: block_from_proto(schema.block.unwrap_or_default())?,
    })
}

fn identity_schema_from_proto(identity: pb::ResourceIdentitySchema) -> Result<IdentitySchema, Diagnostic> {
    let mut out = IdentitySchema::new(u64::try_from(identity.version).unwrap_or(0));
    for attr in identity.identity_attributes {
        let attr_type: AttributeType = serde_json::from_slice(&attr.r#type).map_err(|e| {
            Diagnostic::error("Invalid provider schema")
                .with_detail(format!("Identity attribute \"{}\" has an invalid type: {}", attr.name, e))
        })?;
        out.attributes.insert(
            attr.name,
            IdentityAttribute {
                attr_type,
                required_for_import: attr.required_for_import,
                optional_for_import: attr.optional_for_import,
                description: (!attr.description.is_empty()).then_some(attr.description),
            },
        );
    }
    Ok(out)
}

fn linked_resource_from_proto(linked: pb::action_schema::LinkedResource) -> LinkedResourceSchema {
    LinkedResourceSchema {
        type_name: linked.type_name,
        description: (!linked.description.is_empty()).then_some(linked.description),
    }
}

fn action_schema_from_proto(name: &str, action: pb::ActionSchema) -> Result<ActionSchema, Diagnostic> {
    use pb::action_schema::lifecycle::ExecutionOrder as PbOrder;
    use pb::action_schema::Linkage;
    let invalid = |detail: &str| {
        Diagnostic::error("Invalid provider schema")
            .with_detail(format!("Action \"{}\" {}", name, detail))
    };
    let linkage = match action.linkage {
        None | Some(Linkage::Unlinked(_)) => ActionLinkage::Unlinked,
        Some(Linkage::Lifecycle(lifecycle)) => {
            let executes = match PbOrder::try_from(lifecycle.executes) {
                Ok(PbOrder::Before) => ExecutionOrder::Before,
                Ok(PbOrder::After) => ExecutionOrder::After,
                _ => return Err(invalid("has an invalid execution order")),
            };
            let resource = lifecycle
                .linked_resource
                .map(linked_resource_from_proto)
                .ok_or_else(|| invalid("is missing its linked resource"))?;
            ActionLinkage::Lifecycle { executes, resource }
        },
        Some(Linkage::Linked(linked)) => ActionLinkage::Linked {
            resources: linked
                .linked_resources
                .into_iter()
                .map(linked_resource_from_proto)
                .collect(),
        },
    };
    Ok(ActionSchema {
        schema: schema_from_proto(action.schema.unwrap_or_default())?,
        linkage,
    })
}

fn provider_schema_from_proto(resp: pb::GetProviderSchemaResponse) -> Result<ProviderSchema, Diagnostic> {
    let mut schema = ProviderSchema::new();
    schema.provider = schema_from_proto(resp.provider.unwrap_or_default())?;
    for (name, s) in resp.resource_schemas {
        schema.resources.insert(name, schema_from_proto(s)?);
    }
    for (name, s) in resp.data_source_schemas {
        schema.data_sources.insert(name, schema_from_proto(s)?);
    }
    for (name, s) in resp.ephemeral_resource_schemas {
        schema.ephemeral_resources.insert(name, schema_from_proto(s)?);
    }
    for (name, s) in resp.list_resource_schemas {
        schema = schema.with_list_resource(name, schema_from_proto(s)?);
    }
    for (name, a) in resp.action_schemas {
        let action = action_schema_from_proto(&name, a)?;
        schema.actions.insert(name, action);
    }
    if let Some(caps) = resp.server_capabilities {
        schema.capabilities = ServerCapabilities {
            plan_destroy: caps.plan_destroy,
            get_provider_schema_optional: caps.get_provider_schema_optional,
            move_resource_state: caps.move_resource_state,
        };
    }
    Ok(schema)
}

/// Decoding context for linked resources of an action.
struct LinkedTypes {
    schema: Arc<ProviderSchema>,
    types: Vec<String>,
}

impl LinkedTypes {
    fn block(&self, index: usize) -> Result<&Block, Diagnostic> {
        let type_name = self.types.get(index).ok_or_else(|| {
            Diagnostic::error("Provider returned too many linked resources")
                .with_detail(format!("Expected at most {} linked resources.", self.types.len()))
        })?;
        resource_schema(&self.schema, type_name).map(|s| &s.block)
    }

    fn identity(&self, index: usize) -> Option<&IdentitySchema> {
        self.types
            .get(index)
            .and_then(|type_name| self.schema.identities.get(type_name))
    }

    fn type_name(&self, index: usize) -> &str {
        self.types.get(index).map(String::as_str).unwrap_or_default()
    }

    fn decode_completed(&self, completed: pb::invoke_action_event::Completed) -> InvokeActionEvent {
        let mut diagnostics = diagnostics_from_proto(completed.diagnostics);
        let mut linked_resources = Vec::with_capacity(completed.linked_resources.len());
        for (i, linked) in completed.linked_resources.into_iter().enumerate() {
            let decoded = self.block(i).and_then(|block| {
                Ok(LinkedResourceResult {
                    new_state: decode(linked.new_state, block)?,
                    new_identity: decode_identity(linked.new_identity, self.identity(i), self.type_name(i))?,
                })
            });
            match decoded {
                Ok(result) => linked_resources.push(result),
                Err(diag) => diagnostics.push(diag),
            }
        }
        InvokeActionEvent::Completed {
            linked_resources,
            diagnostics,
        }
    }
}

#[async_trait::async_trait]
impl Provider for GrpcProvider {
    async fn get_provider_schema(&self) -> GetProviderSchemaResponse {
        let (schema, diagnostics) = self.schema().await;
        GetProviderSchemaResponse {
            schema: schema.unwrap_or_default(),
            diagnostics,
        }
    }

    #[instrument(skip(self, request), name = "provider.validate_provider_config")]
    async fn validate_provider_config(&self, request: ValidateProviderConfigRequest) -> Diagnostics {
        debug!("ValidateProviderConfig called");
        let mut diags = Diagnostics::new();
        let (schema, d) = self.schema().await;
        diags.extend(d);
        let Some(schema) = schema else {
            return diags;
        };
        let block = &schema.provider.block;
        let config = validation::complete_config(block, &request.config);
        diags.extend(validation::validate_block(block, &config));
        if diags.has_errors() {
            return diags;
        }
        let config = try_diag!(@diags diags, encode(&config, &block.implied_type()));
        match self
            .rpc
            .validate_provider_config(pb::ValidateProviderConfigRequest { config })
            .await
        {
            Ok(resp) => diags.extend(diagnostics_from_proto(resp.diagnostics)),
            Err(status) => {
                error!(error = %status, "ValidateProviderConfig failed");
                diags.push(status_diagnostic(status));
            },
        }
        log_outcome("ValidateProviderConfig", &diags);
        diags
    }

    #[instrument(skip(self, request), fields(resource_type = %request.type_name), name = "provider.validate_resource_config")]
    async fn validate_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        self.validate_typed(ConfigKind::Resource, request).await
    }

    #[instrument(skip(self, request), fields(data_source_type = %request.type_name), name = "provider.validate_data_resource_config")]
    async fn validate_data_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        self.validate_typed(ConfigKind::Data, request).await
    }

    #[instrument(skip(self, request), fields(list_type = %request.type_name), name = "provider.validate_list_resource_config")]
    async fn validate_list_resource_config(&self, request: ValidateResourceConfigRequest) -> Diagnostics {
        self.validate_typed(ConfigKind::List, request).await
    }

    #[instrument(skip(self, request), fields(resource_type = %request.type_name, version = request.version), name = "provider.upgrade_resource_state")]
    async fn upgrade_resource_state(
        &self,
        request: UpgradeResourceStateRequest,
    ) -> UpgradeResourceStateResponse {
        debug!("UpgradeResourceState called");
        let mut resp = UpgradeResourceStateResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let res_schema = try_diag!(resp, resource_schema(&schema, &request.type_name));
        let proto = match self
            .rpc
            .upgrade_resource_state(pb::UpgradeResourceStateRequest {
                type_name: request.type_name.clone(),
                version: request.version as i64,
                raw_state_json: request.raw_state_json,
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "UpgradeResourceState failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        if resp.diagnostics.has_errors() {
            return resp;
        }
        resp.upgraded_state = try_diag!(resp, decode(proto.upgraded_state, &res_schema.block));
        info!(from_version = request.version, to_version = res_schema.version, "UpgradeResourceState completed");
        resp
    }

    #[instrument(skip(self, request), fields(resource_type = %request.type_name, version = request.version), name = "provider.upgrade_resource_identity")]
    async fn upgrade_resource_identity(
        &self,
        request: UpgradeResourceIdentityRequest,
    ) -> UpgradeResourceIdentityResponse {
        debug!("UpgradeResourceIdentity called");
        let mut resp = UpgradeResourceIdentityResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let identity = try_diag!(
            resp,
            schema
                .identities
                .get(&request.type_name)
                .ok_or_else(|| unknown_type("resource identity", &request.type_name))
        );
        let proto = match self
            .rpc
            .upgrade_resource_identity(pb::UpgradeResourceIdentityRequest {
                type_name: request.type_name.clone(),
                version: request.version as i64,
                raw_identity_json: request.raw_identity_json,
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "UpgradeResourceIdentity failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        if resp.diagnostics.has_errors() {
            return resp;
        }
        resp.upgraded_identity = try_diag!(
            resp,
            decode_identity(proto.upgraded_identity, Some(identity), &request.type_name)
        );
        resp
    }

    #[instrument(skip(self, request), name = "provider.configure_provider")]
    async fn configure_provider(&self, request: ConfigureProviderRequest) -> Diagnostics {
        debug!("ConfigureProvider called");
        let mut diags = Diagnostics::new();
        let (schema, d) = self.schema().await;
        diags.extend(d);
        let Some(schema) = schema else {
            return diags;
        };
        let config = try_diag!(@diags diags, encode(&request.config, &schema.provider.block.implied_type()));
        match self
            .rpc
            .configure_provider(pb::ConfigureProviderRequest {
                engine_version: request.engine_version,
                config,
                client_capabilities: caps(request.client_capabilities),
            })
            .await
        {
            Ok(resp) => diags.extend(diagnostics_from_proto(resp.diagnostics)),
            Err(status) => {
                error!(error = %status, "ConfigureProvider failed");
                diags.push(status_diagnostic(status));
            },
        }
        log_outcome("ConfigureProvider", &diags);
        diags
    }

    #[instrument(skip(self, request), fields(resource_type = %request.type_name), name = "provider.read_resource")]
    async fn read_resource(&self, request: ReadResourceRequest) -> ReadResourceResponse {
        debug!("ReadResource called");
        let mut resp = ReadResourceResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let res_schema = try_diag!(resp, resource_schema(&schema, &request.type_name));
        let identity = schema.identities.get(&request.type_name);
        let current_state = try_diag!(resp, encode(&request.prior_state, &res_schema.block.implied_type()));
        let current_identity = try_diag!(resp, encode_identity(&request.current_identity, identity));

        let proto = match self
            .rpc
            .read_resource(pb::ReadResourceRequest {
                type_name: request.type_name.clone(),
                current_state,
                private: request.private,
                client_capabilities: caps(request.client_capabilities),
                current_identity,
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "ReadResource failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        resp.deferred = check_deferral(
            deferred_from_proto(proto.deferred),
            request.client_capabilities,
            &mut resp.diagnostics,
        );
        resp.new_state = try_diag!(resp, decode(proto.new_state, &res_schema.block));
        resp.private = proto.private;
        resp.identity = try_diag!(
            resp,
            decode_identity(proto.new_identity, identity, &request.type_name)
        );
        log_outcome("ReadResource", &resp.diagnostics);
        resp
    }

    #[instrument(skip(self, request), fields(resource_type = %request.type_name), name = "provider.plan_resource_change")]
    async fn plan_resource_change(&self, request: PlanResourceChangeRequest) -> PlanResourceChangeResponse {
        debug!("PlanResourceChange called");
        let mut resp = PlanResourceChangeResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let res_schema = try_diag!(resp, resource_schema(&schema, &request.type_name));

        // Destroys are only planned remotely when the provider asks for it.
        if request.proposed_new_state.is_null() && !schema.capabilities.plan_destroy {
            resp.planned_private = request.prior_private;
            return resp;
        }

        let ty = res_schema.block.implied_type();
        let identity = schema.identities.get(&request.type_name);
        let prior_state = try_diag!(resp, encode(&request.prior_state, &ty));
        let proposed_new_state = try_diag!(resp, encode(&request.proposed_new_state, &ty));
        let config = try_diag!(resp, encode(&request.config, &ty));
        let prior_identity = try_diag!(resp, encode_identity(&request.prior_identity, identity));

        let proto = match self
            .rpc
            .plan_resource_change(pb::PlanResourceChangeRequest {
                type_name: request.type_name.clone(),
                prior_state,
                proposed_new_state,
                config,
                prior_private: request.prior_private,
                client_capabilities: caps(request.client_capabilities),
                prior_identity,
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "PlanResourceChange failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        resp.deferred = check_deferral(
            deferred_from_proto(proto.deferred),
            request.client_capabilities,
            &mut resp.diagnostics,
        );
        resp.planned_state = try_diag!(resp, decode(proto.planned_state, &res_schema.block));
        resp.requires_replace = proto.requires_replace.into_iter().map(path_from_proto).collect();
        resp.planned_private = proto.planned_private;
        resp.planned_identity = try_diag!(
            resp,
            decode_identity(proto.planned_identity, identity, &request.type_name)
        );
        log_outcome("PlanResourceChange", &resp.diagnostics);
        resp
    }

    #[instrument(skip(self, request), fields(resource_type = %request.type_name), name = "provider.apply_resource_change")]
    async fn apply_resource_change(
        &self,
        request: ApplyResourceChangeRequest,
    ) -> ApplyResourceChangeResponse {
        debug!("ApplyResourceChange called");
        let mut resp = ApplyResourceChangeResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let res_schema = try_diag!(resp, resource_schema(&schema, &request.type_name));
        let ty = res_schema.block.implied_type();
        let identity = schema.identities.get(&request.type_name);
        let prior_state = try_diag!(resp, encode(&request.prior_state, &ty));
        let planned_state = try_diag!(resp, encode(&request.planned_state, &ty));
        let config = try_diag!(resp, encode(&request.config, &ty));
        let planned_identity = try_diag!(resp, encode_identity(&request.planned_identity, identity));

        let proto = match self
            .rpc
            .apply_resource_change(pb::ApplyResourceChangeRequest {
                type_name: request.type_name.clone(),
                prior_state,
                planned_state,
                config,
                planned_private: request.planned_private,
                planned_identity,
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "ApplyResourceChange failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        resp.new_state = try_diag!(resp, decode(proto.new_state, &res_schema.block));
        resp.private = proto.private;
        resp.new_identity = try_diag!(
            resp,
            decode_identity(proto.new_identity, identity, &request.type_name)
        );
        if resp.diagnostics.has_errors() {
            warn!("ApplyResourceChange completed with errors");
        } else {
            info!("ApplyResourceChange completed");
        }
        resp
    }

    #[instrument(skip(self, request), fields(resource_type = %request.type_name), name = "provider.import_resource_state")]
    async fn import_resource_state(
        &self,
        request: ImportResourceStateRequest,
    ) -> ImportResourceStateResponse {
        debug!("ImportResourceState called");
        let mut resp = ImportResourceStateResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        try_diag!(resp, resource_schema(&schema, &request.type_name));
        let identity = try_diag!(
            resp,
            encode_identity(&request.identity, schema.identities.get(&request.type_name))
        );

        let proto = match self
            .rpc
            .import_resource_state(pb::ImportResourceStateRequest {
                type_name: request.type_name.clone(),
                id: request.id,
                client_capabilities: caps(request.client_capabilities),
                identity,
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "ImportResourceState failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        resp.deferred = check_deferral(
            deferred_from_proto(proto.deferred),
            request.client_capabilities,
            &mut resp.diagnostics,
        );
        for imported in proto.imported_resources {
            let res_schema = try_diag!(resp, resource_schema(&schema, &imported.type_name));
            let state = try_diag!(resp, decode(imported.state, &res_schema.block));
            let identity = try_diag!(
                resp,
                decode_identity(
                    imported.identity,
                    schema.identities.get(&imported.type_name),
                    &imported.type_name
                )
            );
            resp.imported_resources.push(ImportedResource {
                type_name: imported.type_name,
                state,
                private: imported.private,
                identity,
            });
        }
        info!(imported = resp.imported_resources.len(), "ImportResourceState completed");
        resp
    }

    #[instrument(skip(self, request), fields(source_type = %request.source_type_name, target_type = %request.target_type_name), name = "provider.move_resource_state")]
    async fn move_resource_state(&self, request: MoveResourceStateRequest) -> MoveResourceStateResponse {
        debug!("MoveResourceState called");
        let mut resp = MoveResourceStateResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        if !schema.capabilities.move_resource_state {
            resp.diagnostics.push(unsupported("moving resource state across types"));
            return resp;
        }
        let target = try_diag!(resp, resource_schema(&schema, &request.target_type_name));

        let proto = match self
            .rpc
            .move_resource_state(pb::MoveResourceStateRequest {
                source_provider_address: request.source_provider_address,
                source_type_name: request.source_type_name,
                source_schema_version: request.source_schema_version as i64,
                source_state_json: request.source_state_json,
                target_type_name: request.target_type_name.clone(),
                source_private: request.source_private,
                source_identity_json: request.source_identity_json,
                source_identity_schema_version: request.source_identity_schema_version as i64,
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "MoveResourceState failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        if resp.diagnostics.has_errors() {
            return resp;
        }
        resp.target_state = try_diag!(resp, decode(proto.target_state, &target.block));
        resp.target_private = proto.target_private;
        resp.target_identity = try_diag!(
            resp,
            decode_identity(
                proto.target_identity,
                schema.identities.get(&request.target_type_name),
                &request.target_type_name
            )
        );
        info!("MoveResourceState completed");
        resp
    }

    #[instrument(skip(self, request), fields(data_source_type = %request.type_name), name = "provider.read_data_source")]
    async fn read_data_source(&self, request: ReadDataSourceRequest) -> ReadDataSourceResponse {
        debug!("ReadDataSource called");
        let mut resp = ReadDataSourceResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let block = try_diag!(resp, ConfigKind::Data.block(&schema, &request.type_name));
        let config = try_diag!(resp, encode(&request.config, &block.implied_type()));

        let proto = match self
            .rpc
            .read_data_source(pb::ReadDataSourceRequest {
                type_name: request.type_name.clone(),
                config,
                client_capabilities: caps(request.client_capabilities),
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "ReadDataSource failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        resp.deferred = check_deferral(
            deferred_from_proto(proto.deferred),
            request.client_capabilities,
            &mut resp.diagnostics,
        );
        resp.state = try_diag!(resp, decode(proto.state, block));
        log_outcome("ReadDataSource", &resp.diagnostics);
        resp
    }

    #[instrument(skip(self, request), fields(ephemeral_type = %request.type_name), name = "provider.open_ephemeral_resource")]
    async fn open_ephemeral_resource(
        &self,
        request: OpenEphemeralResourceRequest,
    ) -> OpenEphemeralResourceResponse {
        debug!("OpenEphemeralResource called");
        let mut resp = OpenEphemeralResourceResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let eph_schema = try_diag!(
            resp,
            schema
                .ephemeral_resources
                .get(&request.type_name)
                .ok_or_else(|| unknown_type("ephemeral resource", &request.type_name))
        );
        let config = try_diag!(resp, encode(&request.config, &eph_schema.block.implied_type()));

        let proto = match self
            .rpc
            .open_ephemeral_resource(pb::OpenEphemeralResourceRequest {
                type_name: request.type_name.clone(),
                config,
                client_capabilities: caps(request.client_capabilities),
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "OpenEphemeralResource failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        resp.deferred = check_deferral(
            deferred_from_proto(proto.deferred),
            request.client_capabilities,
            &mut resp.diagnostics,
        );
        resp.result = try_diag!(resp, decode(proto.result, &eph_schema.block));
        resp.private = proto.private;
        resp.renew_at = timestamp_from_proto(proto.renew_at);
        log_outcome("OpenEphemeralResource", &resp.diagnostics);
        resp
    }

    #[instrument(skip(self, request), fields(ephemeral_type = %request.type_name), name = "provider.renew_ephemeral_resource")]
    async fn renew_ephemeral_resource(
        &self,
        request: RenewEphemeralResourceRequest,
    ) -> RenewEphemeralResourceResponse {
        debug!("RenewEphemeralResource called");
        let mut resp = RenewEphemeralResourceResponse::default();
        match self
            .rpc
            .renew_ephemeral_resource(pb::RenewEphemeralResourceRequest {
                type_name: request.type_name,
                private: request.private,
            })
            .await
        {
            Ok(proto) => {
                resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
                resp.renew_at = timestamp_from_proto(proto.renew_at);
                resp.private = proto.private;
            },
            Err(status) => {
                error!(error = %status, "RenewEphemeralResource failed");
                resp.diagnostics.push(status_diagnostic(status));
            },
        }
        resp
    }

    #[instrument(skip(self, request), fields(ephemeral_type = %request.type_name), name = "provider.close_ephemeral_resource")]
    async fn close_ephemeral_resource(&self, request: CloseEphemeralResourceRequest) -> Diagnostics {
        debug!("CloseEphemeralResource called");
        match self
            .rpc
            .close_ephemeral_resource(pb::CloseEphemeralResourceRequest {
                type_name: request.type_name,
                private: request.private,
            })
            .await
        {
            Ok(proto) => diagnostics_from_proto(proto.diagnostics),
            Err(status) => {
                error!(error = %status, "CloseEphemeralResource failed");
                status_diagnostic(status).into()
            },
        }
    }

    #[instrument(skip(self, request), fields(list_type = %request.type_name, limit = request.limit), name = "provider.list_resource")]
    async fn list_resource(&self, request: ListResourceRequest) -> ListResourceResponse {
        debug!("ListResource called");
        let mut resp = ListResourceResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let filter = try_diag!(resp, list_filter_block(&schema, &request.type_name));
        let identity = try_diag!(
            resp,
            schema.identities.get(&request.type_name).ok_or_else(|| {
                Diagnostic::error("Identity schema not found").with_detail(format!(
                    "List resource \"{}\" has no resource identity schema.",
                    request.type_name
                ))
            })
        );
        let res_block = if request.include_resource_object {
            Some(try_diag!(resp, resource_schema(&schema, &request.type_name)).block.clone())
        } else {
            None
        };
        if request.limit == 0 {
            return resp;
        }
        let config = try_diag!(resp, encode(&request.config, &filter.implied_type()));

        let stream = match self
            .rpc
            .list_resource(pb::ListResourceRequest {
                type_name: request.type_name.clone(),
                config,
                include_resource_object: request.include_resource_object,
                limit: i64::try_from(request.limit).unwrap_or(i64::MAX),
            })
            .await
        {
            Ok(stream) => stream,
            Err(status) => {
                error!(error = %status, "ListResource failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };

        // Dropping the stream after `limit` items cancels the call.
        let mut stream = stream.take(request.limit);
        let identity_block = identity.as_block();
        while let Some(item) = stream.next().await {
            let event = match item {
                Ok(event) => event,
                Err(status) => {
                    error!(error = %status, "ListResource stream failed");
                    resp.diagnostics.push(status_diagnostic(status));
                    break;
                },
            };
            let mut result = ListResourceResult {
                display_name: event.display_name,
                diagnostics: diagnostics_from_proto(event.diagnostics),
                ..Default::default()
            };
            match event.identity.and_then(|i| i.identity_data) {
                Some(dv) => match decode(Some(dv), &identity_block) {
                    Ok(value) => result.identity = value,
                    Err(diag) => result.diagnostics.push(diag),
                },
                None => result.diagnostics.push(
                    Diagnostic::error("Missing resource identity")
                        .with_detail("The provider returned a list result without an identity."),
                ),
            }
            if let (Some(block), Some(object)) = (&res_block, event.resource_object) {
                match decode(Some(object), block) {
                    Ok(value) => result.state = Some(value),
                    Err(diag) => result.diagnostics.push(diag),
                }
            }
            resp.diagnostics.extend(result.diagnostics.iter().cloned());
            resp.results.push(result);
        }
        info!(results = resp.results.len(), "ListResource completed");
        resp
    }

    #[instrument(skip(self, request), fields(action_type = %request.action_type), name = "provider.plan_action")]
    async fn plan_action(&self, request: PlanActionRequest) -> PlanActionResponse {
        debug!("PlanAction called");
        let mut resp = PlanActionResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let action = try_diag!(
            resp,
            schema
                .actions
                .get(&request.action_type)
                .ok_or_else(|| unknown_type("action", &request.action_type))
        );
        let expected = action.linkage.arity();
        if request.linked_resources.len() != expected {
            resp.diagnostics.push(arity_diagnostic(
                &request.action_type,
                expected,
                request.linked_resources.len(),
            ));
            return resp;
        }
        let config = validation::complete_config(&action.schema.block, &request.config);
        resp.diagnostics
            .extend(validation::validate_block(&action.schema.block, &config));
        if resp.diagnostics.has_errors() {
            return resp;
        }

        let linked = LinkedTypes {
            schema: schema.clone(),
            types: action.linkage.linked_types().into_iter().map(String::from).collect(),
        };
        let mut linked_resources = Vec::with_capacity(request.linked_resources.len());
        for (i, lr) in request.linked_resources.iter().enumerate() {
            let ty = try_diag!(resp, linked.block(i)).implied_type();
            linked_resources.push(pb::plan_action_request::LinkedResource {
                prior_state: try_diag!(resp, encode(&lr.prior_state, &ty)),
                planned_state: try_diag!(resp, encode(&lr.planned_state, &ty)),
                config: try_diag!(resp, encode(&lr.config, &ty)),
                prior_identity: try_diag!(resp, encode_identity(&lr.prior_identity, linked.identity(i))),
            });
        }
        let config = try_diag!(resp, encode(&config, &action.schema.block.implied_type()));

        let proto = match self
            .rpc
            .plan_action(pb::PlanActionRequest {
                action_type: request.action_type.clone(),
                linked_resources,
                config,
                client_capabilities: caps(request.client_capabilities),
            })
            .await
        {
            Ok(proto) => proto,
            Err(status) => {
                error!(error = %status, "PlanAction failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };
        resp.diagnostics.extend(diagnostics_from_proto(proto.diagnostics));
        resp.deferred = check_deferral(
            deferred_from_proto(proto.deferred),
            request.client_capabilities,
            &mut resp.diagnostics,
        );
        if proto.linked_resources.len() > request.linked_resources.len() {
            resp.diagnostics.push(
                Diagnostic::error("Provider returned too many linked resources").with_detail(format!(
                    "The action \"{}\" was given {} linked resource(s) but the provider returned {}.",
                    request.action_type,
                    request.linked_resources.len(),
                    proto.linked_resources.len()
                )),
            );
            return resp;
        }
        for (i, planned) in proto.linked_resources.into_iter().enumerate() {
            let block = try_diag!(resp, linked.block(i));
            let planned_state = try_diag!(resp, decode(planned.planned_state, block));
            let planned_identity = try_diag!(
                resp,
                decode_identity(planned.planned_identity, linked.identity(i), linked.type_name(i))
            );
            resp.linked_resources.push(LinkedResourcePlan {
                planned_state,
                planned_identity,
            });
        }
        log_outcome("PlanAction", &resp.diagnostics);
        resp
    }

    #[instrument(skip(self, request), fields(action_type = %request.action_type), name = "provider.invoke_action")]
    async fn invoke_action(&self, request: InvokeActionRequest) -> InvokeActionResponse {
        debug!("InvokeAction called");
        let mut resp = InvokeActionResponse::default();
        let (schema, d) = self.schema().await;
        resp.diagnostics.extend(d);
        let Some(schema) = schema else {
            return resp;
        };
        let action = try_diag!(
            resp,
            schema
                .actions
                .get(&request.action_type)
                .ok_or_else(|| unknown_type("action", &request.action_type))
        );
        let expected = action.linkage.arity();
        if request.linked_resources.len() != expected {
            resp.diagnostics.push(arity_diagnostic(
                &request.action_type,
                expected,
                request.linked_resources.len(),
            ));
            return resp;
        }

        let linked = LinkedTypes {
            schema: schema.clone(),
            types: action.linkage.linked_types().into_iter().map(String::from).collect(),
        };
        let mut linked_resources = Vec::with_capacity(request.linked_resources.len());
        for (i, lr) in request.linked_resources.iter().enumerate() {
            let ty = try_diag!(resp, linked.block(i)).implied_type();
            linked_resources.push(pb::invoke_action_request::LinkedResource {
                prior_state: try_diag!(resp, encode(&lr.prior_state, &ty)),
                planned_state: try_diag!(resp, encode(&lr.planned_state, &ty)),
                config: try_diag!(resp, encode(&lr.config, &ty)),
                planned_identity: try_diag!(resp, encode_identity(&lr.planned_identity, linked.identity(i))),
            });
        }
        let config = try_diag!(resp, encode(&request.config, &action.schema.block.implied_type()));

        let mut stream = match self
            .rpc
            .invoke_action(pb::InvokeActionRequest {
                action_type: request.action_type.clone(),
                linked_resources,
                config,
            })
            .await
        {
            Ok(stream) => stream,
            Err(status) => {
                error!(error = %status, "InvokeAction failed");
                resp.diagnostics.push(status_diagnostic(status));
                return resp;
            },
        };

        let (tx, rx) = mpsc::channel(self.event_buffer);
        tokio::spawn(async move {
            use pb::invoke_action_event::Event;
            while let Some(item) = stream.next().await {
                let event = match item {
                    Ok(pb::InvokeActionEvent {
                        event: Some(Event::Progress(progress)),
                    }) => InvokeActionEvent::Progress {
                        message: progress.message,
                    },
                    Ok(pb::InvokeActionEvent {
                        event: Some(Event::Completed(completed)),
                    }) => linked.decode_completed(completed),
                    Ok(pb::InvokeActionEvent { event: None }) => continue,
                    Err(status) => {
                        error!(error = %status, "InvokeAction stream failed");
                        InvokeActionEvent::Completed {
                            linked_resources: Vec::new(),
                            diagnostics: status_diagnostic(status).into(),
                        }
                    },
                };
                let terminal = event.is_terminal();
                if tx.send(event).await.is_err() || terminal {
                    break;
                }
            }
        });
        resp.events = Some(rx);
        resp
    }

    #[instrument(skip(self), name = "provider.stop_provider")]
    async fn stop_provider(&self) -> Diagnostics {
        info!("StopProvider called");
        match self.rpc.stop_provider(pb::StopProviderRequest {}).await {
            Ok(resp) if resp.error.is_empty() => Diagnostics::new(),
            Ok(resp) => {
                warn!(error = %resp.error, "StopProvider reported an error");
                Diagnostic::error("Provider stop failed").with_detail(resp.error).into()
            },
            Err(status) => {
                error!(error = %status, "StopProvider failed");
                status_diagnostic(status).into()
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{msgpack, proto_schema_fixture, MockRpc};
    use std::sync::atomic::Ordering;
    use tokio_test::{assert_err, assert_ok};

    fn provider(mock: MockRpc) -> (Arc<MockRpc>, GrpcProvider) {
        let mock = Arc::new(mock);
        (mock.clone(), GrpcProvider::new(mock))
    }

    fn attr_type() -> AttributeType {
        AttributeType::object([("attr", AttributeType::String)])
    }

    fn linked_data() -> LinkedResourcePlanData {
        LinkedResourcePlanData {
            prior_state: Value::object([("attr", Value::string("foo"))]),
            planned_state: Value::object([("attr", Value::string("bar"))]),
            config: Value::object([("attr", Value::string("bar"))]),
            prior_identity: Value::Null,
        }
    }

    #[tokio::test]
    async fn test_get_provider_schema() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        let resp = p.get_provider_schema().await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert!(resp.schema.resources.contains_key("resource"));
        assert!(resp.schema.data_sources.contains_key("data"));
        assert!(resp.schema.ephemeral_resources.contains_key("ephemeral"));
        assert!(resp.schema.list_resources["list"].block.attributes.contains_key("data"));
        assert_eq!(resp.schema.actions["lifecycle"].linkage.arity(), 1);
        assert_eq!(resp.schema.actions["linked"].linkage.arity(), 2);
        assert!(resp.schema.identities.contains_key("resource"));
        assert_eq!(mock.call_count("GetResourceIdentitySchemas"), 1);

        p.get_provider_schema().await;
        assert_eq!(mock.call_count("GetProviderSchema"), 1);
    }

    #[tokio::test]
    async fn test_schema_global_cache() {
        let registry = Arc::new(SchemaRegistry::new());
        let addr = ProviderAddr::new("hemmer", "test");

        let first = Arc::new(MockRpc::new(proto_schema_fixture()));
        let p = GrpcProvider::new(first.clone())
            .with_address(addr.clone())
            .with_registry(registry.clone());
        assert!(p.get_provider_schema().await.diagnostics.is_empty());

        let second = Arc::new(MockRpc::new(proto_schema_fixture()));
        let p = GrpcProvider::new(second.clone())
            .with_address(addr)
            .with_registry(registry);
        let resp = p.get_provider_schema().await;
        assert!(resp.diagnostics.is_empty());
        assert!(resp.schema.resources.contains_key("resource"));
        assert_eq!(second.call_count("GetProviderSchema"), 0);
    }

    #[tokio::test]
    async fn test_identity_schemas_unimplemented_is_not_error() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.identity_schemas = None;
        let (_, p) = provider(mock);
        let resp = p.get_provider_schema().await;
        assert!(resp.diagnostics.is_empty());
        assert!(resp.schema.identities.is_empty());
    }

    #[tokio::test]
    async fn test_identity_schemas_other_failure_is_error() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.identity_error = Some(Status::unavailable("connection reset"));
        let (_, p) = provider(mock);
        let resp = p.get_provider_schema().await;
        assert!(resp.diagnostics.has_errors());
        assert!(resp.schema.resources.is_empty());
    }

    #[tokio::test]
    async fn test_read_resource_msgpack() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.read_resource.new_state = Some(pb::DynamicValue {
            msgpack: b"\x81\xa4attr\xa3bar".to_vec(),
            json: Vec::new(),
        });
        let (_, p) = provider(mock);
        let resp = p
            .read_resource(ReadResourceRequest {
                type_name: "resource".to_string(),
                prior_state: Value::object([("attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(resp.new_state, Value::object([("attr", Value::string("bar"))]));
    }

    #[tokio::test]
    async fn test_read_resource_json_legacy() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.read_resource.new_state = Some(pb::DynamicValue {
            msgpack: Vec::new(),
            json: br#"{"attr":"bar"}"#.to_vec(),
        });
        let (_, p) = provider(mock);
        let resp = p
            .read_resource(ReadResourceRequest {
                type_name: "resource".to_string(),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.new_state, Value::object([("attr", Value::string("bar"))]));
    }

    #[tokio::test]
    async fn test_read_resource_deferred() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.read_resource.deferred = Some(pb::Deferred {
            reason: pb::deferred::Reason::AbsentPrereq as i32,
        });
        let (_, p) = provider(mock);
        let resp = p
            .read_resource(ReadResourceRequest {
                type_name: "resource".to_string(),
                client_capabilities: ClientCapabilities {
                    deferral_allowed: true,
                },
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.deferred, Some(Deferred::new(DeferredReason::AbsentPrereq)));
    }

    #[tokio::test]
    async fn test_read_resource_unknown_type() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        let resp = p
            .read_resource(ReadResourceRequest {
                type_name: "nope".to_string(),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.has_errors());
        assert_eq!(mock.call_count("ReadResource"), 0);
    }

    #[tokio::test]
    async fn test_read_resource_transport_error() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.fail_calls.push(("ReadResource", Status::unavailable("gone")));
        let (_, p) = provider(mock);
        let resp = p
            .read_resource(ReadResourceRequest {
                type_name: "resource".to_string(),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.has_errors());
        assert_eq!(resp.diagnostics.as_slice()[0].summary, "Plugin error");
    }

    #[tokio::test]
    async fn test_upgrade_resource_identity_mismatch() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.upgrade_resource_identity.upgraded_identity = Some(pb::ResourceIdentityData {
            identity_data: Some(pb::DynamicValue {
                msgpack: Vec::new(),
                json: br#"{"attr_new":"bar"}"#.to_vec(),
            }),
        });
        let (_, p) = provider(mock);
        let resp = p
            .upgrade_resource_identity(UpgradeResourceIdentityRequest {
                type_name: "resource".to_string(),
                version: 0,
                raw_identity_json: br#"{"attr":"bar"}"#.to_vec(),
            })
            .await;
        assert!(resp.diagnostics.has_errors());
        assert_eq!(
            resp.diagnostics.as_slice()[0].attribute,
            Some(AttributePath::root().attr("attr_new"))
        );
    }

    #[tokio::test]
    async fn test_upgrade_resource_state() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.upgrade_resource_state.upgraded_state = Some(msgpack(
            &Value::object([("attr", Value::string("bar"))]),
            &attr_type(),
        ));
        let (_, p) = provider(mock);
        let resp = p
            .upgrade_resource_state(UpgradeResourceStateRequest {
                type_name: "resource".to_string(),
                version: 0,
                raw_state_json: br#"{"attr":"bar"}"#.to_vec(),
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.upgraded_state, Value::object([("attr", Value::string("bar"))]));
    }

    #[tokio::test]
    async fn test_plan_resource_change_requires_replace() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.plan_resource_change.planned_state = Some(msgpack(
            &Value::object([("attr", Value::string("bar"))]),
            &attr_type(),
        ));
        mock.plan_resource_change.requires_replace =
            vec![path_to_proto(&AttributePath::root().attr("attr"))];
        mock.plan_resource_change.planned_private = b"stop".to_vec();
        let (_, p) = provider(mock);
        let resp = p
            .plan_resource_change(PlanResourceChangeRequest {
                type_name: "resource".to_string(),
                prior_state: Value::object([("attr", Value::string("foo"))]),
                proposed_new_state: Value::object([("attr", Value::string("bar"))]),
                config: Value::object([("attr", Value::string("bar"))]),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.requires_replace, vec![AttributePath::root().attr("attr")]);
        assert_eq!(resp.planned_private, b"stop".to_vec());
    }

    #[tokio::test]
    async fn test_plan_destroy_skipped_without_capability() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        let resp = p
            .plan_resource_change(PlanResourceChangeRequest {
                type_name: "resource".to_string(),
                prior_state: Value::object([("attr", Value::string("foo"))]),
                prior_private: b"keep".to_vec(),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert!(resp.planned_state.is_null());
        assert_eq!(resp.planned_private, b"keep".to_vec());
        assert_eq!(mock.call_count("PlanResourceChange"), 0);
    }

    #[tokio::test]
    async fn test_apply_resource_change() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.apply_resource_change.new_state = Some(msgpack(
            &Value::object([("attr", Value::string("bar"))]),
            &attr_type(),
        ));
        mock.apply_resource_change.private = b"private".to_vec();
        let (_, p) = provider(mock);
        let resp = p
            .apply_resource_change(ApplyResourceChangeRequest {
                type_name: "resource".to_string(),
                planned_state: Value::object([("attr", Value::string("bar"))]),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.new_state, Value::object([("attr", Value::string("bar"))]));
        assert_eq!(resp.private, b"private".to_vec());
    }

    #[tokio::test]
    async fn test_import_resource_state() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.import_resource_state.imported_resources = vec![pb::ImportedResource {
            type_name: "resource".to_string(),
            state: Some(msgpack(
                &Value::object([("attr", Value::string("bar"))]),
                &attr_type(),
            )),
            private: b"import".to_vec(),
            identity: None,
        }];
        let (_, p) = provider(mock);
        let resp = p
            .import_resource_state(ImportResourceStateRequest {
                type_name: "resource".to_string(),
                id: "foo".to_string(),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.imported_resources.len(), 1);
        assert_eq!(resp.imported_resources[0].private, b"import".to_vec());
    }

    #[tokio::test]
    async fn test_move_resource_state_requires_capability() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        let resp = p
            .move_resource_state(MoveResourceStateRequest {
                source_type_name: "old".to_string(),
                target_type_name: "resource".to_string(),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.has_errors());
        assert_eq!(mock.call_count("MoveResourceState"), 0);
    }

    #[tokio::test]
    async fn test_move_resource_state() {
        let mut fixture = proto_schema_fixture();
        if let Some(caps) = fixture.server_capabilities.as_mut() {
            caps.move_resource_state = true;
        }
        let mut mock = MockRpc::new(fixture);
        mock.move_resource_state.target_state = Some(msgpack(
            &Value::object([("attr", Value::string("bar"))]),
            &attr_type(),
        ));
        mock.move_resource_state.target_private = b"moved".to_vec();
        let (_, p) = provider(mock);
        let resp = p
            .move_resource_state(MoveResourceStateRequest {
                source_provider_address: "registry.hemmer.io/hemmer/old".to_string(),
                source_type_name: "old".to_string(),
                source_state_json: br#"{"attr":"bar"}"#.to_vec(),
                target_type_name: "resource".to_string(),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.target_state, Value::object([("attr", Value::string("bar"))]));
        assert_eq!(resp.target_private, b"moved".to_vec());
    }

    #[tokio::test]
    async fn test_read_data_source() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.read_data_source.state = Some(msgpack(
            &Value::object([("attr", Value::string("bar"))]),
            &attr_type(),
        ));
        let (_, p) = provider(mock);
        let resp = p
            .read_data_source(ReadDataSourceRequest {
                type_name: "data".to_string(),
                config: Value::object([("attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        assert_eq!(resp.state, Value::object([("attr", Value::string("bar"))]));
    }

    #[tokio::test]
    async fn test_ephemeral_lifecycle_wire() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.open_ephemeral.result = Some(msgpack(
            &Value::object([("attr", Value::string("bar"))]),
            &attr_type(),
        ));
        mock.open_ephemeral.private = b"token".to_vec();
        mock.open_ephemeral.renew_at = Some(prost_types::Timestamp {
            seconds: 1_700_000_000,
            nanos: 0,
        });
        let (mock, p) = provider(mock);
        let opened = p
            .open_ephemeral_resource(OpenEphemeralResourceRequest {
                type_name: "ephemeral".to_string(),
                config: Value::object([("attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        assert!(opened.diagnostics.is_empty());
        assert_eq!(opened.private, b"token".to_vec());
        assert_eq!(opened.renew_at.map(|t| t.timestamp()), Some(1_700_000_000));

        let renewed = p
            .renew_ephemeral_resource(RenewEphemeralResourceRequest {
                type_name: "ephemeral".to_string(),
                private: opened.private.clone(),
            })
            .await;
        assert!(renewed.diagnostics.is_empty());
        let closed = p
            .close_ephemeral_resource(CloseEphemeralResourceRequest {
                type_name: "ephemeral".to_string(),
                private: opened.private,
            })
            .await;
        assert!(closed.is_empty());
        assert_eq!(mock.call_count("CloseEphemeralResource"), 1);
    }

    fn list_event(name: &str) -> pb::ListResourceEvent {
        pb::ListResourceEvent {
            display_name: name.to_string(),
            identity: Some(pb::ResourceIdentityData {
                identity_data: Some(msgpack(
                    &Value::object([("id_attr", Value::string(name))]),
                    &AttributeType::object([("id_attr", AttributeType::String)]),
                )),
            }),
            resource_object: None,
            diagnostics: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_list_resource_limit() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.list_events = vec![list_event("one"), list_event("two"), list_event("three")];
        let (mock, p) = provider(mock);
        let resp = p
            .list_resource(ListResourceRequest {
                type_name: "list".to_string(),
                config: Value::object([("filter_attr", Value::string("x"))]),
                include_resource_object: false,
                limit: 2,
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(resp.results.len(), 2);
        assert_eq!(resp.results[1].display_name, "two");
        assert_eq!(mock.list_pulled.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_list_resource_item_diagnostics() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        let mut warned = list_event("one");
        warned.diagnostics = vec![pb::Diagnostic {
            severity: pb::diagnostic::Severity::Warning as i32,
            summary: "Test warning".to_string(),
            detail: "This is a test warning".to_string(),
            attribute: None,
        }];
        mock.list_events = vec![warned, list_event("two")];
        let (_, p) = provider(mock);
        let resp = p
            .list_resource(ListResourceRequest {
                type_name: "list".to_string(),
                config: Value::object([("filter_attr", Value::string("x"))]),
                include_resource_object: false,
                limit: 10,
            })
            .await;
        assert_eq!(resp.results.len(), 2);
        assert!(resp.diagnostics.has_warnings());
        assert!(!resp.diagnostics.has_errors());
        assert_eq!(resp.results[0].diagnostics.len(), 1);
        assert!(resp.results[1].diagnostics.is_empty());
    }

    #[tokio::test]
    async fn test_plan_action_unlinked() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        let resp = p
            .plan_action(PlanActionRequest {
                action_type: "unlinked".to_string(),
                config: Value::object([("attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty(), "{:?}", resp.diagnostics);
        assert_eq!(mock.call_count("PlanAction"), 1);
    }

    #[tokio::test]
    async fn test_plan_action_lifecycle_arity() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        for count in [0, 2] {
            let resp = p
                .plan_action(PlanActionRequest {
                    action_type: "lifecycle".to_string(),
                    linked_resources: vec![linked_data(); count],
                    config: Value::object([("attr", Value::string("foo"))]),
                    ..Default::default()
                })
                .await;
            assert!(resp.diagnostics.has_errors());
        }
        assert_eq!(mock.call_count("PlanAction"), 0);

        let resp = p
            .plan_action(PlanActionRequest {
                action_type: "lifecycle".to_string(),
                linked_resources: vec![linked_data()],
                config: Value::object([("attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        assert!(!resp.diagnostics.has_errors(), "{:?}", resp.diagnostics);
        assert_eq!(mock.call_count("PlanAction"), 1);
    }

    #[tokio::test]
    async fn test_plan_action_linked_arity() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        for count in [0, 1, 3] {
            let resp = p
                .plan_action(PlanActionRequest {
                    action_type: "linked".to_string(),
                    linked_resources: vec![linked_data(); count],
                    config: Value::object([("attr", Value::string("foo"))]),
                    ..Default::default()
                })
                .await;
            assert!(resp.diagnostics.has_errors());
        }
        assert_eq!(mock.call_count("PlanAction"), 0);
    }

    #[tokio::test]
    async fn test_plan_action_invalid_config_fails_locally() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        let resp = p
            .plan_action(PlanActionRequest {
                action_type: "unlinked".to_string(),
                config: Value::object([("not_attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.has_errors());
        assert_eq!(mock.call_count("PlanAction"), 0);
    }

    #[tokio::test]
    async fn test_plan_action_too_many_returned() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.plan_action.linked_resources = vec![
            pb::plan_action_response::LinkedResource::default(),
            pb::plan_action_response::LinkedResource::default(),
        ];
        let (_, p) = provider(mock);
        let resp = p
            .plan_action(PlanActionRequest {
                action_type: "lifecycle".to_string(),
                linked_resources: vec![linked_data()],
                config: Value::object([("attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.has_errors());
    }

    async fn drain(resp: InvokeActionResponse) -> Vec<InvokeActionEvent> {
        let mut rx = resp.events.expect("events channel");
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    #[tokio::test]
    async fn test_invoke_action_progress_then_completed() {
        use pb::invoke_action_event::{Completed, Event, Progress};
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.invoke_events = vec![
            Ok(pb::InvokeActionEvent {
                event: Some(Event::Progress(Progress {
                    message: "Hello from the action".to_string(),
                })),
            }),
            Ok(pb::InvokeActionEvent {
                event: Some(Event::Completed(Completed {
                    linked_resources: Vec::new(),
                    diagnostics: vec![pb::Diagnostic {
                        severity: pb::diagnostic::Severity::Error as i32,
                        summary: "action failed".to_string(),
                        detail: String::new(),
                        attribute: None,
                    }],
                })),
            }),
        ];
        let (_, p) = provider(mock);
        let resp = p
            .invoke_action(InvokeActionRequest {
                action_type: "unlinked".to_string(),
                config: Value::object([("attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        assert!(resp.diagnostics.is_empty());
        let events = drain(resp).await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            InvokeActionEvent::Progress {
                message: "Hello from the action".to_string()
            }
        );
        match &events[1] {
            InvokeActionEvent::Completed { diagnostics, .. } => assert!(diagnostics.has_errors()),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invoke_action_stream_failure_is_terminal() {
        use pb::invoke_action_event::{Event, Progress};
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.invoke_events = vec![
            Ok(pb::InvokeActionEvent {
                event: Some(Event::Progress(Progress {
                    message: "working".to_string(),
                })),
            }),
            Err(Status::unavailable("connection lost")),
        ];
        let (_, p) = provider(mock);
        let resp = p
            .invoke_action(InvokeActionRequest {
                action_type: "unlinked".to_string(),
                config: Value::object([("attr", Value::string("foo"))]),
                ..Default::default()
            })
            .await;
        let events = drain(resp).await;
        assert_eq!(events.len(), 2);
        assert!(events[1].is_terminal());
    }

    #[tokio::test]
    async fn test_invoke_action_linked_arity() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        let resp = p
            .invoke_action(InvokeActionRequest {
                action_type: "linked".to_string(),
                linked_resources: vec![LinkedResourceInvokeData::default()],
                config: Value::object([("attr", Value::string("foo"))]),
            })
            .await;
        assert!(resp.events.is_none());
        assert!(resp.diagnostics.has_errors());
        assert_eq!(mock.call_count("InvokeAction"), 0);
    }

    #[tokio::test]
    async fn test_validate_resource_config_local_errors() {
        let (mock, p) = provider(MockRpc::new(proto_schema_fixture()));
        let diags = p
            .validate_resource_config(ValidateResourceConfigRequest {
                type_name: "resource".to_string(),
                config: Value::object([("bogus", Value::string("x"))]),
            })
            .await;
        assert!(diags.has_errors());
        assert_eq!(mock.call_count("ValidateResourceConfig"), 0);

        let diags = p
            .validate_resource_config(ValidateResourceConfigRequest {
                type_name: "resource".to_string(),
                config: Value::object([("attr", Value::string("x"))]),
            })
            .await;
        assert!(diags.is_empty());
        assert_eq!(mock.call_count("ValidateResourceConfig"), 1);
    }

    #[tokio::test]
    async fn test_stop_provider_error_string() {
        let mut mock = MockRpc::new(proto_schema_fixture());
        mock.stop.error = "still busy".to_string();
        let (_, p) = provider(mock);
        let diags = p.stop_provider().await;
        assert!(diags.has_errors());
    }

    #[test]
    fn test_path_conversion() {
        let path = AttributePath::root().attr("a").key("k").index(3);
        assert_eq!(path_from_proto(path_to_proto(&path)), path);
    }

    #[test]
    fn test_block_from_proto_rejects_bad_type() {
        let block = pb::schema::Block {
            attributes: vec![pb::schema::Attribute {
                name: "x".to_string(),
                r#type: b"not json".to_vec(),
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_err!(block_from_proto(block));
        let ok = pb::schema::Block {
            attributes: vec![pb::schema::Attribute {
                name: "x".to_string(),
                r#type: br#""string""#.to_vec(),
                optional: true,
                ..Default::default()
            }],
            ..Default::default()
        };
        let block = assert_ok!(block_from_proto(ok));
        assert!(block.attributes["x"].flags.optional);
    }
}
