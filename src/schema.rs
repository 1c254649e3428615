//! Schema types describing provider, resource, and action structure.
//!
//! Schemas are immutable once retrieved from a provider. Each resource type
//! schema carries a version so state recorded under an older version can be
//! upgraded.

use crate::value::{AttributePath, Value};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The type of an attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeType {
    /// A string value.
    String,
    /// A 64-bit integer.
    Int64,
    /// A 64-bit floating point number.
    Float64,
    /// A boolean value.
    Bool,
    /// A list of values of a single type.
    List(Box<AttributeType>),
    /// A set of unique values of a single type.
    Set(Box<AttributeType>),
    /// A map from string keys to values of a single type.
    Map(Box<AttributeType>),
    /// An object with a fixed set of attributes.
    Object(BTreeMap<String, AttributeType>),
    /// A dynamic type that can hold any value.
    Dynamic,
}

impl AttributeType {
    /// Create a list type.
    pub fn list(element_type: AttributeType) -> Self {
        Self::List(Box::new(element_type))
    }

    /// Create a set type.
    pub fn set(element_type: AttributeType) -> Self {
        Self::Set(Box::new(element_type))
    }

    /// Create a map type.
    pub fn map(element_type: AttributeType) -> Self {
        Self::Map(Box::new(element_type))
    }

    /// Create an object type.
    pub fn object<K, I>(attributes: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, AttributeType)>,
    {
        Self::Object(attributes.into_iter().map(|(k, t)| (k.into(), t)).collect())
    }

    /// Human-readable type name.
    pub fn friendly_name(&self) -> String {
        match self {
            Self::String => "string".to_string(),
            Self::Int64 => "int64".to_string(),
            Self::Float64 => "float64".to_string(),
            Self::Bool => "bool".to_string(),
            Self::List(e) => format!("list of {}", e.friendly_name()),
            Self::Set(e) => format!("set of {}", e.friendly_name()),
            Self::Map(e) => format!("map of {}", e.friendly_name()),
            Self::Object(_) => "object".to_string(),
            Self::Dynamic => "dynamic".to_string(),
        }
    }
}

/// Describes how an attribute can be used.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AttributeFlags {
    /// The attribute is required in configuration.
    #[serde(default)]
    pub required: bool,
    /// The attribute is optional in configuration.
    #[serde(default)]
    pub optional: bool,
    /// The attribute is computed by the provider.
    #[serde(default)]
    pub computed: bool,
    /// The attribute must never be displayed or logged verbatim.
    #[serde(default)]
    pub sensitive: bool,
    /// The attribute is never persisted to state.
    #[serde(default)]
    pub ephemeral: bool,
}

impl AttributeFlags {
    /// Create flags for a required attribute.
    pub fn required() -> Self {
        Self {
            required: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional attribute.
    pub fn optional() -> Self {
        Self {
            optional: true,
            ..Default::default()
        }
    }

    /// Create flags for a computed attribute (read-only, set by provider).
    pub fn computed() -> Self {
        Self {
            computed: true,
            ..Default::default()
        }
    }

    /// Create flags for an optional+computed attribute.
    pub fn optional_computed() -> Self {
        Self {
            optional: true,
            computed: true,
            ..Default::default()
        }
    }

    /// Mark the attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.sensitive = true;
        self
    }
}

/// Describes a single attribute in a schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attribute {
    /// The type of the attribute.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Flags describing how the attribute can be used.
    #[serde(flatten)]
    pub flags: AttributeFlags,
    /// Human-readable description of the attribute.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Attribute {
    /// Create a new attribute with the given type and flags.
    pub fn new(attr_type: AttributeType, flags: AttributeFlags) -> Self {
        Self {
            attr_type,
            flags,
            description: None,
        }
    }

    /// Create a required string attribute.
    pub fn required_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::required())
    }

    /// Create an optional string attribute.
    pub fn optional_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::optional())
    }

    /// Create a computed string attribute.
    pub fn computed_string() -> Self {
        Self::new(AttributeType::String, AttributeFlags::computed())
    }

    /// Create a required int64 attribute.
    pub fn required_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::required())
    }

    /// Create an optional int64 attribute.
    pub fn optional_int64() -> Self {
        Self::new(AttributeType::Int64, AttributeFlags::optional())
    }

    /// Create an optional bool attribute.
    pub fn optional_bool() -> Self {
        Self::new(AttributeType::Bool, AttributeFlags::optional())
    }

    /// Set the description for this attribute.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Mark this attribute as sensitive.
    pub fn sensitive(mut self) -> Self {
        self.flags.sensitive = true;
        self
    }

    /// Mark this attribute as ephemeral.
    pub fn ephemeral(mut self) -> Self {
        self.flags.ephemeral = true;
        self
    }

    /// Whether configuration may set this attribute.
    pub fn is_configurable(&self) -> bool {
        self.flags.required || self.flags.optional
    }
}

/// The nesting mode for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NestingMode {
    /// At most one block; absent is null.
    #[default]
    Single,
    /// Exactly one block; absent is an object of nulls.
    Group,
    /// Zero or more blocks, ordered.
    List,
    /// Zero or more blocks, unordered and unique.
    Set,
    /// Zero or more blocks keyed by label.
    Map,
}

/// A block of attributes and nested blocks.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Block {
    /// The attributes within this block.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, Attribute>,
    /// Nested blocks within this block.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub blocks: BTreeMap<String, NestedBlock>,
    /// Human-readable description of the block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Block {
    /// Create a new empty block.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an attribute to this block.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to this block.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.blocks.insert(name.into(), block);
        self
    }

    /// The object type a value conforming to this block has.
    pub fn implied_type(&self) -> AttributeType {
        let mut attrs: BTreeMap<String, AttributeType> = self
            .attributes
            .iter()
            .map(|(name, attr)| (name.clone(), attr.attr_type.clone()))
            .collect();
        for (name, nested) in &self.blocks {
            let inner = nested.block.implied_type();
            let ty = match nested.nesting_mode {
                NestingMode::Single | NestingMode::Group => inner,
                NestingMode::List => AttributeType::list(inner),
                NestingMode::Set => AttributeType::set(inner),
                NestingMode::Map => AttributeType::map(inner),
            };
            attrs.insert(name.clone(), ty);
        }
        AttributeType::Object(attrs)
    }

    /// Paths of every non-null sensitive attribute in `value`.
    pub fn sensitive_paths(&self, value: &Value) -> Vec<AttributePath> {
        let mut paths = Vec::new();
        self.collect_sensitive(value, &AttributePath::root(), &mut paths);
        paths
    }

    fn collect_sensitive(&self, value: &Value, path: &AttributePath, out: &mut Vec<AttributePath>) {
        let Value::Object(attrs) = value else {
            return;
        };
        for (name, attr) in &self.attributes {
            if attr.flags.sensitive && attrs.get(name).is_some_and(|v| !v.is_null()) {
                out.push(path.clone().attr(name));
            }
        }
        for (name, nested) in &self.blocks {
            let block_path = path.clone().attr(name);
            match (nested.nesting_mode, attrs.get(name)) {
                (NestingMode::Single | NestingMode::Group, Some(v)) => {
                    nested.block.collect_sensitive(v, &block_path, out)
                },
                (NestingMode::List | NestingMode::Set, Some(Value::List(items) | Value::Set(items))) => {
                    for (i, item) in items.iter().enumerate() {
                        nested
                            .block
                            .collect_sensitive(item, &block_path.clone().index(i as i64), out);
                    }
                },
                (NestingMode::Map, Some(Value::Map(items) | Value::Object(items))) => {
                    for (key, item) in items {
                        nested.block.collect_sensitive(item, &block_path.clone().key(key), out);
                    }
                },
                _ => {},
            }
        }
    }
}

/// A nested block with its nesting mode and constraints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NestedBlock {
    /// The block definition.
    #[serde(flatten)]
    pub block: Block,
    /// How the block is nested.
    #[serde(default)]
    pub nesting_mode: NestingMode,
    /// Minimum number of blocks required.
    #[serde(default)]
    pub min_items: u32,
    /// Maximum number of blocks allowed (0 = unlimited).
    #[serde(default)]
    pub max_items: u32,
}

impl NestedBlock {
    fn with_mode(block: Block, nesting_mode: NestingMode) -> Self {
        Self {
            block,
            nesting_mode,
            min_items: 0,
            max_items: 0,
        }
    }

    /// Create a single nested block (0 or 1 allowed).
    pub fn single(block: Block) -> Self {
        Self {
            max_items: 1,
            ..Self::with_mode(block, NestingMode::Single)
        }
    }

    /// Create a group nested block.
    pub fn group(block: Block) -> Self {
        Self::with_mode(block, NestingMode::Group)
    }

    /// Create a list of nested blocks.
    pub fn list(block: Block) -> Self {
        Self::with_mode(block, NestingMode::List)
    }

    /// Create a set of nested blocks.
    pub fn set(block: Block) -> Self {
        Self::with_mode(block, NestingMode::Set)
    }

    /// Create a map of nested blocks.
    pub fn map(block: Block) -> Self {
        Self::with_mode(block, NestingMode::Map)
    }

    /// Set the minimum number of blocks required.
    pub fn with_min_items(mut self, min: u32) -> Self {
        self.min_items = min;
        self
    }

    /// Set the maximum number of blocks allowed.
    pub fn with_max_items(mut self, max: u32) -> Self {
        self.max_items = max;
        self
    }
}

/// Versioned schema for a resource, data source, or provider configuration.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Schema {
    /// The version of this schema (for state upgrades).
    #[serde(default)]
    pub version: u64,
    /// The root block containing all attributes and nested blocks.
    #[serde(flatten)]
    pub block: Block,
}

impl Schema {
    /// Create a new schema with the given version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            block: Block::new(),
        }
    }

    /// Create a schema at version 0.
    pub fn v0() -> Self {
        Self::new(0)
    }

    /// Add an attribute to the schema.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: Attribute) -> Self {
        self.block.attributes.insert(name.into(), attr);
        self
    }

    /// Add a nested block to the schema.
    pub fn with_block(mut self, name: impl Into<String>, block: NestedBlock) -> Self {
        self.block.blocks.insert(name.into(), block);
        self
    }

    /// Wrap a list resource's filter schema the way list results are exposed:
    /// a computed dynamic `data` attribute plus the filter under `config`.
    pub fn list_resource_wrapper(filter: Schema) -> Self {
        Schema::new(filter.version)
            .with_attribute(
                "data",
                Attribute::new(AttributeType::Dynamic, AttributeFlags::computed()),
            )
            .with_block("config", NestedBlock::single(filter.block))
    }
}

/// An attribute of a resource identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentityAttribute {
    /// The attribute type.
    #[serde(rename = "type")]
    pub attr_type: AttributeType,
    /// Must be supplied when importing by identity.
    #[serde(default)]
    pub required_for_import: bool,
    /// May be supplied when importing by identity.
    #[serde(default)]
    pub optional_for_import: bool,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Versioned schema for a resource type's identity.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct IdentitySchema {
    /// Identity schema version.
    #[serde(default)]
    pub version: u64,
    /// Identity attributes by name.
    #[serde(default)]
    pub attributes: BTreeMap<String, IdentityAttribute>,
}

impl IdentitySchema {
    /// Create an identity schema at the given version.
    pub fn new(version: u64) -> Self {
        Self {
            version,
            attributes: BTreeMap::new(),
        }
    }

    /// Add an identity attribute.
    pub fn with_attribute(mut self, name: impl Into<String>, attr: IdentityAttribute) -> Self {
        self.attributes.insert(name.into(), attr);
        self
    }

    /// The identity viewed as an attribute block.
    pub fn as_block(&self) -> Block {
        let attributes = self
            .attributes
            .iter()
            .map(|(name, attr)| {
                let flags = if attr.required_for_import {
                    AttributeFlags::required()
                } else {
                    AttributeFlags::optional()
                };
                (name.clone(), Attribute::new(attr.attr_type.clone(), flags))
            })
            .collect();
        Block {
            attributes,
            ..Block::default()
        }
    }

    /// The object type an identity value has.
    pub fn implied_type(&self) -> AttributeType {
        AttributeType::Object(
            self.attributes
                .iter()
                .map(|(name, attr)| (name.clone(), attr.attr_type.clone()))
                .collect(),
        )
    }
}

/// When a lifecycle action runs relative to its linked resource's change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionOrder {
    /// Before the resource change is applied.
    Before,
    /// After the resource change is applied.
    After,
}

/// A resource type an action is linked to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedResourceSchema {
    /// The linked resource type.
    pub type_name: String,
    /// Human-readable description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl LinkedResourceSchema {
    /// Link to a resource type.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            description: None,
        }
    }
}

/// How an action relates to resource instances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum ActionLinkage {
    /// Not linked to any resource.
    Unlinked,
    /// Linked to exactly one resource, run around its change.
    Lifecycle {
        /// When the action runs.
        executes: ExecutionOrder,
        /// The linked resource type.
        resource: LinkedResourceSchema,
    },
    /// Linked to a fixed list of resources.
    Linked {
        /// The linked resource types, in order.
        resources: Vec<LinkedResourceSchema>,
    },
}

impl ActionLinkage {
    /// The exact number of linked resources a call must supply.
    pub fn arity(&self) -> usize {
        match self {
            Self::Unlinked => 0,
            Self::Lifecycle { .. } => 1,
            Self::Linked { resources } => resources.len(),
        }
    }

    /// The linked resource types, in order.
    pub fn linked_types(&self) -> Vec<&str> {
        match self {
            Self::Unlinked => Vec::new(),
            Self::Lifecycle { resource, .. } => vec![resource.type_name.as_str()],
            Self::Linked { resources } => resources.iter().map(|r| r.type_name.as_str()).collect(),
        }
    }
}

/// Schema for an action type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSchema {
    /// The action's configuration schema.
    pub schema: Schema,
    /// The action's linkage shape.
    pub linkage: ActionLinkage,
}

/// Optional protocol features a provider advertises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ServerCapabilities {
    /// The provider wants PlanResourceChange called for destroys.
    #[serde(default)]
    pub plan_destroy: bool,
    /// The provider's schema may be cached per provider address.
    #[serde(default)]
    pub get_provider_schema_optional: bool,
    /// The provider implements MoveResourceState.
    #[serde(default)]
    pub move_resource_state: bool,
}

/// The complete schema of one provider.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProviderSchema {
    /// Schema for provider configuration.
    #[serde(default)]
    pub provider: Schema,
    /// Managed resource schemas.
    #[serde(default)]
    pub resources: BTreeMap<String, Schema>,
    /// Data source schemas.
    #[serde(default)]
    pub data_sources: BTreeMap<String, Schema>,
    /// Ephemeral resource schemas.
    #[serde(default)]
    pub ephemeral_resources: BTreeMap<String, Schema>,
    /// List resource schemas, wrapped by [`Schema::list_resource_wrapper`].
    #[serde(default)]
    pub list_resources: BTreeMap<String, Schema>,
    /// Action schemas.
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSchema>,
    /// Resource identity schemas.
    #[serde(default)]
    pub identities: BTreeMap<String, IdentitySchema>,
    /// Advertised capabilities.
    #[serde(default)]
    pub capabilities: ServerCapabilities,
}

impl ProviderSchema {
    /// Create a new empty provider schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the provider configuration schema.
    pub fn with_provider_config(mut self, schema: Schema) -> Self {
        self.provider = schema;
        self
    }

    /// Add a resource schema.
    pub fn with_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.resources.insert(name.into(), schema);
        self
    }

    /// Add a data source schema.
    pub fn with_data_source(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.data_sources.insert(name.into(), schema);
        self
    }

    /// Add an ephemeral resource schema.
    pub fn with_ephemeral_resource(mut self, name: impl Into<String>, schema: Schema) -> Self {
        self.ephemeral_resources.insert(name.into(), schema);
        self
    }

    /// Add a list resource schema, given its filter schema.
    pub fn with_list_resource(mut self, name: impl Into<String>, filter: Schema) -> Self {
        self.list_resources
            .insert(name.into(), Schema::list_resource_wrapper(filter));
        self
    }

    /// Add an action schema.
    pub fn with_action(mut self, name: impl Into<String>, action: ActionSchema) -> Self {
        self.actions.insert(name.into(), action);
        self
    }

    /// Add a resource identity schema.
    pub fn with_identity(mut self, name: impl Into<String>, identity: IdentitySchema) -> Self {
        self.identities.insert(name.into(), identity);
        self
    }

    /// Set the advertised capabilities.
    pub fn with_capabilities(mut self, capabilities: ServerCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_attribute_type_json() {
        assert_eq!(serde_json::to_value(AttributeType::String).unwrap(), json!("string"));
        assert_eq!(
            serde_json::to_value(AttributeType::list(AttributeType::Int64)).unwrap(),
            json!({"list": "int64"})
        );
        let parsed: AttributeType =
            serde_json::from_value(json!({"object": {"id": "string"}})).unwrap();
        assert_eq!(parsed, AttributeType::object([("id", AttributeType::String)]));
    }

    #[test]
    fn test_attribute_flags() {
        let required = AttributeFlags::required();
        assert!(required.required);
        assert!(!required.optional);
        assert!(!required.computed);

        let oc = AttributeFlags::optional_computed().sensitive();
        assert!(oc.optional && oc.computed && oc.sensitive);
    }

    #[test]
    fn test_implied_type_includes_nested_blocks() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_block(
                "rule",
                NestedBlock::list(Block::new().with_attribute("port", Attribute::required_int64())),
            )
            .with_block("timeouts", NestedBlock::single(Block::new()));
        let expected = AttributeType::object([
            ("name", AttributeType::String),
            (
                "rule",
                AttributeType::list(AttributeType::object([("port", AttributeType::Int64)])),
            ),
            ("timeouts", AttributeType::object(Vec::<(String, AttributeType)>::new())),
        ]);
        assert_eq!(schema.block.implied_type(), expected);
    }

    #[test]
    fn test_sensitive_paths_walk_blocks() {
        let block = Block::new()
            .with_attribute("password", Attribute::optional_string().sensitive())
            .with_attribute("user", Attribute::optional_string())
            .with_block(
                "secret",
                NestedBlock::list(
                    Block::new().with_attribute("value", Attribute::required_string().sensitive()),
                ),
            );
        let value = Value::object([
            ("password", Value::string("hunter2")),
            ("user", Value::string("admin")),
            (
                "secret",
                Value::List(vec![Value::object([("value", Value::string("s"))])]),
            ),
        ]);
        assert_eq!(
            block.sensitive_paths(&value),
            vec![
                AttributePath::root().attr("password"),
                AttributePath::root().attr("secret").index(0).attr("value"),
            ]
        );
        let unset = Value::object([("password", Value::Null)]);
        assert!(block.sensitive_paths(&unset).is_empty());
    }

    #[test]
    fn test_action_linkage_arity() {
        assert_eq!(ActionLinkage::Unlinked.arity(), 0);
        let lifecycle = ActionLinkage::Lifecycle {
            executes: ExecutionOrder::Before,
            resource: LinkedResourceSchema::new("resource"),
        };
        assert_eq!(lifecycle.arity(), 1);
        assert_eq!(lifecycle.linked_types(), vec!["resource"]);
        let linked = ActionLinkage::Linked {
            resources: vec![LinkedResourceSchema::new("a"), LinkedResourceSchema::new("b")],
        };
        assert_eq!(linked.arity(), 2);
    }

    #[test]
    fn test_list_resource_wrapper() {
        let filter = Schema::v0().with_attribute("filter_attr", Attribute::required_string());
        let provider = ProviderSchema::new().with_list_resource("list", filter);
        let wrapped = &provider.list_resources["list"];
        assert!(wrapped.block.attributes["data"].flags.computed);
        assert_eq!(wrapped.block.attributes["data"].attr_type, AttributeType::Dynamic);
        assert!(wrapped.block.blocks["config"]
            .block
            .attributes
            .contains_key("filter_attr"));
    }

    #[test]
    fn test_identity_schema_as_block() {
        let identity = IdentitySchema::new(1).with_attribute(
            "id_attr",
            IdentityAttribute {
                attr_type: AttributeType::String,
                required_for_import: true,
                optional_for_import: false,
                description: None,
            },
        );
        let block = identity.as_block();
        assert!(block.attributes["id_attr"].flags.required);
        assert_eq!(
            identity.implied_type(),
            AttributeType::object([("id_attr", AttributeType::String)])
        );
    }
}
