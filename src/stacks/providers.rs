//! Provider instances for one stack operation, and the value plumbing
//! between configuration, stored records, and provider calls.

use super::config::{evaluate, StackConfig};
use super::raw::StateResourceInstanceObject;
use crate::addrs::ProviderAddr;
use crate::codec;
use crate::config::EngineOptions;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::provider::{
    ClientCapabilities, ConfigureProviderRequest, Provider, ProviderFactory, ProviderSession,
    UpgradeResourceIdentityRequest, UpgradeResourceStateRequest, ValidateProviderConfigRequest,
};
use crate::schema::{AttributeType, Block, IdentitySchema, NestingMode, ProviderSchema, Schema};
use crate::validation::complete_config;
use crate::value::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Version written into plan headers and sent to providers on configure.
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

/// One started provider configuration.
pub struct ConfiguredProvider {
    /// Local name in the stack configuration.
    pub name: String,
    /// Provider address.
    pub addr: ProviderAddr,
    /// The session.
    pub session: Arc<ProviderSession>,
    /// The provider's schema.
    pub schema: Arc<ProviderSchema>,
    /// Whether the configuration was wholly known, and so configured.
    pub configured: bool,
}

impl std::fmt::Debug for ConfiguredProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfiguredProvider")
            .field("name", &self.name)
            .field("addr", &self.addr)
            .field("configured", &self.configured)
            .finish()
    }
}

/// Every provider configuration of a stack, started for one operation.
#[derive(Debug, Default)]
pub struct ProviderSet {
    by_name: BTreeMap<String, Arc<ConfiguredProvider>>,
    failed: BTreeSet<String>,
}

impl ProviderSet {
    /// Start and configure every provider the stack declares.
    ///
    /// A provider whose configuration is not wholly known is started but left
    /// unconfigured; resources using it are deferred.
    pub async fn start(
        config: &StackConfig,
        factory: &dyn ProviderFactory,
        vars: &BTreeMap<String, Value>,
        options: &EngineOptions,
    ) -> (Self, Diagnostics) {
        let mut set = Self::default();
        let mut diags = Diagnostics::new();
        for (name, provider_config) in &config.providers {
            match Self::start_one(name, &provider_config.source, &provider_config.config, factory, vars, options).await
            {
                Ok((provider, start_diags)) => {
                    diags.extend(start_diags);
                    set.by_name.insert(name.clone(), Arc::new(provider));
                },
                Err(start_diags) => {
                    diags.extend(start_diags);
                    set.failed.insert(name.clone());
                },
            }
        }
        (set, diags)
    }

    async fn start_one(
        name: &str,
        addr: &ProviderAddr,
        expr: &serde_json::Value,
        factory: &dyn ProviderFactory,
        vars: &BTreeMap<String, Value>,
        options: &EngineOptions,
    ) -> Result<(ConfiguredProvider, Diagnostics), Diagnostics> {
        let mut diags = Diagnostics::new();
        let inner: Arc<dyn Provider> = factory.new_provider(addr).await.map_err(|err| {
            Diagnostics::from(Diagnostic::error("Failed to start provider").with_detail(format!(
                "Provider \"{}\" ({}): {}",
                name,
                addr,
                err.message()
            )))
        })?;
        let session = Arc::new(ProviderSession::new(inner).with_stop_timeout(options.stop_timeout));

        let schema_resp = session.get_provider_schema().await;
        diags.extend(schema_resp.diagnostics);
        if diags.has_errors() {
            return Err(diags);
        }
        let schema = schema_resp.schema;

        let value = evaluate(expr, vars).map_err(Diagnostics::from)?;
        let value = complete_config(&schema.provider.block, &value);
        let configured = value.is_wholly_known();
        if configured {
            diags.extend(
                session
                    .validate_provider_config(ValidateProviderConfigRequest { config: value.clone() })
                    .await,
            );
            if diags.has_errors() {
                return Err(diags);
            }
            diags.extend(
                session
                    .configure_provider(ConfigureProviderRequest {
                        engine_version: ENGINE_VERSION.to_string(),
                        config: value,
                        client_capabilities: capabilities(options),
                    })
                    .await,
            );
            if diags.has_errors() {
                return Err(diags);
            }
            info!(provider = %addr, name, "provider configured");
        } else {
            debug!(provider = %addr, name, "provider configuration unknown, not configuring");
        }
        Ok((
            ConfiguredProvider {
                name: name.to_string(),
                addr: addr.clone(),
                session,
                schema,
                configured,
            },
            diags,
        ))
    }

    /// The provider with local name `name`.
    pub fn get(&self, name: &str) -> Option<&Arc<ConfiguredProvider>> {
        self.by_name.get(name)
    }

    /// The provider that last managed a stored object: its recorded
    /// configuration if still declared for the same address, else any
    /// configuration for that address.
    pub fn for_stored(&self, addr: &ProviderAddr, name: &str) -> Option<&Arc<ConfiguredProvider>> {
        self.by_name
            .get(name)
            .filter(|p| &p.addr == addr)
            .or_else(|| self.by_name.values().find(|p| &p.addr == addr))
    }

    /// Whether starting `name` already failed and was reported.
    pub fn is_failed(&self, name: &str) -> bool {
        self.failed.contains(name)
    }

    /// Stop every provider.
    pub async fn stop(&self) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for provider in self.by_name.values() {
            let stop_diags = provider.session.stop_provider().await;
            if stop_diags.has_errors() {
                warn!(provider = %provider.addr, "provider stop reported errors");
            }
            diags.extend(stop_diags);
        }
        diags
    }
}

/// Capabilities the engine advertises.
pub fn capabilities(options: &EngineOptions) -> ClientCapabilities {
    ClientCapabilities {
        deferral_allowed: options.allow_deferral,
    }
}

/// Evaluate a configuration expression against `block`: absent attributes are
/// filled in and the value is normalized through the wire codec.
pub fn block_config(
    expr: &serde_json::Value,
    vars: &BTreeMap<String, Value>,
    block: &Block,
) -> Result<Value, Diagnostic> {
    let value = evaluate(expr, vars)?;
    let value = complete_config(block, &value);
    normalize(&value, &block.implied_type()).map_err(|err| {
        Diagnostic::error("Invalid configuration").with_detail(err.message())
    })
}

/// Round-trip a value through MessagePack so collections take their schema
/// kinds and shapes are checked.
pub fn normalize(value: &Value, ty: &AttributeType) -> Result<Value, crate::error::EngineError> {
    codec::decode(&codec::encode(value, ty)?, ty)
}

/// MessagePack of a value, or empty bytes for null.
pub fn pack(value: &Value, ty: &AttributeType) -> Result<Vec<u8>, crate::error::EngineError> {
    if value.is_null() {
        return Ok(Vec::new());
    }
    codec::encode(value, ty)
}

/// Inverse of [`pack`].
pub fn unpack(bytes: &[u8], ty: &AttributeType) -> Result<Value, crate::error::EngineError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    codec::decode(bytes, ty)
}

/// Merge configuration into prior state the way a provider expects its
/// proposed new state: computed attributes left null in configuration keep
/// their prior value.
pub fn proposed_new_state(block: &Block, prior: &Value, config: &Value) -> Value {
    let Value::Object(config_attrs) = config else {
        return config.clone();
    };
    let prior_attrs = match prior {
        Value::Object(attrs) => Some(attrs),
        _ => None,
    };
    let mut attrs = config_attrs.clone();
    for (name, attr) in &block.attributes {
        let unset = config_attrs.get(name).map_or(true, Value::is_null);
        if attr.flags.computed && unset {
            let prior_value = prior_attrs.and_then(|p| p.get(name)).cloned().unwrap_or_default();
            attrs.insert(name.clone(), prior_value);
        }
    }
    for (name, nested) in &block.blocks {
        if matches!(nested.nesting_mode, NestingMode::Single | NestingMode::Group) {
            let prior_block = prior_attrs.and_then(|p| p.get(name)).cloned().unwrap_or_default();
            if let Some(config_block) = config_attrs.get(name) {
                attrs.insert(
                    name.clone(),
                    proposed_new_state(&nested.block, &prior_block, config_block),
                );
            }
        }
    }
    Value::Object(attrs)
}

/// Null every ephemeral attribute so it is never written to state.
pub fn strip_ephemeral(block: &Block, value: &Value) -> Value {
    let Value::Object(attrs) = value else {
        return value.clone();
    };
    let mut attrs = attrs.clone();
    for (name, attr) in &block.attributes {
        if attr.flags.ephemeral {
            attrs.insert(name.clone(), Value::Null);
        }
    }
    Value::Object(attrs)
}

/// Decode a stored object's value and identity under the current schemas,
/// asking the provider to upgrade either when it was written under an older
/// version.
pub async fn decode_stored(
    provider: &ConfiguredProvider,
    type_name: &str,
    schema: &Schema,
    identity_schema: Option<&IdentitySchema>,
    record: &StateResourceInstanceObject,
) -> Result<(Value, Value), Diagnostics> {
    let value = if record.schema_version < schema.version {
        debug!(resource_type = type_name, from = record.schema_version, to = schema.version, "upgrading resource state");
        let resp = provider
            .session
            .upgrade_resource_state(UpgradeResourceStateRequest {
                type_name: type_name.to_string(),
                version: record.schema_version,
                raw_state_json: record.value_json.clone(),
            })
            .await;
        if resp.diagnostics.has_errors() {
            return Err(resp.diagnostics);
        }
        resp.upgraded_state
    } else if record.schema_version > schema.version {
        return Err(Diagnostic::error("Resource state from a newer provider")
            .with_detail(format!(
                "The stored {} object has schema version {}, but {} supports only up to version {}.",
                type_name, record.schema_version, provider.addr, schema.version
            ))
            .into());
    } else {
        codec::decode_json(&record.value_json, &schema.block.implied_type())
            .map(|v| codec::normalize_empty_strings(v, &schema.block))
            .map_err(Diagnostics::from)?
    };

    let identity = match identity_schema {
        Some(_) if record.identity_json.is_empty() => Value::Null,
        None => Value::Null,
        Some(identity_schema) if record.identity_schema_version < identity_schema.version => {
            let resp = provider
                .session
                .upgrade_resource_identity(UpgradeResourceIdentityRequest {
                    type_name: type_name.to_string(),
                    version: record.identity_schema_version,
                    raw_identity_json: record.identity_json.clone(),
                })
                .await;
            if resp.diagnostics.has_errors() {
                return Err(resp.diagnostics);
            }
            resp.upgraded_identity
        },
        Some(identity_schema) => codec::decode_json(&record.identity_json, &identity_schema.implied_type())
            .map_err(Diagnostics::from)?,
    };
    Ok((value, identity))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, AttributeFlags, NestedBlock};
    use tokio_test::{assert_err, assert_ok};

    fn block() -> Block {
        Block::new()
            .with_attribute("id", Attribute::computed_string())
            .with_attribute("name", Attribute::required_string())
            .with_attribute("tags", Attribute::new(AttributeType::set(AttributeType::String), AttributeFlags::optional()))
            .with_block(
                "settings",
                NestedBlock::single(
                    Block::new().with_attribute("etag", Attribute::computed_string()),
                ),
            )
    }

    #[test]
    fn test_block_config_normalizes() {
        let vars = BTreeMap::new();
        let value = assert_ok!(block_config(
            &serde_json::json!({ "name": "a", "tags": ["x"] }),
            &vars,
            &block()
        ));
        assert_eq!(value.get_attr("tags"), Some(&Value::Set(vec![Value::string("x")])));
        assert_eq!(value.get_attr("id"), Some(&Value::Null));

        assert_err!(block_config(&serde_json::json!({ "name": 1.5, "bogus": true }), &vars, &block()));
    }

    #[test]
    fn test_proposed_new_state_keeps_computed() {
        let prior = Value::object([
            ("id", Value::string("i-1")),
            ("name", Value::string("old")),
            ("tags", Value::Null),
            ("settings", Value::object([("etag", Value::string("e1"))])),
        ]);
        let config = Value::object([
            ("id", Value::Null),
            ("name", Value::string("new")),
            ("tags", Value::Null),
            ("settings", Value::object([("etag", Value::Null)])),
        ]);
        let proposed = proposed_new_state(&block(), &prior, &config);
        assert_eq!(proposed.get_attr("id"), Some(&Value::string("i-1")));
        assert_eq!(proposed.get_attr("name"), Some(&Value::string("new")));
        assert_eq!(
            proposed.get_attr("settings").and_then(|s| s.get_attr("etag")),
            Some(&Value::string("e1"))
        );

        let created = proposed_new_state(&block(), &Value::Null, &config);
        assert_eq!(created.get_attr("id"), Some(&Value::Null));
    }

    #[test]
    fn test_pack_null_is_empty() {
        let ty = block().implied_type();
        assert!(assert_ok!(pack(&Value::Null, &ty)).is_empty());
        assert_eq!(assert_ok!(unpack(&[], &ty)), Value::Null);
    }

    #[test]
    fn test_strip_ephemeral() {
        let block = Block::new()
            .with_attribute("token", Attribute::optional_string().ephemeral())
            .with_attribute("name", Attribute::optional_string());
        let value = Value::object([("token", Value::string("t")), ("name", Value::string("n"))]);
        let stripped = strip_ephemeral(&block, &value);
        assert_eq!(stripped.get_attr("token"), Some(&Value::Null));
        assert_eq!(stripped.get_attr("name"), Some(&Value::string("n")));
    }
}
