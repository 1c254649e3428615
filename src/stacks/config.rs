//! Stack configuration documents.
//!
//! Configuration text comes from a [`SourceBundle`] and is a JSON document:
//!
//! ```json
//! {
//!   "variables": { "region": { "default": "eu" } },
//!   "providers": { "fake": { "source": "hemmer/fake", "config": {} } },
//!   "components": {
//!     "web": {
//!       "instances": { "$var": "regions" },
//!       "resources": {
//!         "fake_thing.server": {
//!           "provider": "fake",
//!           "config": { "name": { "$var": "region" } }
//!         }
//!       }
//!     }
//!   },
//!   "outputs": { "region": { "value": { "$var": "region" } } }
//! }
//! ```
//!
//! Expressions are literal JSON with two markers: `{"$var": "name"}` reads an
//! input variable and `{"$unknown": true}` stands for a value not known until
//! apply.

use crate::addrs::{AbsResourceInstanceAddr, InstanceKey, ProviderAddr, ResourceAddr, ResourceMode};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use crate::schema::ExecutionOrder;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Display;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Resolves configuration source addresses to their text.
#[async_trait::async_trait]
pub trait SourceBundle: Send + Sync {
    /// Read the source at `addr`.
    async fn read_source(&self, addr: &str) -> Result<String, EngineError>;
}

/// A bundle held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryBundle {
    sources: HashMap<String, String>,
}

impl MemoryBundle {
    /// An empty bundle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a source.
    pub fn with_source(mut self, addr: impl Into<String>, text: impl Into<String>) -> Self {
        self.sources.insert(addr.into(), text.into());
        self
    }
}

#[async_trait::async_trait]
impl SourceBundle for MemoryBundle {
    async fn read_source(&self, addr: &str) -> Result<String, EngineError> {
        self.sources
            .get(addr)
            .cloned()
            .ok_or_else(|| EngineError::Configuration(format!("source \"{}\" not found in bundle", addr)))
    }
}

/// A bundle rooted at a directory. Addresses are relative paths inside it.
#[derive(Debug, Clone)]
pub struct DirectoryBundle {
    root: PathBuf,
}

impl DirectoryBundle {
    /// A bundle over `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

#[async_trait::async_trait]
impl SourceBundle for DirectoryBundle {
    async fn read_source(&self, addr: &str) -> Result<String, EngineError> {
        let relative = Path::new(addr);
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(EngineError::Configuration(format!(
                "source \"{}\" escapes the bundle",
                addr
            )));
        }
        let path = self.root.join(relative);
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| EngineError::Configuration(format!("reading {}: {}", path.display(), e)))
    }
}

/// An input variable declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VariableConfig {
    /// Default value; the variable is required without one.
    #[serde(default)]
    pub default: Option<serde_json::Value>,
    /// Never shown in descriptions.
    #[serde(default)]
    pub sensitive: bool,
    /// Not persisted in plans or state; must be supplied again at apply.
    #[serde(default)]
    pub ephemeral: bool,
    /// Free text.
    #[serde(default)]
    pub description: Option<String>,
}

/// A provider configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// The provider's address.
    pub source: ProviderAddr,
    /// Configuration expression.
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

fn empty_object() -> serde_json::Value {
    serde_json::Value::Object(serde_json::Map::new())
}

/// An action run around a resource's change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ActionTrigger {
    /// Action type name.
    pub action_type: String,
    /// Before or after the resource change.
    pub when: ExecutionOrder,
    /// Configuration expression.
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
}

/// A resource declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    /// Local name of the provider configuration.
    pub provider: String,
    /// Configuration expression.
    #[serde(default = "empty_object")]
    pub config: serde_json::Value,
    /// Other resources of the same component that must change first.
    #[serde(default)]
    pub depends_on: Vec<ResourceAddr>,
    /// Replace by creating the new object before destroying the old one.
    #[serde(default)]
    pub create_before_destroy: bool,
    /// Lifecycle actions.
    #[serde(default)]
    pub actions: Vec<ActionTrigger>,
}

/// A rename within a component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MovedConfig {
    /// Previous address.
    pub from: ResourceAddr,
    /// New address.
    pub to: ResourceAddr,
}

/// Adoption of an existing object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ImportConfig {
    /// The resource to import into.
    pub to: ResourceAddr,
    /// Provider-specific import id.
    pub id: String,
}

/// Stop managing an object without it being in configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemovedConfig {
    /// The instance no longer managed.
    pub from: AbsResourceInstanceAddr,
    /// Destroy the object rather than forgetting it.
    #[serde(default)]
    pub destroy: bool,
}

/// A component declaration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ComponentConfig {
    /// Instance keys: a list of strings, a count, or an expression yielding
    /// either. A single instance when absent.
    #[serde(default)]
    pub instances: Option<serde_json::Value>,
    /// Components that must change first.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Resources keyed by address.
    #[serde(default)]
    pub resources: BTreeMap<ResourceAddr, ResourceConfig>,
    /// Renames.
    #[serde(default)]
    pub moved: Vec<MovedConfig>,
    /// Imports.
    #[serde(default)]
    pub imports: Vec<ImportConfig>,
}

/// An output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Value expression.
    pub value: serde_json::Value,
    /// Never shown in descriptions.
    #[serde(default)]
    pub sensitive: bool,
}

/// A whole stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StackConfig {
    /// Input variables.
    #[serde(default)]
    pub variables: BTreeMap<String, VariableConfig>,
    /// Provider configurations by local name.
    #[serde(default)]
    pub providers: BTreeMap<String, ProviderConfig>,
    /// Components.
    #[serde(default)]
    pub components: BTreeMap<String, ComponentConfig>,
    /// Output values.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputConfig>,
    /// Removed instances.
    #[serde(default)]
    pub removed: Vec<RemovedConfig>,
}

/// Summary of one component for discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentInfo {
    /// Component name.
    pub name: String,
    /// Whether instances are keyed.
    pub multi_instance: bool,
    /// Resource addresses declared in it.
    pub resources: Vec<ResourceAddr>,
    /// Provider addresses it uses.
    pub providers: Vec<ProviderAddr>,
}

/// The evaluated instance set of a component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instances {
    /// Known keys.
    Known(Vec<InstanceKey>),
    /// Not known until apply.
    Unknown,
}

impl StackConfig {
    /// Parse a configuration document.
    pub fn parse(source: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Read and parse the document at `addr`, then validate it.
    pub async fn load(bundle: &dyn SourceBundle, addr: &str) -> (Option<Self>, Diagnostics) {
        let text = match bundle.read_source(addr).await {
            Ok(text) => text,
            Err(err) => return (None, err.into()),
        };
        let config = match Self::parse(&text) {
            Ok(config) => config,
            Err(err) => {
                return (
                    None,
                    Diagnostic::error("Invalid stack configuration")
                        .with_detail(err.message())
                        .into(),
                )
            },
        };
        let diags = config.validate();
        debug!(source = addr, components = config.components.len(), "stack configuration loaded");
        (Some(config), diags)
    }

    /// Check references and ordering constraints.
    pub fn validate(&self) -> Diagnostics {
        let mut diags = Diagnostics::new();
        for expr in self.providers.values().map(|p| &p.config) {
            self.check_vars(expr, &mut diags);
        }
        for output in self.outputs.values() {
            self.check_vars(&output.value, &mut diags);
        }
        for (name, component) in &self.components {
            if let Some(instances) = &component.instances {
                self.check_vars(instances, &mut diags);
            }
            for dep in &component.depends_on {
                if !self.components.contains_key(dep) {
                    diags.push(
                        Diagnostic::error("Reference to undeclared component").with_detail(format!(
                            "Component \"{}\" depends on \"{}\", which is not declared.",
                            name, dep
                        )),
                    );
                }
            }
            for (addr, resource) in &component.resources {
                if !self.providers.contains_key(&resource.provider) {
                    diags.push(
                        Diagnostic::error("Reference to undeclared provider configuration").with_detail(
                            format!(
                                "Resource {} in component \"{}\" uses provider \"{}\", which is not declared.",
                                addr, name, resource.provider
                            ),
                        ),
                    );
                }
                self.check_vars(&resource.config, &mut diags);
                for trigger in &resource.actions {
                    self.check_vars(&trigger.config, &mut diags);
                    if addr.mode == ResourceMode::Data {
                        diags.push(Diagnostic::error("Invalid action trigger").with_detail(format!(
                            "Data resource {} cannot trigger actions.",
                            addr
                        )));
                    }
                }
                for dep in &resource.depends_on {
                    if !component.resources.contains_key(dep) {
                        diags.push(Diagnostic::error("Reference to undeclared resource").with_detail(
                            format!(
                                "Resource {} in component \"{}\" depends on {}, which is not declared.",
                                addr, name, dep
                            ),
                        ));
                    }
                }
            }
            for import in &component.imports {
                if !component.resources.contains_key(&import.to) || import.to.mode != ResourceMode::Managed {
                    diags.push(Diagnostic::error("Invalid import target").with_detail(format!(
                        "Import target {} in component \"{}\" is not a declared managed resource.",
                        import.to, name
                    )));
                }
            }
            for moved in &component.moved {
                if component.resources.contains_key(&moved.from) {
                    diags.push(Diagnostic::error("Moved object still declared").with_detail(format!(
                        "{} in component \"{}\" was moved to {} but is still declared.",
                        moved.from, name, moved.to
                    )));
                }
            }
            if let Err(diag) = self.resource_order(name) {
                diags.push(diag);
            }
        }
        for removed in &self.removed {
            let declared = self
                .components
                .get(&removed.from.component.component)
                .is_some_and(|c| c.resources.contains_key(&removed.from.resource.resource));
            if declared {
                diags.push(Diagnostic::error("Removed object still declared").with_detail(format!(
                    "{} is marked removed but is still declared.",
                    removed.from
                )));
            }
        }
        if let Err(diag) = self.component_order() {
            diags.push(diag);
        }
        diags
    }

    fn check_vars(&self, expr: &serde_json::Value, diags: &mut Diagnostics) {
        let mut names = BTreeSet::new();
        collect_vars(expr, &mut names);
        for name in names {
            if !self.variables.contains_key(name) {
                diags.push(
                    Diagnostic::error("Reference to undeclared input variable")
                        .with_detail(format!("An input variable named \"{}\" is not declared.", name)),
                );
            }
        }
    }

    /// Components in dependency order.
    pub fn component_order(&self) -> Result<Vec<String>, Diagnostic> {
        let graph: BTreeMap<String, Vec<String>> = self
            .components
            .iter()
            .map(|(name, c)| {
                let deps = c
                    .depends_on
                    .iter()
                    .filter(|d| self.components.contains_key(*d))
                    .cloned()
                    .collect();
                (name.clone(), deps)
            })
            .collect();
        dependency_order(&graph).map_err(|cycle| cycle_diagnostic("components", &cycle))
    }

    /// Resources of `component` in dependency order.
    pub fn resource_order(&self, component: &str) -> Result<Vec<ResourceAddr>, Diagnostic> {
        let Some(config) = self.components.get(component) else {
            return Ok(Vec::new());
        };
        let graph: BTreeMap<ResourceAddr, Vec<ResourceAddr>> = config
            .resources
            .iter()
            .map(|(addr, r)| {
                let deps = r
                    .depends_on
                    .iter()
                    .filter(|d| config.resources.contains_key(*d))
                    .cloned()
                    .collect();
                (addr.clone(), deps)
            })
            .collect();
        dependency_order(&graph).map_err(|cycle| cycle_diagnostic("resources", &cycle))
    }

    /// The provider addresses referenced anywhere.
    pub fn provider_addrs(&self) -> BTreeSet<ProviderAddr> {
        self.providers.values().map(|p| p.source.clone()).collect()
    }

    /// Describe every component.
    pub fn components_info(&self) -> Vec<ComponentInfo> {
        self.components
            .iter()
            .map(|(name, c)| ComponentInfo {
                name: name.clone(),
                multi_instance: c.instances.is_some(),
                resources: c.resources.keys().cloned().collect(),
                providers: c
                    .resources
                    .values()
                    .filter_map(|r| self.providers.get(&r.provider))
                    .map(|p| p.source.clone())
                    .collect::<BTreeSet<_>>()
                    .into_iter()
                    .collect(),
            })
            .collect()
    }

    /// Whether `addr` is named by a `removed` block, and if so whether it
    /// should be destroyed.
    pub fn removed_destroy(&self, addr: &AbsResourceInstanceAddr) -> Option<bool> {
        self.removed.iter().find(|r| &r.from == addr).map(|r| r.destroy)
    }
}

fn cycle_diagnostic<K: Display>(what: &str, cycle: &[K]) -> Diagnostic {
    let names: Vec<String> = cycle.iter().map(ToString::to_string).collect();
    Diagnostic::error("Dependency cycle").with_detail(format!(
        "The following {} depend on each other: {}.",
        what,
        names.join(", ")
    ))
}

/// Order `graph` (node to its dependencies) so dependencies come first.
/// Ties break by key order. On a cycle, returns the nodes left unordered.
pub fn dependency_order<K: Ord + Clone>(graph: &BTreeMap<K, Vec<K>>) -> Result<Vec<K>, Vec<K>> {
    let mut remaining: BTreeMap<&K, BTreeSet<&K>> = graph
        .iter()
        .map(|(node, deps)| (node, deps.iter().filter(|d| graph.contains_key(*d)).collect()))
        .collect();
    let mut order = Vec::with_capacity(graph.len());
    while !remaining.is_empty() {
        let ready: Vec<&K> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(node, _)| *node)
            .collect();
        if ready.is_empty() {
            return Err(remaining.keys().map(|k| (*k).clone()).collect());
        }
        for node in ready {
            remaining.remove(node);
            for deps in remaining.values_mut() {
                deps.remove(node);
            }
            order.push(node.clone());
        }
    }
    Ok(order)
}

fn collect_vars<'a>(expr: &'a serde_json::Value, names: &mut BTreeSet<&'a str>) {
    match expr {
        serde_json::Value::Object(map) => {
            if let (1, Some(serde_json::Value::String(name))) = (map.len(), map.get("$var")) {
                names.insert(name);
                return;
            }
            for item in map.values() {
                collect_vars(item, names);
            }
        },
        serde_json::Value::Array(items) => {
            for item in items {
                collect_vars(item, names);
            }
        },
        _ => {},
    }
}

/// Evaluate an expression against input variable values.
pub fn evaluate(expr: &serde_json::Value, vars: &BTreeMap<String, Value>) -> Result<Value, Diagnostic> {
    match expr {
        serde_json::Value::Object(map) if map.len() == 1 && map.contains_key("$var") => {
            let name = map
                .get("$var")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| Diagnostic::error("Invalid variable reference"))?;
            vars.get(name).cloned().ok_or_else(|| {
                Diagnostic::error("Reference to undeclared input variable")
                    .with_detail(format!("An input variable named \"{}\" is not declared.", name))
            })
        },
        serde_json::Value::Object(map) if map.len() == 1 && map.contains_key("$unknown") => Ok(Value::Unknown),
        serde_json::Value::Object(map) => Ok(Value::Object(
            map.iter()
                .map(|(k, v)| Ok((k.clone(), evaluate(v, vars)?)))
                .collect::<Result<_, Diagnostic>>()?,
        )),
        serde_json::Value::Array(items) => Ok(Value::List(
            items
                .iter()
                .map(|item| evaluate(item, vars))
                .collect::<Result<_, _>>()?,
        )),
        scalar => Ok(Value::from_json(scalar)),
    }
}

/// Evaluate a component's instance set.
pub fn evaluate_instances(
    expr: Option<&serde_json::Value>,
    vars: &BTreeMap<String, Value>,
) -> Result<Instances, Diagnostic> {
    let Some(expr) = expr else {
        return Ok(Instances::Known(vec![InstanceKey::None]));
    };
    let invalid = || {
        Diagnostic::error("Invalid component instances")
            .with_detail("Instances must be a list of strings or a whole number.")
    };
    match evaluate(expr, vars)? {
        Value::Unknown => Ok(Instances::Unknown),
        Value::Null => Ok(Instances::Known(vec![InstanceKey::None])),
        Value::Number(n) => {
            let count = n.as_u64().ok_or_else(invalid)?;
            Ok(Instances::Known((0..count as i64).map(InstanceKey::Int).collect()))
        },
        Value::List(items) | Value::Set(items) => {
            if items.iter().any(|item| matches!(item, Value::Unknown)) {
                return Ok(Instances::Unknown);
            }
            let keys: BTreeSet<InstanceKey> = items
                .iter()
                .map(|item| item.as_str().map(|s| InstanceKey::Str(s.to_string())).ok_or_else(invalid))
                .collect::<Result<_, _>>()?;
            Ok(Instances::Known(keys.into_iter().collect()))
        },
        _ => Err(invalid()),
    }
}

/// A locked provider version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedProvider {
    /// Selected version.
    pub version: String,
    /// Package checksums.
    #[serde(default)]
    pub hashes: Vec<String>,
}

/// Provider versions selected for a stack.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyLocks {
    /// Locks by provider address.
    #[serde(default)]
    pub providers: BTreeMap<ProviderAddr, LockedProvider>,
}

impl DependencyLocks {
    /// Parse a lock document.
    pub fn parse(source: &str) -> Result<Self, EngineError> {
        Ok(serde_json::from_str(source)?)
    }

    /// Lock a provider.
    pub fn with_provider(mut self, addr: ProviderAddr, version: impl Into<String>) -> Self {
        self.providers.insert(
            addr,
            LockedProvider {
                version: version.into(),
                hashes: Vec::new(),
            },
        );
        self
    }

    /// Error for every provider `config` uses that is not locked.
    pub fn check(&self, config: &StackConfig) -> Diagnostics {
        config
            .provider_addrs()
            .into_iter()
            .filter(|addr| !self.providers.contains_key(addr))
            .map(|addr| {
                Diagnostic::error("Provider not locked").with_detail(format!(
                    "The provider {} is used by the configuration but has no entry in the dependency locks.",
                    addr
                ))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::{assert_err, assert_ok};

    fn config(doc: serde_json::Value) -> StackConfig {
        assert_ok!(serde_json::from_value(doc))
    }

    #[test]
    fn test_parse_and_validate() {
        let c = config(json!({
            "variables": { "name": { "default": "a" } },
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "resources": {
                        "fake_thing.a": { "provider": "fake", "config": { "name": { "$var": "name" } } },
                        "fake_thing.b": { "provider": "fake", "depends_on": ["fake_thing.a"] }
                    }
                }
            }
        }));
        assert!(c.validate().is_empty());
        assert_eq!(
            assert_ok!(c.resource_order("web")),
            vec![ResourceAddr::managed("fake_thing", "a"), ResourceAddr::managed("fake_thing", "b")]
        );
    }

    #[test]
    fn test_validate_reports_bad_references() {
        let c = config(json!({
            "components": {
                "web": {
                    "depends_on": ["db"],
                    "resources": {
                        "fake_thing.a": { "provider": "nope", "config": { "x": { "$var": "missing" } } }
                    }
                }
            }
        }));
        let diags = c.validate();
        assert_eq!(diags.errors().count(), 3);
    }

    #[test]
    fn test_resource_cycle() {
        let c = config(json!({
            "providers": { "fake": { "source": "hemmer/fake" } },
            "components": {
                "web": {
                    "resources": {
                        "fake_thing.a": { "provider": "fake", "depends_on": ["fake_thing.b"] },
                        "fake_thing.b": { "provider": "fake", "depends_on": ["fake_thing.a"] }
                    }
                }
            }
        }));
        let diag = assert_err!(c.resource_order("web"));
        assert_eq!(diag.summary, "Dependency cycle");
    }

    #[test]
    fn test_unknown_fields_rejected() {
        assert_err!(StackConfig::parse(r#"{"compnents": {}}"#));
    }

    #[test]
    fn test_evaluate() {
        let vars = BTreeMap::from([("n".to_string(), Value::string("x"))]);
        let value = assert_ok!(evaluate(
            &json!({ "a": { "$var": "n" }, "b": [1, { "$unknown": true }] }),
            &vars
        ));
        assert_eq!(
            value,
            Value::object([
                ("a", Value::string("x")),
                ("b", Value::List(vec![Value::int(1), Value::Unknown])),
            ])
        );
        assert_err!(evaluate(&json!({ "$var": "other" }), &vars));
    }

    #[test]
    fn test_evaluate_instances() {
        let vars = BTreeMap::from([("keys".to_string(), Value::Unknown)]);
        assert_eq!(
            assert_ok!(evaluate_instances(None, &vars)),
            Instances::Known(vec![InstanceKey::None])
        );
        assert_eq!(
            assert_ok!(evaluate_instances(Some(&json!(2)), &vars)),
            Instances::Known(vec![InstanceKey::Int(0), InstanceKey::Int(1)])
        );
        assert_eq!(
            assert_ok!(evaluate_instances(Some(&json!(["b", "a", "b"])), &vars)),
            Instances::Known(vec![InstanceKey::Str("a".into()), InstanceKey::Str("b".into())])
        );
        assert_eq!(
            assert_ok!(evaluate_instances(Some(&json!({ "$var": "keys" })), &vars)),
            Instances::Unknown
        );
        assert_err!(evaluate_instances(Some(&json!(true)), &vars));
    }

    #[test]
    fn test_dependency_locks() {
        let c = config(json!({
            "providers": { "fake": { "source": "hemmer/fake" } }
        }));
        assert!(DependencyLocks::default().check(&c).has_errors());
        let locks = DependencyLocks::default().with_provider(ProviderAddr::new("hemmer", "fake"), "1.0.0");
        assert!(locks.check(&c).is_empty());
    }

    #[tokio::test]
    async fn test_memory_bundle_load() {
        let bundle = MemoryBundle::new().with_source("main.json", r#"{"components": {}}"#);
        let (config, diags) = StackConfig::load(&bundle, "main.json").await;
        assert!(config.is_some());
        assert!(diags.is_empty());
        let (config, diags) = StackConfig::load(&bundle, "missing.json").await;
        assert!(config.is_none());
        assert!(diags.has_errors());
    }

    #[tokio::test]
    async fn test_directory_bundle_rejects_escape() {
        let bundle = DirectoryBundle::new("/tmp");
        assert_err!(bundle.read_source("../etc/passwd").await);
    }
}
