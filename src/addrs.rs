//! Addresses of providers, component instances, and resource instances.
//!
//! Every address type is totally ordered so that plan and state output is
//! deterministic, and round-trips through its string form.

use crate::error::EngineError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

/// Hostname assumed when a provider source omits one.
pub const DEFAULT_PROVIDER_HOST: &str = "registry.hemmer.io";

macro_rules! string_serde {
    ($ty:ty) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

fn invalid(kind: &str, input: &str, why: &str) -> EngineError {
    EngineError::Configuration(format!("invalid {} address \"{}\": {}", kind, input, why))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Fully-qualified provider source address, e.g. `registry.hemmer.io/hemmer/docker`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProviderAddr {
    /// Registry hostname.
    pub hostname: String,
    /// Publishing namespace.
    pub namespace: String,
    /// Provider type name.
    pub type_name: String,
}

impl ProviderAddr {
    /// Create a provider address on the default registry.
    pub fn new(namespace: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            hostname: DEFAULT_PROVIDER_HOST.to_string(),
            namespace: namespace.into(),
            type_name: type_name.into(),
        }
    }
}

impl fmt::Display for ProviderAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.hostname, self.namespace, self.type_name)
    }
}

impl FromStr for ProviderAddr {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('/').collect();
        let (hostname, namespace, type_name) = match parts.as_slice() {
            [host, ns, ty] => (*host, *ns, *ty),
            [ns, ty] => (DEFAULT_PROVIDER_HOST, *ns, *ty),
            _ => return Err(invalid("provider", s, "expected [hostname/]namespace/type")),
        };
        if hostname.is_empty() || !is_identifier(namespace) || !is_identifier(type_name) {
            return Err(invalid("provider", s, "empty or malformed segment"));
        }
        Ok(Self {
            hostname: hostname.to_string(),
            namespace: namespace.to_string(),
            type_name: type_name.to_string(),
        })
    }
}

string_serde!(ProviderAddr);

/// The instance key of a multi-instance object.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum InstanceKey {
    /// Single-instance object.
    #[default]
    None,
    /// Counted instance.
    Int(i64),
    /// Keyed instance.
    Str(String),
    /// Stands for every instance of an object whose instance set is not yet known.
    Wildcard,
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Int(i) => write!(f, "[{}]", i),
            Self::Str(s) => write!(f, "[{:?}]", s),
            Self::Wildcard => f.write_str("[*]"),
        }
    }
}

/// A small cursor over an address string.
struct Cursor<'a> {
    input: &'a str,
    rest: &'a str,
    kind: &'static str,
}

impl<'a> Cursor<'a> {
    fn new(input: &'a str, kind: &'static str) -> Self {
        Self {
            input,
            rest: input,
            kind,
        }
    }

    fn err(&self, why: &str) -> EngineError {
        invalid(self.kind, self.input, why)
    }

    fn ident(&mut self) -> Result<&'a str, EngineError> {
        let end = self
            .rest
            .find(|c: char| c == '.' || c == '[')
            .unwrap_or(self.rest.len());
        let (ident, rest) = self.rest.split_at(end);
        if !is_identifier(ident) {
            return Err(self.err("expected a name"));
        }
        self.rest = rest;
        Ok(ident)
    }

    fn dot(&mut self) -> Result<(), EngineError> {
        self.rest = self
            .rest
            .strip_prefix('.')
            .ok_or_else(|| self.err("expected '.'"))?;
        Ok(())
    }

    fn peek_keyword(&self, keyword: &str) -> bool {
        self.rest
            .strip_prefix(keyword)
            .is_some_and(|r| r.starts_with('.'))
    }

    fn key(&mut self) -> Result<InstanceKey, EngineError> {
        let Some(rest) = self.rest.strip_prefix('[') else {
            return Ok(InstanceKey::None);
        };
        let end = if rest.starts_with('"') {
            // quoted keys may contain ']'
            let close = rest[1..]
                .find('"')
                .ok_or_else(|| self.err("unterminated key"))?;
            close + 2
        } else {
            rest.find(']').ok_or_else(|| self.err("unterminated key"))?
        };
        let (raw, after) = rest.split_at(end);
        self.rest = after
            .strip_prefix(']')
            .ok_or_else(|| self.err("expected ']'"))?;
        if raw == "*" {
            return Ok(InstanceKey::Wildcard);
        }
        if let Some(quoted) = raw.strip_prefix('"').and_then(|r| r.strip_suffix('"')) {
            return Ok(InstanceKey::Str(quoted.to_string()));
        }
        raw.parse::<i64>()
            .map(InstanceKey::Int)
            .map_err(|_| self.err("instance key must be an integer or quoted string"))
    }

    fn finish(&self) -> Result<(), EngineError> {
        if self.rest.is_empty() {
            Ok(())
        } else {
            Err(self.err("unexpected trailing characters"))
        }
    }
}

/// A component instance, e.g. `component.web["eu"]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ComponentInstanceAddr {
    /// Component name.
    pub component: String,
    /// Instance key.
    pub key: InstanceKey,
}

impl ComponentInstanceAddr {
    /// A single-instance component.
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
            key: InstanceKey::None,
        }
    }

    /// A keyed instance of a component.
    pub fn with_key(component: impl Into<String>, key: InstanceKey) -> Self {
        Self {
            component: component.into(),
            key,
        }
    }

    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, EngineError> {
        if cursor.ident()? != "component" {
            return Err(cursor.err("expected 'component.'"));
        }
        cursor.dot()?;
        let component = cursor.ident()?.to_string();
        let key = cursor.key()?;
        Ok(Self { component, key })
    }
}

impl fmt::Display for ComponentInstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "component.{}{}", self.component, self.key)
    }
}

impl FromStr for ComponentInstanceAddr {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cursor = Cursor::new(s, "component");
        let addr = Self::parse(&mut cursor)?;
        cursor.finish()?;
        Ok(addr)
    }
}

string_serde!(ComponentInstanceAddr);

/// Whether a resource is managed or a data source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceMode {
    /// Created, updated and destroyed by the engine.
    #[default]
    Managed,
    /// Read only.
    Data,
}

/// A resource within a component, e.g. `docker_container.web`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceAddr {
    /// Managed or data.
    pub mode: ResourceMode,
    /// Resource type name.
    pub type_name: String,
    /// Resource name.
    pub name: String,
}

impl ResourceAddr {
    /// A managed resource address.
    pub fn managed(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: ResourceMode::Managed,
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// A data resource address.
    pub fn data(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            mode: ResourceMode::Data,
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// The address of one instance of this resource.
    pub fn instance(&self, key: InstanceKey) -> ResourceInstanceAddr {
        ResourceInstanceAddr {
            resource: self.clone(),
            key,
        }
    }

    fn parse(cursor: &mut Cursor<'_>) -> Result<Self, EngineError> {
        let mode = if cursor.peek_keyword("data") {
            cursor.ident()?;
            cursor.dot()?;
            ResourceMode::Data
        } else {
            ResourceMode::Managed
        };
        let type_name = cursor.ident()?.to_string();
        cursor.dot()?;
        let name = cursor.ident()?.to_string();
        Ok(Self {
            mode,
            type_name,
            name,
        })
    }
}

impl fmt::Display for ResourceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.mode == ResourceMode::Data {
            f.write_str("data.")?;
        }
        write!(f, "{}.{}", self.type_name, self.name)
    }
}

impl FromStr for ResourceAddr {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cursor = Cursor::new(s, "resource");
        let addr = Self::parse(&mut cursor)?;
        cursor.finish()?;
        Ok(addr)
    }
}

string_serde!(ResourceAddr);

/// One instance of a resource within a component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceInstanceAddr {
    /// The resource.
    pub resource: ResourceAddr,
    /// Instance key.
    pub key: InstanceKey,
}

impl fmt::Display for ResourceInstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.resource, self.key)
    }
}

impl FromStr for ResourceInstanceAddr {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cursor = Cursor::new(s, "resource instance");
        let resource = ResourceAddr::parse(&mut cursor)?;
        let key = cursor.key()?;
        cursor.finish()?;
        Ok(Self { resource, key })
    }
}

string_serde!(ResourceInstanceAddr);

/// A resource instance in a specific component instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbsResourceInstanceAddr {
    /// The owning component instance.
    pub component: ComponentInstanceAddr,
    /// The resource instance within it.
    pub resource: ResourceInstanceAddr,
}

impl AbsResourceInstanceAddr {
    /// Combine a component instance and resource instance.
    pub fn new(component: ComponentInstanceAddr, resource: ResourceInstanceAddr) -> Self {
        Self {
            component,
            resource,
        }
    }

    /// The current object of this instance.
    pub fn current(&self) -> ResourceInstanceObjectAddr {
        ResourceInstanceObjectAddr {
            instance: self.clone(),
            deposed: None,
        }
    }
}

impl fmt::Display for AbsResourceInstanceAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.component, self.resource)
    }
}

impl FromStr for AbsResourceInstanceAddr {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut cursor = Cursor::new(s, "resource instance");
        let component = ComponentInstanceAddr::parse(&mut cursor)?;
        cursor.dot()?;
        let resource = ResourceAddr::parse(&mut cursor)?;
        let key = cursor.key()?;
        cursor.finish()?;
        Ok(Self {
            component,
            resource: ResourceInstanceAddr { resource, key },
        })
    }
}

string_serde!(AbsResourceInstanceAddr);

/// Identifies a deposed object kept alive to finish a create-before-destroy
/// replacement.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeposedKey(String);

static DEPOSED_COUNTER: AtomicU64 = AtomicU64::new(1);

impl DeposedKey {
    /// Issue a new key, unique within this process.
    pub fn generate() -> Self {
        let n = DEPOSED_COUNTER.fetch_add(1, Ordering::Relaxed);
        Self(format!("{:08x}", n))
    }

    /// Wrap an existing key.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeposedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A current or deposed object of a resource instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceInstanceObjectAddr {
    /// The resource instance.
    pub instance: AbsResourceInstanceAddr,
    /// Set for deposed objects.
    pub deposed: Option<DeposedKey>,
}

impl ResourceInstanceObjectAddr {
    /// A deposed object of an instance.
    pub fn deposed(instance: AbsResourceInstanceAddr, key: DeposedKey) -> Self {
        Self {
            instance,
            deposed: Some(key),
        }
    }
}

impl fmt::Display for ResourceInstanceObjectAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.deposed {
            Some(key) => write!(f, "{}/{}", self.instance, key),
            None => write!(f, "{}", self.instance),
        }
    }
}

impl FromStr for ResourceInstanceObjectAddr {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.rsplit_once('/') {
            Some((instance, key)) if !key.contains(']') && !key.contains('"') => Ok(Self {
                instance: instance.parse()?,
                deposed: Some(DeposedKey::new(key)),
            }),
            _ => Ok(Self {
                instance: s.parse()?,
                deposed: None,
            }),
        }
    }
}

string_serde!(ResourceInstanceObjectAddr);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_addr_parse() {
        let addr: ProviderAddr = "hemmer/docker".parse().unwrap();
        assert_eq!(addr.to_string(), "registry.hemmer.io/hemmer/docker");
        let addr: ProviderAddr = "example.com/acme/cloud".parse().unwrap();
        assert_eq!(addr.hostname, "example.com");
        assert!("docker".parse::<ProviderAddr>().is_err());
    }

    #[test]
    fn test_resource_instance_roundtrip() {
        for text in [
            "component.web.docker_container.app",
            "component.web[0].docker_container.app[2]",
            "component.web[\"eu.west\"].data.docker_image.base[\"x\"]",
            "component.web[*].docker_container.app",
        ] {
            let addr: AbsResourceInstanceAddr = text.parse().unwrap();
            assert_eq!(addr.to_string(), text);
        }
        let addr: AbsResourceInstanceAddr = "component.web.data.docker_image.base".parse().unwrap();
        assert_eq!(addr.resource.resource.mode, ResourceMode::Data);
        assert!("component.web".parse::<AbsResourceInstanceAddr>().is_err());
        assert!("web.docker_container.app".parse::<AbsResourceInstanceAddr>().is_err());
    }

    #[test]
    fn test_addresses_totally_ordered() {
        let mut addrs: Vec<AbsResourceInstanceAddr> = [
            "component.b.t.x",
            "component.a.t.y[1]",
            "component.a.t.y[0]",
            "component.a.t.y",
        ]
        .iter()
        .map(|s| s.parse().unwrap())
        .collect();
        addrs.sort();
        let sorted: Vec<String> = addrs.iter().map(ToString::to_string).collect();
        assert_eq!(
            sorted,
            vec![
                "component.a.t.y",
                "component.a.t.y[0]",
                "component.a.t.y[1]",
                "component.b.t.x"
            ]
        );
    }

    #[test]
    fn test_deposed_object_addr() {
        let instance: AbsResourceInstanceAddr = "component.web.t.x".parse().unwrap();
        let key = DeposedKey::generate();
        let obj = ResourceInstanceObjectAddr::deposed(instance.clone(), key.clone());
        let parsed: ResourceInstanceObjectAddr = obj.to_string().parse().unwrap();
        assert_eq!(parsed, obj);
        assert!(instance.current() < obj);
        assert_ne!(DeposedKey::generate(), key);
    }

    #[test]
    fn test_serde_as_strings() {
        let addr: ComponentInstanceAddr = "component.web[1]".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"component.web[1]\"");
        let back: ComponentInstanceAddr = serde_json::from_str(&json).unwrap();
        assert_eq!(back, addr);
    }
}
