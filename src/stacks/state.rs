//! Raw stack state and its decoded form.
//!
//! Raw state is a flat map from opaque keys to record bytes. The first four
//! characters of a key name the record kind; the rest is an address.

use super::raw::{StateComponentInstance, StateInputVariable, StateOutputValue, StateResourceInstanceObject};
use crate::addrs::{ComponentInstanceAddr, ProviderAddr, ResourceInstanceObjectAddr};
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::error::EngineError;
use prost::Message;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// The raw state map exchanged with callers.
pub type RawState = BTreeMap<String, Vec<u8>>;

const RESOURCE_PREFIX: &str = "RSRC";
const COMPONENT_PREFIX: &str = "CMPT";
const OUTPUT_PREFIX: &str = "OTPT";
const VARIABLE_PREFIX: &str = "VRBL";

/// A parsed raw state key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum StateKey {
    /// A resource instance object.
    Resource(ResourceInstanceObjectAddr),
    /// A component instance.
    Component(ComponentInstanceAddr),
    /// An output value.
    Output(String),
    /// An input variable.
    Variable(String),
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource(addr) => write!(f, "{}{}", RESOURCE_PREFIX, addr),
            Self::Component(addr) => write!(f, "{}{}", COMPONENT_PREFIX, addr),
            Self::Output(name) => write!(f, "{}{}", OUTPUT_PREFIX, name),
            Self::Variable(name) => write!(f, "{}{}", VARIABLE_PREFIX, name),
        }
    }
}

impl FromStr for StateKey {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, rest) = s
            .split_at_checked(4)
            .ok_or_else(|| EngineError::Configuration(format!("invalid state key \"{}\"", s)))?;
        match prefix {
            RESOURCE_PREFIX => Ok(Self::Resource(rest.parse()?)),
            COMPONENT_PREFIX => Ok(Self::Component(rest.parse()?)),
            OUTPUT_PREFIX => Ok(Self::Output(rest.to_string())),
            VARIABLE_PREFIX => Ok(Self::Variable(rest.to_string())),
            _ => Err(EngineError::Configuration(format!(
                "unrecognized state key \"{}\"",
                s
            ))),
        }
    }
}

/// A decoded resource instance object record.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredObject {
    /// The provider that manages the object.
    pub provider: ProviderAddr,
    /// Local name of the provider configuration used last.
    pub provider_config: String,
    /// The raw record.
    pub record: StateResourceInstanceObject,
}

/// The decoded form of a raw state map.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PriorState {
    /// Resource instance objects, current and deposed.
    pub resources: BTreeMap<ResourceInstanceObjectAddr, StoredObject>,
    /// Component instances with their recorded dependencies.
    pub components: BTreeMap<ComponentInstanceAddr, StateComponentInstance>,
    /// Output values as JSON.
    pub outputs: BTreeMap<String, StateOutputValue>,
    /// Input variables as JSON.
    pub variables: BTreeMap<String, serde_json::Value>,
}

impl PriorState {
    /// Decode every entry of `raw`.
    ///
    /// Entries with an unrecognized key are ignored with a warning so that
    /// state written by a newer engine can still be planned against. Entries
    /// that fail to decode are errors.
    pub fn load(raw: &RawState) -> (Self, Diagnostics) {
        let mut state = Self::default();
        let mut diags = Diagnostics::new();
        for (key, bytes) in raw {
            let parsed = match key.parse::<StateKey>() {
                Ok(parsed) => parsed,
                Err(err) => {
                    diags.push(
                        Diagnostic::warning("Ignoring unrecognized state entry").with_detail(err.message()),
                    );
                    continue;
                },
            };
            if let Err(err) = state.insert(parsed, bytes) {
                diags.push(
                    Diagnostic::error("Invalid state entry")
                        .with_detail(format!("Entry \"{}\": {}", key, err.message())),
                );
            }
        }
        (state, diags)
    }

    fn insert(&mut self, key: StateKey, bytes: &[u8]) -> Result<(), EngineError> {
        match key {
            StateKey::Resource(addr) => {
                let record = StateResourceInstanceObject::decode(bytes)?;
                let provider = record.provider_addr.parse()?;
                self.resources.insert(
                    addr,
                    StoredObject {
                        provider,
                        provider_config: record.provider_config.clone(),
                        record,
                    },
                );
            },
            StateKey::Component(addr) => {
                self.components.insert(addr, StateComponentInstance::decode(bytes)?);
            },
            StateKey::Output(name) => {
                self.outputs.insert(name, StateOutputValue::decode(bytes)?);
            },
            StateKey::Variable(name) => {
                let record = StateInputVariable::decode(bytes)?;
                self.variables.insert(name, serde_json::from_slice(&record.value_json)?);
            },
        }
        Ok(())
    }

    /// Objects that belong to `component`.
    pub fn component_objects<'a>(
        &'a self,
        component: &'a ComponentInstanceAddr,
    ) -> impl Iterator<Item = (&'a ResourceInstanceObjectAddr, &'a StoredObject)> + 'a {
        self.resources
            .iter()
            .filter(move |(addr, _)| &addr.instance.component == component)
    }

    /// Component instances that own objects or have a record of their own.
    pub fn component_instances(&self) -> Vec<ComponentInstanceAddr> {
        let mut all: Vec<ComponentInstanceAddr> = self
            .components
            .keys()
            .cloned()
            .chain(self.resources.keys().map(|addr| addr.instance.component.clone()))
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

/// Encode a state record for a raw patch.
pub fn encode_record<M: Message>(record: &M) -> Vec<u8> {
    record.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addrs::{AbsResourceInstanceAddr, DeposedKey};
    use tokio_test::{assert_err, assert_ok};

    fn object_addr() -> ResourceInstanceObjectAddr {
        assert_ok!("component.web.fake_thing.a".parse::<AbsResourceInstanceAddr>()).current()
    }

    #[test]
    fn test_key_roundtrip() {
        let keys = [
            StateKey::Resource(object_addr()),
            StateKey::Resource(ResourceInstanceObjectAddr::deposed(
                object_addr().instance,
                DeposedKey::new("0000000a"),
            )),
            StateKey::Component(ComponentInstanceAddr::new("web")),
            StateKey::Output("url".to_string()),
            StateKey::Variable("region".to_string()),
        ];
        for key in keys {
            assert_eq!(assert_ok!(key.to_string().parse::<StateKey>()), key);
        }
        assert_eq!(StateKey::Output("url".into()).to_string(), "OTPTurl");
        assert_err!("XYZ".parse::<StateKey>());
    }

    #[test]
    fn test_load() {
        let record = StateResourceInstanceObject {
            provider_addr: "hemmer/fake".to_string(),
            provider_config: "fake".to_string(),
            schema_version: 1,
            value_json: br#"{"name":"a"}"#.to_vec(),
            ..Default::default()
        };
        let raw: RawState = [
            (StateKey::Resource(object_addr()).to_string(), encode_record(&record)),
            (
                StateKey::Variable("region".into()).to_string(),
                encode_record(&StateInputVariable {
                    value_json: br#""eu""#.to_vec(),
                }),
            ),
            ("FUTRsomething".to_string(), vec![1, 2, 3]),
        ]
        .into_iter()
        .collect();

        let (state, diags) = PriorState::load(&raw);
        assert!(!diags.has_errors());
        assert!(diags.has_warnings());
        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.variables["region"], serde_json::json!("eu"));
        assert_eq!(
            state.component_instances(),
            vec![ComponentInstanceAddr::new("web")]
        );
    }

    #[test]
    fn test_load_corrupt_entry() {
        let raw: RawState = [(StateKey::Resource(object_addr()).to_string(), vec![0xff])]
            .into_iter()
            .collect();
        let (_, diags) = PriorState::load(&raw);
        assert!(diags.has_errors());
    }
}
