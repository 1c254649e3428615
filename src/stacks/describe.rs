//! Caller-facing change descriptions.
//!
//! Descriptions travel as JSON objects tagged by `kind`. A client decodes one
//! into [`Described`], which keeps every field it did not understand and
//! writes those fields back unchanged, so descriptions produced by a newer
//! engine survive a round trip through an older client.

use super::raw;
use crate::addrs::{ComponentInstanceAddr, ProviderAddr, ResourceInstanceObjectAddr};
use crate::error::EngineError;
use crate::provider::DeferredReason;
use crate::render::{render_value, RenderOptions};
use crate::value::{AttributePath, PathStep, Value};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// What a change does to its object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeAction {
    /// Nothing.
    NoOp,
    /// Read a data source during apply.
    Read,
    /// Create a new object.
    Create,
    /// Update in place.
    Update,
    /// Destroy the object.
    Delete,
    /// Stop managing the object without destroying it.
    Forget,
    /// Replace, destroying the old object first.
    DeleteThenCreate,
    /// Replace, creating the new object first.
    CreateThenDelete,
}

impl ChangeAction {
    /// Whether this is one of the replace actions.
    pub fn is_replace(self) -> bool {
        matches!(self, Self::DeleteThenCreate | Self::CreateThenDelete)
    }

    /// Whether this action ends with the object destroyed or forgotten.
    pub fn is_removal(self) -> bool {
        matches!(self, Self::Delete | Self::Forget)
    }
}

impl From<ChangeAction> for raw::Action {
    fn from(action: ChangeAction) -> Self {
        match action {
            ChangeAction::NoOp => Self::NoOp,
            ChangeAction::Read => Self::Read,
            ChangeAction::Create => Self::Create,
            ChangeAction::Update => Self::Update,
            ChangeAction::Delete => Self::Delete,
            ChangeAction::Forget => Self::Forget,
            ChangeAction::DeleteThenCreate => Self::DeleteThenCreate,
            ChangeAction::CreateThenDelete => Self::CreateThenDelete,
        }
    }
}

impl From<raw::Action> for ChangeAction {
    fn from(action: raw::Action) -> Self {
        match action {
            raw::Action::NoOp => Self::NoOp,
            raw::Action::Read => Self::Read,
            raw::Action::Create => Self::Create,
            raw::Action::Update => Self::Update,
            raw::Action::Delete => Self::Delete,
            raw::Action::Forget => Self::Forget,
            raw::Action::DeleteThenCreate => Self::DeleteThenCreate,
            raw::Action::CreateThenDelete => Self::CreateThenDelete,
        }
    }
}

/// A value prepared for description: unknown leaves are listed by path and
/// sensitive leaves are listed by path and blanked out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DescribedValue {
    /// The value with unknown and sensitive leaves as null.
    pub value: serde_json::Value,
    /// Paths that are unknown until apply.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub unknown: Vec<AttributePath>,
    /// Paths that are sensitive.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sensitive: Vec<AttributePath>,
}

impl DescribedValue {
    /// Describe `value`, hiding every path in `sensitive`.
    pub fn new(value: &Value, sensitive: Vec<AttributePath>) -> Self {
        let mut unknown = Vec::new();
        let mut json = value.to_json_lossy(&mut unknown);
        for path in &sensitive {
            blank(&mut json, path.steps());
        }
        unknown.retain(|path| !sensitive.iter().any(|s| path.starts_with(s)));
        Self {
            value: json,
            unknown,
            sensitive,
        }
    }

    /// Describe a value that is sensitive as a whole.
    pub fn sensitive(value: &Value) -> Self {
        if value.is_null() {
            return Self::new(value, Vec::new());
        }
        Self::new(value, vec![AttributePath::root()])
    }

    /// Whether the described value is null.
    pub fn is_null(&self) -> bool {
        self.value.is_null() && self.unknown.is_empty() && self.sensitive.is_empty()
    }

    /// Rebuild the value with its unknown leaves restored.
    pub fn to_value(&self) -> Value {
        restore(&self.value, &AttributePath::root(), &self.unknown, &[])
    }

    /// One-line human rendering with placeholders.
    pub fn render(&self) -> String {
        // Blanked sensitive leaves come back non-null so the renderer hides them.
        let value = restore(&self.value, &AttributePath::root(), &self.unknown, &self.sensitive);
        render_value(&value, &self.sensitive, RenderOptions::default())
    }
}

fn blank(json: &mut serde_json::Value, steps: &[PathStep]) {
    let Some((first, rest)) = steps.split_first() else {
        *json = serde_json::Value::Null;
        return;
    };
    let next = match (first, json) {
        (PathStep::Attr(name) | PathStep::Key(name), serde_json::Value::Object(map)) => map.get_mut(name),
        (PathStep::Index(i), serde_json::Value::Array(items)) => {
            usize::try_from(*i).ok().and_then(|i| items.get_mut(i))
        },
        _ => None,
    };
    if let Some(next) = next {
        blank(next, rest);
    }
}

fn restore(
    json: &serde_json::Value,
    path: &AttributePath,
    unknown: &[AttributePath],
    hidden: &[AttributePath],
) -> Value {
    if unknown.contains(path) || hidden.contains(path) {
        return Value::Unknown;
    }
    match json {
        serde_json::Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| {
                    let attr = path.clone().attr(k);
                    let key = path.clone().key(k);
                    let child = if unknown.contains(&key) || hidden.contains(&key) {
                        key
                    } else {
                        attr
                    };
                    (k.clone(), restore(v, &child, unknown, hidden))
                })
                .collect(),
        ),
        serde_json::Value::Array(items) => Value::List(
            items
                .iter()
                .enumerate()
                .map(|(i, v)| restore(v, &path.clone().index(i as i64), unknown, hidden))
                .collect(),
        ),
        scalar => Value::from_json(scalar),
    }
}

/// A planned change to a resource instance object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceInstanceChange {
    /// The object.
    pub addr: ResourceInstanceObjectAddr,
    /// Where the object was before a `moved` block renamed it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_addr: Option<ResourceInstanceObjectAddr>,
    /// Managing provider.
    pub provider: ProviderAddr,
    /// The change.
    pub action: ChangeAction,
    /// State before the change.
    pub before: DescribedValue,
    /// State after the change.
    pub after: DescribedValue,
    /// Attributes forcing replacement.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub replace_paths: Vec<AttributePath>,
    /// The object is being imported.
    #[serde(default)]
    pub importing: bool,
    /// State recorded by the last apply, before refresh.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_run_value: Option<DescribedValue>,
    /// Refresh found a change made outside this stack. A hint only.
    #[serde(default)]
    pub notable_change_outside: bool,
    /// Why the change was deferred, if it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deferred: Option<DeferredReason>,
    /// Lifecycle actions planned around the change.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<String>,
}

/// A planned change to a component instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentInstanceChange {
    /// The component instance.
    pub addr: ComponentInstanceAddr,
    /// The change.
    pub action: ChangeAction,
    /// Applying is expected to converge this instance. A hint only.
    pub plan_complete: bool,
}

/// A planned change to an output value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValueChange {
    /// Output name.
    pub name: String,
    /// The change.
    pub action: ChangeAction,
    /// Previous value.
    pub before: DescribedValue,
    /// New value.
    pub after: DescribedValue,
}

/// A planned change to an input variable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputVariableChange {
    /// Variable name.
    pub name: String,
    /// The change.
    pub action: ChangeAction,
    /// Previous value.
    pub before: DescribedValue,
    /// New value.
    pub after: DescribedValue,
}

/// Everything a plan describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlannedDescription {
    /// Resource instance object change.
    ResourceInstance(ResourceInstanceChange),
    /// Component instance change.
    ComponentInstance(ComponentInstanceChange),
    /// Output value change.
    OutputValue(OutputValueChange),
    /// Input variable change.
    InputVariable(InputVariableChange),
    /// Whether the plan may be applied.
    PlanApplyable {
        /// Applyable.
        applyable: bool,
    },
}

/// Everything applied state describes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppliedDescription {
    /// A resource instance object's new state.
    ResourceInstance {
        /// The object.
        addr: ResourceInstanceObjectAddr,
        /// Managing provider.
        provider: ProviderAddr,
        /// Resource schema version of `value`.
        schema_version: u64,
        /// The object's state.
        value: DescribedValue,
        /// Superseded later in the same apply.
        #[serde(default)]
        interim: bool,
    },
    /// A component instance that now exists.
    ComponentInstance {
        /// The component instance.
        addr: ComponentInstanceAddr,
        /// Its resource instance objects.
        resources: Vec<ResourceInstanceObjectAddr>,
    },
    /// An output value.
    OutputValue {
        /// Output name.
        name: String,
        /// Its value.
        value: DescribedValue,
    },
    /// An input variable.
    InputVariable {
        /// Variable name.
        name: String,
        /// Its value.
        value: DescribedValue,
    },
}

/// A decoded description plus the fields this version does not understand.
#[derive(Debug, Clone, PartialEq)]
pub struct Described<T> {
    /// The understood description, or `None` for an unknown kind.
    pub description: Option<T>,
    residue: serde_json::Map<String, serde_json::Value>,
}

impl<T: Serialize + DeserializeOwned> Described<T> {
    /// Wrap a description with no residue.
    pub fn new(description: T) -> Self {
        Self {
            description: Some(description),
            residue: serde_json::Map::new(),
        }
    }

    /// Decode a description object, keeping unrecognized fields.
    pub fn from_json(json: serde_json::Value) -> Result<Self, EngineError> {
        let serde_json::Value::Object(mut map) = json else {
            return Err(EngineError::Decode("description is not an object".to_string()));
        };
        let description = match T::deserialize(serde_json::Value::Object(map.clone())) {
            Ok(description) => description,
            Err(_) => {
                return Ok(Self {
                    description: None,
                    residue: map,
                })
            },
        };
        if let serde_json::Value::Object(known) = serde_json::to_value(&description)? {
            map.retain(|k, _| !known.contains_key(k));
        }
        Ok(Self {
            description: Some(description),
            residue: map,
        })
    }

    /// Encode, restoring unrecognized fields.
    pub fn to_json(&self) -> Result<serde_json::Value, EngineError> {
        let mut map = self.residue.clone();
        if let Some(description) = &self.description {
            match serde_json::to_value(description)? {
                serde_json::Value::Object(known) => map.extend(known),
                other => return Ok(other),
            }
        }
        Ok(serde_json::Value::Object(map))
    }

    /// Unrecognized fields.
    pub fn residue(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.residue
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio_test::assert_ok;

    #[test]
    fn test_described_value_hides_sensitive() {
        let value = Value::object([
            ("name", Value::string("a")),
            ("secret", Value::string("hunter2")),
            ("id", Value::Unknown),
        ]);
        let described = DescribedValue::new(&value, vec![AttributePath::root().attr("secret")]);
        assert_eq!(described.value, json!({ "name": "a", "secret": null, "id": null }));
        assert_eq!(described.unknown, vec![AttributePath::root().attr("id")]);

        let text = described.render();
        assert!(!text.contains("hunter2"));
        assert!(text.contains("(sensitive value)"));
        assert!(text.contains("(known after apply)"));
    }

    #[test]
    fn test_wholly_sensitive() {
        let described = DescribedValue::sensitive(&Value::string("token"));
        assert_eq!(described.value, serde_json::Value::Null);
        assert!(!described.is_null());
        assert_eq!(described.render(), "(sensitive value)");
    }

    #[test]
    fn test_residue_preserved() {
        let json = json!({
            "kind": "plan_applyable",
            "applyable": true,
            "reviewed_by": "policy-engine"
        });
        let described: Described<PlannedDescription> = assert_ok!(Described::from_json(json.clone()));
        assert_eq!(
            described.description,
            Some(PlannedDescription::PlanApplyable { applyable: true })
        );
        assert_eq!(described.residue().len(), 1);
        assert_eq!(assert_ok!(described.to_json()), json);
    }

    #[test]
    fn test_unknown_kind_preserved() {
        let json = json!({ "kind": "stack_call", "addr": "stack.inner" });
        let described: Described<PlannedDescription> = assert_ok!(Described::from_json(json.clone()));
        assert!(described.description.is_none());
        assert_eq!(assert_ok!(described.to_json()), json);
    }

    #[test]
    fn test_action_raw_mapping() {
        for action in [ChangeAction::NoOp, ChangeAction::Forget, ChangeAction::CreateThenDelete] {
            assert_eq!(ChangeAction::from(raw::Action::from(action)), action);
        }
        assert!(ChangeAction::DeleteThenCreate.is_replace());
        assert!(ChangeAction::Forget.is_removal());
    }
}
