//! Keyed patches against raw state and descriptions, and their fold.

use super::describe::Described;
use super::state::RawState;
use crate::error::EngineError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Insert, replace, or delete one raw state entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPatch {
    /// Entry key.
    pub key: String,
    /// New bytes, or `None` to delete.
    pub value: Option<Vec<u8>>,
}

impl RawPatch {
    /// Insert or replace.
    pub fn put(key: impl ToString, value: Vec<u8>) -> Self {
        Self {
            key: key.to_string(),
            value: Some(value),
        }
    }

    /// Delete.
    pub fn delete(key: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: None,
        }
    }
}

/// What a description patch does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum DescriptionOp {
    /// Insert or replace the description.
    Put {
        /// The description JSON.
        description: serde_json::Value,
    },
    /// Remove the description.
    Delete,
    /// The object now lives under `new_key`; the old key is gone.
    Moved {
        /// The new key.
        new_key: String,
    },
}

/// One patch against the description map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionPatch {
    /// Description key.
    pub key: String,
    /// The operation.
    #[serde(flatten)]
    pub op: DescriptionOp,
}

impl DescriptionPatch {
    /// Put a typed description.
    pub fn put<T: Serialize + DeserializeOwned>(
        key: impl ToString,
        description: &Described<T>,
    ) -> Result<Self, EngineError> {
        Ok(Self {
            key: key.to_string(),
            op: DescriptionOp::Put {
                description: description.to_json()?,
            },
        })
    }

    /// Delete a description.
    pub fn delete(key: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            op: DescriptionOp::Delete,
        }
    }

    /// Mark a description moved.
    pub fn moved(key: impl ToString, new_key: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            op: DescriptionOp::Moved {
                new_key: new_key.to_string(),
            },
        }
    }

    /// Decode the put description, if this is a put.
    pub fn described<T: Serialize + DeserializeOwned>(&self) -> Option<Described<T>> {
        match &self.op {
            DescriptionOp::Put { description } => Described::from_json(description.clone()).ok(),
            _ => None,
        }
    }
}

/// The two maps a caller maintains by folding applied changes in order.
///
/// Folding is last-write-wins per key, so replaying the same patch sequence
/// onto the same starting maps always yields the same result.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateFold {
    raw: RawState,
    descriptions: BTreeMap<String, serde_json::Value>,
}

impl StateFold {
    /// Start from empty maps.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from existing raw state.
    pub fn from_raw(raw: RawState) -> Self {
        Self {
            raw,
            descriptions: BTreeMap::new(),
        }
    }

    /// Apply raw patches in order.
    pub fn apply_raw<'a>(&mut self, patches: impl IntoIterator<Item = &'a RawPatch>) {
        for patch in patches {
            match &patch.value {
                Some(value) => {
                    self.raw.insert(patch.key.clone(), value.clone());
                },
                None => {
                    self.raw.remove(&patch.key);
                },
            }
        }
    }

    /// Apply description patches in order.
    pub fn apply_descriptions<'a>(&mut self, patches: impl IntoIterator<Item = &'a DescriptionPatch>) {
        for patch in patches {
            match &patch.op {
                DescriptionOp::Put { description } => {
                    self.descriptions.insert(patch.key.clone(), description.clone());
                },
                DescriptionOp::Delete => {
                    self.descriptions.remove(&patch.key);
                },
                DescriptionOp::Moved { new_key } => {
                    if let Some(description) = self.descriptions.remove(&patch.key) {
                        self.descriptions.entry(new_key.clone()).or_insert(description);
                    }
                },
            }
        }
    }

    /// The raw state so far.
    pub fn raw(&self) -> &RawState {
        &self.raw
    }

    /// The descriptions so far.
    pub fn descriptions(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.descriptions
    }

    /// Take the raw state.
    pub fn into_raw(self) -> RawState {
        self.raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn patches() -> (Vec<RawPatch>, Vec<DescriptionPatch>) {
        let put = |key: &str, v: serde_json::Value| DescriptionPatch {
            key: key.to_string(),
            op: DescriptionOp::Put { description: v },
        };
        (
            vec![
                RawPatch::put("a", vec![1]),
                RawPatch::put("b", vec![2]),
                RawPatch::put("a", vec![3]),
                RawPatch::delete("b"),
                RawPatch::delete("missing"),
            ],
            vec![
                put("x", json!({ "n": 1 })),
                put("y", json!({ "n": 2 })),
                DescriptionPatch::moved("x", "z"),
                DescriptionPatch::delete("y"),
            ],
        )
    }

    #[test]
    fn test_fold() {
        let (raw, descriptions) = patches();
        let mut fold = StateFold::new();
        fold.apply_raw(&raw);
        fold.apply_descriptions(&descriptions);
        assert_eq!(fold.raw().len(), 1);
        assert_eq!(fold.raw()["a"], vec![3]);
        assert_eq!(fold.descriptions().len(), 1);
        assert_eq!(fold.descriptions()["z"], json!({ "n": 1 }));
    }

    #[test]
    fn test_fold_replay_is_idempotent() {
        let (raw, descriptions) = patches();
        let mut once = StateFold::new();
        once.apply_raw(&raw);
        once.apply_descriptions(&descriptions);

        let mut twice = once.clone();
        twice.apply_raw(&raw);
        twice.apply_descriptions(&descriptions);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_patch_json_shape() {
        let patch = DescriptionPatch::moved("old", "new");
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!({ "key": "old", "op": "moved", "new_key": "new" })
        );
    }
}
