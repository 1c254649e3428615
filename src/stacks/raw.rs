//! Engine-internal records for raw state entries and plan fragments.
//!
//! Callers store these bytes verbatim and never interpret them. Values inside
//! state entries are JSON so older schema versions can be handed to a
//! provider's upgrade call; planned values are MessagePack because they may
//! contain unknowns.

use crate::error::EngineError;
use prost::Message;

/// A stored resource instance object.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StateResourceInstanceObject {
    #[prost(string, tag = "1")]
    pub provider_addr: ::prost::alloc::string::String,
    #[prost(uint64, tag = "2")]
    pub schema_version: u64,
    #[prost(bytes = "vec", tag = "3")]
    pub value_json: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "4")]
    pub private: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "5")]
    pub identity_json: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "6")]
    pub identity_schema_version: u64,
    #[prost(string, repeated, tag = "7")]
    pub dependencies: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(bool, tag = "8")]
    pub create_before_destroy: bool,
    #[prost(string, tag = "9")]
    pub provider_config: ::prost::alloc::string::String,
}

/// A stored component instance.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StateComponentInstance {
    #[prost(string, repeated, tag = "1")]
    pub depends_on: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
}

/// A stored output value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StateOutputValue {
    #[prost(bytes = "vec", tag = "1")]
    pub value_json: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "2")]
    pub sensitive: bool,
}

/// A stored input variable.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct StateInputVariable {
    #[prost(bytes = "vec", tag = "1")]
    pub value_json: ::prost::alloc::vec::Vec<u8>,
}

/// One raw plan fragment.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanFragment {
    #[prost(oneof = "plan_fragment::Kind", tags = "1, 2, 3, 4, 5, 6")]
    pub kind: ::core::option::Option<plan_fragment::Kind>,
}

/// Nested message and enum types in `PlanFragment`.
pub mod plan_fragment {
    #[derive(Clone, PartialEq, ::prost::Oneof)]
    pub enum Kind {
        #[prost(message, tag = "1")]
        Header(super::PlanHeader),
        #[prost(message, tag = "2")]
        ResourceInstance(super::PlannedResourceInstance),
        #[prost(message, tag = "3")]
        ComponentInstance(super::PlannedComponentInstance),
        #[prost(message, tag = "4")]
        OutputValue(super::PlannedOutputValue),
        #[prost(message, tag = "5")]
        InputVariable(super::PlannedInputVariable),
        #[prost(message, tag = "6")]
        Applyable(super::PlanApplyable),
    }
}

/// First fragment of every plan.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanHeader {
    #[prost(string, tag = "1")]
    pub engine_version: ::prost::alloc::string::String,
    #[prost(enumeration = "PlanMode", tag = "2")]
    pub mode: i32,
    #[prost(message, optional, tag = "3")]
    pub created_at: ::core::option::Option<::prost_types::Timestamp>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum PlanMode {
    Normal = 0,
    RefreshOnly = 1,
    Destroy = 2,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, ::prost::Enumeration)]
#[repr(i32)]
pub enum Action {
    NoOp = 0,
    Read = 1,
    Create = 2,
    Update = 3,
    Delete = 4,
    Forget = 5,
    DeleteThenCreate = 6,
    CreateThenDelete = 7,
}

/// A lifecycle action attached to a planned resource change.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlannedAction {
    #[prost(string, tag = "1")]
    pub action_type: ::prost::alloc::string::String,
    #[prost(bool, tag = "2")]
    pub before: bool,
    #[prost(bool, tag = "3")]
    pub linked: bool,
}

/// A planned change to one resource instance object.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlannedResourceInstance {
    #[prost(string, tag = "1")]
    pub addr: ::prost::alloc::string::String,
    #[prost(string, tag = "2")]
    pub provider_addr: ::prost::alloc::string::String,
    #[prost(string, tag = "3")]
    pub provider_config: ::prost::alloc::string::String,
    #[prost(enumeration = "Action", tag = "4")]
    pub action: i32,
    #[prost(bytes = "vec", tag = "5")]
    pub prior: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "6")]
    pub planned: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "7")]
    pub prior_private: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "8")]
    pub planned_private: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "9")]
    pub prior_identity: ::prost::alloc::vec::Vec<u8>,
    #[prost(bytes = "vec", tag = "10")]
    pub planned_identity: ::prost::alloc::vec::Vec<u8>,
    #[prost(uint64, tag = "11")]
    pub schema_version: u64,
    #[prost(string, repeated, tag = "12")]
    pub dependencies: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(string, tag = "13")]
    pub moved_from: ::prost::alloc::string::String,
    #[prost(bool, tag = "14")]
    pub importing: bool,
    #[prost(bool, tag = "15")]
    pub create_before_destroy: bool,
    #[prost(string, tag = "16")]
    pub deferred_reason: ::prost::alloc::string::String,
    #[prost(message, repeated, tag = "17")]
    pub actions: ::prost::alloc::vec::Vec<PlannedAction>,
    #[prost(uint64, tag = "18")]
    pub identity_schema_version: u64,
}

/// A planned change to one component instance.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlannedComponentInstance {
    #[prost(string, tag = "1")]
    pub addr: ::prost::alloc::string::String,
    #[prost(enumeration = "Action", tag = "2")]
    pub action: i32,
    #[prost(string, repeated, tag = "3")]
    pub depends_on: ::prost::alloc::vec::Vec<::prost::alloc::string::String>,
    #[prost(bool, tag = "4")]
    pub plan_complete: bool,
}

/// A planned output value. The value is MessagePack of a dynamic type.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlannedOutputValue {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(enumeration = "Action", tag = "2")]
    pub action: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub value: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "4")]
    pub sensitive: bool,
}

/// A planned input variable. Ephemeral variables carry no value.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlannedInputVariable {
    #[prost(string, tag = "1")]
    pub name: ::prost::alloc::string::String,
    #[prost(enumeration = "Action", tag = "2")]
    pub action: i32,
    #[prost(bytes = "vec", tag = "3")]
    pub value: ::prost::alloc::vec::Vec<u8>,
    #[prost(bool, tag = "4")]
    pub ephemeral: bool,
}

/// Last fragment of every plan.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct PlanApplyable {
    #[prost(bool, tag = "1")]
    pub applyable: bool,
}

impl PlanFragment {
    /// Wrap a fragment kind.
    pub fn new(kind: plan_fragment::Kind) -> Self {
        Self { kind: Some(kind) }
    }

    /// Decode one fragment. Fragments without a recognizable kind are
    /// rejected rather than skipped, since dropping one would corrupt the plan.
    pub fn decode_fragment(bytes: &[u8]) -> Result<plan_fragment::Kind, EngineError> {
        Self::decode(bytes)?
            .kind
            .ok_or_else(|| EngineError::InvalidPlan("plan fragment of unknown kind".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    #[test]
    fn test_fragment_roundtrip() {
        let fragment = PlanFragment::new(plan_fragment::Kind::Applyable(PlanApplyable { applyable: true }));
        let bytes = fragment.encode_to_vec();
        let kind = assert_ok!(PlanFragment::decode_fragment(&bytes));
        assert_eq!(kind, plan_fragment::Kind::Applyable(PlanApplyable { applyable: true }));
    }

    #[test]
    fn test_empty_fragment_rejected() {
        let err = assert_err!(PlanFragment::decode_fragment(&[]));
        assert!(matches!(err, EngineError::InvalidPlan(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert_err!(PlanFragment::decode_fragment(&[0xff, 0xff, 0xff]));
    }
}
