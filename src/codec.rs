//! Dynamic value codec.
//!
//! Values cross the provider boundary as MessagePack (canonical) or JSON
//! (legacy, accepted on read paths only). Both encodings are driven by the
//! schema type: objects always carry every declared attribute in sorted order,
//! and unknown leaves are MessagePack extension type 0. JSON cannot carry
//! unknowns.
//!
//! ```
//! use hemmer_stacks::codec;
//! use hemmer_stacks::schema::AttributeType;
//! use hemmer_stacks::Value;
//!
//! let ty = AttributeType::object([("attr", AttributeType::String)]);
//! let bytes = codec::encode(&Value::object([("attr", Value::string("bar"))]), &ty).unwrap();
//! assert_eq!(bytes, b"\x81\xa4attr\xa3bar");
//! ```

use crate::error::{EngineError, SchemaMismatchError};
use crate::generated as pb;
use crate::schema::{AttributeType, Block, NestingMode};
use crate::value::{AttributePath, Value};
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::ser::{self, Serialize, SerializeMap, SerializeSeq, Serializer};
use std::collections::BTreeMap;
use std::fmt;

const UNKNOWN_EXT_TYPE: i8 = 0;

/// Wire encoding of a [`DynamicValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    /// MessagePack, the canonical encoding.
    MsgPack,
    /// JSON, accepted from older providers.
    Json,
}

/// An encoded value as carried on the wire. Exactly one field is populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DynamicValue {
    /// MessagePack bytes.
    pub msgpack: Vec<u8>,
    /// JSON bytes.
    pub json: Vec<u8>,
}

impl DynamicValue {
    /// Wrap MessagePack bytes.
    pub fn msgpack(bytes: Vec<u8>) -> Self {
        Self {
            msgpack: bytes,
            json: Vec::new(),
        }
    }

    /// Wrap JSON bytes.
    pub fn json(bytes: Vec<u8>) -> Self {
        Self {
            msgpack: Vec::new(),
            json: bytes,
        }
    }

    /// Which encoding the sender chose, if any.
    pub fn format(&self) -> Option<Format> {
        if !self.msgpack.is_empty() {
            Some(Format::MsgPack)
        } else if !self.json.is_empty() {
            Some(Format::Json)
        } else {
            None
        }
    }

    /// Encode a value in the given format.
    pub fn encode(value: &Value, ty: &AttributeType, format: Format) -> Result<Self, EngineError> {
        Ok(match format {
            Format::MsgPack => Self::msgpack(encode(value, ty)?),
            Format::Json => Self::json(encode_json(value, ty)?),
        })
    }

    /// Decode against a type, using whichever encoding was sent.
    pub fn decode(&self, ty: &AttributeType) -> Result<Value, EngineError> {
        match self.format() {
            Some(Format::MsgPack) => decode(&self.msgpack, ty),
            Some(Format::Json) => decode_json(&self.json, ty),
            None => Ok(Value::Null),
        }
    }

    /// Decode an object against a block, normalizing empty optional strings.
    pub fn decode_object(&self, block: &Block) -> Result<Value, EngineError> {
        let value = self.decode(&block.implied_type())?;
        Ok(normalize_empty_strings(value, block))
    }
}

impl From<pb::DynamicValue> for DynamicValue {
    fn from(proto: pb::DynamicValue) -> Self {
        Self {
            msgpack: proto.msgpack,
            json: proto.json,
        }
    }
}

impl From<DynamicValue> for pb::DynamicValue {
    fn from(value: DynamicValue) -> Self {
        Self {
            msgpack: value.msgpack,
            json: value.json,
        }
    }
}

/// Encode a value as MessagePack.
pub fn encode(value: &Value, ty: &AttributeType) -> Result<Vec<u8>, EngineError> {
    conform(value, ty, &AttributePath::root(), true)?;
    Ok(rmp_serde::to_vec(&Typed { value, ty })?)
}

/// Decode MessagePack bytes. Empty input decodes as null.
///
/// Under [`AttributeType::Dynamic`] the wire carries no collection kinds, so
/// a map decodes as [`Value::Object`] and a set as [`Value::List`]. Decode
/// against a concrete type to get maps and sets back.
pub fn decode(bytes: &[u8], ty: &AttributeType) -> Result<Value, EngineError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    let wire: WireValue = rmp_serde::from_slice(bytes)?;
    Ok(from_wire(wire, ty, &AttributePath::root())?)
}

/// Encode a value as JSON. Fails if the value contains unknowns.
pub fn encode_json(value: &Value, ty: &AttributeType) -> Result<Vec<u8>, EngineError> {
    conform(value, ty, &AttributePath::root(), false)?;
    Ok(serde_json::to_vec(&Typed { value, ty })?)
}

/// Decode JSON bytes. Empty input decodes as null. Dynamic values lose
/// their collection kinds as with [`decode`].
pub fn decode_json(bytes: &[u8], ty: &AttributeType) -> Result<Value, EngineError> {
    if bytes.is_empty() {
        return Ok(Value::Null);
    }
    let wire: WireValue = serde_json::from_slice(bytes)?;
    Ok(from_wire(wire, ty, &AttributePath::root())?)
}

/// Decode MessagePack bytes as an object conforming to `block`, turning empty
/// optional strings into null.
pub fn decode_object(bytes: &[u8], block: &Block) -> Result<Value, EngineError> {
    let value = decode(bytes, &block.implied_type())?;
    Ok(normalize_empty_strings(value, block))
}

/// Replace `""` with null in every optional string attribute of `block`.
///
/// Older providers cannot distinguish an unset optional string from an empty
/// one. This applies on read only; encoding never rewrites values.
pub fn normalize_empty_strings(value: Value, block: &Block) -> Value {
    let Value::Object(mut attrs) = value else {
        return value;
    };
    for (name, attr) in &block.attributes {
        if attr.flags.required || attr.attr_type != AttributeType::String {
            continue;
        }
        if let Some(v) = attrs.get_mut(name) {
            if v.as_str() == Some("") {
                *v = Value::Null;
            }
        }
    }
    for (name, nested) in &block.blocks {
        let Some(v) = attrs.remove(name) else {
            continue;
        };
        let normalized = match (nested.nesting_mode, v) {
            (NestingMode::Single | NestingMode::Group, v) => normalize_empty_strings(v, &nested.block),
            (_, Value::List(items)) => Value::List(
                items
                    .into_iter()
                    .map(|item| normalize_empty_strings(item, &nested.block))
                    .collect(),
            ),
            (_, Value::Set(items)) => Value::Set(
                items
                    .into_iter()
                    .map(|item| normalize_empty_strings(item, &nested.block))
                    .collect(),
            ),
            (_, Value::Map(items)) => Value::Map(
                items
                    .into_iter()
                    .map(|(k, item)| (k, normalize_empty_strings(item, &nested.block)))
                    .collect(),
            ),
            (_, other) => other,
        };
        attrs.insert(name.clone(), normalized);
    }
    Value::Object(attrs)
}

/// Check that `value` has the shape `ty` describes.
pub fn conform(
    value: &Value,
    ty: &AttributeType,
    path: &AttributePath,
    allow_unknown: bool,
) -> Result<(), SchemaMismatchError> {
    let mismatch = |value: &Value| {
        SchemaMismatchError::new(
            path.clone(),
            format!("expected {}, found {}", ty.friendly_name(), value.kind_name()),
        )
    };
    match (ty, value) {
        (_, Value::Null) => Ok(()),
        (_, Value::Unknown) if allow_unknown => Ok(()),
        (_, Value::Unknown) => Err(SchemaMismatchError::new(
            path.clone(),
            "unknown values cannot be encoded as JSON",
        )),
        (AttributeType::Dynamic, v) => conform_untyped(v, path, allow_unknown),
        (AttributeType::String, Value::String(_)) | (AttributeType::Bool, Value::Bool(_)) => Ok(()),
        (AttributeType::Float64, Value::Number(_)) => Ok(()),
        (AttributeType::Int64, Value::Number(n)) => {
            if n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0) {
                Ok(())
            } else {
                Err(SchemaMismatchError::new(
                    path.clone(),
                    format!("expected int64, found fractional number {}", n),
                ))
            }
        },
        (AttributeType::List(elem), Value::List(items))
        | (AttributeType::Set(elem), Value::Set(items))
        | (AttributeType::Set(elem), Value::List(items)) => {
            for (i, item) in items.iter().enumerate() {
                conform(item, elem, &path.clone().index(i as i64), allow_unknown)?;
            }
            Ok(())
        },
        (AttributeType::Map(elem), Value::Map(items))
        | (AttributeType::Map(elem), Value::Object(items)) => {
            for (key, item) in items {
                conform(item, elem, &path.clone().key(key), allow_unknown)?;
            }
            Ok(())
        },
        (AttributeType::Object(attr_types), Value::Object(attrs)) => {
            for (name, item) in attrs {
                let attr_path = path.clone().attr(name);
                match attr_types.get(name) {
                    Some(attr_ty) => conform(item, attr_ty, &attr_path, allow_unknown)?,
                    None => {
                        return Err(SchemaMismatchError::new(
                            attr_path,
                            format!("unsupported attribute \"{}\"", name),
                        ))
                    },
                }
            }
            Ok(())
        },
        (_, v) => Err(mismatch(v)),
    }
}

fn conform_untyped(
    value: &Value,
    path: &AttributePath,
    allow_unknown: bool,
) -> Result<(), SchemaMismatchError> {
    conform(value, &untyped_type_of(value), path, allow_unknown)
}

fn untyped_type_of(value: &Value) -> AttributeType {
    match value {
        Value::Bool(_) => AttributeType::Bool,
        Value::Number(_) => AttributeType::Float64,
        Value::String(_) => AttributeType::String,
        Value::List(_) => AttributeType::list(AttributeType::Dynamic),
        Value::Set(_) => AttributeType::set(AttributeType::Dynamic),
        Value::Map(_) => AttributeType::map(AttributeType::Dynamic),
        Value::Object(attrs) => AttributeType::Object(
            attrs
                .keys()
                .map(|k| (k.clone(), AttributeType::Dynamic))
                .collect(),
        ),
        Value::Null | Value::Unknown => AttributeType::Dynamic,
    }
}

/// A value paired with the type that drives its encoding.
struct Typed<'a> {
    value: &'a Value,
    ty: &'a AttributeType,
}

/// The payload of an unknown-value extension.
struct UnknownPayload;

impl Serialize for UnknownPayload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&[0])
    }
}

impl Serialize for Typed<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (self.ty, self.value) {
            (_, Value::Null) => serializer.serialize_unit(),
            (_, Value::Unknown) => serializer.serialize_newtype_struct(
                rmp_serde::MSGPACK_EXT_STRUCT_NAME,
                &(UNKNOWN_EXT_TYPE, UnknownPayload),
            ),
            (AttributeType::Dynamic, v) => Typed {
                value: v,
                ty: &untyped_type_of(v),
            }
            .serialize(serializer),
            (_, Value::Bool(b)) => serializer.serialize_bool(*b),
            (_, Value::String(s)) => serializer.serialize_str(s),
            (AttributeType::Int64, Value::Number(n)) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => serializer.serialize_i64(i),
                (None, Some(u)) => serializer.serialize_u64(u),
                _ => serializer.serialize_i64(n.as_f64().unwrap_or_default() as i64),
            },
            (_, Value::Number(n)) => match (n.as_i64(), n.as_u64()) {
                (Some(i), _) => serializer.serialize_i64(i),
                (None, Some(u)) => serializer.serialize_u64(u),
                _ => serializer.serialize_f64(n.as_f64().unwrap_or(f64::NAN)),
            },
            (
                AttributeType::List(elem) | AttributeType::Set(elem),
                Value::List(items) | Value::Set(items),
            ) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(&Typed { value: item, ty: elem })?;
                }
                seq.end()
            },
            (AttributeType::Map(elem), Value::Map(items) | Value::Object(items)) => {
                let mut map = serializer.serialize_map(Some(items.len()))?;
                for (key, item) in items {
                    map.serialize_entry(key, &Typed { value: item, ty: elem })?;
                }
                map.end()
            },
            (AttributeType::Object(attr_types), Value::Object(attrs)) => {
                let mut map = serializer.serialize_map(Some(attr_types.len()))?;
                for (name, attr_ty) in attr_types {
                    let item = attrs.get(name).unwrap_or(&Value::Null);
                    map.serialize_entry(name, &Typed { value: item, ty: attr_ty })?;
                }
                map.end()
            },
            (ty, v) => Err(ser::Error::custom(format!(
                "cannot encode {} as {}",
                v.kind_name(),
                ty.friendly_name()
            ))),
        }
    }
}

/// A decoded but not yet typed value.
#[derive(Debug, Clone, PartialEq)]
enum WireValue {
    Nil,
    Unknown,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Array(Vec<WireValue>),
    Map(Vec<(String, WireValue)>),
}

impl WireValue {
    fn kind_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Unknown => "unknown",
            Self::Bool(_) => "bool",
            Self::Int(_) | Self::UInt(_) | Self::Float(_) => "number",
            Self::Str(_) => "string",
            Self::Bytes(_) => "bytes",
            Self::Array(_) => "array",
            Self::Map(_) => "map",
        }
    }
}

impl<'de> Deserialize<'de> for WireValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WireVisitor)
    }
}

struct WireVisitor;

impl<'de> Visitor<'de> for WireVisitor {
    type Value = WireValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a dynamic value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<WireValue, E> {
        Ok(WireValue::Nil)
    }

    fn visit_none<E: de::Error>(self) -> Result<WireValue, E> {
        Ok(WireValue::Nil)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<WireValue, D::Error> {
        WireValue::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, v: bool) -> Result<WireValue, E> {
        Ok(WireValue::Bool(v))
    }

    fn visit_i64<E: de::Error>(self, v: i64) -> Result<WireValue, E> {
        Ok(WireValue::Int(v))
    }

    fn visit_u64<E: de::Error>(self, v: u64) -> Result<WireValue, E> {
        Ok(WireValue::UInt(v))
    }

    fn visit_f64<E: de::Error>(self, v: f64) -> Result<WireValue, E> {
        Ok(WireValue::Float(v))
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<WireValue, E> {
        Ok(WireValue::Str(v.to_owned()))
    }

    fn visit_string<E: de::Error>(self, v: String) -> Result<WireValue, E> {
        Ok(WireValue::Str(v))
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<WireValue, E> {
        Ok(WireValue::Bytes(v.to_vec()))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<WireValue, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(WireValue::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<WireValue, A::Error> {
        let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, WireValue>()? {
            entries.push((key, value));
        }
        Ok(WireValue::Map(entries))
    }

    // MessagePack extensions arrive as newtype structs; type 0 is the only one
    // in use and marks an unknown value.
    fn visit_newtype_struct<D: Deserializer<'de>>(self, deserializer: D) -> Result<WireValue, D::Error> {
        de::IgnoredAny::deserialize(deserializer)?;
        Ok(WireValue::Unknown)
    }
}

fn number_from_f64(f: f64, path: &AttributePath) -> Result<serde_json::Number, SchemaMismatchError> {
    serde_json::Number::from_f64(f)
        .ok_or_else(|| SchemaMismatchError::new(path.clone(), "non-finite number"))
}

/// `f` as an `i64`, if it is in range. `f` must be whole.
fn whole_to_i64(f: f64) -> Option<i64> {
    // 2^63, exactly representable; i64::MAX is not.
    const LIMIT: f64 = 9_223_372_036_854_775_808.0;
    (-LIMIT..LIMIT).contains(&f).then_some(f as i64)
}

fn from_wire(
    wire: WireValue,
    ty: &AttributeType,
    path: &AttributePath,
) -> Result<Value, SchemaMismatchError> {
    let mismatch = |wire: &WireValue| {
        SchemaMismatchError::new(
            path.clone(),
            format!("expected {}, found {}", ty.friendly_name(), wire.kind_name()),
        )
    };
    Ok(match (ty, wire) {
        (_, WireValue::Nil) => Value::Null,
        (_, WireValue::Unknown) => Value::Unknown,
        (AttributeType::Dynamic, wire) => from_wire_untyped(wire, path)?,
        (AttributeType::String, WireValue::Str(s)) => Value::String(s),
        (AttributeType::Bool, WireValue::Bool(b)) => Value::Bool(b),
        (AttributeType::Int64 | AttributeType::Float64, WireValue::Int(i)) => Value::int(i),
        (AttributeType::Int64 | AttributeType::Float64, WireValue::UInt(u)) => Value::Number(u.into()),
        (AttributeType::Int64, WireValue::Float(f)) if f.fract() == 0.0 => match whole_to_i64(f) {
            Some(i) => Value::int(i),
            None => Value::Number(number_from_f64(f, path)?),
        },
        (AttributeType::Float64, WireValue::Float(f)) => Value::Number(number_from_f64(f, path)?),
        (AttributeType::List(elem), WireValue::Array(items)) => {
            Value::List(from_wire_items(items, elem, path)?)
        },
        (AttributeType::Set(elem), WireValue::Array(items)) => {
            Value::Set(from_wire_items(items, elem, path)?)
        },
        (AttributeType::Map(elem), WireValue::Map(entries)) => {
            let mut items = BTreeMap::new();
            for (key, item) in entries {
                let value = from_wire(item, elem, &path.clone().key(&key))?;
                items.insert(key, value);
            }
            Value::Map(items)
        },
        (AttributeType::Object(attr_types), WireValue::Map(entries)) => {
            let mut attrs = BTreeMap::new();
            for (name, item) in entries {
                let attr_path = path.clone().attr(&name);
                let Some(attr_ty) = attr_types.get(&name) else {
                    return Err(SchemaMismatchError::new(
                        attr_path,
                        format!("unsupported attribute \"{}\"", name),
                    ));
                };
                let value = from_wire(item, attr_ty, &attr_path)?;
                attrs.insert(name, value);
            }
            for name in attr_types.keys() {
                attrs.entry(name.clone()).or_insert(Value::Null);
            }
            Value::Object(attrs)
        },
        (_, wire) => return Err(mismatch(&wire)),
    })
}

fn from_wire_items(
    items: Vec<WireValue>,
    elem: &AttributeType,
    path: &AttributePath,
) -> Result<Vec<Value>, SchemaMismatchError> {
    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| from_wire(item, elem, &path.clone().index(i as i64)))
        .collect()
}

fn from_wire_untyped(wire: WireValue, path: &AttributePath) -> Result<Value, SchemaMismatchError> {
    Ok(match wire {
        WireValue::Nil => Value::Null,
        WireValue::Unknown => Value::Unknown,
        WireValue::Bool(b) => Value::Bool(b),
        WireValue::Int(i) => Value::int(i),
        WireValue::UInt(u) => Value::Number(u.into()),
        WireValue::Float(f) => Value::Number(number_from_f64(f, path)?),
        WireValue::Str(s) => Value::String(s),
        WireValue::Bytes(_) => {
            return Err(SchemaMismatchError::new(
                path.clone(),
                "binary data is not a valid dynamic value",
            ))
        },
        WireValue::Array(items) => Value::List(
            items
                .into_iter()
                .enumerate()
                .map(|(i, item)| from_wire_untyped(item, &path.clone().index(i as i64)))
                .collect::<Result<_, _>>()?,
        ),
        WireValue::Map(entries) => {
            let mut attrs = BTreeMap::new();
            for (key, item) in entries {
                let value = from_wire_untyped(item, &path.clone().attr(&key))?;
                attrs.insert(key, value);
            }
            Value::Object(attrs)
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, NestedBlock};

    fn attr_type() -> AttributeType {
        AttributeType::object([("attr", AttributeType::String)])
    }

    #[test]
    fn test_encode_object_msgpack() {
        let value = Value::object([("attr", Value::string("bar"))]);
        let bytes = encode(&value, &attr_type()).unwrap();
        assert_eq!(bytes, b"\x81\xa4attr\xa3bar");
        assert_eq!(decode(&bytes, &attr_type()).unwrap(), value);
    }

    #[test]
    fn test_decode_json_legacy() {
        let value = decode_json(br#"{"attr":"bar"}"#, &attr_type()).unwrap();
        assert_eq!(value, Value::object([("attr", Value::string("bar"))]));

        let dv = DynamicValue::json(br#"{"attr":"bar"}"#.to_vec());
        assert_eq!(dv.format(), Some(Format::Json));
        assert_eq!(dv.decode(&attr_type()).unwrap(), value);
    }

    #[test]
    fn test_empty_bytes_decode_to_null() {
        assert_eq!(decode_json(b"", &attr_type()).unwrap(), Value::Null);
        assert_eq!(DynamicValue::default().decode(&attr_type()).unwrap(), Value::Null);
    }

    #[test]
    fn test_unknown_roundtrip() {
        let ty = AttributeType::object([
            ("id", AttributeType::String),
            ("tags", AttributeType::list(AttributeType::String)),
        ]);
        let value = Value::object([
            ("id", Value::Unknown),
            ("tags", Value::List(vec![Value::string("a"), Value::Unknown])),
        ]);
        let bytes = encode(&value, &ty).unwrap();
        assert_eq!(decode(&bytes, &ty).unwrap(), value);
    }

    #[test]
    fn test_unknown_rejected_for_json() {
        let err = encode_json(&Value::object([("attr", Value::Unknown)]), &attr_type()).unwrap_err();
        match err {
            EngineError::SchemaMismatch(m) => assert_eq!(m.path, AttributePath::root().attr("attr")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_unsupported_attribute_names_path() {
        let ty = AttributeType::object([("id_attr", AttributeType::String)]);
        let err = decode_json(br#"{"attr_new":"bar"}"#, &ty).unwrap_err();
        match err {
            EngineError::SchemaMismatch(m) => {
                assert_eq!(m.path, AttributePath::root().attr("attr_new"));
                assert!(m.detail.contains("unsupported attribute"));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_type_mismatch_deep_path() {
        let ty = AttributeType::object([("ports", AttributeType::list(AttributeType::Int64))]);
        let err = decode_json(br#"{"ports":[80,"http"]}"#, &ty).unwrap_err();
        match err {
            EngineError::SchemaMismatch(m) => {
                assert_eq!(m.path, AttributePath::root().attr("ports").index(1));
            },
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_missing_attributes_decode_as_null() {
        let ty = AttributeType::object([("a", AttributeType::String), ("b", AttributeType::Bool)]);
        let value = decode_json(br#"{"a":"x"}"#, &ty).unwrap();
        assert_eq!(value.get_attr("b"), Some(&Value::Null));
    }

    #[test]
    fn test_optional_empty_string_normalized_on_read() {
        let block = Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("note", Attribute::optional_string())
            .with_block(
                "inner",
                NestedBlock::list(Block::new().with_attribute("label", Attribute::optional_string())),
            );
        let value = Value::object([
            ("name", Value::string("")),
            ("note", Value::string("")),
            (
                "inner",
                Value::List(vec![Value::object([("label", Value::string(""))])]),
            ),
        ]);
        let bytes = encode(&value, &block.implied_type()).unwrap();
        let decoded = decode_object(&bytes, &block).unwrap();
        assert_eq!(decoded.get_attr("name"), Some(&Value::string("")));
        assert_eq!(decoded.get_attr("note"), Some(&Value::Null));
        assert_eq!(
            decoded.get_attr("inner"),
            Some(&Value::List(vec![Value::object([("label", Value::Null)])]))
        );
    }

    #[test]
    fn test_dynamic_roundtrip() {
        let ty = AttributeType::object([("data", AttributeType::Dynamic)]);
        let value = Value::object([(
            "data",
            Value::List(vec![Value::object([
                ("display_name", Value::string("one")),
                ("count", Value::int(2)),
            ])]),
        )]);
        let bytes = encode(&value, &ty).unwrap();
        assert_eq!(decode(&bytes, &ty).unwrap(), value);
    }

    #[test]
    fn test_sets_and_maps_roundtrip() {
        let ty = AttributeType::object([
            ("s", AttributeType::set(AttributeType::String)),
            ("m", AttributeType::map(AttributeType::Float64)),
        ]);
        let mut m = BTreeMap::new();
        m.insert("pi".to_string(), Value::float(3.14));
        let value = Value::object([
            ("s", Value::Set(vec![Value::string("b"), Value::string("a")])),
            ("m", Value::Map(m)),
        ]);
        let bytes = encode(&value, &ty).unwrap();
        assert_eq!(decode(&bytes, &ty).unwrap(), value);
        let json = encode_json(&value, &ty).unwrap();
        assert_eq!(decode_json(&json, &ty).unwrap(), value);
    }

    #[test]
    fn test_fractional_int_rejected() {
        let ty = AttributeType::object([("n", AttributeType::Int64)]);
        assert!(encode(&Value::object([("n", Value::float(1.5))]), &ty).is_err());
        assert!(encode(&Value::object([("n", Value::float(2.0))]), &ty).is_ok());
    }

    #[test]
    fn test_whole_float_decodes_as_int() {
        let ty = AttributeType::object([("n", AttributeType::Int64)]);
        let bytes = rmp_serde::to_vec(&serde_json::json!({ "n": 42.0 })).unwrap();
        assert_eq!(decode(&bytes, &ty).unwrap(), Value::object([("n", Value::int(42))]));

        let bytes = rmp_serde::to_vec(&serde_json::json!({ "n": 4.5 })).unwrap();
        assert!(decode(&bytes, &ty).is_err());
    }

    #[test]
    fn test_out_of_range_float_keeps_magnitude() {
        let ty = AttributeType::object([("n", AttributeType::Int64)]);
        let bytes = rmp_serde::to_vec(&serde_json::json!({ "n": 1e20 })).unwrap();
        let value = decode(&bytes, &ty).unwrap();
        let Some(Value::Number(n)) = value.get_attr("n") else {
            panic!("expected a number, got {:?}", value);
        };
        assert_eq!(n.as_i64(), None);
        assert_eq!(n.as_f64(), Some(1e20));

        assert_eq!(whole_to_i64(-9_223_372_036_854_775_808.0), Some(i64::MIN));
        assert_eq!(whole_to_i64(9_223_372_036_854_775_808.0), None);
    }

    #[test]
    fn test_dynamic_decode_drops_collection_kinds() {
        let ty = AttributeType::object([("data", AttributeType::Dynamic)]);
        let value = Value::object([(
            "data",
            Value::object([
                ("tags", Value::Set(vec![Value::string("a")])),
                ("labels", Value::Map(BTreeMap::from([("k".to_string(), Value::string("v"))]))),
            ]),
        )]);
        let bytes = encode(&value, &ty).unwrap();
        let expected = Value::object([(
            "data",
            Value::object([
                ("tags", Value::List(vec![Value::string("a")])),
                ("labels", Value::object([("k", Value::string("v"))])),
            ]),
        )]);
        assert_eq!(decode(&bytes, &ty).unwrap(), expected);
    }
}
