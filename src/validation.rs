//! Static validation of configuration values against a schema.
//!
//! Validation runs before any provider RPC so that shape mismatches are caught
//! locally. Unknown leaves are accepted anywhere, since they cannot be checked
//! until apply.
//!
//! # Example
//!
//! ```
//! use hemmer_stacks::schema::{Attribute, Schema};
//! use hemmer_stacks::validation::validate;
//! use hemmer_stacks::Value;
//!
//! let schema = Schema::v0()
//!     .with_attribute("name", Attribute::required_string())
//!     .with_attribute("count", Attribute::optional_int64());
//!
//! let input = Value::object([("name", Value::string("test")), ("count", Value::int(42))]);
//! assert!(validate(&schema, &input).is_empty());
//!
//! let input = Value::object([("name", Value::string("test")), ("count", Value::string("x"))]);
//! let diagnostics = validate(&schema, &input);
//! assert_eq!(diagnostics.len(), 1);
//! ```

use crate::codec;
use crate::diagnostics::{Diagnostic, Diagnostics};
use crate::schema::{Attribute, Block, NestedBlock, NestingMode, Schema};
use crate::value::{AttributePath, Value};
use std::collections::BTreeMap;

/// Validate a value against a schema.
///
/// # Validation Rules
///
/// - Required attributes must be present and non-null
/// - Computed-only attributes must not be set
/// - Undeclared attributes are rejected
/// - Attribute types must match the schema
/// - Nested blocks are validated recursively with min/max item constraints
pub fn validate(schema: &Schema, value: &Value) -> Diagnostics {
    validate_block(&schema.block, value)
}

/// Validate a value against a block.
pub fn validate_block(block: &Block, value: &Value) -> Diagnostics {
    let mut diagnostics = Diagnostics::new();
    check_block(block, value, &AttributePath::root(), &mut diagnostics);
    diagnostics
}

/// Validate, returning the diagnostics as an error if any are errors.
pub fn validate_result(schema: &Schema, value: &Value) -> Result<(), Diagnostics> {
    let diagnostics = validate(schema, value);
    if diagnostics.has_errors() {
        Err(diagnostics)
    } else {
        Ok(())
    }
}

/// Check if a value is valid against a schema.
pub fn is_valid(schema: &Schema, value: &Value) -> bool {
    !validate(schema, value).has_errors()
}

/// Fill every absent attribute and block of `block` with its empty value.
///
/// Absent attributes become null, absent `group` blocks an object of nulls,
/// absent list and set blocks an empty collection. Values already present are
/// kept, including unknowns.
pub fn complete_config(block: &Block, value: &Value) -> Value {
    let attrs = match value {
        Value::Object(attrs) => attrs.clone(),
        Value::Null => BTreeMap::new(),
        other => return other.clone(),
    };
    Value::Object(complete_attrs(block, attrs))
}

fn complete_attrs(block: &Block, mut attrs: BTreeMap<String, Value>) -> BTreeMap<String, Value> {
    for name in block.attributes.keys() {
        attrs.entry(name.clone()).or_insert(Value::Null);
    }
    for (name, nested) in &block.blocks {
        let current = attrs.remove(name).unwrap_or(Value::Null);
        attrs.insert(name.clone(), complete_nested(nested, current));
    }
    attrs
}

fn complete_nested(nested: &NestedBlock, value: Value) -> Value {
    match (nested.nesting_mode, value) {
        (_, Value::Unknown) => Value::Unknown,
        (NestingMode::Single, Value::Null) => Value::Null,
        (NestingMode::Single | NestingMode::Group, v) => complete_config(&nested.block, &v),
        (NestingMode::List, Value::Null) => Value::List(Vec::new()),
        (NestingMode::Set, Value::Null) => Value::Set(Vec::new()),
        (NestingMode::Map, Value::Null) => Value::Map(BTreeMap::new()),
        (_, Value::List(items)) => Value::List(
            items
                .iter()
                .map(|item| complete_config(&nested.block, item))
                .collect(),
        ),
        (_, Value::Set(items)) => Value::Set(
            items
                .iter()
                .map(|item| complete_config(&nested.block, item))
                .collect(),
        ),
        (_, Value::Map(items) | Value::Object(items)) => Value::Map(
            items
                .iter()
                .map(|(k, item)| (k.clone(), complete_config(&nested.block, item)))
                .collect(),
        ),
        (_, other) => other,
    }
}

fn check_block(block: &Block, value: &Value, path: &AttributePath, diagnostics: &mut Diagnostics) {
    let attrs = match value {
        Value::Object(attrs) => attrs,
        Value::Null | Value::Unknown => return,
        other => {
            diagnostics.push(
                Diagnostic::error("Expected object")
                    .with_detail(format!("Got {}", other.kind_name()))
                    .with_attribute(path.clone()),
            );
            return;
        },
    };

    for name in attrs.keys() {
        if !block.attributes.contains_key(name) && !block.blocks.contains_key(name) {
            diagnostics.push(
                Diagnostic::error("Unsupported argument")
                    .with_detail(format!("An argument named \"{}\" is not expected here.", name))
                    .with_attribute(path.clone().attr(name)),
            );
        }
    }

    for (name, attr) in &block.attributes {
        check_attribute(attr, attrs.get(name), &path.clone().attr(name), diagnostics);
    }

    for (name, nested) in &block.blocks {
        check_nested_block(nested, attrs.get(name), &path.clone().attr(name), diagnostics);
    }
}

fn check_attribute(
    attr: &Attribute,
    value: Option<&Value>,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) {
    match value {
        None | Some(Value::Null) => {
            if attr.flags.required {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required attribute '{}'", path))
                        .with_detail("This attribute is required and must be provided")
                        .with_attribute(path.clone()),
                );
            }
        },
        Some(_) if !attr.is_configurable() => {
            diagnostics.push(
                Diagnostic::error("Value for unconfigurable attribute")
                    .with_detail(format!("Can't configure a value for \"{}\": its value will be decided automatically.", path))
                    .with_attribute(path.clone()),
            );
        },
        Some(v) => {
            if let Err(mismatch) = codec::conform(v, &attr.attr_type, path, true) {
                diagnostics.push(
                    Diagnostic::error(format!("Invalid type for attribute '{}'", path))
                        .with_detail(mismatch.detail)
                        .with_attribute(mismatch.path),
                );
            }
        },
    }
}

fn check_nested_block(
    nested: &NestedBlock,
    value: Option<&Value>,
    path: &AttributePath,
    diagnostics: &mut Diagnostics,
) {
    match (nested.nesting_mode, value) {
        (_, Some(Value::Unknown)) => {},
        (NestingMode::Single | NestingMode::Group, None | Some(Value::Null)) => {
            if nested.min_items > 0 {
                diagnostics.push(
                    Diagnostic::error(format!("Missing required block '{}'", path))
                        .with_detail("At least one block is required")
                        .with_attribute(path.clone()),
                );
            }
        },
        (NestingMode::Single | NestingMode::Group, Some(v)) => {
            check_block(&nested.block, v, path, diagnostics);
        },
        (_, None | Some(Value::Null)) => check_count(nested, 0, path, diagnostics),
        (NestingMode::List | NestingMode::Set, Some(Value::List(items) | Value::Set(items))) => {
            check_count(nested, items.len(), path, diagnostics);
            for (i, item) in items.iter().enumerate() {
                check_block(&nested.block, item, &path.clone().index(i as i64), diagnostics);
            }
        },
        (NestingMode::Map, Some(Value::Map(items) | Value::Object(items))) => {
            check_count(nested, items.len(), path, diagnostics);
            for (key, item) in items {
                check_block(&nested.block, item, &path.clone().key(key), diagnostics);
            }
        },
        (mode, Some(v)) => {
            let expected = if mode == NestingMode::Map { "map" } else { "list" };
            diagnostics.push(
                Diagnostic::error(format!("Expected {} for block '{}'", expected, path))
                    .with_detail(format!("Got {}", v.kind_name()))
                    .with_attribute(path.clone()),
            );
        },
    }
}

fn check_count(nested: &NestedBlock, len: usize, path: &AttributePath, diagnostics: &mut Diagnostics) {
    let len = len as u32;
    if len < nested.min_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' requires at least {} item(s), got {}",
                path, nested.min_items, len
            ))
            .with_attribute(path.clone()),
        );
    }
    // max_items of 0 means unlimited
    if nested.max_items > 0 && len > nested.max_items {
        diagnostics.push(
            Diagnostic::error(format!(
                "Block '{}' allows at most {} item(s), got {}",
                path, nested.max_items, len
            ))
            .with_attribute(path.clone()),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AttributeFlags, AttributeType};

    #[test]
    fn test_validate_required_string() {
        let schema = Schema::v0().with_attribute("name", Attribute::required_string());

        assert!(validate(&schema, &Value::object([("name", Value::string("test"))])).is_empty());

        let diagnostics = validate(&schema, &Value::object(Vec::<(String, Value)>::new()));
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(
            diagnostics.as_slice()[0].attribute,
            Some(AttributePath::root().attr("name"))
        );

        let diagnostics = validate(&schema, &Value::object([("name", Value::Null)]));
        assert_eq!(diagnostics.len(), 1);
    }

    #[test]
    fn test_unknown_values_accepted() {
        let schema = Schema::v0()
            .with_attribute("name", Attribute::required_string())
            .with_block(
                "rule",
                NestedBlock::list(Block::new()).with_min_items(1),
            );
        let value = Value::object([("name", Value::Unknown), ("rule", Value::Unknown)]);
        assert!(validate(&schema, &value).is_empty());
    }

    #[test]
    fn test_undeclared_attribute_rejected() {
        let schema = Schema::v0().with_attribute("name", Attribute::optional_string());
        let diagnostics = validate(&schema, &Value::object([("nmae", Value::string("typo"))]));
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.as_slice()[0].summary, "Unsupported argument");
    }

    #[test]
    fn test_computed_only_cannot_be_set() {
        let schema = Schema::v0().with_attribute("id", Attribute::computed_string());
        assert!(is_valid(&schema, &Value::object([("id", Value::Null)])));
        assert!(!is_valid(&schema, &Value::object([("id", Value::string("x"))])));
    }

    #[test]
    fn test_nested_type_error_path() {
        let schema = Schema::v0().with_attribute(
            "ports",
            Attribute::new(AttributeType::list(AttributeType::Int64), AttributeFlags::optional()),
        );
        let diagnostics = validate(
            &schema,
            &Value::object([("ports", Value::List(vec![Value::int(1), Value::string("x")]))]),
        );
        assert_eq!(
            diagnostics.as_slice()[0].attribute,
            Some(AttributePath::root().attr("ports").index(1))
        );
    }

    #[test]
    fn test_block_item_limits() {
        let schema = Schema::v0().with_block(
            "rule",
            NestedBlock::list(Block::new().with_attribute("port", Attribute::required_int64()))
                .with_min_items(1)
                .with_max_items(2),
        );
        assert!(validate_result(&schema, &Value::object(Vec::<(String, Value)>::new())).is_err());
        let rule = Value::object([("port", Value::int(80))]);
        assert!(validate_result(
            &schema,
            &Value::object([("rule", Value::List(vec![rule.clone()]))])
        )
        .is_ok());
        let diagnostics = validate(
            &schema,
            &Value::object([("rule", Value::List(vec![rule.clone(), rule.clone(), rule]))]),
        );
        assert!(diagnostics.as_slice()[0].summary.contains("at most 2"));
    }

    #[test]
    fn test_complete_config_substitutes_empties() {
        let block = Block::new()
            .with_attribute("name", Attribute::required_string())
            .with_attribute("note", Attribute::optional_string())
            .with_block("rule", NestedBlock::list(Block::new()))
            .with_block("tags", NestedBlock::set(Block::new()))
            .with_block(
                "timeouts",
                NestedBlock::group(Block::new().with_attribute("create", Attribute::optional_string())),
            )
            .with_block("extra", NestedBlock::single(Block::new()));
        let completed = complete_config(&block, &Value::object([("name", Value::string("a"))]));
        assert_eq!(completed.get_attr("note"), Some(&Value::Null));
        assert_eq!(completed.get_attr("rule"), Some(&Value::List(Vec::new())));
        assert_eq!(completed.get_attr("tags"), Some(&Value::Set(Vec::new())));
        assert_eq!(
            completed.get_attr("timeouts"),
            Some(&Value::object([("create", Value::Null)]))
        );
        assert_eq!(completed.get_attr("extra"), Some(&Value::Null));
    }
}
