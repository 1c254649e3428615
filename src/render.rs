//! Human-facing rendering of dynamic values.
//!
//! Rendering is presentation only: it never feeds back into stored state.
//! Sensitive paths print as a placeholder and unknown leaves as
//! `(known after apply)`.

use crate::schema::Block;
use crate::value::{AttributePath, Value};
use std::fmt::Write;

/// Placeholder printed in place of sensitive values.
pub const SENSITIVE_PLACEHOLDER: &str = "(sensitive value)";

/// Placeholder printed in place of unknown values.
pub const UNKNOWN_PLACEHOLDER: &str = "(known after apply)";

/// Rendering options.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Print strings that hold a JSON object or array as `jsonencode(...)`.
    pub json_strings: bool,
}

/// Render a value on one line, hiding every path in `sensitive`.
pub fn render_value(value: &Value, sensitive: &[AttributePath], options: RenderOptions) -> String {
    let mut out = String::new();
    write_value(&mut out, value, &AttributePath::root(), sensitive, options);
    out
}

/// Render an object as `name = value` lines in attribute order, using the
/// block's sensitive flags plus any extra sensitive paths.
pub fn render_object(
    block: &Block,
    value: &Value,
    extra_sensitive: &[AttributePath],
    options: RenderOptions,
) -> String {
    let Value::Object(attrs) = value else {
        return render_value(value, extra_sensitive, options);
    };
    let mut sensitive = block.sensitive_paths(value);
    sensitive.extend(extra_sensitive.iter().cloned());

    let mut out = String::new();
    for (name, item) in attrs {
        let path = AttributePath::root().attr(name);
        let _ = write!(out, "{} = ", name);
        write_value(&mut out, item, &path, &sensitive, options);
        out.push('\n');
    }
    out
}

fn is_sensitive(path: &AttributePath, sensitive: &[AttributePath]) -> bool {
    sensitive.iter().any(|s| path.starts_with(s))
}

fn write_value(
    out: &mut String,
    value: &Value,
    path: &AttributePath,
    sensitive: &[AttributePath],
    options: RenderOptions,
) {
    if !value.is_null() && is_sensitive(path, sensitive) {
        out.push_str(SENSITIVE_PLACEHOLDER);
        return;
    }
    match value {
        Value::Null => out.push_str("null"),
        Value::Unknown => out.push_str(UNKNOWN_PLACEHOLDER),
        Value::Bool(b) => {
            let _ = write!(out, "{}", b);
        },
        Value::Number(n) => {
            let _ = write!(out, "{}", n);
        },
        Value::String(s) => write_string(out, s, options),
        Value::List(items) | Value::Set(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_value(out, item, &path.clone().index(i as i64), sensitive, options);
            }
            out.push(']');
        },
        Value::Map(items) | Value::Object(items) => {
            if items.is_empty() {
                out.push_str("{}");
                return;
            }
            out.push_str("{ ");
            for (i, (key, item)) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                let item_path = match value {
                    Value::Map(_) => path.clone().key(key),
                    _ => path.clone().attr(key),
                };
                let _ = write!(out, "{} = ", key);
                write_value(out, item, &item_path, sensitive, options);
            }
            out.push_str(" }");
        },
    }
}

fn write_string(out: &mut String, s: &str, options: RenderOptions) {
    if options.json_strings {
        // Lone primitives are valid JSON too, but stay plain strings.
        if let Ok(json @ (serde_json::Value::Object(_) | serde_json::Value::Array(_))) =
            serde_json::from_str::<serde_json::Value>(s)
        {
            out.push_str("jsonencode(");
            write_value(
                out,
                &Value::from_json(&json),
                &AttributePath::root(),
                &[],
                RenderOptions::default(),
            );
            out.push(')');
            return;
        }
    }
    let _ = write!(out, "{}", serde_json::Value::String(s.to_string()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Attribute;

    #[test]
    fn test_render_placeholders() {
        let value = Value::object([
            ("id", Value::Unknown),
            ("name", Value::string("web")),
            ("password", Value::string("hunter2")),
        ]);
        let rendered = render_value(
            &value,
            &[AttributePath::root().attr("password")],
            RenderOptions::default(),
        );
        assert_eq!(
            rendered,
            "{ id = (known after apply), name = \"web\", password = (sensitive value) }"
        );
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn test_render_object_uses_schema_sensitivity() {
        let block = Block::new()
            .with_attribute("user", Attribute::optional_string())
            .with_attribute("token", Attribute::optional_string().sensitive());
        let value = Value::object([
            ("user", Value::string("admin")),
            ("token", Value::string("s3cr3t")),
        ]);
        let rendered = render_object(&block, &value, &[], RenderOptions::default());
        assert_eq!(rendered, "token = (sensitive value)\nuser = \"admin\"\n");
    }

    #[test]
    fn test_json_strings_presentation() {
        let value = Value::object([
            ("policy", Value::string(r#"{"Version":"2012"}"#)),
            ("plain", Value::string("42")),
        ]);
        let options = RenderOptions { json_strings: true };
        let rendered = render_value(&value, &[], options);
        assert_eq!(
            rendered,
            "{ plain = \"42\", policy = jsonencode({ Version = \"2012\" }) }"
        );
        let rendered = render_value(&value, &[], RenderOptions::default());
        assert!(rendered.contains("\"{\\\"Version\\\":\\\"2012\\\"}\""));
    }
}
