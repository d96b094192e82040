//! Input validation against a tool's declared JSON schema.
//!
//! Supports the subset tool schemas use in practice: `type` (single or list),
//! `properties`, `required`, `additionalProperties: false`, `enum`,
//! `minimum` / `maximum`, `minLength` and `items`. Validation never stops at
//! the first problem; every violation is reported.

use serde::Serialize;
use serde_json::Value;

/// A single schema violation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    /// JSON-pointer-like path of the offending field (`""` for the root)
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.field.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.field, self.message)
        }
    }
}

/// Validate `value` against `schema`, returning every violation found
pub fn validate(schema: &Value, value: &Value) -> Vec<Violation> {
    let mut violations = Vec::new();
    validate_at(schema, value, "", &mut violations);
    violations
}

fn validate_at(schema: &Value, value: &Value, path: &str, out: &mut Vec<Violation>) {
    let Some(schema) = schema.as_object() else {
        return;
    };

    let mut push = |message: String| {
        out.push(Violation {
            field: path.to_string(),
            message,
        })
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(types) => types.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            push(format!(
                "expected {}, got {}",
                allowed.join(" or "),
                type_name(value)
            ));
            // Deeper checks are meaningless on the wrong type
            return;
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            let listed: Vec<String> = options.iter().map(Value::to_string).collect();
            push(format!("must be one of [{}]", listed.join(", ")));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                push(format!("must be >= {}", min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                push(format!("must be <= {}", max));
            }
        }
    }

    if let Some(s) = value.as_str() {
        if let Some(min) = schema.get("minLength").and_then(Value::as_u64) {
            if (s.chars().count() as u64) < min {
                push(format!("must be at least {} characters", min));
            }
        }
    }

    if let Value::Object(fields) = value {
        let properties = schema.get("properties").and_then(Value::as_object);

        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !fields.contains_key(name) {
                    out.push(Violation {
                        field: join(path, name),
                        message: "required field is missing".to_string(),
                    });
                }
            }
        }

        let closed = matches!(schema.get("additionalProperties"), Some(Value::Bool(false)));
        for (name, field_value) in fields {
            match properties.and_then(|p| p.get(name)) {
                Some(field_schema) => {
                    validate_at(field_schema, field_value, &join(path, name), out)
                }
                None if closed => out.push(Violation {
                    field: join(path, name),
                    message: "unknown field".to_string(),
                }),
                None => {}
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(item_schema, item, &join(path, &i.to_string()), out);
        }
    }
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "number",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn join(path: &str, segment: &str) -> String {
    format!("{}/{}", path, segment)
}
