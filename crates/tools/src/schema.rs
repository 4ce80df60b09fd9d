//! Argument validation against a tool's JSON Schema.
//!
//! Covers the subset the registry relies on: object shape, `required`,
//! primitive `type` (single or list), `enum`, numeric `minimum`/`maximum`,
//! and `items` for arrays. References and combinators are accepted as-is.

use serde_json::Value;

/// Check `args` against `schema`, returning a human-readable reason on failure.
pub fn validate(schema: &Value, args: &Value) -> Result<(), String> {
    validate_at("args", schema, args)
}

fn validate_at(path: &str, schema: &Value, value: &Value) -> Result<(), String> {
    let Some(schema) = schema.as_object() else {
        return Ok(());
    };

    if let Some(expected) = schema.get("type") {
        let allowed: Vec<&str> = match expected {
            Value::String(t) => vec![t.as_str()],
            Value::Array(ts) => ts.iter().filter_map(Value::as_str).collect(),
            _ => Vec::new(),
        };
        if !allowed.is_empty() && !allowed.iter().any(|t| type_matches(t, value)) {
            return Err(format!(
                "{} must be of type {}, got {}",
                path,
                allowed.join(" | "),
                type_name(value)
            ));
        }
    }

    if let Some(Value::Array(options)) = schema.get("enum") {
        if !options.contains(value) {
            return Err(format!("{} must be one of {}", path, Value::Array(options.clone())));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = schema.get("minimum").and_then(Value::as_f64) {
            if n < min {
                return Err(format!("{} must be >= {}", path, min));
            }
        }
        if let Some(max) = schema.get("maximum").and_then(Value::as_f64) {
            if n > max {
                return Err(format!("{} must be <= {}", path, max));
            }
        }
    }

    if let Value::Object(fields) = value {
        if let Some(Value::Array(required)) = schema.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if fields.get(name).map_or(true, Value::is_null) {
                    return Err(format!("missing required field '{}'", name));
                }
            }
        }
        if let Some(Value::Object(properties)) = schema.get("properties") {
            for (name, field_schema) in properties {
                if let Some(field) = fields.get(name) {
                    validate_at(&format!("{}.{}", path, name), field_schema, field)?;
                }
            }
        }
    }

    if let (Value::Array(items), Some(item_schema)) = (value, schema.get("items")) {
        for (i, item) in items.iter().enumerate() {
            validate_at(&format!("{}[{}]", path, i), item_schema, item)?;
        }
    }

    Ok(())
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "boolean" => value.is_boolean(),
        "null" => value.is_null(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64() || value.is_u64() || value.as_f64().is_some_and(|f| f.fract() == 0.0)
        }
        _ => true,
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "required": ["expression"],
            "properties": {
                "expression": { "type": "string" },
                "precision": { "type": ["integer", "null"], "minimum": 0 },
                "mode": { "enum": ["exact", "approx"] },
                "tags": { "type": "array", "items": { "type": "string" } }
            }
        })
    }

    #[test]
    fn accepts_valid_args() {
        assert!(validate(&schema(), &json!({"expression": "1 + 1"})).is_ok());
        assert!(validate(
            &schema(),
            &json!({"expression": "1", "precision": null, "mode": "exact", "tags": ["a"]})
        )
        .is_ok());
    }

    #[test]
    fn rejects_missing_required_field() {
        let err = validate(&schema(), &json!({})).unwrap_err();
        assert!(err.contains("expression"));
        assert!(validate(&schema(), &json!({"expression": null})).is_err());
    }

    #[test]
    fn rejects_wrong_types() {
        assert!(validate(&schema(), &json!("1 + 1")).is_err());
        assert!(validate(&schema(), &json!({"expression": 5})).is_err());
        assert!(validate(&schema(), &json!({"expression": "x", "precision": 1.5})).is_err());
        assert!(validate(&schema(), &json!({"expression": "x", "tags": [1]})).is_err());
    }

    #[test]
    fn enforces_enum_and_minimum() {
        assert!(validate(&schema(), &json!({"expression": "x", "mode": "wild"})).is_err());
        assert!(validate(&schema(), &json!({"expression": "x", "precision": -1})).is_err());
    }

    #[test]
    fn non_object_schema_accepts_anything() {
        assert!(validate(&Value::Bool(true), &json!(42)).is_ok());
    }
}
