//! Argument validation against a tool's declared input schema.
//!
//! Catalogs in the wild carry two shapes. Most tools publish a standard JSON
//! Schema object with `type`/`properties`/`required`; minimal catalogs instead
//! publish a bare map of property name to type name, e.g. `{"amount": "number"}`.
//! Both are accepted here. Violations are collected rather than short-circuited
//! so a caller sees everything wrong with a request at once.

use serde_json::{Map, Value};

const RESERVED_KEYS: &[&str] = &[
    "type",
    "properties",
    "required",
    "additionalProperties",
    "$schema",
    "title",
];

const TYPE_NAMES: &[&str] = &[
    "string", "number", "integer", "boolean", "object", "array", "null",
];

/// Check call arguments against a schema. An empty result means the arguments
/// pass. Schemas that are not objects were already rejected at discovery, so
/// they pass here without comment.
pub fn validate_arguments(arguments: &Map<String, Value>, schema: &Value) -> Vec<String> {
    let mut violations = Vec::new();
    let Some(schema_obj) = schema.as_object() else {
        return violations;
    };
    if schema_obj.is_empty() {
        return violations;
    }

    if let Some(shorthand) = shorthand_properties(schema_obj) {
        // Shorthand has no way to mark a property optional, so every listed
        // property is required and unlisted arguments are rejected.
        for (key, type_name) in &shorthand {
            match arguments.get(*key) {
                None => violations.push(format!("Missing required argument: {key}")),
                Some(value) => check_type(key, value, type_name, &mut violations),
            }
        }
        for key in arguments.keys() {
            if !shorthand.iter().any(|(name, _)| name == key) {
                violations.push(format!("Unknown argument: {key}"));
            }
        }
        return violations;
    }

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for entry in required {
            if let Some(key) = entry.as_str() {
                if !arguments.contains_key(key) {
                    violations.push(format!("Missing required argument: {key}"));
                }
            }
        }
    }

    if let Some(props) = schema_obj.get("properties").and_then(Value::as_object) {
        for (key, prop_schema) in props {
            if let Some(value) = arguments.get(key) {
                validate_value(key, value, prop_schema, &mut violations);
            }
        }
        if schema_obj.get("additionalProperties") == Some(&Value::Bool(false)) {
            for key in arguments.keys() {
                if !props.contains_key(key) {
                    violations.push(format!("Unknown argument: {key}"));
                }
            }
        }
    }

    violations
}

/// Treat the schema as a name-to-type map when it has no structural keywords
/// and every value is a known type name.
fn shorthand_properties(schema_obj: &Map<String, Value>) -> Option<Vec<(&str, &str)>> {
    if schema_obj.keys().any(|key| RESERVED_KEYS.contains(&key.as_str())) {
        return None;
    }
    let mut properties = Vec::with_capacity(schema_obj.len());
    for (key, value) in schema_obj {
        let type_name = value.as_str()?;
        if !TYPE_NAMES.contains(&type_name) {
            return None;
        }
        properties.push((key.as_str(), type_name));
    }
    Some(properties)
}

fn validate_value(path: &str, value: &Value, schema: &Value, violations: &mut Vec<String>) {
    match schema {
        Value::String(type_name) => check_type(path, value, type_name, violations),
        Value::Object(schema_obj) => {
            if let Some(type_name) = schema_obj.get("type").and_then(Value::as_str) {
                if !type_matches(value, type_name) {
                    violations.push(format!(
                        "Argument '{path}' expected {type_name}, got {}",
                        json_type_name(value)
                    ));
                    return;
                }
            }
            if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
                if let Some(value_obj) = value.as_object() {
                    for entry in required {
                        if let Some(key) = entry.as_str() {
                            if !value_obj.contains_key(key) {
                                violations
                                    .push(format!("Missing required field: {path}.{key}"));
                            }
                        }
                    }
                }
            }
            if let Some(props) = schema_obj.get("properties").and_then(Value::as_object) {
                if let Some(value_obj) = value.as_object() {
                    for (key, prop_schema) in props {
                        if let Some(inner) = value_obj.get(key) {
                            let nested = format!("{path}.{key}");
                            validate_value(&nested, inner, prop_schema, violations);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}

fn check_type(path: &str, value: &Value, type_name: &str, violations: &mut Vec<String>) {
    if TYPE_NAMES.contains(&type_name) && !type_matches(value, type_name) {
        violations.push(format!(
            "Argument '{path}' expected {type_name}, got {}",
            json_type_name(value)
        ));
    }
}

fn type_matches(value: &Value, type_name: &str) -> bool {
    match type_name {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "null" => value.is_null(),
        // Unknown type names are not checkable on the client side.
        _ => true,
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) => {
            if n.is_i64() || n.is_u64() {
                "integer"
            } else {
                "number"
            }
        }
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: Value) -> Map<String, Value> {
        value.as_object().cloned().expect("object literal")
    }

    #[test]
    fn empty_schema_accepts_anything() {
        let schema = json!({});
        assert!(validate_arguments(&args(json!({"anything": [1, 2]})), &schema).is_empty());
        assert!(validate_arguments(&Map::new(), &schema).is_empty());
    }

    #[test]
    fn non_object_schema_is_ignored() {
        assert!(validate_arguments(&args(json!({"x": 1})), &json!("number")).is_empty());
    }

    #[test]
    fn shorthand_schema_passes_matching_arguments() {
        let schema = json!({"amount": "number", "currency": "string"});
        let violations =
            validate_arguments(&args(json!({"amount": 10.5, "currency": "USD"})), &schema);
        assert!(violations.is_empty());
    }

    #[test]
    fn shorthand_schema_requires_every_property() {
        let schema = json!({"amount": "number"});
        let violations = validate_arguments(&Map::new(), &schema);
        assert_eq!(violations, vec!["Missing required argument: amount"]);
    }

    #[test]
    fn shorthand_schema_rejects_wrong_type_and_unknown_key() {
        let schema = json!({"amount": "number"});
        let violations =
            validate_arguments(&args(json!({"amount": "ten", "memo": "x"})), &schema);
        assert_eq!(violations.len(), 2);
        assert!(violations[0].contains("expected number"));
        assert!(violations[1].contains("Unknown argument: memo"));
    }

    #[test]
    fn standard_schema_reports_missing_required() {
        let schema = json!({
            "type": "object",
            "properties": {"payment_id": {"type": "string"}},
            "required": ["payment_id"]
        });
        let violations = validate_arguments(&Map::new(), &schema);
        assert_eq!(violations, vec!["Missing required argument: payment_id"]);
    }

    #[test]
    fn standard_schema_checks_property_types() {
        let schema = json!({
            "type": "object",
            "properties": {
                "amount": {"type": "number"},
                "installments": {"type": "integer"}
            }
        });
        let violations = validate_arguments(
            &args(json!({"amount": 12, "installments": 2.5})),
            &schema,
        );
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("'installments' expected integer"));
    }

    #[test]
    fn standard_schema_recurses_into_nested_objects() {
        let schema = json!({
            "type": "object",
            "properties": {
                "card": {
                    "type": "object",
                    "properties": {"number": {"type": "string"}},
                    "required": ["number"]
                }
            }
        });
        let violations = validate_arguments(&args(json!({"card": {}})), &schema);
        assert_eq!(violations, vec!["Missing required field: card.number"]);

        let violations =
            validate_arguments(&args(json!({"card": {"number": 4111}})), &schema);
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains("'card.number' expected string"));
    }

    #[test]
    fn open_objects_allow_extra_arguments() {
        let schema = json!({
            "type": "object",
            "properties": {"amount": {"type": "number"}}
        });
        let violations =
            validate_arguments(&args(json!({"amount": 1, "note": "tip"})), &schema);
        assert!(violations.is_empty());
    }

    #[test]
    fn closed_objects_reject_extra_arguments() {
        let schema = json!({
            "type": "object",
            "properties": {"amount": {"type": "number"}},
            "additionalProperties": false
        });
        let violations =
            validate_arguments(&args(json!({"amount": 1, "note": "tip"})), &schema);
        assert_eq!(violations, vec!["Unknown argument: note"]);
    }

    #[test]
    fn number_accepts_integers_but_not_the_reverse() {
        let schema = json!({"type": "object", "properties": {"n": {"type": "number"}}});
        assert!(validate_arguments(&args(json!({"n": 3})), &schema).is_empty());

        let schema = json!({"type": "object", "properties": {"n": {"type": "integer"}}});
        let violations = validate_arguments(&args(json!({"n": 3.5})), &schema);
        assert_eq!(violations.len(), 1);
    }

    #[test]
    fn unknown_declared_types_are_not_checked() {
        let schema = json!({"type": "object", "properties": {"when": {"type": "date"}}});
        assert!(validate_arguments(&args(json!({"when": "2026-01-01"})), &schema).is_empty());
    }
}
