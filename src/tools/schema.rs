//! Argument checking against a tool's `inputSchema`.
//!
//! Supports the subset of JSON Schema the built-in tools declare: `required`,
//! closed `properties`, `type` (with lenient coercion of stringly-typed
//! numbers and booleans), `enum`, `minLength`/`maxLength` and
//! `minimum`/`maximum`.

use std::fmt;

use serde_json::{Map, Value};

/// One problem with one argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Argument name (empty for whole-object problems)
    pub param: String,
    /// What is wrong
    pub message: String,
}

/// All problems found in one call's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    /// Individual problems, in schema order
    pub violations: Vec<Violation>,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Invalid arguments:")?;
        for v in &self.violations {
            if v.param.is_empty() {
                write!(f, " {};", v.message)?;
            } else {
                write!(f, " '{}' {};", v.param, v.message)?;
            }
        }
        Ok(())
    }
}

impl std::error::Error for SchemaError {}

/// Check `arguments` against `schema`, returning the coerced argument object.
pub fn validate(arguments: &Value, schema: &Value) -> Result<Map<String, Value>, SchemaError> {
    let args = match arguments {
        Value::Object(map) => map.clone(),
        Value::Null => Map::new(),
        other => {
            return Err(single(
                "",
                format!("arguments must be an object, got {}", type_name(other)),
            ));
        }
    };

    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Ok(args);
    };

    let mut violations = Vec::new();

    for name in schema
        .get("required")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
    {
        if args.get(name).is_none_or(Value::is_null) {
            violations.push(violation(name, "is required"));
        }
    }

    for name in args.keys().filter(|k| !properties.contains_key(*k)) {
        let known: Vec<&str> = properties.keys().map(String::as_str).collect();
        violations.push(violation(
            name,
            format!("is not a known parameter (expected one of: {})", known.join(", ")),
        ));
    }

    // Structural problems first; type errors on top of them are noise.
    if !violations.is_empty() {
        return Err(SchemaError { violations });
    }

    let mut coerced = Map::new();
    for (name, prop) in properties {
        match args.get(name) {
            None | Some(Value::Null) => {}
            Some(value) => match check_property(value, prop) {
                Ok(v) => {
                    coerced.insert(name.clone(), v);
                }
                Err(messages) => violations.extend(
                    messages.into_iter().map(|m| violation(name, m)),
                ),
            },
        }
    }

    if violations.is_empty() {
        Ok(coerced)
    } else {
        Err(SchemaError { violations })
    }
}

fn check_property(value: &Value, prop: &Value) -> Result<Value, Vec<String>> {
    let value = match prop.get("type").and_then(Value::as_str) {
        Some(ty) => coerce(value, ty).map_err(|m| vec![m])?,
        None => value.clone(),
    };

    let mut problems = Vec::new();

    if let Some(options) = prop.get("enum").and_then(Value::as_array) {
        if !options.contains(&value) {
            let listed: Vec<String> = options.iter().map(display).collect();
            problems.push(format!("must be one of: {}", listed.join(", ")));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = prop.get("minimum").and_then(Value::as_f64).filter(|m| n < *m) {
            problems.push(format!("must be >= {min}"));
        }
        if let Some(max) = prop.get("maximum").and_then(Value::as_f64).filter(|m| n > *m) {
            problems.push(format!("must be <= {max}"));
        }
    }

    if let Some(s) = value.as_str() {
        let len = s.chars().count() as u64;
        if let Some(min) = prop.get("minLength").and_then(Value::as_u64).filter(|m| len < *m) {
            problems.push(format!("must be at least {min} characters"));
        }
        if let Some(max) = prop.get("maxLength").and_then(Value::as_u64).filter(|m| len > *m) {
            problems.push(format!("must be at most {max} characters"));
        }
    }

    if problems.is_empty() {
        Ok(value)
    } else {
        Err(problems)
    }
}

fn coerce(value: &Value, ty: &str) -> Result<Value, String> {
    let mismatch = || format!("must be {ty}, got {}", type_name(value));
    match (ty, value) {
        ("string", Value::String(_))
        | ("number", Value::Number(_))
        | ("boolean", Value::Bool(_))
        | ("array", Value::Array(_))
        | ("object", Value::Object(_)) => Ok(value.clone()),
        ("string", Value::Number(n)) => Ok(Value::String(n.to_string())),
        ("integer", Value::Number(n)) if n.is_i64() || n.is_u64() => Ok(value.clone()),
        ("integer", Value::Number(n)) => match n.as_f64() {
            #[allow(clippy::cast_possible_truncation)]
            Some(f) if f.fract() == 0.0 => Ok(Value::from(f as i64)),
            _ => Err(format!("must be integer, got {n}")),
        },
        ("integer", Value::String(s)) => s
            .trim()
            .replace(',', "")
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("must be integer, got \"{s}\"")),
        ("number", Value::String(s)) => s
            .trim()
            .replace(',', "")
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(|| format!("must be number, got \"{s}\"")),
        ("boolean", Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" | "1" => Ok(Value::Bool(true)),
            "false" | "no" | "0" => Ok(Value::Bool(false)),
            _ => Err(format!("must be boolean, got \"{s}\"")),
        },
        ("string" | "integer" | "number" | "boolean" | "array" | "object", _) => Err(mismatch()),
        _ => Ok(value.clone()),
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

fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn violation(param: &str, message: impl Into<String>) -> Violation {
    Violation {
        param: param.to_string(),
        message: message.into(),
    }
}

fn single(param: &str, message: impl Into<String>) -> SchemaError {
    SchemaError {
        violations: vec![violation(param, message)],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "platform": {"type": "string", "enum": ["instagram", "tiktok"]},
                "username": {"type": "string", "minLength": 1, "maxLength": 30},
                "followers": {"type": "integer", "minimum": 0},
                "verbose": {"type": "boolean"}
            },
            "required": ["platform", "username"]
        })
    }

    #[test]
    fn valid_arguments_pass_through() {
        let args = json!({"platform": "tiktok", "username": "creator"});
        let out = validate(&args, &schema()).unwrap();
        assert_eq!(out["username"], "creator");
    }

    #[test]
    fn missing_required_reported() {
        let err = validate(&json!({"platform": "tiktok"}), &schema()).unwrap_err();
        assert_eq!(
            err.violations,
            vec![Violation {
                param: "username".into(),
                message: "is required".into()
            }]
        );
    }

    #[test]
    fn null_arguments_treated_as_empty() {
        let err = validate(&Value::Null, &schema()).unwrap_err();
        assert_eq!(err.violations.len(), 2);
    }

    #[test]
    fn unknown_parameter_rejected() {
        let err = validate(
            &json!({"platform": "tiktok", "username": "a", "handle": "b"}),
            &schema(),
        )
        .unwrap_err();
        assert_eq!(err.violations[0].param, "handle");
        assert!(err.violations[0].message.contains("platform"));
    }

    #[test]
    fn stringly_numbers_and_bools_are_coerced() {
        let out = validate(
            &json!({"platform": "instagram", "username": "a", "followers": "12,500", "verbose": "yes"}),
            &schema(),
        )
        .unwrap();
        assert_eq!(out["followers"], 12_500);
        assert_eq!(out["verbose"], true);
    }

    #[test]
    fn enum_and_bounds_enforced() {
        let err = validate(
            &json!({"platform": "myspace", "username": "", "followers": -1}),
            &schema(),
        )
        .unwrap_err();
        let mut params: Vec<&str> = err.violations.iter().map(|v| v.param.as_str()).collect();
        params.sort_unstable();
        assert_eq!(params, vec!["followers", "platform", "username"]);
    }

    #[test]
    fn non_object_arguments_rejected() {
        let err = validate(&json!([1, 2]), &schema()).unwrap_err();
        assert!(err.to_string().contains("arguments must be an object"));
    }

    #[test]
    fn wrong_type_reported() {
        let err = validate(
            &json!({"platform": "tiktok", "username": ["a"]}),
            &schema(),
        )
        .unwrap_err();
        assert_eq!(err.violations[0].message, "must be string, got array");
    }

    #[test]
    fn schema_without_properties_accepts_anything() {
        let out = validate(&json!({"x": 1}), &json!({"type": "object"})).unwrap();
        assert_eq!(out["x"], 1);
    }
}
