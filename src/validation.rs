//! Parameter and input validation.
//!
//! Task definitions declare a typed parameter schema; validation runs before
//! any persistence or I/O and reports every violation it finds. The same
//! schema drives canonicalization: values are coerced to their declared
//! numeric kind and absent optionals are filled from defaults, so `20` and
//! `20.0` for a float field, or a missing optional versus
//! present-with-default, normalize identically.

use crate::error::{MoldockError, Result, ValidationViolation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Maximum nesting depth for parameter values
const MAX_PARAM_DEPTH: usize = 8;

/// Maximum serialized size for a parameter map (256 KiB)
const MAX_PARAM_SIZE_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Float,
    Integer,
    String,
    Boolean,
}

/// Declared shape of one task parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub kind: FieldKind,
    pub required: bool,
    /// Filled in for absent optional parameters before canonicalization
    pub default: Option<Value>,
    /// Inclusive numeric bounds, interpreted per `kind`
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl FieldSpec {
    pub fn required(kind: FieldKind) -> Self {
        Self {
            kind,
            required: true,
            default: None,
            min: None,
            max: None,
        }
    }

    pub fn optional(kind: FieldKind, default: Value) -> Self {
        Self {
            kind,
            required: false,
            default: Some(default),
            min: None,
            max: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min = Some(min);
        self.max = Some(max);
        self
    }
}

/// Typed parameter schema for a task definition version.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParameterSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl ParameterSchema {
    pub fn new(fields: BTreeMap<String, FieldSpec>) -> Self {
        Self { fields }
    }

    pub fn with_field(mut self, name: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.insert(name.into(), spec);
        self
    }

    /// Validate and normalize a caller-supplied parameter map.
    ///
    /// Returns the normalized map (declared numeric kinds coerced, defaults
    /// merged) or the complete list of violations. Must stay pure: no I/O.
    pub fn normalize(&self, params: &Value) -> Result<Map<String, Value>> {
        let mut violations = Vec::new();

        let map = match params {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                return Err(MoldockError::Validation(vec![ValidationViolation::new(
                    "params",
                    format!("expected an object, got {}", value_kind(other)),
                )]))
            }
        };

        check_shape(&map, &mut violations);

        let mut normalized = Map::new();
        for (name, spec) in &self.fields {
            match map.get(name) {
                Some(value) => match coerce(name, spec, value) {
                    Ok(coerced) => {
                        check_range(name, spec, &coerced, &mut violations);
                        normalized.insert(name.clone(), coerced);
                    }
                    Err(violation) => violations.push(violation),
                },
                None if spec.required => {
                    violations.push(ValidationViolation::new(
                        name.clone(),
                        "required parameter missing",
                    ));
                }
                None => {
                    if let Some(default) = &spec.default {
                        // Defaults pass through the same coercion so an
                        // integer-literal default for a float field hashes
                        // like a caller-supplied float.
                        match coerce(name, spec, default) {
                            Ok(coerced) => {
                                normalized.insert(name.clone(), coerced);
                            }
                            Err(violation) => violations.push(violation),
                        }
                    }
                }
            }
        }

        for name in map.keys() {
            if !self.fields.contains_key(name) {
                violations.push(ValidationViolation::new(
                    name.clone(),
                    "unknown parameter not declared by the task schema",
                ));
            }
        }

        if violations.is_empty() {
            Ok(normalized)
        } else {
            Err(MoldockError::Validation(violations))
        }
    }
}

/// Check that all required input slots are supplied with non-empty URIs.
pub fn validate_inputs(
    required_inputs: &[String],
    inputs: &BTreeMap<String, String>,
) -> Vec<ValidationViolation> {
    let mut violations = Vec::new();
    for slot in required_inputs {
        match inputs.get(slot) {
            None => violations.push(ValidationViolation::new(
                slot.clone(),
                "required input missing",
            )),
            Some(uri) if uri.trim().is_empty() => {
                violations.push(ValidationViolation::new(slot.clone(), "input URI is empty"));
            }
            Some(_) => {}
        }
    }
    for slot in inputs.keys() {
        if !required_inputs.contains(slot) {
            violations.push(ValidationViolation::new(
                slot.clone(),
                "unknown input slot not declared by the task definition",
            ));
        }
    }
    violations
}

fn coerce(name: &str, spec: &FieldSpec, value: &Value) -> std::result::Result<Value, ValidationViolation> {
    match spec.kind {
        FieldKind::Float => match value.as_f64() {
            Some(f) if f.is_finite() => Ok(Value::from(f)),
            _ => Err(ValidationViolation::new(
                name,
                format!("expected a finite number, got {}", value_kind(value)),
            )),
        },
        FieldKind::Integer => match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::from(i))
                } else {
                    match n.as_f64() {
                        Some(f) if f.fract() == 0.0 && f.abs() < i64::MAX as f64 => {
                            Ok(Value::from(f as i64))
                        }
                        _ => Err(ValidationViolation::new(name, "expected an integer")),
                    }
                }
            }
            other => Err(ValidationViolation::new(
                name,
                format!("expected an integer, got {}", value_kind(other)),
            )),
        },
        FieldKind::String => match value {
            Value::String(s) => Ok(Value::String(s.clone())),
            other => Err(ValidationViolation::new(
                name,
                format!("expected a string, got {}", value_kind(other)),
            )),
        },
        FieldKind::Boolean => match value {
            Value::Bool(b) => Ok(Value::Bool(*b)),
            other => Err(ValidationViolation::new(
                name,
                format!("expected a boolean, got {}", value_kind(other)),
            )),
        },
    }
}

fn check_range(name: &str, spec: &FieldSpec, value: &Value, violations: &mut Vec<ValidationViolation>) {
    let Some(n) = value.as_f64() else { return };
    if let Some(min) = spec.min {
        if n < min {
            violations.push(ValidationViolation::new(
                name,
                format!("value {n} is below the minimum {min}"),
            ));
        }
    }
    if let Some(max) = spec.max {
        if n > max {
            violations.push(ValidationViolation::new(
                name,
                format!("value {n} is above the maximum {max}"),
            ));
        }
    }
}

fn check_shape(map: &Map<String, Value>, violations: &mut Vec<ValidationViolation>) {
    if let Ok(serialized) = serde_json::to_string(map) {
        if serialized.len() > MAX_PARAM_SIZE_BYTES {
            violations.push(ValidationViolation::new(
                "params",
                format!(
                    "parameter map too large: {} bytes (max {MAX_PARAM_SIZE_BYTES})",
                    serialized.len()
                ),
            ));
        }
    }
    for (name, value) in map {
        if depth_of(value) > MAX_PARAM_DEPTH {
            violations.push(ValidationViolation::new(
                name.clone(),
                format!("nesting exceeds maximum depth {MAX_PARAM_DEPTH}"),
            ));
        }
    }
}

fn depth_of(value: &Value) -> usize {
    match value {
        Value::Object(map) => 1 + map.values().map(depth_of).max().unwrap_or(0),
        Value::Array(items) => 1 + items.iter().map(depth_of).max().unwrap_or(0),
        _ => 0,
    }
}

fn value_kind(value: &Value) -> &'static str {
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

    fn docking_schema() -> ParameterSchema {
        ParameterSchema::default()
            .with_field(
                "exhaustiveness",
                FieldSpec::required(FieldKind::Integer).with_range(1.0, 64.0),
            )
            .with_field(
                "x_size",
                FieldSpec::optional(FieldKind::Float, json!(20)).with_range(1.0, 100.0),
            )
            .with_field("scoring", FieldSpec::optional(FieldKind::String, json!("default")))
    }

    #[test]
    fn test_all_violations_reported_not_just_first() {
        let schema = docking_schema();
        let err = schema
            .normalize(&json!({"x_size": "wide", "bogus": 1}))
            .unwrap_err();
        let MoldockError::Validation(violations) = err else {
            panic!("expected validation error");
        };
        // missing required + bad type + unknown key
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_float_coercion_collapses_integer_formatting() {
        let schema = docking_schema();
        let a = schema
            .normalize(&json!({"exhaustiveness": 8, "x_size": 20}))
            .unwrap();
        let b = schema
            .normalize(&json!({"exhaustiveness": 8, "x_size": 20.0}))
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_absent_optional_equals_present_with_default() {
        let schema = docking_schema();
        let absent = schema.normalize(&json!({"exhaustiveness": 8})).unwrap();
        let explicit = schema
            .normalize(&json!({"exhaustiveness": 8, "x_size": 20.0, "scoring": "default"}))
            .unwrap();
        assert_eq!(absent, explicit);
    }

    #[test]
    fn test_range_enforcement() {
        let schema = docking_schema();
        let err = schema.normalize(&json!({"exhaustiveness": 0})).unwrap_err();
        assert!(err.to_string().contains("below the minimum"));
    }

    #[test]
    fn test_integer_rejects_fractional() {
        let schema = docking_schema();
        assert!(schema.normalize(&json!({"exhaustiveness": 8.5})).is_err());
        // but an integral float is accepted
        assert!(schema.normalize(&json!({"exhaustiveness": 8.0})).is_ok());
    }

    #[test]
    fn test_input_slot_validation() {
        let required = vec!["ligand".to_string(), "protein".to_string()];
        let mut inputs = BTreeMap::new();
        inputs.insert("ligand".to_string(), "uri://l1".to_string());
        inputs.insert("extra".to_string(), "uri://x".to_string());

        let violations = validate_inputs(&required, &inputs);
        assert_eq!(violations.len(), 2); // missing protein + unknown extra
    }
}
