//! Input canonicalization.
//!
//! Produces the deterministic signature used for cache lookup and
//! idempotent submission. Semantically identical submissions (different
//! key order, different numeric formatting, optional parameters absent
//! versus present-with-default) must map to the same signature, so the
//! canonical form is built from schema-normalized parameters (see
//! [`crate::validation::ParameterSchema::normalize`]) with recursively
//! sorted keys, then hashed with SHA-256. The signature doubles as a
//! deduplication identity, so collision resistance matters here; this is
//! not just a cache key.
//!
//! Floating-point determinism: normalized floats are serialized through
//! serde_json's shortest-round-trip formatting, which is
//! platform-independent, and integer-formatted values for float fields are
//! coerced to f64 before serialization so `20` and `20.0` produce identical
//! bytes.

use crate::error::{MoldockError, Result, ValidationViolation};
use crate::validation::{validate_inputs, ParameterSchema};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

/// Canonicalize a submission into its signature.
///
/// Validation runs first and fails fast before any I/O: required parameters
/// and input slots are checked against the task's declared schema, and all
/// violations are reported together. On success the returned tuple carries
/// the normalized parameter map (persisted on the job so replays hash
/// identically) and the hex-encoded SHA-256 signature.
pub fn canonicalize(
    task_name: &str,
    task_version: &str,
    schema: &ParameterSchema,
    required_inputs: &[String],
    inputs: &BTreeMap<String, String>,
    params: &Value,
) -> Result<(Map<String, Value>, String)> {
    let input_violations = validate_inputs(required_inputs, inputs);

    let normalized = match schema.normalize(params) {
        Ok(normalized) if input_violations.is_empty() => normalized,
        Ok(_) => return Err(MoldockError::Validation(input_violations)),
        Err(MoldockError::Validation(mut param_violations)) => {
            let mut all: Vec<ValidationViolation> = input_violations;
            all.append(&mut param_violations);
            return Err(MoldockError::Validation(all));
        }
        Err(other) => return Err(other),
    };

    let signature = signature_of(task_name, task_version, inputs, &normalized);
    Ok((normalized, signature))
}

/// Hash an already-normalized submission. Used on replay paths where the
/// normalized parameter map was persisted with the job.
pub fn signature_of(
    task_name: &str,
    task_version: &str,
    inputs: &BTreeMap<String, String>,
    normalized_params: &Map<String, Value>,
) -> String {
    let mut canonical = Map::new();
    canonical.insert("task".to_string(), Value::String(task_name.to_string()));
    canonical.insert(
        "version".to_string(),
        Value::String(task_version.to_string()),
    );
    canonical.insert(
        "inputs".to_string(),
        Value::Object(
            inputs
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        ),
    );
    canonical.insert(
        "params".to_string(),
        Value::Object(normalized_params.clone()),
    );

    // Key order is enforced during encoding, not by the map type, so the
    // signature is stable even when serde_json is built with preserve_order.
    let mut bytes = Vec::new();
    write_canonical(&Value::Object(canonical), &mut bytes);

    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    hex::encode(hasher.finalize())
}

/// Deterministic JSON encoding: object keys are emitted in sorted order at
/// every depth; scalars go through serde_json's shortest-round-trip
/// formatting. Writes into a Vec cannot fail.
fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<(&String, &Value)> = map.iter().collect();
            pairs.sort_unstable_by(|(a, _), (b, _)| a.cmp(b));
            out.push(b'{');
            for (i, (key, child)) in pairs.into_iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                let _ = serde_json::to_writer(&mut *out, key);
                out.push(b':');
                write_canonical(child, out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        scalar => {
            let _ = serde_json::to_writer(&mut *out, scalar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validation::{FieldKind, FieldSpec};
    use serde_json::json;

    fn schema() -> ParameterSchema {
        ParameterSchema::default()
            .with_field(
                "exhaustiveness",
                FieldSpec::required(FieldKind::Integer).with_range(1.0, 64.0),
            )
            .with_field(
                "x_size",
                FieldSpec::optional(FieldKind::Float, json!(20)).with_range(1.0, 100.0),
            )
            .with_field(
                "y_size",
                FieldSpec::optional(FieldKind::Float, json!(20)).with_range(1.0, 100.0),
            )
    }

    fn inputs() -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        map.insert("ligand".to_string(), "uri://l1".to_string());
        map.insert("protein".to_string(), "uri://p1".to_string());
        map
    }

    fn required() -> Vec<String> {
        vec!["ligand".to_string(), "protein".to_string()]
    }

    #[test]
    fn test_key_order_and_numeric_formatting_are_irrelevant() {
        let (_, a) = canonicalize(
            "dock-v1",
            "1.0.0",
            &schema(),
            &required(),
            &inputs(),
            &json!({"exhaustiveness": 8, "x_size": 20, "y_size": 20.0}),
        )
        .unwrap();
        let (_, b) = canonicalize(
            "dock-v1",
            "1.0.0",
            &schema(),
            &required(),
            &inputs(),
            &json!({"y_size": 20, "x_size": 20.0, "exhaustiveness": 8}),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_absent_optional_hashes_like_default() {
        let (_, a) = canonicalize(
            "dock-v1",
            "1.0.0",
            &schema(),
            &required(),
            &inputs(),
            &json!({"exhaustiveness": 8}),
        )
        .unwrap();
        let (_, b) = canonicalize(
            "dock-v1",
            "1.0.0",
            &schema(),
            &required(),
            &inputs(),
            &json!({"exhaustiveness": 8, "x_size": 20.0, "y_size": 20.0}),
        )
        .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_signature_depends_on_task_identity_and_version() {
        let params = json!({"exhaustiveness": 8});
        let (_, a) = canonicalize("dock-v1", "1.0.0", &schema(), &required(), &inputs(), &params)
            .unwrap();
        let (_, b) = canonicalize("dock-v1", "1.1.0", &schema(), &required(), &inputs(), &params)
            .unwrap();
        let (_, c) = canonicalize("dock-v2", "1.0.0", &schema(), &required(), &inputs(), &params)
            .unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_different_inputs_produce_different_signatures() {
        let params = json!({"exhaustiveness": 8});
        let (_, a) = canonicalize("dock-v1", "1.0.0", &schema(), &required(), &inputs(), &params)
            .unwrap();

        let mut other_inputs = inputs();
        other_inputs.insert("ligand".to_string(), "uri://l2".to_string());
        let (_, b) = canonicalize(
            "dock-v1",
            "1.0.0",
            &schema(),
            &required(),
            &other_inputs,
            &params,
        )
        .unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_validation_collects_input_and_param_violations() {
        let err = canonicalize(
            "dock-v1",
            "1.0.0",
            &schema(),
            &required(),
            &BTreeMap::new(),
            &json!({}),
        )
        .unwrap_err();
        let MoldockError::Validation(violations) = err else {
            panic!("expected validation error");
        };
        // two missing inputs + missing required parameter
        assert_eq!(violations.len(), 3);
    }

    #[test]
    fn test_signature_ignores_map_insertion_order() {
        // Built with opposite insertion orders on purpose; the encoder must
        // sort keys itself rather than relying on the map's iteration order.
        let mut forward = Map::new();
        forward.insert("exhaustiveness".to_string(), json!(8));
        forward.insert("x_size".to_string(), json!(20.0));
        forward.insert("y_size".to_string(), json!(20.0));

        let mut reverse = Map::new();
        reverse.insert("y_size".to_string(), json!(20.0));
        reverse.insert("x_size".to_string(), json!(20.0));
        reverse.insert("exhaustiveness".to_string(), json!(8));

        assert_eq!(
            signature_of("dock-v1", "1.0.0", &inputs(), &forward),
            signature_of("dock-v1", "1.0.0", &inputs(), &reverse)
        );
    }

    #[test]
    fn test_signature_is_hex_sha256() {
        let (_, sig) = canonicalize(
            "dock-v1",
            "1.0.0",
            &schema(),
            &required(),
            &inputs(),
            &json!({"exhaustiveness": 8}),
        )
        .unwrap();
        assert_eq!(sig.len(), 64);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
