//! Property tests for canonicalization determinism.

use moldock_core::canonical::canonicalize;
use moldock_core::validation::{FieldKind, FieldSpec, ParameterSchema};
use proptest::prelude::*;
use std::collections::BTreeMap;

fn schema() -> ParameterSchema {
    ParameterSchema::default()
        .with_field(
            "exhaustiveness",
            FieldSpec::optional(FieldKind::Float, serde_json::json!(8.0)).with_range(1.0, 64.0),
        )
        .with_field(
            "energy_range",
            FieldSpec::optional(FieldKind::Float, serde_json::json!(3.0)).with_range(0.0, 10.0),
        )
}

fn inputs() -> BTreeMap<String, String> {
    let mut inputs = BTreeMap::new();
    inputs.insert("ligand".to_string(), "s3://b/l.pdbqt".to_string());
    inputs
}

fn signature(params: serde_json::Value) -> String {
    let (_, sig) = canonicalize(
        "dock",
        "1.0.0",
        &schema(),
        &["ligand".to_string()],
        &inputs(),
        &params,
    )
    .unwrap();
    sig
}

proptest! {
    // Integer-typed JSON and the equivalent float must hash identically;
    // clients serialize numbers inconsistently and must still hit cache.
    #[test]
    fn integral_floats_hash_like_integers(n in 1i64..=64) {
        let as_int = signature(serde_json::json!({"exhaustiveness": n}));
        let as_float = signature(serde_json::json!({"exhaustiveness": n as f64}));
        prop_assert_eq!(as_int, as_float);
    }

    // Omitting an optional parameter is the same submission as passing its
    // declared default explicitly.
    #[test]
    fn absent_optionals_equal_explicit_defaults(e in 1.0f64..=64.0) {
        let implicit = signature(serde_json::json!({"exhaustiveness": e}));
        let explicit = signature(serde_json::json!({
            "exhaustiveness": e,
            "energy_range": 3.0,
        }));
        prop_assert_eq!(implicit, explicit);
    }

    // Distinct in-range values must never collide on the happy path.
    #[test]
    fn distinct_values_produce_distinct_signatures(a in 1.0f64..=64.0, b in 1.0f64..=64.0) {
        prop_assume!(a != b);
        let sig_a = signature(serde_json::json!({"exhaustiveness": a}));
        let sig_b = signature(serde_json::json!({"exhaustiveness": b}));
        prop_assert_ne!(sig_a, sig_b);
    }

    // The signature is a stable function: same request, same hash, across
    // repeated canonicalization.
    #[test]
    fn canonicalization_is_deterministic(e in 1.0f64..=64.0, r in 0.0f64..=10.0) {
        let params = serde_json::json!({"exhaustiveness": e, "energy_range": r});
        prop_assert_eq!(signature(params.clone()), signature(params));
    }
}
