//! Algebraic properties of the substitution engine: literal coercion is
//! idempotent and does not interfere with literal-free code, and value
//! substitution leaves no parameter placeholder behind.

use proptest::prelude::*;

use sngen_codegen::{check_unresolved, ensure_ftype, value_substitutions};
use sngen_model::Precision;

/// One C-ish token; tokens are space-joined so literals always sit on
/// operator boundaries, the way real snippet code tokenizes
fn token() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z][a-z0-9_]{0,6}",
        "[0-9]{1,4}",
        "[0-9]{1,3}\\.[0-9]{1,3}",
        "[0-9]{1,3}\\.[0-9]{1,3}f",
        "[0-9]e-?[0-9]{1,2}",
        Just("+".to_string()),
        Just("-".to_string()),
        Just("*".to_string()),
        Just("=".to_string()),
        Just(";".to_string()),
        Just("(".to_string()),
        Just(")".to_string()),
        Just("exp(x)".to_string()),
        Just("cosf(y)".to_string()),
        Just("pow(a, b)".to_string()),
        Just("sqrtf(v)".to_string()),
    ]
}

fn code_like() -> impl Strategy<Value = String> {
    prop::collection::vec(token(), 0..40).prop_map(|tokens| tokens.join(" "))
}

/// Identifiers drawn from an alphabet no math function name starts with,
/// and no digits, so no coercion target can appear
fn literal_free_code() -> impl Strategy<Value = String> {
    prop::collection::vec(
        prop_oneof![
            "[qvwz][qvwz_]{0,6}",
            Just("+".to_string()),
            Just("=".to_string()),
            Just(";".to_string()),
            Just("(".to_string()),
            Just(")".to_string()),
        ],
        0..40,
    )
    .prop_map(|tokens| tokens.join(" "))
}

proptest! {
    #[test]
    fn ensure_ftype_is_idempotent(code in code_like()) {
        for precision in [Precision::Float, Precision::Double] {
            let mut once = code.clone();
            ensure_ftype(&mut once, precision);
            let mut twice = once.clone();
            ensure_ftype(&mut twice, precision);
            prop_assert_eq!(&once, &twice);
        }
    }

    #[test]
    fn ensure_ftype_leaves_literal_free_code_alone(code in literal_free_code()) {
        for precision in [Precision::Float, Precision::Double] {
            let mut coerced = code.clone();
            ensure_ftype(&mut coerced, precision);
            prop_assert_eq!(&coerced, &code);
        }
    }

    #[test]
    fn value_substitution_resolves_every_parameter(
        names in prop::collection::btree_set("[qvwz][qvwz]{1,4}", 1..5),
        values in prop::collection::vec(-1.0e6f64..1.0e6, 5),
        uses in prop::collection::vec(0usize..5, 1..10),
    ) {
        let names: Vec<String> = names.into_iter().collect();
        let pairs: Vec<(String, f64)> = names
            .iter()
            .zip(values.iter())
            .map(|(n, v)| (n.clone(), *v))
            .collect();

        // Build code referencing a random subset of the parameters
        let mut code = String::new();
        for (i, use_idx) in uses.iter().enumerate() {
            let name = &pairs[use_idx % pairs.len()].0;
            if i > 0 {
                code.push_str(" + ");
            }
            code.push_str(&format!("$({})", name));
        }

        value_substitutions(&mut code, pairs.iter().map(|(n, v)| (n, v)), "");

        for (name, _) in &pairs {
            let needle = format!("$({})", name);
            prop_assert!(!code.contains(&needle));
        }
        prop_assert!(check_unresolved(&code, "property").is_ok());
    }
}
