//! The snippet substitution engine.
//!
//! Pure text transformations over the `$(...)` placeholder DSL: literal
//! replacement, name and value substitution, function-call expansion,
//! numeric-literal precision coercion and unresolved-placeholder
//! detection. Every snippet-derived string passes through here before it
//! reaches an output stream.

use sngen_model::Precision;

use crate::error::{CodegenError, Result};

/// Replace every occurrence of `target` with `replacement`.
/// Returns whether anything was replaced.
pub fn substitute(code: &mut String, target: &str, replacement: &str) -> bool {
    if !code.contains(target) {
        return false;
    }
    *code = code.replace(target, replacement);
    true
}

/// For each name `n`, replace `$(n{postfix})` with `{prefix}n{ext}`.
///
/// This is the convention that produces device-memory identifiers like
/// `dd_VNeuronsA[idx]` (`prefix = "dd_"`, `ext = "NeuronsA[idx]"`).
pub fn name_substitutions<S: AsRef<str>>(
    code: &mut String,
    prefix: &str,
    names: &[S],
    postfix: &str,
    ext: &str,
) {
    for name in names {
        let name = name.as_ref();
        substitute(
            code,
            &format!("$({}{})", name, postfix),
            &format!("{}{}{}", prefix, name, ext),
        );
    }
}

/// For each `(n, v)` pair, replace `$(n{postfix})` with the literal value
/// of `v`, parenthesized and written at full precision.
pub fn value_substitutions<'a, I>(code: &mut String, values: I, postfix: &str)
where
    I: IntoIterator<Item = (&'a String, &'a f64)>,
{
    for (name, value) in values {
        substitute(
            code,
            &format!("$({}{})", name, postfix),
            &format!("({})", write_precise(*value)),
        );
    }
}

/// Render a value so that no digits are lost on re-parse.
///
/// Integral values keep a trailing `.0` so the literal stays
/// floating-point and downstream precision coercion can suffix it.
pub fn write_precise(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 {
            "INFINITY".to_string()
        } else {
            "-INFINITY".to_string()
        }
    } else {
        // Shortest representation that round-trips exactly
        format!("{:?}", value)
    }
}

/// Rewrite every `$(name, a0, ..., a{arity-1})` call with `template`,
/// whose body references arguments as `$(0)`, `$(1)`, ...
///
/// Argument parsing balances nested parentheses and strips top-level
/// whitespace. Zero-arity calls are written `$(name)` with no trailing
/// comma. A call with the wrong number of arguments, an empty argument
/// or unbalanced parentheses is an error.
pub fn function_substitute(
    code: &mut String,
    name: &str,
    arity: usize,
    template: &str,
) -> Result<()> {
    if arity == 0 {
        substitute(code, &format!("$({})", name), template);
        return Ok(());
    }

    let pattern = format!("$({},", name);
    let mut search_from = 0;
    while let Some(rel) = code[search_from..].find(&pattern) {
        let start = search_from + rel;
        let args_start = start + pattern.len();

        let (args, end) = parse_call_arguments(code, args_start, name)?;
        if args.len() != arity {
            return Err(CodegenError::bad_function(
                name,
                format!("expected {} arguments, found {}", arity, args.len()),
            ));
        }
        if let Some(idx) = args.iter().position(String::is_empty) {
            return Err(CodegenError::bad_function(
                name,
                format!("argument {} is empty", idx),
            ));
        }

        let mut body = template.to_string();
        for (i, arg) in args.iter().enumerate() {
            substitute(&mut body, &format!("$({})", i), arg);
        }

        code.replace_range(start..=end, &body);
        // Resume after the expansion so a template mentioning the same
        // function cannot recurse forever
        search_from = start + body.len();
    }
    Ok(())
}

/// Parse the arguments of a function-style placeholder starting just
/// after its comma. Returns the trimmed arguments and the byte index of
/// the closing parenthesis.
fn parse_call_arguments(code: &str, from: usize, name: &str) -> Result<(Vec<String>, usize)> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 1usize;

    for (offset, c) in code[from..].char_indices() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth -= 1;
                if depth == 0 {
                    args.push(current.trim().to_string());
                    return Ok((args, from + offset));
                }
                current.push(c);
            }
            ',' if depth == 1 => {
                args.push(current.trim().to_string());
                current.clear();
            }
            _ => current.push(c),
        }
    }

    Err(CodegenError::bad_function(
        name,
        "unbalanced parentheses in argument list",
    ))
}

// ------------------------- Literal coercion -------------------------

/// States of the floating-literal scanner
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LitState {
    /// Inside a token that cannot start a number; waiting for an operator
    LeadIn,
    /// A number may start at the next character
    MayStart,
    /// Integer body
    Integer,
    /// Fractional body (a dot has been seen)
    Fraction,
    /// Immediately after the exponent marker
    ExpMark,
    /// Immediately after the exponent sign
    ExpSign,
    /// Exponent digits
    ExpDigits,
}

fn is_op(c: char) -> bool {
    c.is_ascii_whitespace() || "+-*/%=<>!&|^~?:;,(){}[]".contains(c)
}

/// Coerce the precision of every floating-point literal in `code`, then
/// rename math functions to their matching precision forms.
///
/// For single precision, unsuffixed float literals gain an `f` suffix;
/// for double (and long double), a trailing `f` is stripped.
/// Integer-looking tokens are never touched: `3` stays `3`, only `3.0`
/// or `3e0` are coerced.
pub fn ensure_ftype(code: &mut String, precision: Precision) {
    let single = precision.is_single();
    let mut out = String::with_capacity(code.len() + 8);
    let mut state = LitState::MayStart;

    // emit: the scanner is leaving a float literal at terminator `c`.
    // Insert or strip the suffix, push the terminator unless stripped.
    let emit = |out: &mut String, c: char| {
        if c == 'f' || c == 'F' {
            if single {
                out.push(c);
            }
            // double: drop the suffix character
        } else {
            if single {
                out.push('f');
            }
            out.push(c);
        }
    };

    for c in code.chars() {
        state = match state {
            LitState::LeadIn => {
                out.push(c);
                if is_op(c) {
                    LitState::MayStart
                } else {
                    LitState::LeadIn
                }
            }
            LitState::MayStart => {
                if c.is_ascii_digit() {
                    out.push(c);
                    LitState::Integer
                } else if c == '.' {
                    out.push(c);
                    LitState::Fraction
                } else if is_op(c) {
                    out.push(c);
                    LitState::MayStart
                } else {
                    out.push(c);
                    LitState::LeadIn
                }
            }
            LitState::Integer => {
                if c.is_ascii_digit() {
                    out.push(c);
                    LitState::Integer
                } else if c == '.' {
                    out.push(c);
                    LitState::Fraction
                } else if c == 'e' || c == 'E' {
                    out.push(c);
                    LitState::ExpMark
                } else if is_op(c) {
                    // Integer literal: no coercion
                    out.push(c);
                    LitState::MayStart
                } else {
                    out.push(c);
                    LitState::LeadIn
                }
            }
            LitState::Fraction => {
                if c.is_ascii_digit() || c == '.' {
                    out.push(c);
                    LitState::Fraction
                } else if c == 'e' || c == 'E' {
                    out.push(c);
                    LitState::ExpMark
                } else if is_op(c) {
                    emit(&mut out, c);
                    LitState::MayStart
                } else {
                    emit(&mut out, c);
                    LitState::LeadIn
                }
            }
            LitState::ExpMark => {
                if c.is_ascii_digit() {
                    out.push(c);
                    LitState::ExpDigits
                } else if c == '+' || c == '-' {
                    out.push(c);
                    LitState::ExpSign
                } else if is_op(c) {
                    emit(&mut out, c);
                    LitState::MayStart
                } else {
                    out.push(c);
                    LitState::LeadIn
                }
            }
            LitState::ExpSign => {
                if c.is_ascii_digit() {
                    out.push(c);
                    LitState::ExpDigits
                } else if is_op(c) {
                    emit(&mut out, c);
                    LitState::MayStart
                } else {
                    out.push(c);
                    LitState::LeadIn
                }
            }
            LitState::ExpDigits => {
                if c.is_ascii_digit() {
                    out.push(c);
                    LitState::ExpDigits
                } else if is_op(c) {
                    emit(&mut out, c);
                    LitState::MayStart
                } else {
                    emit(&mut out, c);
                    LitState::LeadIn
                }
            }
        };
    }

    // A literal terminated by end-of-input still needs its suffix; an
    // integer at end-of-input passes through untouched.
    if single && matches!(state, LitState::Fraction | LitState::ExpDigits) {
        out.push('f');
    }

    *code = out;
    replace_math_functions(code, single);
}

// ------------------------- Math function table -------------------------

/// C99 math functions in (double form, single form) pairs
static MATH_FUNCS: &[(&str, &str)] = &[
    ("cos", "cosf"),
    ("sin", "sinf"),
    ("tan", "tanf"),
    ("acos", "acosf"),
    ("asin", "asinf"),
    ("atan", "atanf"),
    ("atan2", "atan2f"),
    ("cosh", "coshf"),
    ("sinh", "sinhf"),
    ("tanh", "tanhf"),
    ("acosh", "acoshf"),
    ("asinh", "asinhf"),
    ("atanh", "atanhf"),
    ("exp", "expf"),
    ("frexp", "frexpf"),
    ("ldexp", "ldexpf"),
    ("log", "logf"),
    ("log10", "log10f"),
    ("modf", "modff"),
    ("exp2", "exp2f"),
    ("expm1", "expm1f"),
    ("ilogb", "ilogbf"),
    ("log1p", "log1pf"),
    ("log2", "log2f"),
    ("logb", "logbf"),
    ("scalbn", "scalbnf"),
    ("scalbln", "scalblnf"),
    ("pow", "powf"),
    ("sqrt", "sqrtf"),
    ("cbrt", "cbrtf"),
    ("hypot", "hypotf"),
    ("erf", "erff"),
    ("erfc", "erfcf"),
    ("tgamma", "tgammaf"),
    ("lgamma", "lgammaf"),
    ("ceil", "ceilf"),
    ("floor", "floorf"),
    ("fmod", "fmodf"),
    ("trunc", "truncf"),
    ("round", "roundf"),
    ("lround", "lroundf"),
    ("llround", "llroundf"),
    ("rint", "rintf"),
    ("lrint", "lrintf"),
    ("nearbyint", "nearbyintf"),
    ("remainder", "remainderf"),
    ("remquo", "remquof"),
    ("copysign", "copysignf"),
    ("nan", "nanf"),
    ("nextafter", "nextafterf"),
    ("nexttoward", "nexttowardf"),
    ("fdim", "fdimf"),
    ("fmax", "fmaxf"),
    ("fmin", "fminf"),
    ("fabs", "fabsf"),
    ("fma", "fmaf"),
];

fn is_word(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

/// Replace calls of `from(` with `to(` where `from` sits on a word
/// boundary. `cosf(` does not match `cos(`; `acos(` does not match
/// `cos(` either.
fn replace_function_name(code: &mut String, from: &str, to: &str) {
    let pattern = format!("{}(", from);
    if !code.contains(&pattern) {
        return;
    }

    let mut out = String::with_capacity(code.len());
    let mut rest = code.as_str();
    let mut prev_byte: Option<u8> = None;
    while let Some(pos) = rest.find(&pattern) {
        let boundary = if pos == 0 {
            !matches!(prev_byte, Some(b) if is_word(b))
        } else {
            !is_word(rest.as_bytes()[pos - 1])
        };
        out.push_str(&rest[..pos]);
        if boundary {
            out.push_str(to);
            out.push('(');
        } else {
            out.push_str(&pattern);
        }
        rest = &rest[pos + pattern.len()..];
        prev_byte = Some(b'(');
    }
    out.push_str(rest);
    *code = out;
}

/// Rename every math function to the form matching the target precision
fn replace_math_functions(code: &mut String, single: bool) {
    for (double_name, single_name) in MATH_FUNCS {
        if single {
            replace_function_name(code, double_name, single_name);
        } else {
            replace_function_name(code, single_name, double_name);
        }
    }
}

// ------------------------- Unresolved detection -------------------------

/// Scan for any remaining `$(name)` placeholder with a word-character
/// body and fail with a diagnostic enumerating them.
///
/// This is the correctness barrier that keeps half-substituted code from
/// reaching the backend.
pub fn check_unresolved(code: &str, context: &str) -> Result<()> {
    let bytes = code.as_bytes();
    let mut residues: Vec<String> = Vec::new();
    let mut i = 0;
    while i + 1 < bytes.len() {
        if bytes[i] == b'$' && bytes[i + 1] == b'(' {
            let body_start = i + 2;
            let mut j = body_start;
            while j < bytes.len() && is_word(bytes[j]) {
                j += 1;
            }
            if j > body_start && j < bytes.len() && bytes[j] == b')' {
                let residue = &code[i..=j];
                if !residues.iter().any(|r| r == residue) {
                    residues.push(residue.to_string());
                }
                i = j + 1;
                continue;
            }
        }
        i += 1;
    }

    if residues.is_empty() {
        Ok(())
    } else {
        Err(CodegenError::unresolved(context, residues))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substitute() {
        let mut code = "x = $(a) + $(a);".to_string();
        assert!(substitute(&mut code, "$(a)", "la"));
        assert_eq!(code, "x = la + la;");
        assert!(!substitute(&mut code, "$(a)", "la"));
    }

    #[test]
    fn test_name_substitutions() {
        let mut code = "$(V) = $(V) + $(U_pre);".to_string();
        name_substitutions(&mut code, "l", &["V"], "", "");
        name_substitutions(&mut code, "dd_", &["U"], "_pre", "NeuronsA[preIdx]");
        assert_eq!(code, "lV = lV + dd_UNeuronsA[preIdx];");
    }

    #[test]
    fn test_value_substitutions() {
        let names = [("amp".to_string(), 0.7f64), ("off".to_string(), -1.5)];
        let mut code = "Isyn += $(amp) + $(off);".to_string();
        value_substitutions(&mut code, names.iter().map(|(n, v)| (n, v)), "");
        assert_eq!(code, "Isyn += (0.7) + (-1.5);");
    }

    #[test]
    fn test_value_substitution_removes_all_params() {
        let names = [
            ("a".to_string(), 1.0f64),
            ("b".to_string(), 2.0),
            ("c".to_string(), 3.0),
        ];
        let mut code = "$(a)*$(b)+$(c)-$(a)".to_string();
        value_substitutions(&mut code, names.iter().map(|(n, v)| (n, v)), "");
        for (name, _) in &names {
            assert!(!code.contains(&format!("$({})", name)));
        }
    }

    #[test]
    fn test_write_precise_round_trips() {
        for v in [0.7, 1.0 / 3.0, 1e-21, -2.5e17, 3.0] {
            let text = write_precise(v);
            let back: f64 = text.parse().unwrap();
            assert_eq!(back, v, "{} did not round-trip", text);
        }
        assert_eq!(write_precise(3.0), "3.0");
    }

    #[test]
    fn test_function_substitute_nested_args() {
        // The outer call is rewritten once; the inner call is left for a
        // subsequent pass
        let mut code = "y = $(scale, $(mul, a, b), 0.5);".to_string();
        function_substitute(&mut code, "scale", 2, "(($(0)) * ($(1)))").unwrap();
        assert_eq!(code, "y = (($(mul, a, b)) * (0.5));");
    }

    #[test]
    fn test_function_substitute_zero_arity() {
        let mut code = "x = $(gennrand_uniform);".to_string();
        function_substitute(&mut code, "gennrand_uniform", 0, "curand_uniform($(rng))").unwrap();
        assert_eq!(code, "x = curand_uniform($(rng));");
    }

    #[test]
    fn test_function_substitute_strips_whitespace() {
        let mut code = "$(addToInSyn,  $(g) * 2 );".to_string();
        function_substitute(&mut code, "addToInSyn", 1, "linSyn += $(0);").unwrap();
        assert_eq!(code, "linSyn += $(g) * 2;");
    }

    #[test]
    fn test_function_substitute_wrong_arity() {
        let mut code = "$(scale, a);".to_string();
        let err = function_substitute(&mut code, "scale", 2, "$(0)*$(1)");
        assert!(matches!(
            err,
            Err(CodegenError::FunctionSubstitution { .. })
        ));
    }

    #[test]
    fn test_function_substitute_empty_argument() {
        let mut code = "$(scale, , b);".to_string();
        let err = function_substitute(&mut code, "scale", 2, "$(0)*$(1)");
        assert!(matches!(
            err,
            Err(CodegenError::FunctionSubstitution { .. })
        ));
    }

    #[test]
    fn test_function_substitute_unbalanced() {
        let mut code = "$(scale, (a, b".to_string();
        let err = function_substitute(&mut code, "scale", 2, "$(0)*$(1)");
        assert!(matches!(
            err,
            Err(CodegenError::FunctionSubstitution { .. })
        ));
    }

    #[test]
    fn test_ensure_ftype_single() {
        let mut code = "x = 1.5 + 2e-3 + 3;".to_string();
        ensure_ftype(&mut code, Precision::Float);
        assert_eq!(code, "x = 1.5f + 2e-3f + 3;");
    }

    #[test]
    fn test_ensure_ftype_double() {
        let mut code = "x = 1.5f + 2.0;".to_string();
        ensure_ftype(&mut code, Precision::Double);
        assert_eq!(code, "x = 1.5 + 2.0;");
    }

    #[test]
    fn test_ensure_ftype_long_double_behaves_like_double() {
        let mut code = "x = 1.5f;".to_string();
        ensure_ftype(&mut code, Precision::LongDouble);
        assert_eq!(code, "x = 1.5;");
    }

    #[test]
    fn test_ensure_ftype_integer_untouched() {
        for input in ["i = 3;", "i = 42 + 7;", "a[3] = b[i];"] {
            let mut code = input.to_string();
            ensure_ftype(&mut code, Precision::Float);
            assert_eq!(code, input);
        }
    }

    #[test]
    fn test_ensure_ftype_integer_at_end_of_input() {
        // Open question resolved as pass-through
        let mut code = "3".to_string();
        ensure_ftype(&mut code, Precision::Float);
        assert_eq!(code, "3");
    }

    #[test]
    fn test_ensure_ftype_float_at_end_of_input() {
        let mut code = "x = 1.5".to_string();
        ensure_ftype(&mut code, Precision::Float);
        assert_eq!(code, "x = 1.5f");

        let mut code = "x = 2e10".to_string();
        ensure_ftype(&mut code, Precision::Float);
        assert_eq!(code, "x = 2e10f");
    }

    #[test]
    fn test_ensure_ftype_identifier_digits_untouched() {
        let mut code = "var3 = x2 + tmp1.5;".to_string();
        let expected = code.clone();
        ensure_ftype(&mut code, Precision::Float);
        assert_eq!(code, expected);
    }

    #[test]
    fn test_ensure_ftype_existing_suffix_kept() {
        let mut code = "x = 1.5f + 0.25f;".to_string();
        ensure_ftype(&mut code, Precision::Float);
        assert_eq!(code, "x = 1.5f + 0.25f;");
    }

    #[test]
    fn test_ensure_ftype_idempotent() {
        for input in [
            "x = 1.5 + 2e-3 + 3;",
            "y = exp(-dt / 20.0) * 0.5f;",
            "if (V >= -50.0) { V = -65.0; }",
        ] {
            for precision in [Precision::Float, Precision::Double] {
                let mut once = input.to_string();
                ensure_ftype(&mut once, precision);
                let mut twice = once.clone();
                ensure_ftype(&mut twice, precision);
                assert_eq!(once, twice, "not idempotent on {:?}", input);
            }
        }
    }

    #[test]
    fn test_math_function_coercion_single() {
        let mut code = "y = exp(x) + acos(z) * pow(a, b);".to_string();
        ensure_ftype(&mut code, Precision::Float);
        assert_eq!(code, "y = expf(x) + acosf(z) * powf(a, b);");
    }

    #[test]
    fn test_math_function_coercion_double() {
        let mut code = "y = expf(x) + acosf(z);".to_string();
        ensure_ftype(&mut code, Precision::Double);
        assert_eq!(code, "y = exp(x) + acos(z);");
    }

    #[test]
    fn test_math_function_word_boundary() {
        // `myexp(` must not become `myexpf(`; `expm1(` is its own entry
        let mut code = "y = myexp(x) + expm1(z);".to_string();
        ensure_ftype(&mut code, Precision::Float);
        assert_eq!(code, "y = myexp(x) + expm1f(z);");
    }

    #[test]
    fn test_check_unresolved_clean() {
        assert!(check_unresolved("x = lV + 1.0f;", "LIF:sim").is_ok());
    }

    #[test]
    fn test_check_unresolved_detects_residue() {
        let err = check_unresolved("x = $(V) + $(tau) + $(V);", "LIF:sim");
        match err {
            Err(CodegenError::UnresolvedPlaceholder { context, residues }) => {
                assert_eq!(context, "LIF:sim");
                assert_eq!(residues, vec!["$(V)".to_string(), "$(tau)".to_string()]);
            }
            other => panic!("expected UnresolvedPlaceholder, got {:?}", other),
        }
    }

    #[test]
    fn test_check_unresolved_ignores_non_word_bodies() {
        // Function-style residue is reported by function_substitute, not here
        assert!(check_unresolved("$(foo, a, b)", "ctx").is_ok());
        assert!(check_unresolved("$()", "ctx").is_ok());
    }
}
