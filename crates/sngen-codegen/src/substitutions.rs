//! Parent-linked stacks of placeholder bindings

use std::collections::BTreeMap;

use sngen_model::Precision;

use crate::error::Result;
use crate::substitute::{
    check_unresolved, ensure_ftype, function_substitute, substitute, write_precise,
};

#[derive(Debug, Clone)]
struct FunctionBinding {
    arity: usize,
    template: String,
}

/// One frame of placeholder bindings, optionally chained to a parent
/// frame.
///
/// The generator pushes a frame per scope (kernel, group, loop body) and
/// hands the innermost frame to snippet processing; `apply` resolves
/// innermost bindings first and walks outward, functions before
/// variables at each level so expanded function bodies still see the
/// frame's variable bindings.
#[derive(Debug, Default)]
pub struct Substitutions<'p> {
    vars: BTreeMap<String, String>,
    funcs: BTreeMap<String, FunctionBinding>,
    parent: Option<&'p Substitutions<'p>>,
}

impl<'p> Substitutions<'p> {
    /// Create an empty root frame
    pub fn new() -> Substitutions<'static> {
        Substitutions {
            vars: BTreeMap::new(),
            funcs: BTreeMap::new(),
            parent: None,
        }
    }

    /// Create a frame chained to `parent`
    pub fn with_parent(parent: &'p Substitutions<'p>) -> Self {
        Self {
            vars: BTreeMap::new(),
            funcs: BTreeMap::new(),
            parent: Some(parent),
        }
    }

    /// Bind `$(name)` to a replacement string
    pub fn add_var(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        let name = name.into();
        debug_assert!(
            !self.vars.contains_key(&name),
            "variable '{}' bound twice in one frame",
            name
        );
        self.vars.insert(name, value.into());
        self
    }

    /// Bind `$(name)` to a parenthesized full-precision literal
    pub fn add_value(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        self.add_var(name, format!("({})", write_precise(value)))
    }

    /// Bind every `(name, value)` pair as a literal
    pub fn add_values<'a, I>(&mut self, values: I) -> &mut Self
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        for (name, value) in values {
            self.add_value(name.clone(), *value);
        }
        self
    }

    /// Bind every `(name, value)` pair with a name suffix, e.g. `_pre`
    pub fn add_values_suffixed<'a, I>(&mut self, values: I, suffix: &str) -> &mut Self
    where
        I: IntoIterator<Item = (&'a String, &'a f64)>,
    {
        for (name, value) in values {
            self.add_value(format!("{}{}", name, suffix), *value);
        }
        self
    }

    /// Bind `$(name, a0, ..)` to a template referencing `$(0)`, `$(1)`, ...
    pub fn add_func(
        &mut self,
        name: impl Into<String>,
        arity: usize,
        template: impl Into<String>,
    ) -> &mut Self {
        let name = name.into();
        debug_assert!(
            !self.funcs.contains_key(&name),
            "function '{}' bound twice in one frame",
            name
        );
        self.funcs.insert(
            name,
            FunctionBinding {
                arity,
                template: template.into(),
            },
        );
        self
    }

    /// Is a variable bound in this frame or any ancestor?
    pub fn contains_var(&self, name: &str) -> bool {
        self.vars.contains_key(name)
            || self.parent.map_or(false, |p| p.contains_var(name))
    }

    /// Look up a variable binding, innermost frame first
    pub fn var(&self, name: &str) -> Option<&str> {
        self.vars
            .get(name)
            .map(String::as_str)
            .or_else(|| self.parent.and_then(|p| p.var(name)))
    }

    /// Apply every binding to `code`, innermost frame first
    pub fn apply(&self, code: &mut String) -> Result<()> {
        for (name, binding) in &self.funcs {
            function_substitute(code, name, binding.arity, &binding.template)?;
        }
        for (name, value) in &self.vars {
            substitute(code, &format!("$({})", name), value);
        }
        if let Some(parent) = self.parent {
            parent.apply(code)?;
        }
        Ok(())
    }

    /// Apply every binding, coerce literal and math-function precision,
    /// then verify nothing is left unresolved. This is the full pipeline
    /// a snippet code string passes before emission.
    pub fn apply_checked(
        &self,
        code: &mut String,
        precision: Precision,
        context: &str,
    ) -> Result<()> {
        self.apply(code)?;
        ensure_ftype(code, precision);
        check_unresolved(code, context)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_chain() {
        let mut root = Substitutions::new();
        root.add_var("t", "t");
        root.add_var("id", "id");

        let mut inner = Substitutions::with_parent(&root);
        inner.add_var("V", "lV");

        let mut code = "$(V) += $(t) * $(id);".to_string();
        inner.apply(&mut code).unwrap();
        assert_eq!(code, "lV += t * id;");
    }

    #[test]
    fn test_inner_shadows_outer() {
        let mut root = Substitutions::new();
        root.add_var("V", "outerV");
        let mut inner = Substitutions::with_parent(&root);
        inner.add_var("V", "innerV");

        let mut code = "$(V)".to_string();
        inner.apply(&mut code).unwrap();
        assert_eq!(code, "innerV");
        assert_eq!(inner.var("V"), Some("innerV"));
    }

    #[test]
    fn test_functions_resolve_before_vars() {
        let mut subs = Substitutions::new();
        subs.add_func("addToInSyn", 1, "linSyn += $(0);");
        subs.add_var("g", "lg");

        let mut code = "$(addToInSyn, $(g));".to_string();
        subs.apply(&mut code).unwrap();
        assert_eq!(code, "linSyn += lg;");
    }

    #[test]
    fn test_add_value_formats_literal() {
        let mut subs = Substitutions::new();
        subs.add_value("amp", 0.7);

        let mut code = "Isyn += $(amp);".to_string();
        subs.apply(&mut code).unwrap();
        assert_eq!(code, "Isyn += (0.7);");
    }

    #[test]
    fn test_apply_checked_coerces_and_verifies() {
        let mut subs = Substitutions::new();
        subs.add_var("V", "lV");

        let mut code = "$(V) = exp($(V)) + 1.5;".to_string();
        subs.apply_checked(&mut code, Precision::Float, "test:sim")
            .unwrap();
        assert_eq!(code, "lV = expf(lV) + 1.5f;");

        let mut bad = "$(missing) = 1.0;".to_string();
        assert!(subs
            .apply_checked(&mut bad, Precision::Float, "test:sim")
            .is_err());
    }

    #[test]
    fn test_values_suffixed() {
        let params: BTreeMap<String, f64> = [("tau".to_string(), 20.0)].into_iter().collect();
        let mut subs = Substitutions::new();
        subs.add_values_suffixed(params.iter(), "_pre");

        let mut code = "x = $(tau_pre);".to_string();
        subs.apply(&mut code).unwrap();
        assert_eq!(code, "x = (20.0);");
    }
}
