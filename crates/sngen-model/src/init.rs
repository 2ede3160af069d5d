//! Variable and sparse-connectivity initializers

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::Result;
use crate::snippet::{CodeRole, Snippet};

/// A variable initializer: a snippet whose `Init` code writes `$(value)`,
/// plus the parameter values it was instantiated with.
#[derive(Debug, Clone)]
pub struct VarInit {
    snippet: Arc<Snippet>,
    params: BTreeMap<String, f64>,
    derived_params: BTreeMap<String, f64>,
}

impl VarInit {
    /// Create an initializer from a snippet and parameter values
    pub fn new(snippet: Arc<Snippet>, params: BTreeMap<String, f64>) -> Result<Self> {
        snippet.validate_params(&params)?;
        Ok(Self {
            snippet,
            params,
            derived_params: BTreeMap::new(),
        })
    }

    /// Initialize every element to one constant value
    pub fn constant(value: f64) -> Self {
        let snippet = Snippet::new("Constant")
            .with_param("constant")
            .with_code(CodeRole::Init, "$(value) = $(constant);");
        let mut params = BTreeMap::new();
        params.insert("constant".to_string(), value);
        Self {
            snippet: Arc::new(snippet),
            params,
            derived_params: BTreeMap::new(),
        }
    }

    /// Leave the variable uninitialized (the caller will fill it at runtime)
    pub fn uninitialised() -> Self {
        Self {
            snippet: Arc::new(Snippet::new("Uninitialised")),
            params: BTreeMap::new(),
            derived_params: BTreeMap::new(),
        }
    }

    /// The initializer snippet
    pub fn snippet(&self) -> &Snippet {
        &self.snippet
    }

    /// Parameter values
    pub fn params(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    /// Derived parameter values (empty before finalize)
    pub fn derived_params(&self) -> &BTreeMap<String, f64> {
        &self.derived_params
    }

    /// The `Init` code string, if the snippet has one
    pub fn code(&self) -> Option<&str> {
        self.snippet.code(CodeRole::Init)
    }

    /// Does initialization draw random numbers?
    pub fn requires_rng(&self) -> bool {
        self.code().map_or(false, |c| c.contains("$(gennrand"))
    }

    /// The single value this initializer assigns, if it is a plain
    /// constant. Globally implemented variables are compiled in through
    /// this value.
    pub fn constant_value(&self) -> Option<f64> {
        if self.snippet.name() == "Constant" {
            self.params.get("constant").copied()
        } else {
            None
        }
    }

    /// Two initializers are interchangeable when their snippet and
    /// parameter values match
    pub fn matches(&self, other: &VarInit) -> bool {
        self.snippet.matches(&other.snippet) && self.params == other.params
    }

    pub(crate) fn finalize(&mut self, dt: f64) {
        self.derived_params = self.snippet.compute_derived_params(&self.params, dt);
    }
}

/// A sparse-connectivity initializer: a snippet whose `RowBuild` code
/// emits synapses with `$(addSynapse, post)` and terminates the row with
/// `$(endRow)`.
#[derive(Debug, Clone)]
pub struct SparseConnectivityInit {
    snippet: Arc<Snippet>,
    params: BTreeMap<String, f64>,
    derived_params: BTreeMap<String, f64>,
}

impl SparseConnectivityInit {
    /// Create a connectivity initializer from a snippet and parameter values
    pub fn new(snippet: Arc<Snippet>, params: BTreeMap<String, f64>) -> Result<Self> {
        snippet.validate_params(&params)?;
        Ok(Self {
            snippet,
            params,
            derived_params: BTreeMap::new(),
        })
    }

    /// No generated connectivity (dense matrices, or caller-supplied sparsity)
    pub fn uninitialised() -> Self {
        Self {
            snippet: Arc::new(Snippet::new("Uninitialised")),
            params: BTreeMap::new(),
            derived_params: BTreeMap::new(),
        }
    }

    /// The connectivity snippet
    pub fn snippet(&self) -> &Snippet {
        &self.snippet
    }

    /// Parameter values
    pub fn params(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    /// Derived parameter values (empty before finalize)
    pub fn derived_params(&self) -> &BTreeMap<String, f64> {
        &self.derived_params
    }

    /// The `RowBuild` code string, if the snippet has one
    pub fn code(&self) -> Option<&str> {
        self.snippet.code(CodeRole::RowBuild)
    }

    /// Does row construction draw random numbers?
    pub fn requires_rng(&self) -> bool {
        self.code().map_or(false, |c| c.contains("$(gennrand"))
    }

    /// Maximum row length for the given population sizes, if the snippet
    /// declares a calculation for it
    pub fn calc_max_row_length(&self, num_pre: usize, num_post: usize) -> Option<u32> {
        self.snippet
            .calc_max_row_length()
            .map(|f| f(num_pre, num_post, &self.params))
    }

    pub(crate) fn finalize(&mut self, dt: f64) {
        self.derived_params = self.snippet.compute_derived_params(&self.params, dt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_init() {
        let init = VarInit::constant(-65.0);
        assert_eq!(init.code(), Some("$(value) = $(constant);"));
        assert_eq!(init.params()["constant"], -65.0);
        assert!(!init.requires_rng());
    }

    #[test]
    fn test_uninitialised() {
        let init = VarInit::uninitialised();
        assert_eq!(init.code(), None);
    }

    #[test]
    fn test_rng_detection() {
        let snippet = Arc::new(
            Snippet::new("Uniform")
                .with_params(["min", "max"])
                .with_code(
                    CodeRole::Init,
                    "$(value) = $(min) + ($(max) - $(min)) * $(gennrand_uniform);",
                ),
        );
        let mut params = BTreeMap::new();
        params.insert("min".to_string(), 0.0);
        params.insert("max".to_string(), 1.0);

        let init = VarInit::new(snippet, params).unwrap();
        assert!(init.requires_rng());
    }

    #[test]
    fn test_connectivity_max_row_length() {
        fn fixed_number(_pre: usize, _post: usize, params: &BTreeMap<String, f64>) -> u32 {
            params["rowLength"] as u32
        }

        let snippet = Arc::new(
            Snippet::new("FixedNumberPostWithReplacement")
                .with_param("rowLength")
                .with_code(CodeRole::RowBuild, "$(endRow);")
                .with_calc_max_row_length(fixed_number),
        );
        let mut params = BTreeMap::new();
        params.insert("rowLength".to_string(), 8.0);

        let init = SparseConnectivityInit::new(snippet, params).unwrap();
        assert_eq!(init.calc_max_row_length(100, 200), Some(8));
    }

    #[test]
    fn test_var_init_matches() {
        let a = VarInit::constant(1.0);
        let b = VarInit::constant(1.0);
        let c = VarInit::constant(2.0);
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
    }
}
