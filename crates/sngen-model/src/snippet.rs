//! User-visible model fragments: parameters, variables and placeholder code

use std::collections::BTreeMap;
use core::fmt;

use crate::error::{ModelError, Result};
use crate::vars::{ExtraGlobalParam, RowBuildStateVar, Var, VarAccess};

/// A derived-parameter function: closed form over the snippet's parameter
/// values and the simulation timestep
pub type DerivedParamFn = fn(&BTreeMap<String, f64>, f64) -> f64;

/// A function computing the maximum row length of a sparse connectivity
/// snippet from population sizes and parameter values
pub type CalcMaxRowLengthFn = fn(usize, usize, &BTreeMap<String, f64>) -> u32;

/// A named derived parameter
#[derive(Debug, Clone, Copy)]
pub struct DerivedParam {
    /// Name as it appears in `$(name)` placeholders
    pub name: &'static str,
    /// Derivation function, invoked once at finalize
    pub func: DerivedParamFn,
}

/// The role a code string plays within its snippet.
///
/// Which roles are meaningful depends on where the snippet is attached:
/// neuron snippets carry `Sim`/`Threshold`/`Reset`, weight-update snippets
/// carry `Sim`/`Event`/`EventThreshold`/`LearnPost`/`SynapseDynamics`,
/// postsynaptic snippets carry `ApplyInput`/`Decay`, current-source
/// snippets carry `Injection`, and initializer snippets carry
/// `Init`/`RowBuild`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum CodeRole {
    /// Per-timestep state update
    Sim,
    /// Spike condition expression
    Threshold,
    /// Post-spike reset statements
    Reset,
    /// Spike-like-event propagation body
    Event,
    /// Spike-like-event condition expression
    EventThreshold,
    /// Postsynaptic learning body, driven by target spikes
    LearnPost,
    /// Per-synapse per-timestep dynamics
    SynapseDynamics,
    /// Conversion of accumulated input into current
    ApplyInput,
    /// Per-timestep decay of accumulated input
    Decay,
    /// Current injection body
    Injection,
    /// Per-element variable initializer (writes `$(value)`)
    Init,
    /// Sparse row construction loop body
    RowBuild,
}

impl fmt::Display for CodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CodeRole::Sim => "sim",
            CodeRole::Threshold => "threshold",
            CodeRole::Reset => "reset",
            CodeRole::Event => "event",
            CodeRole::EventThreshold => "event_threshold",
            CodeRole::LearnPost => "learn_post",
            CodeRole::SynapseDynamics => "synapse_dynamics",
            CodeRole::ApplyInput => "apply_input",
            CodeRole::Decay => "decay",
            CodeRole::Injection => "injection",
            CodeRole::Init => "init",
            CodeRole::RowBuild => "row_build",
        };
        write!(f, "{}", s)
    }
}

/// An immutable bundle describing one user-visible model fragment.
///
/// A snippet is a plain value: parameter names, derived parameters,
/// extra global parameters, state variables and a role-indexed table of
/// code strings written in the `$(...)` placeholder DSL. Behavior lives
/// entirely in the code strings; the generator never interprets them
/// beyond placeholder resolution.
#[derive(Debug, Clone, Default)]
pub struct Snippet {
    name: String,
    param_names: Vec<String>,
    derived_params: Vec<DerivedParam>,
    extra_global_params: Vec<ExtraGlobalParam>,
    vars: Vec<Var>,
    pre_vars: Vec<Var>,
    post_vars: Vec<Var>,
    code: BTreeMap<CodeRole, String>,
    row_build_state_vars: Vec<RowBuildStateVar>,
    calc_max_row_length: Option<CalcMaxRowLengthFn>,
}

impl Snippet {
    /// Create an empty snippet with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Declare a parameter
    pub fn with_param(mut self, name: impl Into<String>) -> Self {
        self.param_names.push(name.into());
        self
    }

    /// Declare several parameters at once
    pub fn with_params<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.param_names.extend(names.into_iter().map(Into::into));
        self
    }

    /// Declare a derived parameter
    pub fn with_derived_param(mut self, name: &'static str, func: DerivedParamFn) -> Self {
        self.derived_params.push(DerivedParam { name, func });
        self
    }

    /// Declare an extra global parameter
    pub fn with_extra_global_param(
        mut self,
        name: impl Into<String>,
        ty: impl Into<String>,
    ) -> Self {
        self.extra_global_params
            .push(ExtraGlobalParam::new(name, ty));
        self
    }

    /// Declare a read-write state variable
    pub fn with_var(self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.with_var_access(name, ty, VarAccess::ReadWrite)
    }

    /// Declare a state variable with an explicit access mode
    pub fn with_var_access(
        mut self,
        name: impl Into<String>,
        ty: impl Into<String>,
        access: VarAccess,
    ) -> Self {
        self.vars.push(Var::with_access(name, ty, access));
        self
    }

    /// Declare a per-source-neuron variable (weight-update snippets only)
    pub fn with_pre_var(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.pre_vars.push(Var::new(name, ty));
        self
    }

    /// Declare a per-target-neuron variable (weight-update snippets only)
    pub fn with_post_var(mut self, name: impl Into<String>, ty: impl Into<String>) -> Self {
        self.post_vars.push(Var::new(name, ty));
        self
    }

    /// Attach a code string for a role
    pub fn with_code(mut self, role: CodeRole, code: impl Into<String>) -> Self {
        self.code.insert(role, code.into());
        self
    }

    /// Declare a row-build scratch variable (connectivity snippets only)
    pub fn with_row_build_state_var(
        mut self,
        name: impl Into<String>,
        ty: impl Into<String>,
        init: impl Into<String>,
    ) -> Self {
        self.row_build_state_vars
            .push(RowBuildStateVar::new(name, ty, init));
        self
    }

    /// Attach a maximum-row-length calculation (connectivity snippets only)
    pub fn with_calc_max_row_length(mut self, func: CalcMaxRowLengthFn) -> Self {
        self.calc_max_row_length = Some(func);
        self
    }

    /// Snippet name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Ordered parameter names
    pub fn param_names(&self) -> &[String] {
        &self.param_names
    }

    /// Derived parameters
    pub fn derived_params(&self) -> &[DerivedParam] {
        &self.derived_params
    }

    /// Extra global parameters
    pub fn extra_global_params(&self) -> &[ExtraGlobalParam] {
        &self.extra_global_params
    }

    /// State variables
    pub fn vars(&self) -> &[Var] {
        &self.vars
    }

    /// Per-source-neuron variables
    pub fn pre_vars(&self) -> &[Var] {
        &self.pre_vars
    }

    /// Per-target-neuron variables
    pub fn post_vars(&self) -> &[Var] {
        &self.post_vars
    }

    /// Row-build scratch variables
    pub fn row_build_state_vars(&self) -> &[RowBuildStateVar] {
        &self.row_build_state_vars
    }

    /// Maximum-row-length calculation, if declared
    pub fn calc_max_row_length(&self) -> Option<CalcMaxRowLengthFn> {
        self.calc_max_row_length
    }

    /// Look up a variable by name
    pub fn var(&self, name: &str) -> Option<&Var> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// Does the snippet declare a variable with this name?
    pub fn has_var(&self, name: &str) -> bool {
        self.var(name).is_some()
    }

    /// The code string for a role, if present
    pub fn code(&self, role: CodeRole) -> Option<&str> {
        self.code.get(&role).map(String::as_str)
    }

    /// All (role, code) pairs in role order
    pub fn codes(&self) -> impl Iterator<Item = (CodeRole, &str)> {
        self.code.iter().map(|(r, c)| (*r, c.as_str()))
    }

    /// Does any code string contain the given token?
    pub fn references(&self, token: &str) -> bool {
        self.code.values().any(|c| c.contains(token))
    }

    /// Does the code for one of the given roles contain the token?
    pub fn references_in(&self, roles: &[CodeRole], token: &str) -> bool {
        roles
            .iter()
            .filter_map(|r| self.code.get(r))
            .any(|c| c.contains(token))
    }

    /// Check a parameter-value table against the declared parameter names:
    /// every declared parameter must be present and nothing else.
    pub fn validate_params(&self, params: &BTreeMap<String, f64>) -> Result<()> {
        for name in &self.param_names {
            if !params.contains_key(name) {
                return Err(ModelError::InvalidParameters {
                    snippet: self.name.clone(),
                    reason: format!("missing parameter '{}'", name),
                });
            }
        }
        for name in params.keys() {
            if !self.param_names.iter().any(|p| p == name) {
                return Err(ModelError::InvalidParameters {
                    snippet: self.name.clone(),
                    reason: format!("unknown parameter '{}'", name),
                });
            }
        }
        Ok(())
    }

    /// Materialize the derived parameters for a parameter-value table
    pub fn compute_derived_params(
        &self,
        params: &BTreeMap<String, f64>,
        dt: f64,
    ) -> BTreeMap<String, f64> {
        self.derived_params
            .iter()
            .map(|dp| (dp.name.to_string(), (dp.func)(params, dt)))
            .collect()
    }

    /// Structural equality used when deciding whether two postsynaptic
    /// models may share an input buffer: same name, same code table, same
    /// variable declarations.
    pub fn matches(&self, other: &Snippet) -> bool {
        self.name == other.name
            && self.code == other.code
            && self.vars == other.vars
            && self.param_names == other.param_names
    }
}
