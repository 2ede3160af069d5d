//! Synapse populations

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ModelError, Result};
use crate::init::{SparseConnectivityInit, VarInit};
use crate::matrix::{MatrixType, MatrixWeight, SpanType};
use crate::snippet::{CodeRole, Snippet};
use crate::vars::{VarImplementation, VarLocation};

/// Weight-update half of a synapse population: snippet, parameter values
/// and initializers for per-synapse, per-source and per-target state
#[derive(Debug, Clone)]
pub struct WeightUpdateInit {
    /// Weight-update snippet
    pub snippet: Arc<Snippet>,
    /// Parameter values
    pub params: BTreeMap<String, f64>,
    /// Initializers for per-synapse variables
    pub var_inits: BTreeMap<String, VarInit>,
    /// Initializers for per-source-neuron variables
    pub pre_var_inits: BTreeMap<String, VarInit>,
    /// Initializers for per-target-neuron variables
    pub post_var_inits: BTreeMap<String, VarInit>,
}

impl WeightUpdateInit {
    /// Bundle a weight-update snippet with its instantiation values
    pub fn new(snippet: Arc<Snippet>, params: BTreeMap<String, f64>) -> Self {
        Self {
            snippet,
            params,
            var_inits: BTreeMap::new(),
            pre_var_inits: BTreeMap::new(),
            post_var_inits: BTreeMap::new(),
        }
    }

    /// Attach a per-synapse variable initializer
    pub fn with_var_init(mut self, var: impl Into<String>, init: VarInit) -> Self {
        self.var_inits.insert(var.into(), init);
        self
    }

    /// Attach a per-source-neuron variable initializer
    pub fn with_pre_var_init(mut self, var: impl Into<String>, init: VarInit) -> Self {
        self.pre_var_inits.insert(var.into(), init);
        self
    }

    /// Attach a per-target-neuron variable initializer
    pub fn with_post_var_init(mut self, var: impl Into<String>, init: VarInit) -> Self {
        self.post_var_inits.insert(var.into(), init);
        self
    }
}

/// Postsynaptic half of a synapse population
#[derive(Debug, Clone)]
pub struct PostsynapticInit {
    /// Postsynaptic snippet
    pub snippet: Arc<Snippet>,
    /// Parameter values
    pub params: BTreeMap<String, f64>,
    /// Initializers for postsynaptic variables
    pub var_inits: BTreeMap<String, VarInit>,
}

impl PostsynapticInit {
    /// Bundle a postsynaptic snippet with its instantiation values
    pub fn new(snippet: Arc<Snippet>, params: BTreeMap<String, f64>) -> Self {
        Self {
            snippet,
            params,
            var_inits: BTreeMap::new(),
        }
    }

    /// Attach a postsynaptic variable initializer
    pub fn with_var_init(mut self, var: impl Into<String>, init: VarInit) -> Self {
        self.var_inits.insert(var.into(), init);
        self
    }
}

/// A named directed edge between two neuron populations, with a
/// weight-update snippet and a postsynaptic snippet
#[derive(Debug, Clone)]
pub struct SynapseGroup {
    name: String,
    matrix: MatrixType,
    delay_steps: u32,
    src: String,
    trg: String,

    wu_snippet: Arc<Snippet>,
    wu_params: BTreeMap<String, f64>,
    ps_snippet: Arc<Snippet>,
    ps_params: BTreeMap<String, f64>,
    connectivity_init: SparseConnectivityInit,

    pub(crate) wu_derived_params: BTreeMap<String, f64>,
    pub(crate) ps_derived_params: BTreeMap<String, f64>,
    pub(crate) wu_var_inits: BTreeMap<String, VarInit>,
    pub(crate) wu_pre_var_inits: BTreeMap<String, VarInit>,
    pub(crate) wu_post_var_inits: BTreeMap<String, VarInit>,
    pub(crate) ps_var_inits: BTreeMap<String, VarInit>,

    pub(crate) back_prop_delay_steps: u32,
    pub(crate) max_connections: u32,
    pub(crate) max_dendritic_delay_timesteps: u32,
    pub(crate) span_type: SpanType,
    pub(crate) threads_per_spike: u32,
    pub(crate) narrow_sparse_ind: bool,
    pub(crate) event_threshold_retest: bool,

    pub(crate) in_syn_location: VarLocation,
    pub(crate) wu_var_location: VarLocation,
    pub(crate) sparse_connectivity_location: VarLocation,
    pub(crate) wu_var_implementation: VarImplementation,

    pub(crate) dendritic_delay_required: bool,
    pub(crate) ps_model_merged: bool,
    pub(crate) ps_target: String,
}

impl SynapseGroup {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        name: String,
        matrix: MatrixType,
        delay_steps: u32,
        src: String,
        trg: String,
        wu: WeightUpdateInit,
        ps: PostsynapticInit,
        connectivity_init: SparseConnectivityInit,
        src_num_neurons: usize,
        trg_num_neurons: usize,
        default_var_location: VarLocation,
        default_sparse_connectivity_location: VarLocation,
        narrow_sparse_ind: bool,
    ) -> Result<Self> {
        wu.snippet.validate_params(&wu.params)?;
        ps.snippet.validate_params(&ps.params)?;

        for var in wu.var_inits.keys() {
            if !wu.snippet.has_var(var) {
                return Err(ModelError::UnknownVariable {
                    snippet: wu.snippet.name().to_string(),
                    var: var.clone(),
                });
            }
        }
        for var in wu.pre_var_inits.keys() {
            if !wu.snippet.pre_vars().iter().any(|v| v.name == *var) {
                return Err(ModelError::UnknownVariable {
                    snippet: wu.snippet.name().to_string(),
                    var: var.clone(),
                });
            }
        }
        for var in wu.post_var_inits.keys() {
            if !wu.snippet.post_vars().iter().any(|v| v.name == *var) {
                return Err(ModelError::UnknownVariable {
                    snippet: wu.snippet.name().to_string(),
                    var: var.clone(),
                });
            }
        }
        for var in ps.var_inits.keys() {
            if !ps.snippet.has_var(var) {
                return Err(ModelError::UnknownVariable {
                    snippet: ps.snippet.name().to_string(),
                    var: var.clone(),
                });
            }
        }

        // Globally implemented weights are compiled in as constants, so
        // their initializers must be plain constants
        if matrix.weight() == MatrixWeight::Global {
            for (var, init) in &wu.var_inits {
                if init.constant_value().is_none() {
                    return Err(ModelError::incompatible(
                        &name,
                        format!(
                            "global weight variable '{}' requires a constant initializer",
                            var
                        ),
                    ));
                }
            }
        }

        // Postsynaptic learning walks columns; only the dense matrix
        // supports column addressing here
        if wu.snippet.code(CodeRole::LearnPost).is_some()
            && matrix.connectivity() != crate::matrix::MatrixConnectivity::Dense
        {
            return Err(ModelError::incompatible(
                &name,
                "postsynaptic learning requires dense connectivity",
            ));
        }

        let max_connections = connectivity_init
            .calc_max_row_length(src_num_neurons, trg_num_neurons)
            .unwrap_or(trg_num_neurons as u32);

        let wu_var_implementation = match matrix.weight() {
            MatrixWeight::Individual => VarImplementation::Individual,
            MatrixWeight::Global => VarImplementation::Global,
            MatrixWeight::Procedural => VarImplementation::Procedural,
        };

        let ps_target = name.clone();
        Ok(Self {
            name,
            matrix,
            delay_steps,
            src,
            trg,
            wu_snippet: wu.snippet,
            wu_params: wu.params,
            ps_snippet: ps.snippet,
            ps_params: ps.params,
            connectivity_init,
            wu_derived_params: BTreeMap::new(),
            ps_derived_params: BTreeMap::new(),
            wu_var_inits: wu.var_inits,
            wu_pre_var_inits: wu.pre_var_inits,
            wu_post_var_inits: wu.post_var_inits,
            ps_var_inits: ps.var_inits,
            back_prop_delay_steps: 0,
            max_connections,
            max_dendritic_delay_timesteps: 1,
            span_type: SpanType::default(),
            threads_per_spike: 1,
            narrow_sparse_ind,
            event_threshold_retest: false,
            in_syn_location: default_var_location,
            wu_var_location: default_var_location,
            sparse_connectivity_location: default_sparse_connectivity_location,
            wu_var_implementation,
            dendritic_delay_required: false,
            ps_model_merged: false,
            ps_target,
        })
    }

    /// Population name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Matrix representation
    pub fn matrix_type(&self) -> MatrixType {
        self.matrix
    }

    /// Axonal delay in timesteps
    pub fn delay_steps(&self) -> u32 {
        self.delay_steps
    }

    /// Backpropagation delay in timesteps (postsynaptic learning)
    pub fn back_prop_delay_steps(&self) -> u32 {
        self.back_prop_delay_steps
    }

    /// Source neuron population name
    pub fn src(&self) -> &str {
        &self.src
    }

    /// Target neuron population name
    pub fn trg(&self) -> &str {
        &self.trg
    }

    /// Weight-update snippet
    pub fn wu_snippet(&self) -> &Snippet {
        &self.wu_snippet
    }

    /// Weight-update parameter values
    pub fn wu_params(&self) -> &BTreeMap<String, f64> {
        &self.wu_params
    }

    /// Weight-update derived parameters (filled by finalize)
    pub fn wu_derived_params(&self) -> &BTreeMap<String, f64> {
        &self.wu_derived_params
    }

    /// Per-synapse variable initializers
    pub fn wu_var_inits(&self) -> &BTreeMap<String, VarInit> {
        &self.wu_var_inits
    }

    /// Per-source-neuron variable initializers
    pub fn wu_pre_var_inits(&self) -> &BTreeMap<String, VarInit> {
        &self.wu_pre_var_inits
    }

    /// Per-target-neuron variable initializers
    pub fn wu_post_var_inits(&self) -> &BTreeMap<String, VarInit> {
        &self.wu_post_var_inits
    }

    /// Postsynaptic snippet
    pub fn ps_snippet(&self) -> &Snippet {
        &self.ps_snippet
    }

    /// Postsynaptic parameter values
    pub fn ps_params(&self) -> &BTreeMap<String, f64> {
        &self.ps_params
    }

    /// Postsynaptic derived parameters (filled by finalize)
    pub fn ps_derived_params(&self) -> &BTreeMap<String, f64> {
        &self.ps_derived_params
    }

    /// Postsynaptic variable initializers
    pub fn ps_var_inits(&self) -> &BTreeMap<String, VarInit> {
        &self.ps_var_inits
    }

    /// Sparse connectivity initializer
    pub fn connectivity_init(&self) -> &SparseConnectivityInit {
        &self.connectivity_init
    }

    /// Maximum synapses per presynaptic row
    pub fn max_connections(&self) -> u32 {
        self.max_connections
    }

    /// Maximum dendritic delay in timesteps
    pub fn max_dendritic_delay_timesteps(&self) -> u32 {
        self.max_dendritic_delay_timesteps
    }

    /// Parallelization axis
    pub fn span_type(&self) -> SpanType {
        self.span_type
    }

    /// Threads walking each presynaptic spike's row
    pub fn threads_per_spike(&self) -> u32 {
        self.threads_per_spike
    }

    /// Use 16-bit column indices for sparse connectivity?
    pub fn is_narrow_sparse_ind(&self) -> bool {
        self.narrow_sparse_ind
    }

    /// Re-evaluate the event threshold inside the update loop?
    pub fn is_event_threshold_retest_required(&self) -> bool {
        self.event_threshold_retest
    }

    /// Does weight-update code route input through dendritic delay?
    pub fn is_dendritic_delay_required(&self) -> bool {
        self.dendritic_delay_required
    }

    /// Does this group share its input buffer with another group?
    pub fn is_ps_model_merged(&self) -> bool {
        self.ps_model_merged
    }

    /// Name of the synapse group whose `inSyn` buffer this group
    /// accumulates into (itself unless merged)
    pub fn ps_target(&self) -> &str {
        &self.ps_target
    }

    /// Storage location of the input buffer
    pub fn in_syn_location(&self) -> VarLocation {
        self.in_syn_location
    }

    /// Storage location of per-synapse variables
    pub fn wu_var_location(&self) -> VarLocation {
        self.wu_var_location
    }

    /// Storage location of sparse connectivity structures
    pub fn sparse_connectivity_location(&self) -> VarLocation {
        self.sparse_connectivity_location
    }

    /// Implementation strategy of the weight variables
    pub fn wu_var_implementation(&self) -> VarImplementation {
        self.wu_var_implementation
    }

    /// Does the weight-update snippet handle true spikes?
    pub fn is_true_spike_required(&self) -> bool {
        self.wu_snippet.code(CodeRole::Sim).is_some()
    }

    /// Does the weight-update snippet emit spike-like events?
    pub fn is_spike_event_required(&self) -> bool {
        self.wu_snippet.code(CodeRole::Event).is_some()
            && self.wu_snippet.code(CodeRole::EventThreshold).is_some()
    }

    /// Set the backpropagation delay
    pub fn set_back_prop_delay_steps(&mut self, steps: u32) {
        self.back_prop_delay_steps = steps;
    }

    /// Override the maximum row length
    pub fn set_max_connections(&mut self, max: u32) -> Result<()> {
        if max == 0 {
            return Err(ModelError::invalid_parameter(
                "max_connections",
                "0",
                "> 0",
            ));
        }
        self.max_connections = max;
        Ok(())
    }

    /// Set the maximum dendritic delay
    pub fn set_max_dendritic_delay_timesteps(&mut self, steps: u32) -> Result<()> {
        if steps == 0 {
            return Err(ModelError::invalid_parameter(
                "max_dendritic_delay_timesteps",
                "0",
                "> 0",
            ));
        }
        self.max_dendritic_delay_timesteps = steps;
        Ok(())
    }

    /// Set the parallelization axis
    pub fn set_span_type(&mut self, span: SpanType) {
        self.span_type = span;
    }

    /// Set the number of threads walking each spike's row
    pub fn set_threads_per_spike(&mut self, threads: u32) -> Result<()> {
        if threads == 0 {
            return Err(ModelError::invalid_parameter(
                "threads_per_spike",
                "0",
                "> 0",
            ));
        }
        self.threads_per_spike = threads;
        Ok(())
    }

    /// Request re-evaluation of the event threshold inside the update loop
    pub fn set_event_threshold_retest(&mut self, retest: bool) {
        self.event_threshold_retest = retest;
    }

    /// Set the storage location of the input buffer
    pub fn set_in_syn_location(&mut self, location: VarLocation) {
        self.in_syn_location = location;
    }

    /// Set the storage location of per-synapse variables
    pub fn set_wu_var_location(&mut self, location: VarLocation) {
        self.wu_var_location = location;
    }

    /// Set the storage location of sparse connectivity structures
    pub fn set_sparse_connectivity_location(&mut self, location: VarLocation) {
        self.sparse_connectivity_location = location;
    }

    /// C type of a sparse column index
    pub fn sparse_ind_type(&self) -> &'static str {
        if self.narrow_sparse_ind {
            "uint16_t"
        } else {
            "unsigned int"
        }
    }

    /// Materialize derived parameters and detect dendritic-delay routing
    pub(crate) fn finalize_derived(&mut self, dt: f64) -> Result<()> {
        let wu = Arc::clone(&self.wu_snippet);
        let ps = Arc::clone(&self.ps_snippet);
        self.wu_derived_params = wu.compute_derived_params(&self.wu_params, dt);
        self.ps_derived_params = ps.compute_derived_params(&self.ps_params, dt);
        for (name, value) in self
            .wu_derived_params
            .iter()
            .chain(self.ps_derived_params.iter())
        {
            if !value.is_finite() {
                return Err(ModelError::InvalidDerivedParameter {
                    param: name.clone(),
                    group: self.name.clone(),
                });
            }
        }
        for init in self
            .wu_var_inits
            .values_mut()
            .chain(self.wu_pre_var_inits.values_mut())
            .chain(self.wu_post_var_inits.values_mut())
            .chain(self.ps_var_inits.values_mut())
        {
            init.finalize(dt);
        }
        self.connectivity_init.finalize(dt);
        self.dendritic_delay_required = wu.references("$(addToInSynDelay");
        Ok(())
    }

    /// Does initialization of this group's state or connectivity draw
    /// random numbers?
    pub fn is_init_rng_required(&self) -> bool {
        self.wu_var_inits
            .values()
            .chain(self.wu_pre_var_inits.values())
            .chain(self.wu_post_var_inits.values())
            .chain(self.ps_var_inits.values())
            .any(|i| i.requires_rng())
            || self.connectivity_init.requires_rng()
    }

    /// Can this group's postsynaptic model share a buffer with `other`?
    /// Requires identical snippet, parameter values, variable state and
    /// delay behavior, and no dendritic rerouting on either side.
    pub fn can_ps_be_merged_with(&self, other: &SynapseGroup) -> bool {
        self.ps_snippet.matches(&other.ps_snippet)
            && self.ps_params == other.ps_params
            && self.delay_steps == other.delay_steps
            && !self.dendritic_delay_required
            && !other.dendritic_delay_required
            && self.ps_var_inits.len() == other.ps_var_inits.len()
            && self
                .ps_var_inits
                .iter()
                .all(|(name, init)| {
                    other
                        .ps_var_inits
                        .get(name)
                        .map_or(false, |o| init.matches(o))
                })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn static_pulse() -> Arc<Snippet> {
        Arc::new(
            Snippet::new("StaticPulse")
                .with_var("g", "scalar")
                .with_code(CodeRole::Sim, "$(addToInSyn, $(g));"),
        )
    }

    fn delta_curr() -> Arc<Snippet> {
        Arc::new(Snippet::new("DeltaCurr").with_code(CodeRole::ApplyInput, "$(Isyn) += $(inSyn);"))
    }

    fn make_group(matrix: MatrixType) -> Result<SynapseGroup> {
        SynapseGroup::new(
            "S".to_string(),
            matrix,
            0,
            "A".to_string(),
            "B".to_string(),
            WeightUpdateInit::new(static_pulse(), BTreeMap::new())
                .with_var_init("g", VarInit::constant(0.5)),
            PostsynapticInit::new(delta_curr(), BTreeMap::new()),
            SparseConnectivityInit::uninitialised(),
            32,
            64,
            VarLocation::HOST_DEVICE,
            VarLocation::HOST_DEVICE,
            false,
        )
    }

    #[test]
    fn test_construction_defaults() {
        let sg = make_group(MatrixType::DENSE_INDIVIDUAL).unwrap();
        assert_eq!(sg.max_connections(), 64);
        assert_eq!(sg.span_type(), SpanType::Postsynaptic);
        assert_eq!(sg.threads_per_spike(), 1);
        assert!(sg.is_true_spike_required());
        assert!(!sg.is_spike_event_required());
        assert_eq!(sg.ps_target(), "S");
    }

    #[test]
    fn test_global_weight_accepts_constant_init() {
        let sg = make_group(MatrixType::DENSE_GLOBAL).unwrap();
        assert_eq!(sg.wu_var_inits()["g"].constant_value(), Some(0.5));
    }

    #[test]
    fn test_global_weight_rejects_non_constant_init() {
        let uniform = Arc::new(
            Snippet::new("Uniform")
                .with_params(["min", "max"])
                .with_code(
                    CodeRole::Init,
                    "$(value) = $(min) + ($(max) - $(min)) * $(gennrand_uniform);",
                ),
        );
        let params: BTreeMap<String, f64> = [("min".to_string(), 0.0), ("max".to_string(), 1.0)]
            .into_iter()
            .collect();
        let err = SynapseGroup::new(
            "S".to_string(),
            MatrixType::DENSE_GLOBAL,
            0,
            "A".to_string(),
            "B".to_string(),
            WeightUpdateInit::new(static_pulse(), BTreeMap::new())
                .with_var_init("g", VarInit::new(uniform, params).unwrap()),
            PostsynapticInit::new(delta_curr(), BTreeMap::new()),
            SparseConnectivityInit::uninitialised(),
            32,
            64,
            VarLocation::HOST_DEVICE,
            VarLocation::HOST_DEVICE,
            false,
        );
        assert!(matches!(
            err,
            Err(ModelError::IncompatibleConfiguration { .. })
        ));
    }

    #[test]
    fn test_rejects_sparse_learn_post() {
        let wu = Arc::new(
            Snippet::new("STDP")
                .with_var("g", "scalar")
                .with_code(CodeRole::Sim, "$(addToInSyn, $(g));")
                .with_code(CodeRole::LearnPost, "$(g) += 0.01;"),
        );
        let err = SynapseGroup::new(
            "S".to_string(),
            MatrixType::SPARSE_INDIVIDUAL,
            0,
            "A".to_string(),
            "B".to_string(),
            WeightUpdateInit::new(wu, BTreeMap::new())
                .with_var_init("g", VarInit::constant(0.5)),
            PostsynapticInit::new(delta_curr(), BTreeMap::new()),
            SparseConnectivityInit::uninitialised(),
            32,
            64,
            VarLocation::HOST_DEVICE,
            VarLocation::HOST_DEVICE,
            false,
        );
        assert!(matches!(
            err,
            Err(ModelError::IncompatibleConfiguration { .. })
        ));
    }

    #[test]
    fn test_sparse_ind_type() {
        let mut sg = make_group(MatrixType::SPARSE_INDIVIDUAL).unwrap();
        assert_eq!(sg.sparse_ind_type(), "unsigned int");
        sg.narrow_sparse_ind = true;
        assert_eq!(sg.sparse_ind_type(), "uint16_t");
    }

    #[test]
    fn test_ps_merge_compatibility() {
        let a = make_group(MatrixType::DENSE_INDIVIDUAL).unwrap();
        let b = make_group(MatrixType::DENSE_INDIVIDUAL).unwrap();
        assert!(a.can_ps_be_merged_with(&b));

        let mut c = make_group(MatrixType::DENSE_INDIVIDUAL).unwrap();
        c.dendritic_delay_required = true;
        assert!(!a.can_ps_be_merged_with(&c));
    }
}
