//! Neuron populations

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::error::{ModelError, Result};
use crate::init::VarInit;
use crate::snippet::{CodeRole, Snippet};
use crate::vars::{VarImplementation, VarLocation};

/// One input buffer shared by a set of incoming synapse groups.
///
/// `target` names the synapse group whose `inSyn` buffer is allocated;
/// `contributors` lists every group accumulating into it (the target
/// first). A bucket with more than one contributor is a merged
/// postsynaptic model.
#[derive(Debug, Clone)]
pub struct MergedInSyn {
    /// Synapse group owning the buffer
    pub target: String,
    /// All synapse groups accumulating into the buffer, target first
    pub contributors: Vec<String>,
}

impl MergedInSyn {
    /// Is more than one synapse group sharing this buffer?
    pub fn is_merged(&self) -> bool {
        self.contributors.len() > 1
    }
}

/// A named population of identical neurons simulated by one snippet
#[derive(Debug, Clone)]
pub struct NeuronGroup {
    name: String,
    num_neurons: usize,
    snippet: Arc<Snippet>,
    params: BTreeMap<String, f64>,
    host_id: usize,

    pub(crate) derived_params: BTreeMap<String, f64>,
    pub(crate) var_initialisers: BTreeMap<String, VarInit>,
    pub(crate) var_locations: BTreeMap<String, VarLocation>,
    pub(crate) var_implementations: BTreeMap<String, VarImplementation>,
    pub(crate) spike_location: VarLocation,
    pub(crate) spike_event_location: VarLocation,
    pub(crate) spike_time_location: VarLocation,

    pub(crate) num_delay_slots: usize,
    pub(crate) var_queue_required: BTreeSet<String>,
    pub(crate) spike_time_required: bool,
    pub(crate) spike_event_required: bool,
    pub(crate) sim_rng_required: bool,
    pub(crate) init_rng_required: bool,

    pub(crate) in_syn: Vec<String>,
    pub(crate) out_syn: Vec<String>,
    pub(crate) current_sources: Vec<String>,
    pub(crate) merged_in_syn: Vec<MergedInSyn>,
}

impl NeuronGroup {
    pub(crate) fn new(
        name: String,
        num_neurons: usize,
        snippet: Arc<Snippet>,
        params: BTreeMap<String, f64>,
        var_initialisers: BTreeMap<String, VarInit>,
        host_id: usize,
        default_location: VarLocation,
    ) -> Result<Self> {
        if num_neurons == 0 {
            return Err(ModelError::invalid_parameter(
                "num_neurons",
                "0",
                "> 0",
            ));
        }
        snippet.validate_params(&params)?;
        for var in var_initialisers.keys() {
            if !snippet.has_var(var) {
                return Err(ModelError::UnknownVariable {
                    snippet: snippet.name().to_string(),
                    var: var.clone(),
                });
            }
        }

        let var_locations = snippet
            .vars()
            .iter()
            .map(|v| (v.name.clone(), default_location))
            .collect();
        let var_implementations = snippet
            .vars()
            .iter()
            .map(|v| (v.name.clone(), VarImplementation::Individual))
            .collect();

        Ok(Self {
            name,
            num_neurons,
            snippet,
            params,
            host_id,
            derived_params: BTreeMap::new(),
            var_initialisers,
            var_locations,
            var_implementations,
            spike_location: default_location,
            spike_event_location: default_location,
            spike_time_location: default_location,
            num_delay_slots: 1,
            var_queue_required: BTreeSet::new(),
            spike_time_required: false,
            spike_event_required: false,
            sim_rng_required: false,
            init_rng_required: false,
            in_syn: Vec::new(),
            out_syn: Vec::new(),
            current_sources: Vec::new(),
            merged_in_syn: Vec::new(),
        })
    }

    /// Population name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of neurons
    pub fn num_neurons(&self) -> usize {
        self.num_neurons
    }

    /// The neuron snippet
    pub fn snippet(&self) -> &Snippet {
        &self.snippet
    }

    /// Parameter values
    pub fn params(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    /// Derived parameter values (filled by finalize)
    pub fn derived_params(&self) -> &BTreeMap<String, f64> {
        &self.derived_params
    }

    /// Variable initializers
    pub fn var_initialisers(&self) -> &BTreeMap<String, VarInit> {
        &self.var_initialisers
    }

    /// Host id used for cluster partitioning
    pub fn host_id(&self) -> usize {
        self.host_id
    }

    /// Number of delay slots in this population's spike ring buffer
    pub fn num_delay_slots(&self) -> usize {
        self.num_delay_slots
    }

    /// Does this population need a spike ring buffer at all?
    pub fn is_delay_required(&self) -> bool {
        self.num_delay_slots > 1
    }

    /// Does this variable need per-delay-slot history?
    pub fn is_var_queue_required(&self, var: &str) -> bool {
        self.var_queue_required.contains(var)
    }

    /// Does any downstream synapse read this population's spike times?
    pub fn is_spike_time_required(&self) -> bool {
        self.spike_time_required
    }

    /// Does any outgoing synapse group emit spike-like events?
    pub fn is_spike_event_required(&self) -> bool {
        self.spike_event_required
    }

    /// Does simulation-time code for this population draw random numbers?
    pub fn is_sim_rng_required(&self) -> bool {
        self.sim_rng_required
    }

    /// Does initialization of this population draw random numbers?
    pub fn is_init_rng_required(&self) -> bool {
        self.init_rng_required
    }

    /// Names of incoming synapse groups
    pub fn in_syn(&self) -> &[String] {
        &self.in_syn
    }

    /// Names of outgoing synapse groups
    pub fn out_syn(&self) -> &[String] {
        &self.out_syn
    }

    /// Names of current sources injecting into this population
    pub fn current_sources(&self) -> &[String] {
        &self.current_sources
    }

    /// Incoming input buffers after postsynaptic-model merging
    /// (filled by finalize)
    pub fn merged_in_syn(&self) -> &[MergedInSyn] {
        &self.merged_in_syn
    }

    /// Storage location of a variable
    pub fn var_location(&self, var: &str) -> VarLocation {
        self.var_locations.get(var).copied().unwrap_or_default()
    }

    /// Implementation strategy of a variable
    pub fn var_implementation(&self, var: &str) -> VarImplementation {
        self.var_implementations
            .get(var)
            .copied()
            .unwrap_or_default()
    }

    /// Storage location of the spike buffers
    pub fn spike_location(&self) -> VarLocation {
        self.spike_location
    }

    /// Storage location of the spike-event buffers
    pub fn spike_event_location(&self) -> VarLocation {
        self.spike_event_location
    }

    /// Storage location of the spike-time buffer
    pub fn spike_time_location(&self) -> VarLocation {
        self.spike_time_location
    }

    /// Set the storage location of a variable
    pub fn set_var_location(&mut self, var: &str, location: VarLocation) -> Result<()> {
        if !self.snippet.has_var(var) {
            return Err(ModelError::UnknownVariable {
                snippet: self.snippet.name().to_string(),
                var: var.to_string(),
            });
        }
        self.var_locations.insert(var.to_string(), location);
        Ok(())
    }

    /// Set the implementation strategy of a variable
    pub fn set_var_implementation(
        &mut self,
        var: &str,
        implementation: VarImplementation,
    ) -> Result<()> {
        if !self.snippet.has_var(var) {
            return Err(ModelError::UnknownVariable {
                snippet: self.snippet.name().to_string(),
                var: var.to_string(),
            });
        }
        self.var_implementations
            .insert(var.to_string(), implementation);
        Ok(())
    }

    /// Set the storage location of the spike buffers
    pub fn set_spike_location(&mut self, location: VarLocation) {
        self.spike_location = location;
    }

    /// The threshold condition, if the snippet declares one
    pub fn threshold_code(&self) -> Option<&str> {
        self.snippet.code(CodeRole::Threshold)
    }

    /// Materialize derived parameters and scan own code for RNG use
    pub(crate) fn finalize_derived(&mut self, dt: f64) -> Result<()> {
        let snippet = Arc::clone(&self.snippet);
        self.derived_params = snippet.compute_derived_params(&self.params, dt);
        for (name, value) in &self.derived_params {
            if !value.is_finite() {
                return Err(ModelError::InvalidDerivedParameter {
                    param: name.clone(),
                    group: self.name.clone(),
                });
            }
        }
        for init in self.var_initialisers.values_mut() {
            init.finalize(dt);
        }
        self.sim_rng_required = snippet.references_in(
            &[CodeRole::Sim, CodeRole::Threshold, CodeRole::Reset],
            "$(gennrand",
        );
        self.init_rng_required = self.var_initialisers.values().any(|i| i.requires_rng());
        Ok(())
    }

    /// Widen the delay ring buffer to hold at least `required` slots.
    /// Returns true if the buffer grew.
    pub(crate) fn check_num_delay_slots(&mut self, required: usize) -> bool {
        if required > self.num_delay_slots {
            self.num_delay_slots = required;
            true
        } else {
            false
        }
    }

    /// Mark a variable as needing per-delay-slot history.
    /// Returns true if it was not already marked.
    pub(crate) fn mark_var_queue_required(&mut self, var: &str) -> bool {
        self.var_queue_required.insert(var.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lif_snippet() -> Arc<Snippet> {
        Arc::new(
            Snippet::new("LIF")
                .with_params(["C", "TauM", "Vrest", "Vreset", "Vthresh"])
                .with_var("V", "scalar")
                .with_code(CodeRole::Sim, "$(V) += $(Isyn) * DT;")
                .with_code(CodeRole::Threshold, "$(V) >= $(Vthresh)")
                .with_code(CodeRole::Reset, "$(V) = $(Vreset);"),
        )
    }

    fn lif_params() -> BTreeMap<String, f64> {
        [
            ("C", 1.0),
            ("TauM", 20.0),
            ("Vrest", -65.0),
            ("Vreset", -65.0),
            ("Vthresh", -50.0),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn group() -> NeuronGroup {
        let mut inits = BTreeMap::new();
        inits.insert("V".to_string(), VarInit::constant(-65.0));
        NeuronGroup::new(
            "Exc".to_string(),
            100,
            lif_snippet(),
            lif_params(),
            inits,
            0,
            VarLocation::HOST_DEVICE,
        )
        .unwrap()
    }

    #[test]
    fn test_construction() {
        let ng = group();
        assert_eq!(ng.name(), "Exc");
        assert_eq!(ng.num_neurons(), 100);
        assert_eq!(ng.num_delay_slots(), 1);
        assert!(!ng.is_delay_required());
        assert!(!ng.is_var_queue_required("V"));
    }

    #[test]
    fn test_rejects_unknown_var_init() {
        let mut inits = BTreeMap::new();
        inits.insert("U".to_string(), VarInit::constant(0.0));
        let err = NeuronGroup::new(
            "Exc".to_string(),
            10,
            lif_snippet(),
            lif_params(),
            inits,
            0,
            VarLocation::HOST_DEVICE,
        );
        assert!(matches!(err, Err(ModelError::UnknownVariable { .. })));
    }

    #[test]
    fn test_rejects_empty_population() {
        let err = NeuronGroup::new(
            "Exc".to_string(),
            0,
            lif_snippet(),
            lif_params(),
            BTreeMap::new(),
            0,
            VarLocation::HOST_DEVICE,
        );
        assert!(err.is_err());
    }

    #[test]
    fn test_delay_widening() {
        let mut ng = group();
        assert!(ng.check_num_delay_slots(4));
        assert_eq!(ng.num_delay_slots(), 4);
        assert!(!ng.check_num_delay_slots(2));
        assert_eq!(ng.num_delay_slots(), 4);
        assert!(ng.is_delay_required());
    }

    #[test]
    fn test_var_location_override() {
        let mut ng = group();
        assert_eq!(ng.var_location("V"), VarLocation::HOST_DEVICE);
        ng.set_var_location("V", VarLocation::DEVICE).unwrap();
        assert_eq!(ng.var_location("V"), VarLocation::DEVICE);
        assert!(ng.set_var_location("U", VarLocation::DEVICE).is_err());
    }
}
