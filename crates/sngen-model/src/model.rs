//! The network model registry and its finalization pass

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::current_source::CurrentSource;
use crate::error::{ModelError, Result};
use crate::init::{SparseConnectivityInit, VarInit};
use crate::matrix::MatrixType;
use crate::neuron::{MergedInSyn, NeuronGroup};
use crate::snippet::{CodeRole, Snippet};
use crate::synapse::{PostsynapticInit, SynapseGroup, WeightUpdateInit};
use crate::vars::VarLocation;
use crate::Precision;

/// Per-synapse-group facts collected before delay propagation
struct SynapseScan {
    name: String,
    src: String,
    trg: String,
    delay_steps: u32,
    back_prop_delay_steps: u32,
    pre_queue_vars: Vec<String>,
    post_queue_vars: Vec<String>,
    pre_spike_time: bool,
    post_spike_time: bool,
    spike_event: bool,
    trg_sim_rng: bool,
}

/// The registry of neuron groups, synapse groups and current sources.
///
/// The model exclusively owns every group; groups refer to each other by
/// name and are resolved through the model. `finalize()` must be called
/// exactly once before code generation; it computes derived facts and
/// freezes the model. All registries iterate in name order, so repeated
/// generation runs over the same model produce byte-identical output.
#[derive(Debug)]
pub struct Model {
    name: String,
    precision: Precision,
    time_precision: Option<Precision>,
    dt: f64,
    seed: Option<u32>,
    timing: bool,
    default_var_location: VarLocation,
    default_egp_location: VarLocation,
    default_sparse_connectivity_location: VarLocation,
    default_narrow_sparse_ind: bool,
    merge_postsynaptic_models: bool,
    neuron_groups: BTreeMap<String, NeuronGroup>,
    synapse_groups: BTreeMap<String, SynapseGroup>,
    current_sources: BTreeMap<String, CurrentSource>,
    finalized: bool,
}

impl Model {
    /// Create an empty model
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            precision: Precision::Float,
            time_precision: None,
            dt: 1.0,
            seed: None,
            timing: false,
            default_var_location: VarLocation::HOST_DEVICE,
            default_egp_location: VarLocation::HOST_DEVICE,
            default_sparse_connectivity_location: VarLocation::HOST_DEVICE,
            default_narrow_sparse_ind: false,
            merge_postsynaptic_models: false,
            neuron_groups: BTreeMap::new(),
            synapse_groups: BTreeMap::new(),
            current_sources: BTreeMap::new(),
            finalized: false,
        }
    }

    /// Rename the model
    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    /// Set the floating-point precision of model state
    pub fn set_precision(&mut self, precision: Precision) {
        self.precision = precision;
    }

    /// Set a separate precision for time variables
    pub fn set_time_precision(&mut self, precision: Precision) {
        self.time_precision = Some(precision);
    }

    /// Set the simulation timestep handed to derived-parameter functions
    pub fn set_dt(&mut self, dt: f64) -> Result<()> {
        if !(dt > 0.0) {
            return Err(ModelError::invalid_parameter(
                "dt",
                dt.to_string(),
                "> 0.0",
            ));
        }
        self.dt = dt;
        Ok(())
    }

    /// Enable or disable kernel timing instrumentation
    pub fn set_timing(&mut self, timing: bool) {
        self.timing = timing;
    }

    /// Set the RNG seed baked into generated initialization code
    pub fn set_seed(&mut self, seed: u32) {
        self.seed = Some(seed);
    }

    /// Set the default storage location for variables
    pub fn set_default_var_location(&mut self, location: VarLocation) {
        self.default_var_location = location;
    }

    /// Set the default storage location for extra global parameters
    pub fn set_default_extra_global_param_location(&mut self, location: VarLocation) {
        self.default_egp_location = location;
    }

    /// Set the default storage location for sparse connectivity
    pub fn set_default_sparse_connectivity_location(&mut self, location: VarLocation) {
        self.default_sparse_connectivity_location = location;
    }

    /// Use 16-bit column indices for sparse connectivity by default
    pub fn set_default_narrow_sparse_ind(&mut self, narrow: bool) {
        self.default_narrow_sparse_ind = narrow;
    }

    /// Allow compatible postsynaptic models to share input buffers
    pub fn set_merge_postsynaptic_models(&mut self, merge: bool) {
        self.merge_postsynaptic_models = merge;
    }

    /// Model name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Floating-point precision of model state
    pub fn precision(&self) -> Precision {
        self.precision
    }

    /// Precision of time variables (falls back to the model precision)
    pub fn time_precision(&self) -> Precision {
        self.time_precision.unwrap_or(self.precision)
    }

    /// Simulation timestep
    pub fn dt(&self) -> f64 {
        self.dt
    }

    /// RNG seed, if set
    pub fn seed(&self) -> Option<u32> {
        self.seed
    }

    /// Is kernel timing instrumentation enabled?
    pub fn is_timing_enabled(&self) -> bool {
        self.timing
    }

    /// Default storage location for extra global parameters
    pub fn default_extra_global_param_location(&self) -> VarLocation {
        self.default_egp_location
    }

    /// Has `finalize()` completed?
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// C type of the `scalar` typedef
    pub fn scalar_type(&self) -> &'static str {
        self.precision.c_type()
    }

    /// C type of time values
    pub fn time_type(&self) -> &'static str {
        self.time_precision().c_type()
    }

    /// Neuron populations in name order
    pub fn neuron_groups(&self) -> impl Iterator<Item = &NeuronGroup> {
        self.neuron_groups.values()
    }

    /// Synapse populations in name order
    pub fn synapse_groups(&self) -> impl Iterator<Item = &SynapseGroup> {
        self.synapse_groups.values()
    }

    /// Current sources in name order
    pub fn current_sources(&self) -> impl Iterator<Item = &CurrentSource> {
        self.current_sources.values()
    }

    /// Look up a neuron population
    pub fn neuron_group(&self, name: &str) -> Option<&NeuronGroup> {
        self.neuron_groups.get(name)
    }

    /// Look up a synapse population
    pub fn synapse_group(&self, name: &str) -> Option<&SynapseGroup> {
        self.synapse_groups.get(name)
    }

    /// Look up a current source
    pub fn current_source(&self, name: &str) -> Option<&CurrentSource> {
        self.current_sources.get(name)
    }

    /// Mutable lookup of a neuron population (pre-finalize configuration)
    pub fn neuron_group_mut(&mut self, name: &str) -> Option<&mut NeuronGroup> {
        self.neuron_groups.get_mut(name)
    }

    /// Mutable lookup of a synapse population (pre-finalize configuration)
    pub fn synapse_group_mut(&mut self, name: &str) -> Option<&mut SynapseGroup> {
        self.synapse_groups.get_mut(name)
    }

    /// Source neuron population of a synapse group
    pub fn src_neuron_group(&self, sg: &SynapseGroup) -> &NeuronGroup {
        &self.neuron_groups[sg.src()]
    }

    /// Target neuron population of a synapse group
    pub fn trg_neuron_group(&self, sg: &SynapseGroup) -> &NeuronGroup {
        &self.neuron_groups[sg.trg()]
    }

    /// Does any population or initializer need a device-side RNG?
    pub fn is_device_rng_required(&self) -> bool {
        self.neuron_groups
            .values()
            .any(|ng| ng.is_sim_rng_required() || ng.is_init_rng_required())
            || self
                .synapse_groups
                .values()
                .any(|sg| sg.is_init_rng_required() || sg.matrix_type().is_procedural())
            || self
                .current_sources
                .values()
                .any(|cs| cs.is_init_rng_required())
    }

    fn check_not_finalized(&self) -> Result<()> {
        if self.finalized {
            return Err(ModelError::AlreadyFinalized {
                name: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Add a neuron population.
    ///
    /// `var_inits` must cover a subset of the snippet's variables;
    /// uncovered variables are implicitly `VarInit::uninitialised()`.
    pub fn add_neuron_population(
        &mut self,
        name: impl Into<String>,
        num_neurons: usize,
        snippet: Arc<Snippet>,
        params: BTreeMap<String, f64>,
        var_inits: BTreeMap<String, VarInit>,
        host_id: usize,
    ) -> Result<&mut NeuronGroup> {
        self.check_not_finalized()?;
        let name = name.into();
        if self.neuron_groups.contains_key(&name) {
            return Err(ModelError::duplicate_name("neuron population", name));
        }

        let mut var_inits = var_inits;
        for var in snippet.vars() {
            var_inits
                .entry(var.name.clone())
                .or_insert_with(VarInit::uninitialised);
        }

        let ng = NeuronGroup::new(
            name.clone(),
            num_neurons,
            snippet,
            params,
            var_inits,
            host_id,
            self.default_var_location,
        )?;
        Ok(self.neuron_groups.entry(name).or_insert(ng))
    }

    /// Add a synapse population connecting two existing neuron populations
    #[allow(clippy::too_many_arguments)]
    pub fn add_synapse_population(
        &mut self,
        name: impl Into<String>,
        matrix: MatrixType,
        delay_steps: u32,
        src: impl Into<String>,
        trg: impl Into<String>,
        wu: WeightUpdateInit,
        ps: PostsynapticInit,
        connectivity_init: SparseConnectivityInit,
    ) -> Result<&mut SynapseGroup> {
        self.check_not_finalized()?;
        let name = name.into();
        let src = src.into();
        let trg = trg.into();
        if self.synapse_groups.contains_key(&name) {
            return Err(ModelError::duplicate_name("synapse population", name));
        }
        if !self.neuron_groups.contains_key(&src) {
            return Err(ModelError::unknown_neuron_group(src, name));
        }
        if !self.neuron_groups.contains_key(&trg) {
            return Err(ModelError::unknown_neuron_group(trg, name));
        }

        let mut wu = wu;
        for var in wu.snippet.vars() {
            wu.var_inits
                .entry(var.name.clone())
                .or_insert_with(VarInit::uninitialised);
        }
        for var in wu.snippet.pre_vars() {
            wu.pre_var_inits
                .entry(var.name.clone())
                .or_insert_with(VarInit::uninitialised);
        }
        for var in wu.snippet.post_vars() {
            wu.post_var_inits
                .entry(var.name.clone())
                .or_insert_with(VarInit::uninitialised);
        }
        let mut ps = ps;
        for var in ps.snippet.vars() {
            ps.var_inits
                .entry(var.name.clone())
                .or_insert_with(VarInit::uninitialised);
        }

        let src_num = self.neuron_groups[&src].num_neurons();
        let trg_num = self.neuron_groups[&trg].num_neurons();
        let sg = SynapseGroup::new(
            name.clone(),
            matrix,
            delay_steps,
            src.clone(),
            trg.clone(),
            wu,
            ps,
            connectivity_init,
            src_num,
            trg_num,
            self.default_var_location,
            self.default_sparse_connectivity_location,
            self.default_narrow_sparse_ind,
        )?;

        self.neuron_groups
            .get_mut(&src)
            .expect("validated above")
            .out_syn
            .push(name.clone());
        self.neuron_groups
            .get_mut(&trg)
            .expect("validated above")
            .in_syn
            .push(name.clone());
        Ok(self.synapse_groups.entry(name).or_insert(sg))
    }

    /// Add a current source injecting into an existing neuron population
    pub fn add_current_source(
        &mut self,
        name: impl Into<String>,
        snippet: Arc<Snippet>,
        target: impl Into<String>,
        params: BTreeMap<String, f64>,
        var_inits: BTreeMap<String, VarInit>,
    ) -> Result<&mut CurrentSource> {
        self.check_not_finalized()?;
        let name = name.into();
        let target = target.into();
        if self.current_sources.contains_key(&name) {
            return Err(ModelError::duplicate_name("current source", name));
        }
        if !self.neuron_groups.contains_key(&target) {
            return Err(ModelError::unknown_neuron_group(target, name));
        }

        let mut var_inits = var_inits;
        for var in snippet.vars() {
            var_inits
                .entry(var.name.clone())
                .or_insert_with(VarInit::uninitialised);
        }
        let cs = CurrentSource::new(
            name.clone(),
            snippet,
            target.clone(),
            params,
            var_inits,
            self.default_var_location,
        )?;
        self.neuron_groups
            .get_mut(&target)
            .expect("validated above")
            .current_sources
            .push(name.clone());
        Ok(self.current_sources.entry(name).or_insert(cs))
    }

    /// Compute derived facts and freeze the model.
    ///
    /// Runs derived-parameter materialization, delay/queue propagation and
    /// postsynaptic-model merging. Calling it again after success is a
    /// no-op.
    pub fn finalize(&mut self) -> Result<()> {
        if self.finalized {
            return Ok(());
        }
        let dt = self.dt;
        log::debug!(
            "Finalizing model '{}': {} neuron groups, {} synapse groups, {} current sources",
            self.name,
            self.neuron_groups.len(),
            self.synapse_groups.len(),
            self.current_sources.len()
        );

        // 1. Materialize derived parameters everywhere
        for ng in self.neuron_groups.values_mut() {
            ng.finalize_derived(dt)?;
        }
        for sg in self.synapse_groups.values_mut() {
            sg.finalize_derived(dt)?;
        }
        for cs in self.current_sources.values_mut() {
            cs.finalize_derived(dt)?;
        }

        // 2. Scan weight-update code for cross-population references and
        // propagate delay / queue / spike-time requirements
        let scans = self.scan_synapse_groups();
        self.propagate_delays(&scans)?;

        // 3. RNG requirements flowing through the neuron kernel
        let cs_rng: Vec<String> = self
            .current_sources
            .values()
            .filter(|cs| {
                cs.injection_code()
                    .map_or(false, |c| c.contains("$(gennrand"))
            })
            .map(|cs| cs.target().to_string())
            .collect();
        for target in cs_rng {
            self.neuron_groups
                .get_mut(&target)
                .expect("validated at add")
                .sim_rng_required = true;
        }

        // 4. Bucket incoming synapses into shared input buffers
        self.merge_postsynaptic();

        self.finalized = true;
        Ok(())
    }

    fn scan_synapse_groups(&self) -> Vec<SynapseScan> {
        let sim_roles = [
            CodeRole::Sim,
            CodeRole::Event,
            CodeRole::EventThreshold,
            CodeRole::LearnPost,
            CodeRole::SynapseDynamics,
        ];
        self.synapse_groups
            .values()
            .map(|sg| {
                let wu = sg.wu_snippet();
                let src = self.src_neuron_group(sg);
                let trg = self.trg_neuron_group(sg);

                let pre_queue_vars = src
                    .snippet()
                    .vars()
                    .iter()
                    .filter(|v| wu.references_in(&sim_roles, &format!("$({}_pre)", v.name)))
                    .map(|v| v.name.clone())
                    .collect();
                let post_queue_vars = trg
                    .snippet()
                    .vars()
                    .iter()
                    .filter(|v| wu.references_in(&sim_roles, &format!("$({}_post)", v.name)))
                    .map(|v| v.name.clone())
                    .collect();

                let ps_rng = sg
                    .ps_snippet()
                    .references_in(&[CodeRole::ApplyInput, CodeRole::Decay], "$(gennrand");

                SynapseScan {
                    name: sg.name().to_string(),
                    src: sg.src().to_string(),
                    trg: sg.trg().to_string(),
                    delay_steps: sg.delay_steps(),
                    back_prop_delay_steps: sg.back_prop_delay_steps(),
                    pre_queue_vars,
                    post_queue_vars,
                    pre_spike_time: wu.references_in(&sim_roles, "$(sT_pre)"),
                    post_spike_time: wu.references_in(&sim_roles, "$(sT_post)"),
                    spike_event: sg.is_spike_event_required(),
                    trg_sim_rng: ps_rng,
                }
            })
            .collect()
    }

    fn propagate_delays(&mut self, scans: &[SynapseScan]) -> Result<()> {
        // Requirements flow only one hop (synapse -> adjacent neuron
        // group), so a single application reaches the fixed point; the
        // bounded loop turns any future propagation cycle into a
        // diagnostic instead of a hang.
        let bound = self.synapse_groups.len() + 2;
        let mut iterations = 0;
        loop {
            let mut changed: Option<String> = None;
            for scan in scans {
                if scan.delay_steps > 0 {
                    let src = self
                        .neuron_groups
                        .get_mut(&scan.src)
                        .expect("validated at add");
                    if src.check_num_delay_slots(scan.delay_steps as usize + 1) {
                        changed = Some(scan.src.clone());
                    }
                    for var in &scan.pre_queue_vars {
                        if src.mark_var_queue_required(var) {
                            changed = Some(scan.src.clone());
                        }
                    }
                }
                if scan.back_prop_delay_steps > 0 {
                    let trg = self
                        .neuron_groups
                        .get_mut(&scan.trg)
                        .expect("validated at add");
                    if trg.check_num_delay_slots(scan.back_prop_delay_steps as usize + 1) {
                        changed = Some(scan.trg.clone());
                    }
                    for var in &scan.post_queue_vars {
                        if trg.mark_var_queue_required(var) {
                            changed = Some(scan.trg.clone());
                        }
                    }
                }

                let src = self
                    .neuron_groups
                    .get_mut(&scan.src)
                    .expect("validated at add");
                if scan.pre_spike_time && !src.spike_time_required {
                    src.spike_time_required = true;
                    changed = Some(scan.src.clone());
                }
                if scan.spike_event && !src.spike_event_required {
                    src.spike_event_required = true;
                    changed = Some(scan.src.clone());
                }
                let trg = self
                    .neuron_groups
                    .get_mut(&scan.trg)
                    .expect("validated at add");
                if scan.post_spike_time && !trg.spike_time_required {
                    trg.spike_time_required = true;
                    changed = Some(scan.trg.clone());
                }
                if scan.trg_sim_rng && !trg.sim_rng_required {
                    trg.sim_rng_required = true;
                    changed = Some(scan.trg.clone());
                }
            }

            iterations += 1;
            match changed {
                None => return Ok(()),
                Some(group) if iterations > bound => {
                    return Err(ModelError::DelayCycle { iterations, group });
                }
                Some(name) => {
                    log::debug!("Delay propagation pass {} touched '{}'", iterations, name);
                }
            }
        }
    }

    fn merge_postsynaptic(&mut self) {
        let ng_names: Vec<String> = self.neuron_groups.keys().cloned().collect();
        for ng_name in ng_names {
            let in_syn = self.neuron_groups[&ng_name].in_syn.clone();
            let mut buckets: Vec<MergedInSyn> = Vec::new();
            for sg_name in in_syn {
                let mut placed = false;
                if self.merge_postsynaptic_models {
                    let sg = &self.synapse_groups[&sg_name];
                    for bucket in &mut buckets {
                        let head = &self.synapse_groups[&bucket.target];
                        if sg.can_ps_be_merged_with(head) {
                            bucket.contributors.push(sg_name.clone());
                            placed = true;
                            break;
                        }
                    }
                }
                if !placed {
                    buckets.push(MergedInSyn {
                        target: sg_name.clone(),
                        contributors: vec![sg_name],
                    });
                }
            }

            for bucket in &buckets {
                let merged = bucket.is_merged();
                if merged {
                    log::debug!(
                        "Merged postsynaptic input of {:?} into '{}'",
                        bucket.contributors,
                        bucket.target
                    );
                }
                for contributor in &bucket.contributors {
                    let sg = self
                        .synapse_groups
                        .get_mut(contributor)
                        .expect("contributors come from the registry");
                    sg.ps_model_merged = merged;
                    sg.ps_target = bucket.target.clone();
                }
            }
            self.neuron_groups
                .get_mut(&ng_name)
                .expect("iterating registry keys")
                .merged_in_syn = buckets;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snippet::CodeRole;

    fn lif() -> Arc<Snippet> {
        Arc::new(
            Snippet::new("LIF")
                .with_param("Vthresh")
                .with_var("V", "scalar")
                .with_code(CodeRole::Sim, "$(V) += $(Isyn) * DT;")
                .with_code(CodeRole::Threshold, "$(V) >= $(Vthresh)")
                .with_code(CodeRole::Reset, "$(V) = -65.0;"),
        )
    }

    fn lif_params() -> BTreeMap<String, f64> {
        [("Vthresh".to_string(), -50.0)].into_iter().collect()
    }

    fn delta_curr() -> Arc<Snippet> {
        Arc::new(Snippet::new("DeltaCurr").with_code(CodeRole::ApplyInput, "$(Isyn) += $(inSyn);"))
    }

    fn static_pulse_pre() -> Arc<Snippet> {
        Arc::new(
            Snippet::new("StaticPulsePre")
                .with_var("g", "scalar")
                .with_code(CodeRole::Sim, "$(addToInSyn, $(g) * $(V_pre));"),
        )
    }

    fn two_populations() -> Model {
        let mut model = Model::new("test");
        model
            .add_neuron_population("A", 16, lif(), lif_params(), BTreeMap::new(), 0)
            .unwrap();
        model
            .add_neuron_population("B", 8, lif(), lif_params(), BTreeMap::new(), 0)
            .unwrap();
        model
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut model = two_populations();
        let err = model.add_neuron_population("A", 4, lif(), lif_params(), BTreeMap::new(), 0);
        assert!(matches!(err, Err(ModelError::DuplicateName { .. })));
        // Model stays usable
        assert!(model
            .add_neuron_population("C", 4, lif(), lif_params(), BTreeMap::new(), 0)
            .is_ok());
    }

    #[test]
    fn test_unknown_target_rejected() {
        let mut model = two_populations();
        let err = model.add_synapse_population(
            "S",
            MatrixType::DENSE_INDIVIDUAL,
            0,
            "A",
            "Missing",
            WeightUpdateInit::new(static_pulse_pre(), BTreeMap::new())
                .with_var_init("g", VarInit::constant(0.1)),
            PostsynapticInit::new(delta_curr(), BTreeMap::new()),
            SparseConnectivityInit::uninitialised(),
        );
        assert!(matches!(err, Err(ModelError::UnknownNeuronGroup { .. })));
    }

    #[test]
    fn test_delay_widening_and_queueing() {
        let mut model = two_populations();
        model
            .add_synapse_population(
                "S",
                MatrixType::DENSE_INDIVIDUAL,
                3,
                "A",
                "B",
                WeightUpdateInit::new(static_pulse_pre(), BTreeMap::new())
                    .with_var_init("g", VarInit::constant(0.1)),
                PostsynapticInit::new(delta_curr(), BTreeMap::new()),
                SparseConnectivityInit::uninitialised(),
            )
            .unwrap();
        model.finalize().unwrap();

        let a = model.neuron_group("A").unwrap();
        assert_eq!(a.num_delay_slots(), 4);
        assert!(a.is_var_queue_required("V"));
        assert!(a.is_delay_required());

        let b = model.neuron_group("B").unwrap();
        assert_eq!(b.num_delay_slots(), 1);
        assert!(!b.is_var_queue_required("V"));
    }

    #[test]
    fn test_no_queue_without_delay() {
        let mut model = two_populations();
        model
            .add_synapse_population(
                "S",
                MatrixType::DENSE_INDIVIDUAL,
                0,
                "A",
                "B",
                WeightUpdateInit::new(static_pulse_pre(), BTreeMap::new())
                    .with_var_init("g", VarInit::constant(0.1)),
                PostsynapticInit::new(delta_curr(), BTreeMap::new()),
                SparseConnectivityInit::uninitialised(),
            )
            .unwrap();
        model.finalize().unwrap();

        let a = model.neuron_group("A").unwrap();
        assert_eq!(a.num_delay_slots(), 1);
        assert!(!a.is_var_queue_required("V"));
    }

    #[test]
    fn test_finalize_idempotent() {
        let mut model = two_populations();
        model.finalize().unwrap();
        assert!(model.is_finalized());
        // Second call is a no-op
        model.finalize().unwrap();
        // Mutation after finalize is rejected
        let err = model.add_neuron_population("C", 4, lif(), lif_params(), BTreeMap::new(), 0);
        assert!(matches!(err, Err(ModelError::AlreadyFinalized { .. })));
    }

    #[test]
    fn test_psm_merging() {
        let static_pulse = Arc::new(
            Snippet::new("StaticPulse")
                .with_var("g", "scalar")
                .with_code(CodeRole::Sim, "$(addToInSyn, $(g));"),
        );
        let mut model = two_populations();
        model
            .add_neuron_population("C", 16, lif(), lif_params(), BTreeMap::new(), 0)
            .unwrap();
        model.set_merge_postsynaptic_models(true);
        for (name, src) in [("S1", "A"), ("S2", "C")] {
            model
                .add_synapse_population(
                    name,
                    MatrixType::DENSE_INDIVIDUAL,
                    0,
                    src,
                    "B",
                    WeightUpdateInit::new(Arc::clone(&static_pulse), BTreeMap::new())
                        .with_var_init("g", VarInit::constant(0.1)),
                    PostsynapticInit::new(delta_curr(), BTreeMap::new()),
                    SparseConnectivityInit::uninitialised(),
                )
                .unwrap();
        }
        model.finalize().unwrap();

        let b = model.neuron_group("B").unwrap();
        assert_eq!(b.merged_in_syn().len(), 1);
        assert!(b.merged_in_syn()[0].is_merged());
        assert_eq!(b.merged_in_syn()[0].target, "S1");

        for name in ["S1", "S2"] {
            let sg = model.synapse_group(name).unwrap();
            assert!(sg.is_ps_model_merged());
            assert_eq!(sg.ps_target(), "S1");
        }
    }

    #[test]
    fn test_psm_not_merged_when_disabled() {
        let static_pulse = Arc::new(
            Snippet::new("StaticPulse")
                .with_var("g", "scalar")
                .with_code(CodeRole::Sim, "$(addToInSyn, $(g));"),
        );
        let mut model = two_populations();
        for name in ["S1", "S2"] {
            model
                .add_synapse_population(
                    name,
                    MatrixType::DENSE_INDIVIDUAL,
                    0,
                    "A",
                    "B",
                    WeightUpdateInit::new(Arc::clone(&static_pulse), BTreeMap::new())
                        .with_var_init("g", VarInit::constant(0.1)),
                    PostsynapticInit::new(delta_curr(), BTreeMap::new()),
                    SparseConnectivityInit::uninitialised(),
                )
                .unwrap();
        }
        model.finalize().unwrap();

        let b = model.neuron_group("B").unwrap();
        assert_eq!(b.merged_in_syn().len(), 2);
        assert!(!b.merged_in_syn()[0].is_merged());
        assert!(!model.synapse_group("S1").unwrap().is_ps_model_merged());
    }

    #[test]
    fn test_derived_params_materialized() {
        fn expd(params: &BTreeMap<String, f64>, dt: f64) -> f64 {
            (-dt / params["tau"]).exp()
        }
        let exp_curr = Arc::new(
            Snippet::new("ExpCurr")
                .with_param("tau")
                .with_derived_param("expDecay", expd)
                .with_code(CodeRole::ApplyInput, "$(Isyn) += $(inSyn);")
                .with_code(CodeRole::Decay, "$(inSyn) *= $(expDecay);"),
        );
        let static_pulse = Arc::new(
            Snippet::new("StaticPulse")
                .with_var("g", "scalar")
                .with_code(CodeRole::Sim, "$(addToInSyn, $(g));"),
        );

        let mut model = two_populations();
        model.set_dt(0.5).unwrap();
        model
            .add_synapse_population(
                "S",
                MatrixType::DENSE_INDIVIDUAL,
                0,
                "A",
                "B",
                WeightUpdateInit::new(static_pulse, BTreeMap::new())
                    .with_var_init("g", VarInit::constant(0.1)),
                PostsynapticInit::new(
                    exp_curr,
                    [("tau".to_string(), 5.0)].into_iter().collect(),
                ),
                SparseConnectivityInit::uninitialised(),
            )
            .unwrap();
        model.finalize().unwrap();

        let sg = model.synapse_group("S").unwrap();
        let expected = (-0.5f64 / 5.0).exp();
        assert!((sg.ps_derived_params()["expDecay"] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_current_source_wiring() {
        let dc = Arc::new(
            Snippet::new("DC")
                .with_param("amp")
                .with_code(CodeRole::Injection, "$(injectCurrent, $(amp));"),
        );
        let mut model = two_populations();
        model
            .add_current_source(
                "Stim",
                dc,
                "A",
                [("amp".to_string(), 0.7)].into_iter().collect(),
                BTreeMap::new(),
            )
            .unwrap();
        model.finalize().unwrap();

        assert_eq!(model.neuron_group("A").unwrap().current_sources(), &[
            "Stim".to_string()
        ]);
    }
}
