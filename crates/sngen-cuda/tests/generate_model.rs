//! End-to-end generation over a realistic two-population model: every
//! artifact generates without unresolved placeholders, literals are
//! coerced to the model precision, delayed state goes through queue
//! offsets and repeated runs are byte-identical.

use std::collections::BTreeMap;
use std::sync::Arc;

use sngen_codegen::{
    generate_init, generate_makefile_fragment, generate_neuron_update, generate_runner,
    generate_synapse_update,
};
use sngen_cuda::CudaBackend;
use sngen_model::{
    CodeRole, MatrixType, Model, PostsynapticInit, Precision, Snippet, SparseConnectivityInit,
    VarInit, WeightUpdateInit,
};

fn lif() -> Arc<Snippet> {
    fn exp_tc(params: &BTreeMap<String, f64>, dt: f64) -> f64 {
        (-dt / params["TauM"]).exp()
    }
    fn rmembrane(params: &BTreeMap<String, f64>, _dt: f64) -> f64 {
        params["TauM"] / params["C"]
    }
    Arc::new(
        Snippet::new("LIF")
            .with_params(["C", "TauM", "Vrest", "Vreset", "Vthresh"])
            .with_derived_param("ExpTC", exp_tc)
            .with_derived_param("Rmembrane", rmembrane)
            .with_var("V", "scalar")
            .with_code(
                CodeRole::Sim,
                "scalar alpha = $(Isyn) * $(Rmembrane) + $(Vrest);\n\
                 $(V) = alpha - ($(ExpTC) * (alpha - $(V)));",
            )
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

fn static_pulse() -> Arc<Snippet> {
    Arc::new(
        Snippet::new("StaticPulse")
            .with_var("g", "scalar")
            .with_code(CodeRole::Sim, "$(addToInSyn, $(g));"),
    )
}

fn static_pulse_pre() -> Arc<Snippet> {
    Arc::new(
        Snippet::new("StaticPulseVPre")
            .with_var("g", "scalar")
            .with_code(CodeRole::Sim, "$(addToInSyn, $(g) * $(V_pre));"),
    )
}

fn exp_curr() -> Arc<Snippet> {
    fn exp_decay(params: &BTreeMap<String, f64>, dt: f64) -> f64 {
        (-dt / params["tau"]).exp()
    }
    Arc::new(
        Snippet::new("ExpCurr")
            .with_param("tau")
            .with_derived_param("expDecay", exp_decay)
            .with_code(CodeRole::ApplyInput, "$(Isyn) += $(inSyn);")
            .with_code(CodeRole::Decay, "$(inSyn) *= $(expDecay);"),
    )
}

fn dc_source() -> Arc<Snippet> {
    Arc::new(
        Snippet::new("DC")
            .with_param("amp")
            .with_code(CodeRole::Injection, "$(injectCurrent, $(amp));"),
    )
}

fn fixed_probability() -> Arc<Snippet> {
    fn prob_log(params: &BTreeMap<String, f64>, _dt: f64) -> f64 {
        (1.0 - params["prob"]).ln()
    }
    fn max_row(_pre: usize, num_post: usize, _params: &BTreeMap<String, f64>) -> u32 {
        num_post as u32
    }
    Arc::new(
        Snippet::new("FixedProbability")
            .with_param("prob")
            .with_derived_param("probLogRecip", prob_log)
            .with_row_build_state_var("prevJ", "int", "-1")
            .with_code(
                CodeRole::RowBuild,
                "const scalar u = $(gennrand_uniform);\n\
                 prevJ += (1 + (int) (log(u) / $(probLogRecip)));\n\
                 if (prevJ < $(num_post)) {\n\
                    $(addSynapse, prevJ);\n\
                 }\n\
                 else {\n\
                    $(endRow);\n\
                 }",
            )
            .with_calc_max_row_length(max_row),
    )
}

/// Model with a delayed dense projection, a sparse projection and a DC
/// current source
fn build_model(precision: Precision) -> Model {
    let mut model = Model::new("testnet");
    model.set_precision(precision);
    model.set_dt(0.1).unwrap();
    model.set_seed(1234);

    model
        .add_neuron_population("Exc", 64, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();
    model
        .add_neuron_population("Inh", 16, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();

    model
        .add_synapse_population(
            "ExcInh",
            MatrixType::DENSE_INDIVIDUAL,
            3,
            "Exc",
            "Inh",
            WeightUpdateInit::new(static_pulse_pre(), BTreeMap::new())
                .with_var_init("g", VarInit::constant(0.05)),
            PostsynapticInit::new(
                exp_curr(),
                [("tau".to_string(), 5.0)].into_iter().collect(),
            ),
            SparseConnectivityInit::uninitialised(),
        )
        .unwrap();

    model
        .add_synapse_population(
            "InhExc",
            MatrixType::SPARSE_INDIVIDUAL,
            0,
            "Inh",
            "Exc",
            WeightUpdateInit::new(static_pulse(), BTreeMap::new())
                .with_var_init("g", VarInit::constant(-0.25)),
            PostsynapticInit::new(
                exp_curr(),
                [("tau".to_string(), 10.0)].into_iter().collect(),
            ),
            SparseConnectivityInit::new(
                fixed_probability(),
                [("prob".to_string(), 0.1)].into_iter().collect(),
            )
            .unwrap(),
        )
        .unwrap();

    model
        .add_current_source(
            "Stim",
            dc_source(),
            "Exc",
            [("amp".to_string(), 0.7)].into_iter().collect(),
            BTreeMap::new(),
        )
        .unwrap();

    model.finalize().unwrap();
    model
}

struct Artifacts {
    neuron: String,
    synapse: String,
    init: String,
    definitions: String,
    definitions_internal: String,
    runner: String,
    makefile: String,
}

fn generate_all(model: &Model) -> Artifacts {
    let backend = CudaBackend::new();
    let mut artifacts = Artifacts {
        neuron: String::new(),
        synapse: String::new(),
        init: String::new(),
        definitions: String::new(),
        definitions_internal: String::new(),
        runner: String::new(),
        makefile: String::new(),
    };
    generate_neuron_update(&mut artifacts.neuron, model, &backend).unwrap();
    generate_synapse_update(&mut artifacts.synapse, model, &backend).unwrap();
    generate_init(&mut artifacts.init, model, &backend).unwrap();
    generate_runner(
        &mut artifacts.definitions,
        &mut artifacts.definitions_internal,
        &mut artifacts.runner,
        model,
        &backend,
    )
    .unwrap();
    generate_makefile_fragment(&mut artifacts.makefile, &backend).unwrap();
    artifacts
}

#[test]
fn no_unresolved_placeholders_reach_any_artifact() {
    let model = build_model(Precision::Float);
    let artifacts = generate_all(&model);
    for (name, text) in [
        ("neuron", &artifacts.neuron),
        ("synapse", &artifacts.synapse),
        ("init", &artifacts.init),
        ("definitions", &artifacts.definitions),
        ("runner", &artifacts.runner),
    ] {
        assert!(
            !text.contains("$("),
            "unresolved placeholder in {} artifact",
            name
        );
        assert!(!text.is_empty(), "{} artifact is empty", name);
    }
}

#[test]
fn dc_current_source_injects_full_precision_literal() {
    // Double precision keeps the bare literal
    let model = build_model(Precision::Double);
    let artifacts = generate_all(&model);
    assert!(artifacts.neuron.contains("Isyn += (0.7);"));

    // Single precision suffixes it
    let model = build_model(Precision::Float);
    let artifacts = generate_all(&model);
    assert!(artifacts.neuron.contains("Isyn += (0.7f);"));
}

#[test]
fn delayed_population_reads_and_writes_through_queue_offsets() {
    let model = build_model(Precision::Float);

    // Finalize widened the source population (scenario: delay 3 + V_pre)
    let exc = model.neuron_group("Exc").unwrap();
    assert_eq!(exc.num_delay_slots(), 4);
    assert!(exc.is_var_queue_required("V"));

    let artifacts = generate_all(&model);
    assert!(artifacts.neuron.contains("readDelayOffset"));
    assert!(artifacts.neuron.contains("writeDelayOffset + "));
    assert!(artifacts
        .neuron
        .contains("dd_spkQuePtrExc = (dd_spkQuePtrExc + 1) % 4;"));
    // The delayed projection reads presynaptic state through the slot
    assert!(artifacts.synapse.contains("preReadDelayOffset"));
}

#[test]
fn undelayed_population_uses_raw_indexing() {
    let model = build_model(Precision::Float);
    let artifacts = generate_all(&model);
    // Inh has no delayed outgoing projection: raw neuron index access
    assert!(artifacts.neuron.contains("scalar lV = dd_VInh[lid];"));
    assert!(artifacts.neuron.contains("dd_VInh[lid] = lV;"));
}

#[test]
fn sparse_connectivity_gets_row_build_driver() {
    let model = build_model(Precision::Float);
    let artifacts = generate_all(&model);
    assert!(artifacts.init.contains("while (true)"));
    assert!(artifacts.init.contains("dd_rowLengthInhExc[lid] = rowBuildIdx;"));
    assert!(artifacts.init.contains("break;"));
    // Uniform draw from the connectivity rule went through curand
    assert!(artifacts.init.contains("curand_uniform"));
}

#[test]
fn spike_times_use_sentinel_and_exist_only_when_required() {
    let model = build_model(Precision::Float);
    let artifacts = generate_all(&model);
    // No snippet references $(sT_pre)/$(sT_post): no spike-time buffers
    assert!(!artifacts.init.contains("TIME_MAX"));

    let mut model = Model::new("st");
    model.set_dt(0.1).unwrap();
    model
        .add_neuron_population("A", 8, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();
    model
        .add_neuron_population("B", 8, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();
    let stdp_like = Arc::new(
        Snippet::new("STDPWindow")
            .with_var("g", "scalar")
            .with_code(
                CodeRole::Sim,
                "$(addToInSyn, $(g));\n$(g) += 0.001 * exp(($(sT_pre) - $(t)) / 20.0);",
            ),
    );
    model
        .add_synapse_population(
            "S",
            MatrixType::DENSE_INDIVIDUAL,
            0,
            "A",
            "B",
            WeightUpdateInit::new(stdp_like, BTreeMap::new())
                .with_var_init("g", VarInit::constant(0.1)),
            PostsynapticInit::new(exp_curr(), [("tau".to_string(), 5.0)].into_iter().collect()),
            SparseConnectivityInit::uninitialised(),
        )
        .unwrap();
    model.finalize().unwrap();
    assert!(model.neuron_group("A").unwrap().is_spike_time_required());

    let artifacts = generate_all(&model);
    assert!(artifacts.init.contains("dd_sTA"));
    assert!(artifacts.init.contains("-TIME_MAX"));
    assert!(artifacts.neuron.contains("dd_sTA[lid] = t;"));
}

#[test]
fn merged_postsynaptic_models_share_one_buffer_with_atomic_accumulation() {
    let mut model = Model::new("merged");
    model.set_dt(0.1).unwrap();
    model.set_merge_postsynaptic_models(true);
    model
        .add_neuron_population("A", 32, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();
    model
        .add_neuron_population("B", 32, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();
    model
        .add_neuron_population("C", 32, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();
    for (name, src) in [("S1", "A"), ("S2", "B")] {
        model
            .add_synapse_population(
                name,
                MatrixType::DENSE_INDIVIDUAL,
                0,
                src,
                "C",
                WeightUpdateInit::new(static_pulse(), BTreeMap::new())
                    .with_var_init("g", VarInit::constant(0.1)),
                PostsynapticInit::new(
                    exp_curr(),
                    [("tau".to_string(), 5.0)].into_iter().collect(),
                ),
                SparseConnectivityInit::uninitialised(),
            )
            .unwrap();
    }
    model.finalize().unwrap();

    assert!(model.synapse_group("S2").unwrap().is_ps_model_merged());
    assert_eq!(model.synapse_group("S2").unwrap().ps_target(), "S1");

    let artifacts = generate_all(&model);
    // Both groups flush into the shared buffer atomically
    assert!(artifacts.synapse.contains("atomicAdd(&dd_inSynS1["));
    assert!(!artifacts.synapse.contains("dd_inSynS2"));
    assert!(!artifacts.runner.contains("inSynS2"));
    // One accumulation buffer in the neuron kernel
    assert_eq!(artifacts.neuron.matches("linSynS1 = dd_inSynS1").count(), 1);
}

#[test]
fn generation_is_deterministic() {
    let model = build_model(Precision::Float);
    let first = generate_all(&model);
    let second = generate_all(&model);
    assert_eq!(first.neuron, second.neuron);
    assert_eq!(first.synapse, second.synapse);
    assert_eq!(first.init, second.init);
    assert_eq!(first.definitions, second.definitions);
    assert_eq!(first.definitions_internal, second.definitions_internal);
    assert_eq!(first.runner, second.runner);
    assert_eq!(first.makefile, second.makefile);
}

#[test]
fn runner_exercises_memory_capabilities() {
    let model = build_model(Precision::Float);
    let artifacts = generate_all(&model);

    assert!(artifacts.definitions.contains("extern scalar* VExc;"));
    assert!(artifacts.definitions.contains("void pushVExcToDevice();"));
    // V on Exc is queued: current-slot transfer functions exist
    assert!(artifacts
        .definitions
        .contains("void pullCurrentVExcFromDevice();"));

    assert!(artifacts.runner.contains("__device__ scalar* dd_VExc;"));
    assert!(artifacts.runner.contains("void allocateMem()"));
    assert!(artifacts.runner.contains("cudaMalloc(&d_VExc"));
    assert!(artifacts.runner.contains("void freeMem()"));
    assert!(artifacts.runner.contains("cudaFree(d_VExc"));
    assert!(artifacts.runner.contains("spkQuePtrExc * 64"));

    assert!(artifacts
        .definitions_internal
        .contains("extern scalar* d_VExc;"));

    assert!(artifacts.makefile.contains("NVCC := nvcc"));
    assert!(artifacts.makefile.contains("runner: $(OBJECTS)"));
}

#[test]
fn procedural_connectivity_selects_procedural_strategy_output() {
    let mut model = Model::new("proc");
    model.set_dt(0.1).unwrap();
    model.set_seed(99);
    model
        .add_neuron_population("A", 32, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();
    model
        .add_neuron_population("B", 32, lif(), lif_params(), BTreeMap::new(), 0)
        .unwrap();
    model
        .add_synapse_population(
            "P",
            MatrixType::PROCEDURAL_GLOBAL,
            0,
            "A",
            "B",
            WeightUpdateInit::new(static_pulse(), BTreeMap::new())
                .with_var_init("g", VarInit::constant(0.5)),
            PostsynapticInit::new(exp_curr(), [("tau".to_string(), 5.0)].into_iter().collect()),
            SparseConnectivityInit::new(
                fixed_probability(),
                [("prob".to_string(), 0.1)].into_iter().collect(),
            )
            .unwrap(),
        )
        .unwrap();
    model.finalize().unwrap();

    let artifacts = generate_all(&model);
    // Row building happens inline in the update kernel, driven per spike
    assert!(artifacts.synapse.contains("curand_init(deviceRNGSeed"));
    assert!(artifacts.synapse.contains("while (true)"));
    // The global weight is compiled in as a literal
    assert!(artifacts.synapse.contains("(0.5f)"));
}
