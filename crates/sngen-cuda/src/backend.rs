//! The CUDA backend implementation

use sngen_codegen::backend::{
    pad_size, Backend, FunctionTemplate, Handler, InitHandlers, Kernel, NeuronUpdateHandlers,
    PaddedGroup, SynapseUpdateHandlers,
};
use sngen_codegen::error::{CodegenError, Result};
use sngen_codegen::presynaptic;
use sngen_codegen::stream::CodeStream;
use sngen_codegen::substitutions::Substitutions;
use sngen_codegen::synapse_update::{dynamics_threads, learn_post_threads};
use sngen_model::{
    CodeRole, MatrixConnectivity, Model, NeuronGroup, Precision, SynapseGroup, VarLocation,
};

/// Thread block sizes per kernel kind
#[derive(Debug, Clone)]
pub struct KernelBlockSizes {
    /// Neuron update kernel
    pub neuron_update: usize,
    /// Presynaptic update kernel
    pub presynaptic_update: usize,
    /// Postsynaptic learning kernel
    pub postsynaptic_update: usize,
    /// Synapse dynamics kernel
    pub synapse_dynamics: usize,
    /// Dense / neuron initialization kernel
    pub init: usize,
    /// Sparse initialization kernel
    pub init_sparse: usize,
    /// Pre-neuron reset kernel
    pub pre_neuron_reset: usize,
    /// Pre-synapse reset kernel
    pub pre_synapse_reset: usize,
}

impl Default for KernelBlockSizes {
    fn default() -> Self {
        Self {
            neuron_update: 32,
            presynaptic_update: 32,
            postsynaptic_update: 32,
            synapse_dynamics: 32,
            init: 32,
            init_sparse: 32,
            pre_neuron_reset: 32,
            pre_synapse_reset: 32,
        }
    }
}

/// The reference CUDA backend
#[derive(Debug, Default)]
pub struct CudaBackend {
    block_sizes: KernelBlockSizes,
}

static CUDA_FUNCTIONS: &[FunctionTemplate] = &[
    FunctionTemplate {
        name: "gennrand_uniform",
        arity: 0,
        double_template: "curand_uniform_double($(rng))",
        single_template: "curand_uniform($(rng))",
    },
    FunctionTemplate {
        name: "gennrand_normal",
        arity: 0,
        double_template: "curand_normal_double($(rng))",
        single_template: "curand_normal($(rng))",
    },
    FunctionTemplate {
        name: "gennrand_exponential",
        arity: 0,
        double_template: "exponentialDistDouble($(rng))",
        single_template: "exponentialDistFloat($(rng))",
    },
    FunctionTemplate {
        name: "gennrand_log_normal",
        arity: 2,
        double_template: "curand_log_normal_double($(rng), $(0), $(1))",
        single_template: "curand_log_normal($(rng), $(0), $(1))",
    },
    FunctionTemplate {
        name: "gennrand_gamma",
        arity: 1,
        double_template: "gammaDistDouble($(rng), $(0))",
        single_template: "gammaDistFloat($(rng), $(0))",
    },
    FunctionTemplate {
        name: "gennrand_binomial",
        arity: 2,
        double_template: "binomialDistDouble($(rng), $(0), $(1))",
        single_template: "binomialDistFloat($(rng), $(0), $(1))",
    },
];

impl CudaBackend {
    /// Create a backend with default block sizes
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a backend with explicit block sizes
    pub fn with_block_sizes(block_sizes: KernelBlockSizes) -> Self {
        Self { block_sizes }
    }

    fn check_precision(&self, model: &Model) -> Result<()> {
        if model.precision() == Precision::LongDouble
            || model.time_precision() == Precision::LongDouble
        {
            return Err(CodegenError::incompatible_backend(
                self.name(),
                "represent long double model state",
            ));
        }
        Ok(())
    }

    fn scalar_literal(&self, model: &Model, value: f64) -> String {
        let mut text = sngen_codegen::write_precise(value);
        if model.precision().is_single() {
            text.push('f');
        }
        text
    }

    fn gen_artifact_preamble(&self, os: &mut CodeStream, model: &Model, what: &str) {
        os.line(format!("// CUDA {} for model {}", what, model.name()));
        os.line("#include <curand_kernel.h>");
        os.line("#include \"definitions_internal.h\"");
        os.blank();
        if model.is_device_rng_required() {
            os.line(format!(
                "static __device__ const unsigned long long deviceRNGSeed = {}ull;",
                model.seed().unwrap_or(0)
            ));
            os.blank();
            self.gen_rng_support_code(os);
        }
    }

    /// Device helpers backing the `gennrand_*` distributions curand does
    /// not provide directly
    fn gen_rng_support_code(&self, os: &mut CodeStream) {
        os.raw(RNG_SUPPORT_CODE);
        os.blank();
    }

    fn timer_start(&self, os: &mut CodeStream, model: &Model, name: &str) {
        if model.is_timing_enabled() {
            os.line(format!("CHECK_CUDA_ERRORS(cudaEventRecord({}Start));", name));
        }
    }

    fn timer_stop(&self, os: &mut CodeStream, model: &Model, name: &str) {
        if model.is_timing_enabled() {
            os.line(format!("CHECK_CUDA_ERRORS(cudaEventRecord({}Stop));", name));
        }
    }

    fn gen_kernel_launch(&self, os: &mut CodeStream, kernel: Kernel, threads: usize, args: &str) {
        let block = self.kernel_block_size(kernel);
        let grid = threads.div_ceil(block);
        os.open("");
        os.line(format!("const dim3 threads({}, 1);", block));
        os.line(format!("const dim3 grid({}, 1);", grid));
        os.line(format!("{}<<<grid, threads>>>({});", kernel.name(), args));
        os.close();
    }

    /// Flush the block-shared spike stage of one population into its
    /// global buffers
    fn gen_spike_flush(&self, os: &mut CodeStream, ng: &NeuronGroup, event: bool) {
        let (cnt, buf, sh, sh_count, sh_pos) = if event {
            (
                "glbSpkCntEvnt",
                "glbSpkEvnt",
                "shSpkEvnt",
                "shSpkEvntCount",
                "shPosSpkEvnt",
            )
        } else {
            ("glbSpkCnt", "glbSpk", "shSpk", "shSpkCount", "shPosSpk")
        };
        let slot = if ng.is_delay_required() {
            format!("dd_spkQuePtr{}", ng.name())
        } else {
            "0".to_string()
        };
        let offset = if ng.is_delay_required() {
            format!("(dd_spkQuePtr{} * {}) + ", ng.name(), ng.num_neurons())
        } else {
            String::new()
        };

        os.open(format!("if (threadIdx.x == 0 && {} > 0)", sh_count));
        os.line(format!(
            "{} = atomicAdd(&dd_{}{}[{}], {});",
            sh_pos,
            cnt,
            ng.name(),
            slot,
            sh_count
        ));
        os.close();
        self.gen_barrier(os);
        os.open(format!("if (threadIdx.x < {})", sh_count));
        os.line(format!(
            "dd_{}{}[{}{} + threadIdx.x] = {}[threadIdx.x];",
            buf,
            ng.name(),
            offset,
            sh_pos,
            sh
        ));
        os.close();
    }
}

impl Backend for CudaBackend {
    fn name(&self) -> &'static str {
        "CUDA"
    }

    fn var_prefix(&self) -> &'static str {
        "dd_"
    }

    fn kernel_block_size(&self, kernel: Kernel) -> usize {
        match kernel {
            Kernel::NeuronUpdate => self.block_sizes.neuron_update,
            Kernel::PresynapticUpdate => self.block_sizes.presynaptic_update,
            Kernel::PostsynapticUpdate => self.block_sizes.postsynaptic_update,
            Kernel::SynapseDynamics => self.block_sizes.synapse_dynamics,
            Kernel::Init => self.block_sizes.init,
            Kernel::InitSparse => self.block_sizes.init_sparse,
            Kernel::PreNeuronReset => self.block_sizes.pre_neuron_reset,
            Kernel::PreSynapseReset => self.block_sizes.pre_synapse_reset,
        }
    }

    fn supports_shared_memory_atomics(&self) -> bool {
        true
    }

    fn atomic_add(&self, target: &str, value: &str, _ty: &str) -> String {
        format!("atomicAdd(&{}, {})", target, value)
    }

    fn atomic_or(&self, target: &str, value: &str) -> String {
        format!("atomicOr(&{}, {})", target, value)
    }

    fn gen_barrier(&self, os: &mut CodeStream) {
        os.line("__syncthreads();");
    }

    fn gen_shared_array(&self, os: &mut CodeStream, ty: &str, name: &str, count: usize) {
        os.line(format!("__shared__ {} {}[{}];", ty, name, count));
    }

    fn local_thread_index(&self) -> &'static str {
        "threadIdx.x"
    }

    fn function_templates(&self) -> &'static [FunctionTemplate] {
        CUDA_FUNCTIONS
    }

    fn population_rng_state(&self, group: &str, index: &str) -> String {
        format!("&dd_rng{}[{}]", group, index)
    }

    fn gen_kernel_rng_init(&self, os: &mut CodeStream, name: &str, sequence: &str) {
        os.line(format!("curandState {};", name));
        os.line(format!(
            "curand_init(deviceRNGSeed, {}, 0, &{});",
            sequence, name
        ));
    }

    fn gen_population_rng_init(
        &self,
        os: &mut CodeStream,
        group: &str,
        index: &str,
        sequence: &str,
    ) {
        os.line(format!(
            "curand_init(deviceRNGSeed, {}, 0, &dd_rng{}[{}]);",
            sequence, group, index
        ));
    }

    fn gen_parallel_group(
        &self,
        os: &mut CodeStream,
        groups: &[PaddedGroup],
        guard_count: bool,
        parent: &Substitutions,
        handler: &mut dyn FnMut(&mut CodeStream, usize, &Substitutions) -> Result<()>,
    ) -> Result<()> {
        let mut start = 0usize;
        for (i, group) in groups.iter().enumerate() {
            let end = start + group.padded;
            os.line(format!("// {}", group.name));
            let head = if i == 0 {
                format!("if (id < {})", end)
            } else {
                format!("else if (id < {})", end)
            };
            os.open(head);
            if start == 0 {
                os.line("const unsigned int lid = id;");
            } else {
                os.line(format!("const unsigned int lid = id - {};", start));
            }
            let mut subs = Substitutions::with_parent(parent);
            subs.add_var("id", "lid");
            if guard_count && group.count < group.padded {
                os.open(format!("if (lid < {})", group.count));
                handler(os, i, &subs)?;
                os.close();
            } else {
                handler(os, i, &subs)?;
            }
            os.close();
            start = end;
        }
        Ok(())
    }

    fn gen_pop_variable_init(
        &self,
        os: &mut CodeStream,
        subs: &Substitutions,
        handler: Handler,
    ) -> Result<()> {
        let id = subs.var("id").expect("kernel binds $(id)");
        os.open(format!("if ({} == 0)", id));
        handler(os, subs)?;
        os.close();
        Ok(())
    }

    fn gen_variable_init(
        &self,
        os: &mut CodeStream,
        count: &str,
        subs: &Substitutions,
        handler: Handler,
    ) -> Result<()> {
        let id = subs.var("id").expect("kernel binds $(id)");
        os.open(format!("if ({} < {})", id, count));
        handler(os, subs)?;
        os.close();
        Ok(())
    }

    fn gen_synapse_variable_row_init(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        subs: &Substitutions,
        handler: Handler,
    ) -> Result<()> {
        let id = subs.var("id").expect("kernel binds $(id)").to_string();
        match sg.matrix_type().connectivity() {
            MatrixConnectivity::Dense => {
                // One thread per postsynaptic column, looping rows
                let src_n = model.src_neuron_group(sg).num_neurons();
                let trg_n = model.trg_neuron_group(sg).num_neurons();
                os.open(format!("for (unsigned int i = 0; i < {}; i++)", src_n));
                os.line(format!(
                    "const unsigned int idSyn = (i * {}) + {};",
                    trg_n, id
                ));
                let mut row_subs = Substitutions::with_parent(subs);
                row_subs.add_var("id_pre", "i");
                row_subs.add_var("id_post", id.clone());
                row_subs.add_var("id_syn", "idSyn");
                handler(os, &row_subs)?;
                os.close();
            }
            MatrixConnectivity::Sparse => {
                // One thread per presynaptic row, looping its synapses
                os.line(format!(
                    "const unsigned int rowLen = dd_rowLength{}[{}];",
                    sg.name(),
                    id
                ));
                os.open("for (unsigned int j = 0; j < rowLen; j++)");
                os.line(format!(
                    "const unsigned int idSyn = ({} * {}) + j;",
                    id,
                    sg.max_connections()
                ));
                os.line(format!(
                    "const unsigned int idPost = dd_ind{}[idSyn];",
                    sg.name()
                ));
                let mut row_subs = Substitutions::with_parent(subs);
                row_subs.add_var("id_pre", id.clone());
                row_subs.add_var("id_post", "idPost");
                row_subs.add_var("id_syn", "idSyn");
                handler(os, &row_subs)?;
                os.close();
            }
            _ => {}
        }
        Ok(())
    }

    fn gen_emit_true_spike(
        &self,
        os: &mut CodeStream,
        _model: &Model,
        ng: &NeuronGroup,
        subs: &Substitutions,
    ) -> Result<()> {
        let id = subs.var("id").expect("kernel binds $(id)");
        os.line("const unsigned int spkIdx = atomicAdd(&shSpkCount, 1);");
        os.line(format!("shSpk[spkIdx] = {};", id));
        if ng.is_spike_time_required() {
            let offset = if ng.is_delay_required() {
                format!("writeDelayOffset + {}", id)
            } else {
                id.to_string()
            };
            os.line(format!("dd_sT{}[{}] = t;", ng.name(), offset));
        }
        Ok(())
    }

    fn gen_emit_spike_like_event(
        &self,
        os: &mut CodeStream,
        _model: &Model,
        _ng: &NeuronGroup,
        subs: &Substitutions,
    ) -> Result<()> {
        let id = subs.var("id").expect("kernel binds $(id)");
        os.line("const unsigned int evntIdx = atomicAdd(&shSpkEvntCount, 1);");
        os.line(format!("shSpkEvnt[evntIdx] = {};", id));
        Ok(())
    }

    fn gen_neuron_update(
        &self,
        os: &mut CodeStream,
        model: &Model,
        handlers: &mut NeuronUpdateHandlers,
    ) -> Result<()> {
        self.check_precision(model)?;
        self.gen_artifact_preamble(os, model, "neuron update kernels");
        let time_ty = model.time_type();
        let block = self.block_sizes.neuron_update;

        let groups: Vec<&NeuronGroup> = model.neuron_groups().collect();
        log::debug!(
            "Emitting CUDA neuron update kernels for {} population(s)",
            groups.len()
        );

        // Advance delay queues and reset this timestep's spike counts
        os.open("__global__ void preNeuronResetKernel()");
        os.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
        for (i, ng) in groups.iter().enumerate() {
            os.open(format!("if (id == {})", i));
            let slot = if ng.is_delay_required() {
                os.line(format!(
                    "dd_spkQuePtr{} = (dd_spkQuePtr{} + 1) % {};",
                    ng.name(),
                    ng.name(),
                    ng.num_delay_slots()
                ));
                format!("dd_spkQuePtr{}", ng.name())
            } else {
                "0".to_string()
            };
            os.line(format!("dd_glbSpkCnt{}[{}] = 0;", ng.name(), slot));
            if ng.is_spike_event_required() {
                os.line(format!("dd_glbSpkCntEvnt{}[{}] = 0;", ng.name(), slot));
            }
            os.close();
        }
        os.close();
        os.blank();

        let any_spikes = groups.iter().any(|ng| ng.threshold_code().is_some());
        let any_events = groups.iter().any(|ng| ng.is_spike_event_required());

        os.open(format!("__global__ void updateNeuronsKernel({} t)", time_ty));
        os.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
        if any_spikes {
            self.gen_shared_array(os, "unsigned int", "shSpk", block);
            os.line("__shared__ unsigned int shPosSpk;");
            os.line("__shared__ unsigned int shSpkCount;");
        }
        if any_events {
            self.gen_shared_array(os, "unsigned int", "shSpkEvnt", block);
            os.line("__shared__ unsigned int shPosSpkEvnt;");
            os.line("__shared__ unsigned int shSpkEvntCount;");
        }
        os.blank();

        let padded: Vec<PaddedGroup> = groups
            .iter()
            .map(|ng| PaddedGroup {
                name: ng.name().to_string(),
                count: ng.num_neurons(),
                padded: pad_size(ng.num_neurons(), block),
            })
            .collect();
        let mut root = Substitutions::new();
        root.add_var("t", "t");

        self.gen_parallel_group(os, &padded, false, &root, &mut |os, i, subs| {
            let ng = groups[i];
            let spikes = ng.threshold_code().is_some();
            let events = ng.is_spike_event_required();
            if spikes || events {
                os.open("if (threadIdx.x == 0)");
                if spikes {
                    os.line("shSpkCount = 0;");
                }
                if events {
                    os.line("shSpkEvntCount = 0;");
                }
                os.close();
                self.gen_barrier(os);
            }
            os.open(format!(
                "if ({} < {})",
                subs.var("id").expect("bound above"),
                ng.num_neurons()
            ));
            (handlers.sim)(os, ng, subs)?;
            os.close();
            if spikes || events {
                self.gen_barrier(os);
            }
            if events {
                self.gen_spike_flush(os, ng, true);
            }
            if spikes {
                self.gen_spike_flush(os, ng, false);
            }
            Ok(())
        })?;
        os.close();
        os.blank();

        // Host-side launch
        os.open(format!("void updateNeurons({} t)", time_ty));
        self.timer_start(os, model, "neuronUpdate");
        if !groups.is_empty() {
            let reset_grid = groups.len().div_ceil(self.block_sizes.pre_neuron_reset);
            os.line(format!(
                "preNeuronResetKernel<<<{}, {}>>>();",
                reset_grid, self.block_sizes.pre_neuron_reset
            ));
        }
        let total: usize = padded.iter().map(|g| g.padded).sum();
        if total > 0 {
            self.gen_kernel_launch(os, Kernel::NeuronUpdate, total, "t");
        }
        self.timer_stop(os, model, "neuronUpdate");
        os.close();
        Ok(())
    }

    fn gen_synapse_update(
        &self,
        os: &mut CodeStream,
        model: &Model,
        handlers: &mut SynapseUpdateHandlers,
    ) -> Result<()> {
        self.check_precision(model)?;
        self.gen_artifact_preamble(os, model, "synapse update kernels");
        let time_ty = model.time_type();

        let presyn: Vec<&SynapseGroup> = model
            .synapse_groups()
            .filter(|sg| sg.is_true_spike_required() || sg.is_spike_event_required())
            .collect();
        let learn: Vec<&SynapseGroup> = model
            .synapse_groups()
            .filter(|sg| sg.wu_snippet().code(CodeRole::LearnPost).is_some())
            .collect();
        let dynamics: Vec<&SynapseGroup> = model
            .synapse_groups()
            .filter(|sg| sg.wu_snippet().code(CodeRole::SynapseDynamics).is_some())
            .collect();
        let dendritic: Vec<&SynapseGroup> = model
            .synapse_groups()
            .filter(|sg| sg.is_dendritic_delay_required())
            .collect();

        // Advance dendritic delay ring pointers
        if !dendritic.is_empty() {
            os.open("__global__ void preSynapseResetKernel()");
            os.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
            for (i, sg) in dendritic.iter().enumerate() {
                os.open(format!("if (id == {})", i));
                os.line(format!(
                    "dd_denDelayPtr{} = (dd_denDelayPtr{} + 1) % {};",
                    sg.name(),
                    sg.name(),
                    sg.max_dendritic_delay_timesteps()
                ));
                os.close();
            }
            os.close();
            os.blank();
        }

        // Presynaptic spike/event propagation
        let mut presyn_total = 0usize;
        if !presyn.is_empty() {
            let block = self.block_sizes.presynaptic_update;
            let any_true = presyn.iter().any(|sg| sg.is_true_spike_required());
            let any_event = presyn.iter().any(|sg| sg.is_spike_event_required());
            let mut any_shared = false;
            let mut padded = Vec::with_capacity(presyn.len());
            for sg in &presyn {
                let strategy = presynaptic::select(sg)?;
                if strategy.shared_memory_per_thread(model, sg, self) > 0 {
                    any_shared = true;
                }
                let count = strategy.num_threads(model, sg);
                padded.push(PaddedGroup {
                    name: sg.name().to_string(),
                    count,
                    padded: pad_size(count, block),
                });
            }

            os.open(format!(
                "__global__ void updatePresynapticKernel({} t)",
                time_ty
            ));
            os.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
            if any_true {
                self.gen_shared_array(os, "unsigned int", "shSpk", block);
            }
            if any_event {
                self.gen_shared_array(os, "unsigned int", "shSpkEvnt", block);
            }
            if any_shared {
                self.gen_shared_array(os, model.scalar_type(), "shLg", block);
            }
            os.blank();

            let mut root = Substitutions::new();
            root.add_var("t", "t");
            self.gen_parallel_group(os, &padded, false, &root, &mut |os, i, subs| {
                (handlers.presynaptic)(os, presyn[i], subs)
            })?;
            os.close();
            os.blank();
            presyn_total = padded.iter().map(|g| g.padded).sum();
        }

        // Postsynaptic learning
        let mut learn_total = 0usize;
        if !learn.is_empty() {
            let block = self.block_sizes.postsynaptic_update;
            let padded: Vec<PaddedGroup> = learn
                .iter()
                .map(|sg| {
                    let count = learn_post_threads(model, sg);
                    PaddedGroup {
                        name: sg.name().to_string(),
                        count,
                        padded: pad_size(count, block),
                    }
                })
                .collect();
            os.open(format!(
                "__global__ void updatePostsynapticKernel({} t)",
                time_ty
            ));
            os.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
            let mut root = Substitutions::new();
            root.add_var("t", "t");
            self.gen_parallel_group(os, &padded, true, &root, &mut |os, i, subs| {
                (handlers.postsynaptic_learning)(os, learn[i], subs)
            })?;
            os.close();
            os.blank();
            learn_total = padded.iter().map(|g| g.padded).sum();
        }

        // Synapse dynamics
        let mut dynamics_total = 0usize;
        if !dynamics.is_empty() {
            let block = self.block_sizes.synapse_dynamics;
            let padded: Vec<PaddedGroup> = dynamics
                .iter()
                .map(|sg| {
                    let count = dynamics_threads(model, sg);
                    PaddedGroup {
                        name: sg.name().to_string(),
                        count,
                        padded: pad_size(count, block),
                    }
                })
                .collect();
            os.open(format!(
                "__global__ void updateSynapseDynamicsKernel({} t)",
                time_ty
            ));
            os.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
            let mut root = Substitutions::new();
            root.add_var("t", "t");
            self.gen_parallel_group(os, &padded, true, &root, &mut |os, i, subs| {
                (handlers.synapse_dynamics)(os, dynamics[i], subs)
            })?;
            os.close();
            os.blank();
            dynamics_total = padded.iter().map(|g| g.padded).sum();
        }

        // Host-side launch: dynamics run first, then spike propagation,
        // then postsynaptic learning
        os.open(format!("void updateSynapses({} t)", time_ty));
        if !dendritic.is_empty() {
            let grid = dendritic.len().div_ceil(self.block_sizes.pre_synapse_reset);
            os.line(format!(
                "preSynapseResetKernel<<<{}, {}>>>();",
                grid, self.block_sizes.pre_synapse_reset
            ));
        }
        if dynamics_total > 0 {
            self.timer_start(os, model, "synapseDynamics");
            self.gen_kernel_launch(os, Kernel::SynapseDynamics, dynamics_total, "t");
            self.timer_stop(os, model, "synapseDynamics");
        }
        if presyn_total > 0 {
            self.timer_start(os, model, "presynapticUpdate");
            self.gen_kernel_launch(os, Kernel::PresynapticUpdate, presyn_total, "t");
            self.timer_stop(os, model, "presynapticUpdate");
        }
        if learn_total > 0 {
            self.timer_start(os, model, "postsynapticUpdate");
            self.gen_kernel_launch(os, Kernel::PostsynapticUpdate, learn_total, "t");
            self.timer_stop(os, model, "postsynapticUpdate");
        }
        os.close();
        Ok(())
    }

    fn gen_init(
        &self,
        os: &mut CodeStream,
        model: &Model,
        handlers: &mut InitHandlers,
    ) -> Result<()> {
        self.check_precision(model)?;
        self.gen_artifact_preamble(os, model, "initialization kernels");

        let neuron_groups: Vec<&NeuronGroup> = model.neuron_groups().collect();
        let dense: Vec<&SynapseGroup> = model
            .synapse_groups()
            .filter(|sg| {
                sg.matrix_type().connectivity() == MatrixConnectivity::Dense
                    && sg.matrix_type().has_individual_weights()
            })
            .collect();
        let connectivity: Vec<&SynapseGroup> = model
            .synapse_groups()
            .filter(|sg| {
                matches!(
                    sg.matrix_type().connectivity(),
                    MatrixConnectivity::Sparse | MatrixConnectivity::Bitmask
                ) && sg.connectivity_init().code().is_some()
            })
            .collect();
        let sparse_vars: Vec<&SynapseGroup> = model
            .synapse_groups()
            .filter(|sg| sg.matrix_type().is_sparse() && sg.matrix_type().has_individual_weights())
            .collect();

        let block = self.block_sizes.init;
        let mut padded = Vec::new();
        for ng in &neuron_groups {
            padded.push(PaddedGroup {
                name: ng.name().to_string(),
                count: ng.num_neurons(),
                padded: pad_size(ng.num_neurons(), block),
            });
        }
        for sg in &dense {
            let count = model.trg_neuron_group(sg).num_neurons();
            padded.push(PaddedGroup {
                name: sg.name().to_string(),
                count,
                padded: pad_size(count, block),
            });
        }
        for sg in &connectivity {
            let count = model.src_neuron_group(sg).num_neurons();
            padded.push(PaddedGroup {
                name: format!("{} connectivity", sg.name()),
                count,
                padded: pad_size(count, block),
            });
        }

        os.open("__global__ void initializeKernel()");
        os.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
        let root = Substitutions::new();
        self.gen_parallel_group(os, &padded, true, &root, &mut |os, i, subs| {
            if i < neuron_groups.len() {
                (handlers.neuron_group)(os, neuron_groups[i], subs)
            } else if i < neuron_groups.len() + dense.len() {
                (handlers.dense_synapse_group)(os, dense[i - neuron_groups.len()], subs)
            } else {
                (handlers.sparse_connectivity)(
                    os,
                    connectivity[i - neuron_groups.len() - dense.len()],
                    subs,
                )
            }
        })?;
        os.close();
        os.blank();

        let mut sparse_total = 0usize;
        if !sparse_vars.is_empty() {
            let block = self.block_sizes.init_sparse;
            let padded: Vec<PaddedGroup> = sparse_vars
                .iter()
                .map(|sg| {
                    let count = model.src_neuron_group(sg).num_neurons();
                    PaddedGroup {
                        name: sg.name().to_string(),
                        count,
                        padded: pad_size(count, block),
                    }
                })
                .collect();
            os.open("__global__ void initializeSparseKernel()");
            os.line("const unsigned int id = (blockIdx.x * blockDim.x) + threadIdx.x;");
            let root = Substitutions::new();
            self.gen_parallel_group(os, &padded, true, &root, &mut |os, i, subs| {
                (handlers.sparse_synapse_group)(os, sparse_vars[i], subs)
            })?;
            os.close();
            os.blank();
            sparse_total = padded.iter().map(|g| g.padded).sum();
        }

        // Host-side entry points
        let total: usize = padded.iter().map(|g| g.padded).sum();
        os.open("void initialize()");
        self.timer_start(os, model, "init");
        if total > 0 {
            self.gen_kernel_launch(os, Kernel::Init, total, "");
        }
        self.timer_stop(os, model, "init");
        os.line("CHECK_CUDA_ERRORS(cudaDeviceSynchronize());");
        os.close();
        os.blank();

        os.open("void initializeSparse()");
        if sparse_total > 0 {
            self.timer_start(os, model, "initSparse");
            // Row lengths written by initialize() are read here, so the
            // preceding synchronize is load-bearing
            self.gen_kernel_launch(os, Kernel::InitSparse, sparse_total, "");
            self.timer_stop(os, model, "initSparse");
            os.line("CHECK_CUDA_ERRORS(cudaDeviceSynchronize());");
        }
        os.close();
        Ok(())
    }

    // ------------------------- Memory management -------------------------

    fn gen_variable_definition(
        &self,
        definitions: &mut CodeStream,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        if location.on_host() {
            definitions.line(format!("extern {}* {};", ty, name));
            runner.line(format!("{}* {};", ty, name));
        }
        if location.on_device() {
            definitions_internal.line(format!("extern {}* d_{};", ty, name));
            definitions_internal.line(format!("extern __device__ {}* dd_{};", ty, name));
            runner.line(format!("{}* d_{};", ty, name));
            runner.line(format!("__device__ {}* dd_{};", ty, name));
        }
        Ok(())
    }

    fn gen_device_scalar(
        &self,
        definitions: &mut CodeStream,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        ty: &str,
        name: &str,
    ) -> Result<()> {
        definitions.line(format!("extern {} {};", ty, name));
        definitions_internal.line(format!("extern __device__ {} dd_{};", ty, name));
        runner.line(format!("{} {};", ty, name));
        runner.line(format!("__device__ {} dd_{};", ty, name));
        Ok(())
    }

    fn gen_variable_allocation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()> {
        let bytes = format!("{} * sizeof({})", count, ty);
        if location.is_zero_copy() {
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaHostAlloc(&{}, {}, cudaHostAllocMapped));",
                name, bytes
            ));
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaHostGetDevicePointer((void**) &d_{}, (void*) {}, 0));",
                name, name
            ));
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaMemcpyToSymbol(dd_{}, &d_{}, sizeof({}*)));",
                name, name, ty
            ));
            return Ok(());
        }
        if location.on_host() {
            os.line(format!("{} = ({}*) malloc({});", name, ty, bytes));
        }
        if location.on_device() {
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaMalloc(&d_{}, {}));",
                name, bytes
            ));
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaMemcpyToSymbol(dd_{}, &d_{}, sizeof({}*)));",
                name, name, ty
            ));
        }
        Ok(())
    }

    fn gen_variable_free(
        &self,
        os: &mut CodeStream,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        if location.is_zero_copy() {
            os.line(format!("CHECK_CUDA_ERRORS(cudaFreeHost({}));", name));
            return Ok(());
        }
        if location.on_host() {
            os.line(format!("free({});", name));
        }
        if location.on_device() {
            os.line(format!("CHECK_CUDA_ERRORS(cudaFree(d_{}));", name));
        }
        Ok(())
    }

    fn gen_variable_push(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()> {
        if location.is_zero_copy() || !location.on_host() || !location.on_device() {
            return Ok(());
        }
        os.line(format!(
            "CHECK_CUDA_ERRORS(cudaMemcpy(d_{}, {}, {} * sizeof({}), cudaMemcpyHostToDevice));",
            name, name, count, ty
        ));
        Ok(())
    }

    fn gen_variable_pull(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()> {
        if location.is_zero_copy() || !location.on_host() || !location.on_device() {
            return Ok(());
        }
        os.line(format!(
            "CHECK_CUDA_ERRORS(cudaMemcpy({}, d_{}, {} * sizeof({}), cudaMemcpyDeviceToHost));",
            name, name, count, ty
        ));
        Ok(())
    }

    fn gen_current_variable_push(
        &self,
        os: &mut CodeStream,
        ng: &NeuronGroup,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        if location.is_zero_copy() || !location.on_host() || !location.on_device() {
            return Ok(());
        }
        let n = ng.num_neurons();
        let offset = format!("spkQuePtr{} * {}", ng.name(), n);
        os.line(format!(
            "CHECK_CUDA_ERRORS(cudaMemcpy(d_{} + ({}), {} + ({}), {} * sizeof({}), cudaMemcpyHostToDevice));",
            name, offset, name, offset, n, ty
        ));
        Ok(())
    }

    fn gen_current_variable_pull(
        &self,
        os: &mut CodeStream,
        ng: &NeuronGroup,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        if location.is_zero_copy() || !location.on_host() || !location.on_device() {
            return Ok(());
        }
        let n = ng.num_neurons();
        let offset = format!("spkQuePtr{} * {}", ng.name(), n);
        os.line(format!(
            "CHECK_CUDA_ERRORS(cudaMemcpy({} + ({}), d_{} + ({}), {} * sizeof({}), cudaMemcpyDeviceToHost));",
            name, offset, name, offset, n, ty
        ));
        Ok(())
    }

    fn gen_extra_global_param_definition(
        &self,
        definitions: &mut CodeStream,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        ty: &str,
        name: &str,
        _location: VarLocation,
    ) -> Result<()> {
        if ty.trim_end().ends_with('*') {
            let base = ty.trim_end().trim_end_matches('*').trim_end();
            definitions.line(format!("extern {}* {};", base, name));
            definitions_internal.line(format!("extern {}* d_{};", base, name));
            definitions_internal.line(format!("extern __device__ {}* dd_{};", base, name));
            runner.line(format!("{}* {};", base, name));
            runner.line(format!("{}* d_{};", base, name));
            runner.line(format!("__device__ {}* dd_{};", base, name));
        } else {
            definitions.line(format!("extern {} {};", ty, name));
            definitions_internal.line(format!("extern __device__ {} dd_{};", ty, name));
            runner.line(format!("{} {};", ty, name));
            runner.line(format!("__device__ {} dd_{};", ty, name));
        }
        Ok(())
    }

    fn gen_extra_global_param_allocation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        let base = ty.trim_end().trim_end_matches('*').trim_end();
        let bytes = format!("count * sizeof({})", base);
        if location.is_zero_copy() {
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaHostAlloc(&{}, {}, cudaHostAllocMapped));",
                name, bytes
            ));
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaHostGetDevicePointer((void**) &d_{}, (void*) {}, 0));",
                name, name
            ));
        } else {
            os.line(format!("{} = ({}*) malloc({});", name, base, bytes));
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaMalloc(&d_{}, {}));",
                name, bytes
            ));
        }
        os.line(format!(
            "CHECK_CUDA_ERRORS(cudaMemcpyToSymbol(dd_{}, &d_{}, sizeof({}*)));",
            name, name, base
        ));
        Ok(())
    }

    fn gen_extra_global_param_push(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        if ty.trim_end().ends_with('*') {
            if location.is_zero_copy() {
                return Ok(());
            }
            let base = ty.trim_end().trim_end_matches('*').trim_end();
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaMemcpy(d_{}, {}, count * sizeof({}), cudaMemcpyHostToDevice));",
                name, name, base
            ));
        } else {
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaMemcpyToSymbol(dd_{}, &{}, sizeof({})));",
                name, name, ty
            ));
        }
        Ok(())
    }

    fn gen_extra_global_param_pull(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()> {
        if ty.trim_end().ends_with('*') {
            if location.is_zero_copy() {
                return Ok(());
            }
            let base = ty.trim_end().trim_end_matches('*').trim_end();
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaMemcpy({}, d_{}, count * sizeof({}), cudaMemcpyDeviceToHost));",
                name, name, base
            ));
        } else {
            os.line(format!(
                "CHECK_CUDA_ERRORS(cudaMemcpyFromSymbol(&{}, dd_{}, sizeof({})));",
                name, name, ty
            ));
        }
        Ok(())
    }

    fn gen_population_rng(
        &self,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        allocations: &mut CodeStream,
        free: &mut CodeStream,
        name: &str,
        count: usize,
    ) -> Result<()> {
        definitions_internal.line(format!("extern curandState* d_{};", name));
        definitions_internal.line(format!("extern __device__ curandState* dd_{};", name));
        runner.line(format!("curandState* d_{};", name));
        runner.line(format!("__device__ curandState* dd_{};", name));
        allocations.line(format!(
            "CHECK_CUDA_ERRORS(cudaMalloc(&d_{}, {} * sizeof(curandState)));",
            name, count
        ));
        allocations.line(format!(
            "CHECK_CUDA_ERRORS(cudaMemcpyToSymbol(dd_{}, &d_{}, sizeof(curandState*)));",
            name, name
        ));
        free.line(format!("CHECK_CUDA_ERRORS(cudaFree(d_{}));", name));
        Ok(())
    }

    fn gen_timer(
        &self,
        definitions: &mut CodeStream,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        allocations: &mut CodeStream,
        free: &mut CodeStream,
        name: &str,
    ) -> Result<()> {
        definitions.line(format!("extern double {}Time;", name));
        definitions_internal.line(format!("extern cudaEvent_t {}Start, {}Stop;", name, name));
        runner.line(format!("double {}Time = 0.0;", name));
        runner.line(format!("cudaEvent_t {}Start, {}Stop;", name, name));
        allocations.line(format!("CHECK_CUDA_ERRORS(cudaEventCreate(&{}Start));", name));
        allocations.line(format!("CHECK_CUDA_ERRORS(cudaEventCreate(&{}Stop));", name));
        free.line(format!("CHECK_CUDA_ERRORS(cudaEventDestroy({}Start));", name));
        free.line(format!("CHECK_CUDA_ERRORS(cudaEventDestroy({}Stop));", name));
        Ok(())
    }

    // ------------------------- Artifact preambles -------------------------

    fn gen_definitions_preamble(&self, os: &mut CodeStream, model: &Model) -> Result<()> {
        self.check_precision(model)?;
        os.line(format!("// definitions for model {}", model.name()));
        os.line("#pragma once");
        os.line("#include <cstdint>");
        os.line("#include <cstdio>");
        os.line("#include <cstdlib>");
        os.line("#include <cuda_runtime.h>");
        os.blank();
        os.line(format!("typedef {} scalar;", model.scalar_type()));
        os.line(format!("#define DT {}", self.scalar_literal(model, model.dt())));
        let time_max = if model.time_precision().is_single() {
            "3.402823466e+38f"
        } else {
            "1.79769313486231570e+308"
        };
        os.line(format!("#define TIME_MAX {}", time_max));
        os.blank();
        os.line("#define CHECK_CUDA_ERRORS(call) {\\");
        os.line("    cudaError_t error = call;\\");
        os.line("    if (error != cudaSuccess) {\\");
        os.line(
            "        fprintf(stderr, \"%s: %i: cuda error %i: %s\\n\", __FILE__, __LINE__, (int) error, cudaGetErrorString(error));\\",
        );
        os.line("        exit(EXIT_FAILURE);\\");
        os.line("    }\\");
        os.line("}");
        Ok(())
    }

    fn gen_runner_preamble(&self, os: &mut CodeStream, model: &Model) -> Result<()> {
        os.line(format!("// runner for model {}", model.name()));
        os.line("#include <curand_kernel.h>");
        os.line("#include \"definitions_internal.h\"");
        Ok(())
    }

    // ------------------------- Makefile fragment -------------------------

    fn gen_makefile_preamble(&self, os: &mut CodeStream) -> Result<()> {
        os.line("NVCC := nvcc");
        os.line("NVCCFLAGS := -std=c++11 -O3 -lineinfo -rdc=true");
        os.line("LINKFLAGS := -lcurand");
        os.line("OBJECTS := runner.o neuronUpdate.o synapseUpdate.o init.o");
        Ok(())
    }

    fn gen_makefile_link_rule(&self, os: &mut CodeStream) -> Result<()> {
        os.line("runner: $(OBJECTS)");
        os.line("\t$(NVCC) $(NVCCFLAGS) $(OBJECTS) -o $@ $(LINKFLAGS)");
        Ok(())
    }

    fn gen_makefile_compile_rule(&self, os: &mut CodeStream) -> Result<()> {
        os.line("%.o: %.cc definitions.h definitions_internal.h");
        os.line("\t$(NVCC) $(NVCCFLAGS) -x cu -dc $< -o $@");
        Ok(())
    }
}

/// Device helper functions for distributions curand lacks
static RNG_SUPPORT_CODE: &str = r#"__device__ inline float exponentialDistFloat(curandState *rng) {
    while (true) {
        const float u = curand_uniform(rng);
        if (u != 0.0f) {
            return -logf(u);
        }
    }
}

__device__ inline double exponentialDistDouble(curandState *rng) {
    while (true) {
        const double u = curand_uniform_double(rng);
        if (u != 0.0) {
            return -log(u);
        }
    }
}

__device__ inline float gammaDistFloatInternal(curandState *rng, float c, float d) {
    float x, v, u;
    while (true) {
        do {
            x = curand_normal(rng);
            v = 1.0f + (c * x);
        } while (v <= 0.0f);
        v = v * v * v;
        u = curand_uniform(rng);
        if (u == 1.0f) {
            continue;
        }
        if (u < 1.0f - (0.0331f * x * x * x * x)) {
            break;
        }
        if (logf(u) < (0.5f * x * x) + (d * (1.0f - v + logf(v)))) {
            break;
        }
    }
    return d * v;
}

__device__ inline float gammaDistFloat(curandState *rng, float a) {
    if (a > 1.0f) {
        const float d = a - (1.0f / 3.0f);
        const float c = (1.0f / 3.0f) / sqrtf(d);
        return gammaDistFloatInternal(rng, c, d);
    }
    else {
        const float u = curand_uniform(rng);
        const float d = (1.0f + a) - (1.0f / 3.0f);
        const float c = (1.0f / 3.0f) / sqrtf(d);
        return gammaDistFloatInternal(rng, c, d) * powf(u, 1.0f / a);
    }
}

__device__ inline double gammaDistDoubleInternal(curandState *rng, double c, double d) {
    double x, v, u;
    while (true) {
        do {
            x = curand_normal_double(rng);
            v = 1.0 + (c * x);
        } while (v <= 0.0);
        v = v * v * v;
        u = curand_uniform_double(rng);
        if (u == 1.0) {
            continue;
        }
        if (u < 1.0 - (0.0331 * x * x * x * x)) {
            break;
        }
        if (log(u) < (0.5 * x * x) + (d * (1.0 - v + log(v)))) {
            break;
        }
    }
    return d * v;
}

__device__ inline double gammaDistDouble(curandState *rng, double a) {
    if (a > 1.0) {
        const double d = a - (1.0 / 3.0);
        const double c = (1.0 / 3.0) / sqrt(d);
        return gammaDistDoubleInternal(rng, c, d);
    }
    else {
        const double u = curand_uniform_double(rng);
        const double d = (1.0 + a) - (1.0 / 3.0);
        const double c = (1.0 / 3.0) / sqrt(d);
        return gammaDistDoubleInternal(rng, c, d) * pow(u, 1.0 / a);
    }
}

__device__ inline unsigned int binomialDistFloatInternal(curandState *rng, unsigned int n, float p) {
    const float q = 1.0f - p;
    const float qn = expf((float) n * logf(q));
    const float np = (float) n * p;
    const unsigned int bound = min(n, (unsigned int) (np + (10.0f * sqrtf((np * q) + 1.0f))));
    while (true) {
        unsigned int x = 0;
        float px = qn;
        float u = curand_uniform(rng);
        while (u > px) {
            x++;
            if (x > bound) {
                break;
            }
            u -= px;
            px = ((float) (n - x + 1) * p * px) / ((float) x * q);
        }
        if (x <= bound) {
            return x;
        }
    }
}

__device__ inline unsigned int binomialDistFloat(curandState *rng, unsigned int n, float p) {
    if (p <= 0.5f) {
        return binomialDistFloatInternal(rng, n, p);
    }
    else {
        return n - binomialDistFloatInternal(rng, n, 1.0f - p);
    }
}

__device__ inline unsigned int binomialDistDoubleInternal(curandState *rng, unsigned int n, double p) {
    const double q = 1.0 - p;
    const double qn = exp((double) n * log(q));
    const double np = (double) n * p;
    const unsigned int bound = min(n, (unsigned int) (np + (10.0 * sqrt((np * q) + 1.0))));
    while (true) {
        unsigned int x = 0;
        double px = qn;
        double u = curand_uniform_double(rng);
        while (u > px) {
            x++;
            if (x > bound) {
                break;
            }
            u -= px;
            px = ((double) (n - x + 1) * p * px) / ((double) x * q);
        }
        if (x <= bound) {
            return x;
        }
    }
}

__device__ inline unsigned int binomialDistDouble(curandState *rng, unsigned int n, double p) {
    if (p <= 0.5) {
        return binomialDistDoubleInternal(rng, n, p);
    }
    else {
        return n - binomialDistDoubleInternal(rng, n, 1.0 - p);
    }
}
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let backend = CudaBackend::new();
        assert_eq!(backend.name(), "CUDA");
        assert_eq!(backend.var_prefix(), "dd_");
        assert!(backend.supports_shared_memory_atomics());
        assert_eq!(backend.kernel_block_size(Kernel::NeuronUpdate), 32);
    }

    #[test]
    fn test_atomic_primitives() {
        let backend = CudaBackend::new();
        assert_eq!(
            backend.atomic_add("dd_inSynS[ipost]", "lg", "float"),
            "atomicAdd(&dd_inSynS[ipost], lg)"
        );
        assert_eq!(
            backend.atomic_or("dd_gpS[gid / 32]", "mask"),
            "atomicOr(&dd_gpS[gid / 32], mask)"
        );
    }

    #[test]
    fn test_parallel_group_dispatch() {
        let backend = CudaBackend::new();
        let groups = [
            PaddedGroup {
                name: "A".to_string(),
                count: 10,
                padded: 32,
            },
            PaddedGroup {
                name: "B".to_string(),
                count: 64,
                padded: 64,
            },
        ];
        let mut os = CodeStream::new();
        let root = Substitutions::new();
        backend
            .gen_parallel_group(&mut os, &groups, true, &root, &mut |os, i, subs| {
                os.line(format!("// body {} id={}", i, subs.var("id").unwrap()));
                Ok(())
            })
            .unwrap();
        let text = os.into_string();
        assert!(text.contains("if (id < 32)"));
        assert!(text.contains("else if (id < 96)"));
        assert!(text.contains("const unsigned int lid = id - 32;"));
        // Small group is guarded, exact-fit group is not
        assert!(text.contains("if (lid < 10)"));
        assert!(!text.contains("if (lid < 64)"));
    }

    #[test]
    fn test_variable_init_guard() {
        let backend = CudaBackend::new();
        let mut os = CodeStream::new();
        let mut root = Substitutions::new();
        root.add_var("id", "lid");
        backend
            .gen_variable_init(&mut os, "100", &root, &mut |os, _subs| {
                os.line("x[lid] = 0;");
                Ok(())
            })
            .unwrap();
        assert!(os.as_str().contains("if (lid < 100)"));
        assert!(os.as_str().contains("x[lid] = 0;"));
    }

    #[test]
    fn test_rejects_long_double() {
        let backend = CudaBackend::new();
        let mut model = Model::new("m");
        model.set_precision(Precision::LongDouble);
        let mut os = CodeStream::new();
        assert!(backend.gen_definitions_preamble(&mut os, &model).is_err());
    }
}
