//! The backend capability contract.
//!
//! A backend owns every target-specific decision: memory management,
//! kernel scaffolding, thread geometry, atomics, barriers and RNG. The
//! generator pipeline owns the content of user snippets. The two meet
//! through the handler callbacks below: the backend opens a scaffold
//! (kernel, group dispatch, padding guard) and calls back into the
//! pipeline with a `CodeStream` positioned inside it plus the
//! substitution frame describing what the scaffold has bound.

use sngen_model::{Model, NeuronGroup, Precision, SynapseGroup, VarLocation};

use crate::error::Result;
use crate::stream::CodeStream;
use crate::substitutions::Substitutions;

/// The kernel kinds a backend may emit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Kernel {
    /// Advances spike queues and zeroes spike counts before neuron update
    PreNeuronReset,
    /// Per-neuron state update, spike detection and emission
    NeuronUpdate,
    /// Advances dendritic delay pointers before synapse update
    PreSynapseReset,
    /// Presynaptic spike propagation
    PresynapticUpdate,
    /// Postsynaptic learning driven by target spikes
    PostsynapticUpdate,
    /// Per-synapse per-timestep dynamics
    SynapseDynamics,
    /// Dense / per-population initialization
    Init,
    /// Sparse connectivity and per-row state initialization
    InitSparse,
}

impl Kernel {
    /// The generated function name of this kernel
    pub fn name(&self) -> &'static str {
        match self {
            Kernel::PreNeuronReset => "preNeuronResetKernel",
            Kernel::NeuronUpdate => "updateNeuronsKernel",
            Kernel::PreSynapseReset => "preSynapseResetKernel",
            Kernel::PresynapticUpdate => "updatePresynapticKernel",
            Kernel::PostsynapticUpdate => "updatePostsynapticKernel",
            Kernel::SynapseDynamics => "updateSynapseDynamicsKernel",
            Kernel::Init => "initializeKernel",
            Kernel::InitSparse => "initializeSparseKernel",
        }
    }
}

/// A backend-expanded RNG primitive: `$(name, ...)` rewritten to a
/// target-specific expression referencing `$(rng)`
#[derive(Debug, Clone, Copy)]
pub struct FunctionTemplate {
    /// Placeholder name, e.g. `gennrand_uniform`
    pub name: &'static str,
    /// Number of arguments
    pub arity: usize,
    /// Expansion when model state is double precision
    pub double_template: &'static str,
    /// Expansion when model state is single precision
    pub single_template: &'static str,
}

impl FunctionTemplate {
    /// Pick the expansion for a precision
    pub fn template(&self, precision: Precision) -> &'static str {
        if precision.is_single() {
            self.single_template
        } else {
            self.double_template
        }
    }
}

/// A slice of the flat thread-id space assigned to one group
#[derive(Debug, Clone)]
pub struct PaddedGroup {
    /// Group name (for comments and diagnostics)
    pub name: String,
    /// Unpadded element count the handler may address
    pub count: usize,
    /// Thread count padded to the backend's block size
    pub padded: usize,
}

/// Callback emitting code into a scaffold the backend has opened
pub type Handler<'a> = &'a mut dyn FnMut(&mut CodeStream, &Substitutions) -> Result<()>;

/// Callback emitting per-group code into a scaffold
pub type GroupHandler<'a, G> = &'a mut dyn FnMut(&mut CodeStream, &G, &Substitutions) -> Result<()>;

/// Pipeline callbacks for the neuron update kernel
pub struct NeuronUpdateHandlers<'a> {
    /// Per-neuron body: input accumulation, sim code, threshold, reset,
    /// write-back. `$(id)` is bound to the local neuron index and `$(t)`
    /// to the simulation time.
    pub sim: GroupHandler<'a, NeuronGroup>,
}

/// Pipeline callbacks for the synapse update kernels
pub struct SynapseUpdateHandlers<'a> {
    /// Presynaptic spike/event propagation body (strategy-driven)
    pub presynaptic: GroupHandler<'a, SynapseGroup>,
    /// Postsynaptic learning body; `$(id)` is the presynaptic index
    pub postsynaptic_learning: GroupHandler<'a, SynapseGroup>,
    /// Per-synapse dynamics body; `$(id)` is the flat synapse index
    pub synapse_dynamics: GroupHandler<'a, SynapseGroup>,
}

/// Pipeline callbacks for the initialization kernels
pub struct InitHandlers<'a> {
    /// Per-neuron-group initialization; `$(id)` is the local neuron index
    pub neuron_group: GroupHandler<'a, NeuronGroup>,
    /// Dense synapse state initialization; `$(id)` is the postsynaptic index
    pub dense_synapse_group: GroupHandler<'a, SynapseGroup>,
    /// Sparse connectivity construction; `$(id)` is the presynaptic row
    pub sparse_connectivity: GroupHandler<'a, SynapseGroup>,
    /// Sparse synapse state initialization; `$(id)` is the presynaptic row
    pub sparse_synapse_group: GroupHandler<'a, SynapseGroup>,
}

/// The capability set the generator consumes.
///
/// A backend is never responsible for the content of user snippets, only
/// for the scaffolding around them.
pub trait Backend {
    /// Backend name for diagnostics
    fn name(&self) -> &'static str;

    /// Prefix for device-resident symbols (`dd_` on GPU targets, empty
    /// on host targets)
    fn var_prefix(&self) -> &'static str;

    /// Thread block size of a kernel kind
    fn kernel_block_size(&self, kernel: Kernel) -> usize;

    /// Does the device support native atomics on shared memory?
    fn supports_shared_memory_atomics(&self) -> bool;

    /// Textual invocation of an atomic floating-point add
    fn atomic_add(&self, target: &str, value: &str, ty: &str) -> String;

    /// Textual invocation of an atomic bitwise OR on a 32-bit word
    fn atomic_or(&self, target: &str, value: &str) -> String;

    /// Emit an execution barrier across the thread block
    fn gen_barrier(&self, os: &mut CodeStream);

    /// Declare a block-shared scratch array
    fn gen_shared_array(&self, os: &mut CodeStream, ty: &str, name: &str, count: usize);

    /// Expression for the thread index within its block
    fn local_thread_index(&self) -> &'static str;

    /// RNG primitives this backend expands (`gennrand_*`)
    fn function_templates(&self) -> &'static [FunctionTemplate];

    /// Expression handing a population RNG state to snippet code
    fn population_rng_state(&self, group: &str, index: &str) -> String;

    /// Declare and deterministically seed a kernel-local RNG stream
    fn gen_kernel_rng_init(&self, os: &mut CodeStream, name: &str, sequence: &str);

    /// Seed one element of a population RNG state array
    fn gen_population_rng_init(
        &self,
        os: &mut CodeStream,
        group: &str,
        index: &str,
        sequence: &str,
    );

    /// Emit code dispatching `handler` once per group over a flat
    /// thread-id space. The handler receives the group index; `$(id)` in
    /// its frame is bound to the local id within the group. With
    /// `guard_count` the body is additionally wrapped in an
    /// `id < count` test; kernels whose bodies contain barriers must
    /// pass `false` and guard internally so padded threads still reach
    /// every barrier.
    fn gen_parallel_group(
        &self,
        os: &mut CodeStream,
        groups: &[PaddedGroup],
        guard_count: bool,
        parent: &Substitutions,
        handler: &mut dyn FnMut(&mut CodeStream, usize, &Substitutions) -> Result<()>,
    ) -> Result<()>;

    /// Emit a once-per-population block inside an init scaffold
    fn gen_pop_variable_init(
        &self,
        os: &mut CodeStream,
        subs: &Substitutions,
        handler: Handler,
    ) -> Result<()>;

    /// Emit a per-element initializer; `$(id)` is already bound by the
    /// enclosing parallel dispatch
    fn gen_variable_init(
        &self,
        os: &mut CodeStream,
        count: &str,
        subs: &Substitutions,
        handler: Handler,
    ) -> Result<()>;

    /// Emit per-element initialization over the synapse rows of a group,
    /// binding `$(id_pre)`, `$(id_post)` and `$(id_syn)` for the handler
    fn gen_synapse_variable_row_init(
        &self,
        os: &mut CodeStream,
        model: &Model,
        sg: &SynapseGroup,
        subs: &Substitutions,
        handler: Handler,
    ) -> Result<()>;

    /// Emit a true-spike emission for the current neuron
    fn gen_emit_true_spike(
        &self,
        os: &mut CodeStream,
        model: &Model,
        ng: &NeuronGroup,
        subs: &Substitutions,
    ) -> Result<()>;

    /// Emit a spike-like-event emission for the current neuron
    fn gen_emit_spike_like_event(
        &self,
        os: &mut CodeStream,
        model: &Model,
        ng: &NeuronGroup,
        subs: &Substitutions,
    ) -> Result<()>;

    /// Emit the neuron update kernels (pre-reset + update) and their host
    /// launch function
    fn gen_neuron_update(
        &self,
        os: &mut CodeStream,
        model: &Model,
        handlers: &mut NeuronUpdateHandlers,
    ) -> Result<()>;

    /// Emit the synapse update kernels and their host launch function
    fn gen_synapse_update(
        &self,
        os: &mut CodeStream,
        model: &Model,
        handlers: &mut SynapseUpdateHandlers,
    ) -> Result<()>;

    /// Emit the initialization kernels and their host launch functions
    fn gen_init(
        &self,
        os: &mut CodeStream,
        model: &Model,
        handlers: &mut InitHandlers,
    ) -> Result<()>;

    // ------------------------- Memory management -------------------------

    /// Declare a variable in the definitions headers and define its
    /// storage in the runner
    fn gen_variable_definition(
        &self,
        definitions: &mut CodeStream,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    /// Declare and define a device-resident scalar with a host mirror
    /// (delay queue pointers, dendritic delay pointers)
    fn gen_device_scalar(
        &self,
        definitions: &mut CodeStream,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        ty: &str,
        name: &str,
    ) -> Result<()>;

    /// Emit allocation of a variable's storage
    fn gen_variable_allocation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()>;

    /// Emit deallocation of a variable's storage
    fn gen_variable_free(
        &self,
        os: &mut CodeStream,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    /// Emit a host-to-device transfer (no-op for zero-copy locations)
    fn gen_variable_push(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()>;

    /// Emit a device-to-host transfer (no-op for zero-copy locations)
    fn gen_variable_pull(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
        count: usize,
    ) -> Result<()>;

    /// Emit a push restricted to the current delay slot of a queued
    /// variable
    fn gen_current_variable_push(
        &self,
        os: &mut CodeStream,
        ng: &NeuronGroup,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    /// Emit a pull restricted to the current delay slot of a queued
    /// variable
    fn gen_current_variable_pull(
        &self,
        os: &mut CodeStream,
        ng: &NeuronGroup,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    /// Declare an extra global parameter
    fn gen_extra_global_param_definition(
        &self,
        definitions: &mut CodeStream,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    /// Emit the runtime allocation function for a pointer-typed extra
    /// global parameter
    fn gen_extra_global_param_allocation(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    /// Emit the push function for a pointer-typed extra global parameter
    fn gen_extra_global_param_push(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    /// Emit the pull function for a pointer-typed extra global parameter
    fn gen_extra_global_param_pull(
        &self,
        os: &mut CodeStream,
        ty: &str,
        name: &str,
        location: VarLocation,
    ) -> Result<()>;

    /// Declare and allocate the per-population RNG state
    fn gen_population_rng(
        &self,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        allocations: &mut CodeStream,
        free: &mut CodeStream,
        name: &str,
        count: usize,
    ) -> Result<()>;

    /// Declare and define a kernel timer pair
    fn gen_timer(
        &self,
        definitions: &mut CodeStream,
        definitions_internal: &mut CodeStream,
        runner: &mut CodeStream,
        allocations: &mut CodeStream,
        free: &mut CodeStream,
        name: &str,
    ) -> Result<()>;

    // ------------------------- Artifact preambles -------------------------

    /// Emit the top of the definitions header (includes, typedefs, DT)
    fn gen_definitions_preamble(&self, os: &mut CodeStream, model: &Model) -> Result<()>;

    /// Emit the top of the runner implementation
    fn gen_runner_preamble(&self, os: &mut CodeStream, model: &Model) -> Result<()>;

    // ------------------------- Makefile fragment -------------------------

    /// Emit makefile variable definitions (compiler, flags)
    fn gen_makefile_preamble(&self, os: &mut CodeStream) -> Result<()>;

    /// Emit the link rule
    fn gen_makefile_link_rule(&self, os: &mut CodeStream) -> Result<()>;

    /// Emit the pattern rule compiling one translation unit
    fn gen_makefile_compile_rule(&self, os: &mut CodeStream) -> Result<()>;
}

/// Pad `count` up to a whole number of `block` lanes
pub fn pad_size(count: usize, block: usize) -> usize {
    count.div_ceil(block) * block
}

/// Stable per-group offset separating deterministic RNG streams
pub fn rng_stream_offset(name: &str) -> u32 {
    name.bytes()
        .fold(2166136261u32, |h, b| (h ^ b as u32).wrapping_mul(16777619))
        & 0x7fffffff
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pad_size() {
        assert_eq!(pad_size(1, 32), 32);
        assert_eq!(pad_size(32, 32), 32);
        assert_eq!(pad_size(33, 32), 64);
        assert_eq!(pad_size(100, 64), 128);
    }

    #[test]
    fn test_kernel_names() {
        assert_eq!(Kernel::NeuronUpdate.name(), "updateNeuronsKernel");
        assert_eq!(Kernel::InitSparse.name(), "initializeSparseKernel");
    }

    #[test]
    fn test_function_template_selection() {
        let ft = FunctionTemplate {
            name: "gennrand_uniform",
            arity: 0,
            double_template: "curand_uniform_double($(rng))",
            single_template: "curand_uniform($(rng))",
        };
        assert_eq!(ft.template(Precision::Float), "curand_uniform($(rng))");
        assert_eq!(
            ft.template(Precision::Double),
            "curand_uniform_double($(rng))"
        );
    }
}
