//! Code-generation core for spiking neural network simulation kernels.
//!
//! Public responsibilities:
//! - Substitution engine over the `$(...)` placeholder DSL
//!   (`substitute`, `Substitutions`): name/value/function substitution,
//!   numeric-literal precision coercion, unresolved-placeholder
//!   detection
//! - `Backend` capability contract a target implements (memory
//!   management, kernel scaffolds, atomics, barriers, RNG)
//! - Presynaptic update strategies selecting how each synapse group is
//!   parallelized
//! - Generator pipeline emitting the neuron-update, synapse-update and
//!   initialization kernels plus the runner/definitions artifacts
//!
//! Key invariants:
//! - Every snippet-derived string passes function substitution, name and
//!   value substitution, `ensure_ftype` and `check_unresolved` before it
//!   reaches an output stream
//! - The generator is single-threaded and deterministic: the same
//!   finalized model produces byte-identical output
//!
//! Integration points:
//! - `sngen-model`: the finalized `Model` consumed by every emitter
//! - `sngen-cuda`: the reference `Backend` implementation

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod backend;
pub mod error;
pub mod init;
pub mod neuron_update;
pub mod presynaptic;
pub mod runner;
pub mod stream;
pub mod substitute;
pub mod substitutions;
pub mod synapse_update;

pub use backend::{
    pad_size, Backend, FunctionTemplate, GroupHandler, Handler, InitHandlers, Kernel,
    NeuronUpdateHandlers, PaddedGroup, SynapseUpdateHandlers,
};
pub use error::{CodegenError, Result};
pub use init::generate_init;
pub use neuron_update::generate_neuron_update;
pub use presynaptic::{PresynapticUpdateStrategy, PostSpan, PreSpan, PreSpanProcedural};
pub use runner::{generate_makefile_fragment, generate_runner};
pub use stream::CodeStream;
pub use substitute::{
    check_unresolved, ensure_ftype, function_substitute, name_substitutions, substitute,
    value_substitutions, write_precise,
};
pub use substitutions::Substitutions;
pub use synapse_update::generate_synapse_update;
