//! Reference CUDA backend for the sngen code-generation core.
//!
//! Emits CUDA C++ scaffolding around the pipeline's snippet-derived
//! bodies: `__global__` kernels dispatching a flat thread-id space
//! sliced per population, `dd_`-prefixed device symbols mirrored through
//! `cudaMemcpyToSymbol`, `__shared__` spike staging with
//! `__syncthreads()` barriers, curand population RNGs and an nvcc
//! makefile fragment. The incomplete OpenCL path of the original system
//! is deliberately not reproduced; this backend is the reference
//! pattern.

#![deny(missing_docs)]
#![warn(clippy::all)]

mod backend;

pub use backend::{CudaBackend, KernelBlockSizes};
