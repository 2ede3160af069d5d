//! In-memory network model for the sngen code-generation core
//!
//! This crate holds the description side of the generator: immutable
//! snippets written in the `$(...)` placeholder DSL, neuron / synapse /
//! current-source populations, and the `Model` registry whose
//! `finalize()` pass computes the derived facts (derived parameters,
//! delay-slot counts, variable queues, merged postsynaptic inputs) that
//! code generation relies on. No code is generated here; see
//! `sngen-codegen`.

#![deny(missing_docs)]
#![warn(clippy::all)]

use core::fmt;

// Core modules
pub mod current_source;
pub mod error;
pub mod init;
pub mod matrix;
pub mod model;
pub mod neuron;
pub mod snippet;
pub mod synapse;
pub mod vars;

// Re-export essential types
pub use current_source::CurrentSource;
pub use error::{ModelError, Result};
pub use init::{SparseConnectivityInit, VarInit};
pub use matrix::{MatrixConnectivity, MatrixType, MatrixWeight, SpanType};
pub use model::Model;
pub use neuron::{MergedInSyn, NeuronGroup};
pub use snippet::{CodeRole, DerivedParam, DerivedParamFn, Snippet};
pub use synapse::{PostsynapticInit, SynapseGroup, WeightUpdateInit};
pub use vars::{ExtraGlobalParam, Var, VarAccess, VarImplementation, VarLocation};

/// Floating-point precision of generated model state.
///
/// The tag drives two coercions downstream: numeric-literal suffixes and
/// math-function name selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Precision {
    /// 32-bit `float`; literals gain an `f` suffix, math functions use
    /// their `...f` forms
    #[default]
    Float,
    /// 64-bit `double`
    Double,
    /// Extended-precision `long double`; treated like `double` for
    /// literal and math-function coercion
    LongDouble,
}

impl Precision {
    /// The C type name
    pub const fn c_type(&self) -> &'static str {
        match self {
            Precision::Float => "float",
            Precision::Double => "double",
            Precision::LongDouble => "long double",
        }
    }

    /// Is this single precision (the only mode that suffixes literals)?
    pub const fn is_single(&self) -> bool {
        matches!(self, Precision::Float)
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.c_type())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precision() {
        assert_eq!(Precision::Float.c_type(), "float");
        assert_eq!(Precision::Double.c_type(), "double");
        assert!(Precision::Float.is_single());
        assert!(!Precision::LongDouble.is_single());
        assert_eq!(Precision::default(), Precision::Float);
    }
}
