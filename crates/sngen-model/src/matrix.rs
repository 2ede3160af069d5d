//! Synaptic matrix representations and update parallelization axes

use core::fmt;

use crate::error::{ModelError, Result};

/// How connectivity between two populations is represented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixConnectivity {
    /// Every (pre, post) pair has a synapse
    Dense,
    /// Ragged row-length / column-index representation
    Sparse,
    /// One bit per (pre, post) pair
    Bitmask,
    /// Regenerated from a seed/rule on each access; never stored
    Procedural,
}

/// How synaptic weights are represented
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixWeight {
    /// One state element per synapse
    Individual,
    /// One value shared by the whole population
    Global,
    /// Re-derived on demand from the connectivity rule
    Procedural,
}

/// A validated (connectivity, weight) combination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatrixType {
    connectivity: MatrixConnectivity,
    weight: MatrixWeight,
}

impl MatrixType {
    /// Dense connectivity with per-synapse weights
    pub const DENSE_INDIVIDUAL: Self = Self {
        connectivity: MatrixConnectivity::Dense,
        weight: MatrixWeight::Individual,
    };

    /// Dense connectivity with one global weight
    pub const DENSE_GLOBAL: Self = Self {
        connectivity: MatrixConnectivity::Dense,
        weight: MatrixWeight::Global,
    };

    /// Sparse connectivity with per-synapse weights
    pub const SPARSE_INDIVIDUAL: Self = Self {
        connectivity: MatrixConnectivity::Sparse,
        weight: MatrixWeight::Individual,
    };

    /// Sparse connectivity with one global weight
    pub const SPARSE_GLOBAL: Self = Self {
        connectivity: MatrixConnectivity::Sparse,
        weight: MatrixWeight::Global,
    };

    /// Bitmask connectivity with one global weight
    pub const BITMASK_GLOBAL: Self = Self {
        connectivity: MatrixConnectivity::Bitmask,
        weight: MatrixWeight::Global,
    };

    /// Procedural connectivity with one global weight
    pub const PROCEDURAL_GLOBAL: Self = Self {
        connectivity: MatrixConnectivity::Procedural,
        weight: MatrixWeight::Global,
    };

    /// Procedural connectivity with procedurally derived weights
    pub const PROCEDURAL_PROCEDURAL: Self = Self {
        connectivity: MatrixConnectivity::Procedural,
        weight: MatrixWeight::Procedural,
    };

    /// Build a matrix type, rejecting combinations that have no storage
    /// story: per-synapse state cannot hang off connectivity that is never
    /// materialized (procedural) or has no per-synapse addressing (bitmask).
    pub fn checked(
        name: &str,
        connectivity: MatrixConnectivity,
        weight: MatrixWeight,
    ) -> Result<Self> {
        match (connectivity, weight) {
            (MatrixConnectivity::Procedural, MatrixWeight::Individual)
            | (MatrixConnectivity::Bitmask, MatrixWeight::Individual) => {
                Err(ModelError::incompatible(
                    name,
                    format!(
                        "{:?} connectivity cannot carry individual per-synapse weights",
                        connectivity
                    ),
                ))
            }
            (c, MatrixWeight::Procedural) if c != MatrixConnectivity::Procedural => {
                Err(ModelError::incompatible(
                    name,
                    "procedural weights require procedural connectivity",
                ))
            }
            _ => Ok(Self {
                connectivity,
                weight,
            }),
        }
    }

    /// Connectivity representation
    pub fn connectivity(&self) -> MatrixConnectivity {
        self.connectivity
    }

    /// Weight representation
    pub fn weight(&self) -> MatrixWeight {
        self.weight
    }

    /// Does the matrix store per-synapse state?
    pub fn has_individual_weights(&self) -> bool {
        self.weight == MatrixWeight::Individual
    }

    /// Is connectivity stored as ragged rows?
    pub fn is_sparse(&self) -> bool {
        self.connectivity == MatrixConnectivity::Sparse
    }

    /// Is connectivity regenerated on demand?
    pub fn is_procedural(&self) -> bool {
        self.connectivity == MatrixConnectivity::Procedural
    }
}

impl fmt::Display for MatrixType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", self.connectivity, self.weight)
    }
}

/// The parallelization axis for a synapse-group update
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SpanType {
    /// One thread per postsynaptic target
    #[default]
    Postsynaptic,
    /// One thread (or `threads_per_spike`) per presynaptic spike
    Presynaptic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_combinations() {
        assert!(MatrixType::checked(
            "sg",
            MatrixConnectivity::Dense,
            MatrixWeight::Individual
        )
        .is_ok());
        assert!(MatrixType::checked(
            "sg",
            MatrixConnectivity::Sparse,
            MatrixWeight::Global
        )
        .is_ok());
        assert!(MatrixType::checked(
            "sg",
            MatrixConnectivity::Procedural,
            MatrixWeight::Procedural
        )
        .is_ok());
    }

    #[test]
    fn test_rejected_combinations() {
        assert!(MatrixType::checked(
            "sg",
            MatrixConnectivity::Procedural,
            MatrixWeight::Individual
        )
        .is_err());
        assert!(MatrixType::checked(
            "sg",
            MatrixConnectivity::Bitmask,
            MatrixWeight::Individual
        )
        .is_err());
        assert!(MatrixType::checked(
            "sg",
            MatrixConnectivity::Dense,
            MatrixWeight::Procedural
        )
        .is_err());
    }

    #[test]
    fn test_predicates() {
        assert!(MatrixType::SPARSE_INDIVIDUAL.is_sparse());
        assert!(MatrixType::SPARSE_INDIVIDUAL.has_individual_weights());
        assert!(MatrixType::PROCEDURAL_GLOBAL.is_procedural());
        assert!(!MatrixType::DENSE_GLOBAL.has_individual_weights());
    }
}
