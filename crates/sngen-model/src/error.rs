//! Error types for model construction and finalization

use thiserror::Error;

/// Result type for model operations
pub type Result<T> = std::result::Result<T, ModelError>;

/// Errors that can occur while building or finalizing a network model
#[derive(Error, Debug)]
pub enum ModelError {
    /// A group name was reused within its category
    #[error("Duplicate {category} name '{name}'")]
    DuplicateName {
        /// Group category (neuron population, synapse population, current source)
        category: &'static str,
        /// The offending name
        name: String,
    },

    /// A synapse population or current source referenced a neuron group
    /// that does not exist
    #[error("Unknown neuron population '{name}' referenced by {referrer}")]
    UnknownNeuronGroup {
        /// Name that failed to resolve
        name: String,
        /// The group doing the referencing
        referrer: String,
    },

    /// A variable name was used that the snippet does not declare
    #[error("Snippet '{snippet}' has no variable '{var}'")]
    UnknownVariable {
        /// Snippet name
        snippet: String,
        /// The unknown variable name
        var: String,
    },

    /// A parameter was missing or unexpected for a snippet
    #[error("Invalid parameters for snippet '{snippet}': {reason}")]
    InvalidParameters {
        /// Snippet name
        snippet: String,
        /// What was wrong
        reason: String,
    },

    /// Invalid parameter value for a group or setter
    #[error("Invalid parameter {parameter}: {value} (expected {constraint})")]
    InvalidParameter {
        /// Parameter name
        parameter: String,
        /// Invalid value
        value: String,
        /// Constraint description
        constraint: String,
    },

    /// An unsupported matrix type / feature combination
    #[error("Incompatible configuration for synapse population '{name}': {reason}")]
    IncompatibleConfiguration {
        /// Synapse population name
        name: String,
        /// Why the combination is rejected
        reason: String,
    },

    /// The model was mutated after finalize
    #[error("Model '{name}' is already finalized")]
    AlreadyFinalized {
        /// Model name
        name: String,
    },

    /// Delay-requirement propagation failed to reach a fixed point
    #[error("Delay requirements did not converge after {iterations} passes (cyclic dependency involving '{group}')")]
    DelayCycle {
        /// Number of propagation passes attempted
        iterations: usize,
        /// A group still changing on the last pass
        group: String,
    },

    /// A derived-parameter function produced a non-finite value
    #[error("Derived parameter '{param}' of '{group}' evaluated to a non-finite value")]
    InvalidDerivedParameter {
        /// Derived parameter name
        param: String,
        /// Group the parameter belongs to
        group: String,
    },
}

impl ModelError {
    /// Create a duplicate-name error
    pub fn duplicate_name(category: &'static str, name: impl Into<String>) -> Self {
        Self::DuplicateName {
            category,
            name: name.into(),
        }
    }

    /// Create an unknown-neuron-group error
    pub fn unknown_neuron_group(name: impl Into<String>, referrer: impl Into<String>) -> Self {
        Self::UnknownNeuronGroup {
            name: name.into(),
            referrer: referrer.into(),
        }
    }

    /// Create an invalid-parameter error
    pub fn invalid_parameter(
        parameter: impl Into<String>,
        value: impl Into<String>,
        constraint: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            value: value.into(),
            constraint: constraint.into(),
        }
    }

    /// Create an incompatible-configuration error
    pub fn incompatible(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::IncompatibleConfiguration {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ModelError::duplicate_name("neuron population", "Exc");
        assert!(format!("{}", err).contains("Duplicate neuron population name 'Exc'"));

        let err = ModelError::unknown_neuron_group("Missing", "Syn0");
        assert!(format!("{}", err).contains("Unknown neuron population 'Missing'"));
    }
}
