//! Error types for code generation

use thiserror::Error;

/// Result type for code-generation operations
pub type Result<T> = std::result::Result<T, CodegenError>;

/// Errors that can occur while generating code
#[derive(Error, Debug)]
pub enum CodegenError {
    /// Model-layer error surfaced during generation
    #[error("Model error: {source}")]
    Model {
        #[from]
        /// Source model error
        source: sngen_model::ModelError,
    },

    /// A placeholder survived every substitution pass
    #[error("Unresolved placeholder(s) in {context}: {}", residues.join(", "))]
    UnresolvedPlaceholder {
        /// Which snippet/role the code came from
        context: String,
        /// The placeholders still present
        residues: Vec<String>,
    },

    /// A function-style placeholder was malformed
    #[error("Bad invocation of $({function}, ...): {reason}")]
    FunctionSubstitution {
        /// Function placeholder name
        function: String,
        /// What was wrong (arity mismatch, empty argument, unbalanced parens)
        reason: String,
    },

    /// No presynaptic update strategy accepts the synapse group
    #[error("No presynaptic update strategy is compatible with synapse group '{group}'")]
    NoCompatibleStrategy {
        /// The offending synapse group
        group: String,
    },

    /// The backend cannot provide a required capability
    #[error("Backend '{backend}' cannot {capability}")]
    IncompatibleBackend {
        /// Backend name
        backend: String,
        /// The capability that was requested
        capability: String,
    },

    /// Error from the output stream, propagated verbatim
    #[error("Output stream error: {0}")]
    Stream(#[from] std::fmt::Error),
}

impl CodegenError {
    /// Create an unresolved-placeholder error
    pub fn unresolved(context: impl Into<String>, residues: Vec<String>) -> Self {
        Self::UnresolvedPlaceholder {
            context: context.into(),
            residues,
        }
    }

    /// Create a function-substitution error
    pub fn bad_function(function: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FunctionSubstitution {
            function: function.into(),
            reason: reason.into(),
        }
    }

    /// Create an incompatible-backend error
    pub fn incompatible_backend(
        backend: impl Into<String>,
        capability: impl Into<String>,
    ) -> Self {
        Self::IncompatibleBackend {
            backend: backend.into(),
            capability: capability.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CodegenError::unresolved(
            "LIF:sim",
            vec!["$(foo)".to_string(), "$(bar)".to_string()],
        );
        let msg = format!("{}", err);
        assert!(msg.contains("LIF:sim"));
        assert!(msg.contains("$(foo), $(bar)"));

        let err = CodegenError::bad_function("scale", "expected 2 arguments, found 1");
        assert!(format!("{}", err).contains("$(scale, ...)"));
    }
}
