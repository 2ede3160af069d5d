//! Current sources: external injection applied to a neuron population

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{ModelError, Result};
use crate::init::VarInit;
use crate::snippet::{CodeRole, Snippet};
use crate::vars::VarLocation;

/// An external current injection applied to a neuron population each
/// timestep
#[derive(Debug, Clone)]
pub struct CurrentSource {
    name: String,
    snippet: Arc<Snippet>,
    target: String,
    params: BTreeMap<String, f64>,

    pub(crate) derived_params: BTreeMap<String, f64>,
    pub(crate) var_initialisers: BTreeMap<String, VarInit>,
    pub(crate) var_locations: BTreeMap<String, VarLocation>,
}

impl CurrentSource {
    pub(crate) fn new(
        name: String,
        snippet: Arc<Snippet>,
        target: String,
        params: BTreeMap<String, f64>,
        var_initialisers: BTreeMap<String, VarInit>,
        default_location: VarLocation,
    ) -> Result<Self> {
        snippet.validate_params(&params)?;
        for var in var_initialisers.keys() {
            if !snippet.has_var(var) {
                return Err(ModelError::UnknownVariable {
                    snippet: snippet.name().to_string(),
                    var: var.clone(),
                });
            }
        }

        let var_locations = snippet
            .vars()
            .iter()
            .map(|v| (v.name.clone(), default_location))
            .collect();

        Ok(Self {
            name,
            snippet,
            target,
            params,
            derived_params: BTreeMap::new(),
            var_initialisers,
            var_locations,
        })
    }

    /// Current source name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The current-source snippet
    pub fn snippet(&self) -> &Snippet {
        &self.snippet
    }

    /// Target neuron population name
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Parameter values
    pub fn params(&self) -> &BTreeMap<String, f64> {
        &self.params
    }

    /// Derived parameter values (filled by finalize)
    pub fn derived_params(&self) -> &BTreeMap<String, f64> {
        &self.derived_params
    }

    /// Variable initializers
    pub fn var_initialisers(&self) -> &BTreeMap<String, VarInit> {
        &self.var_initialisers
    }

    /// The injection code, if the snippet declares one
    pub fn injection_code(&self) -> Option<&str> {
        self.snippet.code(CodeRole::Injection)
    }

    /// Storage location of a variable
    pub fn var_location(&self, var: &str) -> VarLocation {
        self.var_locations.get(var).copied().unwrap_or_default()
    }

    /// Materialize derived parameters
    pub(crate) fn finalize_derived(&mut self, dt: f64) -> Result<()> {
        let snippet = Arc::clone(&self.snippet);
        self.derived_params = snippet.compute_derived_params(&self.params, dt);
        for (name, value) in &self.derived_params {
            if !value.is_finite() {
                return Err(ModelError::InvalidDerivedParameter {
                    param: name.clone(),
                    group: self.name.clone(),
                });
            }
        }
        for init in self.var_initialisers.values_mut() {
            init.finalize(dt);
        }
        Ok(())
    }

    /// Does initialization of this source's state draw random numbers?
    pub fn is_init_rng_required(&self) -> bool {
        self.var_initialisers.values().any(|i| i.requires_rng())
    }

    /// Set the storage location of a variable
    pub fn set_var_location(&mut self, var: &str, location: VarLocation) -> Result<()> {
        if !self.snippet.has_var(var) {
            return Err(ModelError::UnknownVariable {
                snippet: self.snippet.name().to_string(),
                var: var.to_string(),
            });
        }
        self.var_locations.insert(var.to_string(), location);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dc_snippet() -> Arc<Snippet> {
        Arc::new(
            Snippet::new("DC")
                .with_param("amp")
                .with_code(CodeRole::Injection, "$(injectCurrent, $(amp));"),
        )
    }

    #[test]
    fn test_construction() {
        let mut params = BTreeMap::new();
        params.insert("amp".to_string(), 0.7);
        let cs = CurrentSource::new(
            "Stim".to_string(),
            dc_snippet(),
            "Exc".to_string(),
            params,
            BTreeMap::new(),
            VarLocation::HOST_DEVICE,
        )
        .unwrap();

        assert_eq!(cs.name(), "Stim");
        assert_eq!(cs.target(), "Exc");
        assert_eq!(cs.injection_code(), Some("$(injectCurrent, $(amp));"));
    }

    #[test]
    fn test_rejects_bad_params() {
        let err = CurrentSource::new(
            "Stim".to_string(),
            dc_snippet(),
            "Exc".to_string(),
            BTreeMap::new(),
            BTreeMap::new(),
            VarLocation::HOST_DEVICE,
        );
        assert!(err.is_err());
    }
}
