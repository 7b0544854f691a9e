//! Derived-variable rules and their registry.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::DatasetLike;
use crate::error::{FunnelError, Result};
use crate::value::Dataset;

static GLOBAL: LazyLock<Arc<DerivedVariableRegistry<Dataset>>> =
    LazyLock::new(|| Arc::new(DerivedVariableRegistry::new()));

/// Computes a derived variable from a dataset holding its dependencies.
pub type ComputeFn<D> = Arc<dyn Fn(D) -> Result<D> + Send + Sync>;

/// A rule computing one variable from others.
pub struct DerivedVariable<D> {
    name: String,
    dependent_vars: Vec<String>,
    compute: ComputeFn<D>,
}

impl<D: DatasetLike> DerivedVariable<D> {
    pub fn new(
        name: impl Into<String>,
        dependent_vars: &[&str],
        compute: impl Fn(D) -> Result<D> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            dependent_vars: dependent_vars.iter().map(|v| v.to_string()).collect(),
            compute: Arc::new(compute),
        }
    }

    /// Name of the variable this rule produces.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dependent_vars(&self) -> &[String] {
        &self.dependent_vars
    }

    /// Dependencies absent from `dataset`, sorted.
    pub fn missing(&self, dataset: &D) -> Vec<String> {
        let mut missing: Vec<String> = self
            .dependent_vars
            .iter()
            .filter(|var| !dataset.contains(var))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }

    /// Run the rule. Every dependency must be present first.
    pub fn call(&self, dataset: D) -> Result<D> {
        let missing = self.missing(&dataset);
        if !missing.is_empty() {
            return Err(FunnelError::MissingDependency {
                variable: self.name.clone(),
                missing,
            });
        }
        (self.compute)(dataset)
    }
}

impl<D> fmt::Debug for DerivedVariable<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DerivedVariable")
            .field("name", &self.name)
            .field("dependent_vars", &self.dependent_vars)
            .finish_non_exhaustive()
    }
}

/// Derived-variable rules by variable name.
pub struct DerivedVariableRegistry<D> {
    rules: RwLock<BTreeMap<String, Arc<DerivedVariable<D>>>>,
}

impl<D: DatasetLike> DerivedVariableRegistry<D> {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(BTreeMap::new()),
        }
    }

    fn rules(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<DerivedVariable<D>>>> {
        self.rules
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn rules_mut(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<DerivedVariable<D>>>> {
        self.rules
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Register `compute` as the rule for `name` and hand it back.
    ///
    /// A second registration of the same name replaces the first.
    pub fn register<F>(&self, name: impl Into<String>, dependent_vars: &[&str], compute: F) -> F
    where
        F: Fn(D) -> Result<D> + Clone + Send + Sync + 'static,
    {
        let rule = DerivedVariable::new(name, dependent_vars, compute.clone());
        let mut rules = self.rules_mut();
        if rules.contains_key(rule.name()) {
            tracing::warn!("Overwriting derived variable '{}' definition", rule.name());
        }
        rules.insert(rule.name().to_string(), Arc::new(rule));
        compute
    }

    pub fn get(&self, name: &str) -> Option<Arc<DerivedVariable<D>>> {
        self.rules().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.rules().contains_key(name)
    }

    /// Registered variable names, sorted.
    pub fn names(&self) -> Vec<String> {
        self.rules().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.rules().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules().is_empty()
    }
}

impl DerivedVariableRegistry<Dataset> {
    /// The process-wide registry for [`Dataset`] rules.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }
}

impl<D: DatasetLike> Default for DerivedVariableRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> fmt::Debug for DerivedVariableRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<String> = match self.rules.read() {
            Ok(rules) => rules.keys().cloned().collect(),
            Err(poisoned) => poisoned.into_inner().keys().cloned().collect(),
        };
        f.debug_struct("DerivedVariableRegistry")
            .field("rules", &names)
            .finish()
    }
}
