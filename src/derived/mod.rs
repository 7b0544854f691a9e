//! Derived variables and query-dependent operators.
//!
//! A derived variable is computed from other variables of a dataset; an
//! operator transforms a whole dataset. Both live in registries that are
//! generic over [`DatasetLike`], with process-wide defaults for [`Dataset`].
//!
//! ```
//! use funnel::derived::DerivedVariableRegistry;
//! use funnel::value::{Dataset, Variable};
//!
//! let registry = DerivedVariableRegistry::<Dataset>::new();
//! registry.register("air_degc", &["air"], |ds: Dataset| {
//!     let celsius = ds.get("air").map(|v| v.map(|k| k - 273.15));
//!     let mut ds = ds.drop_vars(&["air"]);
//!     if let Some(var) = celsius {
//!         ds.insert("air_degc", var);
//!     }
//!     Ok(ds)
//! });
//!
//! let ds = Dataset::new().with_variable("air", Variable::from_vec("time", vec![273.15]));
//! let out = registry.get("air_degc").unwrap().call(ds).unwrap();
//! assert_eq!(out.get("air_degc").unwrap().data, vec![0.0]);
//! assert!(!out.contains("air"));
//! ```

pub mod operator;
pub mod variable;

pub use operator::{
    OperatorFn, OperatorId, QueryDependentOperator, QueryDependentOperatorRegistry,
};
pub use variable::{ComputeFn, DerivedVariable, DerivedVariableRegistry};

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::{FunnelError, Result};
use crate::value::Dataset;

/// What derived rules and operators need to know about a dataset.
pub trait DatasetLike: Clone + Send + Sync + 'static {
    /// Names of the variables held, sorted.
    fn variable_names(&self) -> BTreeSet<String>;

    /// Estimated in-memory size.
    fn nbytes(&self) -> u64;

    /// Combine two datasets for the same catalog key.
    fn merge(self, other: Self) -> Self;

    fn contains(&self, name: &str) -> bool {
        self.variable_names().contains(name)
    }
}

impl DatasetLike for Dataset {
    fn variable_names(&self) -> BTreeSet<String> {
        Dataset::variable_names(self)
    }

    fn nbytes(&self) -> u64 {
        Dataset::nbytes(self)
    }

    fn merge(self, other: Self) -> Self {
        Dataset::merge(self, other)
    }

    fn contains(&self, name: &str) -> bool {
        Dataset::contains(self, name)
    }
}

/// Where a requested variable comes from.
#[derive(Debug)]
pub enum VariableSource<D> {
    /// Read directly from the catalog.
    Catalog,
    /// Computed from its dependencies.
    Derived(Arc<DerivedVariable<D>>),
}

impl<D> VariableSource<D> {
    pub fn is_derived(&self) -> bool {
        matches!(self, VariableSource::Derived(_))
    }
}

/// Decide whether `variable` is read from the catalog or derived.
///
/// The catalog wins when both know the variable, unless `prefer_derived`.
pub fn resolve_variable<D: DatasetLike>(
    variable: &str,
    in_catalog: bool,
    registry: &DerivedVariableRegistry<D>,
    prefer_derived: bool,
) -> Result<VariableSource<D>> {
    match (in_catalog, registry.get(variable)) {
        (true, Some(rule)) if prefer_derived => Ok(VariableSource::Derived(rule)),
        (true, Some(_)) => {
            tracing::warn!(
                "Variable '{}' is in the catalog and registered as derived; using the catalog. \
                 Set prefer_derived to compute it instead",
                variable
            );
            Ok(VariableSource::Catalog)
        }
        (true, None) => Ok(VariableSource::Catalog),
        (false, Some(rule)) => Ok(VariableSource::Derived(rule)),
        (false, None) => Err(FunnelError::not_found("variable", variable)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DerivedVariableRegistry<Dataset> {
        let registry = DerivedVariableRegistry::new();
        registry.register("x", &["a"], |ds: Dataset| Ok(ds));
        registry
    }

    #[test]
    fn catalog_only() {
        let source = resolve_variable("a", true, &registry(), false).unwrap();
        assert!(!source.is_derived());
    }

    #[test]
    fn derived_only() {
        let source = resolve_variable("x", false, &registry(), false).unwrap();
        assert!(source.is_derived());
    }

    #[test]
    fn both_prefers_catalog_unless_asked() {
        assert!(!resolve_variable("x", true, &registry(), false)
            .unwrap()
            .is_derived());
        assert!(resolve_variable("x", true, &registry(), true)
            .unwrap()
            .is_derived());
    }

    #[test]
    fn conflict_is_logged_only_when_catalog_wins() {
        let registry = registry();
        let (source, logs) =
            crate::logging::capture_logs(|| resolve_variable("x", true, &registry, false));
        assert!(!source.unwrap().is_derived());
        assert!(logs.contains("WARN"), "{logs}");
        assert!(logs.contains("Variable 'x' is in the catalog and registered as derived"));

        let (source, logs) =
            crate::logging::capture_logs(|| resolve_variable("x", true, &registry, true));
        assert!(source.unwrap().is_derived());
        assert!(!logs.contains("WARN"), "{logs}");
    }

    #[test]
    fn neither_is_not_found() {
        let err = resolve_variable("nope", false, &registry(), true).unwrap_err();
        assert!(err.is_not_found());
        assert!(err.to_string().contains("nope"));
    }
}
