//! Cached views of catalog data.
//!
//! A [`Collection`] pairs a [`Catalog`] with a chain of operators and a
//! metadata store. Each (variable, catalog key) pair is described by a
//! [`Recipe`]; the recipe's hash is the cache key, so an output is computed
//! once and loaded from the store afterwards.
//!
//! Variables missing from the catalog are computed from a
//! [`DerivedVariableRegistry`] rule when one is registered. Operators that
//! were registered as query-dependent receive the catalog key's groupby
//! values alongside their own kwargs.

pub mod catalog;
pub mod recipe;

pub use catalog::{Catalog, Query};
pub use recipe::Recipe;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::cache::PutOptions;
use crate::config::Settings;
use crate::derived::{
    resolve_variable, DatasetLike, DerivedVariable, DerivedVariableRegistry, OperatorFn,
    OperatorId, QueryDependentOperatorRegistry, VariableSource,
};
use crate::error::{FunnelError, Result};
use crate::metadata::MetadataStore;
use crate::serializers::DATASET_CHUNKED;
use crate::value::{CacheValue, Kwargs};

/// Size above which a freshly computed dataset triggers a warning.
pub const DEFAULT_LARGE_DATASET_BYTES: u64 = 1 << 30;

/// A named dataset transformation.
pub struct Operator<D> {
    name: String,
    func: OperatorFn<D>,
}

impl<D> Operator<D> {
    pub fn new(name: impl Into<String>, func: OperatorFn<D>) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> OperatorId {
        OperatorId::of(self.func)
    }
}

impl<D> Clone for Operator<D> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            func: self.func,
        }
    }
}

impl<D> fmt::Debug for Operator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Operator").field("name", &self.name).finish()
    }
}

/// Builder for a [`Collection`].
pub struct CollectionBuilder<C: Catalog> {
    name: String,
    catalog_source: String,
    catalog: C,
    metadata_store: Arc<dyn MetadataStore>,
    query: Query,
    operators: Vec<Operator<C::Dataset>>,
    operator_kwargs: Vec<Kwargs>,
    load_kwargs: Kwargs,
    serializer: String,
    derived: Option<Arc<DerivedVariableRegistry<C::Dataset>>>,
    query_operators: Option<Arc<QueryDependentOperatorRegistry<C::Dataset>>>,
    large_dataset_bytes: u64,
}

impl<C: Catalog> CollectionBuilder<C> {
    /// Base query applied to every search. The variable column is ignored.
    pub fn query(mut self, query: Query) -> Self {
        self.query = query;
        self
    }

    /// Operators applied in order, with one kwargs map each. An empty
    /// `kwargs` means no kwargs for any operator.
    pub fn operators(mut self, operators: Vec<Operator<C::Dataset>>, kwargs: Vec<Kwargs>) -> Self {
        self.operators = operators;
        self.operator_kwargs = kwargs;
        self
    }

    /// Kwargs passed to [`Catalog::to_dataset`].
    pub fn load_kwargs(mut self, kwargs: Kwargs) -> Self {
        self.load_kwargs = kwargs;
        self
    }

    pub fn serializer(mut self, name: impl Into<String>) -> Self {
        self.serializer = name.into();
        self
    }

    /// Take the serializer from the configured cache format.
    pub fn settings(self, settings: &Settings) -> Self {
        self.serializer(settings.serializer())
    }

    pub fn derived_variables(mut self, registry: Arc<DerivedVariableRegistry<C::Dataset>>) -> Self {
        self.derived = Some(registry);
        self
    }

    pub fn query_operators(
        mut self,
        registry: Arc<QueryDependentOperatorRegistry<C::Dataset>>,
    ) -> Self {
        self.query_operators = Some(registry);
        self
    }

    pub fn large_dataset_bytes(mut self, bytes: u64) -> Self {
        self.large_dataset_bytes = bytes;
        self
    }

    pub fn build(self) -> Result<Collection<C>> {
        let mut operator_kwargs = self.operator_kwargs;
        if operator_kwargs.is_empty() {
            operator_kwargs = vec![Kwargs::new(); self.operators.len()];
        }
        if operator_kwargs.len() != self.operators.len() {
            return Err(FunnelError::validation(format!(
                "collection '{}' has {} operators but {} operator kwargs",
                self.name,
                self.operators.len(),
                operator_kwargs.len()
            )));
        }

        let mut query = self.query;
        let variable_column = self.catalog.variable_column().to_string();
        if let Some(variable) = query.remove(&variable_column) {
            tracing::warn!(
                "Ignoring '{}: {}' in the query of collection '{}'; variables are chosen per call",
                variable_column,
                variable,
                self.name
            );
        }

        Ok(Collection {
            name: self.name,
            catalog_source: self.catalog_source,
            catalog: self.catalog,
            metadata_store: self.metadata_store,
            query,
            operators: self.operators,
            operator_kwargs,
            load_kwargs: self.load_kwargs,
            serializer: self.serializer,
            derived: self
                .derived
                .unwrap_or_else(|| Arc::new(DerivedVariableRegistry::new())),
            query_operators: self
                .query_operators
                .unwrap_or_else(|| Arc::new(QueryDependentOperatorRegistry::new())),
            large_dataset_bytes: self.large_dataset_bytes,
        })
    }
}

/// A catalog, an operator chain and the store caching their outputs.
///
/// Registries default to empty, collection-local instances; pass
/// [`DerivedVariableRegistry::global`] and
/// [`QueryDependentOperatorRegistry::global`] to share the process-wide
/// ones.
pub struct Collection<C: Catalog> {
    name: String,
    catalog_source: String,
    catalog: C,
    metadata_store: Arc<dyn MetadataStore>,
    query: Query,
    operators: Vec<Operator<C::Dataset>>,
    operator_kwargs: Vec<Kwargs>,
    load_kwargs: Kwargs,
    serializer: String,
    derived: Arc<DerivedVariableRegistry<C::Dataset>>,
    query_operators: Arc<QueryDependentOperatorRegistry<C::Dataset>>,
    large_dataset_bytes: u64,
}

impl<C> Collection<C>
where
    C: Catalog,
    C::Dataset: Into<CacheValue> + TryFrom<CacheValue, Error = FunnelError>,
{
    pub fn builder(
        name: impl Into<String>,
        catalog_source: impl Into<String>,
        catalog: C,
        metadata_store: Arc<dyn MetadataStore>,
    ) -> CollectionBuilder<C> {
        CollectionBuilder {
            name: name.into(),
            catalog_source: catalog_source.into(),
            catalog,
            metadata_store,
            query: Query::new(),
            operators: Vec::new(),
            operator_kwargs: Vec::new(),
            load_kwargs: Kwargs::new(),
            serializer: DATASET_CHUNKED.to_string(),
            derived: None,
            query_operators: None,
            large_dataset_bytes: DEFAULT_LARGE_DATASET_BYTES,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn query(&self) -> &Query {
        &self.query
    }

    pub fn serializer(&self) -> &str {
        &self.serializer
    }

    pub fn metadata_store(&self) -> &Arc<dyn MetadataStore> {
        &self.metadata_store
    }

    /// Variables the catalog holds directly.
    pub fn base_variables(&self) -> Vec<String> {
        self.catalog.unique(self.catalog.variable_column())
    }

    /// The base query narrowed to `variables`.
    fn query_for(&self, variables: &[String]) -> Query {
        let mut query = self.query.clone();
        let value = match variables {
            [single] => Value::String(single.clone()),
            many => Value::Array(many.iter().cloned().map(Value::String).collect()),
        };
        query.insert(self.catalog.variable_column().to_string(), value);
        query
    }

    /// The recipe describing `variable` read from the catalog under
    /// `catalog_key`.
    pub fn recipe(&self, variable: &str, catalog_key: &str) -> Recipe {
        Recipe {
            collection_name: self.name.clone(),
            catalog_source: self.catalog_source.clone(),
            query: self.query_for(&[variable.to_string()]),
            operators: self.operators.iter().map(|op| op.name.clone()).collect(),
            operator_kwargs: self.operator_kwargs.clone(),
            catalog_key: Some(catalog_key.to_string()),
            variable: Some(variable.to_string()),
            derived_from: None,
        }
    }

    /// The recipe describing `rule`'s variable computed under `catalog_key`.
    pub fn derived_recipe(
        &self,
        rule: &DerivedVariable<C::Dataset>,
        catalog_key: &str,
    ) -> Recipe {
        Recipe {
            derived_from: Some(rule.dependent_vars().to_vec()),
            ..self.recipe(rule.name(), catalog_key)
        }
    }

    /// Datasets for `variables`, keyed by catalog key.
    ///
    /// Variables sharing a catalog key are merged into one dataset.
    pub fn to_dataset_dict<S: AsRef<str>>(
        &self,
        variables: &[S],
        prefer_derived: bool,
    ) -> Result<BTreeMap<String, C::Dataset>> {
        let mut merged: BTreeMap<String, C::Dataset> = BTreeMap::new();
        for variable in variables {
            for (key, ds) in self.variable_datasets(variable.as_ref(), prefer_derived)? {
                let ds = match merged.remove(&key) {
                    Some(existing) => existing.merge(ds),
                    None => ds,
                };
                merged.insert(key, ds);
            }
        }
        Ok(merged)
    }

    fn variable_datasets(
        &self,
        variable: &str,
        prefer_derived: bool,
    ) -> Result<BTreeMap<String, C::Dataset>> {
        let subset = self.catalog.search(&self.query_for(&[variable.to_string()]))?;
        let source = resolve_variable(variable, !subset.is_empty(), &self.derived, prefer_derived)?;
        let (subset, rule) = match source {
            VariableSource::Catalog => (subset, None),
            VariableSource::Derived(rule) => {
                let subset = self.catalog.search(&self.query_for(rule.dependent_vars()))?;
                (subset, Some(rule))
            }
        };

        let mut dsets = BTreeMap::new();
        for catalog_key in subset.keys() {
            let recipe = match &rule {
                Some(rule) => self.derived_recipe(rule, &catalog_key),
                None => self.recipe(variable, &catalog_key),
            };
            let cache_key = recipe.key()?;

            if self.metadata_store.contains(&cache_key)? {
                tracing::debug!("Cache hit for '{}' in {}", variable, catalog_key);
                let value = self.metadata_store.get(&cache_key, &Kwargs::new())?;
                dsets.insert(catalog_key, C::Dataset::try_from(value)?);
                continue;
            }

            tracing::debug!("Cache miss for '{}' in {}", variable, catalog_key);
            let mut ds = subset.to_dataset(&catalog_key, &self.load_kwargs)?;
            if let Some(rule) = &rule {
                ds = rule.call(ds)?;
            }
            ds = self.apply_operators(ds, &subset.key_info(&catalog_key)?)?;

            let nbytes = ds.nbytes();
            if nbytes > self.large_dataset_bytes {
                tracing::warn!(
                    "Caching a large dataset for '{}' in {}: {:.3} GB",
                    variable,
                    catalog_key,
                    nbytes as f64 / 1e9
                );
            }

            let options = PutOptions::new()
                .serializer(&self.serializer)
                .custom_fields(recipe.to_custom_fields()?);
            self.metadata_store
                .put(&cache_key, &ds.clone().into(), options)?;
            dsets.insert(catalog_key, ds);
        }
        Ok(dsets)
    }

    /// Run the operator chain over `ds`.
    pub fn apply_operators(&self, mut ds: C::Dataset, key_info: &Kwargs) -> Result<C::Dataset> {
        for (operator, kwargs) in self.operators.iter().zip(&self.operator_kwargs) {
            ds = match self.query_operators.get(operator.id()) {
                Some(query_dependent) => query_dependent.call(ds, key_info, kwargs)?,
                None => (operator.func)(ds, kwargs)?,
            };
        }
        Ok(ds)
    }
}

impl<C: Catalog> fmt::Debug for Collection<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("catalog_source", &self.catalog_source)
            .field("query", &self.query)
            .field("operators", &self.operators)
            .field("serializer", &self.serializer)
            .finish_non_exhaustive()
    }
}
