//! Dataset operators whose arguments depend on the catalog query.
//!
//! An operator is a plain function pointer; its address identifies it in
//! the registry, so the same function registered twice replaces itself.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, LazyLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::DatasetLike;
use crate::error::{FunnelError, Result};
use crate::value::{Dataset, Kwargs};

static GLOBAL: LazyLock<Arc<QueryDependentOperatorRegistry<Dataset>>> =
    LazyLock::new(|| Arc::new(QueryDependentOperatorRegistry::new()));

/// A dataset transformation taking keyword arguments.
pub type OperatorFn<D> = fn(D, &Kwargs) -> Result<D>;

/// Identity of an operator function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorId(usize);

impl OperatorId {
    pub fn of<D>(func: OperatorFn<D>) -> Self {
        OperatorId(func as usize)
    }
}

impl fmt::Display for OperatorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "operator@{:#x}", self.0)
    }
}

/// An operator that also receives values of the catalog query.
#[derive(Clone)]
pub struct QueryDependentOperator<D> {
    func: OperatorFn<D>,
    query_keys: Vec<String>,
}

impl<D: DatasetLike> QueryDependentOperator<D> {
    pub fn new(func: OperatorFn<D>, query_keys: &[&str]) -> Self {
        Self {
            func,
            query_keys: query_keys.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn id(&self) -> OperatorId {
        OperatorId::of(self.func)
    }

    pub fn query_keys(&self) -> &[String] {
        &self.query_keys
    }

    /// Run the operator with `kwargs` plus the `query_context` value of
    /// every query key. Context values win over same-named kwargs.
    pub fn call(&self, dataset: D, query_context: &Kwargs, kwargs: &Kwargs) -> Result<D> {
        let mut merged = kwargs.clone();
        for key in &self.query_keys {
            let value = query_context.get(key).ok_or_else(|| {
                FunnelError::validation(format!(
                    "query key '{}' required by {} is missing from the query context",
                    key,
                    self.id()
                ))
            })?;
            merged.insert(key.clone(), value.clone());
        }
        (self.func)(dataset, &merged)
    }
}

impl<D> fmt::Debug for QueryDependentOperator<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryDependentOperator")
            .field("func", &(self.func as usize as *const ()))
            .field("query_keys", &self.query_keys)
            .finish()
    }
}

/// Query-dependent operators by [`OperatorId`].
pub struct QueryDependentOperatorRegistry<D> {
    operators: RwLock<BTreeMap<OperatorId, Arc<QueryDependentOperator<D>>>>,
}

impl<D: DatasetLike> QueryDependentOperatorRegistry<D> {
    pub fn new() -> Self {
        Self {
            operators: RwLock::new(BTreeMap::new()),
        }
    }

    fn operators(
        &self,
    ) -> RwLockReadGuard<'_, BTreeMap<OperatorId, Arc<QueryDependentOperator<D>>>> {
        self.operators
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn operators_mut(
        &self,
    ) -> RwLockWriteGuard<'_, BTreeMap<OperatorId, Arc<QueryDependentOperator<D>>>> {
        self.operators
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Mark `func` as needing `query_keys` from the query context and hand
    /// it back.
    pub fn register(&self, func: OperatorFn<D>, query_keys: &[&str]) -> OperatorFn<D> {
        let operator = QueryDependentOperator::new(func, query_keys);
        let mut operators = self.operators_mut();
        if operators.contains_key(&operator.id()) {
            tracing::warn!("Overwriting query dependent operator {} definition", operator.id());
        }
        operators.insert(operator.id(), Arc::new(operator));
        func
    }

    pub fn get(&self, id: OperatorId) -> Option<Arc<QueryDependentOperator<D>>> {
        self.operators().get(&id).cloned()
    }

    pub fn contains(&self, func: OperatorFn<D>) -> bool {
        self.operators().contains_key(&OperatorId::of(func))
    }

    pub fn len(&self) -> usize {
        self.operators().len()
    }

    pub fn is_empty(&self) -> bool {
        self.operators().is_empty()
    }
}

impl QueryDependentOperatorRegistry<Dataset> {
    /// The process-wide registry for [`Dataset`] operators.
    pub fn global() -> Arc<Self> {
        GLOBAL.clone()
    }
}

impl<D: DatasetLike> Default for QueryDependentOperatorRegistry<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> fmt::Debug for QueryDependentOperatorRegistry<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let count = match self.operators.read() {
            Ok(operators) => operators.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        };
        f.debug_struct("QueryDependentOperatorRegistry")
            .field("operators", &count)
            .finish()
    }
}
