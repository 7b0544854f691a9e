//! A minimal array-native dataset container.
//!
//! [`Dataset`] holds named [`Variable`]s laid out as flat `f64` buffers in
//! row-major order. It carries just enough behavior for the built-in
//! serializers and for derived-variable rules: size estimation, membership,
//! insertion, dropping, merging and simple reductions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{FunnelError, Result};

/// Free-form attributes attached to a variable or a dataset.
pub type Attrs = BTreeMap<String, serde_json::Value>;

/// One named n-dimensional array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    /// Dimension names, outermost first.
    pub dims: Vec<String>,
    /// Length of each dimension.
    pub shape: Vec<usize>,
    /// Row-major values.
    pub data: Vec<f64>,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Variable {
    /// Create a variable, checking that `data` fills `shape` exactly.
    pub fn new(dims: Vec<String>, shape: Vec<usize>, data: Vec<f64>) -> Result<Self> {
        if dims.len() != shape.len() {
            return Err(FunnelError::validation(format!(
                "{} dimension names for a {}-dimensional shape",
                dims.len(),
                shape.len()
            )));
        }
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(FunnelError::validation(format!(
                "shape {:?} needs {} values, got {}",
                shape,
                expected,
                data.len()
            )));
        }
        Ok(Self {
            dims,
            shape,
            data,
            attrs: Attrs::new(),
        })
    }

    /// A one-dimensional variable along `dim`.
    pub fn from_vec(dim: impl Into<String>, data: Vec<f64>) -> Self {
        Self {
            dims: vec![dim.into()],
            shape: vec![data.len()],
            data,
            attrs: Attrs::new(),
        }
    }

    /// Attach an attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    /// Estimated in-memory size of the values.
    pub fn nbytes(&self) -> u64 {
        (self.data.len() * std::mem::size_of::<f64>()) as u64
    }

    /// Apply `f` to every element, keeping dims and attrs.
    pub fn map(&self, f: impl Fn(f64) -> f64) -> Self {
        Self {
            dims: self.dims.clone(),
            shape: self.shape.clone(),
            data: self.data.iter().copied().map(f).collect(),
            attrs: self.attrs.clone(),
        }
    }

    /// Mean over one dimension, removing it.
    ///
    /// Returns `None` when the variable does not have `dim`.
    pub fn mean_over(&self, dim: &str) -> Option<Self> {
        let axis = self.dims.iter().position(|d| d == dim)?;
        let len = self.shape[axis];
        let inner: usize = self.shape[axis + 1..].iter().product();
        let outer: usize = self.shape[..axis].iter().product();

        let mut data = vec![0.0; outer * inner];
        if len > 0 {
            for o in 0..outer {
                for i in 0..inner {
                    let sum: f64 = (0..len)
                        .map(|k| self.data[(o * len + k) * inner + i])
                        .sum();
                    data[o * inner + i] = sum / len as f64;
                }
            }
        }

        let mut dims = self.dims.clone();
        let mut shape = self.shape.clone();
        dims.remove(axis);
        shape.remove(axis);
        Some(Self {
            dims,
            shape,
            data,
            attrs: self.attrs.clone(),
        })
    }
}

/// A collection of named variables sharing dimensions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub variables: BTreeMap<String, Variable>,
    #[serde(default)]
    pub attrs: Attrs,
}

impl Dataset {
    /// Create an empty dataset.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with_variable(mut self, name: impl Into<String>, var: Variable) -> Self {
        self.insert(name, var);
        self
    }

    /// Attach a dataset-level attribute.
    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    /// Insert or replace a variable.
    pub fn insert(&mut self, name: impl Into<String>, var: Variable) -> Option<Variable> {
        self.variables.insert(name.into(), var)
    }

    pub fn get(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.variables.contains_key(name)
    }

    /// Names of all variables, sorted.
    pub fn variable_names(&self) -> BTreeSet<String> {
        self.variables.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    /// Remove the named variables; names that are absent are ignored.
    pub fn drop_vars<S: AsRef<str>>(mut self, names: &[S]) -> Self {
        for name in names {
            self.variables.remove(name.as_ref());
        }
        self
    }

    /// Merge `other` into this dataset. Variables and attrs from `other` win.
    pub fn merge(mut self, other: Dataset) -> Self {
        self.variables.extend(other.variables);
        self.attrs.extend(other.attrs);
        self
    }

    /// Mean over `dim` for every variable that has it.
    pub fn mean(&self, dim: &str) -> Self {
        let variables = self
            .variables
            .iter()
            .map(|(name, var)| {
                let reduced = var.mean_over(dim).unwrap_or_else(|| var.clone());
                (name.clone(), reduced)
            })
            .collect();
        Self {
            variables,
            attrs: self.attrs.clone(),
        }
    }

    /// Estimated in-memory size of all variables.
    pub fn nbytes(&self) -> u64 {
        self.variables.values().map(Variable::nbytes).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn grid() -> Variable {
        // time x lat: [[1, 2, 3], [3, 4, 5]]
        Variable::new(
            vec!["time".into(), "lat".into()],
            vec![2, 3],
            vec![1.0, 2.0, 3.0, 3.0, 4.0, 5.0],
        )
        .unwrap()
    }

    #[test]
    fn variable_new_checks_shape() {
        let err = Variable::new(vec!["x".into()], vec![3], vec![1.0]).unwrap_err();
        assert!(err.to_string().contains("needs 3 values"));

        let err = Variable::new(vec![], vec![3], vec![1.0, 2.0, 3.0]).unwrap_err();
        assert!(err.to_string().contains("dimension names"));
    }

    #[test]
    fn mean_over_outer_dim() {
        let mean = grid().mean_over("time").unwrap();
        assert_eq!(mean.dims, vec!["lat".to_string()]);
        assert_eq!(mean.shape, vec![3]);
        assert_eq!(mean.data, vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn mean_over_inner_dim() {
        let mean = grid().mean_over("lat").unwrap();
        assert_eq!(mean.shape, vec![2]);
        assert_eq!(mean.data, vec![2.0, 4.0]);
    }

    #[test]
    fn mean_over_unknown_dim_is_none() {
        assert!(grid().mean_over("member_id").is_none());
    }

    #[test]
    fn map_keeps_attrs() {
        let var = Variable::from_vec("time", vec![273.15, 274.15]).with_attr("units", json!("K"));
        let mapped = var.map(|x| x - 273.15);
        assert_eq!(mapped.data, vec![0.0, 1.0]);
        assert_eq!(mapped.attrs["units"], json!("K"));
    }

    #[test]
    fn nbytes_sums_variables() {
        let ds = Dataset::new()
            .with_variable("a", grid())
            .with_variable("b", Variable::from_vec("time", vec![1.0, 2.0]));
        assert_eq!(ds.nbytes(), 8 * 8);
    }

    #[test]
    fn drop_vars_ignores_absent_names() {
        let ds = Dataset::new()
            .with_variable("a", grid())
            .with_variable("b", grid())
            .drop_vars(&["a", "zzz"]);
        assert_eq!(ds.variable_names().into_iter().collect::<Vec<_>>(), vec!["b"]);
    }

    #[test]
    fn merge_prefers_other() {
        let left = Dataset::new()
            .with_variable("a", Variable::from_vec("t", vec![1.0]))
            .with_attr("source", json!("left"));
        let right = Dataset::new()
            .with_variable("a", Variable::from_vec("t", vec![2.0]))
            .with_variable("b", Variable::from_vec("t", vec![3.0]))
            .with_attr("source", json!("right"));

        let merged = left.merge(right);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get("a").unwrap().data, vec![2.0]);
        assert_eq!(merged.attrs["source"], json!("right"));
    }

    #[test]
    fn dataset_mean_skips_variables_without_dim() {
        let ds = Dataset::new()
            .with_variable("grid", grid())
            .with_variable("lat", Variable::from_vec("lat", vec![10.0, 20.0, 30.0]));
        let mean = ds.mean("time");
        assert_eq!(mean.get("grid").unwrap().shape, vec![3]);
        assert_eq!(mean.get("lat").unwrap().data, vec![10.0, 20.0, 30.0]);
    }
}
