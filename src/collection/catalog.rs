//! The catalog a collection reads datasets from.

use crate::derived::DatasetLike;
use crate::error::Result;
use crate::value::Kwargs;

/// Catalog search terms: column name to a value or a list of accepted
/// values.
pub type Query = Kwargs;

/// A searchable table of datasets, grouped under catalog keys.
///
/// Implementations wrap whatever index describes the data (a CSV of files,
/// a remote listing, a fixture in tests). A collection only ever narrows a
/// catalog with [`Catalog::search`] and loads one key at a time.
pub trait Catalog: Sized {
    type Dataset: DatasetLike;

    /// Column holding variable names.
    fn variable_column(&self) -> &str;

    /// The subset of rows matching every term of `query`.
    fn search(&self, query: &Query) -> Result<Self>;

    /// Catalog keys of the rows held, sorted.
    fn keys(&self) -> Vec<String>;

    /// Distinct values of `column`, sorted.
    fn unique(&self, column: &str) -> Vec<String>;

    /// The groupby attribute values shared by the rows under `key`.
    fn key_info(&self, key: &str) -> Result<Kwargs>;

    /// Load the dataset stored under `key`.
    fn to_dataset(&self, key: &str, kwargs: &Kwargs) -> Result<Self::Dataset>;

    /// Number of rows.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
