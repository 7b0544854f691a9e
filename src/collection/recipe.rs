//! Recipes: everything that determines a collection output.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::catalog::Query;
use crate::error::{FunnelError, Result};
use crate::value::Kwargs;

/// How one cached dataset was produced.
///
/// Two recipes with equal fields always yield the same [`Recipe::key`], in
/// any process, because every map is key-sorted when serialized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recipe {
    pub collection_name: String,
    /// Where the catalog was read from.
    pub catalog_source: String,
    /// Query including the variable column.
    pub query: Query,
    /// Operator names, in application order.
    pub operators: Vec<String>,
    pub operator_kwargs: Vec<Kwargs>,
    pub catalog_key: Option<String>,
    pub variable: Option<String>,
    /// Dependencies, when the variable is computed by a derived rule.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub derived_from: Option<Vec<String>>,
}

impl Recipe {
    /// Canonical JSON encoding.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Lowercase hex SHA-256 of [`Recipe::to_json`].
    pub fn key(&self) -> Result<String> {
        Ok(hex::encode(Sha256::digest(self.to_json()?.as_bytes())))
    }

    /// The recipe as artifact custom fields.
    pub fn to_custom_fields(&self) -> Result<Kwargs> {
        match serde_json::to_value(self)? {
            serde_json::Value::Object(fields) => Ok(fields),
            other => Err(FunnelError::validation(format!(
                "recipe serialized to a non-object: {}",
                other
            ))),
        }
    }
}
