//! Single-file dataset format.
//!
//! Layout:
//!
//! ```text
//! "FNLC" | version: u8 | header_len: u64 LE | header (JSON) | values (f64 LE)
//! ```
//!
//! The header lists each variable with its dims, shape, attrs and the offset
//! (in values) of its data in the value section.

use anyhow::{bail, ensure, Context};
use serde::{Deserialize, Serialize};

use super::{check_kwargs, drop_variables, Serializer, DATASET_CONTAINER};
use crate::error::{FunnelError, Result};
use crate::storage::Backend;
use crate::value::dataset::Attrs;
use crate::value::{CacheValue, Dataset, Kwargs, Variable};

const MAGIC: &[u8; 4] = b"FNLC";
const VERSION: u8 = 1;
const PREAMBLE: usize = 4 + 1 + 8;

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    attrs: Attrs,
    variables: Vec<VariableHeader>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VariableHeader {
    name: String,
    dims: Vec<String>,
    shape: Vec<usize>,
    attrs: Attrs,
    offset: usize,
    len: usize,
}

/// Factory for the single-file dataset serializer.
pub fn serializer() -> Serializer {
    Serializer::new(DATASET_CONTAINER, load, dump)
}

fn load(backend: &dyn Backend, path: &str, kwargs: &Kwargs) -> Result<CacheValue> {
    check_kwargs(DATASET_CONTAINER, kwargs, &["drop_variables"])?;
    let dropped = drop_variables(DATASET_CONTAINER, kwargs)?;
    let bytes = backend.read(path)?;
    let ds = decode(&bytes)?.drop_vars(&dropped);
    Ok(CacheValue::Dataset(ds))
}

fn dump(value: &CacheValue, backend: &dyn Backend, path: &str, kwargs: &Kwargs) -> Result<()> {
    check_kwargs(DATASET_CONTAINER, kwargs, &[])?;
    let ds = value.as_dataset().ok_or_else(|| {
        FunnelError::validation(format!(
            "'{}' can only store datasets, got {}",
            DATASET_CONTAINER,
            value.kind()
        ))
    })?;
    backend.write(path, &encode(ds)?)
}

pub(super) fn encode(ds: &Dataset) -> Result<Vec<u8>> {
    let mut offset = 0;
    let mut variables = Vec::with_capacity(ds.len());
    for (name, var) in &ds.variables {
        variables.push(VariableHeader {
            name: name.clone(),
            dims: var.dims.clone(),
            shape: var.shape.clone(),
            attrs: var.attrs.clone(),
            offset,
            len: var.data.len(),
        });
        offset += var.data.len();
    }
    let header = serde_json::to_vec(&Header {
        attrs: ds.attrs.clone(),
        variables,
    })?;

    let mut out = Vec::with_capacity(PREAMBLE + header.len() + offset * 8);
    out.extend_from_slice(MAGIC);
    out.push(VERSION);
    out.extend_from_slice(&(header.len() as u64).to_le_bytes());
    out.extend_from_slice(&header);
    for var in ds.variables.values() {
        for value in &var.data {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    Ok(out)
}

pub(super) fn decode(bytes: &[u8]) -> anyhow::Result<Dataset> {
    ensure!(
        bytes.len() >= PREAMBLE && &bytes[..4] == MAGIC,
        "not a dataset container (bad header)"
    );
    if bytes[4] != VERSION {
        bail!("unsupported container version {}", bytes[4]);
    }
    let mut len_bytes = [0u8; 8];
    len_bytes.copy_from_slice(&bytes[5..PREAMBLE]);
    let header_len = u64::from_le_bytes(len_bytes) as usize;
    let values_start = PREAMBLE
        .checked_add(header_len)
        .filter(|end| *end <= bytes.len())
        .context("truncated container header")?;

    let header: Header = serde_json::from_slice(&bytes[PREAMBLE..values_start])
        .context("invalid container header")?;
    let values = &bytes[values_start..];

    let mut ds = Dataset::new();
    ds.attrs = header.attrs;
    for var in header.variables {
        let start = var.offset.checked_mul(8);
        let end = start
            .zip(var.len.checked_mul(8))
            .and_then(|(start, size)| start.checked_add(size));
        let (Some(start), Some(end)) = (start, end) else {
            bail!("truncated data for variable '{}'", var.name);
        };
        ensure!(end <= values.len(), "truncated data for variable '{}'", var.name);
        let data = values[start..end]
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw)
            })
            .collect();
        let mut variable = Variable::new(var.dims, var.shape, data)
            .with_context(|| format!("malformed variable '{}'", var.name))?;
        variable.attrs = var.attrs;
        ds.insert(var.name, variable);
    }
    Ok(ds)
}
