//! Chunked directory dataset format.
//!
//! A dataset becomes a directory:
//!
//! ```text
//! <path>/.funnel-chunked.json    attrs, chunk size and variable layout
//! <path>/<var index>/<chunk no>  f64 LE values, at most `chunk_size` each
//! ```
//!
//! Dump kwargs: `mode` (`"w-"` fails when the target exists, `"w"` replaces
//! it) and `chunk_size` (values per chunk file). Load kwargs:
//! `drop_variables`, whose chunks are never read.

use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};

use super::{check_kwargs, drop_variables, Serializer, DATASET_CHUNKED};
use crate::error::{FunnelError, Result};
use crate::storage::{join_path, Backend};
use crate::value::dataset::Attrs;
use crate::value::{CacheValue, Dataset, Kwargs, Variable};

const LAYOUT_FILE: &str = ".funnel-chunked.json";
const DEFAULT_CHUNK_SIZE: usize = 65_536;

#[derive(Debug, Serialize, Deserialize)]
struct Layout {
    chunk_size: usize,
    attrs: Attrs,
    variables: Vec<VariableLayout>,
}

#[derive(Debug, Serialize, Deserialize)]
struct VariableLayout {
    name: String,
    dims: Vec<String>,
    shape: Vec<usize>,
    attrs: Attrs,
    chunks: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Create,
    Overwrite,
}

/// Factory for the chunked directory serializer.
pub fn serializer() -> Serializer {
    Serializer::new(DATASET_CHUNKED, load, dump)
}

fn write_mode(kwargs: &Kwargs) -> Result<WriteMode> {
    match kwargs.get("mode") {
        None => Ok(WriteMode::Create),
        Some(serde_json::Value::String(mode)) if mode == "w-" => Ok(WriteMode::Create),
        Some(serde_json::Value::String(mode)) if mode == "w" => Ok(WriteMode::Overwrite),
        Some(other) => Err(FunnelError::validation(format!(
            "'{}': mode must be \"w\" or \"w-\", got {}",
            DATASET_CHUNKED, other
        ))),
    }
}

fn chunk_size(kwargs: &Kwargs) -> Result<usize> {
    match kwargs.get("chunk_size") {
        None => Ok(DEFAULT_CHUNK_SIZE),
        Some(value) => value
            .as_u64()
            .filter(|n| *n > 0)
            .map(|n| n as usize)
            .ok_or_else(|| {
                FunnelError::validation(format!(
                    "'{}': chunk_size must be a positive integer, got {}",
                    DATASET_CHUNKED, value
                ))
            }),
    }
}

fn dump(value: &CacheValue, backend: &dyn Backend, path: &str, kwargs: &Kwargs) -> Result<()> {
    check_kwargs(DATASET_CHUNKED, kwargs, &["mode", "chunk_size"])?;
    let mode = write_mode(kwargs)?;
    let chunk_size = chunk_size(kwargs)?;
    let ds = value.as_dataset().ok_or_else(|| {
        FunnelError::validation(format!(
            "'{}' can only store datasets, got {}",
            DATASET_CHUNKED,
            value.kind()
        ))
    })?;

    if backend.exists(path)? {
        match mode {
            WriteMode::Create => {
                return Err(FunnelError::validation(format!(
                    "'{}': {} already exists (pass mode \"w\" to replace it)",
                    DATASET_CHUNKED, path
                )));
            }
            WriteMode::Overwrite => backend.remove(path)?,
        }
    }
    backend.makedirs(path)?;

    let mut variables = Vec::with_capacity(ds.len());
    for (index, (name, var)) in ds.variables.iter().enumerate() {
        let dir = join_path(path, &index.to_string());
        let mut chunks = 0;
        for (chunk_no, chunk) in var.data.chunks(chunk_size).enumerate() {
            let bytes: Vec<u8> = chunk.iter().flat_map(|v| v.to_le_bytes()).collect();
            backend.write(&join_path(&dir, &chunk_no.to_string()), &bytes)?;
            chunks += 1;
        }
        variables.push(VariableLayout {
            name: name.clone(),
            dims: var.dims.clone(),
            shape: var.shape.clone(),
            attrs: var.attrs.clone(),
            chunks,
        });
    }

    let layout = Layout {
        chunk_size,
        attrs: ds.attrs.clone(),
        variables,
    };
    backend.write(
        &join_path(path, LAYOUT_FILE),
        &serde_json::to_vec_pretty(&layout)?,
    )
}

fn load(backend: &dyn Backend, path: &str, kwargs: &Kwargs) -> Result<CacheValue> {
    check_kwargs(DATASET_CHUNKED, kwargs, &["drop_variables"])?;
    let dropped = drop_variables(DATASET_CHUNKED, kwargs)?;
    Ok(CacheValue::Dataset(read_dataset(backend, path, &dropped)?))
}

fn read_dataset(backend: &dyn Backend, path: &str, dropped: &[String]) -> anyhow::Result<Dataset> {
    let raw = backend
        .read(&join_path(path, LAYOUT_FILE))
        .with_context(|| format!("{} is not a chunked dataset", path))?;
    let layout: Layout = serde_json::from_slice(&raw).context("invalid chunk layout")?;

    let mut ds = Dataset::new();
    ds.attrs = layout.attrs;
    for (index, var) in layout.variables.into_iter().enumerate() {
        if dropped.contains(&var.name) {
            continue;
        }
        let dir = join_path(path, &index.to_string());
        let mut data = Vec::new();
        for chunk_no in 0..var.chunks {
            let bytes = backend
                .read(&join_path(&dir, &chunk_no.to_string()))
                .with_context(|| format!("missing chunk {} of '{}'", chunk_no, var.name))?;
            ensure!(
                bytes.len() % 8 == 0,
                "chunk {} of '{}' is not a whole number of values",
                chunk_no,
                var.name
            );
            data.extend(bytes.chunks_exact(8).map(|raw| {
                let mut value = [0u8; 8];
                value.copy_from_slice(raw);
                f64::from_le_bytes(value)
            }));
        }
        let mut variable = Variable::new(var.dims, var.shape, data)
            .with_context(|| format!("malformed variable '{}'", var.name))?;
        variable.attrs = var.attrs;
        ds.insert(var.name, variable);
    }
    Ok(ds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;
    use serde_json::json;

    fn sample() -> Dataset {
        Dataset::new()
            .with_variable(
                "tas",
                Variable::from_vec("time", (0..10).map(f64::from).collect())
                    .with_attr("units", json!("K")),
            )
            .with_variable("lat", Variable::from_vec("lat", vec![-45.0, 45.0]))
            .with_attr("source", json!("CESM2"))
    }

    fn kwargs(pairs: serde_json::Value) -> Kwargs {
        pairs.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn roundtrip_splits_into_chunks() {
        let backend = MemoryBackend::new();
        let s = serializer();
        s.dump(&sample().into(), &backend, "/store/ds", &kwargs(json!({"chunk_size": 4})))
            .unwrap();

        let files = backend.list_files("/store/ds").unwrap();
        assert!(files.contains(&LAYOUT_FILE.to_string()));
        // tas is variable 1 in name order: 10 values in chunks of 4
        assert!(files.contains(&"1/2".to_string()));
        assert!(!files.contains(&"1/3".to_string()));

        let loaded = s.load(&backend, "/store/ds", &Kwargs::new()).unwrap();
        assert_eq!(loaded, CacheValue::Dataset(sample()));
    }

    #[test]
    fn default_mode_refuses_existing_target() {
        let backend = MemoryBackend::new();
        let s = serializer();
        s.dump(&sample().into(), &backend, "/ds", &Kwargs::new()).unwrap();

        let err = s
            .dump(&sample().into(), &backend, "/ds", &Kwargs::new())
            .unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn overwrite_mode_replaces_target() {
        let backend = MemoryBackend::new();
        let s = serializer();
        s.dump(&sample().into(), &backend, "/ds", &Kwargs::new()).unwrap();

        let smaller = Dataset::new().with_variable("x", Variable::from_vec("x", vec![1.0]));
        s.dump(&smaller.clone().into(), &backend, "/ds", &kwargs(json!({"mode": "w"})))
            .unwrap();

        assert_eq!(
            s.load(&backend, "/ds", &Kwargs::new()).unwrap(),
            CacheValue::Dataset(smaller)
        );
        assert!(!backend.exists("/ds/1").unwrap());
    }

    #[test]
    fn drop_variables_on_load() {
        let backend = MemoryBackend::new();
        let s = serializer();
        s.dump(&sample().into(), &backend, "/ds", &Kwargs::new()).unwrap();

        let ds = s
            .load(&backend, "/ds", &kwargs(json!({"drop_variables": "tas"})))
            .unwrap()
            .into_dataset()
            .unwrap();
        assert_eq!(ds.variable_names().into_iter().collect::<Vec<_>>(), vec!["lat"]);
    }

    #[test]
    fn invalid_dump_kwargs() {
        let backend = MemoryBackend::new();
        let s = serializer();
        for bad in [
            json!({"mode": "a"}),
            json!({"chunk_size": 0}),
            json!({"chunk_size": "big"}),
            json!({"compression": "zstd"}),
        ] {
            assert!(s.dump(&sample().into(), &backend, "/ds", &kwargs(bad)).is_err());
        }
        assert!(!backend.exists("/ds").unwrap());
    }

    #[test]
    fn missing_chunk_is_reported() {
        let backend = MemoryBackend::new();
        let s = serializer();
        s.dump(&sample().into(), &backend, "/ds", &Kwargs::new()).unwrap();
        backend.remove("/ds/0/0").unwrap();

        let err = s.load(&backend, "/ds", &Kwargs::new()).unwrap_err();
        assert!(err.to_string().contains("missing chunk 0 of 'lat'"));
    }
}
