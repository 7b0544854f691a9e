//! Generic object serializer.
//!
//! Stores any [`CacheValue`] in one self-describing file: a magic header,
//! a one-byte tag naming the variant, then the payload. Objects are JSON,
//! datasets use the container layout so non-finite values survive, and
//! bytes are written raw.

use anyhow::{bail, Context};

use super::{check_kwargs, container, Serializer, OBJECT};
use crate::error::Result;
use crate::storage::Backend;
use crate::value::{CacheValue, Kwargs};

const MAGIC: &[u8; 4] = b"FNLO";
const TAG_OBJECT: u8 = b'J';
const TAG_DATASET: u8 = b'D';
const TAG_BYTES: u8 = b'B';

/// Factory for the generic object serializer.
pub fn serializer() -> Serializer {
    Serializer::new(OBJECT, load, dump)
}

fn load(backend: &dyn Backend, path: &str, kwargs: &Kwargs) -> Result<CacheValue> {
    check_kwargs(OBJECT, kwargs, &[])?;
    let bytes = backend.read(path)?;
    Ok(decode(&bytes)?)
}

fn dump(value: &CacheValue, backend: &dyn Backend, path: &str, kwargs: &Kwargs) -> Result<()> {
    check_kwargs(OBJECT, kwargs, &[])?;
    backend.write(path, &encode(value)?)
}

fn encode(value: &CacheValue) -> Result<Vec<u8>> {
    let mut out = MAGIC.to_vec();
    match value {
        CacheValue::Object(json) => {
            out.push(TAG_OBJECT);
            out.extend(serde_json::to_vec(json)?);
        }
        CacheValue::Dataset(ds) => {
            out.push(TAG_DATASET);
            out.extend(container::encode(ds)?);
        }
        CacheValue::Bytes(bytes) => {
            out.push(TAG_BYTES);
            out.extend_from_slice(bytes);
        }
    }
    Ok(out)
}

fn decode(bytes: &[u8]) -> anyhow::Result<CacheValue> {
    if bytes.len() < MAGIC.len() + 1 || &bytes[..MAGIC.len()] != MAGIC {
        bail!("not an object artifact (bad header)");
    }
    let payload = &bytes[MAGIC.len() + 1..];
    let value = match bytes[MAGIC.len()] {
        TAG_OBJECT => {
            CacheValue::Object(serde_json::from_slice(payload).context("invalid object payload")?)
        }
        TAG_DATASET => {
            CacheValue::Dataset(container::decode(payload).context("invalid dataset payload")?)
        }
        TAG_BYTES => CacheValue::Bytes(payload.to_vec()),
        other => bail!("unknown object tag {:#04x}", other),
    };
    Ok(value)
}
