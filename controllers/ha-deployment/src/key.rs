//! Object keys.
//!
//! Queue items and cache lookups are keyed by `"namespace/name"` strings
//! (just `"name"` for cluster-scoped objects).

use kube::Resource;
use thiserror::Error;

/// Errors building or decoding an object key.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum KeyError {
    /// The object carries no name
    #[error("object has no name")]
    MissingName,

    /// The key is not `name` or `namespace/name`
    #[error("unexpected key format: {0:?}")]
    UnexpectedFormat(String),
}

/// Build the key for an object: `namespace/name`, or `name` when cluster-scoped.
pub fn meta_namespace_key<K: Resource>(obj: &K) -> Result<String, KeyError> {
    let meta = obj.meta();
    let name = meta
        .name
        .as_deref()
        .filter(|name| !name.is_empty())
        .ok_or(KeyError::MissingName)?;

    Ok(match meta.namespace.as_deref() {
        Some(namespace) if !namespace.is_empty() => format!("{namespace}/{name}"),
        _ => name.to_string(),
    })
}

/// Split a key into `(namespace, name)`. The namespace is empty for
/// cluster-scoped keys.
pub fn split_meta_namespace_key(key: &str) -> Result<(&str, &str), KeyError> {
    let unexpected = || KeyError::UnexpectedFormat(key.to_string());

    let (namespace, name) = match key.split_once('/') {
        None => ("", key),
        Some((_, rest)) if rest.contains('/') => return Err(unexpected()),
        Some(parts) => parts,
    };

    if name.is_empty() {
        return Err(unexpected());
    }
    Ok((namespace, name))
}
