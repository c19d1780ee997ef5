//! Local durable key-value storage.
//!
//! Two flavors share one key encoding:
//! - [`KeyValueStore`] is synchronous and holds small state (sync queue, attempt state);
//!   writes are durable before the call returns.
//! - [`AsyncKeyValueStore`] holds larger cached lesson content.
//!
//! Callers partition the synchronous store by key prefix so their writes never collide.

use async_trait::async_trait;
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{de::DeserializeOwned, Serialize};

use crate::error::StoreError;

pub mod file_store;
pub mod memory;

pub use file_store::{FileStore, FsAsyncStore};
pub use memory::{MemoryAsyncStore, MemoryStore};

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove(&self, key: &str) -> Result<(), StoreError>;
    fn keys(&self) -> Result<Vec<String>, StoreError>;
}

#[async_trait]
pub trait AsyncKeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    async fn put(&self, key: &str, value: String) -> Result<(), StoreError>;
    async fn delete(&self, key: &str) -> Result<(), StoreError>;
    /// Removes every key in this store.
    async fn clear(&self) -> Result<(), StoreError>;
}

pub fn read_json<T: DeserializeOwned>(
    store: &dyn KeyValueStore,
    key: &str,
) -> Result<Option<T>, StoreError> {
    match store.get(key)? {
        Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
        None => Ok(None),
    }
}

pub fn write_json<T: Serialize + ?Sized>(
    store: &dyn KeyValueStore,
    key: &str,
    value: &T,
) -> Result<(), StoreError> {
    let raw = serde_json::to_string(value)?;
    store.set(key, &raw)
}

/// Removes every key starting with `prefix`, returning how many were removed.
pub fn clear_prefix(store: &dyn KeyValueStore, prefix: &str) -> Result<usize, StoreError> {
    let keys = store
        .keys()?
        .into_iter()
        .filter(|key| key.starts_with(prefix))
        .collect::<Vec<_>>();
    for key in &keys {
        store.remove(key)?;
    }
    Ok(keys.len())
}

/// Characters left as-is in file names. `_` stays escaped, so names
/// containing a raw `_` never collide with an encoded key.
const KEY_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'.');

/// Maps an arbitrary key to a file-name-safe string. Reversible via [`decode_key`].
pub(crate) fn encode_key(key: &str) -> String {
    let encoded = utf8_percent_encode(key, KEY_ENCODE_SET).to_string();
    // No hidden files, and never `.` or `..`.
    match encoded.strip_prefix('.') {
        Some(rest) => format!("%2E{}", rest),
        None => encoded,
    }
}

pub(crate) fn decode_key(encoded: &str) -> Option<String> {
    percent_decode_str(encoded)
        .decode_utf8()
        .ok()
        .map(|key| key.into_owned())
}
