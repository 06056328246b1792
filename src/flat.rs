//! Flat key view over the hierarchical database
//!
//! For callers that only have hashes. A single hash `h` lives at path
//! `["h"]` under hash `h`; a pair `(a, b)` lives at `["a", "b"]` under `b`.
//! Keying a folder by the hash spreads entries over many small folders, so
//! a cleanup pass can drop whole folders at once.

use crate::database::HierarchicalDatabase;
use crate::error::Result;
use crate::key::HdbKey;
use crate::slice::ByteSlice;

/// Hash-keyed access to a `HierarchicalDatabase`
#[derive(Clone)]
pub struct FlatDatabase {
    inner: HierarchicalDatabase,
}

impl FlatDatabase {
    pub fn new(inner: HierarchicalDatabase) -> Self {
        Self { inner }
    }

    /// Key for a single hash
    pub fn key(hash: u64) -> HdbKey {
        HdbKey::new(&[hash.to_string()], hash)
    }

    /// Key for a (group, hash) pair
    pub fn pair_key(group: u64, hash: u64) -> HdbKey {
        HdbKey::new(&[group.to_string(), hash.to_string()], hash)
    }

    pub fn get(&self, hash: u64) -> Result<Option<ByteSlice>> {
        self.inner.get_key(&Self::key(hash))
    }

    pub fn put(&self, hash: u64, value: &[u8]) -> Result<()> {
        self.inner.put_key(&Self::key(hash), value)
    }

    pub fn delete(&self, hash: u64) -> Result<bool> {
        self.inner.delete_key(&Self::key(hash))
    }

    pub fn get_pair(&self, group: u64, hash: u64) -> Result<Option<ByteSlice>> {
        self.inner.get_key(&Self::pair_key(group, hash))
    }

    pub fn put_pair(&self, group: u64, hash: u64, value: &[u8]) -> Result<()> {
        self.inner.put_key(&Self::pair_key(group, hash), value)
    }

    pub fn delete_pair(&self, group: u64, hash: u64) -> Result<bool> {
        self.inner.delete_key(&Self::pair_key(group, hash))
    }

    /// The wrapped database
    pub fn inner(&self) -> &HierarchicalDatabase {
        &self.inner
    }

    pub fn into_inner(self) -> HierarchicalDatabase {
        self.inner
    }
}

impl From<HierarchicalDatabase> for FlatDatabase {
    fn from(inner: HierarchicalDatabase) -> Self {
        Self::new(inner)
    }
}
