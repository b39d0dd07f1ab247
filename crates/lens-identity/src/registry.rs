//! Append-only keyed record registry shared by peers and tokens.
//!
//! Records live in an arena addressed by [`RecordId`] and are indexed under
//! every key they currently know. Lookups take the read lock. A field write
//! takes the write lock to re-check, set, re-index and persist that single
//! record, so stored bodies follow the same order as in-memory writes.
//! Network lookups never run while a lock is held.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use eyre::{eyre, Result};
use lens_data::store::{load_typed, upsert_typed, RecordStore};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::field::Field;

/// Handle to a record in a registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId(usize);

/// A record kept in a [`Registry`].
pub trait Record: Clone + Serialize + DeserializeOwned + Send + Sync {
    type Key: Eq + Hash + Clone + Send + Sync;

    /// Every key this record can currently be found under.
    fn keys(&self) -> Vec<Self::Key>;
}

struct Inner<R: Record> {
    // (persisted key, record)
    records: Vec<(String, R)>,
    index: HashMap<R::Key, RecordId>,
}

impl<R: Record> Inner<R> {
    fn index_record(&mut self, id: RecordId) {
        let keys = self.records[id.0].1.keys();
        for key in keys {
            self.index.entry(key).or_insert(id);
        }
    }
}

pub struct Registry<R: Record> {
    set: &'static str,
    store: Arc<dyn RecordStore>,
    inner: RwLock<Inner<R>>,
}

impl<R: Record> Registry<R> {
    /// Loads every record of `set` from `store`.
    pub fn load(set: &'static str, store: Arc<dyn RecordStore>) -> Result<Self> {
        let loaded = load_typed::<R>(store.as_ref(), set)?;
        let mut inner = Inner {
            records: Vec::with_capacity(loaded.len()),
            index: HashMap::new(),
        };
        for (key, record) in loaded {
            inner.records.push((key, record));
            inner.index_record(RecordId(inner.records.len() - 1));
        }
        tracing::debug!(set, records = inner.records.len(), "registry loaded");
        Ok(Self {
            set,
            store,
            inner: RwLock::new(inner),
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner<R>>> {
        self.inner
            .read()
            .map_err(|_| eyre!("{} registry lock poisoned", self.set))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner<R>>> {
        self.inner
            .write()
            .map_err(|_| eyre!("{} registry lock poisoned", self.set))
    }

    pub fn find(&self, key: &R::Key) -> Result<Option<RecordId>> {
        Ok(self.read()?.index.get(key).copied())
    }

    /// Finds the record under `key` or creates one from `seed`, persisting it under `store_key`.
    pub fn get_or_create(
        &self,
        key: R::Key,
        store_key: String,
        seed: impl FnOnce() -> R,
    ) -> Result<RecordId> {
        if let Some(id) = self.find(&key)? {
            return Ok(id);
        }

        let mut inner = self.write()?;
        if let Some(id) = inner.index.get(&key) {
            return Ok(*id);
        }
        let record = seed();
        upsert_typed(self.store.as_ref(), self.set, &store_key, &record)?;
        tracing::debug!(set = self.set, key = %store_key, "registry record created");

        inner.records.push((store_key, record));
        let id = RecordId(inner.records.len() - 1);
        inner.index.insert(key, id);
        inner.index_record(id);
        Ok(id)
    }

    /// Copy of the record.
    pub fn snapshot(&self, id: RecordId) -> Result<R> {
        self.read()?
            .records
            .get(id.0)
            .map(|(_, record)| record.clone())
            .ok_or_else(|| eyre!("unknown {} record {id:?}", self.set))
    }

    /// Copies of every record.
    pub fn all(&self) -> Result<Vec<R>> {
        Ok(self
            .read()?
            .records
            .iter()
            .map(|(_, record)| record.clone())
            .collect())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read()?.records.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Writes `value` into the field chosen by `select` if it still needs a
    /// lookup, re-indexes the record and persists it.
    ///
    /// Returns false when another writer already settled the field.
    pub fn settle<T>(
        &self,
        id: RecordId,
        select: impl FnOnce(&mut R) -> &mut Field<T>,
        value: Field<T>,
    ) -> Result<bool> {
        let mut inner = self.write()?;
        let (store_key, record) = inner
            .records
            .get_mut(id.0)
            .ok_or_else(|| eyre!("unknown {} record {id:?}", self.set))?;
        let field = select(record);
        if !field.needs_lookup() {
            return Ok(false);
        }
        *field = value;
        upsert_typed(self.store.as_ref(), self.set, store_key, record)?;
        inner.index_record(id);
        Ok(true)
    }
}
