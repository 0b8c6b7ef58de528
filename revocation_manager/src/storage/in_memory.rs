use std::{
    collections::HashMap,
    sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use async_trait::async_trait;

use super::{RecordMutator, RecordStore, TagFilter};
use crate::{
    errors::error::{RevocationError, RevocationResult},
    records::StoredRecord,
};

/// In-process `RecordStore` over a `RwLock`-guarded map with one `Mutex` per
/// record, so that single-record transactions serialize against each other
/// without blocking readers of other records.
pub struct InMemoryStore<R>
where
    R: StoredRecord,
{
    store: RwLock<HashMap<String, Mutex<R>>>,
}

impl<R: StoredRecord> Default for InMemoryStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: StoredRecord> InMemoryStore<R> {
    pub fn new() -> Self {
        InMemoryStore {
            store: RwLock::new(HashMap::new()),
        }
    }

    fn read_guard(&self) -> RevocationResult<RwLockReadGuard<'_, HashMap<String, Mutex<R>>>> {
        self.store.read().map_err(|err| {
            error!("Unable to read-lock {} store: {err:?}", R::RECORD_TYPE);
            RevocationError::Storage(format!("unable to read-lock {} store", R::RECORD_TYPE))
        })
    }

    fn write_guard(&self) -> RevocationResult<RwLockWriteGuard<'_, HashMap<String, Mutex<R>>>> {
        self.store.write().map_err(|err| {
            error!("Unable to write-lock {} store: {err:?}", R::RECORD_TYPE);
            RevocationError::Storage(format!("unable to write-lock {} store", R::RECORD_TYPE))
        })
    }

    fn lock_record_err() -> RevocationError {
        RevocationError::Storage(format!("unable to lock {} record", R::RECORD_TYPE))
    }
}

#[async_trait]
impl<R: StoredRecord> RecordStore<R> for InMemoryStore<R> {
    async fn insert(&self, record: R) -> RevocationResult<String> {
        let record_id = record.record_id().to_string();
        let mut store = self.write_guard()?;
        store.insert(record_id.clone(), Mutex::new(record));
        Ok(record_id)
    }

    async fn get(&self, record_id: &str) -> RevocationResult<R> {
        let store = self.read_guard()?;
        match store.get(record_id) {
            Some(cell) => cell
                .lock()
                .map(|record| record.clone())
                .map_err(|_| Self::lock_record_err()),
            None => Err(RevocationError::not_found(R::RECORD_TYPE, record_id)),
        }
    }

    async fn find(&self, filter: &TagFilter) -> RevocationResult<Vec<R>> {
        let store = self.read_guard()?;
        let mut found = Vec::new();
        for cell in store.values() {
            let record = cell.lock().map_err(|_| Self::lock_record_err())?;
            if filter.matches(&record.tags()) {
                found.push(record.clone());
            }
            if filter.limit.is_some_and(|limit| found.len() >= limit) {
                break;
            }
        }
        Ok(found)
    }

    async fn update(&self, record_id: &str, apply: RecordMutator<'_, R>) -> RevocationResult<R> {
        let store = self.read_guard()?;
        let cell = store
            .get(record_id)
            .ok_or_else(|| RevocationError::not_found(R::RECORD_TYPE, record_id))?;
        let mut record = cell.lock().map_err(|_| Self::lock_record_err())?;
        apply(&mut record)?;
        Ok(record.clone())
    }

    async fn remove(&self, record_id: &str) -> RevocationResult<()> {
        let mut store = self.write_guard()?;
        store
            .remove(record_id)
            .map(|_| ())
            .ok_or_else(|| RevocationError::not_found(R::RECORD_TYPE, record_id))
    }
}
