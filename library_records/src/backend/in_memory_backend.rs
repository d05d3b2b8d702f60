use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicI32, Ordering};

use serde_json::{json, Value};

use crate::backend::{BackendError, Collection, LibraryBackend, RecordId};

/// Backend kept in process memory, behaves like a json-server instance
pub struct InMemoryLibraryBackend {
    record_sequence_generator: AtomicI32,
    collections: parking_lot::RwLock<HashMap<Collection, BTreeMap<RecordId, Value>>>,
}

impl Default for InMemoryLibraryBackend {
    fn default() -> Self {
        Self {
            record_sequence_generator: AtomicI32::new(1),
            collections: Default::default(),
        }
    }
}

fn with_id(mut record: Value, id: RecordId) -> Result<Value, BackendError> {
    if !record.is_object() {
        return Err(BackendError::Other(format!(
            "Record must be a JSON object, got {}",
            record
        )));
    }
    if let Some(fields) = record.as_object_mut() {
        fields.insert("id".to_string(), json!(id));
    }
    Ok(record)
}

#[async_trait::async_trait]
impl LibraryBackend for InMemoryLibraryBackend {
    async fn list(&self, collection: Collection) -> Result<Vec<Value>, BackendError> {
        Ok(self
            .collections
            .read()
            .get(&collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, collection: Collection, id: RecordId) -> Result<Value, BackendError> {
        self.collections
            .read()
            .get(&collection)
            .and_then(|records| records.get(&id))
            .cloned()
            .ok_or(BackendError::NotFound { collection, id })
    }

    async fn create(&self, collection: Collection, record: Value) -> Result<Value, BackendError> {
        let id = self
            .record_sequence_generator
            .fetch_add(1, Ordering::Relaxed);
        let record = with_id(record, id)?;
        self.collections
            .write()
            .entry(collection)
            .or_default()
            .insert(id, record.clone());
        Ok(record)
    }

    async fn replace(
        &self,
        collection: Collection,
        id: RecordId,
        record: Value,
    ) -> Result<Value, BackendError> {
        let record = with_id(record, id)?;
        let mut locked_collections = self.collections.write();
        match locked_collections
            .get_mut(&collection)
            .and_then(|records| records.get_mut(&id))
        {
            Some(existing) => {
                *existing = record.clone();
                Ok(record)
            }
            None => Err(BackendError::NotFound { collection, id }),
        }
    }

    async fn patch(
        &self,
        collection: Collection,
        id: RecordId,
        patch: Value,
    ) -> Result<Value, BackendError> {
        let mut locked_collections = self.collections.write();
        let existing = locked_collections
            .get_mut(&collection)
            .and_then(|records| records.get_mut(&id))
            .ok_or(BackendError::NotFound { collection, id })?;

        let mut merged = existing.clone();
        json_patch::merge(&mut merged, &patch);
        // the id is owned by the backend
        let merged = with_id(merged, id)?;
        *existing = merged.clone();
        Ok(merged)
    }

    async fn delete(&self, collection: Collection, id: RecordId) -> Result<(), BackendError> {
        self.collections
            .write()
            .get_mut(&collection)
            .and_then(|records| records.remove(&id))
            .map(|_| ())
            .ok_or(BackendError::NotFound { collection, id })
    }
}
