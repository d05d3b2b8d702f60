use std::fmt;

use serde_json::Value;

pub use in_memory_backend::InMemoryLibraryBackend;

mod in_memory_backend;

pub type RecordId = i32;

/// REST collections served by the backend
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub enum Collection {
    Books,
    Members,
    Loans,
    Fines,
}

impl Collection {
    #[cfg(test)]
    pub(crate) const ALL: [Collection; 4] = [
        Collection::Books,
        Collection::Members,
        Collection::Loans,
        Collection::Fines,
    ];

    pub fn path(&self) -> &'static str {
        match self {
            Collection::Books => "books",
            Collection::Members => "members",
            Collection::Loans => "loans",
            Collection::Fines => "fines",
        }
    }

    #[cfg(test)]
    pub(crate) fn from_path(path: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|collection| collection.path() == path)
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path())
    }
}

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("Record {id} not found in {collection}")]
    NotFound { collection: Collection, id: RecordId },

    #[error("Backend responded with status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Transport failure {0}")]
    Transport(String),

    #[error("Failed to (de)serialize record: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error {0}")]
    Other(String),
}

impl BackendError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }
}

/// Generic CRUD access to the JSON collections
#[async_trait::async_trait]
pub trait LibraryBackend: Send + Sync {
    /// Lists all records of the collection in storage order
    async fn list(&self, collection: Collection) -> Result<Vec<Value>, BackendError>;
    /// Retrieves a single record
    async fn get(&self, collection: Collection, id: RecordId) -> Result<Value, BackendError>;
    /// Adds a record, returns it with the id assigned by the backend
    async fn create(&self, collection: Collection, record: Value) -> Result<Value, BackendError>;
    /// Replaces the whole record
    async fn replace(
        &self,
        collection: Collection,
        id: RecordId,
        record: Value,
    ) -> Result<Value, BackendError>;
    /// Merges `patch` into the record, returns the updated record
    async fn patch(
        &self,
        collection: Collection,
        id: RecordId,
        patch: Value,
    ) -> Result<Value, BackendError>;
    /// Removes the record
    async fn delete(&self, collection: Collection, id: RecordId) -> Result<(), BackendError>;
}
